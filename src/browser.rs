use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::config::ChromeConfig;
use crate::error::ScrapeError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct TabId(pub String);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TabId {
    fn from(s: &str) -> Self {
        TabId(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
}

/// Tab and scripting primitives the capture pipeline needs from a browser.
#[async_trait]
pub trait BrowserHost: Send + Sync {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, ScrapeError>;
    async fn create_tab(&self, url: &str, active: bool) -> Result<TabId, ScrapeError>;
    async fn activate_tab(&self, tab: &TabId) -> Result<(), ScrapeError>;
    async fn remove_tab(&self, tab: &TabId) -> Result<(), ScrapeError>;
    /// Runs `script` in the page's main world of `tab` and returns its (awaited)
    /// JSON value. Page scripts see the page's own `fetch` and `XMLHttpRequest`.
    async fn inject(&self, tab: &TabId, script: &str) -> Result<serde_json::Value, ScrapeError>;
}

// ============================================================================
// Chrome DevTools Host
// ============================================================================

/// [`BrowserHost`] backed by a Chromium instance driven over the DevTools protocol.
pub struct ChromeHost {
    browser: Browser,
}

impl ChromeHost {
    pub fn launch(config: &ChromeConfig) -> anyhow::Result<Self> {
        let args = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--window-position=0,0"),
        ];

        let browser = Browser::new(LaunchOptions {
            headless: config.headless,
            window_size: Some(config.window_size),
            user_data_dir: config.user_data_dir.clone(),
            idle_browser_timeout: Duration::from_secs(60 * 60),
            args,
            ..Default::default()
        })?;

        info!(
            "[Browser] Chrome launched (headless: {}, profile: {:?})",
            config.headless, config.user_data_dir
        );
        Ok(Self { browser })
    }

    fn find_tab(&self, tab: &TabId) -> Result<Arc<Tab>, ScrapeError> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| ScrapeError::Host("tab registry poisoned".into()))?;
        tabs.iter()
            .find(|t| *t.get_target_id() == tab.0)
            .cloned()
            .ok_or_else(|| ScrapeError::TabLifecycle(format!("tab {} is gone", tab)))
    }
}

/// DevTools calls block on a response; keep them off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ScrapeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ScrapeError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ScrapeError::Host(format!("devtools call aborted: {}", e)))?
}

#[async_trait]
impl BrowserHost for ChromeHost {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, ScrapeError> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| ScrapeError::Host("tab registry poisoned".into()))?;
        Ok(tabs
            .iter()
            .map(|t| TabInfo {
                id: TabId(t.get_target_id().clone()),
                url: t.get_url(),
            })
            .collect())
    }

    async fn create_tab(&self, url: &str, active: bool) -> Result<TabId, ScrapeError> {
        let browser = self.browser.clone();
        let url = url.to_string();
        let id = blocking(move || {
            let tab = browser.new_tab().map_err(ScrapeError::host)?;
            tab.navigate_to(&url).map_err(|e| ScrapeError::TabLifecycle(e.to_string()))?;
            if active {
                tab.activate().map_err(ScrapeError::host)?;
            }
            Ok(TabId(tab.get_target_id().clone()))
        })
        .await?;
        debug!("[Browser] opened tab {}", id);
        Ok(id)
    }

    async fn activate_tab(&self, tab: &TabId) -> Result<(), ScrapeError> {
        let tab = self.find_tab(tab)?;
        blocking(move || tab.activate().map(|_| ()).map_err(ScrapeError::host)).await
    }

    async fn remove_tab(&self, tab: &TabId) -> Result<(), ScrapeError> {
        let tab = self.find_tab(tab)?;
        blocking(move || tab.close(true).map(|_| ()).map_err(ScrapeError::host)).await
    }

    async fn inject(&self, tab: &TabId, script: &str) -> Result<serde_json::Value, ScrapeError> {
        let tab = self.find_tab(tab)?;
        let script = script.to_string();
        blocking(move || {
            let result = tab.evaluate(&script, true).map_err(ScrapeError::host)?;
            Ok(result.value.unwrap_or(serde_json::Value::Null))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    #[ignore = "needs a local Chrome"]
    async fn tab_creation_leaves_the_runtime_free() {
        let host = ChromeHost::launch(&ChromeConfig {
            headless: true,
            user_data_dir: None,
            window_size: (1280, 800),
        })
        .unwrap();

        let ticker = tokio::spawn(async {
            let mut ticks = 0u32;
            loop {
                tokio::time::sleep(Duration::from_millis(1)).await;
                ticks += 1;
                if ticks == 3 {
                    return ticks;
                }
            }
        });
        let id = host.create_tab("about:blank", false).await.unwrap();

        assert_eq!(ticker.await.unwrap(), 3);
        let tabs = host.query_tabs().await.unwrap();
        assert!(tabs.iter().any(|t| t.id == id));
    }
}
