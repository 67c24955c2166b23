use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::browser::{BrowserHost, TabId};
use crate::error::ScrapeError;

/// DOM attribute on `<html>` used as the single-slot mailbox between realms.
pub const CAPTURE_ATTRIBUTE: &str = "data-profile-capture";

pub const INTERCEPTOR_TAG: &str = "/* recruit-capture:network-interceptor */";

/// Property set on the wrapped `fetch` so a second install recognises it.
const WRAPPER_MARK: &str = "__recruitCaptureHook";

/// Whether a response should be captured: either it declares a PDF body, or it
/// comes from an export endpoint known to omit the content type.
pub fn is_pdf_capture(content_type: Option<&str>, url: &str, markers: &[String]) -> bool {
    let declared_pdf = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/pdf"))
        .unwrap_or(false);
    declared_pdf || markers.iter().any(|m| !m.is_empty() && url.contains(m.as_str()))
}

fn interceptor_script(markers: &[String]) -> String {
    let markers_json = serde_json::to_string(markers).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"{INTERCEPTOR_TAG}
(() => {{
    const ATTR = '{CAPTURE_ATTRIBUTE}';
    const MARK = '{WRAPPER_MARK}';
    const MARKERS = {markers_json};
    if (window.fetch && window.fetch[MARK]) return 'already-installed';

    const isCapture = (type, url) => {{
        const ct = (type || '').toLowerCase();
        const u = url || '';
        return ct.includes('application/pdf') || MARKERS.some(m => m && u.includes(m));
    }};
    const toBase64 = (buffer) => {{
        const bytes = new Uint8Array(buffer);
        let binary = '';
        for (let i = 0; i < bytes.length; i += 0x8000) {{
            binary += String.fromCharCode.apply(null, bytes.subarray(i, i + 0x8000));
        }}
        return btoa(binary);
    }};
    const signal = (buffer, type, url) => {{
        document.documentElement.setAttribute(ATTR, JSON.stringify({{
            mediaType: type || 'application/pdf',
            sourceUrl: url || null,
            data: toBase64(buffer),
        }}));
    }};

    const originalFetch = window.fetch;
    const wrappedFetch = async function (...args) {{
        const response = await originalFetch.apply(this, args);
        try {{
            const type = response.headers.get('content-type');
            if (isCapture(type, response.url)) {{
                response.clone().arrayBuffer()
                    .then(buffer => signal(buffer, type, response.url))
                    .catch(err => console.warn('[recruit-capture] unreadable PDF body', err));
            }}
        }} catch (err) {{
            console.warn('[recruit-capture] fetch inspection failed', err);
        }}
        return response;
    }};
    Object.defineProperty(wrappedFetch, MARK, {{ value: true }});
    window.fetch = wrappedFetch;

    const originalOpen = XMLHttpRequest.prototype.open;
    const originalSend = XMLHttpRequest.prototype.send;
    XMLHttpRequest.prototype.open = function (method, url, ...rest) {{
        this.__recruitCaptureUrl = url;
        return originalOpen.call(this, method, url, ...rest);
    }};
    XMLHttpRequest.prototype.send = function (...args) {{
        this.addEventListener('load', () => {{
            try {{
                const type = this.getResponseHeader('content-type');
                const url = this.responseURL || this.__recruitCaptureUrl;
                if (!isCapture(type, url)) return;
                const body = this.response;
                if (body instanceof ArrayBuffer) {{
                    signal(body, type, url);
                }} else if (body instanceof Blob) {{
                    body.arrayBuffer().then(buffer => signal(buffer, type, url));
                }} else if (typeof body === 'string') {{
                    signal(Uint8Array.from(body, c => c.charCodeAt(0) & 0xff).buffer, type, url);
                }}
            }} catch (err) {{
                console.warn('[recruit-capture] XHR inspection failed', err);
            }}
        }});
        return originalSend.apply(this, args);
    }};
    return 'installed';
}})()"#
    )
}

/// Outcome of the latest install in a tab, owned by the interceptor instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptorState {
    /// This instance wrapped the page's network primitives.
    Installed,
    /// The page already carried a wrapper from an earlier injection.
    AlreadyPresent,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalled,
}

pub struct NetworkInterceptor {
    markers: Vec<String>,
    script: String,
    tabs: Mutex<HashMap<TabId, InterceptorState>>,
}

impl NetworkInterceptor {
    pub fn new(markers: Vec<String>) -> Self {
        let script = interceptor_script(&markers);
        Self {
            markers,
            script,
            tabs: Mutex::new(HashMap::new()),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn state(&self, tab: &TabId) -> Option<InterceptorState> {
        self.tabs.lock().ok().and_then(|tabs| tabs.get(tab).cloned())
    }

    /// Wraps the page's `fetch` and `XMLHttpRequest` in `tab`, at most once per
    /// page load. A reload or navigation drops the wrapper, so the script is
    /// always sent and the in-page mark decides whether to wrap again.
    pub async fn install(
        &self,
        host: &dyn BrowserHost,
        tab: &TabId,
    ) -> Result<InstallOutcome, ScrapeError> {
        let (state, outcome) = match host.inject(tab, &self.script).await {
            Ok(value) if value.as_str() == Some("already-installed") => {
                debug!("[Interceptor] tab {} already wrapped", tab);
                (
                    InterceptorState::AlreadyPresent,
                    Ok(InstallOutcome::AlreadyInstalled),
                )
            }
            Ok(_) => (InterceptorState::Installed, Ok(InstallOutcome::Installed)),
            Err(e) => {
                warn!("[Interceptor] install failed in tab {}: {}", tab, e);
                (InterceptorState::Failed(e.to_string()), Err(e))
            }
        };

        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.insert(tab.clone(), state);
        }
        outcome
    }

    /// Drops the state for a closed tab.
    pub fn forget(&self, tab: &TabId) {
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.remove(tab);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::TabInfo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Page double whose `fetch` is a wrapper id; injection wraps it unless the
    /// current wrapper already carries the mark.
    #[derive(Default)]
    struct FakePage {
        fetch_wrapper: Mutex<Option<u32>>,
        next_wrapper: AtomicU32,
        page_injections: AtomicU32,
    }

    impl FakePage {
        /// A fresh document: the page's own `fetch` is back.
        fn reload(&self) {
            *self.fetch_wrapper.lock().unwrap() = None;
        }
    }

    #[async_trait]
    impl BrowserHost for FakePage {
        async fn query_tabs(&self) -> Result<Vec<TabInfo>, ScrapeError> {
            Ok(Vec::new())
        }
        async fn create_tab(&self, _url: &str, _active: bool) -> Result<TabId, ScrapeError> {
            Ok(TabId::from("t"))
        }
        async fn activate_tab(&self, _tab: &TabId) -> Result<(), ScrapeError> {
            Ok(())
        }
        async fn remove_tab(&self, _tab: &TabId) -> Result<(), ScrapeError> {
            Ok(())
        }
        async fn inject(
            &self,
            _tab: &TabId,
            script: &str,
        ) -> Result<serde_json::Value, ScrapeError> {
            assert!(script.starts_with(INTERCEPTOR_TAG));
            self.page_injections.fetch_add(1, Ordering::SeqCst);
            let mut wrapper = self.fetch_wrapper.lock().unwrap();
            if wrapper.is_some() {
                return Ok(serde_json::json!("already-installed"));
            }
            *wrapper = Some(self.next_wrapper.fetch_add(1, Ordering::SeqCst));
            Ok(serde_json::json!("installed"))
        }
    }

    fn markers() -> Vec<String> {
        vec!["/ambry/".to_string()]
    }

    #[tokio::test]
    async fn second_install_keeps_the_same_wrapper() {
        let page = FakePage::default();
        let tab = TabId::from("tab-1");
        let interceptor = NetworkInterceptor::new(markers());

        assert_eq!(
            interceptor.install(&page, &tab).await.unwrap(),
            InstallOutcome::Installed
        );
        let first = *page.fetch_wrapper.lock().unwrap();

        assert_eq!(
            interceptor.install(&page, &tab).await.unwrap(),
            InstallOutcome::AlreadyInstalled
        );
        assert_eq!(*page.fetch_wrapper.lock().unwrap(), first);
        assert_eq!(interceptor.state(&tab), Some(InterceptorState::AlreadyPresent));
    }

    #[tokio::test]
    async fn reloaded_page_is_wrapped_again() {
        let page = FakePage::default();
        let tab = TabId::from("tab-1");
        let interceptor = NetworkInterceptor::new(markers());

        interceptor.install(&page, &tab).await.unwrap();
        page.reload();

        assert_eq!(
            interceptor.install(&page, &tab).await.unwrap(),
            InstallOutcome::Installed
        );
        assert!(page.fetch_wrapper.lock().unwrap().is_some());
        assert_eq!(page.page_injections.load(Ordering::SeqCst), 2);
        assert_eq!(interceptor.state(&tab), Some(InterceptorState::Installed));
    }

    #[tokio::test]
    async fn fresh_instance_reinjecting_does_not_rewrap() {
        let page = FakePage::default();
        let tab = TabId::from("tab-1");

        NetworkInterceptor::new(markers()).install(&page, &tab).await.unwrap();
        let first = *page.fetch_wrapper.lock().unwrap();

        let again = NetworkInterceptor::new(markers());
        assert_eq!(
            again.install(&page, &tab).await.unwrap(),
            InstallOutcome::AlreadyInstalled
        );
        assert_eq!(again.state(&tab), Some(InterceptorState::AlreadyPresent));
        assert_eq!(*page.fetch_wrapper.lock().unwrap(), first);
    }

    #[test]
    fn script_guards_on_the_wrapper_mark() {
        let script = interceptor_script(&markers());
        assert!(script.contains("if (window.fetch && window.fetch[MARK]) return 'already-installed';"));
        assert!(script.contains(r#"const MARKERS = ["/ambry/"];"#));
        assert!(script.contains(CAPTURE_ATTRIBUTE));
    }

    #[test]
    fn pdf_detection_uses_content_type_or_url_marker() {
        let m = markers();
        assert!(is_pdf_capture(Some("application/pdf"), "https://x/doc", &m));
        assert!(is_pdf_capture(Some("Application/PDF; charset=binary"), "https://x", &m));
        assert!(is_pdf_capture(None, "https://www.linkedin.com/ambry/?x-li-ambry-ep=1", &m));
        assert!(!is_pdf_capture(Some("text/html"), "https://www.linkedin.com/in/jane", &m));
        assert!(!is_pdf_capture(None, "https://x", &[String::new()]));
    }
}
