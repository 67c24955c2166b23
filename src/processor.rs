use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::automation::{AutomationReport, EXPORT_PDF_SCRIPT};
use crate::browser::{BrowserHost, TabId};
use crate::config::Timings;
use crate::coordinator::CoordinatorHandle;
use crate::dom_extractor::DomProfileExtractor;
use crate::error::ScrapeError;
use crate::interceptor::NetworkInterceptor;
use crate::messages::{ExtractionEvent, ExtractionOutcome};
use crate::profile::StructuredProfile;
use crate::queue::{QueueItem, QueueResult};
use crate::recruiting_api::RecruitingApi;
use crate::relay::{CaptureRelay, DomMailbox, RelayOutcome};

/// Processes one already-open tab into a result.
#[async_trait]
pub trait TabProcessor: Send + Sync {
    async fn process_tab(
        &self,
        item: &QueueItem,
        scorecard_id: &str,
    ) -> Result<QueueResult, ScrapeError>;

    /// Called once the engine has closed a tab it opened.
    fn release(&self, _tab: &TabId) {}
}

/// Aborts the relay task when the capture attempt ends, however it ends.
struct RelayGuard(JoinHandle<RelayOutcome>);

impl Drop for RelayGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Captures a profile through the page's own "Save to PDF" export.
pub struct ExtensionTabProcessor {
    host: Arc<dyn BrowserHost>,
    coordinator: CoordinatorHandle,
    api: Arc<dyn RecruitingApi>,
    interceptor: Arc<NetworkInterceptor>,
    timings: Timings,
    dom_fallback: bool,
}

impl ExtensionTabProcessor {
    pub fn new(
        host: Arc<dyn BrowserHost>,
        coordinator: CoordinatorHandle,
        api: Arc<dyn RecruitingApi>,
        interceptor: Arc<NetworkInterceptor>,
        timings: Timings,
        dom_fallback: bool,
    ) -> Self {
        Self {
            host,
            coordinator,
            api,
            interceptor,
            timings,
            dom_fallback,
        }
    }

    /// Single-profile mode: capture whatever profile `tab` shows, without scoring.
    pub async fn capture_single(&self, tab: &TabId) -> Result<StructuredProfile, ScrapeError> {
        let url = self
            .host
            .query_tabs()
            .await?
            .into_iter()
            .find(|t| &t.id == tab)
            .map(|t| t.url)
            .ok_or_else(|| ScrapeError::TabLifecycle(format!("tab {} is gone", tab)))?;
        let item = QueueItem::from_url(&url, Some(tab.clone())).ok_or_else(|| {
            ScrapeError::ExtractionFailure(format!("{} is not a profile page", url))
        })?;

        let result = self.bounded_capture(&item, tab).await?;
        match (result.profile_data, result.error) {
            (Some(profile), _) => Ok(profile),
            (None, Some(error)) => Err(ScrapeError::ExtractionFailure(error)),
            (None, None) => Err(ScrapeError::CaptureTimeout(self.timings.extraction_wait)),
        }
    }

    /// The capture attempt raced against the hard per-tab cap.
    async fn bounded_capture(
        &self,
        item: &QueueItem,
        tab: &TabId,
    ) -> Result<QueueResult, ScrapeError> {
        tokio::select! {
            result = self.capture(item, tab) => result,
            _ = sleep(self.timings.tab_timeout) => {
                warn!(
                    "⏱️ [Processor] {} hit the {:?} hard timeout",
                    item.username, self.timings.tab_timeout
                );
                Err(ScrapeError::CaptureTimeout(self.timings.tab_timeout))
            }
        }
    }

    async fn capture(&self, item: &QueueItem, tab: &TabId) -> Result<QueueResult, ScrapeError> {
        let mut result = QueueResult::new(item);

        self.host.activate_tab(tab).await?;
        sleep(self.timings.focus_settle).await;

        let mut events = self.coordinator.subscribe();
        let mailbox = Arc::new(DomMailbox::new(self.host.clone(), tab.clone()));
        let _relay = RelayGuard(CaptureRelay::from_timings(&self.timings).spawn(
            mailbox,
            self.coordinator.outbox(),
            Some(tab.clone()),
        ));

        match self.interceptor.install(self.host.as_ref(), tab).await {
            Ok(_) => {
                if let Err(e) = self.export_pdf(tab).await {
                    warn!("⚠️ [Processor] {}: {}", item.username, e);
                    result.automation_failure = Some(match e {
                        ScrapeError::AutomationStepFailure { step } => step,
                        other => other.to_string(),
                    });
                }
            }
            Err(e) => {
                warn!("⚠️ [Processor] no interceptor in tab {}: {}", tab, e);
                result.automation_failure = Some("interceptor".to_string());
            }
        }

        match self.await_extraction(&mut events, tab, &item.url).await {
            Some(event) => match event.outcome {
                ExtractionOutcome::Succeeded(profile) => {
                    info!(
                        "✅ [Processor] {} captured via {:?}",
                        item.username, event.source
                    );
                    result.profile_data = Some(profile);
                }
                ExtractionOutcome::Failed(error) => result.error = Some(error),
            },
            None => {
                result.error =
                    Some(ScrapeError::CaptureTimeout(self.timings.extraction_wait).to_string())
            }
        }
        Ok(result)
    }

    async fn export_pdf(&self, tab: &TabId) -> Result<(), ScrapeError> {
        let value = self
            .host
            .inject(tab, EXPORT_PDF_SCRIPT)
            .await
            .map_err(|e| ScrapeError::AutomationStepFailure {
                step: format!("inject: {}", e),
            })?;
        let report = AutomationReport::from_value(value);
        if report.ok {
            debug!("[Processor] export clicked in tab {}", tab);
            Ok(())
        } else {
            Err(ScrapeError::AutomationStepFailure {
                step: report.step.unwrap_or_else(|| "unknown".to_string()),
            })
        }
    }

    /// Waits for this tab's extraction event, then falls back to the DOM if allowed.
    async fn await_extraction(
        &self,
        events: &mut broadcast::Receiver<ExtractionEvent>,
        tab: &TabId,
        page_url: &str,
    ) -> Option<ExtractionEvent> {
        match timeout(self.timings.extraction_wait, next_event_for(events, tab)).await {
            Ok(Some(event)) => return Some(event),
            Ok(None) => warn!("[Processor] coordinator event stream closed"),
            Err(_) => info!(
                "⏳ [Processor] no capture in tab {} after {:?}",
                tab, self.timings.extraction_wait
            ),
        }

        if !self.dom_fallback {
            return None;
        }
        match DomProfileExtractor::new(self.host.clone())
            .extract(tab, page_url)
            .await
        {
            Ok(extraction) => {
                let event = extraction.into_event(Some(tab.clone()));
                self.coordinator.publish(event.clone());
                Some(event)
            }
            Err(e) => {
                warn!("⚠️ [Processor] DOM fallback failed in tab {}: {}", tab, e);
                None
            }
        }
    }

    async fn score(&self, result: &mut QueueResult, scorecard_id: &str) {
        let Some(profile) = &result.profile_data else {
            return;
        };
        if !self.coordinator.ai_enabled().await {
            return;
        }
        match self.api.evaluate_scorecard_with_ai(scorecard_id, profile).await {
            Ok(verdict) => {
                info!(
                    "🎯 [Processor] {} scored {:.2}",
                    result.username, verdict.average_score
                );
                result.match_result = Some(verdict);
            }
            Err(e) => warn!("⚠️ [Processor] scoring {} failed: {:#}", result.username, e),
        }
    }
}

async fn next_event_for(
    events: &mut broadcast::Receiver<ExtractionEvent>,
    tab: &TabId,
) -> Option<ExtractionEvent> {
    loop {
        match events.recv().await {
            Ok(event) if event.concerns(tab) => return Some(event),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!("[Processor] skipped {} stale events", skipped);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

#[async_trait]
impl TabProcessor for ExtensionTabProcessor {
    async fn process_tab(
        &self,
        item: &QueueItem,
        scorecard_id: &str,
    ) -> Result<QueueResult, ScrapeError> {
        let tab = item
            .id
            .clone()
            .ok_or_else(|| ScrapeError::TabLifecycle(format!("{} has no tab", item.username)))?;

        let mut result = self.bounded_capture(item, &tab).await?;
        self.score(&mut result, scorecard_id).await;
        Ok(result)
    }

    fn release(&self, tab: &TabId) {
        self.interceptor.forget(tab);
    }
}
