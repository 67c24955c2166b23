use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::browser::TabId;
use crate::error::ScrapeError;
use crate::interceptor::is_pdf_capture;
use crate::messages::{
    CapturePayload, CaptureReply, ExtractionEvent, ExtractionOutcome, ExtractionSource, Message,
    PROFILE_PDF_CAPTURED,
};
use crate::profile::{CapturedDocument, StructuredProfile};
use crate::recruiting_api::RecruitingApi;
use crate::settings::{Settings, SharedSettings};

const OUTBOX_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 64;

/// Turns a captured document into a structured profile.
#[async_trait]
pub trait ProfileExtractor: Send + Sync {
    async fn extract(&self, document: &CapturedDocument) -> Result<StructuredProfile, ScrapeError>;
}

/// Delegates extraction to the recruiting API.
pub struct RemoteExtractor {
    api: Arc<dyn RecruitingApi>,
}

impl RemoteExtractor {
    pub fn new(api: Arc<dyn RecruitingApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ProfileExtractor for RemoteExtractor {
    async fn extract(&self, document: &CapturedDocument) -> Result<StructuredProfile, ScrapeError> {
        self.api
            .extract_profile_from_pdf(&document.data)
            .await
            .map_err(|e| ScrapeError::ExtractionFailure(format!("{:#}", e)))
    }
}

/// How the UI entry point should open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum ActionBehavior {
    SidePanel,
    Popup,
}

pub fn reconcile_action_behavior(settings: &Settings) -> ActionBehavior {
    if settings.open_in_side_panel {
        ActionBehavior::SidePanel
    } else {
        ActionBehavior::Popup
    }
}

/// What `dispatch` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Accepted; the answer is delivered later on the reply channel.
    Pending,
    /// Answered synchronously (rejected).
    Handled,
    /// Unknown action.
    Ignored,
}

/// Routes inter-context messages and broadcasts extraction results.
#[derive(Clone)]
pub struct Coordinator {
    extractor: Arc<dyn ProfileExtractor>,
    markers: Arc<Vec<String>>,
    events: broadcast::Sender<ExtractionEvent>,
}

/// Cheap handle to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    outbox: mpsc::Sender<Message>,
    events: broadcast::Sender<ExtractionEvent>,
    settings: SharedSettings,
}

impl CoordinatorHandle {
    pub fn outbox(&self) -> mpsc::Sender<Message> {
        self.outbox.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExtractionEvent> {
        self.events.subscribe()
    }

    /// Broadcasts an event produced outside the message path (DOM fallback).
    pub fn publish(&self, event: ExtractionEvent) {
        let _ = self.events.send(event);
    }

    pub fn settings(&self) -> SharedSettings {
        self.settings.clone()
    }

    pub async fn ai_enabled(&self) -> bool {
        self.settings.read().await.is_ai_enabled
    }
}

impl Coordinator {
    pub fn new(extractor: Arc<dyn ProfileExtractor>, markers: Vec<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            extractor,
            markers: Arc::new(markers),
            events,
        }
    }

    /// Spawns the message loop and returns its handle.
    pub async fn start(
        extractor: Arc<dyn ProfileExtractor>,
        settings: SharedSettings,
        markers: Vec<String>,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let behavior = reconcile_action_behavior(&*settings.read().await);
        info!("🧭 [Coordinator] action behavior: {:?}", behavior);

        let coordinator = Coordinator::new(extractor, markers);
        let (outbox, mut inbox) = mpsc::channel::<Message>(OUTBOX_CAPACITY);
        let handle = CoordinatorHandle {
            outbox,
            events: coordinator.events.clone(),
            settings,
        };

        let task = tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let action = message.envelope.action.clone();
                let dispatch = coordinator.dispatch(message);
                debug!("[Coordinator] {} -> {:?}", action, dispatch);
            }
            info!("[Coordinator] inbox closed, stopping");
        });

        (handle, task)
    }

    pub fn dispatch(&self, message: Message) -> Dispatch {
        let Message {
            envelope,
            sender_tab,
            reply,
        } = message;

        if envelope.action != PROFILE_PDF_CAPTURED {
            debug!("[Coordinator] ignoring action {}", envelope.action);
            return Dispatch::Ignored;
        }

        let document = serde_json::from_value::<CapturePayload>(envelope.data)
            .map_err(|e| ScrapeError::Payload(e.to_string()))
            .and_then(|payload| payload.decode())
            .and_then(|document| self.validate(document));

        match document {
            Ok(document) => {
                let this = self.clone();
                tokio::spawn(async move { this.handle_capture(document, sender_tab, reply).await });
                Dispatch::Pending
            }
            Err(e) => {
                warn!("⚠️ [Coordinator] rejected capture: {}", e);
                self.finish(sender_tab, reply, Err(e.to_string()));
                Dispatch::Handled
            }
        }
    }

    fn validate(&self, document: CapturedDocument) -> Result<CapturedDocument, ScrapeError> {
        let url = document.source_url.as_deref().unwrap_or("");
        if is_pdf_capture(Some(&document.media_type), url, &self.markers)
            || document.data.starts_with(b"%PDF")
        {
            Ok(document)
        } else {
            Err(ScrapeError::Payload(format!(
                "not a PDF ({})",
                document.media_type
            )))
        }
    }

    pub async fn handle_capture(
        &self,
        document: CapturedDocument,
        tab: Option<TabId>,
        reply: Option<oneshot::Sender<CaptureReply>>,
    ) {
        info!(
            "📄 [Coordinator] extracting {} byte capture from {:?}",
            document.data.len(),
            document.source_url
        );
        let outcome = self
            .extractor
            .extract(&document)
            .await
            .map_err(|e| e.to_string());
        if let Err(e) = &outcome {
            warn!("⚠️ [Coordinator] extraction failed: {}", e);
        }
        self.finish(tab, reply, outcome);
    }

    fn finish(
        &self,
        tab: Option<TabId>,
        reply: Option<oneshot::Sender<CaptureReply>>,
        outcome: Result<StructuredProfile, String>,
    ) {
        if let Some(reply) = reply {
            let answer = match &outcome {
                Ok(profile) => CaptureReply::Success(profile.clone()),
                Err(e) => CaptureReply::Failure(e.clone()),
            };
            let _ = reply.send(answer);
        }

        let outcome = match outcome {
            Ok(profile) => ExtractionOutcome::Succeeded(profile),
            Err(e) => ExtractionOutcome::Failed(e),
        };
        let _ = self.events.send(ExtractionEvent {
            tab,
            source: ExtractionSource::Pdf,
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Envelope;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde_json::json;
    use tokio::sync::RwLock;

    struct NamedExtractor;

    #[async_trait]
    impl ProfileExtractor for NamedExtractor {
        async fn extract(&self, document: &CapturedDocument) -> Result<StructuredProfile, ScrapeError> {
            if document.data.ends_with(b"bad") {
                return Err(ScrapeError::ExtractionFailure("api said no".into()));
            }
            Ok(StructuredProfile {
                name: Some("Jane Doe".into()),
                ..Default::default()
            })
        }
    }

    fn payload(body: &[u8]) -> CapturePayload {
        CapturePayload {
            data: STANDARD.encode(body),
            media_type: Some("application/pdf".into()),
            source_url: None,
        }
    }

    fn coordinator() -> Coordinator {
        Coordinator::new(Arc::new(NamedExtractor), vec!["/ambry/".into()])
    }

    #[tokio::test]
    async fn capture_replies_and_broadcasts() {
        let coordinator = coordinator();
        let mut events = coordinator.events.subscribe();
        let (message, reply) = Message::capture(&payload(b"%PDF-1.4"), Some(TabId::from("t1")));

        assert_eq!(coordinator.dispatch(message), Dispatch::Pending);

        let answer = reply.await.unwrap();
        assert!(matches!(answer, CaptureReply::Success(ref p) if p.name.as_deref() == Some("Jane Doe")));

        let event = events.recv().await.unwrap();
        assert_eq!(event.tab, Some(TabId::from("t1")));
        assert_eq!(event.source, ExtractionSource::Pdf);
        assert!(matches!(event.outcome, ExtractionOutcome::Succeeded(_)));
    }

    #[tokio::test]
    async fn extractor_failure_is_reported_both_ways() {
        let coordinator = coordinator();
        let mut events = coordinator.events.subscribe();
        let (message, reply) = Message::capture(&payload(b"%PDF bad"), None);

        assert_eq!(coordinator.dispatch(message), Dispatch::Pending);
        assert!(matches!(reply.await.unwrap(), CaptureReply::Failure(ref e) if e.contains("api said no")));
        assert!(matches!(
            events.recv().await.unwrap().outcome,
            ExtractionOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected_synchronously() {
        let coordinator = coordinator();
        let (tx, rx) = oneshot::channel();
        let message = Message {
            envelope: Envelope::new(PROFILE_PDF_CAPTURED, json!({"nope": 1})),
            sender_tab: None,
            reply: Some(tx),
        };
        assert_eq!(coordinator.dispatch(message), Dispatch::Handled);
        assert!(matches!(rx.await.unwrap(), CaptureReply::Failure(_)));
    }

    #[tokio::test]
    async fn non_pdf_body_is_rejected() {
        let coordinator = coordinator();
        let mut html = payload(b"<html></html>");
        html.media_type = Some("text/html".into());
        let (message, reply) = Message::capture(&html, None);
        assert_eq!(coordinator.dispatch(message), Dispatch::Handled);
        assert!(matches!(reply.await.unwrap(), CaptureReply::Failure(_)));
    }

    #[tokio::test]
    async fn unknown_actions_are_ignored() {
        let coordinator = coordinator();
        let message = Message {
            envelope: Envelope::new("somethingElse", json!({})),
            sender_tab: None,
            reply: None,
        };
        assert_eq!(coordinator.dispatch(message), Dispatch::Ignored);
    }

    #[tokio::test]
    async fn started_coordinator_serves_the_outbox() {
        let settings = Arc::new(RwLock::new(Settings {
            is_ai_enabled: true,
            ..Default::default()
        }));
        let (handle, _task) =
            Coordinator::start(Arc::new(NamedExtractor), settings, vec![]).await;
        assert!(handle.ai_enabled().await);

        let mut events = handle.subscribe();
        let (message, reply) = Message::capture(&payload(b"%PDF-1.7"), None);
        handle.outbox().send(message).await.unwrap();

        assert!(matches!(reply.await.unwrap(), CaptureReply::Success(_)));
        assert!(matches!(
            events.recv().await.unwrap().outcome,
            ExtractionOutcome::Succeeded(_)
        ));
    }

    #[test]
    fn action_behavior_follows_settings() {
        let mut settings = Settings::default();
        assert_eq!(reconcile_action_behavior(&settings), ActionBehavior::Popup);
        settings.open_in_side_panel = true;
        assert_eq!(reconcile_action_behavior(&settings), ActionBehavior::SidePanel);
    }
}
