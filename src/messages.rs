use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::browser::TabId;
use crate::error::ScrapeError;
use crate::profile::{CapturedDocument, StructuredProfile};

/// Action tag of the "profile document captured" message.
pub const PROFILE_PDF_CAPTURED: &str = "profilePdfCaptured";

/// Wire shape shared by every inter-context message: `{ action, data }`, with
/// `type` and `payload` accepted as aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(alias = "type")]
    pub action: String,
    #[serde(default, alias = "payload")]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(action: &str, data: serde_json::Value) -> Self {
        Self {
            action: action.to_string(),
            data,
        }
    }
}

/// Body of the capture signal written by the interceptor and forwarded by the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapturePayload {
    /// Base64 body, optionally wrapped in a `data:` URL.
    pub data: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
}

impl CapturePayload {
    /// Decodes the transport envelope into the raw document.
    pub fn decode(&self) -> Result<CapturedDocument, ScrapeError> {
        let (url_type, encoded) = match self.data.strip_prefix("data:") {
            Some(rest) => {
                let (meta, body) = rest
                    .split_once(',')
                    .ok_or_else(|| ScrapeError::Payload("data URL without body".into()))?;
                let media = meta.trim_end_matches(";base64");
                (Some(media.to_string()).filter(|m| !m.is_empty()), body)
            }
            None => (None, self.data.as_str()),
        };

        let data = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ScrapeError::Payload(format!("bad base64: {}", e)))?;
        if data.is_empty() {
            return Err(ScrapeError::Payload("empty document".into()));
        }

        Ok(CapturedDocument {
            data,
            media_type: self
                .media_type
                .clone()
                .or(url_type)
                .unwrap_or_else(|| "application/pdf".to_string()),
            source_url: self.source_url.clone(),
        })
    }
}

/// Direct answer to the sender of a capture message.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", content = "data", rename_all = "camelCase")]
pub enum CaptureReply {
    Success(StructuredProfile),
    Failure(String),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExtractionSource {
    Pdf,
    Dom,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ExtractionOutcome {
    Succeeded(StructuredProfile),
    Failed(String),
}

/// Broadcast to every listener once an extraction finishes, whichever tab it came from.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionEvent {
    pub tab: Option<TabId>,
    pub source: ExtractionSource,
    pub outcome: ExtractionOutcome,
}

impl ExtractionEvent {
    /// Events without a tab are accepted by any waiter; only one tab is processed at a time.
    pub fn concerns(&self, tab: &TabId) -> bool {
        self.tab.as_ref().map(|t| t == tab).unwrap_or(true)
    }
}

/// A message as delivered to the coordinator, with its optional reply channel.
#[derive(Debug)]
pub struct Message {
    pub envelope: Envelope,
    pub sender_tab: Option<TabId>,
    pub reply: Option<oneshot::Sender<CaptureReply>>,
}

impl Message {
    pub fn capture(payload: &CapturePayload, sender_tab: Option<TabId>) -> (Self, oneshot::Receiver<CaptureReply>) {
        let (tx, rx) = oneshot::channel();
        let envelope = Envelope::new(
            PROFILE_PDF_CAPTURED,
            serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        );
        (
            Self {
                envelope,
                sender_tab,
                reply: Some(tx),
            },
            rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_accepts_type_and_payload_aliases() {
        let env: Envelope =
            serde_json::from_value(json!({"type": "profilePdfCaptured", "payload": {"data": "QQ=="}}))
                .unwrap();
        assert_eq!(env.action, PROFILE_PDF_CAPTURED);
        assert_eq!(env.data["data"], "QQ==");
    }

    #[test]
    fn payload_decodes_plain_base64_and_data_urls() {
        let plain = CapturePayload {
            data: STANDARD.encode(b"%PDF-1.4"),
            media_type: None,
            source_url: None,
        };
        let doc = plain.decode().unwrap();
        assert_eq!(doc.data, b"%PDF-1.4");
        assert_eq!(doc.media_type, "application/pdf");

        let data_url = CapturePayload {
            data: format!("data:application/x-pdf;base64,{}", STANDARD.encode(b"%PDF")),
            media_type: None,
            source_url: Some("https://x/ambry/1".into()),
        };
        let doc = data_url.decode().unwrap();
        assert_eq!(doc.media_type, "application/x-pdf");
        assert_eq!(doc.source_url.as_deref(), Some("https://x/ambry/1"));
    }

    #[test]
    fn payload_rejects_garbage() {
        let bad = CapturePayload {
            data: "not base64!!".into(),
            media_type: None,
            source_url: None,
        };
        assert!(matches!(bad.decode(), Err(ScrapeError::Payload(_))));

        let empty = CapturePayload {
            data: String::new(),
            media_type: None,
            source_url: None,
        };
        assert!(matches!(empty.decode(), Err(ScrapeError::Payload(_))));
    }

    #[test]
    fn events_without_a_tab_concern_everyone() {
        let event = ExtractionEvent {
            tab: None,
            source: ExtractionSource::Pdf,
            outcome: ExtractionOutcome::Failed("x".into()),
        };
        assert!(event.concerns(&TabId::from("a")));

        let scoped = ExtractionEvent {
            tab: Some(TabId::from("a")),
            ..event
        };
        assert!(scoped.concerns(&TabId::from("a")));
        assert!(!scoped.concerns(&TabId::from("b")));
    }
}
