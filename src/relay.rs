use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::automation::take_signal_script;
use crate::browser::{BrowserHost, TabId};
use crate::config::Timings;
use crate::error::ScrapeError;
use crate::messages::{CaptureReply, Envelope, Message, PROFILE_PDF_CAPTURED};

/// Single-slot hand-off point between the page realm and the controller.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Reads and clears the slot.
    async fn take(&self) -> Result<Option<String>, ScrapeError>;
}

/// The `data-profile-capture` attribute of a tab, read through the browser host.
pub struct DomMailbox {
    host: Arc<dyn BrowserHost>,
    tab: TabId,
    script: String,
}

impl DomMailbox {
    pub fn new(host: Arc<dyn BrowserHost>, tab: TabId) -> Self {
        Self {
            host,
            tab,
            script: take_signal_script(),
        }
    }
}

#[async_trait]
impl Mailbox for DomMailbox {
    async fn take(&self) -> Result<Option<String>, ScrapeError> {
        let value = self.host.inject(&self.tab, &self.script).await?;
        Ok(match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            _ => None,
        })
    }
}

/// In-process slot; a second `put` overwrites an unread one.
#[derive(Default)]
pub struct MemoryMailbox {
    slot: Mutex<Option<String>>,
}

impl MemoryMailbox {
    pub fn put(&self, signal: impl Into<String>) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(signal.into());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().map(|s| s.is_none()).unwrap_or(true)
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn take(&self) -> Result<Option<String>, ScrapeError> {
        self.slot
            .lock()
            .map(|mut slot| slot.take())
            .map_err(|_| ScrapeError::Host("mailbox poisoned".into()))
    }
}

#[derive(Debug)]
pub enum RelayOutcome {
    /// The signal went to the coordinator; its direct answer arrives on `reply`.
    Forwarded { reply: oneshot::Receiver<CaptureReply> },
    /// Nothing showed up within the polling budget.
    Exhausted,
    /// The mailbox could no longer be read, usually because the tab closed.
    TabGone,
    /// The coordinator stopped accepting messages.
    Disconnected,
}

/// Carries one capture signal from a tab's mailbox to the coordinator.
#[derive(Debug, Clone)]
pub struct CaptureRelay {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl CaptureRelay {
    pub fn new(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            poll_interval,
            max_attempts,
        }
    }

    pub fn from_timings(timings: &Timings) -> Self {
        Self::new(timings.relay_poll_interval, timings.relay_max_attempts)
    }

    pub async fn run(
        &self,
        mailbox: &dyn Mailbox,
        outbox: &mpsc::Sender<Message>,
        tab: Option<TabId>,
    ) -> RelayOutcome {
        for attempt in 1..=self.max_attempts {
            match mailbox.take().await {
                Ok(Some(raw)) => {
                    info!("[Relay] capture signal found after {} poll(s)", attempt);
                    let data = serde_json::from_str(&raw)
                        .unwrap_or_else(|_| serde_json::json!({ "data": raw }));
                    let (reply_tx, reply_rx) = oneshot::channel();
                    let message = Message {
                        envelope: Envelope::new(PROFILE_PDF_CAPTURED, data),
                        sender_tab: tab,
                        reply: Some(reply_tx),
                    };
                    if outbox.send(message).await.is_err() {
                        warn!("[Relay] coordinator is gone, dropping capture");
                        return RelayOutcome::Disconnected;
                    }
                    return RelayOutcome::Forwarded { reply: reply_rx };
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("[Relay] mailbox unreadable, stopping: {}", e);
                    return RelayOutcome::TabGone;
                }
            }
            if outbox.is_closed() {
                return RelayOutcome::Disconnected;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        debug!("[Relay] no capture after {} polls", self.max_attempts);
        RelayOutcome::Exhausted
    }

    pub fn spawn(
        self,
        mailbox: Arc<dyn Mailbox>,
        outbox: mpsc::Sender<Message>,
        tab: Option<TabId>,
    ) -> JoinHandle<RelayOutcome> {
        tokio::spawn(async move { self.run(mailbox.as_ref(), &outbox, tab).await })
    }
}
