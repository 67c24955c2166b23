use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::browser::TabId;
use crate::profile::StructuredProfile;
use crate::recruiting_api::MatchResult;

// ============================================================================
// Queue Items
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Done,
    Error,
}

/// One profile to process, optionally backed by an already-open tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    #[serde(default)]
    pub id: Option<TabId>,
    pub url: String,
    pub username: String,
    #[serde(default)]
    pub status: ItemStatus,
}

impl QueueItem {
    /// Pending item for a profile URL; `None` when the URL is not a profile page.
    pub fn from_url(url: &str, tab: Option<TabId>) -> Option<Self> {
        let username = username_from_url(url)?;
        Some(Self {
            id: tab,
            url: url.to_string(),
            username,
            status: ItemStatus::Pending,
        })
    }
}

/// True for `https://*.linkedin.com/in/<handle>` pages.
pub fn is_profile_url(url: &str) -> bool {
    username_from_url(url).is_some()
}

pub fn username_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host != "linkedin.com" && !host.ends_with(".linkedin.com") {
        return None;
    }
    let mut segments = parsed.path_segments()?;
    if segments.next()? != "in" {
        return None;
    }
    let handle = segments.next().filter(|h| !h.is_empty())?;
    let decoded = urlencoding::decode(handle)
        .map(|h| h.into_owned())
        .unwrap_or_else(|_| handle.to_string());
    Some(decoded)
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    Accepted,
    Rejected,
}

/// Outcome of processing one item. Exactly one per item that entered processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueResult {
    pub username: String,
    pub tab_id: Option<TabId>,
    pub profile_data: Option<StructuredProfile>,
    pub match_result: Option<MatchResult>,
    pub error: Option<String>,
    /// Step at which the export automation gave up; the item may still succeed.
    pub automation_failure: Option<String>,
    pub decision: Option<Decision>,
    pub processed_at: DateTime<Utc>,
}

impl QueueResult {
    pub fn new(item: &QueueItem) -> Self {
        Self {
            username: item.username.clone(),
            tab_id: item.id.clone(),
            profile_data: None,
            match_result: None,
            error: None,
            automation_failure: None,
            decision: None,
            processed_at: Utc::now(),
        }
    }

    pub fn failed(item: &QueueItem, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(item)
        }
    }

    pub fn has_profile(&self) -> bool {
        self.profile_data.is_some()
    }

    pub fn score(&self) -> Option<f64> {
        self.match_result.as_ref().map(|m| m.average_score)
    }
}

// ============================================================================
// Engine State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum EnginePhase {
    Idle,
    Detecting,
    Sourcing,
    Running,
    /// Stop requested; the in-flight item is finishing.
    Stopping,
    Reviewing,
}

impl EnginePhase {
    /// Phases in which a new run or sourcing pass must not begin.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            EnginePhase::Sourcing | EnginePhase::Running | EnginePhase::Stopping
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub phase: EnginePhase,
    pub run_id: Option<Uuid>,
    pub scorecard_id: Option<String>,
    pub items: Vec<QueueItem>,
    pub current_index: usize,
    /// Append order, never re-sorted.
    pub results: Vec<QueueResult>,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            phase: EnginePhase::Idle,
            run_id: None,
            scorecard_id: None,
            items: Vec::new(),
            current_index: 0,
            results: Vec::new(),
        }
    }
}

impl QueueState {
    pub fn is_running(&self) -> bool {
        self.phase == EnginePhase::Running
    }

    /// Indices of profile-bearing results, best score first. Ties keep append order.
    pub fn review_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = self
            .results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.has_profile())
            .map(|(i, _)| i)
            .collect();
        order.sort_by(|a, b| {
            let sa = self.results[*a].score().unwrap_or(f64::MIN);
            let sb = self.results[*b].score().unwrap_or(f64::MIN);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }

    /// True once every profile-bearing result carries a decision.
    pub fn review_complete(&self) -> bool {
        self.results
            .iter()
            .filter(|r| r.has_profile())
            .all(|r| r.decision.is_some())
    }
}
