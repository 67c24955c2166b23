#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use recruit_capture::automation::{
    EXPORT_PDF_TAG, NEXT_PAGE_TAG, PAGE_HTML_TAG, RESULTS_SCRAPER_TAG, TAKE_SIGNAL_TAG,
};
use recruit_capture::browser::{BrowserHost, TabId, TabInfo};
use recruit_capture::config::Timings;
use recruit_capture::error::ScrapeError;
use recruit_capture::interceptor::INTERCEPTOR_TAG;
use recruit_capture::processor::TabProcessor;
use recruit_capture::profile::StructuredProfile;
use recruit_capture::queue::{username_from_url, QueueItem, QueueResult};
use recruit_capture::recruiting_api::{Application, MatchResult, RecruitingApi};

pub fn fast_timings() -> Timings {
    Timings {
        page_settle: Duration::from_millis(1),
        focus_settle: Duration::from_millis(1),
        search_settle: Duration::from_millis(1),
        extraction_wait: Duration::from_millis(300),
        tab_timeout: Duration::from_millis(800),
        relay_poll_interval: Duration::from_millis(5),
        relay_max_attempts: 400,
        jitter_min: Duration::from_millis(1),
        jitter_max: Duration::from_millis(3),
    }
}

pub fn profile_url(username: &str) -> String {
    format!("https://www.linkedin.com/in/{}", username)
}

pub fn item(username: &str, tab: Option<&str>) -> QueueItem {
    QueueItem::from_url(&profile_url(username), tab.map(TabId::from)).unwrap()
}

// ============================================================================
// Browser
// ============================================================================

/// What the export automation does in a profile tab.
#[derive(Debug, Clone)]
pub enum ExportBehavior {
    /// Click succeeds and the page downloads this PDF body.
    Capture(Vec<u8>),
    /// Automation reports failure at this step; nothing is downloaded.
    FailAt(&'static str),
    /// Click succeeds but no PDF ever arrives.
    Silent,
    /// The automation call never returns within the test.
    Hang(Duration),
}

#[derive(Default)]
struct HostState {
    tabs: Vec<TabInfo>,
    slots: HashMap<TabId, String>,
    exports: HashMap<String, ExportBehavior>,
    html: HashMap<String, String>,
    failing_urls: HashSet<String>,
    search_pages: Vec<Vec<String>>,
    search_page: usize,
    fail_scraper: bool,
    created: Vec<TabId>,
    closed: Vec<TabId>,
    activated: Vec<TabId>,
    interceptor_injections: usize,
}

/// Browser double that recognises injected scripts by their tag comment.
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
    next_id: AtomicU32,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_id(&self) -> TabId {
        TabId(format!("tab-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    /// Adds a tab the user already has open.
    pub fn open_tab(&self, url: &str) -> TabId {
        let id = self.new_id();
        self.state.lock().unwrap().tabs.push(TabInfo {
            id: id.clone(),
            url: url.to_string(),
        });
        id
    }

    pub fn on_export(&self, username: &str, behavior: ExportBehavior) {
        self.state
            .lock()
            .unwrap()
            .exports
            .insert(username.to_string(), behavior);
    }

    pub fn set_html(&self, username: &str, html: &str) {
        self.state
            .lock()
            .unwrap()
            .html
            .insert(username.to_string(), html.to_string());
    }

    pub fn fail_create(&self, url: &str) {
        self.state.lock().unwrap().failing_urls.insert(url.to_string());
    }

    pub fn set_search_pages(&self, pages: Vec<Vec<String>>) {
        self.state.lock().unwrap().search_pages = pages;
    }

    pub fn fail_scraper(&self) {
        self.state.lock().unwrap().fail_scraper = true;
    }

    pub fn created(&self) -> Vec<TabId> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn closed(&self) -> Vec<TabId> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn activated(&self) -> Vec<TabId> {
        self.state.lock().unwrap().activated.clone()
    }

    pub fn open_urls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tabs
            .iter()
            .map(|t| t.url.clone())
            .collect()
    }

    pub fn search_pages_visited(&self) -> usize {
        self.state.lock().unwrap().search_page + 1
    }

    pub fn interceptor_injections(&self) -> usize {
        self.state.lock().unwrap().interceptor_injections
    }

    /// Script evaluation as the page would see it, before DevTools serialises
    /// the result.
    async fn evaluate(&self, tab: &TabId, script: &str) -> Result<serde_json::Value, ScrapeError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            let url = Self::url_of(&state, tab)?;
            let username = username_from_url(&url).unwrap_or_default();

            if script.starts_with(INTERCEPTOR_TAG) {
                state.interceptor_injections += 1;
                return Ok(serde_json::json!("installed"));
            }
            if script.starts_with(TAKE_SIGNAL_TAG) {
                return Ok(state
                    .slots
                    .remove(tab)
                    .map(serde_json::Value::String)
                    .unwrap_or(serde_json::Value::Null));
            }
            if script.starts_with(PAGE_HTML_TAG) {
                return Ok(state
                    .html
                    .get(&username)
                    .map(|h| serde_json::Value::String(h.clone()))
                    .unwrap_or(serde_json::Value::Null));
            }
            if script.starts_with(RESULTS_SCRAPER_TAG) {
                if state.fail_scraper {
                    return Err(ScrapeError::Host("results list did not render".into()));
                }
                let page = state
                    .search_pages
                    .get(state.search_page)
                    .cloned()
                    .unwrap_or_default();
                return Ok(stringified(serde_json::json!(page)));
            }
            if script.starts_with(NEXT_PAGE_TAG) {
                if state.search_page + 1 < state.search_pages.len() {
                    state.search_page += 1;
                    return Ok(serde_json::json!(true));
                }
                return Ok(serde_json::json!(false));
            }
            if !script.starts_with(EXPORT_PDF_TAG) {
                return Err(ScrapeError::Host("unknown script".into()));
            }

            match state.exports.get(&username).cloned() {
                Some(ExportBehavior::Capture(pdf)) => {
                    state.slots.insert(tab.clone(), capture_signal(&pdf));
                    return Ok(stringified(serde_json::json!({ "ok": true })));
                }
                Some(ExportBehavior::FailAt(step)) => {
                    return Ok(stringified(serde_json::json!({ "ok": false, "step": step })));
                }
                Some(ExportBehavior::Hang(duration)) => duration,
                Some(ExportBehavior::Silent) | None => {
                    return Ok(stringified(serde_json::json!({ "ok": true })));
                }
            }
        };

        tokio::time::sleep(hang).await;
        Ok(stringified(serde_json::json!({ "ok": true })))
    }

    fn url_of(state: &HostState, tab: &TabId) -> Result<String, ScrapeError> {
        state
            .tabs
            .iter()
            .find(|t| &t.id == tab)
            .map(|t| t.url.clone())
            .ok_or_else(|| ScrapeError::TabLifecycle(format!("tab {} is gone", tab)))
    }
}

pub fn capture_signal(pdf: &[u8]) -> String {
    serde_json::json!({
        "data": STANDARD.encode(pdf),
        "mediaType": "application/pdf",
        "sourceUrl": "https://www.linkedin.com/ambry/?x-li-ambry-ep=export",
    })
    .to_string()
}

#[async_trait]
impl BrowserHost for FakeHost {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, ScrapeError> {
        Ok(self.state.lock().unwrap().tabs.clone())
    }

    async fn create_tab(&self, url: &str, _active: bool) -> Result<TabId, ScrapeError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_urls.contains(url) {
            return Err(ScrapeError::TabLifecycle(format!("cannot open {}", url)));
        }
        let id = self.new_id();
        state.tabs.push(TabInfo {
            id: id.clone(),
            url: url.to_string(),
        });
        state.created.push(id.clone());
        Ok(id)
    }

    async fn activate_tab(&self, tab: &TabId) -> Result<(), ScrapeError> {
        let mut state = self.state.lock().unwrap();
        Self::url_of(&state, tab)?;
        state.activated.push(tab.clone());
        Ok(())
    }

    async fn remove_tab(&self, tab: &TabId) -> Result<(), ScrapeError> {
        let mut state = self.state.lock().unwrap();
        Self::url_of(&state, tab)?;
        state.tabs.retain(|t| &t.id != tab);
        state.closed.push(tab.clone());
        Ok(())
    }

    async fn inject(
        &self,
        tab: &TabId,
        script: &str,
    ) -> Result<serde_json::Value, ScrapeError> {
        self.evaluate(tab, script).await.map(by_value)
    }
}

/// What `JSON.stringify` would hand back to the controller.
fn stringified(value: serde_json::Value) -> serde_json::Value {
    serde_json::Value::String(value.to_string())
}

/// DevTools returns primitives by value; objects and arrays arrive as remote
/// references with no value.
pub fn by_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => serde_json::Value::Null,
        primitive => primitive,
    }
}

// ============================================================================
// Recruiting API
// ============================================================================

/// API double: a PDF body `%PDF-<name>` extracts to a profile named `<name>`.
#[derive(Default)]
pub struct FakeApi {
    scores: Mutex<HashMap<String, f64>>,
    applications: Mutex<Vec<(String, Option<String>)>>,
    evaluations: AtomicUsize,
    application_delay: Mutex<Duration>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self, name: &str, score: f64) {
        self.scores.lock().unwrap().insert(name.to_string(), score);
    }

    /// Makes `create_application` take this long before answering.
    pub fn slow_applications(&self, delay: Duration) {
        *self.application_delay.lock().unwrap() = delay;
    }

    pub fn applications(&self) -> Vec<(String, Option<String>)> {
        self.applications.lock().unwrap().clone()
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecruitingApi for FakeApi {
    async fn extract_profile_from_pdf(&self, pdf: &[u8]) -> Result<StructuredProfile> {
        let text = String::from_utf8_lossy(pdf);
        match text.strip_prefix("%PDF-") {
            Some(name) if !name.is_empty() => Ok(StructuredProfile {
                name: Some(name.to_string()),
                ..Default::default()
            }),
            _ => bail!("unreadable PDF"),
        }
    }

    async fn evaluate_scorecard_with_ai(
        &self,
        _scorecard_id: &str,
        profile: &StructuredProfile,
    ) -> Result<MatchResult> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let name = profile.name.clone().unwrap_or_default();
        let score = self.scores.lock().unwrap().get(&name).copied().unwrap_or(3.0);
        Ok(MatchResult {
            average_score: score,
            ..Default::default()
        })
    }

    async fn create_application(
        &self,
        scorecard_id: &str,
        profile: &StructuredProfile,
        _match_result: Option<&MatchResult>,
    ) -> Result<Application> {
        let delay = *self.application_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        let mut applications = self.applications.lock().unwrap();
        applications.push((scorecard_id.to_string(), profile.name.clone()));
        Ok(Application {
            id: format!("app-{}", applications.len()),
            status: Some("new".to_string()),
        })
    }
}

// ============================================================================
// Tab Processor
// ============================================================================

#[derive(Debug, Clone)]
pub enum Step {
    Succeed { score: Option<f64> },
    Fail(&'static str),
    Panic,
}

/// Processor double that records ordering and overlap.
pub struct FakeProcessor {
    steps: Mutex<HashMap<String, Step>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    order: Mutex<Vec<String>>,
    released: Mutex<Vec<TabId>>,
    pub started: Notify,
}

impl FakeProcessor {
    pub fn new(delay: Duration) -> Self {
        Self {
            steps: Mutex::new(HashMap::new()),
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            started: Notify::new(),
        }
    }

    pub fn on(&self, username: &str, step: Step) {
        self.steps.lock().unwrap().insert(username.to_string(), step);
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<TabId> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl TabProcessor for FakeProcessor {
    async fn process_tab(
        &self,
        item: &QueueItem,
        _scorecard_id: &str,
    ) -> Result<QueueResult, ScrapeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.order.lock().unwrap().push(item.username.clone());
        self.started.notify_one();

        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let step = self
            .steps
            .lock()
            .unwrap()
            .get(&item.username)
            .cloned()
            .unwrap_or(Step::Succeed { score: None });
        match step {
            Step::Succeed { score } => Ok(QueueResult {
                profile_data: Some(StructuredProfile {
                    name: Some(item.username.clone()),
                    ..Default::default()
                }),
                match_result: score.map(|s| MatchResult {
                    average_score: s,
                    ..Default::default()
                }),
                ..QueueResult::new(item)
            }),
            Step::Fail(reason) => Err(ScrapeError::ExtractionFailure(reason.to_string())),
            Step::Panic => panic!("processor blew up on {}", item.username),
        }
    }

    fn release(&self, tab: &TabId) {
        self.released.lock().unwrap().push(tab.clone());
    }
}
