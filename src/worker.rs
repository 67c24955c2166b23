use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::automation::{decode_script_value, NEXT_PAGE_SCRIPT, RESULTS_SCRAPER_SCRIPT};
use crate::browser::{BrowserHost, TabId};
use crate::config::Timings;
use crate::error::{QueueError, ScrapeError};
use crate::processor::TabProcessor;
use crate::queue::{Decision, EnginePhase, ItemStatus, QueueItem, QueueResult, QueueState};
use crate::recruiting_api::{Application, RecruitingApi};
use crate::sourcing::ProfileLinkSet;

/// A claimed run, ready to be driven by [`BatchQueueEngine::run`].
#[derive(Debug, Clone)]
pub struct Run {
    pub id: Uuid,
    pub scorecard_id: String,
    pub items: Vec<QueueItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run or sourcing pass was in progress; nothing happened.
    AlreadyActive,
    Completed { processed: usize },
    Stopped { processed: usize },
}

/// Drives profile tabs one at a time and owns the queue state. Readers get
/// snapshots or a watch subscription; only the engine writes.
pub struct BatchQueueEngine {
    host: Arc<dyn BrowserHost>,
    processor: Arc<dyn TabProcessor>,
    api: Arc<dyn RecruitingApi>,
    timings: Timings,
    state: watch::Sender<QueueState>,
    /// Results whose acceptance is waiting on the recruiting API.
    pending: Mutex<HashSet<(Option<Uuid>, usize)>>,
}

impl BatchQueueEngine {
    pub fn new(
        host: Arc<dyn BrowserHost>,
        processor: Arc<dyn TabProcessor>,
        api: Arc<dyn RecruitingApi>,
        timings: Timings,
    ) -> Self {
        let (state, _) = watch::channel(QueueState::default());
        Self {
            host,
            processor,
            api,
            timings,
            state,
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn snapshot(&self) -> QueueState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.state.subscribe()
    }

    fn phase(&self) -> EnginePhase {
        self.state.borrow().phase
    }

    fn stop_requested(&self) -> bool {
        self.phase() == EnginePhase::Stopping
    }

    // ========================================================================
    // Detection
    // ========================================================================

    /// Open LinkedIn profile tabs as pending items. Stored only when no run is in flight.
    pub async fn detect(&self) -> Result<Vec<QueueItem>, QueueError> {
        let mut previous = None;
        self.state.send_if_modified(|s| {
            if s.phase.is_busy() {
                return false;
            }
            previous = Some(s.phase);
            s.phase = EnginePhase::Detecting;
            true
        });

        let tabs = self.host.query_tabs().await;
        let restore = |s: &mut QueueState, items: Option<&Vec<QueueItem>>| {
            if s.phase != EnginePhase::Detecting {
                return false;
            }
            if let Some(items) = items {
                s.items = items.clone();
                s.current_index = 0;
            }
            s.phase = match previous {
                Some(EnginePhase::Reviewing) => EnginePhase::Reviewing,
                _ => EnginePhase::Idle,
            };
            true
        };

        let tabs = match tabs {
            Ok(tabs) => tabs,
            Err(e) => {
                if previous.is_some() {
                    self.state.send_if_modified(|s| restore(s, None));
                }
                return Err(e.into());
            }
        };

        let items: Vec<QueueItem> = tabs
            .into_iter()
            .filter_map(|tab| QueueItem::from_url(&tab.url, Some(tab.id)))
            .collect();
        info!("🔎 [Queue] detected {} profile tab(s)", items.len());

        if previous.is_some() {
            self.state.send_if_modified(|s| restore(s, Some(&items)));
        }
        Ok(items)
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Claims the engine for a run over `items` (or the stored items).
    /// `None` while another run or sourcing pass is active.
    pub fn claim_run(&self, scorecard_id: &str, items: Option<Vec<QueueItem>>) -> Option<Run> {
        self.claim_run_from(scorecard_id, items, false)
    }

    fn claim_run_from(
        &self,
        scorecard_id: &str,
        items: Option<Vec<QueueItem>>,
        after_sourcing: bool,
    ) -> Option<Run> {
        let mut claimed = None;
        self.state.send_if_modified(|s| {
            let allowed = !s.phase.is_busy()
                || (after_sourcing && s.phase == EnginePhase::Sourcing);
            if !allowed {
                return false;
            }
            let mut items = items.unwrap_or_else(|| s.items.clone());
            for item in items.iter_mut() {
                item.status = ItemStatus::Pending;
            }
            let run = Run {
                id: Uuid::new_v4(),
                scorecard_id: scorecard_id.to_string(),
                items: items.clone(),
            };
            s.phase = EnginePhase::Running;
            s.run_id = Some(run.id);
            s.scorecard_id = Some(run.scorecard_id.clone());
            s.items = items;
            s.current_index = 0;
            s.results.clear();
            claimed = Some(run);
            true
        });
        claimed
    }

    pub async fn start_queue(
        &self,
        scorecard_id: &str,
        items: Option<Vec<QueueItem>>,
    ) -> RunOutcome {
        match self.claim_run(scorecard_id, items) {
            Some(run) => self.run(run).await,
            None => {
                info!("[Queue] start ignored, engine busy");
                RunOutcome::AlreadyActive
            }
        }
    }

    /// Processes a claimed run strictly in order.
    pub async fn run(&self, run: Run) -> RunOutcome {
        let total = run.items.len();
        info!(
            "🚀 [Queue] run {} started: {} profile(s), scorecard {}",
            run.id, total, run.scorecard_id
        );

        let mut processed = 0;
        for (index, item) in run.items.into_iter().enumerate() {
            if self.stop_requested() {
                break;
            }
            self.state.send_modify(|s| {
                s.current_index = index;
                if let Some(i) = s.items.get_mut(index) {
                    i.status = ItemStatus::Processing;
                }
            });

            info!("👷 [Queue] {}/{}: {}", index + 1, total, item.username);
            let result = self.process_item(index, item, &run.scorecard_id).await;
            let status = if result.has_profile() || result.error.is_none() {
                ItemStatus::Done
            } else {
                ItemStatus::Error
            };
            if let Some(e) = &result.error {
                warn!("❌ [Queue] {} failed: {}", result.username, e);
            }
            self.state.send_modify(|s| {
                if let Some(i) = s.items.get_mut(index) {
                    i.status = status;
                }
                s.results.push(result);
            });
            processed += 1;

            if index + 1 < total && !self.stop_requested() {
                let pause = self.timings.human_delay();
                info!("💤 [Queue] pausing {:?}", pause);
                sleep(pause).await;
            }
        }

        let stopped = self.stop_requested();
        self.state.send_modify(|s| {
            s.phase = if s.results.iter().any(QueueResult::has_profile) {
                EnginePhase::Reviewing
            } else {
                EnginePhase::Idle
            };
        });

        if stopped {
            info!("🛑 [Queue] run stopped after {} item(s)", processed);
            RunOutcome::Stopped { processed }
        } else {
            info!("✅ [Queue] run finished: {} item(s)", processed);
            RunOutcome::Completed { processed }
        }
    }

    async fn process_item(&self, index: usize, mut item: QueueItem, scorecard_id: &str) -> QueueResult {
        let mut created: Option<TabId> = None;
        if item.id.is_none() {
            match self.host.create_tab(&item.url, false).await {
                Ok(tab) => {
                    item.id = Some(tab.clone());
                    created = Some(tab.clone());
                    self.state.send_modify(|s| {
                        if let Some(i) = s.items.get_mut(index) {
                            i.id = Some(tab);
                        }
                    });
                    sleep(self.timings.page_settle).await;
                }
                Err(e) => return QueueResult::failed(&item, e.to_string()),
            }
        }

        let processor = self.processor.clone();
        let owned_item = item.clone();
        let scorecard = scorecard_id.to_string();
        let outcome =
            tokio::spawn(async move { processor.process_tab(&owned_item, &scorecard).await }).await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => QueueResult::failed(&item, e.to_string()),
            Err(join) => {
                error!("🔥 [Queue] processor crashed on {}: {}", item.username, join);
                QueueResult::failed(&item, format!("processor crashed: {}", join))
            }
        };

        if let Some(tab) = created {
            if let Err(e) = self.host.remove_tab(&tab).await {
                warn!("⚠️ [Queue] could not close tab {}: {}", tab, e);
            }
            self.processor.release(&tab);
        }
        result
    }

    /// Cooperative: the in-flight item finishes, nothing after it starts.
    pub fn stop_queue(&self) -> bool {
        let stopping = self.state.send_if_modified(|s| {
            if matches!(s.phase, EnginePhase::Running | EnginePhase::Sourcing) {
                s.phase = EnginePhase::Stopping;
                true
            } else {
                false
            }
        });
        if stopping {
            info!("🛑 [Queue] stop requested");
        }
        stopping
    }

    // ========================================================================
    // Sourcing
    // ========================================================================

    /// Discovers up to `target_count` profiles from a people-search URL.
    pub async fn source_profiles(
        &self,
        search_url: &str,
        target_count: usize,
    ) -> Result<Vec<QueueItem>, QueueError> {
        self.claim_sourcing()?;
        let discovered = self.discover(search_url, target_count).await;
        self.state.send_if_modified(|s| {
            if matches!(s.phase, EnginePhase::Sourcing | EnginePhase::Stopping) {
                s.phase = EnginePhase::Idle;
                true
            } else {
                false
            }
        });
        Ok(discovered?)
    }

    /// Sourcing followed by a claimed run over exactly the new items. `None` when
    /// nothing was found or a stop arrived meanwhile.
    pub async fn source_and_claim(
        &self,
        search_url: &str,
        scorecard_id: &str,
        target_count: usize,
    ) -> Result<Option<Run>, QueueError> {
        self.claim_sourcing()?;
        let items = match self.discover(search_url, target_count).await {
            Ok(items) => items,
            Err(e) => {
                self.release_sourcing();
                return Err(e.into());
            }
        };
        if items.is_empty() || self.stop_requested() {
            self.release_sourcing();
            return Ok(None);
        }
        let run = self.claim_run_from(scorecard_id, Some(items), true);
        if run.is_none() {
            self.release_sourcing();
        }
        Ok(run)
    }

    pub async fn source_from_search(
        &self,
        search_url: &str,
        scorecard_id: &str,
        target_count: usize,
    ) -> Result<RunOutcome, QueueError> {
        match self.source_and_claim(search_url, scorecard_id, target_count).await? {
            Some(run) => Ok(self.run(run).await),
            None => Ok(RunOutcome::Completed { processed: 0 }),
        }
    }

    fn claim_sourcing(&self) -> Result<(), QueueError> {
        let claimed = self.state.send_if_modified(|s| {
            if s.phase.is_busy() {
                return false;
            }
            s.phase = EnginePhase::Sourcing;
            true
        });
        if claimed {
            Ok(())
        } else {
            Err(QueueError::Busy)
        }
    }

    fn release_sourcing(&self) {
        self.state.send_if_modified(|s| {
            if matches!(s.phase, EnginePhase::Sourcing | EnginePhase::Stopping) {
                s.phase = EnginePhase::Idle;
                true
            } else {
                false
            }
        });
    }

    async fn discover(
        &self,
        search_url: &str,
        target_count: usize,
    ) -> Result<Vec<QueueItem>, ScrapeError> {
        let target = target_count.max(1);
        let tab = self
            .host
            .create_tab(search_url, true)
            .await
            .map_err(|e| ScrapeError::Sourcing(format!("could not open search tab: {}", e)))?;
        info!("🔍 [Sourcing] searching {} for {} profile(s)", search_url, target);

        let mut links = ProfileLinkSet::default();
        let mut page = 1;
        loop {
            sleep(self.timings.search_settle).await;

            let value = self
                .host
                .inject(&tab, RESULTS_SCRAPER_SCRIPT)
                .await
                .map_err(|e| ScrapeError::Sourcing(format!("results page {}: {}", page, e)))?;
            let hrefs: Vec<String> = decode_script_value(value).map_err(|e| {
                ScrapeError::Sourcing(format!("results page {} returned no links: {}", page, e))
            })?;
            let added = links.extend(hrefs);
            info!(
                "📑 [Sourcing] page {}: {} new, {} total",
                page,
                added,
                links.len()
            );

            if links.len() >= target || self.stop_requested() {
                break;
            }
            let next = self
                .host
                .inject(&tab, NEXT_PAGE_SCRIPT)
                .await
                .map_err(|e| ScrapeError::Sourcing(format!("pagination failed: {}", e)))?;
            if next.as_bool() != Some(true) {
                info!("[Sourcing] no further results page");
                break;
            }
            page += 1;
        }

        if links.is_empty() {
            warn!("⚠️ [Sourcing] no profiles found, leaving tab {} open", tab);
        } else if let Err(e) = self.host.remove_tab(&tab).await {
            warn!("⚠️ [Sourcing] could not close search tab: {}", e);
        }
        Ok(links.into_items(target))
    }

    // ========================================================================
    // Review
    // ========================================================================

    pub fn review_order(&self) -> Vec<usize> {
        self.state.borrow().review_order()
    }

    /// Creates the application through the API, then records the decision.
    /// The result is reserved for the duration of the API call, so a second
    /// accept or a reject of the same result is refused meanwhile.
    pub async fn accept(&self, index: usize) -> Result<Application, QueueError> {
        let (run_id, scorecard_id, result) = {
            let state = self.state.borrow();
            let result = Self::reviewable(&state, index)?.clone();
            let scorecard_id = state.scorecard_id.clone().ok_or(QueueError::NoScorecard)?;
            (state.run_id, scorecard_id, result)
        };
        let profile = result.profile_data.as_ref().ok_or(QueueError::NoProfile(index))?;
        let _reservation = self.reserve(run_id, index)?;

        let application = self
            .api
            .create_application(&scorecard_id, profile, result.match_result.as_ref())
            .await?;
        if self.decide(run_id, index, Decision::Accepted) {
            info!("👍 [Review] accepted {}", result.username);
        } else {
            warn!(
                "⚠️ [Review] application {} created for {}, but its run was replaced",
                application.id, result.username
            );
        }
        Ok(application)
    }

    pub fn reject(&self, index: usize) -> Result<(), QueueError> {
        let run_id = {
            let state = self.state.borrow();
            Self::reviewable(&state, index)?;
            state.run_id
        };
        if self.pending_decisions().contains(&(run_id, index))
            || !self.decide(run_id, index, Decision::Rejected)
        {
            return Err(QueueError::AlreadyDecided(index));
        }
        info!("👎 [Review] rejected result {}", index);
        Ok(())
    }

    fn reviewable(state: &QueueState, index: usize) -> Result<&QueueResult, QueueError> {
        let result = state
            .results
            .get(index)
            .ok_or(QueueError::NoSuchResult(index))?;
        if !result.has_profile() {
            return Err(QueueError::NoProfile(index));
        }
        if result.decision.is_some() {
            return Err(QueueError::AlreadyDecided(index));
        }
        Ok(result)
    }

    fn pending_decisions(&self) -> MutexGuard<'_, HashSet<(Option<Uuid>, usize)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(&self, run_id: Option<Uuid>, index: usize) -> Result<Reservation<'_>, QueueError> {
        if !self.pending_decisions().insert((run_id, index)) {
            return Err(QueueError::AlreadyDecided(index));
        }
        Ok(Reservation {
            pending: &self.pending,
            key: (run_id, index),
        })
    }

    /// Records `decision` unless the run has been replaced or the result is
    /// already decided. Returns whether it was recorded.
    fn decide(&self, run_id: Option<Uuid>, index: usize, decision: Decision) -> bool {
        self.state.send_if_modified(|s| {
            if s.run_id != run_id {
                return false;
            }
            match s.results.get_mut(index) {
                Some(r) if r.decision.is_none() => r.decision = Some(decision),
                _ => return false,
            }
            if s.phase == EnginePhase::Reviewing && s.review_complete() {
                info!("[Review] all candidates decided");
                s.phase = EnginePhase::Idle;
            }
            true
        })
    }
}

/// Marks a result as being accepted until dropped.
struct Reservation<'a> {
    pending: &'a Mutex<HashSet<(Option<Uuid>, usize)>>,
    key: (Option<Uuid>, usize),
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
