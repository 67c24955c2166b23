use anyhow::{Context, Result};
use rand::Rng;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Delays and timeouts of the capture pipeline. They are tuned against
/// LinkedIn's load behaviour and exposed so they can be adjusted without a rebuild.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Wait after opening a profile tab before touching it.
    pub page_settle: Duration,
    /// Wait after activating a tab for focus to settle.
    pub focus_settle: Duration,
    /// Wait after each search-results navigation.
    pub search_settle: Duration,
    /// Bounded wait for the coordinator's extraction event.
    pub extraction_wait: Duration,
    /// Hard cap for a whole tab, independent of the extraction wait.
    pub tab_timeout: Duration,
    pub relay_poll_interval: Duration,
    pub relay_max_attempts: u32,
    /// Bounds of the randomized pause between queue items.
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            page_settle: Duration::from_secs(6),
            focus_settle: Duration::from_millis(500),
            search_settle: Duration::from_secs(6),
            extraction_wait: Duration::from_secs(15),
            tab_timeout: Duration::from_secs(20),
            relay_poll_interval: Duration::from_millis(300),
            relay_max_attempts: 100,
            jitter_min: Duration::from_secs(2),
            jitter_max: Duration::from_secs(4),
        }
    }
}

impl Timings {
    /// Uniformly random pause between items, mimicking human pacing.
    pub fn human_delay(&self) -> Duration {
        let (lo, hi) = if self.jitter_min <= self.jitter_max {
            (self.jitter_min, self.jitter_max)
        } else {
            (self.jitter_max, self.jitter_min)
        };
        let millis = rand::thread_rng().gen_range(lo.as_millis() as u64..=hi.as_millis() as u64);
        Duration::from_millis(millis)
    }

    fn from_env() -> Result<Self> {
        let d = Timings::default();
        Ok(Self {
            page_settle: env_millis("PAGE_SETTLE_MS", d.page_settle)?,
            focus_settle: env_millis("FOCUS_SETTLE_MS", d.focus_settle)?,
            search_settle: env_millis("SEARCH_SETTLE_MS", d.search_settle)?,
            extraction_wait: env_millis("EXTRACTION_WAIT_MS", d.extraction_wait)?,
            tab_timeout: env_millis("TAB_TIMEOUT_MS", d.tab_timeout)?,
            relay_poll_interval: env_millis("RELAY_POLL_MS", d.relay_poll_interval)?,
            relay_max_attempts: env_or("RELAY_MAX_ATTEMPTS", d.relay_max_attempts)?,
            jitter_min: env_millis("JITTER_MIN_MS", d.jitter_min)?,
            jitter_max: env_millis("JITTER_MAX_MS", d.jitter_max)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Upload the PDF to the recruiting API.
    Remote,
    /// Extract text locally and run the heuristic parser.
    Local,
}

impl FromStr for ExtractionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "remote" | "api" => Ok(ExtractionMode::Remote),
            "local" | "parser" => Ok(ExtractionMode::Local),
            other => anyhow::bail!("Unknown extraction mode: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub headless: bool,
    /// Profile directory holding the logged-in LinkedIn session.
    pub user_data_dir: Option<PathBuf>,
    pub window_size: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub extraction_mode: ExtractionMode,
    pub settings_path: PathBuf,
    pub chrome: ChromeConfig,
    /// URL fragments identifying PDF exports served without a PDF content type.
    pub capture_url_markers: Vec<String>,
    /// Read the rendered page when no PDF arrives in time.
    pub dom_fallback: bool,
    pub timings: Timings,
}

pub const DEFAULT_CAPTURE_MARKERS: &[&str] = &["/ambry/", "/dms/prv/"];

impl Config {
    pub fn from_env() -> Result<Self> {
        let capture_url_markers = match env::var("CAPTURE_URL_MARKERS") {
            Ok(raw) => raw
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            Err(_) => DEFAULT_CAPTURE_MARKERS.iter().map(|m| m.to_string()).collect(),
        };

        Ok(Self {
            port: env_or("PORT", 3000u16)?,
            api_base_url: env::var("RECRUITING_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080/api".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_token: env::var("RECRUITING_API_TOKEN").ok().filter(|t| !t.is_empty()),
            extraction_mode: env_or("PROFILE_EXTRACTION", ExtractionMode::Remote)?,
            settings_path: env::var("SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("settings.json")),
            chrome: ChromeConfig {
                headless: env_or("CHROME_HEADLESS", false)?,
                user_data_dir: env::var("CHROME_USER_DATA_DIR").ok().map(PathBuf::from),
                window_size: (1920, 1080),
            },
            capture_url_markers,
            dom_fallback: env_or("DOM_FALLBACK", true)?,
            timings: Timings::from_env()?,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration> {
    env_or(key, default.as_millis() as u64).map(Duration::from_millis)
}
