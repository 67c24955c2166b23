//! In-page scripts the controller injects into LinkedIn tabs.
//!
//! Each script starts with a tag comment so a host (or a test double) can tell
//! them apart without parsing JavaScript.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::interceptor::CAPTURE_ATTRIBUTE;

pub const EXPORT_PDF_TAG: &str = "/* recruit-capture:export-pdf */";
pub const RESULTS_SCRAPER_TAG: &str = "/* recruit-capture:results-scraper */";
pub const NEXT_PAGE_TAG: &str = "/* recruit-capture:next-page */";
pub const TAKE_SIGNAL_TAG: &str = "/* recruit-capture:take-signal */";
pub const PAGE_HTML_TAG: &str = "/* recruit-capture:page-html */";

/// Opens the profile's overflow menu and clicks "Save to PDF". Reports an
/// [`AutomationReport`] as a JSON string.
pub const EXPORT_PDF_SCRIPT: &str = r#"/* recruit-capture:export-pdf */
(async () => {
    const sleep = (ms) => new Promise(r => setTimeout(r, ms));
    const visible = (el) => el && el.offsetParent !== null;
    const textOf = (el) => (el.innerText || el.textContent || '').trim().toLowerCase();

    const moreLabels = ['more actions', 'more', 'mais ações', 'mais', 'más acciones', 'más'];
    const exportLabels = ['save to pdf', 'salvar como pdf', 'salvar em pdf', 'guardar como pdf', 'guardar en pdf'];

    const candidates = [
        ...document.querySelectorAll('main section button[aria-label*="More"]'),
        ...document.querySelectorAll('.pvs-profile-actions button'),
        ...document.querySelectorAll('main button.artdeco-dropdown__trigger'),
        ...document.querySelectorAll('main button'),
    ];
    const moreButton = candidates.find(b => {
        if (!visible(b)) return false;
        const label = (b.getAttribute('aria-label') || '').toLowerCase();
        return moreLabels.some(l => label.startsWith(l) || textOf(b) === l);
    });
    if (!moreButton) return JSON.stringify({ ok: false, step: 'overflow-menu' });

    moreButton.click();
    await sleep(800);

    const items = [
        ...document.querySelectorAll('.artdeco-dropdown__content [role="button"]'),
        ...document.querySelectorAll('.artdeco-dropdown__item'),
        ...document.querySelectorAll('[role="menuitem"]'),
    ];
    const exportItem = items.find(el => {
        const text = textOf(el);
        const label = (el.getAttribute('aria-label') || '').toLowerCase();
        return exportLabels.some(l => text.includes(l) || label.includes(l));
    });
    if (!exportItem) return JSON.stringify({ ok: false, step: 'export-item' });

    exportItem.click();
    return JSON.stringify({ ok: true });
})()"#;

/// Auto-scrolls a people-search results page and returns every profile link on
/// it, as a JSON string.
pub const RESULTS_SCRAPER_SCRIPT: &str = r#"/* recruit-capture:results-scraper */
(async () => {
    const sleep = (ms) => new Promise(r => setTimeout(r, ms));
    let lastHeight = 0;
    let stableTicks = 0;
    for (let i = 0; i < 40 && stableTicks < 3; i++) {
        window.scrollBy(0, 600);
        await sleep(400);
        const height = document.body.scrollHeight;
        stableTicks = height === lastHeight ? stableTicks + 1 : 0;
        lastHeight = height;
    }
    window.scrollTo(0, 0);
    return JSON.stringify([...document.querySelectorAll('a[href*="/in/"]')].map(a => a.href));
})()"#;

/// Clicks the "Next" pagination button; false when there is no further page.
pub const NEXT_PAGE_SCRIPT: &str = r#"/* recruit-capture:next-page */
(() => {
    const labels = ['next', 'avançar', 'próximo', 'siguiente'];
    const buttons = [
        ...document.querySelectorAll('button.artdeco-pagination__button--next'),
        ...document.querySelectorAll('button[aria-label]'),
    ];
    const next = buttons.find(b => {
        const label = (b.getAttribute('aria-label') || b.innerText || '').trim().toLowerCase();
        return b.classList.contains('artdeco-pagination__button--next') || labels.includes(label);
    });
    if (!next || next.disabled) return false;
    next.click();
    return true;
})()"#;

/// Returns the rendered document.
pub const PAGE_HTML_SCRIPT: &str =
    "/* recruit-capture:page-html */ document.documentElement.outerHTML";

/// Reads and clears the capture signal left by the interceptor.
pub fn take_signal_script() -> String {
    format!(
        r#"{TAKE_SIGNAL_TAG}
(() => {{
    const root = document.documentElement;
    const value = root.getAttribute('{CAPTURE_ATTRIBUTE}');
    if (value === null) return null;
    root.removeAttribute('{CAPTURE_ATTRIBUTE}');
    return value;
}})()"#
    )
}

/// Decodes a script result. DevTools hands objects and arrays back by
/// reference only, so structured results travel as `JSON.stringify` output.
pub fn decode_script_value<T: DeserializeOwned>(value: serde_json::Value) -> serde_json::Result<T> {
    match value {
        serde_json::Value::String(raw) => serde_json::from_str(&raw),
        other => serde_json::from_value(other),
    }
}

/// Outcome reported by [`EXPORT_PDF_SCRIPT`].
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AutomationReport {
    pub ok: bool,
    #[serde(default)]
    pub step: Option<String>,
}

impl AutomationReport {
    /// Reads the script's return value; anything unexpected counts as a failed step.
    pub fn from_value(value: serde_json::Value) -> Self {
        decode_script_value(value).unwrap_or(AutomationReport {
            ok: false,
            step: Some("unexpected-result".to_string()),
        })
    }
}
