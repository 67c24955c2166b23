use std::collections::HashSet;
use url::Url;

use crate::queue::{is_profile_url, QueueItem};

pub const PEOPLE_SEARCH_URL: &str = "https://www.linkedin.com/search/results/people/";

/// People-search results URL for a keyword query.
pub fn build_people_search_url(keywords: &str) -> String {
    format!(
        "{}?keywords={}&origin=GLOBAL_SEARCH_HEADER",
        PEOPLE_SEARCH_URL,
        urlencoding::encode(keywords.trim())
    )
}

/// Profile URL without query, fragment or trailing slash; `None` for anything
/// that is not a profile page.
pub fn clean_profile_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    let cleaned = url.as_str().trim_end_matches('/').to_string();
    is_profile_url(&cleaned).then_some(cleaned)
}

/// Discovered profile links, deduplicated by cleaned URL, in discovery order.
#[derive(Debug, Default, Clone)]
pub struct ProfileLinkSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl ProfileLinkSet {
    /// Adds every new profile link; returns how many were new.
    pub fn extend<I, S>(&mut self, links: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.ordered.len();
        for link in links {
            if let Some(clean) = clean_profile_url(link.as_ref()) {
                if self.seen.insert(clean.clone()) {
                    self.ordered.push(clean);
                }
            }
        }
        self.ordered.len() - before
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn urls(&self) -> &[String] {
        &self.ordered
    }

    /// Pending queue items for the first `limit` links.
    pub fn into_items(self, limit: usize) -> Vec<QueueItem> {
        self.ordered
            .into_iter()
            .take(limit)
            .filter_map(|url| QueueItem::from_url(&url, None))
            .collect()
    }
}
