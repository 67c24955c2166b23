use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::automation::PAGE_HTML_SCRIPT;
use crate::browser::{BrowserHost, TabId};
use crate::error::ScrapeError;
use crate::messages::{ExtractionEvent, ExtractionOutcome, ExtractionSource};
use crate::profile::{ContactInfo, EducationEntry, ExperienceEntry, NamedItem, StructuredProfile};
use crate::queue::username_from_url;

const NAME_SELECTORS: &[&str] = &[
    "h1.text-heading-xlarge",
    ".pv-top-card h1",
    "main section h1",
    "h1",
];

const HEADLINE_SELECTORS: &[&str] = &[
    ".pv-text-details__left-panel .text-body-medium",
    "div.text-body-medium.break-words",
    ".pv-top-card--headline",
    "[data-generated-suggestion-target]",
];

const LOCATION_SELECTORS: &[&str] = &[
    ".pv-text-details__left-panel span.text-body-small.inline",
    "span.text-body-small.inline.t-black--light.break-words",
    ".pv-top-card--list-bullet li",
];

const ITEM_SELECTORS: &[&str] = &[
    "li.pvs-list__paged-list-item",
    "li.artdeco-list__item",
    "ul > li",
];

const VISIBLE_TEXT: &str = "span[aria-hidden='true']";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredField {
    Name,
    ProfileHandle,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequiredField::Name => f.write_str("name"),
            RequiredField::ProfileHandle => f.write_str("profile handle"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomExtraction {
    Extracted {
        username: String,
        profile: StructuredProfile,
    },
    Failed {
        missing: RequiredField,
    },
}

impl DomExtraction {
    pub fn into_event(self, tab: Option<TabId>) -> ExtractionEvent {
        let outcome = match self {
            DomExtraction::Extracted { profile, .. } => ExtractionOutcome::Succeeded(profile),
            DomExtraction::Failed { missing } => {
                ExtractionOutcome::Failed(format!("profile page is missing its {}", missing))
            }
        };
        ExtractionEvent {
            tab,
            source: ExtractionSource::Dom,
            outcome,
        }
    }
}

fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn text_of(element: ElementRef) -> String {
    clean(&element.text().collect::<String>())
}

fn first_text(scope: ElementRef, selectors: &[&str]) -> Option<String> {
    for selector_str in selectors {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(text) = scope
                .select(&selector)
                .map(text_of)
                .find(|t| !t.is_empty())
            {
                return Some(text);
            }
        }
    }
    None
}

/// The `<section>` holding the anchor element with `anchor_id`.
fn section_by_anchor<'a>(document: &'a Html, anchor_id: &str) -> Option<ElementRef<'a>> {
    let sections = Selector::parse("section").ok()?;
    let anchor = Selector::parse(&format!("#{}", anchor_id)).ok()?;
    document.select(&sections).find(|section| {
        section.value().id() == Some(anchor_id) || section.select(&anchor).next().is_some()
    })
}

/// Visible text fragments of each list entry in a section.
fn section_items(section: ElementRef) -> Vec<Vec<String>> {
    let Ok(visible) = Selector::parse(VISIBLE_TEXT) else {
        return Vec::new();
    };
    for selector_str in ITEM_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        let items: Vec<Vec<String>> = section
            .select(&selector)
            .map(|item| {
                item.select(&visible)
                    .map(text_of)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|texts| !texts.is_empty())
            .collect();
        if !items.is_empty() {
            return items;
        }
    }
    Vec::new()
}

/// Drops a trailing ` · …` annotation such as employment type or tenure.
fn before_dot(text: &str) -> String {
    text.split(" · ").next().unwrap_or(text).trim().to_string()
}

fn experience_from(texts: Vec<String>) -> ExperienceEntry {
    let mut texts = texts.into_iter();
    ExperienceEntry {
        title: texts.next().unwrap_or_default(),
        company_name: texts.next().map(|t| before_dot(&t)).unwrap_or_default(),
        date_range: texts.next().map(|t| before_dot(&t)).unwrap_or_default(),
        description: texts.collect::<Vec<_>>().join("\n"),
    }
}

fn education_from(texts: Vec<String>) -> EducationEntry {
    let mut texts = texts.into_iter();
    EducationEntry {
        school_name: texts.next().unwrap_or_default(),
        degree: texts.next().unwrap_or_default(),
        date_range: texts.next().unwrap_or_default(),
    }
}

/// Reads a rendered profile page. Every field except name and handle is optional.
pub fn extract_profile_from_html(html: &str, page_url: &str) -> DomExtraction {
    let Some(username) = username_from_url(page_url) else {
        return DomExtraction::Failed {
            missing: RequiredField::ProfileHandle,
        };
    };

    let document = Html::parse_document(html);
    let root = document.root_element();

    let Some(name) = first_text(root, NAME_SELECTORS) else {
        return DomExtraction::Failed {
            missing: RequiredField::Name,
        };
    };

    let about = section_by_anchor(&document, "about").and_then(|section| {
        Selector::parse(VISIBLE_TEXT)
            .ok()
            .and_then(|visible| {
                section
                    .select(&visible)
                    .map(text_of)
                    .filter(|t| !t.is_empty())
                    .max_by_key(|t| t.len())
            })
    });

    let experience = section_by_anchor(&document, "experience")
        .map(section_items)
        .unwrap_or_default()
        .into_iter()
        .map(experience_from)
        .collect();
    let education = section_by_anchor(&document, "education")
        .map(section_items)
        .unwrap_or_default()
        .into_iter()
        .map(education_from)
        .collect();
    let skills = section_by_anchor(&document, "skills")
        .map(section_items)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|texts| texts.into_iter().next())
        .map(NamedItem::new)
        .collect();

    let profile = StructuredProfile {
        name: Some(name),
        headline: first_text(root, HEADLINE_SELECTORS),
        location: first_text(root, LOCATION_SELECTORS),
        contact: ContactInfo {
            linkedin_url: Some(format!("https://www.linkedin.com/in/{}", username)),
            ..Default::default()
        },
        about,
        experience,
        education,
        skills,
        certifications: Vec::new(),
    };
    debug!(
        "[DOM] {}: {} experience, {} education, {} skills",
        username,
        profile.experience.len(),
        profile.education.len(),
        profile.skills.len()
    );

    DomExtraction::Extracted { username, profile }
}

/// Fallback extractor that reads the live page instead of a PDF.
pub struct DomProfileExtractor {
    host: Arc<dyn BrowserHost>,
}

impl DomProfileExtractor {
    pub fn new(host: Arc<dyn BrowserHost>) -> Self {
        Self { host }
    }

    pub async fn extract(&self, tab: &TabId, page_url: &str) -> Result<DomExtraction, ScrapeError> {
        let html = self.host.inject(tab, PAGE_HTML_SCRIPT).await?;
        let html = html
            .as_str()
            .ok_or_else(|| ScrapeError::ExtractionFailure("page returned no HTML".into()))?;

        let extraction = extract_profile_from_html(html, page_url);
        match &extraction {
            DomExtraction::Extracted { username, .. } => {
                info!("🧩 [DOM] extracted {} from rendered page", username)
            }
            DomExtraction::Failed { missing } => {
                warn!("⚠️ [DOM] tab {} is missing its {}", tab, missing)
            }
        }
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROFILE_PAGE: &str = r#"
<html><body><main>
  <section class="pv-top-card">
    <div class="pv-text-details__left-panel">
      <h1 class="text-heading-xlarge">Maria  Silva</h1>
      <div class="text-body-medium break-words">Backend Engineer at Acme</div>
      <span class="text-body-small inline t-black--light break-words">São Paulo, Brazil</span>
    </div>
  </section>
  <section>
    <div id="about"></div>
    <div><span aria-hidden="true">About</span></div>
    <div><span aria-hidden="true">I build reliable distributed systems in Rust and Go.</span></div>
  </section>
  <section>
    <div id="experience"></div>
    <ul>
      <li class="pvs-list__paged-list-item">
        <span aria-hidden="true">Senior Engineer</span>
        <span aria-hidden="true">Acme · Full-time</span>
        <span aria-hidden="true">Jan 2020 - Present · 4 yrs</span>
        <span aria-hidden="true">Built the billing platform.</span>
      </li>
      <li class="pvs-list__paged-list-item">
        <span aria-hidden="true">Engineer</span>
        <span aria-hidden="true">Initech</span>
        <span aria-hidden="true">2017 - 2019</span>
      </li>
    </ul>
  </section>
  <section>
    <div id="education"></div>
    <ul>
      <li class="pvs-list__paged-list-item">
        <span aria-hidden="true">USP</span>
        <span aria-hidden="true">BSc Computer Science</span>
        <span aria-hidden="true">2012 - 2016</span>
      </li>
    </ul>
  </section>
  <section>
    <div id="skills"></div>
    <ul>
      <li class="pvs-list__paged-list-item"><span aria-hidden="true">Rust</span></li>
      <li class="pvs-list__paged-list-item"><span aria-hidden="true">PostgreSQL</span></li>
    </ul>
  </section>
</main></body></html>"#;

    #[test]
    fn extracts_rendered_profile() {
        let DomExtraction::Extracted { username, profile } =
            extract_profile_from_html(PROFILE_PAGE, "https://www.linkedin.com/in/maria-silva/")
        else {
            panic!("expected extraction");
        };

        assert_eq!(username, "maria-silva");
        assert_eq!(profile.name.as_deref(), Some("Maria Silva"));
        assert_eq!(profile.headline.as_deref(), Some("Backend Engineer at Acme"));
        assert_eq!(profile.location.as_deref(), Some("São Paulo, Brazil"));
        assert_eq!(
            profile.about.as_deref(),
            Some("I build reliable distributed systems in Rust and Go.")
        );
        assert_eq!(
            profile.experience,
            vec![
                ExperienceEntry {
                    title: "Senior Engineer".into(),
                    company_name: "Acme".into(),
                    date_range: "Jan 2020 - Present".into(),
                    description: "Built the billing platform.".into(),
                },
                ExperienceEntry {
                    title: "Engineer".into(),
                    company_name: "Initech".into(),
                    date_range: "2017 - 2019".into(),
                    description: String::new(),
                },
            ]
        );
        assert_eq!(
            profile.education,
            vec![EducationEntry {
                school_name: "USP".into(),
                degree: "BSc Computer Science".into(),
                date_range: "2012 - 2016".into(),
            }]
        );
        assert_eq!(
            profile.skills,
            vec![NamedItem::new("Rust"), NamedItem::new("PostgreSQL")]
        );
        assert_eq!(
            profile.contact.linkedin_url.as_deref(),
            Some("https://www.linkedin.com/in/maria-silva")
        );
    }

    #[test]
    fn optional_sections_may_be_absent() {
        let html = "<html><body><h1>Only Name</h1></body></html>";
        let DomExtraction::Extracted { profile, .. } =
            extract_profile_from_html(html, "https://www.linkedin.com/in/only")
        else {
            panic!("expected extraction");
        };
        assert_eq!(profile.name.as_deref(), Some("Only Name"));
        assert!(profile.headline.is_none());
        assert!(profile.experience.is_empty());
        assert!(profile.skills.is_empty());
    }

    #[test]
    fn missing_required_fields_fail() {
        assert_eq!(
            extract_profile_from_html("<html><body><p>nothing</p></body></html>", "https://www.linkedin.com/in/x"),
            DomExtraction::Failed {
                missing: RequiredField::Name
            }
        );
        assert_eq!(
            extract_profile_from_html(PROFILE_PAGE, "https://www.linkedin.com/feed/"),
            DomExtraction::Failed {
                missing: RequiredField::ProfileHandle
            }
        );
    }

    #[test]
    fn failed_extraction_becomes_a_failed_dom_event() {
        let event = DomExtraction::Failed {
            missing: RequiredField::Name,
        }
        .into_event(Some(TabId::from("t")));
        assert_eq!(event.source, ExtractionSource::Dom);
        assert!(matches!(event.outcome, ExtractionOutcome::Failed(ref m) if m.contains("name")));
    }
}
