use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ============================================================================
// Structured Profile Records
// ============================================================================

/// Candidate profile as produced by the PDF text parser or the DOM extractor.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StructuredProfile {
    pub name: Option<String>,
    pub headline: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub contact: ContactInfo,
    pub about: Option<String>,
    #[serde(default)]
    pub experience: Vec<ExperienceEntry>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub skills: Vec<NamedItem>,
    #[serde(default)]
    pub certifications: Vec<NamedItem>,
}

/// Contact details, each independently optional.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linkedin_url: Option<String>,
    pub github_url: Option<String>,
    pub portfolio_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceEntry {
    pub title: String,
    pub company_name: String,
    pub date_range: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EducationEntry {
    pub school_name: String,
    pub degree: String,
    pub date_range: String,
}

/// Skill or certification entry.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, ToSchema)]
pub struct NamedItem {
    pub name: String,
}

impl NamedItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl StructuredProfile {
    /// True when neither the header nor any section yielded data.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.headline.is_none()
            && self.about.is_none()
            && self.experience.is_empty()
            && self.education.is_empty()
            && self.skills.is_empty()
    }
}

/// Raw PDF payload handed over by the interceptor, decoded from its transport envelope.
#[derive(Debug, Clone)]
pub struct CapturedDocument {
    pub data: Vec<u8>,
    pub media_type: String,
    pub source_url: Option<String>,
}
