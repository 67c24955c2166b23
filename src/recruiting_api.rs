use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::profile::StructuredProfile;

const EXTRACT_PDF_ENDPOINT: &str = "/profiles/extract-pdf";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CategoryScore {
    pub name: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// AI matcher verdict for one candidate against one scorecard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub average_score: f64,
    #[serde(default)]
    pub categories: Vec<CategoryScore>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// Application record returned by the API once a candidate is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// The remote recruiting backend.
#[async_trait]
pub trait RecruitingApi: Send + Sync {
    async fn extract_profile_from_pdf(&self, pdf: &[u8]) -> Result<StructuredProfile>;

    async fn evaluate_scorecard_with_ai(
        &self,
        scorecard_id: &str,
        profile: &StructuredProfile,
    ) -> Result<MatchResult>;

    async fn create_application(
        &self,
        scorecard_id: &str,
        profile: &StructuredProfile,
        match_result: Option<&MatchResult>,
    ) -> Result<Application>;
}

/// Responses may come bare or wrapped in `{ "data": ... }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(inner) => inner,
        }
    }
}

pub struct HttpRecruitingApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRecruitingApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {} response", what))?;

        if !status.is_success() {
            anyhow::bail!("{} returned error status {}: {}", what, status, body);
        }

        let parsed: Envelope<T> = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse {} response: {}", what, body))?;
        Ok(parsed.into_inner())
    }
}

#[async_trait]
impl RecruitingApi for HttpRecruitingApi {
    async fn extract_profile_from_pdf(&self, pdf: &[u8]) -> Result<StructuredProfile> {
        let url = self.url(EXTRACT_PDF_ENDPOINT);
        let form = Form::new().part(
            "file",
            Part::bytes(pdf.to_vec())
                .file_name("profile.pdf")
                .mime_str("application/pdf")
                .context("Failed to create multipart")?,
        );

        info!("📤 [API] uploading {} byte profile PDF", pdf.len());
        let response = self
            .authorize(self.client.post(&url).multipart(form))
            .send()
            .await
            .context("PDF extraction request failed")?;

        Self::read(response, "PDF extraction").await
    }

    async fn evaluate_scorecard_with_ai(
        &self,
        scorecard_id: &str,
        profile: &StructuredProfile,
    ) -> Result<MatchResult> {
        let url = self.url(&format!(
            "/scorecards/{}/evaluate",
            urlencoding::encode(scorecard_id)
        ));
        debug!("[API] scoring against scorecard {}", scorecard_id);

        let response = self
            .authorize(self.client.post(&url).json(&serde_json::json!({ "profile": profile })))
            .send()
            .await
            .context("Scorecard evaluation request failed")?;

        Self::read(response, "Scorecard evaluation").await
    }

    async fn create_application(
        &self,
        scorecard_id: &str,
        profile: &StructuredProfile,
        match_result: Option<&MatchResult>,
    ) -> Result<Application> {
        let url = self.url(&format!(
            "/scorecards/{}/applications",
            urlencoding::encode(scorecard_id)
        ));
        let payload = serde_json::json!({
            "profile": profile,
            "matchResult": match_result,
        });

        let response = self
            .authorize(self.client.post(&url).json(&payload))
            .send()
            .await
            .context("Application creation request failed")?;

        let application: Application = Self::read(response, "Application creation").await?;
        info!("✅ [API] application {} created", application.id);
        Ok(application)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_result_reads_camel_case_and_defaults() {
        let m: MatchResult = serde_json::from_str(r#"{"averageScore": 4.5}"#).unwrap();
        assert_eq!(m.average_score, 4.5);
        assert!(m.categories.is_empty());
    }

    #[test]
    fn envelope_unwraps_data_key() {
        let wrapped: Envelope<MatchResult> =
            serde_json::from_str(r#"{"data": {"averageScore": 3.0, "strengths": ["rust"]}}"#).unwrap();
        let m = wrapped.into_inner();
        assert_eq!(m.average_score, 3.0);
        assert_eq!(m.strengths, vec!["rust".to_string()]);
    }
}
