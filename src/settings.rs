use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use utoipa::ToSchema;

/// Flat user settings. Keys this service does not know are kept as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, rename = "isAIEnabled")]
    pub is_ai_enabled: bool,
    #[serde(default)]
    pub open_in_side_panel: bool,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

pub type SharedSettings = Arc<RwLock<Settings>>;

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means defaults.
    pub async fn load(&self) -> Result<Settings> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Invalid settings file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("[Settings] {} not found, using defaults", self.path.display());
                Ok(Settings::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    pub async fn save(&self, settings: &Settings) -> Result<()> {
        let body = serde_json::to_vec_pretty(settings).context("Failed to serialize settings")?;
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let store = SettingsStore::new(temp_path("settings-missing"));
        assert_eq!(store.load().await.unwrap(), Settings::default());
    }

    #[tokio::test]
    async fn unknown_keys_survive_a_round_trip() {
        let path = temp_path("settings-extra");
        tokio::fs::write(&path, r#"{"isAIEnabled": true, "theme": "dark"}"#)
            .await
            .unwrap();
        let store = SettingsStore::new(&path);

        let mut settings = store.load().await.unwrap();
        assert!(settings.is_ai_enabled);
        assert!(!settings.open_in_side_panel);
        assert_eq!(settings.extra["theme"], "dark");

        settings.open_in_side_panel = true;
        store.save(&settings).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(raw["openInSidePanel"], true);
        assert_eq!(raw["isAIEnabled"], true);
        assert_eq!(raw["theme"], "dark");
        let _ = tokio::fs::remove_file(&path).await;
    }
}
