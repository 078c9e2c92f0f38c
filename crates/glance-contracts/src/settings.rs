use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::providers::{mask_secret, Provider, ProviderConfig};

pub const DEFAULT_SETTINGS_FILE: &str = "config.json";
pub const SETTINGS_PATH_ENV: &str = "GLANCE_CONFIG";

/// Flat settings document persisted between runs.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_endpoint: String,
    pub api_key: String,
    pub model_provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Settings {
    pub fn provider_config(&self) -> ProviderConfig {
        let config = ProviderConfig::new(
            self.model_provider,
            Some(self.api_endpoint.clone()),
            self.api_key.clone(),
        );
        match self.model.as_deref() {
            Some(model) => config.with_model(model),
            None => config,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_endpoint", &self.api_endpoint)
            .field("api_key", &mask_secret(&self.api_key))
            .field("model_provider", &self.model_provider)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$GLANCE_CONFIG` when set, else `config.json` in the working directory.
    pub fn default_location() -> Self {
        let path = std::env::var(SETTINGS_PATH_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<Settings> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid settings document {}", self.path.display()))
    }

    pub fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        settings.serialize(&mut serializer)?;
        std::fs::write(&self.path, buf)
            .with_context(|| format!("failed writing {}", self.path.display()))?;
        Ok(())
    }
}
