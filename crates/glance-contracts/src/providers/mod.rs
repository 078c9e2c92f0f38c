use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Backend that answers an image + prompt query.
///
/// Settings files and the command line accept the same names; see
/// [`Provider::from_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Provider {
    /// Generic chat-completion endpoint speaking the OpenAI wire format.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "gemini")]
    Gemini,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    pub fn all() -> [Provider; 2] {
        [Self::OpenAi, Self::Gemini]
    }

    pub fn requires_endpoint(self) -> bool {
        matches!(self, Self::OpenAi)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-like" | "openai_like" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            other => {
                let expected = Provider::all().map(Provider::name).join(", ");
                Err(format!("unknown provider '{other}' (expected one of: {expected})"))
            }
        }
    }
}

impl TryFrom<String> for Provider {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

/// Snapshot of the provider settings a request is bound to.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ProviderConfig {
    pub provider: Provider,
    /// Required for [`Provider::OpenAi`], ignored for [`Provider::Gemini`].
    pub endpoint: Option<String>,
    pub credential: String,
    pub model: Option<String>,
}

impl ProviderConfig {
    pub fn new(
        provider: Provider,
        endpoint: Option<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            endpoint: endpoint
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            credential: credential.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        let trimmed = model.trim();
        self.model = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    pub fn endpoint_str(&self) -> &str {
        self.endpoint.as_deref().unwrap_or_default()
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("credential", &mask_secret(&self.credential))
            .field("model", &self.model)
            .finish()
    }
}

pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count == 0 {
        return String::new();
    }
    if count <= 8 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{tail}", "*".repeat(count - 4))
}
