use std::fmt;
use std::time::Duration;

use glance_contracts::providers::mask_secret;
use glance_contracts::{DispatchError, NormalizedResponse, Provider, ProviderConfig};

use crate::gemini::{GeminiClient, GEMINI_API_BASE_ENV, GEMINI_API_KEY_ENV};
use crate::non_empty_env;
use crate::openai::{OpenAiClient, DEFAULT_MAX_TOKENS, DEFAULT_REQUEST_TIMEOUT};

pub trait VisionProvider: Send {
    fn name(&self) -> &str;
    fn analyze(&self, image_bytes: &[u8], prompt: &str)
        -> Result<NormalizedResponse, DispatchError>;
}

/// Knobs for the clients a dispatcher builds. Read once, shared read-only.
#[derive(Clone)]
pub struct ClientOptions {
    pub openai_timeout: Duration,
    pub openai_max_tokens: u64,
    pub gemini_api_base: Option<String>,
    pub gemini_allow_scale: bool,
    /// Used when the configured Gemini credential is blank.
    pub gemini_credential_fallback: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            openai_timeout: DEFAULT_REQUEST_TIMEOUT,
            openai_max_tokens: DEFAULT_MAX_TOKENS,
            gemini_api_base: None,
            gemini_allow_scale: true,
            gemini_credential_fallback: None,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("openai_timeout", &self.openai_timeout)
            .field("openai_max_tokens", &self.openai_max_tokens)
            .field("gemini_api_base", &self.gemini_api_base)
            .field("gemini_allow_scale", &self.gemini_allow_scale)
            .field(
                "gemini_credential_fallback",
                &self.gemini_credential_fallback.as_deref().map(mask_secret),
            )
            .finish()
    }
}

impl ClientOptions {
    /// Resolves `$GEMINI_API_KEY` and `$GEMINI_API_BASE` on the calling thread.
    pub fn from_env() -> Self {
        Self {
            gemini_api_base: non_empty_env(GEMINI_API_BASE_ENV),
            gemini_credential_fallback: non_empty_env(GEMINI_API_KEY_ENV),
            ..Self::default()
        }
    }
}

/// OpenAI-style client bound to one endpoint and credential.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: OpenAiClient,
    endpoint: String,
    credential: String,
}

impl OpenAiProvider {
    pub fn new(
        client: OpenAiClient,
        endpoint: &str,
        credential: &str,
    ) -> Result<Self, DispatchError> {
        OpenAiClient::validate_endpoint(endpoint)?;
        Ok(Self {
            client,
            endpoint: endpoint.trim().to_string(),
            credential: credential.to_string(),
        })
    }
}

impl VisionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        Provider::OpenAi.name()
    }

    fn analyze(
        &self,
        image_bytes: &[u8],
        prompt: &str,
    ) -> Result<NormalizedResponse, DispatchError> {
        self.client
            .send(&self.endpoint, &self.credential, image_bytes, prompt)
    }
}

struct GeminiProvider {
    client: GeminiClient,
    allow_scale: bool,
}

impl VisionProvider for GeminiProvider {
    fn name(&self) -> &str {
        Provider::Gemini.name()
    }

    fn analyze(
        &self,
        image_bytes: &[u8],
        prompt: &str,
    ) -> Result<NormalizedResponse, DispatchError> {
        self.client.send(image_bytes, prompt, self.allow_scale)
    }
}

/// Resolves the configured provider variant into a ready client, surfacing
/// configuration problems before any network traffic.
pub fn build_provider(
    config: &ProviderConfig,
    options: &ClientOptions,
) -> Result<Box<dyn VisionProvider>, DispatchError> {
    if config.provider.requires_endpoint() && config.endpoint.is_none() {
        return Err(DispatchError::InvalidConfig(format!(
            "API endpoint is not configured for the {} provider",
            config.provider
        )));
    }
    match config.provider {
        Provider::OpenAi => {
            let mut client = OpenAiClient::new()
                .with_timeout(options.openai_timeout)
                .with_max_tokens(options.openai_max_tokens);
            if let Some(model) = config.model.as_deref() {
                client = client.with_model(model);
            }
            let provider = OpenAiProvider::new(client, config.endpoint_str(), &config.credential)?;
            Ok(Box::new(provider))
        }
        Provider::Gemini => {
            let mut client = GeminiClient::with_fallback(
                Some(config.credential.as_str()),
                options.gemini_credential_fallback.clone(),
            )?;
            if let Some(api_base) = options.gemini_api_base.as_deref() {
                client = client.with_api_base(api_base);
            }
            if let Some(model) = config.model.as_deref() {
                client = client.with_model_id(model);
            }
            Ok(Box::new(GeminiProvider {
                client,
                allow_scale: options.gemini_allow_scale,
            }))
        }
    }
}
