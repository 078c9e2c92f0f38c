use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use glance_contracts::providers::mask_secret;
use glance_contracts::{DispatchError, NormalizedResponse};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::http::{response_json_or_error, transport_error};
use crate::image_prep::validate_and_prepare;
use crate::non_empty_env;

pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const GEMINI_API_BASE_ENV: &str = "GEMINI_API_BASE";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeminiModel {
    #[default]
    Flash2Exp,
    Pro15,
    Flash15,
    Pro10Vision,
}

impl GeminiModel {
    pub fn id(self) -> &'static str {
        match self {
            Self::Flash2Exp => "gemini-2.0-flash-exp",
            Self::Pro15 => "gemini-1.5-pro",
            Self::Flash15 => "gemini-1.5-flash",
            Self::Pro10Vision => "gemini-1.0-pro-vision",
        }
    }

    pub fn all() -> [GeminiModel; 4] {
        [Self::Flash2Exp, Self::Pro15, Self::Flash15, Self::Pro10Vision]
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim().trim_start_matches("models/");
        Self::all().into_iter().find(|model| model.id() == id)
    }
}

/// Managed Gemini client: owns the credential, model choice and HTTP pool.
#[derive(Clone)]
pub struct GeminiClient {
    api_base: String,
    api_key: String,
    model: String,
    http: HttpClient,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_base", &self.api_base)
            .field("api_key", &mask_secret(&self.api_key))
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiClient {
    /// Uses `credential` when non-empty, else `$GEMINI_API_KEY`; the API base
    /// honours `$GEMINI_API_BASE`.
    pub fn new(credential: Option<&str>) -> Result<Self, DispatchError> {
        let client = Self::with_fallback(credential, non_empty_env(GEMINI_API_KEY_ENV))?;
        Ok(match non_empty_env(GEMINI_API_BASE_ENV) {
            Some(api_base) => client.with_api_base(api_base),
            None => client,
        })
    }

    /// Never reads the environment; callers pass whatever they resolved.

    pub fn with_fallback(
        credential: Option<&str>,
        fallback: Option<String>,
    ) -> Result<Self, DispatchError> {
        let api_key = credential
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or(fallback)
            .ok_or_else(|| {
                DispatchError::MissingCredential(format!(
                    "Gemini API key not found. Set {GEMINI_API_KEY_ENV} or pass it directly."
                ))
            })?;
        Ok(Self {
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            api_key,
            model: GeminiModel::default().id().to_string(),
            http: HttpClient::new(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        let api_base = api_base.into();
        let trimmed = api_base.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            self.api_base = trimmed.to_string();
        }
        self
    }

    pub fn set_model(&mut self, model: GeminiModel) {
        self.model = model.id().to_string();
    }

    pub fn with_model_id(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        let model = model.trim();
        if model.is_empty() {
            return self;
        }
        if GeminiModel::from_id(model).is_none() {
            debug!(model, "using unlisted Gemini model id");
        }
        self.model = model.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn endpoint(&self) -> String {
        let model_path = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub fn build_payload(image_bytes: &[u8], mime_type: &str, prompt: &str) -> Value {
        json!({
            "contents": [{
                "parts": [
                    {"text": prompt},
                    {"inlineData": {
                        "mimeType": mime_type,
                        "data": BASE64.encode(image_bytes),
                    }},
                ],
            }],
        })
    }

    pub fn send(
        &self,
        image_bytes: &[u8],
        prompt: &str,
        allow_scale: bool,
    ) -> Result<NormalizedResponse, DispatchError> {
        let (prepared, mime_type) = validate_and_prepare(image_bytes, allow_scale)?;
        debug!(
            model = %self.model,
            raw_bytes = image_bytes.len(),
            prepared_bytes = prepared.len(),
            mime_type = %mime_type,
            "posting generateContent"
        );

        let payload = Self::build_payload(&prepared, &mime_type, prompt);
        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .map_err(|err| transport_error("Gemini", err))?;
        info!(status = response.status().as_u16(), "generateContent responded");

        let parsed = response_json_or_error("Gemini", response)?;
        extract_candidate_text(&parsed).map(NormalizedResponse::new)
    }

    /// Downloads the image first, then behaves like [`GeminiClient::send`].
    pub fn send_from_url(
        &self,
        image_url: &str,
        prompt: &str,
        allow_scale: bool,
    ) -> Result<NormalizedResponse, DispatchError> {
        let response = self
            .http
            .get(image_url)
            .send()
            .map_err(|err| transport_error("image fetch", err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::HttpError {
                status: status.as_u16(),
                body: format!("failed fetching image from {image_url}"),
            });
        }
        let bytes = response
            .bytes()
            .map_err(|err| transport_error("image fetch", err))?;
        self.send(&bytes, prompt, allow_scale)
    }
}

/// Joins the text parts of the first candidate.
pub fn extract_candidate_text(payload: &Value) -> Result<String, DispatchError> {
    let Some(candidate) = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
    else {
        let reason = payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str);
        return Err(DispatchError::MalformedResponse(match reason {
            Some(reason) => format!("Gemini blocked the prompt: {reason}"),
            None => "expected candidates in Gemini response".to_string(),
        }));
    };

    let texts = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>()
        })
        .unwrap_or_default();
    if texts.is_empty() {
        let finish = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(DispatchError::MalformedResponse(format!(
            "Gemini candidate has no text (finishReason: {finish})"
        )));
    }
    Ok(texts.concat())
}
