use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use glance_contracts::{DispatchError, NormalizedResponse};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::http::{response_json_or_error, transport_error};
use crate::image_prep::sniff_mime;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4-vision-preview";
pub const DEFAULT_MAX_TOKENS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for any chat-completion endpoint speaking the OpenAI wire format.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: HttpClient,
    model: String,
    max_tokens: u64,
    timeout: Duration,
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model.trim().to_string();
        }
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn validate_endpoint(endpoint: &str) -> Result<Url, DispatchError> {
        let trimmed = endpoint.trim();
        if trimmed.is_empty() {
            return Err(DispatchError::InvalidConfig(
                "Invalid OpenAI API endpoint: endpoint is not set".to_string(),
            ));
        }
        let url = Url::parse(trimmed).map_err(|err| {
            DispatchError::InvalidConfig(format!("Invalid OpenAI API endpoint '{trimmed}': {err}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DispatchError::InvalidConfig(format!(
                "Invalid OpenAI API endpoint '{trimmed}': expected an http(s) URL"
            )));
        }
        Ok(url)
    }

    pub fn build_payload(&self, image_bytes: &[u8], prompt: &str) -> Value {
        let data_url = format!(
            "data:{};base64,{}",
            sniff_mime(image_bytes),
            BASE64.encode(image_bytes)
        );
        json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": data_url}},
                ],
            }],
            "max_tokens": self.max_tokens,
        })
    }

    /// One POST, no retries.
    pub fn send(
        &self,
        endpoint: &str,
        credential: &str,
        image_bytes: &[u8],
        prompt: &str,
    ) -> Result<NormalizedResponse, DispatchError> {
        let url = Self::validate_endpoint(endpoint)?;
        let payload = self.build_payload(image_bytes, prompt);
        debug!(
            host = url.host_str().unwrap_or_default(),
            model = %self.model,
            image_bytes = image_bytes.len(),
            "posting chat completion"
        );

        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .bearer_auth(credential)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .map_err(|err| transport_error("OpenAI", err))?;
        info!(status = response.status().as_u16(), "chat completion responded");

        let parsed = response_json_or_error("OpenAI", response)?;
        extract_choice_content(&parsed).map(NormalizedResponse::new)
    }
}

/// `choices[0].message.content`, accepting either a string or a list of
/// text parts.
pub fn extract_choice_content(payload: &Value) -> Result<String, DispatchError> {
    let content = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .ok_or_else(|| {
            DispatchError::MalformedResponse(
                "expected choices[0].message.content in response".to_string(),
            )
        })?;

    match content {
        Value::String(text) => Ok(text.clone()),
        Value::Array(parts) => {
            let texts = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>();
            if texts.is_empty() {
                return Err(DispatchError::MalformedResponse(
                    "choices[0].message.content has no text parts".to_string(),
                ));
            }
            Ok(texts.join("\n"))
        }
        _ => Err(DispatchError::MalformedResponse(
            "choices[0].message.content is not text".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n0000";

    #[test]
    fn endpoint_validation_rejects_empty_and_non_http() {
        for endpoint in ["", "   ", "ftp://example.com/v1", "not a url"] {
            let category = OpenAiClient::validate_endpoint(endpoint)
                .err()
                .map(|err| err.category());
            assert_eq!(category, Some("invalid_config"), "endpoint {endpoint:?}");
        }
        assert!(
            OpenAiClient::validate_endpoint("https://api.openai.com/v1/chat/completions").is_ok()
        );
        assert!(OpenAiClient::validate_endpoint("http://localhost:8080/v1").is_ok());
    }

    #[test]
    fn payload_inlines_image_as_data_url() {
        let client = OpenAiClient::new();
        let payload = client.build_payload(PNG_MAGIC, "What is in this image?");
        assert_eq!(payload["model"], json!(DEFAULT_OPENAI_MODEL));
        assert_eq!(payload["max_tokens"], json!(300));
        assert_eq!(payload["messages"][0]["role"], json!("user"));
        assert_eq!(
            payload["messages"][0]["content"][0],
            json!({"type": "text", "text": "What is in this image?"})
        );
        let url = payload["messages"][0]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap_or_default();
        assert_eq!(
            url,
            format!("data:image/png;base64,{}", BASE64.encode(PNG_MAGIC))
        );
    }

    #[test]
    fn timeout_defaults_to_thirty_seconds() {
        assert_eq!(OpenAiClient::new().timeout(), Duration::from_secs(30));
        let client = OpenAiClient::new().with_timeout(Duration::from_millis(250));
        assert_eq!(client.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn model_override_ignores_blank() {
        assert_eq!(OpenAiClient::new().with_model("  ").model(), DEFAULT_OPENAI_MODEL);
        assert_eq!(OpenAiClient::new().with_model("gpt-4o").model(), "gpt-4o");
    }

    #[test]
    fn extract_choice_content_handles_string_and_parts() -> anyhow::Result<()> {
        let plain = json!({"choices": [{"message": {"content": "a cat"}}]});
        assert_eq!(extract_choice_content(&plain)?, "a cat");

        let parts = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "a cat"},
            {"type": "text", "text": "on a mat"},
        ]}}]});
        assert_eq!(extract_choice_content(&parts)?, "a cat\non a mat");

        let malformed_payloads = [
            json!({}),
            json!({"choices": []}),
            json!({"choices": [{"message": {"content": 3}}]}),
        ];
        for malformed in malformed_payloads {
            let category = extract_choice_content(&malformed)
                .err()
                .map(|err| err.category());
            assert_eq!(category, Some("malformed_response"));
        }
        Ok(())
    }

    #[test]
    fn send_returns_first_choice_text() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({
                "model": DEFAULT_OPENAI_MODEL,
                "max_tokens": 300,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"content":"a cat"}}]}"#)
            .create();

        let endpoint = format!("{}/v1/chat/completions", server.url());
        let response = OpenAiClient::new().send(&endpoint, "sk-test", PNG_MAGIC, "what?")?;
        assert_eq!(response, NormalizedResponse::new("a cat"));
        mock.assert();
        Ok(())
    }

    #[test]
    fn send_maps_server_error_to_http_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/chat")
            .with_status(500)
            .with_body("internal boom")
            .create();

        let endpoint = format!("{}/chat", server.url());
        let err = OpenAiClient::new()
            .send(&endpoint, "sk-test", PNG_MAGIC, "what?")
            .err();
        assert_eq!(
            err,
            Some(DispatchError::HttpError {
                status: 500,
                body: "internal boom".to_string(),
            })
        );
    }

    #[test]
    fn send_maps_non_json_success_to_malformed() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/chat")
            .with_status(200)
            .with_body("<html>hello</html>")
            .create();

        let endpoint = format!("{}/chat", server.url());
        let category = OpenAiClient::new()
            .send(&endpoint, "sk-test", PNG_MAGIC, "what?")
            .err()
            .map(|err| err.category());
        assert_eq!(category, Some("malformed_response"));
    }

    #[test]
    fn send_maps_refused_connection_to_network_error() -> anyhow::Result<()> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let endpoint = format!("http://127.0.0.1:{port}/chat");
        let category = OpenAiClient::new()
            .with_timeout(Duration::from_secs(5))
            .send(&endpoint, "sk-test", PNG_MAGIC, "what?")
            .err()
            .map(|err| err.category());
        assert_eq!(category, Some("network_error"));
        Ok(())
    }

    #[test]
    fn send_maps_slow_server_to_timeout() -> anyhow::Result<()> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let holder = std::thread::spawn(move || {
            let accepted = listener.accept();
            std::thread::sleep(Duration::from_millis(1500));
            drop(accepted);
        });

        let endpoint = format!("http://127.0.0.1:{port}/chat");
        let err = OpenAiClient::new()
            .with_timeout(Duration::from_millis(300))
            .send(&endpoint, "sk-test", PNG_MAGIC, "what?")
            .err();
        assert_eq!(err, Some(DispatchError::Timeout));
        let _ = holder.join();
        Ok(())
    }
}
