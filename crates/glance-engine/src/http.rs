use std::error::Error as StdError;

use glance_contracts::DispatchError;
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

const ERROR_BODY_MAX_CHARS: usize = 512;

pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> DispatchError {
    // Gemini carries the key in the query string.
    let err = err.without_url();
    if err.is_timeout() {
        return DispatchError::Timeout;
    }
    DispatchError::NetworkError(format!("{provider}: {}", error_chain_text(&err, 400)))
}

/// Reads the body and maps non-2xx statuses and non-JSON payloads onto the
/// dispatch taxonomy.
pub(crate) fn response_json_or_error(
    provider: &str,
    response: HttpResponse,
) -> Result<Value, DispatchError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| transport_error(provider, err))?;
    if !status.is_success() {
        return Err(DispatchError::HttpError {
            status: code,
            body: truncate_text(body.trim(), ERROR_BODY_MAX_CHARS),
        });
    }
    serde_json::from_str(&body).map_err(|err| {
        DispatchError::MalformedResponse(format!("{provider} returned invalid JSON: {err}"))
    })
}

pub(crate) fn error_chain_text(err: &(dyn StdError + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty()
            && !parts
                .last()
                .map(|existing| existing == trimmed)
                .unwrap_or(false)
        {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
