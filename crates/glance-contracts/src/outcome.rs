use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub text: String,
}

impl NormalizedResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn into_envelope(self) -> ChoicesEnvelope {
        ChoicesEnvelope {
            choices: vec![Choice {
                message: ChoiceMessage { content: self.text },
            }],
        }
    }
}

/// `{"choices": [{"message": {"content": ...}}]}`, the shape callers read
/// no matter which provider answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoicesEnvelope {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    pub content: String,
}

impl ChoicesEnvelope {
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|choice| choice.message.content.as_str())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(NormalizedResponse),
    Failure(DispatchError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(err) => err.category(),
        }
    }

    pub fn envelope(&self) -> Option<ChoicesEnvelope> {
        match self {
            Self::Success(response) => Some(response.clone().into_envelope()),
            Self::Failure(_) => None,
        }
    }

    /// Text a widget puts in its response pane.
    pub fn display_text(&self) -> String {
        match self {
            Self::Success(response) => response
                .clone()
                .into_envelope()
                .content()
                .unwrap_or("No response")
                .to_string(),
            Self::Failure(err) => format!("Error: {err}"),
        }
    }

    pub fn into_result(self) -> Result<NormalizedResponse, DispatchError> {
        match self {
            Self::Success(response) => Ok(response),
            Self::Failure(err) => Err(err),
        }
    }
}

impl From<Result<NormalizedResponse, DispatchError>> for Outcome {
    fn from(result: Result<NormalizedResponse, DispatchError>) -> Self {
        match result {
            Ok(response) => Self::Success(response),
            Err(err) => Self::Failure(err),
        }
    }
}
