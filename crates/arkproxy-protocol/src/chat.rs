use serde_json::{Map, Value as JsonValue};

pub const MODEL_KEY: &str = "model";
pub const MESSAGES_KEY: &str = "messages";
pub const STREAM_KEY: &str = "stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("Invalid JSON format")]
    InvalidJson,
    #[error("Missing required parameters")]
    MissingParameters,
}

/// Inbound chat-completion body, split into the fields the proxy acts on and
/// everything else.
///
/// `extra` is never inspected; it travels to the upstream as given, with key
/// order and number text intact.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: JsonValue,
    pub messages: JsonValue,
    pub stream: bool,
    pub extra: Map<String, JsonValue>,
}

impl ChatCompletionRequest {
    pub fn from_slice(body: &[u8]) -> Result<Self, RequestError> {
        let value: JsonValue =
            serde_json::from_slice(body).map_err(|_| RequestError::InvalidJson)?;
        Self::from_value(value)
    }

    pub fn from_value(value: JsonValue) -> Result<Self, RequestError> {
        let JsonValue::Object(mut extra) = value else {
            return Err(RequestError::MissingParameters);
        };
        if !extra.contains_key(MODEL_KEY) || !extra.contains_key(MESSAGES_KEY) {
            return Err(RequestError::MissingParameters);
        }

        let model = extra.shift_remove(MODEL_KEY).unwrap_or(JsonValue::Null);
        let messages = extra.shift_remove(MESSAGES_KEY).unwrap_or(JsonValue::Null);
        let stream = extra
            .shift_remove(STREAM_KEY)
            .and_then(|value| value.as_bool())
            .unwrap_or(false);

        Ok(Self {
            model,
            messages,
            stream,
            extra,
        })
    }

    /// Requested model name; non-string values count as unnamed.
    pub fn model_name(&self) -> &str {
        self.model.as_str().unwrap_or_default()
    }

    pub fn message_count(&self) -> usize {
        self.messages.as_array().map(Vec::len).unwrap_or(0)
    }

    pub fn extra_keys(&self) -> Vec<&str> {
        self.extra.keys().map(String::as_str).collect()
    }

    /// Upstream body: the resolved model, messages and stream flag first, then
    /// every extra parameter merged flat in its inbound order.
    pub fn into_upstream_payload(self, resolved_model: &str) -> JsonValue {
        let mut body = Map::with_capacity(self.extra.len() + 3);
        body.insert(
            MODEL_KEY.to_string(),
            JsonValue::String(resolved_model.to_string()),
        );
        body.insert(MESSAGES_KEY.to_string(), self.messages);
        body.insert(STREAM_KEY.to_string(), JsonValue::Bool(self.stream));
        body.extend(self.extra);
        JsonValue::Object(body)
    }
}
