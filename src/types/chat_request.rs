use serde::{Deserialize, Serialize};

/// Parameters for one streaming chat exchange.
///
/// Only `message` is required; the generation parameters fall back to the
/// backend's current configuration when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's free-text message. Must be non-empty.
    pub message: String,

    /// Optional sampling temperature override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Optional cap on generated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Optional system instruction for this exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ChatRequest {
    /// Create a new `ChatRequest` with the given message and no overrides.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            temperature: None,
            max_tokens: None,
            system_prompt: None,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the maximum generated tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the system instruction.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn minimal_request_omits_unset_fields() {
        let request = ChatRequest::new("hi");
        let json = to_value(&request).unwrap();
        assert_eq!(json, json!({ "message": "hi" }));
    }

    #[test]
    fn full_request_serialization() {
        let request = ChatRequest::new("hi")
            .with_temperature(0.5)
            .with_max_tokens(1000)
            .with_system_prompt("be brief");
        let json = to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({
                "message": "hi",
                "temperature": 0.5,
                "max_tokens": 1000,
                "system_prompt": "be brief"
            })
        );
    }
}
