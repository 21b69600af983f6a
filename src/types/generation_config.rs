use serde::{Deserialize, Serialize};

/// The backend's current generation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature applied when a request does not override it.
    pub temperature: f32,

    /// Token cap applied when a request does not override it.
    pub max_tokens: u32,

    /// Name of the model serving completions.
    pub model: String,
}

/// A partial update to the backend's generation configuration.
///
/// Fields left as `None` are unchanged on the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    /// New sampling temperature, if changing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// New token cap, if changing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// New model name, if changing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ConfigUpdate {
    /// Create an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Returns true if no field would change.
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.max_tokens.is_none() && self.model.is_none()
    }
}
