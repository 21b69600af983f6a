use serde::{Deserialize, Serialize};

use crate::types::GenerationConfig;

/// Aggregate usage statistics from the backend's stats endpoint.
///
/// The same shape is pushed over the live statistics channel, but the socket
/// client keeps it opaque (see [`StatsSnapshot`](crate::StatsSnapshot));
/// this typed form is for the request/response endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Number of completed chat exchanges.
    pub total_chats: u64,

    /// Total tokens generated across all exchanges.
    pub total_tokens: u64,

    /// Mean response time in seconds.
    pub average_response_time: f64,

    /// The most recent conversations, newest last. Shape is backend-defined.
    #[serde(default)]
    pub recent_conversations: Vec<serde_json::Value>,

    /// The generation configuration in effect.
    pub model_config: GenerationConfig,
}
