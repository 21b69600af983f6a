// Public modules
pub mod chat_request;
pub mod chat_turn;
pub mod generation_config;
pub mod stats_snapshot;
pub mod stream_frame;
pub mod usage_stats;

// Re-exports
pub use chat_request::ChatRequest;
pub use chat_turn::{ChatTurn, Role, TURN_FAILURE_MESSAGE};
pub use generation_config::{ConfigUpdate, GenerationConfig};
pub use stats_snapshot::StatsSnapshot;
pub use stream_frame::StreamFrame;
pub use usage_stats::UsageStats;
