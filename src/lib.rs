// Public modules
pub mod accumulate;
pub mod client;
pub mod error;
pub mod frames;
pub mod observability;
pub mod session;
pub mod socket;
pub mod types;

// Re-exports
pub use accumulate::AccumulatingTurn;
pub use client::BackendClient;
pub use error::{Error, Result};
pub use session::{StreamingChatSession, TurnEvent, TurnStream};
pub use socket::{
    ConnectionState, ReconnectPolicy, ResilientSocketClient, SNAPSHOT_REQUEST, SnapshotChannel,
    SnapshotTransport, SocketEvent, WsTransport,
};
pub use types::*;
