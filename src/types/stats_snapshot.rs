use serde::{Deserialize, Serialize};

/// The latest full statistics payload pushed over the live channel.
///
/// The payload is deliberately opaque: the client validates nothing beyond
/// JSON parseability, and each received snapshot replaces the previous one
/// wholesale. Hosts that want typed access to the request/response stats
/// endpoint should use [`UsageStats`](crate::UsageStats) instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsSnapshot(pub serde_json::Value);

impl StatsSnapshot {
    /// Parse a snapshot from a raw text frame.
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(Self(serde_json::from_str(text)?))
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_object_snapshot() {
        let snapshot = StatsSnapshot::parse(r#"{"total_chats":3}"#).unwrap();
        assert_eq!(snapshot.as_value()["total_chats"], 3);
    }

    #[test]
    fn parse_failure_is_an_error() {
        assert!(StatsSnapshot::parse("{nope").is_err());
    }
}
