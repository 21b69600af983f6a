use serde::{Deserialize, Serialize};

/// Fixed text a failed assistant turn resolves to when no content arrived.
///
/// A turn must never be left with `streaming = true` after its stream has
/// terminated, and an empty assistant bubble is indistinguishable from a
/// hang, so failures with no partial content get this message instead.
pub const TURN_FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while generating a response. Please try again.";

/// The author of a chat turn.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A message submitted by the user.
    User,
    /// A message produced by the inference backend.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message in a conversation.
///
/// User turns are created complete. Assistant turns start empty with
/// `streaming = true` and grow by [`push_delta`](ChatTurn::push_delta) until
/// the stream completes, fails, or is cancelled; after that the turn is
/// terminal and no further mutation is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Host-assigned identifier, unique within a conversation.
    pub id: u64,
    /// Who authored this turn.
    pub role: Role,
    /// The accumulated text content.
    pub content: String,
    /// True while content is still being appended.
    pub streaming: bool,
}

impl ChatTurn {
    /// Create a completed user turn.
    pub fn user(id: u64, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            streaming: false,
        }
    }

    /// Create an empty assistant turn that is still streaming.
    pub fn assistant_pending(id: u64) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            streaming: true,
        }
    }

    /// Append a delta fragment. Ignored once the turn is terminal.
    pub fn push_delta(&mut self, fragment: &str) {
        if self.streaming {
            self.content.push_str(fragment);
        }
    }

    /// Mark the turn complete. Content is frozen as-is.
    pub fn complete(&mut self) {
        self.streaming = false;
    }

    /// Resolve the turn after a failure.
    ///
    /// Partial content already assembled is preserved; a turn that never
    /// received a delta resolves to [`TURN_FAILURE_MESSAGE`].
    pub fn fail(&mut self) {
        if self.streaming && self.content.is_empty() {
            self.content = TURN_FAILURE_MESSAGE.to_string();
        }
        self.streaming = false;
    }

    /// Returns true if this turn can no longer change.
    pub fn is_terminal(&self) -> bool {
        !self.streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_turn_is_terminal() {
        let turn = ChatTurn::user(1, "hello");
        assert_eq!(turn.role, Role::User);
        assert!(turn.is_terminal());
        assert_eq!(turn.content, "hello");
    }

    #[test]
    fn deltas_accumulate_in_order() {
        let mut turn = ChatTurn::assistant_pending(2);
        turn.push_delta("Hel");
        turn.push_delta("lo");
        assert_eq!(turn.content, "Hello");
        assert!(turn.streaming);
    }

    #[test]
    fn no_mutation_after_completion() {
        let mut turn = ChatTurn::assistant_pending(2);
        turn.push_delta("done");
        turn.complete();
        turn.push_delta(" more");
        assert_eq!(turn.content, "done");
    }

    #[test]
    fn failure_preserves_partial_content() {
        let mut turn = ChatTurn::assistant_pending(2);
        turn.push_delta("partial");
        turn.fail();
        assert_eq!(turn.content, "partial");
        assert!(turn.is_terminal());
    }

    #[test]
    fn failure_without_content_uses_fixed_message() {
        let mut turn = ChatTurn::assistant_pending(2);
        turn.fail();
        assert_eq!(turn.content, TURN_FAILURE_MESSAGE);
        assert!(turn.is_terminal());
    }

    #[test]
    fn role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }
}
