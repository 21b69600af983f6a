use serde::Deserialize;

use crate::error::{Error, Result};

/// One decoded frame from the chat response stream.
///
/// The wire carries newline-delimited lines; lines of interest begin with
/// `data: ` followed by a JSON payload. Two payload shapes are recognized:
/// a delta carrying a text fragment and the terminal completion marker.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// An incremental fragment of assistant text.
    Delta {
        /// The fragment to append, exactly as sent.
        content: String,
    },
    /// The terminal marker; no further frames follow.
    Done,
}

/// Wire shape of a frame payload. The backend sends `done: false` alongside
/// every delta and an empty `content` with the terminal marker, so both
/// fields are optional here and `done` wins.
#[derive(Deserialize)]
struct RawFrame {
    content: Option<String>,
    done: Option<bool>,
}

impl StreamFrame {
    /// Parse the JSON payload of a `data: ` line.
    ///
    /// Returns an error for payloads that are not valid JSON or that carry
    /// neither a fragment nor the completion marker; callers are expected to
    /// drop such frames without ending the stream.
    pub fn parse(payload: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(payload)?;
        if raw.done == Some(true) {
            return Ok(StreamFrame::Done);
        }
        match raw.content {
            Some(content) => Ok(StreamFrame::Delta { content }),
            None => Err(Error::serialization(
                format!("frame carries neither content nor done marker: '{payload}'"),
                None,
            )),
        }
    }

    /// Returns true if this is the completion marker.
    pub fn is_done(&self) -> bool {
        matches!(self, StreamFrame::Done)
    }
}
