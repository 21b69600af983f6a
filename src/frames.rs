//! Wire-frame decoding for streaming chat responses.
//!
//! The chat endpoint responds with an incrementally-produced UTF-8 body
//! organized as newline-delimited frames. Frames of interest begin with the
//! literal prefix `data: ` followed by a JSON payload; everything else is
//! ignored. A malformed payload is dropped with a log line and never ends
//! the stream.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use crate::observability::{STREAM_FRAME_ERRORS, STREAM_FRAMES};
use crate::{Error, Result, StreamFrame};

/// The prefix identifying a frame that carries a payload.
pub const DATA_PREFIX: &str = "data: ";

/// Decode a stream of bytes into a stream of chat frames.
///
/// This function takes the byte stream of an HTTP response and converts it
/// into parsed [`StreamFrame`]s, handling line buffering across chunk
/// boundaries. The output ends after the completion marker is yielded even
/// if the underlying stream keeps producing data.
pub fn decode_frames<S>(byte_stream: S) -> impl Stream<Item = Result<StreamFrame>>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + 'static,
{
    // Convert reqwest errors to our error type; pin so the loop can poll it.
    let byte_stream = Box::pin(byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    }));

    // State: the byte stream, a partial-line buffer, and whether the
    // completion marker has been seen. The buffer holds raw bytes so a
    // multi-byte character split across chunk boundaries stays intact;
    // UTF-8 is only checked once a line is complete.
    let state = (byte_stream, Vec::<u8>::new(), false);

    stream::unfold(state, move |(mut stream, mut buffer, done)| async move {
        if done {
            return None;
        }
        loop {
            // Drain complete lines already buffered.
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match decode_line(&line[..pos]) {
                    Ok(Some(frame)) => {
                        let done = frame.is_done();
                        return Some((Ok(frame), (stream, buffer, done)));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        return Some((Err(e), (stream, buffer, done)));
                    }
                }
            }

            // Read more data
            match stream.next().await {
                Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    return Some((Err(e), (stream, buffer, true)));
                }
                None => {
                    // End of stream: a trailing line may lack its newline.
                    if !buffer.is_empty() {
                        let line = std::mem::take(&mut buffer);
                        match decode_line(&line) {
                            Ok(Some(frame)) => {
                                return Some((Ok(frame), (stream, buffer, true)));
                            }
                            Ok(None) => {}
                            Err(e) => {
                                return Some((Err(e), (stream, buffer, true)));
                            }
                        }
                    }
                    return None;
                }
            }
        }
    })
}

/// Decode one complete line from its raw bytes.
fn decode_line(line: &[u8]) -> Result<Option<StreamFrame>> {
    let text = std::str::from_utf8(line).map_err(|e| {
        Error::encoding(format!("Invalid UTF-8 in frame: {e}"), Some(Box::new(e)))
    })?;
    Ok(frame_from_line(text.trim_end_matches('\r')))
}

/// Parse a single line into a frame.
///
/// Lines without the `data: ` prefix and payloads that fail to parse yield
/// `None`; the caller keeps reading. Dropping a bad frame must never abort
/// the whole stream.
fn frame_from_line(line: &str) -> Option<StreamFrame> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        if !line.trim().is_empty() {
            debug!(line, "ignoring non-data frame");
        }
        return None;
    };
    match StreamFrame::parse(payload) {
        Ok(frame) => {
            STREAM_FRAMES.click();
            Some(frame)
        }
        Err(e) => {
            STREAM_FRAME_ERRORS.click();
            warn!(error = %e, "dropping malformed frame");
            None
        }
    }
}
