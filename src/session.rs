//! Streaming chat session management.
//!
//! A [`StreamingChatSession`] drives exactly one request/response streaming
//! exchange at a time: it sends the request, decodes the incremental frame
//! stream, and yields text deltas in exact wire order followed by exactly
//! one terminal event. Cancellation is cooperative via a shared token
//! checked between reads.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::BackendClient;
use crate::observability::{STREAM_CANCELLED, STREAM_FAILURES};
use crate::types::{ChatRequest, StreamFrame};
use crate::{Error, Result};

/// An event produced while streaming one chat turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// A text fragment to append to the assistant turn, in wire order.
    Delta(String),
    /// The turn finished normally. Yielded exactly once, last.
    Completed,
    /// The turn failed mid-stream. Yielded exactly once, last. Deltas
    /// already delivered are preserved, not rolled back.
    Failed(String),
}

impl TurnEvent {
    /// Returns true if this event ends the turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Completed | TurnEvent::Failed(_))
    }
}

/// Drives one streaming chat exchange at a time.
///
/// At most one turn may be open per session; [`send`](Self::send) refuses a
/// second request while a [`TurnStream`] is still live. The guard releases
/// when the stream is dropped, so hosts should drop the stream once it has
/// yielded its terminal event (or been cancelled).
#[derive(Debug, Clone)]
pub struct StreamingChatSession {
    client: BackendClient,
    active: Arc<AtomicBool>,
}

impl StreamingChatSession {
    /// Create a session on top of a backend client.
    pub fn new(client: BackendClient) -> Self {
        Self {
            client,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true if a turn is currently open.
    pub fn is_streaming(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Send a chat request and stream the response.
    ///
    /// Establishment failures (timeout, connection refused, non-success
    /// status) surface as an immediate `Err`; no turn is left open. Once a
    /// stream is returned it yields deltas followed by exactly one terminal
    /// event, unless cancelled first.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty message or if another turn
    /// is still open, and the establishment error otherwise.
    pub async fn send(&self, request: ChatRequest) -> Result<TurnStream> {
        if request.message.trim().is_empty() {
            return Err(Error::validation(
                "message must not be empty",
                Some("message".to_string()),
            ));
        }

        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::validation(
                "a turn is already streaming; cancel it or wait for it to finish",
                None,
            ));
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        // Establishment failure resolves the guard via drop; the host never
        // sees a turn stuck in a streaming state.
        let frames = self.client.stream_chat(&request).await?;
        debug!("chat stream established");

        Ok(TurnStream::from_frames(frames, guard))
    }
}

/// Releases the session's single-turn slot when the turn ends.
#[derive(Debug)]
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The event stream for one in-flight chat turn.
///
/// Dropping the stream releases the session slot and the underlying
/// network resource.
pub struct TurnStream {
    inner: Pin<Box<dyn Stream<Item = TurnEvent> + Send>>,
    cancel: CancellationToken,
}

impl TurnStream {
    /// Build the turn state machine over a decoded frame stream.
    fn from_frames<S>(frames: S, guard: ActiveGuard) -> Self
    where
        S: Stream<Item = Result<StreamFrame>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let inner = turn_events(Box::pin(frames), cancel.clone(), guard);
        Self {
            inner: Box::pin(inner),
            cancel,
        }
    }

    /// Request cooperative cancellation.
    ///
    /// The decode loop stops promptly: no further deltas are yielded, no
    /// terminal event follows, and the network resource is released when
    /// the stream is dropped. The host is responsible for marking the
    /// in-progress turn as no longer streaming.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token the host can hold to cancel this turn from elsewhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl std::fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnStream").finish_non_exhaustive()
    }
}

impl Stream for TurnStream {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TurnEvent>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// The decode loop: frames in, turn events out, terminal event exactly once.
fn turn_events<S>(
    frames: S,
    cancel: CancellationToken,
    guard: ActiveGuard,
) -> impl Stream<Item = TurnEvent> + Send
where
    S: Stream<Item = Result<StreamFrame>> + Send + Unpin + 'static,
{
    struct State<S> {
        frames: S,
        cancel: CancellationToken,
        done: bool,
        _guard: ActiveGuard,
    }

    let state = State {
        frames,
        cancel,
        done: false,
        _guard: guard,
    };

    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        tokio::select! {
            biased;
            _ = st.cancel.cancelled() => {
                // Buffered-but-unprocessed data is discarded with the stream.
                STREAM_CANCELLED.click();
                None
            }
            frame = st.frames.next() => {
                let event = match frame {
                    Some(Ok(StreamFrame::Delta { content })) => TurnEvent::Delta(content),
                    Some(Ok(StreamFrame::Done)) => {
                        st.done = true;
                        TurnEvent::Completed
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        STREAM_FAILURES.click();
                        TurnEvent::Failed(e.to_string())
                    }
                    // End of data without a marker still completes the turn.
                    None => {
                        st.done = true;
                        TurnEvent::Completed
                    }
                };
                Some((event, st))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::sync::mpsc;

    fn guard() -> (ActiveGuard, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(true));
        (ActiveGuard(Arc::clone(&flag)), flag)
    }

    fn channel_frames(
        rx: mpsc::Receiver<Result<StreamFrame>>,
    ) -> impl Stream<Item = Result<StreamFrame>> + Send + Unpin {
        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    fn frames(items: Vec<Result<StreamFrame>>) -> impl Stream<Item = Result<StreamFrame>> + Unpin {
        Box::pin(stream::iter(items))
    }

    fn delta(content: &str) -> Result<StreamFrame> {
        Ok(StreamFrame::Delta {
            content: content.to_string(),
        })
    }

    #[tokio::test]
    async fn deltas_then_completed() {
        let (g, _) = guard();
        let turn = TurnStream::from_frames(
            frames(vec![delta("Hel"), delta("lo"), Ok(StreamFrame::Done)]),
            g,
        );
        let events: Vec<_> = turn.collect().await;
        assert_eq!(
            events,
            vec![
                TurnEvent::Delta("Hel".to_string()),
                TurnEvent::Delta("lo".to_string()),
                TurnEvent::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn end_of_data_completes() {
        let (g, _) = guard();
        let turn = TurnStream::from_frames(frames(vec![delta("x")]), g);
        let events: Vec<_> = turn.collect().await;
        assert_eq!(
            events,
            vec![TurnEvent::Delta("x".to_string()), TurnEvent::Completed]
        );
    }

    #[tokio::test]
    async fn accepts_frame_streams_that_cannot_be_unpinned() {
        // An unfold stream holds an async block and cannot be unpinned;
        // the decoded frame stream has exactly this shape.
        let (g, _) = guard();
        let frames = stream::unfold(0u8, |n| async move {
            match n {
                0 => Some((delta("hi"), 1)),
                1 => Some((Ok(StreamFrame::Done), 2)),
                _ => None,
            }
        });
        let turn = TurnStream::from_frames(frames, g);
        let events: Vec<_> = turn.collect().await;
        assert_eq!(
            events,
            vec![TurnEvent::Delta("hi".to_string()), TurnEvent::Completed]
        );
    }

    #[tokio::test]
    async fn turn_stream_debug_is_opaque() {
        let (g, _) = guard();
        let turn = TurnStream::from_frames(frames(vec![Ok(StreamFrame::Done)]), g);
        assert_eq!(format!("{turn:?}"), "TurnStream { .. }");
    }

    #[tokio::test]
    async fn transport_error_fails_once() {
        let (g, _) = guard();
        let turn = TurnStream::from_frames(
            frames(vec![
                delta("partial"),
                Err(Error::streaming("connection reset", None)),
            ]),
            g,
        );
        let events: Vec<_> = turn.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], TurnEvent::Delta("partial".to_string()));
        assert!(matches!(&events[1], TurnEvent::Failed(msg) if msg.contains("connection reset")));
    }

    #[tokio::test]
    async fn cancellation_stops_deltas_promptly() {
        let (g, _) = guard();
        let (tx, rx) = mpsc::channel::<Result<StreamFrame>>(8);
        let mut turn = TurnStream::from_frames(channel_frames(rx), g);

        tx.send(delta("one ")).await.unwrap();
        tx.send(delta("two")).await.unwrap();

        assert_eq!(
            turn.next().await,
            Some(TurnEvent::Delta("one ".to_string()))
        );
        assert_eq!(turn.next().await, Some(TurnEvent::Delta("two".to_string())));

        turn.cancel();
        // A delta still in flight must not be delivered after cancellation.
        tx.send(delta("three")).await.unwrap();
        assert_eq!(turn.next().await, None);
    }

    #[tokio::test]
    async fn cancellation_while_awaiting_wakes_the_stream() {
        let (g, _) = guard();
        let (_tx, rx) = mpsc::channel::<Result<StreamFrame>>(1);
        let mut turn = TurnStream::from_frames(channel_frames(rx), g);
        let token = turn.cancellation_token();

        let handle = tokio::spawn(async move { turn.next().await });
        token.cancel();
        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn guard_releases_when_stream_dropped() {
        let (g, flag) = guard();
        let turn = TurnStream::from_frames(frames(vec![Ok(StreamFrame::Done)]), g);
        assert!(flag.load(Ordering::Acquire));
        drop(turn);
        assert!(!flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let client = BackendClient::new(Some("http://localhost:1".to_string())).unwrap();
        let session = StreamingChatSession::new(client);
        let err = session.send(ChatRequest::new("   ")).await.unwrap_err();
        assert!(err.is_validation());
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn establishment_failure_leaves_no_open_turn() {
        // Nothing listens on this port; the connect fails fast.
        let client = BackendClient::with_options(
            Some("http://127.0.0.1:9".to_string()),
            Some(std::time::Duration::from_millis(250)),
            None,
        )
        .unwrap();
        let session = StreamingChatSession::new(client);
        let err = session.send(ChatRequest::new("hi")).await.unwrap_err();
        assert!(err.is_connection() || err.is_timeout());
        assert!(!session.is_streaming());
    }
}
