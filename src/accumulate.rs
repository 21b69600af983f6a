//! Accumulates turn events into a complete chat turn while passing them through.

use std::pin::Pin;

use futures::Stream;

use crate::session::TurnEvent;
use crate::types::ChatTurn;

/// A stream wrapper that assembles [`TurnEvent`]s into a finished [`ChatTurn`].
///
/// This lets a host render deltas as they arrive while the final turn is
/// built without re-buffering. When the stream is fully drained (completed,
/// failed, or cancelled), the assembled turn is sent via the oneshot channel
/// returned by `new()`, with `streaming` resolved to `false` either way.
pub struct AccumulatingTurn {
    inner: Pin<Box<dyn Stream<Item = TurnEvent> + Send>>,
    turn: Option<ChatTurn>,
    turn_tx: Option<tokio::sync::oneshot::Sender<ChatTurn>>,
}

impl AccumulatingTurn {
    /// Wraps a turn-event stream, accumulating deltas into `turn`.
    ///
    /// Returns the stream and a receiver that will contain the assembled
    /// turn once the stream is fully drained.
    pub fn new<S>(stream: S, turn: ChatTurn) -> (Self, tokio::sync::oneshot::Receiver<ChatTurn>)
    where
        S: Stream<Item = TurnEvent> + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let this = Self {
            inner: Box::pin(stream),
            turn: Some(turn),
            turn_tx: Some(tx),
        };
        (this, rx)
    }

    fn accumulate_event(&mut self, event: &TurnEvent) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        match event {
            TurnEvent::Delta(fragment) => turn.push_delta(fragment),
            TurnEvent::Completed => turn.complete(),
            TurnEvent::Failed(_) => turn.fail(),
        }
    }

    /// A read-only view of the turn assembled so far.
    pub fn turn(&self) -> Option<&ChatTurn> {
        self.turn.as_ref()
    }
}

impl Stream for AccumulatingTurn {
    type Item = TurnEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            std::task::Poll::Ready(Some(event)) => {
                self.accumulate_event(&event);
                std::task::Poll::Ready(Some(event))
            }
            std::task::Poll::Ready(None) => {
                if let Some(tx) = self.turn_tx.take() {
                    if let Some(mut turn) = self.turn.take() {
                        // A cancelled stream ends without a terminal event;
                        // the turn must still leave the streaming state.
                        turn.complete();
                        let _ = tx.send(turn);
                    }
                }
                std::task::Poll::Ready(None)
            }
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}
