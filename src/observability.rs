use biometrics::{Collector, Counter};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("chatwire.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("chatwire.client.request_errors");

pub(crate) static STREAM_FRAMES: Counter = Counter::new("chatwire.stream.frames");
pub(crate) static STREAM_FRAME_ERRORS: Counter = Counter::new("chatwire.stream.frame_errors");
pub(crate) static STREAM_CANCELLED: Counter = Counter::new("chatwire.stream.cancelled");
pub(crate) static STREAM_FAILURES: Counter = Counter::new("chatwire.stream.failures");

pub(crate) static SOCKET_CONNECTS: Counter = Counter::new("chatwire.socket.connects");
pub(crate) static SOCKET_DISCONNECTS: Counter = Counter::new("chatwire.socket.disconnects");
pub(crate) static SOCKET_RETRIES_EXHAUSTED: Counter =
    Counter::new("chatwire.socket.retries_exhausted");
pub(crate) static SOCKET_SNAPSHOTS: Counter = Counter::new("chatwire.socket.snapshots");
pub(crate) static SOCKET_SNAPSHOT_ERRORS: Counter =
    Counter::new("chatwire.socket.snapshot_errors");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);

    collector.register_counter(&STREAM_FRAMES);
    collector.register_counter(&STREAM_FRAME_ERRORS);
    collector.register_counter(&STREAM_CANCELLED);
    collector.register_counter(&STREAM_FAILURES);

    collector.register_counter(&SOCKET_CONNECTS);
    collector.register_counter(&SOCKET_DISCONNECTS);
    collector.register_counter(&SOCKET_RETRIES_EXHAUSTED);
    collector.register_counter(&SOCKET_SNAPSHOTS);
    collector.register_counter(&SOCKET_SNAPSHOT_ERRORS);
}
