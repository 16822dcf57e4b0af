//! Per-session tasks: reader, writer, dispatcher and liveness tracker.

pub mod dispatcher;
pub mod liveness;
pub mod reader;
pub mod requester;
pub mod writer;

pub use dispatcher::{
    DispatchPhase, DispatchState, DispatcherArgs, Enqueue, GetSessionStats, InboundAction,
    ReaderEvent, RecordAnomaly, ReplySlot, StreamDispatcher, SweepExpired,
};
pub use liveness::spawn_liveness;
pub use reader::{ReaderSettings, decode_frames, spawn_reader};
pub use requester::StreamRequester;
pub use writer::{
    StreamWriterActor, WriteRequest, spawn_writer_supervised_with, spawn_writer_supervisor,
};

/// Resolve once the session's shutdown flag is set (or its sender is gone).
///
/// The `watch::Ref` from `wait_for` is dropped here so callers can use this inside
/// `tokio::select!` in spawned tasks.
pub(crate) async fn shutdown_signalled(shutdown_rx: &mut tokio::sync::watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}
