use std::time::Duration;

use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::core::{StreamError, StreamResult, encode_frame};
use crate::protocol::Request;
use crate::supervision::TypedSupervisor;
use crate::transport::BoxedStreamWriter;

/// Writer actor that owns the transport write half and serializes writes.
///
/// Each request becomes one JSON object plus `\r\n`, written under `io_timeout`. A write that
/// times out or fails is logged and dropped; the caller notices through its reply timeout.
pub struct StreamWriterActor {
    writer: BoxedStreamWriter,
    shutdown_rx: watch::Receiver<bool>,
    io_timeout: Duration,
    scratch: Vec<u8>,
}

impl StreamWriterActor {
    pub fn new(
        writer: BoxedStreamWriter,
        shutdown_rx: watch::Receiver<bool>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            writer,
            shutdown_rx,
            io_timeout,
            scratch: Vec::with_capacity(1024),
        }
    }

    async fn write_frame(&mut self, id: Option<u32>, op: &'static str) {
        let io_timeout = self.io_timeout;
        let (writer, frame) = (&mut self.writer, &self.scratch);
        let write = async move {
            writer.write_all(frame).await?;
            writer.flush().await
        };
        match tokio::time::timeout(io_timeout, write).await {
            Ok(Ok(())) => {
                debug!(target: "esa-writer", id = ?id, op, bytes = self.scratch.len(), "request written");
            }
            Ok(Err(err)) => {
                warn!(target: "esa-writer", id = ?id, op, error = %err, "request write failed");
            }
            Err(_) => {
                warn!(
                    target: "esa-writer",
                    id = ?id,
                    op,
                    timeout_ms = self.io_timeout.as_millis() as u64,
                    "request write timed out"
                );
            }
        }
    }
}

impl Actor for StreamWriterActor {
    type Args = Self;
    type Error = StreamError;

    async fn on_start(args: Self::Args, _ctx: ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }

    async fn on_stop(
        &mut self,
        _ctx: kameo::actor::WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> Result<(), Self::Error> {
        // Best-effort close_notify / FIN.
        let _ = tokio::time::timeout(self.io_timeout, self.writer.shutdown()).await;
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: kameo::actor::WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            error!(error = ?err, "StreamWriterActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

/// Write one request to the wire.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub request: Request,
}

impl KameoMessage<WriteRequest> for StreamWriterActor {
    type Reply = StreamResult<()>;

    async fn handle(
        &mut self,
        msg: WriteRequest,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if *self.shutdown_rx.borrow() {
            debug!(target: "esa-writer", op = msg.request.op(), "writer stopping, request dropped");
            return Ok(());
        }

        self.scratch.clear();
        match sonic_rs::to_vec(&msg.request) {
            Ok(json) => encode_frame(&json, &mut self.scratch),
            Err(err) => {
                warn!(target: "esa-writer", op = msg.request.op(), error = %err, "request serialization failed");
                return Ok(());
            }
        }
        self.write_frame(msg.request.id, msg.request.op()).await;
        Ok(())
    }
}

/// Spawn a per-client supervisor for writer instances.
pub fn spawn_writer_supervisor() -> ActorRef<TypedSupervisor<StreamWriterActor>> {
    // Restart requires a new connection; the supervisor never restarts a writer.
    TypedSupervisor::spawn(TypedSupervisor::new("esa-stream-writer"))
}

/// Spawn a writer and link it to an existing supervisor.
pub async fn spawn_writer_supervised_with(
    supervisor: &ActorRef<TypedSupervisor<StreamWriterActor>>,
    writer: StreamWriterActor,
    mailbox_capacity: usize,
) -> ActorRef<StreamWriterActor> {
    let actor = StreamWriterActor::spawn_with_mailbox(
        writer,
        kameo::mailbox::bounded(mailbox_capacity),
    );
    actor.link(supervisor).await;
    actor
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn writes_json_with_crlf_delimiter() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let writer = StreamWriterActor::spawn(StreamWriterActor::new(
            Box::new(client),
            shutdown_rx,
            Duration::from_millis(500),
        ));

        writer
            .ask(WriteRequest {
                request: Request::heartbeat().with_id(7),
            })
            .await
            .expect("write accepted");

        let mut buf = vec![0u8; 128];
        let n = tokio::time::timeout(Duration::from_secs(1), server.read(&mut buf))
            .await
            .expect("read in time")
            .expect("read ok");
        let written = &buf[..n];
        assert!(written.ends_with(b"\r\n"));
        let body = std::str::from_utf8(&written[..n - 2]).expect("utf8");
        assert!(body.contains("\"op\":\"heartbeat\""));
        assert!(body.contains("\"id\":7"));

        let _ = writer.stop_gracefully().await;
        writer.wait_for_shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stalled_peer_times_out_without_stopping_writer() {
        // Tiny pipe that nobody drains: the second write blocks until the deadline.
        let (client, _server) = tokio::io::duplex(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let writer = StreamWriterActor::spawn(StreamWriterActor::new(
            Box::new(client),
            shutdown_rx,
            Duration::from_millis(50),
        ));

        for id in 1..=2 {
            let res = writer
                .ask(WriteRequest {
                    request: Request::heartbeat().with_id(id),
                })
                .await;
            assert!(res.is_ok(), "write {id} should be absorbed: {res:?}");
        }
        assert!(writer.is_alive());
    }
}
