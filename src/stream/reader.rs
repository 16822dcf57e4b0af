use std::time::Duration;

use kameo::prelude::ActorRef;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{FrameBuffer, FrameEvent, StreamConfig, StreamDisconnectCause};
use crate::protocol::InboundMessage;
use crate::stream::dispatcher::{ReaderEvent, StreamDispatcher};
use crate::stream::shutdown_signalled;

/// Read-side sizing and deadlines.
#[derive(Debug, Clone, Copy)]
pub struct ReaderSettings {
    pub io_timeout: Duration,
    pub read_buffer_bytes: usize,
    pub read_chunk_bytes: usize,
}

impl ReaderSettings {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            io_timeout: config.io_timeout,
            read_buffer_bytes: config.buffers.read_buffer_bytes,
            read_chunk_bytes: config.buffers.read_chunk_bytes,
        }
    }
}

/// Pull every complete frame out of `frames` and decode it.
///
/// Undecodable and bare-`\n` frames become framing anomalies; empty frames vanish.
pub fn decode_frames(frames: &mut FrameBuffer, out: &mut Vec<ReaderEvent>) {
    for event in frames.drain() {
        match event {
            FrameEvent::Frame(bytes) => match InboundMessage::decode(&bytes) {
                Ok(message) => out.push(ReaderEvent::Inbound(message)),
                Err(err) => {
                    let detail = format!("dropped undecodable frame ({} bytes): {err}", bytes.len());
                    warn!(target: "esa-reader", "{detail}");
                    out.push(ReaderEvent::FramingAnomaly { detail });
                }
            },
            FrameEvent::Malformed { len } => {
                let detail = format!("dropped {len}-byte line terminated by bare LF");
                warn!(target: "esa-reader", "{detail}");
                out.push(ReaderEvent::FramingAnomaly { detail });
            }
            FrameEvent::Empty => {}
        }
    }
}

/// Spawn the reader task for one session.
///
/// On exit for any reason other than shutdown it reports the cause to the dispatcher.
pub fn spawn_reader<R>(
    reader: R,
    dispatcher: ActorRef<StreamDispatcher>,
    shutdown_rx: watch::Receiver<bool>,
    settings: ReaderSettings,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut shutdown_rx = shutdown_rx;
        let cause = run_reader(reader, &dispatcher, &mut shutdown_rx, settings).await;
        if cause == StreamDisconnectCause::Shutdown {
            return;
        }
        tokio::select! {
            _ = shutdown_signalled(&mut shutdown_rx) => {}
            _ = dispatcher.tell(ReaderEvent::Exited { cause }).send() => {}
        }
    })
}

async fn run_reader<R>(
    mut reader: R,
    dispatcher: &ActorRef<StreamDispatcher>,
    shutdown_rx: &mut watch::Receiver<bool>,
    settings: ReaderSettings,
) -> StreamDisconnectCause
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::new(settings.read_buffer_bytes);
    let mut scratch = vec![0u8; settings.read_chunk_bytes.min(settings.read_buffer_bytes)];
    let mut events = Vec::with_capacity(16);

    loop {
        let want = frames.spare_capacity().min(scratch.len());
        if want == 0 {
            warn!(
                target: "esa-reader",
                limit = frames.capacity(),
                "frame exceeds read buffer, closing session"
            );
            return StreamDisconnectCause::FrameTooLarge {
                limit: frames.capacity(),
            };
        }

        let read = tokio::select! {
            _ = shutdown_signalled(shutdown_rx) => return StreamDisconnectCause::Shutdown,
            read = tokio::time::timeout(settings.io_timeout, reader.read(&mut scratch[..want])) => read,
        };
        let n = match read {
            // Idle: loop so shutdown is observed.
            Err(_) => continue,
            Ok(Ok(0)) => {
                debug!(target: "esa-reader", "peer closed stream");
                return StreamDisconnectCause::RemoteClosed;
            }
            Ok(Ok(n)) => n,
            Ok(Err(err)) => {
                warn!(target: "esa-reader", error = %err, "stream read failed");
                return StreamDisconnectCause::ReadFailure {
                    error: err.to_string(),
                };
            }
        };

        if let Err(err) = frames.push(&scratch[..n]) {
            warn!(target: "esa-reader", error = %err, "read overflowed frame buffer");
            return StreamDisconnectCause::FrameTooLarge {
                limit: frames.capacity(),
            };
        }

        decode_frames(&mut frames, &mut events);
        for event in events.drain(..) {
            tokio::select! {
                _ = shutdown_signalled(shutdown_rx) => return StreamDisconnectCause::Shutdown,
                sent = dispatcher.tell(event).send() => {
                    if sent.is_err() {
                        return StreamDisconnectCause::Shutdown;
                    }
                }
            }
        }
    }
}
