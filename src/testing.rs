//! Reusable test utilities for exercising the stream client without a real socket.
//!
//! [`MockTransport`] hands the client one end of an in-memory pipe per connect attempt and
//! delivers the other end to the test as a [`MockPeer`], which plays the exchange: it reads
//! CRLF-delimited requests and writes arbitrary bytes back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;

use crate::core::{BackoffPolicy, RetryBudget, StreamError, StreamTlsConfig};
use crate::transport::{StreamTransport, TransportConnectFuture};

const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockConnect {
    /// Hand out a pipe and deliver the peer end to the listener.
    Accept,
    /// Fail the attempt as if the dial was refused.
    Refuse,
    /// Never complete; the attempt only ends through timeout or cancellation.
    Hang,
}

#[derive(Default)]
struct MockScript {
    queued: VecDeque<MockConnect>,
    fallback: Option<MockConnect>,
}

/// A transport backed by `tokio::io::duplex` pipes.
#[derive(Clone)]
pub struct MockTransport {
    peers: mpsc::UnboundedSender<MockPeer>,
    script: Arc<Mutex<MockScript>>,
    attempts: Arc<AtomicUsize>,
    pipe_capacity: usize,
}

impl MockTransport {
    /// Build a transport plus the listener that receives the peer end of every accepted
    /// connection.
    pub fn channel_pair() -> (Self, MockListener) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                script: Arc::new(Mutex::new(MockScript::default())),
                attempts: Arc::new(AtomicUsize::new(0)),
                pipe_capacity: DEFAULT_PIPE_CAPACITY,
            },
            MockListener { rx },
        )
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    /// Queue behaviors for the next attempts, in order.
    pub fn script(&self, steps: impl IntoIterator<Item = MockConnect>) {
        self.with_script(|script| script.queued.extend(steps));
    }

    /// Refuse the next `n` attempts.
    pub fn fail_next(&self, n: usize) {
        self.script(std::iter::repeat_n(MockConnect::Refuse, n));
    }

    /// Behavior once the queued steps are used up (defaults to [`MockConnect::Accept`]).
    pub fn set_fallback(&self, step: MockConnect) {
        self.with_script(|script| script.fallback = Some(step));
    }

    /// Number of connect attempts seen so far.
    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut MockScript) -> R) -> R {
        let mut guard = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn next_step(&self) -> MockConnect {
        self.with_script(|script| {
            script
                .queued
                .pop_front()
                .or(script.fallback)
                .unwrap_or(MockConnect::Accept)
        })
    }
}

impl StreamTransport for MockTransport {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = WriteHalf<DuplexStream>;

    fn connect(
        &self,
        host: String,
        port: u16,
        _tls: StreamTlsConfig,
    ) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self.next_step();
        let peers = self.peers.clone();
        let capacity = self.pipe_capacity;
        Box::pin(async move {
            match step {
                MockConnect::Refuse => Err(StreamError::ConnectionFailed(format!(
                    "{host}:{port}: mock refused attempt {attempt}"
                ))),
                MockConnect::Hang => {
                    std::future::pending::<()>().await;
                    Err(StreamError::ConnectionFailed("unreachable".into()))
                }
                MockConnect::Accept => {
                    let (client, server) = tokio::io::duplex(capacity);
                    let (server_read, server_write) = tokio::io::split(server);
                    peers
                        .send(MockPeer {
                            attempt,
                            reader: BufReader::new(server_read),
                            writer: server_write,
                        })
                        .map_err(|_| {
                            StreamError::ConnectionFailed("mock listener dropped".into())
                        })?;
                    Ok(tokio::io::split(client))
                }
            }
        })
    }
}

/// Receives the exchange side of accepted mock connections.
pub struct MockListener {
    rx: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockListener {
    pub async fn accept(&mut self) -> Option<MockPeer> {
        self.rx.recv().await
    }

    pub async fn accept_timeout(&mut self, timeout: Duration) -> Option<MockPeer> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .unwrap_or_default()
    }
}

/// One request as the exchange saw it.
#[derive(Debug, Clone)]
pub struct PeerRequest {
    pub op: String,
    pub id: Option<u32>,
    pub raw: String,
}

/// Exchange side of one mock connection.
pub struct MockPeer {
    attempt: usize,
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl MockPeer {
    /// Which connect attempt produced this peer (1-based).
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    /// Write `line` followed by the CRLF delimiter.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        let mut frame = Vec::with_capacity(line.len() + 2);
        frame.extend_from_slice(line.as_bytes());
        frame.extend_from_slice(b"\r\n");
        self.send_raw(&frame).await
    }

    pub async fn send_connection(&mut self, connection_id: &str) -> std::io::Result<()> {
        self.send_line(&format!(
            r#"{{"op":"connection","connectionId":"{connection_id}"}}"#
        ))
        .await
    }

    pub async fn reply_success(&mut self, id: u32) -> std::io::Result<()> {
        self.send_line(&format!(
            r#"{{"op":"status","id":{id},"statusCode":"SUCCESS","connectionClosed":false}}"#
        ))
        .await
    }

    pub async fn reply_failure(
        &mut self,
        id: u32,
        error_code: &str,
        message: &str,
    ) -> std::io::Result<()> {
        self.send_line(&format!(
            r#"{{"op":"status","id":{id},"statusCode":"FAILURE","errorCode":"{error_code}","errorMessage":"{message}","connectionClosed":false}}"#
        ))
        .await
    }

    pub async fn send_market_change(&mut self, id: u32, clk: &str) -> std::io::Result<()> {
        self.send_line(&format!(
            r#"{{"op":"mcm","id":{id},"clk":"{clk}","pt":1700000000000,"mc":[{{"id":"1.23","rc":[{{"id":101,"atb":[[2.5,10.0]]}}]}}]}}"#
        ))
        .await
    }

    pub async fn send_order_change(&mut self, id: u32, clk: &str) -> std::io::Result<()> {
        self.send_line(&format!(
            r#"{{"op":"ocm","id":{id},"clk":"{clk}","pt":1700000000000,"oc":[]}}"#
        ))
        .await
    }

    /// Read the next CRLF-terminated request. `None` on EOF, timeout or an unparseable line.
    pub async fn recv_request(&mut self, timeout: Duration) -> Option<PeerRequest> {
        let mut line = Vec::new();
        let read = tokio::time::timeout(timeout, self.reader.read_until(b'\n', &mut line)).await;
        match read {
            Ok(Ok(n)) if n > 0 => {}
            _ => return None,
        }
        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
        }
        let op = sonic_rs::get(line.as_slice(), &["op"])
            .ok()
            .and_then(|v| sonic_rs::JsonValueTrait::as_str(&v).map(str::to_owned))?;
        let id = sonic_rs::get(line.as_slice(), &["id"])
            .ok()
            .and_then(|v| sonic_rs::JsonValueTrait::as_u64(&v))
            .and_then(|id| u32::try_from(id).ok());
        let raw = String::from_utf8(line).ok()?;
        Some(PeerRequest { op, id, raw })
    }

    /// Read requests until one with `op` arrives, skipping others.
    pub async fn recv_op(&mut self, op: &str, timeout: Duration) -> Option<PeerRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let request = self.recv_request(remaining).await?;
            if request.op == op {
                return Some(request);
            }
        }
    }

    /// Close the exchange side; the client reader sees EOF.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Fixed-delay backoff for tests that exercise the retry loop without real waits.
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    delay: Duration,
    budget: RetryBudget,
    attempts: u32,
}

impl FixedBackoff {
    /// `retries` follows the client convention: `-1` unlimited, `0` never, `N` waits.
    pub fn new(delay: Duration, retries: i32) -> Self {
        Self {
            delay,
            budget: RetryBudget::from_retries(retries),
            attempts: 0,
        }
    }
}

impl BackoffPolicy for FixedBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        let allowed = match self.budget {
            RetryBudget::Unlimited => true,
            RetryBudget::Never => false,
            RetryBudget::Limited(max) => self.attempts < max,
        };
        if !allowed {
            return None;
        }
        self.attempts += 1;
        Some(self.delay)
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn accepted_connection_pipes_both_ways() {
        let (transport, mut listener) = MockTransport::channel_pair();
        let (mut reader, mut writer) = transport
            .connect("mock".into(), 1, StreamTlsConfig::default())
            .await
            .expect("connect");
        let mut peer = listener.accept().await.expect("peer");
        assert_eq!(peer.attempt(), 1);

        writer
            .write_all(b"{\"op\":\"heartbeat\",\"id\":3}\r\n")
            .await
            .expect("write");
        let req = peer
            .recv_request(Duration::from_secs(1))
            .await
            .expect("request");
        assert_eq!(req.op, "heartbeat");
        assert_eq!(req.id, Some(3));

        peer.send_connection("c-1").await.expect("send");
        let mut buf = [0u8; 128];
        let n = reader.read(&mut buf).await.expect("read");
        assert!(buf[..n].ends_with(b"\r\n"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scripted_refusals_come_first() {
        let (transport, _listener) = MockTransport::channel_pair();
        transport.fail_next(2);
        for _ in 0..2 {
            let res = transport
                .connect("mock".into(), 1, StreamTlsConfig::default())
                .await;
            assert!(matches!(res, Err(StreamError::ConnectionFailed(_))));
        }
        assert!(
            transport
                .connect("mock".into(), 1, StreamTlsConfig::default())
                .await
                .is_ok()
        );
        assert_eq!(transport.connect_attempts(), 3);
    }
}
