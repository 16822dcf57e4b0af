//! Public facade: connect with retry, issue requests, disconnect.

use std::sync::Arc;

use kameo::Actor;
use kameo::prelude::ActorRef;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{
    BackoffPolicy, BackoffWait, Credentials, ExponentialBackoff, SessionStats, StreamConfig,
    StreamConnectionStatus, StreamError, StreamResult, wait_backoff,
};
use crate::protocol::{
    ConnectionMessage, MarketChangeMessage, MarketSubscription, OrderChangeMessage,
    OrderSubscription, Request, StatusMessage,
};
use crate::stream::{
    DispatcherArgs, StreamDispatcher, StreamRequester, StreamWriterActor,
    spawn_writer_supervised_with, spawn_writer_supervisor,
};
use crate::supervision::TypedSupervisor;
use crate::transport::{StreamTransport, TlsTransport};

/// Actors and signals of one established session.
struct ActiveSession {
    connection_id: String,
    dispatcher: ActorRef<StreamDispatcher>,
    writer: ActorRef<StreamWriterActor>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    authenticated_tx: watch::Sender<bool>,
    requester: StreamRequester,
}

/// Streaming client for one exchange-stream session at a time.
///
/// `connect` drives retry/backoff until the peer's connection message arrives; request methods
/// then round-trip through the session dispatcher. Market and order pushes land on two bounded
/// feeds that outlive individual sessions; take them once with [`StreamClient::take_market_feed`]
/// and [`StreamClient::take_order_feed`]. A slow feed consumer eventually stalls the session.
pub struct StreamClient<T: StreamTransport = TlsTransport> {
    config: StreamConfig,
    credentials: Credentials,
    transport: T,
    session: Option<ActiveSession>,
    writer_supervisor: Option<ActorRef<TypedSupervisor<StreamWriterActor>>>,
    status_tx: Arc<watch::Sender<StreamConnectionStatus>>,
    market_tx: mpsc::Sender<MarketChangeMessage>,
    market_rx: Option<mpsc::Receiver<MarketChangeMessage>>,
    order_tx: mpsc::Sender<OrderChangeMessage>,
    order_rx: Option<mpsc::Receiver<OrderChangeMessage>>,
}

impl StreamClient<TlsTransport> {
    pub fn new(config: StreamConfig, credentials: Credentials) -> Self {
        Self::with_transport(config, credentials, TlsTransport::default())
    }
}

impl<T: StreamTransport> StreamClient<T> {
    pub fn with_transport(config: StreamConfig, credentials: Credentials, transport: T) -> Self {
        let feed_capacity = config.buffers.feed_capacity.max(1);
        let (market_tx, market_rx) = mpsc::channel(feed_capacity);
        let (order_tx, order_rx) = mpsc::channel(feed_capacity);
        let (status_tx, _) = watch::channel(StreamConnectionStatus::Disconnected);
        Self {
            config,
            credentials,
            transport,
            session: None,
            writer_supervisor: None,
            status_tx: Arc::new(status_tx),
            market_tx,
            market_rx: Some(market_rx),
            order_tx,
            order_rx: Some(order_rx),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Peer-assigned id of the live session. `None` once the reader has gone away.
    pub fn connection_id(&self) -> Option<&str> {
        if !self.is_connected() {
            return None;
        }
        self.session.as_ref().map(|s| s.connection_id.as_str())
    }

    pub fn status(&self) -> watch::Receiver<StreamConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some() && *self.status_tx.borrow() == StreamConnectionStatus::Connected
    }

    pub fn take_market_feed(&mut self) -> Option<mpsc::Receiver<MarketChangeMessage>> {
        self.market_rx.take()
    }

    pub fn take_order_feed(&mut self) -> Option<mpsc::Receiver<OrderChangeMessage>> {
        self.order_rx.take()
    }

    /// Connect using the configured exponential backoff. Returns the connection id.
    pub async fn connect(&mut self, cancel: &CancellationToken) -> StreamResult<String> {
        let mut policy = ExponentialBackoff::from_config(&self.config.retry);
        self.connect_with_policy(cancel, &mut policy).await
    }

    /// Connect, consulting `policy` between failed attempts.
    pub async fn connect_with_policy<P>(
        &mut self,
        cancel: &CancellationToken,
        policy: &mut P,
    ) -> StreamResult<String>
    where
        P: BackoffPolicy + ?Sized,
    {
        if let Some(session) = self.session.as_ref() {
            return Err(StreamError::AlreadyConnected {
                connection_id: session.connection_id.clone(),
            });
        }
        self.config.validate()?;
        policy.reset();

        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            if cancel.is_cancelled() {
                self.status_tx.send_replace(StreamConnectionStatus::Disconnected);
                return Err(StreamError::Cancelled);
            }
            self.status_tx.send_replace(StreamConnectionStatus::Connecting);
            debug!(
                host = %self.config.host,
                port = self.config.port,
                attempt,
                "stream connection attempt"
            );

            let err = match self.try_connect(cancel).await {
                Ok(session) => {
                    let connection_id = session.connection_id.clone();
                    info!(
                        connection_id = %connection_id,
                        attempt,
                        "stream session established"
                    );
                    self.session = Some(session);
                    return Ok(connection_id);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                self.status_tx.send_replace(StreamConnectionStatus::Disconnected);
                return Err(err);
            }
            warn!(attempt, error = %err, "stream connection attempt failed");

            match wait_backoff(policy, cancel).await {
                BackoffWait::Elapsed(delay) => {
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying stream connection"
                    );
                }
                BackoffWait::Interrupted => {
                    self.status_tx.send_replace(StreamConnectionStatus::Disconnected);
                    return Err(StreamError::Cancelled);
                }
                BackoffWait::Exhausted => {
                    self.status_tx.send_replace(StreamConnectionStatus::Disconnected);
                    return Err(StreamError::RetriesExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
            }
        }
    }

    /// One attempt: dial, start the session tasks, wait for the connection message.
    async fn try_connect(&mut self, cancel: &CancellationToken) -> StreamResult<ActiveSession> {
        let deadline = tokio::time::Instant::now() + self.config.connect_timeout;
        let dial = self.transport.connect(
            self.config.host.clone(),
            self.config.port,
            self.config.tls,
        );
        let (reader, writer) = tokio::select! {
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            dialed = tokio::time::timeout_at(deadline, dial) => match dialed {
                Ok(halves) => halves?,
                Err(_) => {
                    return Err(StreamError::Timeout {
                        context: format!("dialing {}:{}", self.config.host, self.config.port),
                    });
                }
            },
        };

        let (mut session, connected_rx) = self.start_session(reader, writer).await;
        let connected: StreamResult<ConnectionMessage> = tokio::select! {
            _ = cancel.cancelled() => Err(StreamError::Cancelled),
            waited = tokio::time::timeout_at(deadline, connected_rx) => match waited {
                Ok(Ok(message)) => Ok(message),
                Ok(Err(_)) => Err(StreamError::SessionClosed),
                Err(_) => Err(StreamError::Timeout {
                    context: "awaiting connection message".to_string(),
                }),
            },
        };

        match connected {
            Ok(message) => {
                session.connection_id = message.connection_id;
                Ok(session)
            }
            Err(err) => {
                self.shutdown_session(session).await;
                Err(err)
            }
        }
    }

    async fn start_session(
        &mut self,
        reader: T::Reader,
        writer: T::Writer,
    ) -> (ActiveSession, oneshot::Receiver<ConnectionMessage>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let (authenticated_tx, authenticated_rx) = watch::channel(false);
        let (connected_tx, connected_rx) = oneshot::channel();

        let supervisor = self
            .writer_supervisor
            .get_or_insert_with(spawn_writer_supervisor)
            .clone();
        let writer = spawn_writer_supervised_with(
            &supervisor,
            StreamWriterActor::new(Box::new(writer), shutdown_rx, self.config.io_timeout),
            self.config.buffers.outbound_capacity,
        )
        .await;

        let dispatcher = StreamDispatcher::spawn_with_mailbox(
            DispatcherArgs {
                config: self.config.clone(),
                reader: Box::new(reader),
                writer: writer.clone(),
                writer_supervisor: supervisor,
                market_tx: self.market_tx.clone(),
                order_tx: self.order_tx.clone(),
                connected_tx,
                shutdown_tx: Arc::clone(&shutdown_tx),
                status_tx: Arc::clone(&self.status_tx),
                authenticated_rx,
            },
            kameo::mailbox::bounded(self.config.buffers.inbound_capacity),
        );
        let requester = StreamRequester::new(
            dispatcher.clone(),
            self.config.queue_timeout,
            self.config.request_timeout,
        );

        (
            ActiveSession {
                connection_id: String::new(),
                dispatcher,
                writer,
                shutdown_tx,
                authenticated_tx,
                requester,
            },
            connected_rx,
        )
    }

    /// Signal stop, wait (bounded) for the dispatcher, then force the rest down.
    async fn shutdown_session(&self, session: ActiveSession) {
        session.shutdown_tx.send_replace(true);
        let _ = session.dispatcher.stop_gracefully().await;
        let stopped = tokio::time::timeout(
            self.config.disconnect_timeout,
            session.dispatcher.wait_for_shutdown(),
        )
        .await;
        if stopped.is_err() {
            warn!(
                connection_id = %session.connection_id,
                timeout_ms = self.config.disconnect_timeout.as_millis() as u64,
                "session did not stop in time, forcing teardown"
            );
            session.dispatcher.kill();
        }
        // The writer owns the transport write half; make sure it is gone either way.
        session.writer.kill();
        self.status_tx.send_replace(StreamConnectionStatus::Disconnected);
    }

    /// Tear down the session. `NotConnected` when there is none.
    pub async fn disconnect(&mut self) -> StreamResult<()> {
        let Some(session) = self.session.take() else {
            return Err(StreamError::NotConnected);
        };
        info!(connection_id = %session.connection_id, "disconnecting stream session");
        self.shutdown_session(session).await;
        Ok(())
    }

    fn active(&self) -> StreamResult<&ActiveSession> {
        self.session.as_ref().ok_or(StreamError::NotConnected)
    }

    /// Handle for issuing requests from other tasks.
    pub fn requester(&self) -> StreamResult<StreamRequester> {
        Ok(self.active()?.requester.clone())
    }

    /// Send an arbitrary request and wait for its status reply.
    pub async fn send(&self, request: Request) -> StreamResult<StatusMessage> {
        self.active()?.requester.send(request).await
    }

    /// Authenticate with the configured credentials. Success starts liveness tracking.
    pub async fn authenticate(&self) -> StreamResult<StatusMessage> {
        let session = self.active()?;
        let status = session
            .requester
            .send(Request::authentication(
                self.credentials.app_key.clone(),
                self.credentials.session_token.clone(),
            ))
            .await?;
        if status.is_success() {
            info!(connection_id = %session.connection_id, "stream session authenticated");
            session.authenticated_tx.send_replace(true);
        } else {
            warn!(
                connection_id = %session.connection_id,
                error_code = ?status.error_code,
                error_message = ?status.error_message,
                "stream authentication rejected"
            );
        }
        Ok(status)
    }

    pub async fn heartbeat(&self) -> StreamResult<StatusMessage> {
        self.active()?.requester.heartbeat().await
    }

    /// Subscribe to market changes. An unset `heartbeat_ms` takes the configured interval.
    pub async fn market_subscribe(
        &self,
        mut subscription: MarketSubscription,
    ) -> StreamResult<StatusMessage> {
        let session = self.active()?;
        subscription
            .heartbeat_ms
            .get_or_insert(self.config.heartbeat.interval.as_millis() as u64);
        session
            .requester
            .send(Request::market_subscription(subscription))
            .await
    }

    /// Subscribe to order changes. An unset `heartbeat_ms` takes the configured interval.
    pub async fn order_subscribe(
        &self,
        mut subscription: OrderSubscription,
    ) -> StreamResult<StatusMessage> {
        let session = self.active()?;
        subscription
            .heartbeat_ms
            .get_or_insert(self.config.heartbeat.interval.as_millis() as u64);
        session
            .requester
            .send(Request::order_subscription(subscription))
            .await
    }

    pub async fn stats(&self) -> StreamResult<SessionStats> {
        self.active()?.requester.stats().await
    }
}

impl<T: StreamTransport> Drop for StreamClient<T> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            // Session tasks watch this signal and exit; the actors stop once their refs drop.
            session.shutdown_tx.send_replace(true);
        }
    }
}
