//! Session controller: sole owner of the correlation table.
//!
//! All routing decisions live in [`DispatchState`], a plain state machine driven by
//! `(state, event) -> action`. [`StreamDispatcher`] is the kameo actor wrapped around it: its
//! mailbox multiplexes outbound enqueues, reader events and expiry ticks, and it owns the
//! reader, liveness and sweep tasks of one session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::{
    AnomalyKind, CorrelationTable, Expired, InsertOutcome, SessionStats, StreamConfig,
    StreamConnectionStatus, StreamDisconnectCause, StreamError, StreamHealthMonitor,
    StreamResult,
};
use crate::protocol::{
    ConnectionMessage, InboundMessage, MarketChangeMessage, OrderChangeMessage, Request,
    StatusMessage,
};
use crate::stream::liveness::spawn_liveness;
use crate::stream::reader::{ReaderSettings, spawn_reader};
use crate::stream::requester::StreamRequester;
use crate::stream::shutdown_signalled;
use crate::stream::writer::{StreamWriterActor, WriteRequest};
use crate::supervision::TypedSupervisor;
use crate::transport::BoxedStreamReader;

/// Single-use slot a caller waits on for its status reply.
pub type ReplySlot = oneshot::Sender<StreamResult<StatusMessage>>;

/// Connection phase of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    AwaitingFirstMessage,
    Connected,
    ShuttingDown,
    Stopped,
}

/// What the actor must do with one decoded inbound message.
#[derive(Debug)]
pub enum InboundAction<W> {
    /// First connection message of the session.
    Established(ConnectionMessage),
    /// Status reply matched to a pending call.
    Reply {
        id: u32,
        waiter: W,
        status: StatusMessage,
        issued_at: Instant,
    },
    Market(MarketChangeMessage),
    Order(OrderChangeMessage),
    Anomaly { kind: AnomalyKind, detail: String },
}

/// Correlation table plus connection phase, with no I/O.
#[derive(Debug)]
pub struct DispatchState<W> {
    table: CorrelationTable<W>,
    phase: DispatchPhase,
    pending_ttl: Duration,
}

impl<W> DispatchState<W> {
    pub fn new(pending_ttl: Duration) -> Self {
        Self {
            table: CorrelationTable::new(),
            phase: DispatchPhase::AwaitingFirstMessage,
            pending_ttl,
        }
    }

    pub fn phase(&self) -> DispatchPhase {
        self.phase
    }

    pub fn pending(&self) -> usize {
        self.table.len()
    }

    pub fn is_pending(&self, id: u32) -> bool {
        self.table.contains(id)
    }

    /// Register a pending call and stamp the request with its correlation id.
    ///
    /// On rejection the waiter is handed back so the caller can be answered.
    pub fn on_outbound(
        &mut self,
        mut request: Request,
        waiter: W,
        now: Instant,
    ) -> Result<Request, (StreamError, W)> {
        if matches!(
            self.phase,
            DispatchPhase::ShuttingDown | DispatchPhase::Stopped
        ) {
            return Err((StreamError::SessionClosed, waiter));
        }

        let id = match request.assigned_id() {
            Some(id) => id,
            None => self.table.next_id(),
        };
        if let (InsertOutcome::DuplicateId, Some(waiter)) =
            self.table.insert(id, waiter, now, self.pending_ttl)
        {
            return Err((StreamError::DuplicateCorrelationId { id }, waiter));
        }
        request.id = Some(id);
        Ok(request)
    }

    /// Drop a pending call whose request never reached the writer.
    pub fn abandon(&mut self, id: u32) -> Option<W> {
        self.table.complete(id).map(|completed| completed.waiter)
    }

    pub fn on_inbound(&mut self, message: InboundMessage) -> InboundAction<W> {
        match message {
            InboundMessage::Connection(connection) => {
                if self.phase == DispatchPhase::AwaitingFirstMessage {
                    self.phase = DispatchPhase::Connected;
                    InboundAction::Established(connection)
                } else {
                    InboundAction::Anomaly {
                        kind: AnomalyKind::Routing,
                        detail: format!(
                            "unexpected connection message (connection id {})",
                            connection.connection_id
                        ),
                    }
                }
            }
            InboundMessage::Status(status) => {
                let Some(id) = status.id.filter(|id| *id != 0) else {
                    return InboundAction::Anomaly {
                        kind: AnomalyKind::Routing,
                        detail: format!(
                            "status without correlation id: code={:?} error={:?} message={:?}",
                            status.status_code, status.error_code, status.error_message
                        ),
                    };
                };
                match self.table.complete(id) {
                    Some(completed) => InboundAction::Reply {
                        id,
                        waiter: completed.waiter,
                        status,
                        issued_at: completed.issued_at,
                    },
                    None => InboundAction::Anomaly {
                        kind: AnomalyKind::Routing,
                        detail: format!("status for unknown correlation id {id}"),
                    },
                }
            }
            // Push ids are peer sequencing metadata; they never touch the table.
            InboundMessage::MarketChange(change) => InboundAction::Market(change),
            InboundMessage::OrderChange(change) => InboundAction::Order(change),
            InboundMessage::Unknown { op } => InboundAction::Anomaly {
                kind: AnomalyKind::Routing,
                detail: format!("unrecognized op {op:?}"),
            },
        }
    }

    pub fn expire(&mut self, now: Instant) -> Vec<Expired<W>> {
        self.table.expire_due(now)
    }

    /// Enter `ShuttingDown`: no new calls are accepted.
    pub fn begin_shutdown(&mut self) {
        if self.phase != DispatchPhase::Stopped {
            self.phase = DispatchPhase::ShuttingDown;
        }
    }

    /// Enter `Stopped` and hand back every remaining waiter.
    pub fn finish(&mut self) -> Vec<(u32, W)> {
        self.phase = DispatchPhase::Stopped;
        self.table.drain()
    }
}

/// Spawn-time inputs for [`StreamDispatcher`].
pub struct DispatcherArgs {
    pub config: StreamConfig,
    pub reader: BoxedStreamReader,
    pub writer: ActorRef<StreamWriterActor>,
    pub writer_supervisor: ActorRef<TypedSupervisor<StreamWriterActor>>,
    pub market_tx: mpsc::Sender<MarketChangeMessage>,
    pub order_tx: mpsc::Sender<OrderChangeMessage>,
    pub connected_tx: oneshot::Sender<ConnectionMessage>,
    pub shutdown_tx: Arc<watch::Sender<bool>>,
    pub status_tx: Arc<watch::Sender<StreamConnectionStatus>>,
    pub authenticated_rx: watch::Receiver<bool>,
}

/// Per-session dispatcher actor.
pub struct StreamDispatcher {
    state: DispatchState<ReplySlot>,
    health: StreamHealthMonitor,
    writer: Option<ActorRef<StreamWriterActor>>,
    writer_supervisor: ActorRef<TypedSupervisor<StreamWriterActor>>,
    market_tx: mpsc::Sender<MarketChangeMessage>,
    order_tx: mpsc::Sender<OrderChangeMessage>,
    connected_tx: Option<oneshot::Sender<ConnectionMessage>>,
    activity: Arc<Notify>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    status_tx: Arc<watch::Sender<StreamConnectionStatus>>,
    connection_id: Option<String>,
    reader_closed: bool,
    reader_task: Option<JoinHandle<()>>,
    liveness_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl StreamDispatcher {
    fn connection_label(&self) -> &str {
        self.connection_id.as_deref().unwrap_or("pending")
    }

    fn record_anomaly(&mut self, kind: AnomalyKind, detail: &str) {
        warn!(
            target: "esa-dispatcher",
            connection_id = %self.connection_label(),
            kind = ?kind,
            "{detail}"
        );
        self.health.record_anomaly(kind, detail);
    }

    /// Push onto a feed, blocking while it is full unless the session is shutting down.
    async fn push_feed<T>(
        tx: &mpsc::Sender<T>,
        item: T,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            sent = tx.send(item) => sent.is_ok(),
            _ = shutdown_signalled(shutdown_rx) => false,
        }
    }

    async fn handle_enqueue(&mut self, request: Request, reply: ReplySlot) {
        if self.reader_closed {
            let _ = reply.send(Err(StreamError::SessionClosed));
            return;
        }
        let Some(writer) = self.writer.clone() else {
            let _ = reply.send(Err(StreamError::SessionClosed));
            return;
        };

        let request = match self.state.on_outbound(request, reply, Instant::now()) {
            Ok(request) => request,
            Err((err, reply)) => {
                debug!(target: "esa-dispatcher", error = %err, "request rejected");
                let _ = reply.send(Err(err));
                return;
            }
        };

        let id = request.id.unwrap_or_default();
        let op = request.op();
        debug!(
            target: "esa-dispatcher",
            connection_id = %self.connection_label(),
            id,
            op,
            "forwarding request to writer"
        );
        if let Err(err) = writer.tell(WriteRequest { request }).send().await {
            warn!(target: "esa-dispatcher", id, op, error = %err, "writer unavailable");
            if let Some(reply) = self.state.abandon(id) {
                let _ = reply.send(Err(StreamError::ActorError(format!(
                    "writer unavailable: {err}"
                ))));
            }
            return;
        }
        self.health.record_sent();
    }

    async fn handle_inbound(&mut self, message: InboundMessage) {
        self.health.record_message();
        self.activity.notify_one();

        match self.state.on_inbound(message) {
            InboundAction::Established(connection) => {
                info!(
                    target: "esa-dispatcher",
                    connection_id = %connection.connection_id,
                    "stream connection established"
                );
                self.connection_id = Some(connection.connection_id.clone());
                self.status_tx.send_replace(StreamConnectionStatus::Connected);
                if let Some(tx) = self.connected_tx.take() {
                    let _ = tx.send(connection);
                }
            }
            InboundAction::Reply {
                id,
                waiter,
                status,
                issued_at,
            } => {
                self.health.record_rtt(issued_at.elapsed());
                if status.is_connection_closed() {
                    warn!(
                        target: "esa-dispatcher",
                        connection_id = %self.connection_label(),
                        id,
                        error_code = ?status.error_code,
                        "peer reports connection closed"
                    );
                }
                if waiter.send(Ok(status)).is_err() {
                    debug!(target: "esa-dispatcher", id, "caller stopped waiting before reply");
                }
            }
            InboundAction::Market(change) => {
                if !Self::push_feed(&self.market_tx, change, &mut self.shutdown_rx).await {
                    debug!(target: "esa-dispatcher", "market feed closed, change dropped");
                }
            }
            InboundAction::Order(change) => {
                if !Self::push_feed(&self.order_tx, change, &mut self.shutdown_rx).await {
                    debug!(target: "esa-dispatcher", "order feed closed, change dropped");
                }
            }
            InboundAction::Anomaly { kind, detail } => self.record_anomaly(kind, &detail),
        }
    }

    fn handle_reader_exit(&mut self, cause: StreamDisconnectCause) {
        self.reader_closed = true;
        match &cause {
            StreamDisconnectCause::Shutdown => {
                debug!(target: "esa-dispatcher", "reader stopped for shutdown");
            }
            other => {
                warn!(
                    target: "esa-dispatcher",
                    connection_id = %self.connection_label(),
                    cause = ?other,
                    "stream reader exited, session disconnected"
                );
            }
        }
        self.status_tx.send_replace(StreamConnectionStatus::Disconnected);
        // Dropping the slot fails a pending `connect` wait with SessionClosed.
        self.connected_tx = None;
        self.fail_pending();
    }

    fn handle_sweep(&mut self) {
        let expired = self.state.expire(Instant::now());
        if expired.is_empty() {
            return;
        }
        let count = expired.len();
        for Expired { id, waiter } in expired {
            debug!(target: "esa-dispatcher", id, "pending call expired");
            let _ = waiter.send(Err(StreamError::Timeout {
                context: format!("no reply for request {id}"),
            }));
        }
        warn!(
            target: "esa-dispatcher",
            connection_id = %self.connection_label(),
            count,
            "evicted expired pending calls"
        );
        self.health.record_expired(count);
    }

    fn fail_pending(&mut self) {
        self.state.begin_shutdown();
        let drained = self.state.finish();
        if !drained.is_empty() {
            debug!(target: "esa-dispatcher", count = drained.len(), "failing pending calls");
        }
        for (_, waiter) in drained {
            let _ = waiter.send(Err(StreamError::SessionClosed));
        }
    }

    async fn teardown_writer(&mut self) {
        if let Some(writer) = self.writer.take() {
            let _ = writer.stop_gracefully().await;
            writer.wait_for_shutdown().await;
            writer.unlink(&self.writer_supervisor).await;
        }
    }

    async fn await_task(handle: &mut Option<JoinHandle<()>>) {
        if let Some(handle) = handle.take() {
            if let Err(err) = handle.await {
                warn!(target: "esa-dispatcher", "task terminated with error: {err}");
            }
        }
    }

    fn start_sweep(&mut self, actor_ref: ActorRef<Self>, interval: Duration) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        self.sweep_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_signalled(&mut shutdown_rx) => break,
                    _ = ticker.tick() => {
                        if actor_ref.tell(SweepExpired).send().await.is_err() {
                            break;
                        }
                    }
                }
            }
        }));
    }
}

fn sweep_interval(pending_ttl: Duration) -> Duration {
    (pending_ttl / 4).clamp(Duration::from_millis(10), Duration::from_secs(1))
}

impl Actor for StreamDispatcher {
    type Args = DispatcherArgs;
    type Error = StreamError;

    fn name() -> &'static str {
        "StreamDispatcher"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> StreamResult<Self> {
        let DispatcherArgs {
            config,
            reader,
            writer,
            writer_supervisor,
            market_tx,
            order_tx,
            connected_tx,
            shutdown_tx,
            status_tx,
            authenticated_rx,
        } = args;

        let shutdown_rx = shutdown_tx.subscribe();
        let activity = Arc::new(Notify::new());

        let reader_task = spawn_reader(
            reader,
            ctx.clone(),
            shutdown_rx.clone(),
            ReaderSettings::from_config(&config),
        );
        let liveness_task = spawn_liveness(
            StreamRequester::new(
                ctx.clone(),
                config.queue_timeout,
                config.request_timeout,
            ),
            Arc::clone(&activity),
            authenticated_rx,
            shutdown_rx.clone(),
            config.heartbeat.patience(),
        );

        let mut dispatcher = Self {
            state: DispatchState::new(config.pending_ttl),
            health: StreamHealthMonitor::new(),
            writer: Some(writer),
            writer_supervisor,
            market_tx,
            order_tx,
            connected_tx: Some(connected_tx),
            activity,
            shutdown_tx,
            shutdown_rx,
            status_tx,
            connection_id: None,
            reader_closed: false,
            reader_task: Some(reader_task),
            liveness_task: Some(liveness_task),
            sweep_task: None,
        };
        dispatcher.start_sweep(ctx, sweep_interval(config.pending_ttl));
        Ok(dispatcher)
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> StreamResult<()> {
        self.state.begin_shutdown();
        self.shutdown_tx.send_replace(true);
        Self::await_task(&mut self.reader_task).await;
        Self::await_task(&mut self.liveness_task).await;
        Self::await_task(&mut self.sweep_task).await;
        self.teardown_writer().await;
        self.fail_pending();
        self.status_tx.send_replace(StreamConnectionStatus::Disconnected);
        info!(
            target: "esa-dispatcher",
            connection_id = %self.connection_label(),
            "stream session stopped"
        );
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
            error!(error = ?err, "StreamDispatcher panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

/// Caller request with its reply slot.
pub struct Enqueue {
    pub request: Request,
    pub reply: ReplySlot,
}

impl KameoMessage<Enqueue> for StreamDispatcher {
    type Reply = StreamResult<()>;

    async fn handle(&mut self, msg: Enqueue, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.handle_enqueue(msg.request, msg.reply).await;
        Ok(())
    }
}

/// Events produced by the reader task.
#[derive(Debug)]
pub enum ReaderEvent {
    Inbound(InboundMessage),
    FramingAnomaly { detail: String },
    Exited { cause: StreamDisconnectCause },
}

impl KameoMessage<ReaderEvent> for StreamDispatcher {
    type Reply = StreamResult<()>;

    async fn handle(
        &mut self,
        msg: ReaderEvent,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match msg {
            ReaderEvent::Inbound(message) => self.handle_inbound(message).await,
            ReaderEvent::FramingAnomaly { detail } => {
                self.health.record_anomaly(AnomalyKind::Framing, &detail);
            }
            ReaderEvent::Exited { cause } => self.handle_reader_exit(cause),
        }
        Ok(())
    }
}

/// Anomaly reported by a session task other than the reader.
#[derive(Debug, Clone)]
pub struct RecordAnomaly {
    pub kind: AnomalyKind,
    pub detail: String,
}

impl KameoMessage<RecordAnomaly> for StreamDispatcher {
    type Reply = StreamResult<()>;

    async fn handle(
        &mut self,
        msg: RecordAnomaly,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.health.record_anomaly(msg.kind, &msg.detail);
        Ok(())
    }
}

/// Expiry tick.
#[derive(Debug, Clone, Copy)]
pub struct SweepExpired;

impl KameoMessage<SweepExpired> for StreamDispatcher {
    type Reply = StreamResult<()>;

    async fn handle(
        &mut self,
        _msg: SweepExpired,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.handle_sweep();
        Ok(())
    }
}

/// Snapshot of the session's counters.
#[derive(Debug, Clone, Copy)]
pub struct GetSessionStats;

impl KameoMessage<GetSessionStats> for StreamDispatcher {
    type Reply = StreamResult<SessionStats>;

    async fn handle(
        &mut self,
        _msg: GetSessionStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.health.get_stats(self.state.pending()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusCode;

    const TTL: Duration = Duration::from_secs(60);

    fn status(id: Option<u32>) -> InboundMessage {
        InboundMessage::Status(StatusMessage {
            id,
            status_code: StatusCode::Success,
            error_code: None,
            error_message: None,
            connection_closed: Some(false),
            connection_id: None,
            connections_available: None,
        })
    }

    fn connection(id: &str) -> InboundMessage {
        InboundMessage::Connection(ConnectionMessage {
            id: None,
            connection_id: id.to_string(),
        })
    }

    #[test]
    fn first_connection_message_establishes_and_second_is_anomaly() {
        let mut state = DispatchState::<u8>::new(TTL);
        assert_eq!(state.phase(), DispatchPhase::AwaitingFirstMessage);

        match state.on_inbound(connection("abc-1")) {
            InboundAction::Established(msg) => assert_eq!(msg.connection_id, "abc-1"),
            other => panic!("expected establishment, got {other:?}"),
        }
        assert_eq!(state.phase(), DispatchPhase::Connected);

        assert!(matches!(
            state.on_inbound(connection("abc-2")),
            InboundAction::Anomaly {
                kind: AnomalyKind::Routing,
                ..
            }
        ));
        assert_eq!(state.phase(), DispatchPhase::Connected);
    }

    #[test]
    fn unset_ids_are_unique_and_increasing() {
        let mut state = DispatchState::new(TTL);
        let now = Instant::now();
        let ids: Vec<u32> = (0..50)
            .map(|n| {
                state
                    .on_outbound(Request::heartbeat(), n, now)
                    .expect("accepted")
                    .id
                    .expect("id assigned")
            })
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids[0], 1);
        assert_eq!(state.pending(), 50);
    }

    #[test]
    fn zero_id_is_treated_as_unset() {
        let mut state = DispatchState::new(TTL);
        let request = state
            .on_outbound(Request::heartbeat().with_id(0), (), Instant::now())
            .expect("accepted");
        assert_eq!(request.id, Some(1));
    }

    #[test]
    fn caller_id_colliding_with_live_call_is_rejected() {
        let mut state = DispatchState::new(TTL);
        let now = Instant::now();
        state
            .on_outbound(Request::heartbeat().with_id(9), "first", now)
            .expect("accepted");
        match state.on_outbound(Request::heartbeat().with_id(9), "second", now) {
            Err((StreamError::DuplicateCorrelationId { id }, waiter)) => {
                assert_eq!(id, 9);
                assert_eq!(waiter, "second");
            }
            other => panic!("expected duplicate rejection, got {other:?}"),
        }
        assert_eq!(state.pending(), 1);
    }

    #[test]
    fn replies_match_out_of_order() {
        let mut state = DispatchState::new(TTL);
        let now = Instant::now();
        state.on_outbound(Request::heartbeat(), "one", now).expect("1");
        state.on_outbound(Request::heartbeat(), "two", now).expect("2");

        match state.on_inbound(status(Some(2))) {
            InboundAction::Reply { id, waiter, .. } => {
                assert_eq!(id, 2);
                assert_eq!(waiter, "two");
            }
            other => panic!("expected reply, got {other:?}"),
        }
        assert!(state.is_pending(1));
        assert!(!state.is_pending(2));

        assert!(matches!(
            state.on_inbound(status(Some(1))),
            InboundAction::Reply { id: 1, waiter: "one", .. }
        ));
        assert_eq!(state.pending(), 0);
    }

    #[test]
    fn unknown_or_missing_status_id_leaves_table_intact() {
        let mut state = DispatchState::new(TTL);
        state
            .on_outbound(Request::heartbeat(), (), Instant::now())
            .expect("accepted");

        assert!(matches!(
            state.on_inbound(status(Some(77))),
            InboundAction::Anomaly { .. }
        ));
        assert!(matches!(
            state.on_inbound(status(None)),
            InboundAction::Anomaly { .. }
        ));
        assert!(state.is_pending(1));
    }

    #[test]
    fn market_change_with_colliding_id_bypasses_table() {
        let mut state = DispatchState::new(TTL);
        state
            .on_outbound(Request::heartbeat(), (), Instant::now())
            .expect("accepted");

        let push = InboundMessage::MarketChange(MarketChangeMessage {
            id: Some(1),
            ..MarketChangeMessage::default()
        });
        match state.on_inbound(push) {
            InboundAction::Market(change) => assert_eq!(change.id, Some(1)),
            other => panic!("expected market push, got {other:?}"),
        }
        assert!(state.is_pending(1));
    }

    #[test]
    fn unknown_op_is_anomaly() {
        let mut state = DispatchState::<()>::new(TTL);
        assert!(matches!(
            state.on_inbound(InboundMessage::Unknown { op: "rcm".into() }),
            InboundAction::Anomaly {
                kind: AnomalyKind::Routing,
                ..
            }
        ));
    }

    #[test]
    fn expired_calls_are_evicted() {
        let mut state = DispatchState::new(Duration::from_millis(100));
        let start = Instant::now();
        state.on_outbound(Request::heartbeat(), "a", start).expect("1");
        state
            .on_outbound(Request::heartbeat(), "b", start + Duration::from_millis(80))
            .expect("2");

        let expired = state.expire(start + Duration::from_millis(120));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, 1);
        assert!(state.is_pending(2));
    }

    #[test]
    fn shutdown_rejects_new_calls_and_drains_pending() {
        let mut state = DispatchState::new(TTL);
        let now = Instant::now();
        state.on_outbound(Request::heartbeat(), "a", now).expect("1");
        state.on_outbound(Request::heartbeat(), "b", now).expect("2");

        state.begin_shutdown();
        assert!(matches!(
            state.on_outbound(Request::heartbeat(), "c", now),
            Err((StreamError::SessionClosed, "c"))
        ));

        let drained = state.finish();
        assert_eq!(drained, vec![(1, "a"), (2, "b")]);
        assert_eq!(state.phase(), DispatchPhase::Stopped);
        assert_eq!(state.pending(), 0);
    }

    #[test]
    fn sweep_interval_is_bounded() {
        assert_eq!(sweep_interval(Duration::from_secs(60)), Duration::from_secs(1));
        assert_eq!(
            sweep_interval(Duration::from_millis(200)),
            Duration::from_millis(50)
        );
        assert_eq!(
            sweep_interval(Duration::from_millis(1)),
            Duration::from_millis(10)
        );
    }
}
