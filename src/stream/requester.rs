use std::time::Duration;

use kameo::prelude::ActorRef;
use tokio::sync::oneshot;
use tracing::debug;

use crate::core::{AnomalyKind, SessionStats, StreamError, StreamResult};
use crate::protocol::{Request, StatusMessage};
use crate::stream::dispatcher::{Enqueue, GetSessionStats, RecordAnomaly, StreamDispatcher};

/// Cloneable handle for issuing requests on one session.
///
/// Each call enqueues the request with a private reply slot and waits for the matching status
/// reply. Enqueueing is bounded by `queue_timeout` (the dispatcher mailbox is bounded and full
/// queues block), the reply wait by `request_timeout`.
#[derive(Clone)]
pub struct StreamRequester {
    dispatcher: ActorRef<StreamDispatcher>,
    queue_timeout: Duration,
    request_timeout: Duration,
}

impl StreamRequester {
    pub(crate) fn new(
        dispatcher: ActorRef<StreamDispatcher>,
        queue_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            queue_timeout,
            request_timeout,
        }
    }

    /// Send `request` and wait for its status reply.
    ///
    /// A failure status is returned as `Ok`; use [`StatusMessage::into_result`] to turn it
    /// into an error.
    pub async fn send(&self, request: Request) -> StreamResult<StatusMessage> {
        let op = request.op();
        let (reply, reply_rx) = oneshot::channel();

        let enqueue = self.dispatcher.tell(Enqueue { request, reply }).send();
        match tokio::time::timeout(self.queue_timeout, enqueue).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(op, error = %err, "dispatcher not accepting requests");
                return Err(StreamError::SessionClosed);
            }
            Err(_) => {
                return Err(StreamError::Timeout {
                    context: format!("queueing {op} request"),
                });
            }
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StreamError::SessionClosed),
            Err(_) => Err(StreamError::Timeout {
                context: format!("awaiting {op} reply"),
            }),
        }
    }

    pub async fn heartbeat(&self) -> StreamResult<StatusMessage> {
        self.send(Request::heartbeat()).await
    }

    pub async fn stats(&self) -> StreamResult<SessionStats> {
        self.dispatcher
            .ask(GetSessionStats)
            .await
            .map_err(|err| StreamError::ActorError(err.to_string()))
    }

    pub(crate) async fn report_anomaly(&self, kind: AnomalyKind, detail: String) {
        let _ = self
            .dispatcher
            .tell(RecordAnomaly { kind, detail })
            .send()
            .await;
    }
}
