use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::AnomalyKind;
use crate::stream::requester::StreamRequester;
use crate::stream::shutdown_signalled;

/// Spawn the liveness tracker for one session.
///
/// Idle until `authenticated_rx` turns true. Afterwards every notification on `activity` (any
/// inbound message) restarts the patience window; a window that elapses in silence triggers a
/// heartbeat through the normal request path. Failed heartbeats are only reported.
pub fn spawn_liveness(
    requester: StreamRequester,
    activity: Arc<Notify>,
    authenticated_rx: watch::Receiver<bool>,
    shutdown_rx: watch::Receiver<bool>,
    patience: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut authenticated_rx = authenticated_rx;
        let mut shutdown_rx = shutdown_rx;

        let authenticated = async { authenticated_rx.wait_for(|auth| *auth).await.is_ok() };
        tokio::select! {
            _ = shutdown_signalled(&mut shutdown_rx) => return,
            authenticated = authenticated => {
                if !authenticated {
                    return;
                }
            }
        }
        debug!(
            target: "esa-liveness",
            patience_ms = patience.as_millis() as u64,
            "liveness tracking active"
        );

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown_rx) => break,
                _ = activity.notified() => continue,
                _ = tokio::time::sleep(patience) => {}
            }

            debug!(target: "esa-liveness", "no traffic within patience window, sending heartbeat");
            let outcome = tokio::select! {
                _ = shutdown_signalled(&mut shutdown_rx) => break,
                outcome = requester.heartbeat() => outcome,
            };

            let failure = match outcome {
                Ok(status) if status.is_success() => {
                    debug!(target: "esa-liveness", id = ?status.id, "heartbeat acknowledged");
                    None
                }
                Ok(status) => Some(format!(
                    "heartbeat rejected: code={:?} message={:?}",
                    status.error_code, status.error_message
                )),
                Err(err) => Some(format!("heartbeat failed: {err}")),
            };
            if let Some(detail) = failure {
                warn!(target: "esa-liveness", "{detail}");
                // The dispatcher mailbox may be full behind a stalled feed.
                tokio::select! {
                    _ = shutdown_signalled(&mut shutdown_rx) => break,
                    _ = requester.report_anomaly(AnomalyKind::Liveness, detail) => {}
                }
            }
        }
    })
}
