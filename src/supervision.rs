//! Minimal typed supervisor.
//!
//! Stream writers are restart-by-reconnect: a dead writer means the session is rebuilt by
//! the next `connect`, so no restart policy lives here. The supervisor gives writers a
//! stable parent to link to and records how each one stopped.

use std::convert::Infallible;
use std::marker::PhantomData;
use std::ops::ControlFlow;

use kameo::{
    Actor,
    actor::{ActorId, ActorRef, WeakActorRef},
    error::ActorStopReason,
};
use tracing::{debug, warn};

/// Typed link-based supervisor for homogeneous actors.
pub struct TypedSupervisor<A>
where
    A: Actor + Send + Sync + 'static,
{
    name: String,
    children_stopped: u64,
    _phantom: PhantomData<A>,
}

impl<A> TypedSupervisor<A>
where
    A: Actor + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children_stopped: 0,
            _phantom: PhantomData,
        }
    }
}

impl<A> Actor for TypedSupervisor<A>
where
    A: Actor + Send + Sync + 'static,
{
    type Args = Self;
    type Error = Infallible;

    async fn on_start(args: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }

    fn on_link_died(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        id: ActorId,
        reason: ActorStopReason,
    ) -> impl std::future::Future<
        Output = Result<ControlFlow<ActorStopReason>, Self::Error>,
    > + Send {
        self.children_stopped += 1;
        match &reason {
            ActorStopReason::Normal | ActorStopReason::Killed => {
                debug!(
                    supervisor = %self.name,
                    child = %id,
                    stopped = self.children_stopped,
                    "supervised actor stopped"
                );
            }
            other => {
                warn!(
                    supervisor = %self.name,
                    child = %id,
                    reason = ?other,
                    "supervised actor died"
                );
            }
        }
        async { Ok(ControlFlow::Continue(())) }
    }
}
