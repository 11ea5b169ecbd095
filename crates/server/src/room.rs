//! Room handle — the cheap, clonable face of a session's actor.
//!
//! Mutations go through the command channel and are processed
//! sequentially by the actor; membership reads are lock-free via
//! `ArcSwap` snapshots.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tracing::warn;

use hireloop_protocol::Participant;

use crate::lifecycle;
use crate::room_command::RoomCommand;

/// Point-in-time view of who is connected to a session room.
#[derive(Debug, Default)]
pub struct RoomSnapshot {
    pub participants: Vec<Participant>,
}

impl RoomSnapshot {
    pub fn has_both_roles(&self) -> bool {
        lifecycle::has_both_roles(self.participants.iter().map(|p| &p.role))
    }
}

/// Handle to a running room actor (cheap to Clone).
#[derive(Clone)]
pub struct RoomHandle {
    pub session_id: String,
    command_tx: mpsc::Sender<RoomCommand>,
    snapshot: Arc<ArcSwap<RoomSnapshot>>,
}

impl RoomHandle {
    pub fn new(
        session_id: String,
        command_tx: mpsc::Sender<RoomCommand>,
        snapshot: Arc<ArcSwap<RoomSnapshot>>,
    ) -> Self {
        Self {
            session_id,
            command_tx,
            snapshot,
        }
    }

    /// Send a command to the actor (fire-and-forget).
    pub async fn send(&self, cmd: RoomCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(
                component = "room",
                session_id = %self.session_id,
                "Room actor channel closed, command dropped"
            );
        }
    }

    /// Lock-free membership read.
    pub fn snapshot(&self) -> Arc<RoomSnapshot> {
        self.snapshot.load_full()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().participants.is_empty()
    }

    pub fn has_both_roles(&self) -> bool {
        self.snapshot().has_both_roles()
    }

    /// True iff both handles point at the same actor. Used by the
    /// registry to avoid evicting a freshly spawned replacement.
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        self.command_tx.same_channel(&other.command_tx)
    }
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomHandle")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
