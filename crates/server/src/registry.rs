//! Session registry — lazily spawns one room actor per session and
//! tears it down when the last participant leaves.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, info};

use hireloop_protocol::Role;

use crate::analysis::AnswerAnalyzer;
use crate::error::EngineError;
use crate::room::RoomHandle;
use crate::room_actor::RoomActor;
use crate::room_command::{JoinAck, RoomCommand};
use crate::store::Store;

/// Runtime knobs that shape room behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Category name the automatic answer-score rollup is written into.
    pub auto_score_category: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_score_category: "Technical".to_string(),
        }
    }
}

pub struct SessionRegistry {
    rooms: DashMap<String, RoomHandle>,
    store: Store,
    analyzer: Arc<dyn AnswerAnalyzer>,
    config: EngineConfig,
}

impl SessionRegistry {
    pub fn new(store: Store, analyzer: Arc<dyn AnswerAnalyzer>, config: EngineConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            store,
            analyzer,
            config,
        }
    }

    /// Look up the room for `session_id`, spawning its actor on first use.
    ///
    /// Fails with `NotFound` when the session was never persisted; rooms
    /// exist only for sessions that are already in the store.
    pub async fn room(&self, session_id: &str) -> Result<RoomHandle, EngineError> {
        if let Some(handle) = self.rooms.get(session_id) {
            return Ok(handle.clone());
        }

        if self.store.load_session(session_id).await?.is_none() {
            return Err(EngineError::NotFound(format!(
                "unknown session {session_id}"
            )));
        }

        // entry() serializes concurrent first joins; only one actor spawns.
        let handle = self
            .rooms
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!(
                    component = "registry",
                    session_id = %session_id,
                    "Spawning session room"
                );
                RoomActor::spawn(
                    session_id.to_string(),
                    self.store.clone(),
                    self.analyzer.clone(),
                    self.config.auto_score_category.clone(),
                )
            })
            .clone();
        Ok(handle)
    }

    /// Room handle for an already-running session, if any.
    pub fn get(&self, session_id: &str) -> Option<RoomHandle> {
        self.rooms.get(session_id).map(|h| h.clone())
    }

    /// Join a participant into a session's room.
    ///
    /// A room refuses joins once it has accepted teardown, so a join that
    /// raced against the last leave gets one retry against a freshly
    /// spawned actor instead of landing in a room the map no longer holds.
    pub async fn join(
        &self,
        session_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<JoinAck, EngineError> {
        for _ in 0..2 {
            let room = self.room(session_id).await?;
            let (reply_tx, reply_rx) = oneshot::channel();
            room.send(RoomCommand::Join {
                user_id: user_id.to_string(),
                role,
                reply: reply_tx,
            })
            .await;
            match reply_rx.await {
                Ok(Ok(ack)) => return Ok(ack),
                Ok(Err(EngineError::Closed)) | Err(_) => {
                    // Evict the defunct actor (and only it) before retrying.
                    self.rooms.remove_if(session_id, |_, h| h.same_room(&room));
                }
                Ok(Err(e)) => return Err(e),
            }
        }
        Err(EngineError::NotFound(format!(
            "room for session {session_id} could not be joined"
        )))
    }

    /// Remove `user_id` from a session's room, dropping the room once empty.
    pub async fn leave(&self, session_id: &str, user_id: &str) {
        let Some(handle) = self.get(session_id) else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        handle
            .send(RoomCommand::Leave {
                user_id: user_id.to_string(),
                reply: tx,
            })
            .await;
        if rx.await.unwrap_or(0) > 0 {
            return;
        }

        // Teardown is the actor's call: it accepts only if it is still
        // empty when Close reaches the head of its queue, and from then
        // on refuses joins. A join queued behind the teardown is NACKed
        // and re-resolved through `join`, never stranded.
        let (tx, rx) = oneshot::channel();
        handle.send(RoomCommand::Close { reply: tx }).await;
        if rx.await.unwrap_or(true) {
            let removed = self
                .rooms
                .remove_if(session_id, |_, h| h.same_room(&handle))
                .is_some();
            if removed {
                debug!(
                    component = "registry",
                    session_id = %session_id,
                    "Dropped empty session room"
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::OpenAiAnalyzer;
    use crate::store::test_store;

    async fn registry() -> (SessionRegistry, tempfile::TempDir) {
        let (store, dir) = test_store().await;
        store.create_session("s1", "i1", "cand-1").await.unwrap();
        // The registry tests never reach analysis; any analyzer will do.
        let analyzer: Arc<dyn AnswerAnalyzer> = Arc::new(OpenAiAnalyzer::new(
            "gpt-4.1-mini".to_string(),
            std::time::Duration::from_secs(5),
        ));
        (
            SessionRegistry::new(store, analyzer, EngineConfig::default()),
            dir,
        )
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (registry, _dir) = registry().await;
        let err = registry.room("nope").await.unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn repeated_lookups_share_one_room() {
        let (registry, _dir) = registry().await;

        registry.join("s1", "cand-1", Role::Candidate).await.unwrap();

        // A second lookup must see the membership of the first.
        let second = registry.room("s1").await.unwrap();
        assert_eq!(second.snapshot().participants.len(), 1);
        assert_eq!(registry.room_count(), 1);
    }

    #[tokio::test]
    async fn room_is_dropped_once_the_last_participant_leaves() {
        let (registry, _dir) = registry().await;

        registry.join("s1", "cand-1", Role::Candidate).await.unwrap();
        registry.join("s1", "comp-1", Role::Company).await.unwrap();

        registry.leave("s1", "cand-1").await;
        assert_eq!(registry.room_count(), 1);

        registry.leave("s1", "comp-1").await;
        assert_eq!(registry.room_count(), 0);

        // The session itself survives; a later lookup respawns the room.
        assert!(registry.room("s1").await.is_ok());
    }

    #[tokio::test]
    async fn late_join_after_teardown_lands_in_a_fresh_room() {
        let (registry, _dir) = registry().await;
        registry.join("s1", "cand-1", Role::Candidate).await.unwrap();

        // A handle resolved before teardown, as another task would hold.
        let stale = registry.get("s1").unwrap();

        registry.leave("s1", "cand-1").await;
        assert_eq!(registry.room_count(), 0);

        // The stale handle can still deliver a join, but the closing
        // actor refuses it instead of admitting a participant into a
        // room the registry no longer maps.
        let (tx, rx) = oneshot::channel();
        stale
            .send(RoomCommand::Join {
                user_id: "cand-2".to_string(),
                role: Role::Candidate,
                reply: tx,
            })
            .await;
        let err = match rx.await.unwrap() {
            Err(e) => e,
            Ok(_) => panic!("closing room must refuse joins"),
        };
        assert!(matches!(err, EngineError::Closed));
        assert!(stale.is_empty());

        // Going through the registry resolves one fresh room instead.
        let ack = registry.join("s1", "cand-2", Role::Candidate).await.unwrap();
        assert!(!ack.has_other_participants);
        assert_eq!(registry.room_count(), 1);
    }

    #[tokio::test]
    async fn leaving_an_unknown_room_is_a_no_op() {
        let (registry, _dir) = registry().await;
        registry.leave("s1", "cand-1").await;
        assert_eq!(registry.room_count(), 0);
    }
}
