//! Commands sent to a room actor from WebSocket connections.

use tokio::sync::{broadcast, oneshot};

use hireloop_protocol::{CategoryScore, QuestionView, Role, ServerMessage, TechnicalStatus};

use crate::error::EngineError;

/// A command processed sequentially by one session's actor.
pub enum RoomCommand {
    // -- Presence --
    /// Add (or replace, on reconnect) a participant and subscribe the
    /// caller to the room's broadcasts.
    Join {
        user_id: String,
        role: Role,
        reply: oneshot::Sender<Result<JoinAck, EngineError>>,
    },
    /// Remove a participant by user id. Replies with the number of
    /// participants remaining so the registry can discard empty rooms.
    Leave {
        user_id: String,
        reply: oneshot::Sender<usize>,
    },
    /// Ask the actor to tear down. It agrees (replying true) only if it
    /// is still empty when this reaches the head of its queue; from then
    /// on it refuses joins, so a join queued behind the teardown can
    /// never land in a room the registry no longer maps.
    Close {
        reply: oneshot::Sender<bool>,
    },

    // -- Lifecycle overrides --
    StartTest {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    EndTest {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },

    // -- Question flow --
    SubmitAnswer {
        question_id: String,
        candidate_id: String,
        answer_text: String,
        question_text: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    NextQuestion {
        follow_up_question: Option<String>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },

    // -- Manual scoring --
    SubmitCategoryScore {
        category_score_id: String,
        score: f64,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    SubmitSubCategoryScore {
        sub_category_score_id: String,
        score: f64,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },

    // -- Relays (fire-and-forget) --
    Chat {
        message: String,
        sender_id: String,
        sender_role: Role,
    },
    Typing {
        text: String,
    },
    VideoJoin {
        peer_id: String,
    },
}

/// Everything a joining connection needs to render the room immediately.
pub struct JoinAck {
    pub rx: broadcast::Receiver<ServerMessage>,
    pub questions: Vec<QuestionView>,
    pub category_scores: Vec<CategoryScore>,
    pub total_score: f64,
    pub technical_status: TechnicalStatus,
    pub has_other_participants: bool,
}
