//! Client → Server messages

use serde::{Deserialize, Serialize};

use crate::types::Role;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // Presence
    JoinInterviewSession {
        session_id: String,
        user_id: String,
        role: Role,
    },
    LeaveInterviewSession {
        session_id: String,
        user_id: String,
    },
    EndInterviewSession {
        session_id: String,
        user_id: String,
    },

    // Lifecycle overrides (company side)
    StartTest {
        session_id: String,
    },
    EndTest {
        session_id: String,
    },

    // Question flow
    SubmitAnswer {
        session_id: String,
        question_id: String,
        candidate_id: String,
        answer_text: String,
        question_text: String,
    },
    NextQuestion {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        follow_up_question: Option<String>,
    },

    // Manual scoring
    SubmitCategoryScore {
        session_id: String,
        category_score_id: String,
        score: f64,
    },
    SubmitSubCategoryScore {
        session_id: String,
        sub_category_score_id: String,
        score: f64,
    },

    // In-room chat
    SendMessage {
        session_id: String,
        message: String,
        sender_id: String,
        sender_role: Role,
    },
    TypingUpdate {
        session_id: String,
        text: String,
    },

    // Video signaling
    JoinVideoSession {
        session_id: String,
        peer_id: String,
    },
}
