//! Server → Client messages

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    // Presence
    ParticipantJoined {
        session_id: String,
        participant: Participant,
    },
    ParticipantLeft {
        session_id: String,
        user_id: String,
    },
    HasOtherParticipants {
        session_id: String,
        has_other_participants: bool,
    },

    // Derived progress
    TechnicalStatus {
        session_id: String,
        technical_status: TechnicalStatus,
    },
    /// One-shot terminal signal, emitted the first time a submission
    /// closes the last open question. Never repeated on later reads.
    TestEnd {
        session_id: String,
    },

    // Full-state refreshes
    Questions {
        session_id: String,
        questions: Vec<QuestionView>,
    },
    Question {
        session_id: String,
        question: Question,
    },
    CategoryScores {
        session_id: String,
        category_scores: Vec<CategoryScore>,
    },
    TotalScore {
        session_id: String,
        total_score: f64,
    },

    // Answer pipeline
    AnswerSubmitted {
        session_id: String,
        question_id: String,
        response_id: String,
        analysis: AnswerAnalysis,
    },
    NavigateNextQuestion {
        session_id: String,
        navigation: Navigation,
        question: Option<Question>,
    },

    // Chat / typing
    ReceiveMessage {
        message: ChatMessage,
    },
    TypingUpdate {
        session_id: String,
        text: String,
    },

    // Video signaling
    PeerJoined {
        joined_session_id: String,
        peer_id: String,
    },

    // Errors
    Error {
        code: String,
        message: String,
        session_id: Option<String>,
    },
}

/// Whether a `navigate_next_question` advances to a question or ends the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Navigation {
    Question,
    End,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_technical_status() {
        let msg = ServerMessage::TechnicalStatus {
            session_id: "sess-1".to_string(),
            technical_status: TechnicalStatus::Ongoing,
        };

        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains("\"technical_status\":\"ongoing\""));

        let reparsed: ServerMessage = serde_json::from_str(&json).expect("deserialize");
        match reparsed {
            ServerMessage::TechnicalStatus {
                session_id,
                technical_status,
            } => {
                assert_eq!(session_id, "sess-1");
                assert_eq!(technical_status, TechnicalStatus::Ongoing);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn navigate_next_question_carries_navigation_field() {
        let msg = ServerMessage::NavigateNextQuestion {
            session_id: "sess-2".to_string(),
            navigation: Navigation::End,
            question: None,
        };

        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "navigate_next_question");
        assert_eq!(json["navigation"], "end");
        assert!(json["question"].is_null());
    }

    #[test]
    fn roundtrip_answer_submitted() {
        let msg = ServerMessage::AnswerSubmitted {
            session_id: "sess-3".to_string(),
            question_id: "q-1".to_string(),
            response_id: "r-1".to_string(),
            analysis: AnswerAnalysis {
                relevance_score: 72.0,
                key_strengths: vec!["clear structure".to_string()],
                areas_of_improvement: vec!["missed edge cases".to_string()],
                alignment: Some("good".to_string()),
                follow_up_questions: vec!["How would you test it?".to_string()],
            },
        };

        let json = serde_json::to_string(&msg).expect("serialize");
        let reparsed: ServerMessage = serde_json::from_str(&json).expect("deserialize");
        match reparsed {
            ServerMessage::AnswerSubmitted {
                response_id,
                analysis,
                ..
            } => {
                assert_eq!(response_id, "r-1");
                assert_eq!(analysis.relevance_score, 72.0);
                assert_eq!(analysis.key_strengths.len(), 1);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn error_carries_optional_session_id() {
        let msg = ServerMessage::Error {
            code: "validation".to_string(),
            message: "score out of range".to_string(),
            session_id: Some("sess-4".to_string()),
        };

        let json = serde_json::to_string(&msg).expect("serialize");
        let reparsed: ServerMessage = serde_json::from_str(&json).expect("deserialize");
        match reparsed {
            ServerMessage::Error {
                code, session_id, ..
            } => {
                assert_eq!(code, "validation");
                assert_eq!(session_id.as_deref(), Some("sess-4"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
