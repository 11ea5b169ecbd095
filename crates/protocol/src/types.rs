//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Which side of the interview a participant sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Candidate,
    Company,
}

/// Persisted lifecycle status of an interview session.
///
/// Advances ToBeConducted -> Ongoing -> Completed; never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterviewStatus {
    ToBeConducted,
    Ongoing,
    Completed,
}

/// Progress indicator derived purely from question/answer state.
///
/// Distinct from [`InterviewStatus`]: a session can be Ongoing (both
/// parties present) while its technical status is still ToBeConducted
/// (no question answered yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TechnicalStatus {
    ToBeConducted,
    Ongoing,
    Completed,
}

/// Question type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    OpenEnded,
    Coding,
}

/// A live participant in a session room (ephemeral, never persisted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub role: Role,
}

/// An interview question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question_id: String,
    pub session_id: String,
    pub text: String,
    pub question_type: QuestionType,
    pub is_answered: bool,
    pub estimated_time_minutes: u32,
}

/// A candidate's answer to a question (one slot per question;
/// resubmission updates in place)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub response_id: String,
    pub question_id: String,
    pub session_id: String,
    pub candidate_id: String,
    pub response_text: String,
    pub response_time: String,
    pub language: String,
}

/// Numeric score for a single answer, always within `[0, 100]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRow {
    pub score_id: String,
    pub response_id: String,
    pub value: f64,
}

/// Per-session rollup for a named competency bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category_score_id: String,
    pub session_id: String,
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub sub_categories: Vec<SubCategoryScore>,
}

/// Finer-grained rollup nested under a category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubCategoryScore {
    pub sub_category_score_id: String,
    pub category_score_id: String,
    pub name: String,
    pub value: f64,
}

/// A question together with its answer and score, as pushed to clients.
///
/// Clients treat every `questions` broadcast as a full-state refresh, so
/// the nested shape carries everything a UI needs to resynchronize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    #[serde(flatten)]
    pub question: Question,
    pub answer: Option<Answer>,
    pub score: Option<ScoreRow>,
}

/// Qualitative output of the AI analysis of one answer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerAnalysis {
    pub relevance_score: f64,
    pub key_strengths: Vec<String>,
    pub areas_of_improvement: Vec<String>,
    pub alignment: Option<String>,
    pub follow_up_questions: Vec<String>,
}

/// A chat message relayed through a session room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub session_id: String,
    pub message: String,
    pub sender_id: String,
    pub sender_role: Role,
    pub sent_at: String,
}
