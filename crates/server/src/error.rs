//! Domain error taxonomy for the coordination engine.
//!
//! Every failure that can surface on the wire maps to a stable error code.
//! Validation and not-found errors go only to the originating connection;
//! they never tear down the room or the WebSocket.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed payload or out-of-range value (e.g. score outside [0,100])
    #[error("{0}")]
    Validation(String),

    /// Unknown session/question/category target
    #[error("{0}")]
    NotFound(String),

    /// Persistence collaborator failure
    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),

    /// AI analysis collaborator failure (network, timeout, unparseable reply)
    #[error("analysis failure: {0}")]
    Analysis(String),

    /// Room refused the command because it is tearing down; callers
    /// should re-resolve the room through the registry
    #[error("session room closed")]
    Closed,
}

impl EngineError {
    /// Stable wire code used in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Storage(_) => "storage",
            EngineError::Analysis(_) => "analysis",
            EngineError::Closed => "not_found",
        }
    }

    /// Message safe to show to the caller. Collaborator internals stay in
    /// the logs; the wire gets a generic description.
    pub fn wire_message(&self) -> String {
        match self {
            EngineError::Validation(msg) | EngineError::NotFound(msg) => msg.clone(),
            EngineError::Storage(_) => "internal storage error".to_string(),
            EngineError::Analysis(_) => "answer analysis failed".to_string(),
            EngineError::Closed => "session room closed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::Validation("x".into()).code(), "validation");
        assert_eq!(EngineError::NotFound("x".into()).code(), "not_found");
        assert_eq!(EngineError::Analysis("x".into()).code(), "analysis");
        assert_eq!(
            EngineError::Storage(anyhow::anyhow!("boom")).code(),
            "storage"
        );
        assert_eq!(EngineError::Closed.code(), "not_found");
    }

    #[test]
    fn collaborator_details_do_not_leak_to_the_wire() {
        let err = EngineError::Storage(anyhow::anyhow!("UNIQUE constraint failed: answers.question_id"));
        assert_eq!(err.wire_message(), "internal storage error");

        let err = EngineError::Analysis("connect timeout to api.openai.com".into());
        assert_eq!(err.wire_message(), "answer analysis failed");
    }
}
