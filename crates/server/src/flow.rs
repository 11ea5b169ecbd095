//! Question flow — selects the next question and inserts AI follow-ups.

use hireloop_protocol::{Question, QuestionType, QuestionView};

use crate::store::Store;

/// Follow-ups get a modest default slot; the interviewer can always move on.
const FOLLOW_UP_MINUTES: u32 = 5;

/// Thin controller over the store for question sequencing.
#[derive(Clone)]
pub struct QuestionFlow {
    store: Store,
}

impl QuestionFlow {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// First unanswered question in insertion order, or None when the
    /// queue is exhausted (or the session has no questions at all).
    pub async fn next_unanswered(&self, session_id: &str) -> anyhow::Result<Option<Question>> {
        self.store.next_unanswered(session_id).await
    }

    /// Append an AI-suggested follow-up to the same ordered queue as the
    /// pre-seeded questions. From here on it is indistinguishable from them.
    pub async fn insert_follow_up(&self, session_id: &str, text: &str) -> anyhow::Result<Question> {
        self.store
            .create_question(session_id, text, QuestionType::OpenEnded, FOLLOW_UP_MINUTES)
            .await
    }

    /// Canonical full state (questions with nested answers and scores),
    /// pushed after any mutation so clients resync instead of patching.
    pub async fn list_all(&self, session_id: &str) -> anyhow::Result<Vec<QuestionView>> {
        self.store.list_question_views(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn follow_up_joins_the_queue_in_order() {
        let (store, _dir) = test_store().await;
        store.create_session("s1", "i1", "c1").await.unwrap();
        let flow = QuestionFlow::new(store.clone());

        let q1 = store
            .create_question("s1", "seeded", QuestionType::Coding, 20)
            .await
            .unwrap();
        let follow_up = flow.insert_follow_up("s1", "why that approach?").await.unwrap();

        assert_eq!(follow_up.question_type, QuestionType::OpenEnded);
        assert_eq!(follow_up.estimated_time_minutes, FOLLOW_UP_MINUTES);
        assert!(!follow_up.is_answered);

        // Seeded question still comes first; the follow-up queues behind it.
        let next = flow.next_unanswered("s1").await.unwrap().unwrap();
        assert_eq!(next.question_id, q1.question_id);

        store.mark_answered("s1", &q1.question_id).await.unwrap();
        let next = flow.next_unanswered("s1").await.unwrap().unwrap();
        assert_eq!(next.question_id, follow_up.question_id);
    }

    #[tokio::test]
    async fn empty_session_is_a_normal_condition() {
        let (store, _dir) = test_store().await;
        store.create_session("s1", "i1", "c1").await.unwrap();
        let flow = QuestionFlow::new(store);

        assert!(flow.next_unanswered("s1").await.unwrap().is_none());
        assert!(flow.list_all("s1").await.unwrap().is_empty());
    }
}
