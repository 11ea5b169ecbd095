//! Persistence collaborator — SQLite behind `spawn_blocking`.
//!
//! The store is the authority of record for sessions, questions, answers
//! and scores. Everything in-memory (room membership) is disposable and
//! reconstructable from here after a restart.
//!
//! Answer and score writes are single-statement atomic upserts so two
//! in-flight submissions for the same question can never produce a second
//! row; `UNIQUE(question_id)` backs the invariant at the schema level.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};

use hireloop_protocol::{
    new_id, Answer, CategoryScore, InterviewStatus, Question, QuestionType, QuestionView,
    ScoreRow, SubCategoryScore,
};

/// A session row as the engine sees it.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub session_id: String,
    pub interview_id: String,
    pub candidate_id: String,
    pub interview_status: InterviewStatus,
    pub score: f64,
}

/// Cheap-to-clone handle; each call opens its own connection in a
/// blocking task. WAL plus a busy timeout keeps concurrent one-shot
/// reads and writes from tripping over each other.
#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Open the store and bring the schema up to date.
    pub async fn open(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let path = db_path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut conn = Connection::open(&path)?;
            crate::migration_runner::run_migrations(&mut conn)?;
            Ok(())
        })
        .await??;

        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<T> {
            let mut conn = Connection::open(&path)?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;",
            )?;
            Ok(f(&mut conn)?)
        })
        .await?
    }

    // -- Sessions ----------------------------------------------------------

    pub async fn load_session(&self, session_id: &str) -> anyhow::Result<Option<SessionRow>> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, interview_id, candidate_id, interview_status, score
                 FROM sessions WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SessionRow {
                        session_id: row.get(0)?,
                        interview_id: row.get(1)?,
                        candidate_id: row.get(2)?,
                        interview_status: status_from_str(&row.get::<_, String>(3)?),
                        score: row.get(4)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    /// Conditionally advance the persisted lifecycle status.
    ///
    /// Backwards transitions are refused outright; for forward ones the
    /// WHERE clause makes repeated joins/starts idempotent: only the
    /// first caller observes a row change, later ones see 0 rows.
    pub async fn advance_interview_status(
        &self,
        session_id: &str,
        from: InterviewStatus,
        to: InterviewStatus,
    ) -> anyhow::Result<bool> {
        if !crate::lifecycle::advance_allowed(from, to) {
            return Ok(false);
        }
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET interview_status = ?2
                 WHERE id = ?1 AND interview_status = ?3",
                params![id, status_to_str(to), status_to_str(from)],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Force the terminal status regardless of the current one (operator
    /// override via `end_test`). Returns false when already completed.
    pub async fn complete_interview(&self, session_id: &str) -> anyhow::Result<bool> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET interview_status = 'completed'
                 WHERE id = ?1 AND interview_status != 'completed'",
                params![id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    // -- Questions ---------------------------------------------------------

    pub async fn create_question(
        &self,
        session_id: &str,
        text: &str,
        question_type: QuestionType,
        estimated_time_minutes: u32,
    ) -> anyhow::Result<Question> {
        let question = Question {
            question_id: new_id(),
            session_id: session_id.to_string(),
            text: text.to_string(),
            question_type,
            is_answered: false,
            estimated_time_minutes,
        };
        let q = question.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO questions (id, session_id, text, question_type, estimated_time_minutes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    q.question_id,
                    q.session_id,
                    q.text,
                    question_type_to_str(q.question_type),
                    q.estimated_time_minutes,
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(question)
    }

    /// First unanswered question in insertion order; None when the queue
    /// is exhausted or empty (a normal condition, not an error).
    pub async fn next_unanswered(&self, session_id: &str) -> anyhow::Result<Option<Question>> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, session_id, text, question_type, is_answered, estimated_time_minutes
                 FROM questions WHERE session_id = ?1 AND is_answered = 0
                 ORDER BY seq LIMIT 1",
                params![id],
                question_from_row,
            )
            .optional()
        })
        .await
    }

    /// Flip `is_answered` before scoring starts so a concurrent
    /// `next_unanswered` never re-serves an in-flight question.
    pub async fn mark_answered(&self, session_id: &str, question_id: &str) -> anyhow::Result<bool> {
        let sid = session_id.to_string();
        let qid = question_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE questions SET is_answered = 1 WHERE id = ?1 AND session_id = ?2",
                params![qid, sid],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Questions with nested answers and scores — the canonical full-state
    /// payload clients resynchronize from.
    pub async fn list_question_views(&self, session_id: &str) -> anyhow::Result<Vec<QuestionView>> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT q.id, q.session_id, q.text, q.question_type, q.is_answered,
                        q.estimated_time_minutes,
                        a.response_id, a.candidate_id, a.response_text, a.response_time, a.language,
                        s.id, s.value
                 FROM questions q
                 LEFT JOIN answers a ON a.question_id = q.id
                 LEFT JOIN scores s ON s.response_id = a.response_id
                 WHERE q.session_id = ?1 ORDER BY q.seq",
            )?;
            let rows = stmt.query_map(params![id], |row| {
                let question = question_from_row(row)?;
                let response_id: Option<String> = row.get(6)?;
                let answer = match response_id {
                    Some(response_id) => Some(Answer {
                        response_id: response_id.clone(),
                        question_id: question.question_id.clone(),
                        session_id: question.session_id.clone(),
                        candidate_id: row.get(7)?,
                        response_text: row.get(8)?,
                        response_time: row.get(9)?,
                        language: row.get(10)?,
                    }),
                    None => None,
                };
                let score_id: Option<String> = row.get(11)?;
                let score = match (score_id, &answer) {
                    (Some(score_id), Some(answer)) => Some(ScoreRow {
                        score_id,
                        response_id: answer.response_id.clone(),
                        value: row.get(12)?,
                    }),
                    _ => None,
                };
                Ok(QuestionView {
                    question,
                    answer,
                    score,
                })
            })?;
            rows.collect()
        })
        .await
    }

    // -- Answers -----------------------------------------------------------

    /// Atomic insert-or-update keyed on `question_id`. A resubmission
    /// updates the text in place and keeps the original `response_id`.
    pub async fn upsert_answer(
        &self,
        session_id: &str,
        question_id: &str,
        candidate_id: &str,
        response_text: &str,
    ) -> anyhow::Result<Answer> {
        let sid = session_id.to_string();
        let qid = question_id.to_string();
        let cid = candidate_id.to_string();
        let text = response_text.to_string();
        let fresh_id = new_id();
        let now = timestamp_now();
        self.with_conn(move |conn| {
            conn.query_row(
                "INSERT INTO answers
                     (response_id, question_id, session_id, candidate_id, response_text, response_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(question_id) DO UPDATE
                     SET response_text = excluded.response_text,
                         updated_at = excluded.response_time
                 RETURNING response_id, question_id, session_id, candidate_id,
                           response_text, response_time, language",
                params![fresh_id, qid, sid, cid, text, now],
                |row| {
                    Ok(Answer {
                        response_id: row.get(0)?,
                        question_id: row.get(1)?,
                        session_id: row.get(2)?,
                        candidate_id: row.get(3)?,
                        response_text: row.get(4)?,
                        response_time: row.get(5)?,
                        language: row.get(6)?,
                    })
                },
            )
        })
        .await
    }

    // -- Scores ------------------------------------------------------------

    /// One score row per answer; re-analysis overwrites the value.
    pub async fn upsert_score(&self, response_id: &str, value: f64) -> anyhow::Result<ScoreRow> {
        let rid = response_id.to_string();
        let fresh_id = new_id();
        self.with_conn(move |conn| {
            conn.query_row(
                "INSERT INTO scores (id, response_id, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(response_id) DO UPDATE SET value = excluded.value
                 RETURNING id, response_id, value",
                params![fresh_id, rid, value],
                |row| {
                    Ok(ScoreRow {
                        score_id: row.get(0)?,
                        response_id: row.get(1)?,
                        value: row.get(2)?,
                    })
                },
            )
        })
        .await
    }

    /// Sum of per-answer scores for the session, also written back to the
    /// session's aggregate `score` column in the same transaction.
    pub async fn recompute_total_score(&self, session_id: &str) -> anyhow::Result<f64> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let total: f64 = tx.query_row(
                "SELECT COALESCE(SUM(s.value), 0)
                 FROM scores s JOIN answers a ON a.response_id = s.response_id
                 WHERE a.session_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE sessions SET score = ?2 WHERE id = ?1",
                params![id, total],
            )?;
            tx.commit()?;
            Ok(total)
        })
        .await
    }

    // -- Category scores ---------------------------------------------------

    pub async fn create_category_score(
        &self,
        session_id: &str,
        name: &str,
    ) -> anyhow::Result<CategoryScore> {
        let category = CategoryScore {
            category_score_id: new_id(),
            session_id: session_id.to_string(),
            name: name.to_string(),
            value: 0.0,
            sub_categories: Vec::new(),
        };
        let c = category.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO category_scores (id, session_id, name, value) VALUES (?1, ?2, ?3, ?4)",
                params![c.category_score_id, c.session_id, c.name, c.value],
            )?;
            Ok(())
        })
        .await?;
        Ok(category)
    }

    pub async fn create_sub_category_score(
        &self,
        category_score_id: &str,
        name: &str,
    ) -> anyhow::Result<SubCategoryScore> {
        let sub = SubCategoryScore {
            sub_category_score_id: new_id(),
            category_score_id: category_score_id.to_string(),
            name: name.to_string(),
            value: 0.0,
        };
        let s = sub.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sub_category_scores (id, category_score_id, name, value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![s.sub_category_score_id, s.category_score_id, s.name, s.value],
            )?;
            Ok(())
        })
        .await?;
        Ok(sub)
    }

    pub async fn list_category_scores(
        &self,
        session_id: &str,
    ) -> anyhow::Result<Vec<CategoryScore>> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, name, value FROM category_scores
                 WHERE session_id = ?1 ORDER BY name",
            )?;
            let mut categories: Vec<CategoryScore> = stmt
                .query_map(params![id], |row| {
                    Ok(CategoryScore {
                        category_score_id: row.get(0)?,
                        session_id: row.get(1)?,
                        name: row.get(2)?,
                        value: row.get(3)?,
                        sub_categories: Vec::new(),
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;

            let mut sub_stmt = conn.prepare(
                "SELECT id, category_score_id, name, value FROM sub_category_scores
                 WHERE category_score_id = ?1 ORDER BY name",
            )?;
            for category in &mut categories {
                category.sub_categories = sub_stmt
                    .query_map(params![category.category_score_id], |row| {
                        Ok(SubCategoryScore {
                            sub_category_score_id: row.get(0)?,
                            category_score_id: row.get(1)?,
                            name: row.get(2)?,
                            value: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<_>>()?;
            }
            Ok(categories)
        })
        .await
    }

    pub async fn update_category_score(
        &self,
        category_score_id: &str,
        value: f64,
    ) -> anyhow::Result<bool> {
        let id = category_score_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE category_scores SET value = ?2 WHERE id = ?1",
                params![id, value],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn update_sub_category_score(
        &self,
        sub_category_score_id: &str,
        value: f64,
    ) -> anyhow::Result<bool> {
        let id = sub_category_score_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE sub_category_scores SET value = ?2 WHERE id = ?1",
                params![id, value],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Locate the per-session category that automatic scoring targets.
    pub async fn find_category_by_name(
        &self,
        session_id: &str,
        name: &str,
    ) -> anyhow::Result<Option<CategoryScore>> {
        let sid = session_id.to_string();
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, session_id, name, value FROM category_scores
                 WHERE session_id = ?1 AND name = ?2",
                params![sid, name],
                |row| {
                    Ok(CategoryScore {
                        category_score_id: row.get(0)?,
                        session_id: row.get(1)?,
                        name: row.get(2)?,
                        value: row.get(3)?,
                        sub_categories: Vec::new(),
                    })
                },
            )
            .optional()
        })
        .await
    }

    // -- Seed helpers ------------------------------------------------------
    // Interview CRUD lives upstream; these exist so deployments and tests
    // can install the rows the engine coordinates over.

    pub async fn create_session(
        &self,
        session_id: &str,
        interview_id: &str,
        candidate_id: &str,
    ) -> anyhow::Result<()> {
        let sid = session_id.to_string();
        let iid = interview_id.to_string();
        let cid = candidate_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, interview_id, candidate_id) VALUES (?1, ?2, ?3)",
                params![sid, iid, cid],
            )?;
            Ok(())
        })
        .await
    }
}

fn question_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Question> {
    Ok(Question {
        question_id: row.get(0)?,
        session_id: row.get(1)?,
        text: row.get(2)?,
        question_type: question_type_from_str(&row.get::<_, String>(3)?),
        is_answered: row.get::<_, i64>(4)? != 0,
        estimated_time_minutes: row.get::<_, i64>(5)? as u32,
    })
}

fn status_to_str(status: InterviewStatus) -> &'static str {
    match status {
        InterviewStatus::ToBeConducted => "toBeConducted",
        InterviewStatus::Ongoing => "ongoing",
        InterviewStatus::Completed => "completed",
    }
}

fn status_from_str(value: &str) -> InterviewStatus {
    match value {
        "ongoing" => InterviewStatus::Ongoing,
        "completed" => InterviewStatus::Completed,
        _ => InterviewStatus::ToBeConducted,
    }
}

fn question_type_to_str(question_type: QuestionType) -> &'static str {
    match question_type {
        QuestionType::OpenEnded => "OPEN_ENDED",
        QuestionType::Coding => "CODING",
    }
}

fn question_type_from_str(value: &str) -> QuestionType {
    match value {
        "CODING" => QuestionType::Coding,
        _ => QuestionType::OpenEnded,
    }
}

/// Current UTC time as RFC 3339, matching the schema's stored defaults.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Fresh store over a throwaway database, for tests across the crate.
#[cfg(test)]
pub(crate) async fn test_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("test.db")).await.unwrap();
    (store, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_session(store: &Store) -> String {
        let session_id = new_id();
        store
            .create_session(&session_id, "interview-1", "cand-1")
            .await
            .unwrap();
        session_id
    }

    #[test]
    fn timestamps_are_rfc3339_utc() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        // Same shape as the schema's strftime defaults.
        chrono::DateTime::parse_from_rfc3339(&ts).unwrap();
    }

    #[tokio::test]
    async fn session_roundtrip_and_initial_status() {
        let (store, _dir) = test_store().await;
        let sid = seeded_session(&store).await;

        let session = store.load_session(&sid).await.unwrap().unwrap();
        assert_eq!(session.interview_status, InterviewStatus::ToBeConducted);
        assert_eq!(session.score, 0.0);

        assert!(store.load_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn advance_is_idempotent() {
        let (store, _dir) = test_store().await;
        let sid = seeded_session(&store).await;

        let first = store
            .advance_interview_status(&sid, InterviewStatus::ToBeConducted, InterviewStatus::Ongoing)
            .await
            .unwrap();
        assert!(first);

        // Second advance observes the status already moved on.
        let second = store
            .advance_interview_status(&sid, InterviewStatus::ToBeConducted, InterviewStatus::Ongoing)
            .await
            .unwrap();
        assert!(!second);
    }

    #[tokio::test]
    async fn questions_keep_insertion_order() {
        let (store, _dir) = test_store().await;
        let sid = seeded_session(&store).await;

        let q1 = store
            .create_question(&sid, "first", QuestionType::OpenEnded, 5)
            .await
            .unwrap();
        let q2 = store
            .create_question(&sid, "second", QuestionType::Coding, 15)
            .await
            .unwrap();

        let next = store.next_unanswered(&sid).await.unwrap().unwrap();
        assert_eq!(next.question_id, q1.question_id);

        assert!(store.mark_answered(&sid, &q1.question_id).await.unwrap());
        let next = store.next_unanswered(&sid).await.unwrap().unwrap();
        assert_eq!(next.question_id, q2.question_id);

        assert!(store.mark_answered(&sid, &q2.question_id).await.unwrap());
        assert!(store.next_unanswered(&sid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resubmission_updates_never_duplicates() {
        let (store, _dir) = test_store().await;
        let sid = seeded_session(&store).await;
        let q = store
            .create_question(&sid, "explain lifetimes", QuestionType::OpenEnded, 5)
            .await
            .unwrap();

        let first = store
            .upsert_answer(&sid, &q.question_id, "cand-1", "draft answer")
            .await
            .unwrap();
        let second = store
            .upsert_answer(&sid, &q.question_id, "cand-1", "revised answer")
            .await
            .unwrap();

        // Latest text wins, identity is stable.
        assert_eq!(first.response_id, second.response_id);
        assert_eq!(second.response_text, "revised answer");

        let views = store.list_question_views(&sid).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(
            views[0].answer.as_ref().unwrap().response_text,
            "revised answer"
        );
    }

    #[tokio::test]
    async fn total_score_sums_per_answer_scores() {
        let (store, _dir) = test_store().await;
        let sid = seeded_session(&store).await;

        for (text, value) in [("q1", 60.0), ("q2", 80.0)] {
            let q = store
                .create_question(&sid, text, QuestionType::OpenEnded, 5)
                .await
                .unwrap();
            let a = store
                .upsert_answer(&sid, &q.question_id, "cand-1", "answer")
                .await
                .unwrap();
            store.upsert_score(&a.response_id, value).await.unwrap();
        }

        let total = store.recompute_total_score(&sid).await.unwrap();
        assert_eq!(total, 140.0);

        // Aggregate written back to the session row.
        let session = store.load_session(&sid).await.unwrap().unwrap();
        assert_eq!(session.score, 140.0);
    }

    #[tokio::test]
    async fn score_upsert_overwrites_value() {
        let (store, _dir) = test_store().await;
        let sid = seeded_session(&store).await;
        let q = store
            .create_question(&sid, "q", QuestionType::OpenEnded, 5)
            .await
            .unwrap();
        let a = store
            .upsert_answer(&sid, &q.question_id, "cand-1", "answer")
            .await
            .unwrap();

        store.upsert_score(&a.response_id, 40.0).await.unwrap();
        let updated = store.upsert_score(&a.response_id, 75.0).await.unwrap();
        assert_eq!(updated.value, 75.0);

        let total = store.recompute_total_score(&sid).await.unwrap();
        assert_eq!(total, 75.0);
    }

    #[tokio::test]
    async fn category_scores_nest_sub_categories() {
        let (store, _dir) = test_store().await;
        let sid = seeded_session(&store).await;

        let technical = store.create_category_score(&sid, "Technical").await.unwrap();
        store
            .create_sub_category_score(&technical.category_score_id, "Algorithms")
            .await
            .unwrap();

        let listed = store.list_category_scores(&sid).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Technical");
        assert_eq!(listed[0].sub_categories.len(), 1);
        assert_eq!(listed[0].sub_categories[0].name, "Algorithms");

        let found = store
            .find_category_by_name(&sid, "Technical")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.category_score_id, technical.category_score_id);
        assert!(store
            .find_category_by_name(&sid, "Behavioral")
            .await
            .unwrap()
            .is_none());
    }
}
