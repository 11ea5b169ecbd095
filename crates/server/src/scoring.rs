//! Score aggregation coordinator.
//!
//! Owns the sequencing around category-score writes: every accepted update
//! recomputes the session total and re-reads the category list, so callers
//! always broadcast the three as one consistent unit — or nothing at all.

use tracing::warn;

use hireloop_protocol::CategoryScore;

use crate::analysis::clamp_score;
use crate::error::EngineError;
use crate::store::Store;

/// Result of one accepted score mutation, broadcast as a unit.
#[derive(Debug, Clone)]
pub struct ScoreBundle {
    pub category_scores: Vec<CategoryScore>,
    pub total_score: f64,
}

#[derive(Clone)]
pub struct ScoreCoordinator {
    store: Store,
}

impl ScoreCoordinator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Manually set a category score. Out-of-range values are rejected,
    /// never clamped — a human typed them.
    pub async fn set_category_score(
        &self,
        session_id: &str,
        category_score_id: &str,
        score: f64,
    ) -> Result<ScoreBundle, EngineError> {
        validate_score(score)?;
        let updated = self
            .store
            .update_category_score(category_score_id, score)
            .await?;
        if !updated {
            return Err(EngineError::NotFound(format!(
                "unknown category score {category_score_id}"
            )));
        }
        Ok(self.refresh(session_id).await?)
    }

    /// Manually set a sub-category score; same contract as categories.
    pub async fn set_sub_category_score(
        &self,
        session_id: &str,
        sub_category_score_id: &str,
        score: f64,
    ) -> Result<ScoreBundle, EngineError> {
        validate_score(score)?;
        let updated = self
            .store
            .update_sub_category_score(sub_category_score_id, score)
            .await?;
        if !updated {
            return Err(EngineError::NotFound(format!(
                "unknown sub-category score {sub_category_score_id}"
            )));
        }
        Ok(self.refresh(session_id).await?)
    }

    /// Push the freshly recomputed session total into the configured
    /// category after AI scoring. The target is configurable per
    /// deployment rather than pinned to one category label.
    ///
    /// A session without that category is not an error: the total still
    /// broadcasts, the rollup just has nowhere to land.
    pub async fn apply_auto_score(
        &self,
        session_id: &str,
        category_name: &str,
    ) -> anyhow::Result<ScoreBundle> {
        let total = self.store.recompute_total_score(session_id).await?;

        match self.store.find_category_by_name(session_id, category_name).await? {
            Some(category) => {
                self.store
                    .update_category_score(&category.category_score_id, clamp_score(total))
                    .await?;
            }
            None => {
                warn!(
                    component = "scoring",
                    event = "scoring.auto_target_missing",
                    session_id = %session_id,
                    category = %category_name,
                    "Session has no category for automatic scoring"
                );
            }
        }

        let category_scores = self.store.list_category_scores(session_id).await?;
        Ok(ScoreBundle {
            category_scores,
            total_score: total,
        })
    }

    /// Recompute the total and re-read categories without mutating either.
    pub async fn refresh(&self, session_id: &str) -> anyhow::Result<ScoreBundle> {
        let total_score = self.store.recompute_total_score(session_id).await?;
        let category_scores = self.store.list_category_scores(session_id).await?;
        Ok(ScoreBundle {
            category_scores,
            total_score,
        })
    }
}

/// Manual scores must already be in `[0,100]` and finite.
pub fn validate_score(score: f64) -> Result<(), EngineError> {
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(EngineError::Validation(format!(
            "score must be within [0,100], got {score}"
        )));
    }
    Ok(())
}
