//! Pure lifecycle rules.
//!
//! No IO, no async, no locking — the room actor calls these and persists
//! the outcome. Keeping the rules pure makes every transition unit-testable
//! in isolation.

use hireloop_protocol::{InterviewStatus, Question, Role, TechnicalStatus};

/// Derive the question-level progress indicator.
///
/// Zero questions ⇒ to-be-conducted. All answered ⇒ completed. At least
/// one answered but not all ⇒ ongoing. Otherwise to-be-conducted.
pub fn technical_status(questions: &[Question]) -> TechnicalStatus {
    if questions.is_empty() {
        return TechnicalStatus::ToBeConducted;
    }
    let answered = questions.iter().filter(|q| q.is_answered).count();
    if answered == questions.len() {
        TechnicalStatus::Completed
    } else if answered > 0 {
        TechnicalStatus::Ongoing
    } else {
        TechnicalStatus::ToBeConducted
    }
}

/// The lifecycle only ever moves forward.
pub fn advance_allowed(from: InterviewStatus, to: InterviewStatus) -> bool {
    rank(to) > rank(from)
}

fn rank(status: InterviewStatus) -> u8 {
    match status {
        InterviewStatus::ToBeConducted => 0,
        InterviewStatus::Ongoing => 1,
        InterviewStatus::Completed => 2,
    }
}

/// True iff at least one candidate and one company participant are present.
pub fn has_both_roles<'a>(roles: impl Iterator<Item = &'a Role>) -> bool {
    let mut candidate = false;
    let mut company = false;
    for role in roles {
        match role {
            Role::Candidate => candidate = true,
            Role::Company => company = true,
        }
    }
    candidate && company
}
