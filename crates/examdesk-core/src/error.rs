//! Error taxonomy for the session engine.
//!
//! Remote failures are `ServiceError`s, defined here so the engine can
//! classify them (rejection vs. transport) without string matching.
//! Local input problems are `ValidationError`s and refused lifecycle
//! transitions are `TransitionRejected` values.

use std::fmt;

use thiserror::Error;

use crate::attendance::AttendanceAction;
use crate::model::{QuestionId, QuestionType, SessionStatus, StudentId};

/// Errors returned by the remote session/answer/grader service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The entry token was not accepted.
    #[error("invalid exam token")]
    InvalidToken,

    /// The service refused the request because of the session's current status.
    #[error("rejected by service (status {status}): {message}")]
    Rejected {
        status: SessionStatus,
        message: String,
    },

    /// The exam, session or student does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),
}

impl ServiceError {
    /// The status the service reported when it refused a transition.
    pub fn rejected_status(&self) -> Option<SessionStatus> {
        match self {
            ServiceError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for failures that may succeed if the same call is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Timeout(_) | ServiceError::Network(_)
        ) || matches!(self, ServiceError::Api { status, .. } if *status >= 500)
    }
}

/// Invalid local input. Reported inline and never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("invalid exam token")]
    InvalidToken,

    #[error("question {question_id} expects a {expected} answer, got {actual}")]
    PayloadMismatch {
        question_id: QuestionId,
        expected: QuestionType,
        actual: QuestionType,
    },

    #[error("unknown question: {0}")]
    UnknownQuestion(QuestionId),

    #[error("question {question_id} has no option '{option_id}'")]
    UnknownOption {
        question_id: QuestionId,
        option_id: String,
    },

    #[error("unknown matching item '{0}'")]
    UnknownMatchItem(String),

    #[error("right item '{0}' is assigned more than once")]
    DuplicateMatchTarget(String),

    #[error("pool index {index} out of range (pool size {len})")]
    PoolIndexOutOfRange { index: usize, len: usize },

    #[error("invalid points {points} for question {question_id}")]
    InvalidPoints { question_id: QuestionId, points: f64 },

    #[error("question {0} is scored automatically")]
    NotManuallyGraded(QuestionId),

    #[error("no score sheet open for student {0}")]
    NoScoreSheet(StudentId),
}

/// A lifecycle action attempted from a status that does not permit it.
///
/// Double clicks and stale screens make these expected, so they are values
/// the UI can explain rather than failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub struct TransitionRejected {
    pub action: AttendanceAction,
    pub current: SessionStatus,
}

impl fmt::Display for TransitionRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot {} while {}: {}",
            self.action,
            self.current,
            self.current.describe()
        )
    }
}

/// Which remote write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    Answer(QuestionId),
    Score {
        student_id: StudentId,
        question_id: QuestionId,
    },
    Transition(AttendanceAction),
}

/// A remote write that did not go through. Local state is kept as-is.
#[derive(Debug, Clone, Error)]
pub struct SyncFailure {
    pub target: SyncTarget,
    #[source]
    pub source: ServiceError,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            SyncTarget::Answer(id) => {
                write!(f, "failed to sync answer for question {id}: {}", self.source)
            }
            SyncTarget::Score {
                student_id,
                question_id,
            } => write!(
                f,
                "failed to save score of student {student_id} for question {question_id}: {}",
                self.source
            ),
            SyncTarget::Transition(action) => {
                write!(f, "failed to {action} session: {}", self.source)
            }
        }
    }
}

impl SyncFailure {
    pub fn answer(question_id: QuestionId, source: ServiceError) -> Self {
        Self {
            target: SyncTarget::Answer(question_id),
            source,
        }
    }

    pub fn score(student_id: StudentId, question_id: QuestionId, source: ServiceError) -> Self {
        Self {
            target: SyncTarget::Score {
                student_id,
                question_id,
            },
            source,
        }
    }

    pub fn transition(action: AttendanceAction, source: ServiceError) -> Self {
        Self {
            target: SyncTarget::Transition(action),
            source,
        }
    }

    pub fn question_id(&self) -> Option<QuestionId> {
        match self.target {
            SyncTarget::Answer(id) | SyncTarget::Score { question_id: id, .. } => Some(id),
            SyncTarget::Transition(_) => None,
        }
    }
}

/// Outcome errors of attendance transitions.
#[derive(Debug, Clone, Error)]
pub enum AttendanceError {
    #[error(transparent)]
    Rejected(#[from] TransitionRejected),

    #[error("the exam session has been closed")]
    Closed,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Sync(#[from] SyncFailure),
}

/// Outcome errors of answer edits.
#[derive(Debug, Clone, Error)]
pub enum AnswerError {
    #[error(transparent)]
    Rejected(#[from] TransitionRejected),

    #[error("the exam session has been closed")]
    Closed,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Sync(#[from] SyncFailure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_message_explains_status() {
        let err = TransitionRejected {
            action: AttendanceAction::Enter,
            current: SessionStatus::Finished,
        };
        assert_eq!(
            err.to_string(),
            "cannot enter while FINISHED: the exam has already been finished"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(ServiceError::Timeout(30).is_transient());
        assert!(ServiceError::Api {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(!ServiceError::InvalidToken.is_transient());
        assert!(!ServiceError::Api {
            status: 422,
            message: "bad".into()
        }
        .is_transient());
    }

    #[test]
    fn sync_failure_names_question() {
        let err = SyncFailure::answer(7, ServiceError::Network("reset".into()));
        assert!(err.to_string().contains("question 7"));
        assert_eq!(err.question_id(), Some(7));
        let err = SyncFailure::transition(AttendanceAction::Finish, ServiceError::Timeout(5));
        assert!(err.to_string().starts_with("failed to finish session"));
    }

    #[test]
    fn rejected_status_is_exposed() {
        let err = ServiceError::Rejected {
            status: SessionStatus::Finished,
            message: "done".into(),
        };
        assert_eq!(err.rejected_status(), Some(SessionStatus::Finished));
        assert_eq!(ServiceError::InvalidToken.rejected_status(), None);
    }
}
