//! Collaborator traits.
//!
//! The session engine never talks to storage directly. Everything remote goes
//! through these request/response traits, implemented by the
//! `examdesk-client` crate (HTTP and in-memory backends).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ServiceError;
use crate::model::{
    Answer, AnswerUpdate, AttendanceRecord, ExamId, ScoreEntry, Session, SessionPaper, StudentId,
};

// ---------------------------------------------------------------------------
// Student-facing service
// ---------------------------------------------------------------------------

/// The remote session and answer store, as seen by the signed-in student.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Enter an exam with its token. A session that is not `NOT_ENTERED`
    /// yields `ServiceError::Rejected` carrying the current status.
    async fn enter_session(&self, exam_id: ExamId, token: &str) -> Result<Session, ServiceError>;

    /// Current session record, for status polling.
    async fn get_session(&self, exam_id: ExamId) -> Result<Session, ServiceError>;

    /// Exam metadata and the ordered question list.
    async fn get_session_questions(&self, exam_id: ExamId) -> Result<SessionPaper, ServiceError>;

    /// Previously saved answers, used to hydrate local state.
    async fn get_saved_answers(&self, exam_id: ExamId) -> Result<Vec<Answer>, ServiceError>;

    /// Idempotent write of one payload or doubt flag.
    async fn upsert_answer(&self, exam_id: ExamId, update: &AnswerUpdate)
        -> Result<(), ServiceError>;

    /// Idempotent finish of the student's own session.
    async fn finish_session(&self, exam_id: ExamId) -> Result<(), ServiceError>;

    /// Record that the student left the exam view (IN_PROGRESS → VIOLATION).
    async fn report_violation(&self, exam_id: ExamId) -> Result<(), ServiceError>;

    /// Continue after a grader allowed the session (ALLOWED → IN_PROGRESS).
    async fn resume_session(&self, exam_id: ExamId) -> Result<(), ServiceError>;
}

// ---------------------------------------------------------------------------
// Grader-facing service
// ---------------------------------------------------------------------------

/// Grader actions on other students' sessions.
#[async_trait]
pub trait GraderService: Send + Sync {
    async fn allow_student(&self, exam_id: ExamId, student_id: StudentId)
        -> Result<(), ServiceError>;

    /// Reset a session to `NOT_ENTERED` and purge its answers.
    async fn repeat_student(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<(), ServiceError>;

    async fn finish_student(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<(), ServiceError>;

    async fn save_score(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
        entry: &ScoreEntry,
    ) -> Result<(), ServiceError>;

    /// Answers of one student, for grading.
    async fn student_answers(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<Vec<Answer>, ServiceError>;

    /// Manual scores saved so far for one student.
    async fn student_scores(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<Vec<ScoreEntry>, ServiceError>;

    async fn list_attendance(&self, exam_id: ExamId) -> Result<Vec<AttendanceRecord>, ServiceError>;
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Wall-clock source, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: std::sync::Mutex::new(now),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(chrono::Duration::minutes(45));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(45));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
