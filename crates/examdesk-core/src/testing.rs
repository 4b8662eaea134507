//! In-crate test doubles.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::ServiceError;
use crate::model::{
    Answer, AnswerUpdate, AttendanceRecord, Exam, ExamId, PublicQuestion, QuestionOption,
    QuestionType, ScoreEntry, Session, SessionPaper, SessionStatus, StudentId,
};
use crate::traits::{GraderService, SessionService};

pub const TOKEN: &str = "ALPHA1";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

pub fn options(ids: &[&str]) -> Vec<QuestionOption> {
    ids.iter()
        .map(|id| QuestionOption {
            id: id.to_string(),
            text: format!("item {id}"),
        })
        .collect()
}

pub fn public_question(id: i64, question_type: QuestionType) -> PublicQuestion {
    let (options, premises) = match question_type {
        QuestionType::Single | QuestionType::Multi => (options(&["A", "B", "C"]), vec![]),
        QuestionType::Match => (options(&["R1", "R2", "R3"]), options(&["L1", "L2", "L3"])),
        QuestionType::Short | QuestionType::Essay => (vec![], vec![]),
    };
    PublicQuestion {
        id,
        question_type,
        content: format!("question {id}"),
        max_points: 20.0,
        options,
        premises,
        pool_order: None,
    }
}

/// One question of each type, ids 1..=5.
pub fn paper() -> SessionPaper {
    SessionPaper {
        exam: Exam {
            id: 1,
            title: "Midterm".into(),
            duration_minutes: 90,
            is_shuffle: false,
            is_active: true,
        },
        start_at: None,
        end_at: None,
        questions: vec![
            public_question(1, QuestionType::Single),
            public_question(2, QuestionType::Multi),
            public_question(3, QuestionType::Short),
            public_question(4, QuestionType::Essay),
            public_question(5, QuestionType::Match),
        ],
    }
}

/// Records every call and lets tests inject failures and latency.
pub struct MockSessionService {
    pub status: Mutex<SessionStatus>,
    pub start_at: Mutex<Option<DateTime<Utc>>>,
    pub paper: SessionPaper,
    pub saved: Mutex<Vec<Answer>>,
    pub writes: Mutex<Vec<AnswerUpdate>>,
    pub enter_calls: AtomicU32,
    pub finish_calls: AtomicU32,
    pub fail_upserts: AtomicBool,
    pub fail_finish: AtomicBool,
    /// Fail this many finish calls, then succeed.
    pub finish_failures: AtomicU32,
    pub finish_delay: Mutex<Duration>,
    /// Latency of the next upserts, one entry per call.
    pub upsert_delays: Mutex<VecDeque<Duration>>,
}

impl MockSessionService {
    pub fn new(status: SessionStatus) -> Self {
        Self {
            status: Mutex::new(status),
            start_at: Mutex::new(None),
            paper: paper(),
            saved: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            enter_calls: AtomicU32::new(0),
            finish_calls: AtomicU32::new(0),
            fail_upserts: AtomicBool::new(false),
            fail_finish: AtomicBool::new(false),
            finish_failures: AtomicU32::new(0),
            finish_delay: Mutex::new(Duration::ZERO),
            upsert_delays: Mutex::new(VecDeque::new()),
        }
    }

    pub fn writes(&self) -> Vec<AnswerUpdate> {
        self.writes.lock().unwrap().clone()
    }

    pub fn finish_calls(&self) -> u32 {
        self.finish_calls.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, status: SessionStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn move_status(&self, from: SessionStatus, to: SessionStatus) -> Result<(), ServiceError> {
        let mut status = self.status.lock().unwrap();
        if *status != from {
            return Err(ServiceError::Rejected {
                status: *status,
                message: format!("expected {from}"),
            });
        }
        *status = to;
        Ok(())
    }

    fn session(&self, exam_id: ExamId) -> Session {
        Session {
            exam_id,
            student_id: 42,
            status: *self.status.lock().unwrap(),
            start_at: *self.start_at.lock().unwrap(),
            end_at: None,
            token: TOKEN.into(),
        }
    }
}

#[async_trait]
impl SessionService for MockSessionService {
    async fn enter_session(&self, exam_id: ExamId, token: &str) -> Result<Session, ServiceError> {
        self.enter_calls.fetch_add(1, Ordering::SeqCst);
        if token != TOKEN {
            return Err(ServiceError::InvalidToken);
        }
        let status = *self.status.lock().unwrap();
        if status != SessionStatus::NotEntered {
            return Err(ServiceError::Rejected {
                status,
                message: "already entered".into(),
            });
        }
        *self.status.lock().unwrap() = SessionStatus::InProgress;
        *self.start_at.lock().unwrap() = Some(t0());
        Ok(self.session(exam_id))
    }

    async fn get_session(&self, exam_id: ExamId) -> Result<Session, ServiceError> {
        Ok(self.session(exam_id))
    }

    async fn get_session_questions(&self, _exam_id: ExamId) -> Result<SessionPaper, ServiceError> {
        let mut paper = self.paper.clone();
        paper.start_at = *self.start_at.lock().unwrap();
        Ok(paper)
    }

    async fn get_saved_answers(&self, _exam_id: ExamId) -> Result<Vec<Answer>, ServiceError> {
        Ok(self.saved.lock().unwrap().clone())
    }

    async fn upsert_answer(&self, _exam_id: ExamId, update: &AnswerUpdate) -> Result<(), ServiceError> {
        let delay = self.upsert_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(ServiceError::Network("connection reset".into()));
        }
        self.writes.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn finish_session(&self, _exam_id: ExamId) -> Result<(), ServiceError> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.finish_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let counted_failure = self
            .finish_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if counted_failure || self.fail_finish.load(Ordering::SeqCst) {
            return Err(ServiceError::Timeout(30));
        }
        *self.status.lock().unwrap() = SessionStatus::Finished;
        Ok(())
    }

    async fn report_violation(&self, _exam_id: ExamId) -> Result<(), ServiceError> {
        self.move_status(SessionStatus::InProgress, SessionStatus::Violation)
    }

    async fn resume_session(&self, _exam_id: ExamId) -> Result<(), ServiceError> {
        self.move_status(SessionStatus::Allowed, SessionStatus::InProgress)
    }
}

/// Grader-side double keyed by student id.
#[derive(Default)]
pub struct MockGraderService {
    pub records: Mutex<HashMap<StudentId, AttendanceRecord>>,
    pub answers: Mutex<HashMap<StudentId, Vec<Answer>>>,
    pub scores: Mutex<Vec<ScoreEntry>>,
    pub list_calls: AtomicU32,
    pub fail_scores: AtomicBool,
}

impl MockGraderService {
    pub fn with_students(students: &[(StudentId, SessionStatus)]) -> Self {
        let service = Self::default();
        {
            let mut records = service.records.lock().unwrap();
            for &(student_id, status) in students {
                records.insert(
                    student_id,
                    AttendanceRecord {
                        student_id,
                        student_name: format!("student {student_id}"),
                        status,
                        start_at: None,
                        end_at: None,
                    },
                );
            }
        }
        service
    }

    pub fn status_of(&self, student_id: StudentId) -> Option<SessionStatus> {
        self.records.lock().unwrap().get(&student_id).map(|r| r.status)
    }

    pub fn set_status(&self, student_id: StudentId, status: SessionStatus) {
        if let Some(record) = self.records.lock().unwrap().get_mut(&student_id) {
            record.status = status;
        }
    }

    fn move_status(
        &self,
        student_id: StudentId,
        allowed_from: &[SessionStatus],
        to: SessionStatus,
    ) -> Result<(), ServiceError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&student_id)
            .ok_or_else(|| ServiceError::NotFound(format!("student {student_id}")))?;
        if !allowed_from.contains(&record.status) {
            return Err(ServiceError::Rejected {
                status: record.status,
                message: "wrong status".into(),
            });
        }
        record.status = to;
        Ok(())
    }
}

#[async_trait]
impl GraderService for MockGraderService {
    async fn allow_student(&self, _exam_id: ExamId, student_id: StudentId) -> Result<(), ServiceError> {
        self.move_status(student_id, &[SessionStatus::Violation], SessionStatus::Allowed)
    }

    async fn repeat_student(&self, _exam_id: ExamId, student_id: StudentId) -> Result<(), ServiceError> {
        self.answers.lock().unwrap().remove(&student_id);
        self.move_status(
            student_id,
            &[
                SessionStatus::InProgress,
                SessionStatus::Violation,
                SessionStatus::Allowed,
                SessionStatus::Finished,
            ],
            SessionStatus::NotEntered,
        )
    }

    async fn finish_student(&self, _exam_id: ExamId, student_id: StudentId) -> Result<(), ServiceError> {
        self.move_status(
            student_id,
            &[
                SessionStatus::InProgress,
                SessionStatus::Violation,
                SessionStatus::Allowed,
                SessionStatus::Finished,
            ],
            SessionStatus::Finished,
        )
    }

    async fn save_score(
        &self,
        _exam_id: ExamId,
        _student_id: StudentId,
        entry: &ScoreEntry,
    ) -> Result<(), ServiceError> {
        if self.fail_scores.load(Ordering::SeqCst) {
            return Err(ServiceError::Api {
                status: 500,
                message: "database unavailable".into(),
            });
        }
        self.scores.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn student_answers(&self, _exam_id: ExamId, student_id: StudentId) -> Result<Vec<Answer>, ServiceError> {
        Ok(self
            .answers
            .lock()
            .unwrap()
            .get(&student_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn student_scores(&self, _exam_id: ExamId, student_id: StudentId) -> Result<Vec<ScoreEntry>, ServiceError> {
        Ok(self
            .scores
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn list_attendance(&self, _exam_id: ExamId) -> Result<Vec<AttendanceRecord>, ServiceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut records: Vec<AttendanceRecord> =
            self.records.lock().unwrap().values().cloned().collect();
        records.sort_by_key(|r| r.student_id);
        Ok(records)
    }
}
