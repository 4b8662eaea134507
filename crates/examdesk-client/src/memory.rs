//! In-memory exam service seeded from an [`ExamPaper`].
//!
//! Enforces the same status rules as the remote service, so it backs the CLI
//! simulator and integration tests. Call counters and failure injection
//! mirror what a flaky network would do to a client.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use examdesk_core::attendance::{is_action_enabled, AttendanceAction};
use examdesk_core::error::ServiceError;
use examdesk_core::model::{
    Answer, AnswerUpdate, AttendanceRecord, ExamId, PublicQuestion, QuestionId, QuestionType,
    ScoreEntry, Session, SessionPaper, SessionStatus, StudentId,
};
use examdesk_core::paper::ExamPaper;
use examdesk_core::scoring::{objective_points, MAX_EXAM_POINTS};
use examdesk_core::traits::{Clock, GraderService, SessionService};

const CAP_EPSILON: f64 = 1e-9;

#[derive(Default)]
struct BackendState {
    sessions: HashMap<StudentId, Session>,
    answers: HashMap<StudentId, BTreeMap<QuestionId, Answer>>,
    scores: HashMap<StudentId, BTreeMap<QuestionId, ScoreEntry>>,
    /// Question order (and match pool order) fixed at entry.
    orders: HashMap<StudentId, Vec<PublicQuestion>>,
}

/// A single-exam service held entirely in memory.
pub struct InMemoryBackend {
    paper: ExamPaper,
    clock: Arc<dyn Clock>,
    state: Mutex<BackendState>,
    upsert_calls: AtomicU32,
    finish_calls: AtomicU32,
    failing_upserts: AtomicU32,
}

impl InMemoryBackend {
    pub fn new(paper: ExamPaper, clock: Arc<dyn Clock>) -> Arc<Self> {
        let mut state = BackendState::default();
        for student in &paper.students {
            state.sessions.insert(
                student.id,
                Session {
                    exam_id: paper.exam.id,
                    student_id: student.id,
                    status: SessionStatus::NotEntered,
                    start_at: None,
                    end_at: None,
                    token: String::new(),
                },
            );
        }

        Arc::new(Self {
            paper,
            clock,
            state: Mutex::new(state),
            upsert_calls: AtomicU32::new(0),
            finish_calls: AtomicU32::new(0),
            failing_upserts: AtomicU32::new(0),
        })
    }

    pub fn paper(&self) -> &ExamPaper {
        &self.paper
    }

    /// The student-facing view of this backend for one enrolled student.
    pub fn as_student(self: &Arc<Self>, student_id: StudentId) -> Arc<StudentSession> {
        Arc::new(StudentSession {
            backend: Arc::clone(self),
            student_id,
        })
    }

    pub fn session(&self, student_id: StudentId) -> Option<Session> {
        self.state().sessions.get(&student_id).cloned()
    }

    pub fn answers_of(&self, student_id: StudentId) -> Vec<Answer> {
        self.state()
            .answers
            .get(&student_id)
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn scores_of(&self, student_id: StudentId) -> Vec<ScoreEntry> {
        self.state()
            .scores
            .get(&student_id)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of answer writes received, including failed ones.
    pub fn upsert_calls(&self) -> u32 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Number of finish requests received from students and graders.
    pub fn finish_calls(&self) -> u32 {
        self.finish_calls.load(Ordering::SeqCst)
    }

    /// Make the next `count` answer writes fail with a 503.
    pub fn fail_next_upserts(&self, count: u32) {
        self.failing_upserts.store(count, Ordering::SeqCst);
    }

    fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_exam(&self, exam_id: ExamId) -> Result<(), ServiceError> {
        if exam_id == self.paper.exam.id {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("exam {exam_id}")))
        }
    }

    fn question_type(&self, question_id: QuestionId) -> Result<QuestionType, ServiceError> {
        self.paper
            .question(question_id)
            .map(|q| q.question_type)
            .ok_or_else(|| ServiceError::NotFound(format!("question {question_id}")))
    }

    fn session_mut<'a>(
        state: &'a mut BackendState,
        student_id: StudentId,
    ) -> Result<&'a mut Session, ServiceError> {
        state
            .sessions
            .get_mut(&student_id)
            .ok_or_else(|| ServiceError::NotFound(format!("student {student_id}")))
    }

    /// Apply a status change, enforcing the attendance matrix. Finishing a
    /// finished session succeeds without change.
    fn transition(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
        action: AttendanceAction,
    ) -> Result<SessionStatus, ServiceError> {
        self.check_exam(exam_id)?;
        let now = self.clock.now();
        let mut state = self.state();
        let session = Self::session_mut(&mut state, student_id)?;
        let current = session.status;

        if matches!(action, AttendanceAction::Finish | AttendanceAction::AutoFinish)
            && current == SessionStatus::Finished
        {
            return Ok(current);
        }
        if !is_action_enabled(current, action) {
            return Err(ServiceError::Rejected {
                status: current,
                message: format!("cannot {action}: {}", current.describe()),
            });
        }
        let Some(target) = action.target() else {
            return Ok(current);
        };

        session.status = target;
        match target {
            SessionStatus::Finished => session.end_at = Some(now),
            SessionStatus::NotEntered => {
                session.start_at = None;
                session.end_at = None;
                session.token.clear();
                state.answers.remove(&student_id);
                state.scores.remove(&student_id);
                state.orders.remove(&student_id);
            }
            _ => {}
        }
        info!(student_id, from = %current, to = %target, "session status changed");
        Ok(target)
    }

    fn enter(&self, exam_id: ExamId, student_id: StudentId, token: &str) -> Result<Session, ServiceError> {
        self.check_exam(exam_id)?;
        if !self.paper.exam.is_active {
            return Err(ServiceError::Api {
                status: 403,
                message: "exam is not active".into(),
            });
        }
        let now = self.clock.now();
        let mut state = self.state();
        let session = Self::session_mut(&mut state, student_id)?;
        if session.status != SessionStatus::NotEntered {
            return Err(ServiceError::Rejected {
                status: session.status,
                message: session.status.describe().into(),
            });
        }
        if token.trim() != self.paper.token {
            return Err(ServiceError::InvalidToken);
        }

        session.status = SessionStatus::InProgress;
        session.start_at = Some(now);
        session.end_at = None;
        session.token = token.trim().to_string();
        let entered = session.clone();

        let order = self.arrange(student_id);
        state.orders.insert(student_id, order);
        info!(student_id, exam_id, "student entered exam");
        Ok(entered)
    }

    /// Per-student question order, with every match pool shuffled.
    fn arrange(&self, student_id: StudentId) -> Vec<PublicQuestion> {
        let seed = (self.paper.exam.id as u64).rotate_left(32) ^ student_id as u64;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut questions: Vec<PublicQuestion> =
            self.paper.questions.iter().map(|q| q.to_public()).collect();
        if self.paper.exam.is_shuffle {
            questions.shuffle(&mut rng);
        }
        for question in questions
            .iter_mut()
            .filter(|q| q.question_type == QuestionType::Match)
        {
            let mut pool: Vec<String> = question.options.iter().map(|o| o.id.clone()).collect();
            pool.shuffle(&mut rng);
            question.pool_order = Some(pool);
        }
        questions
    }

    fn session_paper(&self, exam_id: ExamId, student_id: StudentId) -> Result<SessionPaper, ServiceError> {
        self.check_exam(exam_id)?;
        let state = self.state();
        let session = state
            .sessions
            .get(&student_id)
            .ok_or_else(|| ServiceError::NotFound(format!("student {student_id}")))?;
        let questions = state
            .orders
            .get(&student_id)
            .cloned()
            .unwrap_or_else(|| self.paper.questions.iter().map(|q| q.to_public()).collect());
        Ok(SessionPaper {
            exam: self.paper.exam.clone(),
            start_at: session.start_at,
            end_at: session.end_at,
            questions,
        })
    }

    fn upsert(&self, exam_id: ExamId, student_id: StudentId, update: &AnswerUpdate) -> Result<(), ServiceError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.check_exam(exam_id)?;
        if self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ServiceError::Api {
                status: 503,
                message: "injected failure".into(),
            });
        }

        let question_id = update.question_id();
        let question_type = self.question_type(question_id)?;
        if let AnswerUpdate::Payload { payload, .. } = update {
            if payload.question_type() != question_type {
                return Err(ServiceError::Api {
                    status: 422,
                    message: format!("question {question_id} expects a {question_type} answer"),
                });
            }
        }

        let mut state = self.state();
        let status = Self::session_mut(&mut state, student_id)?.status;
        if status != SessionStatus::InProgress {
            return Err(ServiceError::Rejected {
                status,
                message: "answers can only be saved while the exam is in progress".into(),
            });
        }

        let answer = state
            .answers
            .entry(student_id)
            .or_default()
            .entry(question_id)
            .or_insert_with(|| Answer {
                question_id,
                student_id,
                payload: None,
                is_doubt: false,
            });
        match update {
            AnswerUpdate::Payload { payload, .. } => answer.payload = Some(payload.clone()),
            AnswerUpdate::Doubt { is_doubt, .. } => answer.is_doubt = *is_doubt,
        }
        debug!(student_id, question_id, "answer stored");
        Ok(())
    }

    /// Points the student already holds outside `question_id`: stored manual
    /// scores plus the automatic score of every objective question.
    fn points_elsewhere(state: &BackendState, paper: &ExamPaper, student_id: StudentId, question_id: QuestionId) -> f64 {
        let answers = state.answers.get(&student_id);
        let scores = state.scores.get(&student_id);
        paper
            .questions
            .iter()
            .filter(|q| q.id != question_id)
            .map(|q| {
                let payload = answers
                    .and_then(|a| a.get(&q.id))
                    .and_then(|a| a.payload.as_ref());
                objective_points(q, payload)
                    .or_else(|| scores.and_then(|s| s.get(&q.id)).map(|s| s.points))
                    .unwrap_or(0.0)
            })
            .sum()
    }
}

#[async_trait]
impl GraderService for InMemoryBackend {
    async fn allow_student(&self, exam_id: ExamId, student_id: StudentId) -> Result<(), ServiceError> {
        self.transition(exam_id, student_id, AttendanceAction::Allow)
            .map(|_| ())
    }

    async fn repeat_student(&self, exam_id: ExamId, student_id: StudentId) -> Result<(), ServiceError> {
        self.transition(exam_id, student_id, AttendanceAction::Repeat)
            .map(|_| ())
    }

    async fn finish_student(&self, exam_id: ExamId, student_id: StudentId) -> Result<(), ServiceError> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        self.transition(exam_id, student_id, AttendanceAction::Finish)
            .map(|_| ())
    }

    async fn save_score(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
        entry: &ScoreEntry,
    ) -> Result<(), ServiceError> {
        self.check_exam(exam_id)?;
        let question = self
            .paper
            .question(entry.question_id)
            .ok_or_else(|| ServiceError::NotFound(format!("question {}", entry.question_id)))?;
        if question.question_type.is_objective() {
            return Err(ServiceError::Api {
                status: 422,
                message: format!("question {} is scored automatically", question.id),
            });
        }
        if !entry.points.is_finite() || entry.points < 0.0 {
            return Err(ServiceError::Api {
                status: 422,
                message: format!("invalid points {}", entry.points),
            });
        }

        let mut state = self.state();
        if !state.sessions.contains_key(&student_id) {
            return Err(ServiceError::NotFound(format!("student {student_id}")));
        }
        let others = Self::points_elsewhere(&state, &self.paper, student_id, question.id);
        let cap = question.max_points.min(MAX_EXAM_POINTS - others).max(0.0);
        if entry.points > cap + CAP_EPSILON {
            return Err(ServiceError::Api {
                status: 422,
                message: format!(
                    "score {} exceeds remaining cap {cap} for question {}",
                    entry.points, question.id
                ),
            });
        }

        state.scores.entry(student_id).or_default().insert(
            question.id,
            ScoreEntry {
                student_id,
                ..entry.clone()
            },
        );
        debug!(student_id, question_id = question.id, points = entry.points, "score stored");
        Ok(())
    }

    async fn student_answers(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<Vec<Answer>, ServiceError> {
        self.check_exam(exam_id)?;
        if self.session(student_id).is_none() {
            return Err(ServiceError::NotFound(format!("student {student_id}")));
        }
        Ok(self.answers_of(student_id))
    }

    async fn student_scores(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<Vec<ScoreEntry>, ServiceError> {
        self.check_exam(exam_id)?;
        if self.session(student_id).is_none() {
            return Err(ServiceError::NotFound(format!("student {student_id}")));
        }
        Ok(self.scores_of(student_id))
    }

    async fn list_attendance(&self, exam_id: ExamId) -> Result<Vec<AttendanceRecord>, ServiceError> {
        self.check_exam(exam_id)?;
        let state = self.state();
        Ok(self
            .paper
            .students
            .iter()
            .filter_map(|student| {
                state.sessions.get(&student.id).map(|session| AttendanceRecord {
                    student_id: student.id,
                    student_name: student.name.clone(),
                    status: session.status,
                    start_at: session.start_at,
                    end_at: session.end_at,
                })
            })
            .collect())
    }
}

/// One student's handle on an [`InMemoryBackend`].
pub struct StudentSession {
    backend: Arc<InMemoryBackend>,
    student_id: StudentId,
}

impl StudentSession {
    pub fn student_id(&self) -> StudentId {
        self.student_id
    }
}

#[async_trait]
impl SessionService for StudentSession {
    async fn enter_session(&self, exam_id: ExamId, token: &str) -> Result<Session, ServiceError> {
        self.backend.enter(exam_id, self.student_id, token)
    }

    async fn get_session(&self, exam_id: ExamId) -> Result<Session, ServiceError> {
        self.backend.check_exam(exam_id)?;
        self.backend
            .session(self.student_id)
            .ok_or_else(|| ServiceError::NotFound(format!("student {}", self.student_id)))
    }

    async fn get_session_questions(&self, exam_id: ExamId) -> Result<SessionPaper, ServiceError> {
        self.backend.session_paper(exam_id, self.student_id)
    }

    async fn get_saved_answers(&self, exam_id: ExamId) -> Result<Vec<Answer>, ServiceError> {
        self.backend.student_answers(exam_id, self.student_id).await
    }

    async fn upsert_answer(&self, exam_id: ExamId, update: &AnswerUpdate) -> Result<(), ServiceError> {
        self.backend.upsert(exam_id, self.student_id, update)
    }

    async fn finish_session(&self, exam_id: ExamId) -> Result<(), ServiceError> {
        self.backend.finish_calls.fetch_add(1, Ordering::SeqCst);
        self.backend
            .transition(exam_id, self.student_id, AttendanceAction::Finish)
            .map(|_| ())
    }

    async fn report_violation(&self, exam_id: ExamId) -> Result<(), ServiceError> {
        self.backend
            .transition(exam_id, self.student_id, AttendanceAction::MarkViolation)
            .map(|_| ())
    }

    async fn resume_session(&self, exam_id: ExamId) -> Result<(), ServiceError> {
        self.backend
            .transition(exam_id, self.student_id, AttendanceAction::Resume)
            .map(|_| ())
    }
}
