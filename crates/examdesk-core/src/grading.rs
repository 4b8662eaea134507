//! Grader-side tooling: score sheets backed by the remote store, attendance
//! actions on students, and attendance polling.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::attendance::{AttendanceAction, AttendanceStateMachine, TransitionOutcome};
use crate::error::{AttendanceError, ServiceError, SyncFailure, ValidationError};
use crate::model::{
    AttendanceRecord, ExamId, Question, QuestionId, SessionStatus, StudentId,
};
use crate::scoring::{ScoreSheet, ScoreSnapshot};
use crate::traits::GraderService;

/// One grader's view of one exam.
pub struct GradingDesk {
    exam_id: ExamId,
    questions: Vec<Question>,
    service: Arc<dyn GraderService>,
    attendance: HashMap<StudentId, AttendanceStateMachine>,
    sheets: HashMap<StudentId, ScoreSheet>,
}

impl GradingDesk {
    pub fn new(exam_id: ExamId, questions: Vec<Question>, service: Arc<dyn GraderService>) -> Self {
        Self {
            exam_id,
            questions,
            service,
            attendance: HashMap::new(),
            sheets: HashMap::new(),
        }
    }

    pub fn exam_id(&self) -> ExamId {
        self.exam_id
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Reload the attendance list and reconcile local status.
    pub async fn refresh_attendance(&mut self) -> Result<Vec<AttendanceRecord>, ServiceError> {
        let records = self.service.list_attendance(self.exam_id).await?;
        for record in &records {
            self.attendance
                .entry(record.student_id)
                .and_modify(|machine| {
                    machine.observe(record.status);
                })
                .or_insert_with(|| AttendanceStateMachine::new(record.status));
        }
        Ok(records)
    }

    pub fn status_of(&self, student_id: StudentId) -> Option<SessionStatus> {
        self.attendance.get(&student_id).map(AttendanceStateMachine::status)
    }

    pub fn is_enabled(&self, student_id: StudentId, action: AttendanceAction) -> bool {
        self.attendance
            .get(&student_id)
            .is_some_and(|machine| machine.is_enabled(action))
    }

    pub async fn allow(&mut self, student_id: StudentId) -> Result<TransitionOutcome, AttendanceError> {
        let service = Arc::clone(&self.service);
        let exam_id = self.exam_id;
        self.machine(student_id)
            .drive(AttendanceAction::Allow, service.allow_student(exam_id, student_id))
            .await
    }

    /// Reset the student's session. Their open score sheet is discarded
    /// along with the purged answers.
    pub async fn repeat(&mut self, student_id: StudentId) -> Result<TransitionOutcome, AttendanceError> {
        let service = Arc::clone(&self.service);
        let exam_id = self.exam_id;
        let outcome = self
            .machine(student_id)
            .drive(AttendanceAction::Repeat, service.repeat_student(exam_id, student_id))
            .await?;
        if self.sheets.remove(&student_id).is_some() {
            info!(student_id, "score sheet discarded after repeat");
        }
        Ok(outcome)
    }

    pub async fn finish(&mut self, student_id: StudentId) -> Result<TransitionOutcome, AttendanceError> {
        let service = Arc::clone(&self.service);
        let exam_id = self.exam_id;
        self.machine(student_id)
            .drive(AttendanceAction::Finish, service.finish_student(exam_id, student_id))
            .await
    }

    fn machine(&mut self, student_id: StudentId) -> &mut AttendanceStateMachine {
        self.attendance
            .entry(student_id)
            .or_insert_with(|| AttendanceStateMachine::new(SessionStatus::NotEntered))
    }

    /// Fetch a student's answers and saved scores. Objective questions are
    /// scored from the answers; manual points come back as they were saved.
    pub async fn open_sheet(&mut self, student_id: StudentId) -> Result<&mut ScoreSheet, ServiceError> {
        let answers = self.service.student_answers(self.exam_id, student_id).await?;
        let saved = self.service.student_scores(self.exam_id, student_id).await?;
        let payloads = answers
            .into_iter()
            .filter_map(|a| a.payload.map(|p| (a.question_id, p)))
            .collect();

        let mut sheet = ScoreSheet::new(student_id, &self.questions);
        sheet.score_objective(&self.questions, &payloads);
        sheet.restore(&saved);
        debug!(student_id, restored = saved.len(), total = sheet.total(), "score sheet opened");
        Ok(match self.sheets.entry(student_id) {
            Entry::Occupied(mut existing) => {
                existing.insert(sheet);
                existing.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(sheet),
        })
    }

    pub fn sheet(&self, student_id: StudentId) -> Option<&ScoreSheet> {
        self.sheets.get(&student_id)
    }

    fn sheet_mut(&mut self, student_id: StudentId) -> Result<&mut ScoreSheet, ValidationError> {
        self.sheets
            .get_mut(&student_id)
            .ok_or(ValidationError::NoScoreSheet(student_id))
    }

    pub fn remaining_cap(&self, student_id: StudentId, question_id: QuestionId) -> Result<f64, ValidationError> {
        self.sheets
            .get(&student_id)
            .ok_or(ValidationError::NoScoreSheet(student_id))?
            .remaining_cap(question_id)
    }

    pub fn set_points(
        &mut self,
        student_id: StudentId,
        question_id: QuestionId,
        points: f64,
    ) -> Result<f64, ValidationError> {
        self.sheet_mut(student_id)?.set_points(question_id, points)
    }

    pub fn set_components(
        &mut self,
        student_id: StudentId,
        question_id: QuestionId,
        written: Option<f64>,
        skill: Option<f64>,
    ) -> Result<Option<f64>, ValidationError> {
        self.sheet_mut(student_id)?
            .set_components(question_id, written, skill)
    }

    pub fn snapshot(&self, student_id: StudentId) -> Option<ScoreSnapshot> {
        self.sheets.get(&student_id).map(ScoreSheet::snapshot)
    }

    /// Push every changed score of the student concurrently. Saved entries
    /// are marked clean; failures stay dirty and are returned.
    pub async fn save_all(&mut self, student_id: StudentId) -> Result<Vec<SyncFailure>, ValidationError> {
        let entries = self.sheet_mut(student_id)?.dirty_entries();
        let exam_id = self.exam_id;

        let mut pending: FuturesUnordered<_> = entries
            .into_iter()
            .map(|entry| {
                let service = Arc::clone(&self.service);
                async move {
                    let result = service.save_score(exam_id, student_id, &entry).await;
                    (entry.question_id, result)
                }
            })
            .collect();

        let mut saved = Vec::new();
        let mut failures = Vec::new();
        while let Some((question_id, result)) = pending.next().await {
            match result {
                Ok(()) => saved.push(question_id),
                Err(e) => {
                    warn!(student_id, question_id, error = %e, "failed to save score");
                    failures.push(SyncFailure::score(student_id, question_id, e));
                }
            }
        }

        let sheet = self.sheet_mut(student_id)?;
        for question_id in saved {
            sheet.mark_saved(question_id);
        }
        Ok(failures)
    }
}

/// Polls the attendance list on an interval and publishes each result.
///
/// The first poll happens immediately. Dropping the monitor stops polling.
pub struct AttendanceMonitor {
    records: watch::Receiver<Vec<AttendanceRecord>>,
    task: JoinHandle<()>,
}

impl AttendanceMonitor {
    /// Must be called inside a tokio runtime.
    pub fn spawn(exam_id: ExamId, service: Arc<dyn GraderService>, every: Duration) -> Self {
        let (tx, rx) = watch::channel(Vec::new());
        let period = every.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match service.list_attendance(exam_id).await {
                    Ok(records) => {
                        debug!(exam_id, students = records.len(), "attendance polled");
                        tx.send_replace(records);
                    }
                    Err(e) => warn!(exam_id, error = %e, "attendance poll failed"),
                }
            }
        });
        Self { records: rx, task }
    }

    pub fn latest(&self) -> Vec<AttendanceRecord> {
        self.records.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<AttendanceRecord>> {
        self.records.clone()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for AttendanceMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
