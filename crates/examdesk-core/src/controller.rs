//! The student-side session controller.
//!
//! One [`SessionController`] owns everything the exam screen needs for one
//! student in one exam: the attendance machine, the loaded questions, local
//! answers and doubts, matching models, the countdown and the answer write
//! queue. All mutation goes through its methods; local state is updated
//! before any remote call is awaited.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::attendance::{AttendanceAction, AttendanceStateMachine, Step, TransitionOutcome};
use crate::countdown::{initial_remaining, CountdownController, FinishGate};
use crate::error::{AnswerError, AttendanceError, ServiceError, SyncFailure, ValidationError};
use crate::matching::MatchingAnswerModel;
use crate::model::{
    AnswerPayload, AnswerUpdate, Exam, ExamId, PublicQuestion, QuestionId, QuestionType,
    SessionPaper, SessionStatus, SyncPolicy,
};
use crate::sync_queue::{AnswerSyncQueue, Submission};
use crate::traits::{Clock, SessionService};

/// Timing knobs of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Quiet period before a buffered answer is written.
    pub quiet_period: Duration,
    /// Countdown tick length.
    pub tick_interval: Duration,
    /// How often status polling should run.
    pub status_poll_interval: Duration,
    /// Seed for the matching pool shuffle. `None` uses OS entropy.
    pub shuffle_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(1000),
            tick_interval: Duration::from_secs(1),
            status_poll_interval: Duration::from_secs(5),
            shuffle_seed: None,
        }
    }
}

/// Notifications for the exam screen.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    SyncFailed(SyncFailure),
    AutoFinished(TransitionOutcome),
    AutoFinishFailed(String),
    /// A remote repeat wiped local answers.
    AnswersPurged,
    TimersStopped,
}

/// One square of the progress grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressCell {
    pub index: usize,
    pub question_id: QuestionId,
    pub question_type: QuestionType,
    pub answered: bool,
    pub doubt: bool,
    pub current: bool,
}

/// Everything the exam screen renders, read in one lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub exam_id: ExamId,
    pub status: SessionStatus,
    pub remaining_secs: u64,
    pub current_index: usize,
    pub progress: Vec<ProgressCell>,
    pub answered: usize,
    pub doubtful: usize,
    pub enabled_actions: Vec<AttendanceAction>,
    pub pending_writes: usize,
}

struct SessionState {
    attendance: AttendanceStateMachine,
    exam: Option<Exam>,
    questions: Vec<PublicQuestion>,
    answers: HashMap<QuestionId, AnswerPayload>,
    doubts: BTreeSet<QuestionId>,
    matching: HashMap<QuestionId, MatchingAnswerModel>,
    current: usize,
}

impl SessionState {
    fn question(&self, question_id: QuestionId) -> Result<&PublicQuestion, ValidationError> {
        self.questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or(ValidationError::UnknownQuestion(question_id))
    }

    fn purge_answers(&mut self) {
        self.answers.clear();
        self.doubts.clear();
        for model in self.matching.values_mut() {
            *model = MatchingAnswerModel::new(
                model.lefts().to_vec(),
                model.canonical_order().to_vec(),
            );
        }
        self.current = 0;
    }
}

/// Composition root of one student's exam session.
///
/// Created behind an `Arc`; the countdown holds only a weak reference back,
/// so dropping the last handle tears the session down.
pub struct SessionController {
    me: Weak<SessionController>,
    exam_id: ExamId,
    service: Arc<dyn SessionService>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    queue: AnswerSyncQueue,
    countdown: Mutex<Option<CountdownController>>,
    remaining: Arc<watch::Sender<u64>>,
    finish_gate: FinishGate,
    events: broadcast::Sender<SessionEvent>,
    failure_relay: Mutex<Option<JoinHandle<()>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
    rng: Mutex<StdRng>,
}

impl SessionController {
    /// Must be called inside a tokio runtime.
    pub fn new(
        exam_id: ExamId,
        service: Arc<dyn SessionService>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (remaining, _) = watch::channel(0);
        let queue = AnswerSyncQueue::new(exam_id, Arc::clone(&service), config.quiet_period);
        let rng = match config.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut failures = queue.subscribe_failures();
        let relay_events = events.clone();
        let failure_relay = tokio::spawn(async move {
            loop {
                match failures.recv().await {
                    Ok(failure) => {
                        let _ = relay_events.send(SessionEvent::SyncFailed(failure));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sync failure notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            exam_id,
            service,
            clock,
            config,
            state: Mutex::new(SessionState {
                attendance: AttendanceStateMachine::new(SessionStatus::NotEntered),
                exam: None,
                questions: Vec::new(),
                answers: HashMap::new(),
                doubts: BTreeSet::new(),
                matching: HashMap::new(),
                current: 0,
            }),
            queue,
            countdown: Mutex::new(None),
            remaining: Arc::new(remaining),
            finish_gate: FinishGate::new(),
            events,
            failure_relay: Mutex::new(Some(failure_relay)),
            poller: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            rng: Mutex::new(rng),
        })
    }

    pub fn exam_id(&self) -> ExamId {
        self.exam_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.state().attendance.status()
    }

    pub fn is_enabled(&self, action: AttendanceAction) -> bool {
        self.state().attendance.is_enabled(action)
    }

    pub fn remaining(&self) -> u64 {
        *self.remaining.borrow()
    }

    pub fn subscribe_remaining(&self) -> watch::Receiver<u64> {
        self.remaining.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn is_countdown_running(&self) -> bool {
        self.countdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(CountdownController::is_running)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Enter the exam with its token, then load questions and saved answers.
    pub async fn enter(&self, token: &str) -> Result<TransitionOutcome, AttendanceError> {
        self.ensure_open()?;
        let token = token.trim();
        if token.is_empty() {
            return Err(ValidationError::InvalidToken.into());
        }

        let mut entered = None;
        let slot = &mut entered;
        let outcome = self
            .transition(AttendanceAction::Enter, async move {
                *slot = Some(self.service.enter_session(self.exam_id, token).await?);
                Ok(())
            })
            .await?;

        if let Some(session) = entered {
            info!(exam_id = self.exam_id, student_id = session.student_id, "entered exam");
            self.load()
                .await
                .map_err(|e| SyncFailure::transition(AttendanceAction::Enter, e))?;
        }
        Ok(outcome)
    }

    /// Fetch the session, its questions and saved answers, and start the
    /// countdown if the session is running. Used after entering and when a
    /// student returns to an exam already in progress.
    pub async fn load(&self) -> Result<SessionStatus, ServiceError> {
        if self.is_torn_down() {
            return Ok(self.status());
        }
        let session = self.service.get_session(self.exam_id).await?;
        let paper = self.service.get_session_questions(self.exam_id).await?;
        let saved = self.service.get_saved_answers(self.exam_id).await?;

        let now = self.clock.now();
        let start_at = paper.start_at.or(session.start_at);
        let end_at = paper.end_at.or(session.end_at);
        let initial = initial_remaining(now, start_at, end_at, paper.exam.duration_secs());

        let (status, change) = {
            let mut state = self.state();
            let change = state.attendance.observe(session.status);
            self.hydrate(&mut state, paper, saved);
            (state.attendance.status(), change)
        };
        if let Some(TransitionOutcome::Applied { from, to }) = change {
            self.emit(SessionEvent::StatusChanged { from, to });
        }

        match status {
            SessionStatus::InProgress | SessionStatus::Violation | SessionStatus::Allowed => {
                self.start_countdown(initial);
            }
            SessionStatus::NotEntered => {
                self.stop_countdown();
                self.remaining.send_replace(initial);
            }
            SessionStatus::Finished => {
                self.stop_countdown();
                self.remaining.send_replace(0);
            }
        }
        debug!(exam_id = self.exam_id, %status, remaining = initial, "session loaded");
        Ok(status)
    }

    fn hydrate(&self, state: &mut SessionState, paper: SessionPaper, saved: Vec<crate::model::Answer>) {
        state.answers.clear();
        state.doubts.clear();
        for answer in saved {
            if answer.is_doubt {
                state.doubts.insert(answer.question_id);
            }
            if let Some(payload) = answer.payload {
                state.answers.insert(answer.question_id, payload);
            }
        }

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let mut matching = HashMap::new();
        for question in paper.questions.iter().filter(|q| q.question_type == QuestionType::Match) {
            // Keep the order fixed for this controller's lifetime.
            let persisted = state
                .matching
                .get(&question.id)
                .map(|m| m.canonical_order().to_vec());
            let model = MatchingAnswerModel::for_question(question, persisted.as_deref(), &mut *rng);
            let model = match state.answers.get(&question.id) {
                Some(AnswerPayload::Match(pairs)) => {
                    match MatchingAnswerModel::from_pairs(
                        model.lefts().to_vec(),
                        model.canonical_order().to_vec(),
                        pairs,
                    ) {
                        Ok(restored) => restored,
                        Err(e) => {
                            warn!(question_id = question.id, error = %e, "ignoring saved matching answer");
                            model
                        }
                    }
                }
                _ => model,
            };
            matching.insert(question.id, model);
        }

        state.matching = matching;
        state.exam = Some(paper.exam);
        state.questions = paper.questions;
        if state.current >= state.questions.len() {
            state.current = 0;
        }
    }

    /// Poll the remote status and reconcile.
    ///
    /// A remote repeat purges local answers and stops every timer; a remote
    /// finish stops the countdown and drops unsent writes.
    pub async fn refresh_status(&self) -> Result<SessionStatus, ServiceError> {
        if self.is_torn_down() {
            return Ok(self.status());
        }
        let session = self.service.get_session(self.exam_id).await?;
        let (change, duration) = {
            let mut state = self.state();
            let change = state.attendance.observe(session.status);
            if matches!(change, Some(TransitionOutcome::Applied { to: SessionStatus::NotEntered, .. })) {
                state.purge_answers();
            }
            (change, state.exam.as_ref().map(Exam::duration_secs))
        };

        let Some(TransitionOutcome::Applied { from, to }) = change else {
            return Ok(session.status);
        };
        self.emit(SessionEvent::StatusChanged { from, to });
        match to {
            SessionStatus::NotEntered => {
                self.stop_timers();
                self.remaining.send_replace(duration.unwrap_or(0));
                self.emit(SessionEvent::AnswersPurged);
                info!(exam_id = self.exam_id, "session was reset remotely");
            }
            SessionStatus::Finished => {
                self.stop_timers();
                info!(exam_id = self.exam_id, "session was finished remotely");
            }
            _ => {}
        }
        Ok(to)
    }

    /// Run [`SessionController::refresh_status`] every
    /// `status_poll_interval` until teardown. Calling it again restarts the
    /// poller.
    pub fn start_status_polling(&self) {
        if self.is_torn_down() {
            return;
        }
        let me = self.me.clone();
        let every = self.config.status_poll_interval;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(controller) = me.upgrade() else {
                    break;
                };
                if controller.is_torn_down() {
                    break;
                }
                if let Err(e) = controller.refresh_status().await {
                    warn!(exam_id = controller.exam_id, error = %e, "status poll failed");
                }
            }
        });
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Record that the student left the exam view.
    pub async fn mark_violation(&self) -> Result<TransitionOutcome, AttendanceError> {
        self.ensure_open()?;
        self.transition(
            AttendanceAction::MarkViolation,
            self.service.report_violation(self.exam_id),
        )
        .await
    }

    /// Continue answering after a grader allowed the session.
    pub async fn resume(&self) -> Result<TransitionOutcome, AttendanceError> {
        self.ensure_open()?;
        self.transition(AttendanceAction::Resume, self.service.resume_session(self.exam_id))
            .await
    }

    // -----------------------------------------------------------------------
    // Answering
    // -----------------------------------------------------------------------

    /// Set the answer of a question. The local value is updated before the
    /// write is queued or sent.
    pub async fn answer(
        &self,
        question_id: QuestionId,
        payload: AnswerPayload,
    ) -> Result<Submission, AnswerError> {
        self.ensure_writable()?;
        let policy = {
            let mut state = self.state();
            state.attendance.check(AttendanceAction::Answer)?;
            let question = state.question(question_id)?;
            payload.validate_for(question)?;
            let policy = question.question_type.sync_policy();

            if let AnswerPayload::Match(pairs) = &payload {
                let rebuilt = match state.matching.get(&question_id) {
                    Some(model) => MatchingAnswerModel::from_pairs(
                        model.lefts().to_vec(),
                        model.canonical_order().to_vec(),
                        pairs,
                    )?,
                    None => return Err(ValidationError::UnknownQuestion(question_id).into()),
                };
                state.matching.insert(question_id, rebuilt);
            }
            state.answers.insert(question_id, payload.clone());
            policy
        };
        self.sync(
            AnswerUpdate::Payload {
                question_id,
                payload,
            },
            policy,
        )
        .await
    }

    /// Flip the doubt flag of a question; returns the new value.
    pub async fn toggle_doubt(&self, question_id: QuestionId) -> Result<bool, AnswerError> {
        self.ensure_writable()?;
        let is_doubt = {
            let mut state = self.state();
            state.attendance.check(AttendanceAction::Answer)?;
            state.question(question_id)?;
            if !state.doubts.remove(&question_id) {
                state.doubts.insert(question_id);
            }
            state.doubts.contains(&question_id)
        };
        self.sync(
            AnswerUpdate::Doubt {
                question_id,
                is_doubt,
            },
            SyncPolicy::Immediate,
        )
        .await?;
        Ok(is_doubt)
    }

    pub async fn assign_match(
        &self,
        question_id: QuestionId,
        left_id: &str,
        right_id: &str,
    ) -> Result<Submission, AnswerError> {
        self.edit_match(question_id, |model| model.assign(left_id, right_id))
            .await
    }

    pub async fn unassign_match(
        &self,
        question_id: QuestionId,
        left_id: &str,
    ) -> Result<Submission, AnswerError> {
        self.edit_match(question_id, |model| {
            model.unassign(left_id);
            Ok(())
        })
        .await
    }

    /// Reorder the unassigned pool. Local only; nothing is written.
    pub fn reorder_match_pool(
        &self,
        question_id: QuestionId,
        from: usize,
        to: usize,
    ) -> Result<(), AnswerError> {
        self.ensure_writable()?;
        let mut state = self.state();
        state.attendance.check(AttendanceAction::Answer)?;
        let model = state
            .matching
            .get_mut(&question_id)
            .ok_or(ValidationError::UnknownQuestion(question_id))?;
        model.reorder_pool(from, to)?;
        Ok(())
    }

    async fn edit_match<F>(&self, question_id: QuestionId, edit: F) -> Result<Submission, AnswerError>
    where
        F: FnOnce(&mut MatchingAnswerModel) -> Result<(), ValidationError>,
    {
        self.ensure_writable()?;
        let payload = {
            let mut state = self.state();
            state.attendance.check(AttendanceAction::Answer)?;
            let model = state
                .matching
                .get_mut(&question_id)
                .ok_or(ValidationError::UnknownQuestion(question_id))?;
            edit(model)?;
            let payload = model.to_payload();
            state.answers.insert(question_id, payload.clone());
            payload
        };
        self.sync(
            AnswerUpdate::Payload {
                question_id,
                payload,
            },
            SyncPolicy::Immediate,
        )
        .await
    }

    async fn sync(&self, update: AnswerUpdate, policy: SyncPolicy) -> Result<Submission, AnswerError> {
        self.queue.submit(update, policy).await.map_err(|failure| {
            self.emit(SessionEvent::SyncFailed(failure.clone()));
            AnswerError::Sync(failure)
        })
    }

    pub fn answer_for(&self, question_id: QuestionId) -> Option<AnswerPayload> {
        self.state().answers.get(&question_id).cloned()
    }

    pub fn is_doubt(&self, question_id: QuestionId) -> bool {
        self.state().doubts.contains(&question_id)
    }

    pub fn matching(&self, question_id: QuestionId) -> Option<MatchingAnswerModel> {
        self.state().matching.get(&question_id).cloned()
    }

    pub fn questions(&self) -> Vec<PublicQuestion> {
        self.state().questions.clone()
    }

    pub fn exam(&self) -> Option<Exam> {
        self.state().exam.clone()
    }

    /// Questions with the student's answers, when review is enabled.
    pub fn review(&self) -> Result<Vec<(PublicQuestion, Option<AnswerPayload>)>, AnswerError> {
        let state = self.state();
        state.attendance.check(AttendanceAction::ReviewAnswers)?;
        Ok(state
            .questions
            .iter()
            .map(|q| (q.clone(), state.answers.get(&q.id).cloned()))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    pub fn current_index(&self) -> usize {
        self.state().current
    }

    pub fn current_question(&self) -> Option<PublicQuestion> {
        let state = self.state();
        state.questions.get(state.current).cloned()
    }

    /// Jump to a question by position. Returns `false` when out of range.
    pub fn go_to(&self, index: usize) -> bool {
        let mut state = self.state();
        if index >= state.questions.len() {
            return false;
        }
        state.current = index;
        true
    }

    pub fn next(&self) -> usize {
        let mut state = self.state();
        if state.current + 1 < state.questions.len() {
            state.current += 1;
        }
        state.current
    }

    pub fn previous(&self) -> usize {
        let mut state = self.state();
        state.current = state.current.saturating_sub(1);
        state.current
    }

    // -----------------------------------------------------------------------
    // Finishing
    // -----------------------------------------------------------------------

    /// Finish the session on the student's request. Pending buffered
    /// answers are flushed first.
    pub async fn finish(&self) -> Result<TransitionOutcome, AttendanceError> {
        self.ensure_open()?;
        self.finish_with(AttendanceAction::Finish).await
    }

    /// Called by the countdown when it reaches zero. Runs at most once per
    /// attempt; later calls return `None` without touching the service.
    pub async fn auto_finish_on_timeout(&self) -> Option<Result<TransitionOutcome, AttendanceError>> {
        if self.is_torn_down() {
            return None;
        }
        if !self.state().attendance.claim_auto_finish() {
            debug!(exam_id = self.exam_id, "auto-finish already claimed");
            return None;
        }

        info!(exam_id = self.exam_id, "time is up, finishing session");
        let mut result = self.finish_with(AttendanceAction::AutoFinish).await;
        if let Ok(TransitionOutcome::InFlight { .. }) = result {
            // A manual finish holds the gate. Settle on where it leaves the
            // session and finish it here if it did not get there.
            self.finish_gate.idle().await;
            result = self.finish_with(AttendanceAction::AutoFinish).await;
        }
        match &result {
            Ok(outcome) => self.emit(SessionEvent::AutoFinished(*outcome)),
            Err(e) => {
                warn!(exam_id = self.exam_id, error = %e, "auto-finish failed");
                self.emit(SessionEvent::AutoFinishFailed(e.to_string()));
            }
        }
        Some(result)
    }

    async fn finish_with(&self, action: AttendanceAction) -> Result<TransitionOutcome, AttendanceError> {
        let Some(_guard) = self.finish_gate.try_acquire() else {
            debug!(exam_id = self.exam_id, %action, "finish already in flight");
            return Ok(TransitionOutcome::InFlight {
                status: self.status(),
            });
        };

        let step = self.state().attendance.check(action);
        match step {
            Err(rejected) => return Err(rejected.into()),
            Ok(Step::Stay { status }) => return Ok(TransitionOutcome::Unchanged { status }),
            Ok(Step::Go { .. }) => {}
        }

        for failure in self.queue.flush_all().await {
            self.emit(SessionEvent::SyncFailed(failure));
        }

        let result = self
            .transition(action, self.service.finish_session(self.exam_id))
            .await;
        if self.status() == SessionStatus::Finished {
            info!(exam_id = self.exam_id, %action, "session finished");
            self.stop_timers();
        }
        result
    }

    // -----------------------------------------------------------------------
    // Views and teardown
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> SessionSnapshot {
        let remaining_secs = self.remaining();
        let pending_writes = self.queue.pending_count();
        let state = self.state();
        let progress: Vec<ProgressCell> = state
            .questions
            .iter()
            .enumerate()
            .map(|(index, q)| ProgressCell {
                index,
                question_id: q.id,
                question_type: q.question_type,
                answered: state.answers.get(&q.id).is_some_and(AnswerPayload::is_answered),
                doubt: state.doubts.contains(&q.id),
                current: index == state.current,
            })
            .collect();

        SessionSnapshot {
            exam_id: self.exam_id,
            status: state.attendance.status(),
            remaining_secs,
            current_index: state.current,
            answered: progress.iter().filter(|c| c.answered).count(),
            doubtful: progress.iter().filter(|c| c.doubt).count(),
            progress,
            enabled_actions: state
                .attendance
                .action_matrix()
                .into_iter()
                .filter_map(|(action, enabled)| enabled.then_some(action))
                .collect(),
            pending_writes,
        }
    }

    /// Leave the exam screen: stop the countdown and discard unsent
    /// buffered answers. Later calls are refused.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_timers();
        if let Some(relay) = self
            .failure_relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            relay.abort();
        }
        if let Some(poller) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            poller.abort();
        }
        debug!(exam_id = self.exam_id, "session torn down");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn ensure_open(&self) -> Result<(), AttendanceError> {
        if self.is_torn_down() {
            return Err(AttendanceError::Closed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), AnswerError> {
        if self.is_torn_down() {
            return Err(AnswerError::Closed);
        }
        Ok(())
    }

    /// Check locally, await the remote call, settle, and announce a status
    /// change. The lock is never held across the call.
    async fn transition<Fut>(
        &self,
        action: AttendanceAction,
        call: Fut,
    ) -> Result<TransitionOutcome, AttendanceError>
    where
        Fut: Future<Output = Result<(), ServiceError>>,
    {
        let (before, step) = {
            let state = self.state();
            (state.attendance.status(), state.attendance.check(action))
        };
        match step {
            Err(rejected) => {
                warn!(%action, status = %before, "transition rejected locally");
                return Err(rejected.into());
            }
            Ok(Step::Stay { status }) => return Ok(TransitionOutcome::Unchanged { status }),
            Ok(Step::Go { .. }) => {}
        }

        let remote = call.await;
        let (after, result) = {
            let mut state = self.state();
            let result = state.attendance.settle(action, remote);
            (state.attendance.status(), result)
        };
        if after != before {
            self.emit(SessionEvent::StatusChanged {
                from: before,
                to: after,
            });
        }
        result
    }

    fn start_countdown(&self, initial: u64) {
        let me = self.me.clone();
        let countdown = CountdownController::start_with(
            Arc::clone(&self.remaining),
            initial,
            self.config.tick_interval,
            move || async move {
                if let Some(controller) = me.upgrade() {
                    controller.auto_finish_on_timeout().await;
                }
            },
        );
        let previous = self
            .countdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(countdown);
        if let Some(previous) = previous {
            previous.stop();
        }
        debug!(exam_id = self.exam_id, initial, "countdown started");
    }

    fn stop_countdown(&self) {
        let countdown = self
            .countdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(countdown) = countdown {
            countdown.stop();
        }
    }

    fn stop_timers(&self) {
        self.queue.cancel_all();
        self.stop_countdown();
        self.emit(SessionEvent::TimersStopped);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}
