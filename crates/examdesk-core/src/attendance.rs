//! Attendance lifecycle of one student in one exam.
//!
//! The machine itself is synchronous and holds only the locally known status.
//! Remote calls are made by the caller between [`AttendanceStateMachine::check`]
//! and [`AttendanceStateMachine::settle`] (or in one go via
//! [`AttendanceStateMachine::drive`]), so the same machine serves the student
//! controller and the grader desk.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{
    AttendanceError, ServiceError, SyncFailure, TransitionRejected, ValidationError,
};
use crate::model::SessionStatus;

/// Actions whose availability depends on the session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceAction {
    Enter,
    Answer,
    ReviewAnswers,
    MarkViolation,
    Allow,
    Resume,
    Repeat,
    Finish,
    AutoFinish,
}

impl AttendanceAction {
    pub const ALL: [AttendanceAction; 9] = [
        AttendanceAction::Enter,
        AttendanceAction::Answer,
        AttendanceAction::ReviewAnswers,
        AttendanceAction::MarkViolation,
        AttendanceAction::Allow,
        AttendanceAction::Resume,
        AttendanceAction::Repeat,
        AttendanceAction::Finish,
        AttendanceAction::AutoFinish,
    ];

    /// Status reached when the action succeeds, `None` for non-transitions.
    pub fn target(&self) -> Option<SessionStatus> {
        match self {
            AttendanceAction::Enter | AttendanceAction::Resume => Some(SessionStatus::InProgress),
            AttendanceAction::MarkViolation => Some(SessionStatus::Violation),
            AttendanceAction::Allow => Some(SessionStatus::Allowed),
            AttendanceAction::Repeat => Some(SessionStatus::NotEntered),
            AttendanceAction::Finish | AttendanceAction::AutoFinish => {
                Some(SessionStatus::Finished)
            }
            AttendanceAction::Answer | AttendanceAction::ReviewAnswers => None,
        }
    }
}

impl fmt::Display for AttendanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttendanceAction::Enter => "enter",
            AttendanceAction::Answer => "answer",
            AttendanceAction::ReviewAnswers => "review answers",
            AttendanceAction::MarkViolation => "mark violation",
            AttendanceAction::Allow => "allow",
            AttendanceAction::Resume => "resume",
            AttendanceAction::Repeat => "repeat",
            AttendanceAction::Finish => "finish",
            AttendanceAction::AutoFinish => "auto-finish",
        };
        f.write_str(s)
    }
}

/// The disabled-action matrix driving UI affordances.
pub fn is_action_enabled(status: SessionStatus, action: AttendanceAction) -> bool {
    use AttendanceAction as A;
    use SessionStatus as S;

    match action {
        A::Enter => status == S::NotEntered,
        A::Answer | A::MarkViolation => status == S::InProgress,
        A::ReviewAnswers => !matches!(status, S::NotEntered | S::Violation | S::Allowed),
        A::Allow => status == S::Violation,
        A::Resume => status == S::Allowed,
        A::Repeat => status != S::NotEntered,
        A::Finish | A::AutoFinish => !matches!(status, S::NotEntered | S::Finished),
    }
}

/// What a checked action will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The remote call should be made; on success the status moves `from` → `to`.
    Go {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// Nothing to do: a non-transition action, or an idempotent repeat.
    Stay { status: SessionStatus },
}

/// Result of an accepted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied {
        from: SessionStatus,
        to: SessionStatus,
    },
    Unchanged {
        status: SessionStatus,
    },
    /// An earlier call for the same action has not settled yet.
    InFlight {
        status: SessionStatus,
    },
}

impl TransitionOutcome {
    pub fn status(&self) -> SessionStatus {
        match self {
            TransitionOutcome::Applied { to, .. } => *to,
            TransitionOutcome::Unchanged { status } | TransitionOutcome::InFlight { status } => {
                *status
            }
        }
    }
}

/// The locally known attendance status and its transition rules.
#[derive(Debug, Clone)]
pub struct AttendanceStateMachine {
    status: SessionStatus,
    auto_finish_fired: bool,
}

impl AttendanceStateMachine {
    pub fn new(status: SessionStatus) -> Self {
        Self {
            status,
            auto_finish_fired: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_enabled(&self, action: AttendanceAction) -> bool {
        is_action_enabled(self.status, action)
    }

    /// Enablement of every action in the current status.
    pub fn action_matrix(&self) -> Vec<(AttendanceAction, bool)> {
        AttendanceAction::ALL
            .iter()
            .map(|&action| (action, self.is_enabled(action)))
            .collect()
    }

    /// Decide whether `action` may proceed from the current status.
    ///
    /// Finishing an already finished session is accepted as a no-op.
    pub fn check(&self, action: AttendanceAction) -> Result<Step, TransitionRejected> {
        let finishing = matches!(action, AttendanceAction::Finish | AttendanceAction::AutoFinish);
        if finishing && self.status == SessionStatus::Finished {
            return Ok(Step::Stay {
                status: self.status,
            });
        }
        if !self.is_enabled(action) {
            return Err(TransitionRejected {
                action,
                current: self.status,
            });
        }
        Ok(match action.target() {
            Some(to) => Step::Go {
                from: self.status,
                to,
            },
            None => Step::Stay {
                status: self.status,
            },
        })
    }

    /// Apply an action locally, with no remote round trip.
    pub fn apply(&mut self, action: AttendanceAction) -> Result<TransitionOutcome, TransitionRejected> {
        match self.check(action)? {
            Step::Go { from, to } => {
                self.set_status(to);
                Ok(TransitionOutcome::Applied { from, to })
            }
            Step::Stay { status } => Ok(TransitionOutcome::Unchanged { status }),
        }
    }

    /// Fold the result of the remote call for `action` into local state.
    ///
    /// A service rejection adopts the status the service reported, so the UI
    /// can explain it.
    pub fn settle(
        &mut self,
        action: AttendanceAction,
        remote: Result<(), ServiceError>,
    ) -> Result<TransitionOutcome, AttendanceError> {
        match remote {
            Ok(()) => {
                let from = self.status;
                match action.target() {
                    Some(to) if to != from => {
                        self.set_status(to);
                        info!(%from, %to, %action, "attendance transition applied");
                        Ok(TransitionOutcome::Applied { from, to })
                    }
                    _ => Ok(TransitionOutcome::Unchanged { status: from }),
                }
            }
            Err(ServiceError::Rejected { status, message }) => {
                self.observe(status);
                warn!(%action, %status, %message, "service rejected transition");
                Err(TransitionRejected {
                    action,
                    current: status,
                }
                .into())
            }
            Err(ServiceError::InvalidToken) => Err(ValidationError::InvalidToken.into()),
            Err(e) => {
                warn!(%action, error = %e, "remote transition failed");
                Err(SyncFailure::transition(action, e).into())
            }
        }
    }

    /// Check, await the remote call, and settle.
    ///
    /// The call is not awaited when the check rejects the action or finds
    /// nothing to do.
    pub async fn drive<Fut>(
        &mut self,
        action: AttendanceAction,
        call: Fut,
    ) -> Result<TransitionOutcome, AttendanceError>
    where
        Fut: Future<Output = Result<(), ServiceError>>,
    {
        match self.check(action) {
            Err(rejected) => {
                warn!(%action, status = %self.status, "transition rejected locally");
                Err(rejected.into())
            }
            Ok(Step::Stay { status }) => Ok(TransitionOutcome::Unchanged { status }),
            Ok(Step::Go { .. }) => {
                let remote = call.await;
                self.settle(action, remote)
            }
        }
    }

    /// Adopt a status observed remotely (polling, rejection replies).
    pub fn observe(&mut self, remote: SessionStatus) -> Option<TransitionOutcome> {
        if remote == self.status {
            return None;
        }
        let from = self.status;
        self.set_status(remote);
        info!(%from, to = %remote, "attendance status changed remotely");
        Some(TransitionOutcome::Applied { from, to: remote })
    }

    /// Claim the single auto-finish of this attempt. Returns `false` if it was
    /// already claimed.
    pub fn claim_auto_finish(&mut self) -> bool {
        if self.auto_finish_fired {
            return false;
        }
        self.auto_finish_fired = true;
        true
    }

    pub fn auto_finish_fired(&self) -> bool {
        self.auto_finish_fired
    }

    fn set_status(&mut self, to: SessionStatus) {
        // A repeat starts a fresh attempt with its own timer.
        if to == SessionStatus::NotEntered {
            self.auto_finish_fired = false;
        }
        self.status = to;
    }
}
