//! Core data model types for examdesk.
//!
//! These are the records exchanged with the remote session service and held
//! by the session engine: exams, sessions, questions, answers and scores.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub type ExamId = i64;
pub type QuestionId = i64;
pub type StudentId = i64;

/// An exam as configured by its author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: ExamId,
    #[serde(default)]
    pub title: String,
    /// Length of the answering window once a student has entered.
    pub duration_minutes: u32,
    /// Whether the service shuffles question order per student.
    #[serde(default)]
    pub is_shuffle: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Exam {
    pub fn duration_secs(&self) -> u64 {
        u64::from(self.duration_minutes) * 60
    }
}

fn default_true() -> bool {
    true
}

/// Attendance status of one student in one exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    NotEntered,
    InProgress,
    Violation,
    Allowed,
    Finished,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 5] = [
        SessionStatus::NotEntered,
        SessionStatus::InProgress,
        SessionStatus::Violation,
        SessionStatus::Allowed,
        SessionStatus::Finished,
    ];

    /// Short explanation suitable for telling a student why an action is unavailable.
    pub fn describe(&self) -> &'static str {
        match self {
            SessionStatus::NotEntered => "the exam has not been entered yet",
            SessionStatus::InProgress => "the exam is already in progress",
            SessionStatus::Violation => "the session was flagged for leaving the exam view",
            SessionStatus::Allowed => "the session was allowed to continue by a grader",
            SessionStatus::Finished => "the exam has already been finished",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::NotEntered => write!(f, "NOT_ENTERED"),
            SessionStatus::InProgress => write!(f, "IN_PROGRESS"),
            SessionStatus::Violation => write!(f, "VIOLATION"),
            SessionStatus::Allowed => write!(f, "ALLOWED"),
            SessionStatus::Finished => write!(f, "FINISHED"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NOT_ENTERED" => Ok(SessionStatus::NotEntered),
            "IN_PROGRESS" => Ok(SessionStatus::InProgress),
            "VIOLATION" => Ok(SessionStatus::Violation),
            "ALLOWED" => Ok(SessionStatus::Allowed),
            "FINISHED" => Ok(SessionStatus::Finished),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One student's participation in one exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub exam_id: ExamId,
    pub student_id: StudentId,
    pub status: SessionStatus,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token: String,
}

/// The five supported question shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Single,
    Multi,
    Short,
    Essay,
    Match,
}

/// How answer changes for a question type reach the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Held locally and written after a quiet period.
    Buffered,
    /// Written on every change.
    Immediate,
}

impl QuestionType {
    pub fn sync_policy(&self) -> SyncPolicy {
        match self {
            QuestionType::Short | QuestionType::Essay => SyncPolicy::Buffered,
            QuestionType::Single | QuestionType::Multi | QuestionType::Match => {
                SyncPolicy::Immediate
            }
        }
    }

    /// Objective questions are scored automatically from the correct-answer set.
    pub fn is_objective(&self) -> bool {
        matches!(self, QuestionType::Single | QuestionType::Multi)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionType::Single => write!(f, "single"),
            QuestionType::Multi => write!(f, "multi"),
            QuestionType::Short => write!(f, "short"),
            QuestionType::Essay => write!(f, "essay"),
            QuestionType::Match => write!(f, "match"),
        }
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(QuestionType::Single),
            "multi" | "multiple" => Ok(QuestionType::Multi),
            "short" => Ok(QuestionType::Short),
            "essay" => Ok(QuestionType::Essay),
            "match" | "matching" => Ok(QuestionType::Match),
            _ => Err(format!("unknown question type: {s}")),
        }
    }
}

/// A selectable option, or a left/right item of a matching question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

/// A question with its answer key. Never sent to the student view as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub content: String,
    pub max_points: f64,
    /// Choices for single/multi, right-hand items for match.
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Left-hand premises for match questions.
    #[serde(default)]
    pub premises: Vec<QuestionOption>,
    /// Option ids forming the correct answer of objective questions.
    #[serde(default)]
    pub correct_answers: Vec<String>,
}

impl Question {
    /// Strip the answer key for the student view.
    pub fn to_public(&self) -> PublicQuestion {
        PublicQuestion {
            id: self.id,
            question_type: self.question_type,
            content: self.content.clone(),
            max_points: self.max_points,
            options: self.options.clone(),
            premises: self.premises.clone(),
            pool_order: None,
        }
    }
}

/// DTO for sending a question to the student (excludes the answer key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: QuestionId,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub content: String,
    pub max_points: f64,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub premises: Vec<QuestionOption>,
    /// Persisted right-item order for match questions, if the service kept one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_order: Option<Vec<String>>,
}

impl PublicQuestion {
    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

/// One left→right assignment of a matching answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchPair {
    #[serde(rename = "leftId")]
    pub left_id: String,
    #[serde(rename = "rightId")]
    pub right_id: String,
}

impl MatchPair {
    pub fn new(left_id: impl Into<String>, right_id: impl Into<String>) -> Self {
        Self {
            left_id: left_id.into(),
            right_id: right_id.into(),
        }
    }
}

/// Answer content, one variant per question type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AnswerPayload {
    Single(String),
    Multi(BTreeSet<String>),
    Short(String),
    Essay(String),
    Match(Vec<MatchPair>),
}

impl AnswerPayload {
    pub fn question_type(&self) -> QuestionType {
        match self {
            AnswerPayload::Single(_) => QuestionType::Single,
            AnswerPayload::Multi(_) => QuestionType::Multi,
            AnswerPayload::Short(_) => QuestionType::Short,
            AnswerPayload::Essay(_) => QuestionType::Essay,
            AnswerPayload::Match(_) => QuestionType::Match,
        }
    }

    /// Whether the payload counts as answered on the progress grid.
    pub fn is_answered(&self) -> bool {
        match self {
            AnswerPayload::Single(id) => !id.is_empty(),
            AnswerPayload::Multi(ids) => !ids.is_empty(),
            AnswerPayload::Short(text) | AnswerPayload::Essay(text) => !text.trim().is_empty(),
            AnswerPayload::Match(pairs) => !pairs.is_empty(),
        }
    }

    /// Check that this payload fits the question it is submitted for.
    pub fn validate_for(&self, question: &PublicQuestion) -> Result<(), ValidationError> {
        if self.question_type() != question.question_type {
            return Err(ValidationError::PayloadMismatch {
                question_id: question.id,
                expected: question.question_type,
                actual: self.question_type(),
            });
        }
        let unknown = |option_id: &str| ValidationError::UnknownOption {
            question_id: question.id,
            option_id: option_id.to_string(),
        };
        match self {
            AnswerPayload::Single(id) if !question.has_option(id) => Err(unknown(id)),
            AnswerPayload::Multi(ids) => match ids.iter().find(|id| !question.has_option(id)) {
                Some(id) => Err(unknown(id)),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

/// A stored answer row. The doubt flag is independent of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: QuestionId,
    pub student_id: StudentId,
    #[serde(default)]
    pub payload: Option<AnswerPayload>,
    #[serde(default)]
    pub is_doubt: bool,
}

/// A single write to the remote answer store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerUpdate {
    Payload {
        question_id: QuestionId,
        payload: AnswerPayload,
    },
    Doubt {
        question_id: QuestionId,
        is_doubt: bool,
    },
}

impl AnswerUpdate {
    pub fn question_id(&self) -> QuestionId {
        match self {
            AnswerUpdate::Payload { question_id, .. } | AnswerUpdate::Doubt { question_id, .. } => {
                *question_id
            }
        }
    }
}

/// Points awarded to one student for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub question_id: QuestionId,
    pub student_id: StudentId,
    pub points: f64,
    /// Written component of a composite score.
    #[serde(default)]
    pub written: Option<f64>,
    /// Skill component of a composite score.
    #[serde(default)]
    pub skill: Option<f64>,
}

/// A row of the grader's attendance list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: StudentId,
    #[serde(default)]
    pub student_name: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
}

/// What the student view receives when a session is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPaper {
    pub exam: Exam,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    /// Questions in display order (already shuffled by the service if requested).
    pub questions: Vec<PublicQuestion>,
}
