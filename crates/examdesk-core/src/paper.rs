//! TOML exam paper fixtures.
//!
//! A paper describes one exam, its questions with their answer keys, and the
//! enrolled students. Papers seed the in-memory backend and the CLI.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{
    Exam, Question, QuestionId, QuestionOption, QuestionType, SessionPaper, StudentId,
};
use crate::scoring::MAX_EXAM_POINTS;

/// A student enrolled in a paper's exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledStudent {
    pub id: StudentId,
    #[serde(default)]
    pub name: String,
}

/// A parsed exam paper.
#[derive(Debug, Clone, PartialEq)]
pub struct ExamPaper {
    pub exam: Exam,
    /// Token students must present to enter.
    pub token: String,
    pub questions: Vec<Question>,
    pub students: Vec<EnrolledStudent>,
}

impl ExamPaper {
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn total_points(&self) -> f64 {
        self.questions.iter().map(|q| q.max_points).sum()
    }

    /// The student view: questions without their answer keys.
    pub fn public_paper(&self) -> SessionPaper {
        SessionPaper {
            exam: self.exam.clone(),
            start_at: None,
            end_at: None,
            questions: self.questions.iter().map(Question::to_public).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TomlPaperFile {
    exam: TomlExamHeader,
    #[serde(default)]
    students: Vec<EnrolledStudent>,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlExamHeader {
    id: i64,
    title: String,
    duration_minutes: u32,
    token: String,
    #[serde(default)]
    is_shuffle: bool,
    #[serde(default = "default_true")]
    is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    id: QuestionId,
    #[serde(rename = "type")]
    question_type: String,
    content: String,
    max_points: f64,
    #[serde(default)]
    options: Vec<QuestionOption>,
    #[serde(default)]
    premises: Vec<QuestionOption>,
    #[serde(default)]
    correct: Vec<String>,
}

/// Parse a single paper file.
pub fn parse_paper(path: &Path) -> Result<ExamPaper> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read paper file: {}", path.display()))?;

    parse_paper_str(&content, path)
}

/// Parse a TOML string into an `ExamPaper`.
pub fn parse_paper_str(content: &str, source_path: &Path) -> Result<ExamPaper> {
    let parsed: TomlPaperFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let questions = parsed
        .questions
        .into_iter()
        .map(|q| {
            let question_type: QuestionType = q
                .question_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!("question {}: {}", q.id, e))?;
            Ok(Question {
                id: q.id,
                question_type,
                content: q.content,
                max_points: q.max_points,
                options: q.options,
                premises: q.premises,
                correct_answers: q.correct,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ExamPaper {
        exam: Exam {
            id: parsed.exam.id,
            title: parsed.exam.title,
            duration_minutes: parsed.exam.duration_minutes,
            is_shuffle: parsed.exam.is_shuffle,
            is_active: parsed.exam.is_active,
        },
        token: parsed.exam.token,
        questions,
        students: parsed.students,
    })
}

/// Recursively load all `.toml` papers from a directory.
pub fn load_paper_directory(dir: &Path) -> Result<Vec<ExamPaper>> {
    let mut papers = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            papers.extend(load_paper_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_paper(&path) {
                Ok(paper) => papers.push(paper),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(papers)
}

/// A non-fatal problem found in a paper.
#[derive(Debug, Clone)]
pub struct PaperWarning {
    /// The question concerned, if any.
    pub question_id: Option<QuestionId>,
    pub message: String,
}

impl PaperWarning {
    fn exam(message: impl Into<String>) -> Self {
        Self {
            question_id: None,
            message: message.into(),
        }
    }

    fn question(id: QuestionId, message: impl Into<String>) -> Self {
        Self {
            question_id: Some(id),
            message: message.into(),
        }
    }
}

/// Check a paper for mistakes an author is likely to make.
pub fn validate_paper(paper: &ExamPaper) -> Vec<PaperWarning> {
    let mut warnings = Vec::new();

    if paper.exam.duration_minutes == 0 {
        warnings.push(PaperWarning::exam("duration_minutes is zero"));
    }
    if paper.token.trim().is_empty() {
        warnings.push(PaperWarning::exam("exam token is empty"));
    }
    if paper.questions.is_empty() {
        warnings.push(PaperWarning::exam("paper has no questions"));
    }

    let total = paper.total_points();
    if total > MAX_EXAM_POINTS {
        warnings.push(PaperWarning::exam(format!(
            "max_points sum to {total}, above the {MAX_EXAM_POINTS} point cap"
        )));
    }

    let mut seen_students = HashSet::new();
    for student in &paper.students {
        if !seen_students.insert(student.id) {
            warnings.push(PaperWarning::exam(format!("duplicate student ID: {}", student.id)));
        }
    }

    let mut seen_ids = HashSet::new();
    for q in &paper.questions {
        if !seen_ids.insert(q.id) {
            warnings.push(PaperWarning::question(q.id, format!("duplicate question ID: {}", q.id)));
        }
        if q.content.trim().is_empty() {
            warnings.push(PaperWarning::question(q.id, "content is empty"));
        }
        if !q.max_points.is_finite() || q.max_points <= 0.0 {
            warnings.push(PaperWarning::question(q.id, "max_points must be positive"));
        }

        match q.question_type {
            QuestionType::Single | QuestionType::Multi => {
                if q.correct_answers.is_empty() {
                    warnings.push(PaperWarning::question(q.id, "objective question has no correct answer"));
                }
                if q.question_type == QuestionType::Single && q.correct_answers.len() > 1 {
                    warnings.push(PaperWarning::question(
                        q.id,
                        "single-choice question lists more than one correct answer",
                    ));
                }
                for answer in &q.correct_answers {
                    if !q.options.iter().any(|o| &o.id == answer) {
                        warnings.push(PaperWarning::question(
                            q.id,
                            format!("correct answer '{answer}' is not an option"),
                        ));
                    }
                }
            }
            QuestionType::Match => {
                if q.premises.is_empty() {
                    warnings.push(PaperWarning::question(q.id, "match question has no premises"));
                }
                if q.options.len() < q.premises.len() {
                    warnings.push(PaperWarning::question(
                        q.id,
                        "match question has fewer right items than premises",
                    ));
                }
            }
            QuestionType::Short | QuestionType::Essay => {
                if !q.correct_answers.is_empty() {
                    warnings.push(PaperWarning::question(
                        q.id,
                        "correct answers are ignored for manually graded questions",
                    ));
                }
            }
        }
    }

    warnings
}
