//! Grade reports with JSON persistence.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Exam, ExamId, StudentId};
use crate::scoring::{QuestionScore, ScoreSnapshot};

/// Summary of an exam (without its questions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSummary {
    pub id: ExamId,
    pub title: String,
    pub duration_minutes: u32,
}

impl From<&Exam> for ExamSummary {
    fn from(exam: &Exam) -> Self {
        Self {
            id: exam.id,
            title: exam.title.clone(),
            duration_minutes: exam.duration_minutes,
        }
    }
}

/// One student's graded result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentGrade {
    pub student_id: StudentId,
    #[serde(default)]
    pub student_name: String,
    pub questions: Vec<QuestionScore>,
    pub objective_total: f64,
    pub manual_total: f64,
    /// `min(100, sum of question points)`.
    pub total: f64,
}

impl StudentGrade {
    pub fn from_snapshot(snapshot: ScoreSnapshot, student_name: impl Into<String>) -> Self {
        Self {
            student_id: snapshot.student_id,
            student_name: student_name.into(),
            questions: snapshot.questions,
            objective_total: snapshot.objective_total,
            manual_total: snapshot.manual_total,
            total: snapshot.total,
        }
    }
}

/// Grades of every student for one exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeReport {
    /// Unique report identifier.
    pub id: Uuid,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
    pub exam: ExamSummary,
    pub grades: Vec<StudentGrade>,
}

impl GradeReport {
    pub fn new(exam: &Exam, grades: Vec<StudentGrade>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            exam: ExamSummary::from(exam),
            grades,
        }
    }

    pub fn grade(&self, student_id: StudentId) -> Option<&StudentGrade> {
        self.grades.iter().find(|g| g.student_id == student_id)
    }

    /// Mean total across students, `None` for an empty report.
    pub fn mean_total(&self) -> Option<f64> {
        if self.grades.is_empty() {
            return None;
        }
        Some(self.grades.iter().map(|g| g.total).sum::<f64>() / self.grades.len() as f64)
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: GradeReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuestionType;

    fn exam() -> Exam {
        Exam {
            id: 3,
            title: "Final".into(),
            duration_minutes: 60,
            is_shuffle: true,
            is_active: true,
        }
    }

    fn grade(student_id: StudentId, total: f64) -> StudentGrade {
        StudentGrade {
            student_id,
            student_name: format!("student {student_id}"),
            questions: vec![QuestionScore {
                question_id: 1,
                question_type: QuestionType::Essay,
                max_points: 100.0,
                points: Some(total),
                cap: 100.0,
            }],
            objective_total: 0.0,
            manual_total: total,
            total,
        }
    }

    #[test]
    fn saves_and_loads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("final.json");
        let report = GradeReport::new(&exam(), vec![grade(1, 80.0), grade(2, 60.0)]);
        report.save_json(&path).unwrap();

        let loaded = GradeReport::load_json(&path).unwrap();
        assert_eq!(loaded.id, report.id);
        assert_eq!(loaded.exam.title, "Final");
        assert_eq!(loaded.grade(2).map(|g| g.total), Some(60.0));
        assert_eq!(loaded.mean_total(), Some(70.0));
    }

    #[test]
    fn empty_report_has_no_mean() {
        let report = GradeReport::new(&exam(), vec![]);
        assert_eq!(report.mean_total(), None);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = GradeReport::load_json(Path::new("/nonexistent/report.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/report.json"));
    }
}
