//! The `examdesk grade` command.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use examdesk_core::model::{Answer, AnswerPayload, QuestionId, ScoreEntry, StudentId};
use examdesk_core::paper::parse_paper;
use examdesk_core::report::{GradeReport, StudentGrade};
use examdesk_core::scoring::{composite_score, ScoreSheet};

use super::print_grades;

pub fn execute(
    paper_path: PathBuf,
    answers_path: PathBuf,
    scores_path: Option<PathBuf>,
    output: PathBuf,
) -> Result<()> {
    let paper = parse_paper(&paper_path)?;
    let answers: Vec<Answer> = load_json(&answers_path, "answers")?;
    let scores: Vec<ScoreEntry> = match &scores_path {
        Some(path) => load_json(path, "scores")?,
        None => Vec::new(),
    };

    let mut by_student: BTreeMap<StudentId, HashMap<QuestionId, AnswerPayload>> = paper
        .students
        .iter()
        .map(|s| (s.id, HashMap::new()))
        .collect();
    for answer in answers {
        let payloads = by_student.entry(answer.student_id).or_default();
        if let Some(payload) = answer.payload {
            payloads.insert(answer.question_id, payload);
        }
    }

    let mut grades = Vec::with_capacity(by_student.len());
    for (student_id, payloads) in &by_student {
        let mut sheet = ScoreSheet::new(*student_id, &paper.questions);
        sheet.score_objective(&paper.questions, payloads);

        for entry in scores.iter().filter(|e| e.student_id == *student_id) {
            let (requested, applied) = if entry.written.is_some() || entry.skill.is_some() {
                (
                    composite_score(&[entry.written, entry.skill]),
                    sheet.set_components(entry.question_id, entry.written, entry.skill),
                )
            } else {
                (
                    Some(entry.points),
                    sheet.set_points(entry.question_id, entry.points).map(Some),
                )
            };
            match (requested, applied) {
                (Some(requested), Ok(Some(points))) if points < requested => eprintln!(
                    "Warning: student {student_id}, question {}: {requested} capped to {points}",
                    entry.question_id
                ),
                (_, Ok(_)) => {}
                (_, Err(e)) => eprintln!("Warning: student {student_id}: {e}"),
            }
        }

        let name = paper
            .students
            .iter()
            .find(|s| s.id == *student_id)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        grades.push(StudentGrade::from_snapshot(sheet.snapshot(), name));
    }

    let report = GradeReport::new(&paper.exam, grades);
    print_grades(&report);

    std::fs::create_dir_all(&output)?;
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H%M%S");
    let path = output.join(format!("grades-{}-{timestamp}.json", paper.exam.id));
    report.save_json(&path)?;
    eprintln!("Report saved to: {}", path.display());

    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {what}: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {what} JSON"))
}
