//! The `examdesk simulate` command.
//!
//! Drives a real [`SessionController`] against an in-memory service seeded
//! from a paper, then grades the result on a [`GradingDesk`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use examdesk_client::config::load_config_from;
use examdesk_client::InMemoryBackend;
use examdesk_core::controller::{SessionConfig, SessionController, SessionSnapshot};
use examdesk_core::grading::GradingDesk;
use examdesk_core::model::{AnswerPayload, QuestionId, QuestionType};
use examdesk_core::paper::{parse_paper, validate_paper, ExamPaper};
use examdesk_core::report::{GradeReport, StudentGrade};
use examdesk_core::scoring::ScoreSnapshot;
use examdesk_core::traits::{Clock, GraderService, SystemClock};

use super::{points, print_grades};

pub struct SimulateArgs {
    pub paper: PathBuf,
    pub student: Option<i64>,
    pub token: Option<String>,
    pub answers: Option<PathBuf>,
    pub violation: bool,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

pub async fn execute(args: SimulateArgs) -> Result<()> {
    let config = load_config_from(args.config.as_deref())?;
    let paper = parse_paper(&args.paper)?;
    for w in validate_paper(&paper) {
        eprintln!("Warning: {}", w.message);
    }

    let student = match args.student {
        Some(id) => paper
            .students
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("student {id} is not enrolled in exam {}", paper.exam.id))?,
        None => paper
            .students
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("paper has no enrolled students"))?,
    };

    let answers: HashMap<QuestionId, AnswerPayload> = match &args.answers {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read answers: {}", path.display()))?;
            serde_json::from_str(&content).context("failed to parse answers JSON")?
        }
        None => demo_answers(&paper),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backend = InMemoryBackend::new(paper.clone(), Arc::clone(&clock));
    let session_config = SessionConfig {
        shuffle_seed: config.shuffle_seed.or(Some(student.id as u64)),
        ..config.session_config()
    };
    let controller = SessionController::new(
        paper.exam.id,
        backend.as_student(student.id),
        clock,
        session_config,
    );

    let token = args.token.unwrap_or_else(|| paper.token.clone());
    controller
        .enter(&token)
        .await
        .context("failed to enter exam")?;
    eprintln!(
        "  Entered: {} :: {} ({} questions, {}s remaining)",
        student.name,
        paper.exam.title,
        controller.questions().len(),
        controller.remaining()
    );

    if args.violation {
        controller.mark_violation().await?;
        eprintln!("  Violation: {} left the exam view", student.name);
        backend.allow_student(paper.exam.id, student.id).await?;
        controller.refresh_status().await?;
        controller.resume().await?;
        eprintln!("  Resumed: allowed back in by a grader");
    }

    for question in controller.questions() {
        let Some(payload) = answers.get(&question.id) else {
            continue;
        };
        let result = match payload {
            AnswerPayload::Match(pairs) => {
                let mut result = Ok(());
                for pair in pairs {
                    if let Err(e) = controller
                        .assign_match(question.id, &pair.left_id, &pair.right_id)
                        .await
                    {
                        result = Err(e);
                        break;
                    }
                }
                result
            }
            other => controller.answer(question.id, other.clone()).await.map(|_| ()),
        };
        if let Err(e) = result {
            eprintln!("  Warning: question {}: {e}", question.id);
        }
    }

    let outcome = controller.finish().await.context("failed to finish exam")?;
    let snapshot = controller.snapshot();
    controller.teardown();
    eprintln!("  Finished: status {}", outcome.status());

    print_progress(&snapshot);

    let mut desk = GradingDesk::new(
        paper.exam.id,
        paper.questions.clone(),
        backend.clone() as Arc<dyn GraderService>,
    );
    let scores = desk.open_sheet(student.id).await?.snapshot();
    print_scores(&scores);

    let report = GradeReport::new(
        &paper.exam,
        vec![StudentGrade::from_snapshot(scores, student.name.clone())],
    );
    print_grades(&report);

    if let Some(output) = args.output {
        std::fs::create_dir_all(&output)?;
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H%M%S");
        let path = output.join(format!("simulation-{}-{timestamp}.json", student.id));
        report.save_json(&path)?;
        eprintln!("Report saved to: {}", path.display());
    }

    Ok(())
}

/// A student who knows every objective key and writes something for
/// every open question. Matching questions are left blank.
fn demo_answers(paper: &ExamPaper) -> HashMap<QuestionId, AnswerPayload> {
    paper
        .questions
        .iter()
        .filter_map(|q| {
            let payload = match q.question_type {
                QuestionType::Single => AnswerPayload::Single(q.correct_answers.first()?.clone()),
                QuestionType::Multi => {
                    AnswerPayload::Multi(q.correct_answers.iter().cloned().collect())
                }
                QuestionType::Short => AnswerPayload::Short("simulated answer".into()),
                QuestionType::Essay => AnswerPayload::Essay("simulated answer".into()),
                QuestionType::Match => return None,
            };
            Some((q.id, payload))
        })
        .collect()
}

fn print_progress(snapshot: &SessionSnapshot) {
    let mut table = Table::new();
    table.set_header(vec!["#", "Question", "Type", "Answered", "Doubt"]);

    for cell in &snapshot.progress {
        table.add_row(vec![
            Cell::new(cell.index + 1),
            Cell::new(cell.question_id),
            Cell::new(cell.question_type),
            Cell::new(if cell.answered { "yes" } else { "no" }),
            Cell::new(if cell.doubt { "?" } else { "" }),
        ]);
    }

    println!("{table}");
    println!(
        "Answered {}/{} ({} marked doubtful), status {}",
        snapshot.answered,
        snapshot.progress.len(),
        snapshot.doubtful,
        snapshot.status
    );
}

fn print_scores(scores: &ScoreSnapshot) {
    let mut table = Table::new();
    table.set_header(vec!["Question", "Type", "Max", "Points", "Cap"]);

    for q in &scores.questions {
        table.add_row(vec![
            Cell::new(q.question_id),
            Cell::new(q.question_type),
            Cell::new(format!("{:.1}", q.max_points)),
            Cell::new(points(q.points)),
            Cell::new(format!("{:.1}", q.cap)),
        ]);
    }

    println!("{table}");
}
