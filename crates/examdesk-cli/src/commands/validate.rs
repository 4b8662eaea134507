//! The `examdesk validate` command.

use std::path::PathBuf;

use anyhow::Result;

use examdesk_core::paper;

pub fn execute(paper_path: PathBuf) -> Result<()> {
    let papers = if paper_path.is_dir() {
        paper::load_paper_directory(&paper_path)?
    } else {
        vec![paper::parse_paper(&paper_path)?]
    };

    let mut total_warnings = 0;

    for p in &papers {
        println!(
            "Paper: {} ({} questions, {} students, {} minutes)",
            p.exam.title,
            p.questions.len(),
            p.students.len(),
            p.exam.duration_minutes
        );

        let warnings = paper::validate_paper(p);
        for w in &warnings {
            let prefix = w
                .question_id
                .map(|id| format!("  [question {id}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if total_warnings == 0 {
        println!("All papers valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
