//! The `examdesk attendance` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use comfy_table::{Cell, Table};

use examdesk_client::{create_backend, config::load_config_from};
use examdesk_core::attendance::{is_action_enabled, AttendanceAction};
use examdesk_core::traits::{GraderService, SystemClock};

pub async fn execute(exam_id: i64, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let backend = create_backend(&config.service, Arc::new(SystemClock))?;
    let records = backend.grader().list_attendance(exam_id).await?;

    if records.is_empty() {
        println!("No students enrolled in exam {exam_id}.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Student", "Name", "Status", "Started", "Ended", "Actions"]);

    for record in &records {
        let actions: Vec<String> = [
            AttendanceAction::Allow,
            AttendanceAction::Repeat,
            AttendanceAction::Finish,
        ]
        .into_iter()
        .filter(|a| is_action_enabled(record.status, *a))
        .map(|a| a.to_string())
        .collect();

        table.add_row(vec![
            Cell::new(record.student_id),
            Cell::new(&record.student_name),
            Cell::new(record.status),
            Cell::new(time(record.start_at)),
            Cell::new(time(record.end_at)),
            Cell::new(actions.join(", ")),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn time(at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    at.map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
