//! The `examdesk show` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use examdesk_core::report::GradeReport;

use super::{points, print_grades};

pub fn execute(report_path: PathBuf, format: String) -> Result<()> {
    let report = GradeReport::load_json(&report_path)?;

    match format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_grades(&report);

            for grade in &report.grades {
                let mut table = Table::new();
                table.set_header(vec!["Question", "Type", "Max", "Points"]);
                for q in &grade.questions {
                    table.add_row(vec![
                        Cell::new(q.question_id),
                        Cell::new(q.question_type),
                        Cell::new(format!("{:.1}", q.max_points)),
                        Cell::new(points(q.points)),
                    ]);
                }
                println!("\n{} ({})", grade.student_name, grade.student_id);
                println!("{table}");
            }
        }
    }

    Ok(())
}
