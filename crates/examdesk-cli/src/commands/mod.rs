//! Subcommand implementations.

pub mod attendance;
pub mod grade;
pub mod init;
pub mod show;
pub mod simulate;
pub mod validate;

use comfy_table::{Cell, Table};

use examdesk_core::report::GradeReport;

/// Per-student totals of a grade report.
pub(crate) fn print_grades(report: &GradeReport) {
    let mut table = Table::new();
    table.set_header(vec!["Student", "Name", "Objective", "Manual", "Total"]);

    for grade in &report.grades {
        table.add_row(vec![
            Cell::new(grade.student_id),
            Cell::new(&grade.student_name),
            Cell::new(format!("{:.1}", grade.objective_total)),
            Cell::new(format!("{:.1}", grade.manual_total)),
            Cell::new(format!("{:.1}", grade.total)),
        ]);
    }

    println!("{}: {}", report.exam.id, report.exam.title);
    println!("{table}");
    match report.mean_total() {
        Some(mean) => println!("Mean total: {mean:.1} ({} students)", report.grades.len()),
        None => println!("No students graded."),
    }
}

/// Render an optional point value.
pub(crate) fn points(value: Option<f64>) -> String {
    value.map(|p| format!("{p:.1}")).unwrap_or_else(|| "-".to_string())
}
