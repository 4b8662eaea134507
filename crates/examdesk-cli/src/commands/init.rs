//! The `examdesk init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("examdesk.toml").exists() {
        println!("examdesk.toml already exists, skipping.");
    } else {
        std::fs::write("examdesk.toml", SAMPLE_CONFIG)?;
        println!("Created examdesk.toml");
    }

    std::fs::create_dir_all("papers")?;
    let paper_path = std::path::Path::new("papers/sample.toml");
    if paper_path.exists() {
        println!("papers/sample.toml already exists, skipping.");
    } else {
        std::fs::write(paper_path, SAMPLE_PAPER)?;
        println!("Created papers/sample.toml");
    }

    println!("\nNext steps:");
    println!("  1. Run: examdesk validate --paper papers/sample.toml");
    println!("  2. Run: examdesk simulate --paper papers/sample.toml");
    println!("  3. Point [service] in examdesk.toml at your exam server");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# examdesk configuration

quiet_period_ms = 1000
tick_interval_ms = 1000
poll_interval_secs = 5
output_dir = "./examdesk-reports"

[service]
type = "memory"
paper = "papers/sample.toml"

# [service]
# type = "http"
# base_url = "https://exams.example.edu"
# api_token = "${EXAMDESK_API_TOKEN}"
# timeout_secs = 30
"#;

const SAMPLE_PAPER: &str = r#"[exam]
id = 1
title = "Sample Quiz"
duration_minutes = 30
token = "SAMPLE"

[[students]]
id = 1
name = "Sample Student"

[[questions]]
id = 1
type = "single"
content = "What is 6 x 7?"
max_points = 40
options = [{ id = "A", text = "42" }, { id = "B", text = "48" }]
correct = ["A"]

[[questions]]
id = 2
type = "essay"
content = "Describe how you checked your answer to question 1."
max_points = 60
"#;
