//! CLI integration tests using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SAMPLE_PAPER: &str = "../../papers/sample-midterm.toml";

fn examdesk() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("examdesk").unwrap()
}

fn sample_paper() -> std::path::PathBuf {
    std::fs::canonicalize(SAMPLE_PAPER).unwrap()
}

#[test]
fn help_output() {
    examdesk()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exam session engine and grading desk"));
}

#[test]
fn version_output() {
    examdesk()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("examdesk"));
}

#[test]
fn validate_sample_paper() {
    examdesk()
        .arg("validate")
        .arg("--paper")
        .arg(SAMPLE_PAPER)
        .assert()
        .success()
        .stdout(predicate::str::contains("5 questions, 3 students, 90 minutes"))
        .stdout(predicate::str::contains("All papers valid"));
}

#[test]
fn validate_directory() {
    examdesk()
        .arg("validate")
        .arg("--paper")
        .arg("../../papers")
        .assert()
        .success()
        .stdout(predicate::str::contains("Introductory Algebra Midterm"));
}

#[test]
fn validate_reports_warnings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(
        &path,
        r#"
[exam]
id = 1
title = "Broken"
duration_minutes = 0
token = ""

[[questions]]
id = 1
type = "single"
content = "Pick one"
max_points = 120
options = [{ id = "A", text = "a" }]
correct = ["Z"]
"#,
    )
    .unwrap();

    examdesk()
        .arg("validate")
        .arg("--paper")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("duration_minutes is zero"))
        .stdout(predicate::str::contains("[question 1] WARNING"))
        .stdout(predicate::str::contains("warning(s) found"));
}

#[test]
fn validate_nonexistent_file() {
    examdesk()
        .arg("validate")
        .arg("--paper")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    examdesk()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created examdesk.toml"))
        .stdout(predicate::str::contains("Created papers/sample.toml"));

    assert!(dir.path().join("examdesk.toml").exists());
    assert!(dir.path().join("papers/sample.toml").exists());

    examdesk()
        .current_dir(dir.path())
        .arg("validate")
        .arg("--paper")
        .arg("papers/sample.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("All papers valid"));
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();

    examdesk()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    examdesk()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn simulate_sample_session() {
    examdesk()
        .arg("simulate")
        .arg("--paper")
        .arg(SAMPLE_PAPER)
        .assert()
        .success()
        .stdout(predicate::str::contains("Answered 4/5"))
        .stdout(predicate::str::contains("status FINISHED"))
        .stdout(predicate::str::contains("Mean total: 25.0 (1 students)"));
}

#[test]
fn simulate_with_violation() {
    examdesk()
        .arg("simulate")
        .arg("--paper")
        .arg(SAMPLE_PAPER)
        .arg("--student")
        .arg("1002")
        .arg("--violation")
        .assert()
        .success()
        .stderr(predicate::str::contains("Resumed"))
        .stdout(predicate::str::contains("Alan Turing"));
}

#[test]
fn simulate_with_answer_file_and_report() {
    let dir = TempDir::new().unwrap();
    let answers = dir.path().join("answers.json");
    std::fs::write(
        &answers,
        r#"{
            "1": { "type": "single", "value": "A" },
            "5": { "type": "match", "value": [
                { "leftId": "L1", "rightId": "R1" },
                { "leftId": "L2", "rightId": "R2" }
            ] }
        }"#,
    )
    .unwrap();
    let output = dir.path().join("reports");

    examdesk()
        .arg("simulate")
        .arg("--paper")
        .arg(SAMPLE_PAPER)
        .arg("--answers")
        .arg(&answers)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Answered 2/5"))
        .stdout(predicate::str::contains("Mean total: 0.0"));

    let saved: Vec<_> = std::fs::read_dir(&output).unwrap().collect();
    assert_eq!(saved.len(), 1);
}

#[test]
fn simulate_wrong_token() {
    examdesk()
        .arg("simulate")
        .arg("--paper")
        .arg(SAMPLE_PAPER)
        .arg("--token")
        .arg("WRONG")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid exam token"));
}

#[test]
fn simulate_unknown_student() {
    examdesk()
        .arg("simulate")
        .arg("--paper")
        .arg(SAMPLE_PAPER)
        .arg("--student")
        .arg("9")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not enrolled"));
}

fn write_grading_inputs(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let answers = dir.path().join("answers.json");
    std::fs::write(
        &answers,
        r#"[
            { "question_id": 1, "student_id": 1001, "payload": { "type": "single", "value": "B" } },
            { "question_id": 2, "student_id": 1001, "payload": { "type": "multi", "value": ["A", "C"] } },
            { "question_id": 1, "student_id": 1002, "payload": { "type": "single", "value": "A" } },
            { "question_id": 2, "student_id": 1002, "payload": { "type": "multi", "value": ["A"] } }
        ]"#,
    )
    .unwrap();

    let scores = dir.path().join("scores.json");
    std::fs::write(
        &scores,
        r#"[
            { "question_id": 4, "student_id": 1001, "points": 30 },
            { "question_id": 3, "student_id": 1002, "points": 0, "written": 10, "skill": 14 },
            { "question_id": 1, "student_id": 1002, "points": 10 }
        ]"#,
    )
    .unwrap();

    (answers, scores)
}

#[test]
fn grade_answers_with_manual_scores() {
    let dir = TempDir::new().unwrap();
    let (answers, scores) = write_grading_inputs(&dir);
    let output = dir.path().join("out");

    examdesk()
        .arg("grade")
        .arg("--paper")
        .arg(sample_paper())
        .arg("--answers")
        .arg(&answers)
        .arg("--scores")
        .arg(&scores)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Ada Lovelace"))
        .stdout(predicate::str::contains("55.0"))
        .stdout(predicate::str::contains("12.0"))
        .stdout(predicate::str::contains("Mean total: 22.3 (3 students)"))
        .stderr(predicate::str::contains("scored automatically"));

    let saved: Vec<_> = std::fs::read_dir(&output).unwrap().collect();
    assert_eq!(saved.len(), 1);
}

#[test]
fn show_saved_report() {
    let dir = TempDir::new().unwrap();
    let (answers, scores) = write_grading_inputs(&dir);
    let output = dir.path().join("out");

    examdesk()
        .arg("grade")
        .arg("--paper")
        .arg(sample_paper())
        .arg("--answers")
        .arg(&answers)
        .arg("--scores")
        .arg(&scores)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let report = std::fs::read_dir(&output)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();

    examdesk()
        .arg("show")
        .arg("--report")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("Grace Hopper (1003)"));

    let output = examdesk()
        .arg("show")
        .arg("--report")
        .arg(&report)
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["grades"].as_array().unwrap().len(), 3);
}

#[test]
fn show_nonexistent_report() {
    examdesk()
        .arg("show")
        .arg("--report")
        .arg("no_such_report.json")
        .assert()
        .failure();
}

#[test]
fn attendance_from_memory_service() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("examdesk.toml");
    std::fs::write(
        &config,
        format!(
            "[service]\ntype = \"memory\"\npaper = \"{}\"\n",
            sample_paper().display()
        ),
    )
    .unwrap();

    examdesk()
        .arg("attendance")
        .arg("--exam")
        .arg("101")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Grace Hopper"))
        .stdout(predicate::str::contains("NOT_ENTERED"));

    examdesk()
        .arg("attendance")
        .arg("--exam")
        .arg("999")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
