//! examdesk CLI — the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "examdesk", version, about = "Exam session engine and grading desk")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate exam paper TOML files
    Validate {
        /// Path to a paper file or directory
        #[arg(long)]
        paper: PathBuf,
    },

    /// Run one student's session against an in-memory service
    Simulate {
        /// Paper to seed the in-memory service with
        #[arg(long)]
        paper: PathBuf,

        /// Student to sit the exam (default: first enrolled student)
        #[arg(long)]
        student: Option<i64>,

        /// Entry token (default: the paper's token)
        #[arg(long)]
        token: Option<String>,

        /// JSON map of question ID to answer payload
        #[arg(long)]
        answers: Option<PathBuf>,

        /// Leave the exam view once and get allowed back in
        #[arg(long)]
        violation: bool,

        /// Directory to save the resulting grade report in
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Grade exported answers against a paper
    Grade {
        /// Paper with the answer keys
        #[arg(long)]
        paper: PathBuf,

        /// JSON list of answer records
        #[arg(long)]
        answers: PathBuf,

        /// JSON list of manual score entries
        #[arg(long)]
        scores: Option<PathBuf>,

        /// Output directory
        #[arg(long, default_value = "./examdesk-reports")]
        output: PathBuf,
    },

    /// Show the attendance list of an exam
    Attendance {
        /// Exam ID
        #[arg(long)]
        exam: i64,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print a saved grade report
    Show {
        /// Report JSON
        #[arg(long)]
        report: PathBuf,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Create starter config and a sample paper
    Init,
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "examdesk=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { paper } => commands::validate::execute(paper),
        Commands::Simulate {
            paper,
            student,
            token,
            answers,
            violation,
            output,
            config,
        } => {
            commands::simulate::execute(commands::simulate::SimulateArgs {
                paper,
                student,
                token,
                answers,
                violation,
                output,
                config,
            })
            .await
        }
        Commands::Grade {
            paper,
            answers,
            scores,
            output,
        } => commands::grade::execute(paper, answers, scores, output),
        Commands::Attendance { exam, config } => commands::attendance::execute(exam, config).await,
        Commands::Show { report, format } => commands::show::execute(report, format),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
