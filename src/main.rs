use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

mod config;
mod dashboard;
mod db;
mod error;
mod insights;
mod ledger;
mod models;
mod predict;
mod recommend;
mod report;
mod risk;
mod smoothing;
mod windows;

#[derive(Parser)]
#[command(name = "school-risk-engine")]
#[command(
    about = "Attendance, assessment and payment risk signals for a small school",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    store: config::StoreConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demo school
    Seed,
    /// Narrative insights for one student
    Insights {
        #[arg(long)]
        student: Uuid,
    },
    /// Ranked intervention recommendations for one student
    Recommend {
        #[arg(long)]
        student: Uuid,
    },
    /// Pass-probability forecast for one subject, or every enrolled subject
    Predict {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Composite dropout-risk score
    Dropout {
        #[arg(long)]
        student: Uuid,
    },
    /// Record an intervention with a snapshot of current metrics
    LogIntervention {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        rec_type: String,
        #[arg(long)]
        action: String,
        #[arg(long, default_value = "")]
        note: String,
        #[arg(long)]
        alert: Option<Uuid>,
    },
    /// Judge matured interventions against their snapshots
    Evaluate,
    /// Outcome counts across all logged interventions
    Feedback,
    /// Interventions logged for one student, newest first
    History {
        #[arg(long)]
        student: Uuid,
    },
    /// Full dashboard payload
    Dashboard {
        #[arg(long)]
        json: bool,
    },
    /// Write a markdown report for one student
    Report {
        #[arg(long)]
        student: Uuid,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export the intervention worklist as CSV
    ExportWorklist {
        #[arg(long, default_value = "worklist.csv")]
        out: PathBuf,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let pool = cli.store.connect().await?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Insights { student } => {
            print_json(&insights::get_student_insights(&pool, student).await?)?;
        }
        Commands::Recommend { student } => {
            print_json(&recommend::get_recommendations(&pool, student).await?)?;
        }
        Commands::Predict { student, subject } => match subject {
            Some(subject) => {
                print_json(&predict::predict_pass_probability(&pool, student, &subject).await?)?
            }
            None => print_json(&predict::predict_all_subjects(&pool, student).await?)?,
        },
        Commands::Dropout { student } => {
            print_json(&predict::predict_dropout_risk(&pool, student).await?)?;
        }
        Commands::LogIntervention {
            student,
            rec_type,
            action,
            note,
            alert,
        } => {
            let id = ledger::log_intervention(&pool, student, &rec_type, &action, &note, alert)
                .await
                .context("failed to log intervention")?;
            println!("Logged intervention {id}.");
        }
        Commands::Evaluate => {
            let evaluated = ledger::evaluate_feedback_loops(&pool).await?;
            println!("Evaluated {evaluated} interventions.");
        }
        Commands::Feedback => {
            print_json(&ledger::get_feedback_summary(&pool).await?)?;
        }
        Commands::History { student } => {
            print_json(&ledger::intervention_history(&pool, student).await?)?;
        }
        Commands::Dashboard { json } => {
            let dashboard = dashboard::build_dashboard(&pool).await?;
            if json {
                print_json(&dashboard)?;
            } else {
                println!(
                    "Collection rate {:.1}% for {}; class trend slope {:+.1}/week.",
                    dashboard.revenue.collection_rate,
                    dashboard.revenue.period,
                    dashboard.class_trend.slope
                );
                println!("Worklist:");
                for entry in &dashboard.worklist {
                    println!("- {} (risk {}): {}", entry.name, entry.dropout_score, entry.insight);
                }
                println!(
                    "Feedback: {} improved, {} no change, {} declined, {} pending.",
                    dashboard.feedback.improved,
                    dashboard.feedback.no_change,
                    dashboard.feedback.declined,
                    dashboard.feedback.pending
                );
            }
        }
        Commands::Report { student, out } => {
            let Some(report) = report::load_student_report(&pool, student).await? else {
                println!("No student with id {student}.");
                return Ok(());
            };
            std::fs::write(&out, report::render_markdown(&report))?;
            println!("Report written to {}.", out.display());
        }
        Commands::ExportWorklist { out } => {
            let dashboard = dashboard::build_dashboard(&pool).await?;
            let written = report::write_worklist_csv(&out, &dashboard.worklist)?;
            info!(rows = written, path = %out.display(), "worklist exported");
            println!("Exported {written} students to {}.", out.display());
        }
    }

    Ok(())
}
