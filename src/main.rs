use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use jobs_etl::app::transform_use_case::gate_failure;
use jobs_etl::app::{RunSummary, TransformUseCase};
use jobs_etl::config::{PipelineConfig, DEFAULT_CONFIG_PATH};
use jobs_etl::infra::{build_extractors, build_loader, SqliteExecutionLog};
use jobs_etl::observability::{self, metrics};
use jobs_etl::pipeline::processing::{QualityReport, QualityScorer};
use jobs_etl::pipeline::BranchTask;

#[derive(Parser)]
#[command(name = "jobs_etl")]
#[command(about = "Clean, validate and quality-gate job listings before loading them")]
#[command(version)]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print Prometheus metrics to stdout when the command finishes
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, transform, gate and load every configured source
    Run,
    /// Extract and score without loading
    Score {
        /// Emit the quality report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse and validate the configuration, then exit
    CheckConfig,
}

fn print_report(report: &QualityReport) {
    println!("\n📊 Quality report");
    for (dimension, score) in report.dimension_scores() {
        let marker = if report.failing_dimensions.contains(&dimension) { "✗" } else { " " };
        println!("   {} {:<12} {:.4}", marker, dimension.as_str(), score);
    }
    println!("     {:<12} {:.4} (threshold {:.2})", "overall", report.overall_score, report.threshold);
    println!(
        "   Records: {} scored, {} before dedup, {} duplicates removed",
        report.record_count, report.original_count, report.duplicates_removed
    );
}

fn print_summary(summary: &RunSummary) {
    println!("\n✅ Run {} finished: {}", summary.run_id, summary.status);
    for branch in &summary.branches {
        println!(
            "   {}: {} extracted, {} duplicates, {} cast failures, {} failed validation",
            branch.source, branch.extracted, branch.duplicates_removed, branch.cast_failures, branch.failed_validation
        );
    }
    if let Some(load) = summary.load {
        println!(
            "   Loaded: {} inserted, {} updated, {} skipped",
            load.inserted, load.updated, load.skipped
        );
    }
    if let Some(report) = &summary.report {
        print_report(report);
    }
}

fn build_use_case(config: &PipelineConfig) -> anyhow::Result<TransformUseCase> {
    let extractors = build_extractors(&config.sources).context("failed to build extractors")?;
    let loader = build_loader(&config.load);
    let mut use_case = TransformUseCase::new(config, extractors, loader)?;
    if let Some(path) = &config.load.execution_log {
        let log = SqliteExecutionLog::open(path)
            .with_context(|| format!("failed to open execution log at {}", path.display()))?;
        use_case = use_case.with_execution_log(Arc::new(log));
    }
    Ok(use_case)
}

async fn run(config_path: &Path, config: PipelineConfig, command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::CheckConfig => {
            // Compiles rule patterns and casts field defaults
            BranchTask::from_config(&config)?;
            QualityScorer::new(&config.fields, &config.quality)?;
            println!(
                "✅ {} is valid: {} fields, {} rules, {} sources",
                config_path.display(),
                config.fields.len(),
                config.rules.len(),
                config.sources.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Score { json } => {
            let assessment = build_use_case(&config)?.assess().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&assessment.report)?);
            } else {
                print_report(&assessment.report);
            }
            Ok(if assessment.report.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Commands::Run => match build_use_case(&config)?.run().await {
            Ok(summary) => {
                print_summary(&summary);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => match gate_failure(&e) {
                Some(failure) => {
                    error!(failing = ?failure.report.failing_dimension_names(), "Run halted by quality gate");
                    println!("\n⛔ Run halted: {}", failure);
                    print_report(&failure.report);
                    Ok(ExitCode::from(2))
                }
                None => Err(e.into()),
            },
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Logging settings live in the config file, so it is read under a console-only subscriber
    let config = tracing::subscriber::with_default(observability::logging::bootstrap_subscriber(), || {
        PipelineConfig::load(&cli.config)
    });
    let logging = config.as_ref().map(|c| c.logging.clone()).unwrap_or_default();
    let _guard = observability::init_logging(&logging);

    if let Err(e) = metrics::init() {
        error!("Failed to initialize metrics: {}", e);
    }
    info!(config = %cli.config.display(), "jobs_etl starting");

    let outcome = match config {
        Ok(config) => run(&cli.config, config, cli.command).await,
        Err(e) => Err(anyhow::Error::new(e).context(format!("invalid configuration {}", cli.config.display()))),
    };
    let code = match outcome {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    };

    if cli.print_metrics {
        if let Some(rendered) = metrics::render() {
            println!("{}", rendered);
        }
    }
    code
}
