//! Harvester CLI
//!
//! Runs one harvest stage (or all of them) against the live upstream and
//! writes the snapshots into the output directory.

use std::path::PathBuf;
use std::sync::Arc;

use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use harvester::{
    error::{AppError, Result},
    models::{Config, parse_years},
    pipeline::{self, Harvest, StageReport},
    services::Signer,
    storage::{LocalStorage, SnapshotStorage},
    utils::http::HttpTransport,
};
use tokio_util::sync::CancellationToken;

/// harvester - admissions data harvester
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Harvests schools, majors, score lines and admission plans"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "harvester.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

/// Settings that override the configuration file.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Directory receiving the snapshots
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Pages of the school listings to request
    #[arg(long, env = "MAX_PAGES", global = true)]
    max_pages: Option<u32>,

    /// Fetch per-school detail records
    #[arg(long, env = "FETCH_DETAIL", global = true, value_parser = BoolishValueParser::new())]
    fetch_detail: Option<bool>,

    /// Fetch the signed enhanced school listing
    #[arg(long, env = "FETCH_ENHANCED", global = true, value_parser = BoolishValueParser::new())]
    fetch_enhanced: Option<bool>,

    /// Only use the first N schools of schools.json
    #[arg(long, env = "SAMPLE_SCHOOLS", global = true)]
    sample_schools: Option<usize>,

    /// Score-line years: "2023-2025", "2025,2024" or one year
    #[arg(long, env = "SCORE_YEARS", global = true)]
    score_years: Option<String>,

    /// Plan years: "2023-2025", "2025,2024" or one year
    #[arg(long, env = "PLAN_YEARS", global = true)]
    plan_years: Option<String>,

    /// Comma-separated province ids to query for plans
    #[arg(long, global = true, value_delimiter = ',')]
    plan_provinces: Vec<String>,

    /// Parallel per-school requests (1-4)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Session cookie sent with every request
    #[arg(long, env = "GAOKAO_COOKIE", global = true, hide_env_values = true)]
    cookie: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut Config) -> Result<()> {
        let harvest = &mut config.harvest;
        if let Some(dir) = self.output_dir {
            config.paths.output_dir = dir;
        }
        if let Some(pages) = self.max_pages {
            harvest.max_pages = pages;
        }
        if let Some(on) = self.fetch_detail {
            harvest.fetch_detail = on;
        }
        if let Some(on) = self.fetch_enhanced {
            harvest.fetch_enhanced = on;
        }
        if self.sample_schools.is_some() {
            harvest.sample_schools = self.sample_schools;
        }
        if let Some(years) = self.score_years {
            harvest.score_years = parse_years(&years)?;
        }
        if let Some(years) = self.plan_years {
            harvest.plan_years = parse_years(&years)?;
        }
        if !self.plan_provinces.is_empty() {
            harvest.plan_province_ids = self.plan_provinces;
        }
        if let Some(n) = self.concurrency {
            harvest.concurrency = n;
        }
        if self.cookie.is_some() {
            config.http.cookie = self.cookie;
        }
        Ok(())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest schools (basic listing, detail, enhanced listing)
    Schools,

    /// Harvest the major catalogue
    Majors,

    /// Harvest score lines for the schools in schools.json
    Scores,

    /// Harvest per-province minimum scores for the schools in schools.json
    SchoolScores,

    /// Harvest admission plans for the schools in schools.json
    Plans,

    /// Run every stage: schools → majors → scores → school-scores → plans
    All,

    /// Validate configuration
    Validate,

    /// Show snapshot info
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel the run on Ctrl-C; in-flight sleeps and requests stop promptly.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling in-flight requests...");
            trigger.cancel();
        }
    });
    token
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("harvester starting...");

    let mut config = if cli.config.exists() {
        let config = Config::load_or_default(&cli.config);
        log::info!("Loaded configuration from {}", cli.config.display());
        config
    } else {
        log::info!("{} not found, using defaults", cli.config.display());
        Config::default()
    };
    cli.overrides.apply(&mut config)?;

    let storage = Arc::new(LocalStorage::new(&config.paths.output_dir));

    match cli.command {
        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            match Signer::from_config(&config.signature)? {
                Some(_) => log::info!("✓ Signature secret configured"),
                None => log::warn!("No signature secret: the enhanced listing is sent unsigned"),
            }
            log::info!("All validations passed!");
            return Ok(());
        }

        Command::Info => {
            show_info(&config, storage.as_ref()).await?;
            return Ok(());
        }

        _ => {}
    }

    config.validate()?;
    let transport = Arc::new(HttpTransport::from_config(&config.http)?);
    let harvest = Harvest::new(config, transport, storage, cancel_on_ctrl_c())?;

    let result = match cli.command {
        Command::Schools => report(Stage::Schools.run(&harvest).await),
        Command::Majors => report(Stage::Majors.run(&harvest).await),
        Command::Scores => report(Stage::Scores.run(&harvest).await),
        Command::SchoolScores => report(Stage::SchoolScores.run(&harvest).await),
        Command::Plans => report(Stage::Plans.run(&harvest).await),
        Command::All => run_all(&harvest).await,
        Command::Validate | Command::Info => Ok(()),
    };

    let stats = harvest.engine().stats();
    log::info!(
        "Requests: {} sent, {} transport retries, {} rate-limit signals, {} failed",
        stats.requests,
        stats.transport_retries,
        stats.rate_limit_signals,
        stats.failures
    );

    result?;
    log::info!("Done!");
    Ok(())
}

/// Log a stage outcome and pass it on.
fn report(result: Result<StageReport>) -> Result<()> {
    match result {
        Ok(report) if report.skipped => {
            log::warn!("{}: skipped", report.stage);
            Ok(())
        }
        Ok(report) => {
            log::info!(
                "✓ {}: {} records saved to {}",
                report.stage,
                report.records,
                report.file
            );
            Ok(())
        }
        Err(e) => {
            log::error!("{}", e);
            Err(e)
        }
    }
}

/// Harvest stages in dependency order.
#[derive(Debug, Clone, Copy)]
enum Stage {
    Schools,
    Majors,
    Scores,
    SchoolScores,
    Plans,
}

impl Stage {
    const ALL: [Stage; 5] = [
        Stage::Schools,
        Stage::Majors,
        Stage::Scores,
        Stage::SchoolScores,
        Stage::Plans,
    ];

    fn name(self) -> &'static str {
        match self {
            Stage::Schools => "schools",
            Stage::Majors => "majors",
            Stage::Scores => "scores",
            Stage::SchoolScores => "school_scores",
            Stage::Plans => "plans",
        }
    }

    async fn run(self, harvest: &Harvest) -> Result<StageReport> {
        match self {
            Stage::Schools => pipeline::run_schools(harvest).await,
            Stage::Majors => pipeline::run_majors(harvest).await,
            Stage::Scores => pipeline::run_scores(harvest).await,
            Stage::SchoolScores => pipeline::run_school_scores(harvest).await,
            Stage::Plans => pipeline::run_plans(harvest).await,
        }
    }
}

/// Every stage in order. A failed stage does not stop later ones unless
/// the run was cancelled.
async fn run_all(harvest: &Harvest) -> Result<()> {
    let mut failed = Vec::new();

    for stage in Stage::ALL {
        if harvest.is_cancelled() {
            failed.push(stage.name());
            continue;
        }
        log::info!("=== Stage: {} ===", stage.name());
        if report(stage.run(harvest).await).is_err() {
            failed.push(stage.name());
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(AppError::stage("all", format!("failed stages: {}", failed.join(", "))))
    }
}

async fn show_info(config: &Config, storage: &dyn SnapshotStorage) -> Result<()> {
    log::info!("Output directory: {}", config.paths.output_dir.display());
    for file in [
        pipeline::SCHOOLS_FILE,
        pipeline::MAJORS_FILE,
        pipeline::SCORES_FILE,
        pipeline::SCHOOL_SCORES_FILE,
        pipeline::PLANS_FILE,
    ] {
        match storage.read_snapshot(file).await {
            Ok(Some(snapshot)) => log::info!(
                "{}: {} records (updated {})",
                file,
                snapshot.count,
                if snapshot.update_time.is_empty() {
                    "unknown"
                } else {
                    snapshot.update_time.as_str()
                }
            ),
            Ok(None) => log::info!("{}: not found", file),
            Err(e) => log::warn!("{}: unreadable ({})", file, e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_run_in_dependency_order() {
        let names: Vec<&str> = Stage::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            ["schools", "majors", "scores", "school_scores", "plans"]
        );
    }
}
