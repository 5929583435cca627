//! Daily entry point for the scheduler.
//!
//! ```bash
//! cargo run -p prestige -- --date 2026-10-19 --dry-run
//! ```
//!
//! Exits 0 on success. Failures exit with the code from
//! [`RunError::exit_code`](prestige_core::RunError::exit_code).

mod cli;

use clap::Parser;
use cli::Cli;
use prestige_core::{
    AnthropicModel, Config, GitHook, NoopHook, Pipeline, RunContext, RunError, SiteHook,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(&cli).await {
        error!(error = %e, "Run failed");
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: &Cli) -> Result<(), RunError> {
    let config = cli.apply(Config::load(cli.config.as_deref())?);
    config.validate()?;

    let model = AnthropicModel::from_config(&config)?;
    let pipeline = Pipeline::new(&config, model, site_hook(&config))?;

    let date = cli.date_or(chrono::Local::now().date_naive());
    let ctx = RunContext::new(date)
        .with_force(cli.force)
        .with_dry_run(cli.dry_run);
    info!(run_id = %ctx.run_id, %date, hook = pipeline.publisher().hook_name(), "Starting run");

    let report = pipeline.run(&ctx).await?;

    if cli.json {
        match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Could not serialize report: {e}"),
        }
    } else if let Some(preview) = &report.preview {
        println!("{}", preview.html);
    } else if let Some(path) = &report.path {
        println!("Published \"{}\" to {}", report.title, path.display());
        println!(
            "Tokens: {} (estimated ${:.4})",
            report.total_tokens(),
            report.estimated_cost_usd
        );
    }
    Ok(())
}

fn site_hook(config: &Config) -> Box<dyn SiteHook> {
    let git = &config.publish.git;
    if git.enabled {
        Box::new(GitHook::from_config(git, config.repo_dir()))
    } else {
        Box::new(NoopHook)
    }
}
