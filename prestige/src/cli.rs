//! Command-line arguments.

use chrono::NaiveDate;
use clap::Parser;
use prestige_core::Config;
use std::path::PathBuf;

/// Write, assemble and publish the day's story.
#[derive(Parser, Debug)]
#[command(name = "prestige")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Date to write for (defaults to today, local time)
    #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date)]
    pub date: Option<NaiveDate>,

    /// Configuration file (defaults to ./prestige.toml when present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Site root to publish into
    #[arg(long, value_name = "PATH")]
    pub site: Option<PathBuf>,

    /// Replace a story already published for the date
    #[arg(long)]
    pub force: bool,

    /// Generate and assemble, then print the page instead of publishing
    #[arg(long)]
    pub dry_run: bool,

    /// Commit but do not push
    #[arg(long)]
    pub no_push: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply flag overrides on top of the loaded configuration.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(site) = &self.site {
            config = config.with_output_path(site);
        }
        if self.no_push {
            config = config.with_push(false);
        }
        config
    }

    pub fn date_or(&self, today: NaiveDate) -> NaiveDate {
        self.date.unwrap_or(today)
    }

    /// Default filter directive when `RUST_LOG` is unset.
    pub fn log_directive(&self) -> &'static str {
        if self.verbose {
            "prestige=debug,prestige_core=debug,claude=debug"
        } else {
            "prestige=info,prestige_core=info,claude=warn"
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("prestige").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert!(cli.date.is_none());
        assert!(!cli.force && !cli.dry_run && !cli.no_push && !cli.verbose);

        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(cli.date_or(today), today);
    }

    #[test]
    fn test_date_flag() {
        let cli = parse(&["--date", "2026-01-02", "--force", "-v"]);
        assert_eq!(cli.date, NaiveDate::from_ymd_opt(2026, 1, 2));
        assert!(cli.force);
        assert!(cli.log_directive().contains("debug"));
    }

    #[test]
    fn test_bad_date_rejected() {
        let result = Cli::try_parse_from(["prestige", "--date", "19/10/2026"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_applied() {
        let cli = parse(&["--site", "/tmp/site", "--no-push"]);
        let config = cli.apply(Config::default().with_git(true).with_push(true));
        assert_eq!(config.site.output_path, PathBuf::from("/tmp/site"));
        assert!(!config.publish.git.push);
        assert!(config.publish.git.enabled);
    }
}
