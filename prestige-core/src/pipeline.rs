//! One daily run, end to end.
//!
//! Prompt building, the editor/writer conversation, assembly and
//! publication happen in sequence under a single [`RunTracker`]. Any error
//! marks the run failed and nothing further happens; the publisher rolls
//! back whatever it had written.

use crate::assembler::{Assembler, Document, FormatError};
use crate::config::{Config, ConfigError};
use crate::model::StoryModel;
use crate::orchestrator::{GenerationError, Orchestrator};
use crate::prompts::{PromptBuilder, StoryParams};
use crate::publisher::{PublishError, PublishedArtifact, Publisher, SiteHook};
use crate::run::{RunState, RunTracker, StateError, Transition};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Per-invocation settings chosen by the caller.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    /// Day the story is written for and filed under.
    pub date: NaiveDate,
    /// Replace a story already published for `date`.
    pub force: bool,
    /// Generate and assemble, but do not publish.
    pub dry_run: bool,
}

impl RunContext {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            date,
            force: false,
            dry_run: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Anything that ends a run early.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Formatting failed: {0}")]
    Format(#[from] FormatError),

    #[error("Publishing failed: {0}")]
    Publish(#[from] PublishError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl RunError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) => 2,
            RunError::Generation(_) => 3,
            RunError::Format(_) => 4,
            RunError::Publish(PublishError::Conflict { .. }) => 5,
            RunError::Publish(PublishError::Io { .. } | PublishError::Hook(_)) => 6,
            RunError::Publish(PublishError::Status(_)) | RunError::State(_) => 1,
        }
    }
}

/// A run that ended early, and how far it got.
#[derive(Debug, Error)]
#[error("Run failed while {stage}: {error}")]
pub struct RunFailure {
    pub error: RunError,
    /// Where the run ended up. Always [`RunState::Failed`].
    pub state: RunState,
    /// The stage in progress when the error hit.
    pub stage: RunState,
    pub history: Vec<Transition>,
}

impl RunFailure {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

impl From<RunFailure> for RunError {
    fn from(failure: RunFailure) -> Self {
        failure.error
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub state: RunState,
    pub title: String,
    pub file_name: String,
    /// Where the story was written; `None` for dry runs.
    pub path: Option<PathBuf>,
    pub turns: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub estimated_cost_usd: f64,
    /// The assembled page, kept for dry runs.
    #[serde(skip)]
    pub preview: Option<Document>,
    #[serde(skip)]
    pub artifact: Option<PublishedArtifact>,
}

impl RunReport {
    pub fn total_tokens(&self) -> usize {
        self.input_tokens + self.output_tokens
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// The assembled daily pipeline.
pub struct Pipeline<M> {
    orchestrator: Orchestrator<M>,
    assembler: Assembler,
    publisher: Publisher,
    theme_hints: Vec<String>,
    avoid_recent: usize,
    cost_per_token: f64,
}

impl<M: StoryModel> Pipeline<M> {
    /// Wire every stage from `config`.
    pub fn new(config: &Config, model: M, hook: Box<dyn SiteHook>) -> Result<Self, ConfigError> {
        if config.site.output_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingOutputPath);
        }
        let prompts = PromptBuilder::from_config(config)?;
        let orchestrator = Orchestrator::new(model, prompts)
            .with_retry_policy(config.model_retry_policy())
            .with_edit_passes(config.story.edit_passes);

        Ok(Self {
            orchestrator,
            assembler: Assembler::from_config(config)?,
            publisher: Publisher::from_config(config, hook),
            theme_hints: config.story.theme_hints.clone(),
            avoid_recent: config.story.avoid_recent,
            cost_per_token: config.cost_per_token,
        })
    }

    pub fn model(&self) -> &M {
        self.orchestrator.model()
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Run the whole pipeline for `ctx.date`.
    ///
    /// On error the run is marked [`RunState::Failed`] and the failure
    /// carries the tracker's history.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunReport, RunFailure> {
        let span = info_span!("run", run_id = %ctx.run_id, date = %ctx.date);
        async {
            let mut tracker = RunTracker::new();
            self.run_stages(ctx, &mut tracker).await.map_err(|error| {
                let stage = tracker.state();
                tracker.fail();
                warn!(error = %error, %stage, "Run failed");
                RunFailure {
                    error,
                    state: tracker.state(),
                    stage,
                    history: tracker.history().to_vec(),
                }
            })
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        ctx: &RunContext,
        tracker: &mut RunTracker,
    ) -> Result<RunReport, RunError> {
        // Checked up front so a doomed run costs no tokens. The publisher
        // checks again before writing.
        if !ctx.force && !ctx.dry_run {
            self.publisher.check_conflict(ctx.date)?;
        }

        tracker.advance(RunState::Generating)?;
        let params = StoryParams::new(ctx.date)
            .with_theme_hints(self.theme_hints.clone())
            .with_avoid_titles(self.recent_titles());
        let manuscript = self.orchestrator.run(&params).await?;

        let document = self.assembler.assemble(&manuscript)?;
        tracker.advance(RunState::Assembled)?;

        let usage = manuscript.transcript.total_usage();
        let mut report = RunReport {
            run_id: ctx.run_id,
            date: ctx.date,
            state: tracker.state(),
            title: document.story.title().to_string(),
            file_name: document.file_name.clone(),
            path: None,
            turns: manuscript.transcript.len(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            estimated_cost_usd: usage.total() as f64 * self.cost_per_token,
            preview: None,
            artifact: None,
        };

        if ctx.dry_run {
            info!(title = %report.title, "Dry run, skipping publish");
            report.preview = Some(document);
            return Ok(report);
        }

        tracker.advance(RunState::Publishing)?;
        let artifact = self.publisher.publish(document, ctx.force).await?;
        tracker.advance(RunState::Published)?;

        info!(
            title = %report.title,
            path = %artifact.path().display(),
            tokens = report.total_tokens(),
            cost_usd = report.estimated_cost_usd,
            "Run complete"
        );

        report.state = tracker.state();
        report.path = Some(artifact.path().to_path_buf());
        report.artifact = Some(artifact);
        Ok(report)
    }

    fn recent_titles(&self) -> Vec<String> {
        if self.avoid_recent == 0 {
            return Vec::new();
        }
        self.publisher
            .recent_titles(self.avoid_recent)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Could not read recent stories");
                Vec::new()
            })
    }
}
