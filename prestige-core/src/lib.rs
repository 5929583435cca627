//! Daily story generator for a static magazine site.
//!
//! This crate provides:
//! - An editor/writer conversation driven against Claude
//! - Assembly of the accepted story into an HTML page
//! - Publication into a static site with a git commit-and-push hook
//! - A run state machine and exit-code mapping for schedulers
//!
//! # Quick Start
//!
//! ```ignore
//! use prestige_core::{AnthropicModel, Config, NoopHook, Pipeline, RunContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let model = AnthropicModel::from_config(&config)?;
//!     let pipeline = Pipeline::new(&config, model, Box::new(NoopHook))?;
//!
//!     let today = chrono::Local::now().date_naive();
//!     let report = pipeline.run(&RunContext::new(today)).await?;
//!     println!("Published {}", report.title);
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod config;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod publisher;
pub mod retry;
pub mod run;
pub mod story;
pub mod testing;

// Primary public API
pub use assembler::{Assembler, Document, FormatError};
pub use config::{Config, ConfigError};
pub use model::{AnthropicModel, Completion, ModelError, StoryModel, TurnRequest};
pub use orchestrator::{GenerationError, Manuscript, Orchestrator};
pub use pipeline::{Pipeline, RunContext, RunError, RunFailure, RunReport};
pub use prompts::{PromptBuilder, RolePrompt, StoryParams};
pub use publisher::{
    ContentStore, GitHook, HookError, NoopHook, PublishError, PublishedArtifact, Publisher,
    SiteHook,
};
pub use retry::{RetryPolicy, Retryable};
pub use run::{RunState, RunTracker, StateError, Transition};
pub use story::{Role, Story, StoryStatus, Transcript, Turn, TurnKind};
pub use testing::{RecordingHook, ScriptedModel};
