//! Editor/writer turn sequencing.
//!
//! A run is a fixed chain of typed calls: the editor pitches ideas, the
//! writer drafts, the editor revises `edit_passes` times, and the last
//! revision is accepted. Each turn waits for the previous one.

use crate::model::{ModelError, StoryModel, TurnRequest};
use crate::prompts::{PromptBuilder, RolePrompt, StoryParams};
use crate::retry::{with_retry, RetryPolicy};
use crate::story::{Story, StoryStatusError, Transcript, TurnKind, TurnOrderError};
use thiserror::Error;
use tracing::{info, instrument};

/// Errors that stop generation. Nothing is published after one of these.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{turn} turn failed after {attempts} attempt(s): {source}")]
    ModelFailed {
        turn: TurnKind,
        attempts: u32,
        #[source]
        source: ModelError,
    },

    #[error(transparent)]
    OutOfOrder(#[from] TurnOrderError),

    #[error(transparent)]
    Status(#[from] StoryStatusError),
}

/// Output of a finished conversation: the accepted story and every turn.
#[derive(Debug, Clone)]
pub struct Manuscript {
    pub story: Story,
    pub transcript: Transcript,
}

/// Drives the conversation between the two roles.
pub struct Orchestrator<M> {
    model: M,
    prompts: PromptBuilder,
    retry: RetryPolicy,
    edit_passes: u32,
}

impl<M: StoryModel> Orchestrator<M> {
    pub fn new(model: M, prompts: PromptBuilder) -> Self {
        Self {
            model,
            prompts,
            retry: RetryPolicy::default(),
            edit_passes: 1,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Number of editor revisions. Values below one are raised to one.
    pub fn with_edit_passes(mut self, passes: u32) -> Self {
        self.edit_passes = passes.max(1);
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Run every turn and return the accepted story.
    #[instrument(skip_all, fields(date = %params.date, edit_passes = self.edit_passes))]
    pub async fn run(&self, params: &StoryParams) -> Result<Manuscript, GenerationError> {
        let mut story = Story::draft(params.date);
        let mut transcript = Transcript::new();

        let ideas = self
            .take_turn(&mut transcript, TurnKind::Idea, self.prompts.ideas(params))
            .await?;

        let draft = self
            .take_turn(
                &mut transcript,
                TurnKind::Draft,
                self.prompts.draft(params, &ideas),
            )
            .await?;
        story.revise(draft)?;

        for pass in 1..=self.edit_passes {
            let prompt = self
                .prompts
                .edit(params, &ideas, story.body(), pass, self.edit_passes);
            let revised = self
                .take_turn(&mut transcript, TurnKind::Edit { pass }, prompt)
                .await?;
            story.revise(revised)?;
        }

        story.accept()?;

        let usage = transcript.total_usage();
        info!(
            turns = transcript.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Story accepted"
        );

        Ok(Manuscript { story, transcript })
    }

    async fn take_turn(
        &self,
        transcript: &mut Transcript,
        kind: TurnKind,
        prompt: RolePrompt,
    ) -> Result<String, GenerationError> {
        let expected = transcript.expected_next();
        if kind != expected {
            return Err(TurnOrderError {
                expected,
                actual: kind,
            }
            .into());
        }

        let request = TurnRequest {
            kind,
            system: prompt.system,
            prompt: prompt.user,
        };

        let label = format!("{} turn", kind);
        let completion = with_retry(&self.retry, &label, || self.model.complete(&request))
            .await
            .map_err(|(source, attempts)| GenerationError::ModelFailed {
                turn: kind,
                attempts,
                source,
            })?;

        let turn = transcript.record(kind, request.prompt, completion.text, completion.usage)?;
        info!(
            ordinal = turn.ordinal,
            role = %turn.role,
            turn = %turn.kind,
            chars = turn.text.len(),
            "Turn complete"
        );
        Ok(turn.text.clone())
    }
}
