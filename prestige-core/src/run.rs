//! Run lifecycle.
//!
//! ```text
//! idle -> generating -> assembled -> publishing -> published
//!   \________\_____________\______________\_______-> failed
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Generating,
    Assembled,
    Publishing,
    Published,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Published | RunState::Failed)
    }

    /// The state a successful step leads to.
    fn successor(&self) -> Option<RunState> {
        match self {
            RunState::Idle => Some(RunState::Generating),
            RunState::Generating => Some(RunState::Assembled),
            RunState::Assembled => Some(RunState::Publishing),
            RunState::Publishing => Some(RunState::Published),
            RunState::Published | RunState::Failed => None,
        }
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        if next == RunState::Failed {
            return !self.is_terminal();
        }
        self.successor() == Some(next)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Generating => "generating",
            RunState::Assembled => "assembled",
            RunState::Publishing => "publishing",
            RunState::Published => "published",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An illegal lifecycle transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot move run from {from} to {to}")]
pub struct StateError {
    pub from: RunState,
    pub to: RunState,
}

/// One recorded transition.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

/// Tracks a run through its states.
#[derive(Debug, Clone)]
pub struct RunTracker {
    state: RunState,
    history: Vec<Transition>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn advance(&mut self, to: RunState) -> Result<(), StateError> {
        if !self.state.can_transition_to(to) {
            return Err(StateError {
                from: self.state,
                to,
            });
        }
        debug!(from = %self.state, %to, "Run state");
        self.history.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
        Ok(())
    }

    /// Mark the run failed. Returns false if it had already finished.
    pub fn fail(&mut self) -> bool {
        self.advance(RunState::Failed).is_ok()
    }
}
