//! Testing utilities for the story pipeline.
//!
//! This module provides tools for integration testing:
//! - `ScriptedModel` for deterministic runs without API calls
//! - `RecordingHook` for observing (and failing) the publish hook
//! - Assertion helpers for transcripts and site contents

use crate::model::{Completion, ModelError, StoryModel, TurnRequest};
use crate::publisher::{HookError, SiteHook};
use crate::story::{Transcript, TurnKind};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type ErrorFactory = Arc<dyn Fn() -> ModelError + Send + Sync>;

/// A model that returns scripted responses in order.
///
/// Clones share the script and the request log, so a test can hand one
/// clone to the pipeline and inspect the other afterwards.
#[derive(Clone)]
pub struct ScriptedModel {
    inner: Arc<Mutex<ScriptState>>,
}

struct ScriptState {
    script: VecDeque<Result<String, ModelError>>,
    /// Used once the script runs dry.
    fallback: Option<ErrorFactory>,
    requests: Vec<TurnRequest>,
    calls: u32,
}

impl ScriptedModel {
    /// Reply with each text in turn.
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// Mix replies and failures.
    pub fn from_results(script: Vec<Result<String, ModelError>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptState {
                script: script.into(),
                fallback: None,
                requests: Vec::new(),
                calls: 0,
            })),
        }
    }

    /// Fail every call with a fresh error from `make`.
    pub fn always_failing<F>(make: F) -> Self
    where
        F: Fn() -> ModelError + Send + Sync + 'static,
    {
        let model = Self::from_results(Vec::new());
        model.state().fallback = Some(Arc::new(make));
        model
    }

    /// Every request received so far, including failed attempts.
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.state().requests.clone()
    }

    pub fn call_count(&self) -> u32 {
        self.state().calls
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StoryModel for ScriptedModel {
    async fn complete(&self, request: &TurnRequest) -> Result<Completion, ModelError> {
        let mut state = self.state();
        state.calls += 1;
        state.requests.push(request.clone());

        match state.script.pop_front() {
            Some(Ok(text)) => Ok(Completion::new(text)),
            Some(Err(e)) => Err(e),
            None => match &state.fallback {
                Some(make) => Err(make()),
                None => Err(ModelError::Api(claude::Error::Api {
                    status: 400,
                    message: format!("script exhausted at {} turn", request.kind),
                })),
            },
        }
    }
}

/// A site hook that records what it was asked to publish.
///
/// The first `failures` calls fail with a hook error.
#[derive(Clone, Default)]
pub struct RecordingHook {
    failures: Arc<AtomicU32>,
    calls: Arc<AtomicU32>,
    reverts: Arc<AtomicU32>,
    published: Arc<Mutex<Vec<(Vec<PathBuf>, String)>>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` publish calls.
    pub fn failing(count: u32) -> Self {
        let hook = Self::default();
        hook.failures.store(count, Ordering::SeqCst);
        hook
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn revert_count(&self) -> u32 {
        self.reverts.load(Ordering::SeqCst)
    }

    /// Changed paths and commit message of each successful call.
    pub fn published(&self) -> Vec<(Vec<PathBuf>, String)> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl SiteHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(&self, changed: &[PathBuf], message: &str) -> Result<(), HookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(HookError::Failed {
                step: "push".to_string(),
                message: "remote rejected".to_string(),
            });
        }

        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((changed.to_vec(), message.to_string()));
        Ok(())
    }

    async fn revert(&self) -> Result<(), HookError> {
        self.reverts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the transcript holds idea, draft, then `edit_passes` edits.
#[track_caller]
pub fn assert_turn_order(transcript: &Transcript, edit_passes: u32) {
    let mut expected = vec![TurnKind::Idea, TurnKind::Draft];
    expected.extend((1..=edit_passes).map(|pass| TurnKind::Edit { pass }));

    let actual: Vec<TurnKind> = transcript.turns().iter().map(|t| t.kind).collect();
    assert_eq!(actual, expected, "Unexpected turn order");

    for (i, turn) in transcript.turns().iter().enumerate() {
        assert_eq!(turn.ordinal, i + 1, "Turn ordinals must be consecutive");
    }
}

/// Story files under `root/stories` whose name starts with the date stamp.
pub fn stories_for(root: &Path, date: NaiveDate) -> Vec<PathBuf> {
    let prefix = format!("{}-", date.format("%Y%m%d"));
    let Ok(entries) = std::fs::read_dir(root.join("stories")) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".html"))
        })
        .collect();
    found.sort();
    found
}

/// Assert exactly one story file exists for the date.
#[track_caller]
pub fn assert_single_story(root: &Path, date: NaiveDate) -> PathBuf {
    let found = stories_for(root, date);
    assert_eq!(
        found.len(),
        1,
        "Expected one story for {date}, found {found:?}"
    );
    found[0].clone()
}

/// Assert the site root holds no files at all.
#[track_caller]
pub fn assert_site_empty(root: &Path) {
    let files = list_files(root);
    assert!(files.is_empty(), "Expected an empty site, found {files:?}");
}

/// Every file under `root`, sorted. Missing roots yield an empty list.
pub fn list_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}
