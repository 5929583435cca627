//! End-to-end runs against a scripted model and a temporary site.

use chrono::NaiveDate;
use prestige_core::testing::{assert_single_story, assert_site_empty, list_files, stories_for};
use prestige_core::{
    Config, ModelError, Pipeline, PublishError, RecordingHook, RunContext, RunError, RunState,
    ScriptedModel, StoryStatus, TurnKind,
};
use std::path::Path;
use tempfile::TempDir;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

fn config(root: &Path) -> Config {
    Config::default()
        .with_api_key("sk-test")
        .with_output_path(root)
        .without_backoff()
}

fn pipeline(root: &Path, model: ScriptedModel, hook: RecordingHook) -> Pipeline<ScriptedModel> {
    Pipeline::new(&config(root), model, Box::new(hook)).unwrap()
}

fn gala_model() -> ScriptedModel {
    ScriptedModel::new(["Idea: a gala", "Draft: ...", "Edit: ...(final)"])
}

fn overloaded() -> ModelError {
    ModelError::Api(claude::Error::Api {
        status: 529,
        message: "Overloaded".into(),
    })
}

#[tokio::test]
async fn test_minimal_daily_run() {
    let dir = TempDir::new().unwrap();
    let model = gala_model();
    let hook = RecordingHook::new();

    let report = pipeline(dir.path(), model.clone(), hook.clone())
        .run(&RunContext::new(day()))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Published);
    assert_eq!(report.title, "Idea: a gala");
    assert_eq!(report.file_name, "20261019-idea-a-gala.html");
    assert_eq!(report.turns, 3);

    let artifact = report.artifact.as_ref().unwrap();
    assert_eq!(artifact.story().status(), StoryStatus::Published);
    assert_eq!(artifact.story().slug(), "idea-a-gala");
    assert_eq!(artifact.story().body(), "Edit: ...(final)");
    assert_eq!(artifact.date(), day());

    let path = assert_single_story(dir.path(), day());
    assert_eq!(report.path.as_deref(), Some(path.as_path()));
    let html = std::fs::read_to_string(&path).unwrap();
    assert!(html.contains("Idea: a gala"));
    assert!(html.contains("Edit: ...(final)"));

    assert_eq!(hook.published().len(), 1);
}

#[tokio::test]
async fn test_turns_run_in_fixed_order() {
    let dir = TempDir::new().unwrap();
    let model = ScriptedModel::new(["Idea: a gala", "Draft: ...", "Edit one", "Edit two"]);
    let config = config(dir.path()).with_edit_passes(2);
    let pipeline = Pipeline::new(&config, model.clone(), Box::new(RecordingHook::new())).unwrap();

    pipeline.run(&RunContext::new(day())).await.unwrap();

    let kinds: Vec<TurnKind> = model.requests().iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TurnKind::Idea,
            TurnKind::Draft,
            TurnKind::Edit { pass: 1 },
            TurnKind::Edit { pass: 2 },
        ]
    );
    let requests = model.requests();
    assert!(requests[3].prompt.contains("Edit one"));
}

#[tokio::test]
async fn test_rerun_same_date_conflicts_without_writing() {
    let dir = TempDir::new().unwrap();
    pipeline(dir.path(), gala_model(), RecordingHook::new())
        .run(&RunContext::new(day()))
        .await
        .unwrap();
    let before: Vec<_> = list_files(dir.path())
        .into_iter()
        .map(|p| (p.clone(), std::fs::read(&p).unwrap()))
        .collect();

    let model = gala_model();
    let hook = RecordingHook::new();
    let err = pipeline(dir.path(), model.clone(), hook.clone())
        .run(&RunContext::new(day()))
        .await
        .unwrap_err();

    assert!(matches!(
        err.error,
        RunError::Publish(PublishError::Conflict { .. })
    ));
    assert_eq!(err.exit_code(), 5);
    assert_eq!(err.state, RunState::Failed);
    assert_eq!(err.stage, RunState::Idle);
    assert_eq!(model.call_count(), 0);
    assert_eq!(hook.call_count(), 0);

    let after: Vec<_> = list_files(dir.path())
        .into_iter()
        .map(|p| (p.clone(), std::fs::read(&p).unwrap()))
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_force_replaces_the_days_story() {
    let dir = TempDir::new().unwrap();
    pipeline(dir.path(), gala_model(), RecordingHook::new())
        .run(&RunContext::new(day()))
        .await
        .unwrap();

    let model = ScriptedModel::new(["Idea: a regatta", "Draft", "The regatta, final."]);
    let report = pipeline(dir.path(), model, RecordingHook::new())
        .run(&RunContext::new(day()).with_force(true))
        .await
        .unwrap();

    assert_eq!(report.file_name, "20261019-idea-a-regatta.html");
    let path = assert_single_story(dir.path(), day());
    assert!(path.ends_with("20261019-idea-a-regatta.html"));

    let index = std::fs::read_to_string(dir.path().join("index.html")).unwrap();
    assert!(!index.contains("idea-a-gala"));
}

#[tokio::test]
async fn test_model_failing_every_attempt_publishes_nothing() {
    let dir = TempDir::new().unwrap();
    let model = ScriptedModel::always_failing(overloaded);
    let hook = RecordingHook::new();

    let err = pipeline(dir.path(), model.clone(), hook.clone())
        .run(&RunContext::new(day()))
        .await
        .unwrap_err();

    assert!(matches!(err.error, RunError::Generation(_)));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(err.state, RunState::Failed);
    assert_eq!(err.stage, RunState::Generating);
    let last = err.history.last().unwrap();
    assert_eq!((last.from, last.to), (RunState::Generating, RunState::Failed));
    // First attempt plus three retries.
    assert_eq!(model.call_count(), 4);
    assert_eq!(hook.call_count(), 0);
    assert_site_empty(dir.path());
}

#[tokio::test]
async fn test_model_recovers_within_retry_budget() {
    let dir = TempDir::new().unwrap();
    let model = ScriptedModel::from_results(vec![
        Err(overloaded()),
        Ok("Idea: a gala".into()),
        Err(ModelError::EmptyResponse),
        Ok("Draft: ...".into()),
        Ok("Edit: ...(final)".into()),
    ]);

    let report = pipeline(dir.path(), model.clone(), RecordingHook::new())
        .run(&RunContext::new(day()))
        .await
        .unwrap();

    assert_eq!(report.turns, 3);
    assert_eq!(model.call_count(), 5);
    assert_single_story(dir.path(), day());
}

#[tokio::test]
async fn test_hook_failure_leaves_no_partial_artifact() {
    let dir = TempDir::new().unwrap();
    let hook = RecordingHook::failing(100);

    let err = pipeline(dir.path(), gala_model(), hook.clone())
        .run(&RunContext::new(day()))
        .await
        .unwrap_err();

    assert!(matches!(err.error, RunError::Publish(PublishError::Hook(_))));
    assert_eq!(err.exit_code(), 6);
    assert_eq!(err.state, RunState::Failed);
    assert_eq!(err.stage, RunState::Publishing);
    // First attempt plus the two default publish retries.
    assert_eq!(hook.call_count(), 3);
    assert_site_empty(dir.path());
}

#[tokio::test]
async fn test_unformattable_story_is_not_published() {
    let dir = TempDir::new().unwrap();
    let model = ScriptedModel::new(["!!!", "Draft", "Final text."]);

    let err = pipeline(dir.path(), model, RecordingHook::new())
        .run(&RunContext::new(day()))
        .await
        .unwrap_err();

    assert!(matches!(err.error, RunError::Format(_)));
    assert_eq!(err.state, RunState::Failed);
    assert_eq!(err.exit_code(), 4);
    assert_site_empty(dir.path());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let hook = RecordingHook::new();

    let report = pipeline(dir.path(), gala_model(), hook.clone())
        .run(&RunContext::new(day()).with_dry_run(true))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Assembled);
    assert!(report.path.is_none());
    let preview = report.preview.as_ref().unwrap();
    assert!(preview.html.contains("Edit: ...(final)"));
    assert_eq!(hook.call_count(), 0);
    assert_site_empty(dir.path());
}

#[tokio::test]
async fn test_recent_titles_are_avoided() {
    let dir = TempDir::new().unwrap();
    let yesterday = day().pred_opt().unwrap();
    pipeline(dir.path(), gala_model(), RecordingHook::new())
        .run(&RunContext::new(yesterday))
        .await
        .unwrap();

    let model = ScriptedModel::new(["Idea: a regatta", "Draft", "Final."]);
    pipeline(dir.path(), model.clone(), RecordingHook::new())
        .run(&RunContext::new(day()))
        .await
        .unwrap();

    assert!(model.requests()[0].prompt.contains("- Idea: a gala"));
    assert_eq!(stories_for(dir.path(), yesterday).len(), 1);
    assert_eq!(stories_for(dir.path(), day()).len(), 1);
}

#[tokio::test]
async fn test_report_serializes() {
    let dir = TempDir::new().unwrap();
    let report = pipeline(dir.path(), gala_model(), RecordingHook::new())
        .run(&RunContext::new(day()))
        .await
        .unwrap();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["state"], "published");
    assert_eq!(json["date"], "2026-10-19");
    assert_eq!(json["file_name"], "20261019-idea-a-gala.html");
}
