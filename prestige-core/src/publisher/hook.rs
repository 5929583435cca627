//! What happens after the site files are written.

use crate::config::GitConfig;
use crate::retry::Retryable;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from a site hook.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("Could not run {step}: {source}")]
    Spawn {
        step: String,
        #[source]
        source: io::Error,
    },

    #[error("{step} failed: {message}")]
    Failed { step: String, message: String },
}

impl Retryable for HookError {
    fn is_retryable(&self) -> bool {
        match self {
            // A missing git binary will not appear between attempts.
            HookError::Spawn { source, .. } => source.kind() != io::ErrorKind::NotFound,
            HookError::Failed { .. } => true,
        }
    }
}

/// Publishes written site files somewhere readers can see them.
#[async_trait]
pub trait SiteHook: Send + Sync {
    fn name(&self) -> &str;

    /// Publish `changed` (files written or removed by this run).
    async fn publish(&self, changed: &[PathBuf], message: &str) -> Result<(), HookError>;

    /// Undo whatever a partly successful `publish` left behind.
    async fn revert(&self) -> Result<(), HookError> {
        Ok(())
    }
}

/// Leaves the files where they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl SiteHook for NoopHook {
    fn name(&self) -> &str {
        "none"
    }

    async fn publish(&self, changed: &[PathBuf], _message: &str) -> Result<(), HookError> {
        debug!(files = changed.len(), "No site hook configured");
        Ok(())
    }
}

/// Commits the changed files and optionally pushes them.
///
/// Only the paths handed to [`SiteHook::publish`] are staged and committed;
/// anything else sitting in the index is left alone.
#[derive(Debug)]
pub struct GitHook {
    repo_dir: PathBuf,
    remote: String,
    branch: Option<String>,
    push: bool,
    committed: AtomicBool,
    /// Pathspecs staged by the last publish, unstaged again on revert.
    staged: Mutex<Vec<String>>,
}

impl GitHook {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: "origin".to_string(),
            branch: None,
            push: true,
            committed: AtomicBool::new(false),
            staged: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(git: &GitConfig, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            remote: git.remote.clone(),
            branch: git.branch.clone(),
            push: git.push,
            ..Self::new(repo_dir)
        }
    }

    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn git(&self, step: &str, args: &[&str]) -> Result<Output, HookError> {
        debug!(step, ?args, dir = %self.repo_dir.display(), "Running git");
        Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| HookError::Spawn {
                step: format!("git {step}"),
                source,
            })
    }

    async fn git_ok(&self, step: &str, args: &[&str]) -> Result<Output, HookError> {
        let output = self.git(step, args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(failure(step, &output))
        }
    }

    fn staged(&self) -> MutexGuard<'_, Vec<String>> {
        self.staged.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether any of `paths` has staged changes.
    async fn has_staged_changes(&self, paths: &[&str]) -> Result<bool, HookError> {
        let mut args = vec!["diff", "--cached", "--quiet", "--"];
        args.extend_from_slice(paths);
        let output = self.git("diff", &args).await?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(failure("diff", &output)),
        }
    }
}

#[async_trait]
impl SiteHook for GitHook {
    fn name(&self) -> &str {
        "git"
    }

    async fn publish(&self, changed: &[PathBuf], message: &str) -> Result<(), HookError> {
        let specs = pathspecs(changed)?;
        *self.staged() = specs.clone();
        let paths: Vec<&str> = specs.iter().map(String::as_str).collect();

        // A retry after a failed push finds the commit already made.
        if !paths.is_empty() {
            let mut args = vec!["add", "--all", "--"];
            args.extend_from_slice(&paths);
            self.git_ok("add", &args).await?;

            if self.has_staged_changes(&paths).await? {
                let mut args = vec!["commit", "--quiet", "-m", message, "--"];
                args.extend_from_slice(&paths);
                self.git_ok("commit", &args).await?;
                self.committed.store(true, Ordering::SeqCst);
                info!(message, "Committed story");
            }
        }

        if self.push {
            let mut args = vec!["push", "--quiet", self.remote.as_str()];
            if let Some(branch) = &self.branch {
                args.push(branch);
            }
            self.git_ok("push", &args).await?;
            info!(remote = %self.remote, "Pushed story");
        }
        Ok(())
    }

    async fn revert(&self) -> Result<(), HookError> {
        if self.committed.swap(false, Ordering::SeqCst) {
            let has_parent = self
                .git("rev-parse", &["rev-parse", "--verify", "--quiet", "HEAD~1"])
                .await?
                .status
                .success();
            if has_parent {
                self.git_ok("reset", &["reset", "--quiet", "--mixed", "HEAD~1"])
                    .await?;
            } else {
                self.git_ok("update-ref", &["update-ref", "-d", "HEAD"])
                    .await?;
            }
            info!("Reverted unpublished commit");
        }

        // Whatever this run staged must not ride along with a later commit.
        let specs = std::mem::take(&mut *self.staged());
        if !specs.is_empty() {
            let mut args = vec!["reset", "--quiet", "--"];
            args.extend(specs.iter().map(String::as_str));
            self.git_ok("reset", &args).await?;
            debug!(paths = specs.len(), "Unstaged run files");
        }
        Ok(())
    }
}

/// Absolute pathspecs for `changed`.
///
/// The site's paths are relative to the process, while git runs in
/// `repo_dir`.
fn pathspecs(changed: &[PathBuf]) -> Result<Vec<String>, HookError> {
    changed
        .iter()
        .map(|path| {
            std::path::absolute(path)
                .map(|abs| abs.to_string_lossy().into_owned())
                .map_err(|source| HookError::Spawn {
                    step: "resolve site paths".to_string(),
                    source,
                })
        })
        .collect()
}

fn failure(step: &str, output: &Output) -> HookError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = match stderr.trim() {
        "" => format!("exited with {}", output.status),
        text => text.to_string(),
    };
    HookError::Failed {
        step: format!("git {step}"),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::publisher::ContentStore;
    use tempfile::TempDir;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok()
    }

    fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "--quiet"],
            vec!["config", "user.email", "desk@prestige.test"],
            vec!["config", "user.name", "Prestige Desk"],
            vec!["config", "commit.gpgsign", "false"],
        ] {
            let status = std::process::Command::new("git")
                .args(&args)
                .current_dir(dir)
                .status()
                .unwrap();
            assert!(status.success(), "git {args:?} failed");
        }
    }

    fn commit_count(dir: &Path) -> usize {
        let output = std::process::Command::new("git")
            .args(["rev-list", "--count", "HEAD"])
            .current_dir(dir)
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap_or(0)
    }

    fn git_lines(dir: &Path, args: &[&str]) -> Vec<String> {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    fn staged_files(dir: &Path) -> Vec<String> {
        git_lines(dir, &["diff", "--cached", "--name-only"])
    }

    fn committed_files(dir: &Path) -> Vec<String> {
        git_lines(dir, &["show", "--name-only", "--pretty=format:", "HEAD"])
    }

    #[test]
    fn test_hook_error_classification() {
        let missing = HookError::Spawn {
            step: "git add".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "no git"),
        };
        assert!(!missing.is_retryable());

        let rejected = HookError::Failed {
            step: "git push".into(),
            message: "rejected".into(),
        };
        assert!(rejected.is_retryable());
    }

    #[tokio::test]
    async fn test_noop_hook() {
        NoopHook
            .publish(&[PathBuf::from("a.html")], "msg")
            .await
            .unwrap();
        NoopHook.revert().await.unwrap();
    }

    #[tokio::test]
    async fn test_git_commit_and_revert() {
        if !git_available() {
            eprintln!("Skipping test: git not installed");
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());

        let file = dir.path().join("story.html");
        std::fs::write(&file, "<p>one</p>").unwrap();
        let hook = GitHook::new(dir.path()).with_push(false);
        hook.publish(&[file.clone()], "first story").await.unwrap();
        assert_eq!(commit_count(dir.path()), 1);

        // Nothing new staged: no empty commit.
        hook.publish(&[file.clone()], "again").await.unwrap();
        assert_eq!(commit_count(dir.path()), 1);

        std::fs::write(&file, "<p>two</p>").unwrap();
        hook.publish(&[file], "second story").await.unwrap();
        assert_eq!(commit_count(dir.path()), 2);

        hook.revert().await.unwrap();
        assert_eq!(commit_count(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_git_push_without_remote_fails() {
        if !git_available() {
            eprintln!("Skipping test: git not installed");
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());

        let file = dir.path().join("story.html");
        std::fs::write(&file, "<p>one</p>").unwrap();
        let hook = GitHook::new(dir.path());
        let err = hook.publish(&[file], "story").await.unwrap_err();
        assert!(matches!(err, HookError::Failed { ref step, .. } if step == "git push"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_commit_is_unstaged_and_not_carried_over() {
        use std::os::unix::fs::PermissionsExt;

        if !git_available() {
            eprintln!("Skipping test: git not installed");
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let hooks = dir.path().join(".git").join("hooks");
        std::fs::create_dir_all(&hooks).unwrap();
        let pre_commit = hooks.join("pre-commit");
        std::fs::write(&pre_commit, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&pre_commit, std::fs::Permissions::from_mode(0o755)).unwrap();

        let failed = dir.path().join("20261018-idea-failed-day.html");
        std::fs::write(&failed, "<p>failed</p>").unwrap();
        let hook = GitHook::new(dir.path()).with_push(false);
        let err = hook
            .publish(&[failed.clone()], "failed day")
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Failed { ref step, .. } if step == "git commit"));

        hook.revert().await.unwrap();
        std::fs::remove_file(&failed).unwrap();
        assert!(staged_files(dir.path()).is_empty());

        std::fs::remove_file(&pre_commit).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "scratch").unwrap();
        git_lines(dir.path(), &["add", "notes.txt"]);

        let next = dir.path().join("20261019-idea-next-day.html");
        std::fs::write(&next, "<p>next</p>").unwrap();
        let hook = GitHook::new(dir.path()).with_push(false);
        hook.publish(&[next], "next day").await.unwrap();

        assert_eq!(committed_files(dir.path()), vec!["20261019-idea-next-day.html"]);
        assert_eq!(staged_files(dir.path()), vec!["notes.txt"]);
    }

    #[tokio::test]
    async fn test_nested_relative_site_path() {
        if !git_available() {
            eprintln!("Skipping test: git not installed");
            return;
        }
        // Relative to the working directory, like `--site site/docs`.
        let dir = TempDir::new_in(".").unwrap();
        let config = Config::default()
            .with_output_path(dir.path().join("site").join("docs"))
            .with_git(true)
            .with_push(false);
        let repo = config.repo_dir();
        assert_eq!(repo, dir.path().join("site"));
        assert!(repo.is_relative());
        std::fs::create_dir_all(&repo).unwrap();
        init_repo(&repo);

        let store = ContentStore::new(&config.site.output_path);
        let story = store.story_path("20261019-idea-a-gala.html");
        store.write_atomic(&story, "<p>gala</p>").unwrap();

        let hook = GitHook::from_config(&config.publish.git, repo.clone());
        hook.publish(&[story], "gala").await.unwrap();
        assert_eq!(
            committed_files(&repo),
            vec!["docs/stories/20261019-idea-a-gala.html"]
        );

        // Reverting the repository's only commit leaves an unborn branch.
        hook.revert().await.unwrap();
        assert_eq!(commit_count(&repo), 0);
        assert!(staged_files(&repo).is_empty());
    }
}
