//! Writing the assembled story into the site and publishing it.
//!
//! A publish either leaves exactly one new story for the date (plus the
//! updated index) or, on failure, leaves the site as it found it.

pub mod hook;
pub mod index;
pub mod store;

pub use hook::{GitHook, HookError, NoopHook, SiteHook};
pub use store::ContentStore;

use crate::assembler::Document;
use crate::config::Config;
use crate::retry::{with_retry, RetryPolicy, Retryable};
use crate::story::{Story, StoryStatusError};
use chrono::NaiveDate;
use index::CardInfo;
use std::io;
use std::path::{Path, PathBuf};
use store::Journal;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Errors from publishing.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("A story for {date} already exists at {} (use --force to replace it)", path.display())]
    Conflict { date: NaiveDate, path: PathBuf },

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Site hook failed: {0}")]
    Hook(#[from] HookError),

    #[error(transparent)]
    Status(#[from] StoryStatusError),
}

impl Retryable for PublishError {
    fn is_retryable(&self) -> bool {
        match self {
            PublishError::Io { source, .. } => !matches!(
                source.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidInput
            ),
            PublishError::Hook(e) => e.is_retryable(),
            PublishError::Conflict { .. } | PublishError::Status(_) => false,
        }
    }
}

/// A story as it now exists on the site. Read-only.
#[derive(Debug, Clone)]
pub struct PublishedArtifact {
    story: Story,
    path: PathBuf,
    file_name: String,
}

impl PublishedArtifact {
    pub fn story(&self) -> &Story {
        &self.story
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn date(&self) -> NaiveDate {
        self.story.date()
    }
}

/// Writes documents into a [`ContentStore`] and runs the [`SiteHook`].
pub struct Publisher {
    store: ContentStore,
    hook: Box<dyn SiteHook>,
    retry: RetryPolicy,
    site_name: String,
    tagline: String,
}

impl Publisher {
    pub fn new(store: ContentStore, hook: Box<dyn SiteHook>) -> Self {
        let site = crate::config::SiteConfig::default();
        Self {
            store,
            hook,
            retry: RetryPolicy::none(),
            site_name: site.name,
            tagline: site.tagline,
        }
    }

    /// Site root, names and publish retries from `config`.
    pub fn from_config(config: &Config, hook: Box<dyn SiteHook>) -> Self {
        Self::new(ContentStore::new(&config.site.output_path), hook)
            .with_retry_policy(config.publish_retry_policy())
            .with_site(config.site.name.clone(), config.site.tagline.clone())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_site(mut self, name: impl Into<String>, tagline: impl Into<String>) -> Self {
        self.site_name = name.into();
        self.tagline = tagline.into();
        self
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn hook_name(&self) -> &str {
        self.hook.name()
    }

    /// Titles of recent stories, newest first.
    pub fn recent_titles(&self, limit: usize) -> Result<Vec<String>, PublishError> {
        self.store.recent_titles(limit)
    }

    /// Fail with [`PublishError::Conflict`] if the date already has a story.
    pub fn check_conflict(&self, date: NaiveDate) -> Result<(), PublishError> {
        match self.store.stories_for(date)?.into_iter().next() {
            Some(path) => Err(PublishError::Conflict { date, path }),
            None => Ok(()),
        }
    }

    /// Write the document and run the hook.
    ///
    /// With `force`, stories already published for the same date are
    /// replaced; otherwise they are a [`PublishError::Conflict`] and nothing
    /// is written.
    #[instrument(skip_all, fields(file = %document.file_name, force = force))]
    pub async fn publish(
        &self,
        document: Document,
        force: bool,
    ) -> Result<PublishedArtifact, PublishError> {
        let Document {
            story,
            file_name,
            html,
            idea_number: _,
        } = document;
        let date = story.date();
        let story = story.into_published()?;

        let existing = self.store.stories_for(date)?;
        if let Some(path) = existing.first() {
            if !force {
                return Err(PublishError::Conflict {
                    date,
                    path: path.clone(),
                });
            }
            warn!(replacing = existing.len(), "Replacing story already published for this date");
        }

        let journal = with_retry(&self.retry, "site write", || {
            std::future::ready(self.write_site(&story, &file_name, &html, &existing))
        })
        .await
        .map_err(|(e, _)| e)?;

        let changed = journal.paths();
        let message = format!("Add story for {}: {}", date, story.title());
        let hooked = with_retry(&self.retry, "site hook", || {
            self.hook.publish(&changed, &message)
        })
        .await;

        if let Err((err, attempts)) = hooked {
            warn!(
                hook = self.hook.name(),
                attempts,
                error = %err,
                "Publishing failed, rolling back"
            );
            if let Err(e) = self.hook.revert().await {
                warn!(error = %e, "Hook revert failed");
            }
            journal.rollback(&self.store);
            return Err(PublishError::Hook(err));
        }

        let path = self.store.story_path(&file_name);
        info!(path = %path.display(), hook = self.hook.name(), "Story published");

        Ok(PublishedArtifact {
            story,
            path,
            file_name,
        })
    }

    /// One attempt at writing every file. A failed attempt undoes itself.
    fn write_site(
        &self,
        story: &Story,
        file_name: &str,
        html: &str,
        existing: &[PathBuf],
    ) -> Result<Journal, PublishError> {
        let mut journal = Journal::default();
        match self.apply(&mut journal, story, file_name, html, existing) {
            Ok(()) => Ok(journal),
            Err(e) => {
                journal.rollback(&self.store);
                Err(e)
            }
        }
    }

    fn apply(
        &self,
        journal: &mut Journal,
        story: &Story,
        file_name: &str,
        html: &str,
        existing: &[PathBuf],
    ) -> Result<(), PublishError> {
        let stylesheet = self.store.stylesheet_path();
        if !self.store.exists(&stylesheet) {
            self.store.write_atomic(&stylesheet, index::DEFAULT_STYLESHEET)?;
            journal.wrote(stylesheet, None);
        }

        let index_path = self.store.index_path();
        let previous_index = self.store.read_optional(&index_path)?;
        let mut page = match &previous_index {
            Some(page) => page.clone(),
            None => index::new_index(&self.site_name, &self.tagline),
        };

        for old in existing {
            let previous = self.store.read(old)?;
            self.store.remove(old)?;
            journal.removed(old.clone(), previous);
            if let Some(old_name) = old.file_name().and_then(|n| n.to_str()) {
                page = index::remove_cards(&page, old_name);
            }
        }

        let story_path = self.store.story_path(file_name);
        self.store.write_atomic(&story_path, html)?;
        journal.wrote(story_path, None);

        let date = crate::assembler::display_date(story.date());
        let page = index::update_index(
            &page,
            &CardInfo {
                title: story.title(),
                date: &date,
                description: story.description(),
                file_name,
            },
        );
        self.store.write_atomic(&index_path, &page)?;
        journal.wrote(index_path, previous_index);

        Ok(())
    }
}
