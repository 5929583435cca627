//! The site directory on disk.
//!
//! Layout:
//!
//! ```text
//! <root>/index.html
//! <root>/stories/YYYYMMDD-<slug>.html
//! <root>/assets/css/style.css
//! ```

use super::PublishError;
use crate::assembler::unescape_html;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

static HEADLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<h1 class="story-headline">\s*(.*?)\s*</h1>"#).expect("valid regex")
});
static PAGE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<title>\s*(.*?)\s*</title>").expect("valid regex"));

/// File access for one static site.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stories_dir(&self) -> PathBuf {
        self.root.join("stories")
    }

    pub fn story_path(&self, file_name: &str) -> PathBuf {
        self.stories_dir().join(file_name)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.html")
    }

    pub fn stylesheet_path(&self) -> PathBuf {
        self.root.join("assets").join("css").join("style.css")
    }

    /// Story files already published for `date`, sorted by name.
    pub fn stories_for(&self, date: NaiveDate) -> Result<Vec<PathBuf>, PublishError> {
        let prefix = format!("{}-", date.format("%Y%m%d"));
        let mut found: Vec<PathBuf> = self
            .story_files()?
            .into_iter()
            .filter(|p| file_name(p).is_some_and(|n| n.starts_with(&prefix)))
            .collect();
        found.sort();
        Ok(found)
    }

    /// Headlines of the newest `limit` stories, newest first.
    ///
    /// Unreadable pages are skipped.
    pub fn recent_titles(&self, limit: usize) -> Result<Vec<String>, PublishError> {
        let mut files = self.story_files()?;
        files.sort();
        files.reverse();

        let titles = files
            .iter()
            .filter_map(|path| match fs::read_to_string(path) {
                Ok(html) => extract_headline(&html),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable story");
                    None
                }
            })
            .take(limit)
            .collect();
        Ok(titles)
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Contents of `path`, or `None` when it does not exist.
    pub fn read_optional(&self, path: &Path) -> Result<Option<String>, PublishError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(path, source)),
        }
    }

    pub fn read(&self, path: &Path) -> Result<String, PublishError> {
        fs::read_to_string(path).map_err(|source| io_error(path, source))
    }

    /// Write through a temporary file in the same directory, then rename.
    ///
    /// Readers see either the old contents or the new, never a mix.
    pub fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), PublishError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|source| io_error(dir, source))?;

        let mut temp = NamedTempFile::new_in(dir).map_err(|source| io_error(dir, source))?;
        temp.write_all(contents.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|source| io_error(path, source))?;
        temp.persist(path)
            .map_err(|e| io_error(path, e.error))?;

        debug!(path = %path.display(), bytes = contents.len(), "Wrote file");
        Ok(())
    }

    pub fn remove(&self, path: &Path) -> Result<(), PublishError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(path, source)),
        }
    }

    fn story_files(&self) -> Result<Vec<PathBuf>, PublishError> {
        let dir = self.stories_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&dir, source)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|source| io_error(&dir, source))?.path();
            let is_story = file_name(&path).is_some_and(|n| {
                n.len() > 9
                    && n.as_bytes()[..8].iter().all(u8::is_ascii_digit)
                    && n.ends_with(".html")
            });
            if is_story && path.is_file() {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn io_error(path: &Path, source: io::Error) -> PublishError {
    PublishError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Headline of a story page: the story heading, or the page title.
pub fn extract_headline(html: &str) -> Option<String> {
    let raw = HEADLINE
        .captures(html)
        .or_else(|| PAGE_TITLE.captures(html))
        .map(|caps| caps[1].to_string())?;
    let title = match raw.rsplit_once(" | ") {
        Some((title, _site)) => title,
        None => raw.as_str(),
    };
    let title = unescape_html(title.trim());
    (!title.is_empty()).then_some(title)
}

/// One reversible change to the site.
#[derive(Debug)]
enum Change {
    Created(PathBuf),
    Replaced { path: PathBuf, previous: String },
    Removed { path: PathBuf, previous: String },
}

/// Changes made by one publish, in order, so they can be undone.
#[derive(Debug, Default)]
pub struct Journal {
    changes: Vec<Change>,
}

impl Journal {
    /// Record a write; `previous` is the content it replaced, if any.
    pub fn wrote(&mut self, path: PathBuf, previous: Option<String>) {
        self.changes.push(match previous {
            Some(previous) => Change::Replaced { path, previous },
            None => Change::Created(path),
        });
    }

    pub fn removed(&mut self, path: PathBuf, previous: String) {
        self.changes.push(Change::Removed { path, previous });
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Every path touched, in order, without duplicates.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for change in &self.changes {
            let path = match change {
                Change::Created(path) => path,
                Change::Replaced { path, .. } | Change::Removed { path, .. } => path,
            };
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        paths
    }

    /// Undo every change, newest first. Failures are logged and skipped so
    /// as much as possible is restored.
    pub fn rollback(self, store: &ContentStore) {
        for change in self.changes.into_iter().rev() {
            let result = match &change {
                Change::Created(path) => store.remove(path),
                Change::Replaced { path, previous } | Change::Removed { path, previous } => {
                    store.write_atomic(path, previous)
                }
            };
            match result {
                Ok(()) => debug!(?change, "Rolled back"),
                Err(e) => warn!(error = %e, "Rollback step failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn page(title: &str) -> String {
        format!(
            "<html><head><title>{title} | Prestige Report</title></head>\
             <body><h1 class=\"story-headline\">{title}</h1></body></html>"
        )
    }

    #[test]
    fn test_stories_for_date() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path());
        assert!(store.stories_for(day()).unwrap().is_empty());

        store
            .write_atomic(&store.story_path("20261019-gala.html"), "x")
            .unwrap();
        store
            .write_atomic(&store.story_path("20261018-yacht.html"), "x")
            .unwrap();
        store
            .write_atomic(&store.story_path("notes.txt"), "x")
            .unwrap();

        let found = store.stories_for(day()).unwrap();
        assert_eq!(found, vec![store.story_path("20261019-gala.html")]);
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path());
        let path = store.index_path();

        store.write_atomic(&path, "one").unwrap();
        store.write_atomic(&path, "two").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_recent_titles_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path());
        for (name, title) in [
            ("20261017-a.html", "Salt &amp; Silk"),
            ("20261018-b.html", "Night Ferry"),
            ("20261019-c.html", "Quiet Money"),
        ] {
            store
                .write_atomic(&store.story_path(name), &page(title))
                .unwrap();
        }

        let titles = store.recent_titles(2).unwrap();
        assert_eq!(titles, vec!["Quiet Money", "Night Ferry"]);

        let all = store.recent_titles(10).unwrap();
        assert_eq!(all[2], "Salt & Silk");
    }

    #[test]
    fn test_extract_headline_falls_back_to_title() {
        let html = "<title>Custom Page | Prestige Report</title>";
        assert_eq!(extract_headline(html).as_deref(), Some("Custom Page"));
        assert_eq!(extract_headline("<p>nothing</p>"), None);
    }

    #[test]
    fn test_journal_rollback() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path());
        let index = store.index_path();
        let old_story = store.story_path("20261019-old.html");
        store.write_atomic(&index, "old index").unwrap();
        store.write_atomic(&old_story, "old story").unwrap();

        let mut journal = Journal::default();
        store.remove(&old_story).unwrap();
        journal.removed(old_story.clone(), "old story".into());
        let new_story = store.story_path("20261019-new.html");
        store.write_atomic(&new_story, "new story").unwrap();
        journal.wrote(new_story.clone(), None);
        store.write_atomic(&index, "new index").unwrap();
        journal.wrote(index.clone(), Some("old index".into()));

        assert_eq!(journal.paths().len(), 3);
        journal.rollback(&store);

        assert!(!new_story.exists());
        assert_eq!(fs::read_to_string(&old_story).unwrap(), "old story");
        assert_eq!(fs::read_to_string(&index).unwrap(), "old index");
    }
}
