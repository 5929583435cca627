//! Story, turn, and transcript types.
//!
//! A [`Story`] is created in `draft` status at the start of a run, revised by
//! each writer/editor turn, accepted into `final` by the orchestrator, titled
//! by the assembler, and frozen once the publisher hands back a
//! [`PublishedArtifact`](crate::publisher::PublishedArtifact).

use chrono::NaiveDate;
use claude::Usage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle status of a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Draft,
    Final,
    Published,
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoryStatus::Draft => "draft",
            StoryStatus::Final => "final",
            StoryStatus::Published => "published",
        };
        f.write_str(name)
    }
}

/// Attempted a change the story's current status does not allow.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot {action} a {status} story")]
pub struct StoryStatusError {
    pub action: &'static str,
    pub status: StoryStatus,
}

/// The narrative document for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    title: String,
    slug: String,
    description: String,
    byline: String,
    body: String,
    date: NaiveDate,
    status: StoryStatus,
}

impl Story {
    /// Start an empty draft for the given day.
    pub fn draft(date: NaiveDate) -> Self {
        Self {
            title: String::new(),
            slug: String::new(),
            description: String::new(),
            byline: String::new(),
            body: String::new(),
            date,
            status: StoryStatus::Draft,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn byline(&self) -> &str {
        &self.byline
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn status(&self) -> StoryStatus {
        self.status
    }

    /// Replace the draft text with a newer revision.
    pub fn revise(&mut self, text: impl Into<String>) -> Result<(), StoryStatusError> {
        self.require(StoryStatus::Draft, "revise")?;
        self.body = text.into();
        Ok(())
    }

    /// Accept the current revision as the final text.
    pub fn accept(&mut self) -> Result<(), StoryStatusError> {
        self.require(StoryStatus::Draft, "accept")?;
        self.status = StoryStatus::Final;
        Ok(())
    }

    /// Attach assembler metadata. Only final stories can be dressed for print.
    pub(crate) fn set_metadata(
        &mut self,
        title: String,
        slug: String,
        description: String,
        byline: String,
        body: String,
    ) -> Result<(), StoryStatusError> {
        self.require(StoryStatus::Final, "format")?;
        self.title = title;
        self.slug = slug;
        self.description = description;
        self.byline = byline;
        self.body = body;
        Ok(())
    }

    pub(crate) fn into_published(mut self) -> Result<Self, StoryStatusError> {
        self.require(StoryStatus::Final, "publish")?;
        self.status = StoryStatus::Published;
        Ok(self)
    }

    fn require(&self, status: StoryStatus, action: &'static str) -> Result<(), StoryStatusError> {
        if self.status == status {
            Ok(())
        } else {
            Err(StoryStatusError {
                action,
                status: self.status,
            })
        }
    }
}

/// The two personas that take turns on a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Editor,
    Writer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Editor => f.write_str("editor"),
            Role::Writer => f.write_str("writer"),
        }
    }
}

/// What a turn contributes to the story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnKind {
    /// Editor pitches a numbered list of ideas.
    Idea,
    /// Writer picks an idea and writes the first draft.
    Draft,
    /// Editor returns a revised draft. Passes count from 1.
    Edit { pass: u32 },
}

impl TurnKind {
    /// The persona that always owns this kind of turn.
    pub fn role(&self) -> Role {
        match self {
            TurnKind::Idea | TurnKind::Edit { .. } => Role::Editor,
            TurnKind::Draft => Role::Writer,
        }
    }

    /// The only kind allowed to follow this one.
    pub fn next(&self) -> TurnKind {
        match self {
            TurnKind::Idea => TurnKind::Draft,
            TurnKind::Draft => TurnKind::Edit { pass: 1 },
            TurnKind::Edit { pass } => TurnKind::Edit { pass: pass + 1 },
        }
    }
}

impl fmt::Display for TurnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnKind::Idea => f.write_str("idea"),
            TurnKind::Draft => f.write_str("draft"),
            TurnKind::Edit { pass } => write!(f, "edit #{pass}"),
        }
    }
}

/// One role-tagged exchange with the model.
#[derive(Debug, Clone)]
pub struct Turn {
    /// Position in the transcript, starting at 1.
    pub ordinal: usize,
    pub role: Role,
    pub kind: TurnKind,
    /// The user-facing instructions that were sent.
    pub prompt: String,
    /// What the model returned.
    pub text: String,
    pub usage: Usage,
}

/// A turn arrived out of the fixed idea/draft/edit order.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("turn out of order: expected {expected}, got {actual}")]
pub struct TurnOrderError {
    pub expected: TurnKind,
    pub actual: TurnKind,
}

/// Append-only record of every turn in a run.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// The kind the next recorded turn must have.
    pub fn expected_next(&self) -> TurnKind {
        self.turns
            .last()
            .map(|t| t.kind.next())
            .unwrap_or(TurnKind::Idea)
    }

    /// Record a finished exchange. Ordinals are assigned here.
    pub fn record(
        &mut self,
        kind: TurnKind,
        prompt: impl Into<String>,
        text: impl Into<String>,
        usage: Usage,
    ) -> Result<&Turn, TurnOrderError> {
        let expected = self.expected_next();
        if kind != expected {
            return Err(TurnOrderError {
                expected,
                actual: kind,
            });
        }

        self.turns.push(Turn {
            ordinal: self.turns.len() + 1,
            role: kind.role(),
            kind,
            prompt: prompt.into(),
            text: text.into(),
            usage,
        });
        Ok(&self.turns[self.turns.len() - 1])
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The editor's idea list, if the first turn has happened.
    pub fn ideas_text(&self) -> Option<&str> {
        self.find(TurnKind::Idea).map(|t| t.text.as_str())
    }

    /// The writer's first draft.
    pub fn draft_text(&self) -> Option<&str> {
        self.find(TurnKind::Draft).map(|t| t.text.as_str())
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Token usage summed over every turn.
    pub fn total_usage(&self) -> Usage {
        self.turns.iter().fold(Usage::default(), |acc, t| Usage {
            input_tokens: acc.input_tokens + t.usage.input_tokens,
            output_tokens: acc.output_tokens + t.usage.output_tokens,
        })
    }

    fn find(&self, kind: TurnKind) -> Option<&Turn> {
        self.turns.iter().find(|t| t.kind == kind)
    }
}

/// One numbered pitch from the editor's idea list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Idea {
    pub number: u32,
    pub title: String,
    pub description: String,
}

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)[.)]\s*(.*)$").expect("valid regex"));
static QUOTED_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["“]([^"”]+)["”]"#).expect("valid regex"));

/// Parse an editor's numbered idea list.
///
/// Lines that do not start a new number are folded into the previous idea.
/// Ideas without any discernible title are dropped.
pub fn parse_ideas(text: &str) -> Vec<Idea> {
    let mut raw: Vec<(u32, String)> = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(caps) = NUMBERED_LINE.captures(line) {
            if let Ok(number) = caps[1].parse::<u32>() {
                raw.push((number, caps[2].trim().to_string()));
                continue;
            }
        }
        if let Some((_, current)) = raw.last_mut() {
            current.push(' ');
            current.push_str(line);
        }
    }

    raw.into_iter()
        .filter_map(|(number, text)| {
            let (title, description) = split_idea(&text)?;
            Some(Idea {
                number,
                title,
                description,
            })
        })
        .collect()
}

fn split_idea(text: &str) -> Option<(String, String)> {
    let cleaned = text.replace("**", "");
    let cleaned = cleaned.trim();

    if let Some(caps) = QUOTED_TITLE.captures(cleaned) {
        let whole = caps.get(0)?;
        let title = caps[1].trim().to_string();
        let rest = cleaned[whole.end()..]
            .trim_start_matches([':', '-', '–', '—', ' '])
            .trim()
            .to_string();
        if !title.is_empty() {
            return Some((title, rest));
        }
    }

    let (title, description) = match cleaned.split_once(':') {
        Some((title, rest)) => (title.trim(), rest.trim()),
        None => match cleaned.split_once(" - ") {
            Some((title, rest)) => (title.trim(), rest.trim()),
            None => (cleaned, ""),
        },
    };

    let title = title.trim_matches(|c| c == '"' || c == '*' || c == '#').trim();
    if title.is_empty() {
        None
    } else {
        Some((title.to_string(), description.to_string()))
    }
}
