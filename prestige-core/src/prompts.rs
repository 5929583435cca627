//! Prompt construction for the editor and writer turns.
//!
//! The text lives in `prompts/*.txt`; this module only fills in the
//! placeholders. Building prompts has no side effects.

use crate::config::{Config, ConfigError};
use chrono::NaiveDate;

const EDITOR_PERSONA: &str = include_str!("prompts/editor_persona.txt");
const WRITER_PERSONA: &str = include_str!("prompts/writer_persona.txt");
const IDEAS: &str = include_str!("prompts/ideas.txt");
const DRAFT: &str = include_str!("prompts/draft.txt");
const EDIT: &str = include_str!("prompts/edit.txt");

/// Per-run inputs to the prompts.
#[derive(Debug, Clone)]
pub struct StoryParams {
    pub date: NaiveDate,
    pub theme_hints: Vec<String>,
    /// Headlines of recent stories the editor should not repeat.
    pub avoid_titles: Vec<String>,
}

impl StoryParams {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            theme_hints: Vec::new(),
            avoid_titles: Vec::new(),
        }
    }

    pub fn with_theme_hints(mut self, hints: Vec<String>) -> Self {
        self.theme_hints = hints;
        self
    }

    pub fn with_avoid_titles(mut self, titles: Vec<String>) -> Self {
        self.avoid_titles = titles;
        self
    }
}

/// System and user text for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePrompt {
    pub system: String,
    pub user: String,
}

/// Builds every prompt a run sends.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    publication: String,
    editor_persona: String,
    writer_persona: String,
    idea_count: u32,
    word_count: u32,
}

impl PromptBuilder {
    /// Take publication name, personas and story shape from `config`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let publication = config.site.name.trim();
        if publication.is_empty() {
            return Err(ConfigError::Invalid {
                field: "site.name",
                reason: "a publication name is required for the prompts".to_string(),
            });
        }
        if config.story.idea_count == 0 {
            return Err(ConfigError::Invalid {
                field: "story.idea_count",
                reason: "the editor must pitch at least one idea".to_string(),
            });
        }
        if config.story.word_count == 0 {
            return Err(ConfigError::Invalid {
                field: "story.word_count",
                reason: "must be greater than zero".to_string(),
            });
        }

        let persona = |custom: &Option<String>, default: &str| {
            custom
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        Ok(Self {
            publication: publication.to_string(),
            editor_persona: persona(&config.story.editor_persona, EDITOR_PERSONA),
            writer_persona: persona(&config.story.writer_persona, WRITER_PERSONA),
            idea_count: config.story.idea_count,
            word_count: config.story.word_count,
        })
    }

    /// Editor: pitch a numbered list of ideas.
    pub fn ideas(&self, params: &StoryParams) -> RolePrompt {
        let mut user = self.fill(IDEAS, params, &[]);

        let hints: Vec<&str> = params
            .theme_hints
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .collect();
        if !hints.is_empty() {
            user.push_str("\nThis edition leans toward: ");
            user.push_str(&hints.join(", "));
            user.push_str(".\n");
        }

        if !params.avoid_titles.is_empty() {
            user.push_str("\nThese stories ran recently. Do not repeat their subjects:\n");
            for title in &params.avoid_titles {
                user.push_str("- ");
                user.push_str(title);
                user.push('\n');
            }
        }

        RolePrompt {
            system: self.editor_system(),
            user,
        }
    }

    /// Writer: choose one idea and write the first draft.
    pub fn draft(&self, params: &StoryParams, ideas: &str) -> RolePrompt {
        RolePrompt {
            system: self.writer_system(),
            user: self.fill(DRAFT, params, &[("ideas", ideas.trim())]),
        }
    }

    /// Editor: revise the accumulated draft.
    pub fn edit(
        &self,
        params: &StoryParams,
        ideas: &str,
        draft: &str,
        pass: u32,
        total_passes: u32,
    ) -> RolePrompt {
        let pass = pass.to_string();
        let total = total_passes.to_string();
        RolePrompt {
            system: self.editor_system(),
            user: self.fill(
                EDIT,
                params,
                &[
                    ("ideas", ideas.trim()),
                    ("draft", draft.trim()),
                    ("pass", pass.as_str()),
                    ("total_passes", total.as_str()),
                ],
            ),
        }
    }

    fn editor_system(&self) -> String {
        fill_placeholders(&self.editor_persona, &[("publication", self.publication.as_str())])
    }

    fn writer_system(&self) -> String {
        fill_placeholders(&self.writer_persona, &[("publication", self.publication.as_str())])
    }

    fn fill(&self, template: &str, params: &StoryParams, extra: &[(&str, &str)]) -> String {
        let date = params.date.format("%B %-d, %Y").to_string();
        let idea_count = self.idea_count.to_string();
        let word_count = self.word_count.to_string();

        let mut values: Vec<(&str, &str)> = vec![
            ("publication", self.publication.as_str()),
            ("date", date.as_str()),
            ("idea_count", idea_count.as_str()),
            ("word_count", word_count.as_str()),
        ];
        values.extend_from_slice(extra);
        fill_placeholders(template, &values)
    }
}

/// Replace `{name}` markers in one pass, so inserted text is never rescanned.
/// Unknown markers are left as they are.
fn fill_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after.find('}').and_then(|end| {
            let key = &after[..end];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (end, *v))
        });
        match replaced {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
