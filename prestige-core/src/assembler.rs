//! Turns the accepted story into a publishable HTML page.
//!
//! Everything here is a pure transformation of the [`Manuscript`]: the
//! headline, slug, description and body are pulled out of the final text
//! (falling back to the editor's idea list), then poured into the story
//! template.

use crate::config::{Config, ConfigError};
use crate::orchestrator::Manuscript;
use crate::story::{parse_ideas, Idea, Story, StoryStatus};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Built-in story page template.
pub const DEFAULT_STORY_TEMPLATE: &str = include_str!("../templates/story.html");

const SLUG_MAX_CHARS: usize = 40;
const DESCRIPTION_MAX_CHARS: usize = 150;

/// The assembled story cannot be published.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("The final story text is empty")]
    EmptyBody,

    #[error("No title could be found in the story or the idea list")]
    MissingTitle,

    #[error("Title {title:?} does not produce a usable file name")]
    EmptySlug { title: String },

    #[error("Only final stories can be assembled; this one is {status}")]
    NotFinal { status: StoryStatus },
}

/// A story ready for the site.
#[derive(Debug, Clone)]
pub struct Document {
    /// The final story with title, slug and description filled in.
    pub story: Story,
    /// `YYYYMMDD-<slug>.html`
    pub file_name: String,
    /// Number of the pitch the story was written from, when known.
    pub idea_number: Option<u32>,
    pub html: String,
}

impl Document {
    pub fn date(&self) -> NaiveDate {
        self.story.date()
    }

    /// The date as shown to readers.
    pub fn display_date(&self) -> String {
        display_date(self.story.date())
    }
}

/// Formats final stories with the site's template and metadata.
#[derive(Debug, Clone)]
pub struct Assembler {
    template: String,
    site_name: String,
    tagline: String,
    byline: String,
}

impl Assembler {
    pub fn new(
        site_name: impl Into<String>,
        tagline: impl Into<String>,
        byline: impl Into<String>,
    ) -> Self {
        Self {
            template: DEFAULT_STORY_TEMPLATE.to_string(),
            site_name: site_name.into(),
            tagline: tagline.into(),
            byline: byline.into(),
        }
    }

    /// Use the site settings from `config`, loading a custom template if one
    /// is configured.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let assembler = Self::new(
            config.site.name.clone(),
            config.site.tagline.clone(),
            config.story.byline.clone(),
        );

        match &config.site.story_template {
            Some(path) => {
                let template =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: path.clone(),
                        source,
                    })?;
                Ok(assembler.with_template(template))
            }
            None => Ok(assembler),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Build the publishable document for an accepted story.
    pub fn assemble(&self, manuscript: &Manuscript) -> Result<Document, FormatError> {
        let story = &manuscript.story;
        if story.status() != StoryStatus::Final {
            return Err(FormatError::NotFinal {
                status: story.status(),
            });
        }

        let final_text = story.body().trim();
        if final_text.is_empty() {
            return Err(FormatError::EmptyBody);
        }

        let ideas_text = manuscript.transcript.ideas_text().unwrap_or_default();
        let ideas = parse_ideas(ideas_text);
        let chosen_number = chosen_idea_number(final_text).or_else(|| {
            manuscript
                .transcript
                .draft_text()
                .and_then(chosen_idea_number)
        });
        // Without an explicit choice the writer is assumed to have taken the first pitch.
        let chosen: Option<&Idea> = match chosen_number {
            Some(n) => ideas.iter().find(|idea| idea.number == n),
            None => ideas.first(),
        };

        let title = heading_title(final_text)
            .or_else(|| chosen.map(|idea| idea.title.clone()))
            .or_else(|| first_line_title(ideas_text))
            .filter(|t| !t.is_empty())
            .ok_or(FormatError::MissingTitle)?;

        let body = strip_preamble(final_text);
        if body.is_empty() {
            return Err(FormatError::EmptyBody);
        }
        let content = render_body(&body).ok_or(FormatError::EmptyBody)?;

        let description = chosen
            .map(|idea| idea.description.trim())
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .or_else(|| first_paragraph(&body))
            .map(|d| truncate_description(&d))
            .unwrap_or_default();

        let slug = slugify(&title);
        if slug.is_empty() {
            return Err(FormatError::EmptySlug { title });
        }
        let file_name = format!("{}-{}.html", story.date().format("%Y%m%d"), slug);
        let idea_number = chosen.map(|idea| idea.number).or(chosen_number);

        let html = fill_template(&self.template, |key| match key {
            "STORY_TITLE" => Some(escape_html(&title)),
            "STORY_DATE" => Some(escape_html(&display_date(story.date()))),
            "STORY_BYLINE" => Some(escape_html(&self.byline)),
            "STORY_DESCRIPTION" => Some(escape_html(&description)),
            "STORY_CONTENT" => Some(content.clone()),
            "IDEA_NUMBER" => Some(
                idea_number.map_or_else(|| "?".to_string(), |n| n.to_string()),
            ),
            "SITE_NAME" => Some(escape_html(&self.site_name)),
            "SITE_TAGLINE" => Some(escape_html(&self.tagline)),
            _ => None,
        });

        let mut story = story.clone();
        story
            .set_metadata(title, slug, description, self.byline.clone(), body)
            .map_err(|e| FormatError::NotFinal { status: e.status })?;

        debug!(file_name = %file_name, title = %story.title(), "Story assembled");

        Ok(Document {
            story,
            file_name,
            idea_number,
            html,
        })
    }
}

static CHOICE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\bI(?:'ve|\s+have)?\s+",
        r"(?:chose|choose|chosen|select|selected|picked|am\s+choosing)",
        r"\s+idea\s+(?:number\s+|#)?(\d+)",
    ))
    .expect("valid regex")
});
static IDEA_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bIdea\s+(?:number\s+|#)?(\d+)\s*:").expect("valid regex")
});
static CHOICE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^\s*(?:I(?:'ve|\s+have)?\s+",
        r"(?:choose|chose|chosen|select|selected|picked|am\s+choosing",
        r"|am\s+going\s+with|decided\s+on|will\s+go\s+with|will\s+use)\b",
        r"|Selected\b|Chosen\b|Based\s+on\b|Idea\s+(?:#|number\s+)?\d+)",
    ))
    .expect("valid regex")
});
static LIST_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+[.)]\s*").expect("valid regex"));
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s-]+").expect("valid regex"));
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Z_]+)\}\}").expect("valid regex"));

/// The idea number the writer said they picked.
fn chosen_idea_number(text: &str) -> Option<u32> {
    CHOICE_NUMBER
        .captures(text)
        .or_else(|| IDEA_LABEL.captures(text))
        .and_then(|caps| caps[1].parse().ok())
}

/// Text of the first markdown heading.
fn heading_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(clean_title)
        .filter(|t| !t.is_empty())
}

/// First non-empty line of the idea list, stripped of numbering and markup.
fn first_line_title(ideas: &str) -> Option<String> {
    let line = ideas.lines().map(str::trim).find(|l| !l.is_empty())?;
    let title = clean_title(&LIST_NUMBER.replace(line, ""));
    (!title.is_empty()).then_some(title)
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('#')
        .replace("**", "")
        .trim()
        .trim_matches(|c| matches!(c, '"' | '“' | '”' | '*' | '_'))
        .trim()
        .to_string()
}

/// Drop the leading choice lines and headline, leaving the story itself.
///
/// Only lines before the first story paragraph are looked at.
fn strip_preamble(text: &str) -> String {
    let mut heading_removed = false;
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.peek().map(|l| l.trim()) {
        if line.is_empty() || CHOICE_LINE.is_match(line) {
            lines.next();
        } else if !heading_removed && line.starts_with('#') {
            heading_removed = true;
            lines.next();
        } else {
            break;
        }
    }
    lines.collect::<Vec<_>>().join("\n").trim().to_string()
}

/// Blank-line separated paragraphs, skipping headings and rules.
fn paragraphs(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            if !current.is_empty() {
                out.push(current.join(" "));
                current.clear();
            }
        } else if !is_decoration(line) {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join(" "));
    }
    out
}

fn is_decoration(line: &str) -> bool {
    line.starts_with('#') || line.starts_with("---") || line.starts_with("===")
}

fn first_paragraph(body: &str) -> Option<String> {
    paragraphs(body).into_iter().next()
}

fn truncate_description(text: &str) -> String {
    if text.chars().count() <= DESCRIPTION_MAX_CHARS {
        return text.to_string();
    }
    let mut short: String = text.chars().take(DESCRIPTION_MAX_CHARS - 3).collect();
    short.truncate(short.trim_end().len());
    short.push_str("...");
    short
}

/// Lowercase, strip punctuation, hyphenate, and cap the length.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let cleaned = NON_WORD.replace_all(&lowered, "");
    let hyphenated = SEPARATORS.replace_all(&cleaned, "-");
    let capped: String = hyphenated.chars().take(SLUG_MAX_CHARS).collect();
    capped.trim_matches('-').to_string()
}

pub(crate) fn display_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

/// Render the body as HTML paragraphs.
///
/// The second paragraph (or the only one) is the `continue-reading` anchor
/// that index cards link to. Raw HTML from the model is shown as text.
/// Returns `None` when nothing printable is left.
fn render_body(body: &str) -> Option<String> {
    let source: Vec<&str> = body
        .lines()
        .filter(|line| {
            let line = line.trim_start();
            !(line.starts_with("---") || line.starts_with("==="))
        })
        .collect();
    let source = source.join("\n");

    let mut events: Vec<Event> = Vec::new();
    let mut in_heading = false;
    for event in Parser::new(&source) {
        match event {
            Event::Start(Tag::Heading { .. }) => in_heading = true,
            Event::End(TagEnd::Heading(_)) => in_heading = false,
            _ if in_heading => {}
            Event::Rule => {}
            Event::Html(raw) | Event::InlineHtml(raw) => events.push(Event::Text(raw)),
            other => events.push(other),
        }
    }

    let count = events
        .iter()
        .filter(|e| matches!(e, Event::Start(Tag::Paragraph)))
        .count();
    if count == 0 {
        return None;
    }
    let anchor = usize::from(count > 1);

    let mut seen = 0;
    for event in events.iter_mut() {
        if matches!(event, Event::Start(Tag::Paragraph)) {
            if seen == anchor {
                *event = Event::Html(r#"<p id="continue-reading">"#.into());
            }
            seen += 1;
        }
    }

    let mut html = String::with_capacity(source.len() * 2);
    pulldown_cmark::html::push_html(&mut html, events.into_iter());
    Some(html)
}

/// Replace `{{KEY}}` markers in one pass. Unknown keys stay as they are.
pub(crate) fn fill_template<F>(template: &str, value: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            value(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{Transcript, TurnKind};
    use claude::Usage;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn manuscript(ideas: &str, draft: &str, edits: &[&str]) -> Manuscript {
        let mut transcript = Transcript::new();
        let mut story = Story::draft(day());
        transcript
            .record(TurnKind::Idea, "p", ideas, Usage::default())
            .unwrap();
        transcript
            .record(TurnKind::Draft, "p", draft, Usage::default())
            .unwrap();
        story.revise(draft).unwrap();
        for (i, edit) in edits.iter().enumerate() {
            transcript
                .record(
                    TurnKind::Edit { pass: i as u32 + 1 },
                    "p",
                    *edit,
                    Usage::default(),
                )
                .unwrap();
            story.revise(*edit).unwrap();
        }
        story.accept().unwrap();
        Manuscript { story, transcript }
    }

    fn assembler() -> Assembler {
        Assembler::new("Prestige Report", "Exclusive Stories", "Staff")
    }

    #[test]
    fn test_minimal_scenario() {
        let doc = assembler()
            .assemble(&manuscript("Idea: a gala", "Draft: ...", &["Edit: ...(final)"]))
            .unwrap();

        assert_eq!(doc.story.title(), "Idea: a gala");
        assert_eq!(doc.story.slug(), "idea-a-gala");
        assert_eq!(doc.story.body(), "Edit: ...(final)");
        assert_eq!(doc.file_name, "20261019-idea-a-gala.html");
        assert!(doc
            .html
            .contains(r#"<p id="continue-reading">Edit: ...(final)</p>"#));
        assert!(doc.html.contains("October 19, 2026"));
    }

    #[test]
    fn test_heading_and_choice_line() {
        let ideas = "1. \"The Last Gala\": A dynasty throws one final party.\n\
                     2. \"Quiet Money\": A collector's secret.";
        let final_text = "I choose idea 2.\n\n# Quiet Money, Loud Secrets\n\n\
                          First paragraph here.\n\nSecond paragraph.\n\nThird.";
        let doc = assembler()
            .assemble(&manuscript(ideas, final_text, &[final_text]))
            .unwrap();

        assert_eq!(doc.story.title(), "Quiet Money, Loud Secrets");
        assert_eq!(doc.story.slug(), "quiet-money-loud-secrets");
        assert_eq!(doc.story.description(), "A collector's secret.");
        assert!(doc.story.body().starts_with("First paragraph here."));
        assert!(doc.html.contains("<p>First paragraph here.</p>"));
        assert!(doc
            .html
            .contains(r#"<p id="continue-reading">Second paragraph.</p>"#));
        assert!(!doc.html.contains("I choose idea"));
    }

    #[test]
    fn test_only_leading_choice_lines_are_dropped() {
        let final_text = "I choose idea 1.\n# The Gala\n\nThe night opened with champagne.\n\n\
            Chosen by the committee, the guests filed in.\n\n\
            Based on what the butler saw, nobody left early.\n\n\
            Selected guests stayed for breakfast.";
        let doc = assembler()
            .assemble(&manuscript("1. \"The Gala\": A party.", "d", &[final_text]))
            .unwrap();

        let body = doc.story.body();
        assert!(body.starts_with("The night opened with champagne."));
        assert!(body.contains("Chosen by the committee"));
        assert!(body.contains("Based on what the butler saw"));
        assert!(body.ends_with("Selected guests stayed for breakfast."));
        assert!(!body.contains("I choose idea"));
        assert!(doc
            .html
            .contains("<p>Selected guests stayed for breakfast.</p>"));
    }

    #[test]
    fn test_idea_number_on_page() {
        let ideas = "1. \"Salt and Silk\": A perfumer's feud.\n\
                     2. \"Night Ferry\": Smugglers at dawn.";
        let doc = assembler()
            .with_template("Idea #{{IDEA_NUMBER}}")
            .assemble(&manuscript(ideas, "I choose idea 2.\n\nText.", &["Text."]))
            .unwrap();
        assert_eq!(doc.idea_number, Some(2));
        assert_eq!(doc.html, "Idea #2");

        let doc = assembler()
            .with_template("Idea #{{IDEA_NUMBER}}")
            .assemble(&manuscript("Idea: a gala", "d", &["Text."]))
            .unwrap();
        assert_eq!(doc.idea_number, None);
        assert_eq!(doc.html, "Idea #?");
    }

    #[test]
    fn test_title_from_chosen_idea() {
        let ideas = "1. \"Salt and Silk\": A perfumer's feud.\n\
                     2. \"Night Ferry\": Smugglers at dawn.";
        let doc = assembler()
            .assemble(&manuscript(
                ideas,
                "Idea 2: I went with the ferry.\n\nThe boat left late.",
                &["The boat left late, as boats do."],
            ))
            .unwrap();

        assert_eq!(doc.story.title(), "Night Ferry");
        assert_eq!(doc.story.description(), "Smugglers at dawn.");
    }

    #[test]
    fn test_description_falls_back_to_first_paragraph() {
        let long = "word ".repeat(60);
        let doc = assembler()
            .assemble(&manuscript("Gala Night", "d", &[long.trim()]))
            .unwrap();
        let description = doc.story.description();
        assert!(description.ends_with("..."));
        assert!(description.chars().count() <= 150);
    }

    #[test]
    fn test_text_is_escaped() {
        let doc = assembler()
            .assemble(&manuscript(
                "1. \"Salt & <Silk>\": feud",
                "d",
                &["She said <script>alert(1)</script> & left."],
            ))
            .unwrap();
        assert!(doc.html.contains("Salt &amp; &lt;Silk&gt;"));
        assert!(!doc.html.contains("<script>"));
    }

    #[test]
    fn test_empty_body() {
        let mut m = manuscript("Idea: a gala", "d", &["x"]);
        m.story = {
            let mut s = Story::draft(day());
            s.revise("   ").unwrap();
            s.accept().unwrap();
            s
        };
        assert_eq!(assembler().assemble(&m).unwrap_err(), FormatError::EmptyBody);

        let m = manuscript("Idea: a gala", "d", &["I choose idea 1."]);
        assert_eq!(assembler().assemble(&m).unwrap_err(), FormatError::EmptyBody);
    }

    #[test]
    fn test_missing_title() {
        let m = manuscript("   \n", "d", &["Body only."]);
        assert_eq!(
            assembler().assemble(&m).unwrap_err(),
            FormatError::MissingTitle
        );
    }

    #[test]
    fn test_empty_slug() {
        let m = manuscript("!!!", "d", &["Body only."]);
        assert!(matches!(
            assembler().assemble(&m).unwrap_err(),
            FormatError::EmptySlug { .. }
        ));
    }

    #[test]
    fn test_draft_story_rejected() {
        let mut m = manuscript("Idea: a gala", "d", &["x"]);
        m.story = Story::draft(day());
        assert_eq!(
            assembler().assemble(&m).unwrap_err(),
            FormatError::NotFinal {
                status: StoryStatus::Draft
            }
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(
            slugify("The Last Gala at Villa Sorrento"),
            "the-last-gala-at-villa-sorrento"
        );
        assert_eq!(slugify("  Salt -- & Silk!  "), "salt-silk");
        assert_eq!(
            slugify("An Extraordinarily Long Headline About Nothing In Particular"),
            "an-extraordinarily-long-headline-about-n"
        );
        assert_eq!(
            slugify("Ends at a hyphen boundary exactly here x"),
            "ends-at-a-hyphen-boundary-exactly-here-x"
        );
    }

    #[test]
    fn test_fill_template_single_pass() {
        let out = fill_template("{{A}} {{B}} {{C}}", |key| match key {
            "A" => Some("{{B}}".to_string()),
            "B" => Some("b".to_string()),
            _ => None,
        });
        assert_eq!(out, "{{B}} b {{C}}");
    }

    #[test]
    fn test_custom_template() {
        let doc = assembler()
            .with_template("<h1>{{STORY_TITLE}}</h1>{{STORY_BYLINE}}")
            .assemble(&manuscript("Idea: a gala", "d", &["Text."]))
            .unwrap();
        assert_eq!(doc.html, "<h1>Idea: a gala</h1>Staff");
    }
}
