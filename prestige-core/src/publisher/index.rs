//! Front page maintenance.
//!
//! The index has a featured card for the newest story and a `story-grid`
//! of archive cards, newest first. Edits are plain text substitutions so
//! hand-made changes to the rest of the page survive.

use crate::assembler::{escape_html, fill_template};
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

/// Built-in front page used when the site has none yet.
pub const DEFAULT_INDEX_TEMPLATE: &str = include_str!("../../templates/index.html");

/// Stylesheet written when the site has none.
pub const DEFAULT_STYLESHEET: &str = include_str!("../../templates/style.css");

const GRID_OPEN: &str = r#"<div class="story-grid">"#;

static FEATURED_CARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<div class="story-card featured">.*?</div>\s*</div>"#).expect("valid regex")
});
static FEATURED_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<section class="featured-story">\s*"#).expect("valid regex"));
static MAIN_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<main class="container">\s*"#).expect("valid regex"));
static MAIN_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:</section>\s*)?</main>").expect("valid regex"));
static ARCHIVE_CARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)\n?[ \t]*<div class="story-card">.*?</a>\s*</div>"#).expect("valid regex")
});

/// What a card shows about a story.
#[derive(Debug, Clone, Copy)]
pub struct CardInfo<'a> {
    pub title: &'a str,
    pub date: &'a str,
    pub description: &'a str,
    pub file_name: &'a str,
}

/// A fresh front page with no stories.
pub fn new_index(site_name: &str, tagline: &str) -> String {
    fill_template(DEFAULT_INDEX_TEMPLATE, |key| match key {
        "SITE_NAME" => Some(escape_html(site_name)),
        "SITE_TAGLINE" => Some(escape_html(tagline)),
        _ => None,
    })
}

pub fn featured_card(card: &CardInfo) -> String {
    format!(
        r#"<div class="story-card featured">
            <h2 class="story-title">{title}</h2>
            <div class="story-meta">
                <span class="story-date">{date}</span>
            </div>
            <div class="story-excerpt">
                <p>{description}</p>
                <a href="stories/{file}#continue-reading"
                   class="read-more">Continue reading &rarr;</a>
            </div>
        </div>"#,
        title = escape_html(card.title),
        date = escape_html(card.date),
        description = escape_html(card.description),
        file = card.file_name,
    )
}

pub fn archive_card(card: &CardInfo) -> String {
    format!(
        r#"
            <div class="story-card">
                <h3 class="story-title">{title}</h3>
                <div class="story-meta">
                    <span class="story-date">{date}</span>
                </div>
                <p class="story-excerpt">{description}</p>
                <a href="stories/{file}#continue-reading"
                   class="read-more">Continue reading &rarr;</a>
            </div>"#,
        title = escape_html(card.title),
        date = escape_html(card.date),
        description = escape_html(card.description),
        file = card.file_name,
    )
}

/// Feature the new story and prepend it to the archive.
///
/// Missing sections are added first: the archive grid before `</main>`,
/// the featured section after `<main class="container">`.
pub fn update_index(index: &str, card: &CardInfo) -> String {
    let mut page = ensure_archive(index);

    let featured = featured_card(card);
    page = if FEATURED_CARD.is_match(&page) {
        FEATURED_CARD
            .replacen(&page, 1, NoExpand(&featured))
            .into_owned()
    } else if FEATURED_SECTION.is_match(&page) {
        let section = format!("<section class=\"featured-story\">\n        {featured}\n    ");
        FEATURED_SECTION
            .replacen(&page, 1, NoExpand(&section))
            .into_owned()
    } else if MAIN_OPEN.is_match(&page) {
        let main = format!(
            "<main class=\"container\">\n\n    \
             <section class=\"featured-story\">\n        {featured}\n    </section>\n\n    "
        );
        MAIN_OPEN.replacen(&page, 1, NoExpand(&main)).into_owned()
    } else {
        page.replacen(
            GRID_OPEN,
            &format!("{featured}\n        {GRID_OPEN}"),
            1,
        )
    };

    page.replacen(GRID_OPEN, &format!("{GRID_OPEN}{}", archive_card(card)), 1)
}

/// Drop archive cards that link to `file_name`.
pub fn remove_cards(index: &str, file_name: &str) -> String {
    let link = format!("stories/{file_name}");
    ARCHIVE_CARD
        .replace_all(index, |caps: &regex::Captures| {
            let card = &caps[0];
            if card.contains(&format!("{link}\"")) || card.contains(&format!("{link}#")) {
                String::new()
            } else {
                card.to_string()
            }
        })
        .into_owned()
}

/// Number of archive cards on the page.
pub fn archive_len(index: &str) -> usize {
    ARCHIVE_CARD.find_iter(index).count()
}

fn ensure_archive(index: &str) -> String {
    if index.contains(GRID_OPEN) {
        return index.to_string();
    }

    let archive = concat!(
        "\n\n    <section class=\"story-archive\">\n",
        "        <h2 class=\"section-title\">Recent Stories</h2>\n",
        "        <div class=\"story-grid\">\n        </div>\n",
        "    </section>\n\n    ",
    );
    if let Some(found) = MAIN_CLOSE.find(index) {
        let closing = found.as_str();
        let (section_close, main_close) = match closing.strip_suffix("</main>") {
            Some(rest) if !rest.is_empty() => ("</section>", "</main>"),
            _ => ("", "</main>"),
        };
        let mut page = String::with_capacity(index.len() + archive.len());
        page.push_str(&index[..found.start()]);
        page.push_str(section_close);
        page.push_str(archive);
        page.push_str(main_close);
        page.push_str(&index[found.end()..]);
        page
    } else if let Some(pos) = index.find("</body>") {
        format!("{}{}{}", &index[..pos], archive.trim_start(), &index[pos..])
    } else {
        format!("{index}{}", archive.trim_end())
    }
}
