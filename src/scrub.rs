//! HTML boilerplate stripping and main-content extraction.
//!
//! Turns a fetched page into normalized text plus any example snippets
//! (code blocks, "for example" paragraphs). Navigation, headers, footers,
//! sidebars, and scripts are dropped. Content inside `<article>` or
//! `<main>` is preferred over the raw `<body>` when present.

use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Output of scrubbing one HTML page.
#[derive(Debug, Clone)]
pub struct ScrubbedPage {
    pub title: Option<String>,
    /// Normalized main text: blocks joined by blank lines, inner
    /// whitespace collapsed. Stable input for fingerprinting.
    pub text: String,
    pub examples: Vec<String>,
}

const BOILERPLATE_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "form", "noscript",
];

pub fn scrub(html: &str) -> ScrubbedPage {
    let doc = Html::parse_document(html);

    let title_sel = Selector::parse("title").expect("static selector");
    let title = doc
        .select(&title_sel)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let container_sel = Selector::parse("article, main").expect("static selector");
    let body_sel = Selector::parse("body").expect("static selector");
    let root = doc
        .select(&container_sel)
        .next()
        .or_else(|| doc.select(&body_sel).next());

    let mut blocks: Vec<String> = Vec::new();
    let mut examples: Vec<String> = Vec::new();

    if let Some(root) = root {
        let block_sel = Selector::parse("h1, h2, h3, h4, p, li").expect("static selector");
        for el in root.select(&block_sel) {
            if inside_boilerplate(&el) {
                continue;
            }
            let text = collapse_whitespace(&el.text().collect::<String>());
            if text.is_empty() {
                continue;
            }
            if is_example_paragraph(&text) {
                examples.push(text.clone());
            }
            blocks.push(text);
        }

        let pre_sel = Selector::parse("pre").expect("static selector");
        for el in root.select(&pre_sel) {
            if inside_boilerplate(&el) {
                continue;
            }
            let code = el.text().collect::<String>().trim().to_string();
            if !code.is_empty() {
                examples.push(code);
            }
        }
    }

    ScrubbedPage {
        title,
        text: blocks.join("\n\n"),
        examples,
    }
}

/// Extract same-page `<a href>` targets resolved against `base`.
/// Fragments are stripped; unparsable hrefs are skipped.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let link_sel = Selector::parse("a[href]").expect("static selector");

    let mut links = Vec::new();
    for el in doc.select(&link_sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("javascript:") {
            continue;
        }
        if let Ok(mut url) = base.join(href) {
            url.set_fragment(None);
            if url.scheme() == "http" || url.scheme() == "https" {
                links.push(url);
            }
        }
    }
    links
}

fn inside_boilerplate(el: &ElementRef) -> bool {
    for ancestor in el.ancestors() {
        if let Some(element) = ancestor.value().as_element() {
            if BOILERPLATE_TAGS.contains(&element.name()) {
                return true;
            }
        }
    }
    false
}

fn is_example_paragraph(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("for example")
        || lower.contains("for instance")
        || lower.contains("e.g.")
        || lower.starts_with("example:")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
