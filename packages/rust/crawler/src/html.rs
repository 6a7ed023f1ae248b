//! HTML → readable text, title and link extraction.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::FetchedText;

/// A hyperlink with its anchor text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    pub text: String,
}

/// Content containers tried in priority order before falling back to `<body>`.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    r#"[role="main"]"#,
    "#content",
    ".content",
    "body",
];

/// Tags never worth sending to the model.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "svg", "form",
];

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title, h1").expect("valid selector"));
static MULTI_BLANK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Reduce an HTML document to title, readable text and absolute links.
pub fn page_text(html: &str, base_url: &Url) -> FetchedText {
    let doc = Html::parse_document(html);

    let title = doc
        .select(&TITLE_SEL)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|t| !t.is_empty());

    let links = extract_links(&doc, base_url);
    let content_html = content_html(&doc);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let text = match converter.convert(&content_html) {
        Ok(md) => md,
        Err(e) => {
            debug!(url = %base_url, error = %e, "htmd conversion failed, using plain text");
            Html::parse_fragment(&content_html)
                .root_element()
                .text()
                .collect::<Vec<_>>()
                .join(" ")
        }
    };
    let text = MULTI_BLANK_RE.replace_all(text.trim(), "\n\n").into_owned();

    FetchedText {
        url: base_url.to_string(),
        title,
        text,
        links,
    }
}

fn content_html(doc: &Html) -> String {
    for sel_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(sel_str) else {
            continue;
        };
        if let Some(el) = doc.select(&selector).next() {
            let inner = el.inner_html();
            if !inner.trim().is_empty() {
                return inner;
            }
        }
    }
    doc.root_element().html()
}

/// All links in the document resolved against `base_url`, fragments removed,
/// de-duplicated in document order.
fn extract_links(doc: &Html, base_url: &Url) -> Vec<Link> {
    let mut links: Vec<Link> = Vec::new();

    for el in doc.select(&LINK_SEL) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        if let Ok(mut resolved) = base_url.join(href) {
            resolved.set_fragment(None);
            let url = resolved.to_string();
            if links.iter().any(|l| l.url == url) {
                continue;
            }
            links.push(Link {
                url,
                text: collapse_whitespace(&el.text().collect::<String>()),
            });
        }
    }

    links
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalise a URL for de-duplication: no fragment, lowercase host, no
/// trailing slash except on the root path. Unparseable input is returned
/// trimmed.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    url.set_fragment(None);
    let mut s = url.to_string();
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}
