//! Page fetching for enrichment stages.
//!
//! This crate provides:
//! - [`PageFetcher`], the seam stages use to read web pages and PDFs
//! - [`HttpFetcher`]: reqwest implementation with size limits and SSRF guard
//! - [`html`]: HTML → readable text conversion and link discovery

pub mod fetcher;
pub mod html;

use async_trait::async_trait;

use schoolintel_shared::Result;

pub use fetcher::{FetcherOptions, HttpFetcher};
pub use html::{Link, normalize_url, page_text};

/// Readable text of a fetched HTML page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedText {
    /// Final URL after redirects.
    pub url: String,
    pub title: Option<String>,
    /// Main content converted to Markdown-flavoured text.
    pub text: String,
    /// Absolute links found on the page, document order.
    pub links: Vec<Link>,
}

impl FetchedText {
    /// Links whose URL or anchor text contains any of `keywords` (lowercase).
    pub fn links_matching<'a>(&'a self, keywords: &'a [&'a str]) -> impl Iterator<Item = &'a Link> {
        self.links.iter().filter(move |link| {
            let url = link.url.to_ascii_lowercase();
            let text = link.text.to_ascii_lowercase();
            keywords.iter().any(|k| url.contains(k) || text.contains(k))
        })
    }
}

/// Reads web pages and documents on behalf of enrichment stages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch an HTML page and reduce it to readable text plus links.
    async fn fetch_text(&self, url: &str) -> Result<FetchedText>;

    /// Download a PDF and extract its text.
    async fn fetch_pdf_text(&self, url: &str) -> Result<String>;
}
