//! reqwest-backed [`PageFetcher`].

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use schoolintel_shared::{Result, SchoolIntelError};

use crate::{FetchedText, PageFetcher, html};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("SchoolIntel/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum response size (20 MB; inspection reports can be large).
const DEFAULT_MAX_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FetcherOptions {
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// HTTP page fetcher with timeouts, a size cap and private-address blocking.
pub struct HttpFetcher {
    client: Client,
    max_bytes: usize,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl HttpFetcher {
    pub fn new(options: FetcherOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(options.timeout)
            .build()
            .map_err(|e| SchoolIntelError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_bytes: options.max_bytes,
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs (for integration tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    fn parse_target(&self, raw: &str) -> Result<Url> {
        let url = Url::parse(raw)
            .map_err(|e| SchoolIntelError::validation(format!("invalid URL {raw}: {e}")))?;
        if !self.allow_localhost && is_ssrf_target(&url) {
            return Err(SchoolIntelError::validation(format!(
                "refusing to fetch private or non-HTTP target: {url}"
            )));
        }
        Ok(url)
    }

    /// GET `url` and return the final URL and body bytes.
    async fn fetch_bytes(&self, url: &Url) -> Result<(Url, Vec<u8>)> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| SchoolIntelError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SchoolIntelError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(SchoolIntelError::Network(format!(
                    "{url}: response too large ({len} bytes)"
                )));
            }
        }

        let final_url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| SchoolIntelError::Network(format!("{url}: body read failed: {e}")))?;

        if body.len() > self.max_bytes {
            return Err(SchoolIntelError::Network(format!(
                "{url}: response too large ({} bytes)",
                body.len()
            )));
        }

        Ok((final_url, body.to_vec()))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch_text(&self, url: &str) -> Result<FetchedText> {
        let target = self.parse_target(url)?;
        let (final_url, body) = self.fetch_bytes(&target).await?;
        let html = String::from_utf8_lossy(&body);
        let page = html::page_text(&html, &final_url);
        debug!(chars = page.text.len(), links = page.links.len(), "page fetched");
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn fetch_pdf_text(&self, url: &str) -> Result<String> {
        let target = self.parse_target(url)?;
        let (_, body) = self.fetch_bytes(&target).await?;

        if !body.starts_with(b"%PDF") {
            return Err(SchoolIntelError::parse(format!("{url}: response is not a PDF")));
        }

        // PDF parsing is CPU-bound; keep it off the async workers.
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&body))
            .await
            .map_err(|e| SchoolIntelError::parse(format!("PDF extraction task failed: {e}")))?
            .map_err(|e| SchoolIntelError::parse(format!("{url}: PDF extraction failed: {e}")))?;

        debug!(chars = text.len(), "pdf text extracted");
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
