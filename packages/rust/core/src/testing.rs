//! Scripted providers for core tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use schoolintel_crawler::{FetchedText, Link, PageFetcher};
use schoolintel_extraction::{Completion, ExtractionProvider, ExtractionRequest};
use schoolintel_search::{HitKind, SearchHit, SearchOutcome, SearchProvider};
use schoolintel_shared::{ExecutionMode, Result, SchoolIntelError};

use crate::stages::StageContext;

pub fn hit(title: &str, url: &str, snippet: &str) -> SearchHit {
    SearchHit {
        title: title.into(),
        url: url.into(),
        snippet: snippet.into(),
        rank: 1,
        kind: HitKind::Organic,
    }
}

enum Scripted {
    Hits(Vec<SearchHit>),
    Error,
}

/// Answers queries by the first rule whose needle the query contains
/// (case-insensitive), failure rules first; unmatched queries get `NotFound`.
#[derive(Default)]
pub struct ScriptedSearch {
    rules: Vec<(String, Scripted)>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, needle: &str, hits: Vec<SearchHit>) -> Self {
        self.rules.push((needle.to_lowercase(), Scripted::Hits(hits)));
        self
    }

    pub fn failing(mut self, needle: &str) -> Self {
        self.rules.push((needle.to_lowercase(), Scripted::Error));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, query: &str, max_results: usize) -> SearchOutcome {
        self.calls.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let lowered = query.to_lowercase();
        let matching = |(needle, _): &&(String, Scripted)| lowered.contains(needle.as_str());
        let rule = self
            .rules
            .iter()
            .filter(|rule| matches!(rule.1, Scripted::Error))
            .find(matching)
            .or_else(|| self.rules.iter().find(matching));

        match rule {
            Some((_, Scripted::Hits(hits))) if !hits.is_empty() => SearchOutcome::Found(
                hits.iter()
                    .take(max_results)
                    .enumerate()
                    .map(|(i, h)| SearchHit {
                        rank: i as u32 + 1,
                        ..h.clone()
                    })
                    .collect(),
            ),
            Some((_, Scripted::Error)) => SearchOutcome::ProviderError("simulated outage".into()),
            _ => SearchOutcome::NotFound,
        }
    }
}

/// Answers by schema name; unscripted schemas fail like a provider outage.
#[derive(Default)]
pub struct ScriptedExtractor {
    answers: HashMap<&'static str, String>,
    calls: Mutex<Vec<ExtractionRequest>>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(mut self, schema: &'static str, value: serde_json::Value) -> Self {
        self.answers.insert(schema, value.to_string());
        self
    }

    pub fn with_text(mut self, schema: &'static str, text: &str) -> Self {
        self.answers.insert(schema, text.to_string());
        self
    }

    pub fn requests(&self) -> Vec<ExtractionRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionProvider for ScriptedExtractor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ExtractionRequest) -> Result<Completion> {
        self.calls.lock().unwrap().push(request.clone());
        match self.answers.get(request.schema_name) {
            Some(text) => Ok(Completion {
                text: text.clone(),
                tokens_in: 100,
                tokens_out: 50,
                model: "scripted".into(),
            }),
            None => Err(SchoolIntelError::Extraction("simulated model outage".into())),
        }
    }
}

/// Serves canned pages and PDFs; anything else is a network error.
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: HashMap<String, FetchedText>,
    pdfs: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, text: &str, links: &[(&str, &str)]) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedText {
                url: url.to_string(),
                title: None,
                text: text.to_string(),
                links: links
                    .iter()
                    .map(|(url, text)| Link {
                        url: url.to_string(),
                        text: text.to_string(),
                    })
                    .collect(),
            },
        );
        self
    }

    pub fn with_pdf(mut self, url: &str, text: &str) -> Self {
        self.pdfs.insert(url.to_string(), text.to_string());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_text(&self, url: &str) -> Result<FetchedText> {
        self.calls.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| SchoolIntelError::Network(format!("{url}: HTTP 404 Not Found")))
    }

    async fn fetch_pdf_text(&self, url: &str) -> Result<String> {
        self.calls.lock().unwrap().push(url.to_string());
        self.pdfs
            .get(url)
            .cloned()
            .ok_or_else(|| SchoolIntelError::Network(format!("{url}: connection reset")))
    }
}

pub fn context(
    search: ScriptedSearch,
    extractor: ScriptedExtractor,
    fetcher: ScriptedFetcher,
) -> (StageContext, Arc<ScriptedSearch>, Arc<ScriptedExtractor>, Arc<ScriptedFetcher>) {
    let search = Arc::new(search);
    let extractor = Arc::new(extractor);
    let fetcher = Arc::new(fetcher);
    let ctx = StageContext {
        search: search.clone(),
        extractor: extractor.clone(),
        fetcher: fetcher.clone(),
        mode: ExecutionMode::Concurrent,
    };
    (ctx, search, extractor, fetcher)
}

/// A fully populated basic-research answer for Example Primary School.
pub fn school_profile_json() -> serde_json::Value {
    serde_json::json!({
        "website": "https://www.example-primary.sch.uk",
        "address": "1 School Lane, Leeds LS1 1AA",
        "phone": "0113 496 0000",
        "email": "office@example-primary.sch.uk",
        "email_pattern": "initial.surname@example-primary.sch.uk",
        "head_teacher": "Mrs A Smith",
        "ofsted_rating": "Good",
        "inspection_date": "2023-05-10",
        "contacts": [
            { "role": "Deputy Headteacher", "name": "Mr B Jones", "confidence": 0.9, "evidence_urls": ["https://www.example-primary.sch.uk/staff"] },
            { "role": "Deputy Head", "name": "Ms C Brown", "confidence": 0.6 },
            { "role": "SENCo", "name": "Mrs D Green", "confidence": 1.4 },
            { "role": "Caretaker", "name": "Mr E White" }
        ],
        "achievements": ["Eco-Schools Green Flag", "Not found"],
        "conversation_starters": [
            { "topic": "New library", "detail": "Opened in 2024", "source_url": "https://news.example/1", "relevance": 0.4 },
            { "topic": "Green Flag", "detail": "Eco award", "source_url": "https://news.example/2", "relevance": 0.8 }
        ]
    })
}

pub fn basic_search() -> ScriptedSearch {
    let mut search = ScriptedSearch::new();
    for (needle, url) in [
        ("leeds school", "https://www.example-primary.sch.uk/"),
        ("ofsted rating", "https://reports.ofsted.gov.uk/provider/21/107000"),
        ("business manager", "https://www.example-primary.sch.uk/staff"),
        ("news achievements", "https://news.example/1"),
        ("staff email", "https://www.example-primary.sch.uk/contact"),
    ] {
        let hits = (0..6)
            .map(|i| hit(&format!("{needle} {i}"), &format!("{url}?r={i}"), "snippet"))
            .collect();
        search = search.with_hits(needle, hits);
    }
    search
}
