//! Extraction Provider Adapter: turns unstructured search/page text into typed
//! records with a language model.
//!
//! [`extract`] is the single typed entry point. Whatever the provider returns
//! (malformed JSON, the wrong shape, a transport error), the caller receives a
//! fully-populated schema object: either parsed output with missing keys
//! filled from defaults, or the schema's canonical empty value.

mod openrouter;
mod schema;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use schoolintel_shared::Result;

pub use openrouter::{OpenRouterExtractor, OpenRouterOptions};
pub use schema::{ExtractedCompetitor, ExtractedContact, ExtractedStarter, ExtractionSchema, SchoolProfile};

/// Upper bound on the content passed to the model in one request.
pub const MAX_CONTENT_CHARS: usize = 12_000;

/// One structured-output request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionRequest {
    /// [`ExtractionSchema::NAME`] of the target type.
    pub schema_name: &'static str,
    /// System prompt: role, rules and output template.
    pub system: String,
    /// User content to extract from.
    pub content: String,
    /// JSON template the output must follow.
    pub schema: serde_json::Value,
}

/// Raw provider answer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Completion {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub model: String,
}

/// Raw language-model seam. Implementations perform exactly one call and do
/// not retry; [`extract`] decides what to do with failures.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &ExtractionRequest) -> Result<Completion>;
}

/// How an [`Extraction`] value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    /// Model output parsed into the schema.
    Parsed,
    /// Model answered but the output was not valid for the schema.
    Malformed,
    /// The provider call itself failed.
    ProviderError,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Malformed => "malformed",
            Self::ProviderError => "provider_error",
        }
    }
}

/// A schema value plus how it was obtained. `value` is always complete.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction<T> {
    pub value: T,
    pub status: ExtractionStatus,
}

impl<T> Extraction<T> {
    pub fn is_parsed(&self) -> bool {
        self.status == ExtractionStatus::Parsed
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Extract a `T` from `content`.
///
/// Never fails: provider errors and malformed output both yield `T::default()`.
pub async fn extract<T: ExtractionSchema>(
    provider: &dyn ExtractionProvider,
    content: &str,
) -> Extraction<T> {
    let request = build_request::<T>(content);

    let completion = match provider.complete(&request).await {
        Ok(c) => c,
        Err(e) => {
            warn!(schema = T::NAME, provider = provider.name(), error = %e, "extraction call failed, using empty structure");
            return Extraction {
                value: T::default(),
                status: ExtractionStatus::ProviderError,
            };
        }
    };

    match parse_structured::<T>(&completion.text) {
        Some(value) => {
            debug!(
                schema = T::NAME,
                tokens_in = completion.tokens_in,
                tokens_out = completion.tokens_out,
                "extraction parsed"
            );
            Extraction {
                value,
                status: ExtractionStatus::Parsed,
            }
        }
        None => {
            warn!(
                schema = T::NAME,
                output_len = completion.text.len(),
                "model output did not match schema, using empty structure"
            );
            Extraction {
                value: T::default(),
                status: ExtractionStatus::Malformed,
            }
        }
    }
}

/// Build the request for schema `T` over (truncated) `content`.
pub fn build_request<T: ExtractionSchema>(content: &str) -> ExtractionRequest {
    let schema = T::template();
    let system = format!(
        "{}\n\nRespond with a single JSON object shaped exactly like this template. \
         Use \"{}\" for any text field you cannot find and [] for empty lists. \
         Do not invent facts.\n\n{}",
        T::instructions(),
        schoolintel_shared::NOT_FOUND,
        serde_json::to_string_pretty(&schema).unwrap_or_default(),
    );
    ExtractionRequest {
        schema_name: T::NAME,
        system,
        content: truncate_content(content, MAX_CONTENT_CHARS),
        schema,
    }
}

/// Parse model output into `T`, tolerating Markdown code fences and prose
/// around the JSON object.
pub fn parse_structured<T: ExtractionSchema>(text: &str) -> Option<T> {
    let body = strip_code_fences(text);
    if let Ok(value) = serde_json::from_str::<T>(body) {
        return Some(value);
    }

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<T>(&body[start..=end]).ok()
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((cut, _)) => {
            format!("{}\n\n[... content truncated ...]", &content[..cut])
        }
    }
}
