//! Financial stage: DfE URN → benchmarking page → spending figures, with a
//! search-snippet fallback.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use schoolintel_extraction::extract;
use schoolintel_search::SearchHit;
use schoolintel_shared::{
    ConversationStarter, FinancialData, RecordDelta, Result, SchoolIntelError, SchoolRecord,
    present,
};

use super::{EnrichmentStage, StageContext, StageKind, format_gbp, hit_urls, hits_text};

/// Financial benchmarking service, one page per URN.
const BENCHMARKING_BASE: &str =
    "https://financial-benchmarking-and-insights-tool.education.gov.uk/school";

static URN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:/Establishment/Details/|[?&]urn=|\bURN[:\s]+|/school/)(\d{6})\b")
        .expect("valid regex")
});

pub struct FinancialStage;

pub(crate) fn urn_query(record: &SchoolRecord) -> String {
    format!(
        "{} site:get-information-schools.service.gov.uk",
        record.search_label()
    )
}

pub(crate) fn spending_query(record: &SchoolRecord) -> String {
    format!(
        "{} school spending supply staff costs financial benchmarking",
        record.search_label()
    )
}

/// First six-digit URN mentioned in result URLs or snippets.
pub(crate) fn find_urn(hits: &[SearchHit]) -> Option<String> {
    hits.iter().find_map(|h| {
        [&h.url, &h.snippet, &h.title]
            .into_iter()
            .find_map(|text| URN_RE.captures(text))
            .map(|caps| caps[1].to_string())
    })
}

fn benchmarking_url(urn: &str) -> String {
    format!("{BENCHMARKING_BASE}/{urn}")
}

#[async_trait]
impl EnrichmentStage for FinancialStage {
    fn kind(&self) -> StageKind {
        StageKind::Financial
    }

    async fn run(&self, record: &SchoolRecord, ctx: &StageContext) -> Result<RecordDelta> {
        let mut sources = Vec::new();

        // Method A: resolve the URN, then read the benchmarking page.
        let urn_hits = ctx.search.search(&urn_query(record), 3).await.into_hits();
        sources.extend(hit_urls(&urn_hits));
        let urn = find_urn(&urn_hits);

        let mut financial = None;
        if let Some(urn) = &urn {
            let url = benchmarking_url(urn);
            match ctx.fetcher.fetch_text(&url).await {
                Ok(page) => {
                    let extraction = extract::<FinancialData>(ctx.extractor.as_ref(), &page.text).await;
                    if extraction.is_parsed() && extraction.value.has_figures() {
                        let mut data = extraction.value;
                        data.urn = urn.clone();
                        data.source_url = url.clone();
                        data.retrieval_method = "benchmarking_page".into();
                        sources.push(url);
                        financial = Some(data);
                    } else {
                        debug!(%urn, "benchmarking page had no usable figures");
                    }
                }
                Err(e) => warn!(%urn, error = %e, "benchmarking page fetch failed, trying snippets"),
            }
        }

        // Method B: whatever the search snippets say.
        let financial = match financial {
            Some(data) => data,
            None => {
                let hits = ctx.search.search(&spending_query(record), 5).await.into_hits();
                if hits.is_empty() {
                    return Err(SchoolIntelError::stage(
                        StageKind::Financial.as_str(),
                        "no financial sources found",
                    ));
                }
                sources.extend(hit_urls(&hits));

                let extraction = extract::<FinancialData>(ctx.extractor.as_ref(), &hits_text(&hits)).await;
                if !extraction.is_parsed() || !extraction.value.has_figures() {
                    return Err(SchoolIntelError::stage(
                        StageKind::Financial.as_str(),
                        format!("no figures found ({})", extraction.status.as_str()),
                    ));
                }
                let mut data = extraction.value;
                if let Some(urn) = &urn {
                    data.urn = urn.clone();
                }
                if present(&data.source_url).is_none() {
                    data.source_url = hits[0].url.clone();
                }
                data.retrieval_method = "search_snippets".into();
                data
            }
        };

        info!(
            school = %record.name,
            method = %financial.retrieval_method,
            urn = %financial.urn,
            "financial data found"
        );

        let conversation_starters = supply_spend_starter(&financial).into_iter().collect();

        Ok(RecordDelta {
            financial: Some(financial),
            conversation_starters,
            sources,
            ..RecordDelta::default()
        })
    }
}

/// A talking point when the school reports supply or agency spend.
fn supply_spend_starter(data: &FinancialData) -> Option<ConversationStarter> {
    let supply = data.supply_staff_costs.unwrap_or(0.0);
    let agency = data.agency_supply_costs.unwrap_or(0.0);
    let total = supply + agency;
    if total <= 0.0 {
        return None;
    }

    let year = present(&data.financial_year)
        .map(|y| format!(" in {y}"))
        .unwrap_or_default();
    let mut detail = format!("Spent {} on supply and agency staff{year}", format_gbp(total));
    if let Some(per_pupil) = data.spend_per_pupil {
        detail.push_str(&format!("; {} per pupil overall", format_gbp(per_pupil)));
    }

    Some(ConversationStarter {
        topic: "Supply staff spending".into(),
        detail,
        source_url: data.source_url.clone(),
        relevance: 0.9,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedExtractor, ScriptedFetcher, ScriptedSearch, context, hit};
    use schoolintel_extraction::ExtractionSchema;

    fn record() -> SchoolRecord {
        SchoolRecord::new("Example Primary School", Some("Leeds".into()))
    }

    fn gias_hit() -> SearchHit {
        hit(
            "Example Primary School - GIAS",
            "https://get-information-schools.service.gov.uk/Establishments/Establishment/Details/107000",
            "Open. Community school. URN: 107000",
        )
    }

    fn figures() -> serde_json::Value {
        serde_json::json!({
            "total_expenditure": 1_850_000.0,
            "supply_staff_costs": 42_000.0,
            "agency_supply_costs": 6_250.0,
            "financial_year": "2023/24"
        })
    }

    #[test]
    fn urn_found_in_url_or_snippet() {
        assert_eq!(find_urn(&[gias_hit()]).as_deref(), Some("107000"));
        let snippet_only = hit("Example", "https://example.org", "School URN 123456, Leeds");
        assert_eq!(find_urn(&[snippet_only]).as_deref(), Some("123456"));
        let none = hit("Example", "https://example.org/2024", "Phone 0113 496 0000");
        assert_eq!(find_urn(&[none]), None);
    }

    #[tokio::test]
    async fn benchmarking_page_is_preferred() {
        let (ctx, search, _, fetcher) = context(
            ScriptedSearch::new().with_hits("get-information-schools", vec![gias_hit()]),
            ScriptedExtractor::new().with_json(FinancialData::NAME, figures()),
            ScriptedFetcher::new().with_page(&benchmarking_url("107000"), "Spending: supply staff £42,000", &[]),
        );

        let delta = FinancialStage.run(&record(), &ctx).await.unwrap();
        let data = delta.financial.unwrap();

        assert_eq!(data.urn, "107000");
        assert_eq!(data.retrieval_method, "benchmarking_page");
        assert_eq!(data.source_url, benchmarking_url("107000"));
        assert_eq!(search.queries().len(), 1);
        assert_eq!(fetcher.fetched(), vec![benchmarking_url("107000")]);

        let starter = &delta.conversation_starters[0];
        assert_eq!(starter.detail, "Spent £48,250 on supply and agency staff in 2023/24");
    }

    #[tokio::test]
    async fn falls_back_to_snippets_when_page_unavailable() {
        let (ctx, _, _, _) = context(
            ScriptedSearch::new()
                .with_hits("get-information-schools", vec![gias_hit()])
                .with_hits(
                    "supply staff costs",
                    vec![hit("Schools financial benchmarking", "https://example.org/fin", "Supply staff £42,000")],
                ),
            ScriptedExtractor::new().with_json(FinancialData::NAME, figures()),
            ScriptedFetcher::new(),
        );

        let delta = FinancialStage.run(&record(), &ctx).await.unwrap();
        let data = delta.financial.unwrap();
        assert_eq!(data.retrieval_method, "search_snippets");
        assert_eq!(data.urn, "107000");
        assert_eq!(data.source_url, "https://example.org/fin");
        assert!(delta.sources.contains(&"https://example.org/fin".to_string()));
    }

    #[tokio::test]
    async fn fails_when_nothing_found() {
        let (ctx, _, _, _) = context(
            ScriptedSearch::new(),
            ScriptedExtractor::new().with_json(FinancialData::NAME, figures()),
            ScriptedFetcher::new(),
        );
        let err = FinancialStage.run(&record(), &ctx).await.unwrap_err();
        assert!(matches!(err, SchoolIntelError::Stage { .. }));
    }

    #[tokio::test]
    async fn fails_when_model_finds_no_figures() {
        let (ctx, _, _, _) = context(
            ScriptedSearch::new().with_hits(
                "supply staff costs",
                vec![hit("Budget news", "https://example.org/news", "A new roof")],
            ),
            ScriptedExtractor::new().with_json(FinancialData::NAME, serde_json::json!({})),
            ScriptedFetcher::new(),
        );
        assert!(FinancialStage.run(&record(), &ctx).await.is_err());
    }

    #[test]
    fn no_starter_without_supply_spend() {
        assert!(supply_spend_starter(&FinancialData::default()).is_none());
    }

    #[tokio::test]
    async fn running_twice_does_not_duplicate() {
        let (ctx, _, _, _) = context(
            ScriptedSearch::new().with_hits("get-information-schools", vec![gias_hit()]),
            ScriptedExtractor::new().with_json(FinancialData::NAME, figures()),
            ScriptedFetcher::new().with_page(&benchmarking_url("107000"), "Spending: supply staff £42,000", &[]),
        );

        let mut record = record();
        let delta = FinancialStage.run(&record, &ctx).await.unwrap();
        record.apply_delta(delta);
        let starters = record.conversation_starters.len();
        let sources = record.sources.len();
        assert_eq!(starters, 1);

        let again = FinancialStage.run(&record, &ctx).await.unwrap();
        record.apply_delta(again);

        assert_eq!(record.conversation_starters.len(), starters);
        assert_eq!(record.sources.len(), sources);
        assert_eq!(record.financial.as_ref().unwrap().urn, "107000");
    }
}
