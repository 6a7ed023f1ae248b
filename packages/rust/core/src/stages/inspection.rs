//! Inspection-report stage: find the latest Ofsted report, read it (PDF,
//! then report page, then snippets) and extract improvement areas.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use schoolintel_extraction::extract;
use schoolintel_search::SearchHit;
use schoolintel_shared::{
    ConversationStarter, ImprovementArea, InspectionAnalysis, OfstedRating, RecordDelta, Result,
    SchoolIntelError, SchoolRecord, present,
};

use super::{EnrichmentStage, StageContext, StageKind, hit_urls, hits_text};

/// Most improvement areas turned into conversation starters.
const MAX_STARTERS: usize = 3;

/// Longest improvement section kept ahead of the full text.
const MAX_SECTION_CHARS: usize = 4_000;

static IMPROVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)what does the school need to do to improve\??(.*?)(?:how can i feed back|school details|information about this school|inspection team|further information|\z)",
    )
    .expect("valid regex")
});

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s+(.+)$").expect("valid regex"));

static STAFFING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[^.\n]*\b(?:staffing|recruit\w*|turnover|supply (?:staff|teachers?)|vacanc\w*)\b[^.\n]*\.?")
        .expect("valid regex")
});

pub struct InspectionStage;

pub(crate) fn report_query(record: &SchoolRecord) -> String {
    format!("{} Ofsted inspection report", record.search_label())
}

fn is_pdf(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.ends_with(".pdf") || lower.contains("files.ofsted.gov.uk")
}

fn is_report_page(url: &str) -> bool {
    url.to_ascii_lowercase().contains("reports.ofsted.gov.uk")
}

/// The "what does the school need to do to improve" section, if present.
pub(crate) fn improvement_section(text: &str) -> Option<String> {
    let section = IMPROVE_RE.captures(text)?.get(1)?.as_str().trim();
    if section.is_empty() {
        return None;
    }
    Some(section.chars().take(MAX_SECTION_CHARS).collect())
}

/// Bulleted or numbered points of a section, as fallback improvement areas.
fn section_points(section: &str) -> Vec<ImprovementArea> {
    BULLET_RE
        .captures_iter(section)
        .map(|caps| caps[1].trim().to_string())
        .filter(|point| point.len() > 10)
        .map(|point| ImprovementArea {
            area: point.chars().take(80).collect(),
            detail: point,
            category: "other".into(),
        })
        .collect()
}

fn staffing_sentences(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in STAFFING_RE.find_iter(text) {
        let sentence = m.as_str().trim().to_string();
        if sentence.len() > 20 && !found.contains(&sentence) {
            found.push(sentence);
        }
        if found.len() == 5 {
            break;
        }
    }
    found
}

/// Report text from the best available source.
struct ReportText {
    text: String,
    url: String,
    method: &'static str,
}

async fn read_report(hits: &[SearchHit], ctx: &StageContext) -> Option<ReportText> {
    // Method A: a PDF straight from the results.
    if let Some(pdf) = hits.iter().find(|h| is_pdf(&h.url)) {
        match ctx.fetcher.fetch_pdf_text(&pdf.url).await {
            Ok(text) if !text.trim().is_empty() => {
                return Some(ReportText {
                    text,
                    url: pdf.url.clone(),
                    method: "pdf",
                });
            }
            Ok(_) => debug!(url = %pdf.url, "report PDF had no text"),
            Err(e) => warn!(url = %pdf.url, error = %e, "report PDF unavailable"),
        }
    }

    // Method B: the report page, following its PDF link when there is one.
    if let Some(page_hit) = hits.iter().find(|h| is_report_page(&h.url)) {
        match ctx.fetcher.fetch_text(&page_hit.url).await {
            Ok(page) => {
                if let Some(link) = page.links.iter().find(|l| is_pdf(&l.url)) {
                    match ctx.fetcher.fetch_pdf_text(&link.url).await {
                        Ok(text) if !text.trim().is_empty() => {
                            return Some(ReportText {
                                text,
                                url: link.url.clone(),
                                method: "pdf",
                            });
                        }
                        Ok(_) => {}
                        Err(e) => warn!(url = %link.url, error = %e, "linked report PDF unavailable"),
                    }
                }
                if !page.text.trim().is_empty() {
                    return Some(ReportText {
                        text: page.text,
                        url: page_hit.url.clone(),
                        method: "report_page",
                    });
                }
            }
            Err(e) => warn!(url = %page_hit.url, error = %e, "report page unavailable"),
        }
    }

    // Method C: the snippets themselves.
    if hits.is_empty() {
        return None;
    }
    Some(ReportText {
        text: hits_text(hits),
        url: hits[0].url.clone(),
        method: "search_snippets",
    })
}

#[async_trait]
impl EnrichmentStage for InspectionStage {
    fn kind(&self) -> StageKind {
        StageKind::Inspection
    }

    async fn run(&self, record: &SchoolRecord, ctx: &StageContext) -> Result<RecordDelta> {
        let hits = ctx.search.search(&report_query(record), 5).await.into_hits();
        let mut sources: Vec<String> = hit_urls(&hits).collect();

        let report = read_report(&hits, ctx).await.ok_or_else(|| {
            SchoolIntelError::stage(StageKind::Inspection.as_str(), "no inspection report found")
        })?;
        if !sources.contains(&report.url) {
            sources.push(report.url.clone());
        }

        // Put the improvement section first so it survives prompt truncation.
        let section = improvement_section(&report.text);
        let prompt = match &section {
            Some(s) => format!("WHAT THE SCHOOL NEEDS TO DO TO IMPROVE:\n{s}\n\nFULL REPORT:\n{}", report.text),
            None => report.text.clone(),
        };

        let extraction = extract::<InspectionAnalysis>(ctx.extractor.as_ref(), &prompt).await;
        if !extraction.is_parsed() {
            return Err(SchoolIntelError::stage(
                StageKind::Inspection.as_str(),
                format!("report analysis unusable ({})", extraction.status.as_str()),
            ));
        }

        let mut analysis = extraction.value;
        analysis.report_url = report.url.clone();
        analysis.retrieval_method = report.method.into();
        analysis
            .improvement_areas
            .retain(|a| present(&a.area).is_some());
        if analysis.improvement_areas.is_empty() {
            if let Some(s) = &section {
                analysis.improvement_areas = section_points(s);
            }
        }
        if analysis.staffing_mentions.is_empty() {
            analysis.staffing_mentions = staffing_sentences(&report.text);
        }

        let ofsted_rating = present(&analysis.rating)
            .as_deref()
            .and_then(OfstedRating::parse_loose);
        let inspection_date = present(&analysis.inspection_date);

        info!(
            school = %record.name,
            method = report.method,
            rating = ?ofsted_rating,
            areas = analysis.improvement_areas.len(),
            "inspection report analysed"
        );

        let conversation_starters = analysis
            .improvement_areas
            .iter()
            .take(MAX_STARTERS)
            .map(|area| ConversationStarter {
                topic: format!("Ofsted: {}", area.area),
                detail: if area.detail.is_empty() {
                    area.area.clone()
                } else {
                    area.detail.clone()
                },
                source_url: report.url.clone(),
                relevance: match area.category.as_str() {
                    "staffing" | "teaching" | "send" => 0.85,
                    _ => 0.75,
                },
            })
            .collect();

        Ok(RecordDelta {
            inspection: Some(analysis),
            ofsted_rating,
            inspection_date,
            conversation_starters,
            sources,
            ..RecordDelta::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedExtractor, ScriptedFetcher, ScriptedSearch, context, hit};
    use schoolintel_extraction::ExtractionSchema;

    const PDF_URL: &str = "https://files.ofsted.gov.uk/v1/file/50200000";
    const PAGE_URL: &str = "https://reports.ofsted.gov.uk/provider/21/107000";

    const REPORT: &str = "Example Primary School\nInspection date: 12 March 2024\n\
        Overall effectiveness: Requires improvement\n\
        What does the school need to do to improve?\n\
        - Leaders should ensure that the reading curriculum is taught consistently.\n\
        - Staff turnover has disrupted provision for pupils with SEND.\n\
        How can I feed back my views?\nParents can use Ofsted Parent View.";

    fn record() -> SchoolRecord {
        SchoolRecord::new("Example Primary School", None)
    }

    fn analysis_json() -> serde_json::Value {
        serde_json::json!({
            "rating": "Requires improvement",
            "inspection_date": "2024-03-12",
            "strengths": ["Pupils behave well"],
            "improvement_areas": [
                { "area": "Reading curriculum", "detail": "Teach reading consistently", "category": "teaching" },
                { "area": "SEND provision", "detail": "Staff turnover disrupted SEND support", "category": "staffing" }
            ]
        })
    }

    #[test]
    fn section_is_located() {
        let section = improvement_section(REPORT).unwrap();
        assert!(section.starts_with("- Leaders should ensure"));
        assert!(!section.contains("Parent View"));
        assert_eq!(section_points(&section).len(), 2);
    }

    #[test]
    fn staffing_sentences_found() {
        let found = staffing_sentences(REPORT);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("Staff turnover"));
    }

    #[tokio::test]
    async fn pdf_report_preferred() {
        let (ctx, _, extractor, fetcher) = context(
            ScriptedSearch::new().with_hits(
                "ofsted inspection report",
                vec![
                    hit("Ofsted report", PAGE_URL, "Requires improvement"),
                    hit("Report PDF", PDF_URL, "Inspection of Example Primary School"),
                ],
            ),
            ScriptedExtractor::new().with_json(InspectionAnalysis::NAME, analysis_json()),
            ScriptedFetcher::new().with_pdf(PDF_URL, REPORT),
        );

        let delta = InspectionStage.run(&record(), &ctx).await.unwrap();
        let analysis = delta.inspection.unwrap();

        assert_eq!(analysis.retrieval_method, "pdf");
        assert_eq!(analysis.report_url, PDF_URL);
        assert_eq!(delta.ofsted_rating, Some(OfstedRating::RequiresImprovement));
        assert_eq!(delta.inspection_date.as_deref(), Some("2024-03-12"));
        assert_eq!(analysis.staffing_mentions.len(), 1);
        assert_eq!(delta.conversation_starters.len(), 2);
        assert_eq!(delta.conversation_starters[1].relevance, 0.85);
        assert_eq!(fetcher.fetched(), vec![PDF_URL.to_string()]);

        let prompt = &extractor.requests()[0].content;
        assert!(prompt.starts_with("WHAT THE SCHOOL NEEDS TO DO TO IMPROVE"));
    }

    #[tokio::test]
    async fn report_page_link_then_page_text() {
        let (ctx, _, _, fetcher) = context(
            ScriptedSearch::new().with_hits(
                "ofsted inspection report",
                vec![hit("Ofsted report", PAGE_URL, "Good")],
            ),
            ScriptedExtractor::new().with_json(InspectionAnalysis::NAME, analysis_json()),
            ScriptedFetcher::new().with_page(PAGE_URL, REPORT, &[("https://files.ofsted.gov.uk/v1/file/1", "Download")]),
        );

        let delta = InspectionStage.run(&record(), &ctx).await.unwrap();
        assert_eq!(delta.inspection.unwrap().retrieval_method, "report_page");
        assert_eq!(
            fetcher.fetched(),
            vec![PAGE_URL.to_string(), "https://files.ofsted.gov.uk/v1/file/1".to_string()]
        );
    }

    #[tokio::test]
    async fn snippets_are_last_resort() {
        let (ctx, _, _, _) = context(
            ScriptedSearch::new().with_hits(
                "ofsted inspection report",
                vec![hit("Example Primary School | Ofsted", "https://example.org/news", "Rated Good in 2023")],
            ),
            ScriptedExtractor::new().with_json(
                InspectionAnalysis::NAME,
                serde_json::json!({ "rating": "Good" }),
            ),
            ScriptedFetcher::new(),
        );

        let delta = InspectionStage.run(&record(), &ctx).await.unwrap();
        let analysis = delta.inspection.unwrap();
        assert_eq!(analysis.retrieval_method, "search_snippets");
        assert_eq!(delta.ofsted_rating, Some(OfstedRating::Good));
        assert_eq!(delta.inspection_date, None);
        assert!(delta.conversation_starters.is_empty());
    }

    #[tokio::test]
    async fn section_points_used_when_model_lists_none() {
        let (ctx, _, _, _) = context(
            ScriptedSearch::new().with_hits("ofsted inspection report", vec![hit("PDF", PDF_URL, "")]),
            ScriptedExtractor::new().with_json(
                InspectionAnalysis::NAME,
                serde_json::json!({ "rating": "Requires improvement", "improvement_areas": [{ "area": "Not found" }] }),
            ),
            ScriptedFetcher::new().with_pdf(PDF_URL, REPORT),
        );

        let delta = InspectionStage.run(&record(), &ctx).await.unwrap();
        assert_eq!(delta.inspection.unwrap().improvement_areas.len(), 2);
    }

    #[tokio::test]
    async fn search_outage_fails_the_stage() {
        let (ctx, _, _, _) = context(
            ScriptedSearch::new().failing("ofsted"),
            ScriptedExtractor::new().with_json(InspectionAnalysis::NAME, analysis_json()),
            ScriptedFetcher::new(),
        );
        let err = InspectionStage.run(&record(), &ctx).await.unwrap_err();
        assert!(matches!(err, SchoolIntelError::Stage { .. }));
    }

    #[tokio::test]
    async fn malformed_analysis_fails_the_stage() {
        let (ctx, _, _, _) = context(
            ScriptedSearch::new().with_hits("ofsted inspection report", vec![hit("PDF", PDF_URL, "")]),
            ScriptedExtractor::new().with_text(InspectionAnalysis::NAME, "Sorry, I can't read that."),
            ScriptedFetcher::new().with_pdf(PDF_URL, REPORT),
        );
        assert!(InspectionStage.run(&record(), &ctx).await.is_err());
    }

    #[tokio::test]
    async fn running_twice_does_not_duplicate() {
        let (ctx, _, _, _) = context(
            ScriptedSearch::new().with_hits("ofsted inspection report", vec![hit("PDF", PDF_URL, "")]),
            ScriptedExtractor::new().with_json(InspectionAnalysis::NAME, analysis_json()),
            ScriptedFetcher::new().with_pdf(PDF_URL, REPORT),
        );

        let mut record = record();
        let delta = InspectionStage.run(&record, &ctx).await.unwrap();
        record.apply_delta(delta);
        let starters = record.conversation_starters.len();
        let sources = record.sources.len();
        assert_eq!(starters, 2);

        let again = InspectionStage.run(&record, &ctx).await.unwrap();
        record.apply_delta(again);

        assert_eq!(record.conversation_starters.len(), starters);
        assert_eq!(record.sources.len(), sources);
        assert_eq!(record.ofsted_rating, Some(OfstedRating::RequiresImprovement));
    }
}
