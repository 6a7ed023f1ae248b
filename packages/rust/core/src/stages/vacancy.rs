//! Vacancy stage: job boards plus the school's own vacancies page.
//!
//! Postings are de-duplicated by normalised title, scored for hiring urgency,
//! and any recruitment agency named alongside them is recorded as a
//! competitor.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use schoolintel_crawler::FetchedText;
use schoolintel_extraction::extract;
use schoolintel_search::SearchHit;
use schoolintel_shared::{
    CompetitorPresence, ConversationStarter, PresenceType, RecordDelta, Result, SchoolIntelError,
    SchoolRecord, Vacancy, VacancyData, present, website_url,
};

use super::{EnrichmentStage, StageContext, StageKind, hit_urls, hits_text};
use crate::fanout;

/// Job boards searched, as (source label, site filter).
const JOB_BOARDS: &[(&str, &str)] = &[
    ("tes", "tes.com"),
    ("teaching_vacancies", "teaching-vacancies.service.gov.uk"),
    ("eteach", "eteach.com"),
    ("indeed", "indeed.co.uk"),
];

/// Link keywords that identify a school's vacancies page.
const VACANCY_LINK_KEYWORDS: &[&str] = &[
    "vacanc",
    "job",
    "recruit",
    "career",
    "work-with-us",
    "work with us",
    "join our team",
];

/// Education recruitment agencies commonly seen on school adverts.
const KNOWN_AGENCIES: &[&str] = &[
    "Teaching Personnel",
    "Prospero Teaching",
    "Reeson Education",
    "Tradewind Recruitment",
    "Vision for Education",
    "Supply Desk",
    "Hays Education",
    "Engage Education",
    "TeacherActive",
    "Randstad Education",
    "Protocol Education",
    "Long Term Futures",
    "Simply Education",
    "Eden Teachers",
    "New Directions Education",
    "Zen Educate",
];

/// Title words that mark a leadership or specialist role.
const SENIOR_ROLE_WORDS: &[&str] = &["head", "deputy", "assistant head", "senco", "leader", "principal"];

/// Closing dates within this many days count as urgent.
const URGENT_WITHIN_DAYS: i64 = 14;

pub struct VacancyStage;

pub(crate) fn board_query(record: &SchoolRecord, site: &str) -> String {
    format!("{} teacher jobs site:{site}", record.name)
}

/// Lowercase alphanumeric words, for duplicate detection.
fn normalise_title(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keep the first posting of each normalised title; drop untitled ones.
pub(crate) fn dedupe(vacancies: Vec<Vacancy>) -> Vec<Vacancy> {
    let mut seen = Vec::new();
    let mut kept = Vec::new();
    for vacancy in vacancies {
        let Some(title) = present(&vacancy.title) else {
            continue;
        };
        let key = normalise_title(&title);
        if key.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        kept.push(vacancy);
    }
    kept
}

/// Hiring urgency in `[0, 1]` with a label.
///
/// Up to 0.5 for volume (0.1 per posting), 0.2 for any senior role, 0.3 for
/// any posting closing within two weeks of `today`.
pub(crate) fn urgency(vacancies: &[Vacancy], today: NaiveDate) -> (f64, &'static str) {
    if vacancies.is_empty() {
        return (0.0, "none");
    }

    let volume = vacancies.len().min(5) as f64 * 0.1;
    let senior = vacancies.iter().any(|v| {
        let title = v.title.to_lowercase();
        SENIOR_ROLE_WORDS.iter().any(|w| title.contains(w))
    });
    let closing_soon = vacancies.iter().any(|v| {
        NaiveDate::parse_from_str(v.closing_date.trim(), "%Y-%m-%d")
            .map(|d| {
                let days = (d - today).num_days();
                (0..=URGENT_WITHIN_DAYS).contains(&days)
            })
            .unwrap_or(false)
    });

    let score = (volume
        + if senior { 0.2 } else { 0.0 }
        + if closing_soon { 0.3 } else { 0.0 })
    .clamp(0.0, 1.0);
    // Round to two decimals so repeated sums compare equal.
    let score = (score * 100.0).round() / 100.0;

    let label = if score >= 0.7 {
        "high"
    } else if score >= 0.4 {
        "medium"
    } else {
        "low"
    };
    (score, label)
}

/// Source label for a posting URL.
fn source_for(url: &str, school_host: Option<&str>) -> String {
    let lower = url.to_ascii_lowercase();
    if let Some((label, _)) = JOB_BOARDS.iter().find(|(_, site)| lower.contains(site)) {
        return (*label).to_string();
    }
    match school_host {
        Some(host) if lower.contains(host) => "school_website".into(),
        _ => "other".into(),
    }
}

/// Known agencies named in the evidence, with the URLs naming them.
fn detect_agencies(
    vacancies: &[Vacancy],
    hits: &[SearchHit],
    site_page: Option<&FetchedText>,
) -> Vec<CompetitorPresence> {
    let mut found: Vec<CompetitorPresence> = Vec::new();

    let mut note = |name: &str, url: &str, confidence: f64| {
        let entry = match found
            .iter()
            .position(|c| c.agency_name.eq_ignore_ascii_case(name))
        {
            Some(i) => &mut found[i],
            None => {
                found.push(CompetitorPresence {
                    agency_name: name.to_string(),
                    presence_type: PresenceType::JobPosting,
                    evidence_urls: Vec::new(),
                    confidence,
                    weaknesses: vec!["Roles still unfilled at time of search".into()],
                });
                let last = found.len() - 1;
                &mut found[last]
            }
        };
        if !url.is_empty() && !entry.evidence_urls.iter().any(|u| u == url) {
            entry.evidence_urls.push(url.to_string());
        }
        entry.confidence = entry.confidence.max(confidence);
    };

    for vacancy in vacancies {
        if let Some(agency) = present(&vacancy.agency) {
            note(&agency, &vacancy.url, 0.9);
        }
    }

    for hit in hits {
        let text = format!("{} {}", hit.title, hit.snippet).to_lowercase();
        for agency in KNOWN_AGENCIES {
            if text.contains(&agency.to_lowercase()) {
                note(agency, &hit.url, 0.7);
            }
        }
    }

    if let Some(page) = site_page {
        let text = page.text.to_lowercase();
        for agency in KNOWN_AGENCIES {
            if text.contains(&agency.to_lowercase()) {
                note(agency, &page.url, 0.8);
            }
        }
    }

    found
}

/// The school's vacancies page, found from its home page links.
async fn school_vacancies_page(record: &SchoolRecord, ctx: &StageContext) -> Option<FetchedText> {
    let website = website_url(record.website.as_deref()?);
    let home = match ctx.fetcher.fetch_text(&website).await {
        Ok(page) => page,
        Err(e) => {
            warn!(url = %website, error = %e, "school website unavailable");
            return None;
        }
    };

    let link = home.links_matching(VACANCY_LINK_KEYWORDS).next()?.url.clone();
    match ctx.fetcher.fetch_text(&link).await {
        Ok(page) => Some(page),
        Err(e) => {
            debug!(url = %link, error = %e, "vacancies page unavailable");
            None
        }
    }
}

#[async_trait]
impl EnrichmentStage for VacancyStage {
    fn kind(&self) -> StageKind {
        StageKind::Vacancy
    }

    async fn run(&self, record: &SchoolRecord, ctx: &StageContext) -> Result<RecordDelta> {
        let queries: Vec<String> = JOB_BOARDS
            .iter()
            .map(|(_, site)| board_query(record, site))
            .collect();
        let searches = queries
            .iter()
            .map(|q| async move { ctx.search.search(q, 5).await.into_hits() })
            .collect::<Vec<_>>();
        let hits: Vec<SearchHit> = fanout::run_all(ctx.mode, searches)
            .await
            .into_iter()
            .flatten()
            .collect();

        let site_page = school_vacancies_page(record, ctx).await;

        if hits.is_empty() && site_page.is_none() {
            return Err(SchoolIntelError::stage(
                StageKind::Vacancy.as_str(),
                "no job board results or school vacancies page",
            ));
        }

        let mut sources: Vec<String> = hit_urls(&hits).collect();
        let mut content = format!("JOB BOARD RESULTS:\n{}", hits_text(&hits));
        if let Some(page) = &site_page {
            content.push_str(&format!("\n\nSCHOOL VACANCIES PAGE ({}):\n{}", page.url, page.text));
            sources.push(page.url.clone());
        }

        let extraction = extract::<VacancyData>(ctx.extractor.as_ref(), &content).await;
        if !extraction.is_parsed() {
            return Err(SchoolIntelError::stage(
                StageKind::Vacancy.as_str(),
                format!("vacancy extraction unusable ({})", extraction.status.as_str()),
            ));
        }

        let school_host = record.website_host();
        let mut vacancies = dedupe(extraction.value.vacancies);
        for vacancy in &mut vacancies {
            if present(&vacancy.source).is_none() {
                vacancy.source = source_for(&vacancy.url, school_host.as_deref());
            }
        }

        let (urgency_score, urgency_label) = urgency(&vacancies, Utc::now().date_naive());
        let competitors = detect_agencies(&vacancies, &hits, site_page.as_ref());

        info!(
            school = %record.name,
            vacancies = vacancies.len(),
            urgency = urgency_score,
            agencies = competitors.len(),
            "vacancies analysed"
        );

        let mut conversation_starters = Vec::new();
        if let Some(first) = vacancies.first() {
            let titles: Vec<&str> = vacancies.iter().take(3).map(|v| v.title.as_str()).collect();
            conversation_starters.push(ConversationStarter {
                topic: "Active recruitment".into(),
                detail: format!(
                    "{} open role(s) including {}",
                    vacancies.len(),
                    titles.join(", ")
                ),
                source_url: first.url.clone(),
                relevance: (0.6 + urgency_score * 0.4).min(1.0),
            });
        }
        for competitor in &competitors {
            conversation_starters.push(ConversationStarter {
                topic: format!("Currently using {}", competitor.agency_name),
                detail: format!(
                    "{} appears on the school's adverts; offer a direct alternative",
                    competitor.agency_name
                ),
                source_url: competitor.evidence_urls.first().cloned().unwrap_or_default(),
                relevance: 0.7,
            });
        }

        let data = VacancyData {
            vacancies,
            urgency_score,
            urgency_label: urgency_label.into(),
            agencies_detected: competitors.iter().map(|c| c.agency_name.clone()).collect(),
        };

        Ok(RecordDelta {
            vacancies: Some(data),
            competitors,
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

    const SITE: &str = "https://www.example-primary.sch.uk/";
    const SITE_JOBS: &str = "https://www.example-primary.sch.uk/vacancies";

    fn vacancy(title: &str, closing: &str) -> Vacancy {
        Vacancy {
            title: title.into(),
            closing_date: closing.into(),
            ..Vacancy::default()
        }
    }

    fn record_with_site() -> SchoolRecord {
        let mut record = SchoolRecord::new("Example Primary School", None);
        record.website = Some(SITE.into());
        record
    }

    fn vacancies_json() -> serde_json::Value {
        serde_json::json!({
            "vacancies": [
                { "title": "Class Teacher (KS2)", "url": "https://www.tes.com/jobs/vacancy/1", "closing_date": "2099-01-01", "agency": "Teaching Personnel" },
                { "title": "Class teacher - KS2", "url": "https://www.eteach.com/job/2" },
                { "title": "SENCO", "url": SITE_JOBS },
                { "title": "Not found" }
            ]
        })
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    #[test]
    fn dedupe_by_normalised_title() {
        let kept = dedupe(vec![
            vacancy("Class Teacher (KS2)", ""),
            vacancy("class teacher - ks2", ""),
            vacancy("Teaching Assistant", ""),
            vacancy("N/A", ""),
        ]);
        let titles: Vec<&str> = kept.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(titles, vec!["Class Teacher (KS2)", "Teaching Assistant"]);
    }

    #[test]
    fn urgency_scoring() {
        assert_eq!(urgency(&[], today()), (0.0, "none"));
        assert_eq!(urgency(&[vacancy("Teaching Assistant", "2025-06-01")], today()), (0.1, "low"));
        assert_eq!(
            urgency(
                &[vacancy("Deputy Headteacher", "2025-03-10"), vacancy("Class Teacher", "")],
                today()
            ),
            (0.7, "high")
        );
        // Already closed postings are not urgent.
        assert_eq!(urgency(&[vacancy("Class Teacher", "2025-02-01")], today()), (0.1, "low"));
    }

    #[test]
    fn sources_labelled_by_board_or_site() {
        assert_eq!(source_for("https://www.tes.com/jobs/1", None), "tes");
        assert_eq!(
            source_for(SITE_JOBS, Some("example-primary.sch.uk")),
            "school_website"
        );
        assert_eq!(source_for("https://jobs.example.org/1", None), "other");
    }

    #[tokio::test]
    async fn boards_and_school_site_combined() {
        let (ctx, search, extractor, _) = context(
            ScriptedSearch::new()
                .with_hits(
                    "site:tes.com",
                    vec![hit("Class Teacher KS2 - Example Primary School", "https://www.tes.com/jobs/vacancy/1", "Apply via Teaching Personnel")],
                )
                .with_hits(
                    "site:eteach.com",
                    vec![hit("Class teacher", "https://www.eteach.com/job/2", "Example Primary")],
                ),
            ScriptedExtractor::new().with_json(VacancyData::NAME, vacancies_json()),
            ScriptedFetcher::new()
                .with_page(SITE, "Welcome", &[(SITE_JOBS, "Vacancies")])
                .with_page(SITE_JOBS, "SENCO required for September. Cover by Zen Educate.", &[]),
        );

        let delta = VacancyStage.run(&record_with_site(), &ctx).await.unwrap();
        let data = delta.vacancies.unwrap();

        assert_eq!(search.queries().len(), JOB_BOARDS.len());
        assert_eq!(data.vacancies.len(), 2);
        assert_eq!(data.vacancies[0].source, "tes");
        assert_eq!(data.vacancies[1].source, "school_website");
        assert_eq!(data.agencies_detected, vec!["Teaching Personnel", "Zen Educate"]);

        let tp = &delta.competitors[0];
        assert_eq!(tp.evidence_urls, vec!["https://www.tes.com/jobs/vacancy/1"]);
        assert_eq!(tp.confidence, 0.9);

        assert!(delta.sources.contains(&SITE_JOBS.to_string()));
        assert_eq!(delta.conversation_starters[0].topic, "Active recruitment");
        assert!(extractor.requests()[0].content.contains("SCHOOL VACANCIES PAGE"));
    }

    #[tokio::test]
    async fn bare_host_website_is_still_fetched() {
        let (ctx, _, _, fetcher) = context(
            ScriptedSearch::new(),
            ScriptedExtractor::new().with_json(VacancyData::NAME, vacancies_json()),
            ScriptedFetcher::new()
                .with_page("https://www.example-primary.sch.uk", "Welcome", &[(SITE_JOBS, "Vacancies")])
                .with_page(SITE_JOBS, "SENCO required for September.", &[]),
        );
        let mut record = SchoolRecord::new("Example Primary School", None);
        record.website = Some("www.example-primary.sch.uk".into());

        let delta = VacancyStage.run(&record, &ctx).await.unwrap();

        assert_eq!(
            fetcher.fetched(),
            vec!["https://www.example-primary.sch.uk".to_string(), SITE_JOBS.to_string()]
        );
        assert!(delta.sources.contains(&SITE_JOBS.to_string()));
        assert!(delta.vacancies.is_some());
    }

    #[tokio::test]
    async fn no_evidence_fails_the_stage() {
        let (ctx, _, _, _) = context(
            ScriptedSearch::new(),
            ScriptedExtractor::new().with_json(VacancyData::NAME, vacancies_json()),
            ScriptedFetcher::new(),
        );
        let err = VacancyStage.run(&record_with_site(), &ctx).await.unwrap_err();
        assert!(matches!(err, SchoolIntelError::Stage { .. }));
    }

    #[tokio::test]
    async fn running_twice_does_not_duplicate() {
        let (ctx, _, _, _) = context(
            ScriptedSearch::new().with_hits(
                "site:tes.com",
                vec![hit("Class Teacher", "https://www.tes.com/jobs/vacancy/1", "via Teaching Personnel")],
            ),
            ScriptedExtractor::new().with_json(VacancyData::NAME, vacancies_json()),
            ScriptedFetcher::new(),
        );

        let mut record = record_with_site();
        let delta = VacancyStage.run(&record, &ctx).await.unwrap();
        record.apply_delta(delta);
        let starters = record.conversation_starters.len();
        let competitors = record.competitors.len();

        let again = VacancyStage.run(&record, &ctx).await.unwrap();
        record.apply_delta(again);

        assert_eq!(record.conversation_starters.len(), starters);
        assert_eq!(record.competitors.len(), competitors);
    }
}
