//! Basic research: five concurrent searches, one extraction, one record.

use std::time::Instant;

use tracing::{debug, info, instrument};

use schoolintel_extraction::{SchoolProfile, extract};
use schoolintel_search::SearchHit;
use schoolintel_shared::{
    CompetitorPresence, Contact, ContactRole, ConversationStarter, OfstedRating, PresenceType,
    SchoolRecord, data_quality_score, present, website_url,
};

use crate::fanout;
use crate::stages::{StageContext, hits_text};

/// The five search categories and how many hits each keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCategory {
    General,
    Inspection,
    Contacts,
    News,
    EmailPattern,
}

impl QueryCategory {
    pub const ALL: [QueryCategory; 5] = [
        Self::General,
        Self::Inspection,
        Self::Contacts,
        Self::News,
        Self::EmailPattern,
    ];

    /// Hits kept per category when building the prompt.
    pub fn cap(&self) -> usize {
        match self {
            Self::General => 5,
            Self::Inspection | Self::Contacts | Self::News => 3,
            Self::EmailPattern => 2,
        }
    }

    pub fn heading(&self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::Inspection => "OFSTED",
            Self::Contacts => "STAFF",
            Self::News => "NEWS",
            Self::EmailPattern => "EMAIL",
        }
    }

    pub fn query(&self, name: &str, location: Option<&str>) -> String {
        let label = match location {
            Some(loc) => format!("{name} {loc}"),
            None => name.to_string(),
        };
        match self {
            Self::General => format!("{label} school"),
            Self::Inspection => format!("{name} Ofsted rating inspection"),
            Self::Contacts => {
                format!("{label} deputy head assistant head business manager SENCO staff")
            }
            Self::News => format!("{name} school news achievements events"),
            Self::EmailPattern => format!("\"{name}\" staff email address"),
        }
    }
}

/// Run the five searches and build the record skeleton.
#[instrument(skip_all, fields(school = %name))]
pub async fn basic_research(
    name: &str,
    location: Option<&str>,
    ctx: &StageContext,
) -> SchoolRecord {
    let start = Instant::now();
    let mut record = SchoolRecord::new(name, location.map(str::to_string));

    let searches = QueryCategory::ALL
        .iter()
        .map(|category| {
            let query = category.query(name, location);
            async move {
                let outcome = ctx.search.search(&query, category.cap()).await;
                debug!(category = category.heading(), outcome = outcome.label(), "search done");
                outcome.into_hits()
            }
        })
        .collect::<Vec<_>>();
    let results = fanout::run_all(ctx.mode, searches).await;

    let mut prompt = format!("School: {}\n", record.search_label());
    for (category, hits) in QueryCategory::ALL.iter().zip(results) {
        let capped: Vec<SearchHit> = hits.into_iter().take(category.cap()).collect();
        for hit in &capped {
            record.add_source(hit.url.clone());
        }
        prompt.push_str(&format!("\n## {}\n{}\n", category.heading(), hits_text(&capped)));
    }

    let extraction = extract::<SchoolProfile>(ctx.extractor.as_ref(), &prompt).await;
    let status = extraction.status;
    apply_profile(&mut record, extraction.into_value());
    record.sort_starters();
    record.data_quality_score = data_quality_score(&record);

    info!(
        sources = record.sources.len(),
        contacts = record.contacts.len(),
        quality = record.data_quality_score,
        extraction = status.as_str(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "basic research complete"
    );

    record
}

/// Copy extracted profile fields into `record`, mapping sentinels to absent.
pub(crate) fn apply_profile(record: &mut SchoolRecord, profile: SchoolProfile) {
    record.website = present(&profile.website).map(|site| website_url(&site));
    record.address = present(&profile.address);
    record.phone = present(&profile.phone);
    record.email = present(&profile.email);
    record.email_pattern = present(&profile.email_pattern);
    record.head_teacher = present(&profile.head_teacher);
    record.ofsted_rating = present(&profile.ofsted_rating)
        .as_deref()
        .and_then(OfstedRating::parse_loose);
    record.inspection_date = present(&profile.inspection_date);

    record.achievements = non_empty(profile.achievements);
    record.events = non_empty(profile.events);
    record.leadership_changes = non_empty(profile.leadership_changes);

    for extracted in profile.contacts {
        let (Some(role), Some(full_name)) = (
            ContactRole::from_title(&extracted.role),
            present(&extracted.name),
        ) else {
            continue;
        };
        record.add_contact(Contact {
            role,
            full_name,
            email: present(&extracted.email),
            phone: present(&extracted.phone),
            confidence: unit(extracted.confidence),
            evidence_urls: extracted.evidence_urls,
            verification_method: "search_snippet".into(),
        });
    }

    for extracted in profile.competitors {
        let Some(agency_name) = present(&extracted.agency_name) else {
            continue;
        };
        let presence_type = match extracted.presence_type.to_ascii_lowercase().as_str() {
            "testimonial" => PresenceType::Testimonial,
            "partner_page" | "partner page" | "partner" => PresenceType::PartnerPage,
            _ => PresenceType::JobPosting,
        };
        record.add_competitor(CompetitorPresence {
            agency_name,
            presence_type,
            evidence_urls: extracted.evidence_urls,
            confidence: unit(extracted.confidence),
            weaknesses: extracted.weaknesses,
        });
    }

    for extracted in profile.conversation_starters {
        let Some(topic) = present(&extracted.topic) else {
            continue;
        };
        record.add_starter(ConversationStarter {
            topic,
            detail: extracted.detail,
            source_url: extracted.source_url,
            relevance: unit(extracted.relevance),
        });
    }
}

fn non_empty(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .filter_map(|s| present(&s))
        .collect()
}

/// Clamp a model-supplied score into `[0, 1]`; NaN becomes 0.
fn unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}
