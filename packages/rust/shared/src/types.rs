//! Core domain types for SchoolIntel dossiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::usage::UsageSnapshot;

/// Canonical placeholder for a field the extraction model could not find.
pub const NOT_FOUND: &str = "Not found";

/// Normalise an extracted string field: `None` for blanks and "not found"-style
/// placeholders, otherwise the trimmed value.
pub fn present(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let lowered = trimmed.to_ascii_lowercase();
    match lowered.as_str() {
        "" | "not found" | "n/a" | "na" | "none" | "null" | "unknown" => None,
        _ => Some(trimmed.to_string()),
    }
}

/// An absolute URL for a website as the model wrote it; a bare host such as
/// `www.school.sch.uk` gets an `https://` scheme.
pub fn website_url(site: &str) -> String {
    let site = site.trim();
    if site.contains("://") {
        site.to_string()
    } else {
        format!("https://{}", site.trim_start_matches('/'))
    }
}

// ---------------------------------------------------------------------------
// RecordId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for dossier identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generate a new time-sortable record identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ExecutionMode
// ---------------------------------------------------------------------------

/// How independent provider calls and stages are scheduled.
///
/// Informational only: both modes must produce identical records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    #[default]
    Concurrent,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Concurrent => "concurrent",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

/// Staff roles the sales team targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactRole {
    DeputyHead,
    AssistantHead,
    BusinessManager,
    Senco,
}

impl ContactRole {
    /// Parse a free-text job title into a role. Unrecognised titles yield `None`.
    pub fn from_title(title: &str) -> Option<Self> {
        let t = title.to_ascii_lowercase().replace(['-', '_'], " ");
        if t.contains("deputy head") || t.contains("deputy principal") {
            Some(Self::DeputyHead)
        } else if t.contains("assistant head") || t.contains("assistant principal") {
            Some(Self::AssistantHead)
        } else if t.contains("business manager") || t.contains("bursar") {
            Some(Self::BusinessManager)
        } else if t.contains("senco") || t.contains("sendco") || t.contains("special educational") {
            Some(Self::Senco)
        } else {
            None
        }
    }

    /// Roles limited to a single contact per record.
    pub fn is_singular(&self) -> bool {
        matches!(self, Self::DeputyHead | Self::AssistantHead)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::DeputyHead => "Deputy Head",
            Self::AssistantHead => "Assistant Head",
            Self::BusinessManager => "Business Manager",
            Self::Senco => "SENCO",
        }
    }
}

/// A named member of staff worth contacting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub role: ContactRole,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// 0.0–1.0 confidence that this person holds the role.
    pub confidence: f64,
    /// Pages the contact was found on, in discovery order.
    #[serde(default)]
    pub evidence_urls: Vec<String>,
    /// How the contact was found (e.g. "search_snippet", "school_website").
    pub verification_method: String,
}

// ---------------------------------------------------------------------------
// Intelligence
// ---------------------------------------------------------------------------

/// Ofsted overall-effectiveness grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfstedRating {
    Outstanding,
    Good,
    #[serde(rename = "Requires Improvement")]
    RequiresImprovement,
    Inadequate,
}

impl OfstedRating {
    /// Find a grade in free text. "Requires improvement" is checked before
    /// "good" so that "not yet good" phrasing doesn't misfire.
    pub fn parse_loose(text: &str) -> Option<Self> {
        let t = text.to_ascii_lowercase();
        if t.contains("outstanding") {
            Some(Self::Outstanding)
        } else if t.contains("requires improvement") || t.contains("grade 3") {
            Some(Self::RequiresImprovement)
        } else if t.contains("inadequate") || t.contains("special measures") {
            Some(Self::Inadequate)
        } else if t.contains("good") {
            Some(Self::Good)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outstanding => "Outstanding",
            Self::Good => "Good",
            Self::RequiresImprovement => "Requires Improvement",
            Self::Inadequate => "Inadequate",
        }
    }
}

impl std::fmt::Display for OfstedRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a competitor agency shows up around a school.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceType {
    JobPosting,
    Testimonial,
    PartnerPage,
}

/// A recruitment agency already working with the school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorPresence {
    pub agency_name: String,
    pub presence_type: PresenceType,
    #[serde(default)]
    pub evidence_urls: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// A talking point for outreach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStarter {
    pub topic: String,
    pub detail: String,
    #[serde(default)]
    pub source_url: String,
    /// 0.0–1.0; starters are presented highest first.
    pub relevance: f64,
}

// ---------------------------------------------------------------------------
// Enrichment payloads
// ---------------------------------------------------------------------------

/// Spending figures from the DfE financial benchmarking service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinancialData {
    /// DfE unique reference number.
    pub urn: String,
    pub total_income: Option<f64>,
    pub total_expenditure: Option<f64>,
    pub teaching_staff_costs: Option<f64>,
    pub supply_staff_costs: Option<f64>,
    pub agency_supply_costs: Option<f64>,
    pub spend_per_pupil: Option<f64>,
    pub pupil_count: Option<u32>,
    pub financial_year: String,
    pub source_url: String,
    /// Which lookup path produced the figures.
    pub retrieval_method: String,
}

impl Default for FinancialData {
    fn default() -> Self {
        Self {
            urn: NOT_FOUND.into(),
            total_income: None,
            total_expenditure: None,
            teaching_staff_costs: None,
            supply_staff_costs: None,
            agency_supply_costs: None,
            spend_per_pupil: None,
            pupil_count: None,
            financial_year: NOT_FOUND.into(),
            source_url: String::new(),
            retrieval_method: String::new(),
        }
    }
}

impl FinancialData {
    /// Whether any monetary figure was found.
    pub fn has_figures(&self) -> bool {
        [
            self.total_income,
            self.total_expenditure,
            self.teaching_staff_costs,
            self.supply_staff_costs,
            self.agency_supply_costs,
            self.spend_per_pupil,
        ]
        .iter()
        .any(Option::is_some)
    }
}

/// One "what the school needs to do to improve" item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImprovementArea {
    pub area: String,
    pub detail: String,
    /// e.g. "teaching", "leadership", "behaviour", "send", "staffing".
    pub category: String,
}

impl Default for ImprovementArea {
    fn default() -> Self {
        Self {
            area: NOT_FOUND.into(),
            detail: String::new(),
            category: "other".into(),
        }
    }
}

/// Analysis of the latest Ofsted inspection report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionAnalysis {
    pub report_url: String,
    pub rating: String,
    pub inspection_date: String,
    pub strengths: Vec<String>,
    pub improvement_areas: Vec<ImprovementArea>,
    pub staffing_mentions: Vec<String>,
    pub retrieval_method: String,
}

impl Default for InspectionAnalysis {
    fn default() -> Self {
        Self {
            report_url: String::new(),
            rating: NOT_FOUND.into(),
            inspection_date: NOT_FOUND.into(),
            strengths: Vec::new(),
            improvement_areas: Vec::new(),
            staffing_mentions: Vec::new(),
            retrieval_method: String::new(),
        }
    }
}

/// A single job advert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vacancy {
    pub title: String,
    pub subject: String,
    pub contract_type: String,
    /// ISO date (YYYY-MM-DD) when known.
    pub closing_date: String,
    pub url: String,
    /// Where the advert was found ("tes", "indeed", "school_website", …).
    pub source: String,
    /// Agency named on the advert, if any.
    pub agency: String,
}

impl Default for Vacancy {
    fn default() -> Self {
        Self {
            title: NOT_FOUND.into(),
            subject: NOT_FOUND.into(),
            contract_type: NOT_FOUND.into(),
            closing_date: NOT_FOUND.into(),
            url: String::new(),
            source: String::new(),
            agency: String::new(),
        }
    }
}

/// Live recruitment activity at the school.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VacancyData {
    pub vacancies: Vec<Vacancy>,
    /// 0.0–1.0 hiring urgency.
    pub urgency_score: f64,
    pub urgency_label: String,
    pub agencies_detected: Vec<String>,
}

// ---------------------------------------------------------------------------
// SchoolRecord
// ---------------------------------------------------------------------------

/// Bookkeeping about how a record was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMeta {
    pub duration_ms: u64,
    pub sources_consulted: usize,
    pub mode: ExecutionMode,
    pub usage: UsageSnapshot,
    /// Enrichment stages whose deltas were merged.
    #[serde(default)]
    pub stages_completed: Vec<String>,
    /// Enrichment stages that failed, panicked or timed out.
    #[serde(default)]
    pub stages_failed: Vec<String>,
    #[serde(default)]
    pub from_cache: bool,
}

/// The aggregate intelligence dossier for one school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolRecord {
    pub id: RecordId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Inferred staff email format, e.g. "firstname.lastname@school.sch.uk".
    #[serde(default)]
    pub email_pattern: Option<String>,
    #[serde(default)]
    pub head_teacher: Option<String>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub ofsted_rating: Option<OfstedRating>,
    #[serde(default)]
    pub inspection_date: Option<String>,
    #[serde(default)]
    pub competitors: Vec<CompetitorPresence>,
    #[serde(default)]
    pub conversation_starters: Vec<ConversationStarter>,
    #[serde(default)]
    pub achievements: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub leadership_changes: Vec<String>,
    /// Computed by [`crate::data_quality_score`]; never supplied externally.
    #[serde(default)]
    pub data_quality_score: f64,
    /// URLs consulted while building the record, first-seen order.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub financial: Option<FinancialData>,
    #[serde(default)]
    pub inspection: Option<InspectionAnalysis>,
    #[serde(default)]
    pub vacancies: Option<VacancyData>,
    #[serde(default)]
    pub processing: ProcessingMeta,
    pub created_at: DateTime<Utc>,
}

impl SchoolRecord {
    /// A blank record for `name`; every intelligence field starts empty.
    pub fn new(name: impl Into<String>, location: Option<String>) -> Self {
        Self {
            id: RecordId::new(),
            name: name.into(),
            location,
            website: None,
            address: None,
            phone: None,
            email: None,
            email_pattern: None,
            head_teacher: None,
            contacts: Vec::new(),
            ofsted_rating: None,
            inspection_date: None,
            competitors: Vec::new(),
            conversation_starters: Vec::new(),
            achievements: Vec::new(),
            events: Vec::new(),
            leadership_changes: Vec::new(),
            data_quality_score: 0.0,
            sources: Vec::new(),
            financial: None,
            inspection: None,
            vacancies: None,
            processing: ProcessingMeta::default(),
            created_at: Utc::now(),
        }
    }

    /// Name plus location hint, used to build search queries.
    pub fn search_label(&self) -> String {
        match &self.location {
            Some(loc) => format!("{} {loc}", self.name),
            None => self.name.clone(),
        }
    }

    /// Host of the school's website, if known and parseable.
    pub fn website_host(&self) -> Option<String> {
        let site = self.website.as_deref()?;
        let parsed = url::Url::parse(site)
            .or_else(|_| url::Url::parse(&format!("https://{site}")))
            .ok()?;
        parsed
            .host_str()
            .map(|h| h.trim_start_matches("www.").to_string())
    }
}
