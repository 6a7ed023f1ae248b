//! Typed extraction targets.
//!
//! Every schema is total: `Default` is the canonical "nothing found" value
//! and container-level `#[serde(default)]` fills any key the model omits.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use schoolintel_shared::{
    FinancialData, ImprovementArea, InspectionAnalysis, NOT_FOUND, Vacancy, VacancyData,
};

/// A type the model can be asked to produce.
pub trait ExtractionSchema: Default + Serialize + DeserializeOwned + Send + 'static {
    /// Short name used in logs.
    const NAME: &'static str;

    /// Task-specific instructions placed before the output template.
    fn instructions() -> &'static str;

    /// Output template shown to the model. Defaults to the empty value;
    /// schemas with nested lists override it to show one example item.
    fn template() -> serde_json::Value {
        serde_json::to_value(Self::default()).unwrap_or_default()
    }
}

fn not_found() -> String {
    NOT_FOUND.to_string()
}

// Models write `null` for fields they could not fill. These read it as the
// field's empty value so one null does not discard the whole answer.

fn null_as_not_found<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(not_found))
}

fn null_as_empty_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn null_as_zero<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or_default())
}

fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Basic research profile
// ---------------------------------------------------------------------------

/// A staff member as reported by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedContact {
    /// Free-text job title, mapped onto a contact role by the caller.
    #[serde(deserialize_with = "null_as_not_found")]
    pub role: String,
    #[serde(deserialize_with = "null_as_not_found")]
    pub name: String,
    #[serde(deserialize_with = "null_as_not_found")]
    pub email: String,
    #[serde(deserialize_with = "null_as_not_found")]
    pub phone: String,
    #[serde(deserialize_with = "null_as_zero")]
    pub confidence: f64,
    #[serde(deserialize_with = "null_as_empty")]
    pub evidence_urls: Vec<String>,
}

impl Default for ExtractedContact {
    fn default() -> Self {
        Self {
            role: not_found(),
            name: not_found(),
            email: not_found(),
            phone: not_found(),
            confidence: 0.0,
            evidence_urls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedStarter {
    #[serde(deserialize_with = "null_as_not_found")]
    pub topic: String,
    #[serde(deserialize_with = "null_as_empty_text")]
    pub detail: String,
    #[serde(deserialize_with = "null_as_empty_text")]
    pub source_url: String,
    #[serde(deserialize_with = "null_as_zero")]
    pub relevance: f64,
}

impl Default for ExtractedStarter {
    fn default() -> Self {
        Self {
            topic: not_found(),
            detail: String::new(),
            source_url: String::new(),
            relevance: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedCompetitor {
    #[serde(deserialize_with = "null_as_not_found")]
    pub agency_name: String,
    /// "job_posting", "testimonial" or "partner_page".
    #[serde(deserialize_with = "null_as_empty_text")]
    pub presence_type: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub evidence_urls: Vec<String>,
    #[serde(deserialize_with = "null_as_zero")]
    pub confidence: f64,
    #[serde(deserialize_with = "null_as_empty")]
    pub weaknesses: Vec<String>,
}

impl Default for ExtractedCompetitor {
    fn default() -> Self {
        Self {
            agency_name: not_found(),
            presence_type: "job_posting".into(),
            evidence_urls: Vec::new(),
            confidence: 0.0,
            weaknesses: Vec::new(),
        }
    }
}

/// The school profile produced by basic research.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchoolProfile {
    #[serde(deserialize_with = "null_as_not_found")]
    pub website: String,
    #[serde(deserialize_with = "null_as_not_found")]
    pub address: String,
    #[serde(deserialize_with = "null_as_not_found")]
    pub phone: String,
    #[serde(deserialize_with = "null_as_not_found")]
    pub email: String,
    #[serde(deserialize_with = "null_as_not_found")]
    pub email_pattern: String,
    #[serde(deserialize_with = "null_as_not_found")]
    pub head_teacher: String,
    #[serde(deserialize_with = "null_as_not_found")]
    pub ofsted_rating: String,
    #[serde(deserialize_with = "null_as_not_found")]
    pub inspection_date: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub contacts: Vec<ExtractedContact>,
    #[serde(deserialize_with = "null_as_empty")]
    pub achievements: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub events: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub leadership_changes: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub competitors: Vec<ExtractedCompetitor>,
    #[serde(deserialize_with = "null_as_empty")]
    pub conversation_starters: Vec<ExtractedStarter>,
}

impl Default for SchoolProfile {
    fn default() -> Self {
        Self {
            website: not_found(),
            address: not_found(),
            phone: not_found(),
            email: not_found(),
            email_pattern: not_found(),
            head_teacher: not_found(),
            ofsted_rating: not_found(),
            inspection_date: not_found(),
            contacts: Vec::new(),
            achievements: Vec::new(),
            events: Vec::new(),
            leadership_changes: Vec::new(),
            competitors: Vec::new(),
            conversation_starters: Vec::new(),
        }
    }
}

impl ExtractionSchema for SchoolProfile {
    const NAME: &'static str = "school_profile";

    fn instructions() -> &'static str {
        "You research UK schools for an education recruitment agency. From the search \
         results below, extract the school's website, postal address, main phone number, \
         general email, the pattern staff email addresses follow, the headteacher's name, \
         the latest Ofsted rating and inspection date. List named Deputy Heads, Assistant \
         Heads, Business Managers and SENCOs with a confidence between 0 and 1 and the URLs \
         that mention them. Note recent achievements, events and leadership changes, any \
         recruitment agencies visibly working with the school, and conversation starters a \
         recruitment consultant could open with, each with a relevance between 0 and 1."
    }

    fn template() -> serde_json::Value {
        let example = SchoolProfile {
            contacts: vec![ExtractedContact::default()],
            competitors: vec![ExtractedCompetitor::default()],
            conversation_starters: vec![ExtractedStarter::default()],
            ..SchoolProfile::default()
        };
        serde_json::to_value(example).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Enrichment payloads
// ---------------------------------------------------------------------------

impl ExtractionSchema for FinancialData {
    const NAME: &'static str = "financial_data";

    fn instructions() -> &'static str {
        "Extract the school's published finances from the text below. Give monetary \
         amounts in pounds as plain numbers (no currency symbols or commas) and null when \
         a figure is not stated. Supply staff and agency supply costs matter most. \
         Include the DfE URN and the financial year the figures cover."
    }
}

impl ExtractionSchema for InspectionAnalysis {
    const NAME: &'static str = "inspection_analysis";

    fn instructions() -> &'static str {
        "Analyse this Ofsted inspection report. Extract the overall rating, the inspection \
         date (YYYY-MM-DD), the main strengths, and each point from 'what does the school \
         need to do to improve' as an improvement area with a category of teaching, \
         leadership, behaviour, send, curriculum, staffing or other. Quote any mentions of \
         staffing, recruitment, turnover or supply staff in staffing_mentions."
    }

    fn template() -> serde_json::Value {
        let example = InspectionAnalysis {
            improvement_areas: vec![ImprovementArea::default()],
            ..InspectionAnalysis::default()
        };
        serde_json::to_value(example).unwrap_or_default()
    }
}

impl ExtractionSchema for VacancyData {
    const NAME: &'static str = "vacancy_data";

    fn instructions() -> &'static str {
        "List the teaching and support vacancies advertised for this school in the text \
         below. For each give the job title, subject, contract type (permanent, fixed-term, \
         maternity cover, supply), closing date as YYYY-MM-DD, advert URL, where it was \
         advertised, and the recruitment agency named on the advert if any. Only include \
         roles at this school. Leave urgency_score at 0 and urgency_label empty."
    }

    fn template() -> serde_json::Value {
        let example = VacancyData {
            vacancies: vec![Vacancy::default()],
            ..VacancyData::default()
        };
        serde_json::to_value(example).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_sentinel_defaults() {
        let profile: SchoolProfile =
            serde_json::from_str(r#"{"contacts": [{"name": "Jane Doe"}]}"#).unwrap();
        assert_eq!(profile.website, NOT_FOUND);
        assert_eq!(profile.contacts[0].role, NOT_FOUND);
        assert_eq!(profile.contacts[0].confidence, 0.0);
        assert!(profile.contacts[0].evidence_urls.is_empty());
    }

    #[test]
    fn null_values_read_as_empty() {
        let starter: ExtractedStarter =
            serde_json::from_str(r#"{"topic": null, "detail": null, "relevance": 0.7}"#).unwrap();
        assert_eq!(starter.topic, NOT_FOUND);
        assert_eq!(starter.detail, "");
        assert_eq!(starter.relevance, 0.7);

        let competitor: ExtractedCompetitor =
            serde_json::from_str(r#"{"agency_name": "Teach Co", "weaknesses": null}"#).unwrap();
        assert_eq!(competitor.agency_name, "Teach Co");
        assert!(competitor.weaknesses.is_empty());
    }

    #[test]
    fn templates_show_nested_item_shape() {
        let profile = SchoolProfile::template();
        assert!(profile["contacts"][0].get("evidence_urls").is_some());
        assert!(profile["conversation_starters"][0].get("relevance").is_some());

        let inspection = InspectionAnalysis::template();
        assert!(inspection["improvement_areas"][0].get("category").is_some());

        let vacancies = VacancyData::template();
        assert!(vacancies["vacancies"][0].get("closing_date").is_some());
    }

    #[test]
    fn default_template_is_the_empty_value() {
        let template = FinancialData::template();
        assert_eq!(template["urn"], NOT_FOUND);
        assert!(template["total_income"].is_null());
    }
}
