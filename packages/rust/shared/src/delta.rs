//! Stage deltas and the rules for merging them into a [`SchoolRecord`].
//!
//! Every merge helper is idempotent: applying the same delta twice leaves the
//! record as it was after the first application.

use serde::{Deserialize, Serialize};

use crate::types::{
    CompetitorPresence, Contact, ConversationStarter, FinancialData, InspectionAnalysis,
    OfstedRating, SchoolRecord, VacancyData,
};

/// The changes one enrichment stage wants merged into the aggregate record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordDelta {
    pub financial: Option<FinancialData>,
    pub inspection: Option<InspectionAnalysis>,
    pub vacancies: Option<VacancyData>,
    /// Applied only when the record has no rating yet.
    pub ofsted_rating: Option<OfstedRating>,
    /// Applied only when the record has no inspection date yet.
    pub inspection_date: Option<String>,
    pub contacts: Vec<Contact>,
    pub competitors: Vec<CompetitorPresence>,
    pub conversation_starters: Vec<ConversationStarter>,
    pub sources: Vec<String>,
}

impl SchoolRecord {
    /// Merge a stage delta into this record.
    pub fn apply_delta(&mut self, delta: RecordDelta) {
        if let Some(financial) = delta.financial {
            self.financial = Some(financial);
        }
        if let Some(inspection) = delta.inspection {
            self.inspection = Some(inspection);
        }
        if let Some(vacancies) = delta.vacancies {
            self.vacancies = Some(vacancies);
        }
        if self.ofsted_rating.is_none() {
            self.ofsted_rating = delta.ofsted_rating;
        }
        if self.inspection_date.is_none() {
            self.inspection_date = delta.inspection_date;
        }
        for contact in delta.contacts {
            self.add_contact(contact);
        }
        for competitor in delta.competitors {
            self.add_competitor(competitor);
        }
        for starter in delta.conversation_starters {
            self.add_starter(starter);
        }
        for source in delta.sources {
            self.add_source(source);
        }
    }

    /// Add a contact unless it duplicates an existing one.
    ///
    /// Deputy and assistant heads are limited to one each (first found wins);
    /// other roles are de-duplicated by role + case-insensitive name.
    pub fn add_contact(&mut self, contact: Contact) -> bool {
        let duplicate = self.contacts.iter().any(|existing| {
            existing.role == contact.role
                && (contact.role.is_singular()
                    || existing.full_name.eq_ignore_ascii_case(&contact.full_name))
        });
        if duplicate {
            return false;
        }
        self.contacts.push(contact);
        true
    }

    /// Add a competitor, or fold its evidence into an existing entry for the
    /// same agency (case-insensitive).
    pub fn add_competitor(&mut self, competitor: CompetitorPresence) {
        let existing = self
            .competitors
            .iter_mut()
            .find(|c| c.agency_name.eq_ignore_ascii_case(&competitor.agency_name));

        match existing {
            Some(entry) => {
                for url in competitor.evidence_urls {
                    if !entry.evidence_urls.contains(&url) {
                        entry.evidence_urls.push(url);
                    }
                }
                for weakness in competitor.weaknesses {
                    if !entry.weaknesses.contains(&weakness) {
                        entry.weaknesses.push(weakness);
                    }
                }
                entry.confidence = entry.confidence.max(competitor.confidence);
            }
            None => self.competitors.push(competitor),
        }
    }

    /// Add a starter unless one with the same topic and source URL exists.
    pub fn add_starter(&mut self, starter: ConversationStarter) -> bool {
        let duplicate = self.conversation_starters.iter().any(|s| {
            s.topic.eq_ignore_ascii_case(&starter.topic) && s.source_url == starter.source_url
        });
        if duplicate {
            return false;
        }
        self.conversation_starters.push(starter);
        true
    }

    /// Record a consulted URL once.
    pub fn add_source(&mut self, url: String) {
        if !url.is_empty() && !self.sources.contains(&url) {
            self.sources.push(url);
        }
    }

    /// Stable sort of conversation starters, highest relevance first.
    pub fn sort_starters(&mut self) {
        self.conversation_starters
            .sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContactRole, PresenceType};

    fn contact(role: ContactRole, name: &str) -> Contact {
        Contact {
            role,
            full_name: name.into(),
            email: None,
            phone: None,
            confidence: 0.8,
            evidence_urls: vec![],
            verification_method: "search_snippet".into(),
        }
    }

    fn starter(topic: &str, url: &str, relevance: f64) -> ConversationStarter {
        ConversationStarter {
            topic: topic.into(),
            detail: format!("{topic} detail"),
            source_url: url.into(),
            relevance,
        }
    }

    fn competitor(name: &str, url: &str) -> CompetitorPresence {
        CompetitorPresence {
            agency_name: name.into(),
            presence_type: PresenceType::JobPosting,
            evidence_urls: vec![url.into()],
            confidence: 0.6,
            weaknesses: vec!["slow to fill roles".into()],
        }
    }

    #[test]
    fn first_deputy_head_wins() {
        let mut record = SchoolRecord::new("Example Primary School", None);
        assert!(record.add_contact(contact(ContactRole::DeputyHead, "Alex Jones")));
        assert!(!record.add_contact(contact(ContactRole::DeputyHead, "Sam Patel")));
        assert!(record.add_contact(contact(ContactRole::Senco, "Sam Patel")));
        assert!(record.add_contact(contact(ContactRole::Senco, "Chris Lee")));
        assert!(!record.add_contact(contact(ContactRole::Senco, "chris lee")));
        assert_eq!(record.contacts.len(), 3);
        assert_eq!(record.contacts[0].full_name, "Alex Jones");
    }

    #[test]
    fn competitor_evidence_is_augmented() {
        let mut record = SchoolRecord::new("Example Primary School", None);
        record.add_competitor(competitor("Hays Education", "https://a.example/1"));
        let mut second = competitor("HAYS EDUCATION", "https://b.example/2");
        second.confidence = 0.9;
        record.add_competitor(second);

        assert_eq!(record.competitors.len(), 1);
        let entry = &record.competitors[0];
        assert_eq!(entry.evidence_urls.len(), 2);
        assert_eq!(entry.weaknesses.len(), 1);
        assert_eq!(entry.confidence, 0.9);
    }

    #[test]
    fn applying_delta_twice_is_idempotent() {
        let delta = RecordDelta {
            competitors: vec![competitor("Tradewind", "https://jobs.example/1")],
            conversation_starters: vec![starter("Recruiting", "https://jobs.example/1", 0.8)],
            sources: vec!["https://jobs.example/1".into()],
            ofsted_rating: Some(OfstedRating::Good),
            ..Default::default()
        };

        let mut once = SchoolRecord::new("Example Primary School", None);
        once.apply_delta(delta.clone());
        let mut twice = once.clone();
        twice.apply_delta(delta);

        assert_eq!(once, twice);
    }

    #[test]
    fn existing_rating_is_not_overwritten() {
        let mut record = SchoolRecord::new("Example Primary School", None);
        record.ofsted_rating = Some(OfstedRating::Outstanding);
        record.apply_delta(RecordDelta {
            ofsted_rating: Some(OfstedRating::Good),
            inspection_date: Some("2023-05-10".into()),
            ..Default::default()
        });
        assert_eq!(record.ofsted_rating, Some(OfstedRating::Outstanding));
        assert_eq!(record.inspection_date.as_deref(), Some("2023-05-10"));
    }

    #[test]
    fn sort_starters_is_stable_descending() {
        let mut record = SchoolRecord::new("Example Primary School", None);
        record.add_starter(starter("a", "u1", 0.5));
        record.add_starter(starter("b", "u2", 0.9));
        record.add_starter(starter("c", "u3", 0.5));
        record.sort_starters();
        let topics: Vec<_> = record
            .conversation_starters
            .iter()
            .map(|s| s.topic.as_str())
            .collect();
        assert_eq!(topics, ["b", "a", "c"]);
    }
}
