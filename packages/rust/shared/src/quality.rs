//! Data-quality score for a [`SchoolRecord`].

use crate::types::SchoolRecord;

// Weights are integer points out of 100 so that sums are exact.
const WEBSITE: u32 = 20;
const PHONE: u32 = 10;
const EMAIL: u32 = 10;
const INSPECTION_RATING: u32 = 20;
const HEAD_NAME: u32 = 20;
const ACHIEVEMENT: u32 = 10;
const CONVERSATION_STARTER: u32 = 10;

/// Weighted presence score in `[0.0, 1.0]`.
///
/// Only the basic-research fields count; enrichment payloads never affect it.
/// Fields are stored as `None` when they were not found, so a placeholder can
/// never contribute.
pub fn data_quality_score(record: &SchoolRecord) -> f64 {
    let checks = [
        (record.website.is_some(), WEBSITE),
        (record.phone.is_some(), PHONE),
        (record.email.is_some(), EMAIL),
        (record.ofsted_rating.is_some(), INSPECTION_RATING),
        (record.head_teacher.is_some(), HEAD_NAME),
        (!record.achievements.is_empty(), ACHIEVEMENT),
        (!record.conversation_starters.is_empty(), CONVERSATION_STARTER),
    ];

    let points: u32 = checks
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, weight)| weight)
        .sum();

    (f64::from(points) / 100.0).clamp(0.0, 1.0)
}
