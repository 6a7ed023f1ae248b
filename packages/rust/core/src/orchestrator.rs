//! Enrichment orchestrator: run stages on one snapshot, merge in fixed order.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, instrument, warn};

use schoolintel_shared::{RecordDelta, SchoolRecord};

use crate::fanout;
use crate::stages::{EnrichmentStage, StageContext, StageKind};

/// How one stage ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Completed(RecordDelta),
    Failed(String),
    Panicked,
    TimedOut,
}

impl StageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Panicked => "panicked",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Outcome of one stage with its wall time.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub kind: StageKind,
    pub outcome: StageOutcome,
    pub elapsed: Duration,
}

impl StageReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, StageOutcome::Completed(_))
    }
}

/// Runs the enrichment stages for one record.
pub struct Orchestrator {
    /// Sorted by [`StageKind`], which is the merge order.
    stages: Vec<Arc<dyn EnrichmentStage>>,
}

impl Orchestrator {
    pub fn new(mut stages: Vec<Arc<dyn EnrichmentStage>>) -> Self {
        stages.sort_by_key(|s| s.kind());
        Self { stages }
    }

    /// Run every stage against the same snapshot of `record` and merge the
    /// successful deltas in stage order.
    ///
    /// Stages still running at `deadline` are aborted and contribute nothing.
    /// Failures, panics and timeouts are logged and recorded in
    /// `record.processing`; they never fail the call.
    #[instrument(skip_all, fields(school = %record.name, stages = self.stages.len()))]
    pub async fn enrich(
        &self,
        mut record: SchoolRecord,
        ctx: &StageContext,
        deadline: Option<Instant>,
    ) -> (SchoolRecord, Vec<StageReport>) {
        let snapshot = Arc::new(record.clone());

        let runs = self
            .stages
            .iter()
            .map(|stage| run_stage(Arc::clone(stage), Arc::clone(&snapshot), ctx.clone(), deadline))
            .collect::<Vec<_>>();
        let reports = fanout::run_all(ctx.mode, runs).await;

        for report in &reports {
            let name = report.kind.as_str().to_string();
            match &report.outcome {
                StageOutcome::Completed(delta) => {
                    record.apply_delta(delta.clone());
                    record.processing.stages_completed.push(name);
                }
                _ => record.processing.stages_failed.push(name),
            }
        }
        record.sort_starters();

        let completed = reports.iter().filter(|r| r.succeeded()).count();
        info!(completed, failed = reports.len() - completed, "enrichment merged");

        (record, reports)
    }
}

/// Run one stage on its own task so a panic or deadline cannot take the
/// others down.
async fn run_stage(
    stage: Arc<dyn EnrichmentStage>,
    snapshot: Arc<SchoolRecord>,
    ctx: StageContext,
    deadline: Option<Instant>,
) -> StageReport {
    let kind = stage.kind();
    let start = Instant::now();

    let mut handle = tokio::spawn(async move { stage.run(&snapshot, &ctx).await });

    let joined = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(joined) => Some(joined),
            Err(_) => {
                handle.abort();
                None
            }
        },
        None => Some(handle.await),
    };

    let outcome = match joined {
        None => StageOutcome::TimedOut,
        Some(Ok(Ok(delta))) => StageOutcome::Completed(delta),
        Some(Ok(Err(e))) => StageOutcome::Failed(e.to_string()),
        Some(Err(join_error)) if join_error.is_panic() => StageOutcome::Panicked,
        Some(Err(join_error)) => StageOutcome::Failed(join_error.to_string()),
    };

    let elapsed = start.elapsed();
    match &outcome {
        StageOutcome::Completed(_) => {
            info!(stage = %kind, elapsed_ms = elapsed.as_millis() as u64, "stage completed")
        }
        StageOutcome::Failed(reason) => {
            warn!(stage = %kind, elapsed_ms = elapsed.as_millis() as u64, %reason, "stage failed")
        }
        other => {
            warn!(stage = %kind, elapsed_ms = elapsed.as_millis() as u64, outcome = other.label(), "stage abandoned")
        }
    }

    StageReport {
        kind,
        outcome,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use schoolintel_shared::{
        CompetitorPresence, ConversationStarter, FinancialData, InspectionAnalysis, OfstedRating,
        PresenceType, Result, SchoolIntelError, VacancyData,
    };

    use crate::testing::{ScriptedExtractor, ScriptedFetcher, ScriptedSearch, context};

    enum Behaviour {
        Delta(RecordDelta),
        Fail,
        Panic,
    }

    struct FakeStage {
        kind: StageKind,
        delay: Duration,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl EnrichmentStage for FakeStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        async fn run(&self, record: &SchoolRecord, _ctx: &StageContext) -> Result<RecordDelta> {
            tokio::time::sleep(self.delay).await;
            // Stages only ever see the pre-enrichment snapshot.
            assert!(record.financial.is_none() && record.inspection.is_none());
            match &self.behaviour {
                Behaviour::Delta(delta) => Ok(delta.clone()),
                Behaviour::Fail => Err(SchoolIntelError::stage(self.kind.as_str(), "simulated")),
                Behaviour::Panic => panic!("stage bug"),
            }
        }
    }

    fn starter(topic: &str, relevance: f64) -> ConversationStarter {
        ConversationStarter {
            topic: topic.into(),
            detail: String::new(),
            source_url: format!("https://example.org/{topic}"),
            relevance,
        }
    }

    fn delta_for(kind: StageKind) -> RecordDelta {
        match kind {
            StageKind::Financial => RecordDelta {
                financial: Some(FinancialData {
                    urn: "107000".into(),
                    ..FinancialData::default()
                }),
                conversation_starters: vec![starter("supply", 0.8)],
                sources: vec!["https://example.org/fin".into()],
                ..RecordDelta::default()
            },
            StageKind::Inspection => RecordDelta {
                inspection: Some(InspectionAnalysis::default()),
                ofsted_rating: Some(OfstedRating::RequiresImprovement),
                conversation_starters: vec![starter("reading", 0.8), starter("send", 0.9)],
                sources: vec!["https://example.org/ofsted".into()],
                ..RecordDelta::default()
            },
            StageKind::Vacancy => RecordDelta {
                vacancies: Some(VacancyData::default()),
                ofsted_rating: Some(OfstedRating::Good),
                competitors: vec![CompetitorPresence {
                    agency_name: "Teaching Personnel".into(),
                    presence_type: PresenceType::JobPosting,
                    evidence_urls: vec!["https://example.org/tes".into()],
                    confidence: 0.7,
                    weaknesses: Vec::new(),
                }],
                conversation_starters: vec![starter("hiring", 0.8)],
                sources: vec!["https://example.org/fin".into(), "https://example.org/tes".into()],
                ..RecordDelta::default()
            },
        }
    }

    fn stage(kind: StageKind, delay_ms: u64, behaviour: Behaviour) -> Arc<dyn EnrichmentStage> {
        Arc::new(FakeStage {
            kind,
            delay: Duration::from_millis(delay_ms),
            behaviour,
        })
    }

    fn ctx() -> StageContext {
        context(ScriptedSearch::new(), ScriptedExtractor::new(), ScriptedFetcher::new()).0
    }

    fn base() -> SchoolRecord {
        SchoolRecord::new("Example Primary School", None)
    }

    #[tokio::test(start_paused = true)]
    async fn completion_order_never_changes_the_merge() {
        let base = base();
        let delays: [[u64; 3]; 6] = [
            [10, 20, 30],
            [10, 30, 20],
            [20, 10, 30],
            [20, 30, 10],
            [30, 10, 20],
            [30, 20, 10],
        ];

        let mut merged = Vec::new();
        for d in delays {
            let orchestrator = Orchestrator::new(
                StageKind::ALL
                    .iter()
                    .zip(d)
                    .map(|(&kind, ms)| stage(kind, ms, Behaviour::Delta(delta_for(kind))))
                    .collect(),
            );
            let (record, _) = orchestrator.enrich(base.clone(), &ctx(), None).await;
            merged.push(record);
        }

        let first = &merged[0];
        assert!(merged.iter().all(|r| r == first));

        // Financial → Inspection → Vacancy: the inspection rating wins.
        assert_eq!(first.ofsted_rating, Some(OfstedRating::RequiresImprovement));
        let topics: Vec<&str> = first.conversation_starters.iter().map(|s| s.topic.as_str()).collect();
        // Stable sort keeps merge order among the 0.8 ties.
        assert_eq!(topics, vec!["send", "supply", "reading", "hiring"]);
        assert_eq!(
            first.sources,
            vec!["https://example.org/fin", "https://example.org/ofsted", "https://example.org/tes"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stages_run_concurrently() {
        let orchestrator = Orchestrator::new(
            StageKind::ALL
                .iter()
                .map(|&kind| stage(kind, 100, Behaviour::Delta(delta_for(kind))))
                .collect(),
        );
        let start = Instant::now();
        orchestrator.enrich(base(), &ctx(), None).await;
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_and_panic_are_isolated() {
        let orchestrator = Orchestrator::new(vec![
            stage(StageKind::Vacancy, 5, Behaviour::Delta(delta_for(StageKind::Vacancy))),
            stage(StageKind::Inspection, 5, Behaviour::Fail),
            stage(StageKind::Financial, 5, Behaviour::Panic),
        ]);

        let (record, reports) = orchestrator.enrich(base(), &ctx(), None).await;

        assert!(record.vacancies.is_some());
        assert!(record.inspection.is_none());
        assert!(record.financial.is_none());
        assert_eq!(record.processing.stages_completed, vec!["vacancy"]);
        assert_eq!(record.processing.stages_failed, vec!["financial", "inspection"]);
        assert_eq!(reports[0].outcome, StageOutcome::Panicked);
        assert!(matches!(reports[1].outcome, StageOutcome::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_abandons_slow_stage() {
        let orchestrator = Orchestrator::new(vec![
            stage(StageKind::Financial, 10, Behaviour::Delta(delta_for(StageKind::Financial))),
            stage(StageKind::Inspection, 60_000, Behaviour::Delta(delta_for(StageKind::Inspection))),
            stage(StageKind::Vacancy, 20, Behaviour::Delta(delta_for(StageKind::Vacancy))),
        ]);

        let start = Instant::now();
        let deadline = start + Duration::from_secs(1);
        let (record, reports) = orchestrator.enrich(base(), &ctx(), Some(deadline)).await;

        assert!(start.elapsed() <= Duration::from_millis(1_100));
        assert_eq!(reports[1].outcome, StageOutcome::TimedOut);
        assert!(record.inspection.is_none());
        assert!(record.financial.is_some() && record.vacancies.is_some());
        // With inspection gone, the vacancy rating fills the empty slot.
        assert_eq!(record.ofsted_rating, Some(OfstedRating::Good));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_mode_gives_the_same_record() {
        let stages = || {
            StageKind::ALL
                .iter()
                .map(|&kind| stage(kind, 10, Behaviour::Delta(delta_for(kind))))
                .collect::<Vec<_>>()
        };
        let base = base();

        let (concurrent, _) = Orchestrator::new(stages()).enrich(base.clone(), &ctx(), None).await;

        let mut seq_ctx = ctx();
        seq_ctx.mode = schoolintel_shared::ExecutionMode::Sequential;
        let (sequential, _) = Orchestrator::new(stages()).enrich(base, &seq_ctx, None).await;

        assert_eq!(concurrent, sequential);
    }

    #[tokio::test]
    async fn enriching_twice_is_idempotent() {
        let orchestrator = Orchestrator::new(
            StageKind::ALL
                .iter()
                .map(|&kind| stage(kind, 0, Behaviour::Delta(delta_for(kind))))
                .collect(),
        );
        let (once, _) = orchestrator.enrich(base(), &ctx(), None).await;

        let mut again_input = once.clone();
        again_input.financial = None;
        again_input.inspection = None;
        let (twice, _) = orchestrator.enrich(again_input, &ctx(), None).await;

        assert_eq!(twice.conversation_starters.len(), once.conversation_starters.len());
        assert_eq!(twice.competitors.len(), once.competitors.len());
        assert_eq!(twice.sources, once.sources);
    }
}
