//! Research pipeline: cache → basic research → enrichment → cache write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{debug, info, instrument, warn};

use schoolintel_shared::{
    ResearchConfig, Result, SchoolIntelError, SchoolRecord, UsageCounters, UsageSnapshot,
    data_quality_score,
};
use schoolintel_storage::{Cache, CacheKey};

use crate::orchestrator::{Orchestrator, StageReport};
use crate::research::basic_research;
use crate::stages::{EnrichmentStage, StageContext, standard_stages};

/// Callback for reporting pipeline progress.
pub trait ProgressReporter: Send + Sync {
    /// A named phase started for `school`.
    fn phase(&self, school: &str, name: &str);
    /// An enrichment stage ended.
    fn stage_finished(&self, school: &str, report: &StageReport);
    /// The record is final.
    fn done(&self, record: &SchoolRecord);
}

/// No-op progress reporter.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _school: &str, _name: &str) {}
    fn stage_finished(&self, _school: &str, _report: &StageReport) {}
    fn done(&self, _record: &SchoolRecord) {}
}

/// One entry of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchoolQuery {
    pub name: String,
    pub location: Option<String>,
}

impl SchoolQuery {
    pub fn new(name: impl Into<String>, location: Option<String>) -> Self {
        Self {
            name: name.into(),
            location,
        }
    }
}

/// Builds dossiers end to end.
///
/// Requests for the same school serialise on a per-key lock, so with the
/// cache enabled a second concurrent caller is served the first caller's
/// result instead of repeating the work. Different schools never contend.
pub struct SchoolResearcher {
    ctx: StageContext,
    orchestrator: Orchestrator,
    cache: Option<Arc<Cache>>,
    usage: Arc<UsageCounters>,
    config: ResearchConfig,
    in_flight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SchoolResearcher {
    /// `usage` must be the counters the providers in `ctx` record into.
    pub fn new(mut ctx: StageContext, usage: Arc<UsageCounters>, config: ResearchConfig) -> Self {
        ctx.mode = config.mode;
        Self {
            orchestrator: Orchestrator::new(standard_stages(&config.stages)),
            ctx,
            cache: None,
            usage,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the enrichment stages.
    pub fn with_stages(mut self, stages: Vec<Arc<dyn EnrichmentStage>>) -> Self {
        self.orchestrator = Orchestrator::new(stages);
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Totals across every request served by this researcher.
    pub fn usage(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }

    /// Research one school.
    ///
    /// Only an empty name is an error; provider and stage failures degrade the
    /// record instead.
    #[instrument(skip_all, fields(school = %name))]
    pub async fn research(
        &self,
        name: &str,
        location: Option<&str>,
        progress: &dyn ProgressReporter,
    ) -> Result<SchoolRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SchoolIntelError::validation("school name must not be empty"));
        }
        let location = location
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .or(self.config.location.as_deref());

        let key = CacheKey::school(name);
        let flight = self.flight_lock(key.entity_key());
        let guard = flight.lock().await;

        let record = self.research_locked(name, location, &key, progress).await;

        drop(guard);
        self.release_flight(key.entity_key(), flight);

        progress.done(&record);
        Ok(record)
    }

    async fn research_locked(
        &self,
        name: &str,
        location: Option<&str>,
        key: &CacheKey,
        progress: &dyn ProgressReporter,
    ) -> SchoolRecord {
        if let Some(cached) = self.cached(name, key, progress).await {
            return cached;
        }

        let start = Instant::now();
        let before = self.usage.snapshot();
        // Measured from here, so slow basic research shortens enrichment.
        let deadline = self
            .config
            .request_timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);

        progress.phase(name, "basic research");
        let record = basic_research(name, location, &self.ctx).await;

        progress.phase(name, "enrichment");
        let (mut record, reports) = self.orchestrator.enrich(record, &self.ctx, deadline).await;
        for report in &reports {
            progress.stage_finished(name, report);
        }

        record.sort_starters();
        record.data_quality_score = data_quality_score(&record);
        record.processing.duration_ms = start.elapsed().as_millis() as u64;
        record.processing.sources_consulted = record.sources.len();
        record.processing.mode = self.config.mode;
        record.processing.usage = self.usage.snapshot().since(&before);
        record.processing.from_cache = false;

        if let Some(cache) = &self.cache {
            progress.phase(name, "caching");
            if !cache.set(key, &record, &record.sources).await {
                warn!("record not cached");
            }
        }

        info!(
            quality = record.data_quality_score,
            contacts = record.contacts.len(),
            starters = record.conversation_starters.len(),
            sources = record.sources.len(),
            failed = ?record.processing.stages_failed,
            duration_ms = record.processing.duration_ms,
            "research complete"
        );

        record
    }

    async fn cached(
        &self,
        name: &str,
        key: &CacheKey,
        progress: &dyn ProgressReporter,
    ) -> Option<SchoolRecord> {
        if self.config.force_refresh {
            debug!("cache lookup skipped");
            return None;
        }
        let cache = self.cache.as_ref()?;
        progress.phase(name, "cache lookup");
        let entry = cache.get(key).await?;

        info!(created_at = %entry.created_at, "served from cache");
        let mut record = entry.record;
        record.processing.from_cache = true;
        Some(record)
    }

    /// Research many schools, at most `batch_concurrency` at a time.
    ///
    /// Results come back in input order.
    #[instrument(skip_all, fields(schools = queries.len()))]
    pub async fn research_batch(
        &self,
        queries: &[SchoolQuery],
        progress: &dyn ProgressReporter,
    ) -> Vec<Result<SchoolRecord>> {
        let permits = Semaphore::new(self.config.batch_concurrency.max(1));

        let runs = queries.iter().map(|query| {
            let permits = &permits;
            async move {
                let _permit = permits
                    .acquire()
                    .await
                    .map_err(|e| SchoolIntelError::validation(e.to_string()))?;
                self.research(&query.name, query.location.as_deref(), progress)
                    .await
            }
        });
        let results = join_all(runs).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total = results.len(), failed, "batch complete");
        results
    }

    fn flight_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(in_flight.entry(key.to_string()).or_default())
    }

    /// Drop the map entry once no other caller holds or waits on it.
    fn release_flight(&self, key: &str, flight: Arc<AsyncMutex<()>>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map plus ours.
        if Arc::strong_count(&flight) == 2 {
            in_flight.remove(key);
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }
}
