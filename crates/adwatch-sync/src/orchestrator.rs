use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use adwatch_adapters::{AdapterContext, AdapterErrorKind, FetchResult, PlatformAdapter};
use adwatch_core::{AdDraft, Competitor, FetchJob, Platform};
use adwatch_storage::{
    AdStore, Backend, CompetitorDirectory, FetchJobLedger, LedgerError, StoreError, UpsertOutcome,
};
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::locks::CompetitorLocks;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("a fetch job is already running for competitor {competitor_id}")]
    AlreadyRunning {
        competitor_id: Uuid,
        /// Known when the ledger reported the conflicting job.
        job_id: Option<Uuid>,
    },
    #[error("competitor {0} not found")]
    CompetitorNotFound(Uuid),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        OrchestratorError::Persistence(err.to_string())
    }
}

impl From<LedgerError> for OrchestratorError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AlreadyRunning {
                competitor_id,
                job_id,
            } => OrchestratorError::AlreadyRunning {
                competitor_id,
                job_id: Some(job_id),
            },
            other => OrchestratorError::Persistence(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Outer ceiling on one adapter call, on top of the adapter's own deadline.
    pub adapter_timeout: Duration,
    pub stale_after: Duration,
    /// Pause between competitors in `run_fetch_all`.
    pub batch_pause: Duration,
    pub job_history_limit: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(60),
            stale_after: Duration::from_secs(900),
            batch_pause: Duration::from_secs(1),
            job_history_limit: 50,
        }
    }
}

/// Repeated external ids inside one response collapse to the last
/// occurrence, kept at the position of the first.
pub fn dedup_batch(platform: Platform, drafts: Vec<AdDraft>) -> Vec<AdDraft> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<AdDraft> = Vec::with_capacity(drafts.len());
    for mut draft in drafts {
        draft.platform = platform;
        match positions.get(&draft.external_ad_id) {
            Some(&at) => unique[at] = draft,
            None => {
                positions.insert(draft.external_ad_id.clone(), unique.len());
                unique.push(draft);
            }
        }
    }
    unique
}

#[derive(Debug, Default, Clone, Copy)]
struct WriteCounts {
    inserted: u32,
    updated: u32,
    deactivated: u32,
}

#[derive(Clone)]
pub struct FetchOrchestrator {
    backend: Arc<dyn Backend>,
    adapters: Arc<BTreeMap<Platform, Arc<dyn PlatformAdapter>>>,
    locks: CompetitorLocks,
    settings: OrchestratorSettings,
}

impl FetchOrchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        adapters: BTreeMap<Platform, Arc<dyn PlatformAdapter>>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            backend,
            adapters: Arc::new(adapters),
            locks: CompetitorLocks::new(),
            settings,
        }
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.adapters.keys().copied().collect()
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// True while a fetch for `competitor_id` is in flight in this process.
    pub fn is_fetching(&self, competitor_id: Uuid) -> bool {
        self.locks.is_held(competitor_id)
    }

    /// One orchestration cycle for one competitor. Platform failures end up
    /// in the job's outcomes; only a duplicate trigger or a persistence
    /// failure fails the call.
    ///
    /// The cycle runs on its own task. Dropping the returned future stops
    /// the wait, not the job: the ledger row still reaches a terminal state.
    pub async fn run_fetch(&self, competitor_id: Uuid) -> Result<FetchJob, OrchestratorError> {
        let guard = self.locks.try_acquire(competitor_id).ok_or(
            OrchestratorError::AlreadyRunning {
                competitor_id,
                job_id: None,
            },
        )?;

        let this = self.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            this.start_and_drive(competitor_id).await
        });
        task.await.map_err(|err| {
            error!(%competitor_id, error = %err, "fetch task aborted");
            OrchestratorError::Persistence(format!("fetch task aborted: {err}"))
        })?
    }

    async fn start_and_drive(&self, competitor_id: Uuid) -> Result<FetchJob, OrchestratorError> {
        let competitor = self
            .backend
            .competitor(competitor_id)
            .await?
            .ok_or(OrchestratorError::CompetitorNotFound(competitor_id))?;

        let job = self
            .backend
            .begin(competitor_id, &self.platforms(), Utc::now())
            .await?;

        let span = info_span!("run_fetch", %competitor_id, job_id = %job.id);
        self.drive(competitor, job).instrument(span).await
    }

    async fn drive(&self, competitor: Competitor, mut job: FetchJob) -> Result<FetchJob, OrchestratorError> {
        info!(competitor = %competitor.name, platforms = job.outcomes.len(), "fetch job started");
        let ctx = AdapterContext {
            job_id: job.id,
            fetched_at: job.started_at,
        };
        let competitor = Arc::new(competitor);

        // Fan out: one task per platform, no shared state between them.
        let handles: Vec<_> = self
            .adapters
            .iter()
            .map(|(platform, adapter)| {
                let platform = *platform;
                let adapter = Arc::clone(adapter);
                let competitor = Arc::clone(&competitor);
                let ctx = ctx.clone();
                let ceiling = self.settings.adapter_timeout;
                let handle = tokio::spawn(async move {
                    match tokio::time::timeout(ceiling, adapter.fetch(&ctx, &competitor)).await {
                        Ok(result) => result,
                        Err(_) => FetchResult::Error {
                            kind: AdapterErrorKind::Timeout,
                            message: format!(
                                "{platform} exceeded the orchestrator ceiling of {}s",
                                ceiling.as_secs_f64()
                            ),
                        },
                    }
                });
                (platform, handle)
            })
            .collect();

        // Single writer: results are applied one platform at a time.
        let mut counts = WriteCounts::default();
        let mut persistence_failure: Option<String> = None;
        for (platform, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => FetchResult::Error {
                    kind: AdapterErrorKind::Upstream,
                    message: format!("adapter task aborted: {join_err}"),
                },
            };
            if persistence_failure.is_some() {
                if let Some(outcome) = job.outcome_mut(platform) {
                    outcome.failed("persistence", "not written after an earlier write failure");
                }
                continue;
            }
            if let Err(err) = self
                .apply_result(&mut job, competitor.id, platform, result, &mut counts)
                .await
            {
                error!(%platform, error = %err, "persisting platform results failed");
                if let Some(outcome) = job.outcome_mut(platform) {
                    outcome.failed("persistence", err.to_string());
                }
                persistence_failure = Some(err.to_string());
            }
        }

        job.ads_inserted = counts.inserted;
        job.ads_updated = counts.updated;
        job.ads_deactivated = counts.deactivated;
        job.finish(Utc::now());

        if let Err(err) = self.backend.finish(&job).await {
            error!(error = %err, "recording fetch job result failed");
            return Err(err.into());
        }
        if let Some(detail) = persistence_failure {
            return Err(OrchestratorError::Persistence(detail));
        }

        info!(
            status = job.status.as_str(),
            inserted = job.ads_inserted,
            updated = job.ads_updated,
            deactivated = job.ads_deactivated,
            summary = %job.summary(),
            "fetch job finished"
        );
        Ok(job)
    }

    async fn apply_result(
        &self,
        job: &mut FetchJob,
        competitor_id: Uuid,
        platform: Platform,
        result: FetchResult,
        counts: &mut WriteCounts,
    ) -> Result<(), StoreError> {
        let (ads, skipped, warning) = match result {
            FetchResult::Ok { ads } => (ads, 0, None),
            FetchResult::PartialOk {
                ads,
                skipped,
                warning,
            } => (ads, skipped, Some(warning)),
            FetchResult::Error { kind, message } => {
                warn!(%platform, kind = kind.as_str(), error = %message, "platform fetch failed");
                if let Some(outcome) = job.outcome_mut(platform) {
                    outcome.failed(kind.as_str(), message);
                }
                // Absence on an errored platform says nothing about removal.
                return Ok(());
            }
        };

        let drafts = dedup_batch(platform, ads);
        let observed_at = Utc::now();
        let mut seen = HashSet::with_capacity(drafts.len());
        for draft in &drafts {
            match self.upsert_with_retry(competitor_id, draft, observed_at).await? {
                UpsertOutcome::Inserted => counts.inserted += 1,
                UpsertOutcome::Updated => counts.updated += 1,
            }
            seen.insert(draft.external_ad_id.clone());
        }

        let deactivated = self
            .backend
            .mark_missing_inactive(competitor_id, platform, &seen)
            .await?;
        counts.deactivated += u32::try_from(deactivated).unwrap_or(u32::MAX);

        if let Some(outcome) = job.outcome_mut(platform) {
            outcome.succeeded(drafts.len(), skipped, warning);
        }
        info!(%platform, ads = drafts.len(), skipped, deactivated, "platform results applied");
        Ok(())
    }

    /// A write conflict is retried once, then surfaced.
    async fn upsert_with_retry(
        &self,
        competitor_id: Uuid,
        draft: &AdDraft,
        observed_at: chrono::DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        match self.backend.upsert_ad(competitor_id, draft, observed_at).await {
            Err(StoreError::Conflict(key)) => {
                warn!(key = %key, "upsert conflict, retrying once");
                self.backend.upsert_ad(competitor_id, draft, observed_at).await
            }
            other => other,
        }
    }

    /// Fetches every competitor in the directory, one after another. A
    /// failing competitor is logged and reported, never aborts the batch.
    pub async fn run_fetch_all(&self) -> Vec<(Uuid, Result<FetchJob, OrchestratorError>)> {
        let mut competitors = match self.backend.competitors().await {
            Ok(competitors) => competitors,
            Err(err) => {
                error!(error = %err, "listing competitors failed");
                return Vec::new();
            }
        };
        competitors.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        let mut results = Vec::with_capacity(competitors.len());
        for (index, competitor) in competitors.iter().enumerate() {
            if index > 0 && !self.settings.batch_pause.is_zero() {
                tokio::time::sleep(self.settings.batch_pause).await;
            }
            let result = self.run_fetch(competitor.id).await;
            if let Err(err) = &result {
                warn!(competitor_id = %competitor.id, error = %err, "competitor fetch failed");
            }
            results.push((competitor.id, result));
        }
        info!(
            competitors = results.len(),
            failed = results.iter().filter(|(_, r)| r.is_err()).count(),
            "fetch-all batch finished"
        );
        results
    }

    /// Marks jobs left `running` past the staleness threshold as failed.
    /// Returns the ids of the jobs it closed.
    pub async fn recover_stale_jobs(&self) -> Result<Vec<Uuid>, OrchestratorError> {
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(self.settings.stale_after)
            .map_err(|err| OrchestratorError::Persistence(format!("invalid staleness threshold: {err}")))?;
        let recovered = self.backend.fail_stale(now - threshold, now).await?;
        let ids: Vec<Uuid> = recovered.iter().map(|job| job.id).collect();
        if ids.is_empty() {
            info!("no stale fetch jobs found");
        } else {
            warn!(count = ids.len(), ?ids, "recovered stale fetch jobs");
        }
        Ok(ids)
    }
}
