use std::collections::{BTreeMap, HashSet};

use adwatch_core::{Ad, AdDraft, AdKey, Competitor, FetchJob, FetchJobStatus, Platform};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::{
    mark_stale, sort_newest_first, AdFilter, AdStore, CompetitorDirectory, FetchJobLedger,
    LedgerError, StoreError, UpsertOutcome,
};

/// Process-local backend. Every operation holds one lock over the whole
/// state, so upserts on the same key never interleave.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    competitors: BTreeMap<Uuid, Competitor>,
    ads: BTreeMap<AdKey, Ad>,
    jobs: Vec<FetchJob>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_competitors(competitors: impl IntoIterator<Item = Competitor>) -> Self {
        let state = MemoryState {
            competitors: competitors.into_iter().map(|c| (c.id, c)).collect(),
            ..MemoryState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn insert_competitor(&self, competitor: Competitor) {
        self.state
            .lock()
            .await
            .competitors
            .insert(competitor.id, competitor);
    }

    pub async fn ad_count(&self) -> usize {
        self.state.lock().await.ads.len()
    }

    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }
}

#[async_trait]
impl AdStore for MemoryStore {
    async fn upsert_ad(
        &self,
        competitor_id: Uuid,
        draft: &AdDraft,
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let key = AdKey {
            competitor_id,
            platform: draft.platform,
            external_ad_id: draft.external_ad_id.clone(),
        };
        let mut state = self.state.lock().await;
        match state.ads.get_mut(&key) {
            Some(existing) => {
                existing.apply_observation(draft, observed_at);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                state
                    .ads
                    .insert(key, Ad::from_draft(competitor_id, draft, observed_at));
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn mark_missing_inactive(
        &self,
        competitor_id: Uuid,
        platform: Platform,
        seen: &HashSet<String>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut changed = 0;
        for ad in state.ads.values_mut().filter(|ad| {
            ad.competitor_id == competitor_id && ad.platform == platform && ad.is_active
        }) {
            if !seen.contains(&ad.external_ad_id) {
                ad.is_active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn list_ads(&self, competitor_id: Uuid, filter: &AdFilter) -> Result<Vec<Ad>, StoreError> {
        let state = self.state.lock().await;
        let mut ads: Vec<Ad> = state
            .ads
            .values()
            .filter(|ad| ad.competitor_id == competitor_id && filter.matches(ad))
            .cloned()
            .collect();
        sort_newest_first(&mut ads);
        if let Some(limit) = filter.limit {
            ads.truncate(limit);
        }
        Ok(ads)
    }
}

#[async_trait]
impl CompetitorDirectory for MemoryStore {
    async fn competitor(&self, id: Uuid) -> Result<Option<Competitor>, StoreError> {
        Ok(self.state.lock().await.competitors.get(&id).cloned())
    }

    async fn competitors(&self) -> Result<Vec<Competitor>, StoreError> {
        Ok(self.state.lock().await.competitors.values().cloned().collect())
    }
}

#[async_trait]
impl FetchJobLedger for MemoryStore {
    async fn begin(
        &self,
        competitor_id: Uuid,
        platforms: &[Platform],
        started_at: DateTime<Utc>,
    ) -> Result<FetchJob, LedgerError> {
        let mut state = self.state.lock().await;
        if let Some(running) = state
            .jobs
            .iter()
            .find(|j| j.competitor_id == competitor_id && j.status == FetchJobStatus::Running)
        {
            return Err(LedgerError::AlreadyRunning {
                competitor_id,
                job_id: running.id,
            });
        }
        let job = FetchJob::start(competitor_id, platforms, started_at);
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn finish(&self, job: &FetchJob) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let slot = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or(LedgerError::NotFound(job.id))?;
        // A settled job (e.g. failed by stale recovery) keeps its result.
        if slot.status != FetchJobStatus::Running {
            warn!(job_id = %job.id, "job already settled; result not recorded");
            return Ok(());
        }
        *slot = job.clone();
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<FetchJob>, LedgerError> {
        Ok(self
            .state
            .lock()
            .await
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned())
    }

    async fn list_for_competitor(
        &self,
        competitor_id: Uuid,
        limit: usize,
    ) -> Result<Vec<FetchJob>, LedgerError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<FetchJob> = state
            .jobs
            .iter()
            .filter(|j| j.competitor_id == competitor_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<FetchJob>, LedgerError> {
        let mut state = self.state.lock().await;
        let mut recovered = Vec::new();
        for job in state
            .jobs
            .iter_mut()
            .filter(|j| j.status == FetchJobStatus::Running && j.started_at < started_before)
        {
            mark_stale(job, now);
            recovered.push(job.clone());
        }
        Ok(recovered)
    }
}
