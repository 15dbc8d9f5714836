//! Ad store, fetch job ledger and HTTP fetch utilities for adwatch.

use std::collections::HashSet;

use adwatch_core::{Ad, AdDraft, Competitor, FetchJob, Platform};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub mod http;
mod memory;
mod postgres;

pub use http::{FetchError, HttpClientConfig, HttpFetcher, RetryPolicy};
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "adwatch-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("concurrent write conflict on {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("fetch job {job_id} is already running for competitor {competitor_id}")]
    AlreadyRunning { competitor_id: Uuid, job_id: Uuid },
    #[error("fetch job {0} not found")]
    NotFound(Uuid),
    #[error("ledger backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Read filter for `AdStore::list_ads`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AdFilter {
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Case-insensitive substring of the headline or of the description.
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AdFilter {
    pub fn active() -> Self {
        Self {
            is_active: Some(true),
            ..Self::default()
        }
    }

    pub fn matches(&self, ad: &Ad) -> bool {
        if self.platform.is_some_and(|p| p != ad.platform) {
            return false;
        }
        if self.is_active.is_some_and(|active| active != ad.is_active) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                [&ad.headline, &ad.description]
                    .into_iter()
                    .flatten()
                    .any(|field| field.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

/// Append-mostly ad set keyed by (competitor, platform, external-ad-id).
#[async_trait]
pub trait AdStore: Send + Sync {
    /// Insert or refresh one ad. Atomic per dedup key.
    async fn upsert_ad(
        &self,
        competitor_id: Uuid,
        draft: &AdDraft,
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Flip `is_active` off for this competitor+platform's active ads whose
    /// external id is not in `seen`. Returns how many ads changed.
    async fn mark_missing_inactive(
        &self,
        competitor_id: Uuid,
        platform: Platform,
        seen: &HashSet<String>,
    ) -> Result<u64, StoreError>;

    /// Ads ordered by first-seen descending.
    async fn list_ads(&self, competitor_id: Uuid, filter: &AdFilter) -> Result<Vec<Ad>, StoreError>;
}

/// Read-only view of the competitor records kept by the CRUD layer.
#[async_trait]
pub trait CompetitorDirectory: Send + Sync {
    async fn competitor(&self, id: Uuid) -> Result<Option<Competitor>, StoreError>;
    async fn competitors(&self) -> Result<Vec<Competitor>, StoreError>;
}

/// Append-only record of orchestration runs.
#[async_trait]
pub trait FetchJobLedger: Send + Sync {
    /// Create a running job with one pending slot per platform. Rejects the
    /// call when the competitor already has a running job.
    async fn begin(
        &self,
        competitor_id: Uuid,
        platforms: &[Platform],
        started_at: DateTime<Utc>,
    ) -> Result<FetchJob, LedgerError>;

    async fn finish(&self, job: &FetchJob) -> Result<(), LedgerError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<FetchJob>, LedgerError>;

    /// Most recent first.
    async fn list_for_competitor(
        &self,
        competitor_id: Uuid,
        limit: usize,
    ) -> Result<Vec<FetchJob>, LedgerError>;

    /// Turn running jobs started before `started_before` into failed jobs.
    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<FetchJob>, LedgerError>;
}

/// Everything the orchestrator and read paths need from one backend.
pub trait Backend: AdStore + CompetitorDirectory + FetchJobLedger {}

impl<T> Backend for T where T: AdStore + CompetitorDirectory + FetchJobLedger {}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Listing order shared by every backend: newest first-seen first, then by
/// dedup key so equal timestamps still order deterministically.
pub fn sort_newest_first(ads: &mut [Ad]) {
    ads.sort_by(|a, b| {
        b.first_seen
            .cmp(&a.first_seen)
            .then_with(|| a.platform.cmp(&b.platform))
            .then_with(|| a.external_ad_id.cmp(&b.external_ad_id))
    });
}

pub(crate) fn mark_stale(job: &mut FetchJob, now: DateTime<Utc>) {
    for outcome in &mut job.outcomes {
        if outcome.status == adwatch_core::OutcomeStatus::Pending {
            outcome.failed("stale", "job was still running past the staleness threshold");
        }
    }
    job.finish(now);
    job.status = adwatch_core::FetchJobStatus::Failed;
}
