use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use adwatch_adapters::{default_adapters, PlatformAdapter, Upstream};
use adwatch_core::{Ad, Competitor, FetchJob, Platform};
use adwatch_metrics::{EstimationTable, MetricsBundle, MetricsEngine};
use adwatch_storage::{
    AdFilter, AdStore, Backend, CompetitorDirectory, FetchJobLedger, HttpFetcher, LedgerError,
    MemoryStore, PgStore, StoreError,
};
use anyhow::Context;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::orchestrator::{FetchOrchestrator, OrchestratorError, OrchestratorSettings};
use crate::seed::load_competitors;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("competitor {0} not found")]
    CompetitorNotFound(Uuid),
    #[error("fetch job {0} not found")]
    JobNotFound(Uuid),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Entry point for callers: triggers fetches and serves the read paths over
/// one backend.
#[derive(Clone)]
pub struct AdwatchService {
    backend: Arc<dyn Backend>,
    orchestrator: Arc<FetchOrchestrator>,
    engine: Arc<MetricsEngine>,
}

impl AdwatchService {
    pub fn new(
        backend: Arc<dyn Backend>,
        adapters: BTreeMap<Platform, Arc<dyn PlatformAdapter>>,
        engine: MetricsEngine,
        settings: OrchestratorSettings,
    ) -> Self {
        let orchestrator = FetchOrchestrator::new(Arc::clone(&backend), adapters, settings);
        Self {
            backend,
            orchestrator: Arc::new(orchestrator),
            engine: Arc::new(engine),
        }
    }

    /// Wires the backend, adapters and estimation table from configuration.
    pub async fn from_config(config: &SyncConfig) -> anyhow::Result<Self> {
        let competitors = match &config.competitors_file {
            Some(path) => load_competitors(path)?,
            None => Vec::new(),
        };

        let backend: Arc<dyn Backend> = match &config.database_url {
            Some(url) => {
                let store = PgStore::connect(url)
                    .await
                    .context("connecting to postgres")?;
                store.migrate().await.context("applying migrations")?;
                for competitor in &competitors {
                    store
                        .upsert_competitor(competitor)
                        .await
                        .with_context(|| format!("seeding competitor {}", competitor.name))?;
                }
                info!(seeded = competitors.len(), "using postgres store");
                Arc::new(store)
            }
            None => {
                info!(seeded = competitors.len(), "using in-memory store");
                Arc::new(MemoryStore::with_competitors(competitors))
            }
        };

        let upstream = match &config.fixtures_dir {
            Some(root) => {
                info!(root = %root.display(), "adapters read recorded upstream responses");
                Upstream::fixtures(root.clone())
            }
            None => {
                if config.api_key.is_none() {
                    warn!("ADWATCH_API_KEY is not set; every platform will report auth_failure");
                }
                let fetcher = HttpFetcher::new(config.http_client_config())
                    .context("building http client")?;
                Upstream::http(
                    Arc::new(fetcher),
                    config.api_base_url.clone(),
                    config.api_key.clone(),
                )
            }
        };

        let table = match &config.estimation_table {
            Some(path) => EstimationTable::load(path)?,
            None => EstimationTable::default(),
        };
        let engine = MetricsEngine::new(table)?;

        let limits = config.adapter_limits();
        let settings = OrchestratorSettings {
            adapter_timeout: limits.deadline + Duration::from_secs(15),
            stale_after: config.stale_after(),
            batch_pause: config.batch_pause(),
            ..OrchestratorSettings::default()
        };
        Ok(Self::new(backend, default_adapters(&upstream, limits), engine, settings))
    }

    /// `from_config`, then closes any jobs a previous process left running.
    pub async fn bootstrap(config: &SyncConfig) -> anyhow::Result<Self> {
        let service = Self::from_config(config).await?;
        service
            .recover_stale_jobs()
            .await
            .context("recovering stale fetch jobs")?;
        Ok(service)
    }

    pub fn engine(&self) -> &MetricsEngine {
        &self.engine
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    pub async fn run_fetch(&self, competitor_id: Uuid) -> Result<FetchJob, OrchestratorError> {
        self.orchestrator.run_fetch(competitor_id).await
    }

    pub async fn run_fetch_all(&self) -> Vec<(Uuid, Result<FetchJob, OrchestratorError>)> {
        self.orchestrator.run_fetch_all().await
    }

    pub async fn recover_stale_jobs(&self) -> Result<Vec<Uuid>, OrchestratorError> {
        self.orchestrator.recover_stale_jobs().await
    }

    pub async fn competitors(&self) -> Result<Vec<Competitor>, ServiceError> {
        let mut competitors = self.backend.competitors().await?;
        competitors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(competitors)
    }

    async fn require_competitor(&self, competitor_id: Uuid) -> Result<Competitor, ServiceError> {
        self.backend
            .competitor(competitor_id)
            .await?
            .ok_or(ServiceError::CompetitorNotFound(competitor_id))
    }

    /// Recomputes the bundle from the stored ads. No side effects.
    pub async fn get_metrics(&self, competitor_id: Uuid) -> Result<MetricsBundle, ServiceError> {
        let competitor = self.require_competitor(competitor_id).await?;
        let ads = self
            .backend
            .list_ads(competitor_id, &AdFilter::default())
            .await?;
        Ok(self.engine.competitor_metrics(&competitor, &ads))
    }

    pub async fn list_ads(
        &self,
        competitor_id: Uuid,
        filter: &AdFilter,
    ) -> Result<Vec<Ad>, ServiceError> {
        self.require_competitor(competitor_id).await?;
        Ok(self.backend.list_ads(competitor_id, filter).await?)
    }

    pub async fn fetch_jobs(
        &self,
        competitor_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<FetchJob>, ServiceError> {
        self.require_competitor(competitor_id).await?;
        let limit = limit
            .unwrap_or(self.orchestrator.settings().job_history_limit)
            .clamp(1, 500);
        Ok(self.backend.list_for_competitor(competitor_id, limit).await?)
    }

    pub async fn fetch_job(&self, job_id: Uuid) -> Result<FetchJob, ServiceError> {
        self.backend
            .get(job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))
    }
}
