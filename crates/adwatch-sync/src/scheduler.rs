use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::service::AdwatchService;

/// Builds (but does not start) the cron scheduler that runs fetch-all, or
/// returns `None` when scheduling is disabled.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    service: AdwatchService,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.fetch_cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let service = service.clone();
        Box::pin(async move {
            info!("scheduled fetch-all triggered");
            if let Err(err) = service.recover_stale_jobs().await {
                warn!(error = %err, "stale job recovery before scheduled fetch failed");
            }
            let results = service.run_fetch_all().await;
            let failed = results.iter().filter(|(_, r)| r.is_err()).count();
            if failed > 0 {
                warn!(failed, total = results.len(), "scheduled fetch-all had failures");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(cron = %cron, "fetch scheduler configured");
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use adwatch_metrics::MetricsEngine;
    use adwatch_storage::MemoryStore;

    use crate::orchestrator::OrchestratorSettings;

    fn service() -> AdwatchService {
        AdwatchService::new(
            Arc::new(MemoryStore::new()),
            Default::default(),
            MetricsEngine::default(),
            OrchestratorSettings::default(),
        )
    }

    #[tokio::test]
    async fn disabled_scheduler_is_not_built() {
        let config = SyncConfig::default();
        assert!(maybe_build_scheduler(&config, service()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_cron_is_reported() {
        let config = SyncConfig {
            scheduler_enabled: true,
            fetch_cron: "every now and then".into(),
            ..SyncConfig::default()
        };
        let Err(err) = maybe_build_scheduler(&config, service()).await else {
            panic!("an unparseable cron expression must be rejected");
        };
        assert!(err.to_string().contains("every now and then"));
    }
}
