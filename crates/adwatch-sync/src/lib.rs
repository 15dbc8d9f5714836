//! Fetch orchestration, stale-job recovery, the service facade and the
//! cron schedule around them.

mod config;
mod locks;
mod orchestrator;
mod scheduler;
mod seed;
mod service;

pub use config::SyncConfig;
pub use locks::{CompetitorGuard, CompetitorLocks};
pub use orchestrator::{dedup_batch, FetchOrchestrator, OrchestratorError, OrchestratorSettings};
pub use scheduler::maybe_build_scheduler;
pub use seed::{load_competitors, parse_competitors};
pub use service::{AdwatchService, ServiceError};

pub const CRATE_NAME: &str = "adwatch-sync";

