//! Platform adapter contract + the four platform variants.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use adwatch_core::{AdDraft, Competitor, Platform};
use adwatch_storage::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

mod parse;
mod platforms;
mod upstream;

pub use parse::{parse_impressions, parse_page, redact_credentials, ParsedPage, RecordShape};
pub use platforms::{ForumAdapter, GeneralSearchAdapter, ProfessionalNetworkAdapter, SocialAdapter};
pub use upstream::{Upstream, DEFAULT_API_BASE_URL};

pub const CRATE_NAME: &str = "adwatch-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    Timeout,
    AuthFailure,
    MalformedResponse,
    Upstream,
    Transport,
    MissingQueryInput,
}

impl AdapterErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterErrorKind::Timeout => "timeout",
            AdapterErrorKind::AuthFailure => "auth_failure",
            AdapterErrorKind::MalformedResponse => "malformed_response",
            AdapterErrorKind::Upstream => "upstream",
            AdapterErrorKind::Transport => "transport",
            AdapterErrorKind::MissingQueryInput => "missing_query_input",
        }
    }
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::MalformedResponse, message)
    }
}

impl From<FetchError> for AdapterError {
    fn from(err: FetchError) -> Self {
        let kind = match &err {
            FetchError::Timeout { .. } => AdapterErrorKind::Timeout,
            FetchError::Unauthorized { .. } => AdapterErrorKind::AuthFailure,
            FetchError::Decode(_) => AdapterErrorKind::MalformedResponse,
            FetchError::Status { .. } => AdapterErrorKind::Upstream,
            FetchError::Request(inner) if inner.is_timeout() => AdapterErrorKind::Timeout,
            FetchError::Request(_) | FetchError::Closed => AdapterErrorKind::Transport,
        };
        Self::new(kind, err.to_string())
    }
}

/// Per-run context handed to every adapter call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub job_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

/// What one adapter call produced. Adapters never panic or abort the run;
/// every failure mode ends up in one of these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Ok {
        ads: Vec<AdDraft>,
    },
    /// Usable ads plus a warning, e.g. when malformed records were skipped.
    PartialOk {
        ads: Vec<AdDraft>,
        skipped: usize,
        warning: String,
    },
    Error {
        kind: AdapterErrorKind,
        message: String,
    },
}

impl FetchResult {
    pub fn ads(&self) -> &[AdDraft] {
        match self {
            FetchResult::Ok { ads } | FetchResult::PartialOk { ads, .. } => ads,
            FetchResult::Error { .. } => &[],
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, FetchResult::Error { .. })
    }
}

impl From<AdapterError> for FetchResult {
    fn from(err: AdapterError) -> Self {
        FetchResult::Error {
            kind: err.kind,
            message: err.message,
        }
    }
}

/// Upper bounds every adapter applies to its own upstream work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterLimits {
    pub max_pages: usize,
    pub max_queries: usize,
    pub max_ads: usize,
    pub deadline: Duration,
}

impl Default for AdapterLimits {
    fn default() -> Self {
        Self {
            max_pages: 3,
            max_queries: 3,
            max_ads: 50,
            deadline: Duration::from_secs(45),
        }
    }
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    async fn fetch(&self, ctx: &AdapterContext, competitor: &Competitor) -> FetchResult;
}

/// Drafts gathered across pages or queries. A repeated external id replaces
/// the earlier draft in place, so the latest observation wins.
#[derive(Debug, Default)]
pub(crate) struct Collected {
    ads: Vec<AdDraft>,
    positions: HashMap<String, usize>,
    skipped: usize,
    max_ads: usize,
    warnings: Vec<String>,
}

impl Collected {
    pub(crate) fn new(max_ads: usize) -> Self {
        Self {
            max_ads: max_ads.max(1),
            ..Self::default()
        }
    }

    pub(crate) fn absorb(&mut self, page: ParsedPage) {
        self.skipped += page.skipped;
        for draft in page.ads {
            if let Some(&at) = self.positions.get(&draft.external_ad_id) {
                self.ads[at] = draft;
            } else if self.ads.len() < self.max_ads {
                self.positions
                    .insert(draft.external_ad_id.clone(), self.ads.len());
                self.ads.push(draft);
            }
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.ads.len() >= self.max_ads
    }

    pub(crate) fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub(crate) fn into_result(self) -> FetchResult {
        let mut warnings = self.warnings;
        if self.skipped > 0 {
            warnings.insert(0, format!("skipped {} malformed record(s)", self.skipped));
        }
        if warnings.is_empty() {
            FetchResult::Ok { ads: self.ads }
        } else {
            FetchResult::PartialOk {
                ads: self.ads,
                skipped: self.skipped,
                warning: warnings.join("; "),
            }
        }
    }
}

/// Runs one adapter's upstream work under its deadline and folds every
/// outcome into a `FetchResult`.
pub(crate) async fn bounded<F>(
    platform: Platform,
    ctx: &AdapterContext,
    deadline: Duration,
    work: F,
) -> FetchResult
where
    F: std::future::Future<Output = Result<Collected, AdapterError>>,
{
    let span = info_span!("adapter_fetch", %platform, job_id = %ctx.job_id);
    async move {
        match tokio::time::timeout(deadline, work).await {
            Ok(Ok(collected)) => collected.into_result(),
            Ok(Err(err)) => {
                warn!(kind = %err.kind, error = %err.message, "adapter call failed");
                err.into()
            }
            Err(_) => {
                warn!(?deadline, "adapter exceeded its deadline");
                AdapterError::new(
                    AdapterErrorKind::Timeout,
                    format!("{platform} did not finish within {}s", deadline.as_secs_f64()),
                )
                .into()
            }
        }
    }
    .instrument(span)
    .await
}

pub fn adapter_for_platform(
    platform: Platform,
    upstream: Upstream,
    limits: AdapterLimits,
) -> Arc<dyn PlatformAdapter> {
    match platform {
        Platform::GeneralSearch => Arc::new(GeneralSearchAdapter::new(upstream, limits)),
        Platform::Social => Arc::new(SocialAdapter::new(upstream, limits)),
        Platform::Forum => Arc::new(ForumAdapter::new(upstream, limits)),
        Platform::ProfessionalNetwork => {
            Arc::new(ProfessionalNetworkAdapter::new(upstream, limits))
        }
    }
}

/// One adapter per known platform, sharing the same upstream.
pub fn default_adapters(
    upstream: &Upstream,
    limits: AdapterLimits,
) -> BTreeMap<Platform, Arc<dyn PlatformAdapter>> {
    Platform::ALL
        .into_iter()
        .map(|p| (p, adapter_for_platform(p, upstream.clone(), limits)))
        .collect()
}
