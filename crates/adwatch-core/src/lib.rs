//! Core domain model for adwatch: competitors, observed ads, fetch jobs and
//! labeled estimates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const CRATE_NAME: &str = "adwatch-core";

/// Closed set of ad-distribution platforms the system observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    GeneralSearch,
    Social,
    Forum,
    ProfessionalNetwork,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::GeneralSearch,
        Platform::Social,
        Platform::Forum,
        Platform::ProfessionalNetwork,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::GeneralSearch => "general-search",
            Platform::Social => "social",
            Platform::Forum => "forum",
            Platform::ProfessionalNetwork => "professional-network",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for Platform {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                kind: "platform",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    Image,
    Video,
    Carousel,
}

impl MediaFormat {
    /// Maps the loose format labels platforms report onto the closed set.
    pub fn from_upstream(label: &str) -> Option<Self> {
        let lower = label.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return None;
        }
        if ["video", "reel", "short", "dco_video"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            Some(MediaFormat::Video)
        } else if lower.contains("carousel") || lower.contains("multi") || lower.contains("dpa") {
            Some(MediaFormat::Carousel)
        } else if ["image", "photo", "display", "banner"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            Some(MediaFormat::Image)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Image => "image",
            MediaFormat::Video => "video",
            MediaFormat::Carousel => "carousel",
        }
    }
}

impl FromStr for MediaFormat {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaFormat::Image),
            "video" => Ok(MediaFormat::Video),
            "carousel" => Ok(MediaFormat::Carousel),
            other => Err(UnknownVariant {
                kind: "media format",
                value: other.to_string(),
            }),
        }
    }
}

/// Engagement counters some platforms expose next to an ad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngagementSignals {
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
}

/// A monitored organization. Owned by the external CRUD layer; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competitor {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Normalized handoff contract from adapters into dedup/upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdDraft {
    pub platform: Platform,
    pub external_ad_id: String,
    pub headline: Option<String>,
    pub description: Option<String>,
    pub destination_url: Option<String>,
    pub media_format: Option<MediaFormat>,
    pub impressions: Option<u64>,
    pub engagement: Option<EngagementSignals>,
    pub raw_payload: JsonValue,
}

/// Dedup key: identifies one ad across repeated observations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AdKey {
    pub competitor_id: Uuid,
    pub platform: Platform,
    pub external_ad_id: String,
}

/// Persisted ad. Never hard-deleted; `is_active` tracks presence in the
/// latest successful fetch for its platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ad {
    pub id: Uuid,
    pub competitor_id: Uuid,
    pub platform: Platform,
    pub external_ad_id: String,
    pub headline: Option<String>,
    pub description: Option<String>,
    pub destination_url: Option<String>,
    pub media_format: Option<MediaFormat>,
    pub raw_payload: JsonValue,
    pub impressions: Option<u64>,
    pub engagement: Option<EngagementSignals>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
}

impl Ad {
    pub fn from_draft(competitor_id: Uuid, draft: &AdDraft, observed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            competitor_id,
            platform: draft.platform,
            external_ad_id: draft.external_ad_id.clone(),
            headline: draft.headline.clone(),
            description: draft.description.clone(),
            destination_url: draft.destination_url.clone(),
            media_format: draft.media_format,
            raw_payload: draft.raw_payload.clone(),
            impressions: draft.impressions,
            engagement: draft.engagement,
            first_seen: observed_at,
            last_seen: observed_at,
            is_active: true,
        }
    }

    /// Re-observation: bump `last_seen`, reactivate and take the latest
    /// display fields. `first_seen` is left untouched.
    pub fn apply_observation(&mut self, draft: &AdDraft, observed_at: DateTime<Utc>) {
        self.last_seen = observed_at.max(self.last_seen);
        self.is_active = true;
        self.headline = draft.headline.clone();
        self.description = draft.description.clone();
        self.destination_url = draft.destination_url.clone();
        self.impressions = draft.impressions;
        self.engagement = draft.engagement;
        if draft.media_format.is_some() {
            self.media_format = draft.media_format;
        }
        self.raw_payload = draft.raw_payload.clone();
    }

    pub fn key(&self) -> AdKey {
        AdKey {
            competitor_id: self.competitor_id,
            platform: self.platform,
            external_ad_id: self.external_ad_id.clone(),
        }
    }

    /// Headline and description joined by a space, skipping missing parts.
    pub fn combined_text(&self) -> String {
        [self.headline.as_deref(), self.description.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchJobStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl FetchJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchJobStatus::Pending => "pending",
            FetchJobStatus::Running => "running",
            FetchJobStatus::Completed => "completed",
            FetchJobStatus::Partial => "partial",
            FetchJobStatus::Failed => "failed",
        }
    }
}

impl FromStr for FetchJobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FetchJobStatus::Pending),
            "running" => Ok(FetchJobStatus::Running),
            "completed" => Ok(FetchJobStatus::Completed),
            "partial" => Ok(FetchJobStatus::Partial),
            "failed" => Ok(FetchJobStatus::Failed),
            other => Err(UnknownVariant {
                kind: "fetch job status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pending,
    Ok,
    Error,
}

/// Per-platform slot of a fetch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformOutcome {
    pub platform: Platform,
    pub status: OutcomeStatus,
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
    pub ads_returned: u32,
    pub records_skipped: u32,
}

impl PlatformOutcome {
    pub fn pending(platform: Platform) -> Self {
        Self {
            platform,
            status: OutcomeStatus::Pending,
            error_kind: None,
            error_detail: None,
            ads_returned: 0,
            records_skipped: 0,
        }
    }

    pub fn succeeded(&mut self, ads_returned: usize, records_skipped: usize, warning: Option<String>) {
        self.status = OutcomeStatus::Ok;
        self.ads_returned = u32::try_from(ads_returned).unwrap_or(u32::MAX);
        self.records_skipped = u32::try_from(records_skipped).unwrap_or(u32::MAX);
        self.error_kind = None;
        self.error_detail = warning;
    }

    pub fn failed(&mut self, kind: impl Into<String>, detail: impl Into<String>) {
        self.status = OutcomeStatus::Error;
        self.error_kind = Some(kind.into());
        self.error_detail = Some(detail.into());
    }
}

/// One orchestration run across all platforms for one competitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchJob {
    pub id: Uuid,
    pub competitor_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: FetchJobStatus,
    pub outcomes: Vec<PlatformOutcome>,
    pub ads_inserted: u32,
    pub ads_updated: u32,
    pub ads_deactivated: u32,
}

impl FetchJob {
    pub fn start(competitor_id: Uuid, platforms: &[Platform], started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            competitor_id,
            started_at,
            finished_at: None,
            status: FetchJobStatus::Running,
            outcomes: platforms.iter().copied().map(PlatformOutcome::pending).collect(),
            ads_inserted: 0,
            ads_updated: 0,
            ads_deactivated: 0,
        }
    }

    pub fn outcome_mut(&mut self, platform: Platform) -> Option<&mut PlatformOutcome> {
        self.outcomes.iter_mut().find(|o| o.platform == platform)
    }

    pub fn succeeded_platforms(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Ok)
            .count()
    }

    /// Overall status from the per-platform outcomes. Slots still pending
    /// count as errors: a platform that never reported did not succeed.
    pub fn settled_status(&self) -> FetchJobStatus {
        let ok = self.succeeded_platforms();
        if ok == 0 {
            FetchJobStatus::Failed
        } else if ok < self.outcomes.len() {
            FetchJobStatus::Partial
        } else {
            FetchJobStatus::Completed
        }
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        for outcome in &mut self.outcomes {
            if outcome.status == OutcomeStatus::Pending {
                outcome.failed("incomplete", "platform did not report before the job finished");
            }
        }
        self.status = self.settled_status();
        self.finished_at = Some(finished_at);
    }

    /// Human-readable status line. A partial run never reads as a success.
    pub fn summary(&self) -> String {
        let ok = self.succeeded_platforms();
        let total = self.outcomes.len();
        match self.status {
            FetchJobStatus::Completed => format!("completed: {ok}/{total} platforms succeeded"),
            FetchJobStatus::Partial => {
                format!("partial: completed with {ok}/{total} platforms succeeding")
            }
            FetchJobStatus::Failed => format!("failed: {ok}/{total} platforms succeeded"),
            FetchJobStatus::Running => format!("running: {ok}/{total} platforms reported"),
            FetchJobStatus::Pending => "pending".to_string(),
        }
    }
}

/// Why an estimate could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingInput {
    Impressions,
    ActiveAds,
}

/// A derived value computed from a fixed formula table. `Unavailable` is
/// reported instead of fabricating a number when an input is missing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Estimate<T> {
    Estimated { value: T },
    Unavailable { reason: MissingInput },
}

impl<T> Estimate<T> {
    pub fn estimated(value: T) -> Self {
        Estimate::Estimated { value }
    }

    pub fn unavailable(reason: MissingInput) -> Self {
        Estimate::Unavailable { reason }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Estimate::Estimated { value } => Some(value),
            Estimate::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Estimate::Estimated { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Estimate<U> {
        match self {
            Estimate::Estimated { value } => Estimate::Estimated { value: f(value) },
            Estimate::Unavailable { reason } => Estimate::Unavailable { reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).single().unwrap()
    }

    fn draft(headline: &str) -> AdDraft {
        AdDraft {
            platform: Platform::Social,
            external_ad_id: "ad-1".into(),
            headline: Some(headline.into()),
            description: None,
            destination_url: None,
            media_format: None,
            impressions: Some(1000),
            engagement: None,
            raw_payload: json!({}),
        }
    }

    #[test]
    fn platform_parses_its_own_labels() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn media_format_maps_loose_labels() {
        assert_eq!(MediaFormat::from_upstream("Reel"), Some(MediaFormat::Video));
        assert_eq!(MediaFormat::from_upstream("CAROUSEL"), Some(MediaFormat::Carousel));
        assert_eq!(MediaFormat::from_upstream("single_image"), Some(MediaFormat::Image));
        assert_eq!(MediaFormat::from_upstream("text"), None);
        assert_eq!(MediaFormat::from_upstream(""), None);
    }

    #[test]
    fn reobservation_keeps_first_seen() {
        let mut ad = Ad::from_draft(Uuid::new_v4(), &draft("Old"), ts(1));
        ad.is_active = false;
        ad.apply_observation(&draft("New"), ts(5));
        assert_eq!(ad.first_seen, ts(1));
        assert_eq!(ad.last_seen, ts(5));
        assert!(ad.is_active);
        assert_eq!(ad.headline.as_deref(), Some("New"));
    }

    #[test]
    fn job_status_follows_outcomes() {
        let platforms = [Platform::GeneralSearch, Platform::Social];
        let mut job = FetchJob::start(Uuid::new_v4(), &platforms, ts(1));
        job.outcome_mut(Platform::GeneralSearch).unwrap().succeeded(3, 0, None);
        job.outcome_mut(Platform::Social).unwrap().failed("timeout", "slow");
        job.finish(ts(2));
        assert_eq!(job.status, FetchJobStatus::Partial);
        assert_eq!(job.summary(), "partial: completed with 1/2 platforms succeeding");

        let mut all_bad = FetchJob::start(Uuid::new_v4(), &platforms, ts(1));
        all_bad.finish(ts(2));
        assert_eq!(all_bad.status, FetchJobStatus::Failed);
        assert!(all_bad
            .outcomes
            .iter()
            .all(|o| o.error_kind.as_deref() == Some("incomplete")));
    }

    #[test]
    fn unavailable_estimate_serializes_with_reason() {
        let est: Estimate<f64> = Estimate::unavailable(MissingInput::Impressions);
        assert_eq!(
            serde_json::to_value(est).unwrap(),
            json!({"status": "unavailable", "reason": "impressions"})
        );
        let est = Estimate::estimated(2.5);
        assert_eq!(
            serde_json::to_value(est).unwrap(),
            json!({"status": "estimated", "value": 2.5})
        );
    }
}
