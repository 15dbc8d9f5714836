//! Versioned estimation constants. Changing methodology means shipping a new
//! table, not changing the engine.

use std::collections::BTreeMap;
use std::path::Path;

use adwatch_core::Platform;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("reading estimation table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing estimation table: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid estimation table: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConstants {
    /// Industry-average cost per thousand impressions.
    pub cpm: f64,
    /// Industry-average cost per click.
    pub cpc: f64,
    pub ctr_adjustment: f64,
    pub conversion_baseline: f64,
    /// Shared by creative score and trending score.
    pub weight: f64,
    pub geo: BTreeMap<String, f64>,
    pub device: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtrRules {
    pub base: f64,
    pub video_bonus: f64,
    pub completeness_bonus: f64,
    /// Headline + description character count above which the bonus applies.
    pub completeness_threshold_chars: usize,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRules {
    pub lexicon: Vec<String>,
    pub lexicon_increment: f64,
    pub url_markers: Vec<String>,
    pub url_increment: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelRules {
    pub awareness: Vec<String>,
    pub consideration: Vec<String>,
    pub conversion: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreativeRules {
    pub active_bonus: f64,
    pub video_bonus: f64,
    pub headline_full_chars: usize,
    pub headline_points: f64,
    pub description_full_chars: usize,
    pub description_points: f64,
    pub spend_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecencyBucket {
    pub max_age_hours: i64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingRules {
    pub engagement_weight: f64,
    pub recency_weight: f64,
    pub quality_weight: f64,
    pub platform_weight: f64,
    pub comment_multiplier: f64,
    pub share_multiplier: f64,
    /// Engagement component = min(100, scale * log10(1 + interactions)).
    pub engagement_log_scale: f64,
    /// Ordered youngest first; ads older than the last bucket score 0.
    pub recency: Vec<RecencyBucket>,
    pub quality_headline_min_chars: usize,
    pub quality_headline_points: f64,
    pub quality_description_min_chars: usize,
    pub quality_description_points: f64,
    pub quality_media_points: f64,
    pub quality_url_points: f64,
    /// Platform component = platform weight * scale.
    pub platform_scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRule {
    pub cluster: String,
    pub contains_any: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudienceRules {
    pub industry: Vec<ClusterRule>,
    pub ad_text: Vec<ClusterRule>,
    #[serde(default)]
    pub platform: BTreeMap<Platform, String>,
    #[serde(default)]
    pub max_clusters: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeTier {
    pub above: usize,
    pub points: f64,
}

/// Competitive pressure. Platform points scale with the platform's ad count
/// and saturate at `platform_saturation_ads`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRules {
    pub base: f64,
    pub no_ads_points: f64,
    pub few_ads_below: usize,
    pub few_ads_points: f64,
    /// First tier whose `above` the total ad count exceeds applies.
    pub volume_tiers: Vec<VolumeTier>,
    pub platform_points: BTreeMap<Platform, f64>,
    pub platform_saturation_ads: f64,
    pub high_active_ratio: f64,
    pub high_active_points: f64,
    pub low_active_ratio: f64,
    pub low_active_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityRules {
    pub base: f64,
    pub per_ad_points: f64,
    pub volume_cap: f64,
    pub platform_points: BTreeMap<Platform, f64>,
    pub platform_saturation_ads: f64,
    pub two_platform_points: f64,
    pub three_plus_platform_points: f64,
    /// Awarded when `pairing_anchor` runs alongside any of `pairing_partners`.
    pub pairing_anchor: Platform,
    pub pairing_partners: Vec<Platform>,
    pub pairing_points: f64,
    pub social_platforms: Vec<Platform>,
    /// Social presence counts only once the competitor has more ads than this.
    pub social_min_ads: usize,
    pub social_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRules {
    pub cta_keywords: Vec<String>,
    pub common_cta_count: usize,
    pub top_creative_video_points: f64,
    pub top_creative_image_points: f64,
    pub top_creative_headline_min_chars: usize,
    pub top_creative_headline_points: f64,
    pub top_creative_limit: usize,
    pub timeline_limit: usize,
    pub timeline_preview_chars: usize,
    pub trend_window_days: i64,
    /// Percent change beyond which volume counts as growing or declining.
    pub trend_threshold_pct: f64,
    /// Total spend is read as a monthly figure and divided down.
    pub daily_spend_divisor: f64,
    pub weekly_spend_divisor: f64,
    pub risk: RiskRules,
    pub opportunity: OpportunityRules,
}

impl Default for InsightRules {
    fn default() -> Self {
        Self {
            cta_keywords: words(&[
                "buy", "shop", "learn", "sign", "get", "try", "download", "subscribe", "register",
            ]),
            common_cta_count: 3,
            top_creative_video_points: 3.0,
            top_creative_image_points: 2.0,
            top_creative_headline_min_chars: 10,
            top_creative_headline_points: 1.0,
            top_creative_limit: 5,
            timeline_limit: 20,
            timeline_preview_chars: 50,
            trend_window_days: 30,
            trend_threshold_pct: 20.0,
            daily_spend_divisor: 30.0,
            weekly_spend_divisor: 4.33,
            risk: RiskRules {
                base: 50.0,
                no_ads_points: -20.0,
                few_ads_below: 5,
                few_ads_points: 10.0,
                volume_tiers: vec![
                    VolumeTier {
                        above: 50,
                        points: 30.0,
                    },
                    VolumeTier {
                        above: 20,
                        points: 20.0,
                    },
                ],
                platform_points: BTreeMap::from([
                    (Platform::GeneralSearch, 25.0),
                    (Platform::Social, 20.0),
                    (Platform::ProfessionalNetwork, 15.0),
                    (Platform::Forum, 5.0),
                ]),
                platform_saturation_ads: 10.0,
                high_active_ratio: 0.8,
                high_active_points: 15.0,
                low_active_ratio: 0.3,
                low_active_points: -10.0,
            },
            opportunity: OpportunityRules {
                base: 30.0,
                per_ad_points: 2.0,
                volume_cap: 40.0,
                platform_points: BTreeMap::from([
                    (Platform::GeneralSearch, 25.0),
                    (Platform::Social, 20.0),
                    (Platform::ProfessionalNetwork, 30.0),
                    (Platform::Forum, 10.0),
                ]),
                platform_saturation_ads: 5.0,
                two_platform_points: 10.0,
                three_plus_platform_points: 15.0,
                pairing_anchor: Platform::ProfessionalNetwork,
                pairing_partners: vec![Platform::GeneralSearch, Platform::Social],
                pairing_points: 10.0,
                social_platforms: vec![Platform::Social],
                social_min_ads: 10,
                social_points: 15.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationTable {
    pub version: String,
    pub platforms: BTreeMap<Platform, PlatformConstants>,
    pub ctr: CtrRules,
    pub conversion: ConversionRules,
    pub funnel: FunnelRules,
    pub creative: CreativeRules,
    pub trending: TrendingRules,
    /// Relative weight per hour of day, index 0 = midnight.
    pub time_of_day_weights: Vec<f64>,
    pub audience: AudienceRules,
    /// Tables written before this section existed load with the built-in rules.
    #[serde(default)]
    pub insights: InsightRules,
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn shares(items: &[(&str, f64)]) -> BTreeMap<String, f64> {
    items.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn platform(
    cpm: f64,
    cpc: f64,
    ctr_adjustment: f64,
    conversion_baseline: f64,
    weight: f64,
    geo: BTreeMap<String, f64>,
    device: BTreeMap<String, f64>,
) -> PlatformConstants {
    PlatformConstants {
        cpm,
        cpc,
        ctr_adjustment,
        conversion_baseline,
        weight,
        geo,
        device,
    }
}

fn cluster(name: &str, contains_any: &[&str]) -> ClusterRule {
    ClusterRule {
        cluster: name.to_string(),
        contains_any: words(contains_any),
    }
}

impl Default for EstimationTable {
    fn default() -> Self {
        let platforms = BTreeMap::from([
            (
                Platform::GeneralSearch,
                platform(
                    2.50,
                    2.50,
                    0.01,
                    0.08,
                    20.0,
                    shares(&[
                        ("US", 0.50),
                        ("UK", 0.15),
                        ("CA", 0.10),
                        ("AU", 0.05),
                        ("DE", 0.05),
                        ("FR", 0.04),
                        ("JP", 0.03),
                        ("IN", 0.03),
                        ("Other", 0.05),
                    ]),
                    shares(&[("mobile", 0.65), ("desktop", 0.30), ("tablet", 0.05)]),
                ),
            ),
            (
                Platform::Social,
                platform(
                    5.00,
                    1.20,
                    0.0,
                    0.03,
                    10.0,
                    shares(&[
                        ("US", 0.40),
                        ("UK", 0.10),
                        ("CA", 0.06),
                        ("AU", 0.04),
                        ("DE", 0.06),
                        ("FR", 0.05),
                        ("JP", 0.04),
                        ("IN", 0.10),
                        ("Other", 0.15),
                    ]),
                    shares(&[("mobile", 0.80), ("desktop", 0.15), ("tablet", 0.05)]),
                ),
            ),
            (
                Platform::Forum,
                platform(
                    1.50,
                    0.80,
                    -0.005,
                    0.02,
                    5.0,
                    shares(&[
                        ("US", 0.55),
                        ("UK", 0.10),
                        ("CA", 0.08),
                        ("AU", 0.05),
                        ("DE", 0.05),
                        ("FR", 0.02),
                        ("JP", 0.02),
                        ("IN", 0.03),
                        ("Other", 0.10),
                    ]),
                    shares(&[("mobile", 0.55), ("desktop", 0.40), ("tablet", 0.05)]),
                ),
            ),
            (
                Platform::ProfessionalNetwork,
                platform(
                    8.00,
                    5.00,
                    -0.005,
                    0.06,
                    15.0,
                    shares(&[
                        ("US", 0.45),
                        ("UK", 0.12),
                        ("CA", 0.06),
                        ("AU", 0.04),
                        ("DE", 0.08),
                        ("FR", 0.05),
                        ("JP", 0.03),
                        ("IN", 0.09),
                        ("Other", 0.08),
                    ]),
                    shares(&[("mobile", 0.60), ("desktop", 0.35), ("tablet", 0.05)]),
                ),
            ),
        ]);

        Self {
            version: "2026.1".to_string(),
            platforms,
            ctr: CtrRules {
                base: 0.02,
                video_bonus: 0.005,
                completeness_bonus: 0.003,
                completeness_threshold_chars: 100,
                min: 0.001,
                max: 0.15,
            },
            conversion: ConversionRules {
                lexicon: words(&["buy", "purchase", "shop", "order now"]),
                lexicon_increment: 0.05,
                url_markers: words(&["checkout", "buy", "cart", "purchase"]),
                url_increment: 0.10,
            },
            funnel: FunnelRules {
                awareness: words(&["new", "introducing", "discover"]),
                consideration: words(&["compare", "features", "benefits"]),
                conversion: words(&["buy", "purchase", "order now"]),
            },
            creative: CreativeRules {
                active_bonus: 30.0,
                video_bonus: 20.0,
                headline_full_chars: 60,
                headline_points: 10.0,
                description_full_chars: 200,
                description_points: 10.0,
                spend_multiplier: 10.0,
            },
            trending: TrendingRules {
                engagement_weight: 0.4,
                recency_weight: 0.2,
                quality_weight: 0.2,
                platform_weight: 0.2,
                comment_multiplier: 5.0,
                share_multiplier: 3.0,
                engagement_log_scale: 20.0,
                recency: vec![
                    RecencyBucket {
                        max_age_hours: 1,
                        score: 100.0,
                    },
                    RecencyBucket {
                        max_age_hours: 24,
                        score: 70.0,
                    },
                    RecencyBucket {
                        max_age_hours: 168,
                        score: 35.0,
                    },
                    RecencyBucket {
                        max_age_hours: 720,
                        score: 15.0,
                    },
                ],
                quality_headline_min_chars: 10,
                quality_headline_points: 25.0,
                quality_description_min_chars: 50,
                quality_description_points: 35.0,
                quality_media_points: 25.0,
                quality_url_points: 15.0,
                platform_scale: 5.0,
            },
            time_of_day_weights: vec![
                1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 3.0, 5.0, 8.0, 8.0, 8.0, 7.0, 8.0, 10.0, 10.0,
                10.0, 8.0, 5.0, 4.0, 3.0, 3.0, 2.0, 1.0,
            ],
            audience: AudienceRules {
                industry: vec![
                    cluster("Business Professionals", &["b2b", "enterprise", "business"]),
                    cluster("Tech Early Adopters", &["tech", "software", "saas"]),
                    cluster("Developers", &["software", "saas", "developer"]),
                    cluster("Fashion-forward Consumers", &["fashion", "apparel"]),
                    cluster("Fitness Enthusiasts", &["fitness", "sports"]),
                    cluster("Foodies", &["food", "restaurant"]),
                    cluster("Travelers", &["travel", "hotel"]),
                ],
                ad_text: vec![
                    cluster("Students", &["student", "students", "college", "campus"]),
                    cluster("Parents", &["parents", "kids", "family"]),
                    cluster("Developers", &["developers", "api", "sdk"]),
                    cluster("Small Business Owners", &["small business", "founders", "smb"]),
                    cluster("Job Seekers", &["hiring", "careers", "join the team"]),
                ],
                platform: BTreeMap::from([
                    (
                        Platform::ProfessionalNetwork,
                        "Corporate Decision Makers".to_string(),
                    ),
                    (Platform::Forum, "Niche Community Members".to_string()),
                ]),
                max_clusters: None,
            },
            insights: InsightRules::default(),
        }
    }
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), TableError> {
    if condition {
        Ok(())
    } else {
        Err(TableError::Invalid(message()))
    }
}

fn check_shares(label: &str, platform: Platform, shares: &BTreeMap<String, f64>) -> Result<(), TableError> {
    check(
        shares.values().all(|v| v.is_finite() && *v >= 0.0),
        || format!("{platform}.{label} has a negative or non-finite share"),
    )?;
    check(shares.values().sum::<f64>() > 0.0, || {
        format!("{platform}.{label} shares sum to zero")
    })
}

impl EstimationTable {
    pub fn from_yaml_str(text: &str) -> Result<Self, TableError> {
        let table: Self = serde_yaml::from_str(text)?;
        table.validate()?;
        Ok(table)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_yaml_str(&text)?;
        info!(path = %path.display(), version = %table.version, "loaded estimation table");
        Ok(table)
    }

    pub fn platform(&self, platform: Platform) -> &PlatformConstants {
        // validate() guarantees every platform has an entry.
        &self.platforms[&platform]
    }

    pub fn validate(&self) -> Result<(), TableError> {
        check(!self.version.trim().is_empty(), || "version is empty".into())?;
        for platform in Platform::ALL {
            let Some(constants) = self.platforms.get(&platform) else {
                return Err(TableError::Invalid(format!("missing constants for {platform}")));
            };
            check(
                [constants.cpm, constants.cpc, constants.weight]
                    .iter()
                    .all(|v| v.is_finite() && *v >= 0.0),
                || format!("{platform} cpm/cpc/weight must be finite and non-negative"),
            )?;
            check(
                (0.0..=1.0).contains(&constants.conversion_baseline),
                || format!("{platform} conversion baseline must be within [0, 1]"),
            )?;
            check_shares("geo", platform, &constants.geo)?;
            check_shares("device", platform, &constants.device)?;
        }
        check(
            self.ctr.min > 0.0 && self.ctr.min <= self.ctr.max && self.ctr.max < 1.0,
            || "ctr bounds must satisfy 0 < min <= max < 1".into(),
        )?;
        check(self.time_of_day_weights.len() == 24, || {
            format!(
                "time_of_day_weights needs 24 entries, found {}",
                self.time_of_day_weights.len()
            )
        })?;
        check(
            self.time_of_day_weights
                .iter()
                .all(|w| w.is_finite() && *w >= 0.0)
                && self.time_of_day_weights.iter().sum::<f64>() > 0.0,
            || "time_of_day_weights must be non-negative with a positive sum".into(),
        )?;
        let t = &self.trending;
        check(
            [
                t.engagement_weight,
                t.recency_weight,
                t.quality_weight,
                t.platform_weight,
            ]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0),
            || "trending weights must be non-negative".into(),
        )?;
        check(
            t.recency
                .windows(2)
                .all(|pair| pair[0].max_age_hours < pair[1].max_age_hours),
            || "trending recency buckets must be ordered by increasing age".into(),
        )?;
        self.validate_insights()
    }

    fn validate_insights(&self) -> Result<(), TableError> {
        let i = &self.insights;
        check(
            [
                i.daily_spend_divisor,
                i.weekly_spend_divisor,
                i.risk.platform_saturation_ads,
                i.opportunity.platform_saturation_ads,
            ]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0),
            || "insight divisors must be finite and positive".into(),
        )?;
        check((1..=3650).contains(&i.trend_window_days), || {
            "insights.trend_window_days must be between 1 and 3650".into()
        })?;
        check(
            i.trend_threshold_pct.is_finite() && i.trend_threshold_pct >= 0.0,
            || "insights.trend_threshold_pct must be non-negative".into(),
        )?;
        for (label, points) in [
            ("risk", &i.risk.platform_points),
            ("opportunity", &i.opportunity.platform_points),
        ] {
            for platform in Platform::ALL {
                check(points.contains_key(&platform), || {
                    format!("insights.{label} has no platform points for {platform}")
                })?;
            }
        }
        Ok(())
    }
}
