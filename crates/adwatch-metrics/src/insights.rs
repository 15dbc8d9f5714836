//! Portfolio readings of one competitor's ad set: creative mix, detection
//! timeline, volume trend and the two 0-100 scores.

use std::collections::{BTreeMap, BTreeSet};

use adwatch_core::{Ad, MediaFormat, Platform};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{char_len, contains_term, MetricsEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreativeKind {
    Text,
    Image,
    Video,
}

impl CreativeKind {
    pub fn of(ad: &Ad) -> Self {
        match ad.media_format {
            Some(MediaFormat::Video) => CreativeKind::Video,
            Some(MediaFormat::Image | MediaFormat::Carousel) => CreativeKind::Image,
            None => CreativeKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtaCount {
    pub cta: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreativeAnalysis {
    pub total_analyzed: usize,
    pub with_images: usize,
    pub with_videos: usize,
    /// Over ads that have a headline, rounded down; 0 when none do.
    pub avg_headline_chars: usize,
    /// Most frequent first; equal counts keep keyword order.
    pub common_ctas: Vec<CtaCount>,
    /// Distinct (platform, creative kind) pairs.
    pub creative_variety: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopCreative {
    pub ad_id: Uuid,
    pub platform: Platform,
    pub external_ad_id: String,
    pub headline: Option<String>,
    pub kind: CreativeKind,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub detected_at: DateTime<Utc>,
    pub ad_id: Uuid,
    pub platform: Platform,
    pub headline_preview: Option<String>,
    pub has_creative: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Growing,
    Stable,
    Declining,
    /// The ad history does not reach back into the previous window.
    Neutral,
}

/// First-seen counts in the window ending at the reference time against the
/// window before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeTrend {
    pub direction: TrendDirection,
    pub window_days: i64,
    pub current_ads: usize,
    pub previous_ads: Option<usize>,
    /// Rounded to one decimal place.
    pub change_pct: Option<f64>,
}

fn has_headline(ad: &Ad) -> bool {
    ad.headline.as_deref().is_some_and(|h| !h.is_empty())
}

fn preview(headline: &str, max_chars: usize) -> String {
    if headline.chars().count() > max_chars {
        let cut: String = headline.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        headline.to_string()
    }
}

/// Each present platform contributes its points scaled by ad count, capped at
/// the full points once `saturation` ads are reached.
fn saturating_points(
    points: &BTreeMap<Platform, f64>,
    ads_by_platform: &BTreeMap<Platform, usize>,
    saturation: f64,
) -> f64 {
    ads_by_platform
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(platform, count)| {
            let full = points.get(platform).copied().unwrap_or(0.0);
            (full * *count as f64 / saturation).min(full)
        })
        .sum()
}

fn bounded_score(score: f64) -> u32 {
    score.clamp(0.0, 100.0).round() as u32
}

impl MetricsEngine {
    pub fn creative_analysis(&self, ads: &[&Ad]) -> CreativeAnalysis {
        let rules = &self.table.insights;
        let headlines: Vec<String> = ads
            .iter()
            .filter(|ad| has_headline(ad))
            .filter_map(|ad| ad.headline.as_deref().map(str::to_lowercase))
            .collect();
        let avg_headline_chars = match headlines.len() {
            0 => 0,
            n => headlines.iter().map(|h| h.chars().count()).sum::<usize>() / n,
        };

        let mut common_ctas: Vec<CtaCount> = rules
            .cta_keywords
            .iter()
            .map(|keyword| CtaCount {
                cta: keyword.clone(),
                count: headlines.iter().filter(|h| contains_term(h, keyword)).count(),
            })
            .filter(|cta| cta.count > 0)
            .collect();
        common_ctas.sort_by(|a, b| b.count.cmp(&a.count));
        common_ctas.truncate(rules.common_cta_count);

        let kinds: Vec<CreativeKind> = ads.iter().map(|ad| CreativeKind::of(ad)).collect();
        let variety: BTreeSet<(Platform, CreativeKind)> = ads
            .iter()
            .zip(&kinds)
            .map(|(ad, kind)| (ad.platform, *kind))
            .collect();

        CreativeAnalysis {
            total_analyzed: ads.len(),
            with_images: kinds.iter().filter(|k| **k == CreativeKind::Image).count(),
            with_videos: kinds.iter().filter(|k| **k == CreativeKind::Video).count(),
            avg_headline_chars,
            common_ctas,
            creative_variety: variety.len(),
        }
    }

    /// Ads with neither a headline nor media are not candidates. Equal scores
    /// keep the input order.
    pub fn top_creatives(&self, ads: &[&Ad]) -> Vec<TopCreative> {
        let rules = &self.table.insights;
        let mut scored: Vec<TopCreative> = ads
            .iter()
            .filter(|ad| has_headline(ad) || ad.media_format.is_some())
            .map(|ad| {
                let kind = CreativeKind::of(ad);
                let mut score = match kind {
                    CreativeKind::Video => rules.top_creative_video_points,
                    CreativeKind::Image => rules.top_creative_image_points,
                    CreativeKind::Text => 0.0,
                };
                if char_len(ad.headline.as_deref()) > rules.top_creative_headline_min_chars {
                    score += rules.top_creative_headline_points;
                }
                TopCreative {
                    ad_id: ad.id,
                    platform: ad.platform,
                    external_ad_id: ad.external_ad_id.clone(),
                    headline: ad.headline.clone(),
                    kind,
                    score,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(rules.top_creative_limit);
        scored
    }

    /// The earliest detections, oldest first.
    pub fn ad_timeline(&self, ads: &[&Ad]) -> Vec<TimelineEntry> {
        let rules = &self.table.insights;
        let mut ordered = ads.to_vec();
        ordered.sort_by(|a, b| {
            a.first_seen
                .cmp(&b.first_seen)
                .then_with(|| a.platform.cmp(&b.platform))
                .then_with(|| a.external_ad_id.cmp(&b.external_ad_id))
        });
        ordered
            .into_iter()
            .take(rules.timeline_limit)
            .map(|ad| TimelineEntry {
                detected_at: ad.first_seen,
                ad_id: ad.id,
                platform: ad.platform,
                headline_preview: ad
                    .headline
                    .as_deref()
                    .filter(|h| !h.is_empty())
                    .map(|h| preview(h, rules.timeline_preview_chars)),
                has_creative: ad.media_format.is_some(),
            })
            .collect()
    }

    pub fn volume_trend(&self, ads: &[&Ad], reference_time: Option<DateTime<Utc>>) -> VolumeTrend {
        let rules = &self.table.insights;
        let window_days = rules.trend_window_days;
        let neutral = |current_ads| VolumeTrend {
            direction: TrendDirection::Neutral,
            window_days,
            current_ads,
            previous_ads: None,
            change_pct: None,
        };
        let Some(reference) = reference_time else {
            return neutral(0);
        };

        let window = Duration::days(window_days);
        let current_start = reference - window;
        let previous_start = current_start - window;
        let current = ads.iter().filter(|ad| ad.first_seen > current_start).count();
        if !ads.iter().any(|ad| ad.first_seen <= current_start) {
            return neutral(current);
        }
        let previous = ads
            .iter()
            .filter(|ad| ad.first_seen > previous_start && ad.first_seen <= current_start)
            .count();

        let (direction, change) = if previous == 0 {
            if current > 0 {
                (TrendDirection::Growing, 100.0)
            } else {
                (TrendDirection::Stable, 0.0)
            }
        } else {
            let change = (current as f64 - previous as f64) / previous as f64 * 100.0;
            let direction = if change > rules.trend_threshold_pct {
                TrendDirection::Growing
            } else if change < -rules.trend_threshold_pct {
                TrendDirection::Declining
            } else {
                TrendDirection::Stable
            };
            (direction, change)
        };
        VolumeTrend {
            direction,
            window_days,
            current_ads: current,
            previous_ads: Some(previous),
            change_pct: Some((change * 10.0).round() / 10.0),
        }
    }

    /// Higher means more competitive pressure.
    pub fn risk_score(
        &self,
        total_ads: usize,
        active_ads: usize,
        ads_by_platform: &BTreeMap<Platform, usize>,
    ) -> u32 {
        let rules = &self.table.insights.risk;
        let mut score = rules.base;
        score += if total_ads == 0 {
            rules.no_ads_points
        } else if total_ads < rules.few_ads_below {
            rules.few_ads_points
        } else {
            rules
                .volume_tiers
                .iter()
                .find(|tier| total_ads > tier.above)
                .map(|tier| tier.points)
                .unwrap_or(0.0)
        };
        score += saturating_points(
            &rules.platform_points,
            ads_by_platform,
            rules.platform_saturation_ads,
        );
        if total_ads > 0 {
            let ratio = active_ads as f64 / total_ads as f64;
            if ratio > rules.high_active_ratio {
                score += rules.high_active_points;
            } else if ratio < rules.low_active_ratio {
                score += rules.low_active_points;
            }
        }
        bounded_score(score)
    }

    /// Higher means more to learn from watching this competitor.
    pub fn opportunity_score(
        &self,
        total_ads: usize,
        ads_by_platform: &BTreeMap<Platform, usize>,
    ) -> u32 {
        let rules = &self.table.insights.opportunity;
        let present: BTreeSet<Platform> = ads_by_platform
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(platform, _)| *platform)
            .collect();

        let mut score = rules.base + (total_ads as f64 * rules.per_ad_points).min(rules.volume_cap);
        score += saturating_points(
            &rules.platform_points,
            ads_by_platform,
            rules.platform_saturation_ads,
        );
        score += match present.len() {
            0 | 1 => 0.0,
            2 => rules.two_platform_points,
            _ => rules.three_plus_platform_points,
        };
        if present.contains(&rules.pairing_anchor)
            && rules.pairing_partners.iter().any(|p| present.contains(p))
        {
            score += rules.pairing_points;
        }
        if total_ads > rules.social_min_ads
            && rules.social_platforms.iter().any(|p| present.contains(p))
        {
            score += rules.social_points;
        }
        bounded_score(score)
    }
}
