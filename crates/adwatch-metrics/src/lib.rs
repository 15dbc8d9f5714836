//! Deterministic estimation of ad performance metrics.
//!
//! Nothing here observes real spend, clicks or conversions. Every figure is
//! derived from ad attributes plus a versioned [`EstimationTable`], and is
//! labeled as an estimate in the output.

use std::collections::BTreeMap;

use adwatch_core::{Ad, Competitor, Estimate, MediaFormat, MissingInput, Platform};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod insights;
mod table;

pub use insights::{
    CreativeAnalysis, CreativeKind, CtaCount, TimelineEntry, TopCreative, TrendDirection,
    VolumeTrend,
};
pub use table::{
    AudienceRules, ClusterRule, ConversionRules, CreativeRules, CtrRules, EstimationTable,
    FunnelRules, InsightRules, OpportunityRules, PlatformConstants, RecencyBucket, RiskRules,
    TableError, TrendingRules, VolumeTier,
};

pub const CRATE_NAME: &str = "adwatch-metrics";

pub const METHODOLOGY_NOTICE: &str = "Estimated values come from a fixed per-platform \
constant table, not from platform-reported spend, clicks or conversions. Geo, device and \
time-of-day profiles are platform stereotypes, not observed telemetry.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    Awareness,
    Consideration,
    Conversion,
}

/// Inputs shared by every ad of one competitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdContext {
    pub active_ads: usize,
    /// Recency is measured against this instant, not the wall clock.
    pub reference_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdMetrics {
    pub ad_id: Uuid,
    pub platform: Platform,
    pub external_ad_id: String,
    pub is_active: bool,
    pub spend: Estimate<f64>,
    pub cpm: Estimate<f64>,
    pub cpc: Estimate<f64>,
    pub frequency: Estimate<f64>,
    pub ctr: Estimate<f64>,
    /// Bounded intent score in [0, 1]; ordinal, not a calibrated probability.
    pub conversion_score: Estimate<f64>,
    pub funnel_stage: FunnelStage,
    pub creative_score: f64,
    pub trending_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsBundle {
    pub competitor_id: Uuid,
    pub methodology_version: String,
    pub notice: String,
    pub reference_time: Option<DateTime<Utc>>,
    pub total_ads: usize,
    pub active_ads: usize,
    pub active_ads_by_platform: BTreeMap<Platform, usize>,
    pub total_spend: Estimate<f64>,
    /// Total spend read as a monthly figure, divided down.
    pub daily_spend: Estimate<f64>,
    pub weekly_spend: Estimate<f64>,
    pub avg_cpm: Estimate<f64>,
    pub avg_cpc: Estimate<f64>,
    pub trending_score: Estimate<f64>,
    pub funnel_distribution: BTreeMap<FunnelStage, usize>,
    /// Ordered by rule precedence: industry, then ad text, then platform.
    pub audience_clusters: Vec<String>,
    pub geo_distribution: Estimate<BTreeMap<String, f64>>,
    pub device_distribution: Estimate<BTreeMap<String, f64>>,
    /// Share of activity per hour of day, index 0 = midnight.
    pub time_of_day: Vec<f64>,
    pub creative_analysis: CreativeAnalysis,
    pub top_creatives: Vec<TopCreative>,
    pub ad_timeline: Vec<TimelineEntry>,
    pub volume_trend: VolumeTrend,
    /// 0-100, higher means more competitive pressure.
    pub risk_score: u32,
    /// 0-100, higher means more worth watching.
    pub opportunity_score: u32,
    /// Newest first-seen first.
    pub ads: Vec<AdMetrics>,
}

/// Whole-word, case-insensitive match; `term` may span several words.
fn contains_term(haystack_lower: &str, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return false;
    }
    haystack_lower.match_indices(&term).any(|(start, _)| {
        let before = haystack_lower[..start].chars().next_back();
        let after = haystack_lower[start + term.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn count_terms(haystack_lower: &str, terms: &[String]) -> usize {
    terms
        .iter()
        .filter(|term| contains_term(haystack_lower, term))
        .count()
}

fn char_len(value: Option<&str>) -> usize {
    value.map(|s| s.chars().count()).unwrap_or(0)
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn newest_first(a: &Ad, b: &Ad) -> std::cmp::Ordering {
    b.first_seen
        .cmp(&a.first_seen)
        .then_with(|| a.platform.cmp(&b.platform))
        .then_with(|| a.external_ad_id.cmp(&b.external_ad_id))
}

#[derive(Debug, Clone)]
pub struct MetricsEngine {
    table: EstimationTable,
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self {
            table: EstimationTable::default(),
        }
    }
}

impl MetricsEngine {
    pub fn new(table: EstimationTable) -> Result<Self, TableError> {
        table.validate()?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &EstimationTable {
        &self.table
    }

    pub fn spend(&self, ad: &Ad) -> Estimate<f64> {
        match ad.impressions {
            Some(impressions) => {
                Estimate::estimated(impressions as f64 / 1000.0 * self.table.platform(ad.platform).cpm)
            }
            None => Estimate::unavailable(MissingInput::Impressions),
        }
    }

    pub fn frequency(&self, ad: &Ad, active_ads: usize) -> Estimate<f64> {
        match (ad.impressions, active_ads) {
            (None, _) => Estimate::unavailable(MissingInput::Impressions),
            (Some(_), 0) => Estimate::unavailable(MissingInput::ActiveAds),
            (Some(impressions), n) => Estimate::estimated(impressions as f64 / 1000.0 / n as f64),
        }
    }

    pub fn ctr(&self, ad: &Ad) -> f64 {
        let rules = &self.table.ctr;
        let mut ctr = rules.base + self.table.platform(ad.platform).ctr_adjustment;
        if ad.media_format == Some(MediaFormat::Video) {
            ctr += rules.video_bonus;
        }
        if ad.combined_text().chars().count() > rules.completeness_threshold_chars {
            ctr += rules.completeness_bonus;
        }
        ctr.clamp(rules.min, rules.max)
    }

    pub fn conversion_score(&self, ad: &Ad) -> f64 {
        let rules = &self.table.conversion;
        let text = ad.combined_text().to_lowercase();
        let mut score = self.table.platform(ad.platform).conversion_baseline
            + count_terms(&text, &rules.lexicon) as f64 * rules.lexicon_increment;
        if let Some(url) = ad.destination_url.as_deref().map(str::to_lowercase) {
            if rules.url_markers.iter().any(|m| url.contains(&m.to_lowercase())) {
                score += rules.url_increment;
            }
        }
        score.clamp(0.0, 1.0)
    }

    /// Highest hit count wins; ties and zero hits resolve toward the earlier
    /// stage.
    pub fn funnel_stage(&self, ad: &Ad) -> FunnelStage {
        let rules = &self.table.funnel;
        let text = ad.combined_text().to_lowercase();
        let mut best = (FunnelStage::Awareness, count_terms(&text, &rules.awareness));
        for (stage, terms) in [
            (FunnelStage::Consideration, &rules.consideration),
            (FunnelStage::Conversion, &rules.conversion),
        ] {
            let hits = count_terms(&text, terms);
            if hits > best.1 {
                best = (stage, hits);
            }
        }
        best.0
    }

    pub fn creative_score(&self, ad: &Ad, spend: &Estimate<f64>) -> f64 {
        let rules = &self.table.creative;
        let mut score = self.table.platform(ad.platform).weight;
        if ad.is_active {
            score += rules.active_bonus;
        }
        if ad.media_format == Some(MediaFormat::Video) {
            score += rules.video_bonus;
        }
        let headline = char_len(ad.headline.as_deref()).min(rules.headline_full_chars);
        let description = char_len(ad.description.as_deref()).min(rules.description_full_chars);
        score += headline as f64 / rules.headline_full_chars.max(1) as f64 * rules.headline_points;
        score += description as f64 / rules.description_full_chars.max(1) as f64
            * rules.description_points;
        if let Some(spend) = spend.value() {
            score += spend * rules.spend_multiplier;
        }
        score
    }

    pub fn trending_score(&self, ad: &Ad, reference_time: DateTime<Utc>) -> f64 {
        let rules = &self.table.trending;

        let engagement = ad
            .engagement
            .map(|e| {
                let interactions = e.likes as f64
                    + e.comments as f64 * rules.comment_multiplier
                    + e.shares as f64 * rules.share_multiplier;
                (rules.engagement_log_scale * (1.0 + interactions).log10()).min(100.0)
            })
            .unwrap_or(0.0);

        let age_hours = ((reference_time - ad.first_seen).num_seconds().max(0)) as f64 / 3600.0;
        let recency = rules
            .recency
            .iter()
            .find(|bucket| age_hours < bucket.max_age_hours as f64)
            .map(|bucket| bucket.score)
            .unwrap_or(0.0);

        let mut quality = 0.0;
        if char_len(ad.headline.as_deref()) > rules.quality_headline_min_chars {
            quality += rules.quality_headline_points;
        }
        if char_len(ad.description.as_deref()) > rules.quality_description_min_chars {
            quality += rules.quality_description_points;
        }
        if ad.media_format.is_some() {
            quality += rules.quality_media_points;
        }
        if ad.destination_url.is_some() {
            quality += rules.quality_url_points;
        }

        let platform = self.table.platform(ad.platform).weight * rules.platform_scale;

        rules.engagement_weight * engagement
            + rules.recency_weight * recency
            + rules.quality_weight * quality
            + rules.platform_weight * platform
    }

    pub fn ad_metrics(&self, ad: &Ad, context: &AdContext) -> AdMetrics {
        let constants = self.table.platform(ad.platform);
        let spend = self.spend(ad);
        AdMetrics {
            ad_id: ad.id,
            platform: ad.platform,
            external_ad_id: ad.external_ad_id.clone(),
            is_active: ad.is_active,
            creative_score: self.creative_score(ad, &spend),
            spend,
            cpm: Estimate::estimated(constants.cpm),
            cpc: Estimate::estimated(constants.cpc),
            frequency: self.frequency(ad, context.active_ads),
            ctr: Estimate::estimated(self.ctr(ad)),
            conversion_score: Estimate::estimated(self.conversion_score(ad)),
            funnel_stage: self.funnel_stage(ad),
            trending_score: self.trending_score(ad, context.reference_time),
        }
    }

    /// Platform lookup tables blended by each platform's share of the
    /// competitor's active ads.
    fn blend(
        &self,
        active_by_platform: &BTreeMap<Platform, usize>,
        active_total: usize,
        pick: impl Fn(&PlatformConstants) -> &BTreeMap<String, f64>,
    ) -> Estimate<BTreeMap<String, f64>> {
        if active_total == 0 {
            return Estimate::unavailable(MissingInput::ActiveAds);
        }
        let mut blended: BTreeMap<String, f64> = BTreeMap::new();
        for (platform, count) in active_by_platform {
            if *count == 0 {
                continue;
            }
            let table = pick(self.table.platform(*platform));
            let table_sum: f64 = table.values().sum();
            let share = *count as f64 / active_total as f64;
            for (bucket, value) in table {
                *blended.entry(bucket.clone()).or_insert(0.0) += share * value / table_sum;
            }
        }
        Estimate::estimated(blended)
    }

    fn time_of_day(&self) -> Vec<f64> {
        let weights = &self.table.time_of_day_weights;
        let total: f64 = weights.iter().sum();
        weights.iter().map(|w| w / total).collect()
    }

    fn audience_clusters(&self, competitor: &Competitor, active: &[&Ad]) -> Vec<String> {
        let rules = &self.table.audience;
        let mut clusters: Vec<String> = Vec::new();
        let mut add = |cluster: &str| {
            if !clusters.iter().any(|c| c == cluster) {
                clusters.push(cluster.to_string());
            }
        };

        let industries: Vec<String> = competitor
            .industries
            .iter()
            .map(|i| i.to_lowercase())
            .collect();
        for rule in &rules.industry {
            let hit = industries.iter().any(|industry| {
                rule.contains_any
                    .iter()
                    .any(|needle| industry.contains(&needle.to_lowercase()))
            });
            if hit {
                add(&rule.cluster);
            }
        }

        let texts: Vec<String> = active
            .iter()
            .map(|ad| ad.combined_text().to_lowercase())
            .collect();
        for rule in &rules.ad_text {
            if texts.iter().any(|text| count_terms(text, &rule.contains_any) > 0) {
                add(&rule.cluster);
            }
        }

        for (platform, cluster) in &rules.platform {
            if active.iter().any(|ad| ad.platform == *platform) {
                add(cluster);
            }
        }

        if let Some(cap) = rules.max_clusters {
            clusters.truncate(cap);
        }
        clusters
    }

    /// Full bundle for one competitor. Pure: the same ads always produce the
    /// same bundle, regardless of input order.
    pub fn competitor_metrics(&self, competitor: &Competitor, ads: &[Ad]) -> MetricsBundle {
        let mut ordered: Vec<&Ad> = ads.iter().collect();
        ordered.sort_by(|a, b| newest_first(a, b));

        let active: Vec<&Ad> = ordered.iter().copied().filter(|ad| ad.is_active).collect();
        let mut active_by_platform: BTreeMap<Platform, usize> =
            Platform::ALL.into_iter().map(|p| (p, 0)).collect();
        for ad in &active {
            *active_by_platform.entry(ad.platform).or_insert(0) += 1;
        }

        let reference_time = ordered.iter().map(|ad| ad.last_seen).max();
        let context = AdContext {
            active_ads: active.len(),
            reference_time: reference_time.unwrap_or_default(),
        };
        let per_ad: Vec<AdMetrics> = ordered
            .iter()
            .map(|ad| self.ad_metrics(ad, &context))
            .collect();
        let active_metrics: Vec<&AdMetrics> = per_ad.iter().filter(|m| m.is_active).collect();

        let or_no_active = |value: Option<f64>| match value {
            Some(v) => Estimate::estimated(v),
            None => Estimate::unavailable(MissingInput::ActiveAds),
        };

        let total_spend = if active_metrics.is_empty() {
            Estimate::unavailable(MissingInput::ActiveAds)
        } else {
            let spends: Vec<f64> = active_metrics
                .iter()
                .filter_map(|m| m.spend.value().copied())
                .collect();
            if spends.is_empty() {
                Estimate::unavailable(MissingInput::Impressions)
            } else {
                Estimate::estimated(spends.iter().sum())
            }
        };

        let mut ads_by_platform: BTreeMap<Platform, usize> = BTreeMap::new();
        for ad in &ordered {
            *ads_by_platform.entry(ad.platform).or_insert(0) += 1;
        }
        let insights = &self.table.insights;

        let mut funnel_distribution = BTreeMap::new();
        for metrics in &active_metrics {
            *funnel_distribution.entry(metrics.funnel_stage).or_insert(0) += 1;
        }

        MetricsBundle {
            competitor_id: competitor.id,
            methodology_version: self.table.version.clone(),
            notice: METHODOLOGY_NOTICE.to_string(),
            reference_time,
            total_ads: ordered.len(),
            active_ads: active.len(),
            total_spend,
            daily_spend: total_spend.map(|v| v / insights.daily_spend_divisor),
            weekly_spend: total_spend.map(|v| v / insights.weekly_spend_divisor),
            avg_cpm: or_no_active(mean(active_metrics.iter().filter_map(|m| m.cpm.value().copied()))),
            avg_cpc: or_no_active(mean(active_metrics.iter().filter_map(|m| m.cpc.value().copied()))),
            trending_score: or_no_active(mean(active_metrics.iter().map(|m| m.trending_score))),
            funnel_distribution,
            audience_clusters: self.audience_clusters(competitor, &active),
            geo_distribution: self.blend(&active_by_platform, active.len(), |c| &c.geo),
            device_distribution: self.blend(&active_by_platform, active.len(), |c| &c.device),
            time_of_day: self.time_of_day(),
            creative_analysis: self.creative_analysis(&ordered),
            top_creatives: self.top_creatives(&ordered),
            ad_timeline: self.ad_timeline(&ordered),
            volume_trend: self.volume_trend(&ordered, reference_time),
            risk_score: self.risk_score(ordered.len(), active.len(), &ads_by_platform),
            opportunity_score: self.opportunity_score(ordered.len(), &ads_by_platform),
            active_ads_by_platform: active_by_platform,
            ads: per_ad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adwatch_core::EngagementSignals;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, hour, 0, 0).single().unwrap()
    }

    fn ad(platform: Platform, ext: &str) -> Ad {
        Ad {
            id: Uuid::new_v4(),
            competitor_id: Uuid::nil(),
            platform,
            external_ad_id: ext.into(),
            headline: Some("Trail shoes".into()),
            description: Some("Light and fast".into()),
            destination_url: Some("https://northwind.test".into()),
            media_format: Some(MediaFormat::Image),
            raw_payload: json!({}),
            impressions: Some(2000),
            engagement: None,
            first_seen: at(8),
            last_seen: at(12),
            is_active: true,
        }
    }

    fn competitor(industries: &[&str]) -> Competitor {
        Competitor {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "Northwind".into(),
            domain: Some("northwind.test".into()),
            industries: industries.iter().map(|s| s.to_string()).collect(),
            keywords: vec![],
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn spend_uses_platform_cpm_and_never_fabricates_zero() {
        let engine = MetricsEngine::default();
        let mut social = ad(Platform::Social, "s1");
        assert!(close(*engine.spend(&social).value().unwrap(), 10.0));

        social.impressions = None;
        assert_eq!(
            engine.spend(&social),
            Estimate::unavailable(MissingInput::Impressions)
        );
        assert_eq!(
            engine.frequency(&social, 3),
            Estimate::unavailable(MissingInput::Impressions)
        );
    }

    #[test]
    fn frequency_guards_zero_active_ads() {
        let engine = MetricsEngine::default();
        let search = ad(Platform::GeneralSearch, "g1");
        assert_eq!(
            engine.frequency(&search, 0),
            Estimate::unavailable(MissingInput::ActiveAds)
        );
        assert!(close(*engine.frequency(&search, 4).value().unwrap(), 0.5));
    }

    #[test]
    fn video_ctr_adds_bonus_without_completeness_term() {
        let engine = MetricsEngine::default();
        let mut video = ad(Platform::GeneralSearch, "v1");
        video.media_format = Some(MediaFormat::Video);
        assert!(close(engine.ctr(&video), 0.02 + 0.01 + 0.005));

        video.description = Some("x".repeat(120));
        assert!(close(engine.ctr(&video), 0.02 + 0.01 + 0.005 + 0.003));

        let network = ad(Platform::ProfessionalNetwork, "p1");
        assert!(engine.ctr(&network) < engine.ctr(&ad(Platform::GeneralSearch, "g1")));
    }

    #[test]
    fn ctr_is_clamped_at_both_ends() {
        let mut table = EstimationTable::default();
        table.ctr.base = 0.9;
        table.ctr.max = 0.15;
        let high = MetricsEngine::new(table.clone()).unwrap();
        assert!(close(high.ctr(&ad(Platform::GeneralSearch, "a")), 0.15));

        table.ctr.base = -0.5;
        let low = MetricsEngine::new(table).unwrap();
        assert!(close(low.ctr(&ad(Platform::Forum, "b")), 0.001));
    }

    #[test]
    fn funnel_ties_resolve_toward_awareness() {
        let engine = MetricsEngine::default();
        let mut tied = ad(Platform::Social, "t");
        tied.headline = Some("Discover features".into());
        tied.description = None;
        assert_eq!(engine.funnel_stage(&tied), FunnelStage::Awareness);

        tied.headline = Some("Compare features and benefits, then buy".into());
        assert_eq!(engine.funnel_stage(&tied), FunnelStage::Consideration);

        tied.headline = Some("Nothing matches here".into());
        assert_eq!(engine.funnel_stage(&tied), FunnelStage::Awareness);

        // Whole words only: "newsletter" is not "new".
        tied.headline = Some("Newsletter: buy, purchase, order now".into());
        assert_eq!(engine.funnel_stage(&tied), FunnelStage::Conversion);
    }

    #[test]
    fn conversion_score_rewards_lexicon_and_checkout_urls() {
        let engine = MetricsEngine::default();
        let plain = ad(Platform::Forum, "f");
        let mut intent = plain.clone();
        intent.headline = Some("Shop the sale, order now".into());
        intent.destination_url = Some("https://northwind.test/checkout".into());

        assert!(close(engine.conversion_score(&plain), 0.02));
        assert!(close(engine.conversion_score(&intent), 0.02 + 2.0 * 0.05 + 0.10));
    }

    #[test]
    fn creative_score_omits_spend_term_when_unavailable() {
        let engine = MetricsEngine::default();
        let mut search = ad(Platform::GeneralSearch, "g");
        search.headline = Some("h".repeat(60));
        search.description = Some("d".repeat(200));
        search.media_format = Some(MediaFormat::Video);
        search.impressions = None;

        let spend = engine.spend(&search);
        assert!(close(engine.creative_score(&search, &spend), 30.0 + 20.0 + 20.0 + 10.0 + 10.0));

        search.impressions = Some(1000);
        let spend = engine.spend(&search);
        assert!(close(
            engine.creative_score(&search, &spend),
            90.0 + 2.5 * 10.0
        ));
    }

    #[test]
    fn engagement_is_zero_without_signals_and_log_scaled_with_them() {
        let engine = MetricsEngine::default();
        let mut quiet = ad(Platform::Social, "q");
        quiet.first_seen = at(12);
        // recency 100, quality 25+25+15, platform 10*5
        let expected_quiet = 0.2 * 100.0 + 0.2 * 65.0 + 0.2 * 50.0;
        assert!(close(engine.trending_score(&quiet, at(12)), expected_quiet));

        let mut loud = quiet.clone();
        loud.engagement = Some(EngagementSignals {
            likes: 49,
            comments: 10,
            shares: 0,
        });
        // 49 + 5*10 = 99 interactions -> 20 * log10(100) = 40
        assert!(close(
            engine.trending_score(&loud, at(12)),
            expected_quiet + 0.4 * 40.0
        ));
    }

    #[test]
    fn recency_decays_with_age() {
        let engine = MetricsEngine::default();
        let fresh = ad(Platform::Forum, "fresh");
        let mut stale = fresh.clone();
        stale.first_seen = at(8) - Duration::days(60);
        assert!(engine.trending_score(&fresh, at(12)) > engine.trending_score(&stale, at(12)));
    }

    #[test]
    fn bundle_blends_distributions_by_active_share() {
        let engine = MetricsEngine::default();
        let mut inactive = ad(Platform::ProfessionalNetwork, "old");
        inactive.is_active = false;
        let ads = vec![
            ad(Platform::Social, "s1"),
            ad(Platform::GeneralSearch, "g1"),
            inactive,
        ];
        let bundle = engine.competitor_metrics(&competitor(&["Fitness"]), &ads);

        assert_eq!(bundle.total_ads, 3);
        assert_eq!(bundle.active_ads, 2);
        assert_eq!(bundle.active_ads_by_platform[&Platform::ProfessionalNetwork], 0);
        let device = bundle.device_distribution.value().unwrap();
        assert!(close(device["mobile"], (0.80 + 0.65) / 2.0));
        assert!(close(device.values().sum::<f64>(), 1.0));
        assert!(close(*bundle.avg_cpm.value().unwrap(), (5.0 + 2.5) / 2.0));
        assert!(close(*bundle.total_spend.value().unwrap(), 10.0 + 5.0));
        assert!(close(*bundle.daily_spend.value().unwrap(), 15.0 / 30.0));
        assert!(close(*bundle.weekly_spend.value().unwrap(), 15.0 / 4.33));
        // Insights read every ad, active or not.
        assert_eq!(bundle.creative_analysis.total_analyzed, 3);
        assert_eq!(bundle.ad_timeline.len(), 3);
        assert_eq!(bundle.volume_trend.direction, TrendDirection::Neutral);
        assert_eq!(bundle.top_creatives.len(), 3);
        assert_eq!(bundle.time_of_day.len(), 24);
        assert!(bundle.time_of_day[10] > bundle.time_of_day[3]);
        assert!(bundle.audience_clusters.contains(&"Fitness Enthusiasts".to_string()));
        // Inactive ads keep per-ad metrics but do not feed aggregates.
        assert_eq!(bundle.ads.len(), 3);
        assert!(!bundle
            .audience_clusters
            .contains(&"Corporate Decision Makers".to_string()));
    }

    #[test]
    fn no_active_ads_reports_unavailable_aggregates() {
        let engine = MetricsEngine::default();
        let mut gone = ad(Platform::Forum, "x");
        gone.is_active = false;
        let bundle = engine.competitor_metrics(&competitor(&[]), &[gone]);
        assert_eq!(
            bundle.geo_distribution,
            Estimate::unavailable(MissingInput::ActiveAds)
        );
        assert_eq!(
            bundle.trending_score,
            Estimate::unavailable(MissingInput::ActiveAds)
        );
        assert_eq!(
            bundle.total_spend,
            Estimate::unavailable(MissingInput::ActiveAds)
        );
        assert_eq!(
            bundle.weekly_spend,
            Estimate::unavailable(MissingInput::ActiveAds)
        );
        // 50 + 10 (few ads) + 0.5 (one forum ad) - 10 (nothing active)
        assert_eq!(bundle.risk_score, 51);
    }

    #[test]
    fn missing_impressions_everywhere_makes_total_spend_unavailable() {
        let engine = MetricsEngine::default();
        let mut a = ad(Platform::Social, "a");
        a.impressions = None;
        let bundle = engine.competitor_metrics(&competitor(&[]), &[a]);
        assert_eq!(
            bundle.total_spend,
            Estimate::unavailable(MissingInput::Impressions)
        );
        assert_eq!(
            bundle.ads[0].frequency,
            Estimate::unavailable(MissingInput::Impressions)
        );
    }

    #[test]
    fn audience_clusters_union_industry_and_ad_text() {
        let engine = MetricsEngine::default();
        let mut students = ad(Platform::ProfessionalNetwork, "st");
        students.description = Some("Students get 20% off".into());
        let bundle =
            engine.competitor_metrics(&competitor(&["B2B SaaS"]), &[students]);
        assert_eq!(
            bundle.audience_clusters,
            vec![
                "Business Professionals",
                "Tech Early Adopters",
                "Developers",
                "Students",
                "Corporate Decision Makers",
            ]
        );

        let mut table = EstimationTable::default();
        table.audience.max_clusters = Some(2);
        let capped = MetricsEngine::new(table).unwrap();
        let mut students = ad(Platform::ProfessionalNetwork, "st");
        students.description = Some("Students get 20% off".into());
        let bundle = capped.competitor_metrics(&competitor(&["B2B SaaS"]), &[students]);
        assert_eq!(bundle.audience_clusters.len(), 2);
    }

    #[test]
    fn bundle_is_identical_across_calls_and_input_order() {
        let engine = MetricsEngine::default();
        let competitor = competitor(&["Retail"]);
        let mut ads = vec![
            ad(Platform::Social, "b"),
            ad(Platform::GeneralSearch, "a"),
            ad(Platform::Forum, "c"),
        ];
        ads[0].engagement = Some(EngagementSignals {
            likes: 10,
            comments: 2,
            shares: 1,
        });

        let first = serde_json::to_string(&engine.competitor_metrics(&competitor, &ads)).unwrap();
        ads.reverse();
        let second = serde_json::to_string(&engine.competitor_metrics(&competitor, &ads)).unwrap();
        assert_eq!(first, second);
    }
}
