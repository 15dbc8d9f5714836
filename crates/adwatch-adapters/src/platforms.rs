use adwatch_core::{Competitor, Platform};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::parse::{parse_page, RecordShape, FORUM, GENERAL_SEARCH, PROFESSIONAL_NETWORK, SOCIAL};
use crate::{
    bounded, AdapterContext, AdapterError, AdapterErrorKind, AdapterLimits, Collected, FetchResult,
    PlatformAdapter, Upstream,
};

/// Follow `cursor` links for one query until the page or ad cap is hit.
async fn collect_pages(
    upstream: &Upstream,
    shape: &RecordShape,
    endpoint: &str,
    base_query: &[(&str, String)],
    limits: &AdapterLimits,
    collected: &mut Collected,
) -> Result<(), AdapterError> {
    let mut cursor: Option<String> = None;
    for page_index in 0..limits.max_pages.max(1) {
        let mut query = base_query.to_vec();
        if let Some(cursor) = &cursor {
            query.push(("cursor", cursor.clone()));
        }
        let body = upstream.get(shape.platform, endpoint, &query).await?;
        let page = parse_page(shape, &body, upstream.secret())?;
        let next = page.next_cursor.clone();
        debug!(
            platform = %shape.platform,
            page_index,
            ads = page.ads.len(),
            skipped = page.skipped,
            "parsed upstream page"
        );
        collected.absorb(page);

        match next {
            Some(next) if !collected.is_full() && cursor.as_deref() != Some(next.as_str()) => {
                cursor = Some(next);
            }
            _ => break,
        }
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn missing_input(platform: Platform, what: &str) -> AdapterError {
    AdapterError::new(
        AdapterErrorKind::MissingQueryInput,
        format!("{platform} needs a competitor {what} to query"),
    )
}

/// Strips scheme, `www.` and any path so `https://www.acme.test/shop`
/// queries as `acme.test`.
pub(crate) fn normalize_domain(raw: &str) -> Option<String> {
    let without_scheme = raw
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .to_ascii_lowercase();
    non_empty(&host)
}

/// Search-engine ad library, queried by the competitor's domain.
#[derive(Debug, Clone)]
pub struct GeneralSearchAdapter {
    upstream: Upstream,
    limits: AdapterLimits,
}

impl GeneralSearchAdapter {
    pub fn new(upstream: Upstream, limits: AdapterLimits) -> Self {
        Self { upstream, limits }
    }

    async fn collect(&self, competitor: &Competitor) -> Result<Collected, AdapterError> {
        let domain = competitor
            .domain
            .as_deref()
            .and_then(normalize_domain)
            .ok_or_else(|| missing_input(Platform::GeneralSearch, "domain"))?;
        let mut collected = Collected::new(self.limits.max_ads);
        collect_pages(
            &self.upstream,
            &GENERAL_SEARCH,
            "google/company/ads",
            &[("domain", domain), ("get_ad_details", "false".to_string())],
            &self.limits,
            &mut collected,
        )
        .await?;
        Ok(collected)
    }
}

#[async_trait]
impl PlatformAdapter for GeneralSearchAdapter {
    fn platform(&self) -> Platform {
        Platform::GeneralSearch
    }

    async fn fetch(&self, ctx: &AdapterContext, competitor: &Competitor) -> FetchResult {
        bounded(self.platform(), ctx, self.limits.deadline, self.collect(competitor)).await
    }
}

/// Social ad library, searched by keyword. Runs the competitor name first,
/// then keyword hints, up to `max_queries` searches.
#[derive(Debug, Clone)]
pub struct SocialAdapter {
    upstream: Upstream,
    limits: AdapterLimits,
}

impl SocialAdapter {
    pub fn new(upstream: Upstream, limits: AdapterLimits) -> Self {
        Self { upstream, limits }
    }

    pub(crate) fn queries(&self, competitor: &Competitor) -> Vec<String> {
        let mut queries: Vec<String> = Vec::new();
        for candidate in std::iter::once(&competitor.name).chain(competitor.keywords.iter()) {
            let Some(query) = non_empty(candidate) else {
                continue;
            };
            if !queries.iter().any(|q| q.eq_ignore_ascii_case(&query)) {
                queries.push(query);
            }
        }
        queries.truncate(self.limits.max_queries.max(1));
        queries
    }

    async fn collect(&self, competitor: &Competitor) -> Result<Collected, AdapterError> {
        let queries = self.queries(competitor);
        if queries.is_empty() {
            return Err(missing_input(Platform::Social, "name or keyword"));
        }

        let mut collected = Collected::new(self.limits.max_ads);
        let mut first_error: Option<AdapterError> = None;
        let mut succeeded = 0usize;
        for query in &queries {
            if collected.is_full() {
                break;
            }
            let base = [
                ("query", query.clone()),
                ("search_type", "keyword_unordered".to_string()),
                ("ad_type", "all".to_string()),
                ("status", "ALL".to_string()),
            ];
            match collect_pages(
                &self.upstream,
                &SOCIAL,
                "facebook/adLibrary/search/ads",
                &base,
                &self.limits,
                &mut collected,
            )
            .await
            {
                Ok(()) => succeeded += 1,
                // A rejected key fails every query the same way.
                Err(err) if err.kind == AdapterErrorKind::AuthFailure => return Err(err),
                Err(err) => {
                    warn!(query = %query, error = %err, "social query failed");
                    collected.warn(format!("query {query:?} failed: {err}"));
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) if succeeded == 0 => Err(err),
            _ => Ok(collected),
        }
    }
}

#[async_trait]
impl PlatformAdapter for SocialAdapter {
    fn platform(&self) -> Platform {
        Platform::Social
    }

    async fn fetch(&self, ctx: &AdapterContext, competitor: &Competitor) -> FetchResult {
        bounded(self.platform(), ctx, self.limits.deadline, self.collect(competitor)).await
    }
}

/// Forum ad search, queried by the competitor name.
#[derive(Debug, Clone)]
pub struct ForumAdapter {
    upstream: Upstream,
    limits: AdapterLimits,
}

impl ForumAdapter {
    pub fn new(upstream: Upstream, limits: AdapterLimits) -> Self {
        Self { upstream, limits }
    }

    async fn collect(&self, competitor: &Competitor) -> Result<Collected, AdapterError> {
        let query = non_empty(&competitor.name).ok_or_else(|| missing_input(Platform::Forum, "name"))?;
        let mut collected = Collected::new(self.limits.max_ads);
        collect_pages(
            &self.upstream,
            &FORUM,
            "reddit/ads/search",
            &[("query", query)],
            &self.limits,
            &mut collected,
        )
        .await?;
        Ok(collected)
    }
}

#[async_trait]
impl PlatformAdapter for ForumAdapter {
    fn platform(&self) -> Platform {
        Platform::Forum
    }

    async fn fetch(&self, ctx: &AdapterContext, competitor: &Competitor) -> FetchResult {
        bounded(self.platform(), ctx, self.limits.deadline, self.collect(competitor)).await
    }
}

/// Professional-network ad library, queried by company name.
#[derive(Debug, Clone)]
pub struct ProfessionalNetworkAdapter {
    upstream: Upstream,
    limits: AdapterLimits,
}

impl ProfessionalNetworkAdapter {
    pub fn new(upstream: Upstream, limits: AdapterLimits) -> Self {
        Self { upstream, limits }
    }

    async fn collect(&self, competitor: &Competitor) -> Result<Collected, AdapterError> {
        let company = non_empty(&competitor.name)
            .ok_or_else(|| missing_input(Platform::ProfessionalNetwork, "company name"))?;
        let mut collected = Collected::new(self.limits.max_ads);
        collect_pages(
            &self.upstream,
            &PROFESSIONAL_NETWORK,
            "linkedin/ads/search",
            &[("company", company)],
            &self.limits,
            &mut collected,
        )
        .await?;
        Ok(collected)
    }
}

#[async_trait]
impl PlatformAdapter for ProfessionalNetworkAdapter {
    fn platform(&self) -> Platform {
        Platform::ProfessionalNetwork
    }

    async fn fetch(&self, ctx: &AdapterContext, competitor: &Competitor) -> FetchResult {
        bounded(self.platform(), ctx, self.limits.deadline, self.collect(competitor)).await
    }
}
