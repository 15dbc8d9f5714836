use std::collections::HashSet;

use adwatch_core::{
    Ad, AdDraft, Competitor, EngagementSignals, FetchJob, FetchJobStatus, MediaFormat, Platform,
    PlatformOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    mark_stale, AdFilter, AdStore, CompetitorDirectory, FetchJobLedger, LedgerError, StoreError,
    UpsertOutcome,
};

const AD_COLUMNS: &str = "id, competitor_id, platform, external_ad_id, headline, description, \
     destination_url, media_format, raw_payload, impressions, engagement, first_seen, last_seen, \
     is_active";

const JOB_COLUMNS: &str = "id, competitor_id, started_at, finished_at, status, outcomes, \
     ads_inserted, ads_updated, ads_deactivated";

/// Postgres backend. Dedup atomicity comes from the `ads_dedup_key` unique
/// constraint; the one-running-job rule from a partial unique index.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(backend)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Backend(format!("running migrations: {err}")))?;
        info!("database migrations applied");
        Ok(())
    }

    /// Seed or refresh a competitor row. The CRUD layer owns these records;
    /// this exists for local setups driven by a competitors file.
    pub async fn upsert_competitor(&self, competitor: &Competitor) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO competitors (id, owner_id, name, domain, industries, keywords)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
               SET owner_id = EXCLUDED.owner_id,
                   name = EXCLUDED.name,
                   domain = EXCLUDED.domain,
                   industries = EXCLUDED.industries,
                   keywords = EXCLUDED.keywords
            "#,
        )
        .bind(competitor.id)
        .bind(competitor.owner_id)
        .bind(&competitor.name)
        .bind(&competitor.domain)
        .bind(&competitor.industries)
        .bind(&competitor.keywords)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn ledger_backend(err: sqlx::Error) -> LedgerError {
    LedgerError::Backend(err.to_string())
}

fn is_write_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation()
                || matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn ad_from_row(row: &PgRow) -> Result<Ad, StoreError> {
    let platform: String = row.try_get("platform").map_err(backend)?;
    let media_format: Option<String> = row.try_get("media_format").map_err(backend)?;
    let impressions: Option<i64> = row.try_get("impressions").map_err(backend)?;
    let engagement: Option<Json<EngagementSignals>> = row.try_get("engagement").map_err(backend)?;
    let raw_payload: JsonValue = row.try_get("raw_payload").map_err(backend)?;

    Ok(Ad {
        id: row.try_get("id").map_err(backend)?,
        competitor_id: row.try_get("competitor_id").map_err(backend)?,
        platform: platform
            .parse()
            .map_err(|err| StoreError::Backend(format!("ads.platform: {err}")))?,
        external_ad_id: row.try_get("external_ad_id").map_err(backend)?,
        headline: row.try_get("headline").map_err(backend)?,
        description: row.try_get("description").map_err(backend)?,
        destination_url: row.try_get("destination_url").map_err(backend)?,
        media_format: media_format
            .map(|m| m.parse::<MediaFormat>())
            .transpose()
            .map_err(|err| StoreError::Backend(format!("ads.media_format: {err}")))?,
        raw_payload,
        impressions: impressions.and_then(|v| u64::try_from(v).ok()),
        engagement: engagement.map(|Json(e)| e),
        first_seen: row.try_get("first_seen").map_err(backend)?,
        last_seen: row.try_get("last_seen").map_err(backend)?,
        is_active: row.try_get("is_active").map_err(backend)?,
    })
}

fn competitor_from_row(row: &PgRow) -> Result<Competitor, StoreError> {
    Ok(Competitor {
        id: row.try_get("id").map_err(backend)?,
        owner_id: row.try_get("owner_id").map_err(backend)?,
        name: row.try_get("name").map_err(backend)?,
        domain: row.try_get("domain").map_err(backend)?,
        industries: row.try_get("industries").map_err(backend)?,
        keywords: row.try_get("keywords").map_err(backend)?,
    })
}

fn job_from_row(row: &PgRow) -> Result<FetchJob, LedgerError> {
    let status: String = row.try_get("status").map_err(ledger_backend)?;
    let Json(outcomes): Json<Vec<PlatformOutcome>> =
        row.try_get("outcomes").map_err(ledger_backend)?;
    let count = |column: &str| -> Result<u32, LedgerError> {
        let value: i32 = row.try_get(column).map_err(ledger_backend)?;
        Ok(u32::try_from(value).unwrap_or(0))
    };

    Ok(FetchJob {
        id: row.try_get("id").map_err(ledger_backend)?,
        competitor_id: row.try_get("competitor_id").map_err(ledger_backend)?,
        started_at: row.try_get("started_at").map_err(ledger_backend)?,
        finished_at: row.try_get("finished_at").map_err(ledger_backend)?,
        status: status
            .parse::<FetchJobStatus>()
            .map_err(|err| LedgerError::Backend(format!("fetch_jobs.status: {err}")))?,
        outcomes,
        ads_inserted: count("ads_inserted")?,
        ads_updated: count("ads_updated")?,
        ads_deactivated: count("ads_deactivated")?,
    })
}

#[async_trait]
impl AdStore for PgStore {
    async fn upsert_ad(
        &self,
        competitor_id: Uuid,
        draft: &AdDraft,
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO ads (
                id, competitor_id, platform, external_ad_id, headline, description,
                destination_url, media_format, raw_payload, impressions, engagement,
                first_seen, last_seen, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12, TRUE)
            ON CONFLICT ON CONSTRAINT ads_dedup_key DO UPDATE
               SET headline = EXCLUDED.headline,
                   description = EXCLUDED.description,
                   destination_url = EXCLUDED.destination_url,
                   media_format = COALESCE(EXCLUDED.media_format, ads.media_format),
                   raw_payload = EXCLUDED.raw_payload,
                   impressions = EXCLUDED.impressions,
                   engagement = EXCLUDED.engagement,
                   last_seen = GREATEST(ads.last_seen, EXCLUDED.last_seen),
                   is_active = TRUE
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(competitor_id)
        .bind(draft.platform.as_str())
        .bind(&draft.external_ad_id)
        .bind(&draft.headline)
        .bind(&draft.description)
        .bind(&draft.destination_url)
        .bind(draft.media_format.map(|m| m.as_str()))
        .bind(&draft.raw_payload)
        .bind(draft.impressions.map(|v| i64::try_from(v).unwrap_or(i64::MAX)))
        .bind(draft.engagement.map(Json))
        .bind(observed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_write_conflict(&err) {
                StoreError::Conflict(format!(
                    "{}/{}/{}",
                    competitor_id, draft.platform, draft.external_ad_id
                ))
            } else {
                backend(err)
            }
        })?;

        let inserted: bool = row.try_get("inserted").map_err(backend)?;
        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn mark_missing_inactive(
        &self,
        competitor_id: Uuid,
        platform: Platform,
        seen: &HashSet<String>,
    ) -> Result<u64, StoreError> {
        let seen: Vec<String> = seen.iter().cloned().collect();
        let result = sqlx::query(
            r#"
            UPDATE ads
               SET is_active = FALSE
             WHERE competitor_id = $1
               AND platform = $2
               AND is_active
               AND NOT (external_ad_id = ANY($3))
            "#,
        )
        .bind(competitor_id)
        .bind(platform.as_str())
        .bind(&seen)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn list_ads(&self, competitor_id: Uuid, filter: &AdFilter) -> Result<Vec<Ad>, StoreError> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(escape_like);
        let limit = filter.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));

        let sql = format!(
            r#"
            SELECT {AD_COLUMNS}
              FROM ads
             WHERE competitor_id = $1
               AND ($2::text IS NULL OR platform = $2)
               AND ($3::boolean IS NULL OR is_active = $3)
               AND ($4::text IS NULL OR headline ILIKE $4 OR description ILIKE $4)
             ORDER BY first_seen DESC,
                      array_position(
                          ARRAY['general-search', 'social', 'forum', 'professional-network'],
                          platform
                      ),
                      external_ad_id
             LIMIT $5
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(competitor_id)
            .bind(filter.platform.map(|p| p.as_str()))
            .bind(filter.is_active)
            .bind(search)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter().map(ad_from_row).collect()
    }
}

#[async_trait]
impl CompetitorDirectory for PgStore {
    async fn competitor(&self, id: Uuid) -> Result<Option<Competitor>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, name, domain, industries, keywords
              FROM competitors
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(competitor_from_row).transpose()
    }

    async fn competitors(&self) -> Result<Vec<Competitor>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, name, domain, industries, keywords
              FROM competitors
             ORDER BY name, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(competitor_from_row).collect()
    }
}

impl PgStore {
    async fn running_job_id(&self, competitor_id: Uuid) -> Result<Option<Uuid>, LedgerError> {
        let row = sqlx::query(
            "SELECT id FROM fetch_jobs WHERE competitor_id = $1 AND status = 'running' LIMIT 1",
        )
        .bind(competitor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ledger_backend)?;
        row.map(|r| r.try_get("id").map_err(ledger_backend))
            .transpose()
    }

    async fn write_job<'e, E>(executor: E, job: &FetchJob) -> Result<u64, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE fetch_jobs
               SET finished_at = $2,
                   status = $3,
                   outcomes = $4,
                   ads_inserted = $5,
                   ads_updated = $6,
                   ads_deactivated = $7
             WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job.id)
        .bind(job.finished_at)
        .bind(job.status.as_str())
        .bind(Json(&job.outcomes))
        .bind(clamp_i32(job.ads_inserted))
        .bind(clamp_i32(job.ads_updated))
        .bind(clamp_i32(job.ads_deactivated))
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl FetchJobLedger for PgStore {
    async fn begin(
        &self,
        competitor_id: Uuid,
        platforms: &[Platform],
        started_at: DateTime<Utc>,
    ) -> Result<FetchJob, LedgerError> {
        let job = FetchJob::start(competitor_id, platforms, started_at);
        let inserted = sqlx::query(
            r#"
            INSERT INTO fetch_jobs (id, competitor_id, started_at, status, outcomes)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job.id)
        .bind(job.competitor_id)
        .bind(job.started_at)
        .bind(job.status.as_str())
        .bind(Json(&job.outcomes))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(job),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let job_id = self.running_job_id(competitor_id).await?.unwrap_or(Uuid::nil());
                Err(LedgerError::AlreadyRunning {
                    competitor_id,
                    job_id,
                })
            }
            Err(err) => Err(ledger_backend(err)),
        }
    }

    async fn finish(&self, job: &FetchJob) -> Result<(), LedgerError> {
        let affected = Self::write_job(&self.pool, job)
            .await
            .map_err(ledger_backend)?;
        if affected == 0 {
            let exists = sqlx::query("SELECT 1 FROM fetch_jobs WHERE id = $1")
                .bind(job.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(ledger_backend)?
                .is_some();
            if !exists {
                return Err(LedgerError::NotFound(job.id));
            }
            warn!(job_id = %job.id, "job already settled; result not recorded");
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<FetchJob>, LedgerError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM fetch_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ledger_backend)?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_for_competitor(
        &self,
        competitor_id: Uuid,
        limit: usize,
    ) -> Result<Vec<FetchJob>, LedgerError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM fetch_jobs WHERE competitor_id = $1 \
             ORDER BY started_at DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(competitor_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(ledger_backend)?;
        rows.iter().map(job_from_row).collect()
    }

    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<FetchJob>, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(ledger_backend)?;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM fetch_jobs \
             WHERE status = 'running' AND started_at < $1 FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(started_before)
            .fetch_all(&mut *tx)
            .await
            .map_err(ledger_backend)?;

        let mut recovered = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut job = job_from_row(row)?;
            mark_stale(&mut job, now);
            Self::write_job(&mut *tx, &job)
                .await
                .map_err(ledger_backend)?;
            debug!(job_id = %job.id, competitor_id = %job.competitor_id, "stale job failed");
            recovered.push(job);
        }
        tx.commit().await.map_err(ledger_backend)?;
        Ok(recovered)
    }
}
