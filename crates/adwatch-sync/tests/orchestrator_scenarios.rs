use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adwatch_adapters::{
    default_adapters, AdapterContext, AdapterErrorKind, AdapterLimits, FetchResult,
    PlatformAdapter, Upstream,
};
use adwatch_core::{
    Ad, AdDraft, Competitor, FetchJob, FetchJobStatus, MediaFormat, OutcomeStatus, Platform,
};
use adwatch_metrics::MetricsEngine;
use adwatch_storage::{
    AdFilter, AdStore, Backend, CompetitorDirectory, FetchJobLedger, LedgerError, MemoryStore,
    StoreError, UpsertOutcome,
};
use adwatch_sync::{AdwatchService, FetchOrchestrator, OrchestratorError, OrchestratorSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Notify;
use uuid::Uuid;

/// Plays back one response per call, repeating the last one when the
/// script runs out.
struct ScriptedAdapter {
    platform: Platform,
    script: Mutex<Vec<FetchResult>>,
}

impl ScriptedAdapter {
    fn new(platform: Platform, script: Vec<FetchResult>) -> Arc<Self> {
        Arc::new(Self {
            platform,
            script: Mutex::new(script),
        })
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch(&self, _ctx: &AdapterContext, _competitor: &Competitor) -> FetchResult {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.remove(0)
        } else {
            script[0].clone()
        }
    }
}

/// Signals when it is entered, then waits until released.
struct GateAdapter {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl PlatformAdapter for GateAdapter {
    fn platform(&self) -> Platform {
        Platform::Forum
    }

    async fn fetch(&self, _ctx: &AdapterContext, _competitor: &Competitor) -> FetchResult {
        self.entered.notify_one();
        self.release.notified().await;
        FetchResult::Ok { ads: vec![] }
    }
}

/// Memory store whose ad writes fail on demand: the first `conflicts`
/// upserts report a write conflict, and every upsert for `broken` fails
/// with a backend error.
struct FlakyStore {
    inner: MemoryStore,
    conflicts: AtomicUsize,
    broken: Option<Platform>,
    upserts: AtomicUsize,
}

impl FlakyStore {
    fn new(competitor: &Competitor, conflicts: usize, broken: Option<Platform>) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::with_competitors([competitor.clone()]),
            conflicts: AtomicUsize::new(conflicts),
            broken,
            upserts: AtomicUsize::new(0),
        })
    }

    fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdStore for FlakyStore {
    async fn upsert_ad(
        &self,
        competitor_id: Uuid,
        draft: &AdDraft,
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.broken == Some(draft.platform) {
            return Err(StoreError::Backend("connection reset by peer".into()));
        }
        let conflicted = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            return Err(StoreError::Conflict(draft.external_ad_id.clone()));
        }
        self.inner.upsert_ad(competitor_id, draft, observed_at).await
    }

    async fn mark_missing_inactive(
        &self,
        competitor_id: Uuid,
        platform: Platform,
        seen: &HashSet<String>,
    ) -> Result<u64, StoreError> {
        self.inner
            .mark_missing_inactive(competitor_id, platform, seen)
            .await
    }

    async fn list_ads(&self, competitor_id: Uuid, filter: &AdFilter) -> Result<Vec<Ad>, StoreError> {
        self.inner.list_ads(competitor_id, filter).await
    }
}

#[async_trait]
impl CompetitorDirectory for FlakyStore {
    async fn competitor(&self, id: Uuid) -> Result<Option<Competitor>, StoreError> {
        self.inner.competitor(id).await
    }

    async fn competitors(&self) -> Result<Vec<Competitor>, StoreError> {
        self.inner.competitors().await
    }
}

#[async_trait]
impl FetchJobLedger for FlakyStore {
    async fn begin(
        &self,
        competitor_id: Uuid,
        platforms: &[Platform],
        started_at: DateTime<Utc>,
    ) -> Result<FetchJob, LedgerError> {
        self.inner.begin(competitor_id, platforms, started_at).await
    }

    async fn finish(&self, job: &FetchJob) -> Result<(), LedgerError> {
        self.inner.finish(job).await
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<FetchJob>, LedgerError> {
        self.inner.get(job_id).await
    }

    async fn list_for_competitor(
        &self,
        competitor_id: Uuid,
        limit: usize,
    ) -> Result<Vec<FetchJob>, LedgerError> {
        self.inner.list_for_competitor(competitor_id, limit).await
    }

    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<FetchJob>, LedgerError> {
        self.inner.fail_stale(started_before, now).await
    }
}

struct PanickingAdapter;

#[async_trait]
impl PlatformAdapter for PanickingAdapter {
    fn platform(&self) -> Platform {
        Platform::ProfessionalNetwork
    }

    async fn fetch(&self, _ctx: &AdapterContext, _competitor: &Competitor) -> FetchResult {
        panic!("upstream parser bug");
    }
}

fn draft(platform: Platform, id: &str, headline: &str, format: Option<MediaFormat>) -> AdDraft {
    AdDraft {
        platform,
        external_ad_id: id.into(),
        headline: Some(headline.into()),
        description: Some("Light trail shoes".into()),
        destination_url: Some("https://northwind.test".into()),
        media_format: format,
        impressions: Some(4000),
        engagement: None,
        raw_payload: json!({"id": id}),
    }
}

fn ok(ads: Vec<AdDraft>) -> FetchResult {
    FetchResult::Ok { ads }
}

fn timeout() -> FetchResult {
    FetchResult::Error {
        kind: AdapterErrorKind::Timeout,
        message: "social did not finish within 45s".into(),
    }
}

fn competitor() -> Competitor {
    Competitor {
        id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        name: "Northwind Outfitters".into(),
        domain: Some("northwind.test".into()),
        industries: vec!["Retail".into(), "Fitness".into()],
        keywords: vec!["trail shoes".into()],
    }
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        adapter_timeout: Duration::from_secs(5),
        stale_after: Duration::from_secs(900),
        batch_pause: Duration::ZERO,
        job_history_limit: 20,
    }
}

fn orchestrator(
    store: &Arc<MemoryStore>,
    adapters: Vec<Arc<dyn PlatformAdapter>>,
) -> FetchOrchestrator {
    orchestrator_over(store.clone(), adapters)
}

fn orchestrator_over(
    backend: Arc<dyn Backend>,
    adapters: Vec<Arc<dyn PlatformAdapter>>,
) -> FetchOrchestrator {
    let adapters: BTreeMap<Platform, Arc<dyn PlatformAdapter>> =
        adapters.into_iter().map(|a| (a.platform(), a)).collect();
    FetchOrchestrator::new(backend, adapters, settings())
}

async fn latest_job(ledger: &dyn FetchJobLedger, competitor_id: Uuid) -> FetchJob {
    ledger
        .list_for_competitor(competitor_id, 1)
        .await
        .unwrap()
        .remove(0)
}

fn search_batch() -> Vec<AdDraft> {
    vec![
        draft(Platform::GeneralSearch, "g-1", "Trail shoes", Some(MediaFormat::Image)),
        draft(Platform::GeneralSearch, "g-2", "Rain shells", None),
        draft(Platform::GeneralSearch, "g-vid", "See it run", Some(MediaFormat::Video)),
    ]
}

#[tokio::test]
async fn errored_platform_leaves_its_ads_untouched_and_job_is_partial() {
    let northwind = competitor();
    let store = Arc::new(MemoryStore::with_competitors([northwind.clone()]));
    let orch = orchestrator(
        &store,
        vec![
            ScriptedAdapter::new(Platform::GeneralSearch, vec![ok(search_batch())]),
            ScriptedAdapter::new(
                Platform::Social,
                vec![
                    ok(vec![draft(Platform::Social, "s-1", "Summer drop", None)]),
                    timeout(),
                ],
            ),
            ScriptedAdapter::new(Platform::Forum, vec![ok(vec![])]),
        ],
    );

    let first = orch.run_fetch(northwind.id).await.unwrap();
    assert_eq!(first.status, FetchJobStatus::Completed);

    let job = orch.run_fetch(northwind.id).await.unwrap();
    assert_eq!(job.status, FetchJobStatus::Partial);
    assert_eq!(job.summary(), "partial: completed with 2/3 platforms succeeding");
    let social = job
        .outcomes
        .iter()
        .find(|o| o.platform == Platform::Social)
        .unwrap();
    assert_eq!(social.status, OutcomeStatus::Error);
    assert_eq!(social.error_kind.as_deref(), Some("timeout"));
    assert_eq!(job.ads_deactivated, 0);

    let ads = store
        .list_ads(northwind.id, &AdFilter::default())
        .await
        .unwrap();
    assert_eq!(ads.len(), 4);
    assert!(ads.iter().all(|ad| ad.is_active));

    let engine = MetricsEngine::default();
    let bundle = engine.competitor_metrics(&northwind, &ads);
    let video = bundle
        .ads
        .iter()
        .find(|m| m.external_ad_id == "g-vid")
        .unwrap();
    let ctr = *video.ctr.value().unwrap();
    assert!((ctr - (0.02 + 0.01 + 0.005)).abs() < 1e-9);
}

#[tokio::test]
async fn identical_rerun_only_bumps_last_seen() {
    let northwind = competitor();
    let store = Arc::new(MemoryStore::with_competitors([northwind.clone()]));
    let orch = orchestrator(
        &store,
        vec![ScriptedAdapter::new(Platform::GeneralSearch, vec![ok(search_batch())])],
    );

    let first = orch.run_fetch(northwind.id).await.unwrap();
    assert_eq!(first.ads_inserted, 3);
    let before = store
        .list_ads(northwind.id, &AdFilter::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = orch.run_fetch(northwind.id).await.unwrap();
    assert_eq!((second.ads_inserted, second.ads_updated), (0, 3));

    let after = store
        .list_ads(northwind.id, &AdFilter::default())
        .await
        .unwrap();
    assert_eq!(after.len(), before.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.id, new.id);
        assert_eq!(old.first_seen, new.first_seen);
        assert!(new.last_seen > old.last_seen);
    }
}

#[tokio::test]
async fn vanished_ad_goes_inactive_and_returns_with_original_first_seen() {
    let northwind = competitor();
    let store = Arc::new(MemoryStore::with_competitors([northwind.clone()]));
    let both = vec![
        draft(Platform::Forum, "f-1", "Ask us anything", None),
        draft(Platform::Forum, "f-2", "Trail meetup", None),
    ];
    let orch = orchestrator(
        &store,
        vec![ScriptedAdapter::new(
            Platform::Forum,
            vec![ok(both.clone()), ok(both[..1].to_vec()), ok(both)],
        )],
    );

    orch.run_fetch(northwind.id).await.unwrap();
    let original = store
        .list_ads(northwind.id, &AdFilter::default())
        .await
        .unwrap()
        .into_iter()
        .find(|ad| ad.external_ad_id == "f-2")
        .unwrap();

    let second = orch.run_fetch(northwind.id).await.unwrap();
    assert_eq!(second.ads_deactivated, 1);
    let inactive = store
        .list_ads(
            northwind.id,
            &AdFilter {
                is_active: Some(false),
                ..AdFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(inactive.len(), 1);
    assert_eq!(inactive[0].external_ad_id, "f-2");

    orch.run_fetch(northwind.id).await.unwrap();
    let back = store
        .list_ads(northwind.id, &AdFilter::active())
        .await
        .unwrap();
    assert_eq!(back.len(), 2);
    let returned = back.iter().find(|ad| ad.external_ad_id == "f-2").unwrap();
    assert_eq!(returned.first_seen, original.first_seen);
    assert_eq!(returned.id, original.id);
}

#[tokio::test]
async fn repeated_ids_in_one_response_are_stored_once() {
    let northwind = competitor();
    let store = Arc::new(MemoryStore::with_competitors([northwind.clone()]));
    let orch = orchestrator(
        &store,
        vec![ScriptedAdapter::new(
            Platform::Social,
            vec![ok(vec![
                draft(Platform::Social, "s-1", "Old copy", None),
                draft(Platform::Social, "s-1", "New copy", None),
            ])],
        )],
    );

    let job = orch.run_fetch(northwind.id).await.unwrap();
    assert_eq!(job.ads_inserted, 1);
    let ads = store
        .list_ads(northwind.id, &AdFilter::default())
        .await
        .unwrap();
    assert_eq!(ads.len(), 1);
    assert_eq!(ads[0].headline.as_deref(), Some("New copy"));
}

#[tokio::test]
async fn concurrent_trigger_is_rejected_without_a_second_job() {
    let northwind = competitor();
    let store = Arc::new(MemoryStore::with_competitors([northwind.clone()]));
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let orch = Arc::new(orchestrator(
        &store,
        vec![Arc::new(GateAdapter {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        })],
    ));

    let running = {
        let orch = Arc::clone(&orch);
        let id = northwind.id;
        tokio::spawn(async move { orch.run_fetch(id).await })
    };
    entered.notified().await;

    let second = orch.run_fetch(northwind.id).await;
    assert!(matches!(
        second,
        Err(OrchestratorError::AlreadyRunning { competitor_id, .. }) if competitor_id == northwind.id
    ));
    assert_eq!(store.job_count().await, 1);

    release.notify_one();
    let job = running.await.unwrap().unwrap();
    assert_eq!(job.status, FetchJobStatus::Completed);

    // The lock is released once the first job finishes.
    let entered_again = Arc::clone(&entered);
    let rerun = {
        let orch = Arc::clone(&orch);
        let id = northwind.id;
        tokio::spawn(async move { orch.run_fetch(id).await })
    };
    entered_again.notified().await;
    release.notify_one();
    assert!(rerun.await.unwrap().is_ok());
}

#[tokio::test]
async fn running_ledger_row_from_elsewhere_blocks_the_run() {
    let northwind = competitor();
    let store = Arc::new(MemoryStore::with_competitors([northwind.clone()]));
    let foreign = store
        .begin(northwind.id, &[Platform::Forum], Utc::now())
        .await
        .unwrap();
    let orch = orchestrator(
        &store,
        vec![ScriptedAdapter::new(Platform::Forum, vec![ok(vec![])])],
    );

    let err = orch.run_fetch(northwind.id).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::AlreadyRunning { job_id: Some(id), .. } if id == foreign.id
    ));
    assert_eq!(store.job_count().await, 1);
}

#[tokio::test]
async fn stale_running_job_is_recovered_and_unblocks_fetches() {
    let northwind = competitor();
    let store = Arc::new(MemoryStore::with_competitors([northwind.clone()]));
    let stale = store
        .begin(
            northwind.id,
            &[Platform::Forum],
            Utc::now() - chrono::Duration::hours(2),
        )
        .await
        .unwrap();
    let orch = orchestrator(
        &store,
        vec![ScriptedAdapter::new(Platform::Forum, vec![ok(vec![])])],
    );

    assert_eq!(orch.recover_stale_jobs().await.unwrap(), vec![stale.id]);
    let recovered = store.get(stale.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, FetchJobStatus::Failed);
    assert!(recovered.finished_at.is_some());

    assert!(orch.recover_stale_jobs().await.unwrap().is_empty());
    assert!(orch.run_fetch(northwind.id).await.is_ok());
}

#[tokio::test]
async fn panicking_adapter_becomes_an_error_outcome() {
    let northwind = competitor();
    let store = Arc::new(MemoryStore::with_competitors([northwind.clone()]));
    let orch = orchestrator(
        &store,
        vec![
            ScriptedAdapter::new(Platform::GeneralSearch, vec![ok(search_batch())]),
            Arc::new(PanickingAdapter),
        ],
    );

    let job = orch.run_fetch(northwind.id).await.unwrap();
    assert_eq!(job.status, FetchJobStatus::Partial);
    assert_eq!(job.ads_inserted, 3);
}

#[tokio::test]
async fn unknown_competitor_is_rejected_before_any_job() {
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(
        &store,
        vec![ScriptedAdapter::new(Platform::Forum, vec![ok(vec![])])],
    );
    let missing = Uuid::new_v4();
    assert!(matches!(
        orch.run_fetch(missing).await,
        Err(OrchestratorError::CompetitorNotFound(id)) if id == missing
    ));
    assert_eq!(store.job_count().await, 0);
}

#[tokio::test]
async fn fetch_all_reports_every_competitor() {
    let a = competitor();
    let mut b = competitor();
    b.name = "Acme Trail Co".into();
    let store = Arc::new(MemoryStore::with_competitors([a.clone(), b.clone()]));
    let orch = orchestrator(
        &store,
        vec![ScriptedAdapter::new(Platform::GeneralSearch, vec![ok(search_batch())])],
    );

    let results = orch.run_fetch_all().await;
    let ids: Vec<Uuid> = results.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(store.ad_count().await, 6);
}

#[tokio::test]
async fn recorded_fixtures_drive_a_full_service_cycle() {
    let northwind = competitor();
    let store = Arc::new(MemoryStore::with_competitors([northwind.clone()]));
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures");
    let service = AdwatchService::new(
        store.clone(),
        default_adapters(&Upstream::fixtures(fixtures), AdapterLimits::default()),
        MetricsEngine::default(),
        settings(),
    );

    let job = service.run_fetch(northwind.id).await.unwrap();
    assert_eq!(job.status, FetchJobStatus::Completed);
    assert_eq!(job.ads_inserted, 9);
    assert_eq!(service.fetch_job(job.id).await.unwrap(), job);
    assert_eq!(service.fetch_jobs(northwind.id, None).await.unwrap().len(), 1);

    let first = serde_json::to_string(&service.get_metrics(northwind.id).await.unwrap()).unwrap();
    let second = serde_json::to_string(&service.get_metrics(northwind.id).await.unwrap()).unwrap();
    assert_eq!(first, second);

    let bundle = service.get_metrics(northwind.id).await.unwrap();
    assert_eq!(bundle.total_ads, 9);
    assert_eq!(bundle.active_ads, 9);
    assert!(bundle
        .audience_clusters
        .contains(&"Fitness Enthusiasts".to_string()));

    let videos = service
        .list_ads(
            northwind.id,
            &AdFilter {
                platform: Some(Platform::GeneralSearch),
                ..AdFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(videos.len(), 3);
}

#[tokio::test]
async fn abandoned_caller_does_not_leave_the_job_running() {
    let northwind = competitor();
    let store = Arc::new(MemoryStore::with_competitors([northwind.clone()]));
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let orch = orchestrator(
        &store,
        vec![Arc::new(GateAdapter {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        })],
    );

    // The caller gives up while the adapter is still blocked.
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), orch.run_fetch(northwind.id)).await;
    assert!(abandoned.is_err());
    release.notify_one();

    for _ in 0..200 {
        if !orch.is_fetching(northwind.id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!orch.is_fetching(northwind.id));
    let job = latest_job(store.as_ref(), northwind.id).await;
    assert_eq!(job.status, FetchJobStatus::Completed);
    assert!(job.finished_at.is_some());

    release.notify_one();
    let next = orch.run_fetch(northwind.id).await.unwrap();
    assert_eq!(next.status, FetchJobStatus::Completed);
    assert_eq!(store.job_count().await, 2);
}

#[tokio::test]
async fn single_write_conflict_is_retried() {
    let northwind = competitor();
    let store = FlakyStore::new(&northwind, 1, None);
    let orch = orchestrator_over(
        store.clone(),
        vec![ScriptedAdapter::new(Platform::GeneralSearch, vec![ok(search_batch())])],
    );

    let job = orch.run_fetch(northwind.id).await.unwrap();
    assert_eq!(job.status, FetchJobStatus::Completed);
    assert_eq!(job.ads_inserted, 3);
    assert_eq!(store.upsert_calls(), 4);
    assert_eq!(store.inner.ad_count().await, 3);
}

#[tokio::test]
async fn repeated_write_conflict_fails_the_run_and_settles_the_job() {
    let northwind = competitor();
    let store = FlakyStore::new(&northwind, 2, None);
    let orch = orchestrator_over(
        store.clone(),
        vec![ScriptedAdapter::new(Platform::GeneralSearch, vec![ok(search_batch())])],
    );

    let err = orch.run_fetch(northwind.id).await.unwrap_err();
    assert!(matches!(&err, OrchestratorError::Persistence(msg) if msg.contains("conflict")));
    assert_eq!(store.upsert_calls(), 2);

    let job = latest_job(store.as_ref(), northwind.id).await;
    assert_eq!(job.status, FetchJobStatus::Failed);
    assert_eq!(job.summary(), "failed: 0/1 platforms succeeded");
    assert_eq!(job.outcomes[0].error_kind.as_deref(), Some("persistence"));

    // Conflicts are spent; the competitor is not left blocked.
    let retry = orch.run_fetch(northwind.id).await.unwrap();
    assert_eq!(retry.status, FetchJobStatus::Completed);
}

#[tokio::test]
async fn backend_failure_stops_writes_for_later_platforms() {
    let northwind = competitor();
    let store = FlakyStore::new(&northwind, 0, Some(Platform::Social));
    let orch = orchestrator_over(
        store.clone(),
        vec![
            ScriptedAdapter::new(Platform::GeneralSearch, vec![ok(search_batch())]),
            ScriptedAdapter::new(
                Platform::Social,
                vec![ok(vec![draft(Platform::Social, "s-1", "Summer drop", None)])],
            ),
            ScriptedAdapter::new(
                Platform::Forum,
                vec![ok(vec![draft(Platform::Forum, "f-1", "Ask us anything", None)])],
            ),
        ],
    );

    let err = orch.run_fetch(northwind.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Persistence(_)));

    let job = latest_job(store.as_ref(), northwind.id).await;
    assert_eq!(job.status, FetchJobStatus::Partial);
    assert_eq!(job.summary(), "partial: completed with 1/3 platforms succeeding");
    assert_eq!(job.ads_inserted, 3);
    for platform in [Platform::Social, Platform::Forum] {
        let outcome = job.outcomes.iter().find(|o| o.platform == platform).unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.error_kind.as_deref(), Some("persistence"));
    }

    let ads = store
        .list_ads(northwind.id, &AdFilter::default())
        .await
        .unwrap();
    assert_eq!(ads.len(), 3);
    assert!(ads.iter().all(|ad| ad.platform == Platform::GeneralSearch));
    // One failed Social write; nothing was attempted for Forum.
    assert_eq!(store.upsert_calls(), 4);
}
