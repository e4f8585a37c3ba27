// End-to-end pipeline: feed ingestion → divergence check → fusion →
// write-back → rollups → alerts, through the batch driver.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use cloakwatch::alerts::Alerter;
use cloakwatch::batch::{BatchDriver, BatchOptions};
use cloakwatch::engine::suspicion::SuspicionScorer;
use cloakwatch::engine::winning;
use cloakwatch::notify::{NotifyHub, Topic};
use cloakwatch::records::{
    Ad, AdFeedRecord, AdStatus, AlertType, CheckError, MediaType, RiskBand, ScheduleType,
    Snapshot, TaskRequest, TaskType,
};
use cloakwatch::state::store::{AdState, SnapshotSource};

fn ad(id: &str, advertiser: &str, domain: &str, url: &str) -> Ad {
    Ad {
        id: id.to_string(),
        advertiser_id: advertiser.to_string(),
        domain: domain.to_string(),
        headline: "Great product".to_string(),
        body: "An ordinary advertisement".to_string(),
        media_type: MediaType::Image,
        status: AdStatus::Active,
        countries: vec!["US".to_string(), "DE".to_string()],
        start_date: Utc::now() - chrono::Duration::days(30),
        end_date: None,
        engagement_score: 50.0,
        suspicion_score: 0,
        is_cloaked: false,
        white_url: url.to_string(),
        detected_black_url: None,
        redirect_chain: vec![],
    }
}

fn snap(condition: &str, preview: &str) -> Snapshot {
    Snapshot {
        condition: condition.to_string(),
        captured_at: Utc::now(),
        content_hash: cloakwatch::signals::divergence::content_hash(preview),
        preview: preview.to_string(),
    }
}

fn record(ad: Ad, snapshots: Vec<Snapshot>) -> AdFeedRecord {
    AdFeedRecord {
        ad,
        snapshots,
        reputation_risk: None,
        label: None,
    }
}

fn driver_over(state: Arc<AdState>, opts: BatchOptions) -> Arc<BatchDriver<AdState>> {
    let alerter = Arc::new(Alerter::new(Arc::clone(&state), None::<PathBuf>));
    Arc::new(BatchDriver::new(
        Arc::clone(&state),
        Arc::clone(&state),
        SuspicionScorer::default(),
        alerter,
        Arc::new(NotifyHub::new()),
        Default::default(),
        opts,
        "test-tenant",
    ))
}

fn divergence_request() -> TaskRequest {
    TaskRequest {
        task_type: TaskType::DivergenceTest,
        schedule_type: ScheduleType::Daily,
    }
}

// ── End-to-end divergence → score → flag ─────────────────────────────────────

#[tokio::test]
async fn diverging_ad_is_scored_high_and_flagged() {
    let state = Arc::new(AdState::new());
    let driver = driver_over(Arc::clone(&state), BatchOptions::default());

    driver
        .ingest(&record(
            ad("ad-1", "adv-1", "shop.example.com", "https://shop.example.com/landing"),
            vec![
                snap("US+mobile", "Congratulations you won claim your prize now"),
                snap("EU+desktop", "Plain corporate info page about our company history"),
            ],
        ))
        .await;

    let report = driver.run(divergence_request()).await;
    assert!(report.success);
    assert_eq!(report.processed_count, 1);
    assert_eq!(report.divergences_found, 1);
    assert_eq!(report.errors_count, 0);

    let scored = state.ad("ad-1").unwrap();
    assert!(scored.suspicion_score >= 61, "got {}", scored.suspicion_score);
    assert_eq!(
        RiskBand::from_score(scored.suspicion_score),
        RiskBand::HighProbability
    );
    assert!(scored.is_cloaked);
    assert!(scored.detected_black_url.is_some());

    let alerts = state.alerts_newest_first();
    assert!(alerts
        .iter()
        .any(|a| a.alert_type == AlertType::HighSuspicion));
    assert!(alerts.iter().any(|a| a.alert_type == AlertType::NewAd));
}

#[tokio::test]
async fn clean_ad_stays_low_and_unflagged() {
    let state = Arc::new(AdState::new());
    let driver = driver_over(Arc::clone(&state), BatchOptions::default());

    driver
        .ingest(&record(
            ad("ad-2", "adv-1", "shop.example.com", "https://shop.example.com/landing"),
            vec![
                snap("US+mobile", "Same honest landing page for everyone"),
                snap("EU+desktop", "Same honest landing page for everyone"),
            ],
        ))
        .await;

    let report = driver.run(divergence_request()).await;
    assert_eq!(report.divergences_found, 0);

    let scored = state.ad("ad-2").unwrap();
    assert!(scored.suspicion_score <= 30);
    assert!(!scored.is_cloaked);
    assert!(scored.detected_black_url.is_none());
}

#[tokio::test]
async fn single_snapshot_cannot_judge() {
    let state = Arc::new(AdState::new());
    let driver = driver_over(Arc::clone(&state), BatchOptions::default());

    driver
        .ingest(&record(
            ad("ad-3", "adv-2", "one.example.com", "https://one.example.com"),
            vec![snap("US+mobile", "only one capture")],
        ))
        .await;

    let report = driver.run(divergence_request()).await;
    assert_eq!(report.processed_count, 1);
    assert_eq!(report.divergences_found, 0);
    assert_eq!(report.errors_count, 0);
    assert!(!state.ad("ad-3").unwrap().is_cloaked);
}

// ── Alert dedup ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_runs_emit_one_high_suspicion_alert() {
    let state = Arc::new(AdState::new());
    let driver = driver_over(Arc::clone(&state), BatchOptions::default());

    let rec = record(
        ad("ad-4", "adv-3", "cloak.example.com", "https://cloak.example.com"),
        vec![
            snap("US+mobile", "Totally unrelated scam lure content here"),
            snap("EU+desktop", "Innocent looking review page for the policy team"),
        ],
    );
    driver.ingest(&rec).await;

    driver.run(divergence_request()).await;
    driver.run(divergence_request()).await;
    driver.run(divergence_request()).await;

    let high: Vec<_> = state
        .alerts_newest_first()
        .into_iter()
        .filter(|a| a.alert_type == AlertType::HighSuspicion)
        .collect();
    assert_eq!(high.len(), 1, "dedup window must suppress repeats");

    // Re-ingesting the same ad is not "new" either.
    driver.ingest(&rec).await;
    let new_ads: Vec<_> = state
        .alerts_newest_first()
        .into_iter()
        .filter(|a| a.alert_type == AlertType::NewAd)
        .collect();
    assert_eq!(new_ads.len(), 1);
}

// ── Failure semantics ─────────────────────────────────────────────────────────

struct FlakySource {
    failing: AtomicBool,
}

impl SnapshotSource for FlakySource {
    fn fetch_snapshots(
        &self,
        _ad_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Snapshot>, CheckError>> + Send {
        let fail = self.failing.load(Ordering::Relaxed);
        async move {
            if fail {
                Err(CheckError::FetchFailed("upstream 503".into()))
            } else {
                Ok(vec![])
            }
        }
    }
}

#[tokio::test]
async fn fetch_failures_count_without_aborting_and_recovery_alerts() {
    let state = Arc::new(AdState::new());
    let source = Arc::new(FlakySource {
        failing: AtomicBool::new(true),
    });
    let alerter = Arc::new(Alerter::new(Arc::clone(&state), None::<PathBuf>));
    let driver = Arc::new(BatchDriver::new(
        Arc::clone(&state),
        source.clone(),
        SuspicionScorer::default(),
        alerter,
        Arc::new(NotifyHub::new()),
        Default::default(),
        BatchOptions::default(),
        "test-tenant",
    ));

    for i in 0..3 {
        driver
            .ingest(&record(
                ad(&format!("ad-f{i}"), "adv-9", "f.example.com", "https://f.example.com"),
                vec![],
            ))
            .await;
    }

    let failed = driver.run(divergence_request()).await;
    assert!(!failed.success);
    assert_eq!(failed.errors_count, 3);
    assert_eq!(failed.processed_count, 0);

    // Upstream comes back; the next clean run raises api_recovery.
    source.failing.store(false, Ordering::Relaxed);
    let clean = driver.run(divergence_request()).await;
    assert!(clean.success);
    assert_eq!(clean.errors_count, 0);
    assert_eq!(clean.processed_count, 3);

    assert!(state
        .alerts_newest_first()
        .iter()
        .any(|a| a.alert_type == AlertType::ApiRecovery));
}

#[tokio::test]
async fn invalid_target_is_counted_but_not_an_error() {
    let state = Arc::new(AdState::new());
    let driver = driver_over(Arc::clone(&state), BatchOptions::default());

    driver
        .ingest(&record(
            ad("ad-5", "adv-4", "internal", "http://192.168.1.1/panel"),
            vec![
                snap("US+mobile", "whatever"),
                snap("EU+desktop", "whatever else entirely different"),
            ],
        ))
        .await;

    let report = driver.run(divergence_request()).await;
    assert!(report.success);
    assert_eq!(report.processed_count, 1);
    assert_eq!(report.invalid_targets, 1);
    assert_eq!(report.errors_count, 0);
    // No score was written for the rejected target.
    assert_eq!(state.ad("ad-5").unwrap().suspicion_score, 0);
}

#[tokio::test]
async fn zero_budget_skips_everything() {
    let state = Arc::new(AdState::new());
    let driver = driver_over(
        Arc::clone(&state),
        BatchOptions {
            wall_budget: Duration::ZERO,
            ..Default::default()
        },
    );

    for i in 0..5 {
        driver
            .ingest(&record(
                ad(&format!("ad-b{i}"), "adv-5", "b.example.com", "https://b.example.com"),
                vec![],
            ))
            .await;
    }

    let report = driver.run(divergence_request()).await;
    assert_eq!(report.processed_count, 0);
    assert_eq!(report.skipped_count, 5);
}

// ── Rollups ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rollups_are_means_of_current_scores() {
    let state = Arc::new(AdState::new());
    let driver = driver_over(Arc::clone(&state), BatchOptions::default());

    // One cloaked, one clean, same advertiser, two domains.
    driver
        .ingest(&record(
            ad("ad-r1", "adv-r", "bad.example.com", "https://bad.example.com"),
            vec![
                snap("US+mobile", "miracle cure doctors hate this trick"),
                snap("EU+desktop", "boring compliance friendly storefront page"),
            ],
        ))
        .await;
    driver
        .ingest(&record(
            ad("ad-r2", "adv-r", "good.example.com", "https://good.example.com"),
            vec![
                snap("US+mobile", "identical page"),
                snap("EU+desktop", "identical page"),
            ],
        ))
        .await;

    driver.run(divergence_request()).await;

    let s1 = state.ad("ad-r1").unwrap().suspicion_score;
    let s2 = state.ad("ad-r2").unwrap().suspicion_score;

    let rollup = state.advertisers.get("adv-r").unwrap();
    assert_eq!(rollup.total_ads, 2);
    assert_eq!(rollup.active_ads, 2);
    assert_eq!(rollup.domains_count, 2);
    let expected = (s1 as f64 + s2 as f64) / 2.0;
    assert!((rollup.avg_suspicion_score - expected).abs() < 1e-9);

    let dom = state.domains.get("bad.example.com").unwrap();
    assert_eq!(dom.total_ads, 1);
    assert!((dom.suspicion_score - s1 as f64).abs() < 1e-9);
}

#[tokio::test]
async fn rollup_publishes_invalidation() {
    let state = Arc::new(AdState::new());
    let hub = Arc::new(NotifyHub::new());
    let alerter = Arc::new(Alerter::new(Arc::clone(&state), None::<PathBuf>));
    let driver = Arc::new(BatchDriver::new(
        Arc::clone(&state),
        Arc::clone(&state),
        SuspicionScorer::default(),
        alerter,
        Arc::clone(&hub),
        Default::default(),
        BatchOptions::default(),
        "test-tenant",
    ));

    let mut rx = hub.subscribe(Topic::Rollups);
    driver
        .ingest(&record(
            ad("ad-n1", "adv-n", "n.example.com", "https://n.example.com"),
            vec![],
        ))
        .await;
    driver.run(divergence_request()).await;

    let inv = rx.try_recv().expect("rollup invalidation expected");
    assert_eq!(inv.topic, Topic::Rollups);
}

// ── Status check ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn status_check_expires_ended_ads() {
    let state = Arc::new(AdState::new());
    let driver = driver_over(Arc::clone(&state), BatchOptions::default());

    let mut ended = ad("ad-e1", "adv-e", "e.example.com", "https://e.example.com");
    ended.end_date = Some(Utc::now() - chrono::Duration::days(2));
    driver.ingest(&record(ended, vec![])).await;
    driver
        .ingest(&record(
            ad("ad-e2", "adv-e", "e.example.com", "https://e.example.com"),
            vec![],
        ))
        .await;

    let report = driver
        .run(TaskRequest {
            task_type: TaskType::StatusCheck,
            schedule_type: ScheduleType::Intraday,
        })
        .await;
    assert!(report.success);
    assert_eq!(report.processed_count, 2);

    assert_eq!(state.ad("ad-e1").unwrap().status, AdStatus::Inactive);
    assert_eq!(state.ad("ad-e2").unwrap().status, AdStatus::Active);
}

// ── Winning stats over a population ───────────────────────────────────────────

#[tokio::test]
async fn winning_stats_reduce_over_current_ads() {
    let state = Arc::new(AdState::new());
    let driver = driver_over(Arc::clone(&state), BatchOptions::default());

    let mut old_strong = ad("ad-w1", "adv-w", "w.example.com", "https://w.example.com");
    old_strong.start_date = Utc::now() - chrono::Duration::days(90);
    old_strong.engagement_score = 100.0; // total 100 → champion
    driver.ingest(&record(old_strong, vec![])).await;

    let mut fresh = ad("ad-w2", "adv-w", "w.example.com", "https://w.example.com");
    fresh.start_date = Utc::now();
    fresh.engagement_score = 0.0; // total 0 → testing
    driver.ingest(&record(fresh, vec![])).await;

    let ads = state.all_ads();
    let stats = winning::stats(ads.iter(), Utc::now());
    assert_eq!(stats.champions, 1);
    assert_eq!(stats.testing, 1);
    assert_eq!(stats.winners, 1);
    assert!((stats.avg_total - 50.0).abs() < 1.0);
}
