// cloakwatch/src/batch.rs
//
// Scheduled worker driver — the batch entry point the external scheduler
// invokes with { taskType, scheduleType }.
//
// Ads are processed independently: a single ad's fetch failure never aborts
// the batch, it only bumps the run's error count. Concurrency is bounded by
// a semaphore-gated worker pool; every snapshot fetch is timeout-bounded;
// the whole run carries a hard wall-clock budget — ads not reached when it
// expires are left for the next run (re-processing is idempotent).
//
// Rollups are recomputed once after the batch completes, never mid-batch,
// so readers cannot observe a half-updated mean.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::alerts::{AlertCandidate, Alerter};
use crate::engine::suspicion::SuspicionScorer;
use crate::engine::winning;
use crate::notify::{NotifyHub, Topic};
use crate::records::{
    AdFeedRecord, AlertSeverity, AlertType, BatchReport, CheckError, CheckStatus,
    SuspicionAssessment, TaskRequest, TaskType,
};
use crate::signals;
use crate::signals::divergence::{self, NormalizePolicy};
use crate::state::store::{AdState, SnapshotSource};

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub per_ad_timeout: Duration,
    pub wall_budget: Duration,
    /// Extra attempts after a failed fetch, before it counts on the run.
    pub fetch_retries: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            per_ad_timeout: Duration::from_secs(10),
            wall_budget: Duration::from_secs(300),
            fetch_retries: 1,
        }
    }
}

/// Terminal per-ad outcome within one run.
#[derive(Debug)]
pub enum AdOutcome {
    Scored(SuspicionAssessment),
    InvalidTarget,
    FetchFailed,
    WriteFailed,
    Missing,
}

pub struct BatchDriver<S: SnapshotSource + 'static> {
    pub state: Arc<AdState>,
    source: Arc<S>,
    scorer: SuspicionScorer,
    alerter: Arc<Alerter>,
    hub: Arc<NotifyHub>,
    policy: NormalizePolicy,
    opts: BatchOptions,
    tenant_id: String,
    /// Error count of the previous run — drives api_recovery alerts.
    last_run_errors: AtomicUsize,
}

impl<S: SnapshotSource + 'static> BatchDriver<S> {
    pub fn new(
        state: Arc<AdState>,
        source: Arc<S>,
        scorer: SuspicionScorer,
        alerter: Arc<Alerter>,
        hub: Arc<NotifyHub>,
        policy: NormalizePolicy,
        opts: BatchOptions,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            state,
            source,
            scorer,
            alerter,
            hub,
            policy,
            opts,
            tenant_id: tenant_id.into(),
            last_run_errors: AtomicUsize::new(0),
        }
    }

    // ── Feed ingestion ────────────────────────────────────────────────────────

    /// Register one feed record: ad row, captures, reputation. New ads raise
    /// a new_ad alert (deduplicated like everything else).
    pub async fn ingest(&self, rec: &AdFeedRecord) {
        let is_new = self.state.upsert_ad(rec.ad.clone());
        self.state.add_snapshots(&rec.ad.id, rec.snapshots.clone());
        if let Some(rep) = rec.reputation_risk {
            self.state.set_reputation(&rec.ad.domain, rep);
        }

        if is_new {
            let res = self
                .alerter
                .offer(AlertCandidate {
                    tenant_id: self.tenant_id.clone(),
                    alert_type: AlertType::NewAd,
                    title: format!("New ad from {}", rec.ad.advertiser_id),
                    message: format!("\"{}\" targeting {}", rec.ad.headline, rec.ad.domain),
                    severity: AlertSeverity::Info,
                    related_ad_id: Some(rec.ad.id.clone()),
                    related_advertiser_id: Some(rec.ad.advertiser_id.clone()),
                    metadata: [("domain".to_string(), json!(rec.ad.domain))]
                        .into_iter()
                        .collect(),
                })
                .await;
            if let Err(e) = res {
                warn!("new_ad alert failed: {e}");
            }
        }
    }

    // ── Per-ad pipeline ───────────────────────────────────────────────────────

    /// Full check → fuse → write-back → alert pipeline for one ad.
    pub async fn process_ad(&self, ad_id: &str) -> AdOutcome {
        let ad = match self.state.ad(ad_id) {
            Some(a) => a,
            None => return AdOutcome::Missing,
        };

        // Snapshot acquisition is the only suspension point; it is
        // timeout-bounded and retried a bounded number of times here —
        // the engine itself never retries.
        let mut attempt = 0u32;
        let (status, snapshots) = loop {
            let fetched = tokio::time::timeout(
                self.opts.per_ad_timeout,
                divergence::check_with_snapshots(&ad, self.source.as_ref(), &self.policy),
            )
            .await
            .map_err(|_| CheckError::FetchFailed("timeout".into()))
            .and_then(|r| r);

            match fetched {
                Ok(pair) => break pair,
                Err(e) if attempt < self.opts.fetch_retries => {
                    attempt += 1;
                    debug!("fetch retry {attempt} for ad {ad_id}: {e}");
                }
                Err(e) => {
                    warn!("fetch failed for ad {ad_id}: {e}");
                    return AdOutcome::FetchFailed;
                }
            }
        };

        if let CheckStatus::InvalidTarget { ref reason } = status {
            warn!("invalid target for ad {ad_id}: {reason}");
            return AdOutcome::InvalidTarget;
        }

        let reputation = self.state.reputation(&ad.domain);
        let sigs = signals::gather(&ad, &status, &snapshots, reputation);
        let assessment = self.scorer.assess(&ad.id, &status, &sigs);

        let diverged = assessment.diverged;
        // The diverging content sits at the end of the crawler-observed
        // redirect chain; fall back to the declared target.
        let black_url = if diverged {
            Some(
                ad.redirect_chain
                    .last()
                    .cloned()
                    .unwrap_or_else(|| ad.white_url.clone()),
            )
        } else {
            None
        };

        // Score write is a single-row upsert; one retry, then it counts as a
        // run error — an unpersisted score would revert the band on read.
        let mut wrote = self
            .state
            .write_score(&ad.id, assessment.score, diverged, black_url.as_deref());
        if wrote.is_err() {
            wrote = self
                .state
                .write_score(&ad.id, assessment.score, diverged, black_url.as_deref());
        }
        if let Err(e) = wrote {
            warn!("score write failed for ad {ad_id}: {e}");
            return AdOutcome::WriteFailed;
        }

        self.state.record_check(diverged);
        self.hub.publish(Topic::AdScores, &ad.id);

        if assessment.band == crate::records::RiskBand::HighProbability {
            let res = self
                .alerter
                .offer(AlertCandidate {
                    tenant_id: self.tenant_id.clone(),
                    alert_type: AlertType::HighSuspicion,
                    title: format!("High cloaking suspicion: {}", ad.domain),
                    message: format!(
                        "Ad {} scored {} ({})",
                        ad.id, assessment.score, assessment.band
                    ),
                    severity: AlertSeverity::from_score(assessment.score),
                    related_ad_id: Some(ad.id.clone()),
                    related_advertiser_id: Some(ad.advertiser_id.clone()),
                    metadata: [
                        ("score".to_string(), json!(assessment.score)),
                        ("evidence".to_string(), json!(assessment.top_evidence)),
                    ]
                    .into_iter()
                    .collect(),
                })
                .await;
            if let Err(e) = res {
                warn!("high_suspicion alert failed: {e}");
            }
        }

        AdOutcome::Scored(assessment)
    }

    // ── Batch entry point ─────────────────────────────────────────────────────

    pub async fn run(self: &Arc<Self>, req: TaskRequest) -> BatchReport {
        info!(
            "batch start task={} schedule={:?}",
            req.task_type, req.schedule_type
        );
        match req.task_type {
            TaskType::DivergenceTest => self.run_divergence_test().await,
            TaskType::StatusCheck => self.run_status_check().await,
        }
    }

    async fn run_divergence_test(self: &Arc<Self>) -> BatchReport {
        let started = Instant::now();
        let ids = self.state.active_ad_ids();
        let sem = Arc::new(Semaphore::new(self.opts.concurrency.max(1)));
        let mut set: JoinSet<AdOutcome> = JoinSet::new();

        let mut skipped = 0usize;
        for id in ids {
            // Hard wall-clock budget: whatever is not dispatched yet is left
            // for the next scheduled run.
            if started.elapsed() >= self.opts.wall_budget {
                skipped += 1;
                continue;
            }
            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");
            let driver = Arc::clone(self);
            set.spawn(async move {
                let _permit = permit;
                driver.process_ad(&id).await
            });
        }

        let mut processed = 0usize;
        let mut divergences = 0usize;
        let mut errors = 0usize;
        let mut invalid = 0usize;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(AdOutcome::Scored(a)) => {
                    processed += 1;
                    if a.diverged {
                        divergences += 1;
                    }
                }
                Ok(AdOutcome::InvalidTarget) => {
                    processed += 1;
                    invalid += 1;
                }
                Ok(AdOutcome::FetchFailed) | Ok(AdOutcome::WriteFailed) => errors += 1,
                Ok(AdOutcome::Missing) => {}
                Err(e) => {
                    warn!("ad task panicked: {e}");
                    errors += 1;
                }
            }
        }

        // Rollups once, after the batch — no read-skew mid-run.
        self.state.recompute_rollups();
        self.hub.publish(Topic::Rollups, "batch");

        self.maybe_emit_recovery(errors).await;

        let report = BatchReport {
            success: errors == 0,
            processed_count: processed,
            divergences_found: divergences,
            errors_count: errors,
            skipped_count: skipped,
            invalid_targets: invalid,
            completed_at: Utc::now(),
        };
        info!(
            "batch done processed={} divergences={} errors={} skipped={} in {:.1}s",
            report.processed_count,
            report.divergences_found,
            report.errors_count,
            report.skipped_count,
            started.elapsed().as_secs_f64()
        );
        report
    }

    /// Lifecycle maintenance: expire ended ads, account winning tiers.
    async fn run_status_check(self: &Arc<Self>) -> BatchReport {
        let started = Instant::now();
        let now = Utc::now();
        let mut processed = 0usize;

        for ad in self.state.all_ads() {
            if started.elapsed() >= self.opts.wall_budget {
                break;
            }
            if let Some(end) = ad.end_date {
                if end < now && ad.is_active() {
                    self.state.mark_inactive(&ad.id);
                    debug!("ad {} expired at {end}", ad.id);
                }
            }
            processed += 1;
        }

        self.state.recompute_rollups();
        self.hub.publish(Topic::Rollups, "status_check");

        let stats = winning::stats(self.state.all_ads().iter(), now);
        info!(
            "status check: {} ads, winners={} (champions={} strong={}) avg_winning={:.1}",
            processed, stats.winners, stats.champions, stats.strong, stats.avg_total
        );

        BatchReport {
            success: true,
            processed_count: processed,
            divergences_found: 0,
            errors_count: 0,
            skipped_count: self.state.n_ads().saturating_sub(processed),
            invalid_targets: 0,
            completed_at: Utc::now(),
        }
    }

    /// api_recovery fires on the first clean run after a run that had fetch
    /// errors — the upstream snapshot API came back.
    async fn maybe_emit_recovery(&self, errors_now: usize) {
        let prev = self
            .last_run_errors
            .swap(errors_now, Ordering::Relaxed);
        if prev > 0 && errors_now == 0 {
            let res = self
                .alerter
                .offer(AlertCandidate {
                    tenant_id: self.tenant_id.clone(),
                    alert_type: AlertType::ApiRecovery,
                    title: "Snapshot source recovered".to_string(),
                    message: format!("Previous run had {prev} errors; this run had none"),
                    severity: AlertSeverity::Info,
                    related_ad_id: None,
                    related_advertiser_id: None,
                    metadata: [("previous_errors".to_string(), json!(prev))]
                        .into_iter()
                        .collect(),
                })
                .await;
            if let Err(e) = res {
                warn!("api_recovery alert failed: {e}");
            }
        }
    }
}
