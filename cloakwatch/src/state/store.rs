// cloakwatch/src/state/store.rs
//
// Per-process state store.
// DashMap = sharded concurrent HashMap — safe across tokio tasks with no mutex.
//
// Design:
//   - Ad registry, keyed by ad id
//   - Snapshot registry, newest-first per ad (read-only to the engines,
//     retained indefinitely for audit)
//   - Advertiser/domain rollups — recomputed in full after each batch,
//     never patched incrementally
//   - Persisted alerts + the (ad, alert_type) dedup index
//
// Lifecycle is explicit: the store is created at startup, passed by Arc,
// and cleared at shutdown. Nothing here is a process-global singleton.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::records::{
    Ad, AdStatus, Alert, AlertType, AdvertiserRollup, CheckError, DomainRollup, Snapshot,
};

/// Rolling dedup window for (ad, alert_type) pairs.
pub const ALERT_DEDUP_SECS: i64 = 24 * 60 * 60;

// ── Collaborator seams ────────────────────────────────────────────────────────

/// Snapshot acquisition boundary. The real collaborator is the headless
/// crawler; in-process the store serves the captures it already holds.
/// Failures map to `CheckError::FetchFailed` — an empty result is not a
/// failure, it is "insufficient data" downstream.
pub trait SnapshotSource: Send + Sync {
    fn fetch_snapshots(
        &self,
        ad_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Snapshot>, CheckError>> + Send;
}

// ── Store ─────────────────────────────────────────────────────────────────────

pub struct AdState {
    ads: DashMap<String, Ad>,
    snapshots: DashMap<String, Vec<Snapshot>>,
    pub advertisers: DashMap<String, AdvertiserRollup>,
    pub domains: DashMap<String, DomainRollup>,

    alerts: DashMap<String, Alert>,
    alert_last: DashMap<(String, AlertType), DateTime<Utc>>,

    /// Externally supplied domain-reputation risk, 0 = clean, 1 = known-bad.
    reputations: DashMap<String, f32>,

    pub total_checks: AtomicU64,
    pub total_divergences: AtomicU64,
}

impl AdState {
    pub fn new() -> Self {
        Self {
            ads: DashMap::new(),
            snapshots: DashMap::new(),
            advertisers: DashMap::new(),
            domains: DashMap::new(),
            alerts: DashMap::new(),
            alert_last: DashMap::new(),
            reputations: DashMap::new(),
            total_checks: AtomicU64::new(0),
            total_divergences: AtomicU64::new(0),
        }
    }

    /// Shutdown lifecycle hook — drops all registries.
    pub fn clear(&self) {
        self.ads.clear();
        self.snapshots.clear();
        self.advertisers.clear();
        self.domains.clear();
        self.alerts.clear();
        self.alert_last.clear();
        self.reputations.clear();
    }

    // ── Ads ───────────────────────────────────────────────────────────────────

    /// Insert or update an ad. Returns true when the ad was not seen before.
    /// Scoring fields already computed on an existing record are preserved.
    pub fn upsert_ad(&self, mut ad: Ad) -> bool {
        match self.ads.get_mut(&ad.id) {
            Some(mut existing) => {
                ad.suspicion_score = existing.suspicion_score;
                ad.is_cloaked = existing.is_cloaked;
                if ad.detected_black_url.is_none() {
                    ad.detected_black_url = existing.detected_black_url.clone();
                }
                *existing = ad;
                false
            }
            None => {
                self.ads.insert(ad.id.clone(), ad);
                true
            }
        }
    }

    pub fn ad(&self, ad_id: &str) -> Option<Ad> {
        self.ads.get(ad_id).map(|a| a.clone())
    }

    pub fn active_ad_ids(&self) -> Vec<String> {
        self.ads
            .iter()
            .filter(|e| e.is_active())
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn all_ads(&self) -> Vec<Ad> {
        self.ads.iter().map(|e| e.clone()).collect()
    }

    /// Single-row upsert of the computed scoring fields. Fails with
    /// `ScoreWriteFailed` when the ad row is gone — an un-persisted score
    /// would silently revert the ad to its previous band on next read.
    pub fn write_score(
        &self,
        ad_id: &str,
        score: u8,
        is_cloaked: bool,
        black_url: Option<&str>,
    ) -> Result<(), CheckError> {
        let mut ad = self
            .ads
            .get_mut(ad_id)
            .ok_or_else(|| CheckError::ScoreWriteFailed(format!("unknown ad {ad_id}")))?;
        ad.suspicion_score = score;
        if is_cloaked {
            ad.is_cloaked = true;
        }
        if let Some(url) = black_url {
            ad.detected_black_url = Some(url.to_string());
        }
        Ok(())
    }

    /// Soft status transition — ads are never hard-deleted.
    pub fn mark_inactive(&self, ad_id: &str) {
        if let Some(mut ad) = self.ads.get_mut(ad_id) {
            ad.status = AdStatus::Inactive;
        }
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    /// Merge new captures for an ad, keeping the registry newest-first.
    pub fn add_snapshots(&self, ad_id: &str, mut new: Vec<Snapshot>) {
        if new.is_empty() {
            return;
        }
        let mut entry = self.snapshots.entry(ad_id.to_string()).or_default();
        entry.append(&mut new);
        entry.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
    }

    pub fn snapshots_for(&self, ad_id: &str) -> Vec<Snapshot> {
        self.snapshots.get(ad_id).map(|s| s.clone()).unwrap_or_default()
    }

    // ── Domain reputation ─────────────────────────────────────────────────────

    pub fn set_reputation(&self, domain: &str, risk: f32) {
        self.reputations.insert(domain.to_string(), risk.clamp(0.0, 1.0));
    }

    pub fn reputation(&self, domain: &str) -> Option<f32> {
        self.reputations.get(domain).map(|r| *r)
    }

    // ── Rollups ───────────────────────────────────────────────────────────────

    /// Recompute advertiser and domain rollups from the current ad set.
    /// Full recompute — the arithmetic mean of constituent scores — rather
    /// than a streaming average, so adding/removing ads cannot drift.
    pub fn recompute_rollups(&self) {
        use std::collections::{HashMap, HashSet};

        let mut adv: HashMap<String, (f64, usize, usize, HashSet<String>)> = HashMap::new();
        let mut dom: HashMap<String, (f64, usize, usize)> = HashMap::new();

        for ad in self.ads.iter() {
            let a = adv.entry(ad.advertiser_id.clone()).or_default();
            a.0 += ad.suspicion_score as f64;
            a.1 += 1;
            if ad.is_active() {
                a.2 += 1;
            }
            a.3.insert(ad.domain.clone());

            let d = dom.entry(ad.domain.clone()).or_default();
            d.0 += ad.suspicion_score as f64;
            d.1 += 1;
            if ad.is_active() {
                d.2 += 1;
            }
        }

        self.advertisers.clear();
        for (advertiser_id, (sum, total, active, domains)) in adv {
            self.advertisers.insert(
                advertiser_id.clone(),
                AdvertiserRollup {
                    advertiser_id,
                    avg_suspicion_score: sum / total as f64,
                    total_ads: total,
                    active_ads: active,
                    domains_count: domains.len(),
                },
            );
        }

        self.domains.clear();
        for (domain, (sum, total, active)) in dom {
            self.domains.insert(
                domain.clone(),
                DomainRollup {
                    domain,
                    suspicion_score: sum / total as f64,
                    total_ads: total,
                    active_ads: active,
                },
            );
        }
    }

    // ── Alerts ────────────────────────────────────────────────────────────────

    /// True when an alert of this (key, type) was already emitted inside the
    /// rolling 24-hour window. Recording the emission is a separate step so
    /// suppressed candidates do not extend the window.
    pub fn alert_recently_emitted(&self, key: &str, kind: AlertType, now: DateTime<Utc>) -> bool {
        self.alert_last
            .get(&(key.to_string(), kind))
            .map(|t| (now - *t).num_seconds() < ALERT_DEDUP_SECS)
            .unwrap_or(false)
    }

    pub fn record_alert_emitted(&self, key: &str, kind: AlertType, now: DateTime<Utc>) {
        self.alert_last.insert((key.to_string(), kind), now);
    }

    pub fn insert_alert(&self, alert: Alert) {
        self.alerts.insert(alert.id.clone(), alert);
    }

    pub fn mark_alert_read(&self, alert_id: &str) {
        if let Some(mut a) = self.alerts.get_mut(alert_id) {
            a.read = true;
        }
    }

    /// User-initiated deletion — the only path that removes an alert.
    pub fn delete_alert(&self, alert_id: &str) -> bool {
        self.alerts.remove(alert_id).is_some()
    }

    pub fn unread_alerts(&self) -> usize {
        self.alerts.iter().filter(|a| !a.read).count()
    }

    pub fn alerts_newest_first(&self) -> Vec<Alert> {
        let mut out: Vec<Alert> = self.alerts.iter().map(|a| a.clone()).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    // ── Counters ──────────────────────────────────────────────────────────────

    pub fn n_ads(&self) -> usize {
        self.ads.len()
    }

    pub fn n_advertisers(&self) -> usize {
        self.advertisers.len()
    }

    pub fn n_domains(&self) -> usize {
        self.domains.len()
    }

    pub fn record_check(&self, diverged: bool) {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        if diverged {
            self.total_divergences.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ── Housekeeping ──────────────────────────────────────────────────────────

    /// Snapshots are retained indefinitely; only the expired dedup index
    /// entries are trimmed here.
    pub async fn housekeeping_loop(self: std::sync::Arc<Self>) {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
            let cutoff = Utc::now() - Duration::seconds(ALERT_DEDUP_SECS);
            self.alert_last.retain(|_, t| *t >= cutoff);
        }
    }
}

impl Default for AdState {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for AdState {
    fn fetch_snapshots(
        &self,
        ad_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Snapshot>, CheckError>> + Send {
        let snaps = self.snapshots_for(ad_id);
        async move { Ok(snaps) }
    }
}
