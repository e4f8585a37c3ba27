// cloakwatch/src/records.rs
//
// Shared domain types and all record shapes flowing through Cloakwatch.
// Boundary structs carry the fixed camelCase wire shape; everything else
// is internal and stays snake_case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Ads ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Image,
    Video,
    Carousel,
    Text,
}

/// A tracked creative. Created on ingestion from the ad library, mutated by
/// the scoring engines and manual tagging, never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ad {
    pub id: String,
    pub advertiser_id: String,
    pub domain: String,
    pub headline: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub media_type: MediaType,
    pub status: AdStatus,
    #[serde(default)]
    pub countries: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    /// Externally supplied, already 0–100.
    #[serde(default)]
    pub engagement_score: f64,
    /// Computed by the suspicion scorer, 0–100.
    #[serde(default)]
    pub suspicion_score: u8,
    #[serde(default)]
    pub is_cloaked: bool,
    /// The "safe" page shown to reviewers.
    pub white_url: String,
    /// The diverging page shown to targets, once divergence is confirmed.
    #[serde(default)]
    pub detected_black_url: Option<String>,
    /// Redirect hops observed by the crawler en route to the landing page.
    #[serde(default)]
    pub redirect_chain: Vec<String>,
}

impl Ad {
    /// Days between start and `now` (or end date, whichever is earlier).
    /// Derived on read, never stored.
    pub fn longevity_days(&self, now: DateTime<Utc>) -> u32 {
        let until = match self.end_date {
            Some(end) if end < now => end,
            _ => now,
        };
        (until - self.start_date).num_days().max(0) as u32
    }

    pub fn is_active(&self) -> bool {
        self.status == AdStatus::Active
    }
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

/// One capture of a URL's rendered content under a specific access condition
/// (e.g. "US+mobile", "EU+desktop", "facebook-referer"). Produced by the
/// crawler collaborator; read-only to the engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub condition: String,
    pub captured_at: DateTime<Utc>,
    pub content_hash: String,
    pub preview: String,
}

// ── Divergence verdicts ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DivergenceVerdict {
    pub diverges: bool,
    /// 0–100, monotonic in the number and severity of content mismatches.
    pub suspicion_delta: u8,
    /// Conditions that took part in the comparison.
    pub matched_conditions: Vec<String>,
    /// Condition pairs whose normalized content differed.
    pub mismatched_pairs: Vec<(String, String)>,
}

/// Terminal state of one divergence check. `InvalidTarget` and
/// `InsufficientData` are recovered locally — they never cross the engine
/// boundary as errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CheckStatus {
    InvalidTarget { reason: String },
    InsufficientData,
    Checked(DivergenceVerdict),
}

impl CheckStatus {
    pub fn diverged(&self) -> bool {
        matches!(self, CheckStatus::Checked(v) if v.diverges)
    }
}

// ── Error taxonomy ────────────────────────────────────────────────────────────

/// I/O failures that propagate to the batch driver. Distinct from "checked,
/// found nothing": a caller must always be able to tell the two apart.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("snapshot fetch failed: {0}")]
    FetchFailed(String),
    #[error("score write failed: {0}")]
    ScoreWriteFailed(String),
}

// ── Risk signals ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Landing-page content divergence across access conditions.
    Divergence,
    /// Redirect-chain depth.
    Redirects,
    /// Static content heuristics: keyword patterns + domain reputation.
    Content,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Divergence => write!(f, "divergence"),
            Self::Redirects => write!(f, "redirects"),
            Self::Content => write!(f, "content"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSignal {
    pub kind: SignalKind,
    pub ad_id: String,
    /// Signal strength in [0, 1].
    pub score: f32,
    pub evidence: Vec<String>,
    pub meta: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

// ── Suspicion bands ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskBand {
    Low,
    Medium,
    HighProbability,
}

impl RiskBand {
    /// Exact band boundaries: >= 61 high, 31..=60 medium, <= 30 low.
    pub fn from_score(score: u8) -> Self {
        if score >= 61 {
            Self::HighProbability
        } else if score >= 31 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for RiskBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "Low Risk"),
            Self::Medium => write!(f, "Medium Risk"),
            Self::HighProbability => write!(f, "HIGH PROBABILITY"),
        }
    }
}

/// Fused per-ad assessment produced by the suspicion scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspicionAssessment {
    pub ad_id: String,
    pub score: u8,
    pub band: RiskBand,
    pub diverged: bool,
    pub signal_scores: HashMap<String, f32>,
    pub top_evidence: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

// ── Winning score ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WinningTier {
    Champion,
    Strong,
    Promising,
    Testing,
}

impl std::fmt::Display for WinningTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Champion => write!(f, "champion"),
            Self::Strong => write!(f, "strong"),
            Self::Promising => write!(f, "promising"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// Derived on every read from the ad's current longevity and engagement.
/// Never persisted, so it can never go stale relative to its inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinningScore {
    pub total: u8,
    pub longevity_score: f64,
    pub engagement_score: f64,
    pub tier: WinningTier,
    pub is_winner: bool,
}

// ── Rollups ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvertiserRollup {
    pub advertiser_id: String,
    pub avg_suspicion_score: f64,
    pub total_ads: usize,
    pub active_ads: usize,
    pub domains_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainRollup {
    pub domain: String,
    pub suspicion_score: f64,
    pub total_ads: usize,
    pub active_ads: usize,
}

// ── Alerts ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    NewAd,
    HighSuspicion,
    ApiRecovery,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewAd => write!(f, "new_ad"),
            Self::HighSuspicion => write!(f, "high_suspicion"),
            Self::ApiRecovery => write!(f, "api_recovery"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

impl AlertSeverity {
    /// Severity derivation from suspicion score: >= 80 error,
    /// 50..=79 warning, else info.
    pub fn from_score(score: u8) -> Self {
        if score >= 80 {
            Self::Error
        } else if score >= 50 {
            Self::Warning
        } else {
            Self::Info
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Persisted notification record. Mutated only by read-state transitions,
/// deleted on user action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub tenant_id: String,
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub related_ad_id: Option<String>,
    pub related_advertiser_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// ── Scheduled trigger contract ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    DivergenceTest,
    StatusCheck,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DivergenceTest => write!(f, "divergence_test"),
            Self::StatusCheck => write!(f, "status_check"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Daily,
    Intraday,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_type: TaskType,
    pub schedule_type: ScheduleType,
}

/// Outcome of one scheduled run. A failed batch still reports partial
/// progress — runs are never silently swallowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub success: bool,
    pub processed_count: usize,
    pub divergences_found: usize,
    pub errors_count: usize,
    pub skipped_count: usize,
    pub invalid_targets: usize,
    pub completed_at: DateTime<Utc>,
}

// ── Feed records ──────────────────────────────────────────────────────────────

/// One JSONL feed line: an ad joined with its captured snapshots, an optional
/// externally supplied domain-reputation risk, and an optional ground-truth
/// label for the eval harness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdFeedRecord {
    pub ad: Ad,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    #[serde(default)]
    pub reputation_risk: Option<f32>,
    /// Non-null means the ad is a known cloaker (positive class).
    #[serde(default)]
    pub label: Option<String>,
}
