// cloakwatch/src/signals/divergence.rs
//
// Divergence engine — does the landing page serve different content to
// different audiences?
//
// The comparison itself is pure and synchronous: once snapshots are in hand
// there is no I/O. Per ad we take the newest capture per distinct access
// condition, hash the normalized preview text, and compare every pair.
// Hashes are computed over *normalized* text so whitespace/markup-only
// differences never count as divergence; what "content" means is the
// NormalizePolicy configuration point.
//
// Delta combination is noisy-OR over pair severities: monotonic in both the
// number of mismatching pairs and each pair's severity.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::records::{
    Ad, CheckError, CheckStatus, DivergenceVerdict, RiskSignal, SignalKind, Snapshot,
};
use crate::state::store::SnapshotSource;
use crate::urlguard;

/// What counts as "content" when hashing a snapshot preview.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NormalizePolicy {
    pub strip_whitespace: bool,
    pub strip_scripts: bool,
    pub case_fold: bool,
}

impl Default for NormalizePolicy {
    fn default() -> Self {
        Self {
            strip_whitespace: true,
            strip_scripts: true,
            case_fold: true,
        }
    }
}

/// Weight applied to each mismatching pair in the noisy-OR combination.
const PAIR_WEIGHT: f32 = 0.75;
/// A hash mismatch means something real changed even when the token overlap
/// is high, so pair severity never drops below this.
const MIN_SEVERITY: f32 = 0.25;

// ── Check entry point ─────────────────────────────────────────────────────────

/// Run one divergence check for an ad against its target URL.
///
/// `InvalidTarget` and `InsufficientData` come back as typed statuses —
/// recovered here, never raised. Snapshot-acquisition failures propagate as
/// `CheckError::FetchFailed` so callers can tell "checked, found nothing"
/// from "could not check".
pub async fn check<S: SnapshotSource>(
    ad: &Ad,
    source: &S,
    policy: &NormalizePolicy,
) -> Result<CheckStatus, CheckError> {
    check_with_snapshots(ad, source, policy)
        .await
        .map(|(status, _)| status)
}

/// Same as [`check`], but hands back the fetched snapshots so callers can
/// feed them to the other signal workers without a second fetch.
pub async fn check_with_snapshots<S: SnapshotSource>(
    ad: &Ad,
    source: &S,
    policy: &NormalizePolicy,
) -> Result<(CheckStatus, Vec<Snapshot>), CheckError> {
    if let Err(reason) = urlguard::validate(&ad.white_url) {
        return Ok((
            CheckStatus::InvalidTarget {
                reason: reason.to_string(),
            },
            Vec::new(),
        ));
    }

    let snapshots = source.fetch_snapshots(&ad.id).await?;
    let status = compare(&snapshots, policy);
    Ok((status, snapshots))
}

/// Pure pairwise comparison over the newest snapshot per distinct condition.
pub fn compare(snapshots: &[Snapshot], policy: &NormalizePolicy) -> CheckStatus {
    // Newest capture per condition. Input is newest-first by contract, but
    // ordering is re-checked rather than trusted.
    let mut newest: HashMap<&str, &Snapshot> = HashMap::new();
    for snap in snapshots {
        newest
            .entry(snap.condition.as_str())
            .and_modify(|cur| {
                if snap.captured_at > cur.captured_at {
                    *cur = snap;
                }
            })
            .or_insert(snap);
    }

    if newest.len() < 2 {
        return CheckStatus::InsufficientData;
    }

    let mut picked: Vec<&Snapshot> = newest.into_values().collect();
    picked.sort_by(|a, b| a.condition.cmp(&b.condition));

    let hashed: Vec<(&Snapshot, String, String)> = picked
        .iter()
        .map(|s| {
            let text = normalize(&s.preview, policy);
            let hash = content_hash(&text);
            (*s, text, hash)
        })
        .collect();

    let mut mismatched: Vec<(String, String)> = Vec::new();
    let mut miss = 1.0f32;

    for i in 0..hashed.len() {
        for j in (i + 1)..hashed.len() {
            let (a, text_a, hash_a) = &hashed[i];
            let (b, text_b, hash_b) = &hashed[j];
            if hash_a == hash_b {
                continue;
            }
            let severity = (1.0 - token_overlap(text_a, text_b)).max(MIN_SEVERITY);
            miss *= 1.0 - PAIR_WEIGHT * severity;
            mismatched.push((a.condition.clone(), b.condition.clone()));
        }
    }

    let suspicion_delta = ((1.0 - miss) * 100.0).round().clamp(0.0, 100.0) as u8;

    CheckStatus::Checked(DivergenceVerdict {
        diverges: !mismatched.is_empty(),
        suspicion_delta,
        matched_conditions: picked.iter().map(|s| s.condition.clone()).collect(),
        mismatched_pairs: mismatched,
    })
}

/// Convert a check status into the fusion-facing risk signal.
pub fn signal(ad: &Ad, status: &CheckStatus) -> Option<RiskSignal> {
    let (score, evidence) = match status {
        CheckStatus::InvalidTarget { reason } => {
            (0.0, vec![format!("invalid_target:{reason}")])
        }
        CheckStatus::InsufficientData => (0.0, vec!["insufficient_data".to_string()]),
        CheckStatus::Checked(v) => {
            let mut ev: Vec<String> = v
                .mismatched_pairs
                .iter()
                .map(|(a, b)| format!("content_mismatch:{a}|{b}"))
                .collect();
            if ev.is_empty() {
                ev.push(format!("all_conditions_match:{}", v.matched_conditions.len()));
            }
            (v.suspicion_delta as f32 / 100.0, ev)
        }
    };

    Some(RiskSignal {
        kind: SignalKind::Divergence,
        ad_id: ad.id.clone(),
        score,
        evidence,
        meta: [("diverged".to_string(), json!(status.diverged()))]
            .into_iter()
            .collect(),
        timestamp: Utc::now(),
    })
}

// ── Normalization ─────────────────────────────────────────────────────────────

/// Reduce a rendered preview to comparable text content.
/// Markup is always dropped; scripts/styles, whitespace collapsing, and case
/// folding follow the policy.
pub fn normalize(content: &str, policy: &NormalizePolicy) -> String {
    let mut text = strip_markup(content, policy.strip_scripts);
    if policy.case_fold {
        text = text.to_lowercase();
    }
    if policy.strip_whitespace {
        text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    text
}

/// SHA-256 over normalized text, truncated hex — same shape the crawler
/// records for raw captures.
pub fn content_hash(text: &str) -> String {
    let mut h = Sha256::new();
    h.update(text.as_bytes());
    hex::encode(&h.finalize()[..8])
}

/// Drop tags; optionally drop <script>/<style> element bodies too.
fn strip_markup(content: &str, strip_scripts: bool) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];

        let tag_end = match rest.find('>') {
            Some(e) => e,
            None => break, // dangling '<' — drop the remainder as markup
        };
        let tag = rest[1..tag_end].trim().to_ascii_lowercase();

        if strip_scripts {
            let skip_to = if tag.starts_with("script") {
                Some("</script")
            } else if tag.starts_with("style") {
                Some("</style")
            } else {
                None
            };
            if let Some(close) = skip_to {
                rest = &rest[tag_end + 1..];
                match rest.to_ascii_lowercase().find(close) {
                    Some(c) => {
                        rest = &rest[c..];
                        let e = rest.find('>').map(|e| e + 1).unwrap_or(rest.len());
                        rest = &rest[e..];
                    }
                    None => rest = "",
                }
                continue;
            }
        }

        rest = &rest[tag_end + 1..];
        out.push(' ');
    }
    out.push_str(rest);
    out
}

/// Jaccard overlap of word sets — cheap severity proxy for "how different
/// are these two pages really".
fn token_overlap(a: &str, b: &str) -> f32 {
    use std::collections::HashSet;
    let sa: HashSet<&str> = a.split_whitespace().collect();
    let sb: HashSet<&str> = b.split_whitespace().collect();
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let inter = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    inter as f32 / union as f32
}
