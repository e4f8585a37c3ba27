// cloakwatch/src/engine/suspicion.rs
//
// Weighted signal fusion with a confirmed-divergence floor.
//
// Weight distribution across the 3 signals (sum = 1.00):
//   Divergence 0.62  — landing-page content divergence (highest precision)
//   Redirects  0.22  — redirect-chain depth
//   Content    0.16  — keyword lures + external domain reputation
//
// The weights are a configuration surface — the signal set will evolve.
// The contract is fixed: output in [0, 100], monotonically non-decreasing
// in each signal, deterministic for identical inputs, and a confirmed
// divergence lands in the HIGH PROBABILITY band (>= 61).

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::records::{CheckStatus, RiskBand, RiskSignal, SignalKind, SuspicionAssessment};

/// Composite floor applied when divergence is confirmed — pins the score
/// into the >= 61 band regardless of how the other signals read.
pub const DIVERGENCE_FLOOR: f32 = 0.61;

/// Per-signal weights. Should sum to <= 1.0 so the composite stays in [0, 1]
/// before clamping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SuspicionWeights {
    pub divergence: f32,
    pub redirects: f32,
    pub heuristics: f32,
}

impl Default for SuspicionWeights {
    fn default() -> Self {
        Self {
            divergence: 0.62,
            redirects: 0.22,
            heuristics: 0.16,
        }
    }
}

impl SuspicionWeights {
    fn for_kind(&self, kind: SignalKind) -> f32 {
        match kind {
            SignalKind::Divergence => self.divergence,
            SignalKind::Redirects => self.redirects,
            SignalKind::Content => self.heuristics,
        }
    }
}

pub struct SuspicionScorer {
    weights: SuspicionWeights,
}

impl SuspicionScorer {
    pub fn new(weights: SuspicionWeights) -> Self {
        Self { weights }
    }

    /// Fuse the gathered signals into a 0–100 assessment.
    pub fn assess(
        &self,
        ad_id: &str,
        status: &CheckStatus,
        signals: &[RiskSignal],
    ) -> SuspicionAssessment {
        let mut composite = 0.0f32;
        let mut signal_scores: HashMap<String, f32> = HashMap::new();

        for sig in signals {
            let s = sig.score.clamp(0.0, 1.0);
            composite += s * self.weights.for_kind(sig.kind);
            signal_scores.insert(sig.kind.to_string(), s);
        }

        let diverged = status.diverged();
        if diverged {
            composite = composite.max(DIVERGENCE_FLOOR);
        }
        composite = composite.clamp(0.0, 1.0);

        let score = (composite * 100.0).round() as u8;

        let top_evidence: Vec<String> = signals
            .iter()
            .flat_map(|s| s.evidence.iter().cloned())
            .filter(|e| {
                !e.starts_with("insufficient_data") && !e.starts_with("all_conditions_match")
            })
            .take(10)
            .collect();

        SuspicionAssessment {
            ad_id: ad_id.to_string(),
            score,
            band: RiskBand::from_score(score),
            diverged,
            signal_scores,
            top_evidence,
            timestamp: Utc::now(),
        }
    }
}

impl Default for SuspicionScorer {
    fn default() -> Self {
        Self::new(SuspicionWeights::default())
    }
}
