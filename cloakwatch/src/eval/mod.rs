// cloakwatch/src/eval/mod.rs
//
// Labeled dataset + evaluation framework.
//
// Provides a benchmarking harness that:
//   1. Loads a labeled JSONL feed of ad records (label = known-cloaker
//      ground truth; null = legitimate advertiser)
//   2. Runs the full compare → fuse pipeline on every record in order
//   3. Computes per-signal and aggregate precision / recall / F1 / FPR
//   4. Outputs band counts and a score histogram
//   5. Prints a markdown-formatted report
//
// Run:
//   cloakwatch --mode eval --feed labeled_ads.jsonl
//   cloakwatch --mode eval --feed labeled_ads.jsonl --eval-threshold 61

pub mod report;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::engine::suspicion::SuspicionScorer;
use crate::records::AdFeedRecord;
use crate::signals;
use crate::signals::divergence::{self, NormalizePolicy};
use crate::state::store::AdState;

/// A signal "fires" for metric purposes at this strength.
const SIGNAL_FIRE: f32 = 0.30;

// ── Per-signal performance counters ───────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct SignalMetrics {
    pub tp: u64,
    pub fp: u64,
    pub tn: u64,
    pub fn_: u64,
}

impl SignalMetrics {
    pub fn precision(&self) -> f64 {
        let denom = self.tp + self.fp;
        if denom == 0 {
            1.0
        } else {
            self.tp as f64 / denom as f64
        }
    }

    pub fn recall(&self) -> f64 {
        let denom = self.tp + self.fn_;
        if denom == 0 {
            0.0
        } else {
            self.tp as f64 / denom as f64
        }
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn fpr(&self) -> f64 {
        let denom = self.fp + self.tn;
        if denom == 0 {
            0.0
        } else {
            self.fp as f64 / denom as f64
        }
    }
}

// ── Aggregate evaluation result ───────────────────────────────────────────────

#[derive(Debug)]
pub struct EvalResult {
    pub n_records: usize,
    pub n_positive: usize,
    pub n_negative: usize,
    /// Suspicion-score threshold for the positive prediction.
    pub threshold: u8,
    pub global: SignalMetrics,
    pub per_signal: HashMap<String, SignalMetrics>,
    pub band_counts: HashMap<String, u64>,
    /// (bin lower bound, count) over 5-point score bins.
    pub score_histogram: Vec<(u8, usize)>,
}

impl EvalResult {
    pub fn print_report(&self) {
        println!("\n## Cloakwatch Evaluation Report\n");
        println!("| Metric    | Value |");
        println!("|-----------|-------|");
        println!("| Records   | {}    |", self.n_records);
        println!("| Positive  | {}    |", self.n_positive);
        println!("| Negative  | {}    |", self.n_negative);
        println!("| Threshold | {}    |", self.threshold);
        println!("| Precision | {:.4} |", self.global.precision());
        println!("| Recall    | {:.4} |", self.global.recall());
        println!("| F1        | {:.4} |", self.global.f1());
        println!("| FPR       | {:.4} |", self.global.fpr());
        println!();

        println!("### Per-Signal Performance\n");
        println!("| Signal | P | R | F1 | FPR |");
        println!("|--------|---|---|----|-----|");
        let mut sigs: Vec<_> = self.per_signal.iter().collect();
        sigs.sort_by(|a, b| b.1.f1().partial_cmp(&a.1.f1()).unwrap());
        for (name, m) in sigs {
            println!(
                "| {:10} | {:.3} | {:.3} | {:.3} | {:.4} |",
                name,
                m.precision(),
                m.recall(),
                m.f1(),
                m.fpr()
            );
        }

        println!("\n### Band Distribution\n");
        let mut bands: Vec<_> = self.band_counts.iter().collect();
        bands.sort();
        for (band, count) in bands {
            println!("{:16} | {}", band, count);
        }

        println!("\n### Score Distribution\n");
        for (lower, count) in &self.score_histogram {
            let bar: String =
                "#".repeat((*count as f64 / self.n_records.max(1) as f64 * 80.0) as usize);
            println!("{:3}–{:3} | {:5} | {}", lower, lower + 4, count, bar);
        }
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

pub struct Evaluator {
    threshold: u8,
    policy: NormalizePolicy,
}

impl Evaluator {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            policy: NormalizePolicy::default(),
        }
    }

    pub async fn run_dataset(&self, path: &Path) -> Result<EvalResult> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut records: Vec<AdFeedRecord> = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<AdFeedRecord>(line) {
                Ok(rec) => records.push(rec),
                Err(e) => warn!("Eval dataset parse error: {e}"),
            }
        }

        info!("Loaded {} records from {}", records.len(), path.display());
        Ok(self.evaluate(records))
    }

    fn evaluate(&self, records: Vec<AdFeedRecord>) -> EvalResult {
        let state = Arc::new(AdState::new());
        let scorer = SuspicionScorer::default();

        let n_records = records.len();
        let n_positive = records.iter().filter(|r| r.label.is_some()).count();
        let n_negative = n_records - n_positive;

        let mut global = SignalMetrics::default();
        let mut per_signal: HashMap<String, SignalMetrics> = HashMap::new();
        let mut band_counts: HashMap<String, u64> = HashMap::new();
        let mut score_bins = vec![0usize; 20]; // 5-point bins

        for rec in &records {
            state.upsert_ad(rec.ad.clone());
            state.add_snapshots(&rec.ad.id, rec.snapshots.clone());
            if let Some(rep) = rec.reputation_risk {
                state.set_reputation(&rec.ad.domain, rep);
            }

            let snapshots = state.snapshots_for(&rec.ad.id);
            let status = divergence::compare(&snapshots, &self.policy);
            let sigs = signals::gather(
                &rec.ad,
                &status,
                &snapshots,
                state.reputation(&rec.ad.domain),
            );
            let assessment = scorer.assess(&rec.ad.id, &status, &sigs);

            let is_positive = rec.label.is_some();
            let flagged = assessment.score >= self.threshold;

            for sig in &sigs {
                let m = per_signal.entry(sig.kind.to_string()).or_default();
                let fired = sig.score >= SIGNAL_FIRE;
                match (fired, is_positive) {
                    (true, true) => m.tp += 1,
                    (true, false) => m.fp += 1,
                    (false, true) => m.fn_ += 1,
                    (false, false) => m.tn += 1,
                }
            }

            match (flagged, is_positive) {
                (true, true) => global.tp += 1,
                (true, false) => global.fp += 1,
                (false, true) => global.fn_ += 1,
                (false, false) => global.tn += 1,
            }

            let bin = (assessment.score as usize / 5).min(19);
            score_bins[bin] += 1;
            *band_counts.entry(assessment.band.to_string()).or_default() += 1;
        }

        let score_histogram = score_bins
            .iter()
            .enumerate()
            .map(|(i, &c)| ((i * 5) as u8, c))
            .collect();

        EvalResult {
            n_records,
            n_positive,
            n_negative,
            threshold: self.threshold,
            global,
            per_signal,
            band_counts,
            score_histogram,
        }
    }
}
