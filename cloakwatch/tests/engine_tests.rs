// Engine-level properties: winning-score formula, risk banding, severity
// mapping, and the pure divergence comparison.

use chrono::Utc;

use cloakwatch::engine::suspicion::{SuspicionScorer, SuspicionWeights};
use cloakwatch::engine::winning;
use cloakwatch::records::{
    AlertSeverity, CheckStatus, RiskBand, RiskSignal, SignalKind, Snapshot, WinningTier,
};
use cloakwatch::signals::divergence::{self, NormalizePolicy};

fn snap(condition: &str, preview: &str, age_mins: i64) -> Snapshot {
    Snapshot {
        condition: condition.to_string(),
        captured_at: Utc::now() - chrono::Duration::minutes(age_mins),
        content_hash: divergence::content_hash(preview),
        preview: preview.to_string(),
    }
}

fn signal(kind: SignalKind, score: f32) -> RiskSignal {
    RiskSignal {
        kind,
        ad_id: "ad-1".to_string(),
        score,
        evidence: vec![],
        meta: Default::default(),
        timestamp: Utc::now(),
    }
}

// ── Winning score ─────────────────────────────────────────────────────────────

#[test]
fn winning_score_is_pure_and_bounded() {
    for (days, eng) in [(0, 0.0), (10, 42.0), (60, 100.0), (365, 7.5)] {
        let a = winning::score(days, eng);
        let b = winning::score(days, eng);
        assert_eq!(a.total, b.total);
        assert_eq!(a.tier, b.tier);
        assert!(a.total <= 100);
    }
}

#[test]
fn longevity_saturates_at_sixty_days() {
    assert_eq!(winning::score(60, 0.0).longevity_score, 100.0);
    assert_eq!(winning::score(90, 0.0).longevity_score, 100.0);
    assert_eq!(winning::score(600, 0.0).longevity_score, 100.0);
    assert!(winning::score(59, 0.0).longevity_score < 100.0);
}

#[test]
fn tier_boundaries_are_exact() {
    // longevity >= 60 pins the longevity component at 100, so
    // total = round(60 + 0.4 * engagement)
    let at = |eng: f64| winning::score(60, eng);

    assert_eq!(at(62.5).total, 85);
    assert_eq!(at(62.5).tier, WinningTier::Champion);
    assert_eq!(at(60.0).total, 84);
    assert_eq!(at(60.0).tier, WinningTier::Strong);
    assert_eq!(at(25.0).total, 70);
    assert_eq!(at(25.0).tier, WinningTier::Strong);
    assert_eq!(at(22.5).total, 69);
    assert_eq!(at(22.5).tier, WinningTier::Promising);

    // longevity 30 days -> component 50, total = round(30 + 0.4 * engagement)
    let mid = |eng: f64| winning::score(30, eng);
    assert_eq!(mid(50.0).total, 50);
    assert_eq!(mid(50.0).tier, WinningTier::Promising);
    assert_eq!(mid(47.5).total, 49);
    assert_eq!(mid(47.5).tier, WinningTier::Testing);
}

#[test]
fn rounding_is_half_away_from_zero() {
    // total = 60 + 0.4 * 61.25 = 84.5 — must round up to champion
    let ws = winning::score(60, 61.25);
    assert_eq!(ws.total, 85);
    assert_eq!(ws.tier, WinningTier::Champion);
}

#[test]
fn winner_iff_total_at_least_seventy() {
    assert!(winning::score(60, 100.0).is_winner); // 100
    assert!(winning::score(60, 25.0).is_winner); // 70
    assert!(!winning::score(60, 22.5).is_winner); // 69
    assert!(!winning::score(0, 0.0).is_winner); // 0
}

#[test]
fn champion_extremes() {
    let top = winning::score(60, 100.0);
    assert_eq!(top.total, 100);
    assert_eq!(top.tier, WinningTier::Champion);

    let bottom = winning::score(0, 0.0);
    assert_eq!(bottom.total, 0);
    assert_eq!(bottom.tier, WinningTier::Testing);
    assert!(!bottom.is_winner);
}

// ── Banding & severity ────────────────────────────────────────────────────────

#[test]
fn risk_bands_are_exact() {
    assert_eq!(RiskBand::from_score(30), RiskBand::Low);
    assert_eq!(RiskBand::from_score(31), RiskBand::Medium);
    assert_eq!(RiskBand::from_score(60), RiskBand::Medium);
    assert_eq!(RiskBand::from_score(61), RiskBand::HighProbability);
    assert_eq!(RiskBand::from_score(0), RiskBand::Low);
    assert_eq!(RiskBand::from_score(100), RiskBand::HighProbability);

    assert_eq!(RiskBand::HighProbability.to_string(), "HIGH PROBABILITY");
    assert_eq!(RiskBand::Medium.to_string(), "Medium Risk");
    assert_eq!(RiskBand::Low.to_string(), "Low Risk");
}

#[test]
fn alert_severity_from_score() {
    assert_eq!(AlertSeverity::from_score(80), AlertSeverity::Error);
    assert_eq!(AlertSeverity::from_score(100), AlertSeverity::Error);
    assert_eq!(AlertSeverity::from_score(79), AlertSeverity::Warning);
    assert_eq!(AlertSeverity::from_score(50), AlertSeverity::Warning);
    assert_eq!(AlertSeverity::from_score(49), AlertSeverity::Info);
    assert_eq!(AlertSeverity::from_score(0), AlertSeverity::Info);
}

// ── Divergence comparison ─────────────────────────────────────────────────────

#[test]
fn too_few_snapshots_is_insufficient_data() {
    let policy = NormalizePolicy::default();

    assert!(matches!(
        divergence::compare(&[], &policy),
        CheckStatus::InsufficientData
    ));
    assert!(matches!(
        divergence::compare(&[snap("US+mobile", "hello", 0)], &policy),
        CheckStatus::InsufficientData
    ));
    // Two captures under the same condition still cannot judge.
    let same_condition = [
        snap("US+mobile", "hello", 0),
        snap("US+mobile", "different text", 10),
    ];
    assert!(matches!(
        divergence::compare(&same_condition, &policy),
        CheckStatus::InsufficientData
    ));
}

#[test]
fn identical_content_does_not_diverge() {
    let policy = NormalizePolicy::default();
    let snaps = [
        snap("US+mobile", "Buy our product today", 0),
        snap("EU+desktop", "Buy our product today", 0),
    ];
    match divergence::compare(&snaps, &policy) {
        CheckStatus::Checked(v) => {
            assert!(!v.diverges);
            assert_eq!(v.suspicion_delta, 0);
            assert!(v.mismatched_pairs.is_empty());
        }
        other => panic!("expected Checked, got {other:?}"),
    }
}

#[test]
fn markup_and_whitespace_differences_are_not_divergence() {
    let policy = NormalizePolicy::default();
    let snaps = [
        snap("US+mobile", "<html><body>Buy   our product\n today</body></html>", 0),
        snap(
            "EU+desktop",
            "<div>BUY OUR <b>PRODUCT</b> TODAY<script>track()</script></div>",
            0,
        ),
    ];
    match divergence::compare(&snaps, &policy) {
        CheckStatus::Checked(v) => {
            assert!(!v.diverges, "normalization-only differences must not diverge");
            assert_eq!(v.suspicion_delta, 0);
        }
        other => panic!("expected Checked, got {other:?}"),
    }
}

#[test]
fn differing_content_diverges_with_positive_delta() {
    let policy = NormalizePolicy::default();
    let snaps = [
        snap("US+mobile", "Harmless recipe blog about sourdough bread", 0),
        snap("EU+desktop", "Double your bitcoin guaranteed returns wire transfer", 0),
    ];
    match divergence::compare(&snaps, &policy) {
        CheckStatus::Checked(v) => {
            assert!(v.diverges);
            assert!(v.suspicion_delta > 0);
            assert_eq!(v.mismatched_pairs.len(), 1);
            assert_eq!(v.matched_conditions.len(), 2);
        }
        other => panic!("expected Checked, got {other:?}"),
    }
}

#[test]
fn delta_is_monotonic_in_mismatch_count() {
    let policy = NormalizePolicy::default();
    let two = [
        snap("US+mobile", "alpha beta gamma", 0),
        snap("EU+desktop", "delta epsilon zeta", 0),
    ];
    let three = [
        snap("US+mobile", "alpha beta gamma", 0),
        snap("EU+desktop", "delta epsilon zeta", 0),
        snap("facebook-referer", "eta theta iota", 0),
    ];
    let d2 = match divergence::compare(&two, &policy) {
        CheckStatus::Checked(v) => v.suspicion_delta,
        _ => unreachable!(),
    };
    let d3 = match divergence::compare(&three, &policy) {
        CheckStatus::Checked(v) => v.suspicion_delta,
        _ => unreachable!(),
    };
    assert!(d3 >= d2);
}

#[test]
fn newest_capture_per_condition_wins() {
    let policy = NormalizePolicy::default();
    // The stale US capture diverged; the fresh one matches EU.
    let snaps = [
        snap("US+mobile", "current matching content", 0),
        snap("US+mobile", "ancient totally different scam page", 600),
        snap("EU+desktop", "current matching content", 0),
    ];
    match divergence::compare(&snaps, &policy) {
        CheckStatus::Checked(v) => assert!(!v.diverges),
        other => panic!("expected Checked, got {other:?}"),
    }
}

// ── Suspicion fusion ──────────────────────────────────────────────────────────

fn checked(diverges: bool, delta: u8) -> CheckStatus {
    CheckStatus::Checked(cloakwatch::records::DivergenceVerdict {
        diverges,
        suspicion_delta: delta,
        matched_conditions: vec!["US+mobile".into(), "EU+desktop".into()],
        mismatched_pairs: if diverges {
            vec![("US+mobile".into(), "EU+desktop".into())]
        } else {
            vec![]
        },
    })
}

#[test]
fn confirmed_divergence_lands_in_high_band() {
    let scorer = SuspicionScorer::default();
    let status = checked(true, 75);
    let sigs = vec![signal(SignalKind::Divergence, 0.75)];
    let a = scorer.assess("ad-1", &status, &sigs);
    assert!(a.score >= 61, "got {}", a.score);
    assert_eq!(a.band, RiskBand::HighProbability);
    assert!(a.diverged);
}

#[test]
fn no_signals_scores_zero() {
    let scorer = SuspicionScorer::default();
    let a = scorer.assess("ad-1", &CheckStatus::InsufficientData, &[]);
    assert_eq!(a.score, 0);
    assert_eq!(a.band, RiskBand::Low);
    assert!(!a.diverged);
}

#[test]
fn score_is_deterministic_and_bounded() {
    let scorer = SuspicionScorer::default();
    let status = checked(true, 100);
    let sigs = vec![
        signal(SignalKind::Divergence, 1.0),
        signal(SignalKind::Redirects, 1.0),
        signal(SignalKind::Content, 1.0),
    ];
    let a = scorer.assess("ad-1", &status, &sigs);
    let b = scorer.assess("ad-1", &status, &sigs);
    assert_eq!(a.score, b.score);
    assert!(a.score <= 100);
    assert_eq!(a.score, 100); // weights sum to 1.0 and all signals maxed
}

#[test]
fn score_is_monotonic_in_each_signal() {
    let scorer = SuspicionScorer::default();
    let status = checked(false, 0);

    let low = scorer.assess("ad-1", &status, &[signal(SignalKind::Redirects, 0.2)]);
    let high = scorer.assess("ad-1", &status, &[signal(SignalKind::Redirects, 0.9)]);
    assert!(high.score >= low.score);

    let weights = SuspicionWeights::default();
    assert!(weights.divergence > weights.redirects);
    assert!(weights.redirects > weights.heuristics);
}

#[test]
fn insufficient_data_never_diverges() {
    let scorer = SuspicionScorer::default();
    let a = scorer.assess("ad-1", &CheckStatus::InsufficientData, &[]);
    assert!(!a.diverged);

    let b = scorer.assess(
        "ad-1",
        &CheckStatus::InvalidTarget {
            reason: "private_range".into(),
        },
        &[],
    );
    assert!(!b.diverged);
}
