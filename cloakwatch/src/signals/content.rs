// cloakwatch/src/signals/content.rs
//
// Static content heuristics — the externally-suppliable part of the score.
// Aho-Corasick automaton over the newest snapshot preview: O(n) per page
// regardless of pattern count. Combined with the domain-reputation risk the
// feed may carry (0 = clean, 1 = known-bad).

use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use chrono::Utc;
use serde_json::json;

use crate::records::{Ad, RiskSignal, SignalKind, Snapshot};

static SCAM_AC: OnceLock<(AhoCorasick, Vec<&'static str>)> = OnceLock::new();

// Pattern → label pairs. Labels group phrasings of the same lure.
const SCAM_PATTERNS: &[(&str, &str)] = &[
    ("double your money", "get_rich_quick"),
    ("double your bitcoin", "get_rich_quick"),
    ("guaranteed returns", "get_rich_quick"),
    ("guaranteed profit", "get_rich_quick"),
    ("passive income system", "get_rich_quick"),
    ("limited time offer", "pressure_tactic"),
    ("act now before", "pressure_tactic"),
    ("only a few spots left", "pressure_tactic"),
    ("this will be taken down", "pressure_tactic"),
    ("miracle cure", "health_claim"),
    ("doctors hate", "health_claim"),
    ("lose weight fast", "health_claim"),
    ("no prescription needed", "health_claim"),
    ("claim your prize", "prize_bait"),
    ("you have been selected", "prize_bait"),
    ("congratulations you won", "prize_bait"),
    ("verify your account", "phishing"),
    ("confirm your identity", "phishing"),
    ("suspended unless", "phishing"),
    ("wire transfer only", "payment_pressure"),
    ("gift cards accepted", "payment_pressure"),
    ("crypto payment only", "payment_pressure"),
];

const PER_HIT: f32 = 0.15;
const REPUTATION_WEIGHT: f32 = 0.6;

fn scam_automaton() -> &'static (AhoCorasick, Vec<&'static str>) {
    SCAM_AC.get_or_init(|| {
        let patterns: Vec<&str> = SCAM_PATTERNS.iter().map(|(p, _)| *p).collect();
        let labels: Vec<&str> = SCAM_PATTERNS.iter().map(|(_, l)| *l).collect();
        let ac = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(patterns)
            .expect("scam AC build failed");
        (ac, labels)
    })
}

pub fn analyze(ad: &Ad, snapshots: &[Snapshot], reputation_risk: Option<f32>) -> Option<RiskSignal> {
    let (ac, labels) = scam_automaton();

    // Newest capture is the freshest view of what targets actually see.
    let haystack = match snapshots.first() {
        Some(s) => format!("{} {} {}", ad.headline, ad.body, s.preview),
        None => format!("{} {}", ad.headline, ad.body),
    };

    let hits: Vec<&str> = ac
        .find_iter(&haystack)
        .map(|m| labels[m.pattern().as_usize()])
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();

    let mut score = (hits.len() as f32 * PER_HIT).min(1.0);
    let mut evidence: Vec<String> = hits.iter().take(4).map(|l| format!("lure:{l}")).collect();

    if let Some(rep) = reputation_risk {
        let rep = rep.clamp(0.0, 1.0);
        if rep > 0.0 {
            // noisy-OR with the keyword score — either source alone can raise it
            score = 1.0 - (1.0 - score) * (1.0 - REPUTATION_WEIGHT * rep);
            evidence.push(format!("domain_reputation:{rep:.2}"));
        }
    }

    if score <= 0.0 {
        return None;
    }

    Some(RiskSignal {
        kind: SignalKind::Content,
        ad_id: ad.id.clone(),
        score: (score * 10000.0).round() / 10000.0,
        evidence,
        meta: [
            ("lure_hits".to_string(), json!(hits.len())),
            ("reputation_risk".to_string(), json!(reputation_risk)),
        ]
        .into_iter()
        .collect(),
        timestamp: Utc::now(),
    })
}
