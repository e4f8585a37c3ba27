// cloakwatch/src/signals/redirects.rs
//
// Redirect-chain depth signal. Cloaked campaigns route targets through
// tracker/TDS hops before the real landing page; legitimate ads rarely go
// deeper than one hop. Strength grows monotonically with depth but each
// additional hop adds less than the previous one.

use chrono::Utc;
use serde_json::json;

use crate::records::{Ad, RiskSignal, SignalKind};

pub fn analyze(ad: &Ad) -> Option<RiskSignal> {
    let depth = ad.redirect_chain.len();
    if depth == 0 {
        return None;
    }

    // depth 1 → 0.33, 2 → 0.50, 4 → 0.67, 8 → 0.80 — diminishing marginal weight
    let score = 1.0 - 1.0 / (1.0 + 0.5 * depth as f32);

    let mut evidence = vec![format!("redirect_depth:{depth}")];
    if depth >= 4 {
        evidence.push(format!(
            "deep_chain:{}",
            ad.redirect_chain
                .iter()
                .take(4)
                .cloned()
                .collect::<Vec<_>>()
                .join(">")
        ));
    }

    Some(RiskSignal {
        kind: SignalKind::Redirects,
        ad_id: ad.id.clone(),
        score,
        evidence,
        meta: [("depth".to_string(), json!(depth))].into_iter().collect(),
        timestamp: Utc::now(),
    })
}
