pub mod content;
pub mod divergence;
pub mod redirects;

use crate::records::{Ad, CheckStatus, RiskSignal, Snapshot};

/// Collect the risk signals for one ad. Signal computation is pure and
/// synchronous — all I/O (snapshot acquisition) happened before this point.
/// Workers returning None (no signal) are silently dropped.
pub fn gather(
    ad: &Ad,
    status: &CheckStatus,
    snapshots: &[Snapshot],
    reputation_risk: Option<f32>,
) -> Vec<RiskSignal> {
    [
        divergence::signal(ad, status),
        redirects::analyze(ad),
        content::analyze(ad, snapshots, reputation_risk),
    ]
    .into_iter()
    .flatten()
    .collect()
}
