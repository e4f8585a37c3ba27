// cloakwatch/src/engine/winning.rs
//
// Winning-score engine — the 0–100 quality/maturity composite, independent
// of suspicion. Pure function of (longevity_days, engagement_score); always
// recomputed on read, never persisted, so it cannot desynchronize from its
// inputs. Rounding of the total is round-half-away-from-zero (f64::round).

use chrono::{DateTime, Utc};

use crate::records::{Ad, WinningScore, WinningTier};

const TIER_CHAMPION: u8 = 85;
const TIER_STRONG: u8 = 70;
const TIER_PROMISING: u8 = 50;

/// Days of longevity at which the longevity component saturates at 100.
const LONGEVITY_CAP_DAYS: f64 = 60.0;

const LONGEVITY_WEIGHT: f64 = 0.6;
const ENGAGEMENT_WEIGHT: f64 = 0.4;

pub fn score(longevity_days: u32, engagement: f64) -> WinningScore {
    let longevity_score = ((longevity_days as f64 / LONGEVITY_CAP_DAYS) * 100.0).min(100.0);
    let engagement_score = engagement.clamp(0.0, 100.0);

    let total =
        (longevity_score * LONGEVITY_WEIGHT + engagement_score * ENGAGEMENT_WEIGHT).round() as u8;

    let tier = if total >= TIER_CHAMPION {
        WinningTier::Champion
    } else if total >= TIER_STRONG {
        WinningTier::Strong
    } else if total >= TIER_PROMISING {
        WinningTier::Promising
    } else {
        WinningTier::Testing
    };

    WinningScore {
        total,
        longevity_score,
        engagement_score,
        tier,
        is_winner: total >= TIER_STRONG,
    }
}

pub fn for_ad(ad: &Ad, now: DateTime<Utc>) -> WinningScore {
    score(ad.longevity_days(now), ad.engagement_score)
}

// ── Aggregates ────────────────────────────────────────────────────────────────

/// Tier counts + average over a set of ads. A plain reduction over the
/// per-ad function, recomputed from the current set on every query — never
/// cached independently of the underlying ads.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WinningStats {
    pub champions: usize,
    pub strong: usize,
    pub promising: usize,
    pub testing: usize,
    pub winners: usize,
    pub avg_total: f64,
}

pub fn stats<'a>(ads: impl IntoIterator<Item = &'a Ad>, now: DateTime<Utc>) -> WinningStats {
    let mut out = WinningStats::default();
    let mut sum = 0u64;
    let mut n = 0usize;

    for ad in ads {
        let ws = for_ad(ad, now);
        match ws.tier {
            WinningTier::Champion => out.champions += 1,
            WinningTier::Strong => out.strong += 1,
            WinningTier::Promising => out.promising += 1,
            WinningTier::Testing => out.testing += 1,
        }
        if ws.is_winner {
            out.winners += 1;
        }
        sum += ws.total as u64;
        n += 1;
    }

    if n > 0 {
        out.avg_total = sum as f64 / n as f64;
    }
    out
}
