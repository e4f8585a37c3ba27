// cloakwatch/src/alerts.rs
//
// Alerting layer — turns engine outputs into persisted alert records.
//
// Hard idempotence invariant: no duplicate (ad, alert_type) within a rolling
// 24-hour window, so repeated worker runs cannot storm the alert table.
// Accepted alerts are persisted in the state store and appended to a JSONL
// audit trail. Wire these files to your notification fan-out in production.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::records::{Alert, AlertSeverity, AlertType};
use crate::state::store::AdState;

#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub tenant_id: String,
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub related_ad_id: Option<String>,
    pub related_advertiser_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

pub struct Alerter {
    state: Arc<AdState>,
    out: Option<PathBuf>,
}

impl Alerter {
    pub fn new(state: Arc<AdState>, output_dir: Option<impl Into<PathBuf>>) -> Self {
        let out = output_dir.map(Into::into);
        if let Some(ref dir) = out {
            std::fs::create_dir_all(dir).expect("Failed to create alert output directory");
        }
        Self { state, out }
    }

    /// Offer a candidate alert. Returns the persisted record, or None when
    /// suppressed by the dedup window. Suppression does not extend the
    /// window — only an actual emission does.
    pub async fn offer(&self, candidate: AlertCandidate) -> Result<Option<Alert>> {
        let now = Utc::now();
        let dedup_key = candidate
            .related_ad_id
            .clone()
            .or_else(|| candidate.related_advertiser_id.clone())
            .unwrap_or_else(|| candidate.tenant_id.clone());

        if self
            .state
            .alert_recently_emitted(&dedup_key, candidate.alert_type, now)
        {
            return Ok(None);
        }

        let alert = Alert {
            id: alert_id(&dedup_key, candidate.alert_type),
            tenant_id: candidate.tenant_id,
            alert_type: candidate.alert_type,
            title: candidate.title,
            message: candidate.message,
            severity: candidate.severity,
            related_ad_id: candidate.related_ad_id,
            related_advertiser_id: candidate.related_advertiser_id,
            metadata: candidate.metadata,
            read: false,
            created_at: now,
        };

        self.state.insert_alert(alert.clone());
        self.state
            .record_alert_emitted(&dedup_key, alert.alert_type, now);

        if self.out.is_some() {
            let line = serde_json::to_string(&alert)? + "\n";
            self.append("alerts.jsonl", &line).await?;
        }

        info!(
            "ALERT {} severity={} key={}",
            alert.alert_type, alert.severity, dedup_key
        );
        Ok(Some(alert))
    }

    async fn append(&self, file: &str, content: &str) -> Result<()> {
        let dir = match &self.out {
            Some(d) => d,
            None => return Ok(()),
        };
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(dir).join(file))
            .await?;
        f.write_all(content.as_bytes()).await?;
        Ok(())
    }
}

/// Stable-enough unique id: hash of key + type + nanosecond timestamp.
fn alert_id(key: &str, kind: AlertType) -> String {
    let mut h = Sha256::new();
    h.update(b"cw_alert:");
    h.update(key.as_bytes());
    h.update(b":");
    h.update(kind.to_string().as_bytes());
    h.update(Utc::now().timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    hex::encode(&h.finalize()[..12])
}
