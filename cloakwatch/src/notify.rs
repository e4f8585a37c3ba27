// cloakwatch/src/notify.rs
//
// Invalidation hub — topic → subscriber channels.
//
// Read models subscribe to a topic and receive invalidation messages when
// the underlying data changes (score writes, rollup recomputes, new
// alerts). Subscribers refetch on receipt; no payload beyond the key.

use dashmap::DashMap;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    AdScores,
    Rollups,
    Alerts,
}

#[derive(Debug, Clone)]
pub struct Invalidation {
    pub topic: Topic,
    pub key: String,
}

pub struct NotifyHub {
    subs: DashMap<Topic, Vec<mpsc::UnboundedSender<Invalidation>>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            subs: DashMap::new(),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> mpsc::UnboundedReceiver<Invalidation> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subs.entry(topic).or_default().push(tx);
        rx
    }

    /// Fan out an invalidation. Closed subscribers are dropped on the way.
    pub fn publish(&self, topic: Topic, key: &str) {
        if let Some(mut senders) = self.subs.get_mut(&topic) {
            senders.retain(|tx| {
                tx.send(Invalidation {
                    topic,
                    key: key.to_string(),
                })
                .is_ok()
            });
        }
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
