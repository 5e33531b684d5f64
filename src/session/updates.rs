//! Bounded feed of recently committed mutations.
//!
//! Pollers remember the highest `seq` they have seen and ask for everything
//! after it. Only the newest `capacity` events are retained.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default number of retained events.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    SessionCreated,
    TopicCreated,
    InputAppended,
    Merged,
    TopicEnded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    pub seq: u64,
    pub session_id: String,
    pub topics: Vec<String>,
    pub kind: UpdateKind,
    pub timestamp: DateTime<Utc>,
}

/// Events newer than a cursor, plus the newest sequence number issued.
#[derive(Debug, Clone, Serialize)]
pub struct UpdatesPage {
    pub updates: Vec<UpdateEvent>,
    pub count: usize,
    pub latest: u64,
}

#[derive(Debug, Clone)]
pub struct UpdateFeed {
    inner: Arc<Mutex<FeedInner>>,
}

#[derive(Debug)]
struct FeedInner {
    events: VecDeque<UpdateEvent>,
    capacity: usize,
    next_seq: u64,
}

impl Default for UpdateFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl UpdateFeed {
    /// Create a feed holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(FeedInner {
                events: VecDeque::with_capacity(capacity),
                capacity,
                next_seq: 1,
            })),
        }
    }

    /// Append an event, evicting the oldest one when full.
    pub fn record(&self, session_id: &str, topics: Vec<String>, kind: UpdateKind) -> u64 {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = guard.next_seq;
        guard.next_seq += 1;

        if guard.events.len() == guard.capacity {
            guard.events.pop_front();
        }
        guard.events.push_back(UpdateEvent {
            seq,
            session_id: session_id.to_string(),
            topics,
            kind,
            timestamp: Utc::now(),
        });
        seq
    }

    /// All retained events with `seq > since`, oldest first.
    #[must_use]
    pub fn since(&self, since: u64) -> UpdatesPage {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let updates: Vec<UpdateEvent> = guard
            .events
            .iter()
            .filter(|event| event.seq > since)
            .cloned()
            .collect();
        UpdatesPage {
            count: updates.len(),
            updates,
            latest: guard.next_seq - 1,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let feed = UpdateFeed::new(8);
        let a = feed.record("s", vec![], UpdateKind::SessionCreated);
        let b = feed.record("s", vec!["t".into()], UpdateKind::TopicCreated);
        assert!(b > a);
        assert_eq!(feed.since(0).latest, b);
    }

    #[test]
    fn test_feed_is_bounded() {
        let feed = UpdateFeed::new(3);
        for _ in 0..10 {
            feed.record("s", vec!["t".into()], UpdateKind::InputAppended);
        }
        assert_eq!(feed.len(), 3);

        let page = feed.since(0);
        assert_eq!(page.count, 3);
        assert_eq!(page.latest, 10);
        let seqs: Vec<u64> = page.updates.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![8, 9, 10]);
    }

    #[test]
    fn test_since_cursor() {
        let feed = UpdateFeed::new(16);
        feed.record("a", vec![], UpdateKind::SessionCreated);
        feed.record("a", vec!["x".into()], UpdateKind::Merged);
        feed.record("b", vec![], UpdateKind::SessionCreated);

        let page = feed.since(2);
        assert_eq!(page.count, 1);
        assert_eq!(page.updates[0].session_id, "b");
        assert!(feed.since(3).updates.is_empty());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let feed = UpdateFeed::new(0);
        feed.record("a", vec![], UpdateKind::SessionCreated);
        feed.record("a", vec![], UpdateKind::SessionCreated);
        assert_eq!(feed.len(), 1);
    }
}
