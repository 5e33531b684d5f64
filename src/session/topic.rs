//! Topic tree document model.
//!
//! Internally every topic is a map of subtopic name to an append-only list of
//! inputs. Payloads pushed by external aggregators may still use the older
//! flat shape (a bare list under the topic); [`IncomingTopicRecord`] accepts
//! both and [`IncomingTopicRecord::normalize`] folds the flat form under
//! [`DEFAULT_SUBTOPIC`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Subtopic used when none is supplied.
pub const DEFAULT_SUBTOPIC: &str = "General";

/// Canonical topic record: subtopic name to ordered inputs.
pub type TopicRecord = BTreeMap<String, Vec<String>>;

/// Topic name to record. Sorted keys keep serialized snapshots byte-stable.
pub type TopicTree = BTreeMap<String, TopicRecord>;

/// The whole per-session document, as published to readers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(default)]
    pub topics: TopicTree,
    /// Topics that have been ended and no longer accept inputs.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub finished: BTreeSet<String>,
}

impl SessionDocument {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self, topic: &str) -> bool {
        self.finished.contains(topic)
    }

    /// Number of inputs stored across all subtopics of `topic`.
    #[must_use]
    pub fn input_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |record| record.values().map(Vec::len).sum())
    }
}

/// A topic record as it arrives from outside the store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IncomingTopicRecord {
    /// `{ "<subtopic>": ["input", ...] }`
    Subtopics(BTreeMap<String, Vec<String>>),
    /// `["input", ...]` with no subtopic level.
    Flat(Vec<String>),
}

impl IncomingTopicRecord {
    /// Convert into the canonical shape.
    ///
    /// Blank subtopic names are folded into [`DEFAULT_SUBTOPIC`].
    #[must_use]
    pub fn normalize(self) -> TopicRecord {
        match self {
            IncomingTopicRecord::Flat(inputs) => {
                TopicRecord::from([(DEFAULT_SUBTOPIC.to_string(), inputs)])
            }
            IncomingTopicRecord::Subtopics(map) => {
                let mut record = TopicRecord::new();
                for (subtopic, inputs) in map {
                    record
                        .entry(subtopic_or_default(Some(&subtopic)))
                        .or_default()
                        .extend(inputs);
                }
                record
            }
        }
    }
}

/// Incoming partial topic tree for a merge.
pub type PartialTopicTree = BTreeMap<String, IncomingTopicRecord>;

/// Resolve an optional subtopic name, falling back to [`DEFAULT_SUBTOPIC`].
pub fn subtopic_or_default(subtopic: Option<&str>) -> String {
    match subtopic.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => DEFAULT_SUBTOPIC.to_string(),
    }
}
