//! Session store.
//!
//! Every session owns a writer lock and a published document. Mutations take
//! the writer lock, copy the published document, apply their change, persist
//! the result through the [`DocumentBackend`] and only then publish it.
//! Readers clone the published `Arc` and never wait on writers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::name::normalize_session_name;
use super::persistence::{DocumentBackend, MemoryBackend};
use super::topic::{
    DEFAULT_SUBTOPIC, PartialTopicTree, SessionDocument, TopicRecord, subtopic_or_default,
};
use super::updates::{DEFAULT_FEED_CAPACITY, UpdateFeed, UpdateKind};
use crate::error::{Result, StoreError};

/// Default bound on waiting for a session's writer lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for [`SessionStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a mutation may wait for the session's writer lock.
    pub lock_timeout: Duration,
    /// Number of events kept in the updates feed.
    pub feed_capacity: usize,
    /// Wipe the backend on [`SessionStore::open`] instead of reloading it.
    pub reset_on_start: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            feed_capacity: DEFAULT_FEED_CAPACITY,
            reset_on_start: true,
        }
    }
}

#[derive(Debug)]
struct SessionSlot {
    id: String,
    writer: Arc<Mutex<()>>,
    current: RwLock<Arc<SessionDocument>>,
    /// Set when creation failed to persist; late writers must not resurrect it.
    retired: AtomicBool,
}

impl SessionSlot {
    fn new(id: String, document: SessionDocument) -> Self {
        Self {
            id,
            writer: Arc::new(Mutex::new(())),
            current: RwLock::new(Arc::new(document)),
            retired: AtomicBool::new(false),
        }
    }

    fn current(&self) -> Arc<SessionDocument> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, document: SessionDocument) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(document);
    }
}

/// Thread-safe owner of all live sessions.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

#[derive(Debug)]
struct SessionStoreInner {
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    backend: Arc<dyn DocumentBackend>,
    feed: UpdateFeed,
    lock_timeout: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Arc::new(MemoryBackend))
    }
}

impl SessionStore {
    /// Create an empty store over `backend` with default options.
    ///
    /// The backend is neither cleared nor loaded; use [`SessionStore::open`]
    /// for startup.
    #[must_use]
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self::with_options(backend, &StoreOptions::default())
    }

    #[must_use]
    pub fn with_options(backend: Arc<dyn DocumentBackend>, options: &StoreOptions) -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
                backend,
                feed: UpdateFeed::new(options.feed_capacity),
                lock_timeout: options.lock_timeout,
            }),
        }
    }

    /// Open the store at process start.
    ///
    /// With `reset_on_start` every persisted session is discarded, otherwise
    /// each persisted document becomes a live session again.
    pub async fn open(backend: Arc<dyn DocumentBackend>, options: &StoreOptions) -> Result<Self> {
        let store = Self::with_options(Arc::clone(&backend), options);

        if options.reset_on_start {
            backend.clear().await?;
            info!(name: "store.reset", "Cleared persisted sessions");
            return Ok(store);
        }

        let loaded = backend.load_all().await?;
        let count = loaded.len();
        {
            let mut sessions = store.sessions_mut();
            for (id, document) in loaded {
                sessions.insert(id.clone(), Arc::new(SessionSlot::new(id, document)));
            }
        }
        info!(name: "store.loaded", sessions = count, "Reloaded persisted sessions");
        Ok(store)
    }

    /// The recent-updates feed.
    pub fn updates(&self) -> &UpdateFeed {
        &self.inner.feed
    }

    /// Create a session from a display name and return its identifier.
    pub async fn create_session(&self, name: &str) -> Result<String> {
        let id = normalize_session_name(name);
        if id.is_empty() {
            return Err(StoreError::InvalidArgument(
                "session name must not be empty".to_string(),
            ));
        }

        let slot = Arc::new(SessionSlot::new(id.clone(), SessionDocument::new()));
        // Held until the empty document is persisted so that early writers queue behind it.
        let guard = Arc::clone(&slot.writer)
            .try_lock_owned()
            .map_err(|e| StoreError::Busy(e.to_string()))?;

        {
            let mut sessions = self.sessions_mut();
            if sessions.contains_key(&id) {
                return Err(StoreError::AlreadyExists(format!(
                    "session '{id}' already exists"
                )));
            }
            sessions.insert(id.clone(), Arc::clone(&slot));
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = guard;
            match inner.backend.save(&slot.id, &SessionDocument::new()).await {
                Ok(()) => {
                    inner
                        .feed
                        .record(&slot.id, Vec::new(), UpdateKind::SessionCreated);
                    Ok(())
                }
                Err(e) => {
                    slot.retired.store(true, Ordering::Release);
                    let mut sessions = inner
                        .sessions
                        .write()
                        .unwrap_or_else(PoisonError::into_inner);
                    if sessions
                        .get(&slot.id)
                        .is_some_and(|current| Arc::ptr_eq(current, &slot))
                    {
                        sessions.remove(&slot.id);
                    }
                    Err(e)
                }
            }
        });

        join_write(task).await.inspect_err(|e| {
            warn!(name: "store.write_failed", session = %id, error = %e, "Session creation failed");
        })?;

        info!(name: "session.created", session = %id, "Session created");
        Ok(id)
    }

    /// Create a topic with an empty default subtopic and return its name.
    pub async fn create_topic(&self, session_id: &str, topic_name: &str) -> Result<String> {
        let topic = required("topicName", topic_name)?;

        let name = topic.clone();
        self.mutate(session_id, UpdateKind::TopicCreated, move |doc| {
            if doc.topics.contains_key(&name) {
                return Err(StoreError::AlreadyExists(format!(
                    "topic '{name}' already exists"
                )));
            }
            doc.topics.insert(
                name.clone(),
                TopicRecord::from([(DEFAULT_SUBTOPIC.to_string(), Vec::new())]),
            );
            Ok(((), vec![name]))
        })
        .await?;

        info!(name: "topic.created", session = %session_id, topic = %topic, "Topic created");
        Ok(topic)
    }

    /// Append an input, creating the topic and subtopic on first use.
    ///
    /// Returns the number of inputs now stored under the topic.
    pub async fn append_input(
        &self,
        session_id: &str,
        topic_name: &str,
        subtopic_name: Option<&str>,
        text: &str,
    ) -> Result<usize> {
        let topic = required("topicName", topic_name)?;
        if text.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "text must not be empty".to_string(),
            ));
        }
        let subtopic = subtopic_or_default(subtopic_name);
        let text = text.to_string();

        let name = topic.clone();
        let total = self
            .mutate(session_id, UpdateKind::InputAppended, move |doc| {
                if doc.is_finished(&name) {
                    return Err(StoreError::TopicClosed(format!(
                        "topic '{name}' has been ended"
                    )));
                }
                doc.topics
                    .entry(name.clone())
                    .or_default()
                    .entry(subtopic)
                    .or_default()
                    .push(text);
                let total = doc.input_count(&name);
                Ok((total, vec![name]))
            })
            .await?;

        debug!(name: "input.appended", session = %session_id, topic = %topic, total, "Input appended");
        Ok(total)
    }

    /// Replace whole topics with the records in `partial`.
    ///
    /// Topics absent from `partial` are left untouched.
    pub async fn merge_update(&self, session_id: &str, partial: PartialTopicTree) -> Result<()> {
        let mut records: Vec<(String, TopicRecord)> = Vec::with_capacity(partial.len());
        for (topic, record) in partial {
            let topic = required("topic name", &topic)?;
            if records.iter().any(|(seen, _)| *seen == topic) {
                return Err(StoreError::InvalidArgument(format!(
                    "topic '{topic}' appears more than once"
                )));
            }
            records.push((topic, record.normalize()));
        }

        if records.is_empty() {
            self.slot(session_id)?;
            return Ok(());
        }

        self.mutate(session_id, UpdateKind::Merged, move |doc| {
            let mut touched = Vec::with_capacity(records.len());
            for (topic, record) in records {
                doc.topics.insert(topic.clone(), record);
                touched.push(topic);
            }
            Ok(((), touched))
        })
        .await?;

        info!(name: "topic.merged", session = %session_id, "Merged topic update");
        Ok(())
    }

    /// Mark a topic finished so it stops accepting inputs.
    pub async fn end_topic(&self, session_id: &str, topic_name: &str) -> Result<String> {
        let topic = required("topicName", topic_name)?;

        let name = topic.clone();
        self.mutate(session_id, UpdateKind::TopicEnded, move |doc| {
            if !doc.topics.contains_key(&name) {
                return Err(StoreError::NotFound(format!("topic '{name}' not found")));
            }
            if !doc.finished.insert(name.clone()) {
                return Err(StoreError::AlreadyExists(format!(
                    "topic '{name}' has already been ended"
                )));
            }
            Ok(((), vec![name]))
        })
        .await?;

        info!(name: "topic.ended", session = %session_id, topic = %topic, "Topic ended");
        Ok(topic)
    }

    /// The current published document of a session.
    pub fn snapshot(&self, session_id: &str) -> Result<Arc<SessionDocument>> {
        Ok(self.slot(session_id)?.current())
    }

    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions().contains_key(session_id)
    }

    /// All live session identifiers, sorted.
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sessions(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<SessionSlot>>> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn sessions_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<SessionSlot>>> {
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>> {
        self.sessions()
            .get(session_id)
            .cloned()
            .ok_or_else(|| session_not_found(session_id))
    }

    async fn lock(&self, slot: &SessionSlot) -> Result<OwnedMutexGuard<()>> {
        tokio::time::timeout(self.inner.lock_timeout, Arc::clone(&slot.writer).lock_owned())
            .await
            .map_err(|_elapsed| {
                StoreError::Busy(format!(
                    "session '{}' is busy, try again later",
                    slot.id
                ))
            })
    }

    /// Read-modify-write one session under its writer lock.
    ///
    /// `apply` returns its result and the topics it touched. An error from
    /// `apply` discards the copy, so the published document is unchanged.
    async fn mutate<T, F>(&self, session_id: &str, kind: UpdateKind, apply: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SessionDocument) -> Result<(T, Vec<String>)> + Send + 'static,
    {
        let slot = self.slot(session_id)?;
        let guard = self.lock(&slot).await?;

        // Past this point the write finishes even if the caller is dropped.
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = guard;
            if slot.retired.load(Ordering::Acquire) {
                return Err(session_not_found(&slot.id));
            }

            let mut next = SessionDocument::clone(&slot.current());
            let (out, topics) = apply(&mut next)?;

            if let Err(e) = inner.backend.save(&slot.id, &next).await {
                warn!(name: "store.write_failed", session = %slot.id, error = %e, "Failed to persist session");
                return Err(e);
            }

            slot.publish(next);
            inner.feed.record(&slot.id, topics, kind);
            Ok(out)
        });

        join_write(task).await
    }
}

async fn join_write<T>(task: tokio::task::JoinHandle<Result<T>>) -> Result<T> {
    task.await
        .map_err(|e| StoreError::PersistenceFailure(format!("write task failed: {e}")))?
}

fn required(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidArgument(format!(
            "{field} must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

fn session_not_found(session_id: &str) -> StoreError {
    StoreError::NotFound(format!("session '{session_id}' not found"))
}
