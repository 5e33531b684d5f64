//! Session, topic and input storage.
//!
//! A session is a named tree of topics; each topic maps subtopic names to the
//! inputs attendees contributed. The store serializes writers per session and
//! publishes immutable snapshots for pollers.
//!
//! # Architecture
//!
//! - [`SessionStore`]: owner of all live sessions and their writer locks
//! - [`SessionDocument`]: the per-session topic tree
//! - [`DocumentBackend`]: where committed documents are written
//! - [`UpdateFeed`]: bounded log of recent changes for pollers
//!
//! # Example
//!
//! ```rust
//! use topicboard::session::SessionStore;
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let store = SessionStore::default();
//!     let id = store.create_session("Town   Hall").await.unwrap();
//!     assert_eq!(id, "Town-Hall");
//!
//!     store.append_input(&id, "Questions", None, "When is lunch?").await.unwrap();
//!     let snapshot = store.snapshot(&id).unwrap();
//!     assert_eq!(snapshot.input_count("Questions"), 1);
//! });
//! ```

mod name;
mod persistence;
mod store;
mod topic;
mod updates;

pub use name::normalize_session_name;
pub use persistence::{DocumentBackend, JsonFileBackend, MemoryBackend};
pub use store::{DEFAULT_LOCK_TIMEOUT, SessionStore, StoreOptions};
pub use topic::{
    DEFAULT_SUBTOPIC, IncomingTopicRecord, PartialTopicTree, SessionDocument, TopicRecord,
    TopicTree,
};
pub use updates::{DEFAULT_FEED_CAPACITY, UpdateEvent, UpdateFeed, UpdateKind, UpdatesPage};
