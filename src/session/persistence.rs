//! Document backends for session state.
//!
//! The store keeps the authoritative copy of every document in memory and
//! hands each committed version to a [`DocumentBackend`]. A backend write
//! either replaces the previous document completely or leaves it untouched.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use super::topic::SessionDocument;
use crate::error::Result;

#[async_trait]
pub trait DocumentBackend: Send + Sync + std::fmt::Debug {
    /// Persist the full document for `session_id`, replacing any previous one.
    async fn save(&self, session_id: &str, document: &SessionDocument) -> Result<()>;

    /// Load every persisted session.
    async fn load_all(&self) -> Result<Vec<(String, SessionDocument)>>;

    /// Remove every persisted session.
    async fn clear(&self) -> Result<()>;
}

/// Backend that keeps nothing beyond the store's own memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBackend;

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn save(&self, _session_id: &str, _document: &SessionDocument) -> Result<()> {
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<(String, SessionDocument)>> {
        Ok(Vec::new())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct StoredSessionRef<'a> {
    session: &'a str,
    #[serde(flatten)]
    document: &'a SessionDocument,
}

#[derive(Deserialize)]
struct StoredSession {
    session: String,
    #[serde(flatten)]
    document: SessionDocument,
}

/// One JSON file per session inside a directory.
///
/// File names are the hex SHA-256 of the session id, so every id maps to a
/// fixed-length name inside the directory whatever its length or alphabet.
/// The id itself is stored in the document. Writes go through a temporary
/// file that is synced and then renamed over the target.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    /// Open (and create if needed) the data directory.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `session_id`.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(session_id)))
    }

    fn temp_path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.tmp",
            encode_file_stem(session_id),
            Uuid::new_v4().simple()
        ))
    }
}

fn encode_file_stem(session_id: &str) -> String {
    hex::encode(Sha256::digest(session_id.as_bytes()))
}

async fn write_synced(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(payload).await?;
    file.sync_all().await?;
    Ok(())
}

#[async_trait]
impl DocumentBackend for JsonFileBackend {
    async fn save(&self, session_id: &str, document: &SessionDocument) -> Result<()> {
        let payload = serde_json::to_vec_pretty(&StoredSessionRef {
            session: session_id,
            document,
        })?;

        let target = self.path_for(session_id);
        let tmp = self.temp_path_for(session_id);

        let written = match write_synced(&tmp, &payload).await {
            Ok(()) => tokio::fs::rename(&tmp, &target).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<(String, SessionDocument)>> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_document = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".json"));
            if !is_document {
                continue;
            }

            let parsed = tokio::fs::read(&path)
                .await
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<StoredSession>(&bytes).map_err(|e| e.to_string())
                });

            match parsed {
                Ok(stored) => sessions.push((stored.session, stored.document)),
                Err(e) => {
                    warn!(
                        name: "store.load_skipped",
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable session document"
                    );
                }
            }
        }

        Ok(sessions)
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let ours = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".json") || n.ends_with(".tmp"));
            if ours && entry.file_type().await?.is_file() {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}
