//! Persistent progress records for resumable index builds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vector_store::{BoxFuture, SparseVector};

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint {job_id} is unreadable: {source}")]
    Corrupt {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("checkpoint store poisoned")]
    Poisoned,
}

/// Why the build stopped when this checkpoint was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Interrupted,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseEntry {
    pub chunk_id: String,
    pub vector: SparseVector,
}

/// Completed embeddings of one build job, each paired with its chunk id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: String,
    pub dense: Vec<DenseEntry>,
    #[serde(default)]
    pub sparse: Vec<SparseEntry>,
    #[serde(default)]
    pub dense_secs: f64,
    #[serde(default)]
    pub sparse_secs: f64,
    pub status: CheckpointStatus,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            dense: Vec::new(),
            sparse: Vec::new(),
            dense_secs: 0.0,
            sparse_secs: 0.0,
            status: CheckpointStatus::InProgress,
            saved_at: Utc::now(),
        }
    }

    /// Stamp the checkpoint with the current time before saving.
    pub fn touch(&mut self, status: CheckpointStatus) {
        self.status = status;
        self.saved_at = Utc::now();
    }
}

pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint of `job_id`, `None` when there is none.
    fn load(&self, job_id: &str) -> BoxFuture<'_, Result<Option<Checkpoint>, CheckpointError>>;

    fn save(&self, checkpoint: &Checkpoint) -> BoxFuture<'_, Result<(), CheckpointError>>;

    /// Remove the checkpoint of `job_id`; missing checkpoints are not an error.
    fn delete(&self, job_id: &str) -> BoxFuture<'_, Result<(), CheckpointError>>;
}

/// Stores each job as `{dir}/{job_id}.checkpoint.json`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.checkpoint.json"))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, job_id: &str) -> BoxFuture<'_, Result<Option<Checkpoint>, CheckpointError>> {
        let job_id = job_id.to_owned();
        Box::pin(async move {
            let path = self.path_for(&job_id);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let checkpoint = serde_json::from_slice(&bytes)
                .map_err(|source| CheckpointError::Corrupt { job_id, source })?;
            Ok(Some(checkpoint))
        })
    }

    fn save(&self, checkpoint: &Checkpoint) -> BoxFuture<'_, Result<(), CheckpointError>> {
        let serialized = serde_json::to_vec(checkpoint);
        let job_id = checkpoint.job_id.clone();
        Box::pin(async move {
            let bytes = serialized?;
            tokio::fs::create_dir_all(&self.dir).await?;
            let path = self.path_for(&job_id);
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &path).await?;
            tracing::debug!(job_id = %job_id, path = %path.display(), "checkpoint saved");
            Ok(())
        })
    }

    fn delete(&self, job_id: &str) -> BoxFuture<'_, Result<(), CheckpointError>> {
        let path = self.path_for(job_id);
        Box::pin(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Keeps checkpoints in memory; used by tests and throwaway builds.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: Mutex<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<Checkpoint> {
        self.entries.lock().ok()?.get(job_id).cloned()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, job_id: &str) -> BoxFuture<'_, Result<Option<Checkpoint>, CheckpointError>> {
        let found = self
            .entries
            .lock()
            .map(|entries| entries.get(job_id).cloned())
            .map_err(|_| CheckpointError::Poisoned);
        Box::pin(async move { found })
    }

    fn save(&self, checkpoint: &Checkpoint) -> BoxFuture<'_, Result<(), CheckpointError>> {
        let result = self
            .entries
            .lock()
            .map(|mut entries| {
                entries.insert(checkpoint.job_id.clone(), checkpoint.clone());
            })
            .map_err(|_| CheckpointError::Poisoned);
        Box::pin(async move { result })
    }

    fn delete(&self, job_id: &str) -> BoxFuture<'_, Result<(), CheckpointError>> {
        let result = self
            .entries
            .lock()
            .map(|mut entries| {
                entries.remove(job_id);
            })
            .map_err(|_| CheckpointError::Poisoned);
        Box::pin(async move { result })
    }
}
