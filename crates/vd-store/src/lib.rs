//! Lifecycle state store: the in-memory registry of provisioned VPSes,
//! mirrored in full to a JSON file after every mutation.

pub mod models;

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use models::VpsRecord;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vps not found: {0}")]
    NotFound(String),

    #[error("vps already exists: {0}")]
    Duplicate(String),

    #[error("unknown os: {0} (expected ubuntu or debian)")]
    UnknownOs(String),

    #[error("mirror {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("mirror {path} is not valid: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Id → record map. All mutations hold one lock across the mirror write,
/// so the file always reflects a state the map actually passed through.
pub struct Store {
    path: PathBuf,
    records: Mutex<HashMap<String, VpsRecord>>,
}

impl Store {
    /// Rehydrate from the mirror at `path`. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let raw: HashMap<String, VpsRecord> =
                    serde_json::from_slice(&bytes).map_err(|source| Error::Json {
                        path: path.clone(),
                        source,
                    })?;
                // Records are keyed by their own id; the file key is advisory.
                let mut records = HashMap::with_capacity(raw.len());
                for (key, record) in raw {
                    if key != record.id {
                        tracing::warn!(key = %key, vps_id = %record.id, "mirror key does not match record id");
                    }
                    if let Some(shadowed) = records.insert(record.id.clone(), record) {
                        tracing::warn!(vps_id = %shadowed.id, "mirror holds the same id twice; keeping one");
                    }
                }
                records
            }
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(Error::Io { path, source }),
        };

        tracing::info!(path = %path.display(), records = records.len(), "store loaded");

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn insert(&self, record: VpsRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(Error::Duplicate(record.id));
        }
        let id = record.id.clone();
        records.insert(id.clone(), record);
        if let Err(e) = self.persist(&records).await {
            records.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<VpsRecord> {
        self.records.lock().await.get(id).cloned()
    }

    /// Apply `mutate` to the record and return the result.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<VpsRecord>
    where
        F: FnOnce(&mut VpsRecord),
    {
        let mut records = self.records.lock().await;
        let previous = records
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let mut updated = previous.clone();
        mutate(&mut updated);
        records.insert(id.to_string(), updated.clone());

        if let Err(e) = self.persist(&records).await {
            records.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(updated)
    }

    pub async fn remove(&self, id: &str) -> Result<VpsRecord> {
        let mut records = self.records.lock().await;
        let removed = records
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if let Err(e) = self.persist(&records).await {
            records.insert(id.to_string(), removed);
            return Err(e);
        }
        Ok(removed)
    }

    /// Snapshot of every record, oldest first.
    pub async fn list_all(&self) -> Vec<VpsRecord> {
        let mut all: Vec<VpsRecord> = self.records.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    async fn persist(&self, records: &HashMap<String, VpsRecord>) -> Result<()> {
        let ordered: BTreeMap<&String, &VpsRecord> = records.iter().collect();
        let body = serde_json::to_vec_pretty(&ordered).map_err(|source| Error::Json {
            path: self.path.clone(),
            source,
        })?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|source| Error::Io {
                path: self.path.clone(),
                source,
            })?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "store mirrored");
        Ok(())
    }
}
