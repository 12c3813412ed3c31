//! State recorder - persists per-step records so interrupted runs can resume

use crate::error::StateError;
use crate::record::ExecutionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Records keyed by step id
pub type Records = BTreeMap<String, ExecutionRecord>;

/// Durable storage for execution records of one catalog
pub trait StateStore: Send {
    /// Read prior records
    fn load(&mut self) -> Result<Records, StateError>;

    /// Persist one record; must be durable when this returns
    fn save(&mut self, step_id: &str, record: &ExecutionRecord) -> Result<(), StateError>;

    /// Forget every record
    fn clear(&mut self) -> Result<(), StateError>;

    /// Forget the records of `ids`, keeping every other record
    fn forget(&mut self, ids: &[&str]) -> Result<(), StateError>;

    /// Load prior records, degrading to empty state with a warning
    fn load_or_empty(&mut self) -> Records {
        match self.load() {
            Ok(records) => records,
            Err(e) => {
                log::warn!("Ignoring unusable run state: {e}");
                Records::new()
            }
        }
    }
}

/// On-disk document for one catalog identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub identity: String,
    pub catalog: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub records: Records,
}

/// JSON file store at `<state_dir>/runs/<identity>.json`
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    identity: String,
    catalog: String,
    records: Records,
}

impl FileStateStore {
    /// Store for a catalog identity under `state_dir`
    pub fn new(state_dir: &Path, identity: &str, catalog: &str) -> Self {
        Self {
            path: Self::path_for(state_dir, identity),
            identity: identity.to_string(),
            catalog: catalog.to_string(),
            records: Records::new(),
        }
    }

    /// Path of the state file for an identity
    pub fn path_for(state_dir: &Path, identity: &str) -> PathBuf {
        state_dir.join("runs").join(format!("{identity}.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a state file exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the full document, including metadata
    pub fn read_document(&self) -> Result<Option<StateDocument>, StateError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).map_err(|source| StateError::Read {
            path: self.path.clone(),
            source,
        })?;
        let document: StateDocument =
            serde_json::from_str(&content).map_err(|source| StateError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        if document.identity != self.identity {
            return Err(StateError::IdentityMismatch {
                path: self.path.clone(),
                expected: self.identity.clone(),
                found: document.identity,
            });
        }
        Ok(Some(document))
    }

    /// Write the document through a temp file so a crash never leaves a torn file
    fn persist(&self) -> Result<(), StateError> {
        let document = StateDocument {
            identity: self.identity.clone(),
            catalog: self.catalog.clone(),
            updated_at: Utc::now(),
            records: self.records.clone(),
        };
        let content = serde_json::to_string_pretty(&document)?;

        let write_err = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(write_err)?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(write_err)?;
            file.write_all(content.as_bytes()).map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(write_err)?;

        // Make the rename itself durable
        #[cfg(unix)]
        if let Ok(dir_handle) = fs::File::open(dir) {
            let _ = dir_handle.sync_all();
        }

        log::debug!("Saved run state to {}", self.path.display());
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load(&mut self) -> Result<Records, StateError> {
        self.records.clear();
        let Some(document) = self.read_document()? else {
            log::debug!("No run state at {}", self.path.display());
            return Ok(Records::new());
        };
        log::debug!(
            "Loaded {} records from {}",
            document.records.len(),
            self.path.display()
        );
        self.records = document.records;
        Ok(self.records.clone())
    }

    fn save(&mut self, step_id: &str, record: &ExecutionRecord) -> Result<(), StateError> {
        self.records.insert(step_id.to_string(), record.clone());
        self.persist()
    }

    fn clear(&mut self) -> Result<(), StateError> {
        self.records.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::debug!("Removed run state {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn forget(&mut self, ids: &[&str]) -> Result<(), StateError> {
        let mut records = self.load_or_empty();
        let before = records.len();
        for id in ids {
            records.remove(*id);
        }
        if records.is_empty() {
            return self.clear();
        }
        self.records = records;
        if self.records.len() == before {
            return Ok(());
        }
        log::debug!(
            "Forgot {} records, kept {}",
            before - self.records.len(),
            self.records.len()
        );
        self.persist()
    }
}

/// In-memory store for dry runs and tests
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    records: Records,
    saves: usize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with records
    pub fn with_records(records: Records) -> Self {
        Self { records, saves: 0 }
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    /// Number of `save` calls so far
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl StateStore for MemoryStateStore {
    fn load(&mut self) -> Result<Records, StateError> {
        Ok(self.records.clone())
    }

    fn save(&mut self, step_id: &str, record: &ExecutionRecord) -> Result<(), StateError> {
        self.records.insert(step_id.to_string(), record.clone());
        self.saves += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StateError> {
        self.records.clear();
        Ok(())
    }

    fn forget(&mut self, ids: &[&str]) -> Result<(), StateError> {
        for id in ids {
            self.records.remove(*id);
        }
        Ok(())
    }
}
