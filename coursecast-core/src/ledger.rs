//! Durable record of which transfer units have already been delivered.
//!
//! The ledger is a small JSON file per course. Every successful delivery is
//! written through immediately, so an interrupted run resumes exactly after
//! the last unit that made it.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::LedgerError;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct LedgerData {
    #[serde(default)]
    target_chat_id: Option<String>,
    #[serde(default)]
    processed: BTreeMap<String, bool>,
}

#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    data: Mutex<LedgerData>,
}

/// Replaces every run of characters outside `[A-Za-z0-9.-]` with `_`.
pub fn slug(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9.-]+").expect("static regex"));
    re.replace_all(name, "_").into_owned()
}

impl ProgressLedger {
    /// Loads the ledger at `path`, starting empty when it is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<LedgerData>(&bytes) {
                Ok(data) => {
                    info!(
                        ledger = %path.display(),
                        delivered = data.processed.len(),
                        "[LEDGER] Loaded progress"
                    );
                    data
                }
                Err(e) => {
                    warn!(ledger = %path.display(), error = %e, "[LEDGER] Corrupt progress file, starting fresh");
                    LedgerData::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(ledger = %path.display(), "[LEDGER] No progress yet");
                LedgerData::default()
            }
            Err(e) => {
                warn!(ledger = %path.display(), error = %e, "[LEDGER] Unreadable progress file, starting fresh");
                LedgerData::default()
            }
        };
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    /// Opens `<state_dir>/progress_<slug>.json`, creating `state_dir` if needed.
    pub fn for_course(state_dir: &Path, course_name: &str) -> Result<Self, LedgerError> {
        fs::create_dir_all(state_dir).map_err(|source| LedgerError::Io {
            path: state_dir.to_path_buf(),
            source,
        })?;
        Ok(Self::open(Self::path_for(state_dir, course_name)))
    }

    pub fn path_for(state_dir: &Path, course_name: &str) -> PathBuf {
        state_dir.join(format!("progress_{}.json", slug(course_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // A poisoned lock only means another thread panicked mid-update; the map is
    // still a valid set of keys.
    fn lock(&self) -> MutexGuard<'_, LedgerData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_delivered(&self, key: &str) -> bool {
        self.lock().processed.get(key).copied().unwrap_or(false)
    }

    /// Records `key` and writes the ledger through. No-op if already recorded.
    pub fn mark_delivered(&self, key: &str) -> Result<(), LedgerError> {
        let mut data = self.lock();
        if data.processed.get(key).copied().unwrap_or(false) {
            return Ok(());
        }
        data.processed.insert(key.to_string(), true);
        if let Err(e) = self.write(&data) {
            data.processed.remove(key);
            return Err(e);
        }
        debug!(key, "[LEDGER] Marked delivered");
        Ok(())
    }

    pub fn target_chat(&self) -> Option<String> {
        self.lock().target_chat_id.clone()
    }

    pub fn set_target_chat(&self, id: &str) -> Result<(), LedgerError> {
        let mut data = self.lock();
        if data.target_chat_id.as_deref() == Some(id) {
            return Ok(());
        }
        data.target_chat_id = Some(id.to_string());
        self.write(&data)
    }

    pub fn delivered_count(&self) -> usize {
        self.lock().processed.values().filter(|v| **v).count()
    }

    /// Delivered keys in sorted order.
    pub fn delivered_keys(&self) -> Vec<String> {
        self.lock()
            .processed
            .iter()
            .filter(|(_, v)| **v)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn persist(&self) -> Result<(), LedgerError> {
        let data = self.lock();
        self.write(&data)
    }

    /// Temp file in the same directory, fsync, then rename over the ledger.
    fn write(&self, data: &LedgerData) -> Result<(), LedgerError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(data)?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}
