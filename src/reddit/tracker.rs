use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProducedDb {
    #[serde(default)]
    produced_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

/// Thread ids that already have a video, persisted as JSON
///
/// Not safe for concurrent processes: two runs sharing one file can lose an
/// update.
#[derive(Debug)]
pub struct ProducedVideosTracker {
    path: PathBuf,
    ids: BTreeSet<String>,
}

impl ProducedVideosTracker {
    /// Read `path`; a missing or unreadable file starts an empty set
    pub fn load<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let ids = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<ProducedDb>(&content) {
                Ok(db) => db.produced_ids,
                Err(e) => {
                    warn!("Could not parse produced videos database {}: {}", path.display(), e);
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                warn!("Could not load produced videos database {}: {}", path.display(), e);
                BTreeSet::new()
            }
        };
        debug!("{} produced ids loaded from {}", ids.len(), path.display());
        Self { path, ids }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_produced(&self, thread_id: &str) -> bool {
        self.ids.contains(thread_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Record `thread_id` and persist immediately
    pub fn mark_produced(&mut self, thread_id: &str) -> Result<()> {
        if self.ids.insert(thread_id.to_string()) {
            self.save()?;
        }
        Ok(())
    }

    /// Write through a temp file in the same directory, then rename over the target
    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let db = ProducedDb {
            produced_ids: self.ids.clone(),
            updated_at: Some(Utc::now().to_rfc3339()),
        };
        let json = serde_json::to_string_pretty(&db).map_err(std::io::Error::from)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let tracker = ProducedVideosTracker::load(dir.path().join("none.json"));
        assert!(tracker.is_empty());
        assert!(!tracker.is_produced("abc123"));
    }

    #[test]
    fn test_mark_persists_across_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("produced.json");

        let mut tracker = ProducedVideosTracker::load(&path);
        tracker.mark_produced("abc123").unwrap();
        tracker.mark_produced("abc123").unwrap();
        tracker.mark_produced("zzz999").unwrap();

        let reloaded = ProducedVideosTracker::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.is_produced("abc123"));

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["produced_ids"], serde_json::json!(["abc123", "zzz999"]));
        assert!(raw["updated_at"].is_string());

        // nothing but the database in the directory; the temp file was renamed
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_corrupt_file_is_a_warning() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("produced.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut tracker = ProducedVideosTracker::load(&path);
        assert!(tracker.is_empty());
        tracker.mark_produced("abc123").unwrap();
        assert!(ProducedVideosTracker::load(&path).is_produced("abc123"));
    }

    #[test]
    fn test_legacy_file_without_timestamp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("produced.json");
        std::fs::write(&path, r#"{"produced_ids": ["old111"]}"#).unwrap();
        assert!(ProducedVideosTracker::load(&path).is_produced("old111"));
    }
}
