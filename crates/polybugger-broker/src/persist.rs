//! Write-through session snapshots.
//!
//! One JSON file per session under `DATA_DIR/sessions/`, written on state
//! transitions and breakpoint changes so sessions can be re-announced
//! after a broker restart. Files hold intent (breakpoints, watches,
//! launch/attach configs), never live wire state. Writes go to a `.tmp`
//! sibling, are fsynced, then renamed into place; unreadable files are
//! quarantined with a `.corrupt` suffix and skipped.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use polybugger_adapters::{AttachConfig, Language, LaunchConfig};
use polybugger_session::{BreakpointSpec, Session};

use crate::error::BrokerError;

/// Snapshot schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// What survives a broker restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Schema version; always [`SCHEMA_VERSION`].
    pub schema: u32,
    /// Session id.
    pub id: String,
    /// Optional name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Language tag.
    pub language: Language,
    /// Project root.
    pub project_root: PathBuf,
    /// Original creation time.
    pub created_at: DateTime<Utc>,
    /// Breakpoint intent, keyed by absolute source path.
    pub breakpoints: BTreeMap<String, Vec<BreakpointSpec>>,
    /// Watch expression texts.
    #[serde(default)]
    pub watch_expressions: Vec<String>,
    /// Launch configuration, when the session was launched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<LaunchConfig>,
    /// Attach configuration, when the session was attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attach: Option<AttachConfig>,
    /// When this snapshot was written.
    pub saved_at: DateTime<Utc>,
}

impl PersistedSession {
    /// Capture a session's persistable state.
    pub fn capture(session: &Session) -> Self {
        let snapshot = session.snapshot();
        Self {
            schema: SCHEMA_VERSION,
            id: snapshot.id,
            name: snapshot.name,
            language: snapshot.language,
            project_root: snapshot.project_root,
            created_at: snapshot.created_at,
            breakpoints: session.breakpoints_intent(),
            watch_expressions: session.watch_expressions(),
            launch: session.launch_record(),
            attach: session.attach_record(),
            saved_at: Utc::now(),
        }
    }

    /// Total persisted breakpoints.
    pub fn breakpoint_count(&self) -> usize {
        self.breakpoints.values().map(Vec::len).sum()
    }
}

/// Directory-backed store of session snapshots.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open (and create) `<data_dir>/sessions`.
    pub fn open(data_dir: &Path) -> Result<Self, BrokerError> {
        let dir = data_dir.join("sessions");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one snapshot: tmp file, fsync, rename.
    pub fn save(&self, snapshot: &PersistedSession) -> Result<(), BrokerError> {
        let path = self.path_for(&snapshot.id);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| BrokerError::Io(std::io::Error::other(e)))?;
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load one snapshot by id. Corrupt files are quarantined and
    /// reported as [`BrokerError::Corrupted`].
    pub fn load(&self, id: &str) -> Result<PersistedSession, BrokerError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(BrokerError::NotRecoverable(id.to_string()));
        }
        let bytes = std::fs::read(&path)?;
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                tracing::warn!(path = %path.display(), "quarantining corrupt snapshot: {e}");
                let quarantined = self.quarantine(&path)?;
                Err(BrokerError::Corrupted {
                    path: quarantined.display().to_string(),
                })
            }
        }
    }

    /// All readable snapshots, sorted by id. Corrupt files are
    /// quarantined and skipped; the broker still starts.
    pub fn list(&self) -> Result<Vec<PersistedSession>, BrokerError> {
        let mut snapshots = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            match serde_json::from_slice::<PersistedSession>(&bytes) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "quarantining corrupt snapshot: {e}");
                    let _ = self.quarantine(&path);
                }
            }
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }

    /// Delete one snapshot (clean terminate).
    pub fn remove(&self, id: &str) -> Result<(), BrokerError> {
        let path = self.path_for(id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn quarantine(&self, path: &Path) -> Result<PathBuf, BrokerError> {
        let mut quarantined = path.as_os_str().to_owned();
        quarantined.push(".corrupt");
        let quarantined = PathBuf::from(quarantined);
        std::fs::rename(path, &quarantined)?;
        Ok(quarantined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> PersistedSession {
        let mut breakpoints = BTreeMap::new();
        breakpoints.insert(
            "/tmp/p/s.py".to_string(),
            vec![BreakpointSpec {
                line: 3,
                condition: None,
                hit_condition: None,
            }],
        );
        PersistedSession {
            schema: SCHEMA_VERSION,
            id: id.into(),
            name: Some("test".into()),
            language: Language::Py,
            project_root: PathBuf::from("/tmp/p"),
            created_at: Utc::now(),
            breakpoints,
            watch_expressions: vec!["x + 1".into()],
            launch: Some(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            }),
            attach: None,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn persist_save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        let snapshot = sample("s-1");
        store.save(&snapshot).unwrap();
        let loaded = store.load("s-1").unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn persist_reload_then_resave_is_byte_identical() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        let snapshot = sample("s-1");
        store.save(&snapshot).unwrap();
        let first = std::fs::read(store.dir().join("s-1.json")).unwrap();

        let loaded = store.load("s-1").unwrap();
        store.save(&loaded).unwrap();
        let second = std::fs::read(store.dir().join("s-1.json")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn persist_list_sorted_by_id() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        store.save(&sample("s-b")).unwrap();
        store.save(&sample("s-a")).unwrap();

        let listed = store.list().unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s-a", "s-b"]);
    }

    #[test]
    fn persist_corrupt_file_is_quarantined_and_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        store.save(&sample("s-good")).unwrap();
        std::fs::write(store.dir().join("s-bad.json"), b"{not json").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "s-good");

        // The broken file moved aside rather than vanishing.
        assert!(store.dir().join("s-bad.json.corrupt").exists());
        assert!(!store.dir().join("s-bad.json").exists());
    }

    #[test]
    fn persist_load_corrupt_reports_quarantine_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        std::fs::write(store.dir().join("s-x.json"), b"garbage").unwrap();

        let err = store.load("s-x").unwrap_err();
        match err {
            BrokerError::Corrupted { path } => assert!(path.ends_with(".corrupt")),
            other => panic!("expected Corrupted, got {other:?}"),
        }
    }

    #[test]
    fn persist_load_missing_is_not_recoverable() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let err = store.load("absent").unwrap_err();
        assert!(matches!(err, BrokerError::NotRecoverable(_)));
    }

    #[test]
    fn persist_remove_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        store.save(&sample("s-1")).unwrap();
        store.remove("s-1").unwrap();
        store.remove("s-1").unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn persist_no_tmp_files_left_behind() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        store.save(&sample("s-1")).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn persist_snapshot_carries_schema_version() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        store.save(&sample("s-1")).unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.dir().join("s-1.json")).unwrap()).unwrap();
        assert_eq!(raw["schema"], 1);
    }
}
