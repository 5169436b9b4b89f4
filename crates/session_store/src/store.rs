use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use agent_contract::{now_rfc3339, Task};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SessionStoreError;
use crate::paths::{
    archive_file_name, archive_root, session_file_name, task_root, validate_session_key,
};
use crate::schema::StoredSession;
use crate::validate::validate_session;

const CORRUPT_SUFFIX: &str = ".corrupt";

/// Durable per-session task storage: one JSON document per session key.
///
/// Writes are atomic (temp file plus rename), so readers see either the
/// previous or the next complete snapshot.
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `<cwd>/.agent/tasks`.
    #[must_use]
    pub fn at_default(cwd: &Path) -> Self {
        Self::new(task_root(cwd))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, session_key: &str) -> Result<PathBuf, SessionStoreError> {
        validate_session_key(session_key)?;
        Ok(self.root.join(session_file_name(session_key)))
    }

    pub fn save(&self, session_key: &str, task: &Task) -> Result<(), SessionStoreError> {
        let path = self.path_for(session_key)?;
        let record = StoredSession::v1(session_key, now_rfc3339(), task.clone());
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|source| SessionStoreError::json_serialize(&path, source))?;
        write_atomic(&path, &bytes)?;
        debug!(
            session_key,
            task_id = %task.id,
            state = %task.state,
            steps = task.history.len(),
            "task saved"
        );
        Ok(())
    }

    /// Strict load: `Ok(None)` when nothing is stored, `Err` on any corruption.
    pub fn try_load(&self, session_key: &str) -> Result<Option<Task>, SessionStoreError> {
        let path = self.path_for(session_key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SessionStoreError::io("reading task file", &path, source)),
        };

        let record: StoredSession = serde_json::from_slice(&bytes)
            .map_err(|source| SessionStoreError::json_parse(&path, source))?;
        validate_session(&path, session_key, &record)?;
        Ok(Some(record.task))
    }

    /// Lenient load used at startup. Never fails.
    ///
    /// Missing data yields a fresh idle task. Corrupted or partial data is
    /// moved aside with a `.corrupt` suffix and also yields a fresh idle task.
    pub fn load(&self, session_key: &str) -> Task {
        match self.try_load(session_key) {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(session_key, "no stored task; starting idle");
                Task::idle()
            }
            Err(error) => {
                warn!(session_key, %error, "stored task unusable; starting idle");
                if error.is_corruption() {
                    if let Ok(path) = self.path_for(session_key) {
                        self.quarantine(&path);
                    }
                }
                Task::idle()
            }
        }
    }

    /// Moves a finished task out of the live slot into the archive.
    pub fn archive(&self, session_key: &str, task: &Task) -> Result<PathBuf, SessionStoreError> {
        let live = self.path_for(session_key)?;
        let archived_at = now_rfc3339();
        let path = archive_root(&self.root).join(archive_file_name(
            &archived_at,
            session_key,
            &task.id,
        ));

        let record = StoredSession::v1(session_key, archived_at, task.clone());
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|source| SessionStoreError::json_serialize(&path, source))?;
        write_atomic(&path, &bytes)?;

        match fs::remove_file(&live) {
            Ok(()) => {}
            Err(source) if source.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(SessionStoreError::io("removing archived task file", &live, source))
            }
        }
        debug!(session_key, task_id = %task.id, path = %path.display(), "task archived");
        Ok(path)
    }

    /// Archived task files, oldest first.
    pub fn list_archived(&self) -> Result<Vec<PathBuf>, SessionStoreError> {
        let dir = archive_root(&self.root);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SessionStoreError::io("listing archive directory", &dir, source))
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|source| SessionStoreError::io("reading archive entry", &dir, source))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn quarantine(&self, path: &Path) {
        let mut target = path.as_os_str().to_owned();
        target.push(CORRUPT_SUFFIX);
        if let Err(error) = fs::rename(path, &target) {
            warn!(path = %path.display(), %error, "failed to move corrupt task file aside");
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SessionStoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|source| SessionStoreError::io("creating task directory", dir, source))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let written = (|| {
        let mut file = File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(source) = written {
        let _ = fs::remove_file(&temp);
        return Err(SessionStoreError::io("writing temporary task file", &temp, source));
    }

    fs::rename(&temp, path).map_err(|source| {
        let _ = fs::remove_file(&temp);
        SessionStoreError::io("replacing task file", path, source)
    })
}
