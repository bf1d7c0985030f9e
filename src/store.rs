//! Per-build session state persisted as JSON so separate invocations share one container.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::docker::BuildIdentity;
use crate::errors::ContainerError;
use crate::session::SessionState;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    version: u32,
    build: BuildIdentity,
    state: SessionState,
}

/// Exclusive lock over a state file; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Block until this process holds the build's lock.
    pub fn lock(&self) -> Result<StoreLock, ContainerError> {
        let lp = self.lock_path();
        if let Some(parent) = lp.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| ContainerError::io(format!("cannot create {}", parent.display()), e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lp)
            .map_err(|e| ContainerError::io(format!("cannot open lock {}", lp.display()), e))?;
        file.lock_exclusive()
            .map_err(|e| ContainerError::io(format!("cannot lock {}", lp.display()), e))?;
        Ok(StoreLock { file })
    }

    /// Load the state saved for `build`. State saved by another build is ignored.
    pub fn load(&self, build: &BuildIdentity) -> Result<Option<SessionState>, ContainerError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ContainerError::io(
                    format!("cannot read {}", self.path.display()),
                    e,
                ))
            }
        };
        let stored: StoredSession = serde_json::from_str(&text).map_err(|e| {
            ContainerError::Config(format!("corrupt state file {}: {e}", self.path.display()))
        })?;
        if stored.version != FORMAT_VERSION || &stored.build != build {
            return Ok(None);
        }
        Ok(Some(stored.state))
    }

    /// Write atomically: temp file in the same directory, then rename over the target.
    pub fn save(&self, build: &BuildIdentity, state: &SessionState) -> Result<(), ContainerError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .map_err(|e| ContainerError::io(format!("cannot create {}", dir.display()), e))?;
        let stored = StoredSession {
            version: FORMAT_VERSION,
            build: build.clone(),
            state: state.clone(),
        };
        let json = serde_json::to_vec_pretty(&stored)
            .map_err(|e| ContainerError::io("cannot serialize session state", e.into()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ContainerError::io(format!("cannot write in {}", dir.display()), e))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| ContainerError::io("cannot write session state", e))?;
        tmp.persist(&self.path).map_err(|e| {
            ContainerError::io(format!("cannot replace {}", self.path.display()), e.error)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Phase;

    fn build(n: u64) -> BuildIdentity {
        BuildIdentity {
            project: "demo".to_string(),
            number: n,
        }
    }

    #[test]
    fn test_save_and_load_same_build() {
        let td = tempfile::tempdir().expect("tmpdir");
        let store = StateStore::new(td.path().join("state").join("session.json"));
        assert!(store.load(&build(1)).expect("load").is_none());

        let mut state = SessionState {
            phase: Phase::Provisioned,
            image: Some("alpine:3.6".to_string()),
            container_id: Some("cid123".to_string()),
            ..Default::default()
        };
        state.mounts.insert("/ws".to_string(), "/ws".to_string());
        state.ports.insert(8080, 80);

        let _guard = store.lock().expect("lock");
        store.save(&build(1), &state).expect("save");
        assert_eq!(store.load(&build(1)).expect("load"), Some(state));
        assert!(store.load(&build(2)).expect("load").is_none());
        let text = fs::read_to_string(store.path()).expect("read");
        assert!(text.contains("\"provisioned\""));
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let td = tempfile::tempdir().expect("tmpdir");
        let store = StateStore::new(td.path().join("session.json"));
        fs::write(store.path(), "{not json").expect("write");
        assert!(matches!(
            store.load(&build(1)),
            Err(ContainerError::Config(_))
        ));
    }
}
