use std::path::{Path, PathBuf};

use anyhow::Context;
use shared::protocol::BackendSnapshot;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Emergencies and relief camps held in memory and mirrored to a JSON file
/// after every change.
pub struct ReliefStore {
    data: Mutex<BackendSnapshot>,
    data_file: Option<PathBuf>,
}

impl ReliefStore {
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            data: Mutex::new(BackendSnapshot::default()),
            data_file: None,
        }
    }

    /// Loads `path` if it holds a readable snapshot and starts empty
    /// otherwise. Later writes go to `path` either way.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match load_snapshot(&path).await {
            Ok(Some(snapshot)) => {
                info!(
                    path = %path.display(),
                    emergencies = snapshot.emergencies.len(),
                    camps = snapshot.relief_camps.len(),
                    "loaded relief data"
                );
                snapshot
            }
            Ok(None) => BackendSnapshot::default(),
            Err(error) => {
                warn!(path = %path.display(), %error, "unreadable data file, starting empty");
                BackendSnapshot::default()
            }
        };
        Self {
            data: Mutex::new(data),
            data_file: Some(path),
        }
    }

    pub async fn read<T>(&self, f: impl FnOnce(&BackendSnapshot) -> T) -> T {
        let guard = self.data.lock().await;
        f(&*guard)
    }

    /// Applies `f` and persists the result when `f` reports a change.
    /// A failed write is logged; the in-memory state stays authoritative.
    pub async fn mutate<T>(&self, f: impl FnOnce(&mut BackendSnapshot) -> (T, bool)) -> T {
        let mut guard = self.data.lock().await;
        let (value, changed) = f(&mut *guard);
        if changed {
            if let Some(path) = &self.data_file {
                if let Err(error) = save_snapshot(path, &*guard).await {
                    error!(path = %path.display(), %error, "failed to persist relief data");
                }
            }
        }
        value
    }
}

async fn load_snapshot(path: &Path) -> anyhow::Result<Option<BackendSnapshot>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };
    let snapshot = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse '{}'", path.display()))?;
    Ok(Some(snapshot))
}

async fn save_snapshot(path: &Path, snapshot: &BackendSnapshot) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("failed to create parent directory '{}'", parent.display())
        })?;
    }
    let body = serde_json::to_vec(snapshot).context("failed to encode relief data")?;
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, body)
        .await
        .with_context(|| format!("failed to write '{}'", staging.display()))?;
    tokio::fs::rename(&staging, path)
        .await
        .with_context(|| format!("failed to replace '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
