use super::DeviceRegistry;
use crate::types::devices::{Provider, UserRecord};

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;
use thiserror::Error;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    users: &'a [UserRecord],
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    users: Vec<UserRecord>,
}

impl DeviceRegistry {
    /// Reads a registry written by [`DeviceRegistry::save_snapshot`].
    pub fn load_snapshot(path: &Path) -> Result<Self, SnapshotError> {
        let bytes = std::fs::read(path)?;
        Self::from_snapshot_bytes(&bytes)
    }

    /// Start-up loader: a missing or unreadable snapshot yields an empty registry.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load_snapshot(path) {
            Ok(registry) => registry,
            Err(SnapshotError::Io(err)) if err.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no snapshot found, starting empty");
                Self::new()
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "discarding snapshot");
                Self::new()
            }
        }
    }

    pub(crate) fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Snapshot =
            serde_json::from_slice(bytes).map_err(|err| SnapshotError::Corrupt(err.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Corrupt(format!(
                "unsupported version {}",
                snapshot.version
            )));
        }
        for record in &snapshot.users {
            check_record(record)?;
        }
        Ok(Self::from_records(snapshot.users))
    }

    pub(crate) fn snapshot_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        let users = self.records();
        serde_json::to_vec_pretty(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            users: &users,
        })
        .map_err(|err| SnapshotError::Io(std::io::Error::other(err)))
    }

    /// Writes the whole registry to `path`. Readers see either the previous
    /// file or the complete new one, never a partial write.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let _saving = self
            .save_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let bytes = self.snapshot_bytes()?;
        atomic_write(path, &bytes)?;
        Ok(())
    }
}

fn check_record(record: &UserRecord) -> Result<(), SnapshotError> {
    for provider in [Provider::Apns, Provider::Fcm] {
        for (device, endpoint) in record.endpoints(provider) {
            if endpoint.provider != provider {
                return Err(SnapshotError::Corrupt(format!(
                    "device {device} of user {} filed under {provider} but holds a {} endpoint",
                    record.identity, endpoint.provider
                )));
            }
        }
    }
    Ok(())
}

fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("devices.json");
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    for attempt in 0..10u32 {
        let temp_path = parent.join(format!(".{file_name}.tmp-{pid}-{nanos}-{attempt}"));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
        {
            Ok(mut file) => {
                let written = file
                    .write_all(contents)
                    .and_then(|()| file.sync_all())
                    .and_then(|()| std::fs::rename(&temp_path, path));
                if written.is_err() {
                    let _ = std::fs::remove_file(&temp_path);
                }
                return written;
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        "failed to create temp file",
    ))
}
