//! Atomic snapshot persistence: serialize, write to a `.tmp` sibling,
//! rename over the target. A reader
//! never observes a half-written file because `rename` is atomic on the
//! same filesystem, and `state.json.tmp` is never read back on startup.

use std::path::{Path, PathBuf};

use swarmd_core::error::{Error, Result};
use swarmd_core::model::ClusterState;

const FILE_MODE: u32 = 0o640;

pub fn snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join("state.json")
}

pub fn backup_path(data_dir: &Path, timestamp: &str) -> PathBuf {
    data_dir.join(format!("state-backup-{timestamp}.json"))
}

/// Writes `state` to `target` via a `.tmp` file and rename, never leaving
/// a partial file observable at `target`.
pub async fn write_atomic(target: &Path, state: &ClusterState) -> Result<()> {
    let tmp = target.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(state)?;
    tokio::fs::write(&tmp, &bytes).await.map_err(Error::from)?;
    set_mode(&tmp, FILE_MODE).await?;
    tokio::fs::rename(&tmp, target).await.map_err(Error::from)?;
    Ok(())
}

/// Reads and parses `path`. Absence is not an error (start empty); a
/// corrupt file is logged by the caller and treated as absent, but the
/// file itself is left untouched for operator recovery.
pub async fn read(path: &Path) -> Result<Option<ClusterState>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let state = serde_json::from_slice(&bytes)?;
            Ok(Some(state))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::from(e)),
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    tokio::fs::set_permissions(path, perms)
        .await
        .map_err(Error::from)
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path());
        let state = ClusterState::new(Utc::now());
        write_atomic(&path, &state).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        let read_back = read(&path).await.unwrap().unwrap();
        assert_eq!(read_back.version, state.version);
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path());
        assert!(read(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path());
        tokio::fs::write(&path, b"not json").await.unwrap();
        assert!(read(&path).await.is_err());
        assert!(path.exists());
    }
}
