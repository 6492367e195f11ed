//! Small JSON state files that are replaced wholesale on every write.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Failure persisting a checkpoint or failure log.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Writing, syncing, or renaming the state file failed.
    #[error("failed to write {path}: {cause}")]
    Io {
        /// File being replaced.
        path: PathBuf,
        /// Underlying I/O failure.
        cause: io::Error,
    },
    /// The state could not be encoded.
    #[error("failed to encode {path}: {cause}")]
    Encode {
        /// File being replaced.
        path: PathBuf,
        /// Underlying serialization failure.
        cause: serde_json::Error,
    },
}

/// Serializes `value` next to `path` and renames it into place, so readers
/// see either the previous contents or the new ones.
pub(crate) fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let io_err = |cause: io::Error| StoreError::Io {
        path: path.to_path_buf(),
        cause,
    };
    let bytes = serde_json::to_vec(value).map_err(|cause| StoreError::Encode {
        path: path.to_path_buf(),
        cause,
    })?;
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let staging = staging_path(path);
    let mut file = fs::File::create(&staging).map_err(io_err)?;
    file.write_all(&bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    fs::rename(&staging, path).map_err(io_err)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        write_json_atomic(&path, &vec![1, 2]).unwrap();
        write_json_atomic(&path, &vec![3]).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[3]");
        assert!(!staging_path(&path).exists());
    }
}
