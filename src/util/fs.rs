use crate::error::PersistenceError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Write `contents` next to `path` and rename it into place.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
    let write_err = |source| PersistenceError::Write {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".tmp.{}", std::process::id()));
    tokio::fs::write(&tmp, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)
}

/// Pretty-printed JSON with a trailing newline, written atomically.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let mut data = serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Encode {
        path: path.display().to_string(),
        source,
    })?;
    data.push(b'\n');
    atomic_write(path, &data).await
}

/// `None` when the file is missing or does not decode as `T`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "ignoring malformed JSON file");
            None
        }
    }
}
