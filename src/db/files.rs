// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! JSON documents in the data directory.

use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

use crate::error::AppError;

/// Write `value` as pretty JSON, replacing `path` in one rename.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| AppError::Storage(format!("Failed to encode {}: {}", path.display(), e)))?;

    let tmp = path.with_extension("json.tmp");
    let result = async {
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    result.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to write document");
        AppError::Storage(format!("Failed to write {}: {}", path.display(), e))
    })
}

/// Read a JSON document; `Ok(None)` if the file does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AppError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(AppError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| AppError::Storage(format!("Corrupt document {}: {}", path.display(), e)))
}
