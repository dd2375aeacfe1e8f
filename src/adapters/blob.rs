//! Local filesystem blob store
//!
//! Paths are interpreted relative to the process working directory unless absolute.

use async_trait::async_trait;
use std::path::Path;
use tokio::fs;

use super::BlobStore;
use crate::error::{SettlementError, SettlementResult};

#[derive(Debug, Clone, Default)]
pub struct LocalBlobStore;

impl LocalBlobStore {
    pub fn new() -> Self {
        Self
    }
}

fn blob_err(op: &str, path: &str, e: std::io::Error) -> SettlementError {
    SettlementError::Blob(format!("{} {}: {}", op, path, e))
}

async fn ensure_parent(path: &str) -> SettlementResult<()> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| blob_err("mkdir", path, e))?;
    }
    Ok(())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, path: &str, content: &[u8]) -> SettlementResult<()> {
        ensure_parent(path).await?;
        // Write then rename so a reader never sees a partial file.
        let tmp = format!("{}.part", path);
        fs::write(&tmp, content)
            .await
            .map_err(|e| blob_err("write", &tmp, e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| blob_err("rename", path, e))?;
        tracing::debug!(path, bytes = content.len(), "Blob uploaded");
        Ok(())
    }

    async fn list(&self, folder: &str) -> SettlementResult<Vec<String>> {
        let mut entries = match fs::read_dir(folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(blob_err("list", folder, e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| blob_err("list", folder, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| blob_err("stat", folder, e))?;
            let path = entry.path();
            let is_partial = path.extension().is_some_and(|ext| ext == "part");
            if file_type.is_file() && !is_partial {
                paths.push(path.to_string_lossy().into_owned());
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn read(&self, path: &str) -> SettlementResult<Vec<u8>> {
        fs::read(path).await.map_err(|e| blob_err("read", path, e))
    }

    async fn move_file(&self, src: &str, dst: &str) -> SettlementResult<()> {
        ensure_parent(dst).await?;
        fs::rename(src, dst)
            .await
            .map_err(|e| blob_err("move", src, e))?;
        tracing::debug!(src, dst, "Blob moved");
        Ok(())
    }
}
