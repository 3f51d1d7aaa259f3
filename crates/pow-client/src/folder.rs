//! Folder staging.
//!
//! Each file is added on its own; the folder's cid is that of a
//! [`FolderManifest`] listing every file by relative path, staged with the
//! `dag-json` codec.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use pow_core::rpc::{FolderEntry, FolderManifest};
use pow_core::{Cid, Codec};

use crate::client::PowClient;
use crate::error::ClientError;

/// Regular files under `root`, recursively, in a stable order.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, ClientError> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| ClientError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ClientError::io(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| ClientError::io(&path, e))?;
            if file_type.is_dir() {
                dirs.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// `path` relative to `root`, `/`-separated.
pub fn relative_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

impl PowClient {
    /// Stage every file under `root` and then its manifest.
    pub async fn stage_folder(&self, root: &Path) -> Result<Cid, ClientError> {
        let mut manifest = FolderManifest::default();
        for path in walk_files(root)? {
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| ClientError::io(&path, e))?;
            let size = data.len() as u64;
            let cid = self.ipfs_add(Bytes::from(data), Codec::Raw).await?;
            manifest.entries.push(FolderEntry {
                path: relative_name(root, &path),
                cid,
                size,
            });
        }
        let body = serde_json::to_vec(&manifest).map_err(|e| ClientError::Decode {
            endpoint: "stage_folder".into(),
            message: e.to_string(),
        })?;
        let cid = self.ipfs_add(Bytes::from(body), Codec::DagJson).await?;
        tracing::debug!(root = %root.display(), files = manifest.entries.len(), cid = %cid, "staged folder");
        Ok(cid)
    }

    /// Stage a single file.
    pub async fn stage_file(&self, path: &Path) -> Result<Cid, ClientError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| ClientError::io(path, e))?;
        self.ipfs_add(Bytes::from(data), Codec::Raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_nested_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b/c")).unwrap();
        std::fs::write(dir.path().join("z.txt"), b"z").unwrap();
        std::fs::write(dir.path().join("b/c/deep.bin"), b"d").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let names: Vec<String> = walk_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| relative_name(dir.path(), p))
            .collect();
        assert_eq!(names, vec!["a.txt", "b/c/deep.bin", "z.txt"]);
    }

    #[test]
    fn missing_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = walk_files(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ClientError::Io { .. }));
    }
}
