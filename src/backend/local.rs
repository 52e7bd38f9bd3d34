use super::{normalize_path, Backend, BackendError, BackendResult, DirEntry, FileInfo};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Serves a single directory of the host filesystem.
///
/// Client paths are confined to `root` by [`normalize_path`]; symlinks inside
/// the root are followed as the host resolves them.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        let normalized = normalize_path(path);
        if normalized.is_empty() {
            self.root.clone()
        } else {
            self.root.join(normalized)
        }
    }

    fn map_io_error(err: std::io::Error) -> BackendError {
        match err.kind() {
            ErrorKind::NotFound => BackendError::NotFound,
            ErrorKind::PermissionDenied => BackendError::PermissionDenied,
            ErrorKind::AlreadyExists => BackendError::AlreadyExists,
            ErrorKind::DirectoryNotEmpty => BackendError::DirectoryNotEmpty,
            ErrorKind::IsADirectory => BackendError::IsADirectory,
            ErrorKind::NotADirectory => BackendError::NotADirectory,
            _ => BackendError::Io(err.to_string()),
        }
    }

    fn metadata_to_info(metadata: &std::fs::Metadata) -> FileInfo {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let atime = metadata
            .accessed()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32)
            .unwrap_or(mtime);

        #[cfg(unix)]
        let (permissions, uid, gid) = {
            use std::os::unix::fs::MetadataExt;
            (metadata.mode(), metadata.uid(), metadata.gid())
        };

        #[cfg(not(unix))]
        let (permissions, uid, gid) = if metadata.is_dir() {
            (0o040755, 0, 0)
        } else if metadata.permissions().readonly() {
            (0o100444, 0, 0)
        } else {
            (0o100644, 0, 0)
        };

        FileInfo {
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            permissions,
            mtime,
            atime,
            uid,
            gid,
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn list_dir(&self, path: &str) -> BackendResult<Vec<DirEntry>> {
        let full_path = self.full_path(path);
        debug!(path = %full_path.display(), "Listing directory");

        let mut entries = vec![
            DirEntry {
                name: ".".to_string(),
                attrs: FileInfo::directory(),
            },
            DirEntry {
                name: "..".to_string(),
                attrs: FileInfo::directory(),
            },
        ];

        let mut read_dir = fs::read_dir(&full_path).await.map_err(Self::map_io_error)?;
        while let Some(entry) = read_dir.next_entry().await.map_err(Self::map_io_error)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Entries can vanish between readdir and stat
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::map_io_error(e)),
            };
            entries.push(DirEntry {
                name,
                attrs: Self::metadata_to_info(&metadata),
            });
        }

        Ok(entries)
    }

    async fn file_info(&self, path: &str) -> BackendResult<FileInfo> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path).await.map_err(Self::map_io_error)?;
        Ok(Self::metadata_to_info(&metadata))
    }

    async fn make_dir(&self, path: &str) -> BackendResult<()> {
        let full_path = self.full_path(path);
        debug!(path = %full_path.display(), "Creating directory");
        fs::create_dir(&full_path).await.map_err(Self::map_io_error)
    }

    async fn del_dir(&self, path: &str) -> BackendResult<()> {
        if normalize_path(path).is_empty() {
            return Err(BackendError::PermissionDenied);
        }
        let full_path = self.full_path(path);
        debug!(path = %full_path.display(), "Removing directory");
        fs::remove_dir(&full_path).await.map_err(Self::map_io_error)
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        let full_path = self.full_path(path);
        debug!(path = %full_path.display(), "Deleting file");
        fs::remove_file(&full_path)
            .await
            .map_err(Self::map_io_error)
    }

    async fn rename(&self, src: &str, dst: &str) -> BackendResult<()> {
        if normalize_path(src).is_empty() || normalize_path(dst).is_empty() {
            return Err(BackendError::PermissionDenied);
        }
        let src_path = self.full_path(src);
        let dst_path = self.full_path(dst);
        debug!(from = %src_path.display(), to = %dst_path.display(), "Renaming");
        fs::rename(&src_path, &dst_path)
            .await
            .map_err(Self::map_io_error)
    }

    async fn read_file(&self, path: &str) -> BackendResult<Bytes> {
        let full_path = self.full_path(path);
        debug!(path = %full_path.display(), "Reading file");
        let content = fs::read(&full_path).await.map_err(Self::map_io_error)?;
        Ok(Bytes::from(content))
    }

    async fn write_file(&self, path: &str, content: Bytes) -> BackendResult<()> {
        let full_path = self.full_path(path);
        debug!(path = %full_path.display(), len = content.len(), "Writing file");
        fs::write(&full_path, &content)
            .await
            .map_err(Self::map_io_error)
    }
}
