use async_trait::async_trait;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod local;

pub use local::LocalBackend;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur in backend operations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("File or directory not found")]
    NotFound,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("File already exists")]
    AlreadyExists,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Is a directory")]
    IsADirectory,
    #[error("Directory not empty")]
    DirectoryNotEmpty,
    #[error("I/O error: {0}")]
    Io(String),
}

/// Directory entry returned by list_dir
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub attrs: FileInfo,
}

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub size: u64,
    pub is_dir: bool,
    pub permissions: u32,
    pub mtime: u32,
    pub atime: u32,
    pub uid: u32,
    pub gid: u32,
}

impl FileInfo {
    /// Synthetic attributes for a directory (used for `.` and `..`)
    pub fn directory() -> Self {
        let now = current_timestamp();
        Self {
            size: 4096,
            is_dir: true,
            permissions: 0o040755,
            mtime: now,
            atime: now,
            uid: 0,
            gid: 0,
        }
    }

    /// Synthetic attributes for a regular file of `size` bytes
    pub fn file(size: u64) -> Self {
        let now = current_timestamp();
        Self {
            size,
            is_dir: false,
            permissions: 0o100644,
            mtime: now,
            atime: now,
            uid: 0,
            gid: 0,
        }
    }
}

/// Storage the SFTP engine handler operates on.
///
/// Paths are normalized with [`normalize_path`] before they reach a backend:
/// relative to the served root, no leading slash, empty for the root itself.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// List directory contents, including "." and ".."
    async fn list_dir(&self, path: &str) -> BackendResult<Vec<DirEntry>>;

    /// Get file or directory information
    async fn file_info(&self, path: &str) -> BackendResult<FileInfo>;

    /// Create a directory. Parent directories must exist.
    async fn make_dir(&self, path: &str) -> BackendResult<()>;

    /// Delete an empty directory
    async fn del_dir(&self, path: &str) -> BackendResult<()>;

    /// Delete a file
    async fn delete(&self, path: &str) -> BackendResult<()>;

    /// Rename/move a file or directory
    async fn rename(&self, src: &str, dst: &str) -> BackendResult<()>;

    /// Read entire file contents
    async fn read_file(&self, path: &str) -> BackendResult<Bytes>;

    /// Create or overwrite the file at `path`
    async fn write_file(&self, path: &str, content: Bytes) -> BackendResult<()>;
}

/// Normalize a client path relative to the served root.
///
/// `.` components are dropped and `..` pops one component, never going
/// above the root. The result has no leading or trailing slash; the root
/// itself is the empty string.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Get current Unix timestamp
pub fn current_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_root_forms() {
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path("."), "");
        assert_eq!(normalize_path("/./"), "");
    }

    #[test]
    fn test_normalize_nested() {
        assert_eq!(normalize_path("/a/b/"), "a/b");
        assert_eq!(normalize_path("a//b"), "a/b");
        assert_eq!(normalize_path("./a/./b"), "a/b");
        assert_eq!(normalize_path("a/b/../c"), "a/c");
    }

    #[test]
    fn test_normalize_cannot_escape_root() {
        assert_eq!(normalize_path(".."), "");
        assert_eq!(normalize_path("/../../etc/passwd"), "etc/passwd");
        assert_eq!(normalize_path("a/../../b"), "b");
    }

    proptest! {
        #[test]
        fn prop_normalized_has_no_dot_components(path in "[a-z./]{0,40}") {
            let normalized = normalize_path(&path);
            prop_assert!(!normalized.starts_with('/'));
            prop_assert!(!normalized.ends_with('/'));
            prop_assert!(normalized
                .split('/')
                .all(|c| c != ".." && c != "."));
        }

        #[test]
        fn prop_normalize_is_idempotent(path in "[a-z./]{0,40}") {
            let once = normalize_path(&path);
            prop_assert_eq!(normalize_path(&once), once.clone());
        }
    }
}
