use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Largest file a write handle will buffer before flushing on close
pub const MAX_WRITE_BUFFER: usize = 256 * 1024 * 1024;

/// State behind an open SFTP handle
#[derive(Debug)]
pub enum HandleType {
    /// Directory handle; listing is returned in one batch
    Dir { path: String, read_done: bool },
    /// File opened for reading, content loaded at open time
    Read { path: String, content: Bytes },
    /// File opened for writing, flushed to the backend on close.
    /// Append handles ignore the request offset and write at the end.
    Write {
        path: String,
        buffer: Vec<u8>,
        append: bool,
    },
}

impl HandleType {
    pub fn path(&self) -> &str {
        match self {
            HandleType::Dir { path, .. }
            | HandleType::Read { path, .. }
            | HandleType::Write { path, .. } => path,
        }
    }
}

/// Open handles of one SFTP session
pub struct HandleManager {
    handles: RwLock<HashMap<String, HandleType>>,
}

impl HandleManager {
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, data: HandleType) -> String {
        let handle = Uuid::new_v4().simple().to_string();
        self.handles.write().insert(handle.clone(), data);
        handle
    }

    pub fn create_dir_handle(&self, path: String) -> String {
        self.insert(HandleType::Dir {
            path,
            read_done: false,
        })
    }

    pub fn create_read_handle(&self, path: String, content: Bytes) -> String {
        self.insert(HandleType::Read { path, content })
    }

    pub fn create_write_handle(&self, path: String, initial: Vec<u8>, append: bool) -> String {
        self.insert(HandleType::Write {
            path,
            buffer: initial,
            append,
        })
    }

    /// Run `f` on the state behind `handle` under the read lock
    pub fn with_handle<R>(&self, handle: &str, f: impl FnOnce(&HandleType) -> R) -> Option<R> {
        self.handles.read().get(handle).map(f)
    }

    /// Mark a directory handle as fully listed
    pub fn finish_dir(&self, handle: &str) {
        if let Some(HandleType::Dir { read_done, .. }) = self.handles.write().get_mut(handle) {
            *read_done = true;
        }
    }

    /// Write `data` at `offset` into a write handle's buffer, zero-filling gaps.
    /// Returns false if `handle` is not an open write handle or the write would
    /// grow the buffer past [`MAX_WRITE_BUFFER`].
    pub fn write_at(&self, handle: &str, offset: u64, data: &[u8]) -> bool {
        let mut handles = self.handles.write();
        let Some(HandleType::Write { buffer, append, .. }) = handles.get_mut(handle) else {
            return false;
        };

        let start = if *append {
            buffer.len()
        } else {
            match usize::try_from(offset) {
                Ok(start) => start,
                Err(_) => return false,
            }
        };
        let end = match start.checked_add(data.len()) {
            Some(end) if end <= MAX_WRITE_BUFFER => end,
            _ => return false,
        };

        if end > buffer.len() {
            buffer.resize(end, 0);
        }
        buffer[start..end].copy_from_slice(data);
        true
    }

    pub fn remove(&self, handle: &str) -> Option<HandleType> {
        self.handles.write().remove(handle)
    }
}

impl Default for HandleManager {
    fn default() -> Self {
        Self::new()
    }
}
