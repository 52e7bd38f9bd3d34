use crate::backend::{normalize_path, Backend, BackendError, FileInfo};
use crate::handle::{HandleManager, HandleType};
use bytes::Bytes;
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

fn to_file_attributes(info: &FileInfo) -> FileAttributes {
    FileAttributes {
        size: Some(info.size),
        permissions: Some(info.permissions),
        mtime: Some(info.mtime),
        atime: Some(info.atime),
        uid: Some(info.uid),
        gid: Some(info.gid),
        ..Default::default()
    }
}

/// `ls -l` style line for a directory entry
fn longname(name: &str, info: &FileInfo) -> String {
    let kind = if info.is_dir { 'd' } else { '-' };
    let mut mode = String::with_capacity(10);
    mode.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (info.permissions >> shift) & 0o7;
        mode.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        mode.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        mode.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    format!(
        "{} 1 {:<8} {:<8} {:>8} {}",
        mode, info.uid, info.gid, info.size, name
    )
}

const MUTATING_OPEN_FLAGS: OpenFlags = OpenFlags::WRITE
    .union(OpenFlags::APPEND)
    .union(OpenFlags::CREATE)
    .union(OpenFlags::TRUNCATE);

/// SFTP request handler run by the `russh-sftp` engine for one channel
pub struct SftpHandler<B: Backend> {
    backend: Arc<B>,
    handles: HandleManager,
    read_only: bool,
}

impl<B: Backend> SftpHandler<B> {
    pub fn new(backend: Arc<B>, read_only: bool) -> Self {
        Self {
            backend,
            handles: HandleManager::new(),
            read_only,
        }
    }

    /// Refuse a mutating operation when the server is read-only
    fn check_writable(&self, op: &str) -> Result<(), StatusCode> {
        if self.read_only {
            debug!(op, "Refusing mutating operation on read-only server");
            return Err(StatusCode::PermissionDenied);
        }
        Ok(())
    }
}

impl From<BackendError> for StatusCode {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound | BackendError::NotADirectory => StatusCode::NoSuchFile,
            BackendError::PermissionDenied => StatusCode::PermissionDenied,
            BackendError::AlreadyExists
            | BackendError::IsADirectory
            | BackendError::DirectoryNotEmpty
            | BackendError::Io(_) => StatusCode::Failure,
        }
    }
}

/// Copy at most `len` bytes starting at `offset`, or `Eof` past the end
fn read_chunk(content: &[u8], offset: u64, len: u32) -> Result<Vec<u8>, StatusCode> {
    let start = usize::try_from(offset).map_err(|_| StatusCode::Eof)?;
    if start >= content.len() {
        return Err(StatusCode::Eof);
    }
    let end = std::cmp::min(start.saturating_add(len as usize), content.len());
    Ok(content[start..end].to_vec())
}

fn ok_status(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en".to_string(),
    }
}

impl<B: Backend> russh_sftp::server::Handler for SftpHandler<B> {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        debug!(version, read_only = self.read_only, "SFTP init");
        Ok(Version::new())
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        debug!(id, handle = %handle, "Closing handle");

        match self.handles.remove(&handle) {
            Some(HandleType::Write { path, buffer, .. }) => {
                self.backend
                    .write_file(&path, Bytes::from(buffer))
                    .await
                    .map_err(StatusCode::from)?;
            }
            Some(_) => {}
            None => return Err(StatusCode::Failure),
        }

        Ok(ok_status(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        debug!(id, path = %path, "Opening directory");
        let normalized = normalize_path(&path);

        let info = self
            .backend
            .file_info(&normalized)
            .await
            .map_err(StatusCode::from)?;
        if !info.is_dir {
            return Err(StatusCode::NoSuchFile);
        }

        let handle = self.handles.create_dir_handle(normalized);
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        debug!(id, handle = %handle, "Reading directory");

        let path = self
            .handles
            .with_handle(&handle, |h| match h {
                HandleType::Dir { read_done: true, .. } => Err(StatusCode::Eof),
                HandleType::Dir { path, .. } => Ok(path.clone()),
                _ => Err(StatusCode::Failure),
            })
            .unwrap_or(Err(StatusCode::Failure))?;

        let entries = self
            .backend
            .list_dir(&path)
            .await
            .map_err(StatusCode::from)?;
        self.handles.finish_dir(&handle);

        let files = entries
            .into_iter()
            .map(|entry| File {
                longname: longname(&entry.name, &entry.attrs),
                attrs: to_file_attributes(&entry.attrs),
                filename: entry.name,
            })
            .collect();

        Ok(Name { id, files })
    }

    async fn open(
        &mut self,
        id: u32,
        path: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        debug!(id, path = %path, ?pflags, "Opening file");
        let normalized = normalize_path(&path);

        if !pflags.intersects(MUTATING_OPEN_FLAGS) {
            let content = self
                .backend
                .read_file(&normalized)
                .await
                .map_err(StatusCode::from)?;
            let handle = self.handles.create_read_handle(normalized, content);
            return Ok(Handle { id, handle });
        }

        self.check_writable("open")?;

        let existing = match self.backend.read_file(&normalized).await {
            Ok(content) => Some(content),
            Err(BackendError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        let initial = match existing {
            Some(_) if pflags.contains(OpenFlags::CREATE | OpenFlags::EXCLUDE) => {
                return Err(StatusCode::Failure);
            }
            Some(_) if pflags.contains(OpenFlags::TRUNCATE) => Vec::new(),
            Some(content) => content.to_vec(),
            None if pflags.contains(OpenFlags::CREATE) => {
                // Create eagerly so the file is visible while the handle is open
                self.backend
                    .write_file(&normalized, Bytes::new())
                    .await
                    .map_err(StatusCode::from)?;
                Vec::new()
            }
            None => return Err(StatusCode::NoSuchFile),
        };

        let append = pflags.contains(OpenFlags::APPEND);
        let handle = self.handles.create_write_handle(normalized, initial, append);
        Ok(Handle { id, handle })
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        debug!(id, handle = %handle, offset, len, "Reading file");

        let data = self
            .handles
            .with_handle(&handle, |h| match h {
                HandleType::Read { content, .. } => read_chunk(content, offset, len),
                HandleType::Write { buffer, .. } => read_chunk(buffer, offset, len),
                HandleType::Dir { .. } => Err(StatusCode::Failure),
            })
            .unwrap_or(Err(StatusCode::Failure))?;

        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        debug!(id, handle = %handle, offset, len = data.len(), "Writing file");
        self.check_writable("write")?;

        if !self.handles.write_at(&handle, offset, &data) {
            return Err(StatusCode::Failure);
        }
        Ok(ok_status(id))
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        debug!(id, path = %path, "Getting file stats");
        let info = self
            .backend
            .file_info(&normalize_path(&path))
            .await
            .map_err(StatusCode::from)?;

        Ok(Attrs {
            id,
            attrs: to_file_attributes(&info),
        })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        self.stat(id, path).await
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        let (path, size) = self
            .handles
            .with_handle(&handle, |h| {
                let size = match h {
                    HandleType::Read { content, .. } => Some(content.len() as u64),
                    HandleType::Write { buffer, .. } => Some(buffer.len() as u64),
                    HandleType::Dir { .. } => None,
                };
                (h.path().to_string(), size)
            })
            .ok_or(StatusCode::Failure)?;

        let mut info = match self.backend.file_info(&path).await {
            Ok(info) => info,
            Err(_) if size.is_none() => FileInfo::directory(),
            Err(_) => FileInfo::file(size.unwrap_or(0)),
        };
        if let Some(size) = size {
            info.size = size;
        }

        Ok(Attrs {
            id,
            attrs: to_file_attributes(&info),
        })
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let absolute = format!("/{}", normalize_path(&path));

        Ok(Name {
            id,
            files: vec![File {
                filename: absolute.clone(),
                longname: absolute,
                attrs: FileAttributes::default(),
            }],
        })
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        debug!(id, path = %path, "Creating directory");
        self.check_writable("mkdir")?;
        self.backend
            .make_dir(&normalize_path(&path))
            .await
            .map_err(StatusCode::from)?;

        Ok(ok_status(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        debug!(id, path = %path, "Removing directory");
        self.check_writable("rmdir")?;
        self.backend
            .del_dir(&normalize_path(&path))
            .await
            .map_err(StatusCode::from)?;

        Ok(ok_status(id))
    }

    async fn remove(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        debug!(id, path = %path, "Removing file");
        self.check_writable("remove")?;
        self.backend
            .delete(&normalize_path(&path))
            .await
            .map_err(StatusCode::from)?;

        Ok(ok_status(id))
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        debug!(id, from = %oldpath, to = %newpath, "Renaming");
        self.check_writable("rename")?;
        self.backend
            .rename(&normalize_path(&oldpath), &normalize_path(&newpath))
            .await
            .map_err(StatusCode::from)?;

        Ok(ok_status(id))
    }

    async fn setstat(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        self.check_writable("setstat")?;
        // Attribute changes are acknowledged but not applied
        self.backend
            .file_info(&normalize_path(&path))
            .await
            .map_err(StatusCode::from)?;
        Ok(ok_status(id))
    }

    async fn fsetstat(
        &mut self,
        id: u32,
        handle: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        self.check_writable("fsetstat")?;
        self.handles
            .with_handle(&handle, |_| ())
            .ok_or(StatusCode::Failure)?;
        Ok(ok_status(id))
    }
}
