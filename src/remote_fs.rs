//! Remote file operations through the begin/end completion contract.
//!
//! Status, open, read, and path resolution each produce their own result
//! type through the same [`PendingOperation`] token the expect engine and
//! command execution use. The wire protocol behind the requests is the
//! transport's business: a [`RemoteFs`] just dispatches [`FsRequest`]s to
//! whatever backend serves them and completes each reply handle.

use tokio::sync::mpsc;

use crate::error::{FileError, Result, UsageError};
use crate::pending::{self, CompletionCallback, OperationHandle, PendingOperation};

/// Attributes of a remote file, as reported by a stat request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileAttributes {
    /// Size in bytes.
    pub size: u64,

    /// Owner user id.
    pub uid: u32,

    /// Owner group id.
    pub gid: u32,

    /// Permission bits.
    pub permissions: u32,

    /// Last access time, seconds since the Unix epoch.
    pub atime: i64,

    /// Last modification time, seconds since the Unix epoch.
    pub mtime: i64,

    /// Whether the entry is a directory.
    pub is_directory: bool,
}

/// Opaque handle to an opened remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle(Vec<u8>);

impl FileHandle {
    /// Wrap the remote side's handle bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw handle bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One request dispatched to the file backend. The backend completes (or
/// faults) the reply handle exactly once.
#[derive(Debug)]
pub enum FsRequest {
    /// Stat a path.
    Stat {
        path: String,
        reply: OperationHandle<FileAttributes>,
    },

    /// Open a file and return its handle.
    Open {
        path: String,
        reply: OperationHandle<FileHandle>,
    },

    /// Read `length` bytes at `offset` from an open file.
    Read {
        handle: FileHandle,
        offset: u64,
        length: u32,
        reply: OperationHandle<Vec<u8>>,
    },

    /// Canonicalize a path on the remote side.
    RealPath {
        path: String,
        reply: OperationHandle<String>,
    },
}

/// Client for remote file operations.
///
/// Each `begin_*` sends one request and returns its completion token
/// immediately; the matching `end_*` finalizes it. Tokens are tied to the
/// `RemoteFs` that created them.
#[derive(Debug)]
pub struct RemoteFs {
    origin: u64,
    requests: mpsc::UnboundedSender<FsRequest>,
}

impl RemoteFs {
    /// Create a client dispatching to `requests`.
    pub fn new(requests: mpsc::UnboundedSender<FsRequest>) -> Self {
        Self {
            origin: pending::next_origin(),
            requests,
        }
    }

    fn dispatch(&self, request: FsRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| FileError::Closed)?;
        Ok(())
    }

    fn check_origin<T>(&self, op: &PendingOperation<T>) -> Result<()> {
        if op.origin() != self.origin {
            return Err(UsageError::ForeignOperation.into());
        }
        Ok(())
    }

    /// Begin a stat request.
    pub fn begin_stat(
        &self,
        path: impl Into<String>,
        callback: Option<CompletionCallback>,
    ) -> Result<PendingOperation<FileAttributes>> {
        let (op, reply) = PendingOperation::new(self.origin, callback);
        self.dispatch(FsRequest::Stat {
            path: path.into(),
            reply,
        })?;
        Ok(op)
    }

    /// Finalize a stat token.
    pub async fn end_stat(&self, op: &mut PendingOperation<FileAttributes>) -> Result<FileAttributes> {
        self.check_origin(op)?;
        op.wait().await
    }

    /// Begin an open request.
    pub fn begin_open(
        &self,
        path: impl Into<String>,
        callback: Option<CompletionCallback>,
    ) -> Result<PendingOperation<FileHandle>> {
        let (op, reply) = PendingOperation::new(self.origin, callback);
        self.dispatch(FsRequest::Open {
            path: path.into(),
            reply,
        })?;
        Ok(op)
    }

    /// Finalize an open token.
    pub async fn end_open(&self, op: &mut PendingOperation<FileHandle>) -> Result<FileHandle> {
        self.check_origin(op)?;
        op.wait().await
    }

    /// Begin a read request.
    pub fn begin_read(
        &self,
        handle: FileHandle,
        offset: u64,
        length: u32,
        callback: Option<CompletionCallback>,
    ) -> Result<PendingOperation<Vec<u8>>> {
        let (op, reply) = PendingOperation::new(self.origin, callback);
        self.dispatch(FsRequest::Read {
            handle,
            offset,
            length,
            reply,
        })?;
        Ok(op)
    }

    /// Finalize a read token.
    pub async fn end_read(&self, op: &mut PendingOperation<Vec<u8>>) -> Result<Vec<u8>> {
        self.check_origin(op)?;
        op.wait().await
    }

    /// Begin a path resolution request.
    pub fn begin_real_path(
        &self,
        path: impl Into<String>,
        callback: Option<CompletionCallback>,
    ) -> Result<PendingOperation<String>> {
        let (op, reply) = PendingOperation::new(self.origin, callback);
        self.dispatch(FsRequest::RealPath {
            path: path.into(),
            reply,
        })?;
        Ok(op)
    }

    /// Finalize a path resolution token.
    pub async fn end_real_path(&self, op: &mut PendingOperation<String>) -> Result<String> {
        self.check_origin(op)?;
        op.wait().await
    }

    /// Convenience: stat in one call.
    pub async fn stat(&self, path: impl Into<String>) -> Result<FileAttributes> {
        let mut op = self.begin_stat(path, None)?;
        self.end_stat(&mut op).await
    }

    /// Convenience: open in one call.
    pub async fn open(&self, path: impl Into<String>) -> Result<FileHandle> {
        let mut op = self.begin_open(path, None)?;
        self.end_open(&mut op).await
    }

    /// Convenience: read in one call.
    pub async fn read(&self, handle: FileHandle, offset: u64, length: u32) -> Result<Vec<u8>> {
        let mut op = self.begin_read(handle, offset, length, None)?;
        self.end_read(&mut op).await
    }

    /// Convenience: resolve a path in one call.
    pub async fn real_path(&self, path: impl Into<String>) -> Result<String> {
        let mut op = self.begin_real_path(path, None)?;
        self.end_real_path(&mut op).await
    }
}
