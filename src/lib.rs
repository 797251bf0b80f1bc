//! # Shellstream
//!
//! Async expect engine for remote shell byte streams.
//!
//! Shellstream sits on top of a bidirectional raw byte channel (an SSH
//! shell via russh, or anything else that speaks bytes) and lets callers
//! declare patterns — literal text or regular expressions — together with
//! actions, then suspend until incoming data satisfies one of them or a
//! deadline elapses.
//!
//! ## Features
//!
//! - Incremental matching against a continuously growing buffer: matches
//!   spanning multiple network reads are found once the data concatenates
//! - Multiple simultaneous patterns with deterministic declaration-order
//!   tie-breaking, and multiple concurrent waiters served FIFO
//! - Blocking (`expect`) and begin/end (`begin_expect` / `end_expect`)
//!   completion styles over one shared [`PendingOperation`] token contract,
//!   reused by command execution and remote file operations
//! - Timeouts are silent, not errors: an elapsed expect returns `None`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shellstream::transport::{SshConfig, SshTransport};
//! use shellstream::{ExpectAction, ShellStream, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), shellstream::Error> {
//!     let transport = SshTransport::connect(SshConfig::password(
//!         "192.168.1.1",
//!         "admin",
//!         "secret",
//!     ))
//!     .await?;
//!
//!     let stream = ShellStream::new(transport.open_shell().await?, StreamConfig::default());
//!     stream.start()?;
//!
//!     stream
//!         .expect(vec![ExpectAction::regex(r"[$#]\s*$", |_| {})?])
//!         .await?;
//!     stream.write_line("uname -a").await?;
//!     println!("{}", stream.read_line().await?);
//!
//!     stream.stop()?;
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod error;
pub mod events;
pub mod pattern;
pub mod pending;
pub mod remote_fs;
pub mod stream;
pub mod transport;

// Re-export main types for convenience
pub use command::RemoteCommand;
pub use error::{
    CommandError, Error, FileError, Result, StreamError, TransportError, UsageError,
};
pub use events::{ByteStream, StreamEvent};
pub use pattern::{ExpectAction, Pattern};
pub use pending::{CompletionCallback, OperationHandle, OperationState, PendingOperation};
pub use remote_fs::{FileAttributes, FileHandle, FsRequest, RemoteFs};
pub use stream::{ExpectMatch, ShellStream, Status, StreamConfig};
pub use transport::{AuthMethod, ShellChannel, SshConfig, SshTransport};
