//! gridway-remote — the remote-shell substrate.
//!
//! Every other component talks to hosts through [`RemoteClient`]:
//! command execution (buffered or line-streamed), file transfer, and a
//! per-host connection pool reused across calls within a run.
//!
//! Local hosts bypass SSH entirely — commands run in-process and file
//! transfers are plain copies. "Is this host local" is a first-class
//! cached predicate checked against the machine's own addresses, not a
//! loopback string match.

pub mod client;
pub mod error;
pub mod local;

pub use client::RemoteClient;
pub use error::{RemoteError, RemoteResult};
pub use local::LocalDetector;
