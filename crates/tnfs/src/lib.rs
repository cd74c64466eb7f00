#![forbid(unsafe_code)]
//! Asynchronous TNFS client library for Rust.
//!
//! TNFS (Trivial Network File System) is a small UDP protocol serving files to
//! 8-bit machines and their emulated peripherals. This crate implements the
//! client side on tokio: the packet codec, the retrying transaction engine,
//! session management, the directory and file commands, and a storage backend
//! interface a device emulation layer can drive.
//!
//! # Overview
//!
//! Every request is one datagram answered by one datagram. The client numbers
//! each transmission with an 8-bit sequence number and only accepts an answer
//! echoing it; anything else is stale and discarded. An attempt without an
//! answer is retried, no sooner than the minimum interval the server asked for
//! when the session was mounted. Only one request is ever in flight per
//! session, because the server keeps file positions and directory cursors
//! that reordered requests would corrupt.
//!
//! # Example
//!
//! ```no_run
//! use tnfs::{session::{MountOptions, Session}, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut session = Session::connect(MountOptions::new("tnfs.example")).await?;
//!     session.mount().await?;
//!
//!     for name in session.list_dir("/").await? {
//!         println!("{}", name);
//!     }
//!
//!     session.umount().await
//! }
//! ```
//!
//! # Errors
//!
//! Failures come in two layers. A server answer with a non-zero result code
//! is [`Error::Tnfs`] and carries the code verbatim; it is never retried. No
//! answer at all after every attempt is [`Error::NoResponse`], and the caller
//! cannot know whether the request was lost or only its answer. Commands that
//! create or remove entries return the raw [`ResultCode`] instead, so "already
//! exists" can be told apart from other failures.
//!
//! # Device layer
//!
//! [`adapter::Protocol`] is the backend-agnostic interface a device talks to;
//! [`tnfs_adapter::TnfsProtocol`] implements it on top of a mount.
pub mod adapter;
mod commands;
pub mod error;
pub mod fcall;
pub mod serialize;
pub mod session;
pub mod tnfs_adapter;
pub mod transaction;
pub mod transport;
#[macro_use]
pub mod utils;

pub use crate::error::Error;
pub use crate::error::errno;
pub use crate::error::string as errstr;
pub use crate::fcall::*;
pub use crate::utils::Result;
