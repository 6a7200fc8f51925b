//! NetVFS
//!
//! A remote file system protocol over one persistent TCP connection: text
//! command lines and raw binary payloads share the socket, downloads are
//! handed to a second connection by ticket, and files can be driven as
//! random-access streams.

pub mod auth;
pub mod checksum;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod logger;
pub mod metering;
pub mod options;
pub mod protocol;
pub mod protocol_core;
pub mod server;
pub mod tls;
pub mod transport;
pub mod ttl;
pub mod url;
pub mod vfs;

pub use error::{ErrorCode, Result, VfsError};
