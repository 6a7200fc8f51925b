//! Node provider interface consumed by the protocol server.
//!
//! Paths are protocol paths (`/dir/file`). Providers resolve them, report
//! attributes and open seekable streams; the server never touches the
//! backing store directly.

pub mod local;

pub use local::LocalFileSystem;

use crate::checksum::HashAlgorithm;
use crate::error::{Result, VfsError};
use crate::protocol_core::Attributes;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::File => "f",
            NodeType::Directory => "d",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f" | "file" => Ok(NodeType::File),
            "d" | "dir" | "directory" => Ok(NodeType::Directory),
            _ => Err(VfsError::invalid_value("type", s)),
        }
    }
}

/// Snapshot of a node's attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttributes {
    pub name: String,
    pub path: String,
    pub node_type: NodeType,
    pub exists: bool,
    pub length: Option<u64>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl NodeAttributes {
    pub fn missing(path: &str, node_type: NodeType) -> Self {
        Self {
            name: crate::protocol_core::clean_path(path)
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
            path: crate::protocol_core::clean_path(path),
            node_type,
            exists: false,
            length: None,
            created: None,
            modified: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.node_type == NodeType::Directory
    }

    /// `NAME= PATH= TYPE= EXISTS= [LENGTH=] [CREATED=] [MODIFIED=]`
    pub fn to_wire(&self) -> Attributes {
        let mut a = Attributes::new()
            .with("NAME", &self.name)
            .with("PATH", &self.path)
            .with("TYPE", self.node_type.as_str())
            .with("EXISTS", self.exists);
        if let Some(len) = self.length {
            a.push("LENGTH", len);
        }
        if let Some(t) = self.created {
            a.push("CREATED", t.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        if let Some(t) = self.modified {
            a.push("MODIFIED", t.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        a
    }

    pub fn from_wire(a: &Attributes) -> Result<Self> {
        let time = |key: &str| -> Result<Option<DateTime<Utc>>> {
            a.get(key)
                .map(|v| {
                    DateTime::parse_from_rfc3339(v)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|_| VfsError::Protocol(format!("{}={} is not a timestamp", key, v)))
                })
                .transpose()
        };
        Ok(Self {
            name: a.require("NAME")?.to_string(),
            path: a.require("PATH")?.to_string(),
            node_type: NodeType::parse(a.require("TYPE")?)?,
            exists: a.require("EXISTS")? == "true",
            length: a.get("LENGTH").map(|_| a.require_u64("LENGTH")).transpose()?,
            created: time("CREATED")?,
            modified: time("MODIFIED")?,
        })
    }
}

/// How RANDOMACCESS opens its target (mirrors the usual file-mode set)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Must exist
    Open,
    /// Create or truncate
    Create,
    /// Must not exist
    CreateNew,
    /// Open or create
    OpenOrCreate,
    /// Must exist; emptied
    Truncate,
    /// Open or create, positioned at the end
    Append,
}

impl OpenMode {
    pub const NAMES: &'static [&'static str] =
        &["open", "create", "createnew", "opencreate", "truncate", "append"];

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(OpenMode::Open),
            "create" => Ok(OpenMode::Create),
            "createnew" => Ok(OpenMode::CreateNew),
            "opencreate" | "openorcreate" => Ok(OpenMode::OpenOrCreate),
            "truncate" => Ok(OpenMode::Truncate),
            "append" => Ok(OpenMode::Append),
            _ => Err(VfsError::invalid_value("mode", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Open => "open",
            OpenMode::Create => "create",
            OpenMode::CreateNew => "createnew",
            OpenMode::OpenOrCreate => "opencreate",
            OpenMode::Truncate => "truncate",
            OpenMode::Append => "append",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    Read,
    Write,
    ReadWrite,
}

impl FileAccess {
    pub const NAMES: &'static [&'static str] = &["read", "write", "readwrite"];

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(FileAccess::Read),
            "write" => Ok(FileAccess::Write),
            "readwrite" => Ok(FileAccess::ReadWrite),
            _ => Err(VfsError::invalid_value("access", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileAccess::Read => "read",
            FileAccess::Write => "write",
            FileAccess::ReadWrite => "readwrite",
        }
    }

    pub fn can_read(&self) -> bool {
        matches!(self, FileAccess::Read | FileAccess::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, FileAccess::Write | FileAccess::ReadWrite)
    }
}

/// Advisory sharing requested by the opener. Local files ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileShare {
    None,
    Read,
    Write,
    ReadWrite,
}

impl FileShare {
    pub const NAMES: &'static [&'static str] = &["none", "read", "write", "readwrite"];

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(FileShare::None),
            "read" => Ok(FileShare::Read),
            "write" => Ok(FileShare::Write),
            "readwrite" => Ok(FileShare::ReadWrite),
            _ => Err(VfsError::invalid_value("share", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileShare::None => "none",
            FileShare::Read => "read",
            FileShare::Write => "write",
            FileShare::ReadWrite => "readwrite",
        }
    }
}

/// Cooperative stop signal for long operations (COPY)
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<StopInner>);

#[derive(Debug, Default)]
struct StopInner {
    flag: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal; callable from any thread.
    pub fn stop(&self) {
        self.0.flag.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.0.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_stopped() {
            Err(VfsError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once [`StopSignal::stop`] has been called.
    pub async fn stopped(&self) {
        loop {
            // Registered before the flag check so a concurrent stop is not missed
            let notified = self.0.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// Seekable byte stream opened by RANDOMACCESS
#[async_trait]
pub trait RandomAccessStream: AsyncRead + AsyncWrite + AsyncSeek + Send + Unpin {
    async fn length(&mut self) -> io::Result<u64>;
    async fn set_length(&mut self, len: u64) -> io::Result<()>;
}

#[async_trait]
impl RandomAccessStream for tokio::fs::File {
    async fn length(&mut self) -> io::Result<u64> {
        use tokio::io::AsyncWriteExt;
        // Pending writes must land before the size is observed
        self.flush().await?;
        Ok(self.metadata().await?.len())
    }

    async fn set_length(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len).await
    }
}

/// The node-resolution API
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Attributes of a node; `exists == false` when nothing is there.
    async fn attributes(&self, path: &str) -> Result<NodeAttributes>;

    /// Children of a directory
    async fn list(&self, dir: &str) -> Result<Vec<NodeAttributes>>;

    async fn create(&self, path: &str, node_type: NodeType, create_parents: bool) -> Result<()>;

    async fn delete(&self, path: &str, node_type: Option<NodeType>, recursive: bool) -> Result<()>;

    /// Copy a file or directory tree; returns bytes copied.
    async fn copy(&self, src: &str, dst: &str, overwrite: bool, stop: StopSignal) -> Result<u64>;

    async fn rename(&self, src: &str, dst: &str, overwrite: bool) -> Result<()>;

    async fn open(
        &self,
        path: &str,
        mode: OpenMode,
        access: FileAccess,
        share: FileShare,
    ) -> Result<Box<dyn RandomAccessStream>>;

    async fn compute_hash(
        &self,
        path: &str,
        algorithm: HashAlgorithm,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Vec<u8>>;

    async fn set_modified(&self, path: &str, modified: DateTime<Utc>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_attributes_wire_form() {
        let attrs = NodeAttributes {
            name: "a b.txt".into(),
            path: "/docs/a b.txt".into(),
            node_type: NodeType::File,
            exists: true,
            length: Some(12),
            created: None,
            modified: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()),
        };
        let line = attrs.to_wire().to_string();
        assert!(line.contains("MODIFIED=2024-05-01T12:30:00.000Z"));
        let back = crate::protocol_core::Response::parse(&format!("ENTRY {}", line)).unwrap();
        match back {
            crate::protocol_core::Response::Entry(a) => {
                assert_eq!(NodeAttributes::from_wire(&a).unwrap(), attrs)
            }
            other => panic!("unexpected {other:?}"),
        }
        let missing = NodeAttributes::missing("/x/", NodeType::Directory);
        assert_eq!(missing.name, "x");
        assert!(!missing.exists);
    }

    #[test]
    fn test_open_mode_and_access() {
        assert_eq!(OpenMode::parse("OpenCreate").unwrap(), OpenMode::OpenOrCreate);
        for name in OpenMode::NAMES {
            assert_eq!(OpenMode::parse(name).unwrap().as_str(), *name);
        }
        assert!(FileAccess::ReadWrite.can_read() && FileAccess::ReadWrite.can_write());
        assert!(!FileAccess::Read.can_write());
        assert!(FileShare::parse("exclusive").is_err());
    }

    #[tokio::test]
    async fn test_stop_signal_wakes_waiter() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.stopped().await })
        };
        tokio::task::yield_now().await;
        assert!(stop.check().is_ok());
        stop.stop();
        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(stop.check(), Err(VfsError::Cancelled)));
    }
}
