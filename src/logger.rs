//! Audit log of security relevant server events.
//!
//! Diagnostics go through the `log` facade; this trait records what a
//! server operator may need to reconstruct later (who logged in, which
//! tickets were issued and claimed, what was deleted).

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub trait Logger: Send + Sync {
    fn login(&self, _peer: SocketAddr, _user: &str, _accepted: bool) {}
    fn download(&self, _peer: SocketAddr, _ticket: &str, _path: &str, _length: u64) {}
    fn claim(&self, _peer: SocketAddr, _ticket: &str, _accepted: bool) {}
    fn delete(&self, _peer: SocketAddr, _path: &str) {}
    fn error(&self, _peer: SocketAddr, _command: &str, _msg: &str) {}
    fn disconnect(&self, _peer: SocketAddr, _bytes_read: u64, _bytes_written: u64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {}", path.display()))
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: Mutex::new(open_append(path.as_ref())?),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn login(&self, peer: SocketAddr, user: &str, accepted: bool) {
        self.line(&format!("LOGIN peer={} user={} accepted={}", peer, user, accepted));
    }
    fn download(&self, peer: SocketAddr, ticket: &str, path: &str, length: u64) {
        self.line(&format!(
            "DOWNLOAD peer={} ticket={} path={} length={}",
            peer, ticket, path, length
        ));
    }
    fn claim(&self, peer: SocketAddr, ticket: &str, accepted: bool) {
        self.line(&format!("CLAIM peer={} ticket={} accepted={}", peer, ticket, accepted));
    }
    fn delete(&self, peer: SocketAddr, path: &str) {
        self.line(&format!("DELETE peer={} path={}", peer, path));
    }
    fn error(&self, peer: SocketAddr, command: &str, msg: &str) {
        self.line(&format!("ERROR peer={} cmd={} msg={}", peer, command, msg));
    }
    fn disconnect(&self, peer: SocketAddr, bytes_read: u64, bytes_written: u64) {
        self.line(&format!("BYE peer={peer} read={bytes_read} written={bytes_written}"));
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    Login { user: String, accepted: bool },
    Download { ticket: String, path: String, length: u64 },
    Claim { ticket: String, accepted: bool },
    Delete { path: String },
    Error { command: String, message: String },
    Disconnect { bytes_read: u64, bytes_written: u64 },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuditRecord {
    pub timestamp: String,
    pub peer: String,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// One JSON object per line
pub struct JsonLogger {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(open_append(path.as_ref())?),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(&self, peer: SocketAddr, event: AuditEvent) {
        let rec = AuditRecord {
            timestamp: Utc::now().to_rfc3339(),
            peer: peer.to_string(),
            event,
        };
        let mut f = self.file.lock();
        if serde_json::to_writer(&mut *f, &rec).is_ok() {
            let _ = f.write_all(b"\n");
        }
    }

    /// Read back every record of a JSONL audit file.
    pub fn read_log(path: &Path) -> Result<Vec<AuditRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path).context("open audit log for reading")?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line).context("parse audit record")?);
        }
        Ok(entries)
    }
}

impl Logger for JsonLogger {
    fn login(&self, peer: SocketAddr, user: &str, accepted: bool) {
        self.record(peer, AuditEvent::Login { user: user.to_string(), accepted });
    }
    fn download(&self, peer: SocketAddr, ticket: &str, path: &str, length: u64) {
        self.record(
            peer,
            AuditEvent::Download {
                ticket: ticket.to_string(),
                path: path.to_string(),
                length,
            },
        );
    }
    fn claim(&self, peer: SocketAddr, ticket: &str, accepted: bool) {
        self.record(peer, AuditEvent::Claim { ticket: ticket.to_string(), accepted });
    }
    fn delete(&self, peer: SocketAddr, path: &str) {
        self.record(peer, AuditEvent::Delete { path: path.to_string() });
    }
    fn error(&self, peer: SocketAddr, command: &str, msg: &str) {
        self.record(
            peer,
            AuditEvent::Error {
                command: command.to_string(),
                message: msg.to_string(),
            },
        );
    }
    fn disconnect(&self, peer: SocketAddr, bytes_read: u64, bytes_written: u64) {
        self.record(peer, AuditEvent::Disconnect { bytes_read, bytes_written });
    }
}
