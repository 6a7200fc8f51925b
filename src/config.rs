//! TOML configuration for the daemon and the client.
//!
//! Every field has a default, so an empty file (or none at all) is valid.
//! Relative paths inside a file are resolved against the file's directory.

use crate::protocol::{timeouts, DEFAULT_MAX_BLOCK_SIZE, DEFAULT_PORT};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    /// Hex SHA-256 of the password
    pub password_sha256: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub root: PathBuf,
    pub ticket_ttl_secs: u64,
    pub max_block_size: usize,
    /// Offer `ADHOCENCRYPTION -mode=tls`
    pub tls: bool,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub audit_log: Option<PathBuf>,
    pub audit_format: AuditFormat,
    /// Empty means anonymous logins are accepted
    pub users: Vec<UserEntry>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: format!("127.0.0.1:{}", DEFAULT_PORT),
            root: PathBuf::from("."),
            ticket_ttl_secs: timeouts::TICKET_TTL_SECS,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            tls: true,
            tls_cert: None,
            tls_key: None,
            audit_log: None,
            audit_format: AuditFormat::default(),
            users: Vec::new(),
        }
    }
}

impl ServerSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg: ServerSettings = load_toml(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        cfg.root = join_base(base, &cfg.root);
        for p in [&mut cfg.tls_cert, &mut cfg.tls_key, &mut cfg.audit_log]
            .into_iter()
            .flatten()
        {
            *p = join_base(base, p);
        }
        Ok(cfg)
    }

    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.ticket_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientSettings {
    pub user: String,
    pub password: String,
    /// Upgrade every connection with ADHOCENCRYPTION -mode=tls
    pub tls: bool,
    pub known_hosts: Option<PathBuf>,
    pub pool_idle_secs: u64,
    pub attribute_ttl_secs: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            user: "anonymous".to_string(),
            password: String::new(),
            tls: false,
            known_hosts: None,
            pool_idle_secs: timeouts::POOL_IDLE_SECS,
            attribute_ttl_secs: timeouts::ATTRIBUTE_TTL_SECS,
            connect_timeout_ms: timeouts::CONNECT_MS,
        }
    }
}

impl ClientSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg: ClientSettings = load_toml(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(k) = &mut cfg.known_hosts {
            *k = join_base(base, k);
        }
        Ok(cfg)
    }

    pub fn pool_idle(&self) -> Duration {
        Duration::from_secs(self.pool_idle_secs)
    }

    pub fn attribute_ttl(&self) -> Duration {
        Duration::from_secs(self.attribute_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
}

fn join_base(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_settings_defaults_and_rebase() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("netvfsd.toml");
        fs::write(
            &path,
            r#"
bind = "0.0.0.0:7000"
root = "share"
audit_log = "/var/log/netvfs.jsonl"
audit_format = "json"

[[users]]
name = "alice"
password_sha256 = "abcd"
"#,
        )
        .unwrap();
        let cfg = ServerSettings::load(&path).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:7000");
        assert_eq!(cfg.root, tmp.path().join("share"));
        assert_eq!(cfg.audit_log, Some(PathBuf::from("/var/log/netvfs.jsonl")));
        assert_eq!(cfg.audit_format, AuditFormat::Json);
        assert_eq!(cfg.ticket_ttl_secs, timeouts::TICKET_TTL_SECS);
        assert_eq!(cfg.users.len(), 1);
    }

    #[test]
    fn test_client_settings_reject_bad_types() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("client.toml");
        fs::write(&path, "pool_idle_secs = \"soon\"").unwrap();
        assert!(ClientSettings::load(&path).is_err());

        fs::write(&path, "tls = true\nattribute_ttl_secs = 0").unwrap();
        let cfg = ClientSettings::load(&path).unwrap();
        assert!(cfg.tls);
        assert_eq!(cfg.attribute_ttl(), Duration::ZERO);
        assert_eq!(cfg.user, "anonymous");
    }
}
