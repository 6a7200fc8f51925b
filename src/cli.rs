//! Command-line definitions for netvfsd and netvfs, and how they override
//! the TOML settings.

use crate::config::{ClientSettings, ServerSettings};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Daemon options; anything given here wins over the config file
#[derive(Clone, Debug, Parser)]
#[command(name = "netvfsd", version, about = "Serve a directory over the NetVFS protocol")]
pub struct DaemonOpts {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Root directory to serve
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Refuse ADHOCENCRYPTION even though a certificate is available
    #[arg(long)]
    pub no_tls: bool,

    /// PEM certificate (a self-signed one is generated when omitted)
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for --tls-cert
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Append audit records to this file
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Seconds a download ticket stays claimable
    #[arg(long)]
    pub ticket_ttl_secs: Option<u64>,

    /// Largest READ/WRITE block accepted, in bytes
    #[arg(long)]
    pub max_block_size: Option<usize>,
}

impl DaemonOpts {
    pub fn settings(&self) -> Result<ServerSettings> {
        let mut s = match &self.config {
            Some(path) => ServerSettings::load(path)?,
            None => ServerSettings::default(),
        };
        if let Some(bind) = &self.bind {
            s.bind = bind.clone();
        }
        if let Some(root) = &self.root {
            s.root = root.clone();
        }
        if self.no_tls {
            s.tls = false;
        }
        if self.tls_cert.is_some() {
            s.tls_cert = self.tls_cert.clone();
            s.tls_key = self.tls_key.clone();
        }
        if self.audit_log.is_some() {
            s.audit_log = self.audit_log.clone();
        }
        if let Some(ttl) = self.ticket_ttl_secs {
            s.ticket_ttl_secs = ttl;
        }
        if let Some(max) = self.max_block_size {
            s.max_block_size = max;
        }
        Ok(s)
    }
}

#[derive(Clone, Debug, Parser)]
#[command(name = "netvfs", version, about = "Browse and transfer files on a NetVFS server")]
pub struct ClientOpts {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Login name
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Login password
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Upgrade connections to TLS
    #[arg(long, global = true)]
    pub tls: bool,

    /// known_hosts file for certificate pinning
    #[arg(long, global = true)]
    pub known_hosts: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ClientCommand,
}

/// Remote arguments are `netvfs://host[:port]/path` URLs. A second remote
/// argument may be a bare path on the same server.
#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// List a directory
    Ls { url: String },

    /// Show the attributes of a node
    Stat { url: String },

    /// Download a file
    Get {
        url: String,
        dest: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        length: Option<u64>,
    },

    /// Upload a file
    Put { source: PathBuf, url: String },

    /// Create a directory
    Mkdir {
        url: String,
        #[arg(short, long)]
        parents: bool,
    },

    /// Delete a file or directory
    Rm {
        url: String,
        #[arg(short, long)]
        recursive: bool,
    },

    /// Copy on the server (Ctrl-C cancels)
    Cp {
        source: String,
        dest: String,
        #[arg(long)]
        overwrite: bool,
    },

    /// Move or rename on the server
    Mv {
        source: String,
        dest: String,
        #[arg(long)]
        overwrite: bool,
    },

    /// Hash a file on the server
    Hash {
        url: String,
        #[arg(short, long, default_value = "sha256")]
        algorithm: String,
    },
}

impl ClientOpts {
    pub fn settings(&self) -> Result<ClientSettings> {
        let mut s = match &self.config {
            Some(path) => ClientSettings::load(path)?,
            None => ClientSettings::default(),
        };
        if let Some(user) = &self.user {
            s.user = user.clone();
        }
        if let Some(password) = &self.password {
            s.password = password.clone();
        }
        if self.tls {
            s.tls = true;
        }
        if self.known_hosts.is_some() {
            s.known_hosts = self.known_hosts.clone();
        }
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_flags_override_defaults() {
        let opts = DaemonOpts::parse_from([
            "netvfsd",
            "--bind",
            "0.0.0.0:7777",
            "--no-tls",
            "--ticket-ttl-secs",
            "5",
        ]);
        let s = opts.settings().unwrap();
        assert_eq!(s.bind, "0.0.0.0:7777");
        assert!(!s.tls);
        assert_eq!(s.ticket_ttl_secs, 5);
        assert_eq!(s.root, PathBuf::from("."));
    }

    #[test]
    fn test_cert_requires_key() {
        assert!(DaemonOpts::try_parse_from(["netvfsd", "--tls-cert", "c.pem"]).is_err());
    }

    #[test]
    fn test_client_global_flags_after_subcommand() {
        let opts = ClientOpts::parse_from(["netvfs", "rm", "netvfs://h/x", "-r", "--user", "bob"]);
        let s = opts.settings().unwrap();
        assert_eq!(s.user, "bob");
        assert!(matches!(opts.command, ClientCommand::Rm { recursive: true, .. }));
    }
}
