//! The NetVFS daemon: accept loop, shared context and per-connection tasks.

pub mod commands;
pub mod connection;
pub mod dispatch;
pub mod run_level;
pub mod tickets;

use crate::auth::{AllowAnonymous, Authenticator, StaticCredentials};
use crate::config::{AuditFormat, ServerSettings};
use crate::logger::{JsonLogger, Logger, NoopLogger, TextLogger};
use crate::protocol::{timeouts, DEFAULT_MAX_BLOCK_SIZE};
use crate::tls;
use crate::vfs::{FileSystem, LocalFileSystem};
use anyhow::{Context, Result};
use connection::Connection;
use log::{debug, info, warn};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tickets::TicketTable;
use tokio::net::TcpListener;

/// Everything connections share: the file system, credentials, audit log and ticket table.
pub struct ServerContext {
    pub fs: Arc<dyn FileSystem>,
    pub auth: Arc<dyn Authenticator>,
    pub logger: Arc<dyn Logger>,
    pub tickets: TicketTable,
    pub tls: Option<Arc<rustls::ServerConfig>>,
    pub max_block_size: usize,
}

impl ServerContext {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            auth: Arc::new(AllowAnonymous),
            logger: Arc::new(NoopLogger),
            tickets: TicketTable::new(Duration::from_secs(timeouts::TICKET_TTL_SECS)),
            tls: None,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }

    /// Local provider over `settings.root` plus everything else the settings name.
    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        let fs = LocalFileSystem::new(&settings.root)
            .with_context(|| format!("serve root {}", settings.root.display()))?;
        let mut ctx = ServerContext::new(Arc::new(fs))
            .with_ticket_ttl(settings.ticket_ttl())
            .with_max_block_size(settings.max_block_size);

        if !settings.users.is_empty() {
            let creds = settings
                .users
                .iter()
                .fold(StaticCredentials::new(), |c, u| c.with_digest(&u.name, &u.password_sha256));
            ctx = ctx.with_authenticator(Arc::new(creds));
        }

        if let Some(path) = &settings.audit_log {
            let logger: Arc<dyn Logger> = match settings.audit_format {
                AuditFormat::Text => Arc::new(TextLogger::new(path)?),
                AuditFormat::Json => Arc::new(JsonLogger::new(path)?),
            };
            ctx = ctx.with_logger(logger);
        }

        if settings.tls {
            let config = tls::load_or_generate_server_config(
                settings.tls_cert.clone(),
                settings.tls_key.clone(),
            )
            .context("set up TLS")?;
            ctx = ctx.with_tls(config);
        }
        Ok(ctx)
    }

    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Enables `ADHOCENCRYPTION -mode=tls`.
    pub fn with_tls(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    pub fn with_ticket_ttl(mut self, ttl: Duration) -> Self {
        self.tickets = TicketTable::new(ttl);
        self
    }

    pub fn with_max_block_size(mut self, bytes: usize) -> Self {
        self.max_block_size = bytes;
        self
    }
}

/// Bind `bind` and serve until the listener fails.
pub async fn serve(bind: &str, ctx: ServerContext) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {}", bind))?;
    info!("netvfsd listening on {}", listener.local_addr()?);
    serve_listener(listener, Arc::new(ctx)).await
}

/// Serve on an already bound listener (tests bind port 0 themselves).
pub async fn serve_listener(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    spawn_ticket_sweeper(Arc::downgrade(&ctx));
    loop {
        let (stream, peer) = listener.accept().await.context("accept")?;
        let _ = stream.set_nodelay(true);
        debug!("connection from {}", peer);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let conn = match Connection::new(Box::new(stream), peer, ctx.clone()) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("{}: setup failed: {}", peer, e);
                    return;
                }
            };
            let counters = conn.counters();
            if let Err(e) = conn.run().await {
                debug!("{}: connection ended: {}", peer, e);
            }
            ctx.logger
                .disconnect(peer, counters.bytes_read(), counters.bytes_written());
            info!(
                "{} disconnected (read {} bytes, wrote {} bytes)",
                peer,
                counters.bytes_read(),
                counters.bytes_written()
            );
        });
    }
}

// Holds only a weak reference so the sweeper dies with the server
fn spawn_ticket_sweeper(ctx: Weak<ServerContext>) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(timeouts::SWEEP_INTERVAL_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(ctx) = ctx.upgrade() else { break };
            let expired = ctx.tickets.sweep();
            if expired > 0 {
                debug!("swept {} expired download tickets", expired);
            }
        }
    });
}
