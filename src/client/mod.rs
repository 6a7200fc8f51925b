//! Client side of the protocol.
//!
//! [`Client`] is one logged-in connection speaking the READY/command/response
//! exchange. [`RemoteFileSystem`] layers the connection pools and caches on
//! top of it.

pub mod cache;
pub mod pool;
pub mod remote_fs;

pub use cache::{DirectoryCache, NodeEvent, Observers};
pub use pool::{Pool, PooledClient};
pub use remote_fs::{RemoteFileSystem, RemoteStream};

use crate::config::ClientSettings;
use crate::error::{Result, VfsError};
use crate::protocol::{greeting_line, timeouts, verb};
use crate::protocol_core::{Attributes, CommandLine, Response};
use crate::tls;
use crate::transport::Transport;
use log::debug;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;

/// How to reach and log into a server.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub user: String,
    pub password: String,
    pub tls: bool,
    /// `None` uses the default known_hosts location
    pub known_hosts: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            user: "anonymous".to_string(),
            password: String::new(),
            tls: false,
            known_hosts: None,
            connect_timeout: Duration::from_millis(timeouts::CONNECT_MS),
        }
    }
}

impl ConnectOptions {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            user: settings.user.clone(),
            password: settings.password.clone(),
            tls: settings.tls,
            known_hosts: settings.known_hosts.clone(),
            connect_timeout: settings.connect_timeout(),
        }
    }

    pub fn with_login(mut self, user: &str, password: &str) -> Self {
        self.user = user.to_string();
        self.password = password.to_string();
        self
    }

    pub fn with_tls(mut self, known_hosts: Option<PathBuf>) -> Self {
        self.tls = true;
        self.known_hosts = known_hosts;
        self
    }
}

/// Host, port and login shared by every connection a client opens.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub options: ConnectOptions,
}

impl Endpoint {
    pub fn new(host: &str, port: u16, options: ConnectOptions) -> Self {
        Self {
            host: host.to_string(),
            port,
            options,
        }
    }

    pub async fn connect(&self) -> Result<Client> {
        Client::connect(&self.host, self.port, &self.options).await
    }
}

/// One connection in the Normal run level (or RandomAccess while a
/// [`RemoteStream`] holds it).
pub struct Client {
    io: Transport,
    connected: bool,
}

impl Client {
    /// Connect, check the greeting, optionally upgrade to TLS, then LOGIN.
    pub async fn connect(host: &str, port: u16, opts: &ConnectOptions) -> Result<Self> {
        let stream = tokio::time::timeout(opts.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                VfsError::Transport(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connecting to {}:{} timed out", host, port),
                ))
            })?
            .map_err(VfsError::Transport)?;
        let _ = stream.set_nodelay(true);

        let mut client = Client {
            io: Transport::new(Box::new(stream))?,
            connected: true,
        };
        let greeting = client.io.expect_line().await?;
        if greeting != greeting_line() {
            return Err(VfsError::Protocol(format!("unexpected greeting: {}", greeting)));
        }

        if opts.tls {
            client
                .command(&CommandLine::new(verb::ADHOCENCRYPTION).opt("mode", "tls"))
                .await?;
            let config = tls::build_client_config_tofu(host, port, opts.known_hosts.as_deref());
            let name = tls::server_name_for(host).map_err(|e| VfsError::MalformedUri(e.to_string()))?;
            client.io = client.io.upgrade_client(config, name).await?;
            debug!("{}:{}: TLS established", host, port);
        }

        client
            .command(
                &CommandLine::new(verb::LOGIN)
                    .arg(&opts.user)
                    .arg(&opts.password),
            )
            .await?;
        Ok(client)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_encrypted(&self) -> bool {
        self.io.is_encrypted()
    }

    /// Mark the connection unusable; its pool drops it on return.
    pub(crate) fn poison(&mut self) {
        self.connected = false;
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() || matches!(e, VfsError::Protocol(_)) {
                self.connected = false;
            }
        }
        result
    }

    async fn next_response(&mut self) -> Result<Response> {
        let line = self.io.expect_line().await?;
        Response::parse(&line)
    }

    /// Wait for READY and send one command line.
    pub async fn begin(&mut self, cmd: &CommandLine) -> Result<()> {
        if !self.connected {
            return Err(VfsError::Disconnected);
        }
        let result = async {
            match self.next_response().await? {
                Response::Ready => {}
                other => {
                    return Err(VfsError::Protocol(format!("expected READY, got {}", other)));
                }
            }
            self.io.write_line(cmd.as_str()).await
        }
        .await;
        self.track(result)
    }

    /// Next response line as sent, `ERROR` included.
    pub async fn raw_response(&mut self) -> Result<Response> {
        let result = self.next_response().await;
        self.track(result)
    }

    /// Next response; `ERROR` becomes `Err` with the matching variant.
    pub async fn response(&mut self) -> Result<Response> {
        self.raw_response().await?.into_result()
    }

    /// Next response, which must be `OK`.
    pub async fn expect_ok(&mut self) -> Result<Attributes> {
        match self.response().await? {
            Response::Ok(attrs) => Ok(attrs),
            other => {
                self.connected = false;
                Err(VfsError::Protocol(format!("expected OK, got {}", other)))
            }
        }
    }

    /// Send a command and return the attributes of its `OK`.
    pub async fn command(&mut self, cmd: &CommandLine) -> Result<Attributes> {
        self.begin(cmd).await?;
        self.expect_ok().await
    }

    /// Send a command answered by `ENTRY` lines and a closing `OK`.
    pub async fn entries(&mut self, cmd: &CommandLine) -> Result<Vec<Attributes>> {
        self.begin(cmd).await?;
        let mut out = Vec::new();
        loop {
            match self.raw_response().await? {
                Response::Entry(attrs) => out.push(attrs),
                Response::Ok(summary) => {
                    if let Some(count) = summary.get("COUNT") {
                        if count.parse::<usize>().ok() != Some(out.len()) {
                            self.connected = false;
                            return Err(VfsError::Protocol(format!(
                                "announced {} entries, received {}",
                                count,
                                out.len()
                            )));
                        }
                    }
                    return Ok(out);
                }
                Response::Ready => {
                    self.connected = false;
                    return Err(VfsError::Protocol("READY inside an entry list".into()));
                }
                Response::Error { code, message, .. } => {
                    return Err(VfsError::from_wire(&code, message.as_deref()));
                }
            }
        }
    }

    /// Send a line without waiting for READY; used for CANCEL during COPY.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let result = self.io.write_line(line).await;
        self.track(result)
    }

    /// Read the READY and `OK` answering a line sent with [`Client::send_line`]
    /// that the server ended up handling as a command of its own.
    pub async fn finish_pending(&mut self) -> Result<Attributes> {
        match self.raw_response().await? {
            Response::Ready => self.expect_ok().await,
            other => {
                self.connected = false;
                Err(VfsError::Protocol(format!("expected READY, got {}", other)))
            }
        }
    }

    pub async fn read_payload(&mut self, out: &mut [u8]) -> Result<()> {
        let result = self.io.read_payload(out).await;
        self.track(result)
    }

    /// Write a payload and flush it.
    pub async fn write_payload(&mut self, data: &[u8]) -> Result<()> {
        let result = async {
            self.io.write_payload(data).await?;
            self.io.flush().await
        }
        .await;
        self.track(result)
    }

    /// Send QUIT and drop the connection.
    pub async fn quit(mut self) -> Result<()> {
        self.command(&CommandLine::new(verb::QUIT)).await?;
        Ok(())
    }
}
