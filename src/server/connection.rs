//! One accepted connection and its command loop.

use super::dispatch;
use super::run_level::{RunLevel, RunLevelKind};
use super::ServerContext;
use crate::error::Result;
use crate::metering::TrafficCounters;
use crate::protocol::greeting_line;
use crate::protocol_core::{split_command, Response};
use crate::transport::{BoxStream, Transport};
use log::{debug, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// What the connection does after a processor returns
pub enum Outcome {
    /// Send this line
    Reply(Response),
    /// The processor already wrote everything
    Handled,
    /// The processor already wrote everything; close the connection
    Close,
    /// Acknowledge, then run the TLS handshake on this socket
    StartTls(Arc<rustls::ServerConfig>),
}

enum Step {
    Continue,
    Close,
    Upgrade(Arc<rustls::ServerConfig>),
}

pub struct Connection {
    pub(crate) io: Transport,
    pub(crate) level: RunLevel,
    pub(crate) ctx: Arc<ServerContext>,
    pub(crate) peer: SocketAddr,
    pub(crate) user: Option<String>,
    // Reused by READ/WRITE, resized to each request
    pub(crate) scratch: Vec<u8>,
}

impl Connection {
    pub fn new(stream: BoxStream, peer: SocketAddr, ctx: Arc<ServerContext>) -> Result<Self> {
        Ok(Self {
            io: Transport::new(stream)?,
            level: RunLevel::Handshake,
            ctx,
            peer,
            user: None,
            scratch: Vec::new(),
        })
    }

    pub fn counters(&self) -> Arc<TrafficCounters> {
        self.io.counters()
    }

    pub fn run_level(&self) -> RunLevelKind {
        self.level.kind()
    }

    /// Greet the peer and serve commands until QUIT, a fatal error or EOF.
    pub async fn run(mut self) -> Result<()> {
        let mut result = self.io.write_line(&greeting_line()).await;
        let mut prompt = true;
        while result.is_ok() {
            match self.step(&mut prompt).await {
                Ok(Step::Continue) => {}
                Ok(Step::Close) => break,
                Ok(Step::Upgrade(config)) => match self.io.upgrade_server(config).await {
                    Ok(io) => {
                        self.io = io;
                        debug!("{}: TLS established", self.peer);
                    }
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                },
                Err(e) => result = Err(e),
            }
        }
        if let Some(mut state) = self.level.disconnect() {
            if let Err(e) = state.stream.flush().await {
                warn!("{}: flushing {} on close failed: {}", self.peer, state.path, e);
            }
        }
        result
    }

    async fn step(&mut self, prompt: &mut bool) -> Result<Step> {
        if *prompt {
            self.io.send(&Response::Ready).await?;
        }
        let Some(line) = self.io.read_line().await? else {
            debug!("{}: peer closed", self.peer);
            return Ok(Step::Close);
        };
        let line = line.trim();
        // Empty lines are skipped without another READY
        *prompt = !line.is_empty();
        if line.is_empty() {
            return Ok(Step::Continue);
        }

        let (verb, raw) = split_command(line);
        let outcome = match self.handle(verb, raw).await {
            Ok(outcome) => outcome,
            Err(e) => match Response::from_error(&e) {
                Some(resp) => {
                    debug!("{}: {} failed: {}", self.peer, verb, e);
                    self.ctx.logger.error(self.peer, verb, &e.to_string());
                    Outcome::Reply(resp)
                }
                None => return Err(e),
            },
        };

        match outcome {
            Outcome::Reply(resp) => self.io.send(&resp).await?,
            Outcome::Handled => {}
            Outcome::Close => return Ok(Step::Close),
            Outcome::StartTls(config) => {
                self.io.send(&Response::ok()).await?;
                return Ok(Step::Upgrade(config));
            }
        }
        if self.level.kind() == RunLevelKind::Disconnected {
            return Ok(Step::Close);
        }
        Ok(Step::Continue)
    }

    async fn handle(&mut self, verb: &str, raw: &str) -> Result<Outcome> {
        let binding = dispatch::resolve(verb, self.level.kind())?;
        let opts = binding.schema.parse(raw)?;
        debug!("{}: {} {}", self.peer, binding.name, raw);
        dispatch::execute(self, binding.verb, &opts).await
    }
}
