//! The read and write pipelines over one socket, shared by server and client.
//!
//! Reads go raw → metered → chunked, writes go buffered → metered → raw.
//! Socket failures surface as [`VfsError::Transport`] so callers can tell
//! them apart from file system errors.

use crate::error::{Result, VfsError};
use crate::framing::ChunkingReader;
use crate::metering::{Metered, TrafficCounters};
use crate::protocol::{timeouts, LINE_MARKER, MAX_LINE_LENGTH};
use crate::protocol_core::Response;
use rustls::pki_types::ServerName;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Any bidirectional byte stream a connection can run over (TCP, TLS, in-memory).
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxStream = Box<dyn AsyncStream>;

fn transport(e: io::Error) -> VfsError {
    VfsError::Transport(e)
}

pub struct Transport {
    reader: ChunkingReader<Metered<ReadHalf<BoxStream>>>,
    writer: BufWriter<Metered<WriteHalf<BoxStream>>>,
    counters: Arc<TrafficCounters>,
    encrypted: bool,
}

impl Transport {
    pub fn new(stream: BoxStream) -> Result<Self> {
        Self::with_counters(stream, TrafficCounters::new(), false)
    }

    fn with_counters(stream: BoxStream, counters: Arc<TrafficCounters>, encrypted: bool) -> Result<Self> {
        let (rd, wr) = tokio::io::split(stream);
        let reader = ChunkingReader::new(Metered::new(rd, counters.clone()), LINE_MARKER)
            .map_err(transport)?;
        let writer = BufWriter::new(Metered::new(wr, counters.clone()));
        Ok(Self {
            reader,
            writer,
            counters,
            encrypted,
        })
    }

    pub fn counters(&self) -> Arc<TrafficCounters> {
        self.counters.clone()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Next line without its marker; `None` when the peer closed cleanly.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        self.reader.read_line(MAX_LINE_LENGTH).await.map_err(transport)
    }

    /// Next line; a closed peer is an error.
    pub async fn expect_line(&mut self) -> Result<String> {
        self.read_line().await?.ok_or(VfsError::Disconnected)
    }

    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await.map_err(transport)?;
        self.writer.write_all(LINE_MARKER).await.map_err(transport)?;
        self.flush().await
    }

    pub async fn send(&mut self, response: &Response) -> Result<()> {
        self.write_line(&response.to_string()).await
    }

    /// Raw payload bytes; buffered until [`Transport::flush`].
    pub async fn write_payload(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).await.map_err(transport)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await.map_err(transport)
    }

    /// Exactly `out.len()` raw bytes, never scanned for line markers.
    pub async fn read_payload(&mut self, out: &mut [u8]) -> Result<()> {
        self.reader.disable_chunking().read_exact(out).await.map_err(transport)
    }

    async fn into_stream(mut self) -> Result<BoxStream> {
        self.flush().await?;
        if self.reader.buffered() > 0 {
            return Err(VfsError::Protocol(
                "peer sent data before the TLS handshake".into(),
            ));
        }
        let (rd, _) = self.reader.into_inner();
        let wr = self.writer.into_inner().into_inner();
        Ok(rd.into_inner().unsplit(wr))
    }

    /// Replace the pipelines with TLS ones, acting as the server side.
    pub async fn upgrade_server(self, config: Arc<rustls::ServerConfig>) -> Result<Self> {
        let counters = self.counters.clone();
        let stream = self.into_stream().await?;
        let handshake = TlsAcceptor::from(config).accept(stream);
        let tls = tokio::time::timeout(Duration::from_millis(timeouts::TLS_HANDSHAKE_MS), handshake)
            .await
            .map_err(|_| transport(io::Error::from(io::ErrorKind::TimedOut)))?
            .map_err(transport)?;
        Self::with_counters(Box::new(tls), counters, true)
    }

    /// Replace the pipelines with TLS ones, acting as the client side.
    pub async fn upgrade_client(
        self,
        config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
    ) -> Result<Self> {
        let counters = self.counters.clone();
        let stream = self.into_stream().await?;
        let handshake = TlsConnector::from(config).connect(server_name, stream);
        let tls = tokio::time::timeout(Duration::from_millis(timeouts::TLS_HANDSHAKE_MS), handshake)
            .await
            .map_err(|_| transport(io::Error::from(io::ErrorKind::TimedOut)))?
            .map_err(transport)?;
        Self::with_counters(Box::new(tls), counters, true)
    }
}
