//! File system view of a remote server.
//!
//! Metadata calls lease from the control pool, streams from the binary pool,
//! so a long transfer never holds up a LIST.

use super::cache::{DirectoryCache, NodeEvent, Observers};
use super::pool::{Pool, PooledClient};
use super::{ConnectOptions, Endpoint};
use crate::checksum::HashAlgorithm;
use crate::config::ClientSettings;
use crate::error::{ErrorCode, Result, VfsError};
use crate::protocol::verb;
use crate::protocol_core::{clean_path, parent_path, Attributes, CommandLine, Response};
use crate::server::commands::nodes::CANCEL_IGNORED;
use crate::ttl::ExpiringMap;
use crate::vfs::{FileAccess, FileShare, NodeAttributes, NodeType, OpenMode, StopSignal};
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest READ/WRITE block the client asks for
pub const CLIENT_BLOCK_SIZE: usize = 1024 * 1024;

struct Caches {
    dirs: DirectoryCache,
    attributes: ExpiringMap<String, NodeAttributes>,
    observers: Observers,
}

impl Caches {
    /// Drop what is known about `path` and mark its directory stale.
    fn touch(&self, path: &str) {
        self.attributes.remove(&path.to_string());
        self.dirs.invalidate(&parent_path(path));
    }

    fn changed(&self, event: NodeEvent) {
        match &event {
            NodeEvent::Created(p) | NodeEvent::Changed(p) => self.touch(p),
            NodeEvent::Deleted(p) => {
                self.touch(p);
                self.dirs.remove_tree(p);
            }
            NodeEvent::Moved { from, to } => {
                self.touch(from);
                self.dirs.remove_tree(from);
                self.touch(to);
                self.dirs.remove_tree(to);
            }
        }
        self.observers.publish(&event);
    }
}

pub struct RemoteFileSystem {
    endpoint: Arc<Endpoint>,
    control: Arc<Pool>,
    binary: Arc<Pool>,
    caches: Arc<Caches>,
}

impl RemoteFileSystem {
    pub fn new(endpoint: Endpoint, pool_idle: Duration, attribute_ttl: Duration) -> Self {
        let endpoint = Arc::new(endpoint);
        Self {
            control: Pool::new("control", endpoint.clone(), pool_idle),
            binary: Pool::new("binary", endpoint.clone(), pool_idle),
            endpoint,
            caches: Arc::new(Caches {
                dirs: DirectoryCache::new(),
                attributes: ExpiringMap::new(attribute_ttl),
                observers: Observers::new(),
            }),
        }
    }

    pub fn from_settings(host: &str, port: u16, settings: &ClientSettings) -> Self {
        Self::new(
            Endpoint::new(host, port, ConnectOptions::from_settings(settings)),
            settings.pool_idle(),
            settings.attribute_ttl(),
        )
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn control_pool(&self) -> &Arc<Pool> {
        &self.control
    }

    pub fn binary_pool(&self) -> &Arc<Pool> {
        &self.binary
    }

    pub fn observers(&self) -> &Observers {
        &self.caches.observers
    }

    pub fn directory_cache(&self) -> &DirectoryCache {
        &self.caches.dirs
    }

    async fn control_command(&self, cmd: &CommandLine) -> Result<Attributes> {
        let mut lease = self.control.acquire().await?;
        lease.command(cmd).await
    }

    /// Children of a directory, served from cache while it is current.
    pub async fn list(&self, path: &str) -> Result<Vec<NodeAttributes>> {
        let path = clean_path(path);
        if let Some(children) = self.caches.dirs.get(&path) {
            return Ok(children);
        }
        let token = self.caches.dirs.begin_refresh(&path);
        let entries = {
            let mut lease = self.control.acquire().await?;
            lease.entries(&CommandLine::new(verb::LIST).arg(&path)).await?
        };
        let children = entries
            .iter()
            .map(NodeAttributes::from_wire)
            .collect::<Result<Vec<_>>>()?;
        for child in &children {
            self.caches.attributes.insert(child.path.clone(), child.clone());
        }
        if !self.caches.dirs.commit(token, children.clone()) {
            debug!("listing of {} was overtaken by a change", path);
        }
        Ok(children)
    }

    pub async fn attributes(&self, path: &str) -> Result<NodeAttributes> {
        let path = clean_path(path);
        if let Some(attrs) = self.caches.attributes.get(&path) {
            return Ok(attrs);
        }
        let wire = self
            .control_command(&CommandLine::new(verb::GETATTRIBUTES).arg(&path))
            .await?;
        let attrs = NodeAttributes::from_wire(&wire)?;
        self.caches.attributes.insert(path, attrs.clone());
        Ok(attrs)
    }

    async fn create(&self, path: &str, node_type: NodeType, parents: bool) -> Result<()> {
        let path = clean_path(path);
        self.control_command(
            &CommandLine::new(verb::CREATE)
                .arg(&path)
                .opt("type", node_type.as_str())
                .flag("parents", parents),
        )
        .await?;
        self.caches.changed(NodeEvent::Created(path));
        Ok(())
    }

    pub async fn create_file(&self, path: &str) -> Result<()> {
        self.create(path, NodeType::File, false).await
    }

    pub async fn create_directory(&self, path: &str, parents: bool) -> Result<()> {
        self.create(path, NodeType::Directory, parents).await
    }

    pub async fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        let path = clean_path(path);
        self.control_command(
            &CommandLine::new(verb::DELETE)
                .arg(&path)
                .flag("recursive", recursive),
        )
        .await?;
        self.caches.changed(NodeEvent::Deleted(path));
        Ok(())
    }

    /// Server-side copy; raising `stop` sends CANCEL.
    ///
    /// Returns the bytes copied. A cancelled copy fails with
    /// [`VfsError::Cancelled`] unless the server had already finished it.
    pub async fn copy(&self, src: &str, dst: &str, overwrite: bool, stop: &StopSignal) -> Result<u64> {
        let (src, dst) = (clean_path(src), clean_path(dst));
        let mut lease = self.control.acquire().await?;
        lease
            .begin(
                &CommandLine::new(verb::COPY)
                    .arg(&src)
                    .arg(&dst)
                    .flag("overwrite", overwrite),
            )
            .await?;

        let mut cancel_sent = false;
        let response = loop {
            if cancel_sent {
                break lease.raw_response().await?;
            }
            tokio::select! {
                response = lease.raw_response() => break response?,
                _ = stop.stopped() => {
                    debug!("cancelling copy of {} to {}", src, dst);
                    lease.send_line(verb::CANCEL).await?;
                    cancel_sent = true;
                }
            }
        };

        match response {
            Response::Ok(attrs) => {
                let ignored = attrs.get("CANCEL") == Some("IGNORED");
                if cancel_sent && !ignored {
                    // The copy ended before CANCEL was read; it is answered on its own
                    lease.finish_pending().await?;
                }
                self.caches.changed(NodeEvent::Created(dst));
                attrs.require_u64("BYTES")
            }
            Response::Error { code, message, details } => {
                let answered = code == ErrorCode::Cancelled.as_str()
                    || details.as_deref() == Some(CANCEL_IGNORED);
                if cancel_sent && !answered {
                    lease.finish_pending().await?;
                }
                // A failed or cancelled copy may leave a partial target behind
                self.caches.touch(&dst);
                Err(VfsError::from_wire(&code, message.as_deref()))
            }
            other => {
                lease.discard();
                Err(VfsError::Protocol(format!("unexpected reply to COPY: {}", other)))
            }
        }
    }

    pub async fn rename(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        let (src, dst) = (clean_path(src), clean_path(dst));
        self.control_command(
            &CommandLine::new(verb::MOVE)
                .arg(&src)
                .arg(&dst)
                .flag("overwrite", overwrite),
        )
        .await?;
        self.caches.changed(NodeEvent::Moved { from: src, to: dst });
        Ok(())
    }

    /// Alias of [`RemoteFileSystem::rename`]
    pub async fn move_node(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        self.rename(src, dst, overwrite).await
    }

    /// Hex digest of `length` bytes from `offset` (to the end when `None`).
    pub async fn compute_hash(
        &self,
        path: &str,
        algorithm: HashAlgorithm,
        offset: u64,
        length: Option<u64>,
    ) -> Result<String> {
        let mut cmd = CommandLine::new(verb::COMPUTEHASH)
            .arg(clean_path(path))
            .opt("algorithm", algorithm.name())
            .opt("offset", offset.to_string());
        if let Some(len) = length {
            cmd = cmd.opt("length", len.to_string());
        }
        let attrs = self.control_command(&cmd).await?;
        Ok(attrs.require("HASH")?.to_string())
    }

    pub async fn set_modified(&self, path: &str, modified: DateTime<Utc>) -> Result<()> {
        let path = clean_path(path);
        self.control_command(
            &CommandLine::new(verb::SETATTRIBUTES)
                .arg(&path)
                .opt("modified", modified.to_rfc3339_opts(SecondsFormat::Millis, true)),
        )
        .await?;
        self.caches.changed(NodeEvent::Changed(path));
        Ok(())
    }

    /// Fetch a byte range through a download ticket.
    ///
    /// The ticket comes from the control pool; the claim runs on a fresh
    /// connection, which the server closes after the payload.
    pub async fn download_to<W>(
        &self,
        path: &str,
        out: &mut W,
        offset: u64,
        length: Option<u64>,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut cmd = CommandLine::new(verb::DOWNLOAD)
            .arg(clean_path(path))
            .opt("offset", offset.to_string());
        if let Some(len) = length {
            cmd = cmd.opt("length", len.to_string());
        }
        let ticket = self.control_command(&cmd).await?;
        let id = ticket.require("TICKET")?.to_string();

        let mut claimer = self.endpoint.connect().await?;
        let claimed = claimer
            .command(&CommandLine::new(verb::CLAIM).arg(&id))
            .await?;
        let total = claimed.require_u64("LENGTH")?;
        let mut buf = vec![0u8; (total as usize).clamp(1, CLIENT_BLOCK_SIZE)];
        let mut remaining = total;
        while remaining > 0 {
            let n = (buf.len() as u64).min(remaining) as usize;
            claimer.read_payload(&mut buf[..n]).await?;
            out.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }
        out.flush().await?;
        Ok(total)
    }

    /// Whole file into memory.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.download_to(path, &mut out, 0, None).await?;
        Ok(out)
    }

    /// Open a random-access stream on a binary-pool connection.
    pub async fn open(
        &self,
        path: &str,
        mode: OpenMode,
        access: FileAccess,
        share: FileShare,
    ) -> Result<RemoteStream> {
        let path = clean_path(path);
        let mut lease = self.binary.acquire().await?;
        let attrs = lease
            .command(
                &CommandLine::new(verb::RANDOMACCESS)
                    .arg(&path)
                    .opt("mode", mode.as_str())
                    .opt("access", access.as_str())
                    .opt("share", share.as_str()),
            )
            .await?;
        let created = mode != OpenMode::Open;
        if created {
            self.caches.changed(NodeEvent::Created(path.clone()));
        }
        let (length, position) = match (attrs.require_u64("LENGTH"), attrs.require_u64("POSITION")) {
            (Ok(length), Ok(position)) => (length, position),
            (Err(e), _) | (_, Err(e)) => {
                // Already in RandomAccess; it must not go back to the pool
                lease.discard();
                return Err(e);
            }
        };
        Ok(RemoteStream {
            lease: Some(lease),
            path,
            access,
            length,
            position,
            dirty: false,
            caches: self.caches.clone(),
        })
    }

    /// Create or replace `path` with everything `data` yields.
    pub async fn upload<R>(&self, path: &str, data: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut stream = self
            .open(path, OpenMode::Create, FileAccess::Write, FileShare::None)
            .await?;
        let mut buf = vec![0u8; CLIENT_BLOCK_SIZE];
        let mut total = 0u64;
        loop {
            let n = data.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await?;
            total += n as u64;
        }
        stream.close().await?;
        Ok(total)
    }
}

/// A file opened with RANDOMACCESS.
///
/// Holds its binary-pool connection in the RandomAccess run level.
/// [`RemoteStream::close`] sends EXIT and returns the connection; dropping
/// the stream without closing it discards the connection instead.
pub struct RemoteStream {
    lease: Option<PooledClient>,
    path: String,
    access: FileAccess,
    length: u64,
    position: u64,
    dirty: bool,
    caches: Arc<Caches>,
}

impl RemoteStream {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn access(&self) -> FileAccess {
        self.access
    }

    /// Length reported when the stream was opened or last queried
    pub fn known_length(&self) -> u64 {
        self.length
    }

    fn client(&mut self) -> Result<&mut PooledClient> {
        self.lease.as_mut().ok_or(VfsError::Disconnected)
    }

    /// One READ of up to `buf.len()` bytes; 0 at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = buf.len().min(CLIENT_BLOCK_SIZE);
        if want == 0 {
            return Ok(0);
        }
        let client = self.client()?;
        let attrs = client
            .command(&CommandLine::new(verb::READ).arg(want.to_string()))
            .await?;
        let got = attrs.require_u64("LENGTH")? as usize;
        if got > want {
            client.poison();
            return Err(VfsError::Protocol(format!("asked for {} bytes, offered {}", want, got)));
        }
        client.read_payload(&mut buf[..got]).await?;
        self.position += got as u64;
        Ok(got)
    }

    /// Read until end of file.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<u64> {
        let mut buf = vec![0u8; CLIENT_BLOCK_SIZE];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buf[..n]);
            total += n as u64;
        }
    }

    /// WRITE all of `data`, one block at a time.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for block in data.chunks(CLIENT_BLOCK_SIZE) {
            let client = self.client()?;
            // Go-ahead, payload, then the verdict
            client
                .command(&CommandLine::new(verb::WRITE).arg(block.len().to_string()))
                .await?;
            client.write_payload(block).await?;
            client.expect_ok().await?;
            self.dirty = true;
            self.position += block.len() as u64;
            self.length = self.length.max(self.position);
        }
        Ok(())
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let (offset, origin) = match pos {
            SeekFrom::Start(p) => (p.to_string(), "begin"),
            SeekFrom::Current(d) => (d.to_string(), "current"),
            SeekFrom::End(d) => (d.to_string(), "end"),
        };
        let attrs = self
            .client()?
            .command(&CommandLine::new(verb::SEEK).arg(offset).opt("origin", origin))
            .await?;
        self.position = attrs.require_u64("POSITION")?;
        Ok(self.position)
    }

    pub async fn position(&mut self) -> Result<u64> {
        let attrs = self
            .client()?
            .command(&CommandLine::new(verb::GETPOSITION))
            .await?;
        self.position = attrs.require_u64("POSITION")?;
        Ok(self.position)
    }

    pub async fn set_position(&mut self, position: u64) -> Result<()> {
        self.client()?
            .command(&CommandLine::new(verb::SETPOSITION).arg(position.to_string()))
            .await?;
        self.position = position;
        Ok(())
    }

    pub async fn length(&mut self) -> Result<u64> {
        let attrs = self
            .client()?
            .command(&CommandLine::new(verb::GETLENGTH))
            .await?;
        self.length = attrs.require_u64("LENGTH")?;
        Ok(self.length)
    }

    pub async fn set_length(&mut self, length: u64) -> Result<()> {
        self.client()?
            .command(&CommandLine::new(verb::SETLENGTH).arg(length.to_string()))
            .await?;
        self.dirty = true;
        self.length = length;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.client()?.command(&CommandLine::new(verb::FLUSH)).await?;
        Ok(())
    }

    /// EXIT the RandomAccess run level and return the connection to its pool.
    pub async fn close(mut self) -> Result<()> {
        let mut lease = self.lease.take().ok_or(VfsError::Disconnected)?;
        let result = lease.command(&CommandLine::new(verb::EXIT)).await;
        if result.is_err() {
            lease.discard();
        }
        self.publish_changes();
        result.map(|_| ())
    }

    fn publish_changes(&mut self) {
        if std::mem::take(&mut self.dirty) {
            self.caches.changed(NodeEvent::Changed(self.path.clone()));
        }
    }
}

impl Drop for RemoteStream {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            // Still in RandomAccess on the server; not reusable
            lease.discard();
        }
        self.publish_changes();
    }
}
