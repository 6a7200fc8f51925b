#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netvfs::checksum::HashAlgorithm;
use netvfs::client::{ConnectOptions, Endpoint, RemoteFileSystem};
use netvfs::server::{self, ServerContext};
use netvfs::transport::Transport;
use netvfs::vfs::{
    FileAccess, FileShare, FileSystem, LocalFileSystem, NodeAttributes, NodeType, OpenMode,
    RandomAccessStream, StopSignal,
};
use netvfs::VfsError;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub fn write_file(path: &Path, size: usize) -> Result<Vec<u8>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let mut f = std::fs::File::create(path)?;
    f.write_all(&data)?;
    Ok(data)
}

/// A server on an ephemeral loopback port, serving a temp directory.
pub struct TestServer {
    pub port: u16,
    pub root: tempfile::TempDir,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with(|ctx| ctx).await
    }

    pub async fn start_with(configure: impl FnOnce(ServerContext) -> ServerContext) -> Result<Self> {
        let root = tempfile::tempdir()?;
        let fs = LocalFileSystem::new(root.path())?;
        Self::serve(root, configure(ServerContext::new(Arc::new(fs)))).await
    }

    /// Serve a temp directory through the provider `wrap` builds around it.
    pub async fn start_over(
        wrap: impl FnOnce(LocalFileSystem) -> Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let root = tempfile::tempdir()?;
        let fs = wrap(LocalFileSystem::new(root.path())?);
        Self::serve(root, ServerContext::new(fs)).await
    }

    async fn serve(root: tempfile::TempDir, ctx: ServerContext) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let task = tokio::spawn(async move {
            let _ = server::serve_listener(listener, Arc::new(ctx)).await;
        });
        Ok(Self { port, root, task })
    }

    pub fn path(&self, rel: &str) -> std::path::PathBuf {
        self.root.path().join(rel)
    }

    pub fn remote(&self) -> RemoteFileSystem {
        self.remote_with(ConnectOptions::default())
    }

    pub fn remote_with(&self, options: ConnectOptions) -> RemoteFileSystem {
        RemoteFileSystem::new(
            Endpoint::new("127.0.0.1", self.port, options),
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
    }

    pub async fn wire(&self) -> Result<Wire> {
        Wire::over(TcpStream::connect(("127.0.0.1", self.port)).await?).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Hand-driven protocol session
pub struct Wire {
    pub io: Transport,
}

impl Wire {
    pub async fn over(stream: TcpStream) -> Result<Self> {
        let mut io = Transport::new(Box::new(stream))?;
        assert_eq!(io.expect_line().await?, "NETVFS 1.0");
        Ok(Self { io })
    }

    pub async fn line(&mut self) -> Result<String> {
        Ok(self.io.expect_line().await?)
    }

    /// Wait for READY, send `cmd`, return the first response line.
    pub async fn send(&mut self, cmd: &str) -> Result<String> {
        assert_eq!(self.line().await?, "READY");
        self.io.write_line(cmd).await?;
        self.line().await
    }

    /// Wait for READY and send `cmd` without reading its response.
    pub async fn submit(&mut self, cmd: &str) -> Result<()> {
        assert_eq!(self.line().await?, "READY");
        self.io.write_line(cmd).await?;
        Ok(())
    }

    pub async fn login(&mut self) -> Result<()> {
        assert_eq!(self.send("LOGIN anonymous").await?, "OK");
        Ok(())
    }

    /// True once the server has closed the connection.
    pub async fn closed(&mut self) -> bool {
        matches!(self.io.read_line().await, Ok(None) | Err(_))
    }
}

/// Local provider whose COPY parks until its stop signal is raised.
pub struct StallingCopyFs {
    inner: LocalFileSystem,
    pub started: Arc<Notify>,
}

impl StallingCopyFs {
    pub fn new(inner: LocalFileSystem) -> Self {
        Self {
            inner,
            started: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl FileSystem for StallingCopyFs {
    async fn attributes(&self, path: &str) -> netvfs::Result<NodeAttributes> {
        self.inner.attributes(path).await
    }

    async fn list(&self, dir: &str) -> netvfs::Result<Vec<NodeAttributes>> {
        self.inner.list(dir).await
    }

    async fn create(&self, path: &str, node_type: NodeType, create_parents: bool) -> netvfs::Result<()> {
        self.inner.create(path, node_type, create_parents).await
    }

    async fn delete(&self, path: &str, node_type: Option<NodeType>, recursive: bool) -> netvfs::Result<()> {
        self.inner.delete(path, node_type, recursive).await
    }

    async fn copy(&self, _src: &str, _dst: &str, _overwrite: bool, stop: StopSignal) -> netvfs::Result<u64> {
        // notify_one stores a permit, so a waiter that subscribes late still wakes
        self.started.notify_one();
        stop.stopped().await;
        Err(VfsError::Cancelled)
    }

    async fn rename(&self, src: &str, dst: &str, overwrite: bool) -> netvfs::Result<()> {
        self.inner.rename(src, dst, overwrite).await
    }

    async fn open(
        &self,
        path: &str,
        mode: OpenMode,
        access: FileAccess,
        share: FileShare,
    ) -> netvfs::Result<Box<dyn RandomAccessStream>> {
        self.inner.open(path, mode, access, share).await
    }

    async fn compute_hash(
        &self,
        path: &str,
        algorithm: HashAlgorithm,
        offset: u64,
        length: Option<u64>,
    ) -> netvfs::Result<Vec<u8>> {
        self.inner.compute_hash(path, algorithm, offset, length).await
    }

    async fn set_modified(&self, path: &str, modified: DateTime<Utc>) -> netvfs::Result<()> {
        self.inner.set_modified(path, modified).await
    }
}
