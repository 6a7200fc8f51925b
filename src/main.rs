//! netvfs - command-line client for a NetVFS server

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::SeekFrom;
use std::path::Path;

use netvfs::checksum::HashAlgorithm;
use netvfs::cli::{ClientCommand, ClientOpts};
use netvfs::client::RemoteFileSystem;
use netvfs::config::ClientSettings;
use netvfs::error::VfsError;
use netvfs::url::{parse_remote_url, RemoteLocation};
use netvfs::vfs::{FileAccess, FileShare, NodeAttributes, OpenMode, StopSignal};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let opts = ClientOpts::parse();
    let settings = opts.settings()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(run(opts.command, settings))
}

fn location(url: &str) -> Result<RemoteLocation> {
    match parse_remote_url(url) {
        Some(loc) => Ok(loc),
        None => bail!("not a netvfs:// URL: {}", url),
    }
}

/// Second remote argument: a URL on the same server, or a bare path on it.
fn same_server_path(first: &RemoteLocation, arg: &str) -> Result<String> {
    match parse_remote_url(arg) {
        Some(loc) if loc.host == first.host && loc.port == first.port => Ok(loc.path),
        Some(loc) => bail!("{} is not on {}", loc.address(), first.address()),
        None => Ok(netvfs::protocol_core::clean_path(arg)),
    }
}

fn connect(loc: &RemoteLocation, settings: &ClientSettings) -> RemoteFileSystem {
    RemoteFileSystem::from_settings(&loc.host, loc.port, settings)
}

fn print_node(node: &NodeAttributes) {
    let kind = if node.is_directory() { "d" } else { "-" };
    let size = node
        .length
        .map(|l| l.to_string())
        .unwrap_or_else(|| "-".to_string());
    let modified = node
        .modified
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    println!("{} {:>12} {:19} {}", kind, size, modified, node.name);
}

async fn run(command: ClientCommand, settings: ClientSettings) -> Result<()> {
    match command {
        ClientCommand::Ls { url } => {
            let loc = location(&url)?;
            let fs = connect(&loc, &settings);
            for node in fs.list(&loc.path).await? {
                print_node(&node);
            }
        }
        ClientCommand::Stat { url } => {
            let loc = location(&url)?;
            let node = connect(&loc, &settings).attributes(&loc.path).await?;
            if !node.exists {
                bail!("{} does not exist", node.path);
            }
            for (key, value) in node.to_wire().iter() {
                println!("{:>9}: {}", key.to_ascii_lowercase(), value);
            }
        }
        ClientCommand::Get {
            url,
            dest,
            offset,
            length,
        } => {
            let loc = location(&url)?;
            let fs = connect(&loc, &settings);
            let mut out = tokio::fs::File::create(&dest)
                .await
                .with_context(|| format!("create {}", dest.display()))?;
            let n = fs.download_to(&loc.path, &mut out, offset, length).await?;
            println!("{} bytes -> {}", n, dest.display());
        }
        ClientCommand::Put { source, url } => {
            let loc = location(&url)?;
            put(&connect(&loc, &settings), &source, &loc.path).await?;
        }
        ClientCommand::Mkdir { url, parents } => {
            let loc = location(&url)?;
            connect(&loc, &settings)
                .create_directory(&loc.path, parents)
                .await?;
        }
        ClientCommand::Rm { url, recursive } => {
            let loc = location(&url)?;
            connect(&loc, &settings).delete(&loc.path, recursive).await?;
        }
        ClientCommand::Cp {
            source,
            dest,
            overwrite,
        } => {
            let loc = location(&source)?;
            let dst = same_server_path(&loc, &dest)?;
            let stop = StopSignal::new();
            let on_interrupt = stop.clone();
            ctrlc::set_handler(move || {
                eprintln!("\nInterrupted; cancelling copy...");
                on_interrupt.stop();
            })
            .context("Error setting Ctrl-C handler")?;

            match connect(&loc, &settings)
                .copy(&loc.path, &dst, overwrite, &stop)
                .await
            {
                Ok(bytes) => println!("copied {} bytes", bytes),
                Err(VfsError::Cancelled) => {
                    eprintln!("copy cancelled");
                    // 128 + SIGINT
                    std::process::exit(130);
                }
                Err(e) => return Err(e.into()),
            }
        }
        ClientCommand::Mv {
            source,
            dest,
            overwrite,
        } => {
            let loc = location(&source)?;
            let dst = same_server_path(&loc, &dest)?;
            connect(&loc, &settings)
                .rename(&loc.path, &dst, overwrite)
                .await?;
        }
        ClientCommand::Hash { url, algorithm } => {
            let loc = location(&url)?;
            let algorithm = HashAlgorithm::parse(&algorithm)?;
            let digest = connect(&loc, &settings)
                .compute_hash(&loc.path, algorithm, 0, None)
                .await?;
            println!("{}  {}", digest, loc.path);
        }
    }
    Ok(())
}

async fn put(fs: &RemoteFileSystem, source: &Path, remote: &str) -> Result<()> {
    let mut file = tokio::fs::File::open(source)
        .await
        .with_context(|| format!("open {}", source.display()))?;
    let expected = file.metadata().await?.len();
    let n = fs.upload(remote, &mut file).await?;

    // Re-open read-only to confirm the server's view of the length
    let mut check = fs
        .open(remote, OpenMode::Open, FileAccess::Read, FileShare::Read)
        .await?;
    let remote_len = check.seek(SeekFrom::End(0)).await?;
    check.close().await?;
    if remote_len != expected {
        bail!("{} has {} bytes on the server, expected {}", remote, remote_len, expected);
    }
    println!("{} bytes -> {}", n, remote);
    Ok(())
}
