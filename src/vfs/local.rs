//! Local directory node provider, rooted under a served directory

use super::{
    FileAccess, FileShare, FileSystem, NodeAttributes, NodeType, OpenMode, RandomAccessStream,
    StopSignal,
};
use crate::checksum::{hash_range, HashAlgorithm};
use crate::error::{Result, VfsError};
use crate::protocol_core::{clean_path, join_path, normalize_under_root, parent_path};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncSeekExt;

// Copy granularity; the stop signal is checked between blocks
const COPY_BLOCK: usize = 1024 * 1024;

pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|e| VfsError::from_fs_io(e, &root.display().to_string(), true))?;
        if !root.is_dir() {
            return Err(VfsError::DirectoryNotFound(root.display().to_string()));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        normalize_under_root(&self.root, path)
    }

    fn attributes_of(path: &str, real: &Path) -> Result<NodeAttributes> {
        let clean = clean_path(path);
        match fs::metadata(real) {
            Ok(md) => Ok(NodeAttributes {
                name: clean.rsplit('/').next().unwrap_or_default().to_string(),
                path: clean,
                node_type: if md.is_dir() { NodeType::Directory } else { NodeType::File },
                exists: true,
                length: if md.is_dir() { None } else { Some(md.len()) },
                created: md.created().ok().map(DateTime::<Utc>::from),
                modified: md.modified().ok().map(DateTime::<Utc>::from),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(NodeAttributes::missing(path, NodeType::File))
            }
            Err(e) => Err(VfsError::Io(e)),
        }
    }

    async fn require_parent(&self, path: &str) -> Result<()> {
        let parent = parent_path(path);
        let attrs = self.attributes(&parent).await?;
        if !attrs.exists || !attrs.is_directory() {
            return Err(VfsError::DirectoryNotFound(parent));
        }
        Ok(())
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VfsError::Unexpected(format!("blocking task failed: {}", e)))?
}

/// Hidden sibling of `path` that holds a node while a transfer is in flight.
fn scratch_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.netvfs", name, uuid::Uuid::new_v4().simple()))
}

/// Refuse a transfer whose source and destination are the same node or nest.
fn check_disjoint(src: &str, real_src: &Path, real_dst: &Path) -> Result<()> {
    if real_src == real_dst {
        return Err(VfsError::invalid_value("dest", format!("{} is the source itself", clean_path(src))));
    }
    if real_dst.starts_with(real_src) || real_src.starts_with(real_dst) {
        return Err(VfsError::NotSupported(format!(
            "{} and its destination contain one another",
            clean_path(src)
        )));
    }
    Ok(())
}

/// Copy one file block by block into a scratch sibling, then rename it over
/// `dst`. A stopped or failed copy leaves `dst` as it was.
fn copy_file_blocks(src: &Path, dst: &Path, stop: &StopSignal) -> Result<u64> {
    let mut input = File::open(src)?;
    let staging = scratch_sibling(dst);
    let mut output = File::create(&staging)?;
    let mut buf = vec![0u8; COPY_BLOCK];
    let mut total = 0u64;
    let res = (|| -> Result<u64> {
        loop {
            stop.check()?;
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n])?;
            total += n as u64;
        }
        output.flush()?;
        Ok(total)
    })();
    drop(output);
    let res = res.and_then(|total| {
        fs::rename(&staging, dst)?;
        Ok(total)
    });
    if res.is_err() {
        let _ = fs::remove_file(&staging);
    }
    res
}

/// Rename `src` to `dst`. An existing `dst` is set aside first and put back
/// if the rename fails.
fn move_replacing(src: &Path, dst: &Path, replacing: bool) -> Result<()> {
    if !replacing || (src.is_file() && dst.is_file()) {
        fs::rename(src, dst)?;
        return Ok(());
    }
    let aside = scratch_sibling(dst);
    fs::rename(dst, &aside)?;
    if let Err(e) = fs::rename(src, dst) {
        let _ = fs::rename(&aside, dst);
        return Err(e.into());
    }
    if aside.is_dir() {
        fs::remove_dir_all(&aside)?;
    } else {
        fs::remove_file(&aside)?;
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path, stop: &StopSignal) -> Result<u64> {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(src).into_iter() {
        stop.check()?;
        let entry = entry.map_err(|e| VfsError::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| VfsError::Unexpected(e.to_string()))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            total += copy_file_blocks(entry.path(), &target, stop)?;
        }
    }
    Ok(total)
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn attributes(&self, path: &str) -> Result<NodeAttributes> {
        let real = self.resolve(path)?;
        let path = path.to_string();
        blocking(move || Self::attributes_of(&path, &real)).await
    }

    async fn list(&self, dir: &str) -> Result<Vec<NodeAttributes>> {
        let real = self.resolve(dir)?;
        let dir = clean_path(dir);
        blocking(move || {
            if !real.is_dir() {
                return Err(VfsError::DirectoryNotFound(dir));
            }
            let mut items = Vec::new();
            for e in fs::read_dir(&real)? {
                let e = e?;
                let name = e.file_name().to_string_lossy().to_string();
                let path = join_path(&dir, &name);
                items.push(Self::attributes_of(&path, &e.path())?);
            }
            // Sort entries: directories first, then files, alphabetically within each
            items.sort_by(|a, b| match (a.node_type, b.node_type) {
                (NodeType::Directory, NodeType::File) => std::cmp::Ordering::Less,
                (NodeType::File, NodeType::Directory) => std::cmp::Ordering::Greater,
                _ => a.name.cmp(&b.name),
            });
            Ok(items)
        })
        .await
    }

    async fn create(&self, path: &str, node_type: NodeType, create_parents: bool) -> Result<()> {
        let real = self.resolve(path)?;
        let existing = self.attributes(path).await?;
        if existing.exists {
            if existing.node_type == node_type {
                return Ok(());
            }
            return Err(VfsError::AlreadyExists(clean_path(path)));
        }
        if !create_parents {
            self.require_parent(path).await?;
        }
        let clean = clean_path(path);
        blocking(move || {
            match node_type {
                NodeType::Directory if create_parents => fs::create_dir_all(&real)?,
                NodeType::Directory => fs::create_dir(&real)?,
                NodeType::File => {
                    if let Some(parent) = real.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .open(&real)
                        .map_err(|e| VfsError::from_fs_io(e, &clean, false))?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, path: &str, node_type: Option<NodeType>, recursive: bool) -> Result<()> {
        let clean = clean_path(path);
        if clean == "/" {
            return Err(VfsError::NotSupported("deleting the root".into()));
        }
        let real = self.resolve(path)?;
        let attrs = self.attributes(path).await?;
        let wanted = node_type.unwrap_or(attrs.node_type);
        if !attrs.exists || attrs.node_type != wanted {
            return Err(match wanted {
                NodeType::Directory => VfsError::DirectoryNotFound(clean),
                NodeType::File => VfsError::FileNotFound(clean),
            });
        }
        blocking(move || {
            match wanted {
                NodeType::File => fs::remove_file(&real)?,
                NodeType::Directory if recursive => fs::remove_dir_all(&real)?,
                NodeType::Directory => fs::remove_dir(&real)?,
            }
            Ok(())
        })
        .await
    }

    async fn copy(&self, src: &str, dst: &str, overwrite: bool, stop: StopSignal) -> Result<u64> {
        let src_attrs = self.attributes(src).await?;
        if !src_attrs.exists {
            return Err(VfsError::FileNotFound(clean_path(src)));
        }
        let real_src = self.resolve(src)?;
        let real_dst = self.resolve(dst)?;
        check_disjoint(src, &real_src, &real_dst)?;
        let dst_attrs = self.attributes(dst).await?;
        if dst_attrs.exists && !overwrite {
            return Err(VfsError::AlreadyExists(clean_path(dst)));
        }
        self.require_parent(dst).await?;
        blocking(move || {
            if src_attrs.is_directory() {
                copy_tree(&real_src, &real_dst, &stop)
            } else {
                copy_file_blocks(&real_src, &real_dst, &stop)
            }
        })
        .await
    }

    async fn rename(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        let src_attrs = self.attributes(src).await?;
        if !src_attrs.exists {
            return Err(VfsError::FileNotFound(clean_path(src)));
        }
        let real_src = self.resolve(src)?;
        let real_dst = self.resolve(dst)?;
        if real_src == real_dst {
            return Ok(());
        }
        check_disjoint(src, &real_src, &real_dst)?;
        let dst_attrs = self.attributes(dst).await?;
        if dst_attrs.exists && !overwrite {
            return Err(VfsError::AlreadyExists(clean_path(dst)));
        }
        self.require_parent(dst).await?;
        blocking(move || move_replacing(&real_src, &real_dst, dst_attrs.exists)).await
    }

    async fn open(
        &self,
        path: &str,
        mode: OpenMode,
        access: FileAccess,
        _share: FileShare,
    ) -> Result<Box<dyn RandomAccessStream>> {
        let clean = clean_path(path);
        if mode != OpenMode::Open && !access.can_write() {
            return Err(VfsError::invalid_value("access", format!("{} requires write access", mode.as_str())));
        }
        let attrs = self.attributes(path).await?;
        if attrs.exists && attrs.is_directory() {
            return Err(VfsError::NotSupported(format!("{} is a directory", clean)));
        }
        if !attrs.exists {
            if matches!(mode, OpenMode::Open | OpenMode::Truncate) {
                return Err(VfsError::FileNotFound(clean));
            }
            self.require_parent(path).await?;
        }
        let real = self.resolve(path)?;
        let mut opts = tokio::fs::OpenOptions::new();
        opts.read(access.can_read()).write(access.can_write());
        match mode {
            OpenMode::Open => {}
            OpenMode::Create => {
                opts.create(true).truncate(true);
            }
            OpenMode::CreateNew => {
                opts.create_new(true);
            }
            OpenMode::OpenOrCreate | OpenMode::Append => {
                opts.create(true);
            }
            OpenMode::Truncate => {
                opts.truncate(true);
            }
        }
        let mut file = opts
            .open(&real)
            .await
            .map_err(|e| VfsError::from_fs_io(e, &clean, false))?;
        if mode == OpenMode::Append {
            file.seek(std::io::SeekFrom::End(0)).await?;
        }
        Ok(Box::new(file))
    }

    async fn compute_hash(
        &self,
        path: &str,
        algorithm: HashAlgorithm,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Vec<u8>> {
        let clean = clean_path(path);
        let attrs = self.attributes(path).await?;
        if !attrs.exists {
            return Err(VfsError::FileNotFound(clean));
        }
        if attrs.is_directory() {
            return Err(VfsError::NotSupported(format!("hashing directory {}", clean)));
        }
        let real = self.resolve(path)?;
        blocking(move || {
            let mut f = File::open(&real).map_err(|e| VfsError::from_fs_io(e, &clean, false))?;
            hash_range(&mut f, algorithm, offset, length)
        })
        .await
    }

    async fn set_modified(&self, path: &str, modified: DateTime<Utc>) -> Result<()> {
        let clean = clean_path(path);
        let attrs = self.attributes(path).await?;
        if !attrs.exists {
            return Err(VfsError::FileNotFound(clean));
        }
        let real = self.resolve(path)?;
        blocking(move || {
            let ft = filetime::FileTime::from_system_time(modified.into());
            filetime::set_file_mtime(&real, ft)?;
            Ok(())
        })
        .await
    }
}
