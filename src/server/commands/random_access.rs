//! RANDOMACCESS and the stream commands of the RandomAccess run level

use super::{ok, ok_with};
use crate::error::{Result, VfsError};
use crate::options::{OptionSchema, OptionSpec, ParsedOptions};
use crate::protocol_core::{Attributes, Response};
use crate::server::connection::{Connection, Outcome};
use crate::server::run_level::RandomAccessState;
use crate::vfs::{FileAccess, FileShare, OpenMode, RandomAccessStream};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

pub static OPEN: OptionSchema = OptionSchema {
    specs: &[
        OptionSpec::text("path").required().positional(),
        OptionSpec::choice("mode", OpenMode::NAMES).default("open"),
        OptionSpec::choice("access", FileAccess::NAMES).default("read"),
        OptionSpec::choice("share", FileShare::NAMES).default("none"),
    ],
};

/// READ and WRITE
pub static COUNT: OptionSchema = OptionSchema {
    specs: &[OptionSpec::number("count").required().positional()],
};

pub static SEEK: OptionSchema = OptionSchema {
    specs: &[
        // Signed, so not a Number option
        OptionSpec::text("offset").required().positional(),
        OptionSpec::choice("origin", &["begin", "current", "end"]).default("begin"),
    ],
};

pub static POSITION: OptionSchema = OptionSchema {
    specs: &[OptionSpec::number("position").required().positional()],
};

pub static LENGTH: OptionSchema = OptionSchema {
    specs: &[OptionSpec::number("length").required().positional()],
};

async fn position_of(stream: &mut Box<dyn RandomAccessStream>) -> Result<u64> {
    Ok(stream.seek(SeekFrom::Current(0)).await?)
}

/// Reject a block larger than the server allows before any payload moves.
fn block_size(conn: &Connection, opts: &ParsedOptions) -> Result<usize> {
    let count = opts.require_number("count")?;
    if count > conn.ctx.max_block_size as u64 {
        return Err(VfsError::invalid_value(
            "count",
            format!("{} exceeds the {} byte block limit", count, conn.ctx.max_block_size),
        ));
    }
    Ok(count as usize)
}

pub async fn open(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let path = opts.require_text("path")?;
    let mode = OpenMode::parse(opts.require_text("mode")?)?;
    let access = FileAccess::parse(opts.require_text("access")?)?;
    let share = FileShare::parse(opts.require_text("share")?)?;

    let mut stream = conn.ctx.fs.open(path, mode, access, share).await?;
    let length = stream.length().await?;
    let position = position_of(&mut stream).await?;
    conn.level.enter_random_access(RandomAccessState {
        stream,
        path: crate::protocol_core::clean_path(path),
        access,
    })?;
    Ok(ok_with(
        Attributes::new().with("LENGTH", length).with("POSITION", position),
    ))
}

/// `OK LENGTH=m` followed by m raw bytes, m short only at end of file
pub async fn read(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let count = block_size(conn, opts)?;
    let state = conn.level.random_access()?;
    if !state.access.can_read() {
        return Err(VfsError::Unauthorized(format!("{} is not open for reading", state.path)));
    }
    conn.scratch.resize(count, 0);
    let mut filled = 0;
    while filled < count {
        let n = state.stream.read(&mut conn.scratch[filled..count]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    conn.io
        .send(&Response::Ok(Attributes::new().with("LENGTH", filled)))
        .await?;
    conn.io.write_payload(&conn.scratch[..filled]).await?;
    conn.io.flush().await?;
    Ok(Outcome::Handled)
}

/// `OK` go-ahead, exactly n raw bytes from the peer, then `OK` or `ERROR`
pub async fn write(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let count = block_size(conn, opts)?;
    let state = conn.level.random_access()?;
    if !state.access.can_write() {
        return Err(VfsError::Unauthorized(format!("{} is not open for writing", state.path)));
    }
    conn.io.send(&Response::ok()).await?;
    conn.scratch.resize(count, 0);
    conn.io.read_payload(&mut conn.scratch[..count]).await?;
    state.stream.write_all(&conn.scratch[..count]).await?;
    state.stream.flush().await?;
    Ok(ok())
}

pub async fn flush(conn: &mut Connection, _opts: &ParsedOptions) -> Result<Outcome> {
    conn.level.random_access()?.stream.flush().await?;
    Ok(ok())
}

pub async fn seek(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let raw = opts.require_text("offset")?;
    let offset: i64 = raw
        .parse()
        .map_err(|_| VfsError::invalid_value("offset", raw))?;
    let target = match opts.require_text("origin")? {
        "current" => SeekFrom::Current(offset),
        "end" => SeekFrom::End(offset),
        _ => {
            let start = u64::try_from(offset).map_err(|_| VfsError::invalid_value("offset", raw))?;
            SeekFrom::Start(start)
        }
    };
    let position = conn.level.random_access()?.stream.seek(target).await?;
    Ok(ok_with(Attributes::new().with("POSITION", position)))
}

pub async fn set_position(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let position = opts.require_number("position")?;
    conn.level
        .random_access()?
        .stream
        .seek(SeekFrom::Start(position))
        .await?;
    Ok(ok())
}

pub async fn get_position(conn: &mut Connection, _opts: &ParsedOptions) -> Result<Outcome> {
    let position = position_of(&mut conn.level.random_access()?.stream).await?;
    Ok(ok_with(Attributes::new().with("POSITION", position)))
}

pub async fn set_length(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let length = opts.require_number("length")?;
    let state = conn.level.random_access()?;
    if !state.access.can_write() {
        return Err(VfsError::Unauthorized(format!("{} is not open for writing", state.path)));
    }
    state.stream.set_length(length).await?;
    Ok(ok())
}

pub async fn get_length(conn: &mut Connection, _opts: &ParsedOptions) -> Result<Outcome> {
    let length = conn.level.random_access()?.stream.length().await?;
    Ok(ok_with(Attributes::new().with("LENGTH", length)))
}

pub async fn exit(conn: &mut Connection, _opts: &ParsedOptions) -> Result<Outcome> {
    let mut state = conn.level.exit_random_access()?;
    state.stream.flush().await?;
    Ok(ok())
}
