//! DOWNLOAD and CLAIM: ticketed handoff of a file range to a second connection

use super::ok_with;
use crate::error::{Result, VfsError};
use crate::options::{OptionSchema, OptionSpec, ParsedOptions};
use crate::protocol_core::{Attributes, Response};
use crate::server::connection::{Connection, Outcome};
use crate::vfs::{FileAccess, FileShare, OpenMode};
use log::{info, warn};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const CLAIM_BLOCK: usize = 256 * 1024;

pub static DOWNLOAD: OptionSchema = OptionSchema {
    specs: &[
        OptionSpec::text("path").required().positional(),
        OptionSpec::choice("share", FileShare::NAMES).default("read"),
        OptionSpec::number("offset").default("0"),
        OptionSpec::number("length"),
    ],
};

pub static CLAIM: OptionSchema = OptionSchema {
    specs: &[OptionSpec::text("ticket").required().positional()],
};

pub async fn download(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let path = opts.require_text("path")?;
    let share = FileShare::parse(opts.require_text("share")?)?;
    let attrs = conn.ctx.fs.attributes(path).await?;
    if !attrs.exists || attrs.is_directory() {
        return Err(VfsError::FileNotFound(attrs.path));
    }
    let size = attrs.length.unwrap_or(0);
    let offset = opts.require_number("offset")?;
    if offset > size {
        return Err(VfsError::invalid_value("offset", offset.to_string()));
    }
    let available = size - offset;
    let length = opts.number("length").map_or(available, |l| l.min(available));

    let ticket = conn
        .ctx
        .tickets
        .register(conn.peer, &attrs.path, share, offset, length);
    let id = ticket.ticket.id.to_string();
    conn.ctx.logger.download(conn.peer, &id, &attrs.path, length);
    Ok(ok_with(Attributes::new().with("TICKET", id).with("LENGTH", length)))
}

/// Stream the ticket's range and close the connection.
pub async fn claim(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let id = opts.require_text("ticket")?;
    let ticket = match conn.ctx.tickets.claim(id, conn.peer) {
        Ok(ticket) => ticket,
        Err(e @ VfsError::Unauthorized(_)) => {
            warn!("{}: refused claim of {}: {}", conn.peer, id, e);
            conn.ctx.logger.claim(conn.peer, id, false);
            if let Some(resp) = Response::from_error(&e) {
                conn.io.send(&resp).await?;
            }
            conn.level.disconnect();
            return Ok(Outcome::Close);
        }
        Err(e) => {
            conn.ctx.logger.claim(conn.peer, id, false);
            return Err(e);
        }
    };
    conn.ctx.logger.claim(conn.peer, id, true);

    let mut stream = conn
        .ctx
        .fs
        .open(&ticket.path, OpenMode::Open, FileAccess::Read, ticket.share)
        .await?;
    stream.seek(SeekFrom::Start(ticket.offset)).await?;
    conn.io
        .send(&Response::Ok(Attributes::new().with("LENGTH", ticket.length)))
        .await?;

    // Past the OK line an error can no longer be reported; the peer sees a short payload
    let mut buf = vec![0u8; CLAIM_BLOCK.min(ticket.length as usize).max(1)];
    let mut remaining = ticket.length;
    while remaining > 0 {
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = match stream.read(&mut buf[..want]).await {
            Ok(0) => {
                warn!("{}: {} shrank during claim", conn.peer, ticket.path);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("{}: reading {} failed during claim: {}", conn.peer, ticket.path, e);
                break;
            }
        };
        conn.io.write_payload(&buf[..n]).await?;
        remaining -= n as u64;
    }
    conn.io.flush().await?;
    info!(
        "{}: claim {} sent {} bytes of {}",
        conn.peer,
        id,
        ticket.length - remaining,
        ticket.path
    );
    conn.level.disconnect();
    Ok(Outcome::Close)
}
