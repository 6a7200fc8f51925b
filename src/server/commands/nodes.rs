//! Node commands: LIST, GETATTRIBUTES, SETATTRIBUTES, CREATE, DELETE, COPY,
//! MOVE and COMPUTEHASH.

use super::{ok, ok_with};
use crate::checksum::HashAlgorithm;
use crate::error::{ErrorCode, Result, VfsError};
use crate::options::{OptionSchema, OptionSpec, ParsedOptions};
use crate::protocol::verb;
use crate::protocol_core::{split_command, Attributes, Response};
use crate::server::connection::{Connection, Outcome};
use crate::vfs::{NodeType, StopSignal};
use chrono::{DateTime, Utc};
use log::debug;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const NODE_TYPES: &[&str] = &["f", "d", "file", "directory"];

pub static LIST: OptionSchema = OptionSchema {
    specs: &[
        OptionSpec::text("path").positional().default("/"),
        OptionSpec::choice("type", NODE_TYPES),
    ],
};

pub static PATH_ONLY: OptionSchema = OptionSchema {
    specs: &[OptionSpec::text("path").required().positional()],
};

pub static SETATTRIBUTES: OptionSchema = OptionSchema {
    specs: &[
        OptionSpec::text("path").required().positional(),
        OptionSpec::text("modified").required(),
    ],
};

pub static CREATE: OptionSchema = OptionSchema {
    specs: &[
        OptionSpec::text("path").required().positional(),
        OptionSpec::choice("type", NODE_TYPES).default("f"),
        OptionSpec::flag("parents"),
    ],
};

pub static DELETE: OptionSchema = OptionSchema {
    specs: &[
        OptionSpec::text("path").required().positional(),
        OptionSpec::choice("type", NODE_TYPES),
        OptionSpec::flag("recursive"),
    ],
};

/// COPY and MOVE
pub static TRANSFER: OptionSchema = OptionSchema {
    specs: &[
        OptionSpec::text("source").required().positional(),
        OptionSpec::text("dest").required().positional(),
        OptionSpec::flag("overwrite"),
    ],
};

pub static COMPUTEHASH: OptionSchema = OptionSchema {
    specs: &[
        OptionSpec::text("path").required().positional(),
        OptionSpec::choice("algorithm", HashAlgorithm::NAMES).default("sha256"),
        OptionSpec::number("offset").default("0"),
        OptionSpec::number("length"),
    ],
};

fn node_type(opts: &ParsedOptions) -> Result<Option<NodeType>> {
    opts.text("type").map(NodeType::parse).transpose()
}

pub async fn list(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let path = opts.require_text("path")?;
    let filter = node_type(opts)?;
    let children = conn.ctx.fs.list(path).await?;
    let mut count = 0usize;
    for child in children.iter().filter(|c| filter.map_or(true, |t| c.node_type == t)) {
        conn.io.send(&Response::Entry(child.to_wire())).await?;
        count += 1;
    }
    Ok(ok_with(Attributes::new().with("COUNT", count)))
}

pub async fn get_attributes(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let attrs = conn.ctx.fs.attributes(opts.require_text("path")?).await?;
    Ok(ok_with(attrs.to_wire()))
}

pub async fn set_attributes(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let path = opts.require_text("path")?;
    let raw = opts.require_text("modified")?;
    let modified = DateTime::parse_from_rfc3339(raw)
        .map_err(|_| VfsError::invalid_value("modified", raw))?
        .with_timezone(&Utc);
    conn.ctx.fs.set_modified(path, modified).await?;
    Ok(ok())
}

pub async fn create(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let path = opts.require_text("path")?;
    let node_type = node_type(opts)?.unwrap_or(NodeType::File);
    conn.ctx.fs.create(path, node_type, opts.flag("parents")).await?;
    Ok(ok())
}

pub async fn delete(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let path = opts.require_text("path")?;
    conn.ctx
        .fs
        .delete(path, node_type(opts)?, opts.flag("recursive"))
        .await?;
    conn.ctx.logger.delete(conn.peer, path);
    Ok(ok())
}

pub async fn rename(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let src = opts.require_text("source")?;
    let dst = opts.require_text("dest")?;
    conn.ctx.fs.rename(src, dst, opts.flag("overwrite")).await?;
    Ok(ok())
}

pub async fn compute_hash(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let path = opts.require_text("path")?;
    let algorithm = HashAlgorithm::parse(opts.require_text("algorithm")?)?;
    let digest = conn
        .ctx
        .fs
        .compute_hash(path, algorithm, opts.require_number("offset")?, opts.number("length"))
        .await?;
    Ok(ok_with(
        Attributes::new()
            .with("ALGORITHM", algorithm.name())
            .with("HASH", hex::encode(digest)),
    ))
}

// COPY state cell: exactly one of finish/cancel moves it off RUNNING
const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const CANCELLED: u8 = 2;

/// Details value sent when a CANCEL arrived after a COPY had already failed
pub const CANCEL_IGNORED: &str = "CANCEL_IGNORED";

/// Decides whether a running COPY finished or was cancelled first.
#[derive(Clone)]
struct CopyRace(Arc<AtomicU8>);

impl CopyRace {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(RUNNING)))
    }

    /// True when the copy finished before any CANCEL was taken.
    fn finish(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, FINISHED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// True when the CANCEL won and the copy must be stopped.
    fn cancel(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Terminal reply for a copy that ran to completion.
fn copy_reply(result: Result<u64>, cancel_ignored: bool) -> Result<Outcome> {
    match result {
        Ok(bytes) => {
            let mut attrs = Attributes::new().with("BYTES", bytes);
            if cancel_ignored {
                attrs.push("CANCEL", "IGNORED");
            }
            Ok(ok_with(attrs))
        }
        Err(e) if cancel_ignored => match Response::from_error(&e) {
            Some(Response::Error { code, message, .. }) => Ok(Outcome::Reply(Response::Error {
                code,
                message,
                details: Some(CANCEL_IGNORED.to_string()),
            })),
            _ => Err(e),
        },
        Err(e) => Err(e),
    }
}

/// COPY runs in the background while CANCEL lines are read.
///
/// - finished, no CANCEL read: `OK BYTES=n`
/// - CANCEL read while running: `ERROR CODE=CANCELLED`
/// - CANCEL read after it finished: `OK BYTES=n CANCEL=IGNORED`
pub async fn copy(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let src = opts.require_text("source")?.to_string();
    let dst = opts.require_text("dest")?.to_string();
    let overwrite = opts.flag("overwrite");

    let stop = StopSignal::new();
    let race = CopyRace::new();
    let mut task = {
        let fs = conn.ctx.fs.clone();
        let stop = stop.clone();
        let race = race.clone();
        tokio::spawn(async move {
            let result = fs.copy(&src, &dst, overwrite, stop).await;
            race.finish();
            result
        })
    };

    let mut cancel_ignored = false;
    let joined = loop {
        tokio::select! {
            joined = &mut task => break joined,
            line = conn.io.read_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        stop.stop();
                        return Err(VfsError::Disconnected);
                    }
                    Err(e) => {
                        stop.stop();
                        return Err(e);
                    }
                };
                let (name, _) = split_command(&line);
                if !name.eq_ignore_ascii_case(verb::CANCEL) {
                    conn.io
                        .send(&Response::error(
                            ErrorCode::CommandNotSupported,
                            "only CANCEL is accepted while COPY runs",
                        ))
                        .await?;
                    continue;
                }
                if race.cancel() {
                    stop.stop();
                    let _ = (&mut task).await;
                    debug!("{}: copy cancelled", conn.peer);
                    return Err(VfsError::Cancelled);
                }
                cancel_ignored = true;
                break (&mut task).await;
            }
        }
    };

    let result = joined.map_err(|e| VfsError::Unexpected(format!("copy task failed: {}", e)))?;
    copy_reply(result, cancel_ignored)
}
