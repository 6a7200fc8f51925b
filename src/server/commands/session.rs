//! LOGIN, ADHOCENCRYPTION and the commands legal in every run level

use super::{ok, ok_with};
use crate::error::{Result, VfsError};
use crate::options::{OptionSchema, OptionSpec, ParsedOptions};
use crate::protocol_core::{Attributes, Response};
use crate::server::connection::{Connection, Outcome};
use crate::server::dispatch;
use log::info;
use tokio::io::AsyncWriteExt;

pub static LOGIN: OptionSchema = OptionSchema {
    specs: &[
        OptionSpec::text("user").required().positional(),
        OptionSpec::text("password").positional().default(""),
    ],
};

pub static ADHOCENCRYPTION: OptionSchema = OptionSchema {
    specs: &[OptionSpec::choice("mode", &["tls", "compress"]).required().positional()],
};

pub async fn login(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    let user = opts.require_text("user")?;
    let password = opts.text("password").unwrap_or_default();
    let accepted = conn.ctx.auth.verify(user, password);
    conn.ctx.logger.login(conn.peer, user, accepted);
    if !accepted {
        return Err(VfsError::Unauthorized(format!("login rejected for {}", user)));
    }
    conn.level.login()?;
    conn.user = Some(user.to_string());
    info!("{}: logged in as {}", conn.peer, user);
    Ok(ok())
}

pub async fn adhoc_encryption(conn: &mut Connection, opts: &ParsedOptions) -> Result<Outcome> {
    match opts.require_text("mode")? {
        "tls" => {
            if conn.io.is_encrypted() {
                return Err(VfsError::NotSupported("connection is already encrypted".into()));
            }
            let config = conn
                .ctx
                .tls
                .clone()
                .ok_or_else(|| VfsError::NotSupported("TLS is not configured".into()))?;
            Ok(Outcome::StartTls(config))
        }
        other => Err(VfsError::NotSupported(format!("encryption mode {}", other))),
    }
}

pub async fn noop(_conn: &mut Connection, _opts: &ParsedOptions) -> Result<Outcome> {
    Ok(ok())
}

/// One `ENTRY NAME=<verb>` per verb legal right now, then `OK COUNT=n`
pub async fn list_commands(conn: &mut Connection, _opts: &ParsedOptions) -> Result<Outcome> {
    let bindings = dispatch::available(conn.level.kind());
    for b in &bindings {
        conn.io
            .send(&Response::Entry(Attributes::new().with("NAME", b.name)))
            .await?;
    }
    Ok(ok_with(Attributes::new().with("COUNT", bindings.len())))
}

pub async fn quit(conn: &mut Connection, _opts: &ParsedOptions) -> Result<Outcome> {
    if let Some(mut state) = conn.level.disconnect() {
        state.stream.flush().await?;
    }
    Ok(ok())
}

/// A CANCEL outside a running COPY has nothing to stop
pub async fn cancel(_conn: &mut Connection, _opts: &ParsedOptions) -> Result<Outcome> {
    Ok(ok())
}
