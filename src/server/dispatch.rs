//! Verb registry: which processor runs a verb, in which run levels, with
//! which option schema.

use super::commands::{nodes, random_access, session, transfer};
use super::connection::{Connection, Outcome};
use super::run_level::RunLevelKind;
use crate::error::{Result, VfsError};
use crate::options::{OptionSchema, ParsedOptions};
use crate::protocol::verb;
use lazy_static::lazy_static;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Login,
    AdHocEncryption,
    List,
    GetAttributes,
    SetAttributes,
    Create,
    Delete,
    Copy,
    Move,
    ComputeHash,
    Download,
    Claim,
    RandomAccess,
    Read,
    Write,
    Flush,
    Seek,
    SetPosition,
    GetPosition,
    SetLength,
    GetLength,
    Exit,
    Noop,
    ListCommands,
    Quit,
    Cancel,
}

pub struct CommandBinding {
    pub verb: Verb,
    pub name: &'static str,
    pub levels: &'static [RunLevelKind],
    pub schema: &'static OptionSchema,
}

impl CommandBinding {
    pub fn allowed_in(&self, level: RunLevelKind) -> bool {
        self.levels.iter().any(|bound| bound.admits(level))
    }
}

const HANDSHAKE: &[RunLevelKind] = &[RunLevelKind::Handshake];
const NORMAL: &[RunLevelKind] = &[RunLevelKind::Normal];
const RANDOM: &[RunLevelKind] = &[RunLevelKind::RandomAccess];
const ANY: &[RunLevelKind] = &[RunLevelKind::Any];
const HANDSHAKE_OR_NORMAL: &[RunLevelKind] = &[RunLevelKind::Handshake, RunLevelKind::Normal];

macro_rules! bind {
    ($verb:ident, $name:expr, $levels:expr, $schema:expr) => {
        CommandBinding {
            verb: Verb::$verb,
            name: $name,
            levels: $levels,
            schema: $schema,
        }
    };
}

static BINDINGS: &[CommandBinding] = &[
    bind!(Login, verb::LOGIN, HANDSHAKE, &session::LOGIN),
    bind!(AdHocEncryption, verb::ADHOCENCRYPTION, HANDSHAKE_OR_NORMAL, &session::ADHOCENCRYPTION),
    bind!(List, verb::LIST, NORMAL, &nodes::LIST),
    bind!(GetAttributes, verb::GETATTRIBUTES, NORMAL, &nodes::PATH_ONLY),
    bind!(SetAttributes, verb::SETATTRIBUTES, NORMAL, &nodes::SETATTRIBUTES),
    bind!(Create, verb::CREATE, NORMAL, &nodes::CREATE),
    bind!(Delete, verb::DELETE, NORMAL, &nodes::DELETE),
    bind!(Copy, verb::COPY, NORMAL, &nodes::TRANSFER),
    bind!(Move, verb::MOVE, NORMAL, &nodes::TRANSFER),
    bind!(ComputeHash, verb::COMPUTEHASH, NORMAL, &nodes::COMPUTEHASH),
    bind!(Download, verb::DOWNLOAD, NORMAL, &transfer::DOWNLOAD),
    bind!(Claim, verb::CLAIM, NORMAL, &transfer::CLAIM),
    bind!(RandomAccess, verb::RANDOMACCESS, NORMAL, &random_access::OPEN),
    bind!(Read, verb::READ, RANDOM, &random_access::COUNT),
    bind!(Write, verb::WRITE, RANDOM, &random_access::COUNT),
    bind!(Flush, verb::FLUSH, RANDOM, &OptionSchema::EMPTY),
    bind!(Seek, verb::SEEK, RANDOM, &random_access::SEEK),
    bind!(SetPosition, verb::SETPOSITION, RANDOM, &random_access::POSITION),
    bind!(GetPosition, verb::GETPOSITION, RANDOM, &OptionSchema::EMPTY),
    bind!(SetLength, verb::SETLENGTH, RANDOM, &random_access::LENGTH),
    bind!(GetLength, verb::GETLENGTH, RANDOM, &OptionSchema::EMPTY),
    bind!(Exit, verb::EXIT, RANDOM, &OptionSchema::EMPTY),
    bind!(Noop, verb::NOOP, ANY, &OptionSchema::EMPTY),
    bind!(ListCommands, verb::LISTCOMMANDS, ANY, &OptionSchema::EMPTY),
    bind!(Quit, verb::QUIT, ANY, &OptionSchema::EMPTY),
    bind!(Cancel, verb::CANCEL, ANY, &OptionSchema::EMPTY),
];

lazy_static! {
    static ref REGISTRY: HashMap<&'static str, &'static CommandBinding> =
        BINDINGS.iter().map(|b| (b.name, b)).collect();
}

/// Binding for a verb (case-insensitive), if the verb exists at all.
pub fn lookup(name: &str) -> Option<&'static CommandBinding> {
    REGISTRY.get(name.to_ascii_uppercase().as_str()).copied()
}

/// Binding for a verb legal in `level`; both failures are `CommandNotSupported`.
pub fn resolve(name: &str, level: RunLevelKind) -> Result<&'static CommandBinding> {
    let binding = lookup(name)
        .ok_or_else(|| VfsError::CommandNotSupported(format!("unknown command {}", name)))?;
    if !binding.allowed_in(level) {
        return Err(VfsError::CommandNotSupported(format!(
            "{} is not available in {}",
            binding.name, level
        )));
    }
    Ok(binding)
}

/// Verbs legal in `level`, in registry order
pub fn available(level: RunLevelKind) -> Vec<&'static CommandBinding> {
    BINDINGS.iter().filter(|b| b.allowed_in(level)).collect()
}

pub async fn execute(conn: &mut Connection, verb: Verb, opts: &ParsedOptions) -> Result<Outcome> {
    match verb {
        Verb::Login => session::login(conn, opts).await,
        Verb::AdHocEncryption => session::adhoc_encryption(conn, opts).await,
        Verb::Noop => session::noop(conn, opts).await,
        Verb::ListCommands => session::list_commands(conn, opts).await,
        Verb::Quit => session::quit(conn, opts).await,
        Verb::Cancel => session::cancel(conn, opts).await,
        Verb::List => nodes::list(conn, opts).await,
        Verb::GetAttributes => nodes::get_attributes(conn, opts).await,
        Verb::SetAttributes => nodes::set_attributes(conn, opts).await,
        Verb::Create => nodes::create(conn, opts).await,
        Verb::Delete => nodes::delete(conn, opts).await,
        Verb::Copy => nodes::copy(conn, opts).await,
        Verb::Move => nodes::rename(conn, opts).await,
        Verb::ComputeHash => nodes::compute_hash(conn, opts).await,
        Verb::Download => transfer::download(conn, opts).await,
        Verb::Claim => transfer::claim(conn, opts).await,
        Verb::RandomAccess => random_access::open(conn, opts).await,
        Verb::Read => random_access::read(conn, opts).await,
        Verb::Write => random_access::write(conn, opts).await,
        Verb::Flush => random_access::flush(conn, opts).await,
        Verb::Seek => random_access::seek(conn, opts).await,
        Verb::SetPosition => random_access::set_position(conn, opts).await,
        Verb::GetPosition => random_access::get_position(conn, opts).await,
        Verb::SetLength => random_access::set_length(conn, opts).await,
        Verb::GetLength => random_access::get_length(conn, opts).await,
        Verb::Exit => random_access::exit(conn, opts).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup("list").unwrap().verb, Verb::List);
        assert_eq!(lookup("RandomAccess").unwrap().verb, Verb::RandomAccess);
        assert!(lookup("FORMAT").is_none());
    }

    #[test]
    fn test_run_level_gating() {
        assert!(resolve("LOGIN", RunLevelKind::Handshake).is_ok());
        // Double LOGIN
        assert!(matches!(
            resolve("LOGIN", RunLevelKind::Normal),
            Err(VfsError::CommandNotSupported(_))
        ));
        assert!(resolve("READ", RunLevelKind::Normal).is_err());
        assert!(resolve("LIST", RunLevelKind::Handshake).is_err());
        assert!(resolve("LIST", RunLevelKind::RandomAccess).is_err());
        assert!(resolve("ADHOCENCRYPTION", RunLevelKind::Handshake).is_ok());
        assert!(resolve("ADHOCENCRYPTION", RunLevelKind::Normal).is_ok());
        assert!(resolve("ADHOCENCRYPTION", RunLevelKind::RandomAccess).is_err());
        for level in [RunLevelKind::Handshake, RunLevelKind::Normal, RunLevelKind::RandomAccess] {
            for v in ["NOOP", "LISTCOMMANDS", "QUIT", "CANCEL"] {
                assert!(resolve(v, level).is_ok(), "{v} in {level}");
            }
        }
        assert!(matches!(resolve("BOGUS", RunLevelKind::Normal), Err(VfsError::CommandNotSupported(_))));
    }

    #[test]
    fn test_every_verb_bound_once() {
        assert_eq!(REGISTRY.len(), BINDINGS.len());
        let handshake: Vec<_> = available(RunLevelKind::Handshake).iter().map(|b| b.name).collect();
        assert_eq!(
            handshake,
            vec!["LOGIN", "ADHOCENCRYPTION", "NOOP", "LISTCOMMANDS", "QUIT", "CANCEL"]
        );
        assert_eq!(available(RunLevelKind::RandomAccess).len(), 9 + 4);
        assert!(available(RunLevelKind::Disconnected).is_empty());
    }
}
