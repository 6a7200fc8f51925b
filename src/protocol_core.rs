//! Shared line-protocol logic for both the server and the client
//!
//! Tokenizing, quoting and the response line grammar live here so the two
//! sides can never disagree on escaping.

use crate::error::{ErrorCode, Result, VfsError};
use crate::protocol::response;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Escape a value for use inside double quotes
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Quote a value, escaping as needed
pub fn quote(s: &str) -> String {
    format!("\"{}\"", escape(s))
}

/// Split a line into whitespace separated tokens.
///
/// Double quotes group text (they may start mid-token, as in `-name="a b"`)
/// and are removed; `\"`, `\\`, `\r` and `\n` are unescaped inside them.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => in_quotes = false,
                '\\' => match chars.next() {
                    Some('r') => cur.push('\r'),
                    Some('n') => cur.push('\n'),
                    Some(other) => cur.push(other),
                    None => return Err(VfsError::InvalidParam("dangling escape".into())),
                },
                _ => cur.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = true;
                in_token = true;
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut cur));
                    in_token = false;
                }
            }
            _ => {
                cur.push(c);
                in_token = true;
            }
        }
    }
    if in_quotes {
        return Err(VfsError::InvalidParam("unterminated quote".into()));
    }
    if in_token {
        tokens.push(cur);
    }
    Ok(tokens)
}

/// Split a command line into (verb, raw option string)
pub fn split_command(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim_start()),
        None => (line, ""),
    }
}

/// Builder for an outgoing command line
#[derive(Debug, Clone)]
pub struct CommandLine(String);

impl CommandLine {
    pub fn new(verb: &str) -> Self {
        Self(verb.to_string())
    }

    /// Positional value, quoted when needed
    pub fn arg(mut self, value: impl AsRef<str>) -> Self {
        self.0.push(' ');
        self.0.push_str(&token_text(value.as_ref()));
        self
    }

    pub fn opt(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.0.push_str(&format!(" -{}={}", name, token_text(value.as_ref())));
        self
    }

    pub fn flag(mut self, name: &str, on: bool) -> Self {
        if on {
            self.0.push_str(&format!(" -{}", name));
        }
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn token_text(v: &str) -> String {
    let bare = !v.is_empty()
        && !v.starts_with('-')
        && v.chars().all(|c| !c.is_whitespace() && c != '"' && c != '\\');
    if bare {
        v.to_string()
    } else {
        quote(v)
    }
}

/// Ordered `KEY=value` pairs of a response line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, key: &str, value: impl ToString) {
        self.0.push((key.to_string(), value.to_string()));
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    /// Case-insensitive lookup
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| VfsError::Protocol(format!("response lacks {}", key)))
    }

    pub fn require_u64(&self, key: &str) -> Result<u64> {
        let v = self.require(key)?;
        v.parse()
            .map_err(|_| VfsError::Protocol(format!("{}={} is not a number", key, v)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn parse(tokens: &[String]) -> Result<Self> {
        let mut attrs = Attributes::new();
        for t in tokens {
            match t.split_once('=') {
                Some((k, v)) => attrs.push(k, v),
                None => attrs.push(t, ""),
            }
        }
        Ok(attrs)
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let bare = !v.is_empty()
                && v.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c));
            if bare {
                write!(f, "{}={}", k, v)?;
            } else {
                write!(f, "{}={}", k, quote(v))?;
            }
        }
        Ok(())
    }
}

/// One server-to-client line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ready,
    Ok(Attributes),
    Entry(Attributes),
    Error {
        code: String,
        message: Option<String>,
        details: Option<String>,
    },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(Attributes::new())
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.as_str().to_string(),
            message: Some(message.into()),
            details: None,
        }
    }

    /// Wire form of a reportable error, `None` for fatal ones.
    pub fn from_error(err: &VfsError) -> Option<Self> {
        let code = err.code()?;
        let details = match err {
            VfsError::Io(e) => Some(format!("{:?}", e.kind())),
            _ => None,
        };
        Some(Response::Error {
            code: code.as_str().to_string(),
            message: Some(err.to_string()),
            details,
        })
    }

    pub fn parse(line: &str) -> Result<Self> {
        let tokens = tokenize(line)?;
        let (head, rest) = match tokens.split_first() {
            Some((h, r)) => (h.as_str(), r),
            None => return Err(VfsError::Protocol("empty response line".into())),
        };
        match head {
            response::READY if rest.is_empty() => Ok(Response::Ready),
            response::OK => Ok(Response::Ok(Attributes::parse(rest)?)),
            response::ENTRY => Ok(Response::Entry(Attributes::parse(rest)?)),
            response::ERROR => {
                let attrs = Attributes::parse(rest)?;
                let code = attrs
                    .get("CODE")
                    .ok_or_else(|| VfsError::Protocol("ERROR without CODE".into()))?;
                Ok(Response::Error {
                    code: code.to_string(),
                    message: attrs.get("MESSAGE").map(str::to_string),
                    details: attrs.get("DETAILS").map(str::to_string),
                })
            }
            _ => Err(VfsError::Protocol(format!("unexpected line: {}", line))),
        }
    }

    /// Turn an `ERROR` into `Err`, anything else passes through.
    pub fn into_result(self) -> Result<Response> {
        match self {
            Response::Error { code, message, .. } => Err(VfsError::from_wire(&code, message.as_deref())),
            other => Ok(other),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ready => f.write_str(response::READY),
            Response::Ok(attrs) if attrs.is_empty() => f.write_str(response::OK),
            Response::Ok(attrs) => write!(f, "{} {}", response::OK, attrs),
            Response::Entry(attrs) => write!(f, "{} {}", response::ENTRY, attrs),
            Response::Error { code, message, details } => {
                write!(f, "{} CODE={}", response::ERROR, code)?;
                if let Some(m) = message {
                    write!(f, " MESSAGE={}", quote(m))?;
                }
                if let Some(d) = details {
                    write!(f, " DETAILS={}", quote(d))?;
                }
                Ok(())
            }
        }
    }
}

/// Normalize a protocol path (`/a/b`) to be safely under a root directory.
///
/// Rejects parent components and NUL bytes, canonicalizes existing paths
/// (or the parent for new files) and ensures the result stays under root.
pub fn normalize_under_root(root: &Path, p: &str) -> Result<PathBuf> {
    use Component::{CurDir, Normal, ParentDir, Prefix, RootDir};

    if p.contains('\0') {
        return Err(VfsError::MalformedUri(format!("path contains NUL byte: {:?}", p)));
    }

    let mut safe = PathBuf::new();
    for component in Path::new(p).components() {
        match component {
            CurDir | RootDir => {}
            Normal(s) => {
                // On Windows, reject components with ':' (ADS defense)
                #[cfg(windows)]
                if s.to_string_lossy().contains(':') {
                    return Err(VfsError::MalformedUri(format!("path component contains colon: {}", p)));
                }
                safe.push(s);
            }
            ParentDir | Prefix(_) => {
                return Err(VfsError::MalformedUri(format!("path contains disallowed component: {}", p)));
            }
        }
    }

    let canon_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let joined = canon_root.join(&safe);

    // For existing paths, canonicalize to resolve symlinks
    // For new files, canonicalize parent then append filename
    let final_path = if let Ok(canon) = joined.canonicalize() {
        canon
    } else if let (Some(parent), Some(name)) = (joined.parent(), joined.file_name()) {
        match parent.canonicalize() {
            Ok(canon_parent) => canon_parent.join(name),
            Err(_) => joined.clone(),
        }
    } else {
        joined.clone()
    };

    if !final_path.starts_with(&canon_root) {
        return Err(VfsError::MalformedUri(format!("path {} escapes root", p)));
    }
    Ok(final_path)
}

/// Canonical protocol form of a path: leading slash, no empty or `.` parts.
pub fn clean_path(p: &str) -> String {
    let parts: Vec<&str> = p
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    format!("/{}", parts.join("/"))
}

/// Parent of a protocol path; the root is its own parent.
pub fn parent_path(p: &str) -> String {
    let clean = clean_path(p);
    match clean.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => clean[..i].to_string(),
    }
}

/// Join a child name onto a protocol path
pub fn join_path(dir: &str, name: &str) -> String {
    clean_path(&format!("{}/{}", dir, name))
}
