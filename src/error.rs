//! Error taxonomy shared by the server, the client and the node providers.
//!
//! Every variant that can cross the wire has a stable [`ErrorCode`]. Transport
//! level failures have no code: they are never reported, they end the
//! connection.

use std::fmt;
use thiserror::Error;

/// Stable wire codes carried by `ERROR CODE=<code>` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FileNotFound,
    DirectoryNotFound,
    MalformedUri,
    NotSupported,
    Unauthorized,
    AlreadyExists,
    IoError,
    CommandNotSupported,
    InvalidParam,
    InvalidValue,
    MissingParams,
    TooManyParams,
    Cancelled,
    Unexpected,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 14] = [
        ErrorCode::FileNotFound,
        ErrorCode::DirectoryNotFound,
        ErrorCode::MalformedUri,
        ErrorCode::NotSupported,
        ErrorCode::Unauthorized,
        ErrorCode::AlreadyExists,
        ErrorCode::IoError,
        ErrorCode::CommandNotSupported,
        ErrorCode::InvalidParam,
        ErrorCode::InvalidValue,
        ErrorCode::MissingParams,
        ErrorCode::TooManyParams,
        ErrorCode::Cancelled,
        ErrorCode::Unexpected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::DirectoryNotFound => "DIRECTORY_NOT_FOUND",
            ErrorCode::MalformedUri => "MALFORMED_URI",
            ErrorCode::NotSupported => "NOT_SUPPORTED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::CommandNotSupported => "COMMAND_NOT_SUPPORTED",
            ErrorCode::InvalidParam => "INVALID_PARAM",
            ErrorCode::InvalidValue => "INVALID_VALUE",
            ErrorCode::MissingParams => "MISSING_PARAMS",
            ErrorCode::TooManyParams => "TOO_MANY_PARAMS",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Unexpected => "UNEXPECTED",
        }
    }

    pub fn parse(s: &str) -> Option<ErrorCode> {
        ErrorCode::ALL.iter().copied().find(|c| c.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for all netvfs operations.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("malformed uri: {0}")]
    MalformedUri(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// File system I/O failure. Reported to the peer, the connection survives.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command not supported: {0}")]
    CommandNotSupported(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("missing parameters: {}", .0.join(", "))]
    MissingParams(Vec<String>),

    #[error("too many parameters: {0}")]
    TooManyParams(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("unexpected error: {0}")]
    Unexpected(String),

    /// Socket level failure. Never reported; forces Disconnected.
    #[error("transport error: {0}")]
    Transport(std::io::Error),

    #[error("connection closed")]
    Disconnected,

    /// The peer sent something that does not follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// ERROR line received with a code this side does not know.
    #[error("remote error {code}: {message}")]
    Remote { code: String, message: String },
}

/// Result type alias using VfsError.
pub type Result<T> = std::result::Result<T, VfsError>;

impl VfsError {
    pub fn invalid_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        VfsError::InvalidValue {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Wire code for reportable errors, `None` for conditions that end the connection.
    pub fn code(&self) -> Option<ErrorCode> {
        let code = match self {
            VfsError::FileNotFound(_) => ErrorCode::FileNotFound,
            VfsError::DirectoryNotFound(_) => ErrorCode::DirectoryNotFound,
            VfsError::MalformedUri(_) => ErrorCode::MalformedUri,
            VfsError::NotSupported(_) => ErrorCode::NotSupported,
            VfsError::Unauthorized(_) => ErrorCode::Unauthorized,
            VfsError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            VfsError::Io(_) => ErrorCode::IoError,
            VfsError::CommandNotSupported(_) => ErrorCode::CommandNotSupported,
            VfsError::InvalidParam(_) => ErrorCode::InvalidParam,
            VfsError::InvalidValue { .. } => ErrorCode::InvalidValue,
            VfsError::MissingParams(_) => ErrorCode::MissingParams,
            VfsError::TooManyParams(_) => ErrorCode::TooManyParams,
            VfsError::Cancelled => ErrorCode::Cancelled,
            VfsError::Unexpected(_) | VfsError::Protocol(_) | VfsError::Remote { .. } => {
                ErrorCode::Unexpected
            }
            VfsError::Transport(_) | VfsError::Disconnected => return None,
        };
        Some(code)
    }

    /// True when the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        self.code().is_none()
    }

    /// Rebuild an error from a received `ERROR` line.
    pub fn from_wire(code: &str, message: Option<&str>) -> Self {
        let message = message.unwrap_or_default().to_string();
        match ErrorCode::parse(code) {
            Some(ErrorCode::FileNotFound) => VfsError::FileNotFound(message),
            Some(ErrorCode::DirectoryNotFound) => VfsError::DirectoryNotFound(message),
            Some(ErrorCode::MalformedUri) => VfsError::MalformedUri(message),
            Some(ErrorCode::NotSupported) => VfsError::NotSupported(message),
            Some(ErrorCode::Unauthorized) => VfsError::Unauthorized(message),
            Some(ErrorCode::AlreadyExists) => VfsError::AlreadyExists(message),
            Some(ErrorCode::IoError) => VfsError::Io(std::io::Error::other(message)),
            Some(ErrorCode::CommandNotSupported) => VfsError::CommandNotSupported(message),
            Some(ErrorCode::InvalidParam) => VfsError::InvalidParam(message),
            Some(ErrorCode::InvalidValue) => VfsError::InvalidValue {
                name: String::new(),
                value: message,
            },
            Some(ErrorCode::MissingParams) => VfsError::MissingParams(vec![message]),
            Some(ErrorCode::TooManyParams) => VfsError::TooManyParams(message),
            Some(ErrorCode::Cancelled) => VfsError::Cancelled,
            Some(ErrorCode::Unexpected) => VfsError::Unexpected(message),
            None => VfsError::Remote {
                code: code.to_string(),
                message,
            },
        }
    }

    /// Map an `io::Error` coming from the node provider onto the taxonomy.
    pub fn from_fs_io(err: std::io::Error, path: &str, is_dir: bool) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound if is_dir => VfsError::DirectoryNotFound(path.to_string()),
            std::io::ErrorKind::NotFound => VfsError::FileNotFound(path.to_string()),
            std::io::ErrorKind::AlreadyExists => VfsError::AlreadyExists(path.to_string()),
            std::io::ErrorKind::PermissionDenied => VfsError::Unauthorized(path.to_string()),
            _ => VfsError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_round_trip_through_wire_names() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("no_such_code"), None);
    }

    #[test]
    fn test_transport_errors_are_fatal() {
        let e = VfsError::Transport(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(e.is_fatal());
        assert!(VfsError::Disconnected.is_fatal());
        // File system I/O is reported, not fatal
        let e = VfsError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(!e.is_fatal());
        assert_eq!(e.code(), Some(ErrorCode::IoError));
    }

    #[test]
    fn test_from_wire_maps_known_codes() {
        match VfsError::from_wire("FILE_NOT_FOUND", Some("/a.txt")) {
            VfsError::FileNotFound(p) => assert_eq!(p, "/a.txt"),
            other => panic!("unexpected {other:?}"),
        }
        match VfsError::from_wire("WEIRD", None) {
            VfsError::Remote { code, .. } => assert_eq!(code, "WEIRD"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_from_fs_io_distinguishes_directories() {
        let nf = || std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(VfsError::from_fs_io(nf(), "/d", true), VfsError::DirectoryNotFound(_)));
        assert!(matches!(VfsError::from_fs_io(nf(), "/f", false), VfsError::FileNotFound(_)));
    }
}
