//! Shared protocol constants for the NetVFS line protocol

// Greeting sent by the server as the very first line
pub const GREETING: &str = "NETVFS";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;

// Every command and response line ends with this marker
pub const LINE_MARKER: &[u8] = b"\r\n";

// Longest command/response line accepted (escaped text included)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

// Default upper bound for a single READ/WRITE block (8MB) - prevents DoS via memory exhaustion
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 8 * 1024 * 1024;

// Default port for netvfs:// URLs
pub const DEFAULT_PORT: u16 = 9041;

// Response line keywords
pub mod response {
    pub const OK: &str = "OK";
    pub const ERROR: &str = "ERROR";
    pub const READY: &str = "READY";
    pub const ENTRY: &str = "ENTRY";
}

// Command verbs, grouped by the run level that accepts them
pub mod verb {
    // Handshake
    pub const LOGIN: &str = "LOGIN";
    pub const ADHOCENCRYPTION: &str = "ADHOCENCRYPTION";

    // Normal
    pub const LIST: &str = "LIST";
    pub const GETATTRIBUTES: &str = "GETATTRIBUTES";
    pub const SETATTRIBUTES: &str = "SETATTRIBUTES";
    pub const CREATE: &str = "CREATE";
    pub const DELETE: &str = "DELETE";
    pub const COPY: &str = "COPY";
    pub const MOVE: &str = "MOVE";
    pub const COMPUTEHASH: &str = "COMPUTEHASH";
    pub const DOWNLOAD: &str = "DOWNLOAD";
    pub const CLAIM: &str = "CLAIM";
    pub const RANDOMACCESS: &str = "RANDOMACCESS";

    // RandomAccess
    pub const READ: &str = "READ";
    pub const WRITE: &str = "WRITE";
    pub const FLUSH: &str = "FLUSH";
    pub const SEEK: &str = "SEEK";
    pub const SETPOSITION: &str = "SETPOSITION";
    pub const GETPOSITION: &str = "GETPOSITION";
    pub const SETLENGTH: &str = "SETLENGTH";
    pub const GETLENGTH: &str = "GETLENGTH";
    pub const EXIT: &str = "EXIT";

    // Any run level
    pub const NOOP: &str = "NOOP";
    pub const LISTCOMMANDS: &str = "LISTCOMMANDS";
    pub const QUIT: &str = "QUIT";
    pub const CANCEL: &str = "CANCEL";
}

// Centralized timeout constants shared by client and server
pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // TLS handshake after ADHOCENCRYPTION (ms)
    pub const TLS_HANDSHAKE_MS: u64 = 10_000;

    // Download tickets stay claimable this long (s)
    pub const TICKET_TTL_SECS: u64 = 15 * 60;

    // Idle pooled client connections are dropped after this (s)
    pub const POOL_IDLE_SECS: u64 = 60;

    // Cached node attributes are trusted this long (s)
    pub const ATTRIBUTE_TTL_SECS: u64 = 5;

    // Background ticket sweep interval (s)
    pub const SWEEP_INTERVAL_SECS: u64 = 30;
}

/// Greeting line as sent by the server, e.g. `NETVFS 1.0`
pub fn greeting_line() -> String {
    format!("{} {}.{}", GREETING, VERSION_MAJOR, VERSION_MINOR)
}
