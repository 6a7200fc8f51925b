//! URL parsing for netvfs:// locations

use crate::protocol::DEFAULT_PORT;
use crate::protocol_core::clean_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLocation {
    pub host: String,
    pub port: u16,
    /// Protocol path, always starting with `/`
    pub path: String,
}

impl RemoteLocation {
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Parse `netvfs://host[:port][/path]`; `None` when the text is not such a URL.
pub fn parse_remote_url(s: &str) -> Option<RemoteLocation> {
    let s = s.trim();
    let scheme_end = s.find("://")?;
    if !s[..scheme_end].eq_ignore_ascii_case("netvfs") {
        return None;
    }
    let rest = &s[scheme_end + 3..];
    let (hp, p) = rest.split_once('/').unwrap_or((rest, ""));
    if hp.is_empty() {
        return None;
    }
    // Bracketed IPv6 literal: [::1]:9041
    let (host, port) = if let Some(v6) = hp.strip_prefix('[') {
        let (h, tail) = v6.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(pr) => pr.parse().ok()?,
            None => DEFAULT_PORT,
        };
        (h.to_string(), port)
    } else {
        match hp.split_once(':') {
            Some((h, pr)) => (h.to_string(), pr.parse().ok()?),
            None => (hp.to_string(), DEFAULT_PORT),
        }
    };
    Some(RemoteLocation {
        host,
        port,
        path: clean_path(p),
    })
}
