//! Parsed request URL.

use crate::errors::Error;
use std::fmt;

/// A parsed URL as it appears in a request line: scheme, host (possibly with
/// a port), path and raw query.
///
/// The core rewrites `scheme` and `host` on inbound requests: the scheme is
/// forced to `http`/`https` from the server's secure flag, and an empty host
/// is filled from the `Host` header or the configured default host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Url {
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub raw_query: String,
}

impl Url {
    /// Parses an absolute URL (`scheme://host/path?query`) or an origin-form
    /// request target (`/path?query`).
    pub fn parse(raw: &str) -> Result<Url, Error> {
        if raw.is_empty() {
            return Err(Error::BadFormat);
        }

        let mut url = Url::default();
        let rest = match raw.find("://") {
            Some(i) => {
                url.scheme = raw[..i].to_string();
                let after = &raw[i + 3..];
                let host_end = after
                    .find(|c| c == '/' || c == '?')
                    .unwrap_or(after.len());
                url.host = after[..host_end].to_string();
                &after[host_end..]
            }
            None => raw,
        };

        match rest.find('?') {
            Some(i) => {
                url.path = rest[..i].to_string();
                url.raw_query = rest[i + 1..].to_string();
            }
            None => url.path = rest.to_string(),
        }

        Ok(url)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}://", self.scheme)?;
        }
        write!(f, "{}{}", self.host, self.path)?;
        if !self.raw_query.is_empty() {
            write!(f, "?{}", self.raw_query)?;
        }
        Ok(())
    }
}
