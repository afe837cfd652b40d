//! Cookie builder and HTTP-date helpers.
//!
//! Cookies follow the ancient Netscape draft specification plus the modern
//! `HttpOnly` attribute. No RFC 6265 attributes are emitted because the
//! legacy browsers this wire format targets do not support them; in
//! particular the expiration is always rendered as an absolute `expires`
//! date, never a `max-age` attribute.

use crate::http::params::ParamMap;
use std::time::{Duration, SystemTime};

/// Formats the current time plus `delta` seconds per HTTP conventions,
/// e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_delta_seconds(delta: i64) -> String {
    let now = SystemTime::now();
    let t = if delta >= 0 {
        now.checked_add(Duration::from_secs(delta as u64))
    } else {
        now.checked_sub(Duration::from_secs(delta.unsigned_abs()))
    };
    httpdate::fmt_http_date(t.unwrap_or(now))
}

/// Formats the current time plus `delta` days per HTTP conventions.
pub fn format_delta_days(delta: i64) -> String {
    format_delta_seconds(delta * 60 * 60 * 24)
}

/// Helper for constructing `Set-Cookie` header values.
///
/// [`Cookie::new`] returns a cookie with the path attribute set to `/` and
/// the `HttpOnly` attribute set, the defaults most applications want.
///
/// ```
/// use twister::Cookie;
///
/// let c = Cookie::new("sid", "opaque").to_string();
/// assert_eq!(c, "sid=opaque; path=/; HttpOnly");
/// ```
#[derive(Debug, Clone)]
pub struct Cookie {
    name: String,
    value: String,
    path: String,
    domain: String,
    max_age: i64,
    secure: bool,
    http_only: bool,
}

impl Cookie {
    /// Returns a new cookie with path `/` and `HttpOnly` set.
    pub fn new(name: &str, value: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            path: "/".to_string(),
            domain: String::new(),
            max_age: 0,
            secure: false,
            http_only: true,
        }
    }

    /// Sets the path attribute. An empty path omits the attribute.
    pub fn path(mut self, path: &str) -> Cookie {
        self.path = path.to_string();
        self
    }

    /// Sets the domain attribute. An empty domain omits the attribute.
    pub fn domain(mut self, domain: &str) -> Cookie {
        self.domain = domain.to_string();
        self
    }

    /// Sets the maximum age in seconds. The age is converted to an absolute
    /// expiration time when the header value is rendered. Zero omits the
    /// expiration and the browser handles the cookie as a session cookie.
    pub fn max_age(mut self, seconds: i64) -> Cookie {
        self.max_age = seconds;
        self
    }

    /// Sets the maximum age in days.
    pub fn max_age_days(self, days: i64) -> Cookie {
        self.max_age(days * 60 * 60 * 24)
    }

    /// Sets the expiration date to a time in the past so the browser drops
    /// the cookie.
    pub fn delete(self) -> Cookie {
        self.max_age_days(-30).http_only(false)
    }

    /// Sets the secure attribute.
    pub fn secure(mut self, secure: bool) -> Cookie {
        self.secure = secure;
        self
    }

    /// Sets the `HttpOnly` attribute.
    pub fn http_only(mut self, http_only: bool) -> Cookie {
        self.http_only = http_only;
        self
    }

}

// The Display form is the value of one Set-Cookie header.
impl std::fmt::Display for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;

        if !self.path.is_empty() {
            write!(f, "; path={}", self.path)?;
        }
        if !self.domain.is_empty() {
            write!(f, "; domain={}", self.domain)?;
        }
        if self.max_age != 0 {
            write!(f, "; expires={}", format_delta_seconds(self.max_age))?;
        }
        if self.secure {
            write!(f, "; secure")?;
        }
        if self.http_only {
            write!(f, "; HttpOnly")?;
        }
        Ok(())
    }
}

/// Parses request `Cookie` header values into a parameter map.
///
/// Supports the Netscape draft: semicolon-separated `name=value` items with
/// whitespace trimmed around names, and the first `=` in an item delimiting
/// name from value. Items with an empty name or no `=` are ignored.
pub fn parse_cookie_values(values: &[String], m: &mut ParamMap) {
    for s in values {
        let s = s.as_bytes();
        let mut key: &[u8] = b"";
        let mut begin = 0;
        let mut end = 0;
        for (i, &b) in s.iter().enumerate() {
            match b {
                b' ' | b'\t' => {
                    if begin == end {
                        begin = i + 1;
                        end = begin;
                    }
                }
                b'=' => {
                    if key.is_empty() {
                        key = &s[begin..end];
                        begin = i + 1;
                        end = begin;
                    } else {
                        end += 1;
                    }
                }
                b';' => {
                    if !key.is_empty() && begin < end {
                        m.add(
                            &String::from_utf8_lossy(key),
                            &String::from_utf8_lossy(&s[begin..end]),
                        );
                    }
                    key = b"";
                    begin = i + 1;
                    end = begin;
                }
                _ => end = i + 1,
            }
        }
        if !key.is_empty() && begin < end {
            m.add(
                &String::from_utf8_lossy(key),
                &String::from_utf8_lossy(&s[begin..end]),
            );
        }
    }
}
