//! Header map and HTTP/1.x header block codec.
//!
//! Header names are kept in canonical format: the hyphen-segmented form with
//! the first letter of each segment uppercased and the rest lowercased. The
//! map preserves insertion order, both across keys and within the values of
//! one key.

use crate::{
    errors::Error,
    http::types::{is_space_byte, is_token_byte},
    server::connection::ReadBuffer,
};
use tokio::io::AsyncRead;

/// Max size for a header line.
pub(crate) const MAX_LINE_SIZE: usize = 4096;
/// Max size for a single header value, including folded continuations.
pub(crate) const MAX_VALUE_SIZE: usize = 4096;
/// Maximum number of headers in one block.
pub(crate) const MAX_HEADER_COUNT: usize = 256;

/// Header names in canonical format.
pub mod header {
    pub const ACCEPT: &str = "Accept";
    pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
    pub const AUTHORIZATION: &str = "Authorization";
    pub const CACHE_CONTROL: &str = "Cache-Control";
    pub const CONNECTION: &str = "Connection";
    pub const CONTENT_ENCODING: &str = "Content-Encoding";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const COOKIE: &str = "Cookie";
    pub const DATE: &str = "Date";
    pub const ETAG: &str = "Etag";
    pub const EXPECT: &str = "Expect";
    pub const EXPIRES: &str = "Expires";
    pub const HOST: &str = "Host";
    pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";
    pub const IF_NONE_MATCH: &str = "If-None-Match";
    pub const LAST_MODIFIED: &str = "Last-Modified";
    pub const LOCATION: &str = "Location";
    pub const ORIGIN: &str = "Origin";
    pub const REFERER: &str = "Referer";
    pub const SEC_WEBSOCKET_KEY1: &str = "Sec-Websocket-Key1";
    pub const SEC_WEBSOCKET_KEY2: &str = "Sec-Websocket-Key2";
    pub const SEC_WEBSOCKET_PROTOCOL: &str = "Sec-Websocket-Protocol";
    pub const SERVER: &str = "Server";
    pub const SET_COOKIE: &str = "Set-Cookie";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    pub const UPGRADE: &str = "Upgrade";
    pub const USER_AGENT: &str = "User-Agent";
    pub const X_XSRF_TOKEN: &str = "X-Xsrftoken";
}

/// Returns the canonical format of a header name.
///
/// A single pass driven by the previous byte being `-`; the name is not
/// validated.
pub fn canonical_name(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let c = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            c
        })
        .collect()
}

/// Maps canonical header names to ordered lists of values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap {
    entries: Vec<(String, Vec<String>)>,
}

impl HeaderMap {
    #[inline]
    pub fn new() -> HeaderMap {
        HeaderMap::default()
    }

    /// Returns a map initialized with the given key-value pairs.
    pub fn from_pairs(kvs: &[(&str, &str)]) -> HeaderMap {
        let mut m = HeaderMap::new();
        for (key, value) in kvs {
            m.add(key, value);
        }
        m
    }

    fn entry_mut(&mut self, key: &str) -> Option<&mut Vec<String>> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Returns the first value for the given name or "" if not found.
    pub fn get(&self, name: &str) -> &str {
        let key = canonical_name(name);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Returns all values for the given name.
    pub fn get_all(&self, name: &str) -> &[String] {
        let key = canonical_name(name);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    /// Appends a value to the list for the given name.
    pub fn add(&mut self, name: &str, value: &str) {
        let key = canonical_name(name);
        match self.entry_mut(&key) {
            Some(values) => values.push(value.to_string()),
            None => self.entries.push((key, vec![value.to_string()])),
        }
    }

    /// Sets the value for the given name, discarding previous values if any.
    pub fn set(&mut self, name: &str, value: &str) {
        let key = canonical_name(name);
        match self.entry_mut(&key) {
            Some(values) => {
                values.clear();
                values.push(value.to_string());
            }
            None => self.entries.push((key, vec![value.to_string()])),
        }
    }

    /// Removes all values for the given name.
    pub fn remove(&mut self, name: &str) {
        let key = canonical_name(name);
        self.entries.retain(|(k, _)| *k != key);
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        let key = canonical_name(name);
        self.entries.iter().any(|(k, _)| *k == key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, values)` entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Returns the comma-separated elements across all values for the given
    /// name. Commas inside double-quoted strings are ignored (with backslash
    /// escapes); quoted elements are returned verbatim including their
    /// quotes. Whitespace is trimmed.
    pub fn get_list(&self, name: &str) -> Vec<String> {
        let mut result = Vec::new();
        for s in self.get_all(name) {
            let s = s.as_bytes();
            let mut begin = 0;
            let mut end = 0;
            let mut escape = false;
            let mut quote = false;
            for (i, &b) in s.iter().enumerate() {
                match () {
                    _ if escape => {
                        escape = false;
                        end = i + 1;
                    }
                    _ if quote => {
                        match b {
                            b'\\' => escape = true,
                            b'"' => quote = false,
                            _ => {}
                        }
                        end = i + 1;
                    }
                    _ if b == b'"' => {
                        quote = true;
                        end = i + 1;
                    }
                    _ if is_space_byte(b) => {
                        if begin == end {
                            begin = i + 1;
                            end = begin;
                        }
                    }
                    _ if b == b',' => {
                        result.push(String::from_utf8_lossy(&s[begin..end]).into_owned());
                        begin = i + 1;
                        end = begin;
                    }
                    _ => end = i + 1,
                }
            }
            if begin < end {
                result.push(String::from_utf8_lossy(&s[begin..end]).into_owned());
            }
        }
        result
    }

    /// Writes the map in HTTP header block format, including the trailing
    /// empty line. CR and LF inside values are rewritten to space so a header
    /// value can never split the response.
    pub fn write_block(&self, buf: &mut Vec<u8>) {
        for (key, values) in &self.entries {
            for value in values {
                buf.extend_from_slice(key.as_bytes());
                buf.extend_from_slice(b": ");
                for &b in value.as_bytes() {
                    buf.push(match b {
                        b'\r' | b'\n' => b' ',
                        b => b,
                    });
                }
                buf.extend_from_slice(b"\r\n");
            }
        }
        buf.extend_from_slice(b"\r\n");
    }

    /// Reads one header block from the buffered reader, stopping at the empty
    /// terminator line. Header names are converted to canonical format;
    /// folded continuation lines are joined to the previous value with a
    /// single space.
    pub(crate) async fn parse_block<R>(rd: &mut ReadBuffer, stream: &mut R) -> Result<HeaderMap, Error>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut parser = BlockParser::new();
        loop {
            let line = match rd.read_line(stream).await {
                Ok(line) => line,
                // Running out of bytes mid-block is not a clean close.
                Err(Error::Eof) => {
                    return Err(Error::Io(crate::errors::IoError(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "end of stream inside header block",
                    ))))
                }
                Err(e) => return Err(e),
            };
            if !parser.feed(line)? {
                return Ok(parser.into_map());
            }
        }
    }
}

/// Incremental header block parser fed one raw line at a time.
pub(crate) struct BlockParser {
    map: HeaderMap,
    last_key: String,
    count: usize,
}

impl BlockParser {
    pub(crate) fn new() -> BlockParser {
        BlockParser {
            map: HeaderMap::new(),
            last_key: String::new(),
            count: 0,
        }
    }

    pub(crate) fn into_map(self) -> HeaderMap {
        self.map
    }

    /// Feeds one line, terminator included. Returns false on the empty line
    /// that ends the block.
    pub(crate) fn feed(&mut self, line: &[u8]) -> Result<bool, Error> {
        let mut p = line;
        if p.ends_with(b"\r\n") {
            p = &p[..p.len() - 2];
        } else if p.ends_with(b"\n") {
            p = &p[..p.len() - 1];
        }

        if p.is_empty() {
            return Ok(false);
        }
        if p.len() > MAX_LINE_SIZE {
            return Err(Error::LineTooLong);
        }

        if is_space_byte(p[0]) {
            // Folded continuation of the previous header.
            if self.last_key.is_empty() {
                return Err(Error::BadHeaderLine);
            }
            let p = trim_ws(p);
            if !p.is_empty() {
                let values = self
                    .map
                    .entry_mut(&self.last_key)
                    .ok_or(Error::BadHeaderLine)?;
                let value = values.last_mut().ok_or(Error::BadHeaderLine)?;
                value.push(' ');
                value.push_str(&String::from_utf8_lossy(p));
                if value.len() > MAX_VALUE_SIZE {
                    return Err(Error::HeaderTooLong);
                }
            }
            return Ok(true);
        }

        self.count += 1;
        if self.count > MAX_HEADER_COUNT {
            return Err(Error::HeadersTooLong);
        }

        let i = p.iter().take_while(|&&b| is_token_byte(b)).count();
        if i < 1 {
            return Err(Error::BadHeaderLine);
        }
        let key = canonical_name(&String::from_utf8_lossy(&p[..i]));
        let p = trim_ws_left(&p[i..]);
        if p.first() != Some(&b':') {
            return Err(Error::BadHeaderLine);
        }
        let value = trim_ws(&p[1..]);
        if value.len() > MAX_VALUE_SIZE {
            return Err(Error::HeaderTooLong);
        }
        self.map.add(&key, &String::from_utf8_lossy(value));
        self.last_key = key;
        Ok(true)
    }
}

fn trim_ws_left(p: &[u8]) -> &[u8] {
    let i = p.iter().take_while(|&&b| is_space_byte(b)).count();
    &p[i..]
}

fn trim_ws(p: &[u8]) -> &[u8] {
    let p = trim_ws_left(p);
    let mut end = p.len();
    while end > 0 && is_space_byte(p[end - 1]) {
        end -= 1;
    }
    &p[..end]
}

// QUOTED STRINGS

/// Quotes `s` using the quoted-string rules of RFC 2616.
pub fn quote_header_value(s: &str) -> String {
    let mut b = String::with_capacity(s.len() + 2);
    b.push('"');
    for c in s.chars() {
        if c == '\\' || c == '"' {
            b.push('\\');
        }
        b.push(c);
    }
    b.push('"');
    b
}

/// Quotes `s` unless it is a valid token per RFC 2616.
pub fn quote_header_value_or_token(s: &str) -> String {
    if !s.is_empty() && s.bytes().all(is_token_byte) {
        s.to_string()
    } else {
        quote_header_value(s)
    }
}

/// Unquotes `s` if it is surrounded by quotes, resolving backslash escapes;
/// otherwise `s` is returned unchanged.
pub fn unquote_header_value(s: &str) -> String {
    let b = s.as_bytes();
    if b.len() < 2 || b[0] != b'"' || b[b.len() - 1] != b'"' {
        return s.to_string();
    }
    let inner = &s[1..s.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut escape = false;
    for c in inner.chars() {
        if escape {
            escape = false;
            out.push(c);
        } else if c == '\\' {
            escape = true;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(block: &str) -> Result<HeaderMap, Error> {
        let mut parser = BlockParser::new();
        for line in block.split_inclusive('\n') {
            if !parser.feed(line.as_bytes())? {
                break;
            }
        }
        Ok(parser.into_map())
    }

    #[test]
    fn canonicalization() {
        #[rustfmt::skip]
        let cases = [
            ("content-type",   "Content-Type"),
            ("CONTENT-TYPE",   "Content-Type"),
            ("cOnTeNt-TyPe",   "Content-Type"),
            ("etag",           "Etag"),
            ("x-xsrftoken",    "X-Xsrftoken"),
            ("a-b-c",          "A-B-C"),
            ("-leading",       "-Leading"),
            ("",               ""),
        ];

        for (name, expected) in cases {
            assert_eq!(canonical_name(name), expected);
        }
    }

    #[test]
    fn multi_value_block() {
        let m = parse("Content-Type: text/html\r\nCoOkie: hello=world\r\nCookie: foo=bar\r\n\r\n")
            .unwrap();

        assert_eq!(m.get("content-type"), "text/html");
        assert_eq!(m.get_all("Cookie"), &["hello=world", "foo=bar"]);
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn continuation_lines() {
        let m = parse("Cookie: hello=world,\r\n foo=bar\r\nContent-Type: text/html\r\n\r\n")
            .unwrap();

        assert_eq!(m.get("Cookie"), "hello=world, foo=bar");
        assert_eq!(m.get("Content-Type"), "text/html");
    }

    #[test]
    fn bare_lf_lines() {
        let m = parse("Host: example.com\nUser-Agent: test\n\n").unwrap();
        assert_eq!(m.get("host"), "example.com");
        assert_eq!(m.get("User-agent"), "test");
    }

    #[test]
    fn malformed_lines() {
        #[rustfmt::skip]
        let cases = [
            " Leading-Continuation: x\r\n\r\n",
            ": no-name\r\n\r\n",
            "No-Colon value\r\n\r\n",
            "Bad name: value\r\n\r\n",
        ];

        for block in cases {
            assert_eq!(parse(block), Err(Error::BadHeaderLine), "{:?}", block);
        }
    }

    #[test]
    fn oversized_blocks() {
        let long_line = format!("Name: {}\r\n\r\n", "v".repeat(MAX_LINE_SIZE));
        assert_eq!(parse(&long_line), Err(Error::LineTooLong));

        let folded = format!(
            "Name: {}\r\n {}\r\n\r\n",
            "v".repeat(MAX_VALUE_SIZE - 100),
            "w".repeat(200)
        );
        assert_eq!(parse(&folded), Err(Error::HeaderTooLong));

        let many = "Name: value\r\n".repeat(MAX_HEADER_COUNT + 1) + "\r\n";
        assert_eq!(parse(&many), Err(Error::HeadersTooLong));
    }

    #[test]
    fn spaced_colon() {
        let m = parse("Name : value\r\n\r\n").unwrap();
        assert_eq!(m.get("Name"), "value");
    }

    #[test]
    fn get_list_splits_on_unquoted_commas() {
        let mut m = HeaderMap::new();
        m.add("X", "a, b , \"c, d\"");
        m.add("X", "e");

        assert_eq!(m.get_list("X"), &["a", "b", "\"c, d\"", "e"]);
    }

    #[test]
    fn get_list_respects_escapes() {
        let mut m = HeaderMap::new();
        m.add("X", r#""a\",b", c"#);
        assert_eq!(m.get_list("X"), &[r#""a\",b""#, "c"]);
    }

    #[test]
    fn write_block_strips_crlf() {
        let mut m = HeaderMap::new();
        m.set("X-Test", "line1\r\nline2");
        m.add("X-More", "v");

        let mut buf = Vec::new();
        m.write_block(&mut buf);
        assert_eq!(buf, b"X-Test: line1  line2\r\nX-More: v\r\n\r\n");
    }

    #[test]
    fn set_and_remove() {
        let mut m = HeaderMap::from_pairs(&[("a", "1"), ("b", "2"), ("a", "3")]);
        assert_eq!(m.get_all("A"), &["1", "3"]);

        m.set("a", "4");
        assert_eq!(m.get_all("A"), &["4"]);

        m.remove("A");
        assert!(!m.contains("a"));
        assert_eq!(m.get("a"), "");
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_header_value(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(quote_header_value_or_token("token"), "token");
        assert_eq!(quote_header_value_or_token("two words"), "\"two words\"");
        assert_eq!(unquote_header_value(r#""a\"b\\c""#), r#"a"b\c"#);
        assert_eq!(unquote_header_value("bare"), "bare");
        assert_eq!(unquote_header_value("\"unterminated"), "\"unterminated");
    }
}
