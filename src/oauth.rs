//! OAuth 1.0 signature base string.
//!
//! Implements the base-string construction of RFC 5849, section 3.4.1, over
//! a parameter map. Parameters are percent-encoded, sorted bytewise by
//! encoded key then value, and joined into the double-encoded parameter
//! section.

use crate::http::{params::ParamMap, url::Url};

#[rustfmt::skip]
const fn build_no_escape_table() -> [bool; 256] {
    // Unreserved characters per RFC 5849, section 3.6.
    let mut t = [false; 256];
    let mut c = 0usize;
    while c < 256 {
        let b = c as u8;
        t[c] = matches!(b,
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~');
        c += 1;
    }
    t
}

const NO_ESCAPE: [bool; 256] = build_no_escape_table();

// Percent-encodes per RFC 5849, section 3.6; with `double` the escapes are
// themselves escaped, which leaves the parameter sort order unchanged.
fn oauth_encode(s: &str, double: bool) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut p = Vec::with_capacity(s.len());
    for &b in s.as_bytes() {
        if NO_ESCAPE[b as usize] {
            p.push(b);
        } else if double {
            p.extend_from_slice(&[b'%', b'2', b'5', HEX[(b >> 4) as usize], HEX[(b & 15) as usize]]);
        } else {
            p.extend_from_slice(&[b'%', HEX[(b >> 4) as usize], HEX[(b & 15) as usize]]);
        }
    }
    p
}

/// Writes the signature base string for `method`, `url` and `param` to
/// `buf`.
pub fn write_base_string(buf: &mut Vec<u8>, method: &str, url: &str, param: &ParamMap) {
    // Method.
    buf.extend_from_slice(&oauth_encode(&method.to_ascii_uppercase(), false));
    buf.push(b'&');

    // URL, with lowercased scheme and host and the path as given.
    let parsed = Url::parse(url).unwrap_or_default();
    buf.extend_from_slice(&oauth_encode(&parsed.scheme.to_ascii_lowercase(), false));
    buf.extend_from_slice(&oauth_encode("://", false));
    buf.extend_from_slice(&oauth_encode(&parsed.host.to_ascii_lowercase(), false));
    buf.extend_from_slice(&oauth_encode(&parsed.path, false));
    buf.push(b'&');

    // Parameters, double encoded in a single step before sorting.
    let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    for (key, values) in param.iter() {
        let encoded_key = oauth_encode(key, true);
        for value in values {
            pairs.push((encoded_key.clone(), oauth_encode(value, true)));
        }
    }
    pairs.sort();

    let amp = oauth_encode("&", false);
    let equal = oauth_encode("=", false);
    let mut sep = false;
    for (key, value) in &pairs {
        if sep {
            buf.extend_from_slice(&amp);
        } else {
            sep = true;
        }
        buf.extend_from_slice(key);
        buf.extend_from_slice(&equal);
        buf.extend_from_slice(value);
    }
}

/// Returns the signature base string for `method`, `url` and `param`.
pub fn base_string(method: &str, url: &str, param: &ParamMap) -> String {
    let mut buf = Vec::new();
    write_base_string(&mut buf, method, url, param);
    String::from_utf8_lossy(&buf).into_owned()
}
