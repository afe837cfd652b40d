//! Core HTTP protocol types and lookup tables.

use std::borrow::Cow;

// RFC 2616 OCTET CLASSES

#[rustfmt::skip]
const fn build_token_table() -> [bool; 256] {
    // token = 1*<any CHAR except CTLs or separators>
    let mut t = [false; 256];
    let mut c = 0usize;
    while c < 128 {
        let is_ctl = c <= 31 || c == 127;
        let is_separator = matches!(
            c as u8 as char,
            ' ' | '\t' | '"' | '(' | ')' | ',' | '/' | ':' | ';' | '<' | '=' | '>'
                | '?' | '@' | '[' | ']' | '\\' | '{' | '}'
        );
        t[c] = !is_ctl && !is_separator;
        c += 1;
    }
    t
}

const IS_TOKEN: [bool; 256] = build_token_table();

/// Returns true if `c` is a token byte as defined by RFC 2616.
#[inline(always)]
pub fn is_token_byte(c: u8) -> bool {
    IS_TOKEN[c as usize]
}

/// Returns true if `c` is a space byte as defined by RFC 2616.
#[inline(always)]
pub fn is_space_byte(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n')
}

// PROTOCOL VERSION

/// Combines HTTP major and minor protocol numbers into a single integer for
/// easy comparison of protocol versions.
#[inline(always)]
pub const fn protocol_version(major: i32, minor: i32) -> i32 {
    let minor = if minor > 999 { 999 } else { minor };
    major * 1000 + minor
}

/// HTTP/1.0 in the format returned by [`protocol_version`].
pub const PROTOCOL_VERSION_10: i32 = 1000;
/// HTTP/1.1 in the format returned by [`protocol_version`].
pub const PROTOCOL_VERSION_11: i32 = 1001;

// STATUS CODES

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])*
        $name:ident = ($num:expr, $text:expr);
    )+) => {
        $(
            $(#[$docs])*
            #[doc = concat!("`", stringify!($num), " ", $text, "`")]
            pub const $name: u16 = $num;
        )+

        /// Returns the reason phrase for an HTTP status code.
        ///
        /// Unknown codes yield `Status <n>` so a handler can respond with any
        /// numeric status.
        pub fn status_text(status: u16) -> Cow<'static, str> {
            match status {
                $( $num => Cow::Borrowed($text), )+
                n => Cow::Owned(format!("Status {}", n)),
            }
        }
    }
}

/// HTTP status codes and their reason phrases.
pub mod status {
    use super::Cow;

    set_status_codes! {
        CONTINUE = (100, "Continue");
        SWITCHING_PROTOCOLS = (101, "Switching Protocols");

        OK = (200, "OK");
        CREATED = (201, "Created");
        ACCEPTED = (202, "Accepted");
        NON_AUTHORITATIVE_INFORMATION = (203, "Non-Authoritative Information");
        NO_CONTENT = (204, "No Content");
        RESET_CONTENT = (205, "Reset Content");
        PARTIAL_CONTENT = (206, "Partial Content");

        MULTIPLE_CHOICES = (300, "Multiple Choices");
        MOVED_PERMANENTLY = (301, "Moved Permanently");
        FOUND = (302, "Found");
        SEE_OTHER = (303, "See Other");
        NOT_MODIFIED = (304, "Not Modified");
        USE_PROXY = (305, "Use Proxy");
        TEMPORARY_REDIRECT = (307, "Temporary Redirect");

        BAD_REQUEST = (400, "Bad Request");
        UNAUTHORIZED = (401, "Unauthorized");
        PAYMENT_REQUIRED = (402, "Payment Required");
        FORBIDDEN = (403, "Forbidden");
        NOT_FOUND = (404, "Not Found");
        METHOD_NOT_ALLOWED = (405, "Method Not Allowed");
        NOT_ACCEPTABLE = (406, "Not Acceptable");
        PROXY_AUTHENTICATION_REQUIRED = (407, "Proxy Authentication Required");
        REQUEST_TIMEOUT = (408, "Request Timeout");
        CONFLICT = (409, "Conflict");
        GONE = (410, "Gone");
        LENGTH_REQUIRED = (411, "Length Required");
        PRECONDITION_FAILED = (412, "Precondition Failed");
        REQUEST_ENTITY_TOO_LARGE = (413, "Request Entity Too Large");
        REQUEST_URI_TOO_LONG = (414, "Request URI Too Long");
        UNSUPPORTED_MEDIA_TYPE = (415, "Unsupported Media Type");
        REQUESTED_RANGE_NOT_SATISFIABLE = (416, "Requested Range Not Satisfiable");
        EXPECTATION_FAILED = (417, "Expectation Failed");

        INTERNAL_SERVER_ERROR = (500, "Internal Server Error");
        NOT_IMPLEMENTED = (501, "Not Implemented");
        BAD_GATEWAY = (502, "Bad Gateway");
        SERVICE_UNAVAILABLE = (503, "Service Unavailable");
        GATEWAY_TIMEOUT = (504, "Gateway Timeout");
        HTTP_VERSION_NOT_SUPPORTED = (505, "HTTP Version Not Supported");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_encoding() {
        assert_eq!(protocol_version(1, 0), PROTOCOL_VERSION_10);
        assert_eq!(protocol_version(1, 1), PROTOCOL_VERSION_11);
        assert_eq!(protocol_version(2, 0), 2000);
        assert_eq!(protocol_version(1, 12345), 1999);
        assert!(PROTOCOL_VERSION_11 > PROTOCOL_VERSION_10);
    }

    #[test]
    fn reason_phrases() {
        assert_eq!(status::status_text(200), "OK");
        assert_eq!(status::status_text(304), "Not Modified");
        assert_eq!(status::status_text(505), "HTTP Version Not Supported");
        assert_eq!(status::status_text(299), "Status 299");
    }

    #[test]
    fn octet_classes() {
        for c in b"abcXYZ019!#$%&'*+-.^_`|~".iter() {
            assert!(is_token_byte(*c), "{:?} should be a token byte", *c as char);
        }
        for c in b" \t\r\n\":;,()<>@[]{}\\/?=".iter() {
            assert!(!is_token_byte(*c), "{:?} should not be a token byte", *c as char);
        }
        assert!(is_space_byte(b' ') && is_space_byte(b'\t'));
        assert!(!is_space_byte(b'a'));
    }
}
