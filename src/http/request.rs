//! The request value handed to handlers.

use crate::{
    errors::Error,
    http::{
        cookie::parse_cookie_values,
        headers::{header, unquote_header_value, HeaderMap},
        params::ParamMap,
        url::Url,
    },
    server::transaction::Transaction,
};
use futures_util::future::BoxFuture;
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// An error handler responds to a request with the given status and reason.
/// Applications install one through middleware; the default writes a
/// plain-text status line.
pub type ErrorHandler = Arc<
    dyn for<'a, 'c> Fn(&'a mut Transaction<'c>, u16, Option<Error>, HeaderMap) -> BoxFuture<'a, ()>
        + Send
        + Sync,
>;

/// Attributes attached to the request by middleware.
pub type Env = HashMap<String, Box<dyn Any + Send + Sync>>;

/// An HTTP request to the server.
///
/// The core populates every field before the handler runs and discards the
/// value when the transaction ends. Middleware may mutate `param`, `cookie`,
/// `env` and `error_handler`.
pub struct Request {
    /// The address of the client sending the request.
    pub remote_addr: String,

    /// Uppercase request method. GET, POST, etc.
    pub method: String,

    /// The request URL with host and scheme set appropriately.
    pub url: Url,

    /// Protocol version: major version * 1000 + minor version.
    pub protocol_version: i32,

    /// Maps canonical header names to lists of header values.
    pub header: HeaderMap,

    /// Request params from the query string and form body.
    pub param: ParamMap,

    /// Cookies.
    pub cookie: ParamMap,

    /// Lowercase content type, not including params.
    pub content_type: String,

    /// Parameters from the Content-Type header.
    pub content_param: HashMap<String, String>,

    /// Length of the request body, -1 if the length is not known, 0 if there
    /// is no body.
    pub content_length: i64,

    /// Error handler installed by middleware, if any.
    pub error_handler: Option<ErrorHandler>,

    /// Attributes attached to the request by middleware.
    pub env: Env,
}

impl Request {
    pub(crate) fn empty() -> Request {
        Request {
            remote_addr: String::new(),
            method: String::new(),
            url: Url::default(),
            protocol_version: 0,
            header: HeaderMap::new(),
            param: ParamMap::new(),
            cookie: ParamMap::new(),
            content_type: String::new(),
            content_param: HashMap::new(),
            content_length: 0,
            error_handler: None,
            env: Env::new(),
        }
    }

    /// Allocates and initializes a request from freshly parsed headers. This
    /// function is provided for the convenience of protocol adapters.
    pub fn new(
        remote_addr: &str,
        method: &str,
        url: Url,
        protocol_version: i32,
        header: HeaderMap,
    ) -> Result<Request, Error> {
        let mut req = Request {
            remote_addr: remote_addr.to_string(),
            method: method.to_ascii_uppercase(),
            url,
            protocol_version,
            header,
            param: ParamMap::new(),
            cookie: ParamMap::new(),
            content_type: String::new(),
            content_param: HashMap::new(),
            content_length: 0,
            error_handler: None,
            env: Env::new(),
        };

        let mut raw_query = req.url.raw_query.clone().into_bytes();
        req.param.parse_form_encoded(&mut raw_query)?;

        parse_cookie_values(req.header.get_all(header::COOKIE), &mut req.cookie);

        let s = req.header.get(header::CONTENT_LENGTH);
        if !s.is_empty() {
            req.content_length = s.parse().map_err(|_| Error::BadFormat)?;
        } else if req.method != "HEAD" && req.method != "GET" {
            req.content_length = -1;
        }

        let (content_type, content_param) =
            parse_value_param(req.header.get(header::CONTENT_TYPE));
        req.content_type = content_type;
        req.content_param = content_param;

        Ok(req)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("remote_addr", &self.remote_addr)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("protocol_version", &self.protocol_version)
            .field("header", &self.header)
            .field("param", &self.param)
            .field("cookie", &self.cookie)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Decodes a header value of the form `value; name1=param1; name2="param2"`
/// into the lowercased value and a map of parameters with lowercased names.
/// Parameter values keep their case and are unquoted.
pub(crate) fn parse_value_param(s: &str) -> (String, HashMap<String, String>) {
    let mut param = HashMap::new();
    let mut parts = s.split(';');
    let value = parts.next().unwrap_or("").trim().to_ascii_lowercase();
    for part in parts {
        if let Some((name, v)) = part.split_once('=') {
            let name = name.trim().to_ascii_lowercase();
            if name.is_empty() {
                continue;
            }
            param.insert(name, unquote_header_value(v.trim()));
        }
    }
    (value, param)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, target: &str, header: HeaderMap) -> Result<Request, Error> {
        Request::new(
            "remote",
            method,
            Url::parse(target).unwrap(),
            crate::http::types::PROTOCOL_VERSION_11,
            header,
        )
    }

    #[test]
    fn query_and_cookies() {
        let header = HeaderMap::from_pairs(&[("Cookie", "a=b; c=d"), ("Cookie", "e=f")]);
        let req = request("get", "/path?x=1&x=2&y=%20", header).unwrap();

        assert_eq!(req.method, "GET");
        assert_eq!(req.param.get_all("x"), &["1", "2"]);
        assert_eq!(req.param.get("y"), Some(" "));
        assert_eq!(req.cookie.get("a"), Some("b"));
        assert_eq!(req.cookie.get("c"), Some("d"));
        assert_eq!(req.cookie.get("e"), Some("f"));
    }

    #[test]
    fn content_length_rules() {
        let req = request("GET", "/", HeaderMap::new()).unwrap();
        assert_eq!(req.content_length, 0);

        let req = request("POST", "/", HeaderMap::new()).unwrap();
        assert_eq!(req.content_length, -1);

        let header = HeaderMap::from_pairs(&[("Content-Length", "42")]);
        let req = request("POST", "/", header).unwrap();
        assert_eq!(req.content_length, 42);

        let header = HeaderMap::from_pairs(&[("Content-Length", "nope")]);
        assert!(request("POST", "/", header).is_err());
    }

    #[test]
    fn content_type_decoding() {
        let header = HeaderMap::from_pairs(&[(
            "Content-Type",
            "Text/HTML; Charset=\"UTF-8\"; boundary=AbC",
        )]);
        let req = request("POST", "/", header).unwrap();

        assert_eq!(req.content_type, "text/html");
        assert_eq!(req.content_param.get("charset").map(String::as_str), Some("UTF-8"));
        assert_eq!(req.content_param.get("boundary").map(String::as_str), Some("AbC"));
    }
}
