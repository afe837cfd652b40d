//! Signed values and cross-site request forgery protection.

use crate::{
    errors::Error,
    http::{
        cookie::Cookie,
        headers::{header, HeaderMap},
    },
    server::transaction::Transaction,
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

fn hex_encode(p: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(p.len() * 2);
    for &b in p {
        s.push(HEX[(b >> 4) as usize] as char);
        s.push(HEX[(b & 15) as usize] as char);
    }
    s
}

fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn signature(secret: &str, context: &str, expiration: &str, value: &str) -> HmacSha1 {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(context.as_bytes());
    mac.update(&[0]);
    mac.update(expiration.as_bytes());
    mac.update(&[0]);
    mac.update(value.as_bytes());
    mac
}

/// Returns a string containing `value`, an expiration time and a signature:
/// `sig~expiration~value`, where the expiration is the hex-encoded absolute
/// epoch computed from the current time plus `max_age_seconds`, and the
/// signature is the lowercase-hex HMAC-SHA1 of the context, expiration and
/// value under `secret`. Use [`verify_value`] to get the value back.
pub fn sign_value(secret: &str, context: &str, max_age_seconds: i64, value: &str) -> String {
    sign_value_at(secret, context, now_seconds() + max_age_seconds, value)
}

fn sign_value_at(secret: &str, context: &str, expiration_epoch: i64, value: &str) -> String {
    let expiration = format!("{:x}", expiration_epoch);
    let sig = hex_encode(&signature(secret, context, &expiration, value).finalize().into_bytes());
    format!("{}~{}~{}", sig, expiration, value)
}

/// Extracts a value from a string created by [`sign_value`]. Fails on
/// format mismatch, an elapsed expiration time, or a signature that does
/// not verify; the signature comparison is timing-independent.
pub fn verify_value(secret: &str, context: &str, signed_value: &str) -> Result<String, Error> {
    verify_value_at(secret, context, signed_value, now_seconds())
}

fn verify_value_at(
    secret: &str,
    context: &str,
    signed_value: &str,
    now: i64,
) -> Result<String, Error> {
    let mut parts = signed_value.splitn(3, '~');
    let (sig, expiration, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(sig), Some(expiration), Some(value)) => (sig, expiration, value),
        _ => return Err(Error::VerificationFailed),
    };
    let expiration_epoch =
        i64::from_str_radix(expiration, 16).map_err(|_| Error::VerificationFailed)?;
    if expiration_epoch < now {
        return Err(Error::VerificationFailed);
    }
    let mut sig_bytes = [0u8; 20];
    if sig.len() != 40 {
        return Err(Error::VerificationFailed);
    }
    for (i, chunk) in sig.as_bytes().chunks(2).enumerate() {
        let s = std::str::from_utf8(chunk).map_err(|_| Error::VerificationFailed)?;
        sig_bytes[i] = u8::from_str_radix(s, 16).map_err(|_| Error::VerificationFailed)?;
    }
    signature(secret, context, expiration, value)
        .verify_slice(&sig_bytes)
        .map_err(|_| Error::VerificationFailed)?;
    Ok(value.to_string())
}

/// Name of the XSRF cookie unless the application chooses its own.
pub const XSRF_COOKIE_NAME: &str = "xsrf";
/// Name of the XSRF request parameter unless the application chooses its own.
pub const XSRF_PARAM_NAME: &str = "xsrf";

const XSRF_TOKEN_LEN: usize = 8;

/// Cross-site request forgery protection.
///
/// A random token is bound to the browser through the `cookie_name` cookie;
/// the cookie is added through a respond filter when the response is
/// committed. `POST`, `PUT` and `DELETE` requests must echo the token in
/// the `param_name` request parameter or the `X-Xsrftoken` header; a
/// mismatch is returned as an error for the application to route to its
/// error handler.
///
/// Before returning, the `param_name` parameter is set to the expected
/// token so the application can emit it in hidden form fields.
pub fn check_xsrf(
    txn: &mut Transaction<'_>,
    cookie_name: &str,
    param_name: &str,
) -> Result<(), Error> {
    let mut expected = txn
        .req
        .cookie
        .get(cookie_name)
        .unwrap_or("")
        .to_string();

    if expected.len() != XSRF_TOKEN_LEN {
        let mut p = [0u8; XSRF_TOKEN_LEN / 2];
        rand::thread_rng().fill_bytes(&mut p);
        expected = hex_encode(&p);
        let cookie = Cookie::new(cookie_name, &expected).to_string();
        txn.filter_respond(move |status, mut h: HeaderMap| {
            h.add(header::SET_COOKIE, &cookie);
            (status, h)
        });
    }

    let mut actual = txn.req.param.get(param_name).unwrap_or("").to_string();
    if actual.is_empty() {
        actual = txn.req.header.get(header::X_XSRF_TOKEN).to_string();
    }
    txn.req.param.set(param_name, &expected);

    if expected != actual
        && matches!(txn.req.method.as_str(), "POST" | "PUT" | "DELETE")
    {
        return Err(if actual.is_empty() {
            Error::MissingXsrfToken
        } else {
            Error::BadXsrfToken
        });
    }
    Ok(())
}
