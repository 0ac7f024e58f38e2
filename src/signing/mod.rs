//! Request signing for the cloud IoT API
//!
//! Every call to the cloud carries an HMAC-SHA256 signature over a canonical
//! representation of the request. The layout must match the platform byte for
//! byte:
//!
//! ```text
//! string_to_sign = METHOD "\n" sha256_hex(body) "\n" "" "\n" url_path
//! payload        = access_id [access_token] timestamp nonce string_to_sign
//! sign           = HEX_UPPER(HMAC-SHA256(access_secret, payload))
//! ```

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Name of the signing algorithm, sent as the `sign_method` header
pub const SIGN_METHOD: &str = "HMAC-SHA256";

/// Inputs that identify one signed request
#[derive(Debug, Clone, Copy)]
pub struct SignInput<'a> {
    pub method: &'a str,
    /// Path plus query string, exactly as sent
    pub url_path: &'a str,
    /// Millisecond epoch timestamp as a decimal string
    pub timestamp: &'a str,
    pub nonce: &'a str,
    pub body: &'a str,
}

/// Lowercase hex SHA-256 of the request body
pub fn content_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

/// Canonical request string. The third line is the signed-headers segment,
/// which is always empty.
pub fn string_to_sign(method: &str, body: &str, url_path: &str) -> String {
    format!(
        "{}\n{}\n\n{}",
        method.to_uppercase(),
        content_hash(body),
        url_path
    )
}

/// Compute the uppercase hex signature for a request.
///
/// `access_token` is `None` only for the token request itself; the token
/// segment is then left out of the payload.
pub fn sign(
    access_secret: &str,
    access_id: &str,
    access_token: Option<&str>,
    input: SignInput<'_>,
) -> String {
    let mut payload = String::with_capacity(256);
    payload.push_str(access_id);
    if let Some(token) = access_token {
        payload.push_str(token);
    }
    payload.push_str(input.timestamp);
    payload.push_str(input.nonce);
    payload.push_str(&string_to_sign(input.method, input.body, input.url_path));

    let mut mac = <HmacSha256 as Mac>::new_from_slice(access_secret.as_bytes())
        .expect("HMAC key should be valid");
    mac.update(payload.as_bytes());
    hex::encode_upper(mac.finalize().into_bytes())
}
