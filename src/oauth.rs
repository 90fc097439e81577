//! OAuth 1.0a request signing (HMAC-SHA1), as required by the Twitter v1.1 API.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::config::Credentials;

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 percent-encoding (unreserved characters left as-is).
pub fn percent_encode(s: &str) -> String {
    // urlencoding leaves exactly the RFC 3986 unreserved set untouched
    urlencoding::encode(s).into_owned()
}

/// Builds the `Authorization` header value for a request.
///
/// `params` are the query (or form) parameters of the request; they are part
/// of the signature base string but not of the header.
pub fn authorization_header(
    credentials: &Credentials,
    method: &str,
    base_url: &str,
    params: &[(&str, &str)],
    nonce: &str,
    timestamp: i64,
) -> String {
    let timestamp = timestamp.to_string();
    let oauth_params: [(&str, &str); 6] = [
        ("oauth_consumer_key", credentials.api_key.as_str()),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp.as_str()),
        ("oauth_token", credentials.access_token.as_str()),
        ("oauth_version", "1.0"),
    ];

    let signature = sign(credentials, method, base_url, params, &oauth_params);

    let mut header_params: Vec<(String, String)> = oauth_params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    header_params.push(("oauth_signature".to_string(), signature));
    header_params.sort();

    let fields = header_params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("OAuth {}", fields)
}

/// Signature base string as defined in RFC 5849 §3.4.1.
pub fn signature_base_string(
    method: &str,
    base_url: &str,
    params: &[(&str, &str)],
    oauth_params: &[(&str, &str)],
) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .chain(oauth_params.iter())
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    let normalized = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(base_url),
        percent_encode(&normalized)
    )
}

fn sign(
    credentials: &Credentials,
    method: &str,
    base_url: &str,
    params: &[(&str, &str)],
    oauth_params: &[(&str, &str)],
) -> String {
    let base = signature_base_string(method, base_url, params, oauth_params);
    let key = format!(
        "{}&{}",
        percent_encode(&credentials.api_secret),
        percent_encode(&credentials.access_secret)
    );
    let mut mac =
        HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(base.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}
