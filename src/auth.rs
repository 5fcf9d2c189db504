//! Request signing recipes and nonce generation.
//!
//! A [`SignFn`] receives the credentials and a fully built request and
//! returns the request with whatever the venue needs added: a nonce in
//! the form body, signature headers, or a signature query parameter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::prelude::*;
use hmac::{Hmac, Mac};
use reqwest::header::HeaderValue;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::config::Credentials;
use crate::{ConfluenceError, Result};

/// Request-signing callback.
pub type SignFn =
    Arc<dyn Fn(&Credentials, reqwest::Request) -> Result<reqwest::Request> + Send + Sync>;

/// Wraps a closure into a [`SignFn`].
pub fn sign_fn<F>(f: F) -> SignFn
where
    F: Fn(&Credentials, reqwest::Request) -> Result<reqwest::Request> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Tracks the last nonce issued so every call returns a strictly
/// increasing value even when the wall-clock hasn't advanced.
static LAST_NONCE: AtomicU64 = AtomicU64::new(0);

/// Returns a strictly increasing nonce with microsecond resolution.
pub fn next_nonce() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_micros() as u64);

    let mut prev = LAST_NONCE.load(Ordering::Relaxed);
    loop {
        let nonce = now.max(prev + 1);
        match LAST_NONCE.compare_exchange_weak(prev, nonce, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return nonce,
            Err(actual) => prev = actual,
        }
    }
}

/// Current time in milliseconds since epoch.
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

fn body_bytes(request: &reqwest::Request) -> Vec<u8> {
    request
        .body()
        .and_then(reqwest::Body::as_bytes)
        .map(<[u8]>::to_vec)
        .unwrap_or_default()
}

fn header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ConfluenceError::Signing(format!("bad header: {e}")))
}

/// Kraken: nonce in the form body, `API-Key` and `API-Sign` headers.
pub fn kraken() -> SignFn {
    sign_fn(|credentials, mut request| {
        let nonce = next_nonce();
        let body = body_bytes(&request);
        let post_data = if body.is_empty() {
            format!("nonce={nonce}")
        } else {
            format!("nonce={nonce}&{}", String::from_utf8_lossy(&body))
        };

        let signature = kraken_signature(
            &credentials.api_secret,
            request.url().path(),
            nonce,
            &post_data,
        )?;

        let headers = request.headers_mut();
        headers.insert("API-Key", header(&credentials.api_key)?);
        headers.insert("API-Sign", header(&signature)?);
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        *request.body_mut() = Some(post_data.into());
        Ok(request)
    })
}

/// `Base64(HMAC-SHA512(Base64Decode(secret), path + SHA256(nonce + post_data)))`
pub fn kraken_signature(secret: &str, path: &str, nonce: u64, post_data: &str) -> Result<String> {
    let secret = BASE64_STANDARD
        .decode(secret)
        .map_err(|e| ConfluenceError::Signing(format!("invalid base64 api_secret: {e}")))?;

    let mut sha256 = Sha256::new();
    sha256.update(format!("{nonce}{post_data}").as_bytes());
    let sha256_digest = sha256.finalize();

    let mut hmac_input = Vec::from(path.as_bytes());
    hmac_input.extend_from_slice(&sha256_digest);

    let mut mac = Hmac::<Sha512>::new_from_slice(&secret)
        .map_err(|e| ConfluenceError::Signing(format!("invalid HMAC key: {e}")))?;
    mac.update(&hmac_input);

    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Bitfinex v2: `bfx-nonce`, `bfx-apikey` and `bfx-signature` headers.
pub fn bitfinex() -> SignFn {
    sign_fn(|credentials, mut request| {
        let nonce = next_nonce().to_string();
        let body = String::from_utf8_lossy(&body_bytes(&request)).into_owned();
        let signature =
            bitfinex_signature(&credentials.api_secret, request.url().path(), &nonce, &body)?;

        let headers = request.headers_mut();
        headers.insert("bfx-nonce", header(&nonce)?);
        headers.insert("bfx-apikey", header(&credentials.api_key)?);
        headers.insert("bfx-signature", header(&signature)?);
        Ok(request)
    })
}

/// Hex `HMAC-SHA384(secret, "/api" + path + nonce + body)`.
///
/// `path` is the URL path below `/api`, e.g. `/v2/auth/r/wallets`.
pub fn bitfinex_signature(secret: &str, path: &str, nonce: &str, body: &str) -> Result<String> {
    let path = path.strip_prefix("/api").unwrap_or(path);
    let mut mac = Hmac::<Sha384>::new_from_slice(secret.as_bytes())
        .map_err(|e| ConfluenceError::Signing(format!("invalid HMAC key: {e}")))?;
    mac.update(format!("/api{path}{nonce}{body}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Binance: `timestamp` added, query sorted, `signature` appended,
/// `X-MBX-APIKEY` header.
pub fn binance() -> SignFn {
    sign_fn(|credentials, mut request| {
        let body = String::from_utf8_lossy(&body_bytes(&request)).into_owned();

        let mut pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .filter(|(k, _)| k != "timestamp" && k != "signature")
            .collect();
        pairs.push(("timestamp".to_string(), timestamp_millis().to_string()));
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        request.url_mut().query_pairs_mut().clear().extend_pairs(&pairs);
        let query = request.url().query().unwrap_or_default().to_string();

        let signature = binance_signature(&credentials.api_secret, &query, &body)?;
        request
            .url_mut()
            .query_pairs_mut()
            .append_pair("signature", &signature);
        request
            .headers_mut()
            .insert("X-MBX-APIKEY", header(&credentials.api_key)?);
        Ok(request)
    })
}

/// Hex `HMAC-SHA256(secret, query + body)`.
pub fn binance_signature(secret: &str, query: &str, body: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ConfluenceError::Signing(format!("invalid HMAC key: {e}")))?;
    mac.update(query.as_bytes());
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
