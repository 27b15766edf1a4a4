//! HMAC-SHA256 request signing.
//!
//! Private endpoints take the url-encoded parameters plus `timestamp` and
//! `recvWindow`, signed with the API secret and appended as `signature`.

use crate::error::{ExchangeError, ExchangeResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn sign(secret: &[u8], payload: &str) -> ExchangeResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ExchangeError::Signing(format!("failed to create signing key: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build the full signed query string for a private request.
pub fn signed_query(
    params: &[(&str, String)],
    timestamp_ms: i64,
    recv_window_ms: u64,
    secret: &[u8],
) -> ExchangeResult<String> {
    let mut pairs: Vec<(&str, String)> = params.to_vec();
    pairs.push(("timestamp", timestamp_ms.to_string()));
    pairs.push(("recvWindow", recv_window_ms.to_string()));

    let query = serde_urlencoded::to_string(&pairs)
        .map_err(|e| ExchangeError::Signing(format!("failed to encode query: {e}")))?;
    let signature = sign(secret, &query)?;

    Ok(format!("{query}&signature={signature}"))
}
