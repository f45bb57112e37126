//! Webhook payload decoding with shared-secret authentication.
//!
//! The HTTP transport delivering the payload lives outside this crate; this
//! module only verifies the HMAC-SHA256 signature and decodes the entries.
//! An invalid signature produces an authentication error and no side effects.

use crate::types::{EnricherError, Entry, Feed, Result};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const EVENT_NEW_ENTRIES: &str = "new_entries";

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    event_type: String,
    #[serde(default)]
    feed: Option<Feed>,
    #[serde(default)]
    entries: Vec<Entry>,
}

/// Verify `signature_hex` over the raw payload bytes.
///
/// Comparison happens inside the Mac implementation in constant time.
pub fn verify_signature(payload: &[u8], signature_hex: &str, secret: &str) -> Result<()> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| EnricherError::Config("webhook secret is empty".into()))?;
    mac.update(payload);

    let signature = decode_hex(signature_hex)
        .ok_or_else(|| EnricherError::Auth("malformed webhook signature".into()))?;
    mac.verify_slice(&signature)
        .map_err(|_| EnricherError::Auth("webhook signature mismatch".into()))
}

/// Authenticate and decode a webhook payload into entries ready for
/// processing. Events other than `new_entries` decode to an empty list.
pub fn decode_webhook(payload: &[u8], signature_hex: &str, secret: &str) -> Result<Vec<Entry>> {
    verify_signature(payload, signature_hex, secret)?;

    let decoded: WebhookPayload = serde_json::from_slice(payload)?;
    if decoded.event_type != EVENT_NEW_ENTRIES {
        debug!(event_type = %decoded.event_type, "ignoring webhook event");
        return Ok(Vec::new());
    }

    // The payload carries the feed once; attach it to each entry so rule
    // evaluation sees the same shape as a fetched entry.
    let mut entries = decoded.entries;
    if let Some(feed) = decoded.feed {
        for entry in &mut entries {
            if entry.feed.is_none() {
                entry.feed = Some(feed.clone());
            }
        }
    }

    debug!(count = entries.len(), "decoded webhook entries");
    Ok(entries)
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    // The signature arrives unauthenticated, so it may hold arbitrary
    // bytes; never index into it by position.
    if !s.is_ascii() || s.len() % 2 != 0 {
        return None;
    }
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

/// Hex-encode an HMAC-SHA256 signature for a payload. Used by tests and by
/// callers that need to sign outbound notifications.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(payload);
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
