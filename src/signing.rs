//! Payload signing for outbound deliveries.
//!
//! The canonical payload is the compact JSON object
//! `{eventId, eventType, tenantId, payload, metadata, timestamp}` in exactly
//! that order, with object keys inside `payload` and `metadata` sorted. The
//! same bytes are signed and sent as the request body.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::error::Result;
use crate::types::Event;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";
pub const EVENT_ID_HEADER: &str = "X-Event-Id";
pub const TENANT_ID_HEADER: &str = "X-Tenant-Id";

const SECRET_PREFIX: &str = "whsec_";
const SECRET_BYTES: usize = 32;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalPayload<'a> {
    event_id: &'a str,
    event_type: &'a str,
    tenant_id: &'a str,
    payload: Value,
    metadata: Value,
    timestamp: &'a DateTime<Utc>,
}

/// Serialize the signed fields of an event into canonical bytes.
pub fn canonical_payload(event: &Event) -> Result<Vec<u8>> {
    let canonical = CanonicalPayload {
        event_id: &event.event_id,
        event_type: &event.event_type,
        tenant_id: &event.tenant_id,
        payload: sort_keys(Value::Object(event.payload.clone())),
        metadata: sort_keys(serde_json::to_value(&event.metadata)?),
        timestamp: &event.timestamp,
    };
    Ok(serde_json::to_vec(&canonical)?)
}

/// HMAC-SHA256 of the canonical payload, lowercase hex.
pub fn sign(secret: &str, canonical: &[u8]) -> String {
    let mut mac = match <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    mac.update(canonical);
    hex::encode(mac.finalize().into_bytes())
}

/// Check an `X-Webhook-Signature` value against a received body.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let expected = match hex::decode(signature_hex.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Fresh listener secret: 32 bytes from the OS CSPRNG, hex encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}

/// `Map` only keeps keys sorted while serde_json's `preserve_order` feature is
/// off, and any crate in the dependency graph can turn it on.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, sort_keys(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
