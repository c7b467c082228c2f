//! Request Authentication
//!
//! - SS58 hotkey validation
//! - Sr25519 signature verification over the request
//! - Timestamp window and replay protection
//!
//! A signed request carries three headers: `x-caller` (SS58 hotkey),
//! `x-timestamp` (unix seconds) and `x-signature` (hex sr25519 signature of
//! [`create_request_message`]).

use std::collections::HashMap;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use sp_core::crypto::Ss58Codec;
use sp_core::sr25519::{Public, Signature};
use subtle::ConstantTimeEq;
use tracing::debug;

pub const CALLER_HEADER: &str = "x-caller";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Signed requests older than this are rejected.
pub const TIMESTAMP_WINDOW_SECS: i64 = 5 * 60;

/// Check if a string is a valid SS58-encoded sr25519 public key
pub fn is_valid_ss58_hotkey(hotkey: &str) -> bool {
    if hotkey.len() < 40 || hotkey.len() > 60 {
        return false;
    }
    Public::from_ss58check(hotkey).is_ok()
}

/// Verify an sr25519 signature
pub fn verify_signature(hotkey: &str, message: &str, signature_hex: &str) -> bool {
    let public_key = match Public::from_ss58check(hotkey) {
        Ok(pk) => pk,
        Err(e) => {
            debug!("Failed to parse SS58 hotkey: {}", e);
            return false;
        }
    };

    let sig_bytes = match decode_signature(signature_hex) {
        Some(bytes) => bytes,
        None => return false,
    };
    let signature = Signature::from_raw(sig_bytes);

    use sp_core::Pair;
    sp_core::sr25519::Pair::verify(&signature, message.as_bytes(), &public_key)
}

fn decode_signature(signature_hex: &str) -> Option<[u8; 64]> {
    let sig_hex = signature_hex
        .strip_prefix("0x")
        .unwrap_or(signature_hex)
        .to_lowercase();

    let sig_bytes = match hex::decode(&sig_hex) {
        Ok(b) => b,
        Err(e) => {
            debug!("Failed to decode signature hex: {}", e);
            return None;
        }
    };

    if sig_bytes.len() != 64 {
        debug!("Invalid signature length: {} (expected 64)", sig_bytes.len());
        return None;
    }

    let mut sig_array = [0u8; 64];
    sig_array.copy_from_slice(&sig_bytes);
    Some(sig_array)
}

/// Message a caller signs: method, path with query, SHA-256 of the body
/// and the timestamp, colon separated.
pub fn create_request_message(method: &str, path: &str, body: &[u8], timestamp: i64) -> String {
    let body_hash = hex::encode(Sha256::digest(body));
    format!("{}:{}:{}:{}", method.to_uppercase(), path, body_hash, timestamp)
}

/// Check if timestamp is within acceptable window (5 minutes)
/// Only allows past timestamps within the window (prevents replay with future timestamps)
pub fn is_timestamp_valid(timestamp: i64) -> bool {
    is_timestamp_valid_at(timestamp, chrono::Utc::now().timestamp())
}

fn is_timestamp_valid_at(timestamp: i64, now: i64) -> bool {
    timestamp <= now && (now - timestamp) < TIMESTAMP_WINDOW_SECS
}

/// Shared-secret comparison that does not leak the matching prefix length.
pub fn tokens_match(presented: &str, expected: &str) -> bool {
    bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

/// Remembers signatures seen inside the timestamp window so a captured
/// request cannot be sent twice.
#[derive(Default)]
pub struct ReplayGuard {
    seen: Mutex<HashMap<String, i64>>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the signature; `false` if it was already used.
    pub fn check_and_record(&self, signature_hex: &str, timestamp: i64, now: i64) -> bool {
        let mut seen = self.seen.lock();
        seen.retain(|_, ts| now - *ts < TIMESTAMP_WINDOW_SECS);
        let key = signature_hex
            .strip_prefix("0x")
            .unwrap_or(signature_hex)
            .to_lowercase();
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, timestamp);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a signed request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    MissingHeader(&'static str),
    InvalidHotkey,
    InvalidTimestamp,
    BadSignature,
    Replayed,
}

/// Full check of one signed request. Returns the authenticated hotkey.
pub fn authenticate(
    guard: &ReplayGuard,
    hotkey: &str,
    timestamp: &str,
    signature_hex: &str,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<String, AuthFailure> {
    if !is_valid_ss58_hotkey(hotkey) {
        return Err(AuthFailure::InvalidHotkey);
    }
    let timestamp: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| AuthFailure::InvalidTimestamp)?;
    let now = chrono::Utc::now().timestamp();
    if !is_timestamp_valid_at(timestamp, now) {
        return Err(AuthFailure::InvalidTimestamp);
    }
    let message = create_request_message(method, path, body, timestamp);
    if !verify_signature(hotkey, &message, signature_hex) {
        return Err(AuthFailure::BadSignature);
    }
    if !guard.check_and_record(signature_hex, timestamp, now) {
        return Err(AuthFailure::Replayed);
    }
    Ok(hotkey.to_string())
}
