// File: fingerprint.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use reqwest::header::HeaderMap;
use std::collections::BTreeMap;

pub const HASH_INPUT_LIMIT: usize = 50_000;
pub const SNIPPET_LENGTH: usize = 500;

/// Response headers commonly set by WAFs, CDNs and rate limiters.
pub const FINGERPRINT_HEADERS: &[&str] = &[
    "server",
    "x-powered-by",
    "x-ratelimit-limit",
    "retry-after",
    "cf-ray",
    "x-amz-cf-id",
    "x-sucuri-id",
    "x-waf-event",
    "akamai-request-id",
];

pub type FingerprintHeaders = BTreeMap<String, String>;

/// Keeps only the fingerprint headers, names and values lowercased.
pub fn extract_fingerprint_headers(headers: &HeaderMap) -> FingerprintHeaders {
    let mut fingerprint = BTreeMap::new();
    for (name, value) in headers.iter() {
        let key = name.as_str().to_lowercase();
        if FINGERPRINT_HEADERS.contains(&key.as_str()) {
            let value = String::from_utf8_lossy(value.as_bytes()).to_lowercase();
            fingerprint.insert(key, value);
        }
    }
    fingerprint
}

/// Coarse equality fingerprint of a body. Not cryptographic.
///
/// djb2 with xor over UTF-16 code units, truncated to the first
/// [`HASH_INPUT_LIMIT`] units, rendered as unpadded lowercase hex.
/// Empty bodies have no hash.
pub fn content_hash(body: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let hash = body
        .encode_utf16()
        .take(HASH_INPUT_LIMIT)
        .fold(5381u32, |hash, unit| hash.wrapping_mul(33) ^ u32::from(unit));
    Some(format!("{:x}", hash))
}

pub fn body_snippet(body: &str) -> String {
    body.chars().take(SNIPPET_LENGTH).collect::<String>().to_lowercase()
}

/// Bodies are only read when the declared type is absent or textual.
pub fn is_text_like(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.to_lowercase();
            ct.contains("text") || ct.contains("json") || ct.contains("xml")
        }
    }
}
