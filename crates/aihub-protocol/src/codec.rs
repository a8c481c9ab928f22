// SPDX-License-Identifier: Apache-2.0
//!
//! Dual codec for the link protocols: **JSON** over WebSocket (comfortable
//! for browsers and easy to inspect in flight) and **CBOR** for any
//! binary transport between agent and hub where payload size matters.

use serde::{de::DeserializeOwned, Serialize};

/// Encode `value` as a JSON text frame.
pub fn encode_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    serde_json::to_string(value).map_err(|e| anyhow::anyhow!("JSON encode: {e}"))
}

/// Decode a JSON text frame.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
    serde_json::from_str(text).map_err(|e| anyhow::anyhow!("JSON decode: {e}"))
}

/// Encode `value` as CBOR bytes.
pub fn encode_cbor<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| anyhow::anyhow!("CBOR encode: {e}"))?;
    Ok(buf)
}

/// Decode CBOR bytes.
pub fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<T> {
    ciborium::from_reader(bytes).map_err(|e| anyhow::anyhow!("CBOR decode: {e}"))
}
