//! Versioned CBOR encoding of a cart.
//!
//! A persisted cart is a CBOR map `{ "version": u16, "state": CartState }`.
//! Decoding reads the version first so that a cart written by a newer build
//! is reported as [`CartError::UnsupportedFormat`] instead of a generic
//! decode failure.

use crate::error::{CartError, CartResult};
use crate::state::CartState;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Format version written by this build.
pub const FORMAT_VERSION: u16 = 1;

#[derive(Serialize)]
struct Envelope<'a> {
    version: u16,
    state: &'a CartState,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u16,
}

#[derive(Deserialize)]
struct OwnedEnvelope {
    state: CartState,
}

/// Encodes a cart for persistence.
pub fn encode_state(state: &CartState) -> CartResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(
        &Envelope {
            version: FORMAT_VERSION,
            state,
        },
        &mut bytes,
    )
    .map_err(|e| CartError::codec(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a persisted cart.
///
/// Metadata is recomputed from the decoded items and the history is
/// clamped to the recorded capacity, so a decoded cart always satisfies the
/// same invariants as one built through the store.
pub fn decode_state(bytes: &[u8]) -> CartResult<CartState> {
    let probe: VersionProbe =
        ciborium::de::from_reader(bytes).map_err(|e| CartError::codec(e.to_string()))?;
    if probe.version != FORMAT_VERSION {
        return Err(CartError::UnsupportedFormat {
            found: probe.version,
            supported: FORMAT_VERSION,
        });
    }

    let envelope: OwnedEnvelope =
        ciborium::de::from_reader(bytes).map_err(|e| CartError::codec(e.to_string()))?;
    let mut state = envelope.state;
    state.recompute_metadata();
    state.clamp_history(state.max_history_size, Utc::now());
    Ok(state)
}
