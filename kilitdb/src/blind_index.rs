//! Blind index derivation for searchable encryption.
//!
//! Blind indexes allow equality queries on encrypted data without revealing
//! the plaintext value. Each index value is a truncated HMAC-SHA256 over
//! the plaintext, keyed by a per-index key derived from the epoch's master
//! key. Derivation is deterministic by construction: same plaintext, same
//! epoch, same index definition always yield the same value, which is what
//! lets the rotation evaluator recognize already-migrated rows.

use crate::context::IndexContext;
use crate::epoch::KeyEpoch;
use crate::error::Error;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Standard blind index output size (16 bytes before hex encoding).
pub const BLIND_INDEX_SIZE: usize = 16;

/// Derives the blind index value for one plaintext under one key epoch.
///
/// The index is computed as `HMAC-SHA256(index_key, value)[..16]` and
/// returned hex-encoded, ready to store in the blind index side table.
///
/// # Arguments
///
/// * `epoch` - Key epoch supplying the per-index key
/// * `value` - The plaintext value to index
/// * `context` - Index context for domain separation
///
/// # Errors
///
/// Returns `Error::KeyDerivation` if the index key cannot be derived, or
/// `Error::IndexGenerationFailed` if the HMAC cannot be keyed.
pub fn derive_blind_index(
    epoch: &KeyEpoch,
    value: &[u8],
    context: &IndexContext,
) -> Result<String, Error> {
    let key = epoch.index_key(context)?;

    let mut mac = HmacSha256::new_from_slice(key.expose_secret())
        .map_err(|e| Error::IndexGenerationFailed(format!("invalid index key: {e}")))?;
    mac.update(value);

    let bytes = mac.finalize().into_bytes();
    Ok(hex::encode(&bytes[..BLIND_INDEX_SIZE]))
}
