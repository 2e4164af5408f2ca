//! Key epochs: one version of the master key plus its cipher backend.
//!
//! During rotation two epochs are live at once (old and new). Each epoch
//! derives per-column encryption keys and per-index keys from its master
//! key material with HKDF-SHA256, using the context string as the `info`
//! parameter for domain separation. Only the key material differs between
//! epochs in a rotation; the backend must stay in the same algorithm
//! family so ciphertext shapes remain comparable.

use crate::context::{FieldContext, IndexContext};
use crate::error::Error;
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;

/// Master key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Derived key size in bytes (256 bits), used for both field and index keys.
pub const DERIVED_KEY_SIZE: usize = 32;

/// AEAD cipher backend for a key epoch.
///
/// Both backends take 32-byte keys and 96-bit nonces, so ciphertext layout
/// is identical apart from the backend byte recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherBackend {
    /// ChaCha20-Poly1305 AEAD cipher (default).
    ChaCha20Poly1305,
    /// AES-256-GCM AEAD cipher.
    Aes256Gcm,
}

impl Default for CipherBackend {
    fn default() -> Self {
        Self::ChaCha20Poly1305
    }
}

impl CipherBackend {
    /// Stable identifier stored in the ciphertext header.
    #[must_use]
    pub const fn wire_id(self) -> u8 {
        match self {
            Self::ChaCha20Poly1305 => 0x01,
            Self::Aes256Gcm => 0x02,
        }
    }

    /// Looks a backend up by its header byte.
    #[must_use]
    pub const fn from_wire_id(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(Self::ChaCha20Poly1305),
            0x02 => Some(Self::Aes256Gcm),
            _ => None,
        }
    }

    /// Human-readable backend name, as accepted by configuration.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ChaCha20Poly1305 => "chacha20poly1305",
            Self::Aes256Gcm => "aes-256-gcm",
        }
    }
}

impl std::str::FromStr for CipherBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chacha20poly1305" => Ok(Self::ChaCha20Poly1305),
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            other => Err(Error::InvalidEntity(format!("unknown cipher backend: {other}"))),
        }
    }
}

/// One version of the master key: key material plus cipher backend.
///
/// # Example
///
/// ```
/// use kilitdb::epoch::{CipherBackend, KeyEpoch};
///
/// let epoch = KeyEpoch::from_hex(
///     "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
///     CipherBackend::default(),
/// )?;
/// assert_eq!(epoch.backend(), CipherBackend::ChaCha20Poly1305);
/// # Ok::<(), kilitdb::error::Error>(())
/// ```
pub struct KeyEpoch {
    key: SecretVec<u8>,
    backend: CipherBackend,
}

impl KeyEpoch {
    /// Creates a key epoch from raw key material.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKeyLength` if the key is not [`KEY_SIZE`] bytes.
    pub fn new(key: SecretVec<u8>, backend: CipherBackend) -> Result<Self, Error> {
        let actual = key.expose_secret().len();
        if actual != KEY_SIZE {
            return Err(Error::InvalidKeyLength { expected: KEY_SIZE, actual });
        }
        Ok(Self { key, backend })
    }

    /// Creates a key epoch from hex-encoded key material.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKeyEncoding` for malformed hex and
    /// `Error::InvalidKeyLength` for a key that is not [`KEY_SIZE`] bytes
    /// after decoding.
    pub fn from_hex(hex_key: &str, backend: CipherBackend) -> Result<Self, Error> {
        let key =
            hex::decode(hex_key).map_err(|e| Error::InvalidKeyEncoding(e.to_string()))?;
        Self::new(SecretVec::new(key), backend)
    }

    /// Returns the cipher backend of this epoch.
    #[must_use]
    pub const fn backend(&self) -> CipherBackend {
        self.backend
    }

    /// Derives the encryption key for one field.
    ///
    /// Same epoch and context always produce the same key.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if HKDF expansion fails.
    pub fn field_key(&self, context: &FieldContext) -> Result<SecretVec<u8>, Error> {
        self.derive(&format!("field|{context}"))
    }

    /// Derives the keyed-hash key for one blind index.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if HKDF expansion fails.
    pub fn index_key(&self, context: &IndexContext) -> Result<SecretVec<u8>, Error> {
        self.derive(&format!("index|{context}"))
    }

    fn derive(&self, info: &str) -> Result<SecretVec<u8>, Error> {
        let hkdf = Hkdf::<Sha256>::new(None, self.key.expose_secret());
        let mut derived = vec![0u8; DERIVED_KEY_SIZE];
        hkdf.expand(info.as_bytes(), &mut derived).map_err(|_| Error::KeyDerivation)?;
        Ok(SecretVec::new(derived))
    }
}

impl Clone for KeyEpoch {
    fn clone(&self) -> Self {
        Self {
            key: SecretVec::new(self.key.expose_secret().clone()),
            backend: self.backend,
        }
    }
}
