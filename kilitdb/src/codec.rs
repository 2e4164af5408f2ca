//! Row codec: converts plaintext rows to ciphertext columns plus blind
//! index values under one key epoch, and back.
//!
//! Field encryption is randomized AEAD (fresh nonce per call, so identical
//! plaintexts produce different ciphertext bytes), while blind indexes are
//! deterministic. Each encrypted column stores
//! `hex(version || backend || nonce || aead_ct)` with the field context as
//! associated data, so a value moved between columns fails authentication.

use crate::blind_index::derive_blind_index;
use crate::context::{FieldContext, IndexContext};
use crate::epoch::{CipherBackend, KeyEpoch};
use crate::error::Error;
use crate::row::{BlindIndexMap, CiphertextRow, PlainRow, StoredRow};
use crate::schema::TableSchema;
use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305,
};
use secrecy::ExposeSecret;
use zeroize::Zeroizing;

/// Ciphertext format version.
pub const FORMAT_VERSION: u8 = 1;

/// Nonce size for both backends (96 bits).
const NONCE_SIZE: usize = 12;

/// Header bytes preceding the nonce: version and backend id.
const HEADER_SIZE: usize = 2;

/// AEAD tag size (128 bits).
const TAG_SIZE: usize = 16;

/// Codec for one table schema under one key epoch.
///
/// The batch loop builds one codec per epoch before iterating and reuses
/// them for every row; construction is cheap but per-row rebuilding is
/// pointless.
///
/// # Example
///
/// ```
/// use kilitdb::codec::RowCodec;
/// use kilitdb::epoch::{CipherBackend, KeyEpoch};
/// use kilitdb::row::PlainRow;
/// use kilitdb::schema::TableSchema;
///
/// let schema = TableSchema::builder("users")
///     .field("email")
///     .blind_index("email_bidx", "email")
///     .build()?;
/// let epoch = KeyEpoch::from_hex(&"11".repeat(32), CipherBackend::default())?;
/// let codec = RowCodec::new(&schema, &epoch);
///
/// let mut plain = PlainRow::new();
/// plain.insert("email".to_string(), "alice@example.com".to_string());
///
/// let (ciphertext, indexes) = codec.encrypt_row(&plain)?;
/// assert!(ciphertext.contains_key("email"));
/// assert!(indexes.contains_key("email_bidx"));
/// # Ok::<(), kilitdb::error::Error>(())
/// ```
pub struct RowCodec<'a> {
    schema: &'a TableSchema,
    epoch: &'a KeyEpoch,
}

impl<'a> RowCodec<'a> {
    /// Creates a codec for the given schema and key epoch.
    #[must_use]
    pub const fn new(schema: &'a TableSchema, epoch: &'a KeyEpoch) -> Self {
        Self { schema, epoch }
    }

    /// Returns the schema this codec encrypts for.
    #[must_use]
    pub const fn schema(&self) -> &TableSchema {
        self.schema
    }

    /// Returns the cipher backend of the underlying epoch.
    #[must_use]
    pub const fn backend(&self) -> CipherBackend {
        self.epoch.backend()
    }

    /// Encrypts a plaintext row into ciphertext columns and blind indexes.
    ///
    /// Fields absent from `plain` are skipped, as are indexes whose source
    /// field is absent; the persisted update then leaves those columns
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or index derivation fails.
    pub fn encrypt_row(&self, plain: &PlainRow) -> Result<(CiphertextRow, BlindIndexMap), Error> {
        let mut ciphertext = CiphertextRow::new();
        for field in self.schema.encrypted_fields() {
            if let Some(value) = plain.get(field) {
                ciphertext.insert(field.clone(), self.encrypt_field(field, value)?);
            }
        }

        let indexes = self.blind_indexes(plain)?;
        Ok((ciphertext, indexes))
    }

    /// Decrypts the encrypted columns of a stored row.
    ///
    /// Null or absent encrypted columns are skipped. Any column that cannot
    /// be read fails the whole row with a decrypt-failure error.
    ///
    /// # Errors
    ///
    /// Returns a decrypt-failure error (`Error::is_decrypt_failure`) when a
    /// column is malformed, was produced under a different key or backend,
    /// or fails authentication.
    pub fn decrypt_row(&self, row: &StoredRow) -> Result<PlainRow, Error> {
        let mut plain = PlainRow::new();
        for field in self.schema.encrypted_fields() {
            let value = match row.get(field) {
                None | Some(crate::row::Value::Null) => continue,
                Some(value) => value,
            };
            let stored = value.as_text().ok_or_else(|| {
                Error::InvalidCiphertext(format!("column {field} does not hold text"))
            })?;
            plain.insert(field.clone(), self.decrypt_field(field, stored)?);
        }
        Ok(plain)
    }

    /// Derives the blind index values for a plaintext row.
    ///
    /// # Errors
    ///
    /// Returns an error if index derivation fails.
    pub fn blind_indexes(&self, plain: &PlainRow) -> Result<BlindIndexMap, Error> {
        let mut indexes = BlindIndexMap::new();
        for spec in self.schema.blind_indexes() {
            if let Some(value) = plain.get(spec.field()) {
                let context = IndexContext::new(self.schema.table(), spec.name());
                indexes.insert(
                    spec.name().to_string(),
                    derive_blind_index(self.epoch, value.as_bytes(), &context)?,
                );
            }
        }
        Ok(indexes)
    }

    /// Encrypts one field value.
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation or encryption fails.
    pub fn encrypt_field(&self, field: &str, plaintext: &str) -> Result<String, Error> {
        let context = FieldContext::new(self.schema.table(), field);
        let key = self.epoch.field_key(&context)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        // Bind the ciphertext to its table and column
        let aad = context.to_string();
        let payload = Payload { msg: plaintext.as_bytes(), aad: aad.as_bytes() };

        let ciphertext = match self.epoch.backend() {
            CipherBackend::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(key.expose_secret())
                    .map_err(|e| Error::EncryptionFailed(format!("invalid field key: {e}")))?;
                cipher.encrypt(&chacha20poly1305::Nonce::from(nonce_bytes), payload).map_err(
                    |e| Error::EncryptionFailed(format!("ChaCha20-Poly1305 failed: {e}")),
                )?
            }
            CipherBackend::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(key.expose_secret())
                    .map_err(|e| Error::EncryptionFailed(format!("invalid field key: {e}")))?;
                cipher
                    .encrypt(&nonce_bytes.into(), payload)
                    .map_err(|e| Error::EncryptionFailed(format!("AES-256-GCM failed: {e}")))?
            }
        };

        let mut out = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + ciphertext.len());
        out.push(FORMAT_VERSION);
        out.push(self.epoch.backend().wire_id());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);

        Ok(hex::encode(out))
    }

    /// Decrypts one stored field value.
    ///
    /// # Errors
    ///
    /// Returns a decrypt-failure error when the value is not valid
    /// ciphertext for this codec's epoch.
    pub fn decrypt_field(&self, field: &str, stored: &str) -> Result<String, Error> {
        let bytes = hex::decode(stored)
            .map_err(|_| Error::InvalidCiphertext("not hex encoded".to_string()))?;

        if bytes.len() < HEADER_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(Error::InvalidCiphertext("truncated".to_string()));
        }

        let version = bytes[0];
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion {
                version,
                supported: FORMAT_VERSION.to_string(),
            });
        }

        let backend = CipherBackend::from_wire_id(bytes[1])
            .ok_or_else(|| Error::InvalidCiphertext(format!("unknown backend id {}", bytes[1])))?;
        if backend != self.epoch.backend() {
            return Err(Error::DecryptionFailed(format!(
                "ciphertext backend {} does not match epoch backend {}",
                backend.name(),
                self.epoch.backend().name()
            )));
        }

        let context = FieldContext::new(self.schema.table(), field);
        let key = self.epoch.field_key(&context)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&bytes[HEADER_SIZE..HEADER_SIZE + NONCE_SIZE]);

        let aad = context.to_string();
        let payload =
            Payload { msg: &bytes[HEADER_SIZE + NONCE_SIZE..], aad: aad.as_bytes() };

        // Wipe the intermediate buffer once the owned copy is made
        let plaintext = Zeroizing::new(match backend {
            CipherBackend::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(key.expose_secret())
                    .map_err(|e| Error::DecryptionFailed(format!("invalid field key: {e}")))?;
                cipher
                    .decrypt(&chacha20poly1305::Nonce::from(nonce_bytes), payload)
                    .map_err(|_| Error::AuthenticationFailed)?
            }
            CipherBackend::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(key.expose_secret())
                    .map_err(|e| Error::DecryptionFailed(format!("invalid field key: {e}")))?;
                cipher
                    .decrypt(&nonce_bytes.into(), payload)
                    .map_err(|_| Error::AuthenticationFailed)?
            }
        });

        std::str::from_utf8(&plaintext)
            .map(ToString::to_string)
            .map_err(|_| Error::DecryptionFailed("plaintext is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::KEY_SIZE;
    use crate::row::Value;
    use proptest::prelude::*;
    use secrecy::SecretVec;

    fn epoch_with(byte: u8, backend: CipherBackend) -> KeyEpoch {
        KeyEpoch::new(SecretVec::new(vec![byte; KEY_SIZE]), backend).unwrap()
    }

    fn users_schema() -> TableSchema {
        TableSchema::builder("users")
            .field("email")
            .field("ssn")
            .blind_index("email_bidx", "email")
            .build()
            .unwrap()
    }

    fn plain_row() -> PlainRow {
        let mut plain = PlainRow::new();
        plain.insert("email".to_string(), "alice@example.com".to_string());
        plain.insert("ssn".to_string(), "123-45-6789".to_string());
        plain
    }

    #[test]
    fn test_row_round_trip() {
        let schema = users_schema();
        let epoch = epoch_with(1, CipherBackend::default());
        let codec = RowCodec::new(&schema, &epoch);

        let (ciphertext, _) = codec.encrypt_row(&plain_row()).expect("encryption failed");

        let mut stored = StoredRow::new();
        for (column, value) in &ciphertext {
            stored.insert(column.clone(), Value::Text(value.clone()));
        }

        let decrypted = codec.decrypt_row(&stored).expect("decryption failed");
        assert_eq!(decrypted, plain_row());
    }

    #[test]
    fn test_row_round_trip_aes_gcm() {
        let schema = users_schema();
        let epoch = epoch_with(1, CipherBackend::Aes256Gcm);
        let codec = RowCodec::new(&schema, &epoch);

        let ciphertext = codec.encrypt_field("email", "alice@example.com").unwrap();
        let decrypted = codec.decrypt_field("email", &ciphertext).unwrap();
        assert_eq!(decrypted, "alice@example.com");
    }

    #[test]
    fn test_ciphertext_is_randomized() {
        let schema = users_schema();
        let epoch = epoch_with(1, CipherBackend::default());
        let codec = RowCodec::new(&schema, &epoch);

        let ct1 = codec.encrypt_field("email", "alice@example.com").unwrap();
        let ct2 = codec.encrypt_field("email", "alice@example.com").unwrap();

        assert_ne!(ct1, ct2, "AEAD encryption must use a fresh nonce per call");
    }

    #[test]
    fn test_blind_indexes_are_deterministic() {
        let schema = users_schema();
        let epoch = epoch_with(1, CipherBackend::default());
        let codec = RowCodec::new(&schema, &epoch);

        let (_, idx1) = codec.encrypt_row(&plain_row()).unwrap();
        let (_, idx2) = codec.encrypt_row(&plain_row()).unwrap();

        assert_eq!(idx1, idx2, "blind indexes must not vary between encryptions");
        assert!(idx1.contains_key("email_bidx"));
    }

    #[test]
    fn test_key_isolation() {
        let schema = users_schema();
        let epoch_a = epoch_with(1, CipherBackend::default());
        let epoch_b = epoch_with(2, CipherBackend::default());

        let ciphertext =
            RowCodec::new(&schema, &epoch_a).encrypt_field("email", "alice@example.com").unwrap();
        let result = RowCodec::new(&schema, &epoch_b).decrypt_field("email", &ciphertext);

        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_column_binding() {
        let schema = users_schema();
        let epoch = epoch_with(1, CipherBackend::default());
        let codec = RowCodec::new(&schema, &epoch);

        // Ciphertext from one column must not decrypt as another.
        let ciphertext = codec.encrypt_field("email", "alice@example.com").unwrap();
        let result = codec.decrypt_field("ssn", &ciphertext);

        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_garbage_is_invalid_ciphertext() {
        let schema = users_schema();
        let epoch = epoch_with(1, CipherBackend::default());
        let codec = RowCodec::new(&schema, &epoch);

        let result = codec.decrypt_field("email", "alice@example.com");
        assert!(matches!(result, Err(Error::InvalidCiphertext(_))));

        let result = codec.decrypt_field("email", "abcd");
        assert!(matches!(result, Err(Error::InvalidCiphertext(_))));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let schema = users_schema();
        let epoch = epoch_with(1, CipherBackend::default());
        let codec = RowCodec::new(&schema, &epoch);

        let ciphertext = codec.encrypt_field("email", "alice@example.com").unwrap();
        let mut bytes = hex::decode(&ciphertext).unwrap();
        bytes[0] = 9;

        let result = codec.decrypt_field("email", &hex::encode(bytes));
        assert!(matches!(result, Err(Error::UnsupportedVersion { version: 9, .. })));
    }

    #[test]
    fn test_backend_disagreement_is_decrypt_failure() {
        let schema = users_schema();
        let chacha = epoch_with(1, CipherBackend::ChaCha20Poly1305);
        let gcm = epoch_with(1, CipherBackend::Aes256Gcm);

        let ciphertext =
            RowCodec::new(&schema, &chacha).encrypt_field("email", "alice@example.com").unwrap();
        let result = RowCodec::new(&schema, &gcm).decrypt_field("email", &ciphertext);

        match result {
            Err(err) => assert!(err.is_decrypt_failure()),
            Ok(_) => panic!("decryption under the wrong backend must fail"),
        }
    }

    #[test]
    fn test_null_columns_are_skipped() {
        let schema = users_schema();
        let epoch = epoch_with(1, CipherBackend::default());
        let codec = RowCodec::new(&schema, &epoch);

        let mut stored = StoredRow::new();
        stored.insert("email".to_string(), Value::Null);

        let plain = codec.decrypt_row(&stored).expect("null columns must not fail");
        assert!(plain.is_empty());
    }

    #[test]
    fn test_absent_fields_are_skipped_on_encrypt() {
        let schema = users_schema();
        let epoch = epoch_with(1, CipherBackend::default());
        let codec = RowCodec::new(&schema, &epoch);

        let mut plain = PlainRow::new();
        plain.insert("ssn".to_string(), "123-45-6789".to_string());

        let (ciphertext, indexes) = codec.encrypt_row(&plain).unwrap();
        assert!(!ciphertext.contains_key("email"));
        assert!(ciphertext.contains_key("ssn"));
        // The email index has no source value, so it is absent too.
        assert!(indexes.is_empty());
    }

    proptest! {
        #[test]
        fn prop_field_round_trip(plaintext in ".{0,200}") {
            let schema = users_schema();
            let epoch = epoch_with(3, CipherBackend::default());
            let codec = RowCodec::new(&schema, &epoch);

            let ciphertext = codec.encrypt_field("email", &plaintext).unwrap();
            let decrypted = codec.decrypt_field("email", &ciphertext).unwrap();
            prop_assert_eq!(decrypted, plaintext);
        }
    }
}
