//! Row rotation: deciding whether a row needs re-encryption and converting
//! it from the old key epoch to the new one.
//!
//! The evaluator is read-only and exists to make repeated runs idempotent:
//! a row that already decrypts under the new epoch and whose stored blind
//! indexes match the new epoch's derivation is left alone. Everything else
//! goes through the rotator, which decrypts under the old epoch and
//! re-encrypts under the new one, with a raw-value fallback for rows whose
//! current representation cannot be decrypted at all (corrupt ciphertext,
//! legacy formats, or never-encrypted plaintext).

use crate::codec::RowCodec;
use crate::error::Error;
use crate::row::{BlindIndexMap, CiphertextRow, PlainRow, StoredRow};

/// Per-row result of the rotation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Row already matches the new epoch; nothing persisted.
    Unchanged,
    /// Row was decrypted under the old epoch and re-encrypted.
    Migrated,
    /// Old ciphertext was unreadable; raw column values were re-encrypted.
    MigratedViaFallback,
}

/// Converts rows from an old key epoch to a new one.
pub struct RowRotator<'a> {
    old: &'a RowCodec<'a>,
    new: &'a RowCodec<'a>,
}

impl<'a> RowRotator<'a> {
    /// Creates a rotator over an old-epoch and a new-epoch codec.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendMismatch` if the two epochs use different
    /// AEAD backends: ciphertext shapes would not be comparable and the
    /// evaluator could not distinguish "wrong key" from "wrong algorithm".
    pub fn new(old: &'a RowCodec<'a>, new: &'a RowCodec<'a>) -> Result<Self, Error> {
        if old.backend() != new.backend() {
            return Err(Error::BackendMismatch {
                old: old.backend().name(),
                new: new.backend().name(),
            });
        }
        Ok(Self { old, new })
    }

    /// Decides whether a row still needs conversion. Read-only.
    ///
    /// A row is up to date when its encrypted columns decrypt under the
    /// *new* epoch and `stored_indexes` equals what the new epoch derives
    /// from that plaintext. Any decrypt failure means the row is not on the
    /// new key yet (old-key, plaintext, or corrupt) and must be rotated;
    /// the rotator's fallback covers the unreadable cases.
    #[must_use]
    pub fn needs_re_encrypt(&self, row: &StoredRow, stored_indexes: &BlindIndexMap) -> bool {
        match self.new.decrypt_row(row) {
            Ok(plain) => match self.new.blind_indexes(&plain) {
                Ok(expected) => expected != *stored_indexes,
                Err(_) => true,
            },
            Err(_) => true,
        }
    }

    /// Converts a row: decrypt under the old epoch, re-encrypt under the new.
    ///
    /// # Errors
    ///
    /// Returns a decrypt-failure error when the old epoch cannot read the
    /// row; the caller is expected to fall back to
    /// [`prepare_from_raw`](Self::prepare_from_raw). Encryption errors are
    /// fatal.
    pub fn prepare_for_update(
        &self,
        row: &StoredRow,
    ) -> Result<(CiphertextRow, BlindIndexMap), Error> {
        let plain = self.old.decrypt_row(row)?;
        self.new.encrypt_row(&plain)
    }

    /// Fallback conversion: encrypt the row's current raw column values.
    ///
    /// Used when the old ciphertext is unreadable. The raw stored value of
    /// each encrypted field is taken as plaintext, which both recovers
    /// never-encrypted rows and guarantees a corrupt row ends up valid and
    /// searchable under the new key instead of being skipped. Whatever
    /// meaning was only present in the unreadable ciphertext is lost; the
    /// caller reports these rows separately.
    ///
    /// # Errors
    ///
    /// Any error here is fatal for the row and must surface to the caller.
    pub fn prepare_from_raw(
        &self,
        row: &StoredRow,
    ) -> Result<(CiphertextRow, BlindIndexMap), Error> {
        let mut plain = PlainRow::new();
        for field in self.new.schema().encrypted_fields() {
            if let Some(value) = row.get(field).and_then(crate::row::Value::as_plaintext) {
                plain.insert(field.clone(), value);
            }
        }
        self.new.encrypt_row(&plain)
    }
}
