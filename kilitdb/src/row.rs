//! Row value model shared by the codec and the storage layer.
//!
//! Rows travel through the rotation pipeline as plain maps so the codec
//! never depends on a particular storage engine. A [`StoredRow`] is read
//! fresh from storage for each iteration of the batch loop and dropped as
//! soon as its outcome is persisted.

use std::collections::BTreeMap;

/// A raw stored scalar, mirroring the SQLite storage classes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Real(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Blob(Vec<u8>),
}

impl Value {
    /// Renders the value as plaintext for encryption.
    ///
    /// Used when reading a field that is stored unencrypted (or whose
    /// ciphertext is unreadable and is being recovered as-is): the string
    /// form is what gets encrypted under the new epoch. `Null` and
    /// non-UTF-8 blobs yield `None` and the field is treated as absent.
    #[must_use]
    pub fn as_plaintext(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Integer(i) => Some(i.to_string()),
            Self::Real(r) => Some(r.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::Blob(b) => String::from_utf8(b.clone()).ok(),
        }
    }

    /// Returns the text content, if this value is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

/// A full row as read from storage: column name to raw value.
pub type StoredRow = BTreeMap<String, Value>;

/// Decrypted values of the encrypted fields: field name to plaintext.
pub type PlainRow = BTreeMap<String, String>;

/// Encrypted column values ready to persist: column name to encoded ciphertext.
pub type CiphertextRow = BTreeMap<String, String>;

/// Blind index values for one row: index name to hex-encoded index value.
pub type BlindIndexMap = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_has_no_plaintext() {
        assert_eq!(Value::Null.as_plaintext(), None);
    }

    #[test]
    fn test_scalars_render_as_plaintext() {
        assert_eq!(Value::Integer(42).as_plaintext(), Some("42".to_string()));
        assert_eq!(Value::Text("alice".to_string()).as_plaintext(), Some("alice".to_string()));
        assert_eq!(Value::Blob(b"raw".to_vec()).as_plaintext(), Some("raw".to_string()));
    }

    #[test]
    fn test_invalid_utf8_blob_is_absent() {
        assert_eq!(Value::Blob(vec![0xFF, 0xFE]).as_plaintext(), None);
    }

    #[test]
    fn test_as_text() {
        assert_eq!(Value::Text("x".to_string()).as_text(), Some("x"));
        assert_eq!(Value::Integer(1).as_text(), None);
    }
}
