//! Error types for `KilitDB` operations.

/// Main error type for `KilitDB` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Entity definition failed capability validation
    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    /// Schema definition was rejected by the builder
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Key material is not valid hex
    #[error("key material is not valid hex: {0}")]
    InvalidKeyEncoding(String),

    /// Key material has the wrong length
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required key length in bytes
        expected: usize,
        /// Length actually supplied
        actual: usize,
    },

    /// Old and new key epochs are configured with different AEAD backends
    #[error("cipher backend mismatch between key epochs: {old} vs {new}")]
    BackendMismatch {
        /// Backend of the old epoch
        old: &'static str,
        /// Backend of the new epoch
        new: &'static str,
    },

    /// Stored value is not parseable as ciphertext (bad encoding, truncated, bad header)
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Ciphertext was produced by an unknown format version
    #[error("unsupported ciphertext version: {version} (supported: {supported})")]
    UnsupportedVersion {
        /// The version found in the ciphertext
        version: u8,
        /// Supported versions
        supported: String,
    },

    /// Authentication tag verification failed (data may be corrupted or tampered)
    #[error("authentication failed: ciphertext may be corrupted or tampered")]
    AuthenticationFailed,

    /// Decryption operation failed
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// Blind index generation failed
    #[error("blind index generation failed: {0}")]
    IndexGenerationFailed(String),

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for the recoverable decrypt-failure family.
    ///
    /// These errors mean a stored value could not be read under a given key
    /// epoch (malformed, truncated, wrong key, wrong algorithm). The row
    /// rotator treats them as a signal to fall back to re-encrypting the
    /// row's raw values rather than aborting the batch.
    #[must_use]
    pub const fn is_decrypt_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCiphertext(_)
                | Self::UnsupportedVersion { .. }
                | Self::AuthenticationFailed
                | Self::DecryptionFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_failure_classification() {
        assert!(Error::AuthenticationFailed.is_decrypt_failure());
        assert!(Error::InvalidCiphertext("truncated".to_string()).is_decrypt_failure());
        assert!(Error::DecryptionFailed("bad".to_string()).is_decrypt_failure());
        assert!(Error::UnsupportedVersion { version: 9, supported: "1".to_string() }
            .is_decrypt_failure());
    }

    #[test]
    fn test_fatal_errors_not_decrypt_failures() {
        assert!(!Error::EncryptionFailed("oops".to_string()).is_decrypt_failure());
        assert!(!Error::KeyDerivation.is_decrypt_failure());
        assert!(!Error::InvalidEntity("missing".to_string()).is_decrypt_failure());
        assert!(!Error::InvalidKeyLength { expected: 32, actual: 16 }.is_decrypt_failure());
        assert!(!Error::InvalidKeyEncoding("odd length".to_string()).is_decrypt_failure());
    }

    #[test]
    fn test_error_messages_name_the_problem() {
        let err = Error::InvalidKeyLength { expected: 32, actual: 16 };
        assert_eq!(err.to_string(), "invalid key length: expected 32 bytes, got 16");

        let err = Error::BackendMismatch { old: "chacha20poly1305", new: "aes-256-gcm" };
        assert!(err.to_string().contains("chacha20poly1305"));
        assert!(err.to_string().contains("aes-256-gcm"));
    }
}
