//! # `KilitDB`
//!
//! Key rotation engine for searchable field-level encryption.
//!
//! Tables protected this way store AEAD ciphertext in their sensitive
//! columns plus deterministic blind index values in a side table, so
//! equality queries work without decryption. When the master key changes,
//! every row's ciphertext and blind indexes must be recomputed under the
//! new key. `KilitDB` walks the table in stable primary-key order, skips
//! rows already on the new key, converts the rest (with a raw-value
//! fallback for unreadable ciphertext), and persists each row atomically.
//!
//! ## Features
//!
//! - AEAD field encryption (ChaCha20-Poly1305, AES-256-GCM)
//! - Deterministic blind indexes for equality search
//! - Dual-epoch row rotation with idempotent re-runs
//! - Per-row transactional persistence over SQLite
//! - Raw-value fallback for corrupt or never-encrypted rows
//!
//! ## Example
//!
//! ```rust,ignore
//! use kilitdb::prelude::*;
//!
//! let entity = EntityDescriptor::of::<User>()?;
//! let old = KeyEpoch::from_hex(&old_key_hex, CipherBackend::default())?;
//! let new = KeyEpoch::from_hex(&new_key_hex, CipherBackend::default())?;
//!
//! let mut store = SqliteStore::open("app.db")?;
//! let report = BatchRotation::new(&entity, &old, &new, SortDirection::Ascending)
//!     .run(&mut store)?;
//! println!("updated {} rows", report.migrated);
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod blind_index;
pub mod codec;
pub mod context;
pub mod entity;
pub mod epoch;
pub mod error;
pub mod migrate;
pub mod rotate;
pub mod row;
pub mod schema;
pub mod store;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::codec::RowCodec;
    pub use crate::entity::{EncryptedEntity, EntityDescriptor};
    pub use crate::epoch::{CipherBackend, KeyEpoch};
    pub use crate::error::Error;
    pub use crate::migrate::{BatchRotation, RotationProgress, RotationReport};
    pub use crate::rotate::{RotationOutcome, RowRotator};
    pub use crate::schema::TableSchema;
    pub use crate::store::{RowStore, SortDirection, SqliteStore};
}
