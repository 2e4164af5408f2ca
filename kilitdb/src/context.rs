//! Context types for field encryption and blind index derivation.
//!
//! Contexts provide domain separation: they feed the HKDF `info` input when
//! deriving per-column keys and double as AEAD associated data, so a
//! ciphertext moved to another column (or an index value renamed) fails
//! authentication instead of decrypting silently.

use std::fmt;

/// Context for encrypting one field of one table.
///
/// # Example
///
/// ```
/// use kilitdb::context::FieldContext;
///
/// let ctx = FieldContext::new("users", "email");
/// assert_eq!(ctx.to_string(), "users|email");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldContext {
    table_name: String,
    column_name: String,
}

impl FieldContext {
    /// Creates a new field context.
    ///
    /// # Arguments
    ///
    /// * `table_name` - Database table name
    /// * `column_name` - Database column name
    #[must_use]
    pub fn new(table_name: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self { table_name: table_name.into(), column_name: column_name.into() }
    }

    /// Returns the table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns the column name.
    #[must_use]
    pub fn column_name(&self) -> &str {
        &self.column_name
    }
}

impl fmt::Display for FieldContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.table_name, self.column_name)
    }
}

/// Context for deriving one named blind index of one table.
///
/// Separate from [`FieldContext`] so an index over a column never shares key
/// material with the encryption of that column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexContext {
    table_name: String,
    index_name: String,
}

impl IndexContext {
    /// Creates a new index context.
    #[must_use]
    pub fn new(table_name: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self { table_name: table_name.into(), index_name: index_name.into() }
    }

    /// Returns the table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns the index name.
    #[must_use]
    pub fn index_name(&self) -> &str {
        &self.index_name
    }
}

impl fmt::Display for IndexContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table_name, self.index_name)
    }
}
