//! Schema descriptors: which columns are encrypted and which blind indexes
//! derive from which fields.
//!
//! A [`TableSchema`] is immutable once built; the batch loop and both
//! codecs share one instance per entity type. Schemas are assembled through
//! [`SchemaBuilder`], which rejects inconsistent definitions up front so
//! the rotation loop never has to re-validate per row.

use crate::error::Error;

/// Definition of one blind index: a named, keyed hash derived from the
/// plaintext of one encrypted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlindIndexSpec {
    name: String,
    field: String,
}

impl BlindIndexSpec {
    /// Returns the index name (unique per table, used as the side-table key).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the encrypted field the index derives from.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }
}

/// Immutable per-entity schema: table name, encrypted fields, blind indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    fields: Vec<String>,
    indexes: Vec<BlindIndexSpec>,
}

impl TableSchema {
    /// Starts building a schema for the given table.
    #[must_use]
    pub fn builder(table: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder { table: table.into(), fields: Vec::new(), indexes: Vec::new() }
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the declared encrypted fields, in declaration order.
    ///
    /// Persisting a rotated row updates exactly these columns and no others.
    #[must_use]
    pub fn encrypted_fields(&self) -> &[String] {
        &self.fields
    }

    /// Returns the blind index definitions.
    #[must_use]
    pub fn blind_indexes(&self) -> &[BlindIndexSpec] {
        &self.indexes
    }

    /// Returns whether the named field is declared encrypted.
    #[must_use]
    pub fn is_encrypted(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

/// Builder for [`TableSchema`].
///
/// # Example
///
/// ```
/// use kilitdb::schema::TableSchema;
///
/// let schema = TableSchema::builder("users")
///     .field("email")
///     .field("ssn")
///     .blind_index("email_bidx", "email")
///     .build()?;
/// assert!(schema.is_encrypted("ssn"));
/// # Ok::<(), kilitdb::error::Error>(())
/// ```
#[derive(Debug)]
pub struct SchemaBuilder {
    table: String,
    fields: Vec<String>,
    indexes: Vec<BlindIndexSpec>,
}

impl SchemaBuilder {
    /// Declares an encrypted field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    /// Declares a blind index over an encrypted field.
    #[must_use]
    pub fn blind_index(mut self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.indexes.push(BlindIndexSpec { name: name.into(), field: field.into() });
        self
    }

    /// Validates and freezes the schema.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` for an empty table name, duplicate
    /// field names, duplicate index names, or an index over a field that is
    /// not declared encrypted.
    pub fn build(self) -> Result<TableSchema, Error> {
        if self.table.is_empty() {
            return Err(Error::InvalidSchema("table name must not be empty".to_string()));
        }

        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].contains(field) {
                return Err(Error::InvalidSchema(format!("duplicate field: {field}")));
            }
        }

        for (i, index) in self.indexes.iter().enumerate() {
            if self.indexes[..i].iter().any(|other| other.name == index.name) {
                return Err(Error::InvalidSchema(format!("duplicate index: {}", index.name)));
            }
            if !self.fields.contains(&index.field) {
                return Err(Error::InvalidSchema(format!(
                    "index {} references undeclared field {}",
                    index.name, index.field
                )));
            }
        }

        Ok(TableSchema { table: self.table, fields: self.fields, indexes: self.indexes })
    }
}
