//! The encrypted-entity capability contract.
//!
//! An entity type that wants its rows rotated must expose its schema, key
//! column, and blind-index discriminator. The contract is an explicit trait
//! checked at compile time; the [`EntityDescriptor`] value form exists for
//! callers (such as the CLI) that assemble entities from configuration at
//! runtime.

use crate::error::Error;
use crate::schema::{SchemaBuilder, TableSchema};

/// Capability contract for a type whose table holds encrypted rows.
///
/// # Example
///
/// ```
/// use kilitdb::entity::EncryptedEntity;
/// use kilitdb::error::Error;
/// use kilitdb::schema::{SchemaBuilder, TableSchema};
///
/// struct User;
///
/// impl EncryptedEntity for User {
///     fn table() -> &'static str {
///         "users"
///     }
///
///     fn key_column() -> &'static str {
///         "id"
///     }
///
///     fn discriminator() -> &'static str {
///         "users"
///     }
///
///     fn configure_schema(builder: SchemaBuilder) -> Result<TableSchema, Error> {
///         builder.field("email").blind_index("email_bidx", "email").build()
///     }
/// }
/// ```
pub trait EncryptedEntity {
    /// Table holding the entity's rows.
    fn table() -> &'static str;

    /// Primary key column used for stable traversal and row updates.
    fn key_column() -> &'static str;

    /// Type discriminator stored as `indexable_type` in blind index entries.
    fn discriminator() -> &'static str;

    /// Registers the entity's encrypted fields and blind indexes.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` if the definition is inconsistent.
    fn configure_schema(builder: SchemaBuilder) -> Result<TableSchema, Error>;
}

/// Runtime value of the encrypted-entity capability.
///
/// Validated once at construction so the batch loop can fail fast before
/// touching any rows.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    schema: TableSchema,
    key_column: String,
    discriminator: String,
}

impl EntityDescriptor {
    /// Builds and validates a descriptor from its parts.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidEntity` if the key column is empty, the key
    /// column is itself declared encrypted, or the schema declares no
    /// encrypted fields.
    pub fn new(
        schema: TableSchema,
        key_column: impl Into<String>,
        discriminator: impl Into<String>,
    ) -> Result<Self, Error> {
        let key_column = key_column.into();
        let discriminator = discriminator.into();

        if key_column.is_empty() {
            return Err(Error::InvalidEntity("key column must not be empty".to_string()));
        }
        if schema.is_encrypted(&key_column) {
            return Err(Error::InvalidEntity(format!(
                "key column {key_column} must not be an encrypted field"
            )));
        }
        if schema.encrypted_fields().is_empty() {
            return Err(Error::InvalidEntity(format!(
                "entity for table {} declares no encrypted fields",
                schema.table()
            )));
        }
        if discriminator.is_empty() {
            return Err(Error::InvalidEntity("discriminator must not be empty".to_string()));
        }

        Ok(Self { schema, key_column, discriminator })
    }

    /// Builds a descriptor from an [`EncryptedEntity`] implementation.
    ///
    /// # Errors
    ///
    /// Propagates schema configuration errors and descriptor validation.
    pub fn of<E: EncryptedEntity>() -> Result<Self, Error> {
        let schema = E::configure_schema(TableSchema::builder(E::table()))?;
        Self::new(schema, E::key_column(), E::discriminator())
    }

    /// Returns the table schema.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Returns the primary key column name.
    #[must_use]
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Returns the blind-index type discriminator.
    #[must_use]
    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;

    struct User;

    impl EncryptedEntity for User {
        fn table() -> &'static str {
            "users"
        }

        fn key_column() -> &'static str {
            "id"
        }

        fn discriminator() -> &'static str {
            "users"
        }

        fn configure_schema(builder: SchemaBuilder) -> Result<TableSchema, Error> {
            builder.field("email").blind_index("email_bidx", "email").build()
        }
    }

    #[test]
    fn test_descriptor_from_entity() {
        let descriptor = EntityDescriptor::of::<User>().expect("descriptor should build");
        assert_eq!(descriptor.schema().table(), "users");
        assert_eq!(descriptor.key_column(), "id");
        assert_eq!(descriptor.discriminator(), "users");
    }

    #[test]
    fn test_rejects_empty_key_column() {
        let schema = TableSchema::builder("users").field("email").build().unwrap();
        let result = EntityDescriptor::new(schema, "", "users");
        assert!(matches!(result, Err(Error::InvalidEntity(_))));
    }

    #[test]
    fn test_rejects_encrypted_key_column() {
        let schema = TableSchema::builder("users").field("id").field("email").build().unwrap();
        let result = EntityDescriptor::new(schema, "id", "users");
        assert!(matches!(result, Err(Error::InvalidEntity(_))));
    }

    #[test]
    fn test_rejects_entity_without_encrypted_fields() {
        let schema = TableSchema::builder("users").build().unwrap();
        let result = EntityDescriptor::new(schema, "id", "users");
        assert!(matches!(result, Err(Error::InvalidEntity(_))));
    }

    #[test]
    fn test_rejects_empty_discriminator() {
        let schema = TableSchema::builder("users").field("email").build().unwrap();
        let result = EntityDescriptor::new(schema, "id", "");
        assert!(matches!(result, Err(Error::InvalidEntity(_))));
    }
}
