//! Storage interface for the batch migration loop, with a SQLite
//! implementation.
//!
//! The loop only needs five operations: count rows, scan primary keys in a
//! stable order, fetch one row fresh, read a row's stored blind indexes,
//! and persist one rotation atomically. [`RowStore`] captures exactly
//! that; [`SqliteStore`] implements it over `rusqlite` with one
//! transaction per persisted row, so a crash mid-row can never leave
//! ciphertext and blind index out of sync.

use crate::error::Error;
use crate::row::{BlindIndexMap, CiphertextRow, StoredRow, Value};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ToSql};
use std::path::Path;
use std::str::FromStr;

/// Traversal order over the primary key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Ascending primary key order (default).
    #[default]
    Ascending,
    /// Descending primary key order.
    Descending,
}

impl SortDirection {
    /// SQL rendering of the direction.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Ascending),
            "desc" => Ok(Self::Descending),
            other => Err(Error::InvalidEntity(format!(
                "unknown sort direction: {other} (expected asc or desc)"
            ))),
        }
    }
}

/// Storage operations the batch migration loop depends on.
pub trait RowStore {
    /// Counts the rows of a table. Used for progress reporting only;
    /// staleness against concurrent writers is tolerated.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` on query failure.
    fn count_rows(&self, table: &str) -> Result<u64, Error>;

    /// Returns all primary key values of a table in the given order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` on query failure.
    fn row_ids(
        &self,
        table: &str,
        key_column: &str,
        direction: SortDirection,
    ) -> Result<Vec<Value>, Error>;

    /// Fetches one row by primary key, or `None` if it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` on query failure.
    fn fetch_row(
        &self,
        table: &str,
        key_column: &str,
        id: &Value,
    ) -> Result<Option<StoredRow>, Error>;

    /// Reads the stored blind index values for one row.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` on query failure.
    fn stored_indexes(&self, discriminator: &str, id: &Value) -> Result<BlindIndexMap, Error>;

    /// Persists one rotation atomically: updates exactly the given columns
    /// of the row and upserts each blind index entry keyed by
    /// `(indexable_type, indexable_id, name)`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` on write failure; nothing is partially
    /// applied.
    fn persist_rotation(
        &mut self,
        table: &str,
        key_column: &str,
        id: &Value,
        columns: &CiphertextRow,
        discriminator: &str,
        indexes: &BlindIndexMap,
    ) -> Result<(), Error>;
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<rusqlite::types::Value> for Value {
    fn from(value: rusqlite::types::Value) -> Self {
        match value {
            rusqlite::types::Value::Null => Self::Null,
            rusqlite::types::Value::Integer(i) => Self::Integer(i),
            rusqlite::types::Value::Real(r) => Self::Real(r),
            rusqlite::types::Value::Text(s) => Self::Text(s),
            rusqlite::types::Value::Blob(b) => Self::Blob(b),
        }
    }
}

/// Quotes an identifier for direct inclusion in SQL.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// SQLite-backed [`RowStore`].
///
/// Maintains the `blind_indexes` side table (created on open if missing)
/// with upsert semantics on `(indexable_type, indexable_id, name)`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens a database file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the database cannot be opened or the
    /// blind index table cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory database. Primarily for tests.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` on failure.
    pub fn open_in_memory() -> Result<Self, Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wraps an existing connection.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the blind index table cannot be created.
    pub fn from_connection(conn: Connection) -> Result<Self, Error> {
        let store = Self { conn };
        store.ensure_index_table()?;
        Ok(store)
    }

    /// Returns the underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Creates the `blind_indexes` side table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` on failure.
    pub fn ensure_index_table(&self) -> Result<(), Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blind_indexes (
                indexable_type TEXT NOT NULL,
                indexable_id NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (indexable_type, indexable_id, name)
            )",
        )?;
        Ok(())
    }
}

impl RowStore for SqliteStore {
    fn count_rows(&self, table: &str) -> Result<u64, Error> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count.unsigned_abs())
    }

    fn row_ids(
        &self,
        table: &str,
        key_column: &str,
        direction: SortDirection,
    ) -> Result<Vec<Value>, Error> {
        let key = quote_ident(key_column);
        let sql = format!(
            "SELECT {key} FROM {} ORDER BY {key} {}",
            quote_ident(table),
            direction.as_sql()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, rusqlite::types::Value>(0))?
            .map(|id| id.map(Value::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn fetch_row(
        &self,
        table: &str,
        key_column: &str,
        id: &Value,
    ) -> Result<Option<StoredRow>, Error> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1",
            quote_ident(table),
            quote_ident(key_column)
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();

        let mut rows = stmt.query(params![id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let mut stored = StoredRow::new();
        for (i, column) in columns.iter().enumerate() {
            let value: rusqlite::types::Value = row.get(i)?;
            stored.insert(column.clone(), Value::from(value));
        }
        Ok(Some(stored))
    }

    fn stored_indexes(&self, discriminator: &str, id: &Value) -> Result<BlindIndexMap, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT name, value FROM blind_indexes
             WHERE indexable_type = ?1 AND indexable_id = ?2",
        )?;

        let entries = stmt
            .query_map(params![discriminator, id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<BlindIndexMap, _>>()?;
        Ok(entries)
    }

    fn persist_rotation(
        &mut self,
        table: &str,
        key_column: &str,
        id: &Value,
        columns: &CiphertextRow,
        discriminator: &str,
        indexes: &BlindIndexMap,
    ) -> Result<(), Error> {
        let tx = self.conn.transaction()?;

        if !columns.is_empty() {
            let assignments = columns
                .keys()
                .map(|column| format!("{} = ?", quote_ident(column)))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {assignments} WHERE {} = ?",
                quote_ident(table),
                quote_ident(key_column)
            );

            let mut params: Vec<&dyn ToSql> =
                columns.values().map(|value| value as &dyn ToSql).collect();
            params.push(id);
            tx.execute(&sql, params.as_slice())?;
        }

        for (name, value) in indexes {
            tx.execute(
                "INSERT INTO blind_indexes (indexable_type, indexable_id, name, value)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (indexable_type, indexable_id, name)
                 DO UPDATE SET value = excluded.value",
                params![discriminator, id, name, value],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_users() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("open failed");
        store
            .connection()
            .execute_batch(
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT
                );
                INSERT INTO users (id, name, email) VALUES
                    (1, 'alice', 'alice@example.com'),
                    (2, 'bob', 'bob@example.com'),
                    (3, 'carol', NULL);",
            )
            .expect("seed failed");
        store
    }

    #[test]
    fn test_count_rows() {
        let store = store_with_users();
        assert_eq!(store.count_rows("users").unwrap(), 3);
    }

    #[test]
    fn test_row_ids_ordering() {
        let store = store_with_users();

        let asc = store.row_ids("users", "id", SortDirection::Ascending).unwrap();
        assert_eq!(asc, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);

        let desc = store.row_ids("users", "id", SortDirection::Descending).unwrap();
        assert_eq!(desc, vec![Value::Integer(3), Value::Integer(2), Value::Integer(1)]);
    }

    #[test]
    fn test_fetch_row() {
        let store = store_with_users();

        let row = store.fetch_row("users", "id", &Value::Integer(1)).unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::Text("alice".to_string())));
        assert_eq!(row.get("email"), Some(&Value::Text("alice@example.com".to_string())));

        let row = store.fetch_row("users", "id", &Value::Integer(3)).unwrap().unwrap();
        assert_eq!(row.get("email"), Some(&Value::Null));
    }

    #[test]
    fn test_fetch_missing_row() {
        let store = store_with_users();
        assert!(store.fetch_row("users", "id", &Value::Integer(99)).unwrap().is_none());
    }

    #[test]
    fn test_persist_updates_only_named_columns() {
        let mut store = store_with_users();

        let mut columns = CiphertextRow::new();
        columns.insert("email".to_string(), "deadbeef".to_string());
        store
            .persist_rotation(
                "users",
                "id",
                &Value::Integer(1),
                &columns,
                "users",
                &BlindIndexMap::new(),
            )
            .expect("persist failed");

        let row = store.fetch_row("users", "id", &Value::Integer(1)).unwrap().unwrap();
        assert_eq!(row.get("email"), Some(&Value::Text("deadbeef".to_string())));
        // The unrelated column is untouched.
        assert_eq!(row.get("name"), Some(&Value::Text("alice".to_string())));
    }

    #[test]
    fn test_index_upsert_overwrites() {
        let mut store = store_with_users();

        let mut indexes = BlindIndexMap::new();
        indexes.insert("email_bidx".to_string(), "aa".repeat(16));
        store
            .persist_rotation(
                "users",
                "id",
                &Value::Integer(1),
                &CiphertextRow::new(),
                "users",
                &indexes,
            )
            .unwrap();

        indexes.insert("email_bidx".to_string(), "bb".repeat(16));
        store
            .persist_rotation(
                "users",
                "id",
                &Value::Integer(1),
                &CiphertextRow::new(),
                "users",
                &indexes,
            )
            .unwrap();

        let stored = store.stored_indexes("users", &Value::Integer(1)).unwrap();
        assert_eq!(stored.len(), 1, "upsert must replace, not append");
        assert_eq!(stored.get("email_bidx"), Some(&"bb".repeat(16)));
    }

    #[test]
    fn test_stored_indexes_scoped_by_discriminator() {
        let mut store = store_with_users();

        let mut indexes = BlindIndexMap::new();
        indexes.insert("email_bidx".to_string(), "aa".repeat(16));
        store
            .persist_rotation(
                "users",
                "id",
                &Value::Integer(1),
                &CiphertextRow::new(),
                "users",
                &indexes,
            )
            .unwrap();

        assert!(store.stored_indexes("orders", &Value::Integer(1)).unwrap().is_empty());
        assert!(store.stored_indexes("users", &Value::Integer(2)).unwrap().is_empty());
    }

    #[test]
    fn test_sort_direction_parse() {
        assert_eq!("asc".parse::<SortDirection>().unwrap(), SortDirection::Ascending);
        assert_eq!("desc".parse::<SortDirection>().unwrap(), SortDirection::Descending);
        assert!("sideways".parse::<SortDirection>().is_err());
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
