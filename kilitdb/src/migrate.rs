//! Batch migration loop: walks a table in stable order and rotates every
//! row from the old key epoch to the new one.
//!
//! Single-threaded and synchronous by design. Each row's persistence is
//! one transaction, so concurrent readers see a row either fully on the
//! old key or fully on the new key, never torn. The loop holds no state
//! across rows beyond its counters; a run that aborts mid-way can simply
//! be restarted, because the evaluator skips rows already migrated.

use crate::codec::RowCodec;
use crate::entity::EntityDescriptor;
use crate::epoch::KeyEpoch;
use crate::error::Error;
use crate::rotate::{RotationOutcome, RowRotator};
use crate::store::{RowStore, SortDirection};
use tracing::{debug, info, warn};

/// Counters reported after a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationReport {
    /// Rows seen by the loop (after the non-authoritative count).
    pub total: u64,
    /// Rows actually changed, fallback rows included.
    pub migrated: u64,
    /// Subset of `migrated` that went through the raw-value fallback.
    pub fallback: u64,
    /// Rows already on the new key.
    pub unchanged: u64,
}

/// Progress snapshot passed to the caller's progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationProgress {
    /// Rows processed so far.
    pub processed: u64,
    /// Row count taken at the start of the run. Progress-reporting only;
    /// may drift if the table is mutated concurrently.
    pub total: u64,
}

/// One rotation run for one entity type.
///
/// # Example
///
/// ```no_run
/// use kilitdb::entity::EntityDescriptor;
/// use kilitdb::epoch::{CipherBackend, KeyEpoch};
/// use kilitdb::migrate::BatchRotation;
/// use kilitdb::schema::TableSchema;
/// use kilitdb::store::{SortDirection, SqliteStore};
///
/// let schema = TableSchema::builder("users")
///     .field("email")
///     .blind_index("email_bidx", "email")
///     .build()?;
/// let entity = EntityDescriptor::new(schema, "id", "users")?;
///
/// let old = KeyEpoch::from_hex(&"11".repeat(32), CipherBackend::default())?;
/// let new = KeyEpoch::from_hex(&"22".repeat(32), CipherBackend::default())?;
///
/// let mut store = SqliteStore::open("app.db")?;
/// let report = BatchRotation::new(&entity, &old, &new, SortDirection::Ascending)
///     .run(&mut store)?;
/// println!("updated {} rows", report.migrated);
/// # Ok::<(), kilitdb::error::Error>(())
/// ```
pub struct BatchRotation<'a> {
    entity: &'a EntityDescriptor,
    old_epoch: &'a KeyEpoch,
    new_epoch: &'a KeyEpoch,
    direction: SortDirection,
}

impl<'a> BatchRotation<'a> {
    /// Configures a rotation run.
    #[must_use]
    pub const fn new(
        entity: &'a EntityDescriptor,
        old_epoch: &'a KeyEpoch,
        new_epoch: &'a KeyEpoch,
        direction: SortDirection,
    ) -> Self {
        Self { entity, old_epoch, new_epoch, direction }
    }

    /// Runs the rotation to completion.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: epoch backend mismatch, a row whose
    /// fallback also failed, or a persistence failure. Rows persisted
    /// before the error stay migrated.
    pub fn run<S: RowStore>(&self, store: &mut S) -> Result<RotationReport, Error> {
        self.run_with_progress(store, |_| {})
    }

    /// Runs the rotation, invoking `progress` after every processed row.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub fn run_with_progress<S: RowStore>(
        &self,
        store: &mut S,
        mut progress: impl FnMut(RotationProgress),
    ) -> Result<RotationReport, Error> {
        let schema = self.entity.schema();
        let table = schema.table();
        let key_column = self.entity.key_column();
        let discriminator = self.entity.discriminator();

        // Codecs are built once and reused for every row.
        let old_codec = RowCodec::new(schema, self.old_epoch);
        let new_codec = RowCodec::new(schema, self.new_epoch);
        let rotator = RowRotator::new(&old_codec, &new_codec)?;

        let total = store.count_rows(table)?;
        info!(table, total, direction = self.direction.as_sql(), "starting key rotation");

        let ids = store.row_ids(table, key_column, self.direction)?;

        let mut report = RotationReport::default();
        for id in &ids {
            // Read fresh: the id scan may predate concurrent changes.
            let Some(row) = store.fetch_row(table, key_column, id)? else {
                debug!(table, ?id, "row deleted since scan, skipping");
                continue;
            };
            report.total += 1;

            let stored_indexes = store.stored_indexes(discriminator, id)?;

            if !rotator.needs_re_encrypt(&row, &stored_indexes) {
                report.unchanged += 1;
                progress(RotationProgress { processed: report.total, total });
                continue;
            }

            let (columns, indexes, outcome) = match rotator.prepare_for_update(&row) {
                Ok((columns, indexes)) => (columns, indexes, RotationOutcome::Migrated),
                Err(err) if err.is_decrypt_failure() => {
                    warn!(table, ?id, error = %err, "old ciphertext unreadable, re-encrypting raw values");
                    let (columns, indexes) = rotator.prepare_from_raw(&row)?;
                    (columns, indexes, RotationOutcome::MigratedViaFallback)
                }
                Err(err) => return Err(err),
            };

            // Nothing to write: every encrypted column is NULL or absent.
            // Counted as unchanged even when stale index entries exist, so
            // such rows cannot show up as migrated on every run.
            if columns.is_empty() && indexes.is_empty() {
                report.unchanged += 1;
                progress(RotationProgress { processed: report.total, total });
                continue;
            }

            store.persist_rotation(table, key_column, id, &columns, discriminator, &indexes)?;

            report.migrated += 1;
            if outcome == RotationOutcome::MigratedViaFallback {
                report.fallback += 1;
            }
            debug!(table, ?id, ?outcome, "row rotated");
            progress(RotationProgress { processed: report.total, total });
        }

        info!(
            table,
            migrated = report.migrated,
            fallback = report.fallback,
            unchanged = report.unchanged,
            "key rotation finished"
        );
        Ok(report)
    }
}
