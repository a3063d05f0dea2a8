//! SQLite side-table holding the authoritative row offset index.
//!
//! Besides `vector_table_row_index`, the catalog reads the collaborator tables that
//! describe each table's data file and columns. Their full schema belongs to the
//! application; only the columns used here are created when missing.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde_json::{Map, Value as JsonValue};

use crate::error::{Result, VtabError};
use crate::types::{ColumnDataType, ColumnInfo, RowLocation};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS vector_table_master_record (
        id                   INTEGER PRIMARY KEY,
        name                 TEXT NOT NULL,
        binary_data_filename TEXT NOT NULL,
        schema_version       INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS vector_table_column_configuration (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        master_record_id INTEGER NOT NULL,
        column_name      TEXT NOT NULL,
        column_order     INTEGER NOT NULL,
        column_type      TEXT NOT NULL,
        is_visible       INTEGER NOT NULL DEFAULT 1,
        data_properties  TEXT
    );

    CREATE TABLE IF NOT EXISTS vector_table_row_index (
        master_record_id  INTEGER NOT NULL,
        logical_row_order INTEGER NOT NULL,
        offset            INTEGER NOT NULL,
        size              INTEGER NOT NULL,
        is_active         INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (master_record_id, logical_row_order)
    );
";

/// One row of the offset index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowIndexEntry {
    pub logical_row_order: i64,
    pub location: RowLocation,
    pub is_active: bool,
}

/// Metadata the application keeps for one vector table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub id: i64,
    pub name: String,
    /// Data file name, relative to the application's data directory.
    pub data_file: String,
    pub schema_version: u32,
    pub columns: Vec<ColumnInfo>,
}

/// Shared handle to the catalog database.
#[derive(Clone)]
pub struct RowIndexCatalog(Arc<Mutex<Connection>>);

impl std::fmt::Debug for RowIndexCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowIndexCatalog").finish_non_exhaustive()
    }
}

impl RowIndexCatalog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self(Arc::new(Mutex::new(conn))))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------------
    // Collaborator tables
    // ---------------------------------------------------------------------

    /// Insert or replace a table's master record and column list.
    pub fn define_table(&self, table: &TableDefinition) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO vector_table_master_record (id, name, binary_data_filename, schema_version)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 binary_data_filename = excluded.binary_data_filename,
                 schema_version = excluded.schema_version",
            params![
                table.id,
                table.name,
                table.data_file,
                i64::from(table.schema_version)
            ],
        )?;
        tx.execute(
            "DELETE FROM vector_table_column_configuration WHERE master_record_id = ?1",
            params![table.id],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO vector_table_column_configuration
                     (master_record_id, column_name, column_order, column_type, is_visible, data_properties)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for column in &table.columns {
                let properties = serde_json::to_string(&column.data_properties)?;
                insert.execute(params![
                    table.id,
                    column.name,
                    column.order,
                    column.data_type.as_str(),
                    column.is_visible,
                    properties
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn table_definition(&self, table_id: i64) -> Result<Option<TableDefinition>> {
        let master = self
            .conn()
            .query_row(
                "SELECT name, binary_data_filename, schema_version
                 FROM vector_table_master_record WHERE id = ?1",
                params![table_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((name, data_file, schema_version)) = master else {
            return Ok(None);
        };
        Ok(Some(TableDefinition {
            id: table_id,
            name,
            data_file,
            schema_version: u32::try_from(schema_version).unwrap_or(0),
            columns: self.columns(table_id)?,
        }))
    }

    /// Columns of a table in physical order.
    pub fn columns(&self, table_id: i64) -> Result<Vec<ColumnInfo>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT column_name, column_order, column_type, is_visible, data_properties
             FROM vector_table_column_configuration
             WHERE master_record_id = ?1 ORDER BY column_order",
        )?;
        let raw = stmt
            .query_map(params![table_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(name, order, type_name, is_visible, properties)| {
                let data_properties = match properties.as_deref() {
                    None | Some("") => Map::new(),
                    Some(text) => match serde_json::from_str::<JsonValue>(text) {
                        Ok(JsonValue::Object(map)) => map,
                        Ok(_) | Err(_) => {
                            tracing::warn!(
                                catalog.table = table_id,
                                catalog.column = %name,
                                "column data properties are not a JSON object; ignoring"
                            );
                            Map::new()
                        }
                    },
                };
                Ok(ColumnInfo {
                    name,
                    order,
                    data_type: ColumnDataType::parse(&type_name),
                    is_visible,
                    data_properties,
                })
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Row index
    // ---------------------------------------------------------------------

    /// Whether the table has any index entries, tombstones included.
    pub fn has_entries(&self, table_id: i64) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM vector_table_row_index WHERE master_record_id = ?1",
            params![table_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn active_count(&self, table_id: i64) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM vector_table_row_index
             WHERE master_record_id = ?1 AND is_active = 1",
            params![table_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Active rows in logical order.
    pub fn active_entries(&self, table_id: i64) -> Result<Vec<RowIndexEntry>> {
        self.query_entries(
            "SELECT logical_row_order, offset, size, is_active FROM vector_table_row_index
             WHERE master_record_id = ?1 AND is_active = 1 ORDER BY logical_row_order",
            table_id,
        )
    }

    /// Every entry, tombstones included, in logical order.
    pub fn all_entries(&self, table_id: i64) -> Result<Vec<RowIndexEntry>> {
        self.query_entries(
            "SELECT logical_row_order, offset, size, is_active FROM vector_table_row_index
             WHERE master_record_id = ?1 ORDER BY logical_row_order",
            table_id,
        )
    }

    pub fn active_locations(&self, table_id: i64) -> Result<Vec<RowLocation>> {
        Ok(self
            .active_entries(table_id)?
            .into_iter()
            .map(|entry| entry.location)
            .collect())
    }

    /// Entry of the active row at `position` (0-based, logical order).
    pub fn entry_at(&self, table_id: i64, position: u64) -> Result<Option<RowIndexEntry>> {
        let position = i64::try_from(position).unwrap_or(i64::MAX);
        let entry = self
            .conn()
            .query_row(
                "SELECT logical_row_order, offset, size, is_active FROM vector_table_row_index
                 WHERE master_record_id = ?1 AND is_active = 1
                 ORDER BY logical_row_order LIMIT 1 OFFSET ?2",
                params![table_id, position],
                map_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Replace every entry of the table with `locations` numbered from zero.
    pub fn replace_entries(&self, table_id: i64, locations: &[RowLocation]) -> Result<()> {
        self.replace_entries_then(table_id, locations, || Ok(()))
    }

    /// Like `replace_entries`, but runs `before_commit` inside the transaction and rolls
    /// the index back if it fails. Used to tie a file swap to the index swap.
    pub fn replace_entries_then<F>(
        &self,
        table_id: i64,
        locations: &[RowLocation],
        before_commit: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM vector_table_row_index WHERE master_record_id = ?1",
            params![table_id],
        )?;
        insert_entries(&tx, table_id, 0, locations)?;
        before_commit()?;
        tx.commit()?;
        Ok(())
    }

    /// Add entries after the current last logical row.
    pub fn append_entries(&self, table_id: i64, locations: &[RowLocation]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(logical_row_order) + 1, 0) FROM vector_table_row_index
             WHERE master_record_id = ?1",
            params![table_id],
            |row| row.get(0),
        )?;
        insert_entries(&tx, table_id, next, locations)?;
        tx.commit()?;
        Ok(())
    }

    /// Point rows at new locations after append-relocate updates.
    pub fn relocate(&self, table_id: i64, moves: &[(i64, RowLocation)]) -> Result<()> {
        if moves.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut update = tx.prepare(
                "UPDATE vector_table_row_index SET offset = ?3, size = ?4
                 WHERE master_record_id = ?1 AND logical_row_order = ?2",
            )?;
            for (order, location) in moves {
                let changed = update.execute(params![
                    table_id,
                    order,
                    offset_param(location.offset),
                    i64::from(location.size)
                ])?;
                if changed != 1 {
                    return Err(VtabError::Corruption {
                        offset: location.offset,
                        reason: format!("index entry for logical row {order} vanished"),
                    });
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Tombstone the given logical rows; returns how many were active before.
    pub fn deactivate(&self, table_id: i64, orders: &[i64]) -> Result<u64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut changed = 0u64;
        {
            let mut update = tx.prepare(
                "UPDATE vector_table_row_index SET is_active = 0
                 WHERE master_record_id = ?1 AND logical_row_order = ?2 AND is_active = 1",
            )?;
            for order in orders {
                changed += update.execute(params![table_id, order])? as u64;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Remove every index entry of a dropped table.
    pub fn drop_entries(&self, table_id: i64) -> Result<()> {
        self.conn().execute(
            "DELETE FROM vector_table_row_index WHERE master_record_id = ?1",
            params![table_id],
        )?;
        Ok(())
    }

    fn query_entries(&self, sql: &str, table_id: i64) -> Result<Vec<RowIndexEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let entries = stmt
            .query_map(params![table_id], map_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

fn map_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowIndexEntry> {
    Ok(RowIndexEntry {
        logical_row_order: row.get(0)?,
        location: RowLocation {
            offset: row.get::<_, i64>(1)?.max(0) as u64,
            size: u32::try_from(row.get::<_, i64>(2)?).unwrap_or(u32::MAX),
        },
        is_active: row.get(3)?,
    })
}

fn insert_entries(
    tx: &Transaction<'_>,
    table_id: i64,
    first_order: i64,
    locations: &[RowLocation],
) -> Result<()> {
    let mut insert = tx.prepare(
        "INSERT INTO vector_table_row_index
             (master_record_id, logical_row_order, offset, size, is_active)
         VALUES (?1, ?2, ?3, ?4, 1)",
    )?;
    for (i, location) in locations.iter().enumerate() {
        insert.execute(params![
            table_id,
            first_order + i as i64,
            offset_param(location.offset),
            i64::from(location.size)
        ])?;
    }
    Ok(())
}

fn offset_param(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}
