//! SQLite-based export storage

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{EntityKey, EntityKind, ExportStore};
use crate::models::{Base, Record, RecordKey, ScanId, Workspace};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE workspaces (
                id TEXT PRIMARY KEY,
                owners TEXT NOT NULL DEFAULT '',
                created_time TEXT NOT NULL,
                name TEXT NOT NULL
            );

            CREATE TABLE bases (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_time TEXT NOT NULL,
                scan_time TEXT,
                scan_id TEXT
            );

            CREATE INDEX idx_bases_scan_id ON bases(scan_id);

            -- Latest observed value of every record
            CREATE TABLE data (
                base_id TEXT NOT NULL,
                table_id TEXT NOT NULL,
                record_id TEXT NOT NULL,
                data TEXT NOT NULL,
                created_time TEXT NOT NULL,
                scan_id TEXT NOT NULL,
                PRIMARY KEY (base_id, table_id, record_id),
                FOREIGN KEY (base_id) REFERENCES bases(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_data_scan_id ON data(scan_id);
            "#,
        ),
    ])
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in store: {value:?}"))
}

/// Raw base row before timestamp parsing
struct BaseRow {
    id: String,
    workspace_id: String,
    name: String,
    created_time: String,
    scan_time: Option<String>,
    scan_id: Option<String>,
}

impl BaseRow {
    const COLUMNS: &'static str = "id, workspace_id, name, created_time, scan_time, scan_id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            name: row.get(2)?,
            created_time: row.get(3)?,
            scan_time: row.get(4)?,
            scan_id: row.get(5)?,
        })
    }

    fn into_base(self) -> Result<Base> {
        Ok(Base {
            id: self.id,
            workspace_id: self.workspace_id,
            name: self.name,
            created_time: parse_time(&self.created_time)?,
            scan_time: self.scan_time.as_deref().map(parse_time).transpose()?,
            scan_id: self.scan_id.map(ScanId::new),
        })
    }
}

/// Raw record row before payload and timestamp parsing
struct RecordRow {
    base_id: String,
    table_id: String,
    record_id: String,
    data: String,
    created_time: String,
    scan_id: String,
}

impl RecordRow {
    const COLUMNS: &'static str = "base_id, table_id, record_id, data, created_time, scan_id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            base_id: row.get(0)?,
            table_id: row.get(1)?,
            record_id: row.get(2)?,
            data: row.get(3)?,
            created_time: row.get(4)?,
            scan_id: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<Record> {
        let data = serde_json::from_str(&self.data)
            .with_context(|| format!("Invalid payload for record {}", self.record_id))?;
        Ok(Record {
            key: RecordKey::new(self.base_id, self.table_id, self.record_id),
            data,
            created_time: parse_time(&self.created_time)?,
            scan_id: ScanId::new(self.scan_id),
        })
    }
}

/// SQLite-based export storage
pub struct SqliteExportStore {
    conn: Mutex<Connection>,
}

impl SqliteExportStore {
    /// Open (or create) a store at the given path and bring the schema up to date
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// In-memory SQLite database, mainly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL keeps readers unblocked while the scan writes.
        // foreign_keys is required for the bases -> data cascade.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_bases(&self, sql: &str, scan_id: Option<&ScanId>) -> Result<Vec<Base>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = match scan_id {
            Some(scan_id) => stmt
                .query_map([scan_id.as_str()], BaseRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], BaseRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        rows.into_iter().map(BaseRow::into_base).collect()
    }
}

impl ExportStore for SqliteExportStore {
    fn upsert_workspace(&self, workspace: Workspace) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO workspaces (id, owners, created_time, name)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                owners = excluded.owners,
                created_time = excluded.created_time,
                name = excluded.name",
            params![
                workspace.id,
                workspace.owners,
                workspace.created_time.to_rfc3339(),
                workspace.name,
            ],
        )?;
        Ok(())
    }

    fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT id, owners, created_time, name FROM workspaces WHERE id = ?",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        row.map(|(id, owners, created_time, name)| -> Result<Workspace> {
            Ok(Workspace::new(id, name, parse_time(&created_time)?, owners))
        })
        .transpose()
    }

    fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, owners, created_time, name FROM workspaces ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, owners, created_time, name)| -> Result<Workspace> {
                Ok(Workspace::new(id, name, parse_time(&created_time)?, owners))
            })
            .collect()
    }

    fn upsert_base(&self, base: Base) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        // ON CONFLICT DO UPDATE rather than INSERT OR REPLACE: a replace
        // deletes the old row first, which would cascade to its records.
        conn.execute(
            "INSERT INTO bases (id, workspace_id, name, created_time, scan_time, scan_id)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                workspace_id = excluded.workspace_id,
                name = excluded.name,
                created_time = excluded.created_time,
                scan_time = COALESCE(excluded.scan_time, bases.scan_time),
                scan_id = COALESCE(excluded.scan_id, bases.scan_id)",
            params![
                base.id,
                base.workspace_id,
                base.name,
                base.created_time.to_rfc3339(),
                base.scan_time.map(|t| t.to_rfc3339()),
                base.scan_id.as_ref().map(ScanId::as_str),
            ],
        )?;
        Ok(())
    }

    fn get_base(&self, id: &str) -> Result<Option<Base>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM bases WHERE id = ?", BaseRow::COLUMNS),
                [id],
                BaseRow::from_row,
            )
            .optional()?;
        row.map(BaseRow::into_base).transpose()
    }

    fn list_bases(&self) -> Result<Vec<Base>> {
        self.query_bases(
            &format!("SELECT {} FROM bases ORDER BY rowid", BaseRow::COLUMNS),
            None,
        )
    }

    fn list_bases_pending(&self, scan_id: &ScanId) -> Result<Vec<Base>> {
        self.query_bases(
            &format!(
                "SELECT {} FROM bases WHERE scan_id IS NULL OR scan_id != ? ORDER BY rowid",
                BaseRow::COLUMNS
            ),
            Some(scan_id),
        )
    }

    fn mark_base_scanned(&self, base_id: &str, scan_id: &ScanId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE bases SET scan_time = ?, scan_id = ? WHERE id = ?",
            params![at.to_rfc3339(), scan_id.as_str(), base_id],
        )?;
        if updated == 0 {
            bail!("Cannot mark unknown base {base_id} as scanned");
        }
        Ok(())
    }

    fn upsert_record(&self, record: Record) -> Result<()> {
        let payload =
            serde_json::to_string(&record.data).context("Failed to serialize record payload")?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO data (base_id, table_id, record_id, data, created_time, scan_id)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(base_id, table_id, record_id) DO UPDATE SET
                data = excluded.data,
                created_time = excluded.created_time,
                scan_id = excluded.scan_id",
            params![
                record.key.base_id,
                record.key.table_id,
                record.key.record_id,
                payload,
                record.created_time.to_rfc3339(),
                record.scan_id.as_str(),
            ],
        )
        .with_context(|| {
            format!(
                "Failed to write record {}/{}/{}",
                record.key.base_id, record.key.table_id, record.key.record_id
            )
        })?;
        Ok(())
    }

    fn get_record(&self, key: &RecordKey) -> Result<Option<Record>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM data WHERE base_id = ? AND table_id = ? AND record_id = ?",
                    RecordRow::COLUMNS
                ),
                params![key.base_id, key.table_id, key.record_id],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::into_record).transpose()
    }

    fn list_records_for_base(&self, base_id: &str) -> Result<Vec<Record>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM data WHERE base_id = ? ORDER BY table_id, record_id",
            RecordRow::COLUMNS
        ))?;
        let rows = stmt
            .query_map([base_id], RecordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    fn count_records(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM data", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn stale_keys(&self, kind: EntityKind, scan_id: &ScanId) -> Result<Vec<EntityKey>> {
        let conn = self.conn.lock().unwrap();
        let keys = match kind {
            EntityKind::Base => {
                let mut stmt = conn.prepare(
                    "SELECT id FROM bases WHERE scan_id IS NULL OR scan_id != ? ORDER BY rowid",
                )?;
                stmt.query_map([scan_id.as_str()], |row| {
                    Ok(EntityKey::Base(row.get(0)?))
                })?
                .collect::<Result<Vec<_>, _>>()?
            }
            EntityKind::Record => {
                let mut stmt = conn.prepare(
                    "SELECT base_id, table_id, record_id FROM data
                     WHERE scan_id IS NULL OR scan_id != ?
                     ORDER BY base_id, table_id, record_id",
                )?;
                stmt.query_map([scan_id.as_str()], |row| {
                    Ok(EntityKey::Record(RecordKey::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    )))
                })?
                .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(keys)
    }

    fn delete_entity(&self, key: &EntityKey) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = match key {
            EntityKey::Base(id) => conn.execute("DELETE FROM bases WHERE id = ?", [id])?,
            EntityKey::Record(key) => conn.execute(
                "DELETE FROM data WHERE base_id = ? AND table_id = ? AND record_id = ?",
                params![key.base_id, key.table_id, key.record_id],
            )?,
        };
        Ok(deleted > 0)
    }
}
