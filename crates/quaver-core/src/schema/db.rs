use rusqlite::{Connection, Transaction};
use std::path::Path;

use crate::error::Result;

use super::migrations::MIGRATIONS;

/// The single-writer database handle.
///
/// Opens in WAL mode: one writer, many readers, and every multi-statement
/// update in the engine runs inside one of its transactions — this is the
/// system's only coordination mechanism.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database at the given path and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        run_pragma(&conn, "PRAGMA journal_mode = WAL")?;
        // safe with WAL
        run_pragma(&conn, "PRAGMA synchronous = NORMAL")?;
        run_pragma(&conn, "PRAGMA temp_store = MEMORY")?;
        let db = Self { conn };
        db.apply_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.apply_migrations()?;
        Ok(db)
    }

    /// The underlying connection, for queries not covered by the helpers.
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction. Commit is explicit; drop rolls back.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Flush and close: checkpoint the WAL, refresh planner statistics,
    /// and drop back to DELETE journaling so no `-wal` file lingers.
    pub fn close(self) -> Result<()> {
        run_pragma(&self.conn, "PRAGMA wal_checkpoint(TRUNCATE)")?;
        run_pragma(&self.conn, "PRAGMA analysis_limit = 400")?;
        run_pragma(&self.conn, "PRAGMA optimize")?;
        run_pragma(&self.conn, "PRAGMA journal_mode = DELETE")?;
        self.conn.close().map_err(|(_, e)| e)?;
        log::info!("db: closed");
        Ok(())
    }

    fn apply_migrations(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let mut stmt = self
            .conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let applied: Vec<u32> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for migration in MIGRATIONS {
            if !applied.contains(&migration.version) {
                log::info!(
                    "Applying migration {} ({})",
                    migration.version,
                    migration.name
                );
                self.conn.execute_batch(migration.sql)?;
                self.conn.execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                    rusqlite::params![migration.version, migration.name],
                )?;
            }
        }

        Ok(())
    }
}

/// Run a pragma, draining any rows it reports (journal_mode and
/// wal_checkpoint answer with one).
fn run_pragma(conn: &Connection, sql: &str) -> Result<()> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    while rows.next()?.is_some() {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_once() {
        let db = Database::open_in_memory().unwrap();
        let count: u32 = db
            .conn()
            .query_row("SELECT count(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, MIGRATIONS.len());
    }

    #[test]
    fn open_on_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quaver.db");
        {
            let db = Database::open(&path).unwrap();
            db.conn()
                .execute("INSERT INTO track (id) VALUES (1)", [])
                .unwrap();
            db.close().unwrap();
        }
        let db = Database::open(&path).unwrap();
        let n: u32 = db
            .conn()
            .query_row("SELECT count(*) FROM track", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }
}
