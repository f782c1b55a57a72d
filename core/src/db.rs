use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::CoreError;
use crate::migrations::MIGRATIONS;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A migrated store on disk. Every operation opens its own connection.
pub struct SyncStore {
    path: PathBuf,
}

impl SyncStore {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connect(&self) -> Result<Connection, CoreError> {
        connect(&self.path)
    }
}

pub fn open_store(path: impl AsRef<Path>) -> Result<SyncStore, CoreError> {
    let path = path.as_ref().to_path_buf();
    let conn = connect(&path)?;
    apply_migrations(&conn)?;
    Ok(SyncStore { path })
}

/// Opens another connection to a store that `open_store` already migrated.
pub fn connect(path: impl AsRef<Path>) -> Result<Connection, CoreError> {
    let conn = Connection::open(path.as_ref())?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA journal_size_limit = 67108864; \
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(conn)
}

pub fn apply_migrations(conn: &Connection) -> Result<(), CoreError> {
    let current_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let mut version = current_version as usize;
    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let next_version = idx + 1;
        if next_version <= version {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute_batch(&format!("PRAGMA user_version = {};", next_version))?;
        version = next_version;
    }
    Ok(())
}

/// Runs `f` inside a write transaction. Any error rolls the whole thing back.
pub fn with_transaction<T, F>(conn: &Connection, f: F) -> Result<T, CoreError>
where
    F: FnOnce(&Connection) -> Result<T, CoreError>,
{
    conn.execute_batch("BEGIN IMMEDIATE;")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT;")?;
            Ok(value)
        }
        Err(err) => {
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}
