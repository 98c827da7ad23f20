//! SQLite persistence.
//!
//! [`Database`] holds one connection behind a mutex. It backs
//! [`SqliteIdentityStore`] (the `identities` table) and the run
//! bookkeeping in [`queries`]: audit log, key-value state and sync run
//! history.

pub mod queries;
pub mod schema;
pub mod store;

pub use store::SqliteIdentityStore;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// File name of the database inside the daemon's data directory.
pub const DATABASE_FILE: &str = "adsync.db";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path` in WAL mode.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");
        let conn = Connection::open(path)?;
        configure(&conn, true)?;
        Ok(Self::wrap(conn))
    }

    /// Open `adsync.db` under `data_dir`, creating the directory, and
    /// migrate it.
    pub fn open_in(data_dir: &Path) -> Result<(Self, PathBuf), DatabaseError> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(DATABASE_FILE);
        let db = Self::new(&path)?;
        db.initialize()?;
        Ok((db, path))
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        configure(&conn, false)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Apply pending migrations. Safe to call repeatedly.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!(version = schema::current_version(&conn)?, "database schema ready");
        Ok(())
    }

    /// Lock the connection. A poisoned mutex is recovered.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in a transaction; committed on `Ok`, rolled back on `Err`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn configure(conn: &Connection, file_backed: bool) -> Result<(), DatabaseError> {
    if file_backed {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}
