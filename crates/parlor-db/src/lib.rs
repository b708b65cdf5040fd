pub mod migrations;
pub mod queries;
pub mod records;

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use rusqlite::Connection;
use tokio::sync::broadcast;
use tracing::info;

use parlor_types::events::StoreChange;

pub use records::Record;

/// Local stand-in for the hosted sync database: SQLite for storage plus a
/// change feed that live queries listen on.
pub struct Database {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<StoreChange>,
    seq: AtomicU64,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_connection(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        let (changes, _) = broadcast::channel(256);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
            seq: AtomicU64::new(0),
        })
    }

    /// Subscribe to committed-transaction notifications.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }

    fn notify(&self, entities: Vec<parlor_types::events::EntityKind>) -> StoreChange {
        let change = StoreChange {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            entities,
        };
        // No receivers is fine: nobody is subscribed yet
        let _ = self.changes.send(change.clone());
        change
    }
}
