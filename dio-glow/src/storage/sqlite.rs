use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::errors::{Error, InvariantViolation, StorageError};
use crate::storage::{Record, RecordId, Storage};

const TABLE: &str = "glow_records";

const CREATE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS glow_records (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    duration_ms INTEGER NOT NULL,
    created_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

/// Stores glow records in a SQLite database file.
///
/// The database is opened on first use. If the table does not exist yet, the first insert fails,
/// the schema is created and the insert is replayed once.
#[derive(Clone, Debug)]
pub struct SqliteStorage {
    path: PathBuf,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStorage {
    /// Creates a storage backed by the database file at `path` (not opened yet).
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a storage backed by a private in-memory database.
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    /// Runs `operation` with the connection, opening it first if needed.
    fn with_connection<T, F>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce(&Connection) -> Result<T, Error>,
    {
        let mut lock = self.connection.lock();
        if lock.is_none() {
            debug!("Opening database {}", self.path.display());
            *lock = Some(Connection::open(&self.path)?);
        }
        match lock.as_ref() {
            Some(connection) => operation(connection),
            None => Err(StorageError::Unavailable {
                info: format!("{} is not open", self.path.display()),
            }
            .into()),
        }
    }

    /// Blocking version of [`Storage::record()`].
    pub fn blocking_record(&self, duration_ms: u64) -> Result<RecordId, Error> {
        let duration = i64::try_from(duration_ms).map_err(|_| InvariantViolation {
            info: format!("duration {}ms cannot be stored", duration_ms),
        })?;

        self.with_connection(|connection| match insert(connection, duration) {
            Err(err) if is_missing_table(&err) => {
                info!("Table '{}' not found: creating it", TABLE);
                connection.execute_batch(CREATE_SCHEMA)?;
                insert(connection, duration).map_err(|err| match is_missing_table(&err) {
                    true => StorageError::MissingSchema { table: TABLE }.into(),
                    false => Error::from(err),
                })
            }
            result => Ok(result?),
        })
    }

    /// Blocking version of [`Storage::records()`].
    pub fn blocking_records(&self) -> Result<Vec<Record>, Error> {
        self.with_connection(|connection| {
            let mut statement = match connection
                .prepare("SELECT id, duration_ms, created_at FROM glow_records ORDER BY id")
            {
                Err(err) if is_missing_table(&err) => return Ok(vec![]),
                statement => statement?,
            };
            let rows = statement.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, NaiveDateTime>(2)?,
                ))
            })?;

            let mut records = vec![];
            for row in rows {
                let (id, duration, created_at) = row?;
                let duration_ms = u64::try_from(duration).map_err(|_| InvariantViolation {
                    info: format!("negative duration stored in record #{}", id),
                })?;
                records.push(Record {
                    id,
                    duration_ms,
                    created_at,
                });
            }
            Ok(records)
        })
    }
}

fn insert(connection: &Connection, duration: i64) -> rusqlite::Result<RecordId> {
    connection.execute(
        "INSERT INTO glow_records (duration_ms) VALUES (?1)",
        params![duration],
    )?;
    Ok(connection.last_insert_rowid())
}

fn is_missing_table(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(_, Some(message)) if message.starts_with("no such table")
    )
}

impl Display for SqliteStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteStorage [path={}]", self.path.display())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn record(&self, duration_ms: u64) -> Result<RecordId, Error> {
        let storage = self.clone();
        let id = tokio::task::spawn_blocking(move || storage.blocking_record(duration_ms)).await??;
        debug!("Recorded {}ms as #{}", duration_ms, id);
        Ok(id)
    }

    async fn records(&self) -> Result<Vec<Record>, Error> {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || storage.blocking_records()).await?
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use crate::errors::Error;
    use crate::storage::{SqliteStorage, Storage};

    #[tokio::test]
    async fn test_schema_is_bootstrapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glow.sqlite");
        let storage = SqliteStorage::new(&path);
        assert!(!path.exists(), "Database is opened lazily");
        assert!(storage.records().await.unwrap().is_empty());

        assert_eq!(storage.record(100).await.unwrap(), 1);
        assert_eq!(storage.record(60).await.unwrap(), 2);

        let records = storage.records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].duration_ms, 100);
        assert_eq!(records[1].duration_ms, 60);
        assert!(records[0].created_at <= records[1].created_at);
    }

    #[tokio::test]
    async fn test_existing_database_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glow.sqlite");
        SqliteStorage::new(&path).record(42).await.unwrap();

        // A second storage on the same file finds the table and the previous record.
        let storage = SqliteStorage::new(&path);
        assert_eq!(storage.record(43).await.unwrap(), 2);
        let durations: Vec<u64> = storage
            .records()
            .await
            .unwrap()
            .iter()
            .map(|record| record.duration_ms)
            .collect();
        assert_eq!(durations, vec![42, 43]);

        let connection = Connection::open(&path).unwrap();
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM glow_records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let storage = SqliteStorage::new("/this/directory/does/not/exist/glow.sqlite");
        let error = storage.record(100).await.unwrap_err();
        assert!(matches!(error, Error::StorageError { .. }));
    }

    #[test]
    fn test_oversized_duration() {
        let storage = SqliteStorage::in_memory();
        assert!(matches!(
            storage.blocking_record(u64::MAX),
            Err(Error::InvariantViolation { .. })
        ));
        assert_eq!(storage.blocking_record(1).unwrap(), 1);
        assert_eq!(format!("{}", storage), "SqliteStorage [path=:memory:]");
    }
}
