//! Defines where consumed glow durations are recorded.

mod persister;
mod sqlite;

use std::fmt::{Debug, Display};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};

use crate::errors::Error;
pub use persister::Persister;
pub use sqlite::SqliteStorage;

/// Identifier assigned by the storage to a record.
pub type RecordId = i64;

/// One consumed glow duration, as stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub duration_ms: u64,
    /// Insertion time, assigned by the storage (UTC).
    pub created_at: NaiveDateTime,
}

impl Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} {} {}ms",
            self.id,
            self.created_at.format("%Y-%m-%d %H:%M:%S"),
            self.duration_ms
        )
    }
}

dyn_clone::clone_trait_object!(Storage);

/// Defines the trait all storage backends must implement.
///
/// Records are append-only: nothing here updates or deletes them.
#[async_trait]
pub trait Storage: DynClone + Send + Sync + Debug + Display {
    /// Durably records a duration, creating the schema first if needed.
    async fn record(&self, duration_ms: u64) -> Result<RecordId, Error>;

    /// Lists all records, oldest first.
    async fn records(&self) -> Result<Vec<Record>, Error>;
}
