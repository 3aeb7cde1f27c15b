use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::{Error, StorageError};
use crate::storage::{Record, RecordId, Storage};

/// Mock [`Storage`] for testing purposes: keeps the records in memory.
#[derive(Clone, Debug, Default)]
pub struct MockStorage {
    records: Arc<RwLock<Vec<Record>>>,
    failing: Arc<AtomicBool>,
}

impl MockStorage {
    /// Recorded durations, in insertion order.
    pub fn durations(&self) -> Vec<u64> {
        self.records
            .read()
            .iter()
            .map(|record| record.duration_ms)
            .collect()
    }

    /// Makes every upcoming `record()` and `records()` fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Display for MockStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockStorage [records={}]", self.records.read().len())
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn record(&self, duration_ms: u64) -> Result<RecordId, Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                info: String::from("mocked storage failure"),
            }
            .into());
        }
        let mut records = self.records.write();
        let id = records.len() as RecordId + 1;
        records.push(Record {
            id,
            duration_ms,
            created_at: chrono::Utc::now().naive_utc(),
        });
        Ok(id)
    }

    async fn records(&self) -> Result<Vec<Record>, Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                info: String::from("mocked storage failure"),
            }
            .into());
        }
        Ok(self.records.read().clone())
    }
}
