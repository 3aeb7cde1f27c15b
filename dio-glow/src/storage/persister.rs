use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{error, info};
use tokio::sync::Mutex;

use crate::errors::Error;
use crate::storage::{RecordId, Storage};

/// Hands consumed durations to a [`Storage`] without ever dropping one.
///
/// A duration the storage refuses is kept in a backlog. The backlog is flushed (oldest first)
/// before any new duration is recorded, and on demand through [`Self::flush()`].
#[derive(Clone, Debug)]
pub struct Persister {
    storage: Box<dyn Storage>,
    backlog: Arc<Mutex<VecDeque<u64>>>,
}

impl Persister {
    pub fn new<S: Storage + 'static>(storage: S) -> Self {
        Self::from_boxed(Box::new(storage))
    }

    pub fn from_boxed(storage: Box<dyn Storage>) -> Self {
        Self {
            storage,
            backlog: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Records `duration_ms` after the backlog.
    ///
    /// # Errors
    /// Returns the storage error when the backlog or the duration could not be recorded: the
    /// duration is then queued in the backlog.
    pub async fn persist(&self, duration_ms: u64) -> Result<RecordId, Error> {
        let mut backlog = self.backlog.lock().await;
        let result = match Self::drain(&*self.storage, &mut backlog).await {
            Ok(_) => self.storage.record(duration_ms).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(id) => {
                info!("Glow of {}ms recorded as #{}", duration_ms, id);
                Ok(id)
            }
            Err(err) => {
                error!(
                    "Glow of {}ms not recorded ({}): kept for a later retry",
                    duration_ms, err
                );
                backlog.push_back(duration_ms);
                Err(err)
            }
        }
    }

    /// Records every backlogged duration.
    ///
    /// # Returns
    /// The number of durations recorded. On error, the remaining durations stay in the backlog.
    pub async fn flush(&self) -> Result<usize, Error> {
        let mut backlog = self.backlog.lock().await;
        Self::drain(&*self.storage, &mut backlog).await
    }

    /// Durations waiting for a retry, oldest first.
    pub async fn backlog(&self) -> Vec<u64> {
        self.backlog.lock().await.iter().copied().collect()
    }

    pub fn get_storage(&self) -> &(dyn Storage + 'static) {
        &*self.storage
    }

    async fn drain(storage: &dyn Storage, backlog: &mut VecDeque<u64>) -> Result<usize, Error> {
        let mut flushed = 0;
        while let Some(&duration_ms) = backlog.front() {
            let id = storage.record(duration_ms).await?;
            info!("Backlogged glow of {}ms recorded as #{}", duration_ms, id);
            backlog.pop_front();
            flushed += 1;
        }
        Ok(flushed)
    }
}

impl Display for Persister {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Persister [storage={}]", self.storage)
    }
}
