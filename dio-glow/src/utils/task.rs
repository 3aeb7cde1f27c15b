//! Defines the task registry used to run actuation sessions.
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use log::error;
use parking_lot::Mutex;
use tokio::task;
use tokio::task::{JoinError, JoinHandle};

use crate::errors::Error;

/// Represents the result of a task.
/// A task may return either () or Result<(), Error> for flexibility which
/// will be converted to TaskResult when the registry joins it.
#[derive(Debug)]
pub enum TaskResult {
    Ok,
    Err(Error),
}

/// Represents a handler for a task spawned through the registry.
pub type TaskHandler = JoinHandle<TaskResult>;

impl From<Result<(), Error>> for TaskResult {
    fn from(result: Result<(), Error>) -> Self {
        match result {
            Ok(_) => TaskResult::Ok,
            Err(e) => TaskResult::Err(e),
        }
    }
}

impl From<()> for TaskResult {
    fn from(_: ()) -> Self {
        TaskResult::Ok
    }
}

/// Retains the handlers of every task it spawns so they can be awaited later on (during a graceful
/// shutdown for instance). Cloning the registry shares the same underlying list.
#[derive(Clone, Debug, Default)]
pub struct TaskRegistry {
    handlers: Arc<Mutex<Vec<TaskHandler>>>,
    /// Failures of tasks settled and not reported by [`Self::join_all()`] yet.
    failures: Arc<AtomicUsize>,
}

impl TaskRegistry {
    /// Runs a given future as a Tokio task and keeps its handler until [`Self::join_all()`] awaits it.
    ///
    /// Tasks already done are settled (their failure logged and counted for the next
    /// [`Self::join_all()`]) and pruned on each call so the registry does not grow while the process
    /// runs.
    ///
    /// # Parameters
    /// * `future`: A future that implements `Future<Output = T>`, `Send`, and has a `'static` lifetime.
    ///
    /// # Example
    /// ```
    /// use dio_glow::utils::task::TaskRegistry;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let tasks = TaskRegistry::default();
    ///     tasks.run(async move {
    ///         // whatever
    ///     });
    ///     tasks.join_all().await;
    /// }
    /// ```
    pub fn run<F, T>(&self, future: F)
    where
        F: Future<Output = T> + Send + 'static,
        T: Into<TaskResult> + Send + 'static,
    {
        let handler = task::spawn(async move { future.await.into() });

        let finished: Vec<TaskHandler> = {
            let mut handlers = self.handlers.lock();
            let (finished, running) = std::mem::take(&mut *handlers)
                .into_iter()
                .partition(|handler| handler.is_finished());
            *handlers = running;
            handlers.push(handler);
            finished
        };

        for mut handler in finished {
            match (&mut handler).now_or_never() {
                Some(result) => self.settle(result),
                // Out of cooperative budget: left for join_all().
                None => self.handlers.lock().push(handler),
            }
        }
    }

    /// Number of registered tasks still running.
    pub fn pending(&self) -> usize {
        self.handlers
            .lock()
            .iter()
            .filter(|handler| !handler.is_finished())
            .count()
    }

    /// Aborts all registered tasks.
    pub fn abort_all(&self) {
        for handler in self.handlers.lock().iter() {
            handler.abort();
        }
    }

    /// Waits for all registered tasks to complete, including the ones registered while waiting.
    ///
    /// Failed tasks are logged.
    ///
    /// # Returns
    /// The number of tasks which returned an error (or panicked) since the previous call, including
    /// the ones already pruned by [`Self::run()`].
    pub async fn join_all(&self) -> usize {
        loop {
            let handlers = std::mem::take(&mut *self.handlers.lock());
            if handlers.is_empty() {
                return self.failures.swap(0, Ordering::SeqCst);
            }
            for result in futures::future::join_all(handlers).await {
                self.settle(result);
            }
        }
    }

    /// Logs and counts the outcome of a finished task. Aborted tasks are not failures.
    fn settle(&self, result: Result<TaskResult, JoinError>) {
        match result {
            Ok(TaskResult::Ok) => {}
            Ok(TaskResult::Err(err)) => {
                error!("Task failed: {}", err);
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                error!("Task panicked: {}", err);
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[macro_export]
macro_rules! pause {
    ($ms:expr) => {
        $crate::utils::tokio::time::sleep($crate::utils::tokio::time::Duration::from_millis($ms as u64))
            .await
    };
}
