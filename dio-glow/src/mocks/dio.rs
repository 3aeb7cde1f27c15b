use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::errors::{Error, ProtocolError};
use crate::io::DioProtocol;

/// Mock [`DioProtocol`] for testing purposes.
///
/// The input is set by hand, every output command is recorded with the (tokio) instant it was
/// received. Asserting the output again before a deassert has been attempted counts as an
/// overlap: two actuation sessions driving the output at once.
#[derive(Clone, Debug, Default)]
pub struct MockDio {
    input: Arc<RwLock<bool>>,
    output: Arc<RwLock<bool>>,
    /// Output asserted and no deassert attempted since.
    engaged: Arc<RwLock<bool>>,
    history: Arc<RwLock<Vec<(Instant, bool)>>>,
    overlaps: Arc<AtomicUsize>,
    /// Number of upcoming reads to fail.
    failing_reads: Arc<AtomicUsize>,
    /// Output level whose commands fail on a network error (if any).
    failing_level: Arc<RwLock<Option<bool>>>,
    /// Output level whose commands are refused for authentication (if any).
    rejected_level: Arc<RwLock<Option<bool>>>,
    /// Output commands received, failed ones included.
    attempts: Arc<AtomicUsize>,
}

impl MockDio {
    /// Sets the input line state.
    pub fn set_input(&self, level: bool) {
        *self.input.write() = level;
    }

    /// Current (successfully driven) output state.
    pub fn get_output(&self) -> bool {
        *self.output.read()
    }

    /// Successful output commands, in order.
    pub fn get_history(&self) -> Vec<(Instant, bool)> {
        self.history.read().clone()
    }

    /// How long the output was asserted, for every on→off pair of the history.
    pub fn get_glows(&self) -> Vec<u128> {
        let mut glows = vec![];
        let mut since = None;
        for (instant, level) in self.history.read().iter() {
            match (level, since) {
                (true, None) => since = Some(*instant),
                (false, Some(start)) => {
                    glows.push(instant.duration_since(start).as_millis());
                    since = None;
                }
                _ => {}
            }
        }
        glows
    }

    /// Number of times the output was asserted while already driven by another session.
    pub fn get_overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Makes the next `count` input reads fail.
    pub fn fail_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Makes every command driving the output to `level` fail (`None` to stop failing).
    pub fn fail_writes(&self, level: Option<bool>) {
        *self.failing_level.write() = level;
    }

    /// Makes every command driving the output to `level` be refused with `AuthExpired`.
    pub fn reject_writes(&self, level: Option<bool>) {
        *self.rejected_level.write() = level;
    }

    /// Number of output commands received so far (failed ones included).
    pub fn get_write_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Display for MockDio {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MockDio [input={}, output={}]",
            self.input.read(),
            self.output.read()
        )
    }
}

#[async_trait]
impl DioProtocol for MockDio {
    async fn read_input(&self) -> Result<bool, Error> {
        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .is_ok();
        match failing {
            true => Err(ProtocolError::NetworkError {
                info: String::from("mocked read failure"),
            }
            .into()),
            false => Ok(*self.input.read()),
        }
    }

    async fn write_output(&self, level: bool) -> Result<(), Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !level {
            *self.engaged.write() = false;
        }
        if *self.rejected_level.read() == Some(level) {
            return Err(ProtocolError::AuthExpired.into());
        }
        if *self.failing_level.read() == Some(level) {
            return Err(ProtocolError::NetworkError {
                info: format!("mocked write failure (level={})", level),
            }
            .into());
        }
        if level {
            let mut engaged = self.engaged.write();
            if *engaged {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            *engaged = true;
        }
        *self.output.write() = level;
        self.history.write().push((Instant::now(), level));
        Ok(())
    }
}
