use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, RuntimeError};
use crate::glow::accumulator::GlowTime;
use crate::glow::GlowOptions;
use crate::io::DioProtocol;
use crate::storage::{Persister, RecordId};

/// Outcome of one actuation session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Glow time pending when the session started.
    pub target_ms: u64,
    /// Glow time consumed when the output went off (includes time added while glowing).
    pub consumed_ms: u64,
    /// Record created for the consumed time (`None` if it went to the persister backlog).
    pub record: Option<RecordId>,
}

/// Drives the output for as long as the [`GlowTime`] asks, one session at a time.
#[derive(Clone, Debug)]
pub struct Actuator {
    protocol: Box<dyn DioProtocol>,
    glow: GlowTime,
    persister: Persister,
    /// Actuation lock: a single permit, held for a whole session.
    lock: Arc<Semaphore>,
    options: GlowOptions,
    cancel: CancellationToken,
}

impl Actuator {
    pub fn new(
        protocol: Box<dyn DioProtocol>,
        glow: GlowTime,
        persister: Persister,
        options: GlowOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            protocol,
            glow,
            persister,
            lock: Arc::new(Semaphore::new(1)),
            options,
            cancel,
        }
    }

    /// Indicates if a session currently holds the output.
    pub fn is_busy(&self) -> bool {
        self.lock.available_permits() == 0
    }

    /// Runs one actuation session: asserts the output, waits out the glow time, deasserts the
    /// output and persists the consumed time.
    ///
    /// Sessions are serialized: this waits for the running one (if any) to finish first. Time
    /// added to the [`GlowTime`] while waiting extends the session. Cancellation cuts the wait
    /// short, the output is still deasserted and the time consumed.
    ///
    /// # Returns
    /// `None` when there was nothing left to glow once the lock acquired (or when cancelled before
    /// the output was asserted).
    ///
    /// # Errors
    /// Returns the protocol error if the output could not be asserted or deasserted (retries
    /// exhausted). The glow time is then left untouched for a later session.
    pub async fn session(&self) -> Result<Option<SessionReport>, Error> {
        let _permit = self.lock.acquire().await.map_err(|_| RuntimeError)?;

        let target_ms = self.glow.get();
        if target_ms == 0 {
            debug!("Nothing left to glow");
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            debug!("Cancelled before glowing {}ms", target_ms);
            return Ok(None);
        }

        info!("Glow session starts: {}ms", target_ms);
        self.drive(true).await?;

        let started = Instant::now();
        loop {
            let remaining = i128::from(self.glow.get()) - started.elapsed().as_millis() as i128;
            if remaining <= 0 {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!("Glow session cancelled with {}ms remaining", remaining);
                    break;
                }
                _ = sleep(self.options.wait_quantum) => {}
            }
        }

        self.drive(false).await?;
        let consumed_ms = self.glow.read_and_zero();
        info!(
            "Glow session ends: {}ms consumed after {}ms",
            consumed_ms,
            started.elapsed().as_millis()
        );

        let record = match consumed_ms {
            0 => None,
            duration_ms => self.persister.persist(duration_ms).await.ok(),
        };

        Ok(Some(SessionReport {
            target_ms,
            consumed_ms,
            record,
        }))
    }

    /// Drives the output to `level`, retrying commands which failed on a transient error.
    async fn drive(&self, level: bool) -> Result<(), Error> {
        let mut attempt = 0;
        loop {
            match self.protocol.write_output(level).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.options.output_retries => {
                    attempt += 1;
                    warn!(
                        "Driving output to {} failed ({}): retry {}/{}",
                        level, err, attempt, self.options.output_retries
                    );
                    sleep(self.options.retry_delay).await;
                }
                Err(err) => {
                    error!(
                        "Driving output to {} failed ({}): {}ms of glow kept",
                        level,
                        err,
                        self.glow.get()
                    );
                    return Err(err);
                }
            }
        }
    }
}

impl Display for Actuator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Actuator [protocol={}, busy={}, {}]",
            self.protocol.get_protocol_name(),
            self.is_busy(),
            self.glow
        )
    }
}
