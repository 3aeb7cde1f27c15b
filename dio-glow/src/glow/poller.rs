use std::fmt::{Display, Formatter};

use log::{debug, error, trace, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::errors::Error;
use crate::glow::accumulator::GlowTime;
use crate::glow::actuator::Actuator;
use crate::glow::timer::Timer;
use crate::glow::GlowOptions;
use crate::io::DioProtocol;
use crate::utils::task::TaskRegistry;

/// What a single poll observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollEvent {
    /// Input deasserted, nothing going on.
    Idle,
    /// Input just asserted: the timer started.
    Asserted,
    /// Input still asserted.
    Held,
    /// Input just deasserted: the interval was added to the glow time.
    Deasserted { elapsed_ms: u64, total_ms: u64 },
}

/// Watches the remote input and turns each asserted interval into glow time.
///
/// Every deassert edge leaving a positive glow time hands an [`Actuator`] session to the task
/// registry and the polling goes on immediately.
#[derive(Debug)]
pub struct Poller {
    protocol: Box<dyn DioProtocol>,
    timer: Timer,
    glow: GlowTime,
    actuator: Actuator,
    tasks: TaskRegistry,
    options: GlowOptions,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(
        protocol: Box<dyn DioProtocol>,
        glow: GlowTime,
        actuator: Actuator,
        tasks: TaskRegistry,
        options: GlowOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            protocol,
            timer: Timer::default(),
            glow,
            actuator,
            tasks,
            options,
            cancel,
        }
    }

    pub fn get_timer(&self) -> &Timer {
        &self.timer
    }

    /// Reads the input once and handles the edge (if any).
    ///
    /// # Errors
    /// Returns the protocol error if the input could not be read (nothing changes then), or an
    /// `InvariantViolation` if the interval cannot be added to the glow time.
    pub async fn poll_once(&mut self) -> Result<PollEvent, Error> {
        let asserted = self.protocol.read_input().await?;
        trace!("Input polled: {}", asserted);

        let event = match (asserted, self.timer.is_running()) {
            (false, false) => PollEvent::Idle,
            (true, true) => PollEvent::Held,
            (true, false) => {
                self.timer.start();
                debug!("Input asserted");
                PollEvent::Asserted
            }
            (false, true) => {
                let elapsed_ms = match self.timer.stop() {
                    Some(elapsed) => u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    None => 0,
                };
                let total_ms = self.glow.add_and_get(elapsed_ms).map_err(|err| {
                    error!("Input interval of {}ms lost: {}", elapsed_ms, err);
                    err
                })?;
                debug!("Input deasserted after {}ms: {}ms to glow", elapsed_ms, total_ms);

                if total_ms > 0 {
                    let actuator = self.actuator.clone();
                    self.tasks
                        .run(async move { actuator.session().await.map(|_| ()) });
                }
                PollEvent::Deasserted {
                    elapsed_ms,
                    total_ms,
                }
            }
        };
        Ok(event)
    }

    /// Polls until cancelled.
    ///
    /// Read failures are logged and retried after the retry delay. An interval still open when
    /// cancelled is discarded.
    pub async fn run(&mut self) {
        debug!("Polling starts: {}", self.protocol);
        while !self.cancel.is_cancelled() {
            let pause = match self.poll_once().await {
                Ok(_) => self.options.poll_interval,
                Err(err) => {
                    warn!("Polling failed: {}", err);
                    Some(self.options.retry_delay)
                }
            };

            match pause {
                Some(duration) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        _ = sleep(duration) => {}
                    }
                }
                None => tokio::task::yield_now().await,
            }
        }

        if self.timer.is_running() {
            warn!(
                "Polling stopped while the input is asserted: {}ms discarded",
                self.timer.elapsed().as_millis()
            );
            self.timer.reset();
        }
        debug!("Polling stops");
    }
}

impl Display for Poller {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Poller [protocol={}, {}]", self.protocol, self.timer)
    }
}
