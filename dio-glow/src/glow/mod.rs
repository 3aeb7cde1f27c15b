//! Defines the glow controller: the output mirrors, for as long, every interval the input was
//! asserted.

mod accumulator;
mod actuator;
mod poller;
mod timer;

use std::fmt::{Display, Formatter};
use std::time::Duration;

use log::{info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use crate::glow::accumulator::GlowTime;
pub use crate::glow::actuator::{Actuator, SessionReport};
pub use crate::glow::poller::{PollEvent, Poller};
pub use crate::glow::timer::Timer;
use crate::api;
use crate::config::Config;
use crate::errors::Error;
use crate::io::{DioProtocol, HttpDio};
use crate::storage::{Persister, SqliteStorage, Storage};
use crate::utils::task::TaskRegistry;

/// Timing options shared by the poller and the actuator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlowOptions {
    /// Delay between two polls (`None`: only yield to the scheduler).
    pub poll_interval: Option<Duration>,
    /// Sleep quantum of the actuation wait loop.
    pub wait_quantum: Duration,
    /// Retries of a failed output command.
    pub output_retries: u8,
    /// Delay before retrying a failed remote call.
    pub retry_delay: Duration,
}

impl Default for GlowOptions {
    fn default() -> Self {
        Self {
            poll_interval: None,
            wait_quantum: Duration::from_millis(1),
            output_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl From<&Config> for GlowOptions {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            wait_quantum: config.wait_quantum(),
            output_retries: config.output_retries,
            retry_delay: config.retry_delay(),
        }
    }
}

/// Wires a [`Poller`] and an [`Actuator`] around one protocol and one storage.
///
/// # Example
/// ```no_run
/// use dio_glow::config::Config;
/// use dio_glow::glow::Glow;
///
/// #[tokio::main]
/// async fn main() {
///     let glow = Glow::from_config(&Config::default()).unwrap();
///     glow.start();
///     tokio::signal::ctrl_c().await.unwrap();
///     glow.shutdown().await.unwrap();
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Glow {
    protocol: Box<dyn DioProtocol>,
    glow: GlowTime,
    persister: Persister,
    actuator: Actuator,
    tasks: TaskRegistry,
    options: GlowOptions,
    cancel: CancellationToken,
}

impl Glow {
    /// Creates a controller with the default options.
    pub fn new<P: DioProtocol + 'static, S: Storage + 'static>(protocol: P, storage: S) -> Self {
        Self::from_parts(
            Box::new(protocol),
            Persister::new(storage),
            GlowOptions::default(),
        )
    }

    /// Creates the controller described by the configuration: [`HttpDio`] and [`SqliteStorage`].
    ///
    /// # Errors
    /// * `ConfigError`: the configuration is not valid.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::from_parts(
            Box::new(HttpDio::from_config(config)?),
            Persister::new(SqliteStorage::new(&config.database)),
            GlowOptions::from(config),
        ))
    }

    fn from_parts(protocol: Box<dyn DioProtocol>, persister: Persister, options: GlowOptions) -> Self {
        let glow = GlowTime::default();
        let cancel = CancellationToken::new();
        let actuator = Actuator::new(
            protocol.clone(),
            glow.clone(),
            persister.clone(),
            options.clone(),
            cancel.clone(),
        );
        Self {
            protocol,
            glow,
            persister,
            actuator,
            tasks: TaskRegistry::default(),
            options,
            cancel,
        }
    }

    /// Replaces the options (to be called before running).
    pub fn with_options(self, options: GlowOptions) -> Self {
        Self::from_parts(self.protocol, self.persister, options)
    }

    /// Creates a new poller feeding this controller.
    pub fn poller(&self) -> Poller {
        Poller::new(
            self.protocol.clone(),
            self.glow.clone(),
            self.actuator.clone(),
            self.tasks.clone(),
            self.options.clone(),
            self.cancel.clone(),
        )
    }

    /// Polls the input until [`Self::stop()`] or [`Self::shutdown()`] is called.
    pub async fn run(&self) {
        if let Err(err) = self.persister.flush().await {
            warn!("Backlog not flushed: {}", err);
        }
        info!("Glow starts: {}", self);
        self.poller().run().await;
    }

    /// Runs [`Self::run()`] as a registered task: [`Self::shutdown()`] waits for it.
    pub fn start(&self) {
        let glow = self.clone();
        self.tasks.run(async move { glow.run().await });
    }

    /// Serves the detection [`api`] over this controller's storage on `listener`, as a registered
    /// task stopped with the controller.
    pub fn serve_api(&self, listener: TcpListener) {
        let storage = dyn_clone::clone_box(self.persister.get_storage());
        let cancel = self.cancel.clone();
        self.tasks
            .run(async move { api::serve(listener, storage, cancel).await });
    }

    /// Stops the polling and cuts the running session short, without waiting.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stops everything right away: registered tasks are aborted wherever they are. The output
    /// may be left asserted and the pending glow time is not recorded.
    pub fn abort(&self) {
        self.stop();
        self.tasks.abort_all();
        warn!("Glow aborted with {}ms never mirrored", self.glow.get());
    }

    /// Stops everything and waits for it: the poller, the running and queued sessions, then the
    /// persister backlog.
    ///
    /// # Errors
    /// Returns the storage error if backlogged durations are still unrecorded.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.stop();
        let failures = self.tasks.join_all().await;
        if failures > 0 {
            warn!("{} glow session(s) failed", failures);
        }

        let unconsumed = self.glow.get();
        if unconsumed > 0 {
            warn!("Glow stops with {}ms never mirrored", unconsumed);
        }

        let flushed = self.persister.flush().await?;
        info!("Glow stops ({} backlogged record(s) flushed)", flushed);
        Ok(())
    }

    pub fn get_glow_time(&self) -> &GlowTime {
        &self.glow
    }

    pub fn get_actuator(&self) -> &Actuator {
        &self.actuator
    }

    pub fn get_persister(&self) -> &Persister {
        &self.persister
    }

    pub fn get_options(&self) -> &GlowOptions {
        &self.options
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Display for Glow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Glow [protocol={}, storage={}, {}]",
            self.protocol,
            self.persister.get_storage(),
            self.glow
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::api::Detection;
    use crate::config::Config;
    use crate::glow::{Glow, GlowOptions};
    use crate::storage::Storage;
    use crate::mocks::dio::MockDio;
    use crate::mocks::storage::MockStorage;
    use crate::pause;

    fn _setup_glow() -> (Glow, MockDio, MockStorage) {
        let dio = MockDio::default();
        let storage = MockStorage::default();
        let glow = Glow::new(dio.clone(), storage.clone()).with_options(GlowOptions {
            poll_interval: Some(Duration::from_millis(1)),
            retry_delay: Duration::from_millis(10),
            ..Default::default()
        });
        (glow, dio, storage)
    }

    /// Asserts the input for each (start, end) interval, in ms from now.
    async fn _press(dio: &MockDio, intervals: &[(u64, u64)]) {
        let mut now = 0;
        for &(start, end) in intervals {
            pause!(start - now);
            dio.set_input(true);
            pause!(end - start);
            dio.set_input(false);
            now = end;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_press() {
        let (glow, dio, storage) = _setup_glow();
        glow.start();
        _press(&dio, &[(10, 110)]).await;
        pause!(300);
        glow.shutdown().await.unwrap();

        let durations = storage.durations();
        assert_eq!(durations.len(), 1);
        assert!((98..=103).contains(&durations[0]), "Persisted {:?}", durations);
        let glows = dio.get_glows();
        assert_eq!(glows.len(), 1);
        assert!(glows[0] >= durations[0] as u128);
        assert!(!dio.get_output());
        assert_eq!(glow.get_glow_time().get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_during_session_extends_it() {
        let (glow, dio, storage) = _setup_glow();
        glow.start();
        _press(&dio, &[(0, 50), (60, 70)]).await;
        pause!(300);
        glow.shutdown().await.unwrap();

        let durations = storage.durations();
        assert_eq!(durations.len(), 1, "Single session: {:?}", durations);
        assert!((58..=63).contains(&durations[0]), "Persisted {:?}", durations);
        assert_eq!(dio.get_glows().len(), 1);
        assert!(dio.get_glows()[0] >= 58);
        assert_eq!(dio.get_overlaps(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persisted_sum_matches_pressed_time() {
        let (glow, dio, storage) = _setup_glow();
        glow.start();
        _press(&dio, &[(0, 30), (40, 60), (200, 240), (245, 250), (600, 700)]).await;
        pause!(500);
        glow.shutdown().await.unwrap();

        // 30 + 20 + 40 + 5 + 100, one poll period of rounding per press.
        let total: u64 = storage.durations().iter().sum();
        assert!((190..=200).contains(&total), "Persisted {:?}", storage.durations());
        assert_eq!(dio.get_overlaps(), 0);
        assert_eq!(glow.get_glow_time().get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_off_command_is_recovered() {
        let (glow, dio, storage) = _setup_glow();
        dio.fail_writes(Some(false));
        glow.start();
        _press(&dio, &[(0, 50)]).await;
        pause!(200);
        assert!(storage.durations().is_empty());
        assert!((49..=51).contains(&glow.get_glow_time().get()));
        assert!(!glow.get_actuator().is_busy());

        dio.fail_writes(None);
        _press(&dio, &[(0, 20)]).await;
        pause!(300);
        glow.shutdown().await.unwrap();

        let durations = storage.durations();
        assert_eq!(durations.len(), 1);
        assert!((68..=72).contains(&durations[0]), "Persisted {:?}", durations);
        assert_eq!(dio.get_overlaps(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_the_backlog() {
        let (glow, dio, storage) = _setup_glow();
        storage.set_failing(true);
        glow.start();
        _press(&dio, &[(0, 40)]).await;
        pause!(200);
        assert_eq!(glow.get_persister().backlog().await.len(), 1);

        storage.set_failing(false);
        glow.shutdown().await.unwrap();
        assert!(glow.is_stopped());
        assert_eq!(storage.durations().len(), 1);
        assert!(glow.get_persister().backlog().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_unflushed_backlog() {
        let (glow, dio, storage) = _setup_glow();
        storage.set_failing(true);
        glow.start();
        _press(&dio, &[(0, 40)]).await;
        pause!(200);
        assert!(glow.shutdown().await.is_err());
        assert_eq!(glow.get_persister().backlog().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cuts_the_session_short() {
        let (glow, dio, storage) = _setup_glow();
        glow.start();
        _press(&dio, &[(0, 1000)]).await;
        pause!(100);
        glow.shutdown().await.unwrap();

        assert!(!dio.get_output());
        assert!(dio.get_glows()[0] < 1000);
        assert_eq!(storage.durations().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_polling_with_default_options() {
        let dio = MockDio::default();
        let storage = MockStorage::default();
        let glow = Glow::new(dio.clone(), storage.clone());
        assert_eq!(glow.get_options().poll_interval, None);

        glow.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        dio.set_input(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        dio.set_input(false);
        tokio::time::sleep(Duration::from_millis(400)).await;

        tokio::time::timeout(Duration::from_secs(5), glow.shutdown())
            .await
            .expect("shutdown returns")
            .unwrap();
        let durations = storage.durations();
        assert_eq!(durations.len(), 1, "Persisted {:?}", durations);
        assert!((90..=250).contains(&durations[0]), "Persisted {:?}", durations);
        assert!(!dio.get_output());
        assert_eq!(dio.get_overlaps(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort() {
        let (glow, dio, storage) = _setup_glow();
        glow.start();
        _press(&dio, &[(0, 1000)]).await;
        pause!(100);
        assert!(glow.get_actuator().is_busy());

        glow.abort();
        assert!(glow.is_stopped());
        pause!(10);
        assert!(dio.get_output(), "Aborted while glowing");
        assert!(storage.durations().is_empty());
        assert!((999..=1001).contains(&glow.get_glow_time().get()));
        assert!(glow.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_serve_api() {
        let (glow, _, storage) = _setup_glow();
        storage.record(120).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        glow.serve_api(listener);

        let detections: Vec<Detection> =
            reqwest::get(format!("http://{}/api/v1/detection", address))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].duration, "120");

        glow.shutdown().await.unwrap();
        assert!(reqwest::get(format!("http://{}/api/v1/detection", address))
            .await
            .is_err());
    }

    #[test]
    fn test_from_config() {
        let glow = Glow::from_config(&Config::default()).unwrap();
        assert_eq!(glow.get_options(), &GlowOptions::default());
        assert_eq!(
            format!("{}", glow),
            "Glow [protocol=HttpDio [url=http://192.168.0.100:59801, input=DIO_B, output=DIO_A], \
             storage=SqliteStorage [path=dio-glow.sqlite], GlowTime [total=0ms]]"
        );

        let invalid = Config {
            remote_base_url: String::from("ftp://device"),
            ..Default::default()
        };
        assert!(Glow::from_config(&invalid).is_err());
    }
}
