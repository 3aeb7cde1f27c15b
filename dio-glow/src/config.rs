//! Defines the configuration injected into the glow controller.

use std::fmt::{Display, Formatter};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, Error};

/// Everything needed to reach the remote DIO API and the database.
///
/// All fields have defaults matching the reference device, so a configuration file only needs to
/// list what differs:
/// ```json
/// {
///     "remote_base_url": "http://192.168.0.100:59801",
///     "credential": "servicelevel",
///     "poll_interval_ms": 10
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the remote DIO API.
    pub remote_base_url: String,
    /// Password exchanged for a bearer token.
    pub credential: String,
    /// Name of the watched input line.
    pub input: String,
    /// Name of the driven output line (the LED).
    pub output: String,
    /// Delay between two polls of the input (`None`: poll as fast as possible).
    pub poll_interval_ms: Option<u64>,
    /// Sleep quantum of the actuation wait loop.
    pub wait_quantum_ms: u64,
    /// How many times a failed output command is retried before giving up.
    pub output_retries: u8,
    /// Delay before retrying a failed remote call.
    pub retry_delay_ms: u64,
    /// Timeout of every remote call.
    pub request_timeout_ms: u64,
    /// Path to the SQLite database receiving the glow records.
    pub database: PathBuf,
    /// Address the detection API listens on (`None`: no API).
    pub api_address: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_base_url: String::from("http://192.168.0.100:59801"),
            credential: String::new(),
            input: String::from("DIO_B"),
            output: String::from("DIO_A"),
            poll_interval_ms: None,
            wait_quantum_ms: 1,
            output_retries: 3,
            retry_delay_ms: 100,
            request_timeout_ms: 5000,
            database: PathBuf::from("dio-glow.sqlite"),
            api_address: Some(String::from("0.0.0.0:6001")),
        }
    }
}

impl Config {
    /// Loads a JSON configuration file. Missing fields take their default value.
    ///
    /// # Errors
    /// * `ConfigError`: the file cannot be read or is not valid JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| ConfigError {
            info: format!("cannot read {}: {}", path.display(), err),
        })?;
        serde_json::from_str(&content).map_err(|err| ConfigError {
            info: format!("cannot parse {}: {}", path.display(), err),
        })
    }

    /// Checks the configuration is usable.
    ///
    /// # Errors
    /// * `ConfigError`: with the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        let problem = if !self.remote_base_url.starts_with("http://")
            && !self.remote_base_url.starts_with("https://")
        {
            Some(format!(
                "remote_base_url must be an http(s) URL (found: '{}')",
                self.remote_base_url
            ))
        } else if self.input.is_empty() || self.output.is_empty() {
            Some(String::from("input and output line names are required"))
        } else if self.wait_quantum_ms == 0 {
            Some(String::from("wait_quantum_ms must be positive"))
        } else if self.request_timeout_ms == 0 {
            Some(String::from("request_timeout_ms must be positive"))
        } else if let Some(address) = self
            .api_address
            .as_ref()
            .filter(|address| address.parse::<SocketAddr>().is_err())
        {
            Some(format!("api_address must be ip:port (found: '{}')", address))
        } else {
            None
        };

        match problem {
            Some(info) => Err(ConfigError { info }),
            None => Ok(()),
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }

    pub fn wait_quantum(&self) -> Duration {
        Duration::from_millis(self.wait_quantum_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Config [url={}, input={}, output={}, poll={}, database={}]",
            self.remote_base_url,
            self.input,
            self.output,
            self.poll_interval_ms
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| String::from("busy")),
            self.database.display(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use crate::config::Config;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.input, "DIO_B");
        assert_eq!(config.output, "DIO_A");
        assert_eq!(config.poll_interval(), None);
        assert_eq!(config.wait_quantum(), Duration::from_millis(1));
        assert!(config.validate().is_ok());
        assert_eq!(
            format!("{}", config),
            "Config [url=http://192.168.0.100:59801, input=DIO_B, output=DIO_A, poll=busy, database=dio-glow.sqlite]"
        );
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "remote_base_url": "http://localhost:8080", "credential": "secret", "poll_interval_ms": 10 }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.remote_base_url, "http://localhost:8080");
        assert_eq!(config.credential, "secret");
        assert_eq!(config.poll_interval(), Some(Duration::from_millis(10)));
        assert_eq!(config.output, "DIO_A", "Missing fields take the default");
    }

    #[test]
    fn test_load_errors() {
        assert!(Config::load("/this/file/does/not/exist.json").is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let error = Config::load(file.path()).unwrap_err();
        assert!(format!("{}", error).starts_with("Configuration error: cannot parse"));
    }

    #[test]
    fn test_validate() {
        let config = Config {
            remote_base_url: String::from("192.168.0.100"),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            output: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            wait_quantum_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            api_address: Some(String::from("localhost")),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_address() {
        assert_eq!(
            Config::default().api_address.as_deref(),
            Some("0.0.0.0:6001")
        );

        let config: Config = serde_json::from_str(r#"{ "api_address": null }"#).unwrap();
        assert_eq!(config.api_address, None);
        assert!(config.validate().is_ok());

        let config: Config = serde_json::from_str(r#"{ "api_address": "127.0.0.1:8080" }"#).unwrap();
        assert!(config.validate().is_ok());
    }
}
