#![doc(html_root_url = "https://docs.rs/dio-glow/0.1.0")]

//! <h1 align="center">DIO-GLOW - Mirror a remote input onto a remote LED</h1>
//!
//! # Documentation
//!
//! **Dio-Glow** watches a digital input line of a remote DIO device (through its REST API) and
//! mirrors, on an output line (a LED), every interval the input was asserted: the LED glows for as
//! long as the input was held. Each glow is then recorded in a SQLite database.
//!
//! - Read and drive the remote lines through a [`DioProtocol`](io::DioProtocol)
//!   ([`HttpDio`](io::HttpDio) for the REST API).
//! - Accumulate the asserted time in a shared [`GlowTime`](glow::GlowTime) and mirror it with a
//!   single [`Actuator`](glow::Actuator) session at a time: an input asserted again while the LED
//!   glows extends the running session.
//! - Record every consumed duration through a [`Storage`](storage::Storage)
//!   ([`SqliteStorage`](storage::SqliteStorage)), never dropping one.
//! - Serve the records as JSON ([`api`]) for the detection table UI.
//!
//! # Getting Started
//!
//! The following code watches `DIO_B` and mirrors it on `DIO_A` until Ctrl-C is pressed.
//! ```no_run
//! use dio_glow::config::Config;
//! use dio_glow::glow::Glow;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config {
//!         credential: String::from("servicelevel"),
//!         ..Default::default()
//!     };
//!
//!     let glow = Glow::from_config(&config).unwrap();
//!     glow.start();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     glow.shutdown().await.unwrap();
//! }
//! ```
//!
//! # Feature flags
//!
//! - **mocks** -- Provides mocked protocol and storage (useful for tests mostly).

#[cfg(test)]
extern crate self as dio_glow;

pub mod api;
pub mod config;
pub mod errors;
pub mod glow;
pub mod io;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod storage;
pub mod utils;
