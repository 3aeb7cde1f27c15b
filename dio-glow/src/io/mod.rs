//! Defines the protocols used to read and drive the remote digital I/O lines.

mod data;
mod http;

use std::any::type_name;
use std::fmt::{Debug, Display};

use async_trait::async_trait;
use dyn_clone::DynClone;

use crate::errors::Error;
pub use data::*;
pub use http::*;

// Makes a Box<dyn DioProtocol> clone (used to hand the protocol to each actuation session).
dyn_clone::clone_trait_object!(DioProtocol);

/// Defines the trait all remote DIO protocols must implement.
///
/// A protocol knows which line is the watched input and which line is the driven output.
#[async_trait]
pub trait DioProtocol: DynClone + Send + Sync + Debug + Display {
    /// Returns the protocol name (used for Display only).
    fn get_protocol_name(&self) -> &'static str {
        type_name::<Self>().rsplit("::").next().unwrap_or_default()
    }

    /// Reads the current state of the watched input: `true` when asserted.
    async fn read_input(&self) -> Result<bool, Error>;

    /// Drives the output line to `level`.
    async fn write_output(&self, level: bool) -> Result<(), Error>;
}
