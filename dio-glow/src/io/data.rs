use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Direction a DIO line is configured for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Input,
    #[default]
    Output,
}

/// State of a single DIO line as exchanged with the remote API.
///
/// ```json
/// { "DioName": "DIO_A", "Value": 1, "Direction": "Output" }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DioState {
    #[serde(rename = "DioName", alias = "name", default)]
    pub name: String,
    #[serde(rename = "Value", alias = "value")]
    pub value: u8,
    #[serde(rename = "Direction", alias = "direction", default)]
    pub direction: Direction,
}

impl DioState {
    /// Builds the state of an output line driven to `level`.
    pub fn output<S: Into<String>>(name: S, level: bool) -> Self {
        Self {
            name: name.into(),
            value: u8::from(level),
            direction: Direction::Output,
        }
    }

    /// Indicates if the line is asserted.
    pub fn is_high(&self) -> bool {
        self.value != 0
    }
}

impl Display for DioState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [value={}, direction={:?}]",
            self.name, self.value, self.direction
        )
    }
}

/// Answer of the token exchange.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub token: String,
}
