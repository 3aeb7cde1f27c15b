use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::config::Config;
use crate::errors::{Error, ProtocolError};
use crate::io::data::TokenResponse;
use crate::io::{DioProtocol, DioState};

/// Default timeout of every remote call.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to the device-control REST API of the remote board.
///
/// The bearer token is acquired on the first call and kept until the API rejects it, in which
/// case a new one is exchanged and the rejected call replayed once.
#[derive(Clone, Debug)]
pub struct HttpDio {
    /// Base URL of the API (without trailing slash).
    base_url: String,
    /// Password exchanged against a bearer token.
    credential: String,
    /// Name of the watched input line.
    input: String,
    /// Name of the driven output line.
    output: String,

    // ########################################
    // # Volatile utility data.
    client: Client,
    token: Arc<RwLock<Option<String>>>,
}

impl HttpDio {
    /// Creates a client for the API at `base_url`, watching `DIO_B` and driving `DIO_A`.
    ///
    /// # Errors
    /// * `NetworkError`: the underlying HTTP client cannot be built.
    pub fn new<U: Into<String>, C: Into<String>>(base_url: U, credential: C) -> Result<Self, Error> {
        Self::with_timeout(base_url, credential, DEFAULT_TIMEOUT)
    }

    /// Same as [`Self::new()`] with a custom timeout applied to every call.
    pub fn with_timeout<U: Into<String>, C: Into<String>>(
        base_url: U,
        credential: C,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential: credential.into(),
            input: String::from("DIO_B"),
            output: String::from("DIO_A"),
            client,
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Creates the client described by a [`Config`].
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Ok(Self::with_timeout(
            &config.remote_base_url,
            &config.credential,
            config.request_timeout(),
        )?
        .with_input(&config.input)
        .with_output(&config.output))
    }

    /// Sets the watched input line.
    pub fn with_input<S: Into<String>>(mut self, input: S) -> Self {
        self.input = input.into();
        self
    }

    /// Sets the driven output line.
    pub fn with_output<S: Into<String>>(mut self, output: S) -> Self {
        self.output = output.into();
        self
    }

    /// Uses an already known bearer token instead of exchanging one on the first call.
    pub fn with_token<S: Into<String>>(self, token: S) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    // ########################################
    // Setters and Getters.

    pub fn get_input(&self) -> &str {
        &self.input
    }

    pub fn get_output(&self) -> &str {
        &self.output
    }

    /// Indicates if a bearer token is currently held.
    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    // ########################################
    // Remote API calls.

    /// Exchanges the credential for a new bearer token and keeps it for the next calls.
    ///
    /// # Errors
    /// * `AuthExpired`: the credential has been rejected.
    /// * `NetworkError` / `UnexpectedStatus` / `UnexpectedData`: the exchange failed.
    pub async fn authenticate(&self) -> Result<String, Error> {
        let url = format!("{}/user/Service/token", self.base_url);
        trace!("Token exchange: POST {}", url);
        let response = self
            .client
            .post(&url)
            .form(&[("password", self.credential.as_str())])
            .send()
            .await?;

        let response = match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ProtocolError::AuthExpired.into())
            }
            status if !status.is_success() => {
                return Err(ProtocolError::UnexpectedStatus {
                    status: status.as_u16(),
                }
                .into())
            }
            _ => response,
        };

        let token = response.json::<TokenResponse>().await?.token;
        *self.token.write() = Some(token.clone());
        debug!("{} authenticated", self);
        Ok(token)
    }

    /// Reads the state of the line `name`.
    pub async fn get_state(&self, name: &str) -> Result<DioState, Error> {
        let url = format!("{}/tdce/dio/GetState/{}", self.base_url, name);
        let response = self.send(|client| client.get(&url)).await?;
        Ok(response.json::<DioState>().await?)
    }

    /// Sets the state of all given lines in a single call.
    pub async fn set_states(&self, states: &[DioState]) -> Result<(), Error> {
        let url = format!("{}/tdce/dio/SetStates", self.base_url);
        self.send(|client| client.post(&url).json(states)).await?;
        Ok(())
    }

    /// Returns the held token or exchanges a new one.
    async fn bearer(&self) -> Result<String, Error> {
        let token = self.token.read().clone();
        match token {
            Some(token) => Ok(token),
            None => self.authenticate().await,
        }
    }

    /// Sends an authenticated request, renewing the token once if the API rejects it.
    async fn send<F>(&self, request: F) -> Result<Response, Error>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        for _ in 0..2 {
            let token = self.bearer().await?;
            let response = request(&self.client).bearer_auth(token).send().await?;
            match response.status() {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    debug!("{} token rejected: renewing it", self);
                    *self.token.write() = None;
                }
                status if status.is_success() => return Ok(response),
                status => {
                    return Err(ProtocolError::UnexpectedStatus {
                        status: status.as_u16(),
                    }
                    .into())
                }
            }
        }
        Err(ProtocolError::AuthExpired.into())
    }
}

impl Display for HttpDio {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [url={}, input={}, output={}]",
            self.get_protocol_name(),
            self.base_url,
            self.input,
            self.output,
        )
    }
}

#[async_trait]
impl DioProtocol for HttpDio {
    async fn read_input(&self) -> Result<bool, Error> {
        let state = self.get_state(&self.input).await?;
        trace!("Input {}", state);
        Ok(state.is_high())
    }

    async fn write_output(&self, level: bool) -> Result<(), Error> {
        self.set_states(&[DioState::output(self.output.as_str(), level)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use crate::config::Config;
    use crate::errors::{Error, ProtocolError};
    use crate::io::{DioProtocol, DioState, HttpDio};

    const STATE_B_HIGH: &str = r#"{"DioName":"DIO_B","Value":1,"Direction":"Input"}"#;

    #[tokio::test]
    async fn test_authenticate_and_read_input() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/user/Service/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::UrlEncoded("password".into(), "secret".into()))
            .with_body(r#"{"token":"abc"}"#)
            .expect(1)
            .create_async()
            .await;
        let state = server
            .mock("GET", "/tdce/dio/GetState/DIO_B")
            .match_header("authorization", "Bearer abc")
            .with_body(STATE_B_HIGH)
            .expect(2)
            .create_async()
            .await;

        let dio = HttpDio::new(server.url(), "secret").unwrap();
        assert!(!dio.is_authenticated());
        assert!(dio.read_input().await.unwrap());
        assert!(dio.is_authenticated());
        // Token is reused.
        assert!(dio.read_input().await.unwrap());

        token.assert_async().await;
        state.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_output() {
        let mut server = mockito::Server::new_async().await;
        let on = server
            .mock("POST", "/tdce/dio/SetStates")
            .match_header("authorization", "Bearer abc")
            .match_body(Matcher::Json(
                json!([{ "DioName": "LED", "Value": 1, "Direction": "Output" }]),
            ))
            .create_async()
            .await;
        let off = server
            .mock("POST", "/tdce/dio/SetStates")
            .match_body(Matcher::Json(
                json!([{ "DioName": "LED", "Value": 0, "Direction": "Output" }]),
            ))
            .create_async()
            .await;

        let dio = HttpDio::new(format!("{}/", server.url()), "secret")
            .unwrap()
            .with_output("LED")
            .with_token("abc");
        dio.write_output(true).await.unwrap();
        dio.write_output(false).await.unwrap();

        on.assert_async().await;
        off.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_token_is_renewed() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("GET", "/tdce/dio/GetState/DIO_B")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let token = server
            .mock("POST", "/user/Service/token")
            .with_body(r#"{"token":"fresh"}"#)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("GET", "/tdce/dio/GetState/DIO_B")
            .match_header("authorization", "Bearer fresh")
            .with_body(STATE_B_HIGH)
            .expect(1)
            .create_async()
            .await;

        let dio = HttpDio::new(server.url(), "secret")
            .unwrap()
            .with_token("stale");
        assert!(dio.read_input().await.unwrap());

        rejected.assert_async().await;
        token.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_credential() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/user/Service/token")
            .with_status(401)
            .create_async()
            .await;

        let dio = HttpDio::new(server.url(), "wrong").unwrap();
        let error = dio.read_input().await.unwrap_err();
        assert!(matches!(
            error,
            Error::ProtocolError {
                source: ProtocolError::AuthExpired
            }
        ));
    }

    #[tokio::test]
    async fn test_unexpected_answers() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tdce/dio/GetState/DIO_B")
            .with_status(500)
            .create_async()
            .await;
        server
            .mock("GET", "/tdce/dio/GetState/DIO_C")
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let dio = HttpDio::new(server.url(), "secret")
            .unwrap()
            .with_token("abc");
        let error = dio.read_input().await.unwrap_err();
        assert!(matches!(
            error,
            Error::ProtocolError {
                source: ProtocolError::UnexpectedStatus { status: 500 }
            }
        ));

        let dio = dio.with_input("DIO_C");
        let error = dio.read_input().await.unwrap_err();
        assert!(matches!(
            error,
            Error::ProtocolError {
                source: ProtocolError::UnexpectedData { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_unreachable_api() {
        let dio = HttpDio::new("http://127.0.0.1:1", "secret")
            .unwrap()
            .with_token("abc");
        let error = dio.write_output(true).await.unwrap_err();
        assert!(matches!(
            error,
            Error::ProtocolError {
                source: ProtocolError::NetworkError { .. }
            }
        ));
    }

    #[test]
    fn test_from_config_and_display() {
        let config = Config {
            remote_base_url: String::from("http://localhost:59801/"),
            input: String::from("DIO_C"),
            output: String::from("DIO_D"),
            ..Default::default()
        };
        let dio = HttpDio::from_config(&config).unwrap();
        assert_eq!(dio.get_input(), "DIO_C");
        assert_eq!(dio.get_output(), "DIO_D");
        assert_eq!(
            format!("{}", dio),
            "HttpDio [url=http://localhost:59801, input=DIO_C, output=DIO_D]"
        );
        assert_eq!(
            DioState::output(dio.get_output(), true),
            DioState::output("DIO_D", true)
        );
    }
}
