//! Read API over the recorded glows, as consumed by the detection table UI.
//!
//! `GET /api/v1/detection` answers every record, oldest first:
//! ```json
//! [{ "id": 1, "duration": "100", "whattime": "2024-05-02 10:21:07" }]
//! ```

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::errors::Error;
use crate::storage::{Record, RecordId, Storage};

/// One record as served to the UI (durations and times are plain strings there).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub id: RecordId,
    /// Glow duration in milliseconds.
    pub duration: String,
    /// Insertion time (UTC).
    pub whattime: String,
}

impl From<&Record> for Detection {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id,
            duration: record.duration_ms.to_string(),
            whattime: record.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Error answered by the API: 503 when the storage cannot be read, 500 otherwise.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Detections cannot be served: {}", self.0);
        let status = match self.0 {
            Error::StorageError { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Builds the API router over `storage`.
pub fn router(storage: Box<dyn Storage>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/detection", get(list_detections))
        .layer(cors)
        .with_state(storage)
}

async fn list_detections(
    State(storage): State<Box<dyn Storage>>,
) -> Result<Json<Vec<Detection>>, ApiError> {
    let records = storage.records().await?;
    Ok(Json(records.iter().map(Detection::from).collect()))
}

/// Serves the API on `listener` until `cancel` fires.
///
/// # Errors
/// Returns the I/O error that stopped the server.
pub async fn serve(
    listener: TcpListener,
    storage: Box<dyn Storage>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let address = listener.local_addr()?;
    info!("Detection API listening on http://{}", address);
    axum::serve(listener, router(storage))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Detection API stops");
    Ok(())
}
