//! HTTP surface: routing, response envelope and error mapping.

mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Serialize)]
struct Success<T> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct Failure<'a> {
    success: bool,
    message: &'a str,
    #[serde(skip_serializing_if = "no_details")]
    details: &'a HashMap<String, String>,
}

fn no_details(details: &&HashMap<String, String>) -> bool {
    details.is_empty()
}

/// Wrap `data` in the success envelope.
pub(crate) fn ok<T: Serialize>(data: T) -> Json<impl Serialize> {
    Json(Success {
        success: true,
        data,
    })
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        } else {
            log::debug!("Request rejected: {}", self);
        }
        let body = Failure {
            success: false,
            message: self.message(),
            details: self.payload(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/preview/start", post(handlers::start_preview))
        .route("/api/preview/stop", post(handlers::stop_preview))
        .route("/api/processes", get(handlers::list_processes))
        .route("/api/build", post(handlers::build))
        .route("/api/export", post(handlers::export))
        .route("/api/screenshot", post(handlers::screenshot))
        .route("/api/build/{id}/entries", get(handlers::list_entries))
        .route("/api/build/{id}/files", get(handlers::build_index))
        .route("/api/build/{id}/{*path}", get(handlers::build_asset))
        .route("/api/export/{id}/{format}", get(handlers::export_file))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    async fn render(err: AppError) -> (StatusCode, Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn errors_map_to_status_and_envelope() {
        let (status, body) = render(AppError::not_found("No build output")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "success": false, "message": "No build output" }));

        let (status, body) = render(AppError::path_traversal("../x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) =
            render(AppError::build_failure("slidev build exited").with_detail("stderr", "boom"))
                .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["details"], json!({ "stderr": "boom" }));
    }
}
