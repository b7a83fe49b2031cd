use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::ok;
use crate::build::{BuildRequest, ExportFormat, ExportRequest};
use crate::capture::ScreenshotRequest;
use crate::error::{AppError, Result};
use crate::instance::{ResourceId, StartPreviewRequest, StopPreviewRequest};
use crate::state::AppState;
use crate::validation::validate_absolute_path;

fn body<T: DeserializeOwned>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::invalid_argument(rejection.body_text()))
}

fn parse_id(raw: &str) -> Result<ResourceId> {
    match raw.parse::<ResourceId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(AppError::invalid_argument("slideId must be a positive integer")
            .with_detail("slideId", raw)),
    }
}

fn content_type_for(path: &str) -> &'static str {
    let ext = FsPath::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" | "md" => "text/plain; charset=utf-8",
        "pdf" => ExportFormat::Pdf.content_type(),
        "pptx" => ExportFormat::Pptx.content_type(),
        _ => "application/octet-stream",
    }
}

pub(super) async fn health() -> impl IntoResponse {
    ok(json!({ "status": "ok" }))
}

pub(super) async fn start_preview(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<StartPreviewRequest>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    validate_absolute_path(&req.slides_path, "slidesPath")?;
    let result = state.registry.start_preview(req).await?;
    Ok(ok(result).into_response())
}

pub(super) async fn stop_preview(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<StopPreviewRequest>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let result = state.registry.stop_preview(req.slide_id).await?;
    Ok(ok(result).into_response())
}

pub(super) async fn list_processes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ok(json!({ "processes": state.registry.list() }))
}

pub(super) async fn build(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<BuildRequest>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    validate_absolute_path(&req.slides_path, "slidesPath")?;
    let result = state.orchestrator.build_project(req).await?;
    Ok(ok(result).into_response())
}

pub(super) async fn export(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ExportRequest>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    validate_absolute_path(&req.slides_path, "slidesPath")?;
    let result = state.orchestrator.export_presentation(req).await?;
    Ok(ok(result).into_response())
}

pub(super) async fn screenshot(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ScreenshotRequest>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    validate_absolute_path(&req.slides_path, "slidesPath")?;
    let result = state.capturer.capture(req).await?;
    Ok(ok(result).into_response())
}

#[derive(Debug, Deserialize)]
pub(super) struct EntriesQuery {
    #[serde(default)]
    path: Option<String>,
}

pub(super) async fn list_entries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<EntriesQuery>,
) -> Result<Response> {
    let id = parse_id(&id)?;
    let relative = query.path.unwrap_or_default();
    let files = state.reader.list_entries(id, &relative)?;
    Ok(ok(json!({ "files": files })).into_response())
}

async fn serve_asset(state: &AppState, id: ResourceId, relative: &str) -> Result<Response> {
    let bytes = state.reader.read_asset(id, relative).await?;
    Ok(([(header::CONTENT_TYPE, content_type_for(relative))], bytes).into_response())
}

pub(super) async fn build_index(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response> {
    serve_asset(&state, parse_id(&id)?, "index.html").await
}

pub(super) async fn build_asset(
    State(state): State<Arc<AppState>>,
    Path((id, path)): Path<(String, String)>,
) -> Result<Response> {
    serve_asset(&state, parse_id(&id)?, &path).await
}

pub(super) async fn export_file(
    State(state): State<Arc<AppState>>,
    Path((id, format)): Path<(String, String)>,
) -> Result<Response> {
    let id = parse_id(&id)?;
    let format: ExportFormat = format.parse()?;
    let bytes = state.reader.read_export_file(id, format).await?;
    let disposition = format!("inline; filename=\"presentation.{}\"", format.extension());
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt as _;

    use super::*;
    use crate::api::router;
    use crate::config::AppConfig;
    use crate::paths::{default_export_path, default_output_dir};

    struct Fixture {
        _dir: tempfile::TempDir,
        work: PathBuf,
        state: Arc<AppState>,
    }

    impl Fixture {
        fn app(&self) -> Router {
            router(Arc::clone(&self.state))
        }
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let out = default_output_dir(&work, 1);
        std::fs::create_dir_all(out.join("assets")).unwrap();
        std::fs::write(out.join("index.html"), "<html>deck</html>").unwrap();
        std::fs::write(out.join("assets").join("app.js"), "run()").unwrap();

        let config = AppConfig {
            work_dir: Some(work.clone()),
            ..AppConfig::default()
        };
        Fixture {
            _dir: dir,
            work,
            state: Arc::new(AppState::new(config)),
        }
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Vec<u8>, Option<String>) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec(), content_type)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let req = Request::get(uri).body(Body::empty()).unwrap();
        let (status, bytes, _) = send(app, req).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, bytes, _) = send(app, req).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_and_empty_process_list() {
        let fx = fixture();
        let (status, body) = get_json(fx.app(), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "ok");

        let (status, body) = get_json(fx.app(), "/api/processes").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["processes"], json!([]));
    }

    #[tokio::test]
    async fn bad_request_bodies_use_the_error_envelope() {
        let fx = fixture();
        let (status, body) = post_json(fx.app(), "/api/preview/start", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].is_string());

        let (status, body) = post_json(
            fx.app(),
            "/api/preview/start",
            r#"{"slideId": 1, "slidesPath": "deck/slides.md"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "slidesPath must be an absolute path");

        let (status, body) = post_json(
            fx.app(),
            "/api/export",
            r#"{"slideId": 0, "slidesPath": "/nowhere/slides.md"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn stopping_unknown_preview_succeeds() {
        let fx = fixture();
        let (status, body) = post_json(fx.app(), "/api/preview/stop", r#"{"slideId": 42}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "data": { "success": true } }));
    }

    #[tokio::test]
    async fn serves_build_files_with_content_types() {
        let fx = fixture();
        let req = Request::get("/api/build/1/files").body(Body::empty()).unwrap();
        let (status, bytes, content_type) = send(fx.app(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"<html>deck</html>");
        assert_eq!(content_type.unwrap(), "text/html; charset=utf-8");

        let req = Request::get("/api/build/1/assets/app.js")
            .body(Body::empty())
            .unwrap();
        let (status, bytes, content_type) = send(fx.app(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"run()");
        assert!(content_type.unwrap().starts_with("application/javascript"));

        let (status, body) = get_json(fx.app(), "/api/build/1/missing.css").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn encoded_traversal_is_refused() {
        let fx = fixture();
        let (status, body) =
            get_json(fx.app(), "/api/build/1/..%2F..%2F..%2Fetc%2Fpasswd").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = get_json(fx.app(), "/api/build/1/entries?path=..%2F..").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lists_entries() {
        let fx = fixture();
        let (status, body) = get_json(fx.app(), "/api/build/1/entries").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["data"]["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["assets", "index.html"]);
        assert_eq!(body["data"]["files"][0]["isDirectory"], true);

        let (status, body) = get_json(fx.app(), "/api/build/1/entries?path=assets").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["files"][0]["path"], "assets/app.js");
    }

    #[tokio::test]
    async fn export_download_checks_format_and_presence() {
        let fx = fixture();
        let pdf = default_export_path(&fx.work, 1, ExportFormat::Pdf);
        std::fs::create_dir_all(pdf.parent().unwrap()).unwrap();
        std::fs::write(&pdf, b"%PDF").unwrap();

        let req = Request::get("/api/export/1/pdf").body(Body::empty()).unwrap();
        let (status, bytes, content_type) = send(fx.app(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"%PDF");
        assert_eq!(content_type.unwrap(), "application/pdf");

        let (status, _) = get_json(fx.app(), "/api/export/1/pptx").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = get_json(fx.app(), "/api/export/1/csv").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"]["format"], "csv");
        let (status, _) = get_json(fx.app(), "/api/export/abc/pdf").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn content_types_fall_back_to_octet_stream() {
        assert_eq!(content_type_for("a/b/logo.SVG"), "image/svg+xml");
        assert_eq!(content_type_for("blob.bin"), "application/octet-stream");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
