//! Axum router construction and the image serve handler.
//!
//! Images are served from `{url_prefix}`, `{url_prefix}/` and
//! `{url_prefix}/*path`.  Any failed lookup answers
//! `404` with a JSON `{name, message}` body and also forwards the error to
//! the [`forward_errors`] stage, which reports it.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics::counter;
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;

use crate::errors::StorageError;
use crate::metrics::{metrics_handler, metrics_middleware, BYTES_SERVED_TOTAL, SERVE_ERRORS_TOTAL};
use crate::storage::ServedImage;
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the image endpoints.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "sodastore image API",
        version = "0.1.0",
        description = "Images stored in SODA JSON document collections"
    ),
    paths(health_check, serve_image),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Images", description = "Stored image delivery"),
    )
)]
struct ApiDoc;

/// A serve failure handed from the handler to the error stage.
///
/// The handler has already written the `404` response when this is
/// attached; the error stage only observes it.
#[derive(Debug, Clone)]
pub struct ForwardedError(pub Arc<StorageError>);

/// Build the axum [`Router`] serving stored images.
pub fn app(state: Arc<AppState>) -> Router {
    let prefix = state.storage.url_prefix().to_string();

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/openapi.json", get(openapi_json))
        .route(&format!("{prefix}/"), get(serve_image))
        .route(&format!("{prefix}/*path"), get(serve_image));
    if !prefix.is_empty() {
        router = router.route(&prefix, get(serve_image));
    }

    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state)
        // forward_errors is innermost: it sees the handler's response first.
        .layer(middleware::from_fn(forward_errors))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}

// -- Error forwarding ---------------------------------------------------------

/// Next error-handling stage for serve failures.
///
/// Passes the response through untouched and reports any
/// [`ForwardedError`] it carries.
pub async fn forward_errors(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    if let Some(ForwardedError(err)) = response.extensions().get::<ForwardedError>() {
        counter!(SERVE_ERRORS_TOTAL, "error" => err.name()).increment(1);
        warn!(
            "{} {} -> {}: {} ({})",
            method,
            path,
            response.status().as_u16(),
            err,
            err.name()
        );
    }

    response
}

// -- Handlers -----------------------------------------------------------------

/// `GET {url_prefix}/{path}` -- stream a stored image.
#[utoipa::path(
    get,
    path = "/content/images/{path}",
    tag = "Images",
    operation_id = "ServeImage",
    params(
        ("path" = String, Path, description = "Stored image path, e.g. 2024/05/cat.png")
    ),
    responses(
        (status = 200, description = "Image bytes with the stored content type"),
        (status = 404, description = "Image not stored in any account")
    )
)]
async fn serve_image(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    let request_path = stored_path(state.storage.url_prefix(), uri.path());
    match state.storage.fetch(&request_path).await {
        Ok(image) => image_response(image),
        Err(err) => {
            // Terminate the request...
            let mut response = err.not_found_response();
            // ...and hand the error on to the next stage.
            response
                .extensions_mut()
                .insert(ForwardedError(Arc::new(err)));
            response
        }
    }
}

/// The stored path addressed by a request path under `prefix`.
///
/// Always starts with `/`.  Percent-escapes are decoded; invalid UTF-8
/// becomes U+FFFD, which matches nothing stored.
fn stored_path(prefix: &str, request_path: &str) -> String {
    let rest = request_path.strip_prefix(prefix).unwrap_or(request_path);
    let decoded = percent_decode_str(rest).decode_utf8_lossy();
    if decoded.starts_with('/') {
        decoded.into_owned()
    } else {
        format!("/{decoded}")
    }
}

fn image_response(image: ServedImage) -> Response {
    let len = image.data.len();
    let mut response = (StatusCode::OK, Body::from(image.data)).into_response();
    let headers = response.headers_mut();

    let content_type = HeaderValue::from_str(&image.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);

    if let Some(last_modified) = image.last_modified.as_deref().and_then(http_date) {
        headers.insert(header::LAST_MODIFIED, last_modified);
    }

    counter!(BYTES_SERVED_TOTAL).increment(len as u64);
    response
}

/// Convert a stored RFC 3339 timestamp into an HTTP date header value.
fn http_date(rfc3339: &str) -> Option<HeaderValue> {
    let parsed = chrono::DateTime::parse_from_rfc3339(rfc3339).ok()?;
    let formatted = httpdate::fmt_http_date(std::time::SystemTime::from(parsed));
    HeaderValue::from_str(&formatted).ok()
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "accounts": state.storage.pool().len(),
    }))
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
