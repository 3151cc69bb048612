//! Axum router construction.
//!
//! The [`app`] function wires every route to its handler and returns a
//! ready-to-serve [`axum::Router`].

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::errors::generate_request_id;
use crate::handlers::{images, objects};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Slack on top of the upload limit for multipart framing overhead.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the axum [`Router`] with all routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.upload.max_size_bytes as usize + MULTIPART_OVERHEAD;

    let mut router = Router::new()
        .route(
            "/api/v1/images",
            post(images::upload_image)
                .get(images::list_images)
                .delete(images::delete_images),
        )
        .route(
            "/api/v1/images/:asset_id",
            get(images::get_image).delete(images::delete_image),
        )
        .route("/objects/*key", get(objects::download_object));

    if state.config.observability.health_check {
        router = router.route("/health", get(health_check));
    }
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware is outermost so it captures the full
        // request lifecycle.
        .layer(middleware::from_fn(metrics_middleware))
        .layer(DefaultBodyLimit::max(body_limit))
}

// -- Common headers middleware -----------------------------------------------

/// Adds standard response headers to every response:
/// - `x-request-id`: 16-character uppercase hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `ImageVault`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // Error responses set their own x-request-id.
    if !headers.contains_key("x-request-id") {
        let request_id = generate_request_id();
        headers.insert("x-request-id", HeaderValue::from_str(&request_id).unwrap());
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    headers.insert("date", HeaderValue::from_str(&date).unwrap());
    headers.insert("server", HeaderValue::from_static("ImageVault"));

    response
}

// -- Health check --------------------------------------------------------------

/// `GET /health` -- liveness probe.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "imagevault",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Resolves when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthorizationGate, StaticSecretStore, TokenCache};
    use crate::config::Config;
    use crate::index::MemoryIndex;
    use crate::service::ImageService;
    use crate::storage::{MemoryStore, ObjectStore, UrlSigner};
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        let signer = Arc::new(UrlSigner::from_config("test-key"));
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new(
            signer.clone(),
            "http://localhost:9040".to_string(),
        ));
        let index = Arc::new(MemoryIndex::new());
        let gate = AuthorizationGate::new(TokenCache::new(
            Arc::new(StaticSecretStore::new("s3cret")),
            Duration::from_secs(1),
        ));
        let service = Arc::new(ImageService::new(
            index,
            store.clone(),
            gate,
            Duration::from_secs(3600),
            Duration::from_secs(5),
            10 * 1024 * 1024,
            vec!["jpg".into(), "png".into()],
        ));
        Arc::new(AppState {
            config,
            service,
            store,
            signer,
        })
    }

    fn multipart_body(boundary: &str, owner: &str) -> String {
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"owner_id\"\r\n\r\n\
             {owner}\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"category\"\r\n\r\n\
             post\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"tags\"\r\n\r\n\
             sunset,beach\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"visibility\"\r\n\r\n\
             public\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"sunset.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n\
             pixels\r\n\
             --{boundary}--\r\n"
        )
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = app(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["server"], "ImageVault");
        assert!(response.headers().contains_key("x-request-id"));

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_upload_requires_credentials() {
        let app = app(test_state());
        let boundary = "XBOUNDARYX";
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/images")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(multipart_body(boundary, "u1")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_upload_then_fetch_and_download() {
        let state = test_state();
        let app = app(state.clone());
        let boundary = "XBOUNDARYX";

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/images")
                    .header(header::AUTHORIZATION, "Bearer u1:s3cret")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(multipart_body(boundary, "u1")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["image"]["owner_id"], "u1");
        assert_eq!(json["image"]["filename"], "sunset.jpg");
        let asset_id = json["image"]["asset_id"].as_str().unwrap().to_string();
        let url = json["url"].as_str().unwrap().to_string();

        // Fetch the single record. Reads take no credential.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/images/{asset_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Follow the presigned URL (strip the configured base).
        let path_and_query = url.strip_prefix("http://localhost:9040").unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(path_and_query)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"pixels");
    }

    #[tokio::test]
    async fn test_download_with_bad_signature_is_unauthorized() {
        let state = test_state();
        let app = app(state.clone());
        state
            .store
            .put("images/u1/a1", bytes::Bytes::from_static(b"pixels"))
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/objects/images/u1/a1?expires=99999999999&signature=deadbeef")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_get_unknown_asset_is_404() {
        let app = app(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/images/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["error"], "NotFound");
    }

    #[tokio::test]
    async fn test_list_and_bulk_delete_flow() {
        let state = test_state();
        let app = app(state.clone());
        let boundary = "XBOUNDARYX";

        let mut asset_ids = Vec::new();
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/v1/images")
                        .header(header::AUTHORIZATION, "Bearer u1:s3cret")
                        .header(
                            header::CONTENT_TYPE,
                            format!("multipart/form-data; boundary={boundary}"),
                        )
                        .body(Body::from(multipart_body(boundary, "u1")))
                        .unwrap(),
                )
                .await
                .unwrap();
            let json = body_json(response).await;
            asset_ids.push(json["image"]["asset_id"].as_str().unwrap().to_string());
        }

        // List with a tag filter; no credential needed for reads.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/images?owner_id=u1&tags=sunset&limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["count"], 2);
        assert!(json["next_cursor"].is_string());

        // Bulk delete two of them plus one unknown id.
        let body = serde_json::json!({
            "owner_id": "u1",
            "asset_ids": [asset_ids[0], asset_ids[1], "missing"],
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/images")
                    .header(header::AUTHORIZATION, "Bearer u1:s3cret")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["deleted"].as_array().unwrap().len(), 2);
        assert_eq!(json["failed"][0]["asset_id"], "missing");
        assert_eq!(json["failed"][0]["reason"], "not_found");
    }

    #[tokio::test]
    async fn test_delete_single_image() {
        let state = test_state();
        let app = app(state.clone());
        let boundary = "XBOUNDARYX";

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/images")
                    .header(header::AUTHORIZATION, "Bearer u1:s3cret")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(multipart_body(boundary, "u1")))
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        let asset_id = json["image"]["asset_id"].as_str().unwrap().to_string();

        // Deletion is a mutation and still demands a credential.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/images/{asset_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/images/{asset_id}"))
                    .header(header::AUTHORIZATION, "Bearer u1:s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);

        // The record is gone.
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/images/{asset_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
