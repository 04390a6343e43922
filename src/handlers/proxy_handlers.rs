//! Resolver/proxy endpoints.
//!
//! `/api/proxy-attachment` serves object bytes by key (Case B, candidate
//! chain) or by explicit URL (Case A, single direct fetch), marking
//! successes as publicly cacheable and cross-origin readable.
//! `/api/check-attachment` is the lightweight reachability probe the client
//! uses before rendering an image.

use crate::{
    errors::AppError,
    services::{
        AppState,
        resolver_service::{ResolveError, ResolvedObject},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

/// Query params accepted by the proxy: exactly one of `key`/`url`.
#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub key: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub url: Option<String>,
}

/// GET `/api/proxy-attachment?key=...` or `?url=...`
pub async fn proxy_attachment(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Response {
    match (query.key, query.url) {
        (None, None) => {
            AppError::bad_request("either `key` or `url` is required").into_response()
        }
        (Some(_), Some(_)) => {
            AppError::bad_request("`key` and `url` are mutually exclusive").into_response()
        }
        (None, Some(url)) => match state.resolver.fetch_url(&url).await {
            Ok(object) => cacheable_response(object),
            Err(ResolveError::InvalidUrl(_)) => {
                AppError::bad_request("invalid url").into_response()
            }
            Err(ResolveError::Upstream { status, snippet }) => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (
                    status,
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    format!("Upstream returned {}\n\n{}", status.as_u16(), snippet),
                )
                    .into_response()
            }
            Err(err) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "ok": false, "message": err.to_string() })),
            )
                .into_response(),
        },
        (Some(key), None) => match state.resolver.resolve_key(&key).await {
            Ok(object) => cacheable_response(object),
            // Per-candidate failures were already logged inside the
            // resolver; only the exhaustion is reported here.
            Err(err) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "ok": false, "message": err.to_string(), "key": key })),
            )
                .into_response(),
        },
    }
}

/// GET `/api/check-attachment?url=...`
pub async fn check_attachment(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> Response {
    let Some(url) = query.url else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "url required" })),
        )
            .into_response();
    };

    match state.resolver.probe_url(&url).await {
        Ok(probe) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "status": probe.status,
                "contentType": probe.content_type,
                "urlOk": probe.ok,
            })),
        )
            .into_response(),
        Err(ResolveError::InvalidUrl(_)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "invalid url" })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}

/// Immutable-object response: resolved attachments never change under their
/// key, so aggressive edge caching is safe.
fn cacheable_response(object: ResolvedObject) -> Response {
    let mut response = Response::new(Body::from(object.bytes));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&object.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::services::{
        note_service::NoteService, resolver_service::ResolverService,
        upload_service::UploadService,
    };
    use axum::{Router, routing::get};
    use bytes::Bytes;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    async fn app_state(storage: StorageConfig, spool_dir: &std::path::Path) -> AppState {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE notes (
                id TEXT PRIMARY KEY NOT NULL,
                body TEXT NOT NULL,
                attachments TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        let db = Arc::new(pool);

        AppState {
            uploads: UploadService::new(None, storage.clone(), spool_dir),
            resolver: ResolverService::new(storage, None).unwrap(),
            notes: NoteService::new(db, None, None),
        }
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn spawn_relay(storage: StorageConfig, spool_dir: &std::path::Path) -> String {
        let state = app_state(storage, spool_dir).await;
        spawn(crate::routes::routes::routes().with_state(state)).await
    }

    fn unconfigured() -> StorageConfig {
        StorageConfig {
            storage_host: "r2.cloudflarestorage.com".into(),
            region: "auto".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_key_yields_502_naming_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let relay = spawn_relay(unconfigured(), dir.path()).await;

        let response = reqwest::get(format!("{relay}/api/proxy-attachment?key=missing-key"))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 502);
        let body = response.text().await.unwrap();
        assert!(body.contains("missing-key"), "body: {body}");
    }

    #[tokio::test]
    async fn invalid_url_is_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let relay = spawn_relay(unconfigured(), dir.path()).await;

        let response = reqwest::get(format!("{relay}/api/proxy-attachment?url=not%20a%20url"))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn missing_both_params_is_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let relay = spawn_relay(unconfigured(), dir.path()).await;

        let response = reqwest::get(format!("{relay}/api/proxy-attachment"))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn both_params_together_are_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let relay = spawn_relay(unconfigured(), dir.path()).await;

        let response = reqwest::get(format!(
            "{relay}/api/proxy-attachment?key=k&url=https%3A%2F%2Fexample.com%2Fk"
        ))
        .await
        .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn resolved_key_gets_cache_and_cors_headers() {
        let upstream = spawn(Router::new().route(
            "/pub/1_a_pic.png",
            get(|| async { ([("content-type", "image/png")], Bytes::from_static(b"pixels")) }),
        ))
        .await;

        let mut storage = unconfigured();
        storage.public_base_url = Some(format!("{upstream}/pub"));
        let dir = tempfile::tempdir().unwrap();
        let relay = spawn_relay(storage, dir.path()).await;

        let response = reqwest::get(format!("{relay}/api/proxy-attachment?key=1_a_pic.png"))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "image/png"
        );
        assert_eq!(
            response.headers().get("cache-control").unwrap(),
            "public, max-age=31536000, immutable"
        );
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"pixels");
    }

    #[tokio::test]
    async fn check_attachment_requires_url() {
        let dir = tempfile::tempdir().unwrap();
        let relay = spawn_relay(unconfigured(), dir.path()).await;

        let response = reqwest::get(format!("{relay}/api/check-attachment"))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }
}
