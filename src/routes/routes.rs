//! Defines routes for the attachment relay.
//!
//! ## Structure
//! - **Attachment endpoints**
//!   - `POST /api/upload`            — multipart upload, returns descriptors
//!   - `GET  /api/proxy-attachment`  — serve object bytes by `key` or `url`
//!   - `GET  /api/check-attachment`  — reachability probe for a `url`
//!
//! - **Note endpoints**
//!   - `POST /api/notes`        — create note with attachments (atomic)
//!   - `GET  /api/notes`        — list notes, newest first
//!   - `GET  /api/notes/{id}`   — fetch one note
//!   - `POST /api/delete-note`  — delete objects, then the note row

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        note_handlers::{create_note, delete_note, get_note, list_notes},
        proxy_handlers::{check_attachment, proxy_attachment},
        upload_handlers::upload_attachments,
    },
    services::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Upper bound on a multipart upload request (images and PDFs).
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Build and return the router for all relay routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // attachment endpoints
        .route(
            "/api/upload",
            post(upload_attachments).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/proxy-attachment", get(proxy_attachment))
        .route("/api/check-attachment", get(check_attachment))
        // note endpoints
        .route("/api/notes", post(create_note).get(list_notes))
        .route("/api/notes/{id}", get(get_note))
        .route("/api/delete-note", post(delete_note))
}
