//! Note endpoints: atomic create, list, fetch, and the deletion coordinator
//! boundary. The delete response shape (`success`/`error`/`details`) matches
//! what the note client expects.

use crate::{
    errors::AppError,
    models::{attachment::Attachment, note::Note},
    services::{AppState, note_service::NoteError},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNoteRequest {
    pub note_id: Uuid,
    /// Descriptors held by the client; when empty the stored ones are used.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// POST `/api/notes`
pub async fn create_note(
    State(state): State<AppState>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let note = state.notes.create_note(req.body, req.attachments).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

/// GET `/api/notes`
pub async fn list_notes(State(state): State<AppState>) -> Result<Json<Vec<Note>>, AppError> {
    Ok(Json(state.notes.list_notes().await?))
}

/// GET `/api/notes/{id}`
pub async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Note>, AppError> {
    Ok(Json(state.notes.fetch_note(id).await?))
}

/// POST `/api/delete-note`
///
/// Objects first, row second: a storage failure keeps the note so it never
/// dangles at missing objects.
pub async fn delete_note(
    State(state): State<AppState>,
    Json(req): Json<DeleteNoteRequest>,
) -> Response {
    match state.notes.delete_note(req.note_id, &req.attachments).await {
        Ok(_) => Json(json!({ "success": true })).into_response(),
        Err(err @ NoteError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": "note not found",
                "details": err.to_string(),
            })),
        )
            .into_response(),
        Err(NoteError::StorageCleanup(details)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": "failed to delete attachment objects",
                "details": details,
            })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": "failed to delete note",
                "details": err.to_string(),
            })),
        )
            .into_response(),
    }
}
