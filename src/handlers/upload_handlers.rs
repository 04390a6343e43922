//! HTTP handler for multipart attachment uploads.
//!
//! Requests are handled in two phases: the whole payload is spooled to disk
//! first, then each file is written to the bucket in input order. A parse
//! failure therefore rejects the request before any bucket write, and a
//! write failure aborts the remaining files in the batch.

use crate::{
    errors::AppError,
    models::attachment::Attachment,
    services::{AppState, upload_service::SpooledUpload},
};
use axum::{
    Json,
    extract::{Multipart, State},
};
use futures::StreamExt;
use serde::Serialize;
use std::io;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub files: Vec<Attachment>,
}

/// POST `/api/upload` — accepts one or more files, responds with their
/// attachment descriptors in input order.
pub async fn upload_attachments(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    // Phase 1: spool everything before touching the bucket.
    let mut spooled: Vec<SpooledUpload> = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                state.uploads.discard_all(&spooled).await;
                return Err(AppError::bad_request(format!(
                    "malformed multipart payload: {err}"
                )));
            }
        };

        // Non-file form fields are ignored.
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);

        let stream =
            field.map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));
        match state.uploads.spool(stream).await {
            Ok((path, size)) => spooled.push(SpooledUpload {
                name,
                content_type,
                path,
                size,
            }),
            Err(err) => {
                state.uploads.discard_all(&spooled).await;
                return Err(AppError::bad_request(format!(
                    "reading multipart payload: {err}"
                )));
            }
        }
    }

    if spooled.is_empty() {
        return Err(AppError::bad_request("no files found in request"));
    }

    // Phase 2: write in input order; the first failure aborts the batch and
    // names the failing file.
    let mut files = Vec::with_capacity(spooled.len());
    for (index, upload) in spooled.iter().enumerate() {
        match state.uploads.store_spooled(upload).await {
            Ok(descriptor) => files.push(descriptor),
            Err(err) => {
                state.uploads.discard_all(&spooled[index..]).await;
                let base = AppError::from(err);
                return Err(AppError::new(
                    base.status,
                    format!("upload failed for `{}`", upload.name),
                )
                .with_details(base.message));
            }
        }
    }

    Ok(Json(UploadResponse { files }))
}
