//! Note persistence and the deletion coordinator.
//!
//! Notes are created and deleted atomically; attachments never change in
//! place. Deleting a note removes its attachment objects from the bucket
//! first and only then the database row, so a storage failure leaves the
//! note intact rather than dangling at missing objects. The reverse cost —
//! orphaned objects if the row delete fails afterwards — is accepted as
//! irreducible without distributed transactions.

use crate::{
    models::{attachment::Attachment, note::Note},
    services::object_store::ObjectStorage,
};
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::types::Json;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("note `{0}` not found")]
    NotFound(Uuid),
    #[error("failed to delete attachment objects: {0}")]
    StorageCleanup(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type NoteResult<T> = Result<T, NoteError>;

#[derive(Clone)]
pub struct NoteService {
    /// Shared SQLite connection pool for note records.
    pub db: Arc<SqlitePool>,
    store: Option<Arc<dyn ObjectStorage>>,
    bucket: Option<String>,
}

impl NoteService {
    pub fn new(
        db: Arc<SqlitePool>,
        store: Option<Arc<dyn ObjectStorage>>,
        bucket: Option<String>,
    ) -> Self {
        Self { db, store, bucket }
    }

    /// Insert a note with its attachment descriptors in one statement.
    pub async fn create_note(
        &self,
        body: String,
        attachments: Vec<Attachment>,
    ) -> NoteResult<Note> {
        let note = sqlx::query_as::<_, Note>(
            "INSERT INTO notes (id, body, attachments, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING id, body, attachments, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&body)
        .bind(Json(attachments))
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        Ok(note)
    }

    pub async fn fetch_note(&self, id: Uuid) -> NoteResult<Note> {
        sqlx::query_as::<_, Note>(
            "SELECT id, body, attachments, created_at FROM notes WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => NoteError::NotFound(id),
            other => NoteError::Sqlx(other),
        })
    }

    pub async fn list_notes(&self) -> NoteResult<Vec<Note>> {
        let notes = sqlx::query_as::<_, Note>(
            "SELECT id, body, attachments, created_at FROM notes ORDER BY created_at DESC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(notes)
    }

    /// Delete a note and its attachment objects.
    ///
    /// `attachments` lets the caller pass the descriptors it holds (the
    /// historical client behavior); when empty, the stored descriptors are
    /// used. Objects are removed first; any storage failure aborts the
    /// operation and the note row is kept. Returns the number of storage
    /// keys removed.
    pub async fn delete_note(&self, id: Uuid, attachments: &[Attachment]) -> NoteResult<usize> {
        let note = self.fetch_note(id).await?;
        let descriptors: Vec<Attachment> = if attachments.is_empty() {
            note.attachments.0
        } else {
            attachments.to_vec()
        };

        let keys: Vec<String> = descriptors
            .iter()
            .filter_map(|a| a.storage_key(self.bucket.as_deref()))
            .collect();

        if !keys.is_empty() {
            let store = self.store.as_ref().ok_or_else(|| {
                NoteError::StorageCleanup("object storage is not configured".into())
            })?;
            for key in &keys {
                store
                    .delete(key)
                    .await
                    .map_err(|err| NoteError::StorageCleanup(format!("deleting `{key}`: {err}")))?;
            }
            debug!(note_id = %id, count = keys.len(), "deleted attachment objects");
        }

        let result = sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(NoteError::NotFound(id));
        }

        Ok(keys.len())
    }
}
