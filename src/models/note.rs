//! Represents a note record owning an ordered set of attachments.

use crate::models::attachment::Attachment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

/// A note as persisted in SQLite.
///
/// Notes are immutable apart from atomic create and atomic delete; there is
/// no update-in-place of attachments. The attachments column holds the JSON
/// descriptor array in upload order.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Note {
    /// Unique identifier (UUID for internal DB use).
    pub id: Uuid,

    /// Free-text body of the note.
    pub body: String,

    /// Attachment descriptors, insertion order = upload order.
    pub attachments: Json<Vec<Attachment>>,

    /// When this note was created.
    pub created_at: DateTime<Utc>,
}
