//! Core data models for the attachment relay.
//!
//! These entities represent attachment descriptors minted at upload time and
//! the note records that own them. They map cleanly to the SQLite notes table
//! via `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod attachment;
pub mod note;
