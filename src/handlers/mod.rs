pub mod health_handlers;
pub mod note_handlers;
pub mod proxy_handlers;
pub mod upload_handlers;
