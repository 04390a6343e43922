//! Service layer: upload writer, resolver/proxy, note persistence, and the
//! object-store client they share. Each client is built once at startup and
//! injected; handlers only see the bundled `AppState`.

pub mod note_service;
pub mod object_store;
pub mod resolver_service;
pub mod upload_service;

use note_service::NoteService;
use resolver_service::ResolverService;
use upload_service::UploadService;

/// Shared state carried by the router to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    pub resolver: ResolverService,
    pub notes: NoteService,
}
