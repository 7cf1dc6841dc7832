pub mod deletion_coordinator;
pub mod document_service;
pub mod path_locks;
pub mod staging;
pub mod upload_coordinator;

pub use document_service::DocumentService;
pub use staging::{StagedFile, StagingArea};
pub use upload_coordinator::UploadRequest;
