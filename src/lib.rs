pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;


use std::sync::Arc;

use services::{DocumentService, StagingArea};

/// Shared state handed to every request handler
pub struct AppState {
    pub documents: Arc<DocumentService>,
    pub staging: Arc<StagingArea>,
}
