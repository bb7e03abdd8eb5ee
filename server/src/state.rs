use crate::auth::SessionKeys;
use crate::database::Database;
use crate::error::AppError;
use crate::ingest::ImageIngestor;
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything a request handler needs. Built once in `run` and cloned into
/// each request; no module keeps its own global client.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub ingestor: Arc<ImageIngestor>,
    pub sessions: Arc<SessionKeys>,
}

impl AppState {
    pub fn new(db: Database, ingestor: ImageIngestor, sessions: SessionKeys) -> Self {
        AppState {
            db: Arc::new(Mutex::new(db)),
            ingestor: Arc::new(ingestor),
            sessions: Arc::new(sessions),
        }
    }

    /// Locks the database. Never hold the guard across an `.await`.
    pub fn db(&self) -> Result<MutexGuard<'_, Database>, AppError> {
        self.db
            .lock()
            .map_err(|_| AppError::Internal("Failed to lock database".to_string()))
    }
}
