use sqlx::PgPool;
use std::sync::Arc;

use crate::services::lock::SweepLock;

/// Shared state of the ops server.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Present when `REDIS_URL` is configured.
    pub lock: Option<Arc<SweepLock>>,
}

impl AppState {
    pub fn new(db: PgPool, lock: Option<SweepLock>) -> Self {
        Self {
            db,
            lock: lock.map(Arc::new),
        }
    }
}
