use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::notifier::BroadcastNotifier;

/// Shared handles for every request.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub notifier: Arc<BroadcastNotifier>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        AppState {
            pool,
            config: Arc::new(config),
            notifier: Arc::new(BroadcastNotifier::default()),
        }
    }
}
