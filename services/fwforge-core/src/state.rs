//! Application state shared across the liveness/readiness HTTP surface.

use std::sync::Arc;

use crate::db::Database;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: Database,
}

impl AppState {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(AppStateInner { db }),
        }
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.inner.db
    }
}
