//! Application State
//!
//! Shared by all handlers behind an `Arc`.

use crate::engine::Engine;
use crate::store::Database;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Direct store access for health checks and flag listing by state
    pub db: Arc<Database>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, db: Arc<Database>) -> Self {
        Self {
            engine,
            db,
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
