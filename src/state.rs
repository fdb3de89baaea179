//! Shared application state, handed to every axum handler.

use crate::config::AppConfig;
use crate::scheduler::Scheduler;
use crate::store::Store;
use std::sync::Arc;

/// Everything a Control API handler needs, grounded on the shape of
/// `ActonHtmxState` (config + the long-lived components wired at
/// startup).
#[derive(Clone)]
pub struct AppState {
    /// Process-wide configuration.
    pub config: Arc<AppConfig>,
    /// Durable job registry.
    pub store: Arc<Store>,
    /// Cron schedule table and timer-loop.
    pub scheduler: Arc<Scheduler>,
}
