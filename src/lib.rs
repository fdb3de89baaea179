//! Cronmill: a scheduled-execution engine that fetches data, runs it
//! through a small transform pipeline, and emails the result as a CSV
//! attachment.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod mailer;
pub mod model;
pub mod observability;
pub mod sandbox;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod table;
pub mod uploads;

/// Commonly used types, re-exported for `main.rs` and integration tests.
pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::error::ApiError;
    pub use crate::executor::Executor;
    pub use crate::fetcher::{Fetcher, HttpFetcher};
    pub use crate::mailer::{EmailSender, SmtpMailer};
    pub use crate::model::Job;
    pub use crate::scheduler::Scheduler;
    pub use crate::state::AppState;
    pub use crate::store::Store;
}
