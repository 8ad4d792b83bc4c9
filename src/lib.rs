pub mod app;
pub mod backend;
pub mod binding;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod import;
pub mod mapper;
pub mod observability;
pub mod queue;
pub mod store;
pub mod worker;

pub use error::SyncError;
pub use export::{ConnectorEnv, ExportOutcome, Exporter};
