pub mod config;
pub mod engine;
pub mod errors;
pub mod guard;
pub mod logger;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;

// Re-export common types
pub use crate::config::{AppConfig, DbPool};
pub use crate::errors::ApiError;
pub use crate::guard::AuthenticatedUser;
pub use crate::store::{MemoryStore, PgStore, Store};
