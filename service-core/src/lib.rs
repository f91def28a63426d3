//! service-core: Shared infrastructure for the bike-shop back-office services.
pub mod config;
pub mod error;
pub mod grpc;
pub mod middleware;
pub mod observability;
pub mod retry;

pub use axum;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tonic;
pub use tower_http;
pub use tracing;
pub use validator;
