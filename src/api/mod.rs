// src/api/mod.rs
// HTTP surface of the broker

pub mod error;
pub mod http;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use http::create_router;
pub use state::AppState;
