// src/lib.rs

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod mock_server;
pub mod models;
pub mod store;
pub mod tasks;

pub use error::{BrokerError, Result};
