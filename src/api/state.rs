// src/api/state.rs
// Shared handler state

use std::sync::Arc;

use crate::lifecycle::LifecycleManager;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub version: &'static str,
}

impl AppState {
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            lifecycle,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
