// src/lifecycle/orphans.rs
// Record of instances whose teardown failed and may still be running upstream

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

const MAX_EVENTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownStage {
    Stop,
    Delete,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanedResource {
    pub session_id: String,
    pub instance_id: String,
    pub stage: TeardownStage,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Bounded ring of the most recent orphan events
#[derive(Default)]
pub struct OrphanLog {
    events: Mutex<VecDeque<OrphanedResource>>,
}

impl OrphanLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, session_id: &str, instance_id: &str, stage: TeardownStage, reason: String) {
        warn!(
            target: "nbcompute::orphan",
            session_id,
            instance_id,
            stage = ?stage,
            reason = %reason,
            "instance teardown failed; resource may be orphaned"
        );

        let mut events = self.events.lock();
        if events.len() == MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(OrphanedResource {
            session_id: session_id.to_string(),
            instance_id: instance_id.to_string(),
            stage,
            reason,
            recorded_at: Utc::now(),
        });
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<OrphanedResource> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
