// src/tasks/metrics.rs

//! Task metrics tracking

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

/// Keep only the most recent durations per task
const MAX_DURATIONS: usize = 100;

#[derive(Default)]
pub struct TaskMetrics {
    runs: RwLock<HashMap<String, AtomicUsize>>,
    processed: RwLock<HashMap<String, AtomicUsize>>,
    errors: RwLock<HashMap<String, AtomicUsize>>,
    durations: RwLock<HashMap<String, Vec<Duration>>>,
}

fn bump(map: &RwLock<HashMap<String, AtomicUsize>>, task: &str, count: usize) {
    if let Some(counter) = map.read().get(task) {
        counter.fetch_add(count, Ordering::Relaxed);
        return;
    }
    map.write()
        .entry(task.to_string())
        .or_insert_with(|| AtomicUsize::new(0))
        .fetch_add(count, Ordering::Relaxed);
}

fn read(map: &RwLock<HashMap<String, AtomicUsize>>, task: &str) -> usize {
    map.read()
        .get(task)
        .map(|c| c.load(Ordering::Relaxed))
        .unwrap_or(0)
}

impl TaskMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self, task: &str) {
        bump(&self.runs, task, 1);
    }

    pub fn add_processed_items(&self, task: &str, count: usize) {
        bump(&self.processed, task, count);
    }

    pub fn record_error(&self, task: &str) {
        bump(&self.errors, task, 1);
    }

    pub fn record_task_duration(&self, task: &str, duration: Duration) {
        let mut map = self.durations.write();
        let durations = map.entry(task.to_string()).or_default();
        if durations.len() == MAX_DURATIONS {
            durations.remove(0);
        }
        durations.push(duration);
    }

    pub fn runs(&self, task: &str) -> usize {
        read(&self.runs, task)
    }

    pub fn processed(&self, task: &str) -> usize {
        read(&self.processed, task)
    }

    pub fn errors(&self, task: &str) -> usize {
        read(&self.errors, task)
    }

    pub fn average_duration(&self, task: &str) -> Option<Duration> {
        let map = self.durations.read();
        let durations = map.get(task).filter(|d| !d.is_empty())?;
        Some(durations.iter().sum::<Duration>() / durations.len() as u32)
    }

    pub fn report(&self) {
        let runs = self.runs.read();
        for (task, count) in runs.iter() {
            info!(
                "Task '{}': runs={}, processed={}, errors={}, avg={:?}",
                task,
                count.load(Ordering::Relaxed),
                self.processed(task),
                self.errors(task),
                self.average_duration(task).unwrap_or_default()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = TaskMetrics::new();
        metrics.record_run("sweep");
        metrics.record_run("sweep");
        metrics.add_processed_items("sweep", 3);
        metrics.record_error("sweep");
        assert_eq!(metrics.runs("sweep"), 2);
        assert_eq!(metrics.processed("sweep"), 3);
        assert_eq!(metrics.errors("sweep"), 1);
        assert_eq!(metrics.errors("other"), 0);
    }

    #[test]
    fn test_average_duration() {
        let metrics = TaskMetrics::new();
        assert!(metrics.average_duration("sweep").is_none());
        metrics.record_task_duration("sweep", Duration::from_millis(10));
        metrics.record_task_duration("sweep", Duration::from_millis(30));
        assert_eq!(
            metrics.average_duration("sweep"),
            Some(Duration::from_millis(20))
        );
    }
}
