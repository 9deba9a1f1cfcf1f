// src/tasks/mod.rs

//! Background task management: periodic expiry sweep and metrics reporting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info};

use crate::lifecycle::LifecycleManager;

pub mod metrics;

use metrics::TaskMetrics;

const SWEEP_TASK: &str = "sweep";
const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(3600);

/// Owns the spawned background tasks; dropping it does not stop them, call `shutdown`.
pub struct TaskManager {
    lifecycle: Arc<LifecycleManager>,
    sweep_interval: Duration,
    metrics: Arc<TaskMetrics>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskManager {
    pub fn new(lifecycle: Arc<LifecycleManager>, sweep_interval: Duration) -> Self {
        Self {
            lifecycle,
            sweep_interval,
            metrics: Arc::new(TaskMetrics::new()),
            handles: Vec::new(),
        }
    }

    pub fn metrics(&self) -> Arc<TaskMetrics> {
        self.metrics.clone()
    }

    pub fn start(&mut self) {
        if self.sweep_interval.is_zero() {
            info!("Expiry sweep disabled");
        } else {
            let handle = self.spawn_sweeper();
            self.handles.push(handle);

            let handle = self.spawn_metrics_reporter();
            self.handles.push(handle);
        }
        info!("Started {} background tasks", self.handles.len());
    }

    pub fn running(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("Background tasks stopped");
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let lifecycle = self.lifecycle.clone();
        let metrics = self.metrics.clone();
        let interval = self.sweep_interval;

        tokio::spawn(async move {
            info!("Expiry sweeper started (interval: {:?})", interval);

            let mut timer = time::interval(interval);
            // A slow sweep must not cause a burst of catch-up runs
            timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it so startup is quiet
            timer.tick().await;

            loop {
                timer.tick().await;
                run_sweep(&lifecycle, &metrics).await;
            }
        })
    }

    fn spawn_metrics_reporter(&self) -> JoinHandle<()> {
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let mut timer = time::interval(METRICS_REPORT_INTERVAL);
            timer.tick().await;
            loop {
                timer.tick().await;
                metrics.report();
            }
        })
    }
}

/// One sweep pass with metrics bookkeeping
pub async fn run_sweep(lifecycle: &LifecycleManager, metrics: &TaskMetrics) {
    let started = Instant::now();
    match lifecycle.sweep(Utc::now()).await {
        Ok(report) if report.skipped_overlap => {}
        Ok(report) => {
            metrics.record_run(SWEEP_TASK);
            metrics.add_processed_items(SWEEP_TASK, report.expired);
            for _ in 0..report.failed {
                metrics.record_error(SWEEP_TASK);
            }
            metrics.record_task_duration(SWEEP_TASK, started.elapsed());
        }
        Err(e) => {
            error!("Expiry sweep failed: {}", e);
            metrics.record_run(SWEEP_TASK);
            metrics.record_error(SWEEP_TASK);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::lifecycle::LifecycleSettings;
    use crate::store::Storage;

    fn lifecycle(session_timeout: Duration) -> Arc<LifecycleManager> {
        let settings = LifecycleSettings {
            session_timeout,
            ..LifecycleSettings::default()
        };
        Arc::new(LifecycleManager::new(
            Storage::memory(),
            Arc::new(MockGateway::new()),
            settings,
        ))
    }

    #[tokio::test]
    async fn test_run_sweep_records_metrics() {
        let lifecycle = lifecycle(Duration::ZERO);
        lifecycle.create_session(None).await.unwrap();

        let metrics = TaskMetrics::new();
        run_sweep(&lifecycle, &metrics).await;
        assert_eq!(metrics.runs(SWEEP_TASK), 1);
        assert_eq!(metrics.processed(SWEEP_TASK), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweeper_expires_sessions() {
        let lifecycle = lifecycle(Duration::ZERO);
        let session = lifecycle.create_session(None).await.unwrap();

        let mut manager = TaskManager::new(lifecycle.clone(), Duration::from_secs(60));
        manager.start();
        assert_eq!(manager.running(), 2);

        time::sleep(Duration::from_secs(61)).await;
        for _ in 0..50 {
            if manager.metrics().runs(SWEEP_TASK) > 0 {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }

        let session = lifecycle.get_session(&session.session_id).await.unwrap();
        assert_eq!(session.status, crate::models::SessionStatus::Expired);
        assert_eq!(manager.metrics().runs(SWEEP_TASK), 1);

        manager.shutdown();
    }

    #[tokio::test]
    async fn test_zero_interval_disables_sweeper() {
        let mut manager = TaskManager::new(lifecycle(Duration::from_secs(60)), Duration::ZERO);
        manager.start();
        assert_eq!(manager.running(), 0);
    }
}
