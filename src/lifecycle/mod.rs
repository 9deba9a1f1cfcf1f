// src/lifecycle/mod.rs
// Session/instance lifecycle: the only place that touches both the stores
// and the provisioning gateway.
//
//   created --select--> active --select--> active (old instance torn down first)
//   active  --extend--> active
//   created|active --sweep--> expired
//   created|active|expired --delete--> deleted (then purged)

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::gateway::{GatewayError, GatewayResult, ProvisioningGateway};
use crate::models::{
    GpuType, Instance, InstanceStatus, ResourceHints, Session, SessionPatch, SessionStatus,
};
use crate::store::{EXPIRED_PAGE_SIZE, Storage, expired_sessions};

pub mod locks;
pub mod orphans;

use locks::SessionLocks;
use orphans::{OrphanLog, OrphanedResource, TeardownStage};

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub session_timeout: Duration,
    pub max_sessions: usize,
    pub gateway_timeout: Duration,
    pub provision_timeout: Duration,
    pub expired_retention: Duration,
    pub cpu_cores: u32,
    pub ram_gb: u32,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&BrokerConfig::default())
    }
}

impl From<&BrokerConfig> for LifecycleSettings {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            session_timeout: config.session_timeout,
            max_sessions: config.max_sessions,
            gateway_timeout: config.gateway_timeout,
            provision_timeout: config.provision_timeout,
            expired_retention: config.expired_retention,
            cpu_cores: config.default_cpu_cores,
            ram_gb: config.default_ram_gb,
        }
    }
}

/// Row of the instance listing: one per session currently holding an instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub id: String,
    pub session_id: String,
    pub gpu_type: Option<String>,
    pub status: SessionStatus,
    pub instance_status: Option<InstanceStatus>,
}

/// Result of one expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub purged: usize,
    pub failed: usize,
    pub skipped_overlap: bool,
}

pub struct LifecycleManager {
    storage: Storage,
    gateway: Arc<dyn ProvisioningGateway>,
    settings: LifecycleSettings,
    locks: SessionLocks,
    // Capacity check and insert must not interleave
    create_lock: AsyncMutex<()>,
    sweep_lock: AsyncMutex<()>,
    orphans: OrphanLog,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// `now + duration`, saturating instead of panicking on absurd configuration
fn deadline(now: DateTime<Utc>, duration: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(duration)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn provisioning_failed(err: GatewayError) -> BrokerError {
    BrokerError::provisioning(err.to_string())
}

impl LifecycleManager {
    pub fn new(
        storage: Storage,
        gateway: Arc<dyn ProvisioningGateway>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            storage,
            gateway,
            settings,
            locks: SessionLocks::new(),
            create_lock: AsyncMutex::new(()),
            sweep_lock: AsyncMutex::new(()),
            orphans: OrphanLog::new(),
        }
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn orphaned_resources(&self) -> Vec<OrphanedResource> {
        self.orphans.snapshot()
    }

    /// Bound a gateway call; an elapsed timer is reported like any other failure
    async fn bounded<T, F>(&self, limit: Duration, call: F) -> GatewayResult<T>
    where
        F: Future<Output = GatewayResult<T>>,
    {
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(GatewayError::Timeout))
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        deadline(now, to_chrono(self.settings.session_timeout))
    }

    // ── Sessions

    pub async fn create_session(&self, user_id: Option<String>) -> Result<Session> {
        let _guard = self.create_lock.lock().await;

        let live = self.storage.sessions.count_live().await?;
        if live >= self.settings.max_sessions {
            warn!(live, limit = self.settings.max_sessions, "session capacity reached");
            return Err(BrokerError::CapacityExceeded {
                limit: self.settings.max_sessions,
            });
        }

        let session = Session::new(user_id, to_chrono(self.settings.session_timeout), Utc::now());
        let session = self.storage.sessions.create(session).await?;
        info!(
            session_id = %session.session_id,
            user_id = ?session.user_id,
            "Created session"
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.storage.sessions.get(session_id).await
    }

    pub async fn sessions(&self) -> Result<Vec<Session>> {
        self.storage.sessions.list().await
    }

    /// Most recent live session of a user
    pub async fn user_session(&self, user_id: &str) -> Result<Session> {
        self.storage
            .sessions
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| BrokerError::SessionNotFound(format!("user {user_id}")))
    }

    /// Unknown sessions are reported before a bad `hours` value
    pub async fn extend(&self, session_id: &str, hours: i64) -> Result<Session> {
        let _guard = self.locks.acquire(session_id).await;
        let session = self.storage.sessions.get(session_id).await?;

        if hours <= 0 {
            return Err(BrokerError::invalid(format!(
                "extension must be a positive number of hours, got {hours}"
            )));
        }
        let extension = chrono::Duration::try_hours(hours)
            .ok_or_else(|| BrokerError::invalid(format!("extension of {hours} hours is too large")))?;

        if !session.status.is_live() {
            return Err(BrokerError::invalid(format!(
                "session {session_id} is {}",
                session.status
            )));
        }

        let base = session.expires_at.max(Utc::now());
        let session = self
            .storage
            .sessions
            .update(session_id, SessionPatch::default().expires_at(deadline(base, extension)))
            .await?;
        info!(session_id, hours, expires_at = %session.expires_at, "Extended session");
        Ok(session)
    }

    // ── Compute

    pub async fn list_gpu_types(&self) -> Result<Vec<GpuType>> {
        self.bounded(self.settings.gateway_timeout, self.gateway.list_gpu_types())
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch GPU catalog");
                provisioning_failed(e)
            })
    }

    async fn validate_gpu(&self, gpu_type: &str, gpu_count: u32) -> Result<()> {
        if gpu_count == 0 {
            return Err(BrokerError::invalid("gpu_count must be at least 1"));
        }
        let catalog = self.list_gpu_types().await?;
        match catalog.iter().find(|g| g.id == gpu_type) {
            None => Err(BrokerError::invalid(format!("unknown gpu_type '{gpu_type}'"))),
            Some(g) if !g.available => Err(BrokerError::invalid(format!(
                "gpu_type '{gpu_type}' is not currently available"
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Provision compute for a session, replacing any instance it already holds.
    ///
    /// On provisioning failure the session record is left exactly as it was.
    pub async fn select_compute(
        &self,
        session_id: &str,
        gpu_type: &str,
        gpu_count: u32,
    ) -> Result<Session> {
        let _guard = self.locks.acquire(session_id).await;

        let session = self.storage.sessions.get(session_id).await?;
        if !session.status.is_live() {
            return Err(BrokerError::invalid(format!(
                "session {session_id} is {}",
                session.status
            )));
        }
        self.validate_gpu(gpu_type, gpu_count).await?;

        if let Some(old) = &session.instance_id {
            info!(session_id, instance_id = %old, "Releasing previous instance before re-provisioning");
            self.release_instance(session_id, old).await;
        }

        let hints = ResourceHints {
            cpu_cores: self.settings.cpu_cores,
            ram_gb: self.settings.ram_gb,
            user_id: session.user_id.clone(),
            ..ResourceHints::default()
        };

        info!(session_id, gpu_type, gpu_count, "Provisioning instance");
        let started = Instant::now();
        let instance = self
            .bounded(
                self.settings.provision_timeout,
                self.gateway.provision(gpu_type, gpu_count, &hints),
            )
            .await
            .map_err(|e| {
                warn!(session_id, gpu_type, error = %e, "Provisioning failed");
                if let Some(old) = &session.instance_id {
                    warn!(
                        session_id,
                        instance_id = %old,
                        "Session still references its released instance"
                    );
                }
                provisioning_failed(e)
            })?;

        match self.attach(session_id, &instance, gpu_type, gpu_count).await {
            Ok(session) => {
                info!(
                    session_id,
                    instance_id = %instance.instance_id,
                    elapsed = ?started.elapsed(),
                    "Instance provisioned"
                );
                Ok(session)
            }
            Err(e) => {
                // Nothing references the new instance; give it back
                error!(session_id, instance_id = %instance.instance_id, error = %e, "Failed to record instance");
                self.release_instance(session_id, &instance.instance_id).await;
                Err(e)
            }
        }
    }

    async fn attach(
        &self,
        session_id: &str,
        instance: &Instance,
        gpu_type: &str,
        gpu_count: u32,
    ) -> Result<Session> {
        self.storage.instances.put(instance.clone()).await?;
        self.storage
            .sessions
            .update(
                session_id,
                SessionPatch::default()
                    .instance(Some(instance.instance_id.clone()))
                    .gpu(gpu_type, gpu_count)
                    .status(SessionStatus::Active)
                    .expires_at(self.expiry_from(Utc::now())),
            )
            .await
    }

    /// Stop then delete an instance. Failures become orphan events, never errors.
    /// Returns true when the provider confirmed deletion.
    async fn release_instance(&self, session_id: &str, instance_id: &str) -> bool {
        let limit = self.settings.gateway_timeout;

        let stopped = match self.bounded(limit, self.gateway.stop(instance_id)).await {
            Ok(()) => true,
            Err(e) => {
                self.orphans
                    .record(session_id, instance_id, TeardownStage::Stop, e.to_string());
                false
            }
        };

        // Delete is attempted even if stop failed
        let deleted = match self.bounded(limit, self.gateway.delete(instance_id)).await {
            Ok(()) => true,
            Err(e) => {
                self.orphans
                    .record(session_id, instance_id, TeardownStage::Delete, e.to_string());
                false
            }
        };

        let local_status = if deleted {
            Some(InstanceStatus::Deleted)
        } else if stopped {
            Some(InstanceStatus::Stopped)
        } else {
            None
        };
        if let Some(status) = local_status
            && let Err(e) = self.storage.instances.set_status(instance_id, status).await
        {
            debug!(instance_id, error = %e, "No local instance record to update");
        }

        deleted
    }

    /// Release a session's instance and mark the session with a terminal status.
    /// Caller must hold the session lock.
    async fn retire_locked(&self, session: &Session, status: SessionStatus) -> Result<Session> {
        if let Some(instance_id) = &session.instance_id {
            self.release_instance(&session.session_id, instance_id).await;
        }
        self.storage
            .sessions
            .update(
                &session.session_id,
                SessionPatch::default().instance(None).status(status),
            )
            .await
    }

    /// Tear down a session's instance and mark it deleted.
    ///
    /// Gateway failures are recorded as orphans and do not fail the call.
    pub async fn teardown(&self, session_id: &str) -> Result<Session> {
        let _guard = self.locks.acquire(session_id).await;
        let session = self.storage.sessions.get(session_id).await?;
        self.retire_locked(&session, SessionStatus::Deleted).await
    }

    /// Idempotent delete: teardown, then purge the record
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        {
            let _guard = self.locks.acquire(session_id).await;
            match self.storage.sessions.get(session_id).await {
                Ok(session) => {
                    self.retire_locked(&session, SessionStatus::Deleted).await?;
                    self.storage.sessions.delete(session_id).await?;
                    info!(session_id, "Deleted session");
                }
                Err(BrokerError::SessionNotFound(_)) => {
                    debug!(session_id, "Delete of unknown session ignored");
                }
                Err(e) => return Err(e),
            }
        }
        self.locks.prune(session_id);
        Ok(())
    }

    /// Expire every live session past its deadline and release its instance.
    ///
    /// Overlapping calls return immediately with `skipped_overlap`. Sessions
    /// already expired or deleted are skipped, so re-running after an
    /// interruption is safe.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let Ok(_sweep_guard) = self.sweep_lock.try_lock() else {
            debug!("Sweep already running, skipping");
            return Ok(SweepReport {
                skipped_overlap: true,
                ..SweepReport::default()
            });
        };

        let mut report = SweepReport::default();
        let mut expired = Box::pin(expired_sessions(
            self.storage.sessions.clone(),
            now,
            EXPIRED_PAGE_SIZE,
        ));

        while let Some(candidate) = expired.next().await {
            let candidate = candidate?;
            let session_id = candidate.session_id.as_str();

            let _guard = self.locks.acquire(session_id).await;
            // Re-read under the lock: it may have been extended or deleted meanwhile
            let session = match self.storage.sessions.get(session_id).await {
                Ok(s) => s,
                Err(BrokerError::SessionNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !session.status.is_live() || !session.is_expired_at(now) {
                continue;
            }

            match self.retire_locked(&session, SessionStatus::Expired).await {
                Ok(_) => {
                    info!(session_id, "Expired session");
                    report.expired += 1;
                }
                Err(e) => {
                    error!(session_id, error = %e, "Failed to expire session");
                    report.failed += 1;
                }
            }
        }

        report.purged = self.purge_expired(now).await?;
        if report.expired > 0 || report.purged > 0 {
            info!(
                expired = report.expired,
                purged = report.purged,
                "Sweep complete"
            );
        }
        Ok(report)
    }

    /// Number of sessions moved to `expired` by this sweep
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.sweep(now).await?.expired)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now
            .checked_sub_signed(to_chrono(self.settings.expired_retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stale: Vec<String> = self
            .storage
            .sessions
            .list()
            .await?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Expired && s.expires_at <= cutoff)
            .map(|s| s.session_id)
            .collect();

        for session_id in &stale {
            self.storage.sessions.delete(session_id).await?;
            self.locks.prune(session_id);
        }
        Ok(stale.len())
    }

    // ── Instances

    /// Re-query the provider and refresh the local instance cache
    pub async fn refresh_instance(&self, instance_id: &str) -> Result<Instance> {
        match self
            .bounded(self.settings.gateway_timeout, self.gateway.get_status(instance_id))
            .await
        {
            Ok(instance) => {
                self.storage.instances.put(instance.clone()).await?;
                Ok(instance)
            }
            Err(GatewayError::NotFound(_)) => {
                if let Err(e) = self
                    .storage
                    .instances
                    .set_status(instance_id, InstanceStatus::Deleted)
                    .await
                {
                    debug!(instance_id, error = %e, "No local instance record to mark deleted");
                }
                Err(BrokerError::InstanceNotFound(instance_id.to_string()))
            }
            Err(e) => Err(provisioning_failed(e)),
        }
    }

    pub async fn stop_instance(&self, instance_id: &str) -> Result<()> {
        self.bounded(self.settings.gateway_timeout, self.gateway.stop(instance_id))
            .await
            .map_err(|e| {
                error!(instance_id, error = %e, "Failed to stop instance");
                provisioning_failed(e)
            })?;
        if let Err(e) = self
            .storage
            .instances
            .set_status(instance_id, InstanceStatus::Stopped)
            .await
        {
            debug!(instance_id, error = %e, "No local instance record to mark stopped");
        }
        info!(instance_id, "Stopped instance");
        Ok(())
    }

    pub async fn list_instances(&self) -> Result<Vec<InstanceSummary>> {
        let sessions = self.storage.sessions.list().await?;
        let mut summaries = Vec::new();
        for session in sessions {
            let Some(instance_id) = session.instance_id else {
                continue;
            };
            let instance_status = self
                .storage
                .instances
                .get(&instance_id)
                .await
                .ok()
                .map(|i| i.status);
            summaries.push(InstanceSummary {
                id: instance_id,
                session_id: session.session_id,
                gpu_type: session.gpu_type,
                status: session.status,
                instance_status,
            });
        }
        Ok(summaries)
    }
}
