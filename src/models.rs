// src/models.rs
// Session, instance and catalog records

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Active,
    Expired,
    Deleted,
}

impl SessionStatus {
    /// Live sessions count against capacity and are subject to expiry
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Created | Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Running,
    Stopped,
    Deleted,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown instance status '{other}'")),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamps are kept at millisecond precision, the resolution the
/// durable store persists
pub fn to_stored_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

/// A user's binding to at most one compute instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: Option<String>,
    pub instance_id: Option<String>,
    pub gpu_type: Option<String>,
    pub gpu_count: u32,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: Option<String>, timeout: Duration, now: DateTime<Utc>) -> Self {
        let now = to_stored_precision(now);
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id,
            instance_id: None,
            gpu_type: None,
            gpu_count: 0,
            status: SessionStatus::Created,
            created_at: now,
            expires_at: to_stored_precision(
                now.checked_add_signed(timeout)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ),
            last_activity: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// `instance_id` may only be held by an active session
    pub fn holds_instance_consistently(&self) -> bool {
        self.instance_id.is_none() || self.status == SessionStatus::Active
    }
}

/// Partial update applied atomically by a session store.
///
/// `instance_id` is doubly optional: `Some(None)` clears the reference.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub instance_id: Option<Option<String>>,
    pub gpu_type: Option<String>,
    pub gpu_count: Option<u32>,
    pub status: Option<SessionStatus>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn instance(mut self, instance_id: Option<String>) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn gpu(mut self, gpu_type: impl Into<String>, gpu_count: u32) -> Self {
        self.gpu_type = Some(gpu_type.into());
        self.gpu_count = Some(gpu_count);
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn apply(&self, session: &mut Session, now: DateTime<Utc>) {
        if let Some(instance_id) = &self.instance_id {
            session.instance_id = instance_id.clone();
        }
        if let Some(gpu_type) = &self.gpu_type {
            session.gpu_type = Some(gpu_type.clone());
        }
        if let Some(gpu_count) = self.gpu_count {
            session.gpu_count = gpu_count;
        }
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(expires_at) = self.expires_at {
            session.expires_at = to_stored_precision(expires_at);
        }
        session.last_activity = to_stored_precision(now);
    }
}

/// A provisioned compute resource, as last reported by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub cpu_cores: u32,
    pub ram_gb: u32,
    pub status: InstanceStatus,
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// Read-only catalog entry sourced from the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuType {
    pub id: String,
    pub name: String,
    pub memory: String,
    #[serde(default)]
    pub compute_capability: String,
    pub price_per_hour: f64,
    pub available: bool,
}

/// Shape hints sent along with a provision request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHints {
    pub cpu_cores: u32,
    pub ram_gb: u32,
    pub user_id: Option<String>,
    pub environment: String,
    pub frameworks: Vec<String>,
}

impl Default for ResourceHints {
    fn default() -> Self {
        Self {
            cpu_cores: 8,
            ram_gb: 32,
            user_id: None,
            environment: "jupyter".to_string(),
            frameworks: vec![
                "pytorch".to_string(),
                "tensorflow".to_string(),
                "jax".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            SessionStatus::Created,
            SessionStatus::Active,
            SessionStatus::Expired,
            SessionStatus::Deleted,
        ] {
            assert_eq!(status.to_string().parse::<SessionStatus>(), Ok(status));
        }
        assert!("provisioning".parse::<SessionStatus>().is_err());
        assert_eq!("RUNNING".parse::<InstanceStatus>(), Ok(InstanceStatus::Running));
    }

    #[test]
    fn test_new_session_defaults() {
        let now = Utc::now();
        let session = Session::new(Some("alice".into()), Duration::minutes(30), now);
        assert_eq!(session.status, SessionStatus::Created);
        assert_eq!(session.expires_at, session.created_at + Duration::minutes(30));
        assert!(session.instance_id.is_none());
        assert!(Uuid::parse_str(&session.session_id).is_ok());
        assert!(!session.is_expired_at(session.created_at));
        assert!(session.is_expired_at(now + Duration::minutes(30)));
    }

    #[test]
    fn test_patch_clears_instance() {
        let now = Utc::now();
        let mut session = Session::new(None, Duration::hours(1), now);
        SessionPatch::default()
            .instance(Some("inst-1".into()))
            .status(SessionStatus::Active)
            .gpu("nvidia-t4", 2)
            .apply(&mut session, now);
        assert_eq!(session.instance_id.as_deref(), Some("inst-1"));
        assert_eq!(session.gpu_count, 2);

        SessionPatch::default()
            .instance(None)
            .status(SessionStatus::Expired)
            .apply(&mut session, now);
        assert!(session.instance_id.is_none());
        assert_eq!(session.gpu_type.as_deref(), Some("nvidia-t4"));
        assert!(session.holds_instance_consistently());
    }

    #[test]
    fn test_timestamps_truncated_to_millis() {
        let now = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let mut session = Session::new(None, Duration::nanoseconds(1_500_000), now);
        assert_eq!(session.created_at.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(session.expires_at.timestamp_subsec_nanos(), 124_000_000);

        SessionPatch::default()
            .expires_at(now + Duration::hours(1))
            .apply(&mut session, now);
        assert_eq!(session.expires_at.timestamp_subsec_millis(), 123);
        assert_eq!(session.expires_at.timestamp_subsec_nanos() % 1_000_000, 0);
        assert_eq!(session.last_activity, session.created_at);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Active).unwrap();
        assert_eq!(json, "\"active\"");
    }
}
