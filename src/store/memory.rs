// src/store/memory.rs
// In-memory store used by tests and DATABASE_URL=memory

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{InstanceStore, SessionStore};
use crate::error::{BrokerError, Result};
use crate::models::{Instance, InstanceStatus, Session, SessionPatch};

#[derive(Default)]
pub struct MemoryStore {
    // Ordered so list_expired can page by id
    sessions: RwLock<BTreeMap<String, Session>>,
    instances: RwLock<HashMap<String, Instance>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: Session) -> Result<Session> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.session_id) {
            return Err(BrokerError::Storage(format!(
                "duplicate session id {}",
                session.session_id
            )));
        }
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| BrokerError::SessionNotFound(session_id.to_string()))
    }

    async fn update(&self, session_id: &str, patch: SessionPatch) -> Result<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| BrokerError::SessionNotFound(session_id.to_string()))?;
        patch.apply(session, Utc::now());
        Ok(session.clone())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.write().remove(session_id);
        Ok(())
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Session>> {
        let sessions = self.sessions.read();
        let lower = match after {
            Some(id) => Bound::Excluded(id.to_string()),
            None => Bound::Unbounded,
        };
        Ok(sessions
            .range((lower, Bound::Unbounded))
            .map(|(_, s)| s)
            .filter(|s| s.status.is_live() && s.is_expired_at(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<Session>> {
        Ok(self.sessions.read().values().cloned().collect())
    }

    async fn count_live(&self) -> Result<usize> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| s.status.is_live())
            .count())
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| s.status.is_live() && s.user_id.as_deref() == Some(user_id))
            .max_by_key(|s| s.created_at)
            .cloned())
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn put(&self, instance: Instance) -> Result<()> {
        self.instances
            .write()
            .insert(instance.instance_id.clone(), instance);
        Ok(())
    }

    async fn get(&self, instance_id: &str) -> Result<Instance> {
        self.instances
            .read()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| BrokerError::InstanceNotFound(instance_id.to_string()))
    }

    async fn set_status(&self, instance_id: &str, status: InstanceStatus) -> Result<()> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| BrokerError::InstanceNotFound(instance_id.to_string()))?;
        instance.status = status;
        if matches!(status, InstanceStatus::Stopped | InstanceStatus::Deleted) {
            instance.ip_address = None;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Instance>> {
        Ok(self.instances.read().values().cloned().collect())
    }
}
