// src/store/mod.rs
// Session and instance record stores

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::config::StorageBackend;
use crate::error::Result;
use crate::models::{Instance, InstanceStatus, Session, SessionPatch};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Page size used when walking expired sessions
pub const EXPIRED_PAGE_SIZE: usize = 64;

/// Durable mapping from session_id to Session record
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a freshly built session. Ids are generated by `Session::new`.
    async fn create(&self, session: Session) -> Result<Session>;

    /// Fails with `SessionNotFound` if absent or purged
    async fn get(&self, session_id: &str) -> Result<Session>;

    /// Apply a patch atomically; fails with `SessionNotFound` if absent
    async fn update(&self, session_id: &str, patch: SessionPatch) -> Result<Session>;

    /// Idempotent: removing an unknown session is not an error
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// One page of live sessions with `expires_at <= now`, ordered by id,
    /// starting strictly after `after`.
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Session>>;

    async fn list(&self) -> Result<Vec<Session>>;

    /// Number of sessions in a live state (created or active)
    async fn count_live(&self) -> Result<usize>;

    /// Most recent live session owned by the user
    async fn find_by_user(&self, user_id: &str) -> Result<Option<Session>>;
}

/// Local cache of provider instance records
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert or replace a record
    async fn put(&self, instance: Instance) -> Result<()>;

    /// Fails with `InstanceNotFound` if no record exists
    async fn get(&self, instance_id: &str) -> Result<Instance>;

    async fn set_status(&self, instance_id: &str, status: InstanceStatus) -> Result<()>;

    async fn list(&self) -> Result<Vec<Instance>>;
}

/// Both stores behind one handle, as selected by configuration
#[derive(Clone)]
pub struct Storage {
    pub sessions: Arc<dyn SessionStore>,
    pub instances: Arc<dyn InstanceStore>,
}

impl Storage {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            sessions: store.clone(),
            instances: store,
        }
    }

    pub fn sqlite(store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            sessions: store.clone(),
            instances: store,
        }
    }

    pub async fn open(backend: &StorageBackend) -> Result<Self> {
        match backend {
            StorageBackend::Memory => {
                tracing::info!("Using in-memory session store");
                Ok(Self::memory())
            }
            StorageBackend::Sqlite(url) => {
                tracing::info!(url = %url, "Using SQLite session store");
                Ok(Self::sqlite(SqliteStore::connect(url).await?))
            }
        }
    }
}

/// Lazily walk every expired live session, one store page at a time.
///
/// The cursor is the last yielded id, so a sweep interrupted mid-way can
/// simply start a new stream; sessions already transitioned drop out of the
/// underlying query.
pub fn expired_sessions(
    store: Arc<dyn SessionStore>,
    now: DateTime<Utc>,
    page_size: usize,
) -> impl Stream<Item = Result<Session>> + Send {
    let page_size = page_size.max(1);
    async_stream::try_stream! {
        let mut cursor: Option<String> = None;
        loop {
            let page = store.list_expired(now, cursor.as_deref(), page_size).await?;
            let exhausted = page.len() < page_size;
            for session in page {
                cursor = Some(session.session_id.clone());
                yield session;
            }
            if exhausted {
                break;
            }
        }
    }
}
