// src/store/sqlite.rs
// SQLite-backed session and instance store
// Timestamps are stored as Unix milliseconds (INTEGER)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{InstanceStore, SessionStore};
use crate::error::{BrokerError, Result};
use crate::models::{Instance, InstanceStatus, Session, SessionPatch, SessionStatus};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        session_id    TEXT PRIMARY KEY,
        user_id       TEXT,
        instance_id   TEXT,
        gpu_type      TEXT,
        gpu_count     INTEGER NOT NULL DEFAULT 0,
        status        TEXT NOT NULL,
        created_at    INTEGER NOT NULL,
        expires_at    INTEGER NOT NULL,
        last_activity INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions (status, expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions (user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS instances (
        instance_id TEXT PRIMARY KEY,
        gpu_type    TEXT NOT NULL,
        gpu_count   INTEGER NOT NULL,
        cpu_cores   INTEGER NOT NULL,
        ram_gb      INTEGER NOT NULL,
        status      TEXT NOT NULL,
        ip_address  TEXT
    )
    "#,
];

const SESSION_COLUMNS: &str = "session_id, user_id, instance_id, gpu_type, gpu_count, status, \
                               created_at, expires_at, last_activity";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and ensure the schema
    pub async fn connect(url: &str) -> Result<Self> {
        // Every connection to :memory: is a separate database
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| BrokerError::Storage(format!("timestamp out of range: {ms}")))
}

fn row_to_session(row: &SqliteRow) -> Result<Session> {
    let status: String = row.try_get("status")?;
    let gpu_count: i64 = row.try_get("gpu_count")?;
    Ok(Session {
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        instance_id: row.try_get("instance_id")?,
        gpu_type: row.try_get("gpu_type")?,
        gpu_count: u32::try_from(gpu_count).unwrap_or_default(),
        status: status.parse::<SessionStatus>().map_err(BrokerError::Storage)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
        last_activity: from_millis(row.try_get("last_activity")?)?,
    })
}

fn row_to_instance(row: &SqliteRow) -> Result<Instance> {
    let status: String = row.try_get("status")?;
    let gpu_count: i64 = row.try_get("gpu_count")?;
    let cpu_cores: i64 = row.try_get("cpu_cores")?;
    let ram_gb: i64 = row.try_get("ram_gb")?;
    Ok(Instance {
        instance_id: row.try_get("instance_id")?,
        gpu_type: row.try_get("gpu_type")?,
        gpu_count: u32::try_from(gpu_count).unwrap_or_default(),
        cpu_cores: u32::try_from(cpu_cores).unwrap_or_default(),
        ram_gb: u32::try_from(ram_gb).unwrap_or_default(),
        status: status.parse::<InstanceStatus>().map_err(BrokerError::Storage)?,
        ip_address: row.try_get("ip_address")?,
    })
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create(&self, session: Session) -> Result<Session> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (session_id, user_id, instance_id, gpu_type, gpu_count, status,
                 created_at, expires_at, last_activity)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.user_id)
        .bind(&session.instance_id)
        .bind(&session.gpu_type)
        .bind(i64::from(session.gpu_count))
        .bind(session.status.as_str())
        .bind(to_millis(session.created_at))
        .bind(to_millis(session.expires_at))
        .bind(to_millis(session.last_activity))
        .execute(&self.pool)
        .await?;
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Session> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BrokerError::SessionNotFound(session_id.to_string()))?;
        row_to_session(&row)
    }

    async fn update(&self, session_id: &str, patch: SessionPatch) -> Result<Session> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?"
        ))
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| BrokerError::SessionNotFound(session_id.to_string()))?;

        let mut session = row_to_session(&row)?;
        patch.apply(&mut session, Utc::now());

        sqlx::query(
            r#"
            UPDATE sessions
            SET instance_id = ?, gpu_type = ?, gpu_count = ?, status = ?,
                expires_at = ?, last_activity = ?
            WHERE session_id = ?
            "#,
        )
        .bind(&session.instance_id)
        .bind(&session.gpu_type)
        .bind(i64::from(session.gpu_count))
        .bind(session.status.as_str())
        .bind(to_millis(session.expires_at))
        .bind(to_millis(session.last_activity))
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(session)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Session>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE status IN ('created', 'active')
              AND expires_at <= ?
              AND session_id > ?
            ORDER BY session_id
            LIMIT ?
            "#
        ))
        .bind(to_millis(now))
        .bind(after.unwrap_or(""))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_session).collect()
    }

    async fn count_live(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE status IN ('created', 'active')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE user_id = ? AND status IN ('created', 'active')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_session).transpose()
    }
}

#[async_trait]
impl InstanceStore for SqliteStore {
    async fn put(&self, instance: Instance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO instances
                (instance_id, gpu_type, gpu_count, cpu_cores, ram_gb, status, ip_address)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instance.instance_id)
        .bind(&instance.gpu_type)
        .bind(i64::from(instance.gpu_count))
        .bind(i64::from(instance.cpu_cores))
        .bind(i64::from(instance.ram_gb))
        .bind(instance.status.as_str())
        .bind(&instance.ip_address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, instance_id: &str) -> Result<Instance> {
        let row = sqlx::query("SELECT * FROM instances WHERE instance_id = ?")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BrokerError::InstanceNotFound(instance_id.to_string()))?;
        row_to_instance(&row)
    }

    async fn set_status(&self, instance_id: &str, status: InstanceStatus) -> Result<()> {
        let clear_address = matches!(status, InstanceStatus::Stopped | InstanceStatus::Deleted);
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET status = ?, ip_address = CASE WHEN ? THEN NULL ELSE ip_address END
            WHERE instance_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(clear_address)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BrokerError::InstanceNotFound(instance_id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Instance>> {
        let rows = sqlx::query("SELECT * FROM instances ORDER BY instance_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_instance).collect()
    }
}
