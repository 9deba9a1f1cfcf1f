// src/config/mod.rs
// Environment-based configuration - single source of truth for all env vars

use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_API_KEY: &str = "mock_api_key";

/// Storage backend selected by DATABASE_URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    // ── Provider
    pub api_key: String,
    pub org_id: String,
    pub api_url: String,
    pub mock_mode: bool,
    pub gateway_timeout: Duration,
    pub provision_timeout: Duration,
    pub default_cpu_cores: u32,
    pub default_ram_gb: u32,

    // ── Sessions
    pub session_timeout: Duration,
    pub max_sessions: usize,
    pub sweep_interval: Duration,
    pub expired_retention: Duration,

    // ── Storage
    pub storage: StorageBackend,

    // ── Server
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub log_level: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; tests pass a map instead of the process env
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url =
            var("DATABASE_URL").unwrap_or_else(|| "sqlite:nbcompute.db?mode=rwc".to_string());
        let storage = if database_url.eq_ignore_ascii_case("memory") {
            StorageBackend::Memory
        } else {
            StorageBackend::Sqlite(database_url)
        };

        let allowed_origins = var("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:8888".to_string())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        Self {
            api_key: var("FLEXAI_API_KEY").unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
            org_id: var("FLEXAI_ORG_ID").unwrap_or_else(|| "mock_org_id".to_string()),
            api_url: var("FLEXAI_API_URL").unwrap_or_else(|| "http://localhost:9000".to_string()),
            mock_mode: parse_or(&var, "MOCK_MODE", true),
            gateway_timeout: Duration::from_secs(parse_or(&var, "GATEWAY_TIMEOUT_SECS", 30)),
            provision_timeout: Duration::from_secs(parse_or(&var, "PROVISION_TIMEOUT_SECS", 60)),
            default_cpu_cores: parse_or(&var, "DEFAULT_CPU_CORES", 8),
            default_ram_gb: parse_or(&var, "DEFAULT_RAM_GB", 32),
            session_timeout: Duration::from_secs(
                parse_or::<u64, _>(&var, "SESSION_TIMEOUT_MINUTES", 1440).saturating_mul(60),
            ),
            max_sessions: parse_or(&var, "MAX_CONCURRENT_SESSIONS", 100),
            sweep_interval: Duration::from_secs(parse_or(&var, "SWEEP_INTERVAL_SECS", 300)),
            expired_retention: Duration::from_secs(
                parse_or::<u64, _>(&var, "EXPIRED_RETENTION_HOURS", 24).saturating_mul(3600),
            ),
            storage,
            host: var("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&var, "API_PORT", 8000),
            allowed_origins,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();

        if self.max_sessions == 0 {
            validation.add_error("MAX_CONCURRENT_SESSIONS must be at least 1");
        }
        if self.session_timeout.is_zero() {
            validation.add_error("SESSION_TIMEOUT_MINUTES must be at least 1");
        }
        if self.gateway_timeout.is_zero() || self.provision_timeout.is_zero() {
            validation.add_error("gateway timeouts must be non-zero");
        }
        if !self.mock_mode && self.api_key == DEFAULT_API_KEY {
            validation.add_warning("MOCK_MODE=false but FLEXAI_API_KEY is the mock placeholder");
        }
        if self.sweep_interval.is_zero() {
            validation.add_warning("SWEEP_INTERVAL_SECS=0 disables the expiry sweep");
        }
        if self.allowed_origins.is_empty() {
            validation.add_warning("ALLOWED_ORIGINS is empty; browsers will be refused");
        }

        validation
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => {
            // Tolerate trailing `# comment` in .env files
            let clean = raw.split('#').next().unwrap_or("").trim().to_lowercase();
            match clean.parse::<T>() {
                Ok(parsed) => {
                    debug!(key, value = %clean, "config from environment");
                    parsed
                }
                Err(_) => {
                    warn!(key, value = %raw, default = %default, "unparseable config value, using default");
                    default
                }
            }
        }
        None => default,
    }
}

/// Configuration validation result
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }

        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warning in &self.warnings {
                lines.push(format!("  - {}", warning));
            }
        }

        lines.join("\n")
    }
}
