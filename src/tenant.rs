use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::Config;
use crate::engine::{Engine, SystemClock};
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// What every tenant engine is started with.
#[derive(Debug, Clone)]
pub struct TenantSettings {
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub pending_ttl: chrono::Duration,
    pub reaper_interval: Duration,
    pub currency: String,
}

impl TenantSettings {
    pub fn new(data_dir: PathBuf) -> Self {
        Self::from_config(&Config {
            data_dir,
            ..Config::default()
        })
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            compact_threshold: config.compact_threshold,
            pending_ttl: config.pending_ttl_chrono(),
            reaper_interval: config.reaper_interval,
            currency: config.currency.clone(),
        }
    }
}

/// Manages per-tenant engines. Each tenant (one hotel operator's database)
/// gets its own Engine + WAL + expiry reaper.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    settings: TenantSettings,
}

impl TenantManager {
    pub fn new(settings: TenantSettings) -> Self {
        Self {
            engines: DashMap::new(),
            settings,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    ///
    /// Engines are keyed by the sanitized name that also names the WAL file, so
    /// two database names that reduce to the same file share one engine.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        let safe_name = sanitize(tenant);
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Two connections racing on a fresh tenant must not open the WAL twice.
        let entry = self.engines.entry(safe_name.clone());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.settings.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(
            wal_path,
            Arc::new(NotifyHub::new()),
            Arc::new(SystemClock),
            self.settings.currency.clone(),
        )?);

        tokio::spawn(reaper::run_reaper(
            engine.clone(),
            self.settings.pending_ttl,
            self.settings.reaper_interval,
        ));
        tokio::spawn(reaper::run_compactor(
            engine.clone(),
            self.settings.compact_threshold,
        ));

        entry.or_insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!(tenant, wal = %safe_name, "tenant engine started");
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}

/// Only the file stem is taken from the client; no path separators survive.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
