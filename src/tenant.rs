use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::archiver;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// One engine per library. The library is the database name on the connection.
/// Each gets its own WAL file, archiver and compactor.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    config: EngineConfig,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, config: EngineConfig) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            config,
        }
    }

    /// Get or lazily create the engine for a tenant.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // Used verbatim as the WAL file name: one name, one file.
        if tenant.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
        }
        if !tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tenant name may only contain ASCII letters, digits, '_' and '-'",
            ));
        }

        // Two connections may race to open the same tenant; the entry API
        // makes sure only one engine (and one WAL writer) survives.
        let entry = self.engines.entry(tenant.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{tenant}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify, self.config.clone())?);

        tokio::spawn(archiver::run_archiver(engine.clone(), self.config.archive_interval));
        tokio::spawn(archiver::run_compactor(engine.clone(), self.config.compact_threshold));

        entry.or_insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!(%tenant, "tenant loaded");
        Ok(engine)
    }
}
