//! Backend pool management.
//!
//! # Responsibilities
//! - Manage collections of backends grouped by name
//! - Apply load balancing algorithms to select backends
//! - Provide connection guards for tracking

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::BackendConfig;
use crate::error::{BuildError, BuildResult};
use crate::load_balancer::{
    backend::{Backend, BackendConnectionGuard},
    round_robin::RoundRobin,
    LoadBalancer,
};

/// Manages backend pools and load balancing.
#[derive(Debug, Default)]
pub struct BackendManager {
    /// backend_group name -> (backends, selector).
    groups: BTreeMap<String, (Vec<Arc<Backend>>, Box<dyn LoadBalancer>)>,
}

impl BackendManager {
    /// Create a new backend manager from configuration.
    pub fn new(configs: &[BackendConfig]) -> BuildResult<Self> {
        let mut grouped: BTreeMap<String, Vec<Arc<Backend>>> = BTreeMap::new();

        for config in configs {
            let addr = config
                .address
                .parse()
                .map_err(|e| BuildError::invalid(&config.name, "address", format!("{}", e)))?;
            let backend = Backend::new(&config.name, addr, config.max_connections);
            grouped.entry(config.group.clone()).or_default().push(Arc::new(backend));
        }

        let groups = grouped
            .into_iter()
            .map(|(name, backends)| {
                let lb: Box<dyn LoadBalancer> = Box::new(RoundRobin::new());
                (name, (backends, lb))
            })
            .collect();

        Ok(Self { groups })
    }

    pub fn has_group(&self, group_name: &str) -> bool {
        self.groups.contains_key(group_name)
    }

    /// Select a backend for the given group.
    /// Returns a guard that decrements the connection count on drop.
    pub fn get(&self, group_name: &str) -> Option<BackendConnectionGuard> {
        let Some((backends, lb)) = self.groups.get(group_name) else {
            tracing::debug!(group = %group_name, "Group not found in BackendManager");
            return None;
        };
        match lb.next_server(backends) {
            Some(backend) => backend.try_create_guard(),
            None => {
                tracing::debug!(group = %group_name, backend_count = backends.len(), "No backend with free capacity");
                None
            }
        }
    }

    pub fn snapshot(&self) -> Value {
        let groups: serde_json::Map<String, Value> = self
            .groups
            .iter()
            .map(|(name, (backends, _))| {
                (name.clone(), Value::Array(backends.iter().map(|b| b.snapshot()).collect()))
            })
            .collect();
        json!(groups)
    }
}
