//! Service registry for managing service statuses

use super::ServiceInfo;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Collects the ServiceInfo of every started service, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct ServiceCollector {
    inner: Arc<RwLock<HashMap<String, ServiceInfo>>>,
}

impl ServiceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all service info values
    pub async fn values(&self) -> Vec<ServiceInfo> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Insert a service info entry
    pub async fn insert(&self, key: String, value: ServiceInfo) {
        self.inner.write().await.insert(key, value);
    }
}
