//! Service information
//!
//! Defines the basic information structure for services

use crate::config::ConnectaConfig;
use crate::monitoring::{ServiceState, service_type::ServiceType};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::Url;

/// Basic service information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name
    pub name: String,
    pub service_type: ServiceType,
    pub domain_name: String,
    pub port_info: String,
    /// Service status
    pub status: ServiceState,
    /// Service description
    pub description: Option<String>,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        service_type: ServiceType,
        description: Option<String>,
        config: &ConnectaConfig,
    ) -> Self {
        let (port_info, domain_name) = match service_type {
            ServiceType::Signaling | ServiceType::Redirect => {
                // Development environment prefers HTTP
                let http = config.bind.http.as_ref().filter(|_| config.is_dev());
                match (http, config.bind.https.as_ref()) {
                    (Some(http), _) => (
                        http.port.to_string(),
                        format!("{}://{}", service_type.scheme(false), http.domain_name),
                    ),
                    (None, Some(https)) => (
                        https.port.to_string(),
                        format!("{}://{}", service_type.scheme(true), https.domain_name),
                    ),
                    (None, None) => (
                        "0".to_string(),
                        format!("{}://localhost", service_type.scheme(false)),
                    ),
                }
            }
            ServiceType::Coordinator | ServiceType::Worker => (
                config.coordinator.master_port.to_string(),
                format!("tcp://{}", config.coordinator.master_ip),
            ),
        };
        Self {
            name: name.into(),
            service_type,
            port_info,
            domain_name,
            status: ServiceState::Unknown,
            description,
        }
    }

    /// Set service status to running
    pub fn set_running(&mut self, url: Url) {
        self.status = ServiceState::Running(url.to_string());
        info!("Service '{}' is now running at {}", self.name, self.url());
    }

    /// Set service status to error
    pub fn set_error(&mut self, error: impl Into<String>) {
        let error_msg = error.into();
        error!("Service '{}' encountered error: {}", self.name, error_msg);
        self.status = ServiceState::Error(error_msg);
    }

    /// Check if service is running
    pub fn is_running(&self) -> bool {
        matches!(self.status, ServiceState::Running(_))
    }

    /// Get service status URL (if in running state)
    pub fn url(&self) -> String {
        match &self.status {
            ServiceState::Running(url) => url.to_string(),
            _ => "N/A".to_string(),
        }
    }
}
