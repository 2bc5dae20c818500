//! Service type definitions

use serde::{Deserialize, Serialize};
use strum::Display;

/// Service type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
pub enum ServiceType {
    /// Client-facing WebSocket signaling (standalone or worker)
    Signaling,
    /// Least-loaded redirect listener on the master
    Redirect,
    /// Master side of the control channel
    Coordinator,
    /// Worker side of the control channel
    Worker,
}

impl ServiceType {
    /// URL scheme used when reporting where the service runs
    pub fn scheme(&self, secure: bool) -> &'static str {
        match (self, secure) {
            (ServiceType::Signaling | ServiceType::Redirect, false) => "ws",
            (ServiceType::Signaling | ServiceType::Redirect, true) => "wss",
            (ServiceType::Coordinator | ServiceType::Worker, _) => "tcp",
        }
    }
}
