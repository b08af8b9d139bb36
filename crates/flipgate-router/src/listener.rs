//! Listeners: a port on the router forwarding to one target pool.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use flipgate_core::{Protocol, Provisionable, ResourceKind, Routable, TargetPoolId};
use flipgate_provision::ResourceHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerRole {
    /// Carries live traffic. Its target is the live color.
    Production,
    /// Pre-cutover validation of the idle color.
    Test,
}

impl fmt::Display for ListenerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerRole::Production => f.write_str("production"),
            ListenerRole::Test => f.write_str("test"),
        }
    }
}

/// Identifies a listener on a specific router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerHandle {
    pub router: String,
    pub port: u16,
    pub role: ListenerRole,
}

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.router, self.port, self.role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    pub role: ListenerRole,
    /// Never empty: replaced in one step on rebind.
    pub target: TargetPoolId,
    /// Backend name of the target pool.
    pub target_name: String,
    pub handle: Option<ResourceHandle>,
}

impl Listener {
    /// Backend spec with the forwarding action pointed at `target_name`.
    pub fn spec_for(&self, target_name: &str) -> serde_json::Value {
        json!({
            "port": self.port,
            "protocol": self.protocol.to_string(),
            "default_action": { "forward": target_name },
        })
    }
}

impl Routable for Listener {
    fn port(&self) -> u16 {
        self.port
    }

    fn forwarding_target(&self) -> TargetPoolId {
        self.target.clone()
    }
}

impl Provisionable for Listener {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Listener
    }

    fn logical_name(&self) -> String {
        self.name.clone()
    }

    fn resource_spec(&self) -> serde_json::Value {
        self.spec_for(&self.target_name)
    }
}
