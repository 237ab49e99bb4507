//! Property and service configuration

use serde::{Deserialize, Serialize};
use std::fmt;

/// Utility commodity monitored for a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Electricity,
    Gas,
}

impl ServiceKind {
    /// Unit of the usage quantity for this commodity
    pub fn usage_unit(&self) -> &'static str {
        match self {
            ServiceKind::Electricity => "kWh",
            ServiceKind::Gas => "MJ",
        }
    }

    /// Provider utility code ("E" / "G")
    pub fn from_utility_code(code: &str) -> Option<Self> {
        match code {
            "E" => Some(ServiceKind::Electricity),
            "G" => Some(ServiceKind::Gas),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Electricity => "electricity",
            ServiceKind::Gas => "gas",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One monitored commodity of a property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub kind: ServiceKind,
    /// Provider-assigned consumer identifier
    pub consumer_id: String,
    /// Inactive services are configured but never fetched
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Service {
    pub fn new(kind: ServiceKind, consumer_id: impl Into<String>) -> Self {
        Self {
            kind,
            consumer_id: consumer_id.into(),
            active: true,
        }
    }
}

/// A customer property with its enabled services
///
/// Immutable after configuration; reconfiguration replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Property {
    /// Keys of every active service of this property
    pub fn active_service_keys(&self) -> impl Iterator<Item = (ServiceKey, ServiceKind)> + '_ {
        self.services
            .iter()
            .filter(|s| s.active)
            .map(|s| (ServiceKey::new(&self.id, &s.consumer_id), s.kind))
    }
}

/// Identifies one (property, service) unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub property_id: String,
    pub consumer_id: String,
}

impl ServiceKey {
    pub fn new(property_id: impl Into<String>, consumer_id: impl Into<String>) -> Self {
        Self {
            property_id: property_id.into(),
            consumer_id: consumer_id.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.property_id, self.consumer_id)
    }
}
