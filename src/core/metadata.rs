//! Driver metadata system.
//!
//! Self-describing metadata for the built-in drivers, enabling discovery
//! and example-configuration generation without instantiating anything.
//! The runtime registry ([`crate::registry::DriverRegistry`]) tracks live
//! sessions; this catalog only describes what can be registered.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameter type for configuration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
    Boolean,
    Float,
    Object,
    Array,
}

/// Metadata for a single configuration parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterMetadata {
    /// Parameter name as it appears in the options JSON.
    pub name: &'static str,
    /// Human-readable display name.
    pub display_name: &'static str,
    /// Description of the parameter.
    pub description: &'static str,
    /// Whether this parameter is required.
    pub required: bool,
    /// Default value if not specified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Type of the parameter.
    pub param_type: ParameterType,
}

impl ParameterMetadata {
    /// Create a new required parameter.
    pub const fn required(
        name: &'static str,
        display_name: &'static str,
        description: &'static str,
        param_type: ParameterType,
    ) -> Self {
        Self {
            name,
            display_name,
            description,
            required: true,
            default_value: None,
            param_type,
        }
    }

    /// Create a new optional parameter with a default value.
    pub fn optional(
        name: &'static str,
        display_name: &'static str,
        description: &'static str,
        param_type: ParameterType,
        default_value: Value,
    ) -> Self {
        Self {
            name,
            display_name,
            description,
            required: false,
            default_value: Some(default_value),
            param_type,
        }
    }
}

/// Metadata for one driver implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverMetadata {
    /// Internal driver name (the registry key for built-ins).
    pub name: &'static str,
    /// Human-readable display name.
    pub display_name: &'static str,
    /// Description of the driver.
    pub description: &'static str,
    /// Example connect-options JSON.
    pub example_options: Value,
    /// Available configuration parameters.
    pub parameters: Vec<ParameterMetadata>,
}

/// Catalog of the drivers this crate ships.
pub struct DriverCatalog {
    drivers: Vec<DriverMetadata>,
}

impl DriverCatalog {
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Add a driver description.
    pub fn register(&mut self, metadata: DriverMetadata) {
        self.drivers.push(metadata);
    }

    /// All catalogued drivers.
    pub fn drivers(&self) -> &[DriverMetadata] {
        &self.drivers
    }

    /// Look a driver up by name.
    pub fn get(&self, name: &str) -> Option<&DriverMetadata> {
        self.drivers
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// `(name, label, example options)` tuples for every driver.
    pub fn examples(&self) -> Vec<(&'static str, String, Value)> {
        self.drivers
            .iter()
            .map(|d| {
                (
                    d.name,
                    format!("{} ({})", d.display_name, d.name),
                    d.example_options.clone(),
                )
            })
            .collect()
    }
}

impl Default for DriverCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for types that can describe themselves.
pub trait HasMetadata {
    /// Get the metadata for this type.
    fn metadata() -> DriverMetadata;
}

/// Build the catalog of built-in drivers.
fn build_catalog() -> DriverCatalog {
    use crate::drivers::adb::AdbDriver;
    use crate::drivers::modbus_rtu::ModbusRtuDriver;
    use crate::drivers::remote::RemoteDriver;

    let mut catalog = DriverCatalog::new();
    catalog.register(ModbusRtuDriver::metadata());
    catalog.register(AdbDriver::metadata());
    catalog.register(RemoteDriver::metadata());
    catalog
}

/// Global driver catalog instance.
static DRIVER_CATALOG: Lazy<DriverCatalog> = Lazy::new(build_catalog);

/// Get the global driver catalog.
pub fn driver_catalog() -> &'static DriverCatalog {
    &DRIVER_CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_contains_builtin_drivers() {
        let catalog = driver_catalog();
        assert!(catalog.get("modbus_rtu").is_some());
        assert!(catalog.get("adb").is_some());
        assert!(catalog.get("remote").is_some());
        assert!(catalog.get("MODBUS_RTU").is_some());
        assert!(catalog.get("nope").is_none());
    }

    #[test]
    fn examples_cover_every_driver() {
        let catalog = driver_catalog();
        let examples = catalog.examples();
        assert_eq!(examples.len(), catalog.drivers().len());
        assert!(examples.iter().all(|(_, label, _)| !label.is_empty()));
    }

    #[test]
    fn required_parameters_have_no_default() {
        for driver in driver_catalog().drivers() {
            for param in &driver.parameters {
                if param.required {
                    assert!(param.default_value.is_none(), "{}", param.name);
                }
            }
        }
    }
}
