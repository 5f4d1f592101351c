use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::admission::HostKey;

/// Default number of concurrently executing requests per host
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Admission configuration that applies as default to all hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Default maximum of concurrently executing requests per host
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

/// Default number of concurrently executing requests per host
const fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl AdmissionConfig {
    /// Create an `AdmissionConfig` from CLI options, using defaults for missing values
    #[must_use]
    pub fn from_options(concurrency: Option<usize>) -> Self {
        Self {
            concurrency: concurrency.unwrap_or(DEFAULT_CONCURRENCY),
        }
    }
}

/// Per-host configuration overrides
pub type HostConfigs = HashMap<HostKey, HostConfig>;

/// Configuration for a specific host's admission behavior
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Maximum concurrent requests allowed to this host
    pub concurrency: Option<usize>,

    /// Headers sent with every request to this host,
    /// unless the caller sets the same header
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_headers")]
    #[serde(serialize_with = "serialize_headers")]
    pub headers: HeaderMap,
}

impl HostConfig {
    /// Get the effective maximum concurrency, falling back to the global default.
    ///
    /// A limit of zero would never admit anything and is raised to one.
    #[must_use]
    pub fn effective_concurrency(&self, global_config: &AdmissionConfig) -> usize {
        self.concurrency
            .unwrap_or(global_config.concurrency)
            .max(1)
    }
}

/// Custom deserializer for headers from TOML config format
fn deserialize_headers<'de, D>(deserializer: D) -> Result<HeaderMap, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    let mut header_map = HeaderMap::new();

    for (name, value) in map {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("Invalid header name '{name}': {e}")))?;
        // Values may be secrets, don't echo them
        let header_value = HeaderValue::from_str(&value).map_err(|e| {
            serde::de::Error::custom(format!("Invalid value for header '{name}': {e}"))
        })?;
        header_map.insert(header_name, header_value);
    }

    Ok(header_map)
}

/// Custom serializer for headers to TOML config format
fn serialize_headers<S>(headers: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let map: HashMap<String, String> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("").to_string()))
        .collect();
    map.serialize(serializer)
}
