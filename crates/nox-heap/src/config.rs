//! Heap configuration
//!
//! The embedding runtime supplies heap bounds as a structured `gcConfig`
//! record, usually embedded in a larger JSON configuration:
//!
//! ```json
//! { "gcConfig": { "initHeapSize": 100, "maxHeapSize": 16777216 } }
//! ```
//!
//! `initHeapSize` seeds the old generation's soft limit; `maxHeapSize` is the
//! hard bound on the reserved address range. Allocation past `maxHeapSize`
//! fails with [`crate::HeapError::OutOfMemory`] (or aborts, per
//! [`OomPolicy`]).

use crate::{HeapError, HeapResult};
use serde::{Deserialize, Serialize};

/// Default initial heap size (1 MiB).
pub const DEFAULT_INIT_HEAP_SIZE: usize = 1024 * 1024;

/// Default maximum heap size (512 MiB).
pub const DEFAULT_MAX_HEAP_SIZE: usize = 512 * 1024 * 1024;

/// Smallest accepted `maxHeapSize`. Below this there is no room for the
/// young-generation semispaces.
pub const MIN_MAX_HEAP_SIZE: usize = 16 * 1024;

/// What the allocator does when a request cannot be satisfied even after a
/// full collection. Selected once at configuration time, not per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OomPolicy {
    /// Propagate [`crate::HeapError::OutOfMemory`] to the caller.
    #[default]
    Recover,
    /// Abort the process. The non-catchable channel.
    Abort,
}

/// Garbage collector configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GcConfig {
    /// Initial reservation actively used by the old generation, in bytes.
    pub init_heap_size: usize,

    /// Hard upper bound on total heap usage, in bytes.
    pub max_heap_size: usize,

    /// Out-of-memory policy.
    pub oom_policy: OomPolicy,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            init_heap_size: DEFAULT_INIT_HEAP_SIZE,
            max_heap_size: DEFAULT_MAX_HEAP_SIZE,
            oom_policy: OomPolicy::Recover,
        }
    }
}

impl GcConfig {
    /// Validate bounds. Called by [`crate::Heap::new`].
    pub fn validate(&self) -> HeapResult<()> {
        if self.max_heap_size < MIN_MAX_HEAP_SIZE {
            return Err(HeapError::InvalidConfig(format!(
                "maxHeapSize {} is below the minimum of {} bytes",
                self.max_heap_size, MIN_MAX_HEAP_SIZE
            )));
        }
        if self.init_heap_size > self.max_heap_size {
            return Err(HeapError::InvalidConfig(format!(
                "initHeapSize {} exceeds maxHeapSize {}",
                self.init_heap_size, self.max_heap_size
            )));
        }
        #[cfg(feature = "compressed-pointers")]
        if self.max_heap_size > u32::MAX as usize {
            return Err(HeapError::InvalidConfig(format!(
                "maxHeapSize {} does not fit the 32-bit compressed pointer range",
                self.max_heap_size
            )));
        }
        Ok(())
    }
}

/// Top-level runtime configuration wrapper.
///
/// Unrecognized fields in the source record are ignored, so this parses the
/// full trace/configuration documents the embedder passes around.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// The `gcConfig` record. Missing fields take their defaults.
    #[serde(default)]
    pub gc_config: GcConfig,
}

impl RuntimeConfig {
    /// Parse a configuration document from JSON.
    pub fn from_json(source: &str) -> HeapResult<Self> {
        serde_json::from_str(source).map_err(|e| HeapError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = GcConfig::default();
        assert_eq!(config.init_heap_size, DEFAULT_INIT_HEAP_SIZE);
        assert_eq!(config.max_heap_size, DEFAULT_MAX_HEAP_SIZE);
        assert_eq!(config.oom_policy, OomPolicy::Recover);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_parse_gc_config() {
        let parsed = RuntimeConfig::from_json(
            r#"{ "gcConfig": { "initHeapSize": 100, "maxHeapSize": 16777216 } }"#,
        )
        .unwrap();
        assert_eq!(parsed.gc_config.init_heap_size, 100);
        assert_eq!(parsed.gc_config.max_heap_size, 16_777_216);
        assert!(parsed.gc_config.validate().is_ok());
    }

    #[test]
    fn test_config_ignores_unknown_fields() {
        let parsed = RuntimeConfig::from_json(
            r#"{
                "version": 1,
                "globalObjID": 0,
                "gcConfig": { "initHeapSize": 100, "maxHeapSize": 16777216 },
                "env": { "mathRandomSeed": 0 }
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.gc_config.max_heap_size, 16_777_216);
    }

    #[test]
    fn test_config_missing_gc_config_uses_defaults() {
        let parsed = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(parsed.gc_config, GcConfig::default());
    }

    #[test]
    fn test_config_partial_record() {
        let parsed =
            RuntimeConfig::from_json(r#"{ "gcConfig": { "maxHeapSize": 1048576 } }"#).unwrap();
        assert_eq!(parsed.gc_config.max_heap_size, 1024 * 1024);
        assert_eq!(parsed.gc_config.init_heap_size, DEFAULT_INIT_HEAP_SIZE);
    }

    #[test]
    fn test_config_rejects_inverted_bounds() {
        let config = GcConfig {
            init_heap_size: 64 * 1024 * 1024,
            max_heap_size: 1024 * 1024,
            oom_policy: OomPolicy::Recover,
        };
        assert!(matches!(config.validate(), Err(crate::HeapError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_tiny_max() {
        let config = GcConfig {
            init_heap_size: 0,
            max_heap_size: 1024,
            oom_policy: OomPolicy::Recover,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_oom_policy_parse() {
        let parsed = RuntimeConfig::from_json(
            r#"{ "gcConfig": { "maxHeapSize": 1048576, "oomPolicy": "abort" } }"#,
        )
        .unwrap();
        assert_eq!(parsed.gc_config.oom_policy, OomPolicy::Abort);
    }
}
