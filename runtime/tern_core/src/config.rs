//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Tunables of a [`Runtime`](crate::Runtime).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tracked allocations between automatic collection passes.
    pub gc_threshold: usize,
    /// Default describe depth; `None` is unbounded.
    pub describe_depth: Option<usize>,
    /// Default length limit of described string leaves; `None` is unbounded.
    pub describe_max_len: Option<usize>,
    /// Name prefix of the worker threads running blocking operations.
    pub io_thread_name: String,
    /// Run a collection pass whenever a task finishes.
    pub collect_on_completion: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            gc_threshold: 4096,
            describe_depth: Some(3),
            describe_max_len: Some(60),
            io_thread_name: "tern-io".to_owned(),
            collect_on_completion: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn customized_config_survives_storage() {
        let config = RuntimeConfig {
            gc_threshold: 8,
            describe_max_len: None,
            ..RuntimeConfig::default()
        };
        let bytes = bincode::serialize(&config).unwrap();
        let restored: RuntimeConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, config);
        assert_eq!(restored.describe_depth, Some(3));
    }
}
