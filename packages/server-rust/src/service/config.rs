//! Static configuration input: a plain `Debug + Clone + Default` struct
//! with public fields and no builder. This core owns no file or
//! environment parsing.

/// Server-level configuration for the managed-service lifecycle.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unique identifier for this server node.
    pub node_id: String,
    /// Default timeout for operations in milliseconds.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    /// Interval between garbage collection runs in milliseconds.
    pub gc_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            gc_interval_ms: 60_000,
        }
    }
}
