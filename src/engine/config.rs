//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::permission::PermissionPolicy;

/// Iteration ceiling guaranteeing a turn terminates regardless of model
/// behavior.
pub const DEFAULT_MAX_ITERATIONS: usize = 15;

/// Knobs for the conversation loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum model/tool iterations per turn.
    pub max_iterations: usize,
    /// Optional bound on permission waits. `None` waits indefinitely;
    /// when set, expiry resolves the wait as a denial.
    pub permission_timeout: Option<Duration>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            permission_timeout: None,
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub execution: ExecutionConfig,
    pub permissions: PermissionPolicy,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.execution.max_iterations = max_iterations;
        self
    }

    pub fn with_permission_timeout(mut self, timeout: Duration) -> Self {
        self.execution.permission_timeout = Some(timeout);
        self
    }

    pub fn with_permissions(mut self, policy: PermissionPolicy) -> Self {
        self.permissions = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.execution.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert!(config.execution.permission_timeout.is_none());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new()
            .with_max_iterations(3)
            .with_permission_timeout(Duration::from_secs(30));
        assert_eq!(config.execution.max_iterations, 3);
        assert_eq!(
            config.execution.permission_timeout,
            Some(Duration::from_secs(30))
        );
    }
}
