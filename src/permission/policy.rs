//! Auto-approval policy.

use serde::{Deserialize, Serialize};

/// How a session treats permission-gated tools.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Every gated tool suspends until an out-of-band decision.
    #[default]
    Interactive,
    /// Every gated tool is approved without suspending.
    Automatic,
}

/// Session policy: mode plus an allow-list of tool patterns that bypass
/// the gate even in interactive mode.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub mode: PermissionMode,
    #[serde(default)]
    pub allow: Vec<String>,
}

impl PermissionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn automatic() -> Self {
        Self {
            mode: PermissionMode::Automatic,
            allow: Vec::new(),
        }
    }

    pub fn with_allowed(mut self, pattern: impl Into<String>) -> Self {
        self.allow.push(pattern.into());
        self
    }

    /// Whether a tool bypasses the permission gate entirely.
    pub fn auto_approves(&self, tool_id: &str) -> bool {
        if self.mode == PermissionMode::Automatic {
            return true;
        }
        self.allow
            .iter()
            .any(|pattern| pattern_matches(pattern, tool_id))
    }
}

fn pattern_matches(pattern: &str, tool_id: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        tool_id.starts_with(prefix)
    } else {
        pattern == tool_id
    }
}
