use serde::{Deserialize, Serialize};

/// Caller-supplied switches for one deploy call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Redeploy the service even when the stack has no changes.
    pub force_new_update: bool,
    pub disable_rollback: bool,
    /// Return as soon as the deployment has started.
    pub detach: bool,
}
