use crate::types::StackName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound the infrastructure engine places on stack names.
const MAX_STACK_NAME_LEN: usize = 128;

/// The (application, environment, workload) triple a deploy operates on.
///
/// Immutable for the lifetime of one deploy and used as the composite key for
/// every remote lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadIdentity {
    pub app: String,
    pub env: String,
    pub name: String,
}

impl WorkloadIdentity {
    pub fn new(app: impl Into<String>, env: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            env: env.into(),
            name: name.into(),
        }
    }

    /// Logical stack name for this workload, truncated to the engine's limit.
    pub fn stack_name(&self) -> StackName {
        let mut name = format!("{}-{}-{}", self.app, self.env, self.name);
        if name.len() > MAX_STACK_NAME_LEN {
            let mut cut = MAX_STACK_NAME_LEN;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name.truncate(cut);
        }
        StackName::new(name)
    }

    /// Fully qualified name of a topic published by `service` in this workload's
    /// application and environment.
    pub fn topic_name(&self, service: &str, topic: &str) -> String {
        format!("{}-{}-{service}-{topic}", self.app, self.env)
    }
}

impl fmt::Display for WorkloadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app, self.env, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_name_joins_identity() {
        let id = WorkloadIdentity::new("shop", "test", "api");
        assert_eq!(id.stack_name(), "shop-test-api");
    }

    #[test]
    fn stack_name_is_truncated() {
        let id = WorkloadIdentity::new("a".repeat(100), "test", "b".repeat(100));
        assert_eq!(id.stack_name().len(), MAX_STACK_NAME_LEN);
    }

    #[test]
    fn topic_name_is_fully_qualified() {
        let id = WorkloadIdentity::new("app", "env", "worker");
        assert_eq!(id.topic_name("database", "orders"), "app-env-database-orders");
    }

    #[test]
    fn display_uses_slashes() {
        let id = WorkloadIdentity::new("app", "prod", "web");
        assert_eq!(id.to_string(), "app/prod/web");
    }
}
