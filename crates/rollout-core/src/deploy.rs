use crate::CoreError;
use chrono::{DateTime, Utc};
use rollout_remote::{DeployEngine, DeployResult, ServiceUpdater, StackPayload};
use rollout_schema::{DeployOptions, WorkloadIdentity};
use std::fmt;
use tracing::{debug, info};

/// Progress of one deploy call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    NotStarted,
    Deployed,
    /// The engine reported an empty change set.
    NoOpDeployed,
    ForceUpdating,
    Forced,
    Failed,
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeployState::NotStarted => "not-started",
            DeployState::Deployed => "deployed",
            DeployState::NoOpDeployed => "no-op-deployed",
            DeployState::ForceUpdating => "force-updating",
            DeployState::Forced => "forced",
            DeployState::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl DeployState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeployState::Deployed | DeployState::Forced | DeployState::Failed
        )
    }
}

pub fn validate_transition(from: DeployState, to: DeployState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            DeployState::NotStarted,
            DeployState::Deployed | DeployState::NoOpDeployed | DeployState::Failed
        ) | (
            DeployState::NoOpDeployed,
            DeployState::Deployed | DeployState::ForceUpdating | DeployState::Failed
        ) | (
            DeployState::ForceUpdating,
            DeployState::Forced | DeployState::Failed
        )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Runs one deploy and, when asked to, forces a redeploy of a stack whose
/// change set came back empty.
pub struct DeployExecutor<'a> {
    pub engine: &'a dyn DeployEngine,
    pub updater: &'a dyn ServiceUpdater,
    pub clock: &'a dyn Clock,
}

struct Progress<'a> {
    id: &'a WorkloadIdentity,
    state: DeployState,
    history: Vec<DeployState>,
}

impl Progress<'_> {
    fn advance(&mut self, to: DeployState) -> Result<(), CoreError> {
        validate_transition(self.state, to)?;
        debug!("deploy {}: {} -> {to}", self.id, self.state);
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Record the failure and hand `err` back.
    fn fail(&mut self, err: CoreError) -> CoreError {
        if let Err(invalid) = self.advance(DeployState::Failed) {
            return invalid;
        }
        err
    }
}

impl DeployExecutor<'_> {
    /// Deploy `stack` and return the terminal state reached. Every failure
    /// path ends in [`DeployState::Failed`] and is returned as an error.
    pub fn execute(
        &self,
        id: &WorkloadIdentity,
        stack: &StackPayload,
        bucket: &str,
        options: &DeployOptions,
    ) -> Result<Vec<DeployState>, CoreError> {
        let mut progress = Progress {
            id,
            state: DeployState::NotStarted,
            history: vec![DeployState::NotStarted],
        };
        let cmd_run_at = self.clock.now();

        info!("deploying stack {} for {id}", stack.name);
        match self.engine.deploy_service(stack, bucket, options) {
            Ok(DeployResult::Applied) => {
                progress.advance(DeployState::Deployed)?;
                return Ok(progress.history);
            }
            Ok(DeployResult::NoChanges) => progress.advance(DeployState::NoOpDeployed)?,
            Err(source) => {
                return Err(progress.fail(CoreError::Deploy {
                    service: id.name.clone(),
                    env: id.env.clone(),
                    source,
                }));
            }
        }

        if !options.force_new_update {
            return Err(progress.fail(CoreError::ChangeSetEmpty {
                service: id.name.clone(),
                env: id.env.clone(),
                stack: stack.name.to_string(),
            }));
        }

        let last_updated = match self.updater.last_updated_at(id) {
            Ok(at) => at,
            Err(e) => return Err(progress.fail(e.into())),
        };
        if last_updated > cmd_run_at {
            info!("service {} was already redeployed after {cmd_run_at}, skipping force update", id.name);
            progress.advance(DeployState::Deployed)?;
            return Ok(progress.history);
        }

        progress.advance(DeployState::ForceUpdating)?;
        info!("forcing a new deployment of service {}", id.name);
        if let Err(source) = self.updater.force_update_service(id) {
            let hint = if source.is_timeout() {
                format!(
                    "\nrun `rollout svc status --name {} --env {}` to check the deployment status",
                    id.name, id.env
                )
            } else {
                String::new()
            };
            return Err(progress.fail(CoreError::ForceUpdate {
                service: id.name.clone(),
                env: id.env.clone(),
                source,
                hint,
            }));
        }
        progress.advance(DeployState::Forced)?;
        Ok(progress.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{DeployBehavior, FixedClock, ForceUpdateBehavior, MockPlatform};
    use chrono::TimeZone;
    use rollout_schema::StackName;

    fn stack() -> StackPayload {
        StackPayload {
            name: StackName::new("shop-test-api"),
            template: "{}".to_owned(),
            parameters: Default::default(),
            tags: Default::default(),
            permissions_boundary: None,
        }
    }

    fn id() -> WorkloadIdentity {
        WorkloadIdentity::new("shop", "test", "api")
    }

    fn run(platform: &MockPlatform, force: bool) -> Result<Vec<DeployState>, CoreError> {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let executor = DeployExecutor {
            engine: platform,
            updater: platform,
            clock: &clock,
        };
        let options = DeployOptions {
            force_new_update: force,
            ..Default::default()
        };
        executor.execute(&id(), &stack(), "artifacts", &options)
    }

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(DeployState::NotStarted, DeployState::Deployed).is_ok());
        assert!(validate_transition(DeployState::NotStarted, DeployState::NoOpDeployed).is_ok());
        assert!(validate_transition(DeployState::NoOpDeployed, DeployState::Deployed).is_ok());
        assert!(validate_transition(DeployState::NoOpDeployed, DeployState::ForceUpdating).is_ok());
        assert!(validate_transition(DeployState::ForceUpdating, DeployState::Forced).is_ok());
        assert!(validate_transition(DeployState::ForceUpdating, DeployState::Failed).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(DeployState::NotStarted, DeployState::Forced).is_err());
        assert!(validate_transition(DeployState::Deployed, DeployState::ForceUpdating).is_err());
        assert!(validate_transition(DeployState::Failed, DeployState::Deployed).is_err());
        assert!(validate_transition(DeployState::Forced, DeployState::Forced).is_err());
    }

    #[test]
    fn applied_deploy_ends_deployed() {
        let platform = MockPlatform::default();
        let history = run(&platform, true).unwrap();
        assert_eq!(history.last(), Some(&DeployState::Deployed));
        assert_eq!(platform.calls().force_updates, 0);
    }

    #[test]
    fn empty_change_set_without_force_fails() {
        let platform = MockPlatform {
            deploy: DeployBehavior::NoChanges,
            ..Default::default()
        };
        let err = run(&platform, false).unwrap_err();
        assert!(matches!(err, CoreError::ChangeSetEmpty { .. }));
        assert!(err.recommended_action().unwrap().contains("--force"));
        assert_eq!(platform.calls().last_updated_lookups, 0);
    }

    #[test]
    fn empty_change_set_with_force_updates_once() {
        let platform = MockPlatform {
            deploy: DeployBehavior::NoChanges,
            ..Default::default()
        };
        let history = run(&platform, true).unwrap();
        assert_eq!(
            history,
            vec![
                DeployState::NotStarted,
                DeployState::NoOpDeployed,
                DeployState::ForceUpdating,
                DeployState::Forced
            ]
        );
        assert_eq!(platform.calls().force_updates, 1);
    }

    #[test]
    fn recent_update_skips_force() {
        let platform = MockPlatform {
            deploy: DeployBehavior::NoChanges,
            last_updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap(),
            ..Default::default()
        };
        let history = run(&platform, true).unwrap();
        assert_eq!(history.last(), Some(&DeployState::Deployed));
        assert_eq!(platform.calls().force_updates, 0);
    }

    #[test]
    fn force_timeout_gets_status_hint() {
        let platform = MockPlatform {
            deploy: DeployBehavior::NoChanges,
            force_update: ForceUpdateBehavior::Timeout,
            ..Default::default()
        };
        let err = run(&platform, true).unwrap_err().to_string();
        assert!(err.starts_with("force an update for service api in environment test"));
        assert!(err.contains("rollout svc status --name api --env test"));
    }

    #[test]
    fn other_force_failures_are_wrapped_as_is() {
        let platform = MockPlatform {
            deploy: DeployBehavior::NoChanges,
            force_update: ForceUpdateBehavior::Fail("access denied".to_owned()),
            ..Default::default()
        };
        let err = run(&platform, true).unwrap_err().to_string();
        assert!(err.ends_with("access denied"));
        assert!(!err.contains("svc status"));
    }

    #[test]
    fn engine_failure_is_not_reinterpreted() {
        let platform = MockPlatform {
            deploy: DeployBehavior::Fail("stack is in UPDATE_IN_PROGRESS".to_owned()),
            ..Default::default()
        };
        let err = run(&platform, true).unwrap_err();
        assert!(matches!(err, CoreError::Deploy { .. }));
        assert_eq!(platform.calls().force_updates, 0);
    }
}
