use chrono::{Duration, TimeZone, Utc};
use rollout_core::mock::{DeployBehavior, FixedClock, ForceUpdateBehavior, MockPlatform};
use rollout_core::{
    Collaborators, CoreError, DeployInput, DeployState, Deployer, JsonTemplateRenderer, Workspace,
};
use rollout_schema::{
    parse_manifest_str, AppCapabilities, Arn, DeployOptions, EnvironmentCapabilities,
    WorkloadManifest,
};

fn app(domain: Option<&str>) -> AppCapabilities {
    AppCapabilities {
        name: "shop".to_owned(),
        domain: domain.map(str::to_owned),
        template_version: "v1.2.0".to_owned(),
        ..Default::default()
    }
}

fn env(alb_certs: &[&str]) -> EnvironmentCapabilities {
    EnvironmentCapabilities {
        name: "test".to_owned(),
        region: "us-west-2".to_owned(),
        account_id: "123456789012".to_owned(),
        public_alb_certificates: alb_certs.iter().map(|a| Arn::new(*a)).collect(),
        ..Default::default()
    }
}

const WEB_NO_ALIAS: &str = r#"
manifest_version = 1
name = "web"

[workload]
type = "load_balanced_web_service"

[workload.container.image]
location = "nginx:latest"
port = 80

[workload.http]
path = "/"
"#;

const WORKER: &str = r#"
manifest_version = 1
name = "billing"

[workload]
type = "worker_service"

[workload.container.image]
location = "billing:latest"

[[workload.subscribe.topics]]
name = "orders"
service = "database"
"#;

const API: &str = r#"
manifest_version = 1
name = "api"

[workload]
type = "backend_service"

[workload.container.image]
location = "api:1.0"
"#;

struct Harness {
    app: AppCapabilities,
    env: EnvironmentCapabilities,
    manifest: WorkloadManifest,
    platform: MockPlatform,
    clock: FixedClock,
    _dir: tempfile::TempDir,
    workspace: Workspace,
}

impl Harness {
    fn new(
        app: AppCapabilities,
        env: EnvironmentCapabilities,
        manifest: &str,
        platform: MockPlatform,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path());
        Self {
            app,
            env,
            manifest: parse_manifest_str(manifest).unwrap(),
            platform,
            clock: FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            _dir: dir,
            workspace,
        }
    }

    fn deployer(&self) -> Deployer<'_> {
        let p = &self.platform;
        Deployer::new(
            &self.app,
            &self.env,
            "artifacts",
            &self.manifest,
            &self.workspace,
            Collaborators {
                app_version: &self.app,
                env_version: p,
                endpoint: p,
                environment: p,
                certs: p,
                engine: p,
                updater: p,
                templates: p,
                uploader: p,
                images: p,
                addons: p,
                custom_resources: p,
                renderer: &JsonTemplateRenderer,
                clock: &self.clock,
            },
        )
    }

    fn deploy(&self, force: bool) -> Result<Vec<DeployState>, CoreError> {
        let input = DeployInput {
            options: DeployOptions {
                force_new_update: force,
                ..Default::default()
            },
            ..Default::default()
        };
        self.deployer().deploy(&input).map(|r| r.states)
    }
}

#[test]
fn imported_alb_certs_require_an_alias() {
    let h = Harness::new(
        app(None),
        env(&["arn:aws:acm:us-west-2:123456789012:certificate/x"]),
        WEB_NO_ALIAS,
        MockPlatform::default(),
    );
    let err = h.deployer().validate().unwrap_err();
    assert_eq!(
        err.to_string(),
        "validate ALB runtime configuration for \"http\": cannot deploy service web without \
         \"alias\" to environment test with certificate imported"
    );
    assert!(h.platform.calls().uploads.is_empty());
}

#[test]
fn no_certs_and_no_domain_need_no_alias() {
    let h = Harness::new(app(None), env(&[]), WEB_NO_ALIAS, MockPlatform::default());
    let config = h.deployer().validate().unwrap();
    assert!(!config.options.https);
    assert!(h.platform.calls().cert_validations.is_empty());
}

#[test]
fn worker_subscription_resolves_to_deployed_topic() {
    let platform = MockPlatform {
        topics: vec![Arn::new(
            "arn:aws:sns:us-west-2:123456789012:shop-test-database-orders",
        )],
        ..Default::default()
    };
    let h = Harness::new(app(None), env(&[]), WORKER, platform);
    let config = h.deployer().validate().unwrap();
    assert_eq!(
        config.subscriptions[0].topic_arn,
        "arn:aws:sns:us-west-2:123456789012:shop-test-database-orders"
    );
}

#[test]
fn worker_subscription_to_missing_topic_fails() {
    let platform = MockPlatform {
        topics: vec![Arn::new("arn:aws:sns:us-west-2:123456789012:shop-test-api-events")],
        ..Default::default()
    };
    let h = Harness::new(app(None), env(&[]), WORKER, platform);
    let err = h.deployer().validate().unwrap_err();
    assert_eq!(
        err.to_string(),
        "SNS topic shop-test-database-orders does not exist in environment test"
    );
}

#[test]
fn empty_change_set_without_force_asks_for_force() {
    let platform = MockPlatform {
        deploy: DeployBehavior::NoChanges,
        ..Default::default()
    };
    let h = Harness::new(app(None), env(&[]), API, platform);
    let err = h.deploy(false).unwrap_err();
    assert!(matches!(err, CoreError::ChangeSetEmpty { .. }));
    assert!(err.recommended_action().unwrap().contains("--force"));
    assert_eq!(h.platform.calls().force_updates, 0);
}

#[test]
fn empty_change_set_with_force_updates_once() {
    let platform = MockPlatform {
        deploy: DeployBehavior::NoChanges,
        last_updated_at: Utc.with_ymd_and_hms(2024, 4, 30, 9, 0, 0).unwrap(),
        ..Default::default()
    };
    let h = Harness::new(app(None), env(&[]), API, platform);
    let states = h.deploy(true).unwrap();
    assert_eq!(
        states,
        vec![
            DeployState::NotStarted,
            DeployState::NoOpDeployed,
            DeployState::ForceUpdating,
            DeployState::Forced,
        ]
    );
    assert_eq!(h.platform.calls().force_updates, 1);
}

#[test]
fn force_update_skipped_when_service_moved_on() {
    let clock_time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let platform = MockPlatform {
        deploy: DeployBehavior::NoChanges,
        last_updated_at: clock_time + Duration::seconds(30),
        ..Default::default()
    };
    let h = Harness::new(app(None), env(&[]), API, platform);
    let states = h.deploy(true).unwrap();
    assert_eq!(states.last(), Some(&DeployState::Deployed));
    assert_eq!(h.platform.calls().force_updates, 0);
    assert_eq!(h.platform.calls().last_updated_lookups, 1);
}

#[test]
fn force_update_timeout_carries_status_hint() {
    let platform = MockPlatform {
        deploy: DeployBehavior::NoChanges,
        force_update: ForceUpdateBehavior::Timeout,
        ..Default::default()
    };
    let h = Harness::new(app(None), env(&[]), API, platform);
    let err = h.deploy(true).unwrap_err();
    assert!(err
        .to_string()
        .ends_with("run `rollout svc status --name api --env test` to check the deployment status"));
}
