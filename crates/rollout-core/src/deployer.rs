use crate::deploy::{Clock, DeployExecutor, DeployState};
use crate::diff::{diff_templates, TemplateDiff};
use crate::render::{stack_payload, TemplateRenderer};
use crate::stack::{StackConfig, StackConfigBuilder};
use crate::upload::{
    AddonPackager, CustomResourceSource, ImageTags, UploadArtifactsOutput, UploadPipeline,
};
use crate::workspace::Workspace;
use crate::CoreError;
use rollout_remote::{
    CertificateValidator, DeployEngine, EndpointGetter, EnvironmentDescriber, ImageBuilder,
    ServiceUpdater, TemplateGetter, VersionGetter,
};
use rollout_schema::{
    AppCapabilities, DeployOptions, EnvironmentCapabilities, ServiceManifest, WorkloadIdentity,
    WorkloadManifest,
};
use rollout_store::ObjectUploader;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Every external collaborator one deploy talks to.
pub struct Collaborators<'a> {
    pub app_version: &'a dyn VersionGetter,
    pub env_version: &'a dyn VersionGetter,
    pub endpoint: &'a dyn EndpointGetter,
    pub environment: &'a dyn EnvironmentDescriber,
    pub certs: &'a dyn CertificateValidator,
    pub engine: &'a dyn DeployEngine,
    pub updater: &'a dyn ServiceUpdater,
    pub templates: &'a dyn TemplateGetter,
    pub uploader: &'a dyn ObjectUploader,
    pub images: &'a dyn ImageBuilder,
    pub addons: &'a dyn AddonPackager,
    pub custom_resources: &'a dyn CustomResourceSource,
    pub renderer: &'a dyn TemplateRenderer,
    pub clock: &'a dyn Clock,
}

#[derive(Debug, Clone, Default)]
pub struct DeployInput {
    pub image_tags: ImageTags,
    /// User resource tags; reserved keys are overwritten.
    pub resource_tags: BTreeMap<String, String>,
    pub options: DeployOptions,
}

/// Outcome of a successful deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    /// Every state the deploy went through, starting at `NotStarted`.
    pub states: Vec<DeployState>,
    pub recommended_actions: Vec<String>,
}

impl DeployReport {
    pub fn final_state(&self) -> DeployState {
        self.states.last().copied().unwrap_or(DeployState::NotStarted)
    }
}

/// Per-invocation deploy context for one workload in one environment.
///
/// Built once per command and dropped at the end; holds no state across
/// invocations besides what the collaborators themselves keep.
pub struct Deployer<'a> {
    identity: WorkloadIdentity,
    app: &'a AppCapabilities,
    env: &'a EnvironmentCapabilities,
    bucket: &'a str,
    manifest: &'a WorkloadManifest,
    workspace: &'a Workspace,
    collaborators: Collaborators<'a>,
}

impl<'a> Deployer<'a> {
    pub fn new(
        app: &'a AppCapabilities,
        env: &'a EnvironmentCapabilities,
        bucket: &'a str,
        manifest: &'a WorkloadManifest,
        workspace: &'a Workspace,
        collaborators: Collaborators<'a>,
    ) -> Self {
        Self {
            identity: WorkloadIdentity::new(&app.name, &env.name, &manifest.name),
            app,
            env,
            bucket,
            manifest,
            workspace,
            collaborators,
        }
    }

    pub fn identity(&self) -> &WorkloadIdentity {
        &self.identity
    }

    fn builder(&self) -> StackConfigBuilder<'_> {
        let c = &self.collaborators;
        StackConfigBuilder {
            identity: &self.identity,
            app: self.app,
            env: self.env,
            app_version: c.app_version,
            env_version: c.env_version,
            endpoint: c.endpoint,
            environment: c.environment,
            certs: c.certs,
        }
    }

    pub fn upload_artifacts(&self, tags: &ImageTags) -> Result<UploadArtifactsOutput, CoreError> {
        let c = &self.collaborators;
        UploadPipeline {
            identity: &self.identity,
            env: self.env,
            bucket: self.bucket,
            workspace: self.workspace,
            uploader: c.uploader,
            images: c.images,
            addons: c.addons,
            custom_resources: c.custom_resources,
        }
        .run(self.manifest, tags)
    }

    pub fn stack_config(
        &self,
        uploaded: &UploadArtifactsOutput,
        resource_tags: &BTreeMap<String, String>,
    ) -> Result<StackConfig, CoreError> {
        self.builder().build(self.manifest, uploaded, resource_tags)
    }

    /// Validate the manifest without uploading anything.
    pub fn validate(&self) -> Result<StackConfig, CoreError> {
        self.stack_config(&UploadArtifactsOutput::default(), &BTreeMap::new())
    }

    /// Upload, build, render and deploy. Validation runs before the first
    /// upload so an unroutable manifest never mutates anything.
    pub fn deploy(&self, input: &DeployInput) -> Result<DeployReport, CoreError> {
        let validated = self.validate()?;
        let uploaded = self.upload_artifacts(&input.image_tags)?;
        let config = StackConfig {
            runtime: validated
                .runtime
                .with_artifacts(&uploaded, &input.resource_tags),
            ..validated
        };
        let template = self.collaborators.renderer.render(&config)?;
        let payload = stack_payload(&config, template);

        let executor = DeployExecutor {
            engine: self.collaborators.engine,
            updater: self.collaborators.updater,
            clock: self.collaborators.clock,
        };
        let states = executor.execute(&self.identity, &payload, self.bucket, &input.options)?;
        info!(
            "deployed {} ({})",
            self.identity,
            states.last().copied().unwrap_or(DeployState::NotStarted)
        );
        Ok(DeployReport {
            states,
            recommended_actions: recommended_actions(&config),
        })
    }

    /// Diff the template this manifest renders to against the deployed one.
    /// A stack that does not exist yet diffs against an empty template.
    pub fn deploy_diff(
        &self,
        uploaded: &UploadArtifactsOutput,
        resource_tags: &BTreeMap<String, String>,
    ) -> Result<TemplateDiff, CoreError> {
        let config = self.stack_config(uploaded, resource_tags)?;
        let local = self.collaborators.renderer.render(&config)?;
        let deployed = self
            .collaborators
            .templates
            .template(&config.stack_name())?
            .unwrap_or_default();
        if deployed.is_empty() {
            debug!("stack {} is not deployed yet", config.stack_name());
        }
        diff_templates(&deployed, &local)
    }
}

/// Follow-ups printed after a successful deploy.
pub fn recommended_actions(config: &StackConfig) -> Vec<String> {
    let mut actions = Vec::new();
    match &config.manifest.workload {
        ServiceManifest::RequestDrivenWebService(svc) => {
            if let Some(alias) = svc.http.alias.as_deref().filter(|a| !a.is_empty()) {
                actions.push(format!(
                    "The validation process for https://{alias} can take more than 15 minutes. \
                     Run `rollout svc show --name {}` to check its status.",
                    config.identity.name
                ));
            }
        }
        ServiceManifest::WorkerService(_) if !config.subscriptions.is_empty() => {
            actions.push(
                "Update your code to consume messages from the queue at environment variable \
                 `ROLLOUT_QUEUE_URI`."
                    .to_owned(),
            );
            let dedicated: Vec<&str> = config
                .subscriptions
                .iter()
                .filter(|s| s.queue)
                .map(|s| s.topic_name.as_str())
                .collect();
            if !dedicated.is_empty() {
                actions.push(format!(
                    "Topics {} have dedicated queues; their URIs are in the JSON map at \
                     environment variable `ROLLOUT_TOPIC_QUEUE_URIS`.",
                    dedicated.join(", ")
                ));
            }
        }
        _ => {}
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{DeployBehavior, FixedClock, MockPlatform};
    use crate::render::JsonTemplateRenderer;
    use chrono::{TimeZone, Utc};
    use rollout_schema::{parse_manifest_str, Arn};

    const API: &str = r#"
manifest_version = 1
name = "api"

[workload]
type = "backend_service"

[workload.container.image]
location = "api:1.0"
port = 8080
"#;

    fn app() -> AppCapabilities {
        AppCapabilities {
            name: "shop".to_owned(),
            template_version: "v1.2.0".to_owned(),
            ..Default::default()
        }
    }

    fn env() -> EnvironmentCapabilities {
        EnvironmentCapabilities {
            name: "test".to_owned(),
            region: "us-west-2".to_owned(),
            account_id: "123456789012".to_owned(),
            ..Default::default()
        }
    }

    fn collaborators<'a>(
        app: &'a AppCapabilities,
        platform: &'a MockPlatform,
        clock: &'a FixedClock,
    ) -> Collaborators<'a> {
        Collaborators {
            app_version: app,
            env_version: platform,
            endpoint: platform,
            environment: platform,
            certs: platform,
            engine: platform,
            updater: platform,
            templates: platform,
            uploader: platform,
            images: platform,
            addons: platform,
            custom_resources: platform,
            renderer: &JsonTemplateRenderer,
            clock,
        }
    }

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn deploy_reaches_deployed_and_tags_the_stack() {
        let (app, env) = (app(), env());
        let platform = MockPlatform::default();
        let clock = clock();
        let manifest = parse_manifest_str(API).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let deployer = Deployer::new(
            &app,
            &env,
            "artifacts",
            &manifest,
            &ws,
            collaborators(&app, &platform, &clock),
        );

        let report = deployer.deploy(&DeployInput::default()).unwrap();
        assert_eq!(report.final_state(), DeployState::Deployed);
        assert!(report.recommended_actions.is_empty());

        let calls = platform.calls();
        assert_eq!(calls.deploys.len(), 1);
        assert_eq!(calls.deploys[0].name, "shop-test-api");
        assert_eq!(calls.deploys[0].tags["rollout-environment"], "test");
    }

    #[test]
    fn deploy_fetches_environment_once_and_keeps_user_tags() {
        let (app, env) = (app(), env());
        let platform = MockPlatform::default();
        let clock = clock();
        let manifest = parse_manifest_str(API).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let deployer = Deployer::new(
            &app,
            &env,
            "artifacts",
            &manifest,
            &ws,
            collaborators(&app, &platform, &clock),
        );

        let input = DeployInput {
            resource_tags: BTreeMap::from([("team".to_owned(), "payments".to_owned())]),
            ..DeployInput::default()
        };
        deployer.deploy(&input).unwrap();

        let calls = platform.calls();
        assert_eq!(calls.endpoint_lookups, 1);
        assert_eq!(calls.deploys[0].tags["team"], "payments");
        assert_eq!(
            calls.deploys[0].parameters.get("EnvName").map(String::as_str),
            Some("test")
        );
    }

    #[test]
    fn invalid_manifest_uploads_nothing() {
        let (app, env) = (app(), env());
        let platform = MockPlatform::default();
        let clock = clock();
        let manifest = parse_manifest_str(&format!(
            "{API}\n[workload.http]\nalias = \"api.shop.example.com\"\n"
        ))
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let deployer = Deployer::new(
            &app,
            &env,
            "artifacts",
            &manifest,
            &ws,
            collaborators(&app, &platform, &clock),
        );

        assert!(deployer.deploy(&DeployInput::default()).is_err());
        assert!(platform.calls().uploads.is_empty());
        assert!(platform.calls().deploys.is_empty());
    }

    #[test]
    fn engine_failure_is_wrapped_with_service_and_env() {
        let (app, env) = (app(), env());
        let platform = MockPlatform {
            deploy: DeployBehavior::Fail("stack is in UPDATE_ROLLBACK_FAILED".to_owned()),
            ..Default::default()
        };
        let clock = clock();
        let manifest = parse_manifest_str(API).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let deployer = Deployer::new(
            &app,
            &env,
            "artifacts",
            &manifest,
            &ws,
            collaborators(&app, &platform, &clock),
        );
        let err = deployer.deploy(&DeployInput::default()).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("deploy service api to environment test:"));
    }

    #[test]
    fn diff_against_missing_stack_is_additions_only() {
        let (app, env) = (app(), env());
        let platform = MockPlatform::default();
        let clock = clock();
        let manifest = parse_manifest_str(API).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let deployer = Deployer::new(
            &app,
            &env,
            "artifacts",
            &manifest,
            &ws,
            collaborators(&app, &platform, &clock),
        );
        let diff = deployer
            .deploy_diff(&UploadArtifactsOutput::default(), &BTreeMap::new())
            .unwrap();
        assert!(!diff.is_empty());
        assert_eq!(diff.summary().1, 0);
        assert_eq!(diff.summary().2, 0);
    }

    #[test]
    fn diff_against_identical_deployed_template_is_empty() {
        let (app, env) = (app(), env());
        let clock = clock();
        let manifest = parse_manifest_str(API).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());

        let first = MockPlatform::default();
        let config = Deployer::new(
            &app,
            &env,
            "artifacts",
            &manifest,
            &ws,
            collaborators(&app, &first, &clock),
        )
        .validate()
        .unwrap();
        let rendered = JsonTemplateRenderer.render(&config).unwrap();

        let platform = MockPlatform {
            templates: BTreeMap::from([("shop-test-api".to_owned(), rendered)]),
            ..Default::default()
        };
        let deployer = Deployer::new(
            &app,
            &env,
            "artifacts",
            &manifest,
            &ws,
            collaborators(&app, &platform, &clock),
        );
        let diff = deployer
            .deploy_diff(&UploadArtifactsOutput::default(), &BTreeMap::new())
            .unwrap();
        assert!(diff.is_empty(), "{}", diff.render());
    }

    #[test]
    fn worker_actions_mention_queue_variables() {
        let manifest = parse_manifest_str(
            r#"
manifest_version = 1
name = "orders"

[workload]
type = "worker_service"

[workload.container.image]
location = "orders:latest"

[[workload.subscribe.topics]]
name = "created"
service = "api"
queue = true
"#,
        )
        .unwrap();
        let config = StackConfig {
            identity: WorkloadIdentity::new("shop", "test", "orders"),
            manifest,
            runtime: Default::default(),
            options: Default::default(),
            subscriptions: vec![crate::stack::ResolvedSubscription {
                topic_name: "shop-test-api-created".to_owned(),
                topic_arn: Arn::new("arn:aws:sns:us-west-2:1:shop-test-api-created"),
                queue: true,
            }],
            permissions_boundary: None,
        };
        let actions = recommended_actions(&config);
        assert_eq!(actions.len(), 2);
        assert!(actions[0].contains("ROLLOUT_QUEUE_URI"));
        assert!(actions[1].contains("ROLLOUT_TOPIC_QUEUE_URIS"));
    }
}
