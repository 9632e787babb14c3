//! Stack configuration and rollout engine.
//!
//! This crate turns a parsed workload manifest into a deployed stack: the
//! compatibility validator (`alias`) rejects configurations that cannot be
//! routed, the stack builder (`stack`) dispatches over the closed set of
//! workload variants, the upload pipeline (`upload`) pushes every referenced
//! artifact exactly once, and the deploy executor (`deploy`) runs the deploy
//! with a force-update fallback for empty change sets. `Deployer` ties these
//! together for one invocation. The template diff reporter (`diff`) and the
//! CDN redirect check (`redirect`) are side channels that do not gate a deploy.

pub mod alias;
pub mod deploy;
pub mod deployer;
pub mod diff;
pub mod mock;
pub mod redirect;
pub mod render;
pub mod stack;
pub mod upload;
pub mod version;
pub mod workspace;

pub use alias::{AliasPatterns, CompatibilityValidator};
pub use deploy::{validate_transition, Clock, DeployExecutor, DeployState, SystemClock};
pub use deployer::{Collaborators, DeployInput, DeployReport, Deployer};
pub use diff::{diff_templates, Change, TemplateDiff};
pub use redirect::{check_cdn_redirects, find_redirecting_services};
pub use render::{stack_payload, JsonTemplateRenderer, TemplateRenderer};
pub use stack::{
    ContainerImage, DnsDelegation, ResolvedSubscription, StackConfig, StackConfigBuilder,
    StackOptions, StackRuntimeConfig,
};
pub use upload::{
    custom_resources_for, AddonPackager, CustomResourceSource, ImageTags, UploadArtifactsOutput,
    UploadPipeline,
};
pub use workspace::Workspace;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] rollout_schema::ManifestError),
    #[error("store error: {0}")]
    Store(#[from] rollout_store::StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] rollout_remote::RemoteError),
    /// A network-exposure request the environment or application cannot serve.
    #[error("{0}")]
    Compatibility(String),
    /// A failure inside one manifest section, prefixed with that section.
    #[error("{context}: {source}")]
    Rule {
        context: String,
        #[source]
        source: Box<CoreError>,
    },
    #[error("cannot deploy service {service} because the application version is incompatible")]
    AppOutOfDate {
        service: String,
        app: String,
        current: String,
        needed: String,
    },
    #[error("invalid template version '{0}'")]
    InvalidVersion(String),
    #[error("SNS topic {topic} does not exist in environment {env}")]
    TopicNotFound { topic: String, env: String },
    #[error("invalid ARN '{0}'")]
    InvalidArn(String),
    #[error(
        "deploy service {service} to environment {env}: change set for stack {stack} has no changes"
    )]
    ChangeSetEmpty {
        service: String,
        env: String,
        stack: String,
    },
    #[error("deploy service {service} to environment {env}: {source}")]
    Deploy {
        service: String,
        env: String,
        #[source]
        source: rollout_remote::RemoteError,
    },
    #[error("force an update for service {service} in environment {env}: {source}{hint}")]
    ForceUpdate {
        service: String,
        env: String,
        #[source]
        source: rollout_remote::RemoteError,
        hint: String,
    },
    #[error(
        "services {} redirect HTTP to HTTPS, which loops behind a CDN that terminates TLS",
        .services.join(", ")
    )]
    CdnRedirect { services: Vec<String> },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("add-on error: {0}")]
    Addon(String),
    #[error("custom resource bundle {name} not found at {path}")]
    MissingBundle { name: String, path: String },
    #[error("render error: {0}")]
    Render(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid alias pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl CoreError {
    /// Wrap `self` with the manifest section it came from.
    #[must_use]
    pub fn in_rule(self, context: impl Into<String>) -> Self {
        CoreError::Rule {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Follow-up the user can take, kept apart from the error message.
    pub fn recommended_action(&self) -> Option<String> {
        match self {
            CoreError::Rule { source, .. } => source.recommended_action(),
            CoreError::AppOutOfDate {
                service,
                app,
                current,
                needed,
            } => Some(format!(
                "Application {app} is at version {current}, older than the {needed} required to \
                 deploy service {service}. Run `rollout app upgrade --name {app}` to upgrade."
            )),
            CoreError::ChangeSetEmpty { service, env, .. } => Some(format!(
                "Run `rollout deploy --name {service} --env {env} --force` to redeploy the \
                 service without infrastructure changes."
            )),
            CoreError::CdnRedirect { .. } => Some(
                "Set `http.redirect_to_https = false` on these services and redeploy them first."
                    .to_owned(),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_prefix_is_rendered() {
        let err = CoreError::Compatibility("boom".to_owned())
            .in_rule(r#"validate ALB runtime configuration for "http""#);
        assert_eq!(
            err.to_string(),
            r#"validate ALB runtime configuration for "http": boom"#
        );
    }

    #[test]
    fn recommended_action_survives_wrapping() {
        let err = CoreError::AppOutOfDate {
            service: "web".to_owned(),
            app: "shop".to_owned(),
            current: "v0.9.0".to_owned(),
            needed: "v1.0.0".to_owned(),
        }
        .in_rule("validate 'nlb.alias'");
        let action = err.recommended_action().unwrap();
        assert!(action.contains("rollout app upgrade --name shop"));
        assert!(!err.to_string().contains("rollout app upgrade"));
    }

    #[test]
    fn cdn_redirect_lists_services() {
        let err = CoreError::CdnRedirect {
            services: vec!["api".to_owned(), "web".to_owned()],
        };
        assert!(err.to_string().starts_with("services api, web redirect"));
    }

    #[test]
    fn plain_errors_have_no_action() {
        assert!(CoreError::Render("x".to_owned())
            .recommended_action()
            .is_none());
    }
}
