//! Remote platform contracts for rollout.
//!
//! Every call the deploy path makes against the outside world goes through one
//! of the small `Send + Sync` traits defined here: version and endpoint
//! getters, the environment describer, the certificate-alias validator, the
//! deploy engine, the service updater, the deployed-template getter, the image
//! builder and the redirect check. `HttpBackend` implements all of them over a
//! JSON control-plane API; `DockerImageBuilder` shells out to a local
//! container CLI.

pub mod config;
pub mod docker;
pub mod http;

pub use config::RemoteConfig;
pub use docker::DockerImageBuilder;
pub use http::HttpBackend;

use chrono::{DateTime, Utc};
use rollout_schema::{AppCapabilities, Arn, DeployOptions, StackName, WorkloadIdentity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Protocol version sent as `X-Rollout-Protocol` header on all HTTP requests.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("store error: {0}")]
    Store(#[from] rollout_store::StoreError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("rejected by remote: {0}")]
    Rejected(String),
    #[error("command failed: {0}")]
    Command(String),
}

impl RemoteError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Timeout(_))
    }
}

/// Outcome of a successful deploy call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployResult {
    /// The engine computed a change set and applied it.
    Applied,
    /// The engine computed an empty change set; nothing was applied.
    NoChanges,
}

/// A rendered stack ready to hand to the deploy engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackPayload {
    pub name: StackName,
    pub template: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions_boundary: Option<String>,
}

/// One local image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArgs {
    pub container: String,
    /// Registry repository the image is pushed to.
    pub repository: String,
    pub dockerfile: String,
    pub context: String,
    pub args: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

/// Template version getter for an application or environment.
pub trait VersionGetter: Send + Sync {
    /// Semver string, e.g. `v1.2.0`.
    fn version(&self) -> Result<String, RemoteError>;
}

pub trait EndpointGetter: Send + Sync {
    fn service_discovery_endpoint(&self) -> Result<String, RemoteError>;
}

/// Read-only lookups against one deployed environment.
pub trait EnvironmentDescriber: Send + Sync {
    fn public_cidr_blocks(&self) -> Result<Vec<String>, RemoteError>;
    fn topic_arns(&self) -> Result<Vec<Arn>, RemoteError>;
    /// Services deployed to the environment.
    fn services(&self) -> Result<Vec<String>, RemoteError>;
}

pub trait CertificateValidator: Send + Sync {
    /// Fail unless every alias is covered by one of `certificates`.
    fn validate_cert_aliases(
        &self,
        aliases: &[String],
        certificates: &[Arn],
    ) -> Result<(), RemoteError>;
}

pub trait DeployEngine: Send + Sync {
    fn deploy_service(
        &self,
        stack: &StackPayload,
        bucket: &str,
        options: &DeployOptions,
    ) -> Result<DeployResult, RemoteError>;
}

pub trait ServiceUpdater: Send + Sync {
    /// Redeploy the running service without a template change. Timeouts are
    /// reported as [`RemoteError::Timeout`].
    fn force_update_service(&self, id: &WorkloadIdentity) -> Result<(), RemoteError>;
    fn last_updated_at(&self, id: &WorkloadIdentity) -> Result<DateTime<Utc>, RemoteError>;
}

pub trait TemplateGetter: Send + Sync {
    /// Template of a deployed stack, `None` if the stack does not exist.
    fn template(&self, stack: &StackName) -> Result<Option<String>, RemoteError>;
}

pub trait ImageBuilder: Send + Sync {
    /// Build, tag and push an image. Returns the pushed digest.
    fn build_and_push(&self, args: &BuildArgs) -> Result<String, RemoteError>;
}

pub trait RedirectChecker: Send + Sync {
    /// Whether `service` answers plain HTTP with a redirect to HTTPS.
    fn redirects_http(&self, service: &str) -> Result<bool, RemoteError>;
}

/// A fetched application snapshot already knows its template version.
impl VersionGetter for AppCapabilities {
    fn version(&self) -> Result<String, RemoteError> {
        Ok(self.template_version.clone())
    }
}
