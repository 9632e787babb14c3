use crate::alias::CompatibilityValidator;
use crate::upload::UploadArtifactsOutput;
use crate::CoreError;
use rollout_remote::{CertificateValidator, EndpointGetter, EnvironmentDescriber, VersionGetter};
use rollout_schema::{
    AppCapabilities, Arn, EnvironmentCapabilities, ServiceManifest, StackName, TopicSubscription,
    WorkloadIdentity, WorkloadKind, WorkloadManifest,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A pushed container image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerImage {
    pub repository: String,
    pub digest: String,
    pub tags: Vec<String>,
}

impl ContainerImage {
    /// Digest-pinned reference, `repository@sha256:...`.
    pub fn reference(&self) -> String {
        format!("{}@{}", self.repository, self.digest)
    }
}

/// Per-deploy runtime values the template is rendered with. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StackRuntimeConfig {
    pub images: BTreeMap<String, ContainerImage>,
    pub env_file_arns: BTreeMap<String, Arn>,
    pub addons_url: Option<String>,
    pub custom_resource_urls: BTreeMap<String, String>,
    pub static_asset_mapping_url: Option<String>,
    pub service_discovery_endpoint: String,
    pub account_id: String,
    pub region: String,
    pub env_version: String,
    /// User supplied resource tags.
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsDelegation {
    pub domain: String,
    pub account_principal_arn: Option<Arn>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StackOptions {
    pub dns_delegation: Option<DnsDelegation>,
    pub https: bool,
    pub public_cidr_blocks: Vec<String>,
}

/// A topic subscription matched to the deployed topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSubscription {
    pub topic_name: String,
    pub topic_arn: Arn,
    pub queue: bool,
}

/// A validated, ready-to-render stack configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    pub identity: WorkloadIdentity,
    pub manifest: WorkloadManifest,
    pub runtime: StackRuntimeConfig,
    pub options: StackOptions,
    pub subscriptions: Vec<ResolvedSubscription>,
    pub permissions_boundary: Option<String>,
}

impl StackRuntimeConfig {
    /// Replace the uploaded artifact references and user tags, keeping the
    /// values fetched from the environment.
    #[must_use]
    pub fn with_artifacts(
        self,
        uploaded: &UploadArtifactsOutput,
        tags: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            images: uploaded.images.clone(),
            env_file_arns: uploaded.env_file_arns.clone(),
            addons_url: uploaded.addons_url.clone(),
            custom_resource_urls: uploaded.custom_resource_urls.clone(),
            static_asset_mapping_url: uploaded.static_asset_mapping_url.clone(),
            tags: tags.clone(),
            ..self
        }
    }
}

impl StackConfig {
    pub fn kind(&self) -> WorkloadKind {
        self.manifest.kind()
    }

    pub fn stack_name(&self) -> StackName {
        self.identity.stack_name()
    }
}

/// Builds a [`StackConfig`] for one workload. Validation happens here, before
/// anything is deployed.
pub struct StackConfigBuilder<'a> {
    pub identity: &'a WorkloadIdentity,
    pub app: &'a AppCapabilities,
    pub env: &'a EnvironmentCapabilities,
    pub app_version: &'a dyn VersionGetter,
    pub env_version: &'a dyn VersionGetter,
    pub endpoint: &'a dyn EndpointGetter,
    pub environment: &'a dyn EnvironmentDescriber,
    pub certs: &'a dyn CertificateValidator,
}

impl StackConfigBuilder<'_> {
    fn validator(&self) -> CompatibilityValidator<'_> {
        CompatibilityValidator {
            workload: &self.identity.name,
            app: self.app,
            env: self.env,
            app_version: self.app_version,
            certs: self.certs,
        }
    }

    pub fn build(
        &self,
        manifest: &WorkloadManifest,
        uploaded: &UploadArtifactsOutput,
        tags: &BTreeMap<String, String>,
    ) -> Result<StackConfig, CoreError> {
        let endpoint = self.endpoint.service_discovery_endpoint().map_err(|e| {
            CoreError::from(e).in_rule(format!(
                "get service discovery endpoint for environment {}",
                self.env.name
            ))
        })?;
        let env_version = self.env_version.version().map_err(|e| {
            CoreError::from(e)
                .in_rule(format!("get version of environment {}", self.env.name))
        })?;

        let runtime = StackRuntimeConfig {
            service_discovery_endpoint: endpoint,
            account_id: self.env.account_id.clone(),
            region: self.env.region.clone(),
            env_version,
            ..StackRuntimeConfig::default()
        }
        .with_artifacts(uploaded, tags);

        let mut options = StackOptions::default();
        let mut subscriptions = Vec::new();
        let validator = self.validator();

        match &manifest.workload {
            ServiceManifest::LoadBalancedWebService(svc) => {
                if let Some(http) = &svc.http {
                    validator.validate_http(http)?;
                }
                if let Some(nlb) = &svc.nlb {
                    validator.validate_nlb(nlb)?;
                    // Scopes the NLB security group.
                    options.public_cidr_blocks = self.public_cidr_blocks()?;
                }
                self.attach_domain(&mut options, svc.http.is_some());
            }
            ServiceManifest::BackendService(svc) => {
                if let Some(http) = &svc.http {
                    validator.validate_http(http)?;
                }
                // Served by the internal load balancer; the app's public
                // domain does not make it HTTPS.
                self.attach_domain(&mut options, false);
            }
            ServiceManifest::RequestDrivenWebService(svc) => {
                validator.validate_request_driven_alias(svc.http.alias.as_deref())?;
                self.attach_domain(&mut options, false);
            }
            ServiceManifest::WorkerService(svc) => {
                subscriptions = self.resolve_subscriptions(&svc.subscribe.topics)?;
            }
            ServiceManifest::ScheduledJob(_) => {}
            ServiceManifest::StaticSite(site) => {
                validator.validate_static_site_alias(site.http.alias.as_deref())?;
                self.attach_domain(&mut options, true);
            }
        }

        info!(
            "built {} stack configuration for {}",
            manifest.kind(),
            self.identity
        );
        Ok(StackConfig {
            identity: self.identity.clone(),
            manifest: manifest.clone(),
            runtime,
            options,
            subscriptions,
            permissions_boundary: self.app.permissions_boundary.clone(),
        })
    }

    fn public_cidr_blocks(&self) -> Result<Vec<String>, CoreError> {
        self.environment.public_cidr_blocks().map_err(|e| {
            CoreError::from(e).in_rule(format!(
                "get public CIDR blocks information from environment {}",
                self.env.name
            ))
        })
    }

    fn attach_domain(&self, options: &mut StackOptions, serves_http: bool) {
        if let Some(domain) = self.app.domain() {
            options.dns_delegation = Some(DnsDelegation {
                domain: domain.to_owned(),
                account_principal_arn: self.app.account_principal_arn.clone(),
            });
            options.https = serves_http;
        }
        if serves_http && self.env.has_imported_certs() {
            options.https = true;
        }
    }

    /// Match every subscription to a topic deployed in the environment.
    fn resolve_subscriptions(
        &self,
        topics: &[TopicSubscription],
    ) -> Result<Vec<ResolvedSubscription>, CoreError> {
        if topics.is_empty() {
            return Ok(Vec::new());
        }
        let arns = self.environment.topic_arns().map_err(|e| {
            CoreError::from(e).in_rule(format!("list SNS topics in environment {}", self.env.name))
        })?;
        let mut deployed = BTreeMap::new();
        for arn in arns {
            let name = arn
                .resource()
                .ok_or_else(|| CoreError::InvalidArn(arn.to_string()))?
                .to_owned();
            deployed.insert(name, arn);
        }

        topics
            .iter()
            .map(|t| {
                let topic_name = self.identity.topic_name(&t.service, &t.name);
                let topic_arn =
                    deployed
                        .get(&topic_name)
                        .cloned()
                        .ok_or_else(|| CoreError::TopicNotFound {
                            topic: topic_name.clone(),
                            env: self.env.name.clone(),
                        })?;
                debug!("subscription {topic_name} -> {topic_arn}");
                Ok(ResolvedSubscription {
                    topic_name,
                    topic_arn,
                    queue: t.queue,
                })
            })
            .collect()
    }
}
