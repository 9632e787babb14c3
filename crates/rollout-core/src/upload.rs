//! Artifact upload pipeline.
//!
//! Each step owns one field of [`UploadArtifactsOutput`] and never touches
//! another step's field. Object keys are content-derived, so a full re-run
//! uploads to the same keys and is safe to retry.

use crate::stack::ContainerImage;
use crate::workspace::Workspace;
use crate::CoreError;
use rollout_remote::{BuildArgs, ImageBuilder};
use rollout_schema::{
    Arn, EnvironmentCapabilities, ServiceManifest, StaticSiteConfig, WorkloadIdentity,
    WorkloadKind, WorkloadManifest,
};
use rollout_store::{format_object_arn, keys, parse_object_url, partition_for_region, ObjectUploader};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Packages a workload's add-on templates into one template.
pub trait AddonPackager: Send + Sync {
    /// `None` when the workload has no add-ons.
    fn package(&self, workload: &str) -> Result<Option<String>, CoreError>;
}

/// Supplies the function bundles custom resources are backed by.
pub trait CustomResourceSource: Send + Sync {
    fn bundle(&self, name: &str) -> Result<Vec<u8>, CoreError>;
}

/// Custom resources each workload kind's template delegates to.
pub fn custom_resources_for(kind: WorkloadKind) -> &'static [&'static str] {
    match kind {
        WorkloadKind::LoadBalancedWebService => &[
            "DynamicDesiredCountFunction",
            "EnvControllerFunction",
            "RulePriorityFunction",
            "NLBCustomDomainFunction",
            "NLBCertValidatorFunction",
        ],
        WorkloadKind::BackendService => &[
            "DynamicDesiredCountFunction",
            "EnvControllerFunction",
            "RulePriorityFunction",
        ],
        WorkloadKind::RequestDrivenWebService => &["CustomDomainFunction", "EnvControllerFunction"],
        WorkloadKind::WorkerService => &[
            "DynamicDesiredCountFunction",
            "EnvControllerFunction",
            "BacklogPerTaskCalculatorFunction",
        ],
        WorkloadKind::ScheduledJob => &["EnvControllerFunction"],
        WorkloadKind::StaticSite => &["TriggerStateMachineFunction"],
    }
}

/// Tags applied to locally built images besides `latest`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageTags {
    /// User supplied tag.
    pub tag: Option<String>,
    /// Short commit id of the workspace.
    pub commit: Option<String>,
}

impl ImageTags {
    /// Tags for one container. Sidecars get every tag prefixed with their
    /// container name so they never collide with the main image.
    pub fn for_container(&self, container: &str, workload: &str) -> Vec<String> {
        let mut tags = vec!["latest".to_owned()];
        for extra in [&self.tag, &self.commit].into_iter().flatten() {
            if !extra.is_empty() && !tags.contains(extra) {
                tags.push(extra.clone());
            }
        }
        if container == workload {
            tags
        } else {
            tags.into_iter().map(|t| format!("{container}-{t}")).collect()
        }
    }
}

/// Everything the pipeline uploaded, keyed for the stack builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadArtifactsOutput {
    /// Container name to pushed image.
    pub images: BTreeMap<String, ContainerImage>,
    /// Container name to env file ARN.
    pub env_file_arns: BTreeMap<String, Arn>,
    pub addons_url: Option<String>,
    /// Custom resource name to bundle URL.
    pub custom_resource_urls: BTreeMap<String, String>,
    pub static_asset_mapping_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssetMapping {
    path: String,
    destination_path: String,
    content_type: String,
}

/// Registry repository for a workload's images.
pub fn image_repository(env: &EnvironmentCapabilities, id: &WorkloadIdentity) -> String {
    let suffix = if partition_for_region(&env.region) == "aws-cn" {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    };
    format!(
        "{}.dkr.ecr.{}.{suffix}/{}/{}",
        env.account_id, env.region, id.app, id.name
    )
}

fn content_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

pub struct UploadPipeline<'a> {
    pub identity: &'a WorkloadIdentity,
    pub env: &'a EnvironmentCapabilities,
    pub bucket: &'a str,
    pub workspace: &'a Workspace,
    pub uploader: &'a dyn ObjectUploader,
    pub images: &'a dyn ImageBuilder,
    pub addons: &'a dyn AddonPackager,
    pub custom_resources: &'a dyn CustomResourceSource,
}

impl UploadPipeline<'_> {
    pub fn run(
        &self,
        manifest: &WorkloadManifest,
        tags: &ImageTags,
    ) -> Result<UploadArtifactsOutput, CoreError> {
        info!("uploading artifacts for {}", self.identity);
        let images = self.build_images(manifest, tags)?;
        let env_file_arns = self.upload_env_files(manifest)?;
        let addons_url = self.upload_addons()?;
        let custom_resource_urls = self.upload_custom_resources(manifest.kind())?;
        let static_asset_mapping_url = match &manifest.workload {
            ServiceManifest::StaticSite(site) => Some(self.upload_static_assets(site)?),
            _ => None,
        };
        Ok(UploadArtifactsOutput {
            images,
            env_file_arns,
            addons_url,
            custom_resource_urls,
            static_asset_mapping_url,
        })
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<String, CoreError> {
        debug!("uploading {} bytes to {}/{key}", data.len(), self.bucket);
        Ok(self.uploader.upload(self.bucket, key, data)?)
    }

    pub fn build_images(
        &self,
        manifest: &WorkloadManifest,
        tags: &ImageTags,
    ) -> Result<BTreeMap<String, ContainerImage>, CoreError> {
        let repository = image_repository(self.env, self.identity);
        let mut images = BTreeMap::new();
        for (container, image) in manifest.images_to_build() {
            let Some(dockerfile) = image.build.as_deref() else {
                continue;
            };
            let dockerfile_path = self.workspace.path(dockerfile);
            let context = match image.context.as_deref() {
                Some(ctx) => self.workspace.path(ctx),
                None => dockerfile_path
                    .parent()
                    .map_or_else(|| self.workspace.root().to_path_buf(), Path::to_path_buf),
            };
            let args = BuildArgs {
                container: container.clone(),
                repository: repository.clone(),
                dockerfile: dockerfile_path.display().to_string(),
                context: context.display().to_string(),
                args: image.args.clone(),
                tags: tags.for_container(&container, &manifest.name),
            };
            info!("building image for container {container}");
            let digest = self.images.build_and_push(&args)?;
            images.insert(
                container,
                ContainerImage {
                    repository: repository.clone(),
                    digest,
                    tags: args.tags,
                },
            );
        }
        Ok(images)
    }

    /// Upload each distinct env file once and hand its ARN to every container
    /// that references it.
    pub fn upload_env_files(
        &self,
        manifest: &WorkloadManifest,
    ) -> Result<BTreeMap<String, Arn>, CoreError> {
        let mut by_path: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (container, path) in manifest.env_files() {
            by_path.entry(path).or_default().push(container);
        }

        let partition = partition_for_region(&self.env.region);
        let mut arns = BTreeMap::new();
        for (path, containers) in by_path {
            let content = self.workspace.read(&path)?;
            let key = keys::env_file(&path, &content);
            let url = self.put(&key, &content)?;
            let (bucket, key) = parse_object_url(&url)?;
            let arn = format_object_arn(partition, &bucket, &key);
            debug!("env file {path} -> {arn} for {}", containers.join(", "));
            for container in containers {
                arns.insert(container, arn.clone());
            }
        }
        Ok(arns)
    }

    pub fn upload_addons(&self) -> Result<Option<String>, CoreError> {
        let Some(template) = self.addons.package(&self.identity.name)? else {
            debug!("no add-ons for {}", self.identity.name);
            return Ok(None);
        };
        let key = keys::addons_template(&self.identity.name, template.as_bytes());
        Ok(Some(self.put(&key, template.as_bytes())?))
    }

    pub fn upload_custom_resources(
        &self,
        kind: WorkloadKind,
    ) -> Result<BTreeMap<String, String>, CoreError> {
        let mut urls = BTreeMap::new();
        for name in custom_resources_for(kind) {
            let bundle = self.custom_resources.bundle(name)?;
            let key = keys::custom_resource(name, &bundle);
            urls.insert((*name).to_owned(), self.put(&key, &bundle)?);
        }
        Ok(urls)
    }

    /// Upload every static-site file and the mapping that tells the site
    /// where each object is served from. Returns the mapping's URL.
    pub fn upload_static_assets(&self, site: &StaticSiteConfig) -> Result<String, CoreError> {
        let mut mapping = Vec::new();
        for upload in &site.files {
            let single_file = self.workspace.path(&upload.source).is_file();
            for (rel, abs) in self.workspace.files_under(&upload.source, upload.recursive)? {
                let content = std::fs::read(&abs)?;
                let key = keys::static_asset(&content);
                self.put(&key, &content)?;

                let destination = match (upload.destination.as_deref(), single_file) {
                    (Some(dest), true) => dest.trim_matches('/').to_owned(),
                    (Some(dest), false) if !dest.trim_matches('/').is_empty() => {
                        format!("{}/{rel}", dest.trim_matches('/'))
                    }
                    _ => rel.clone(),
                };
                mapping.push(AssetMapping {
                    path: key,
                    content_type: content_type(&destination).to_owned(),
                    destination_path: destination,
                });
            }
        }
        let body = serde_json::to_vec(&mapping)?;
        let key = keys::asset_mapping(&self.identity.name, &body);
        self.put(&key, &body)
    }
}
