use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Container name used for the logging sidecar.
pub const LOG_ROUTER_CONTAINER: &str = "firelens_log_router";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported manifest_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("invalid workload name '{0}': must match [a-z][a-z0-9-]*")]
    InvalidName(String),
    #[error("container '{container}' must set exactly one of image.build and image.location")]
    InvalidImage { container: String },
    #[error("sidecar '{0}' collides with a container the workload already defines")]
    ReservedContainerName(String),
    #[error("topic subscription #{index} must set both name and service")]
    InvalidSubscription { index: usize },
    #[error("static site must declare at least one file source")]
    NoStaticFiles,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkloadManifest {
    pub manifest_version: u32,
    pub name: String,
    pub workload: ServiceManifest,
}

/// The closed set of workload shapes the engine knows how to deploy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceManifest {
    LoadBalancedWebService(LoadBalancedWebServiceConfig),
    BackendService(BackendServiceConfig),
    RequestDrivenWebService(RequestDrivenWebServiceConfig),
    WorkerService(WorkerServiceConfig),
    ScheduledJob(ScheduledJobConfig),
    StaticSite(StaticSiteConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    LoadBalancedWebService,
    BackendService,
    RequestDrivenWebService,
    WorkerService,
    ScheduledJob,
    StaticSite,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::LoadBalancedWebService => write!(f, "Load Balanced Web Service"),
            WorkloadKind::BackendService => write!(f, "Backend Service"),
            WorkloadKind::RequestDrivenWebService => write!(f, "Request-Driven Web Service"),
            WorkloadKind::WorkerService => write!(f, "Worker Service"),
            WorkloadKind::ScheduledJob => write!(f, "Scheduled Job"),
            WorkloadKind::StaticSite => write!(f, "Static Site"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoadBalancedWebServiceConfig {
    pub container: ContainerConfig,
    #[serde(default)]
    pub http: Option<HttpConfig>,
    #[serde(default)]
    pub nlb: Option<NlbConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackendServiceConfig {
    pub container: ContainerConfig,
    /// Routing through the environment's internal load balancer.
    #[serde(default)]
    pub http: Option<HttpConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RequestDrivenWebServiceConfig {
    pub container: ContainerConfig,
    #[serde(default)]
    pub http: RequestDrivenHttpConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RequestDrivenHttpConfig {
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkerServiceConfig {
    pub container: ContainerConfig,
    #[serde(default)]
    pub subscribe: SubscribeConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubscribeConfig {
    #[serde(default)]
    pub topics: Vec<TopicSubscription>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TopicSubscription {
    /// Topic name as declared by the publishing service.
    pub name: String,
    /// Name of the publishing service.
    pub service: String,
    /// Give this subscription its own queue instead of the shared one.
    #[serde(default)]
    pub queue: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScheduledJobConfig {
    pub container: ContainerConfig,
    pub on: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    pub schedule: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StaticSiteConfig {
    #[serde(default)]
    pub http: StaticSiteHttpConfig,
    pub files: Vec<FileUpload>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StaticSiteHttpConfig {
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileUpload {
    /// Path relative to the workspace root; a file or a directory.
    pub source: String,
    /// Prefix under which the files are served.
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    pub image: ImageConfig,
    #[serde(default)]
    pub env_file: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub sidecars: BTreeMap<String, SidecarConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    /// Dockerfile to build locally.
    #[serde(default)]
    pub build: Option<String>,
    /// Build context; defaults to the Dockerfile's directory.
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    /// Prebuilt image reference.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl ImageConfig {
    pub fn needs_build(&self) -> bool {
        self.build.is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SidecarConfig {
    pub image: ImageConfig,
    #[serde(default)]
    pub env_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub env_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub alias: Alias,
    #[serde(default)]
    pub redirect_to_https: Option<bool>,
    /// Name of an existing load balancer to attach to instead of the
    /// environment's managed one.
    #[serde(default)]
    pub imported_alb: Option<String>,
    #[serde(default)]
    pub additional_rules: Vec<RoutingRule>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RoutingRule {
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub alias: Alias,
    #[serde(default)]
    pub redirect_to_https: Option<bool>,
}

impl RoutingRule {
    pub fn redirects_to_https(&self) -> bool {
        self.redirect_to_https == Some(true)
    }
}

impl HttpConfig {
    pub fn main_rule(&self) -> RoutingRule {
        RoutingRule {
            path: self.path.clone(),
            alias: self.alias.clone(),
            redirect_to_https: self.redirect_to_https,
        }
    }

    /// Every routing rule paired with the manifest field it came from.
    pub fn labeled_rules(&self) -> Vec<(String, RoutingRule)> {
        let mut rules = vec![("http".to_owned(), self.main_rule())];
        for (idx, rule) in self.additional_rules.iter().enumerate() {
            rules.push((format!("http.additional_rules[{idx}]"), rule.clone()));
        }
        rules
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NlbConfig {
    pub port: String,
    #[serde(default)]
    pub alias: Alias,
}

fn default_path() -> String {
    "/".to_owned()
}

/// One alias, optionally pinned to a hosted zone the operator already owns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AdvancedAlias {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_zone: Option<String>,
}

/// A set of aliases. Accepts a single string, a list of strings, or a list of
/// `{ name, hosted_zone }` tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "AliasRepr", into = "Vec<AdvancedAlias>")]
pub struct Alias(Vec<AdvancedAlias>);

#[derive(Deserialize)]
#[serde(untagged)]
enum AliasRepr {
    One(String),
    Many(Vec<AliasEntry>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AliasEntry {
    Name(String),
    Advanced(AdvancedAlias),
}

impl From<AliasRepr> for Alias {
    fn from(repr: AliasRepr) -> Self {
        let entries = match repr {
            AliasRepr::One(name) => vec![AliasEntry::Name(name)],
            AliasRepr::Many(entries) => entries,
        };
        Alias(
            entries
                .into_iter()
                .map(|e| match e {
                    AliasEntry::Name(name) => AdvancedAlias {
                        name,
                        hosted_zone: None,
                    },
                    AliasEntry::Advanced(a) => a,
                })
                .filter(|a| !a.name.is_empty())
                .collect(),
        )
    }
}

impl From<Alias> for Vec<AdvancedAlias> {
    fn from(alias: Alias) -> Self {
        alias.0
    }
}

impl Alias {
    pub fn new(names: &[&str]) -> Self {
        Alias(
            names
                .iter()
                .map(|n| AdvancedAlias {
                    name: (*n).to_owned(),
                    hosted_zone: None,
                })
                .collect(),
        )
    }

    pub fn with_hosted_zones(entries: Vec<AdvancedAlias>) -> Self {
        Alias(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|a| a.name.clone()).collect()
    }

    /// Hosted zones named explicitly by the aliases, deduplicated and sorted.
    pub fn hosted_zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = self.0.iter().filter_map(|a| a.hosted_zone.clone()).collect();
        zones.sort();
        zones.dedup();
        zones
    }
}

impl ServiceManifest {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            ServiceManifest::LoadBalancedWebService(_) => WorkloadKind::LoadBalancedWebService,
            ServiceManifest::BackendService(_) => WorkloadKind::BackendService,
            ServiceManifest::RequestDrivenWebService(_) => WorkloadKind::RequestDrivenWebService,
            ServiceManifest::WorkerService(_) => WorkloadKind::WorkerService,
            ServiceManifest::ScheduledJob(_) => WorkloadKind::ScheduledJob,
            ServiceManifest::StaticSite(_) => WorkloadKind::StaticSite,
        }
    }

    /// Container definition; `None` for workloads that do not run containers.
    pub fn container(&self) -> Option<&ContainerConfig> {
        match self {
            ServiceManifest::LoadBalancedWebService(c) => Some(&c.container),
            ServiceManifest::BackendService(c) => Some(&c.container),
            ServiceManifest::RequestDrivenWebService(c) => Some(&c.container),
            ServiceManifest::WorkerService(c) => Some(&c.container),
            ServiceManifest::ScheduledJob(c) => Some(&c.container),
            ServiceManifest::StaticSite(_) => None,
        }
    }
}

impl WorkloadManifest {
    pub fn kind(&self) -> WorkloadKind {
        self.workload.kind()
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.manifest_version != 1 {
            return Err(ManifestError::UnsupportedVersion(self.manifest_version));
        }
        validate_workload_name(&self.name)?;

        if let Some(container) = self.workload.container() {
            check_image(&self.name, &container.image)?;
            for (name, sidecar) in &container.sidecars {
                // Sidecars share the per-container maps with the main and
                // logging containers.
                if name == &self.name || name == LOG_ROUTER_CONTAINER {
                    return Err(ManifestError::ReservedContainerName(name.clone()));
                }
                check_image(name, &sidecar.image)?;
            }
        }

        match &self.workload {
            ServiceManifest::WorkerService(w) => {
                for (index, topic) in w.subscribe.topics.iter().enumerate() {
                    if topic.name.is_empty() || topic.service.is_empty() {
                        return Err(ManifestError::InvalidSubscription { index });
                    }
                }
            }
            ServiceManifest::StaticSite(s) if s.files.is_empty() => {
                return Err(ManifestError::NoStaticFiles);
            }
            _ => {}
        }
        Ok(())
    }

    /// Container name → env file path, for every container that declares one.
    /// The main container is named after the workload.
    pub fn env_files(&self) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        let Some(container) = self.workload.container() else {
            return files;
        };
        if let Some(path) = non_empty(container.env_file.as_deref()) {
            files.insert(self.name.clone(), path.to_owned());
        }
        for (name, sidecar) in &container.sidecars {
            if let Some(path) = non_empty(sidecar.env_file.as_deref()) {
                files.insert(name.clone(), path.to_owned());
            }
        }
        if let Some(path) = container
            .logging
            .as_ref()
            .and_then(|l| non_empty(l.env_file.as_deref()))
        {
            files.insert(LOG_ROUTER_CONTAINER.to_owned(), path.to_owned());
        }
        files
    }

    /// Containers whose image has to be built locally, keyed by container name.
    pub fn images_to_build(&self) -> BTreeMap<String, &ImageConfig> {
        let mut images = BTreeMap::new();
        let Some(container) = self.workload.container() else {
            return images;
        };
        if container.image.needs_build() {
            images.insert(self.name.clone(), &container.image);
        }
        for (name, sidecar) in &container.sidecars {
            if sidecar.image.needs_build() {
                images.insert(name.clone(), &sidecar.image);
            }
        }
        images
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

fn check_image(container: &str, image: &ImageConfig) -> Result<(), ManifestError> {
    if image.build.is_some() == image.location.is_some() {
        return Err(ManifestError::InvalidImage {
            container: container.to_owned(),
        });
    }
    Ok(())
}

pub fn validate_workload_name(name: &str) -> Result<(), ManifestError> {
    let mut bytes = name.bytes();
    let valid = bytes.next().is_some_and(|b| b.is_ascii_lowercase())
        && bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(ManifestError::InvalidName(name.to_owned()))
    }
}

pub fn parse_manifest_str(input: &str) -> Result<WorkloadManifest, ManifestError> {
    let manifest: WorkloadManifest = toml::from_str(input)?;
    manifest.validate()?;
    Ok(manifest)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<WorkloadManifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}
