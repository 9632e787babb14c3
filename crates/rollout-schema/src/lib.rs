//! Workload manifests, identity, and capability snapshots for rollout.
//!
//! This crate defines the schema layer: the TOML workload manifest
//! (`WorkloadManifest`) with its closed set of workload variants
//! (`ServiceManifest`), the `WorkloadIdentity` triple every deploy is keyed by,
//! read-only environment and application capability snapshots, and the
//! caller-facing `DeployOptions`.

pub mod capabilities;
pub mod identity;
pub mod manifest;
pub mod options;
pub mod types;

pub use capabilities::{AppCapabilities, CdnConfig, EnvironmentCapabilities};
pub use identity::WorkloadIdentity;
pub use manifest::{
    parse_manifest_file, parse_manifest_str, validate_workload_name, AdvancedAlias, Alias,
    BackendServiceConfig, ContainerConfig, FileUpload, HttpConfig, ImageConfig,
    LoadBalancedWebServiceConfig, LoggingConfig, ManifestError, NlbConfig,
    RequestDrivenHttpConfig, RequestDrivenWebServiceConfig, RoutingRule, ScheduleConfig,
    ScheduledJobConfig, ServiceManifest, SidecarConfig, StaticSiteConfig, StaticSiteHttpConfig,
    SubscribeConfig, TopicSubscription, WorkerServiceConfig, WorkloadKind, WorkloadManifest,
    LOG_ROUTER_CONTAINER,
};
pub use options::DeployOptions;
pub use types::{Arn, StackName};
