//! In-memory stand-ins for every external collaborator.
//!
//! `MockPlatform` answers each remote contract from plain fields and records
//! the calls it receives, so tests can assert on upload counts, certificate
//! checks, and force updates without a network.

use crate::deploy::Clock;
use crate::upload::{AddonPackager, CustomResourceSource};
use crate::CoreError;
use chrono::{DateTime, Utc};
use rollout_remote::{
    BuildArgs, CertificateValidator, DeployEngine, DeployResult, EndpointGetter,
    EnvironmentDescriber, ImageBuilder, RedirectChecker, RemoteError, ServiceUpdater, StackPayload,
    TemplateGetter, VersionGetter,
};
use rollout_schema::{Arn, DeployOptions, StackName, WorkloadIdentity};
use rollout_store::{ObjectUploader, StoreError};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// What the mock deploy engine answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployBehavior {
    Applied,
    NoChanges,
    Fail(String),
}

/// What the mock force-update call answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceUpdateBehavior {
    Succeed,
    Timeout,
    Fail(String),
}

/// Environment lookups a [`MockPlatform`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    EnvVersion,
    Endpoint,
    PublicCidrBlocks,
    Topics,
}

/// Calls observed by a [`MockPlatform`].
#[derive(Debug, Clone, Default)]
pub struct MockCalls {
    pub cert_validations: Vec<(Vec<String>, Vec<Arn>)>,
    /// Every upload, as `(bucket, key)`, including repeats.
    pub uploads: Vec<(String, String)>,
    pub deploys: Vec<StackPayload>,
    pub force_updates: usize,
    pub last_updated_lookups: usize,
    pub endpoint_lookups: usize,
    pub builds: Vec<BuildArgs>,
    pub redirect_checks: Vec<String>,
}

pub struct MockPlatform {
    pub region: String,
    pub env_version: String,
    pub endpoint: String,
    pub public_cidr_blocks: Vec<String>,
    pub topics: Vec<Arn>,
    pub services: Vec<String>,
    /// Aliases the certificate validator refuses.
    pub rejected_aliases: Vec<String>,
    pub deploy: DeployBehavior,
    pub force_update: ForceUpdateBehavior,
    pub last_updated_at: DateTime<Utc>,
    /// Deployed templates keyed by stack name.
    pub templates: BTreeMap<String, String>,
    pub image_digest: String,
    /// Services whose plain HTTP listener redirects to HTTPS.
    pub redirecting: Vec<String>,
    /// Services whose redirect check fails.
    pub unreachable: Vec<String>,
    /// Packaged add-on template, if the workload has add-ons.
    pub addons: Option<String>,
    /// Lookups that answer with an error.
    pub failing: Vec<Lookup>,
    /// Stored objects keyed by `(bucket, key)`.
    pub objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    pub calls: Mutex<MockCalls>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            region: "us-west-2".to_owned(),
            env_version: "v1.5.0".to_owned(),
            endpoint: "test.shop.local".to_owned(),
            public_cidr_blocks: Vec::new(),
            topics: Vec::new(),
            services: Vec::new(),
            rejected_aliases: Vec::new(),
            deploy: DeployBehavior::Applied,
            force_update: ForceUpdateBehavior::Succeed,
            last_updated_at: DateTime::<Utc>::UNIX_EPOCH,
            templates: BTreeMap::new(),
            image_digest: "sha256:0000000000000000000000000000000000000000000000000000000000000000"
                .to_owned(),
            redirecting: Vec::new(),
            unreachable: Vec::new(),
            addons: None,
            failing: Vec::new(),
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(MockCalls::default()),
        }
    }
}

impl MockPlatform {
    pub fn calls(&self) -> MockCalls {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Distinct objects currently stored.
    pub fn object_count(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|o| o.get(&(bucket.to_owned(), key.to_owned())).cloned())
    }

    fn lookup<T>(&self, lookup: Lookup, value: impl FnOnce() -> T) -> Result<T, RemoteError> {
        if self.failing.contains(&lookup) {
            return Err(RemoteError::Http(format!("{lookup:?} lookup failed")));
        }
        Ok(value())
    }

    fn record(&self, f: impl FnOnce(&mut MockCalls)) {
        if let Ok(mut calls) = self.calls.lock() {
            f(&mut calls);
        }
    }
}

impl VersionGetter for MockPlatform {
    fn version(&self) -> Result<String, RemoteError> {
        self.lookup(Lookup::EnvVersion, || self.env_version.clone())
    }
}

impl EndpointGetter for MockPlatform {
    fn service_discovery_endpoint(&self) -> Result<String, RemoteError> {
        self.record(|c| c.endpoint_lookups += 1);
        self.lookup(Lookup::Endpoint, || self.endpoint.clone())
    }
}

impl EnvironmentDescriber for MockPlatform {
    fn public_cidr_blocks(&self) -> Result<Vec<String>, RemoteError> {
        self.lookup(Lookup::PublicCidrBlocks, || self.public_cidr_blocks.clone())
    }

    fn topic_arns(&self) -> Result<Vec<Arn>, RemoteError> {
        self.lookup(Lookup::Topics, || self.topics.clone())
    }

    fn services(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.services.clone())
    }
}

impl CertificateValidator for MockPlatform {
    fn validate_cert_aliases(
        &self,
        aliases: &[String],
        certificates: &[Arn],
    ) -> Result<(), RemoteError> {
        self.record(|c| {
            c.cert_validations
                .push((aliases.to_vec(), certificates.to_vec()));
        });
        match aliases.iter().find(|a| self.rejected_aliases.contains(a)) {
            Some(alias) => Err(RemoteError::Rejected(format!(
                "{alias} is not a valid domain against any of the imported certificates"
            ))),
            None => Ok(()),
        }
    }
}

impl DeployEngine for MockPlatform {
    fn deploy_service(
        &self,
        stack: &StackPayload,
        _bucket: &str,
        _options: &DeployOptions,
    ) -> Result<DeployResult, RemoteError> {
        self.record(|c| c.deploys.push(stack.clone()));
        match &self.deploy {
            DeployBehavior::Applied => Ok(DeployResult::Applied),
            DeployBehavior::NoChanges => Ok(DeployResult::NoChanges),
            DeployBehavior::Fail(msg) => Err(RemoteError::Http(msg.clone())),
        }
    }
}

impl ServiceUpdater for MockPlatform {
    fn force_update_service(&self, id: &WorkloadIdentity) -> Result<(), RemoteError> {
        self.record(|c| c.force_updates += 1);
        match &self.force_update {
            ForceUpdateBehavior::Succeed => Ok(()),
            ForceUpdateBehavior::Timeout => Err(RemoteError::Timeout(format!(
                "service {} did not stabilize",
                id.name
            ))),
            ForceUpdateBehavior::Fail(msg) => Err(RemoteError::Http(msg.clone())),
        }
    }

    fn last_updated_at(&self, _id: &WorkloadIdentity) -> Result<DateTime<Utc>, RemoteError> {
        self.record(|c| c.last_updated_lookups += 1);
        Ok(self.last_updated_at)
    }
}

impl TemplateGetter for MockPlatform {
    fn template(&self, stack: &StackName) -> Result<Option<String>, RemoteError> {
        Ok(self.templates.get(stack.as_str()).cloned())
    }
}

impl ImageBuilder for MockPlatform {
    fn build_and_push(&self, args: &BuildArgs) -> Result<String, RemoteError> {
        self.record(|c| c.builds.push(args.clone()));
        Ok(self.image_digest.clone())
    }
}

impl RedirectChecker for MockPlatform {
    fn redirects_http(&self, service: &str) -> Result<bool, RemoteError> {
        self.record(|c| c.redirect_checks.push(service.to_owned()));
        if self.unreachable.iter().any(|s| s == service) {
            return Err(RemoteError::Http(format!("cannot reach service {service}")));
        }
        Ok(self.redirecting.iter().any(|s| s == service))
    }
}

impl ObjectUploader for MockPlatform {
    fn upload(&self, bucket: &str, key: &str, data: &[u8]) -> Result<String, StoreError> {
        self.record(|c| c.uploads.push((bucket.to_owned(), key.to_owned())));
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StoreError::Upload("object map poisoned".to_owned()))?;
        objects.insert((bucket.to_owned(), key.to_owned()), data.to_vec());
        Ok(format!(
            "https://{bucket}.s3.{}.amazonaws.com/{key}",
            self.region
        ))
    }
}

impl AddonPackager for MockPlatform {
    fn package(&self, _workload: &str) -> Result<Option<String>, CoreError> {
        Ok(self.addons.clone())
    }
}

impl CustomResourceSource for MockPlatform {
    fn bundle(&self, name: &str) -> Result<Vec<u8>, CoreError> {
        Ok(format!("bundle:{name}").into_bytes())
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_uploads_leave_one_object() {
        let platform = MockPlatform::default();
        platform.upload("artifacts", "k", b"same").unwrap();
        platform.upload("artifacts", "k", b"same").unwrap();
        assert_eq!(platform.object_count(), 1);
        assert_eq!(platform.calls().uploads.len(), 2);
    }

    #[test]
    fn upload_url_is_virtual_hosted() {
        let platform = MockPlatform::default();
        let url = platform.upload("artifacts", "a/b", b"x").unwrap();
        assert_eq!(url, "https://artifacts.s3.us-west-2.amazonaws.com/a/b");
    }

    #[test]
    fn redirect_check_reports_configured_services() {
        let platform = MockPlatform {
            redirecting: vec!["web".to_owned()],
            unreachable: vec!["down".to_owned()],
            ..Default::default()
        };
        assert!(platform.redirects_http("web").unwrap());
        assert!(!platform.redirects_http("api").unwrap());
        assert!(platform.redirects_http("down").is_err());
    }

    #[test]
    fn failing_lookups_error_out() {
        let platform = MockPlatform {
            failing: vec![Lookup::Topics],
            ..Default::default()
        };
        assert!(platform.topic_arns().is_err());
        assert!(platform.public_cidr_blocks().is_ok());
        assert_eq!(platform.version().unwrap(), "v1.5.0");
    }
}
