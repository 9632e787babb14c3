//! Read-only snapshots of the target environment and application, fetched once
//! per deploy.

use crate::types::Arn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentCapabilities {
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub account_id: String,
    /// Certificates imported for the public load balancer.
    #[serde(default)]
    pub public_alb_certificates: Vec<Arn>,
    #[serde(default)]
    pub cdn: Option<CdnConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CdnConfig {
    /// Certificate imported for the CDN distribution.
    #[serde(default)]
    pub certificate: Option<Arn>,
    /// The distribution terminates TLS and talks plain HTTP to the load balancer.
    #[serde(default)]
    pub terminate_tls: bool,
}

impl EnvironmentCapabilities {
    pub fn has_imported_alb_certs(&self) -> bool {
        !self.public_alb_certificates.is_empty()
    }

    pub fn cdn_certificate(&self) -> Option<&Arn> {
        self.cdn.as_ref().and_then(|c| c.certificate.as_ref())
    }

    /// True if either the load balancer or the CDN has imported certificates.
    pub fn has_imported_certs(&self) -> bool {
        self.has_imported_alb_certs() || self.cdn_certificate().is_some()
    }

    pub fn cdn_enabled(&self) -> bool {
        self.cdn.is_some()
    }

    pub fn cdn_terminates_tls(&self) -> bool {
        self.cdn.as_ref().is_some_and(|c| c.terminate_tls)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppCapabilities {
    pub name: String,
    /// Custom domain owned by the application, if any.
    #[serde(default)]
    pub domain: Option<String>,
    /// Version of the application's own template, e.g. `v1.2.0`.
    pub template_version: String,
    #[serde(default)]
    pub permissions_boundary: Option<String>,
    /// Principal allowed to manage the delegated hosted zones.
    #[serde(default)]
    pub account_principal_arn: Option<Arn>,
}

impl AppCapabilities {
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref().filter(|d| !d.is_empty())
    }
}
