//! Compatibility validation of a workload's network exposure against its
//! environment's certificates and CDN and its application's domain.
//!
//! Validation runs before anything is uploaded or deployed. Apart from the
//! certificate-alias call and the application version lookup it is pure.

use crate::version::{require_app_version, ALIAS_MIN_APP_VERSION, STATIC_SITE_MIN_APP_VERSION};
use crate::CoreError;
use regex::Regex;
use rollout_remote::{CertificateValidator, VersionGetter};
use rollout_schema::{AppCapabilities, EnvironmentCapabilities, HttpConfig, NlbConfig, RoutingRule};
use tracing::debug;

/// Alias shapes served from the hosted zones rollout manages for an
/// application: `[sub.]env.app.domain`, `[sub.]app.domain` and `[sub.]domain`.
///
/// Names are escaped before interpolation and every pattern is anchored at
/// both ends.
#[derive(Debug, Clone)]
pub struct AliasPatterns {
    env_scoped: Regex,
    app_scoped: Regex,
    root_scoped: Regex,
    env: String,
    app: String,
    domain: String,
}

impl AliasPatterns {
    pub fn new(env: &str, app: &str, domain: &str) -> Result<Self, CoreError> {
        let (e, a, d) = (regex::escape(env), regex::escape(app), regex::escape(domain));
        Ok(Self {
            env_scoped: Regex::new(&format!(r"^([^.]+\.)?{e}\.{a}\.{d}$"))?,
            app_scoped: Regex::new(&format!(r"^([^.]+\.)?{a}\.{d}$"))?,
            root_scoped: Regex::new(&format!(r"^([^.]+\.)?{d}$"))?,
            env: env.to_owned(),
            app: app.to_owned(),
            domain: domain.to_owned(),
        })
    }

    pub fn matches(&self, alias: &str) -> bool {
        self.env_scoped.is_match(alias)
            || self.app_scoped.is_match(alias)
            || self.root_scoped.is_match(alias)
    }

    /// The six accepted forms, most specific first.
    pub fn accepted_forms(&self) -> Vec<String> {
        let (env, app, domain) = (&self.env, &self.app, &self.domain);
        vec![
            format!("<name>.{env}.{app}.{domain}"),
            format!("{env}.{app}.{domain}"),
            format!("<name>.{app}.{domain}"),
            format!("{app}.{domain}"),
            format!("<name>.{domain}"),
            domain.clone(),
        ]
    }

    /// Every alias must match one of the patterns; the first that does not is
    /// reported together with all accepted forms.
    pub fn check(&self, aliases: &[String]) -> Result<(), CoreError> {
        match aliases.iter().find(|a| !self.matches(a)) {
            None => Ok(()),
            Some(alias) => Err(CoreError::Compatibility(format!(
                "alias \"{alias}\" is not supported in hosted zones managed by rollout; \
                 accepted forms are {}",
                self.accepted_forms().join(", ")
            ))),
        }
    }
}

/// `alias` is `zone` itself or a name inside it.
fn is_within(alias: &str, zone: &str) -> bool {
    alias == zone
        || alias
            .strip_suffix(zone)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Validator for one workload against one environment and application.
pub struct CompatibilityValidator<'a> {
    pub workload: &'a str,
    pub app: &'a AppCapabilities,
    pub env: &'a EnvironmentCapabilities,
    pub app_version: &'a dyn VersionGetter,
    pub certs: &'a dyn CertificateValidator,
}

impl CompatibilityValidator<'_> {
    /// Validate the main routing rule and every additional rule, in order.
    /// Failures name the rule they came from.
    pub fn validate_http(&self, http: &HttpConfig) -> Result<(), CoreError> {
        let imported_alb = http.imported_alb.is_some();
        for (label, rule) in http.labeled_rules() {
            debug!("validating routing rule {label} for {}", self.workload);
            self.validate_routing_rule(&rule, imported_alb).map_err(|e| {
                e.in_rule(format!("validate ALB runtime configuration for \"{label}\""))
            })?;
        }
        Ok(())
    }

    pub fn validate_routing_rule(
        &self,
        rule: &RoutingRule,
        imported_alb: bool,
    ) -> Result<(), CoreError> {
        let has_certs = self.env.has_imported_certs();
        let domain = self.app.domain();

        if rule.redirects_to_https() && domain.is_none() && !has_certs {
            return Err(CoreError::Compatibility(format!(
                "cannot configure http to https redirect without having a domain associated \
                 with the app \"{}\" or importing any certificates in env \"{}\"",
                self.app.name, self.env.name
            )));
        }

        if rule.alias.is_empty() {
            if has_certs && !imported_alb {
                return Err(CoreError::Compatibility(format!(
                    "cannot deploy service {} without \"alias\" to environment {} with \
                     certificate imported",
                    self.workload, self.env.name
                )));
            }
            return Ok(());
        }

        let zones = rule.alias.hosted_zones();
        if !zones.is_empty() {
            if !has_certs {
                return Err(CoreError::Compatibility(format!(
                    "cannot specify alias hosted zones [{}] when no certificates are imported \
                     in environment \"{}\"",
                    zones.join(", "),
                    self.env.name
                )));
            }
            if self.env.cdn_enabled() {
                return Err(CoreError::Compatibility(format!(
                    "cannot specify alias hosted zones when cdn is enabled in environment \"{}\"",
                    self.env.name
                )));
            }
        }

        let aliases = rule.alias.names();
        if has_certs {
            return self.validate_against_certificates(&aliases);
        }

        if let Some(domain) = domain {
            require_app_version(
                self.app_version,
                &self.app.name,
                self.workload,
                ALIAS_MIN_APP_VERSION,
            )?;
            return AliasPatterns::new(&self.env.name, &self.app.name, domain)?
                .check(&aliases)
                .map_err(|e| e.in_rule("validate 'alias'"));
        }

        Err(CoreError::Compatibility(format!(
            "cannot specify \"alias\" when application is not associated with a domain and env \
             {} doesn't import one or more certificates",
            self.env.name
        )))
    }

    /// One certificate-alias call per certificate source; both must pass.
    fn validate_against_certificates(&self, aliases: &[String]) -> Result<(), CoreError> {
        if self.env.has_imported_alb_certs() {
            self.certs
                .validate_cert_aliases(aliases, &self.env.public_alb_certificates)
                .map_err(|e| {
                    CoreError::from(e).in_rule(format!(
                        "validate aliases against the imported public ALB certificate for env {}",
                        self.env.name
                    ))
                })?;
        }
        if let Some(cert) = self.env.cdn_certificate() {
            self.certs
                .validate_cert_aliases(aliases, std::slice::from_ref(cert))
                .map_err(|e| {
                    CoreError::from(e).in_rule(format!(
                        "validate aliases against the imported CDN certificate for env {}",
                        self.env.name
                    ))
                })?;
        }
        Ok(())
    }

    pub fn validate_nlb(&self, nlb: &NlbConfig) -> Result<(), CoreError> {
        if nlb.alias.is_empty() {
            return Ok(());
        }
        if self.env.has_imported_alb_certs() {
            return Err(CoreError::Compatibility(format!(
                "cannot specify nlb.alias when env {} imports one or more certificates",
                self.env.name
            )));
        }
        let Some(domain) = self.app.domain() else {
            return Err(CoreError::Compatibility(
                "cannot specify nlb.alias when application is not associated with a domain"
                    .to_owned(),
            ));
        };
        require_app_version(
            self.app_version,
            &self.app.name,
            self.workload,
            ALIAS_MIN_APP_VERSION,
        )?;
        AliasPatterns::new(&self.env.name, &self.app.name, domain)?
            .check(&nlb.alias.names())
            .map_err(|e| e.in_rule("validate 'nlb.alias'"))
    }

    /// Request-driven services only accept `<sub>.<domain>`; environment- and
    /// application-level aliases and the bare root domain are rejected.
    pub fn validate_request_driven_alias(&self, alias: Option<&str>) -> Result<(), CoreError> {
        let Some(alias) = alias.filter(|a| !a.is_empty()) else {
            return Ok(());
        };
        let Some(domain) = self.app.domain() else {
            return Err(CoreError::Compatibility(
                "alias specified when application is not associated with a domain".to_owned(),
            ));
        };
        require_app_version(
            self.app_version,
            &self.app.name,
            self.workload,
            ALIAS_MIN_APP_VERSION,
        )?;

        let app_zone = format!("{}.{domain}", self.app.name);
        let env_zone = format!("{}.{app_zone}", self.env.name);
        if is_within(alias, &env_zone) {
            return Err(CoreError::Compatibility(format!(
                "{alias} is an environment-level alias, which is not supported yet"
            )));
        }
        if is_within(alias, &app_zone) {
            return Err(CoreError::Compatibility(format!(
                "{alias} is an application-level alias, which is not supported yet"
            )));
        }
        if alias == domain {
            return Err(CoreError::Compatibility(format!(
                "{alias} is a root domain alias, which is not supported yet"
            )));
        }

        let subdomain = Regex::new(&format!(r"^[^.]+\.{}$", regex::escape(domain)))?;
        if !subdomain.is_match(alias) {
            return Err(CoreError::Compatibility(format!(
                "alias \"{alias}\" is not supported in hosted zones managed by rollout; \
                 request-driven services accept <name>.{domain}"
            )));
        }
        Ok(())
    }

    pub fn validate_static_site_alias(&self, alias: Option<&str>) -> Result<(), CoreError> {
        let Some(alias) = alias.filter(|a| !a.is_empty()) else {
            return Ok(());
        };
        let Some(domain) = self.app.domain() else {
            return Err(CoreError::Compatibility(
                "cannot specify alias when application is not associated with a domain"
                    .to_owned(),
            ));
        };
        require_app_version(
            self.app_version,
            &self.app.name,
            self.workload,
            STATIC_SITE_MIN_APP_VERSION,
        )?;
        AliasPatterns::new(&self.env.name, &self.app.name, domain)?
            .check(&[alias.to_owned()])
            .map_err(|e| e.in_rule("validate 'http.alias'"))
    }
}
