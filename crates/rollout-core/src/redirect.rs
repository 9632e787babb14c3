//! Environment-level check that no service redirects HTTP to HTTPS while a
//! CDN terminates TLS in front of it; such a service would redirect forever.

use crate::CoreError;
use rollout_remote::{EnvironmentDescriber, RedirectChecker};
use rollout_schema::EnvironmentCapabilities;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Check every service concurrently and return the redirecting ones, sorted.
///
/// One worker per service. The first failed check stops outstanding checks and
/// is returned; no partial list is reported in that case.
pub fn find_redirecting_services(
    checker: &dyn RedirectChecker,
    services: &[String],
) -> Result<Vec<String>, CoreError> {
    if services.is_empty() {
        return Ok(Vec::new());
    }

    let next = AtomicUsize::new(0);
    let cancelled = AtomicBool::new(false);
    let bad: Mutex<Vec<String>> = Mutex::new(Vec::new());
    let first_err: Mutex<Option<CoreError>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for _ in 0..services.len() {
            scope.spawn(|| loop {
                if cancelled.load(Ordering::Relaxed) {
                    return;
                }
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(service) = services.get(idx) else {
                    return;
                };
                match checker.redirects_http(service) {
                    Ok(true) => {
                        debug!("service {service} redirects HTTP to HTTPS");
                        if let Ok(mut guard) = bad.lock() {
                            guard.push(service.clone());
                        }
                    }
                    Ok(false) => {}
                    Err(err) => {
                        cancelled.store(true, Ordering::Relaxed);
                        if let Ok(mut guard) = first_err.lock() {
                            if guard.is_none() {
                                *guard = Some(CoreError::from(err).in_rule(format!(
                                    "check if service {service} redirects HTTP traffic"
                                )));
                            }
                        }
                        return;
                    }
                }
            });
        }
    });

    if let Some(err) = first_err.into_inner().unwrap_or_else(|e| e.into_inner()) {
        return Err(err);
    }
    let mut bad = bad.into_inner().unwrap_or_else(|e| e.into_inner());
    bad.sort();
    Ok(bad)
}

/// Fail when the environment's CDN terminates TLS and any deployed service
/// still redirects HTTP to HTTPS.
pub fn check_cdn_redirects(
    env: &EnvironmentCapabilities,
    environment: &dyn EnvironmentDescriber,
    checker: &dyn RedirectChecker,
) -> Result<(), CoreError> {
    if !env.cdn_terminates_tls() {
        debug!("CDN does not terminate TLS in environment {}", env.name);
        return Ok(());
    }
    let services = environment.services()?;
    info!(
        "checking {} services in environment {} for HTTP redirects",
        services.len(),
        env.name
    );
    let services = find_redirecting_services(checker, &services)?;
    if services.is_empty() {
        Ok(())
    } else {
        Err(CoreError::CdnRedirect { services })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlatform;
    use rollout_schema::{Arn, CdnConfig};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    fn cdn_env(terminate_tls: bool) -> EnvironmentCapabilities {
        EnvironmentCapabilities {
            name: "prod".to_owned(),
            cdn: Some(CdnConfig {
                certificate: Some(Arn::new("arn:aws:acm:us-east-1:1:certificate/cdn")),
                terminate_tls,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn redirecting_services_are_sorted() {
        let platform = MockPlatform {
            redirecting: names(&["web", "api"]),
            ..Default::default()
        };
        let bad = find_redirecting_services(&platform, &names(&["web", "worker", "api"])).unwrap();
        assert_eq!(bad, vec!["api", "web"]);
        assert_eq!(platform.calls().redirect_checks.len(), 3);
    }

    #[test]
    fn no_services_checks_nothing() {
        let platform = MockPlatform::default();
        assert!(find_redirecting_services(&platform, &[]).unwrap().is_empty());
        assert!(platform.calls().redirect_checks.is_empty());
    }

    #[test]
    fn failed_check_wins() {
        let platform = MockPlatform {
            redirecting: names(&["web"]),
            unreachable: names(&["api"]),
            ..Default::default()
        };
        let err = find_redirecting_services(&platform, &names(&["web", "api"])).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("check if service api redirects HTTP traffic"));
    }

    #[test]
    fn check_passes_without_tls_termination() {
        let platform = MockPlatform {
            services: names(&["web"]),
            redirecting: names(&["web"]),
            ..Default::default()
        };
        check_cdn_redirects(&cdn_env(false), &platform, &platform).unwrap();
        assert!(platform.calls().redirect_checks.is_empty());
    }

    #[test]
    fn check_reports_redirecting_services() {
        let platform = MockPlatform {
            services: names(&["web", "api", "worker"]),
            redirecting: names(&["web", "api"]),
            ..Default::default()
        };
        let err = check_cdn_redirects(&cdn_env(true), &platform, &platform).unwrap_err();
        match &err {
            CoreError::CdnRedirect { services } => assert_eq!(services, &names(&["api", "web"])),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.recommended_action().is_some());
    }
}
