//! Application template version gates.

use crate::CoreError;
use rollout_remote::VersionGetter;
use semver::Version;
use std::cmp::Ordering;

/// Oldest application template that manages alias records.
pub const ALIAS_MIN_APP_VERSION: &str = "v1.0.0";
/// Oldest application template that can host static sites.
pub const STATIC_SITE_MIN_APP_VERSION: &str = "v1.2.0";

/// Parse `v1.2.3` or `1.2.3`.
pub fn parse_version(raw: &str) -> Result<Version, CoreError> {
    let trimmed = raw.trim();
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(bare).map_err(|_| CoreError::InvalidVersion(raw.to_owned()))
}

pub fn compare_versions(a: &str, b: &str) -> Result<Ordering, CoreError> {
    Ok(parse_version(a)?.cmp(&parse_version(b)?))
}

/// Fail with [`CoreError::AppOutOfDate`] when the application template is
/// older than `min`.
pub fn require_app_version(
    getter: &dyn VersionGetter,
    app: &str,
    service: &str,
    min: &str,
) -> Result<(), CoreError> {
    let current = getter.version()?;
    if compare_versions(&current, min)? == Ordering::Less {
        return Err(CoreError::AppOutOfDate {
            service: service.to_owned(),
            app: app.to_owned(),
            current,
            needed: min.to_owned(),
        });
    }
    Ok(())
}
