use crate::RemoteError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides the control-plane URL when `--remote` is not given.
pub const URL_ENV: &str = "ROLLOUT_REMOTE_URL";
/// Overrides any stored bearer token.
pub const TOKEN_ENV: &str = "ROLLOUT_TOKEN";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where the control plane lives and how to talk to it.
///
/// Stored as JSON under `~/.config/rollout/remote.json`:
///
/// ```json
/// { "url": "https://deploy.example.com/v1", "auth_token": "...", "timeout_secs": 60 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Whole-request timeout. Deploy calls block until the engine settles, so
    /// long-running stacks may need more than the default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl RemoteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token: None,
            timeout_secs: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Pick the control plane for one command: an explicit URL, then
    /// `ROLLOUT_REMOTE_URL`, then the config file. `ROLLOUT_TOKEN` replaces
    /// whatever token the chosen source carried.
    pub fn resolve(explicit: Option<&str>) -> Result<Self, RemoteError> {
        let url = explicit.map(str::to_owned).or_else(|| non_empty_var(URL_ENV));
        let config = match url {
            Some(url) => Self::new(&url),
            None => Self::load_default()?,
        };
        Ok(config.with_token_override(non_empty_var(TOKEN_ENV)))
    }

    #[must_use]
    fn with_token_override(self, token: Option<String>) -> Self {
        match token {
            Some(token) => Self {
                auth_token: Some(token),
                ..self
            },
            None => self,
        }
    }

    pub fn load_default() -> Result<Self, RemoteError> {
        Self::load(&default_config_path()?)
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RemoteError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: RemoteConfig = serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid {}: {e}", path.display())))?;
        if config.url.is_empty() {
            return Err(RemoteError::Config(format!(
                "{} does not name a control-plane url",
                path.display()
            )));
        }
        Ok(Self {
            url: config.url.trim_end_matches('/').to_owned(),
            ..config
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

pub fn default_config_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/rollout/remote.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");
        std::fs::write(
            &path,
            r#"{"url": "http://localhost:9000/", "auth_token": "t0k", "timeout_secs": 90}"#,
        )
        .unwrap();

        let config = RemoteConfig::load(&path).unwrap();
        assert_eq!(config.url, "http://localhost:9000");
        assert_eq!(config.auth_token.as_deref(), Some("t0k"));
        assert_eq!(config.timeout(), Duration::from_secs(90));
    }

    #[test]
    fn timeout_defaults_when_unset() {
        assert_eq!(
            RemoteConfig::new("https://deploy.example.com/").timeout(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        );
    }

    #[test]
    fn token_override_replaces_stored_token() {
        let config = RemoteConfig::new("https://deploy.example.com").with_token("stored");
        let kept = config.clone().with_token_override(None);
        assert_eq!(kept.auth_token.as_deref(), Some("stored"));
        let replaced = config.with_token_override(Some("from-env".to_owned()));
        assert_eq!(replaced.auth_token.as_deref(), Some("from-env"));
    }

    #[test]
    fn missing_and_malformed_files_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(
            RemoteConfig::load(&missing),
            Err(RemoteError::Config(_))
        ));

        let bad = dir.path().join("remote.json");
        std::fs::write(&bad, r#"{"url": ""}"#).unwrap();
        let err = RemoteConfig::load(&bad).unwrap_err();
        assert!(err.to_string().contains("does not name a control-plane url"));

        std::fs::write(&bad, r#"{"url": "http://x", "region": "eu"}"#).unwrap();
        assert!(matches!(RemoteConfig::load(&bad), Err(RemoteError::Config(_))));
    }
}
