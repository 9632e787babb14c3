pub mod check_cdn;
pub mod deploy;
pub mod diff;
pub mod validate;

use indicatif::{ProgressBar, ProgressStyle};
use rollout_core::{
    Collaborators, CoreError, DeployState, Deployer, JsonTemplateRenderer, SystemClock, Workspace,
};
use rollout_remote::{DockerImageBuilder, HttpBackend, RemoteConfig};
use rollout_schema::{parse_manifest_file, AppCapabilities, EnvironmentCapabilities, WorkloadManifest};
use rollout_store::ObjectUploader;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_VALIDATION_ERROR: u8 = 3;

/// The workload a command acts on.
pub struct Target<'a> {
    pub manifest: &'a Path,
    pub app: &'a str,
    pub env: &'a str,
    pub remote: Option<&'a str>,
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_state(state: DeployState) -> String {
    use console::Style;
    let text = state.to_string();
    match state {
        DeployState::Deployed => Style::new().green().apply_to(text).to_string(),
        DeployState::Forced => Style::new().cyan().bold().apply_to(text).to_string(),
        DeployState::NoOpDeployed | DeployState::ForceUpdating => {
            Style::new().yellow().apply_to(text).to_string()
        }
        DeployState::Failed => Style::new().red().apply_to(text).to_string(),
        DeployState::NotStarted => text,
    }
}

pub fn load_manifest(path: &Path) -> Result<WorkloadManifest, String> {
    parse_manifest_file(path).map_err(|e| format!("manifest error: {e}"))
}

/// The manifest's directory; relative paths in the manifest resolve against it.
pub fn workspace_for(manifest: &Path) -> Workspace {
    let root = manifest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    Workspace::new(root)
}

pub fn default_bucket(app: &str, env: &str) -> String {
    format!("{app}-{env}-artifacts")
}

pub fn parse_resource_tags(raw: &[String]) -> Result<BTreeMap<String, String>, String> {
    raw.iter()
        .map(|entry| match entry.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_owned(), v.trim().to_owned())),
            _ => Err(format!("invalid resource tag '{entry}': expected KEY=VALUE")),
        })
        .collect()
}

pub fn make_remote_backend(
    remote_url: Option<&str>,
    app: &str,
    env: &str,
) -> Result<HttpBackend, String> {
    let config =
        RemoteConfig::resolve(remote_url).map_err(|e| format!("no --remote and no config: {e}"))?;
    tracing::debug!("control plane {} for {app}/{env}", config.url);
    Ok(HttpBackend::new(config, app, env))
}

fn innermost(err: &CoreError) -> &CoreError {
    match err {
        CoreError::Rule { source, .. } => innermost(source),
        other => other,
    }
}

/// Error text for the terminal: validation failures are marked so they get
/// their own exit code, and any recommended action is appended.
pub fn describe_error(err: &CoreError) -> String {
    let mut msg = match innermost(err) {
        CoreError::Manifest(_) => err.to_string(),
        CoreError::Compatibility(_)
        | CoreError::AppOutOfDate { .. }
        | CoreError::TopicNotFound { .. }
        | CoreError::CdnRedirect { .. } => format!("validation failed: {err}"),
        _ => err.to_string(),
    };
    if let Some(action) = err.recommended_action() {
        msg.push_str("\n\nRecommended follow-up action:\n  - ");
        msg.push_str(&action);
    }
    msg
}

/// Everything one command needs to build a [`Deployer`].
pub struct Session {
    pub manifest: WorkloadManifest,
    pub workspace: Workspace,
    pub backend: HttpBackend,
    pub app: AppCapabilities,
    pub env: EnvironmentCapabilities,
    pub images: DockerImageBuilder,
}

impl Session {
    pub fn open(target: &Target<'_>) -> Result<Self, String> {
        let manifest = load_manifest(target.manifest)?;
        let backend = make_remote_backend(target.remote, target.app, target.env)?;

        let pb = spinner("fetching application and environment…");
        let caps = backend
            .app_capabilities()
            .and_then(|app| Ok((app, backend.environment_capabilities()?)));
        let (app, env) = caps.map_err(|e| {
            spin_fail(&pb, "could not describe application or environment");
            e.to_string()
        })?;
        spin_ok(&pb, &format!("application {} / environment {}", app.name, env.name));

        Ok(Self {
            manifest,
            workspace: workspace_for(target.manifest),
            backend,
            app,
            env,
            images: DockerImageBuilder::detect().unwrap_or_else(|| DockerImageBuilder::new("docker")),
        })
    }

    pub fn deployer<'a>(&'a self, bucket: &'a str, uploader: &'a dyn ObjectUploader) -> Deployer<'a> {
        Deployer::new(
            &self.app,
            &self.env,
            bucket,
            &self.manifest,
            &self.workspace,
            Collaborators {
                app_version: &self.app,
                env_version: &self.backend,
                endpoint: &self.backend,
                environment: &self.backend,
                certs: &self.backend,
                engine: &self.backend,
                updater: &self.backend,
                templates: &self.backend,
                uploader,
                images: &self.images,
                addons: &self.workspace,
                custom_resources: &self.workspace,
                renderer: &JsonTemplateRenderer,
                clock: &SystemClock,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
    }

    #[test]
    fn colorize_state_keeps_text() {
        for state in [
            DeployState::Deployed,
            DeployState::Forced,
            DeployState::Failed,
            DeployState::NoOpDeployed,
        ] {
            assert!(colorize_state(state).contains(&state.to_string()));
        }
        assert_eq!(colorize_state(DeployState::NotStarted), "not-started");
    }

    #[test]
    fn resource_tags_parse() {
        let tags =
            parse_resource_tags(&["team=payments".to_owned(), "cost = 12".to_owned()]).unwrap();
        assert_eq!(tags["team"], "payments");
        assert_eq!(tags["cost"], "12");
    }

    #[test]
    fn resource_tags_reject_missing_key() {
        let err = parse_resource_tags(&["=x".to_owned()]).unwrap_err();
        assert!(err.contains("expected KEY=VALUE"));
        assert!(parse_resource_tags(&["novalue".to_owned()]).is_err());
    }

    #[test]
    fn workspace_defaults_to_current_dir() {
        assert_eq!(workspace_for(Path::new("rollout.toml")).root(), Path::new("."));
        assert_eq!(
            workspace_for(Path::new("svc/api/rollout.toml")).root(),
            Path::new("svc/api")
        );
    }

    #[test]
    fn validation_errors_are_marked() {
        let err = CoreError::Compatibility("boom".to_owned()).in_rule("validate 'alias'");
        assert_eq!(describe_error(&err), "validation failed: validate 'alias': boom");
    }

    #[test]
    fn recommended_action_is_appended() {
        let err = CoreError::ChangeSetEmpty {
            service: "api".to_owned(),
            env: "test".to_owned(),
            stack: "shop-test-api".to_owned(),
        };
        let msg = describe_error(&err);
        assert!(msg.contains("Recommended follow-up action"));
        assert!(msg.contains("--force"));
    }

    #[test]
    fn make_remote_backend_with_url() {
        let backend = make_remote_backend(Some("http://localhost:8080"), "shop", "test").unwrap();
        assert_eq!(backend.app(), "shop");
        assert_eq!(backend.env(), "test");
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_MANIFEST_ERROR);
        assert_ne!(EXIT_MANIFEST_ERROR, EXIT_VALIDATION_ERROR);
    }
}
