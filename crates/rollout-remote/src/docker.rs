use crate::{BuildArgs, ImageBuilder, RemoteError};
use std::process::{Command, Stdio};

/// Builds and pushes images with a local container CLI (`docker` or `podman`).
pub struct DockerImageBuilder {
    program: String,
}

impl DockerImageBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
        }
    }

    /// Search `PATH` for a usable container CLI.
    pub fn detect() -> Option<Self> {
        for candidate in &["docker", "podman"] {
            if let Ok(output) = Command::new(candidate).arg("--version").output() {
                if output.status.success() {
                    return Some(Self::new(candidate));
                }
            }
        }
        None
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn run(&self, args: &[String]) -> Result<String, RemoteError> {
        tracing::debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RemoteError::Command(format!("{} failed to start: {e}", self.program)))?;
        if !output.status.success() {
            return Err(RemoteError::Command(format!(
                "{} {} exited with code {}: {}",
                self.program,
                args.first().map_or("", String::as_str),
                output.status.code().unwrap_or(1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

/// Arguments of the `build` invocation for `args`.
pub(crate) fn build_command(args: &BuildArgs) -> Vec<String> {
    let mut cmd = vec!["build".to_owned(), "-f".to_owned(), args.dockerfile.clone()];
    for tag in &args.tags {
        cmd.push("-t".to_owned());
        cmd.push(format!("{}:{tag}", args.repository));
    }
    for (key, value) in &args.args {
        cmd.push("--build-arg".to_owned());
        cmd.push(format!("{key}={value}"));
    }
    cmd.push(args.context.clone());
    cmd
}

/// Extract `sha256:...` from a `repo@sha256:...` reference.
pub(crate) fn parse_digest(repo_digest: &str) -> Option<&str> {
    repo_digest
        .rsplit_once('@')
        .map(|(_, digest)| digest)
        .filter(|d| d.starts_with("sha256:"))
}

impl ImageBuilder for DockerImageBuilder {
    fn build_and_push(&self, args: &BuildArgs) -> Result<String, RemoteError> {
        let first_tag = args.tags.first().ok_or_else(|| {
            RemoteError::Command(format!("no tags given for container {}", args.container))
        })?;

        self.run(&build_command(args))?;
        for tag in &args.tags {
            self.run(&["push".to_owned(), format!("{}:{tag}", args.repository)])?;
        }

        let reference = self.run(&[
            "inspect".to_owned(),
            "--format".to_owned(),
            "{{index .RepoDigests 0}}".to_owned(),
            format!("{}:{first_tag}", args.repository),
        ])?;
        parse_digest(&reference).map(str::to_owned).ok_or_else(|| {
            RemoteError::Command(format!(
                "cannot read pushed digest for container {} from '{reference}'",
                args.container
            ))
        })
    }
}
