mod commands;

use clap::{Args, Parser, Subcommand};
use commands::{EXIT_FAILURE, EXIT_MANIFEST_ERROR, EXIT_VALIDATION_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "rollout",
    version,
    about = "Validate, upload and deploy containerized and static workloads"
)]
struct Cli {
    /// Control-plane URL (overrides ~/.config/rollout/remote.json).
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which workload to act on, and where.
#[derive(Debug, Args)]
struct Target {
    /// Path to the workload manifest.
    #[arg(default_value = "rollout.toml")]
    manifest: PathBuf,
    /// Application name.
    #[arg(long)]
    app: String,
    /// Environment name.
    #[arg(long)]
    env: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check a manifest against its application and environment without deploying.
    Validate {
        /// Path to the workload manifest.
        #[arg(default_value = "rollout.toml")]
        manifest: PathBuf,
        /// Application name (required unless --offline).
        #[arg(long)]
        app: Option<String>,
        /// Environment name (required unless --offline).
        #[arg(long)]
        env: Option<String>,
        /// Only parse the manifest; skip every remote check.
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Upload artifacts and deploy a workload.
    Deploy {
        #[command(flatten)]
        target: Target,
        /// Redeploy even when the stack has no infrastructure changes.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Leave a failed deployment in place instead of rolling back.
        #[arg(long, default_value_t = false)]
        disable_rollback: bool,
        /// Return as soon as the deployment has started.
        #[arg(long, default_value_t = false)]
        detach: bool,
        /// Extra tag for locally built images.
        #[arg(long)]
        tag: Option<String>,
        /// Commit id to tag locally built images with.
        #[arg(long)]
        commit: Option<String>,
        /// Resource tag as KEY=VALUE; repeatable.
        #[arg(long = "resource-tag")]
        resource_tags: Vec<String>,
        /// Artifact bucket (defaults to <app>-<env>-artifacts).
        #[arg(long)]
        bucket: Option<String>,
        /// Write artifacts to a local bucket directory instead of the remote.
        #[arg(long)]
        local_bucket: Option<PathBuf>,
    },
    /// Show how the rendered template differs from the deployed one.
    Diff {
        #[command(flatten)]
        target: Target,
        /// Resource tag as KEY=VALUE; repeatable.
        #[arg(long = "resource-tag")]
        resource_tags: Vec<String>,
    },
    /// Fail if a service redirects HTTP to HTTPS behind a TLS-terminating CDN.
    CheckCdnRedirects {
        /// Application name.
        #[arg(long)]
        app: String,
        /// Environment name.
        #[arg(long)]
        env: String,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ROLLOUT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let remote = cli.remote.as_deref();
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Validate {
            manifest,
            app,
            env,
            offline,
        } => commands::validate::run(
            &manifest,
            app.as_deref(),
            env.as_deref(),
            offline,
            remote,
            json_output,
        ),
        Commands::Deploy {
            target,
            force,
            disable_rollback,
            detach,
            tag,
            commit,
            resource_tags,
            bucket,
            local_bucket,
        } => commands::deploy::run(
            &commands::Target {
                manifest: &target.manifest,
                app: &target.app,
                env: &target.env,
                remote,
            },
            &commands::deploy::DeployArgs {
                force,
                disable_rollback,
                detach,
                tag,
                commit,
                resource_tags,
                bucket,
                local_bucket,
            },
            json_output,
        ),
        Commands::Diff {
            target,
            resource_tags,
        } => commands::diff::run(
            &commands::Target {
                manifest: &target.manifest,
                app: &target.app,
                env: &target.env,
                remote,
            },
            &resource_tags,
            json_output,
        ),
        Commands::CheckCdnRedirects { app, env } => {
            commands::check_cdn::run(&app, &env, remote, json_output)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest error:") {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("validation failed:") {
                EXIT_VALIDATION_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
