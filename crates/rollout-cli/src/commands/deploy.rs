use super::{
    colorize_state, default_bucket, describe_error, json_pretty, parse_resource_tags, spin_fail,
    spin_ok, spinner, Session, Target, EXIT_SUCCESS,
};
use rollout_core::{DeployInput, ImageTags};
use rollout_schema::DeployOptions;
use rollout_store::{LocalBucket, ObjectUploader};
use std::path::PathBuf;

pub struct DeployArgs {
    pub force: bool,
    pub disable_rollback: bool,
    pub detach: bool,
    pub tag: Option<String>,
    pub commit: Option<String>,
    pub resource_tags: Vec<String>,
    pub bucket: Option<String>,
    pub local_bucket: Option<PathBuf>,
}

pub fn run(target: &Target<'_>, args: &DeployArgs, json: bool) -> Result<u8, String> {
    let resource_tags = parse_resource_tags(&args.resource_tags)?;
    let session = Session::open(target)?;
    let bucket = args
        .bucket
        .clone()
        .unwrap_or_else(|| default_bucket(target.app, target.env));

    let local = args
        .local_bucket
        .as_deref()
        .map(LocalBucket::open)
        .transpose()
        .map_err(|e| format!("local bucket: {e}"))?;
    let uploader: &dyn ObjectUploader = match &local {
        Some(local) => local,
        None => &session.backend,
    };

    let deployer = session.deployer(&bucket, uploader);
    let input = DeployInput {
        image_tags: ImageTags {
            tag: args.tag.clone(),
            commit: args.commit.clone(),
        },
        resource_tags,
        options: DeployOptions {
            force_new_update: args.force,
            disable_rollback: args.disable_rollback,
            detach: args.detach,
        },
    };

    let id = deployer.identity().clone();
    let pb = spinner(&format!("deploying {id}…"));
    let report = deployer.deploy(&input).map_err(|e| {
        spin_fail(&pb, "deploy failed");
        describe_error(&e)
    })?;
    spin_ok(&pb, &format!("deployed {id}"));

    if json {
        let payload = serde_json::json!({
            "app": id.app,
            "env": id.env,
            "service": id.name,
            "stack": id.stack_name(),
            "states": report.states.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "recommended_actions": report.recommended_actions,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "stack {}: {}",
            id.stack_name(),
            colorize_state(report.final_state())
        );
        if !report.recommended_actions.is_empty() {
            println!("\nRecommended follow-up actions:");
            for action in &report.recommended_actions {
                println!("  - {action}");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
