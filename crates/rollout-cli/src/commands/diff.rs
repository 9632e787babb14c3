use super::{
    default_bucket, describe_error, json_pretty, parse_resource_tags, Session, Target,
    EXIT_SUCCESS,
};
use console::Style;
use rollout_core::UploadArtifactsOutput;

pub fn run(target: &Target<'_>, resource_tags: &[String], json: bool) -> Result<u8, String> {
    let tags = parse_resource_tags(resource_tags)?;
    let session = Session::open(target)?;
    let bucket = default_bucket(target.app, target.env);
    let deployer = session.deployer(&bucket, &session.backend);

    // Nothing is uploaded for a diff; image and artifact references render
    // as their manifest values.
    let diff = deployer
        .deploy_diff(&UploadArtifactsOutput::default(), &tags)
        .map_err(|e| describe_error(&e))?;
    let stack = deployer.identity().stack_name();

    if json {
        let payload = serde_json::json!({
            "stack": stack,
            "changes": diff.changes(),
        });
        println!("{}", json_pretty(&payload)?);
    } else if diff.is_empty() {
        println!("no changes to stack {stack}");
    } else {
        println!("changes to stack {stack}:");
        for line in diff.render().lines() {
            let style = match line.chars().next() {
                Some('+') => Style::new().green(),
                Some('-') => Style::new().red(),
                _ => Style::new().yellow(),
            };
            println!("  {}", style.apply_to(line));
        }
        let (added, removed, modified) = diff.summary();
        println!("\n{added} added, {removed} removed, {modified} modified");
    }
    Ok(EXIT_SUCCESS)
}
