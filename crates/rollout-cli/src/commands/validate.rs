use super::{
    default_bucket, describe_error, json_pretty, load_manifest, Session, Target, EXIT_SUCCESS,
};
use std::path::Path;

pub fn run(
    manifest_path: &Path,
    app: Option<&str>,
    env: Option<&str>,
    offline: bool,
    remote: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let manifest = load_manifest(manifest_path)?;

    if offline {
        if json {
            let payload = serde_json::json!({
                "name": manifest.name,
                "kind": manifest.kind(),
                "valid": true,
            });
            println!("{}", json_pretty(&payload)?);
        } else {
            println!("✓ manifest for {} {} parses", manifest.kind(), manifest.name);
        }
        return Ok(EXIT_SUCCESS);
    }

    let (Some(app), Some(env)) = (app, env) else {
        return Err("--app and --env are required unless --offline is set".to_owned());
    };
    let session = Session::open(&Target {
        manifest: manifest_path,
        app,
        env,
        remote,
    })?;
    let bucket = default_bucket(app, env);
    let config = session
        .deployer(&bucket, &session.backend)
        .validate()
        .map_err(|e| describe_error(&e))?;

    if json {
        let payload = serde_json::json!({
            "name": manifest.name,
            "kind": manifest.kind(),
            "valid": true,
            "stack": config.stack_name(),
            "https": config.options.https,
            "subscriptions": config.subscriptions,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "✓ {} {} is valid for application {app} in environment {env}",
            manifest.kind(),
            manifest.name
        );
    }
    Ok(EXIT_SUCCESS)
}
