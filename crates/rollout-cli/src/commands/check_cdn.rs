use super::{
    describe_error, json_pretty, make_remote_backend, spin_fail, spin_ok, spinner, EXIT_SUCCESS,
};
use rollout_core::check_cdn_redirects;

pub fn run(app: &str, env: &str, remote: Option<&str>, json: bool) -> Result<u8, String> {
    let backend = make_remote_backend(remote, app, env)?;
    let caps = backend
        .environment_capabilities()
        .map_err(|e| e.to_string())?;

    let pb = spinner("checking services for HTTP to HTTPS redirects…");
    check_cdn_redirects(&caps, &backend, &backend).map_err(|e| {
        spin_fail(&pb, "redirect check failed");
        describe_error(&e)
    })?;
    spin_ok(&pb, "no service redirects HTTP traffic");

    if json {
        let payload = serde_json::json!({
            "env": env,
            "cdn_terminates_tls": caps.cdn_terminates_tls(),
            "redirecting_services": Vec::<String>::new(),
        });
        println!("{}", json_pretty(&payload)?);
    } else if caps.cdn_terminates_tls() {
        println!("environment {env}: safe to terminate TLS at the CDN");
    } else {
        println!("environment {env}: CDN does not terminate TLS, nothing to check");
    }
    Ok(EXIT_SUCCESS)
}
