//! Content-derived object keys.
//!
//! Every key embeds the blake3 digest of the bytes stored under it, so
//! uploading identical content twice lands on the same key.

use std::path::Path;

pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Key for an environment file, `manual/env-files/<hash>/<file name>`.
pub fn env_file(path: &str, content: &[u8]) -> String {
    let file_name = Path::new(path)
        .file_name()
        .map_or_else(|| path.to_owned(), |n| n.to_string_lossy().into_owned());
    format!("manual/env-files/{}/{file_name}", content_hash(content))
}

/// Key for a workload's packaged add-on template.
pub fn addons_template(workload: &str, content: &[u8]) -> String {
    format!("manual/addons/{workload}/{}.yml", content_hash(content))
}

/// Key for a custom-resource function bundle.
pub fn custom_resource(name: &str, content: &[u8]) -> String {
    format!(
        "manual/scripts/custom-resources/{}/{}.zip",
        name.to_ascii_lowercase(),
        content_hash(content)
    )
}

/// Key for one static-site file.
pub fn static_asset(content: &[u8]) -> String {
    format!("local-assets/{}", content_hash(content))
}

/// Key for the static-site asset mapping document.
pub fn asset_mapping(workload: &str, content: &[u8]) -> String {
    format!(
        "local-assets/environment/{workload}/{}.json",
        content_hash(content)
    )
}
