//! Object URL parsing and ARN formatting.

use crate::StoreError;
use rollout_schema::Arn;

/// Partition a region belongs to. Application and environment always share one.
pub fn partition_for_region(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else if region.starts_with("us-isob-") {
        "aws-iso-b"
    } else if region.starts_with("us-iso-") {
        "aws-iso"
    } else {
        "aws"
    }
}

/// Split an object URL into `(bucket, key)`.
///
/// Accepts `s3://bucket/key`, virtual-hosted
/// `https://bucket.s3[.region].amazonaws.com[.cn]/key`, and path-style
/// `https://s3[.region].amazonaws.com[.cn]/bucket/key`.
pub fn parse_object_url(url: &str) -> Result<(String, String), StoreError> {
    let invalid = || StoreError::InvalidUrl(url.to_owned());

    if let Some(rest) = url.strip_prefix("s3://") {
        let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
        return non_empty_pair(bucket, key).ok_or_else(invalid);
    }

    let rest = url.strip_prefix("https://").ok_or_else(invalid)?;
    let (host, path) = rest.split_once('/').ok_or_else(invalid)?;
    if !(host.ends_with(".amazonaws.com") || host.ends_with(".amazonaws.com.cn")) {
        return Err(invalid());
    }

    if let Some(idx) = host.rfind(".s3.").or_else(|| host.rfind(".s3-")) {
        return non_empty_pair(&host[..idx], path).ok_or_else(invalid);
    }

    let (bucket, key) = path.split_once('/').ok_or_else(invalid)?;
    non_empty_pair(bucket, key).ok_or_else(invalid)
}

fn non_empty_pair(bucket: &str, key: &str) -> Option<(String, String)> {
    if bucket.is_empty() || key.is_empty() {
        None
    } else {
        Some((bucket.to_owned(), key.to_owned()))
    }
}

/// ARN of an object, `arn:<partition>:s3:::<bucket>/<key>`.
pub fn format_object_arn(partition: &str, bucket: &str, key: &str) -> Arn {
    Arn::new(format!("arn:{partition}:s3:::{bucket}/{key}"))
}
