//! Structural template diff.
//!
//! Both sides are parsed as YAML (JSON templates parse too) and walked in
//! parallel. Engine-injected metadata is skipped so a redeploy of an unchanged
//! manifest reports nothing.

use crate::CoreError;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::fmt::Write as _;

/// Paths rewritten by the engine on every deploy.
const IGNORED_PATHS: &[&str] = &["Metadata.Manifest", "Metadata.Version"];

/// A single change between the deployed and the local template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum Change {
    Added { path: String, value: Value },
    Removed { path: String, value: Value },
    Modified { path: String, old: Value, new: Value },
}

impl Change {
    pub fn path(&self) -> &str {
        match self {
            Change::Added { path, .. }
            | Change::Removed { path, .. }
            | Change::Modified { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateDiff {
    changes: Vec<Change>,
}

impl TemplateDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Count of (added, removed, modified) entries.
    pub fn summary(&self) -> (usize, usize, usize) {
        self.changes
            .iter()
            .fold((0, 0, 0), |(a, r, m), change| match change {
                Change::Added { .. } => (a + 1, r, m),
                Change::Removed { .. } => (a, r + 1, m),
                Change::Modified { .. } => (a, r, m + 1),
            })
    }

    /// One line per change: `+ path: value`, `- path: value`, `~ path: old -> new`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for change in &self.changes {
            let _ = match change {
                Change::Added { path, value } => writeln!(out, "+ {path}: {}", inline(value)),
                Change::Removed { path, value } => writeln!(out, "- {path}: {}", inline(value)),
                Change::Modified { path, old, new } => {
                    writeln!(out, "~ {path}: {} -> {}", inline(old), inline(new))
                }
            };
        }
        out
    }
}

fn inline(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "<unprintable>".to_owned())
}

fn parse(template: &str) -> Result<Value, CoreError> {
    if template.trim().is_empty() {
        return Ok(Value::Mapping(Mapping::new()));
    }
    Ok(serde_yaml::from_str(template)?)
}

fn key_str(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => inline(other),
    }
}

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_owned()
    } else {
        format!("{parent}.{key}")
    }
}

/// Drop ignored paths from a subtree that is added or removed whole.
fn prune(path: &str, value: &Value) -> Option<Value> {
    if IGNORED_PATHS.contains(&path) {
        return None;
    }
    let Value::Mapping(map) = value else {
        return Some(value.clone());
    };
    if map.is_empty() {
        return Some(value.clone());
    }
    let pruned: Mapping = map
        .iter()
        .filter_map(|(k, v)| prune(&join(path, &key_str(k)), v).map(|v| (k.clone(), v)))
        .collect();
    (!pruned.is_empty()).then_some(Value::Mapping(pruned))
}

fn walk(path: &str, old: &Value, new: &Value, out: &mut Vec<Change>) {
    if IGNORED_PATHS.contains(&path) {
        return;
    }
    match (old, new) {
        (Value::Mapping(old), Value::Mapping(new)) => {
            for (key, old_value) in old {
                let child = join(path, &key_str(key));
                if let Some(new_value) = new.get(key) {
                    walk(&child, old_value, new_value, out);
                } else if let Some(value) = prune(&child, old_value) {
                    out.push(Change::Removed { path: child, value });
                }
            }
            for (key, new_value) in new {
                if old.contains_key(key) {
                    continue;
                }
                let child = join(path, &key_str(key));
                if let Some(value) = prune(&child, new_value) {
                    out.push(Change::Added { path: child, value });
                }
            }
        }
        (Value::Sequence(old), Value::Sequence(new)) => {
            for (idx, (o, n)) in old.iter().zip(new).enumerate() {
                walk(&format!("{path}[{idx}]"), o, n, out);
            }
            for (idx, value) in old.iter().enumerate().skip(new.len()) {
                out.push(Change::Removed {
                    path: format!("{path}[{idx}]"),
                    value: value.clone(),
                });
            }
            for (idx, value) in new.iter().enumerate().skip(old.len()) {
                out.push(Change::Added {
                    path: format!("{path}[{idx}]"),
                    value: value.clone(),
                });
            }
        }
        _ if old == new => {}
        _ => out.push(Change::Modified {
            path: path.to_owned(),
            old: old.clone(),
            new: new.clone(),
        }),
    }
}

/// Diff the `deployed` template against the `local` one. An empty deployed
/// template stands for a stack that does not exist yet.
pub fn diff_templates(deployed: &str, local: &str) -> Result<TemplateDiff, CoreError> {
    let old = parse(deployed)?;
    let new = parse(local)?;
    let mut changes = Vec::new();
    walk("", &old, &new, &mut changes);
    Ok(TemplateDiff { changes })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYED: &str = r"
Metadata:
  Version: v1.0.0
  Manifest: old
Parameters:
  AppName:
    Type: String
Resources:
  Service:
    Type: AWS::ECS::Service
    Properties:
      DesiredCount: 1
      Ports: [80]
  Legacy:
    Type: AWS::SQS::Queue
";

    const LOCAL: &str = r"
Metadata:
  Version: v1.1.0
  Manifest: new
Parameters:
  AppName:
    Type: String
Resources:
  Service:
    Type: AWS::ECS::Service
    Properties:
      DesiredCount: 2
      Ports: [80, 443]
  Topic:
    Type: AWS::SNS::Topic
";

    #[test]
    fn identical_templates_have_no_changes() {
        assert!(diff_templates(LOCAL, LOCAL).unwrap().is_empty());
    }

    #[test]
    fn metadata_only_changes_are_ignored() {
        let bumped = LOCAL.replace("v1.1.0", "v9.9.9").replace("Manifest: new", "Manifest: other");
        assert!(diff_templates(LOCAL, &bumped).unwrap().is_empty());
    }

    #[test]
    fn missing_stack_is_all_additions() {
        let diff = diff_templates("", LOCAL).unwrap();
        assert!(!diff.is_empty());
        assert!(diff
            .changes()
            .iter()
            .all(|c| matches!(c, Change::Added { .. })));
        let paths: Vec<&str> = diff.changes().iter().map(Change::path).collect();
        assert_eq!(paths, vec!["Parameters", "Resources"]);
    }

    #[test]
    fn nested_changes_are_reported_by_path() {
        let diff = diff_templates(DEPLOYED, LOCAL).unwrap();
        let paths: Vec<&str> = diff.changes().iter().map(Change::path).collect();
        assert_eq!(
            paths,
            vec![
                "Resources.Service.Properties.DesiredCount",
                "Resources.Service.Properties.Ports[1]",
                "Resources.Legacy",
                "Resources.Topic",
            ]
        );
        assert_eq!(diff.summary(), (2, 1, 1));
    }

    #[test]
    fn render_uses_change_markers() {
        let rendered = diff_templates(DEPLOYED, LOCAL).unwrap().render();
        assert!(rendered.contains("~ Resources.Service.Properties.DesiredCount: 1 -> 2\n"));
        assert!(rendered.contains("+ Resources.Service.Properties.Ports[1]: 443\n"));
        assert!(rendered.contains("- Resources.Legacy: {\"Type\":\"AWS::SQS::Queue\"}\n"));
    }

    #[test]
    fn json_templates_parse() {
        let json = r#"{"Resources": {"Queue": {"Type": "AWS::SQS::Queue"}}}"#;
        let diff = diff_templates(json, json).unwrap();
        assert!(diff.is_empty());
    }
}
