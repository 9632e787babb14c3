use crate::upload::{AddonPackager, CustomResourceSource};
use crate::CoreError;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level template sections add-on files may contribute to.
const ADDON_SECTIONS: &[&str] = &[
    "Parameters",
    "Mappings",
    "Conditions",
    "Resources",
    "Outputs",
];

/// The directory a workload is deployed from.
///
/// Paths in the manifest (env files, Dockerfiles, static-site sources) are
/// relative to the workspace root. Add-on templates live in
/// `addons/<workload>/` and custom-resource bundles in `custom-resources/`.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn read(&self, rel: &str) -> Result<Vec<u8>, CoreError> {
        Ok(fs::read(self.path(rel))?)
    }

    pub fn addons_dir(&self, workload: &str) -> PathBuf {
        self.root.join("addons").join(workload)
    }

    pub fn custom_resources_dir(&self) -> PathBuf {
        self.root.join("custom-resources")
    }

    /// Files under `source`, as `(path relative to source, absolute path)`,
    /// sorted. A file source yields itself under its file name; directories
    /// are only descended into when `recursive` is set.
    pub fn files_under(
        &self,
        source: &str,
        recursive: bool,
    ) -> Result<Vec<(String, PathBuf)>, CoreError> {
        let base = self.path(source);
        let mut files = Vec::new();
        if base.is_file() {
            let name = base
                .file_name()
                .map_or_else(|| source.to_owned(), |n| n.to_string_lossy().into_owned());
            files.push((name, base));
            return Ok(files);
        }
        collect_files(&base, &base, recursive, &mut files)?;
        files.sort();
        Ok(files)
    }
}

fn collect_files(
    base: &Path,
    current: &Path,
    recursive: bool,
    files: &mut Vec<(String, PathBuf)>,
) -> Result<(), CoreError> {
    for entry in fs::read_dir(current)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_files(base, &path, recursive, files)?;
            }
            continue;
        }
        if let Ok(rel) = path.strip_prefix(base) {
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((rel, path));
        }
    }
    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yml" || ext == "yaml")
}

/// Merge add-on templates into one. Logical ids must be unique per section.
fn merge_addons(files: &[(String, String)]) -> Result<Mapping, CoreError> {
    let mut merged = Mapping::new();
    for (name, content) in files {
        let doc: Value = serde_yaml::from_str(content)?;
        let Value::Mapping(doc) = doc else {
            return Err(CoreError::Addon(format!("{name} is not a YAML mapping")));
        };
        for (section, body) in doc {
            let Some(section_name) = section.as_str() else {
                return Err(CoreError::Addon(format!("{name}: non-string top-level key")));
            };
            if !ADDON_SECTIONS.contains(&section_name) {
                debug!("ignoring section {section_name} in add-on {name}");
                continue;
            }
            let Value::Mapping(body) = body else {
                return Err(CoreError::Addon(format!(
                    "{name}: section {section_name} must be a mapping"
                )));
            };
            let target = merged
                .entry(Value::String(section_name.to_owned()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            let Value::Mapping(target) = target else {
                continue;
            };
            for (logical_id, value) in body {
                if target.contains_key(&logical_id) {
                    return Err(CoreError::Addon(format!(
                        "{name}: {section_name} entry {} is already defined by another add-on",
                        logical_id.as_str().unwrap_or("<non-string>")
                    )));
                }
                target.insert(logical_id, value);
            }
        }
    }
    Ok(merged)
}

impl AddonPackager for Workspace {
    fn package(&self, workload: &str) -> Result<Option<String>, CoreError> {
        let dir = self.addons_dir(workload);
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_yaml(p))
            .collect();
        if paths.is_empty() {
            return Ok(None);
        }
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            files.push((name, fs::read_to_string(&path)?));
        }
        let merged = merge_addons(&files)?;
        Ok(Some(serde_yaml::to_string(&merged)?))
    }
}

impl CustomResourceSource for Workspace {
    fn bundle(&self, name: &str) -> Result<Vec<u8>, CoreError> {
        let path = self.custom_resources_dir().join(format!("{name}.zip"));
        if !path.is_file() {
            return Err(CoreError::MissingBundle {
                name: name.to_owned(),
                path: path.display().to_string(),
            });
        }
        Ok(fs::read(path)?)
    }
}
