use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use super::types::{ProjectConfig, RunParams, ServiceDefinition, Settings};

/// File name of the project definition inside the project directory.
pub const PROJECT_FILE: &str = "container.yml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawProject {
    settings: Settings,
    services: BTreeMap<String, Option<RunParams>>,
}

impl ProjectConfig {
    /// Load `container.yml` from the given directory.
    ///
    /// A missing file yields default settings and no services. The project
    /// name falls back to the directory name when the file does not set one.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PROJECT_FILE);
        let document = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            parse_document(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            serde_json::Value::Object(Default::default())
        };

        let raw: RawProject = serde_json::from_value(document.clone())
            .with_context(|| format!("invalid project definition in {}", path.display()))?;

        let name = match raw.settings.project_name.clone() {
            Some(name) => name,
            None => default_project_name(dir)?,
        };

        let services = raw
            .services
            .into_iter()
            .map(|(name, declared)| {
                let svc = ServiceDefinition::new(name.clone(), declared.unwrap_or_default());
                (name, svc)
            })
            .collect();

        Ok(Self {
            name,
            settings: raw.settings,
            services,
            document,
        })
    }
}

fn parse_document(contents: &str) -> Result<serde_json::Value> {
    if contents.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    let value: serde_json::Value = serde_yaml::from_str(contents)?;
    if !value.is_object() {
        bail!("top level must be a mapping");
    }
    Ok(value)
}

fn default_project_name(dir: &Path) -> Result<String> {
    let dir = dir
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", dir.display()))?;
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .context("project directory has no name; set settings.project_name")?;
    // Container names only allow a restricted character set.
    let cleaned = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect::<String>()
        .to_lowercase();
    if cleaned.is_empty() {
        bail!("cannot derive a project name from directory `{name}`; set settings.project_name");
    }
    Ok(cleaned)
}
