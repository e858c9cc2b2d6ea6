//! Resource recipes: the YAML documents that describe a Saturn resource.
//!
//! Only the fields the client rewrites are modeled; everything else is kept
//! verbatim in `extra` so a load/save cycle does not drop user settings.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Deployment,
    Job,
    Workspace,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [Self::Deployment, Self::Job, Self::Workspace];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Job => "job",
            Self::Workspace => "workspace",
        }
    }

    /// Resolve a user-supplied name. Case-insensitive; plurals are accepted.
    pub fn lookup(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == lower || ty.as_str() == singular)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Self::lookup(s) {
            Some(ty) => Ok(ty),
            None => bail!("resource type \"{s}\" not found"),
        }
    }
}

/// Startup command(s) of a resource. Jobs may list several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceCommand {
    Single(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub spec: ResourceSpec,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<ResourceCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

pub fn parse_recipe(raw: &str) -> Result<Recipe> {
    serde_yaml::from_str(raw).context("parse recipe yaml")
}

pub fn load_recipe(path: &Path) -> Result<Recipe> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_recipe(&raw).with_context(|| format!("load recipe {}", path.display()))
}

pub fn render_recipe(recipe: &Recipe) -> Result<String> {
    serde_yaml::to_string(recipe).context("serialize recipe yaml")
}

pub fn write_recipe(path: &Path, recipe: &Recipe) -> Result<()> {
    let payload = render_recipe(recipe)?;
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
type: job
spec:
  name: sweep
  image_uri: registry/saturn:latest
  command: python train.py
  working_directory: /home/jovyan/project
  instance_type: large
schema_version: 2022.08.01
"#;

    #[test]
    fn lookup_accepts_case_and_plurals() {
        assert_eq!(ResourceType::lookup("Job"), Some(ResourceType::Job));
        assert_eq!(ResourceType::lookup("workspaces"), Some(ResourceType::Workspace));
        assert_eq!(ResourceType::lookup("DEPLOYMENT"), Some(ResourceType::Deployment));
        assert_eq!(ResourceType::lookup("pod"), None);
        assert!("cluster".parse::<ResourceType>().is_err());
    }

    #[test]
    fn parses_known_fields() {
        let recipe = parse_recipe(JOB).expect("parse");
        assert_eq!(recipe.resource_type, ResourceType::Job);
        assert_eq!(recipe.spec.name.as_deref(), Some("sweep"));
        assert_eq!(
            recipe.spec.command,
            Some(ResourceCommand::Single("python train.py".to_string()))
        );
        assert_eq!(recipe.spec.start_script, None);
    }

    #[test]
    fn round_trip_keeps_unknown_fields() {
        let mut recipe = parse_recipe(JOB).expect("parse");
        recipe.spec.command = Some(ResourceCommand::Many(vec![
            "sc batch a".to_string(),
            "sc batch b".to_string(),
        ]));

        let rendered = render_recipe(&recipe).expect("render");
        let reparsed = parse_recipe(&rendered).expect("reparse");

        assert_eq!(reparsed, recipe);
        assert!(rendered.contains("image_uri: registry/saturn:latest"));
        assert!(rendered.contains("instance_type: large"));
        assert!(rendered.contains("schema_version:"));
    }

    #[test]
    fn rejects_unknown_type() {
        let err = parse_recipe("type: cluster\nspec: {}\n").unwrap_err();
        assert!(format!("{err:#}").contains("parse recipe yaml"));
    }

    #[test]
    fn file_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("recipe.yaml");
        let recipe = parse_recipe(JOB).expect("parse");

        write_recipe(&path, &recipe).expect("write");

        assert_eq!(load_recipe(&path).expect("load"), recipe);
    }
}
