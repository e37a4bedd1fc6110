//! Engine configuration loaded from a single JSON file
use super::error::ConfigError;
use super::identity::{Actor, Directory};
use super::registry::{Catalog, Registry, TableDef, Template};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_data_dir() -> PathBuf {
    PathBuf::from("plan-rollup.db")
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub id: String,
    #[serde(default)]
    pub templates: Vec<Template>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub users: Vec<Actor>,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Validated registries for every project.
    pub fn catalog(&self) -> Result<Catalog, ConfigError> {
        let mut catalog = Catalog::new();
        for project in &self.projects {
            let registry = Registry::new(
                project.id.clone(),
                project.templates.clone(),
                project.tables.clone(),
            )?;
            catalog.insert(registry)?;
        }
        Ok(catalog)
    }

    pub fn directory(&self) -> Result<Directory, ConfigError> {
        Directory::new(self.users.iter().cloned())
    }
}
