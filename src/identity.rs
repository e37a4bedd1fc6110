//! Acting principals and the directory that resolves them
use super::error::ConfigError;
use super::types::Signature;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// May act on any table.
    #[serde(rename = "top", alias = "super_admin")]
    Top,
    /// Scoped to the tables of one region.
    #[serde(rename = "regional", alias = "regional_admin")]
    Regional,
    /// Scoped to the single table of one unit.
    #[serde(rename = "unit", alias = "filler")]
    Unit,
}

/// Whether an actor's writes appear on audit and status surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Visible,
    HiddenFromAudit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub username: String,
    #[serde(alias = "global_role")]
    pub role: Role,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

impl Actor {
    pub fn new(username: &str, role: Role) -> Self {
        Self {
            username: username.to_string(),
            role,
            unit: None,
            region: None,
            visibility: Visibility::Visible,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visibility = Visibility::HiddenFromAudit;
        self
    }

    pub fn is_hidden(&self) -> bool {
        self.visibility == Visibility::HiddenFromAudit
    }

    pub fn signature(&self) -> Signature {
        Signature {
            username: self.username.clone(),
            hidden_from_audit: self.is_hidden(),
        }
    }
}

/// Resolves the principal attached to a request.
pub trait IdentityProvider {
    fn resolve(&self, principal: &str) -> Option<Actor>;
}

/// Static username → actor table loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct Directory {
    actors: HashMap<String, Actor>,
}

impl Directory {
    pub fn new(actors: impl IntoIterator<Item = Actor>) -> Result<Self, ConfigError> {
        let mut map = HashMap::new();
        for actor in actors {
            let username = actor.username.clone();
            if map.insert(username.clone(), actor).is_some() {
                return Err(ConfigError::DuplicateUser(username));
            }
        }
        Ok(Self { actors: map })
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

impl IdentityProvider for Directory {
    fn resolve(&self, principal: &str) -> Option<Actor> {
        self.actors.get(principal).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legacy_role_names() {
        let actors: Vec<Actor> = serde_json::from_str(
            r#"[
                {"username":"root","global_role":"super_admin"},
                {"username":"zc","role":"regional_admin","region":"主城区"},
                {"username":"bh","role":"filler","unit":"北海热电厂"},
                {"username":"ghost","role":"top","visibility":"hidden_from_audit"}
            ]"#,
        )
        .unwrap();

        assert_eq!(actors[0].role, Role::Top);
        assert_eq!(actors[1].role, Role::Regional);
        assert_eq!(actors[2].role, Role::Unit);
        assert!(actors[3].is_hidden());
        assert!(actors[3].signature().hidden_from_audit);
    }

    #[test]
    fn directory_rejects_duplicates() {
        let err = Directory::new([Actor::new("a", Role::Top), Actor::new("a", Role::Unit)])
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateUser(name) if name == "a"));
    }

    #[test]
    fn directory_resolves_known_principals_only() {
        let directory = Directory::new([Actor::new("admin", Role::Top)]).unwrap();
        assert!(directory.resolve("admin").is_some());
        assert!(directory.resolve("nobody").is_none());
    }
}
