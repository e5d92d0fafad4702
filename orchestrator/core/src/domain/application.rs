// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Application Document
//!
//! The declarative description users submit: a table of goals (one container
//! each) plus the designated main goal. Everything here is immutable once the
//! application is created; runtime state lives in `crate::application`.
//!
//! ```json
//! {
//!   "goals": {
//!     "db":  { "image": "postgres:16", "smart_restart": true },
//!     "web": { "image": "nginx:1.27", "links": ["db:database"], "ports": ["8080:80"] }
//!   },
//!   "main_goal": "web"
//! }
//! ```

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use regex::Regex;
use thiserror::Error;

use crate::domain::container_spec::TranslationError;
use crate::domain::graph::DependencyGraph;

static GOAL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-zA-Z_.\-]+$").expect("goal name pattern"));

static IMAGE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-zA-Z.\-/:_]+(:[0-9a-zA-Z.\-_]+|@sha256:[0-9a-f]{64})$")
        .expect("image reference pattern")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Application name {0:?} is invalid")]
    InvalidApplicationName(String),

    #[error("Main goal is not set")]
    MainGoalNotSet,

    #[error("Main goal {0:?} is not defined")]
    MainGoalUndefined(String),

    #[error("Goal {0:?} is defined more than once")]
    DuplicateGoal(String),

    #[error("Goal {0:?} has invalid name")]
    InvalidGoalName(String),

    #[error("Goal {goal:?} has invalid image name {image:?}")]
    InvalidImage { goal: String, image: String },

    #[error("Goal {goal:?} should run after goal {target:?} that does not exist")]
    UnknownRunAfter { goal: String, target: String },

    #[error("Goal {goal:?} links goal {target:?} that does not exist")]
    UnknownLink { goal: String, target: String },

    #[error("Circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("Goal {goal:?}: {source}")]
    Translation {
        goal: String,
        #[source]
        source: TranslationError,
    },
}

/// Registry credentials used when pulling a goal's image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serveraddress: Option<String>,
}

/// `name` or `name:alias` reference to another container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReference {
    pub name: String,
    pub alias: String,
}

impl LinkReference {
    pub fn parse(entry: &str) -> Self {
        match entry.split_once(':') {
            Some((name, alias)) => Self {
                name: name.to_string(),
                alias: alias.to_string(),
            },
            None => Self {
                name: entry.to_string(),
                alias: entry.to_string(),
            },
        }
    }
}

/// Declarative specification of a single goal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalSpec {
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    /// Marks a one-shot goal that is expected to exit. Informational only:
    /// it is kept in the document and never changes scheduling or the
    /// container parameters. Exit handling is the same for every goal.
    #[serde(skip_serializing_if = "is_false")]
    pub task: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run_after: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_links: Vec<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub smart_restart: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expose: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_driver: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub log_config: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub net: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns_search: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cap_drop: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_opt: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domainname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memswap_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpuset: Option<String>,

    #[serde(skip_serializing_if = "is_false")]
    pub privileged: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub read_only: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub tty: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub stdin_open: bool,

    /// Engine-level restart policy name (e.g. `on-failure`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_driver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_config: Option<AuthConfiguration>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl GoalSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn linked_goals(&self) -> Vec<LinkReference> {
        self.links.iter().map(|l| LinkReference::parse(l)).collect()
    }

    pub fn has_dependencies(&self) -> bool {
        !self.run_after.is_empty() || !self.links.is_empty()
    }
}

/// Goals in document order. Names are unique; a duplicate key in the
/// submitted document is rejected while parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoalTable(Vec<(String, GoalSpec)>);

impl GoalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: GoalSpec) -> Result<(), ConfigurationError> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(ConfigurationError::DuplicateGoal(name));
        }
        self.0.push((name, spec));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&GoalSpec> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GoalSpec)> {
        self.0.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for GoalTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, spec) in &self.0 {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GoalTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GoalTableVisitor;

        impl<'de> Visitor<'de> for GoalTableVisitor {
            type Value = GoalTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of goal names to goal specifications")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<GoalTable, A::Error> {
                let mut table = GoalTable::new();
                while let Some((name, spec)) = access.next_entry::<String, GoalSpec>()? {
                    table.insert(name, spec).map_err(de::Error::custom)?;
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(GoalTableVisitor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfiguration {
    pub goals: GoalTable,
    #[serde(default)]
    pub main_goal: String,
}

/// Application names share the goal-name alphabet; both end up in container names.
pub fn validate_application_name(name: &str) -> Result<(), ConfigurationError> {
    if GOAL_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidApplicationName(name.to_string()))
    }
}

impl ApplicationConfiguration {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load a document from disk; `.yaml`/`.yml` files are parsed as YAML,
    /// everything else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            _ => Self::from_json_str(&content)?,
        };
        Ok(config)
    }

    /// Structural validation: main goal, names, images, references and cycles.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.main_goal.is_empty() {
            return Err(ConfigurationError::MainGoalNotSet);
        }
        if self.goals.get(&self.main_goal).is_none() {
            return Err(ConfigurationError::MainGoalUndefined(self.main_goal.clone()));
        }

        for (name, goal) in self.goals.iter() {
            if !GOAL_NAME.is_match(name) {
                return Err(ConfigurationError::InvalidGoalName(name.to_string()));
            }
            if !IMAGE_REFERENCE.is_match(&goal.image) {
                return Err(ConfigurationError::InvalidImage {
                    goal: name.to_string(),
                    image: goal.image.clone(),
                });
            }
        }

        DependencyGraph::build(&self.goals).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_goal_document() -> ApplicationConfiguration {
        let mut goals = GoalTable::new();
        goals.insert("db", GoalSpec::new("postgres:16")).unwrap();
        let mut web = GoalSpec::new("nginx:1.27");
        web.links = vec!["db:database".to_string()];
        goals.insert("web", web).unwrap();
        ApplicationConfiguration {
            goals,
            main_goal: "web".to_string(),
        }
    }

    #[test]
    fn test_valid_document() {
        assert_eq!(two_goal_document().validate(), Ok(()));
    }

    #[test]
    fn test_main_goal_must_exist() {
        let mut doc = two_goal_document();
        doc.main_goal = String::new();
        assert_eq!(doc.validate(), Err(ConfigurationError::MainGoalNotSet));

        doc.main_goal = "cache".to_string();
        assert_eq!(
            doc.validate(),
            Err(ConfigurationError::MainGoalUndefined("cache".to_string()))
        );
    }

    #[test]
    fn test_rejects_bad_names_and_images() {
        let mut goals = GoalTable::new();
        goals.insert("bad name", GoalSpec::new("alpine:3.2")).unwrap();
        let doc = ApplicationConfiguration { goals, main_goal: "bad name".to_string() };
        assert!(matches!(doc.validate(), Err(ConfigurationError::InvalidGoalName(_))));

        let mut goals = GoalTable::new();
        goals.insert("app", GoalSpec::new("alpine")).unwrap();
        let doc = ApplicationConfiguration { goals, main_goal: "app".to_string() };
        assert!(matches!(doc.validate(), Err(ConfigurationError::InvalidImage { .. })));
    }

    #[test]
    fn test_unknown_references() {
        let mut doc = two_goal_document();
        let mut worker = GoalSpec::new("alpine:3.2");
        worker.run_after = vec!["migrate".to_string()];
        doc.goals.insert("worker", worker).unwrap();
        assert_eq!(
            doc.validate(),
            Err(ConfigurationError::UnknownRunAfter {
                goal: "worker".to_string(),
                target: "migrate".to_string()
            })
        );
    }

    #[test]
    fn test_duplicate_goal_in_document_is_rejected() {
        let json = r#"{
            "goals": {
                "a": {"image": "alpine:3.2"},
                "a": {"image": "alpine:3.3"}
            },
            "main_goal": "a"
        }"#;
        let err = ApplicationConfiguration::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("defined more than once"));
    }

    #[test]
    fn test_document_order_is_preserved() {
        let yaml = "goals:\n  zeta:\n    image: alpine:3.2\n  alpha:\n    image: alpine:3.2\n    run_after: [zeta]\nmain_goal: alpha\n";
        let doc = ApplicationConfiguration::from_yaml_str(yaml).unwrap();
        assert_eq!(doc.goals.names().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
        assert_eq!(doc.goals.get("alpha").unwrap().run_after, vec!["zeta"]);
    }

    #[test]
    fn test_application_name() {
        assert!(validate_application_name("shop-v2.prod").is_ok());
        assert_eq!(
            validate_application_name("my shop"),
            Err(ConfigurationError::InvalidApplicationName("my shop".to_string()))
        );
        assert!(validate_application_name("").is_err());
    }

    #[test]
    fn test_link_alias_defaults_to_name() {
        assert_eq!(
            LinkReference::parse("db"),
            LinkReference { name: "db".to_string(), alias: "db".to_string() }
        );
        assert_eq!(LinkReference::parse("db:database").alias, "database");
    }
}
