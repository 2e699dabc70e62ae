//! Module identity, categories, capability declarations and the resolved
//! per-run module record.

use crate::error::{ArchitechError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Generation tier of a module. The ordering is the hierarchical execution
/// order: frameworks lay the foundation, adapters wire concrete tech,
/// connectors bridge adapters, features build on everything below.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ModuleCategory {
    Framework,
    Adapter,
    Connector,
    Feature,
}

impl ModuleCategory {
    pub const ALL: [ModuleCategory; 4] =
        [Self::Framework, Self::Adapter, Self::Connector, Self::Feature];

    /// Rank within the hierarchical execution order, lowest runs first.
    pub fn tier(&self) -> usize {
        *self as usize
    }

    /// The metadata file a module of this category carries next to its
    /// blueprint.
    pub fn metadata_file(&self) -> &'static str {
        match self {
            Self::Framework => "framework.json",
            Self::Adapter => "adapter.json",
            Self::Connector => "connector.json",
            Self::Feature => "feature.json",
        }
    }

    /// Classifies a module by the shape of its id. `adapters/framework/..`
    /// is a framework, not an adapter: the framework tier is first-class.
    pub fn from_module_id(id: &str) -> Result<Self> {
        if id.starts_with("adapters/framework/") || id.starts_with("frameworks/") {
            Ok(Self::Framework)
        } else if id.starts_with("adapters/") {
            Ok(Self::Adapter)
        } else if id.starts_with("connectors/") {
            Ok(Self::Connector)
        } else if id.starts_with("features/") {
            Ok(Self::Feature)
        } else {
            Err(ArchitechError::Validation(format!(
                "module id `{id}` does not match a known category prefix"
            )))
        }
    }
}

impl fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Framework => "framework",
            Self::Adapter => "adapter",
            Self::Connector => "connector",
            Self::Feature => "feature",
        };
        f.write_str(s)
    }
}

/// Validates the path-like shape of a module id: lowercase segments
/// separated by `/`, at least two segments.
pub fn validate_module_id(id: &str) -> Result<()> {
    let valid_segment = |seg: &str| {
        !seg.is_empty()
            && seg
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-_.".contains(c))
    };
    let segments: Vec<&str> = id.split('/').collect();
    if segments.len() < 2 || !segments.iter().all(|s| valid_segment(s)) {
        return Err(ArchitechError::Validation(format!(
            "invalid module id `{id}`: expected `category/...segments` in lowercase"
        )));
    }
    Ok(())
}

/// A prerequisite: either another module by id, or an abstract capability
/// that some included module must provide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Requirement {
    Module(String),
    Capability { name: String, version_req: Option<semver::VersionReq> },
}

impl Requirement {
    /// Module ids are path-like; anything else names a capability. An
    /// explicit `capability:` prefix forces the latter, and a capability may
    /// carry a version requirement after `@`.
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(name) = raw.strip_prefix("capability:") {
            return Self::parse_capability(name);
        }
        if raw.contains('/') {
            validate_module_id(raw)?;
            return Ok(Self::Module(raw.to_string()));
        }
        Self::parse_capability(raw)
    }

    fn parse_capability(raw: &str) -> Result<Self> {
        match raw.split_once('@') {
            Some((name, req)) => Ok(Self::Capability {
                name: name.to_string(),
                version_req: Some(semver::VersionReq::parse(req)?),
            }),
            None => Ok(Self::Capability { name: raw.to_string(), version_req: None }),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module(id) => f.write_str(id),
            Self::Capability { name, version_req: None } => f.write_str(name),
            Self::Capability { name, version_req: Some(req) } => write!(f, "{name}@{req}"),
        }
    }
}

/// A capability a module offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDecl {
    pub name: String,
    #[serde(default)]
    pub version: Option<semver::Version>,
    /// How canonical this provider is for the capability; used only for
    /// diagnostics when a conflict is reported.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

/// Marketplace metadata sitting next to a module's blueprint
/// (`adapter.json`, `connector.json`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub category: Option<ModuleCategory>,
    /// Parameter schema: name -> `{ "default": .., "description": .. }`.
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub provides: Vec<CapabilityDecl>,
    #[serde(default)]
    pub target_package: Option<String>,
    /// Optional tech-stack variant such as `frontend/shadcn`.
    #[serde(default)]
    pub tech_stack: Option<String>,
}

impl ModuleManifest {
    /// The parameter bag implied by the schema defaults alone.
    pub fn default_parameters(&self) -> Value {
        let mut defaults = serde_json::Map::new();
        for (name, schema) in &self.parameters {
            if let Some(default) = schema.get("default") {
                defaults.insert(name.clone(), default.clone());
            }
        }
        Value::Object(defaults)
    }
}

/// A fully-enriched module as the composition engine sees it: user params
/// merged over schema defaults, prerequisites parsed, category settled.
/// Immutable once composition hands it to the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModule {
    pub id: String,
    pub version: String,
    pub category: ModuleCategory,
    pub parameters: Value,
    pub requirements: Vec<Requirement>,
    pub provides: Vec<CapabilityDecl>,
    pub target_package: Option<String>,
}
