//! Blueprints: the ordered action lists that materialize a module, and the
//! package specifications install actions carry.

use crate::error::{ArchitechError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A module's generation recipe. Immutable within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    pub name: String,
    #[serde(default = "default_blueprint_version")]
    pub version: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_blueprint_version() -> String {
    "1.0.0".to_string()
}

/// What an enhance-file action does when its target is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Report success without touching anything.
    #[default]
    Skip,
    /// Create `{}` for JSON targets, an empty file otherwise, then enhance.
    CreateEmpty,
    /// Probe sibling extensions (`js`/`ts`/`mjs`/... ) for an existing file.
    UseAlternativeExtension,
}

/// A single typed operation in a blueprint. Paths, commands and content are
/// templates expanded against the project context at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    #[serde(rename_all = "camelCase")]
    CreateFile {
        path: String,
        #[serde(default)]
        content: Option<String>,
        /// Name of a template file shipped with the module, used when
        /// `content` is absent.
        #[serde(default)]
        template: Option<String>,
        #[serde(default)]
        overwrite: bool,
    },
    #[serde(rename_all = "camelCase")]
    EnhanceFile {
        path: String,
        modifier: String,
        #[serde(default)]
        params: Value,
        #[serde(default)]
        fallback: FallbackPolicy,
    },
    #[serde(rename_all = "camelCase")]
    InstallPackages {
        packages: Vec<String>,
        #[serde(default)]
        dev: bool,
    },
    #[serde(rename_all = "camelCase")]
    AddScript { name: String, command: String },
    #[serde(rename_all = "camelCase")]
    RunCommand {
        command: String,
        #[serde(default)]
        working_dir: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl Action {
    /// Stable tag used in logs and error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateFile { .. } => "create-file",
            Self::EnhanceFile { .. } => "enhance-file",
            Self::InstallPackages { .. } => "install-packages",
            Self::AddScript { .. } => "add-script",
            Self::RunCommand { .. } => "run-command",
        }
    }
}

/// A `name[@version]` package token from an install action. The last `@`
/// splits name and version so scoped names keep their prefix; a missing
/// version means `latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
}

impl PackageSpec {
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ArchitechError::Validation("empty package specification".into()));
        }
        match token.rfind('@') {
            // an `@` at position 0 is a scope marker, not a version split
            Some(0) | None => {
                Ok(Self { name: token.to_string(), version: "latest".to_string() })
            }
            Some(at) => {
                let (name, version) = token.split_at(at);
                let version = &version[1..];
                if version.is_empty() {
                    return Err(ArchitechError::Validation(format!(
                        "package `{token}` has an empty version"
                    )));
                }
                Ok(Self { name: name.to_string(), version: version.to_string() })
            }
        }
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version == "latest" {
            f.write_str(&self.name)
        } else {
            write!(f, "{}@{}", self.name, self.version)
        }
    }
}
