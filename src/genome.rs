//! The genome: the user's declarative description of the project to
//! materialize, plus the loaders that find and parse it.

use crate::{
    error::{ArchitechError, Result},
    module::validate_module_id,
    utils,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Top-level fields the loader understands; anything else is surfaced as a
/// warning and otherwise ignored.
const KNOWN_FIELDS: &[&str] =
    &["project", "modules", "packages", "paths", "moduleOverrides", "options"];

pub const PROJECT_CONFIG_FILE: &str = "architech.config.json";
pub const USER_CONFIG_FILE: &str = ".architechrc";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genome {
    pub project: ProjectInfo,
    #[serde(default)]
    pub modules: Vec<ModuleRef>,
    /// Marketplace packages to expand, keyed by the app they target.
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<PackageRequest>>,
    /// User path-key overrides; highest priority in the resolver chain.
    #[serde(default)]
    pub paths: BTreeMap<String, String>,
    /// Per-module overrides: parameter patches and capability
    /// disambiguation (`{"capability:<name>": "<provider module id>"}`).
    #[serde(default)]
    pub module_overrides: BTreeMap<String, Value>,
    #[serde(default)]
    pub options: GenomeOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub framework: String,
    /// Target directory; defaults to `./<name>` relative to the cwd.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub description: Option<String>,
    /// Monorepo apps. An empty list means a single-app project rooted at
    /// the project directory.
    #[serde(default)]
    pub apps: Vec<AppSpec>,
    /// Monorepo shared packages.
    #[serde(default)]
    pub packages: Vec<WorkspacePackage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    pub id: String,
    #[serde(default)]
    pub framework: Option<String>,
    /// Directory relative to the project root; defaults to `apps/<id>`.
    #[serde(default)]
    pub path: Option<String>,
}

impl AppSpec {
    pub fn directory(&self) -> String {
        self.path.clone().unwrap_or_else(|| format!("apps/{}", self.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePackage {
    pub id: String,
    #[serde(default)]
    pub path: Option<String>,
}

impl WorkspacePackage {
    pub fn directory(&self) -> String {
        self.path.clone().unwrap_or_else(|| format!("packages/{}", self.id))
    }
}

/// One module selected directly in the genome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRef {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub parameters: Value,
    /// Target app or workspace package.
    #[serde(default)]
    pub target: Option<String>,
}

/// A package selection: either a bare name or a name with per-module
/// parameter overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageRequest {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        parameters: BTreeMap<String, Value>,
    },
}

impl PackageRequest {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Detailed { name, .. } => name,
        }
    }

    pub fn parameters(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Name(_) => None,
            Self::Detailed { parameters, .. } => Some(parameters),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenomeOptions {
    /// Skip dependency-installing commands; manifest merges still happen.
    #[serde(default)]
    pub skip_install: bool,
    /// Recompose even when a valid lock file exists.
    #[serde(default)]
    pub force_regenerate: bool,
    /// Cap on concurrently executing modules within a parallel batch.
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Default deadline for run-command actions, in seconds.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl Genome {
    /// Reads and validates a genome document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading genome");
        let raw: Value = utils::read_json_file(path)?;
        let (genome, warnings) = Self::from_value(raw)?;
        for warning in &warnings {
            warn!(path = %path.display(), "{warning}");
        }
        Ok(genome)
    }

    /// Parses a genome from a JSON value, returning warnings for unknown
    /// top-level fields instead of failing on them.
    pub fn from_value(raw: Value) -> Result<(Self, Vec<String>)> {
        let Value::Object(map) = raw else {
            return Err(ArchitechError::Validation(
                "genome document must be a JSON object".to_string(),
            ));
        };
        let mut warnings = Vec::new();
        let mut known = serde_json::Map::new();
        for (key, value) in map {
            if KNOWN_FIELDS.contains(&key.as_str()) {
                known.insert(key, value);
            } else {
                warnings.push(format!("ignoring unknown genome field `{key}`"));
            }
        }
        let genome: Genome = serde_json::from_value(Value::Object(known))
            .map_err(|err| ArchitechError::Validation(err.to_string()))?;
        genome.validate()?;
        Ok((genome, warnings))
    }

    fn validate(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            return Err(ArchitechError::Validation("project.name must not be empty".into()));
        }
        if self.project.framework.trim().is_empty() {
            return Err(ArchitechError::Validation(
                "project.framework must not be empty".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for module in &self.modules {
            validate_module_id(&module.id)?;
            if !seen.insert(module.id.as_str()) {
                return Err(ArchitechError::Validation(format!(
                    "duplicate module id `{}` in genome",
                    module.id
                )));
            }
            if !module.parameters.is_null() && !module.parameters.is_object() {
                return Err(ArchitechError::Validation(format!(
                    "parameters of `{}` must be an object",
                    module.id
                )));
            }
        }
        Ok(())
    }

    /// The directory the project is materialized into.
    pub fn target_dir(&self, cwd: &Path) -> PathBuf {
        match &self.project.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => cwd.join(path),
            None => cwd.join(&self.project.name),
        }
    }
}

/// Genome-source configuration: `architech.config.json` next to the project
/// or `~/.architechrc` at the user level. Both are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    /// Alias -> genome file path.
    #[serde(default)]
    pub genomes: BTreeMap<String, String>,
    /// Directory scanned for `<alias>.genome.json` files.
    #[serde(default)]
    pub genomes_dir: Option<String>,
}

impl ToolConfig {
    /// Loads project-level config from `dir`, falling back to the
    /// user-level file in the home directory. A missing file is an empty
    /// config, not an error.
    pub fn discover(dir: &Path) -> Result<Self> {
        let project = dir.join(PROJECT_CONFIG_FILE);
        if project.is_file() {
            return utils::read_json_file(&project);
        }
        if let Some(home) = dirs::home_dir() {
            let user = home.join(USER_CONFIG_FILE);
            if user.is_file() {
                return utils::read_json_file(&user);
            }
        }
        Ok(Self::default())
    }

    /// Genome aliases known to this config, with their resolved paths.
    pub fn list_genomes(&self, base: &Path) -> Vec<(String, PathBuf)> {
        let mut entries: Vec<(String, PathBuf)> = self
            .genomes
            .iter()
            .map(|(alias, path)| (alias.clone(), base.join(path)))
            .collect();
        if let Some(dir) = &self.genomes_dir {
            let dir = base.join(dir);
            if dir.is_dir() {
                for entry in walkdir::WalkDir::new(&dir)
                    .max_depth(1)
                    .into_iter()
                    .filter_map(std::result::Result::ok)
                    .filter(|e| e.file_type().is_file())
                {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if let Some(alias) = name.strip_suffix(".genome.json") {
                        entries.push((alias.to_string(), entry.path().to_path_buf()));
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);
        entries
    }
}

/// Resolves a genome reference: a path to an existing file wins, then a
/// configured alias, then `<ref>.genome.json` under the configured genomes
/// directory.
pub fn resolve_genome_ref(reference: &str, cwd: &Path) -> Result<PathBuf> {
    let direct = cwd.join(reference);
    if direct.is_file() {
        return Ok(direct);
    }
    let config = ToolConfig::discover(cwd)?;
    for (alias, path) in config.list_genomes(cwd) {
        if alias == reference && path.is_file() {
            return Ok(path);
        }
    }
    Err(ArchitechError::Validation(format!(
        "genome `{reference}` not found: not a file and not a configured alias"
    )))
}
