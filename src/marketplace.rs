//! The marketplace adapter: the only surface through which the engine reads
//! module metadata, blueprints and templates.

use crate::{
    blueprint::Blueprint,
    error::{ArchitechError, Result},
    module::{ModuleCategory, ModuleManifest},
    recipes::RecipeBook,
    utils,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

/// One abstract path key and how it resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathKeyDef {
    /// Dotted key, e.g. `apps.web.components`.
    pub key: String,
    /// Relative directory; defaults to the key's segments joined with `/`.
    #[serde(default)]
    pub path: Option<String>,
    /// Semantic keys fan out to one path per qualifying app. Entries match
    /// app ids or app frameworks; `*` matches every app.
    #[serde(default)]
    pub resolve_to_apps: Vec<String>,
}

/// `manifest.json` at the marketplace root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub modules: Vec<ManifestModule>,
    #[serde(default)]
    pub path_keys: Vec<PathKeyDef>,
    /// Framework -> key -> directory. The `*` framework applies everywhere.
    #[serde(default)]
    pub path_defaults: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestModule {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Read-only access to a marketplace. The engine consumes modules solely
/// through this seam so tests and remote marketplaces can swap in.
pub trait Marketplace: Send + Sync {
    /// Default path-key directories for the given framework, with `*`
    /// defaults folded in underneath.
    fn resolve_path_defaults(&self, framework: &str) -> Result<BTreeMap<String, String>>;

    /// All path-key definitions this marketplace knows.
    fn load_path_keys(&self) -> Result<Vec<PathKeyDef>>;

    /// Metadata for the module, with id and category settled.
    fn load_module_config(&self, id: &str) -> Result<ModuleManifest>;

    /// The module's blueprint.
    fn load_blueprint(&self, id: &str) -> Result<Blueprint>;

    /// A template file shipped with the module.
    fn load_template(&self, id: &str, name: &str) -> Result<String>;

    /// Recipe books this marketplace ships.
    fn load_recipe_books(&self) -> Result<Vec<RecipeBook>>;

    fn has_module(&self, id: &str) -> bool {
        self.load_module_config(id).is_ok()
    }
}

/// A marketplace laid out on disk:
///
/// ```text
/// <root>/manifest.json
/// <root>/recipes/<book>.json
/// <root>/<module-id>/{framework,adapter,connector,feature}.json
/// <root>/<module-id>/blueprint.json            (or .yaml / .yml)
/// <root>/<module-id>/templates/<name>
/// ```
#[derive(Debug, Clone)]
pub struct DirMarketplace {
    root: PathBuf,
}

impl DirMarketplace {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        // module lookups join ids onto this root, so pin it down to an
        // absolute path independent of the caller's cwd
        let root = utils::canonicalize(root.into())?;
        if !root.join("manifest.json").is_file() {
            return Err(ArchitechError::msg(format!(
                "`{}` is not a marketplace: manifest.json is missing",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest(&self) -> Result<MarketplaceManifest> {
        utils::read_json_file(self.root.join("manifest.json"))
    }

    fn module_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

impl Marketplace for DirMarketplace {
    fn resolve_path_defaults(&self, framework: &str) -> Result<BTreeMap<String, String>> {
        let manifest = self.manifest()?;
        let mut defaults = manifest.path_defaults.get("*").cloned().unwrap_or_default();
        if let Some(specific) = manifest.path_defaults.get(framework) {
            for (key, path) in specific {
                defaults.insert(key.clone(), path.clone());
            }
        }
        Ok(defaults)
    }

    fn load_path_keys(&self) -> Result<Vec<PathKeyDef>> {
        Ok(self.manifest()?.path_keys)
    }

    fn load_module_config(&self, id: &str) -> Result<ModuleManifest> {
        let dir = self.module_dir(id);
        let category_hint = ModuleCategory::from_module_id(id).ok();
        // probe the category's own metadata file first, then the others
        let mut candidates: Vec<ModuleCategory> = Vec::with_capacity(4);
        candidates.extend(category_hint);
        candidates.extend(ModuleCategory::ALL.iter().filter(|c| Some(**c) != category_hint));
        for category in candidates {
            let path = dir.join(category.metadata_file());
            if !path.is_file() {
                continue;
            }
            let mut manifest: ModuleManifest = utils::read_json_file(&path)?;
            manifest.id.get_or_insert_with(|| id.to_string());
            manifest.category.get_or_insert(category);
            trace!(id, category = %category, "loaded module metadata");
            return Ok(manifest);
        }
        Err(ArchitechError::ModuleNotFound(id.to_string()))
    }

    fn load_blueprint(&self, id: &str) -> Result<Blueprint> {
        let dir = self.module_dir(id);
        let json = dir.join("blueprint.json");
        if json.is_file() {
            return utils::read_json_file(&json).map_err(|err| {
                ArchitechError::BlueprintLoadFailed { module: id.to_string(), source: err.into() }
            });
        }
        for name in ["blueprint.yaml", "blueprint.yml"] {
            let path = dir.join(name);
            if !path.is_file() {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .map_err(|err| ArchitechError::io(err, &path))?;
            return serde_yaml::from_str(&raw).map_err(|err| {
                ArchitechError::BlueprintLoadFailed {
                    module: id.to_string(),
                    source: Box::new(err.into()),
                }
            });
        }
        Err(ArchitechError::BlueprintLoadFailed {
            module: id.to_string(),
            source: Box::new(ArchitechError::msg("no blueprint.{json,yaml,yml} found")),
        })
    }

    fn load_template(&self, id: &str, name: &str) -> Result<String> {
        let path = self.module_dir(id).join("templates").join(name);
        fs::read_to_string(&path).map_err(|err| ArchitechError::io(err, path))
    }

    fn load_recipe_books(&self) -> Result<Vec<RecipeBook>> {
        let dir = self.root.join("recipes");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut books = Vec::new();
        for entry in walkdir::WalkDir::new(&dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                let book: RecipeBook = utils::read_json_file(entry.path())?;
                books.push(book);
            }
        }
        debug!(count = books.len(), "loaded recipe books");
        Ok(books)
    }

    fn has_module(&self, id: &str) -> bool {
        let dir = self.module_dir(id);
        ModuleCategory::ALL.iter().any(|c| dir.join(c.metadata_file()).is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(path: &Path, value: &serde_json::Value) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    fn fixture() -> (tempfile::TempDir, DirMarketplace) {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("manifest.json"),
            &json!({
                "name": "test-marketplace",
                "modules": [{"id": "adapters/framework/nextjs"}],
                "pathKeys": [
                    {"key": "apps.web.root", "path": "apps/web"},
                    {"key": "apps.frontend.components", "path": "src/components",
                     "resolveToApps": ["*"]}
                ],
                "pathDefaults": {
                    "*": {"project.root": "."},
                    "nextjs": {"apps.web.root": "apps/web"}
                }
            }),
        );
        write(
            &dir.path().join("adapters/framework/nextjs/framework.json"),
            &json!({
                "name": "Next.js",
                "version": "1.0.0",
                "provides": [{"name": "frontend-framework", "version": "14.0.0"}]
            }),
        );
        write(
            &dir.path().join("adapters/framework/nextjs/blueprint.json"),
            &json!({
                "name": "nextjs-base",
                "actions": [{"type": "add-script", "name": "dev", "command": "next dev"}]
            }),
        );
        std::fs::create_dir_all(dir.path().join("adapters/framework/nextjs/templates"))
            .unwrap();
        std::fs::write(
            dir.path().join("adapters/framework/nextjs/templates/page.tsx"),
            "export default function Page() { return null; }\n",
        )
        .unwrap();
        let marketplace = DirMarketplace::open(dir.path()).unwrap();
        (dir, marketplace)
    }

    #[test]
    fn loads_module_config_with_inferred_identity() {
        let (_dir, marketplace) = fixture();
        let manifest = marketplace.load_module_config("adapters/framework/nextjs").unwrap();
        assert_eq!(manifest.id.as_deref(), Some("adapters/framework/nextjs"));
        assert_eq!(manifest.category, Some(ModuleCategory::Framework));
        assert_eq!(manifest.provides[0].name, "frontend-framework");
    }

    #[test]
    fn missing_module_is_module_not_found() {
        let (_dir, marketplace) = fixture();
        assert!(matches!(
            marketplace.load_module_config("adapters/auth/none"),
            Err(ArchitechError::ModuleNotFound(_))
        ));
        assert!(!marketplace.has_module("adapters/auth/none"));
        assert!(marketplace.has_module("adapters/framework/nextjs"));
    }

    #[test]
    fn loads_blueprint_and_template() {
        let (_dir, marketplace) = fixture();
        let blueprint = marketplace.load_blueprint("adapters/framework/nextjs").unwrap();
        assert_eq!(blueprint.name, "nextjs-base");
        assert_eq!(blueprint.actions.len(), 1);
        let template =
            marketplace.load_template("adapters/framework/nextjs", "page.tsx").unwrap();
        assert!(template.contains("function Page"));
    }

    #[test]
    fn path_defaults_fold_star_under_framework() {
        let (_dir, marketplace) = fixture();
        let defaults = marketplace.resolve_path_defaults("nextjs").unwrap();
        assert_eq!(defaults["project.root"], ".");
        assert_eq!(defaults["apps.web.root"], "apps/web");
        let other = marketplace.resolve_path_defaults("remix").unwrap();
        assert_eq!(other.get("apps.web.root"), None);
    }

    #[test]
    fn open_requires_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirMarketplace::open(dir.path()).is_err());
    }
}
