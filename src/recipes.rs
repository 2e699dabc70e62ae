//! Recipe books and the expansion of user-facing packages into module sets.

use crate::{
    error::{ArchitechError, Result},
    genome::PackageRequest,
    utils,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Marketplace-supplied mapping from package names to module sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeBook {
    pub name: String,
    #[serde(default)]
    pub packages: BTreeMap<String, RecipePackage>,
    /// Path-key -> directory overrides this book contributes.
    #[serde(default)]
    pub package_structure: BTreeMap<String, PackageStructure>,
    /// Framework script templates, merged into generated manifests by
    /// blueprints that reference them.
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipePackage {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub modules: Vec<RecipeModule>,
    /// Other packages this one pulls in before its own modules.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeModule {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStructure {
    pub directory: String,
}

/// A module produced by expansion, before marketplace enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedModule {
    pub id: String,
    pub version: Option<String>,
    pub parameters: Value,
    /// The app the enclosing package was requested for.
    pub target: Option<String>,
}

/// Expansion output: the flat module list plus any warnings worth keeping.
#[derive(Debug, Default)]
pub struct Expansion {
    pub modules: Vec<ExpandedModule>,
    pub warnings: Vec<String>,
}

fn find_package<'a>(books: &'a [RecipeBook], name: &str) -> Option<&'a RecipePackage> {
    books.iter().find_map(|book| book.packages.get(name))
}

/// Expands the requested packages into a deduplicated module list.
///
/// Expansion recurses through package dependencies; a visited set keyed by
/// package name breaks dependency loops. Parameter overrides from the
/// genome are deep-merged over recipe defaults. When two expansions emit
/// the same module id with different parameter bags the later one wins and
/// a warning is recorded.
pub fn expand_packages(
    requests: &[(String, PackageRequest)],
    books: &[RecipeBook],
) -> Result<Expansion> {
    let mut expansion = Expansion::default();
    let mut visited: HashSet<String> = HashSet::new();
    for (app, request) in requests {
        expand_one(request.name(), request, app, books, &mut visited, &mut expansion)?;
    }
    dedupe(&mut expansion);
    Ok(expansion)
}

fn expand_one(
    package_name: &str,
    request: &PackageRequest,
    app: &str,
    books: &[RecipeBook],
    visited: &mut HashSet<String>,
    expansion: &mut Expansion,
) -> Result<()> {
    // the visited key includes the app so the same package can serve
    // several apps, while loops within one app's expansion still break
    let visited_key = format!("{app}:{package_name}");
    if !visited.insert(visited_key) {
        trace!(package = package_name, app, "package already expanded, skipping");
        return Ok(());
    }
    let package = find_package(books, package_name).ok_or_else(|| {
        ArchitechError::Validation(format!(
            "package `{package_name}` is not defined by any recipe book"
        ))
    })?;
    debug!(package = package_name, app, modules = package.modules.len(), "expanding package");

    for dependency in &package.depends_on {
        expand_one(dependency, request, app, books, visited, expansion)?;
    }

    for module in &package.modules {
        let mut parameters = if module.parameters.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            module.parameters.clone()
        };
        if let Some(overrides) = request.parameters().and_then(|p| p.get(&module.id)) {
            utils::merge_params(&mut parameters, overrides);
        }
        expansion.modules.push(ExpandedModule {
            id: module.id.clone(),
            version: module.version.clone(),
            parameters,
            target: Some(app.to_string()),
        });
    }
    Ok(())
}

/// Later duplicates win; a parameter mismatch is worth a warning because
/// the earlier selection silently loses.
pub(crate) fn dedupe(expansion: &mut Expansion) {
    let mut last_index: BTreeMap<String, usize> = BTreeMap::new();
    for (index, module) in expansion.modules.iter().enumerate() {
        if let Some(previous) = last_index.insert(module.id.clone(), index) {
            let earlier = &expansion.modules[previous];
            if earlier.parameters != module.parameters {
                let warning = format!(
                    "module `{}` expanded twice with different parameters; the later selection wins",
                    module.id
                );
                warn!("{warning}");
                expansion.warnings.push(warning);
            }
        }
    }
    let keep: HashSet<usize> = last_index.into_values().collect();
    let mut index = 0;
    expansion.modules.retain(|_| {
        let retained = keep.contains(&index);
        index += 1;
        retained
    });
}
