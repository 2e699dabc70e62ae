//! Resolution of abstract path keys to concrete project-relative paths.
//!
//! The table is computed once per run. Priority, highest first: the user's
//! `genome.paths` overrides, recipe-book `packageStructure` directories,
//! marketplace defaults for the project framework, and finally the computed
//! fallback. Semantic keys fan out into one path per qualifying app.

use crate::{
    error::{ArchitechError, Result},
    genome::Genome,
    marketplace::PathKeyDef,
    recipes::RecipeBook,
    utils,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

static RE_KEY_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").unwrap());

/// The computed `key -> [paths]` table.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    table: BTreeMap<String, Vec<String>>,
}

impl PathResolver {
    /// Builds the full table for a run.
    pub fn build(
        genome: &Genome,
        key_defs: &[PathKeyDef],
        marketplace_defaults: &BTreeMap<String, String>,
        books: &[RecipeBook],
    ) -> Result<Self> {
        let mut table: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for def in key_defs {
            let paths = resolve_key(def, genome, marketplace_defaults, books);
            if !paths.is_empty() {
                table.insert(def.key.clone(), paths);
            }
        }

        // marketplace defaults for keys without a definition entry
        for (key, path) in marketplace_defaults {
            table.entry(key.clone()).or_insert_with(|| vec![normalize(path)]);
        }

        // user overrides always win, including brand-new custom keys
        for (key, path) in &genome.paths {
            table.insert(key.clone(), vec![normalize(path)]);
        }

        debug!(keys = table.len(), "path table resolved");
        Ok(Self { table })
    }

    /// All paths the key resolves to.
    pub fn get(&self, key: &str) -> Result<&[String]> {
        self.table.get(key).map(Vec::as_slice).ok_or_else(|| ArchitechError::PathNotFound {
            key: key.to_string(),
            candidates: utils::close_matches(key, self.table.keys().map(String::as_str)),
        })
    }

    /// The single path for a non-semantic key.
    pub fn get_one(&self, key: &str) -> Result<&str> {
        let paths = self.get(key)?;
        match paths {
            [single] => Ok(single),
            _ => Err(ArchitechError::MultiplePaths {
                key: key.to_string(),
                count: paths.len(),
            }),
        }
    }

    /// Substitutes `{var}` placeholders in a key pattern and resolves the
    /// result to a single path.
    pub fn interpolate(
        &self,
        pattern: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut missing = None;
        let key = RE_KEY_VAR.replace_all(pattern, |caps: &regex::Captures<'_>| {
            match vars.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });
        if let Some(var) = missing {
            return Err(ArchitechError::Validation(format!(
                "path key pattern `{pattern}` references undefined variable `{var}`"
            )));
        }
        self.get_one(&key).map(str::to_string)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// The table as a nested JSON object for template contexts. Only
    /// single-valued keys are exposed; semantic fan-outs cannot appear in a
    /// `{{paths.*}}` placeholder unambiguously.
    pub fn as_context(&self) -> Value {
        let mut object = serde_json::Map::new();
        for (key, paths) in &self.table {
            if let [single] = paths.as_slice() {
                utils::insert_dotted(&mut object, key, Value::String(single.clone()));
            }
        }
        Value::Object(object)
    }
}

fn normalize(path: &str) -> String {
    let mut p = path.replace('\\', "/");
    while p.contains("//") {
        p = p.replace("//", "/");
    }
    p.trim_start_matches("./").trim_matches('/').to_string()
}

fn resolve_key(
    def: &PathKeyDef,
    genome: &Genome,
    marketplace_defaults: &BTreeMap<String, String>,
    books: &[RecipeBook],
) -> Vec<String> {
    if let Some(path) = genome.paths.get(&def.key) {
        return vec![normalize(path)];
    }
    if let Some(structure) =
        books.iter().find_map(|book| book.package_structure.get(&def.key))
    {
        return vec![normalize(&structure.directory)];
    }
    if let Some(path) = marketplace_defaults.get(&def.key) {
        return vec![normalize(path)];
    }

    let relative = def
        .path
        .clone()
        .unwrap_or_else(|| def.key.split('.').collect::<Vec<_>>().join("/"));

    if def.resolve_to_apps.is_empty() {
        return vec![normalize(&relative)];
    }

    // semantic key: one path per qualifying app
    genome
        .project
        .apps
        .iter()
        .filter(|app| {
            def.resolve_to_apps.iter().any(|selector| {
                selector == "*"
                    || selector == &app.id
                    || app
                        .framework
                        .as_deref()
                        .or(Some(genome.project.framework.as_str()))
                        == Some(selector.as_str())
            })
        })
        .map(|app| normalize(&format!("{}/{}", app.directory(), relative)))
        .collect()
}
