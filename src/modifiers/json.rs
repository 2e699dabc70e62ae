//! JSON-family modifiers: generic deep merge, the `package.json`
//! specialization and the `tsconfig.json` enhancer.

use super::{Modifier, ParamField, ParamKind, ParamsSchema};
use crate::error::{ArchitechError, Result};
use serde_json::{Map, Value};
use std::str::FromStr;

/// How arrays combine during a deep merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArrayStrategy {
    /// Append the patch items after the existing ones.
    #[default]
    Concat,
    /// The patch array replaces the existing one.
    Replace,
    /// Append, then drop duplicates while keeping first-seen order.
    Unique,
}

impl FromStr for ArrayStrategy {
    type Err = ArchitechError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "concat" => Ok(Self::Concat),
            "replace" => Ok(Self::Replace),
            "unique" => Ok(Self::Unique),
            other => Err(ArchitechError::msg(format!(
                "unknown array strategy `{other}`, expected concat | replace | unique"
            ))),
        }
    }
}

/// Recursively merges `patch` into `base`. Object keys merge, arrays follow
/// `strategy`, primitives are replaced by the patch value.
pub fn deep_merge(base: &mut Value, patch: &Value, strategy: ArrayStrategy) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_val) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_val) => deep_merge(base_val, patch_val, strategy),
                    None => {
                        base_map.insert(key.clone(), patch_val.clone());
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(patch_items)) => match strategy {
            ArrayStrategy::Concat => base_items.extend(patch_items.iter().cloned()),
            ArrayStrategy::Replace => *base_items = patch_items.clone(),
            ArrayStrategy::Unique => {
                for item in patch_items {
                    if !base_items.contains(item) {
                        base_items.push(item.clone());
                    }
                }
            }
        },
        (base, patch) => *base = patch.clone(),
    }
}

/// Parses buffered content as a JSON object, reading empty content as `{}`.
fn parse_object(content: &str) -> Result<Map<String, Value>> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(trimmed)? {
        Value::Object(map) => Ok(map),
        other => Err(ArchitechError::msg(format!(
            "expected a JSON object at the top level, got {}",
            match other {
                Value::Array(_) => "an array",
                Value::String(_) => "a string",
                Value::Number(_) => "a number",
                Value::Bool(_) => "a boolean",
                _ => "null",
            }
        ))),
    }
}

fn to_pretty(map: Map<String, Value>) -> Result<String> {
    Ok(serde_json::to_string_pretty(&Value::Object(map))?)
}

fn strategy_from(params: &Value) -> Result<ArrayStrategy> {
    match params.get("arrayStrategy").and_then(Value::as_str) {
        Some(s) => s.parse(),
        None => Ok(ArrayStrategy::default()),
    }
}

/// `json-merger` — deep-merges `params.content` into the file.
pub fn json_merger() -> Modifier {
    Modifier {
        name: "json-merger",
        description: "Deep-merge an object into a JSON file",
        extensions: &["json"],
        schema: ParamsSchema {
            fields: &const {
                [
                    ParamField::required("content", ParamKind::Object),
                    ParamField::optional("arrayStrategy", ParamKind::String),
                ]
            },
        },
        transform: |current, params, _ctx| {
            let strategy = strategy_from(params)?;
            let mut base = Value::Object(parse_object(current)?);
            // schema guarantees presence and shape
            if let Some(patch) = params.get("content") {
                deep_merge(&mut base, patch, strategy);
            }
            match base {
                Value::Object(map) => to_pretty(map),
                _ => unreachable!("merge of two objects yields an object"),
            }
        },
    }
}

const PACKAGE_JSON_SECTIONS: &[&str] =
    &["dependencies", "devDependencies", "scripts", "engines"];

/// `package-json-merger` — merges the well-known manifest sections with
/// last-write-wins per key. `browserslist` is replaced when given as an
/// array and key-merged when given as an object.
pub fn package_json_merger() -> Modifier {
    Modifier {
        name: "package-json-merger",
        description: "Merge dependencies, scripts and related sections into package.json",
        extensions: &["json"],
        schema: ParamsSchema {
            fields: &const {
                [
                    ParamField::optional("dependencies", ParamKind::Object),
                    ParamField::optional("devDependencies", ParamKind::Object),
                    ParamField::optional("scripts", ParamKind::Object),
                    ParamField::optional("engines", ParamKind::Object),
                    ParamField::optional("browserslist", ParamKind::Any),
                ]
            },
        },
        transform: |current, params, _ctx| {
            let mut manifest = parse_object(current)?;
            for section in PACKAGE_JSON_SECTIONS {
                let Some(Value::Object(patch)) = params.get(*section) else { continue };
                if patch.is_empty() {
                    continue;
                }
                let target = manifest
                    .entry(section.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !target.is_object() {
                    *target = Value::Object(Map::new());
                }
                if let Value::Object(target_map) = target {
                    for (key, value) in patch {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
            match params.get("browserslist") {
                Some(list @ Value::Array(_)) => {
                    manifest.insert("browserslist".to_string(), list.clone());
                }
                Some(Value::Object(patch)) => {
                    let target = manifest
                        .entry("browserslist".to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    deep_merge(target, &Value::Object(patch.clone()), ArrayStrategy::Replace);
                }
                _ => {}
            }
            to_pretty(manifest)
        },
    }
}

/// `tsconfig-enhancer` — deep-merges `compilerOptions` (with `paths` values
/// unioned) and unions `include`/`exclude` with dedup.
pub fn tsconfig_enhancer() -> Modifier {
    Modifier {
        name: "tsconfig-enhancer",
        description: "Merge compilerOptions and include/exclude into a tsconfig",
        extensions: &["json"],
        schema: ParamsSchema {
            fields: &const {
                [
                    ParamField::optional("compilerOptions", ParamKind::Object),
                    ParamField::optional("include", ParamKind::Array),
                    ParamField::optional("exclude", ParamKind::Array),
                ]
            },
        },
        transform: |current, params, _ctx| {
            let mut config = parse_object(current)?;
            if let Some(patch @ Value::Object(_)) = params.get("compilerOptions") {
                let target = config
                    .entry("compilerOptions".to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                // `paths` maps alias -> globs; union the globs instead of
                // letting the patch clobber another module's aliases
                deep_merge(target, patch, ArrayStrategy::Unique);
            }
            for list in ["include", "exclude"] {
                let Some(patch @ Value::Array(_)) = params.get(list) else { continue };
                let target =
                    config.entry(list.to_string()).or_insert_with(|| Value::Array(Vec::new()));
                if !target.is_array() {
                    *target = Value::Array(Vec::new());
                }
                deep_merge(target, patch, ArrayStrategy::Unique);
            }
            to_pretty(config)
        },
    }
}
