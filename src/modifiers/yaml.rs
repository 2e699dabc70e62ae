//! YAML deep-merge modifier. Mirrors the JSON merger but in the
//! `serde_yaml` value domain so anchors-free documents round-trip cleanly.

use super::{json::ArrayStrategy, Modifier, ParamField, ParamKind, ParamsSchema};
use crate::error::{ArchitechError, Result};
use serde_yaml::{Mapping, Value as Yaml};

/// Recursive merge in the YAML domain: mappings merge, sequences follow the
/// array strategy, scalars are replaced.
pub fn deep_merge_yaml(base: &mut Yaml, patch: &Yaml, strategy: ArrayStrategy) {
    match (base, patch) {
        (Yaml::Mapping(base_map), Yaml::Mapping(patch_map)) => {
            for (key, patch_val) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_val) => deep_merge_yaml(base_val, patch_val, strategy),
                    None => {
                        base_map.insert(key.clone(), patch_val.clone());
                    }
                }
            }
        }
        (Yaml::Sequence(base_items), Yaml::Sequence(patch_items)) => match strategy {
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

/// `yaml-merger` — deep-merges `params.content` into a YAML document.
pub fn yaml_merger() -> Modifier {
    Modifier {
        name: "yaml-merger",
        description: "Deep-merge an object into a YAML document",
        extensions: &["yaml", "yml"],
        schema: ParamsSchema {
            fields: &const {
                [
                    ParamField::required("content", ParamKind::Object),
                    ParamField::optional("arrayStrategy", ParamKind::String),
                ]
            },
        },
        transform: |current, params, _ctx| {
            let strategy = match params.get("arrayStrategy").and_then(|v| v.as_str()) {
                Some(s) => s.parse()?,
                None => ArrayStrategy::default(),
            };
            let mut base: Yaml = if current.trim().is_empty() {
                Yaml::Mapping(Mapping::new())
            } else {
                serde_yaml::from_str(current)?
            };
            if base.is_null() {
                base = Yaml::Mapping(Mapping::new());
            }
            if !base.is_mapping() {
                return Err(ArchitechError::msg(
                    "expected a YAML mapping at the top level of the document",
                ));
            }
            // params arrive as JSON; hop them over into the YAML domain
            let patch: Yaml = serde_yaml::to_value(
                params.get("content").cloned().unwrap_or(serde_json::Value::Null),
            )?;
            deep_merge_yaml(&mut base, &patch, strategy);
            Ok(serde_yaml::to_string(&base)?)
        },
    }
}
