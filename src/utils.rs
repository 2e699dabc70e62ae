//! Utility functions

use crate::error::{ArchitechError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// The fixed set of interchangeable script extensions tried by the
/// enhance-file fallback, in probe order.
pub const ALTERNATIVE_EXTENSIONS: &[&str] = &["ts", "js", "tsx", "jsx", "mjs", "cjs", "mts", "cts"];

/// Returns the sha256 digest of `data` as a lowercase hex string.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    hex::encode(hasher.finalize())
}

/// Serializes a JSON value canonically: object keys sorted lexicographically
/// at every level, no insignificant whitespace.
///
/// Two values that are deep-equal always canonicalize to the same bytes,
/// which makes the output suitable for content addressing.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Reads the json file and deserialize it into the provided type
pub fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let file = fs::File::open(path).map_err(|err| ArchitechError::io(err, path))?;
    let file = std::io::BufReader::new(file);
    let val: T = serde_json::from_reader(file)?;
    Ok(val)
}

/// Creates the parent directory of the `file` and all its ancestors
pub fn create_parent_dir_all(file: impl AsRef<Path>) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            ArchitechError::msg(format!(
                "Failed to create artifact parent folder \"{}\": {}",
                parent.display(),
                err
            ))
        })?;
    }
    Ok(())
}

/// Canonicalize the path, platform-agnostic
///
/// On windows this will ensure the path only consists of `/` separators
pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let res = dunce::canonicalize(path).map_err(|err| ArchitechError::io(err, path))?;
    Ok(res)
}

/// Deep-merges `patch` into `base`: objects merge recursively, everything
/// else is replaced by the patch value. Used for layering parameter bags;
/// the structure-aware merges with array strategies live in the modifiers.
pub fn merge_params(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_val) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_val) => merge_params(base_val, patch_val),
                    None => {
                        base_map.insert(key.clone(), patch_val.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Inserts `value` into `target` under the dotted path, creating
/// intermediate objects. `insert_dotted(obj, "apps.web.src", v)` yields
/// `{"apps": {"web": {"src": v}}}`.
pub fn insert_dotted(target: &mut serde_json::Map<String, Value>, dotted: &str, value: Value) {
    let mut segments = dotted.split('.').peekable();
    let mut current = target;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let next = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        match next {
            Value::Object(map) => current = map,
            // a scalar already sits on the intermediate segment; leave it
            _ => return,
        }
    }
}

/// Levenshtein-free near-miss lookup: keys that share a prefix or differ
/// only by a trailing segment from the probe. Good enough for the
/// "did you mean" hint on unknown path keys.
pub fn close_matches<'a>(probe: &str, keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    let prefix: String = probe.chars().take(probe.len().saturating_sub(2)).collect();
    let mut matches: Vec<String> = keys
        .filter(|key| {
            key.starts_with(&prefix) || probe.starts_with(key.trim_end_matches(|c| c != '.'))
        })
        .map(str::to_string)
        .collect();
    matches.sort();
    matches.truncate(3);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let value = json!({"b": 1, "a": {"z": true, "y": [1, {"k": "v"}]}});
        assert_eq!(canonical_json(&value), r#"{"a":{"y":[1,{"k":"v"}],"z":true},"b":1}"#);
    }

    #[test]
    fn canonical_json_is_stable_across_insertion_order() {
        let left = json!({"name": "hello", "framework": "nextjs"});
        let right = json!({"framework": "nextjs", "name": "hello"});
        assert_eq!(canonical_json(&left), canonical_json(&right));
    }

    #[test]
    fn merge_params_recurses_objects_and_replaces_scalars() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "keep": true, "arr": [1]});
        merge_params(&mut base, &json!({"a": {"y": 3, "z": 4}, "arr": [2, 3]}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3, "z": 4}, "keep": true, "arr": [2, 3]}));
    }

    #[test]
    fn insert_dotted_builds_nested_objects() {
        let mut map = serde_json::Map::new();
        insert_dotted(&mut map, "apps.web.components", json!("apps/web/src/components"));
        insert_dotted(&mut map, "apps.web.pages", json!("apps/web/src/pages"));
        assert_eq!(
            Value::Object(map),
            json!({"apps": {"web": {"components": "apps/web/src/components", "pages": "apps/web/src/pages"}}})
        );
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex("architech"),
            "5838d41881af6418d1abcd306bed4d5b3f74d5e9be08c3469e6206b621b204f9"
        );
    }
}
