//! Structure-aware file transformers.
//!
//! A modifier is a value: a name, a params schema, and a pure transform of
//! `(current content, params, context) -> new content`. Modifiers never
//! touch disk; [`Modifier::execute`] reads the current content out of the
//! [`Vfs`], applies the transform, and writes the result back into the
//! buffer only when it changed. The registry is populated once at process
//! start and handed to the execution pipeline by reference.

use crate::{
    error::{ArchitechError, Result},
    vfs::Vfs,
};
use serde_json::Value;
use std::collections::BTreeMap;

pub mod css;
pub mod json;
pub mod ts;
pub mod yaml;

/// Result of a modifier run.
#[derive(Debug, Clone, Default)]
pub struct ModifierOutcome {
    /// Whether the buffered content changed. Re-applying a modifier with the
    /// same params is expected to report `false`.
    pub changed: bool,
    pub message: Option<String>,
}

/// The JSON shape a schema field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Bool,
    Number,
    Array,
    Object,
    Any,
}

impl ParamKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Number => value.is_number(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
            ParamKind::Any => true,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Bool => "boolean",
            ParamKind::Number => "number",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
            ParamKind::Any => "any",
        }
    }
}

/// One declared parameter of a modifier.
#[derive(Debug, Clone, Copy)]
pub struct ParamField {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamField {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: true }
    }

    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: false }
    }
}

/// Declarative parameter schema, validated before every transform.
#[derive(Debug, Clone, Copy)]
pub struct ParamsSchema {
    pub fields: &'static [ParamField],
}

impl ParamsSchema {
    /// Validates the params bag: it must be an object (or null, read as an
    /// empty object), required fields must be present, and every declared
    /// field that is present must match its kind. Undeclared fields pass
    /// through untouched.
    pub fn validate(&self, modifier: &str, params: &Value) -> Result<()> {
        let map = match params {
            Value::Null => return self.check_required(modifier, &serde_json::Map::new()),
            Value::Object(map) => map,
            other => {
                return Err(ArchitechError::InvalidModifierParams {
                    modifier: modifier.to_string(),
                    reason: format!("params must be an object, got {}", kind_of(other)),
                })
            }
        };
        self.check_required(modifier, map)?;
        for field in self.fields {
            if let Some(value) = map.get(field.name) {
                if !value.is_null() && !field.kind.matches(value) {
                    return Err(ArchitechError::InvalidModifierParams {
                        modifier: modifier.to_string(),
                        reason: format!(
                            "field `{}` must be a {}, got {}",
                            field.name,
                            field.kind.label(),
                            kind_of(value)
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_required(
        &self,
        modifier: &str,
        map: &serde_json::Map<String, Value>,
    ) -> Result<()> {
        for field in self.fields.iter().filter(|f| f.required) {
            if !map.contains_key(field.name) {
                return Err(ArchitechError::InvalidModifierParams {
                    modifier: modifier.to_string(),
                    reason: format!("missing required field `{}`", field.name),
                });
            }
        }
        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The pure transform at the heart of a modifier.
pub type TransformFn = fn(&str, &Value, &Value) -> Result<String>;

/// A registered file transformer.
pub struct Modifier {
    pub name: &'static str,
    pub description: &'static str,
    /// Extensions this modifier is meant for; empty means any. A mismatch is
    /// logged, not fatal, so the alternative-extension fallback stays usable.
    pub extensions: &'static [&'static str],
    pub schema: ParamsSchema,
    pub transform: TransformFn,
}

impl std::fmt::Debug for Modifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Modifier")
            .field("name", &self.name)
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl Modifier {
    /// Validates params, then transforms the buffered content in a single
    /// read-modify-write under the entry lock, so concurrent modifiers
    /// targeting the same file serialize instead of losing updates.
    pub fn execute(
        &self,
        path: &str,
        params: &Value,
        ctx: &Value,
        vfs: &Vfs,
    ) -> Result<ModifierOutcome> {
        self.schema.validate(self.name, params)?;
        if !self.extensions.is_empty() {
            let ext = path.rsplit('.').next().unwrap_or_default();
            if !self.extensions.contains(&ext) {
                debug!(modifier = self.name, path, "file extension outside the declared set");
            }
        }
        let mut changed = false;
        vfs.update(path, |current| {
            let current = current
                .ok_or_else(|| crate::error::ArchitechError::FileNotFound(path.to_string()))?;
            let next = (self.transform)(current, params, ctx)?;
            changed = next != current;
            Ok(next)
        })?;
        trace!(modifier = self.name, path, changed, "modifier applied");
        Ok(ModifierOutcome { changed, message: None })
    }
}

/// Catalog of modifiers keyed by name.
#[derive(Debug)]
pub struct ModifierRegistry {
    inner: BTreeMap<&'static str, Modifier>,
}

impl ModifierRegistry {
    pub fn empty() -> Self {
        Self { inner: BTreeMap::new() }
    }

    /// The registry with every built-in modifier installed.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(json::json_merger());
        registry.register(json::package_json_merger());
        registry.register(json::tsconfig_enhancer());
        registry.register(yaml::yaml_merger());
        registry.register(css::css_enhancer());
        registry.register(ts::ts_module_enhancer());
        registry.register(ts::js_export_wrapper());
        registry.register(ts::jsx_children_wrapper());
        registry.register(ts::js_config_merger());
        registry
    }

    /// Installs a modifier, replacing any previous entry under the same name.
    pub fn register(&mut self, modifier: Modifier) {
        trace!(name = modifier.name, "registering modifier");
        self.inner.insert(modifier.name, modifier);
    }

    pub fn get(&self, name: &str) -> Result<&Modifier> {
        self.inner
            .get(name)
            .ok_or_else(|| ArchitechError::ModifierNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.inner.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for ModifierRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_registry_has_all_nine() {
        let registry = ModifierRegistry::builtin();
        for name in [
            "json-merger",
            "package-json-merger",
            "tsconfig-enhancer",
            "yaml-merger",
            "css-enhancer",
            "ts-module-enhancer",
            "js-export-wrapper",
            "jsx-children-wrapper",
            "js-config-merger",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert_eq!(registry.len(), 9);
    }

    #[test]
    fn unknown_modifier_is_reported() {
        let registry = ModifierRegistry::builtin();
        assert!(matches!(
            registry.get("does-not-exist"),
            Err(ArchitechError::ModifierNotFound(_))
        ));
    }

    #[test]
    fn schema_rejects_missing_required_field() {
        const SCHEMA: ParamsSchema =
            ParamsSchema { fields: &[ParamField::required("content", ParamKind::Object)] };
        assert!(SCHEMA.validate("m", &json!({})).is_err());
        assert!(SCHEMA.validate("m", &json!({"content": {}})).is_ok());
    }

    #[test]
    fn schema_rejects_kind_mismatch() {
        const SCHEMA: ParamsSchema =
            ParamsSchema { fields: &[ParamField::optional("dev", ParamKind::Bool)] };
        let err = SCHEMA.validate("m", &json!({"dev": "yes"})).unwrap_err();
        assert!(err.to_string().contains("`dev` must be a boolean"));
    }

    #[test]
    fn schema_accepts_null_params_when_nothing_required() {
        const SCHEMA: ParamsSchema =
            ParamsSchema { fields: &[ParamField::optional("x", ParamKind::Any)] };
        assert!(SCHEMA.validate("m", &Value::Null).is_ok());
    }
}
