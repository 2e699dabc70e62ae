//! `{{a.b.c}}` placeholder substitution against a JSON context.
//!
//! This is intentionally primitive: a dotted-path lookup over the context
//! object, nothing more. A placeholder whose path is absent from the context
//! is left in the output untouched so downstream tooling can spot it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;

/// Matches `{{ a.b.c }}` with optional inner whitespace. Path segments are
/// identifiers, digits, `-` and `_`, joined by `.`.
static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_$-]+(?:\.[A-Za-z0-9_$-]+)*)\s*\}\}").unwrap());

/// Resolves a dotted path against the context, e.g. `project.name`.
pub fn lookup<'a>(ctx: &'a Value, dotted: &str) -> Option<&'a Value> {
    let mut current = ctx;
    for segment in dotted.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Renders every `{{a.b.c}}` placeholder in `input` from `ctx`.
///
/// Strings substitute their raw value; numbers and booleans their JSON
/// form. Missing keys, objects and arrays leave the placeholder intact.
pub fn render<'a>(input: &'a str, ctx: &Value) -> Cow<'a, str> {
    RE_PLACEHOLDER.replace_all(input, |caps: &regex::Captures<'_>| {
        match lookup(ctx, &caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
            _ => caps[0].to_string(),
        }
    })
}

/// Renders into an owned `String`; convenience for action handlers.
pub fn render_owned(input: &str, ctx: &Value) -> String {
    render(input, ctx).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "project": {"name": "hello", "version": "0.1.0"},
            "module": {"parameters": {"provider": "better-auth", "retries": 3}},
            "paths": {"apps": {"web": {"components": "apps/web/src/components"}}},
            "options": {"skipInstall": false}
        })
    }

    #[test]
    fn substitutes_dotted_paths() {
        assert_eq!(render("name={{project.name}}", &ctx()), "name=hello");
        assert_eq!(
            render("{{paths.apps.web.components}}/Button.tsx", &ctx()),
            "apps/web/src/components/Button.tsx"
        );
    }

    #[test]
    fn substitutes_numbers_and_bools() {
        assert_eq!(render("r={{module.parameters.retries}}", &ctx()), "r=3");
        assert_eq!(render("skip={{options.skipInstall}}", &ctx()), "skip=false");
    }

    #[test]
    fn missing_key_leaves_placeholder_intact() {
        assert_eq!(render("{{project.missing}} stays", &ctx()), "{{project.missing}} stays");
        assert_eq!(render("{{nope}}", &ctx()), "{{nope}}");
    }

    #[test]
    fn object_valued_path_is_not_substituted() {
        assert_eq!(render("{{module.parameters}}", &ctx()), "{{module.parameters}}");
    }

    #[test]
    fn tolerates_inner_whitespace() {
        assert_eq!(render("{{ project.name }}", &ctx()), "hello");
    }

    #[test]
    fn non_placeholder_braces_untouched() {
        assert_eq!(render("const x = { a: 1 };", &ctx()), "const x = { a: 1 };");
    }
}
