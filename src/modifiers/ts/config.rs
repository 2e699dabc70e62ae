//! Merging properties into an exported JS/TS config object while keeping
//! the file's existing formatting intact. Edits are surgical: value spans
//! are replaced in place and new keys are spliced in after the last entry.

use super::{
    scanner::{code_mask, find_code, find_matching, is_code},
    Modifier, ParamField, ParamKind, ParamsSchema,
};
use crate::error::{ArchitechError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static RE_ENTRY_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:"(?P<dq>[^"]+)"|'(?P<sq>[^']+)'|(?P<id>[A-Za-z_$][A-Za-z0-9_$]*))\s*:\s*"#)
        .unwrap()
});

static RE_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

/// One `key: value` entry of an object literal, in source coordinates.
struct LiteralEntry {
    key: String,
    value_start: usize,
    value_end: usize,
}

/// Scans the `key: value` entries at depth one of the literal spanning
/// `open..=close`. Spreads, methods and shorthands are left alone: they
/// produce no entry and are never merge targets.
fn scan_entries(src: &str, mask: &[bool], open: usize, close: usize) -> Vec<LiteralEntry> {
    let bytes = src.as_bytes();
    let mut entries = Vec::new();
    let mut depth = 0i32;
    let mut entry_start: Option<usize> = None;
    let mut finalize = |entries: &mut Vec<LiteralEntry>, start: usize, end: usize| {
        let text = &src[start..end];
        if let Some(caps) = RE_ENTRY_KEY.captures(text) {
            let key = caps
                .name("dq")
                .or_else(|| caps.name("sq"))
                .or_else(|| caps.name("id"))
                .map(|m| m.as_str().to_string());
            if let (Some(key), Some(m)) = (key, caps.get(0)) {
                let mut value_end = end;
                while value_end > start
                    && src.as_bytes()[value_end - 1].is_ascii_whitespace()
                {
                    value_end -= 1;
                }
                entries.push(LiteralEntry { key, value_start: start + m.end(), value_end });
            }
        }
    };
    let mut i = open;
    while i <= close {
        let b = bytes[i];
        if depth == 1 && entry_start.is_none() && !b.is_ascii_whitespace() {
            entry_start = Some(i);
        }
        if is_code(mask, i) {
            match b {
                b'{' | b'(' | b'[' => depth += 1,
                b'}' | b')' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(start) = entry_start.take() {
                            finalize(&mut entries, start, i);
                        }
                        break;
                    }
                }
                b',' if depth == 1 => {
                    if let Some(start) = entry_start.take() {
                        finalize(&mut entries, start, i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    entries
}

/// Serializes a JSON value as JS source: identifier keys unquoted, strings
/// single-quoted, nested structures inline.
fn js_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(js_value).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            if map.is_empty() {
                return "{}".to_string();
            }
            let inner: Vec<String> =
                map.iter().map(|(k, v)| format!("{}: {}", js_key(k), js_value(v))).collect();
            format!("{{ {} }}", inner.join(", "))
        }
    }
}

fn js_key(key: &str) -> String {
    if RE_IDENT.is_match(key) {
        key.to_string()
    } else {
        format!("'{}'", key.replace('\'', "\\'"))
    }
}

/// A pending splice against the original source.
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// Recursively collects value replacements and key insertions for merging
/// `patch` into the literal at `open..=close`. All offsets refer to the
/// original source; the caller applies them back-to-front.
fn collect_edits(
    src: &str,
    mask: &[bool],
    open: usize,
    close: usize,
    patch: &Map<String, Value>,
    edits: &mut Vec<Edit>,
) -> Result<()> {
    let entries = scan_entries(src, mask, open, close);
    let mut missing: Vec<(&String, &Value)> = Vec::new();

    for (key, patch_value) in patch {
        let Some(entry) = entries.iter().find(|e| &e.key == key) else {
            missing.push((key, patch_value));
            continue;
        };
        let existing = src[entry.value_start..entry.value_end].trim_start();
        if let (Value::Object(nested_patch), true) =
            (patch_value, existing.starts_with('{'))
        {
            let nested_open = find_code(src, mask, "{", entry.value_start).ok_or_else(|| {
                ArchitechError::msg(format!("malformed object value for key `{key}`"))
            })?;
            let nested_close = find_matching(src, mask, nested_open).ok_or_else(|| {
                ArchitechError::msg(format!("unbalanced object value for key `{key}`"))
            })?;
            collect_edits(src, mask, nested_open, nested_close, nested_patch, edits)?;
        } else {
            edits.push(Edit {
                start: entry.value_start,
                end: entry.value_end,
                text: js_value(patch_value),
            });
        }
    }

    if missing.is_empty() {
        return Ok(());
    }

    // splice new keys right after the last meaningful character before the
    // closing brace, so the literal's own layout survives
    let mut anchor = close;
    while anchor > open + 1 && src.as_bytes()[anchor - 1].is_ascii_whitespace() {
        anchor -= 1;
    }
    let last_byte = src.as_bytes()[anchor - 1];
    let multiline = src[open..=close].contains('\n');
    let entry_indent = if multiline {
        entries
            .first()
            .map(|e| line_indent(src, e.value_start))
            .unwrap_or_else(|| format!("{}  ", line_indent(src, open)))
    } else {
        String::new()
    };

    let mut text = String::new();
    if last_byte != b'{' && last_byte != b',' {
        text.push(',');
    }
    for (key, value) in &missing {
        if multiline {
            text.push('\n');
            text.push_str(&entry_indent);
        } else {
            text.push(' ');
        }
        text.push_str(&format!("{}: {},", js_key(key), js_value(value)));
    }
    if !multiline {
        // single-line literals keep no trailing comma
        text.pop();
        if last_byte == b'{' {
            text.push(' ');
        }
    }
    edits.push(Edit { start: anchor, end: anchor, text });
    Ok(())
}

fn line_indent(src: &str, at: usize) -> String {
    let line_start = src[..at].rfind('\n').map(|i| i + 1).unwrap_or(0);
    src[line_start..]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect()
}

/// Finds the opening brace of the exported config object, probing
/// `export default`, `module.exports =` and `export const <name> =`.
fn config_object_open(src: &str, mask: &[bool], export_name: &str) -> Result<usize> {
    let anchors = [
        Regex::new(r"export\s+default\s+"),
        Regex::new(r"module\.exports\s*=\s*"),
        Regex::new(&format!(r"export\s+const\s+{export_name}\s*(?::[^=]*?)?=\s*")),
    ];
    for anchor in anchors {
        let anchor = anchor.map_err(|e| ArchitechError::msg(e.to_string()))?;
        let Some(m) = anchor.find_iter(src).find(|m| is_code(mask, m.start())) else {
            continue;
        };
        // allow a call wrapper like `defineConfig({...})` between the anchor
        // and the literal
        let Some(open) = find_code(src, mask, "{", m.end()) else { continue };
        let between = &src[m.end()..open];
        let declares_body = {
            let t = between.trim_start();
            t.starts_with("function") || t.starts_with("class") || t.starts_with("async")
        };
        if !declares_body
            && between
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || "_$.()".contains(c))
        {
            return Ok(open);
        }
    }
    Err(ArchitechError::msg(
        "no exported configuration object found (export default / module.exports / export const)",
    ))
}

fn merge_config(current: &str, params: &Value, _ctx: &Value) -> Result<String> {
    let Some(Value::Object(patch)) = params.get("content") else {
        return Err(ArchitechError::msg("`content` must be an object"));
    };
    if patch.is_empty() {
        return Ok(current.to_string());
    }
    let export_name =
        params.get("exportName").and_then(Value::as_str).unwrap_or("config");
    let mask = code_mask(current);
    let open = config_object_open(current, &mask, export_name)?;
    let close = find_matching(current, &mask, open)
        .ok_or_else(|| ArchitechError::msg("unbalanced configuration object"))?;

    let mut edits = Vec::new();
    collect_edits(current, &mask, open, close, patch, &mut edits)?;
    edits.sort_by(|a, b| b.start.cmp(&a.start));

    let mut out = current.to_string();
    for edit in edits {
        out.replace_range(edit.start..edit.end, &edit.text);
    }
    Ok(out)
}

/// `js-config-merger` — deep-merges properties into the exported config
/// object, preserving surrounding formatting.
pub fn js_config_merger() -> Modifier {
    Modifier {
        name: "js-config-merger",
        description: "Deep-merge properties into an exported config object",
        extensions: &["ts", "js", "mjs", "cjs", "mts", "cts"],
        schema: ParamsSchema {
            fields: &const {
                [
                    ParamField::required("content", ParamKind::Object),
                    ParamField::optional("exportName", ParamKind::String),
                ]
            },
        },
        transform: merge_config,
    }
}
