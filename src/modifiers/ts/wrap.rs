//! Wrapping transforms: the default-export HOF wrapper and the JSX
//! `{children}` provider wrapper.

use super::{
    add_imports,
    scanner::{code_mask, find_code, find_matching, is_code},
    ImportRequest, Modifier, ParamField, ParamKind, ParamsSchema,
};
use crate::error::{ArchitechError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static RE_EXPORT_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bexport\s+default\s+").unwrap());
static RE_MODULE_EXPORTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bmodule\.exports\s*=\s*").unwrap());
static RE_CHILDREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\s*children\s*\}").unwrap());

fn code_match(src: &str, mask: &[bool], re: &Regex) -> Option<(usize, usize)> {
    re.find_iter(src).find(|m| is_code(mask, m.start())).map(|m| (m.start(), m.end()))
}

/// End of the expression starting at `start`: the first `;` at delimiter
/// depth zero, or the end of the source.
fn expression_end(src: &str, mask: &[bool], start: usize) -> usize {
    let bytes = src.as_bytes();
    let mut depth = 0i32;
    for i in start..bytes.len() {
        if !is_code(mask, i) {
            continue;
        }
        match bytes[i] {
            b'{' | b'(' | b'[' => depth += 1,
            b'}' | b')' | b']' => depth -= 1,
            b';' if depth == 0 => return i,
            _ => {}
        }
    }
    src.len()
}

/// Locates the span of the value exported as default (or assigned to
/// `module.exports`).
fn default_export_span(src: &str, mask: &[bool]) -> Result<(usize, usize)> {
    let anchor = code_match(src, mask, &RE_EXPORT_DEFAULT)
        .or_else(|| code_match(src, mask, &RE_MODULE_EXPORTS))
        .ok_or_else(|| {
            ArchitechError::msg("no default export or module.exports assignment to wrap")
        })?;
    let expr_start = anchor.1;
    let rest = src[expr_start..].trim_start();
    let offset = expr_start + (src[expr_start..].len() - rest.len());
    // function and class declarations end at their body's closing brace
    if rest.starts_with("function")
        || rest.starts_with("async function")
        || rest.starts_with("class")
    {
        let open = find_code(src, mask, "{", offset)
            .ok_or_else(|| ArchitechError::msg("declaration body not found"))?;
        let close = find_matching(src, mask, open)
            .ok_or_else(|| ArchitechError::msg("unbalanced declaration body"))?;
        return Ok((offset, close + 1));
    }
    let mut end = expression_end(src, mask, offset);
    while end > offset && src.as_bytes()[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    Ok((offset, end))
}

fn wrap_export(current: &str, params: &Value, _ctx: &Value) -> Result<String> {
    let wrapper = params
        .get("wrapper")
        .and_then(Value::as_str)
        .ok_or_else(|| ArchitechError::msg("`wrapper` must be a string"))?;
    let mask = code_mask(current);
    let (start, end) = default_export_span(current, &mask)?;
    let expr = current[start..end].trim();

    let mut out = current.to_string();
    let already = expr
        .strip_prefix(wrapper)
        .map(|rest| rest.trim_start().starts_with('('))
        .unwrap_or(false);
    if !already {
        out.replace_range(start..end, &format!("{wrapper}({expr})"));
    }

    if let Some(from) = params.get("importFrom").and_then(Value::as_str) {
        let import_default =
            params.get("importDefault").and_then(Value::as_bool).unwrap_or(false);
        let request = if import_default {
            ImportRequest::default_import(wrapper, from)
        } else {
            ImportRequest::named(wrapper, from)
        };
        out = add_imports(&out, &[request])?;
    }
    Ok(out)
}

/// `js-export-wrapper` — wraps the default export in a named higher-order
/// function and imports it.
pub fn js_export_wrapper() -> Modifier {
    Modifier {
        name: "js-export-wrapper",
        description: "Wrap the default export (or module.exports) in a higher-order function",
        extensions: &["ts", "tsx", "js", "jsx", "mjs", "cjs"],
        schema: ParamsSchema {
            fields: &const {
                [
                    ParamField::required("wrapper", ParamKind::String),
                    ParamField::optional("importFrom", ParamKind::String),
                    ParamField::optional("importDefault", ParamKind::Bool),
                ]
            },
        },
        transform: wrap_export,
    }
}

struct Provider {
    component: String,
    attrs: String,
    import: Option<ImportRequest>,
}

fn render_attr(key: &str, value: &Value) -> String {
    match value {
        Value::String(s) => format!(" {key}=\"{s}\""),
        Value::Bool(true) => format!(" {key}"),
        other => format!(" {key}={{{other}}}"),
    }
}

fn parse_providers(params: &Value) -> Result<Vec<Provider>> {
    let entries = params
        .get("providers")
        .and_then(Value::as_array)
        .ok_or_else(|| ArchitechError::msg("`providers` must be an array"))?;
    let mut providers = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(map) = entry.as_object() else {
            return Err(ArchitechError::msg("provider entries must be objects"));
        };
        let component = map
            .get("component")
            .and_then(Value::as_str)
            .ok_or_else(|| ArchitechError::msg("provider entry is missing `component`"))?
            .to_string();
        let attrs = map
            .get("props")
            .and_then(Value::as_object)
            .map(|props| props.iter().map(|(k, v)| render_attr(k, v)).collect::<String>())
            .unwrap_or_default();
        let import = map.get("importFrom").and_then(Value::as_str).map(|from| {
            // providers are usually named exports; `importDefault` opts out
            if map.get("importDefault").and_then(Value::as_bool).unwrap_or(false) {
                ImportRequest::default_import(root_component(&component), from)
            } else {
                ImportRequest::named(root_component(&component), from)
            }
        });
        providers.push(Provider { component, attrs, import });
    }
    Ok(providers)
}

/// `Namespace.Member` components import the namespace root.
fn root_component(component: &str) -> &str {
    component.split('.').next().unwrap_or(component)
}

/// Picks the `{children}` occurrence to wrap: the one inside the target
/// element when one is named, otherwise the first in the file.
fn children_position(
    src: &str,
    mask: &[bool],
    element: Option<&str>,
) -> Result<(usize, usize)> {
    let all: Vec<(usize, usize)> = RE_CHILDREN
        .find_iter(src)
        .filter(|m| is_code(mask, m.start()))
        .map(|m| (m.start(), m.end()))
        .collect();
    if all.is_empty() {
        return Err(ArchitechError::msg("no {children} expression found"));
    }
    // a destructured `({ children })` parameter matches the same pattern;
    // prefer occurrences sitting directly inside element content
    let in_jsx: Vec<(usize, usize)> = all
        .iter()
        .copied()
        .filter(|(start, _)| src[..*start].trim_end().ends_with('>'))
        .collect();
    let candidates = if in_jsx.is_empty() { all } else { in_jsx };
    let Some(element) = element else {
        return Ok(candidates[0]);
    };
    let open = find_code(src, mask, &format!("<{element}"), 0)
        .ok_or_else(|| ArchitechError::msg(format!("element <{element}> not found")))?;
    let close = find_code(src, mask, &format!("</{element}>"), open).unwrap_or(src.len());
    candidates
        .into_iter()
        .find(|(start, _)| *start > open && *start < close)
        .ok_or_else(|| {
            ArchitechError::msg(format!("no {{children}} inside <{element}>"))
        })
}

fn wrap_children(current: &str, params: &Value, _ctx: &Value) -> Result<String> {
    let providers = parse_providers(params)?;
    let element = params.get("element").and_then(Value::as_str);

    let mask = code_mask(current);
    let pending: Vec<&Provider> = providers
        .iter()
        .filter(|p| find_code(current, &mask, &format!("<{}", p.component), 0).is_none())
        .collect();
    if pending.is_empty() {
        return Ok(current.to_string());
    }

    let (start, end) = children_position(current, &mask, element)?;
    let token = &current[start..end];
    let line_start = current[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let base_indent: String = current[line_start..start]
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect();

    let mut wrapped = String::new();
    for (i, provider) in pending.iter().enumerate() {
        if i > 0 {
            wrapped.push_str(&base_indent);
            wrapped.push_str(&"  ".repeat(i));
        }
        wrapped.push_str(&format!("<{}{}>\n", provider.component, provider.attrs));
    }
    wrapped.push_str(&base_indent);
    wrapped.push_str(&"  ".repeat(pending.len()));
    wrapped.push_str(token);
    wrapped.push('\n');
    for (i, provider) in pending.iter().enumerate().rev() {
        wrapped.push_str(&base_indent);
        wrapped.push_str(&"  ".repeat(i));
        wrapped.push_str(&format!("</{}>", provider.component));
        if i > 0 {
            wrapped.push('\n');
        }
    }

    let mut out = current.to_string();
    out.replace_range(start..end, &wrapped);

    let imports: Vec<ImportRequest> =
        pending.iter().filter_map(|p| p.import.clone()).collect();
    if !imports.is_empty() {
        out = add_imports(&out, &imports)?;
    }
    Ok(out)
}

/// `jsx-children-wrapper` — nests provider components around `{children}`.
pub fn jsx_children_wrapper() -> Modifier {
    Modifier {
        name: "jsx-children-wrapper",
        description: "Wrap {children} in one or more provider components",
        extensions: &["tsx", "jsx"],
        schema: ParamsSchema {
            fields: &const {
                [
                    ParamField::required("providers", ParamKind::Array),
                    ParamField::optional("element", ParamKind::String),
                ]
            },
        },
        transform: wrap_children,
    }
}
