//! JS/TS source transforms.
//!
//! These operate on the structural scanner in [`scanner`]: a code mask plus
//! balanced-delimiter matching gives every guarantee the transforms need —
//! duplicate-free import insertion, top-level appends, wrapping the default
//! export, and merging into an exported config object — without dragging a
//! JS toolchain into the build.

use super::{Modifier, ParamField, ParamKind, ParamsSchema};
use crate::error::{ArchitechError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

mod config;
pub mod scanner;
mod wrap;

pub use config::js_config_merger;
pub use wrap::{js_export_wrapper, jsx_children_wrapper};

use scanner::{code_mask, is_code, preferred_quote, prologue_end};

/// `import <clause> from '<specifier>'`
static RE_IMPORT_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\s+(type\s+)?([^'";]+?)\s+from\s*["']([^"']+)["']\s*;?"#).unwrap()
});

/// Bare side-effect form: `import '<specifier>'`
static RE_IMPORT_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bimport\s*["']([^"']+)["']\s*;?"#).unwrap());

/// Leading declaration keyword + name, used to skip re-declaring.
static RE_DECL_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:export\s+)?(?:declare\s+)?(?:default\s+)?(?:abstract\s+)?(?:async\s+)?(?:function\*?|const|let|var|class|interface|type|enum)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
    .unwrap()
});

/// One import a caller wants present in the file.
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub from: String,
    pub default: Option<String>,
    pub namespace: Option<String>,
    pub named: Vec<String>,
    pub type_only: bool,
    pub side_effect: bool,
}

impl ImportRequest {
    pub fn named(name: impl Into<String>, from: impl Into<String>) -> Self {
        Self { from: from.into(), named: vec![name.into()], ..Default::default() }
    }

    pub fn default_import(name: impl Into<String>, from: impl Into<String>) -> Self {
        Self { from: from.into(), default: Some(name.into()), ..Default::default() }
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(spec) => {
                Ok(Self { from: spec.clone(), side_effect: true, ..Default::default() })
            }
            Value::Object(map) => {
                let from = map
                    .get("from")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ArchitechError::msg("import entry is missing `from`"))?
                    .to_string();
                let named: Vec<String> = map
                    .get("named")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items.iter().filter_map(Value::as_str).map(str::to_string).collect()
                    })
                    .unwrap_or_default();
                let default =
                    map.get("default").and_then(Value::as_str).map(str::to_string);
                let namespace =
                    map.get("namespace").and_then(Value::as_str).map(str::to_string);
                let type_only =
                    map.get("typeOnly").and_then(Value::as_bool).unwrap_or(false);
                let side_effect =
                    default.is_none() && namespace.is_none() && named.is_empty();
                Ok(Self { from, default, namespace, named, type_only, side_effect })
            }
            _ => Err(ArchitechError::msg("import entry must be a string or an object")),
        }
    }
}

/// An import statement found in the source, with its byte span.
#[derive(Debug, Clone)]
struct ParsedImport {
    start: usize,
    end: usize,
    specifier: String,
    default: Option<String>,
    namespace: Option<String>,
    named: Vec<String>,
    type_only: bool,
    side_effect: bool,
}

fn parse_clause(clause: &str) -> (Option<String>, Option<String>, Vec<String>) {
    let mut default = None;
    let mut namespace = None;
    let mut named = Vec::new();
    let mut rest = clause.trim();
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('{') {
            let inner_end = stripped.find('}').unwrap_or(stripped.len());
            named.extend(
                stripped[..inner_end]
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
            rest = stripped[inner_end..].trim_start_matches('}').trim();
        } else if let Some(stripped) = rest.strip_prefix('*') {
            let after_as = stripped.trim().trim_start_matches("as").trim();
            let name: String = after_as
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
                .collect();
            if !name.is_empty() {
                namespace = Some(name.clone());
            }
            rest = after_as[name.len()..].trim();
        } else {
            let name: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
                .collect();
            if name.is_empty() {
                break;
            }
            default = Some(name.clone());
            rest = rest[name.len()..].trim();
        }
        rest = rest.trim_start_matches(',').trim();
    }
    (default, namespace, named)
}

fn parse_imports(src: &str, mask: &[bool]) -> Vec<ParsedImport> {
    let mut imports = Vec::new();
    for caps in RE_IMPORT_CLAUSE.captures_iter(src) {
        let Some(m) = caps.get(0) else { continue };
        if !is_code(mask, m.start()) {
            continue;
        }
        let (default, namespace, named) = parse_clause(&caps[2]);
        imports.push(ParsedImport {
            start: m.start(),
            end: m.end(),
            specifier: caps[3].to_string(),
            default,
            namespace,
            named,
            type_only: caps.get(1).is_some(),
            side_effect: false,
        });
    }
    for caps in RE_IMPORT_BARE.captures_iter(src) {
        let Some(m) = caps.get(0) else { continue };
        if !is_code(mask, m.start()) {
            continue;
        }
        // skip spans already claimed by a full clause
        if imports.iter().any(|i| m.start() >= i.start && m.start() < i.end) {
            continue;
        }
        imports.push(ParsedImport {
            start: m.start(),
            end: m.end(),
            specifier: caps[1].to_string(),
            default: None,
            namespace: None,
            named: Vec::new(),
            type_only: false,
            side_effect: true,
        });
    }
    imports.sort_by_key(|i| i.start);
    imports
}

fn render_import(
    type_only: bool,
    default: &Option<String>,
    namespace: &Option<String>,
    named: &[String],
    specifier: &str,
    quote: char,
) -> String {
    let mut parts = Vec::new();
    if let Some(d) = default {
        parts.push(d.clone());
    }
    if let Some(ns) = namespace {
        parts.push(format!("* as {ns}"));
    }
    if !named.is_empty() {
        parts.push(format!("{{ {} }}", named.join(", ")));
    }
    let type_kw = if type_only { "type " } else { "" };
    format!("import {type_kw}{} from {quote}{specifier}{quote};", parts.join(", "))
}

/// Offset at which a new import statement should be inserted: after the last
/// existing import's line, or after the directive prologue.
fn import_insertion_point(src: &str, mask: &[bool], imports: &[ParsedImport]) -> usize {
    match imports.last() {
        Some(last) => src[last.end..]
            .find('\n')
            .map(|i| last.end + i + 1)
            .unwrap_or(src.len()),
        None => prologue_end(src, mask),
    }
}

fn named_name(entry: &str) -> &str {
    entry.split_whitespace().next().unwrap_or(entry)
}

/// Ensures a single import is present, merging into an existing statement
/// for the same specifier where the grammar allows.
fn add_import(src: &str, req: &ImportRequest) -> Result<String> {
    let mask = code_mask(src);
    let imports = parse_imports(src, &mask);
    let quote = preferred_quote(src);

    if req.side_effect {
        if imports.iter().any(|i| i.specifier == req.from) {
            return Ok(src.to_string());
        }
        let at = import_insertion_point(src, &mask, &imports);
        let mut out = src.to_string();
        out.insert_str(at, &format!("import {quote}{}{quote};\n", req.from));
        return Ok(out);
    }

    if let Some(existing) = imports
        .iter()
        .find(|i| i.specifier == req.from && i.type_only == req.type_only && !i.side_effect)
    {
        let mut default = existing.default.clone();
        let mut namespace = existing.namespace.clone();
        let mut named = existing.named.clone();
        let mut leftover_named = Vec::new();
        let mut leftover_namespace = None;
        let mut changed = false;

        if let Some(d) = &req.default {
            if default.is_none() {
                default = Some(d.clone());
                changed = true;
            }
        }
        for entry in &req.named {
            if named.iter().any(|n| named_name(n) == named_name(entry)) {
                continue;
            }
            if namespace.is_some() {
                // `* as ns` and `{ .. }` cannot share a statement
                leftover_named.push(entry.clone());
            } else {
                named.push(entry.clone());
                changed = true;
            }
        }
        if let Some(ns) = &req.namespace {
            if namespace.as_deref() != Some(ns.as_str()) {
                if namespace.is_none() && named.is_empty() {
                    namespace = Some(ns.clone());
                    changed = true;
                } else {
                    leftover_namespace = Some(ns.clone());
                }
            }
        }

        let mut out = src.to_string();
        if changed {
            let rendered = render_import(
                existing.type_only,
                &default,
                &namespace,
                &named,
                &existing.specifier,
                quote,
            );
            out.replace_range(existing.start..existing.end, &rendered);
        }
        if !leftover_named.is_empty() || leftover_namespace.is_some() {
            let extra = ImportRequest {
                from: req.from.clone(),
                default: None,
                namespace: leftover_namespace,
                named: leftover_named,
                type_only: req.type_only,
                side_effect: false,
            };
            // recompute spans against the rewritten source
            let mask = code_mask(&out);
            let imports = parse_imports(&out, &mask);
            let at = import_insertion_point(&out, &mask, &imports);
            let rendered = render_import(
                extra.type_only,
                &extra.default,
                &extra.namespace,
                &extra.named,
                &extra.from,
                quote,
            );
            out.insert_str(at, &format!("{rendered}\n"));
        }
        return Ok(out);
    }

    let at = import_insertion_point(src, &mask, &imports);
    let rendered =
        render_import(req.type_only, &req.default, &req.namespace, &req.named, &req.from, quote);
    let mut out = src.to_string();
    let suffix = if imports.is_empty() && !src[at..].starts_with('\n') && !src[at..].is_empty() {
        format!("{rendered}\n\n")
    } else {
        format!("{rendered}\n")
    };
    out.insert_str(at, &suffix);
    Ok(out)
}

/// Ensures every requested import is present. Exposed within the modifier
/// family; the wrapper modifiers use it for their own imports.
pub(crate) fn add_imports(src: &str, requests: &[ImportRequest]) -> Result<String> {
    let mut out = src.to_string();
    for req in requests {
        out = add_import(&out, req)?;
    }
    Ok(out)
}

fn declared_names(src: &str, mask: &[bool]) -> HashSet<String> {
    RE_DECL_NAME
        .captures_iter(src)
        .filter(|caps| is_code(mask, caps.get(0).map(|m| m.start()).unwrap_or(0)))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn enhance_module(current: &str, params: &Value, _ctx: &Value) -> Result<String> {
    let mut src = current.to_string();

    if let Some(entries) = params.get("imports").and_then(Value::as_array) {
        let requests = entries
            .iter()
            .map(ImportRequest::from_value)
            .collect::<Result<Vec<_>>>()?;
        src = add_imports(&src, &requests)?;
    }

    if let Some(statements) = params.get("statements").and_then(Value::as_array) {
        for stmt in statements.iter().filter_map(Value::as_str) {
            let trimmed = stmt.trim();
            if trimmed.is_empty() || src.contains(trimmed) {
                continue;
            }
            let mask = code_mask(&src);
            let imports = parse_imports(&src, &mask);
            let at = import_insertion_point(&src, &mask, &imports);
            src.insert_str(at, &format!("{trimmed}\n"));
        }
    }

    if let Some(declarations) = params.get("declarations").and_then(Value::as_array) {
        for decl in declarations.iter().filter_map(Value::as_str) {
            let trimmed = decl.trim();
            if trimmed.is_empty() || src.contains(trimmed) {
                continue;
            }
            let mask = code_mask(&src);
            if let Some(name) =
                RE_DECL_NAME.captures(trimmed).and_then(|c| c.get(1)).map(|m| m.as_str())
            {
                if declared_names(&src, &mask).contains(name) {
                    trace!(name, "declaration already present, skipping");
                    continue;
                }
            }
            if !src.is_empty() && !src.ends_with('\n') {
                src.push('\n');
            }
            if !src.is_empty() && !src.ends_with("\n\n") {
                src.push('\n');
            }
            src.push_str(trimmed);
            src.push('\n');
        }
    }

    Ok(src)
}

/// `ts-module-enhancer` — imports without duplicates, appended top-level
/// declarations, prepended raw statements.
pub fn ts_module_enhancer() -> Modifier {
    Modifier {
        name: "ts-module-enhancer",
        description: "Add imports, declarations and statements to a TS/JS module",
        extensions: &["ts", "tsx", "js", "jsx", "mts", "cts", "mjs", "cjs"],
        schema: ParamsSchema {
            fields: &const {
                [
                    ParamField::optional("imports", ParamKind::Array),
                    ParamField::optional("declarations", ParamKind::Array),
                    ParamField::optional("statements", ParamKind::Array),
                ]
            },
        },
        transform: enhance_module,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run(current: &str, params: Value) -> String {
        enhance_module(current, &params, &Value::Null).unwrap()
    }

    #[test]
    fn adds_named_import_to_empty_module() {
        let out = run(
            "export const a = 1;\n",
            json!({"imports": [{"from": "react", "named": ["useState"]}]}),
        );
        assert!(out.starts_with("import { useState } from 'react';\n"));
        assert!(out.contains("export const a = 1;"));
    }

    #[test]
    fn merges_named_into_existing_import() {
        let src = "import { useState } from 'react';\n\nexport const a = 1;\n";
        let out = run(src, json!({"imports": [{"from": "react", "named": ["useEffect"]}]}));
        assert!(out.contains("import { useState, useEffect } from 'react';"));
        assert_eq!(out.matches("from 'react'").count(), 1);
    }

    #[test]
    fn adding_present_import_is_a_noop() {
        let src = "import { useState } from 'react';\n\nexport const a = 1;\n";
        let out = run(src, json!({"imports": [{"from": "react", "named": ["useState"]}]}));
        assert_eq!(out, src);
    }

    #[test]
    fn default_and_named_share_a_statement() {
        let src = "import React from 'react';\n";
        let out = run(src, json!({"imports": [{"from": "react", "named": ["useState"]}]}));
        assert!(out.contains("import React, { useState } from 'react';"));
    }

    #[test]
    fn namespace_conflict_gets_its_own_statement() {
        let src = "import * as path from 'node:path';\n";
        let out = run(src, json!({"imports": [{"from": "node:path", "named": ["join"]}]}));
        assert!(out.contains("import * as path from 'node:path';"));
        assert!(out.contains("import { join } from 'node:path';"));
    }

    #[test]
    fn type_only_import_is_separate() {
        let src = "import { useState } from 'react';\n";
        let out = run(
            src,
            json!({"imports": [{"from": "react", "named": ["ReactNode"], "typeOnly": true}]}),
        );
        assert!(out.contains("import type { ReactNode } from 'react';"));
        assert!(out.contains("import { useState } from 'react';"));
    }

    #[test]
    fn side_effect_import_string_shorthand() {
        let out = run("const a = 1;\n", json!({"imports": ["./globals.css"]}));
        assert!(out.starts_with("import './globals.css';\n"));
        let again = run(&out, json!({"imports": ["./globals.css"]}));
        assert_eq!(out, again);
    }

    #[test]
    fn imports_go_after_use_client_directive() {
        let src = "'use client';\n\nexport const a = 1;\n";
        let out = run(src, json!({"imports": [{"from": "react", "default": "React"}]}));
        let directive = out.find("'use client';").unwrap();
        let import = out.find("import React").unwrap();
        assert!(directive < import);
        assert!(import < out.find("export const a").unwrap());
    }

    #[test]
    fn commented_import_does_not_count() {
        let src = "// import { useState } from 'react';\nexport const a = 1;\n";
        let out = run(src, json!({"imports": [{"from": "react", "named": ["useState"]}]}));
        assert!(out.contains("\nimport { useState } from 'react';"));
    }

    #[test]
    fn declarations_append_once() {
        let params = json!({"declarations": ["export function helper() {\n  return 1;\n}"]});
        let src = "const a = 1;\n";
        let once = run(src, params.clone());
        assert!(once.ends_with("export function helper() {\n  return 1;\n}\n"));
        let twice = run(&once, params);
        assert_eq!(once, twice);
    }

    #[test]
    fn declaration_skipped_when_name_already_declared() {
        let src = "function helper(x) { return x; }\n";
        let out = run(src, json!({"declarations": ["export const helper = () => 2;"]}));
        assert_eq!(out, src);
    }

    #[test]
    fn statements_prepend_after_imports() {
        let src = "import a from 'a';\n\nconst x = 1;\n";
        let out = run(src, json!({"statements": ["initTelemetry();"]}));
        let import_at = out.find("import a").unwrap();
        let stmt_at = out.find("initTelemetry();").unwrap();
        let decl_at = out.find("const x").unwrap();
        assert!(import_at < stmt_at && stmt_at < decl_at);
    }

    #[test]
    fn respects_double_quote_style() {
        let src = "import a from \"a\";\n";
        let out = run(src, json!({"imports": [{"from": "b", "default": "b"}]}));
        assert!(out.contains("import b from \"b\";"));
    }
}
