//! CSS enhancer: `@import` lines and `:root` variables go to the top of the
//! sheet, rule blocks and utility classes to the bottom. Re-running with the
//! same params leaves the sheet untouched.

use super::{Modifier, ParamField, ParamKind, ParamsSchema};
use crate::error::Result;
use serde_json::Value;

fn import_line(spec: &str) -> String {
    let spec = spec.trim();
    if spec.starts_with("@import") {
        spec.to_string()
    } else {
        format!("@import \"{spec}\";")
    }
}

/// Inserts missing `--name: value;` declarations into the first `:root`
/// block, or returns a fresh block when the sheet has none.
fn merge_root_variables(content: &mut String, vars: &serde_json::Map<String, Value>) {
    let declarations: Vec<String> = vars
        .iter()
        .map(|(name, value)| {
            let name = name.strip_prefix("--").unwrap_or(name);
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("  --{name}: {value};")
        })
        .filter(|line| !content.contains(line.trim()))
        .collect();
    if declarations.is_empty() {
        return;
    }
    if let Some(start) = content.find(":root") {
        if let Some(open) = content[start..].find('{') {
            let insert_at = start + open + 1;
            let block = format!("\n{}", declarations.join("\n"));
            content.insert_str(insert_at, &block);
            return;
        }
    }
    // a fresh block still has to sit below any @import lines
    let mut at = 0;
    while let Some(line_end) = content[at..].find('\n').map(|i| at + i + 1) {
        let line = content[at..line_end].trim();
        if line.is_empty() || line.starts_with("@import") {
            at = line_end;
        } else {
            break;
        }
    }
    let block = format!(":root {{\n{}\n}}\n\n", declarations.join("\n"));
    content.insert_str(at, &block);
}

fn str_items(params: &Value, field: &str) -> Vec<String> {
    params
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items.iter().filter_map(Value::as_str).map(str::to_string).collect()
        })
        .unwrap_or_default()
}

/// `css-enhancer` — prepends imports and root variables, appends rules and
/// utility classes.
pub fn css_enhancer() -> Modifier {
    Modifier {
        name: "css-enhancer",
        description: "Add imports, root variables, rules and utilities to a stylesheet",
        extensions: &["css"],
        schema: ParamsSchema {
            fields: &const {
                [
                    ParamField::optional("imports", ParamKind::Array),
                    ParamField::optional("variables", ParamKind::Object),
                    ParamField::optional("rules", ParamKind::Array),
                    ParamField::optional("utilities", ParamKind::Array),
                ]
            },
        },
        transform: |current, params, _ctx| transform(current, params),
    }
}

fn transform(current: &str, params: &Value) -> Result<String> {
    let mut content = current.to_string();

    let imports: Vec<String> = str_items(params, "imports")
        .iter()
        .map(|spec| import_line(spec))
        .filter(|line| !content.contains(line.as_str()))
        .collect();
    if !imports.is_empty() {
        let mut prefix = imports.join("\n");
        prefix.push('\n');
        if !content.is_empty() && !content.starts_with('\n') {
            prefix.push('\n');
        }
        content.insert_str(0, &prefix);
    }

    if let Some(Value::Object(vars)) = params.get("variables") {
        merge_root_variables(&mut content, vars);
    }

    for field in ["rules", "utilities"] {
        for block in str_items(params, field) {
            let trimmed = block.trim();
            if trimmed.is_empty() || content.contains(trimmed) {
                continue;
            }
            if !content.is_empty() && !content.ends_with("\n\n") {
                if !content.ends_with('\n') {
                    content.push('\n');
                }
                content.push('\n');
            }
            content.push_str(trimmed);
            content.push('\n');
        }
    }

    Ok(content)
}
