//! Action handlers: one per blueprint action variant.
//!
//! Handlers mutate only the VFS. Templates in paths, content, params and
//! commands are expanded against the project context before use. Every
//! failure is wrapped as [`ArchitechError::ActionFailed`] with the action
//! tag, except the command surface which keeps its own error kinds.

use crate::{
    blueprint::{Action, FallbackPolicy, PackageSpec},
    error::{ArchitechError, Result},
    marketplace::Marketplace,
    modifiers::ModifierRegistry,
    runner::{CommandRunner, ExecOptions},
    template,
    utils::ALTERNATIVE_EXTENSIONS,
    vfs::Vfs,
};
use serde_json::Value;
use std::{path::Path, time::Duration};

pub const PACKAGE_MANIFEST: &str = "package.json";

/// Everything a handler needs, shared for the duration of one module.
pub struct ActionContext<'a> {
    pub module_id: &'a str,
    /// Project context for `{{..}}` template expansion.
    pub template_ctx: &'a Value,
    pub marketplace: &'a dyn Marketplace,
    pub registry: &'a ModifierRegistry,
    pub runner: &'a dyn CommandRunner,
    pub project_root: &'a Path,
    pub default_timeout: Duration,
    pub skip_install: bool,
}

#[derive(Debug, Default)]
pub struct ActionOutcome {
    /// Project-relative files this action touched.
    pub files: Vec<String>,
    pub message: Option<String>,
}

impl ActionOutcome {
    fn touched(path: String) -> Self {
        Self { files: vec![path], message: None }
    }

    fn skipped(message: String) -> Self {
        Self { files: Vec::new(), message: Some(message) }
    }
}

/// Dispatches one action to its handler.
pub fn handle(action: &Action, ctx: &ActionContext<'_>, vfs: &Vfs) -> Result<ActionOutcome> {
    let kind = action.kind();
    trace!(module = ctx.module_id, action = kind, "handling action");
    dispatch(action, ctx, vfs).map_err(|err| match err {
        // the command surface keeps its own kinds; everything else wraps
        err @ (ArchitechError::CommandFailed { .. }
        | ArchitechError::CommandTimeout { .. }
        | ArchitechError::Cancelled) => err,
        other => other.into_action_failure(kind),
    })
}

fn dispatch(action: &Action, ctx: &ActionContext<'_>, vfs: &Vfs) -> Result<ActionOutcome> {
    match action {
        Action::CreateFile { path, content, template, overwrite } => {
            create_file(ctx, vfs, path, content.as_deref(), template.as_deref(), *overwrite)
        }
        Action::EnhanceFile { path, modifier, params, fallback } => {
            enhance_file(ctx, vfs, path, modifier, params, *fallback)
        }
        Action::InstallPackages { packages, dev } => {
            install_packages(ctx, vfs, packages, *dev)
        }
        Action::AddScript { name, command } => add_script(ctx, vfs, name, command),
        Action::RunCommand { command, working_dir, timeout_secs } => {
            run_command(ctx, command, working_dir.as_deref(), *timeout_secs)
        }
    }
}

fn create_file(
    ctx: &ActionContext<'_>,
    vfs: &Vfs,
    path: &str,
    content: Option<&str>,
    template_name: Option<&str>,
    overwrite: bool,
) -> Result<ActionOutcome> {
    let path = template::render_owned(path, ctx.template_ctx);
    let body = match (content, template_name) {
        (Some(inline), _) => inline.to_string(),
        (None, Some(name)) => ctx.marketplace.load_template(ctx.module_id, name)?,
        (None, None) => {
            return Err(ArchitechError::msg(format!(
                "create-file `{path}` has neither content nor a template"
            )))
        }
    };
    let rendered = template::render_owned(&body, ctx.template_ctx);
    if overwrite {
        vfs.overwrite(&path, rendered)?;
    } else {
        vfs.create(&path, rendered)?;
    }
    Ok(ActionOutcome::touched(path))
}

/// Probes the fixed alternative-extension set for a sibling that exists.
fn alternative_extension(vfs: &Vfs, path: &str) -> Option<String> {
    let (stem, current_ext) = path.rsplit_once('.')?;
    ALTERNATIVE_EXTENSIONS
        .iter()
        .filter(|ext| **ext != current_ext)
        .map(|ext| format!("{stem}.{ext}"))
        .find(|candidate| vfs.exists(candidate))
}

fn enhance_file(
    ctx: &ActionContext<'_>,
    vfs: &Vfs,
    path: &str,
    modifier_name: &str,
    params: &Value,
    fallback: FallbackPolicy,
) -> Result<ActionOutcome> {
    let rendered = template::render_owned(path, ctx.template_ctx);
    let mut target = rendered.clone();

    if !vfs.exists(&target) {
        match fallback {
            FallbackPolicy::Skip => {
                debug!(path = %target, "enhance target missing, skipping");
                return Ok(ActionOutcome::skipped(format!("`{target}` missing, skipped")));
            }
            FallbackPolicy::CreateEmpty => {
                let empty = if target.ends_with(".json") { "{}" } else { "" };
                vfs.overwrite(&target, empty)?;
            }
            FallbackPolicy::UseAlternativeExtension => {
                match alternative_extension(vfs, &target) {
                    Some(alternative) => {
                        debug!(from = %target, to = %alternative, "using alternative extension");
                        target = alternative;
                    }
                    None => {
                        return Ok(ActionOutcome::skipped(format!(
                            "`{target}` missing and no sibling extension exists, skipped"
                        )))
                    }
                }
            }
        }
    }

    let modifier = ctx.registry.get(modifier_name)?;
    let params = render_value_templates(params, ctx.template_ctx);
    let outcome = modifier.execute(&target, &params, ctx.template_ctx, vfs)?;
    Ok(ActionOutcome { files: vec![target], message: outcome.message })
}

fn ensure_manifest(vfs: &Vfs) -> Result<()> {
    if !vfs.exists(PACKAGE_MANIFEST) {
        vfs.overwrite(PACKAGE_MANIFEST, "{}")?;
    }
    Ok(())
}

fn install_packages(
    ctx: &ActionContext<'_>,
    vfs: &Vfs,
    packages: &[String],
    dev: bool,
) -> Result<ActionOutcome> {
    let mut section = serde_json::Map::new();
    for token in packages {
        let token = template::render_owned(token, ctx.template_ctx);
        let spec = PackageSpec::parse(&token)?;
        section.insert(spec.name, Value::String(spec.version));
    }
    let field = if dev { "devDependencies" } else { "dependencies" };
    let mut params = serde_json::Map::new();
    params.insert(field.to_string(), Value::Object(section));
    let params = Value::Object(params);

    ensure_manifest(vfs)?;
    let merger = ctx.registry.get("package-json-merger")?;
    merger.execute(PACKAGE_MANIFEST, &params, ctx.template_ctx, vfs)?;
    Ok(ActionOutcome {
        files: vec![PACKAGE_MANIFEST.to_string()],
        message: Some(format!("recorded {} {field}", packages.len())),
    })
}

fn add_script(
    ctx: &ActionContext<'_>,
    vfs: &Vfs,
    name: &str,
    command: &str,
) -> Result<ActionOutcome> {
    let name = template::render_owned(name, ctx.template_ctx);
    let command = template::render_owned(command, ctx.template_ctx);
    let mut scripts = serde_json::Map::new();
    scripts.insert(name, Value::String(command));
    let mut params = serde_json::Map::new();
    params.insert("scripts".to_string(), Value::Object(scripts));
    let params = Value::Object(params);

    ensure_manifest(vfs)?;
    let merger = ctx.registry.get("package-json-merger")?;
    merger.execute(PACKAGE_MANIFEST, &params, ctx.template_ctx, vfs)?;
    Ok(ActionOutcome::touched(PACKAGE_MANIFEST.to_string()))
}

fn run_command(
    ctx: &ActionContext<'_>,
    command: &str,
    working_dir: Option<&str>,
    timeout_secs: Option<u64>,
) -> Result<ActionOutcome> {
    let command = template::render_owned(command, ctx.template_ctx);
    if ctx.skip_install && is_install_command(&command) {
        debug!(command = %command, "skipInstall set, not running install command");
        return Ok(ActionOutcome::skipped(format!("`{command}` skipped (skipInstall)")));
    }
    let cwd = match working_dir {
        Some(dir) => {
            let dir = template::render_owned(dir, ctx.template_ctx);
            ctx.project_root.join(dir)
        }
        None => ctx.project_root.to_path_buf(),
    };
    let timeout = timeout_secs.map(Duration::from_secs).unwrap_or(ctx.default_timeout);
    let opts = ExecOptions { cwd, env: Vec::new(), timeout };
    let output = ctx.runner.exec(&command, &opts)?;
    if !output.success() {
        return Err(ArchitechError::CommandFailed {
            command,
            code: output.code,
            stderr: output.stderr,
        });
    }
    Ok(ActionOutcome { files: Vec::new(), message: Some(format!("`{command}` ok")) })
}

/// Heuristic for the `skipInstall` gate: the well-known package-manager
/// install invocations.
fn is_install_command(command: &str) -> bool {
    let trimmed = command.trim();
    ["npm install", "npm ci", "pnpm install", "yarn install", "yarn", "bun install"]
        .iter()
        .any(|prefix| trimmed == *prefix || trimmed.starts_with(&format!("{prefix} ")))
}

/// Walks a params bag and renders every string through the template
/// context, leaving structure untouched.
fn render_value_templates(value: &Value, ctx: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(template::render_owned(s, ctx)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| render_value_templates(item, ctx)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), render_value_templates(item, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ExecOutput;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    struct NullMarketplace;

    impl Marketplace for NullMarketplace {
        fn resolve_path_defaults(
            &self,
            _: &str,
        ) -> Result<std::collections::BTreeMap<String, String>> {
            Ok(Default::default())
        }
        fn load_path_keys(&self) -> Result<Vec<crate::marketplace::PathKeyDef>> {
            Ok(Vec::new())
        }
        fn load_module_config(&self, id: &str) -> Result<crate::module::ModuleManifest> {
            Err(ArchitechError::ModuleNotFound(id.to_string()))
        }
        fn load_blueprint(&self, id: &str) -> Result<crate::blueprint::Blueprint> {
            Err(ArchitechError::ModuleNotFound(id.to_string()))
        }
        fn load_template(&self, _: &str, name: &str) -> Result<String> {
            Ok(format!("template:{name} for {{{{project.name}}}}"))
        }
        fn load_recipe_books(&self) -> Result<Vec<crate::recipes::RecipeBook>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
        fail_with: Option<i32>,
    }

    impl CommandRunner for RecordingRunner {
        fn exec(&self, command: &str, _: &ExecOptions) -> Result<ExecOutput> {
            self.commands.lock().unwrap().push(command.to_string());
            match self.fail_with {
                Some(code) => {
                    Ok(ExecOutput { code, stdout: String::new(), stderr: "boom".into() })
                }
                None => Ok(ExecOutput::default()),
            }
        }
    }

    fn context<'a>(
        registry: &'a ModifierRegistry,
        runner: &'a RecordingRunner,
        marketplace: &'a NullMarketplace,
        template_ctx: &'a Value,
    ) -> ActionContext<'a> {
        ActionContext {
            module_id: "adapters/framework/nextjs",
            template_ctx,
            marketplace,
            registry,
            runner,
            project_root: Path::new("/tmp/project"),
            default_timeout: Duration::from_secs(300),
            skip_install: false,
        }
    }

    fn fixture() -> (ModifierRegistry, RecordingRunner, NullMarketplace, Value) {
        (
            ModifierRegistry::builtin(),
            RecordingRunner::default(),
            NullMarketplace,
            json!({"project": {"name": "hello"}, "paths": {"src": "src"}}),
        )
    }

    #[test]
    fn create_file_renders_path_and_content() {
        let (registry, runner, market, tctx) = fixture();
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        let action = Action::CreateFile {
            path: "{{paths.src}}/app.ts".into(),
            content: Some("// {{project.name}}\n".into()),
            template: None,
            overwrite: false,
        };
        let outcome = handle(&action, &ctx, &vfs).unwrap();
        assert_eq!(outcome.files, vec!["src/app.ts"]);
        assert_eq!(vfs.read("src/app.ts").unwrap(), "// hello\n");
    }

    #[test]
    fn create_file_refuses_overwrite_by_default() {
        let (registry, runner, market, tctx) = fixture();
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        vfs.overwrite("a.txt", "original").unwrap();
        let action = Action::CreateFile {
            path: "a.txt".into(),
            content: Some("clobber".into()),
            template: None,
            overwrite: false,
        };
        let err = handle(&action, &ctx, &vfs).unwrap_err();
        assert!(matches!(err, ArchitechError::ActionFailed { action: "create-file", .. }));
        assert_eq!(vfs.read("a.txt").unwrap(), "original");

        let action = Action::CreateFile {
            path: "a.txt".into(),
            content: Some("clobber".into()),
            template: None,
            overwrite: true,
        };
        handle(&action, &ctx, &vfs).unwrap();
        assert_eq!(vfs.read("a.txt").unwrap(), "clobber");
    }

    #[test]
    fn create_file_loads_marketplace_template() {
        let (registry, runner, market, tctx) = fixture();
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        let action = Action::CreateFile {
            path: "page.tsx".into(),
            content: None,
            template: Some("page.tsx".into()),
            overwrite: false,
        };
        handle(&action, &ctx, &vfs).unwrap();
        assert_eq!(vfs.read("page.tsx").unwrap(), "template:page.tsx for hello");
    }

    #[test]
    fn enhance_missing_file_skip_policy() {
        let (registry, runner, market, tctx) = fixture();
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        let action = Action::EnhanceFile {
            path: "missing.json".into(),
            modifier: "json-merger".into(),
            params: json!({"content": {"a": 1}}),
            fallback: FallbackPolicy::Skip,
        };
        let outcome = handle(&action, &ctx, &vfs).unwrap();
        assert!(outcome.files.is_empty());
        assert!(!vfs.exists("missing.json"));
    }

    #[test]
    fn enhance_missing_file_create_empty_policy() {
        let (registry, runner, market, tctx) = fixture();
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        let action = Action::EnhanceFile {
            path: "config.json".into(),
            modifier: "json-merger".into(),
            params: json!({"content": {"a": 1}}),
            fallback: FallbackPolicy::CreateEmpty,
        };
        let outcome = handle(&action, &ctx, &vfs).unwrap();
        assert_eq!(outcome.files, vec!["config.json"]);
        let merged: Value = serde_json::from_str(&vfs.read("config.json").unwrap()).unwrap();
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn enhance_falls_back_to_sibling_extension() {
        let (registry, runner, market, tctx) = fixture();
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        vfs.overwrite("next.config.js", "module.exports = {\n  poweredByHeader: false,\n};\n")
            .unwrap();
        let action = Action::EnhanceFile {
            path: "next.config.ts".into(),
            modifier: "js-config-merger".into(),
            params: json!({"content": {"reactStrictMode": true}}),
            fallback: FallbackPolicy::UseAlternativeExtension,
        };
        let outcome = handle(&action, &ctx, &vfs).unwrap();
        assert_eq!(outcome.files, vec!["next.config.js"]);
        assert!(vfs.read("next.config.js").unwrap().contains("reactStrictMode: true,"));
    }

    #[test]
    fn unknown_modifier_fails_the_action() {
        let (registry, runner, market, tctx) = fixture();
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        vfs.overwrite("x.json", "{}").unwrap();
        let action = Action::EnhanceFile {
            path: "x.json".into(),
            modifier: "nope".into(),
            params: json!({}),
            fallback: FallbackPolicy::Skip,
        };
        let err = handle(&action, &ctx, &vfs).unwrap_err();
        assert!(err.to_string().contains("enhance-file"));
    }

    #[test]
    fn install_packages_merges_dependency_sections() {
        let (registry, runner, market, tctx) = fixture();
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        let action = Action::InstallPackages {
            packages: vec!["react@18.2.0".into(), "@types/node@20.0.0".into()],
            dev: false,
        };
        handle(&action, &ctx, &vfs).unwrap();
        let action = Action::InstallPackages { packages: vec!["typescript".into()], dev: true };
        handle(&action, &ctx, &vfs).unwrap();

        let manifest: Value = serde_json::from_str(&vfs.read("package.json").unwrap()).unwrap();
        assert_eq!(manifest["dependencies"]["react"], "18.2.0");
        assert_eq!(manifest["dependencies"]["@types/node"], "20.0.0");
        assert_eq!(manifest["devDependencies"]["typescript"], "latest");
    }

    #[test]
    fn install_packages_is_idempotent() {
        let (registry, runner, market, tctx) = fixture();
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        let action = Action::InstallPackages { packages: vec!["react".into()], dev: false };
        handle(&action, &ctx, &vfs).unwrap();
        let first = vfs.read("package.json").unwrap();
        handle(&action, &ctx, &vfs).unwrap();
        assert_eq!(vfs.read("package.json").unwrap(), first);
    }

    #[test]
    fn add_script_records_rendered_command() {
        let (registry, runner, market, tctx) = fixture();
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        let action =
            Action::AddScript { name: "dev".into(), command: "next dev".into() };
        handle(&action, &ctx, &vfs).unwrap();
        let manifest: Value = serde_json::from_str(&vfs.read("package.json").unwrap()).unwrap();
        assert_eq!(manifest["scripts"]["dev"], "next dev");
    }

    #[test]
    fn run_command_goes_through_the_runner() {
        let (registry, runner, market, tctx) = fixture();
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        let action = Action::RunCommand {
            command: "git init {{project.name}}".into(),
            working_dir: None,
            timeout_secs: None,
        };
        handle(&action, &ctx, &vfs).unwrap();
        assert_eq!(runner.commands.lock().unwrap().as_slice(), ["git init hello"]);
    }

    #[test]
    fn failing_command_surfaces_code_and_stderr() {
        let (registry, _, market, tctx) = fixture();
        let runner = RecordingRunner { fail_with: Some(2), ..Default::default() };
        let ctx = context(&registry, &runner, &market, &tctx);
        let vfs = Vfs::new("/tmp/project");
        let action = Action::RunCommand {
            command: "false".into(),
            working_dir: None,
            timeout_secs: None,
        };
        let err = handle(&action, &ctx, &vfs).unwrap_err();
        match err {
            ArchitechError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn skip_install_gates_install_commands_only() {
        let (registry, runner, market, tctx) = fixture();
        let mut ctx = context(&registry, &runner, &market, &tctx);
        ctx.skip_install = true;
        let vfs = Vfs::new("/tmp/project");
        let install = Action::RunCommand {
            command: "npm install".into(),
            working_dir: None,
            timeout_secs: None,
        };
        handle(&install, &ctx, &vfs).unwrap();
        let other = Action::RunCommand {
            command: "git init".into(),
            working_dir: None,
            timeout_secs: None,
        };
        handle(&other, &ctx, &vfs).unwrap();
        assert_eq!(runner.commands.lock().unwrap().as_slice(), ["git init"]);
    }
}
