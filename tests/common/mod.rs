//! Shared fixtures: a marketplace laid out on disk the way a published one
//! is, plus a recording command runner.
#![allow(dead_code)]

use architech::{
    runner::{CommandRunner, ExecOptions, ExecOutput},
    Result,
};
use serde_json::{json, Value};
use std::{
    path::Path,
    sync::{Arc, Mutex},
};

/// Installs the fmt subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn write_json(path: &Path, value: &Value) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

pub fn write_file(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Records every command instead of spawning a shell.
#[derive(Clone, Default)]
pub struct RecordingRunner {
    pub commands: Arc<Mutex<Vec<String>>>,
}

impl RecordingRunner {
    pub fn recorded(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn exec(&self, command: &str, _: &ExecOptions) -> Result<ExecOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(ExecOutput::default())
    }
}

/// Lays out a small but complete marketplace:
///
/// - `adapters/framework/nextjs` — scripts, dependencies, a config file, an
///   app layout from a template, and a `git init` command
/// - `adapters/auth/better-auth` — provides the `auth` capability, enhances
///   the framework's config file
/// - `features/auth` — consumes `auth`, wraps the layout's children
/// - three independent leaf adapters for parallel-batch scenarios
pub fn marketplace_fixture(root: &Path) {
    write_json(
        &root.join("manifest.json"),
        &json!({
            "name": "fixture-marketplace",
            "version": "1.0.0",
            "modules": [
                {"id": "adapters/framework/nextjs"},
                {"id": "adapters/auth/better-auth"},
                {"id": "features/auth"},
                {"id": "adapters/db/drizzle"},
                {"id": "adapters/ui/shadcn"},
                {"id": "adapters/email/resend"}
            ],
            "pathKeys": [
                {"key": "src.lib", "path": "src/lib"},
                {"key": "src.app", "path": "src/app"}
            ],
            "pathDefaults": {"*": {"src.lib": "src/lib", "src.app": "src/app"}}
        }),
    );

    // framework
    write_json(
        &root.join("adapters/framework/nextjs/framework.json"),
        &json!({
            "name": "Next.js",
            "version": "14.2.3",
            "provides": [{"name": "frontend-framework", "version": "14.2.3"}]
        }),
    );
    write_json(
        &root.join("adapters/framework/nextjs/blueprint.json"),
        &json!({
            "name": "nextjs-base",
            "actions": [
                {"type": "create-file", "path": "next.config.mjs", "overwrite": true,
                 "content": "export default {\n  reactStrictMode: true,\n};\n"},
                {"type": "create-file", "path": "{{paths.src.app}}/layout.tsx",
                 "template": "layout.tsx", "overwrite": true},
                {"type": "install-packages",
                 "packages": ["next@14.2.3", "react@18.3.1", "react-dom@18.3.1"]},
                {"type": "install-packages", "packages": ["typescript@5.4.5"], "dev": true},
                {"type": "add-script", "name": "dev", "command": "next dev"},
                {"type": "add-script", "name": "build", "command": "next build"},
                {"type": "run-command", "command": "git init"},
                {"type": "run-command", "command": "npm install"}
            ]
        }),
    );
    write_file(
        &root.join("adapters/framework/nextjs/templates/layout.tsx"),
        "export default function RootLayout({ children }) {\n  return (\n    <html lang=\"en\">\n      <body>\n        {children}\n      </body>\n    </html>\n  );\n}\n",
    );

    // auth adapter
    write_json(
        &root.join("adapters/auth/better-auth/adapter.json"),
        &json!({
            "name": "Better Auth",
            "version": "1.2.0",
            "prerequisites": ["adapters/framework/nextjs"],
            "provides": [{"name": "auth", "version": "1.2.0"}],
            "parameters": {"provider": {"default": "email"}}
        }),
    );
    write_json(
        &root.join("adapters/auth/better-auth/blueprint.json"),
        &json!({
            "name": "better-auth-base",
            "actions": [
                {"type": "install-packages", "packages": ["better-auth@1.2.0"]},
                {"type": "create-file", "path": "{{paths.src.lib}}/auth.ts", "overwrite": true,
                 "content": "import { betterAuth } from 'better-auth';\n\nexport const auth = betterAuth({\n  provider: '{{module.parameters.provider}}',\n});\n"},
                {"type": "enhance-file", "path": "next.config.mjs",
                 "modifier": "js-config-merger",
                 "params": {"content": {"experimental": {"serverActions": true}}}}
            ]
        }),
    );

    // auth feature
    write_json(
        &root.join("features/auth/feature.json"),
        &json!({
            "name": "Auth UI",
            "version": "0.3.0",
            "prerequisites": ["auth"]
        }),
    );
    write_json(
        &root.join("features/auth/blueprint.json"),
        &json!({
            "name": "auth-feature",
            "actions": [
                {"type": "create-file", "path": "{{paths.src.lib}}/auth-client.ts",
                 "overwrite": true,
                 "content": "export function AuthProvider({ children }) {\n  return children;\n}\n"},
                {"type": "enhance-file", "path": "{{paths.src.app}}/layout.tsx",
                 "modifier": "jsx-children-wrapper",
                 "params": {"element": "body", "providers": [
                     {"component": "AuthProvider", "importFrom": "@/lib/auth-client"}
                 ]}}
            ]
        }),
    );

    // independent leaves
    for (id, file, package) in [
        ("adapters/db/drizzle", "drizzle.config.ts", "drizzle-orm@0.30.0"),
        ("adapters/ui/shadcn", "components.json", "tailwindcss@3.4.0"),
        ("adapters/email/resend", "src/lib/email.ts", "resend@3.2.0"),
    ] {
        write_json(
            &root.join(id).join("adapter.json"),
            &json!({"name": id, "version": "1.0.0"}),
        );
        write_json(
            &root.join(id).join("blueprint.json"),
            &json!({
                "name": id,
                "actions": [
                    {"type": "create-file", "path": file, "overwrite": true,
                     "content": format!("// generated by {id}\n")},
                    {"type": "install-packages", "packages": [package]}
                ]
            }),
        );
    }

    // a recipe book expanding a starter package
    write_json(
        &root.join("recipes/nextjs.json"),
        &json!({
            "name": "nextjs-recipes",
            "packages": {
                "base": {
                    "modules": [{"id": "adapters/framework/nextjs"}]
                },
                "saas-starter": {
                    "dependsOn": ["base"],
                    "modules": [
                        {"id": "adapters/auth/better-auth",
                         "parameters": {"provider": "github"}},
                        {"id": "features/auth"}
                    ]
                }
            }
        }),
    );
}
