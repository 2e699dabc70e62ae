//! The execution driver: walks the lock file's batches, runs each module's
//! blueprint and flushes the VFS at the end of a fully successful run.
//!
//! Batches are processed strictly in order. Inside a batch flagged
//! `canExecuteInParallel` modules run on a bounded worker pool; otherwise
//! they run sequentially in declaration order. Any module failure halts
//! further batches and the buffer is discarded, so the only disk effects a
//! failed run leaves behind are those of already-executed run-command
//! actions.

use crate::{
    actions::ActionContext,
    error::{ArchitechError, Result},
    executor::BlueprintExecutor,
    genome::Genome,
    lockfile::{LockFile, LockedModule, PlanBatch},
    marketplace::Marketplace,
    modifiers::ModifierRegistry,
    paths::PathResolver,
    runner::{CommandRunner, DEFAULT_COMMAND_TIMEOUT},
    utils,
    vfs::Vfs,
};
use rayon::prelude::*;
use serde_json::{json, Value};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Cooperative cancellation shared between the driver and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Errors with [`ArchitechError::Cancelled`] once the token trips.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ArchitechError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// What one module contributed to the run.
#[derive(Debug)]
pub struct ModuleRun {
    pub id: String,
    pub batch: usize,
    pub files: Vec<String>,
}

/// The result of a fully flushed run.
#[derive(Debug, Default)]
pub struct ExecutionSummary {
    pub modules: Vec<ModuleRun>,
    /// Absolute paths written during the final flush.
    pub files_written: Vec<PathBuf>,
}

/// Drives a lock file against a project directory.
pub struct ExecutionDriver<'a> {
    lock: &'a LockFile,
    genome: &'a Genome,
    marketplace: &'a dyn Marketplace,
    registry: &'a ModifierRegistry,
    runner: &'a dyn CommandRunner,
    paths: &'a PathResolver,
    root: &'a Path,
    jobs: usize,
    default_timeout: Duration,
    cancel: CancelToken,
    /// Framework script templates contributed by recipe books, exposed to
    /// blueprints as `{{scripts.<name>}}`.
    scripts: std::collections::BTreeMap<String, String>,
}

impl<'a> ExecutionDriver<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lock: &'a LockFile,
        genome: &'a Genome,
        marketplace: &'a dyn Marketplace,
        registry: &'a ModifierRegistry,
        runner: &'a dyn CommandRunner,
        paths: &'a PathResolver,
        root: &'a Path,
    ) -> Self {
        let default_timeout = genome
            .options
            .command_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT);
        Self {
            lock,
            genome,
            marketplace,
            registry,
            runner,
            paths,
            root,
            jobs: genome.options.jobs.unwrap_or_else(num_cpus::get).max(1),
            default_timeout,
            cancel: CancelToken::new(),
            scripts: Default::default(),
        }
    }

    /// Script templates from the run's recipe books.
    #[must_use]
    pub fn with_scripts(
        mut self,
        scripts: std::collections::BTreeMap<String, String>,
    ) -> Self {
        self.scripts = scripts;
        self
    }

    /// Caps the worker pool for parallel batches.
    ///
    /// # Panics
    ///
    /// if `jobs == 0`
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        assert!(jobs > 0);
        self.jobs = jobs;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Executes every batch, then flushes the buffer. On any failure the
    /// buffer is dropped unflushed.
    #[instrument(skip_all, fields(project = %self.genome.project.name))]
    pub fn run(&self) -> Result<ExecutionSummary> {
        let vfs = Vfs::new(self.root);
        let mut summary = ExecutionSummary::default();

        for batch in &self.lock.execution_plan {
            self.cancel.check()?;
            debug!(
                batch = batch.batch_number,
                modules = batch.modules.len(),
                parallel = batch.can_execute_in_parallel,
                "executing batch"
            );
            let runs = self.run_batch(batch, &vfs)?;
            summary.modules.extend(runs);
        }

        self.cancel.check()?;
        summary.files_written = vfs.flush()?;
        info!(
            modules = summary.modules.len(),
            files = summary.files_written.len(),
            "run complete"
        );
        Ok(summary)
    }

    fn run_batch(&self, batch: &PlanBatch, vfs: &Vfs) -> Result<Vec<ModuleRun>> {
        let parallel =
            batch.can_execute_in_parallel && self.jobs > 1 && batch.modules.len() > 1;
        if !parallel {
            let mut runs = Vec::with_capacity(batch.modules.len());
            for id in &batch.modules {
                runs.push(self.run_module(batch, id, vfs).map_err(|err| {
                    self.wrap_failure(batch.batch_number, id, err)
                })?);
            }
            return Ok(runs);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs.min(batch.modules.len()))
            .build()
            .map_err(|err| ArchitechError::msg(err))?;
        let results: Vec<Result<ModuleRun>> = pool.install(|| {
            batch
                .modules
                .par_iter()
                .map(|id| {
                    self.run_module(batch, id, vfs)
                        .map_err(|err| self.wrap_failure(batch.batch_number, id, err))
                })
                .collect()
        });
        results.into_iter().collect()
    }

    fn wrap_failure(&self, batch: usize, module: &str, err: ArchitechError) -> ArchitechError {
        match err {
            err @ (ArchitechError::Cancelled | ArchitechError::ExecutionFailed { .. }) => err,
            cause => ArchitechError::ExecutionFailed {
                batch,
                module: module.to_string(),
                source: Box::new(cause),
            },
        }
    }

    fn run_module(&self, batch: &PlanBatch, id: &str, vfs: &Vfs) -> Result<ModuleRun> {
        self.cancel.check()?;
        let module = self
            .lock
            .modules
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| {
                ArchitechError::msg(format!("module `{id}` is in the plan but not locked"))
            })?;
        let blueprint = self.marketplace.load_blueprint(id)?;
        let template_ctx = self.module_context(module);
        let ctx = ActionContext {
            module_id: id,
            template_ctx: &template_ctx,
            marketplace: self.marketplace,
            registry: self.registry,
            runner: self.runner,
            project_root: self.root,
            default_timeout: self.default_timeout,
            skip_install: self.genome.options.skip_install,
        };
        let result = BlueprintExecutor::execute(&blueprint, &ctx, vfs, &self.cancel)?;
        Ok(ModuleRun { id: id.to_string(), batch: batch.batch_number, files: result.files })
    }

    /// The template context for one module: project metadata, the resolved
    /// path table, the module's own record and every locked module keyed by
    /// its id segments.
    fn module_context(&self, module: &LockedModule) -> Value {
        let mut root = serde_json::Map::new();
        root.insert(
            "project".to_string(),
            serde_json::to_value(&self.genome.project).unwrap_or(Value::Null),
        );
        root.insert("paths".to_string(), self.paths.as_context());
        root.insert(
            "options".to_string(),
            json!({ "skipInstall": self.genome.options.skip_install }),
        );
        if !self.scripts.is_empty() {
            let mut scripts = serde_json::Map::new();
            for (name, command) in &self.scripts {
                utils::insert_dotted(&mut scripts, name, Value::String(command.clone()));
            }
            root.insert("scripts".to_string(), Value::Object(scripts));
        }
        root.insert(
            "module".to_string(),
            json!({
                "id": module.id,
                "version": module.version,
                "parameters": module.parameters,
                "targetPackage": module.target_package,
            }),
        );
        let mut modules = serde_json::Map::new();
        for locked in &self.lock.modules {
            utils::insert_dotted(
                &mut modules,
                &locked.id.replace('/', "."),
                json!({
                    "id": locked.id,
                    "version": locked.version,
                    "parameters": locked.parameters,
                }),
            );
        }
        root.insert("modules".to_string(), Value::Object(modules));
        Value::Object(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        blueprint::{Action, Blueprint},
        lockfile::{module_integrity, LOCK_FORMAT_VERSION},
        marketplace::PathKeyDef,
        runner::{ExecOptions, ExecOutput},
    };
    use pretty_assertions::assert_eq;
    use std::{collections::BTreeMap, sync::Mutex};

    struct MapMarketplace {
        blueprints: BTreeMap<String, Blueprint>,
    }

    impl Marketplace for MapMarketplace {
        fn resolve_path_defaults(&self, _: &str) -> Result<BTreeMap<String, String>> {
            Ok(Default::default())
        }
        fn load_path_keys(&self) -> Result<Vec<PathKeyDef>> {
            Ok(Vec::new())
        }
        fn load_module_config(&self, id: &str) -> Result<crate::module::ModuleManifest> {
            Err(ArchitechError::ModuleNotFound(id.to_string()))
        }
        fn load_blueprint(&self, id: &str) -> Result<Blueprint> {
            self.blueprints.get(id).cloned().ok_or_else(|| {
                ArchitechError::BlueprintLoadFailed {
                    module: id.to_string(),
                    source: Box::new(ArchitechError::msg("missing")),
                }
            })
        }
        fn load_template(&self, _: &str, _: &str) -> Result<String> {
            Ok(String::new())
        }
        fn load_recipe_books(&self) -> Result<Vec<crate::recipes::RecipeBook>> {
            Ok(Vec::new())
        }
    }

    struct NullRunner(Mutex<Vec<String>>);

    impl CommandRunner for NullRunner {
        fn exec(&self, command: &str, _: &ExecOptions) -> Result<ExecOutput> {
            self.0.lock().unwrap().push(command.to_string());
            Ok(ExecOutput::default())
        }
    }

    fn genome() -> Genome {
        let (genome, _) = Genome::from_value(serde_json::json!({
            "project": {"name": "hello", "framework": "nextjs"}
        }))
        .unwrap();
        genome
    }

    fn locked(id: &str) -> LockedModule {
        LockedModule {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            parameters: serde_json::json!({}),
            integrity: module_integrity(id, "1.0.0", &serde_json::json!({})),
            target_package: None,
            prerequisites: Vec::new(),
        }
    }

    fn lock(batches: Vec<(Vec<&str>, bool)>) -> LockFile {
        let mut modules = Vec::new();
        let mut plan = Vec::new();
        for (index, (ids, parallel)) in batches.into_iter().enumerate() {
            for id in &ids {
                modules.push(locked(id));
            }
            plan.push(PlanBatch {
                batch_number: index + 1,
                modules: ids.into_iter().map(str::to_string).collect(),
                can_execute_in_parallel: parallel,
            });
        }
        LockFile {
            version: LOCK_FORMAT_VERSION.to_string(),
            genome_hash: "x".repeat(64),
            resolved_at: "2026-01-01T00:00:00Z".to_string(),
            modules,
            execution_plan: plan,
        }
    }

    fn create_action(path: &str, content: &str) -> Action {
        Action::CreateFile {
            path: path.to_string(),
            content: Some(content.to_string()),
            template: None,
            overwrite: false,
        }
    }

    #[test]
    fn runs_batches_and_flushes() {
        let project = tempfile::tempdir().unwrap();
        let genome = genome();
        let lock = lock(vec![
            (vec!["adapters/framework/nextjs"], true),
            (vec!["adapters/db/drizzle", "adapters/ui/shadcn"], true),
        ]);
        let marketplace = MapMarketplace {
            blueprints: BTreeMap::from([
                (
                    "adapters/framework/nextjs".to_string(),
                    Blueprint {
                        name: "fw".into(),
                        version: "1.0.0".into(),
                        actions: vec![
                            create_action("base.txt", "framework of {{project.name}}"),
                            Action::AddScript {
                                name: "dev".into(),
                                command: "next dev".into(),
                            },
                        ],
                    },
                ),
                (
                    "adapters/db/drizzle".to_string(),
                    Blueprint {
                        name: "db".into(),
                        version: "1.0.0".into(),
                        actions: vec![create_action("db.txt", "db")],
                    },
                ),
                (
                    "adapters/ui/shadcn".to_string(),
                    Blueprint {
                        name: "ui".into(),
                        version: "1.0.0".into(),
                        actions: vec![create_action("ui.txt", "ui")],
                    },
                ),
            ]),
        };
        let registry = ModifierRegistry::builtin();
        let runner = NullRunner(Mutex::new(Vec::new()));
        let paths = PathResolver::default();

        let summary = ExecutionDriver::new(
            &lock,
            &genome,
            &marketplace,
            &registry,
            &runner,
            &paths,
            project.path(),
        )
        .with_jobs(2)
        .run()
        .unwrap();

        assert_eq!(summary.modules.len(), 3);
        assert_eq!(
            std::fs::read_to_string(project.path().join("base.txt")).unwrap(),
            "framework of hello\n"
        );
        assert!(project.path().join("db.txt").is_file());
        assert!(project.path().join("ui.txt").is_file());
        let manifest: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(project.path().join("package.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest["scripts"]["dev"], "next dev");
    }

    #[test]
    fn failure_discards_the_buffer() {
        let project = tempfile::tempdir().unwrap();
        let genome = genome();
        let lock = lock(vec![
            (vec!["adapters/framework/nextjs"], true),
            (vec!["features/auth"], false),
        ]);
        let marketplace = MapMarketplace {
            blueprints: BTreeMap::from([
                (
                    "adapters/framework/nextjs".to_string(),
                    Blueprint {
                        name: "fw".into(),
                        version: "1.0.0".into(),
                        actions: vec![create_action("base.txt", "x")],
                    },
                ),
                // features/auth has no blueprint -> load failure in batch 2
            ]),
        };
        let registry = ModifierRegistry::builtin();
        let runner = NullRunner(Mutex::new(Vec::new()));
        let paths = PathResolver::default();

        let err = ExecutionDriver::new(
            &lock,
            &genome,
            &marketplace,
            &registry,
            &runner,
            &paths,
            project.path(),
        )
        .run()
        .unwrap_err();

        match err {
            ArchitechError::ExecutionFailed { batch, module, .. } => {
                assert_eq!(batch, 2);
                assert_eq!(module, "features/auth");
            }
            other => panic!("unexpected {other:?}"),
        }
        // nothing flushed
        assert!(!project.path().join("base.txt").exists());
    }

    #[test]
    fn cancellation_prevents_flush() {
        let project = tempfile::tempdir().unwrap();
        let genome = genome();
        let lock = lock(vec![(vec!["adapters/framework/nextjs"], true)]);
        let marketplace = MapMarketplace {
            blueprints: BTreeMap::from([(
                "adapters/framework/nextjs".to_string(),
                Blueprint {
                    name: "fw".into(),
                    version: "1.0.0".into(),
                    actions: vec![create_action("base.txt", "x")],
                },
            )]),
        };
        let registry = ModifierRegistry::builtin();
        let runner = NullRunner(Mutex::new(Vec::new()));
        let paths = PathResolver::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = ExecutionDriver::new(
            &lock,
            &genome,
            &marketplace,
            &registry,
            &runner,
            &paths,
            project.path(),
        )
        .with_cancel(cancel)
        .run()
        .unwrap_err();
        assert!(matches!(err, ArchitechError::Cancelled));
        assert!(!project.path().join("base.txt").exists());
    }

    #[test]
    fn parallel_batch_produces_union_of_outputs() {
        let project = tempfile::tempdir().unwrap();
        let genome = genome();
        let ids = ["adapters/a/one", "adapters/b/two", "adapters/c/three"];
        let lock = lock(vec![(ids.to_vec(), true)]);
        let blueprints: BTreeMap<String, Blueprint> = ids
            .iter()
            .map(|id| {
                let file = format!("{}.txt", id.rsplit('/').next().unwrap_or("x"));
                (
                    id.to_string(),
                    Blueprint {
                        name: id.to_string(),
                        version: "1.0.0".into(),
                        actions: vec![create_action(&file, id)],
                    },
                )
            })
            .collect();
        let marketplace = MapMarketplace { blueprints };
        let registry = ModifierRegistry::builtin();
        let runner = NullRunner(Mutex::new(Vec::new()));
        let paths = PathResolver::default();

        let summary = ExecutionDriver::new(
            &lock,
            &genome,
            &marketplace,
            &registry,
            &runner,
            &paths,
            project.path(),
        )
        .with_jobs(3)
        .run()
        .unwrap();
        assert_eq!(summary.modules.len(), 3);
        for name in ["one.txt", "two.txt", "three.txt"] {
            assert!(project.path().join(name).is_file(), "missing {name}");
        }
    }
}
