#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

pub mod error;
pub use error::{ArchitechError, ArchitechIoError, Result};

pub mod utils;

pub mod template;

pub mod vfs;
pub use vfs::Vfs;

pub mod modifiers;
pub use modifiers::ModifierRegistry;

pub mod module;
pub use module::{ModuleCategory, ResolvedModule};

pub mod genome;
pub use genome::{Genome, GenomeOptions, ProjectInfo};

pub mod blueprint;
pub use blueprint::{Action, Blueprint, FallbackPolicy, PackageSpec};

pub mod marketplace;
pub use marketplace::{DirMarketplace, Marketplace};

pub mod recipes;
pub use recipes::RecipeBook;

pub mod paths;
pub use paths::PathResolver;

pub mod resolver;
pub use resolver::Graph;

pub mod lockfile;
pub use lockfile::{LockFile, LockedModule, PlanBatch};

pub mod compose;
pub use compose::{Composer, Composition};

pub mod actions;

pub mod executor;
pub use executor::BlueprintExecutor;

pub mod runner;
pub use runner::{CommandRunner, ExecOptions, ExecOutput, ProcessRunner};

pub mod execute;
pub use execute::{CancelToken, ExecutionDriver, ExecutionSummary};

use std::{
    path::PathBuf,
    sync::Arc,
};

/// A project workspace: the genome, the marketplace serving its modules,
/// and everything needed to compose and materialize it.
pub struct Project {
    /// The parsed genome; immutable for the lifetime of the project.
    pub genome: Genome,
    /// Target directory the project materializes into.
    root: PathBuf,
    marketplace: Arc<dyn Marketplace>,
    registry: ModifierRegistry,
    runner: Arc<dyn CommandRunner>,
    /// Maximum number of concurrently executing modules.
    jobs: usize,
    cancel: CancelToken,
}

impl Project {
    /// Convenience function to call [`ProjectBuilder::default()`].
    pub fn builder() -> ProjectBuilder {
        ProjectBuilder::default()
    }

    /// Returns the root directory of the project
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Returns the path to the lock file
    pub fn lock_path(&self) -> PathBuf {
        lockfile::lock_path(&self.root)
    }

    /// The cancellation token observed by [`Self::materialize`].
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Convenience function to read the current lock file, if any.
    pub fn read_lock_file(&self) -> Result<Option<LockFile>> {
        lockfile::read(&self.root)
    }

    /// Composes the genome into a lock file, reusing a valid existing one.
    pub fn compose(&self) -> Result<Composition> {
        Composer::new(&self.genome, self.marketplace.as_ref(), &self.root).compose()
    }

    /// Executes an already-composed lock file against the project root.
    pub fn execute(&self, lock: &LockFile) -> Result<ExecutionSummary> {
        let books = self.marketplace.load_recipe_books()?;
        let key_defs = self.marketplace.load_path_keys()?;
        let defaults =
            self.marketplace.resolve_path_defaults(&self.genome.project.framework)?;
        let paths = PathResolver::build(&self.genome, &key_defs, &defaults, &books)?;
        // later books win, same as everywhere else in the expansion chain
        let scripts = books
            .iter()
            .flat_map(|book| book.scripts.iter())
            .map(|(name, command)| (name.clone(), command.clone()))
            .collect();
        ExecutionDriver::new(
            lock,
            &self.genome,
            self.marketplace.as_ref(),
            &self.registry,
            self.runner.as_ref(),
            &paths,
            &self.root,
        )
        .with_jobs(self.jobs)
        .with_cancel(self.cancel.clone())
        .with_scripts(scripts)
        .run()
    }

    /// Composes and executes in one go.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use architech::{DirMarketplace, Genome, Project};
    ///
    /// let genome = Genome::load("hello.genome.json")?;
    /// let marketplace = DirMarketplace::open("./marketplace")?;
    /// let project = Project::builder().genome(genome).marketplace(marketplace).build()?;
    /// let summary = project.materialize()?;
    /// println!("wrote {} files", summary.files_written.len());
    /// # Ok::<_, Box<dyn std::error::Error>>(())
    /// ```
    pub fn materialize(&self) -> Result<ExecutionSummary> {
        let composition = self.compose()?;
        if composition.reused {
            debug!("executing reused lock file");
        }
        self.execute(&composition.lock)
    }

    /// Removes the project's lock file.
    pub fn cleanup(&self) -> Result<()> {
        trace!("clean up project");
        lockfile::delete(&self.root)
    }
}

/// Builder for [`Project`].
#[derive(Default)]
pub struct ProjectBuilder {
    genome: Option<Genome>,
    root: Option<PathBuf>,
    marketplace: Option<Arc<dyn Marketplace>>,
    registry: Option<ModifierRegistry>,
    runner: Option<Arc<dyn CommandRunner>>,
    jobs: Option<usize>,
}

impl ProjectBuilder {
    #[must_use]
    pub fn genome(mut self, genome: Genome) -> Self {
        self.genome = Some(genome);
        self
    }

    /// Overrides the target directory derived from the genome.
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    #[must_use]
    pub fn marketplace(mut self, marketplace: impl Marketplace + 'static) -> Self {
        self.marketplace = Some(Arc::new(marketplace));
        self
    }

    #[must_use]
    pub fn shared_marketplace(mut self, marketplace: Arc<dyn Marketplace>) -> Self {
        self.marketplace = Some(marketplace);
        self
    }

    /// Replaces the built-in modifier registry.
    #[must_use]
    pub fn registry(mut self, registry: ModifierRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the process-spawning command runner, e.g. with a recording
    /// fake in tests.
    #[must_use]
    pub fn runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Some(Arc::new(runner));
        self
    }

    /// Sets the maximum number of concurrently executing modules.
    ///
    /// # Panics
    ///
    /// `jobs` must be at least 1
    #[must_use]
    pub fn jobs(mut self, jobs: usize) -> Self {
        assert!(jobs > 0);
        self.jobs = Some(jobs);
        self
    }

    pub fn build(self) -> Result<Project> {
        let Self { genome, root, marketplace, registry, runner, jobs } = self;
        let genome =
            genome.ok_or_else(|| ArchitechError::msg("ProjectBuilder requires a genome"))?;
        let marketplace = marketplace
            .ok_or_else(|| ArchitechError::msg("ProjectBuilder requires a marketplace"))?;
        let root = match root {
            Some(root) => root,
            None => {
                let cwd =
                    std::env::current_dir().map_err(|err| ArchitechError::io(err, "."))?;
                genome.target_dir(&cwd)
            }
        };
        let jobs = jobs
            .or(genome.options.jobs)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1);
        Ok(Project {
            genome,
            root,
            marketplace,
            registry: registry.unwrap_or_default(),
            runner: runner.unwrap_or_else(|| Arc::new(ProcessRunner)),
            jobs,
            cancel: CancelToken::new(),
        })
    }
}
