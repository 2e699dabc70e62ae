//! Composition: from genome to lock file.
//!
//! The pipeline is a small state machine driven to completion by
//! [`Composer::compose`]: packages are expanded into modules, modules are
//! enriched from the marketplace, the capability/dependency graph is
//! resolved and batched, integrity hashes are computed and the lock file is
//! assembled and written. Each state exists mostly so the stages can be
//! inspected and tested on their own.
//!
//! When a valid lock file already exists and regeneration is not forced the
//! whole pipeline is skipped and the existing lock is returned unchanged.

use crate::{
    error::Result,
    genome::{Genome, PackageRequest},
    lockfile::{self, LockFile, LockedModule, PlanBatch, LOCK_FORMAT_VERSION},
    marketplace::Marketplace,
    module::{ModuleCategory, Requirement, ResolvedModule},
    recipes::{self, ExpandedModule},
    resolver::Graph,
    utils,
};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::path::Path;

/// The outcome of composition.
#[derive(Debug)]
pub struct Composition {
    pub lock: LockFile,
    /// Whether an existing valid lock file was returned instead of
    /// recomputing.
    pub reused: bool,
    pub warnings: Vec<String>,
}

/// Drives a genome through expansion, resolution and planning into a lock
/// file on disk.
pub struct Composer<'a> {
    genome: &'a Genome,
    marketplace: &'a dyn Marketplace,
    root: &'a Path,
    force: bool,
}

impl<'a> Composer<'a> {
    pub fn new(genome: &'a Genome, marketplace: &'a dyn Marketplace, root: &'a Path) -> Self {
        Self { genome, marketplace, root, force: genome.options.force_regenerate }
    }

    /// Overrides the genome's `forceRegenerate` option.
    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[instrument(skip_all, fields(project = %self.genome.project.name))]
    pub fn compose(self) -> Result<Composition> {
        if !self.force {
            if let Some(existing) = self.reusable_lock()? {
                debug!("genome unchanged, reusing existing lock file");
                return Ok(Composition { lock: existing, reused: true, warnings: Vec::new() });
            }
        }
        let composition = self.expand()?.resolve()?.plan()?.lock()?;
        Ok(composition)
    }

    fn reusable_lock(&self) -> Result<Option<LockFile>> {
        match lockfile::read(self.root)? {
            Some(lock) if lock.genome_hash == lockfile::hash_genome(self.genome)? => {
                Ok(Some(lock))
            }
            _ => Ok(None),
        }
    }

    /// Expands marketplace packages and folds in the genome's explicit
    /// module selections, which win over recipe output on conflict.
    fn expand(self) -> Result<ExpandedState<'a>> {
        trace!("expanding packages");
        let books = self.marketplace.load_recipe_books()?;

        let requests: Vec<(String, PackageRequest)> = self
            .genome
            .packages
            .iter()
            .flat_map(|(app, requests)| {
                requests.iter().map(move |request| (app.clone(), request.clone()))
            })
            .collect();
        let mut expansion = recipes::expand_packages(&requests, &books)?;

        for module in &self.genome.modules {
            expansion.modules.push(ExpandedModule {
                id: module.id.clone(),
                version: module.version.clone(),
                parameters: if module.parameters.is_null() {
                    Value::Object(serde_json::Map::new())
                } else {
                    module.parameters.clone()
                },
                target: module.target.clone(),
            });
        }
        recipes::dedupe(&mut expansion);

        Ok(ExpandedState { composer: self, expansion })
    }
}

/// Modules are known by id and raw parameters; nothing has been checked
/// against the marketplace yet.
struct ExpandedState<'a> {
    composer: Composer<'a>,
    expansion: recipes::Expansion,
}

impl<'a> ExpandedState<'a> {
    /// Enriches every module from its marketplace metadata: category,
    /// schema-default parameters, prerequisites, capabilities, target.
    fn resolve(self) -> Result<ResolvedState<'a>> {
        trace!(modules = self.expansion.modules.len(), "enriching modules");
        let Self { composer, expansion } = self;
        let recipes::Expansion { modules: expanded, warnings } = expansion;

        let mut modules = Vec::with_capacity(expanded.len());
        for entry in expanded {
            let manifest = composer.marketplace.load_module_config(&entry.id)?;
            let category = match manifest.category {
                Some(category) => category,
                None => ModuleCategory::from_module_id(&entry.id)?,
            };

            let mut parameters = manifest.default_parameters();
            utils::merge_params(&mut parameters, &entry.parameters);
            if let Some(patch) = composer.genome.module_overrides.get(&entry.id) {
                utils::merge_params(&mut parameters, patch);
            }

            let requirements = manifest
                .prerequisites
                .iter()
                .map(|raw| Requirement::parse(raw))
                .collect::<Result<Vec<_>>>()?;

            let version = entry
                .version
                .or(manifest.version)
                .unwrap_or_else(|| "latest".to_string());

            modules.push(ResolvedModule {
                id: entry.id,
                version,
                category,
                parameters,
                requirements,
                provides: manifest.provides,
                target_package: entry.target.or(manifest.target_package),
            });
        }
        Ok(ResolvedState { composer, modules, warnings })
    }
}

/// Modules are fully enriched; the graph has not been built.
struct ResolvedState<'a> {
    composer: Composer<'a>,
    modules: Vec<ResolvedModule>,
    warnings: Vec<String>,
}

impl<'a> ResolvedState<'a> {
    /// Builds the DAG, rejects cycles and batches the execution plan.
    fn plan(self) -> Result<PlannedState<'a>> {
        trace!("building dependency graph");
        let Self { composer, modules, warnings } = self;
        let graph = Graph::build(&modules, composer.genome)?;
        let batches = graph.plan()?;
        Ok(PlannedState { composer, modules, graph, batches, warnings })
    }
}

/// The plan exists; all that remains is assembling and persisting the lock.
struct PlannedState<'a> {
    composer: Composer<'a>,
    modules: Vec<ResolvedModule>,
    graph: Graph,
    batches: Vec<PlanBatch>,
    warnings: Vec<String>,
}

impl PlannedState<'_> {
    fn lock(self) -> Result<Composition> {
        let Self { composer, modules, graph, batches, warnings } = self;

        // lock modules in plan order so the file reads top to bottom the
        // way the run executes
        let by_id: std::collections::HashMap<&str, &ResolvedModule> =
            modules.iter().map(|m| (m.id.as_str(), m)).collect();
        let mut locked = Vec::with_capacity(modules.len());
        for batch in &batches {
            for id in &batch.modules {
                let Some(module) = by_id.get(id.as_str()) else { continue };
                locked.push(LockedModule {
                    id: module.id.clone(),
                    version: module.version.clone(),
                    parameters: module.parameters.clone(),
                    integrity: lockfile::module_integrity(
                        &module.id,
                        &module.version,
                        &module.parameters,
                    ),
                    target_package: module.target_package.clone(),
                    prerequisites: graph.prerequisites_of(&module.id),
                });
            }
        }

        let lock = LockFile {
            version: LOCK_FORMAT_VERSION.to_string(),
            genome_hash: lockfile::hash_genome(composer.genome)?,
            resolved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            modules: locked,
            execution_plan: batches,
        };
        lockfile::write(composer.root, &lock)?;
        info!(
            modules = lock.modules.len(),
            batches = lock.execution_plan.len(),
            "composition complete"
        );
        Ok(Composition { lock, reused: false, warnings })
    }
}
