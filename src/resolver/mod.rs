//! Capability and dependency resolution.
//!
//! Selected modules declare prerequisites (module ids or abstract
//! capabilities) and provided capabilities. This module builds the
//! provider/consumer tables, resolves every capability to exactly one
//! included provider, shapes the result into a DAG, rejects cycles with the
//! exact cycle path, and batches a topological order with the hierarchical
//! tier rule applied: frameworks run first, then adapters, then connectors,
//! then features — and feature batches are always sequential.

use crate::{
    error::{ArchitechError, Result},
    genome::Genome,
    lockfile::PlanBatch,
    module::{ModuleCategory, Requirement, ResolvedModule},
};
use std::collections::{BTreeMap, HashMap};

/// One provider row of the capability table.
#[derive(Debug, Clone)]
pub struct Provider {
    pub module: String,
    pub version: Option<semver::Version>,
    pub confidence: f64,
}

/// Provider/consumer tables built by scanning the selected modules.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    providers: BTreeMap<String, Vec<Provider>>,
    consumers: BTreeMap<String, Vec<String>>,
}

impl CapabilityRegistry {
    pub fn build(modules: &[ResolvedModule]) -> Self {
        let mut registry = Self::default();
        for module in modules {
            for decl in &module.provides {
                registry.providers.entry(decl.name.clone()).or_default().push(Provider {
                    module: module.id.clone(),
                    version: decl.version.clone(),
                    confidence: decl.confidence,
                });
            }
            for requirement in &module.requirements {
                if let Requirement::Capability { name, .. } = requirement {
                    registry
                        .consumers
                        .entry(name.clone())
                        .or_default()
                        .push(module.id.clone());
                }
            }
        }
        registry
    }

    pub fn providers(&self, capability: &str) -> &[Provider] {
        self.providers.get(capability).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn consumers(&self, capability: &str) -> &[String] {
        self.consumers.get(capability).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Capabilities that are consumed and have more than one provider.
    pub fn conflicts(&self) -> Vec<(&str, Vec<&str>)> {
        self.providers
            .iter()
            .filter(|(name, providers)| {
                providers.len() > 1 && self.consumers.contains_key(*name)
            })
            .map(|(name, providers)| {
                (name.as_str(), providers.iter().map(|p| p.module.as_str()).collect())
            })
            .collect()
    }

    /// Selects the unique provider for a consumed capability.
    ///
    /// Zero candidates is a missing prerequisite; several candidates is a
    /// conflict unless the genome's `moduleOverrides` names one of them
    /// under `capability:<name>`.
    fn select(
        &self,
        consumer: &str,
        name: &str,
        version_req: Option<&semver::VersionReq>,
        genome: &Genome,
    ) -> Result<String> {
        let candidates: Vec<&Provider> = self
            .providers(name)
            .iter()
            .filter(|p| match (version_req, &p.version) {
                (Some(req), Some(version)) => req.matches(version),
                // an unversioned provider satisfies any requirement
                _ => true,
            })
            .collect();
        match candidates.as_slice() {
            [] => Err(ArchitechError::MissingPrerequisite {
                module: consumer.to_string(),
                requirement: name.to_string(),
            }),
            [single] => Ok(single.module.clone()),
            several => {
                let override_key = format!("capability:{name}");
                if let Some(chosen) = genome
                    .module_overrides
                    .get(&override_key)
                    .and_then(serde_json::Value::as_str)
                {
                    if let Some(provider) =
                        several.iter().find(|p| p.module == chosen)
                    {
                        debug!(capability = name, provider = chosen, "conflict resolved by override");
                        return Ok(provider.module.clone());
                    }
                }
                Err(ArchitechError::CapabilityConflict {
                    capability: name.to_string(),
                    providers: several.iter().map(|p| p.module.clone()).collect(),
                })
            }
        }
    }
}

/// The prerequisite DAG over the selected modules.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<String>,
    indices: HashMap<String, usize>,
    categories: Vec<ModuleCategory>,
    /// `deps[i]` = indices of the modules node `i` depends on.
    deps: Vec<Vec<usize>>,
}

impl Graph {
    /// Resolves every requirement of every module to a concrete edge.
    pub fn build(modules: &[ResolvedModule], genome: &Genome) -> Result<Self> {
        let nodes: Vec<String> = modules.iter().map(|m| m.id.clone()).collect();
        let indices: HashMap<String, usize> =
            nodes.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        let categories: Vec<ModuleCategory> = modules.iter().map(|m| m.category).collect();
        let registry = CapabilityRegistry::build(modules);

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (index, module) in modules.iter().enumerate() {
            for requirement in &module.requirements {
                let dependency = match requirement {
                    Requirement::Module(id) => {
                        let Some(&dep) = indices.get(id) else {
                            return Err(ArchitechError::MissingPrerequisite {
                                module: module.id.clone(),
                                requirement: id.clone(),
                            });
                        };
                        dep
                    }
                    Requirement::Capability { name, version_req } => {
                        let provider = registry.select(
                            &module.id,
                            name,
                            version_req.as_ref(),
                            genome,
                        )?;
                        match indices.get(&provider) {
                            Some(&dep) => dep,
                            // providers are scanned from the selected set
                            None => continue,
                        }
                    }
                };
                if dependency != index && !deps[index].contains(&dependency) {
                    deps[index].push(dependency);
                }
            }
        }
        trace!(
            nodes = nodes.len(),
            edges = deps.iter().map(Vec::len).sum::<usize>(),
            "dependency graph built"
        );
        Ok(Self { nodes, indices, categories, deps })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The resolved module-id prerequisites of one node.
    pub fn prerequisites_of(&self, id: &str) -> Vec<String> {
        self.indices
            .get(id)
            .map(|&i| self.deps[i].iter().map(|&d| self.nodes[d].clone()).collect())
            .unwrap_or_default()
    }

    /// Depth-first cycle check. The error payload is the exact cycle path,
    /// e.g. `[a, b, a]`.
    pub fn ensure_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        fn visit(
            graph: &Graph,
            node: usize,
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Result<()> {
            marks[node] = Mark::Gray;
            stack.push(node);
            for &dep in &graph.deps[node] {
                match marks[dep] {
                    Mark::White => visit(graph, dep, marks, stack)?,
                    Mark::Gray => {
                        let from = stack.iter().position(|&n| n == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[from..].iter().map(|&n| graph.nodes[n].clone()).collect();
                        cycle.push(graph.nodes[dep].clone());
                        return Err(ArchitechError::CircularDependency { cycle });
                    }
                    Mark::Black => {}
                }
            }
            stack.pop();
            marks[node] = Mark::Black;
            Ok(())
        }

        let mut marks = vec![Mark::White; self.nodes.len()];
        let mut stack = Vec::new();
        for node in 0..self.nodes.len() {
            if marks[node] == Mark::White {
                visit(self, node, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    /// Kahn's algorithm shaped into batches, with the tier rule applied:
    /// among the currently eligible modules only the lowest tier is
    /// emitted, so frameworks always precede adapters, adapters precede
    /// connectors, and connectors precede features. Within a batch modules
    /// keep their declaration order. Feature batches are never parallel.
    pub fn plan(&self) -> Result<Vec<PlanBatch>> {
        self.ensure_acyclic()?;

        let total = self.nodes.len();
        let mut emitted = vec![false; total];
        let mut emitted_count = 0;
        let mut batches = Vec::new();

        while emitted_count < total {
            let eligible: Vec<usize> = (0..total)
                .filter(|&i| !emitted[i] && self.deps[i].iter().all(|&d| emitted[d]))
                .collect();
            let Some(tier) = eligible.iter().map(|&i| self.categories[i].tier()).min()
            else {
                // unreachable after the acyclicity check
                return Err(ArchitechError::msg("no eligible modules while batching"));
            };
            let members: Vec<usize> =
                eligible.into_iter().filter(|&i| self.categories[i].tier() == tier).collect();
            let sequential_tier = tier == ModuleCategory::Feature.tier();
            for &member in &members {
                emitted[member] = true;
            }
            emitted_count += members.len();
            batches.push(PlanBatch {
                batch_number: batches.len() + 1,
                modules: members.iter().map(|&i| self.nodes[i].clone()).collect(),
                can_execute_in_parallel: !sequential_tier,
            });
        }

        debug!(batches = batches.len(), modules = total, "execution plan batched");
        Ok(batches)
    }
}
