//! The blueprint executor: runs one module's ordered actions against the
//! shared VFS, stopping at the first failure.

use crate::{
    actions::{self, ActionContext},
    blueprint::Blueprint,
    error::Result,
    execute::CancelToken,
    vfs::Vfs,
};

/// What one module's blueprint produced.
#[derive(Debug, Default)]
pub struct ModuleResult {
    /// Union of the files every action reported, deduplicated and sorted.
    pub files: Vec<String>,
    pub messages: Vec<String>,
}

pub struct BlueprintExecutor;

impl BlueprintExecutor {
    /// Runs the actions in declaration order. The first failing action
    /// aborts the module; the cancellation token is honored between
    /// actions.
    pub fn execute(
        blueprint: &Blueprint,
        ctx: &ActionContext<'_>,
        vfs: &Vfs,
        cancel: &CancelToken,
    ) -> Result<ModuleResult> {
        debug!(
            module = ctx.module_id,
            blueprint = %blueprint.name,
            actions = blueprint.actions.len(),
            "executing blueprint"
        );
        let mut result = ModuleResult::default();
        for action in &blueprint.actions {
            cancel.check()?;
            let outcome = actions::handle(action, ctx, vfs)?;
            result.files.extend(outcome.files);
            result.messages.extend(outcome.message);
        }
        result.files.sort();
        result.files.dedup();
        Ok(result)
    }
}
