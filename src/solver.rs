//! Transitive closure over module `depends` and `uses` relations, per
//! context, with optional handling and memoization.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{LazeError, Result};
use crate::model::{ContextBag, ContextId, Module, ModuleId};
use crate::util::merge::MergeOpts;
use crate::util::uniquify;
use crate::vars::VarMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Depends,
    Uses,
}

fn relation_names(module: &Module, relation: Relation) -> &[String] {
    match relation {
        Relation::Depends => &module.depends,
        Relation::Uses => &module.uses,
    }
}

/// Eager solver with a per-(module, context, relation) memo table.
#[derive(Debug, Default)]
pub struct Solver {
    cache: HashMap<(ModuleId, ContextId, Relation), Vec<ModuleId>>,
    active: HashSet<(ModuleId, ContextId, Relation)>,
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The closure of `relation` starting from `module`, resolved in `ctx`,
    /// sorted by module name.
    ///
    /// `?name` entries are optional at any depth: a missing module is
    /// skipped, as is one whose own hard dependencies cannot be resolved.
    /// The `all` sentinel is ignored here; it only widens `get_defines`.
    pub fn get_nested(
        &mut self,
        modules: &[Module],
        contexts: &ContextBag,
        module: ModuleId,
        ctx: ContextId,
        relation: Relation,
        notfound_error: bool,
    ) -> Result<Vec<ModuleId>> {
        let key = (module, ctx, relation);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }
        // Re-entry means a dependency cycle is being closed over; the outer
        // call already accounts for every member.
        if !self.active.insert(key) {
            return Ok(Vec::new());
        }
        let result = self.solve(modules, contexts, module, ctx, relation, notfound_error);
        self.active.remove(&key);

        let result = result?;
        self.cache.insert(key, result.clone());
        Ok(result)
    }

    fn solve(
        &mut self,
        modules: &[Module],
        contexts: &ContextBag,
        module: ModuleId,
        ctx: ContextId,
        relation: Relation,
        notfound_error: bool,
    ) -> Result<Vec<ModuleId>> {
        let mut seen_names: HashSet<String> = HashSet::new();
        let mut out: Vec<ModuleId> = Vec::new();
        let mut frontier: Vec<String> = relation_names(&modules[module], relation).to_vec();

        while !frontier.is_empty() {
            for name in &frontier {
                seen_names.insert(name.clone());
            }

            for name in std::mem::take(&mut frontier) {
                if name == "all" {
                    continue;
                }

                let (optional, name) = match name.strip_prefix('?') {
                    Some(stripped) => (true, stripped.to_string()),
                    None => (false, name),
                };

                let Some(found) = contexts.get_module(ctx, &name) else {
                    if notfound_error && !optional {
                        return Err(LazeError::ModuleNotAvailable {
                            context: contexts.display_chain(ctx),
                            module: modules[module].name.clone(),
                            missing: name,
                        });
                    }
                    debug!(
                        "module {} not found in {}",
                        name,
                        contexts.display_chain(ctx)
                    );
                    continue;
                };

                if optional
                    && self
                        .get_nested(modules, contexts, found, ctx, Relation::Depends, true)
                        .is_err()
                {
                    continue;
                }

                seen_names.insert(name);
                if !out.contains(&found) {
                    out.push(found);
                }
            }

            for &found in &out {
                for next in relation_names(&modules[found], relation) {
                    if !seen_names.contains(next) && !frontier.contains(next) {
                        frontier.push(next.clone());
                    }
                }
            }
        }

        out.sort_by(|a, b| modules[*a].name.cmp(&modules[*b].name));
        Ok(out)
    }

    /// Hard dependencies; fails on any unresolved mandatory module.
    pub fn get_deps(
        &mut self,
        modules: &[Module],
        contexts: &ContextBag,
        module: ModuleId,
        ctx: ContextId,
    ) -> Result<Vec<ModuleId>> {
        self.get_nested(modules, contexts, module, ctx, Relation::Depends, true)
    }

    /// Feature signals: the `uses` closure plus every hard dependency's
    /// `uses` closure (and, with `include_deps`, the dependencies too).
    pub fn get_used(
        &mut self,
        modules: &[Module],
        contexts: &ContextBag,
        module: ModuleId,
        ctx: ContextId,
        include_deps: bool,
    ) -> Result<Vec<ModuleId>> {
        let mut res = self.get_nested(modules, contexts, module, ctx, Relation::Uses, false)?;
        for dep in self.get_nested(modules, contexts, module, ctx, Relation::Depends, false)? {
            res.extend(self.get_nested(modules, contexts, dep, ctx, Relation::Uses, false)?);
            if include_deps {
                res.push(dep);
            }
        }
        Ok(uniquify(&res))
    }

    /// The `-DMODULE_*` defines for `module` within an app's module set.
    pub fn get_defines(
        &mut self,
        modules: &[Module],
        contexts: &ContextBag,
        module: ModuleId,
        ctx: ContextId,
        module_set: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let uses_all = modules[module].uses.iter().any(|u| u == "all");
        let mut available: Vec<String> = if uses_all {
            module_set.iter().cloned().collect()
        } else {
            self.get_used(modules, contexts, module, ctx, false)?
                .into_iter()
                .map(|m| modules[m].name.clone())
                .filter(|name| module_set.contains(name))
                .collect()
        };
        available.sort();
        Ok(available.iter().map(|name| module_define(name)).collect())
    }

    /// Variables a module exports to its dependents, aggregated over the
    /// used/depended modules present in the app's module set.
    pub fn get_export_vars(
        &mut self,
        modules: &[Module],
        contexts: &ContextBag,
        module: ModuleId,
        ctx: ContextId,
        module_set: &HashSet<String>,
    ) -> Result<VarMap> {
        let mut vars = modules[module].export_vars.clone();
        vars.substitute(&modules[module].subst_table());

        for dep in self.get_used(modules, contexts, module, ctx, true)? {
            if !module_set.contains(&modules[dep].name) {
                continue;
            }
            if modules[dep].export_vars.is_empty() {
                continue;
            }
            let mut dep_vars = modules[dep].export_vars.clone();
            dep_vars.substitute(&modules[dep].subst_table());
            vars.merge(
                &dep_vars,
                MergeOpts {
                    join_lists: true,
                    ..Default::default()
                },
            )?;
        }
        Ok(vars)
    }
}

/// `sys/shell-cmds` becomes `-DMODULE_SHELL_CMDS`.
fn module_define(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    format!(
        "-DMODULE_{}",
        base.to_uppercase().replace(['/', '-'], "_")
    )
}
