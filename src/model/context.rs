//! The context tree: named configuration nodes carrying variables and
//! module registrations. All contexts live in one arena; parent/child
//! links are indices, so the tree needs no shared ownership.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{LazeError, Result};
use crate::model::{Declaration, ModuleId};
use crate::project::schema::ContextDecl;
use crate::util::merge::MergeOpts;
use crate::util::subst::substitute;
use crate::vars::VarMap;

pub type ContextId = usize;

#[derive(Debug)]
pub struct Context {
    pub name: String,
    pub relpath: PathBuf,
    pub is_builder: bool,
    pub parent_name: Option<String>,
    pub parent: Option<ContextId>,
    pub children: Vec<ContextId>,
    pub declared_vars: VarMap,
    /// Variables merged down the parent chain; resolved during wiring.
    pub vars: VarMap,
    pub bindir_template: String,
    /// Fully substituted binary output directory; resolved during wiring.
    pub bindir: String,
    pub modules: IndexMap<String, ModuleId>,
    pub disabled_modules: HashSet<String>,
}

impl Declaration for Context {
    fn name(&self) -> &str {
        &self.name
    }

    fn relpath(&self) -> &Path {
        &self.relpath
    }
}

#[derive(Debug, Default)]
pub struct ContextBag {
    contexts: Vec<Context>,
    by_name: HashMap<String, ContextId>,
}

impl ContextBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ContextId) -> &Context {
        &self.contexts[id]
    }

    pub fn get_mut(&mut self, id: ContextId) -> &mut Context {
        &mut self.contexts[id]
    }

    pub fn lookup(&self, name: &str) -> Option<ContextId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Ids of all named (non-ephemeral) contexts, in declaration order.
    pub fn named_ids(&self) -> Vec<ContextId> {
        let mut ids: Vec<ContextId> = self.by_name.values().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn add_declared(
        &mut self,
        decl: ContextDecl,
        is_builder: bool,
        relpath: &Path,
    ) -> ContextId {
        let mut vars = decl.vars;
        vars.listify_values();
        // Root builders anchor their own output folder under the default
        // build directory; plain root contexts are the build directory.
        let bindir_template = decl.bindir.unwrap_or_else(|| {
            if decl.parent.is_some() {
                "${bindir}/${name}".to_string()
            } else if is_builder {
                "build/${name}".to_string()
            } else {
                "build".to_string()
            }
        });
        let id = self.contexts.len();
        self.contexts.push(Context {
            name: decl.name.clone(),
            relpath: relpath.to_path_buf(),
            is_builder,
            parent_name: decl.parent,
            parent: None,
            children: Vec::new(),
            declared_vars: vars,
            vars: VarMap::new(),
            bindir_template,
            bindir: String::new(),
            modules: IndexMap::new(),
            disabled_modules: decl.disable_modules.into_iter().collect(),
        });
        self.by_name.insert(decl.name, id);
        id
    }

    /// Add a per-app context anchored at `parent`. Ephemeral contexts are
    /// not registered in the name index.
    pub fn add_ephemeral(
        &mut self,
        name: &str,
        parent: ContextId,
        app_vars: &VarMap,
    ) -> Result<ContextId> {
        let mut vars = self.contexts[parent].vars.clone();
        let mut app_vars = app_vars.clone();
        app_vars.listify_values();
        vars.merge(
            &app_vars,
            MergeOpts {
                override_values: true,
                ..Default::default()
            },
        )?;
        let id = self.contexts.len();
        self.contexts.push(Context {
            name: name.to_string(),
            relpath: PathBuf::new(),
            is_builder: false,
            parent_name: Some(self.contexts[parent].name.clone()),
            parent: Some(parent),
            children: Vec::new(),
            declared_vars: app_vars,
            vars,
            bindir_template: String::new(),
            bindir: String::new(),
            modules: IndexMap::new(),
            disabled_modules: HashSet::new(),
        });
        Ok(id)
    }

    /// Resolve parent names into links, reject cycles, then compute the
    /// merged variable set and binary directory of every context top-down.
    pub fn wire(&mut self) -> Result<()> {
        let ids = self.named_ids();

        for &id in &ids {
            if let Some(parent_name) = self.contexts[id].parent_name.clone() {
                let parent = self.lookup(&parent_name).ok_or_else(|| {
                    LazeError::ParseError(format!(
                        "context {} refers to unknown parent {}",
                        self.contexts[id].name, parent_name
                    ))
                })?;
                self.contexts[id].parent = Some(parent);
                self.contexts[parent].children.push(id);
            }
        }

        // A parent chain longer than the arena means a cycle.
        for &id in &ids {
            let mut steps = 0;
            let mut cur = Some(id);
            while let Some(c) = cur {
                steps += 1;
                if steps > self.contexts.len() {
                    return Err(LazeError::ParseError(format!(
                        "context parent cycle involving {}",
                        self.contexts[id].name
                    )));
                }
                cur = self.contexts[c].parent;
            }
        }

        // Parents resolve before children, so walk roots downward.
        let roots: Vec<ContextId> = ids
            .iter()
            .copied()
            .filter(|&id| self.contexts[id].parent.is_none())
            .collect();
        let mut queue: Vec<ContextId> = roots;
        while let Some(id) = queue.pop() {
            self.resolve_node(id)?;
            queue.extend(self.contexts[id].children.clone());
        }

        Ok(())
    }

    fn resolve_node(&mut self, id: ContextId) -> Result<()> {
        let parent = self.contexts[id].parent;

        let mut vars = match parent {
            Some(p) => self.contexts[p].vars.clone(),
            None => VarMap::new(),
        };
        let declared = self.contexts[id].declared_vars.clone();
        vars.merge(
            &declared,
            MergeOpts {
                override_values: true,
                ..Default::default()
            },
        )?;
        self.contexts[id].vars = vars;

        let template = self.contexts[id].bindir_template.clone();
        self.contexts[id].bindir = if template.contains('$') {
            let mut table = HashMap::new();
            table.insert("name".to_string(), self.contexts[id].name.clone());
            match parent {
                Some(p) => {
                    table.insert("parent".to_string(), self.contexts[p].name.clone());
                    table.insert("bindir".to_string(), self.contexts[p].bindir.clone());
                }
                None => {
                    table.insert("parent".to_string(), String::new());
                    table.insert("bindir".to_string(), String::new());
                }
            }
            substitute(&template, &table)
        } else {
            template
        };
        Ok(())
    }

    pub fn register_module(&mut self, ctx: ContextId, name: &str, module: ModuleId) {
        self.contexts[ctx].modules.insert(name.to_string(), module);
    }

    /// Look `name` up in `ctx` or any ancestor. A name listed in a
    /// context's `disable_modules` is invisible from that context down.
    pub fn get_module(&self, ctx: ContextId, name: &str) -> Option<ModuleId> {
        let mut cur = Some(ctx);
        while let Some(id) = cur {
            let context = &self.contexts[id];
            if context.disabled_modules.contains(name) {
                return None;
            }
            if let Some(&module) = context.modules.get(name) {
                return Some(module);
            }
            cur = context.parent;
        }
        None
    }

    /// True when `ctx` or any of its ancestors is named in `set`.
    pub fn listed(&self, ctx: ContextId, set: &HashSet<String>) -> bool {
        let mut cur = Some(ctx);
        while let Some(id) = cur {
            if set.contains(&self.contexts[id].name) {
                return true;
            }
            cur = self.contexts[id].parent;
        }
        false
    }

    /// Render the parent chain for diagnostics: `Context("app"->"builder")`.
    pub fn display_chain(&self, ctx: ContextId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(ctx);
        while let Some(id) = cur {
            parts.push(format!("\"{}\"", self.contexts[id].name));
            cur = self.contexts[id].parent;
        }
        format!("Context({})", parts.join("->"))
    }

    pub fn filepath(&self, ctx: ContextId, filename: &str) -> String {
        let bindir = &self.contexts[ctx].bindir;
        if bindir.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", bindir, filename)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(yaml: &str) -> ContextDecl {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn bag_with_chain() -> ContextBag {
        let mut bag = ContextBag::new();
        bag.add_declared(decl("name: default\nvars:\n  CFLAGS: [-O2]"), false, Path::new(""));
        bag.add_declared(
            decl("name: native\nparent: default\nvars:\n  CFLAGS: [-Os]"),
            true,
            Path::new(""),
        );
        bag.wire().unwrap();
        bag
    }

    #[test]
    fn test_wire_resolves_parents_and_vars() {
        let bag = bag_with_chain();
        let native = bag.lookup("native").unwrap();
        let ctx = bag.get(native);
        assert_eq!(ctx.parent, bag.lookup("default"));
        // Parent list entries come first, child entries appended.
        assert_eq!(
            ctx.vars.get("CFLAGS").unwrap().as_list(),
            vec!["-O2".to_string(), "-Os".to_string()]
        );
    }

    #[test]
    fn test_default_bindir_chain() {
        let bag = bag_with_chain();
        assert_eq!(bag.get(bag.lookup("default").unwrap()).bindir, "build");
        assert_eq!(bag.get(bag.lookup("native").unwrap()).bindir, "build/native");
    }

    #[test]
    fn test_unknown_parent_fails() {
        let mut bag = ContextBag::new();
        bag.add_declared(decl("name: child\nparent: nowhere"), false, Path::new(""));
        assert!(bag.wire().is_err());
    }

    #[test]
    fn test_parent_cycle_fails() {
        let mut bag = ContextBag::new();
        bag.add_declared(decl("name: a\nparent: b"), false, Path::new(""));
        bag.add_declared(decl("name: b\nparent: a"), false, Path::new(""));
        assert!(bag.wire().is_err());
    }

    #[test]
    fn test_module_lookup_walks_up_and_honors_disable() {
        let mut bag = ContextBag::new();
        let default = bag.add_declared(decl("name: default"), false, Path::new(""));
        let native = bag.add_declared(
            decl("name: native\nparent: default\ndisable_modules: [hidden]"),
            true,
            Path::new(""),
        );
        bag.wire().unwrap();
        bag.register_module(default, "core", 0);
        bag.register_module(default, "hidden", 1);

        assert_eq!(bag.get_module(native, "core"), Some(0));
        assert_eq!(bag.get_module(native, "hidden"), None);
        assert_eq!(bag.get_module(default, "hidden"), Some(1));
    }

    #[test]
    fn test_listed_checks_ancestors() {
        let bag = bag_with_chain();
        let native = bag.lookup("native").unwrap();
        let mut set = HashSet::new();
        set.insert("default".to_string());
        assert!(bag.listed(native, &set));
        let mut other = HashSet::new();
        other.insert("esp32".to_string());
        assert!(!bag.listed(native, &other));
    }

    #[test]
    fn test_ephemeral_context_not_in_name_index() {
        let mut bag = bag_with_chain();
        let native = bag.lookup("native").unwrap();
        let app_vars: VarMap = serde_yaml::from_str("CFLAGS: [-g]").unwrap();
        let eph = bag.add_ephemeral("hello", native, &app_vars).unwrap();
        assert_eq!(bag.lookup("hello"), None);
        assert_eq!(
            bag.get(eph).vars.get("CFLAGS").unwrap().as_list(),
            vec!["-O2".to_string(), "-Os".to_string(), "-g".to_string()]
        );
        assert_eq!(bag.display_chain(eph), "Context(\"hello\"->\"native\"->\"default\")");
    }
}
