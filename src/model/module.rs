//! Modules and apps: reusable compilation units. An app is a module that
//! must be linked into a final artifact; the extra attributes live in
//! [`AppSpec`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{LazeError, Result};
use crate::model::{ContextId, Declaration};
use crate::project::schema::{AppDecl, DownloadDecl, ModuleDecl, SourceDecl, ToolDecl};
use crate::vars::{strip_remove_markers, VarMap};

pub type ModuleId = usize;

#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub relpath: PathBuf,
    pub context_name: String,
    pub context: Option<ContextId>,
    pub depends: Vec<String>,
    pub uses: Vec<String>,
    pub sources: Vec<SourceDecl>,
    pub vars: VarMap,
    pub global_vars: VarMap,
    pub export_vars: VarMap,
    pub download: Option<DownloadDecl>,
    pub use_optional_source_deps: bool,
    /// Set when `download` relocates the module's sources.
    pub override_source_location: Option<PathBuf>,
    pub app: Option<AppSpec>,
    pub template_instance: Option<IndexMap<String, String>>,
    pub template_instance_num: Option<usize>,
}

#[derive(Debug)]
pub struct AppSpec {
    pub bindir: String,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    pub tools: IndexMap<String, ToolDecl>,
}

impl Declaration for Module {
    fn name(&self) -> &str {
        &self.name
    }

    fn relpath(&self) -> &Path {
        &self.relpath
    }
}

impl Module {
    pub fn from_decl(decl: ModuleDecl, relpath: &Path, app: Option<AppSpec>) -> Result<Module> {
        let name = match decl.name {
            Some(name) => name,
            None => {
                let derived = relpath.to_string_lossy().to_string();
                if derived.is_empty() {
                    return Err(LazeError::InvalidArgument("module missing name".to_string()));
                }
                derived
            }
        };

        let mut depends = decl.depends;
        let mut uses = decl.uses;
        strip_remove_markers(&mut depends);
        strip_remove_markers(&mut uses);

        // An optional dependency also signals feature use, so its define is
        // emitted whenever the module happens to be present.
        for dep in &depends {
            if let Some(stripped) = dep.strip_prefix('?') {
                uses.push(stripped.to_string());
            }
        }

        let mut vars = decl.vars;
        vars.listify_values();

        Ok(Module {
            name,
            relpath: relpath.to_path_buf(),
            context_name: decl.context.unwrap_or_else(|| "default".to_string()),
            context: None,
            depends,
            uses,
            sources: decl.sources,
            vars,
            global_vars: decl.global_vars,
            export_vars: decl.export_vars,
            download: decl.download,
            use_optional_source_deps: decl.options.use_optional_source_deps,
            override_source_location: None,
            app,
            template_instance: None,
            template_instance_num: None,
        })
    }

    pub fn from_app_decl(decl: AppDecl, relpath: &Path) -> Result<Module> {
        let spec = AppSpec {
            bindir: decl
                .bindir
                .clone()
                .unwrap_or_else(|| "${bindir}/${name}".to_string()),
            whitelist: decl.whitelist.clone(),
            blacklist: decl.blacklist.clone(),
            tools: decl.tools.clone(),
        };
        Module::from_decl(decl.module(), relpath, Some(spec))
    }

    pub fn is_app(&self) -> bool {
        self.app.is_some()
    }

    /// Locate `filename` relative to where this module's sources live.
    pub fn locate_source(&self, filename: &str) -> String {
        let base = self
            .override_source_location
            .as_deref()
            .unwrap_or(&self.relpath);
        let joined = if filename.is_empty() {
            base.to_string_lossy().to_string()
        } else if base.as_os_str().is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", base.to_string_lossy(), filename)
        };
        let trimmed = joined.trim_end_matches('/');
        if trimmed.is_empty() {
            ".".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// The substitution table for this module's variable templates.
    pub fn subst_table(&self) -> HashMap<String, String> {
        let mut table = HashMap::new();
        table.insert("source_folder".to_string(), self.locate_source(""));
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(yaml: &str, relpath: &str) -> Module {
        let decl: ModuleDecl = serde_yaml::from_str(yaml).unwrap();
        Module::from_decl(decl, Path::new(relpath), None).unwrap()
    }

    #[test]
    fn test_name_defaults_to_relpath() {
        let m = module("sources: [uart.c]", "drivers/uart");
        assert_eq!(m.name, "drivers/uart");
    }

    #[test]
    fn test_nameless_module_without_relpath_fails() {
        let decl: ModuleDecl = serde_yaml::from_str("sources: [x.c]").unwrap();
        let err = Module::from_decl(decl, Path::new(""), None).unwrap_err();
        assert!(matches!(err, LazeError::InvalidArgument(_)));
    }

    #[test]
    fn test_optional_depends_add_uses() {
        let m = module("name: core\ndepends: [periph, \"?rtc\"]", "");
        assert_eq!(m.depends, vec!["periph", "?rtc"]);
        assert_eq!(m.uses, vec!["rtc"]);
    }

    #[test]
    fn test_remove_markers_applied() {
        let m = module("name: core\ndepends: [a, -b, b]", "");
        assert_eq!(m.depends, vec!["a"]);
    }

    #[test]
    fn test_locate_source() {
        let mut m = module("name: core\nsources: [main.c]", "sys/core");
        assert_eq!(m.locate_source("main.c"), "sys/core/main.c");
        assert_eq!(m.locate_source(""), "sys/core");
        m.override_source_location = Some(PathBuf::from(".laze/dl/sys/core/core"));
        assert_eq!(m.locate_source("main.c"), ".laze/dl/sys/core/core/main.c");
        let root = module("name: top\nsources: [main.c]", "");
        assert_eq!(root.locate_source("main.c"), "main.c");
        assert_eq!(root.locate_source(""), ".");
    }

    #[test]
    fn test_app_decl_defaults() {
        let decl: AppDecl = serde_yaml::from_str("name: hello\nsources: [main.c]").unwrap();
        let app = Module::from_app_decl(decl, Path::new("apps/hello")).unwrap();
        let spec = app.app.as_ref().unwrap();
        assert_eq!(spec.bindir, "${bindir}/${name}");
        assert!(spec.whitelist.is_empty());
        assert!(app.is_app());
    }
}
