//! Declaration schema: the typed shape of every entity a project document
//! may declare. Unknown fields are rejected so typos surface as parse
//! errors instead of being silently dropped.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::vars::VarMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextDecl {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub bindir: Option<String>,
    #[serde(default)]
    pub vars: VarMap,
    #[serde(default)]
    pub disable_modules: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDecl {
    pub name: String,
    pub cmd: String,
    /// Input extension this rule is registered for, with leading dot
    /// (e.g. `.c`). Rules without one are only reachable by name.
    #[serde(default, rename = "in")]
    pub in_ext: Option<String>,
    /// Output extension, without a leading dot (e.g. `o`).
    #[serde(default, rename = "out")]
    pub out_ext: Option<String>,
    #[serde(default)]
    pub deps: Option<String>,
    #[serde(default)]
    pub depfile: Option<String>,
    #[serde(default)]
    pub var_options: IndexMap<String, VarOptionsDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VarOptionsDecl {
    #[serde(default = "default_joiner")]
    pub joiner: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

fn default_joiner() -> String {
    " ".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDecl {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub depends: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub uses: Vec<String>,
    #[serde(default, deserialize_with = "source_list")]
    pub sources: Vec<SourceDecl>,
    #[serde(default)]
    pub vars: VarMap,
    #[serde(default)]
    pub global_vars: VarMap,
    #[serde(default)]
    pub export_vars: VarMap,
    #[serde(default)]
    pub download: Option<DownloadDecl>,
    #[serde(default)]
    pub options: ModuleOptionsDecl,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleOptionsDecl {
    #[serde(default)]
    pub use_optional_source_deps: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppDecl {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub depends: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub uses: Vec<String>,
    #[serde(default, deserialize_with = "source_list")]
    pub sources: Vec<SourceDecl>,
    #[serde(default)]
    pub vars: VarMap,
    #[serde(default)]
    pub global_vars: VarMap,
    #[serde(default)]
    pub export_vars: VarMap,
    #[serde(default)]
    pub download: Option<DownloadDecl>,
    #[serde(default)]
    pub options: ModuleOptionsDecl,
    #[serde(default)]
    pub bindir: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub whitelist: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub tools: IndexMap<String, ToolDecl>,
}

impl AppDecl {
    /// The module part of an app declaration.
    pub fn module(&self) -> ModuleDecl {
        ModuleDecl {
            name: self.name.clone(),
            context: self.context.clone(),
            depends: self.depends.clone(),
            uses: self.uses.clone(),
            sources: self.sources.clone(),
            vars: self.vars.clone(),
            global_vars: self.global_vars.clone(),
            export_vars: self.export_vars.clone(),
            download: self.download.clone(),
            options: self.options.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDecl {
    #[serde(deserialize_with = "one_or_many")]
    pub cmd: Vec<String>,
}

/// A module source entry: either a plain file name or a conditional block
/// mapping a comma-joined list of module names to the files they enable.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourceDecl {
    File(String),
    Conditional(IndexMap<String, OneOrMany>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// External source acquisition for a module: either a bare git URL or the
/// explicit `{git: {url, commit}}` form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DownloadDecl {
    Url(String),
    Git { git: GitDecl },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitDecl {
    pub url: String,
    #[serde(default)]
    pub commit: Option<String>,
}

/// One entry of an `import:` list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImportDecl {
    Name(String),
    Detailed(IndexMap<String, ImportSpec>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportSpec {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub subdir: Option<String>,
    #[serde(default)]
    pub folder_override: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = OneOrManyOrNull::deserialize(deserializer)?;
    Ok(match value {
        OneOrManyOrNull::Null => Vec::new(),
        OneOrManyOrNull::One(s) => vec![s],
        OneOrManyOrNull::Many(v) => v,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrManyOrNull {
    Null,
    One(String),
    Many(Vec<String>),
}

fn source_list<'de, D>(deserializer: D) -> Result<Vec<SourceDecl>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Null,
        One(SourceDecl),
        Many(Vec<SourceDecl>),
    }
    Ok(match Repr::deserialize(deserializer)? {
        Repr::Null => Vec::new(),
        Repr::One(s) => vec![s],
        Repr::Many(v) => v,
    })
}
