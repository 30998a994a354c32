//! Rules: parameterized command templates, invoked once per
//! source-to-artifact transformation, with a per-run action cache that
//! de-duplicates identical build statements.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{LazeError, Result};
use crate::model::Declaration;
use crate::ninja::{NinjaWriter, RuleOpts};
use crate::project::schema::{RuleDecl, VarOptionsDecl};
use crate::vars::{VarMap, VarValue};

pub type RuleId = usize;

#[derive(Debug)]
pub struct Rule {
    pub name: String,
    pub cmd: String,
    pub in_ext: Option<String>,
    pub out_ext: Option<String>,
    pub deps: Option<String>,
    pub depfile: Option<String>,
    pub var_options: IndexMap<String, VarOptionsDecl>,
    /// Variable slots referenced by `cmd`, minus the implicit in/out.
    pub var_slots: Vec<String>,
    pub relpath: PathBuf,
}

impl Declaration for Rule {
    fn name(&self) -> &str {
        &self.name
    }

    fn relpath(&self) -> &Path {
        &self.relpath
    }
}

#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    by_name: HashMap<String, RuleId>,
    by_ext: HashMap<String, RuleId>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, decl: RuleDecl, relpath: &Path) -> Result<RuleId> {
        let slot_re = regex::Regex::new(r"\$\{(\w+)\}").unwrap();
        let mut var_slots = Vec::new();
        for capture in slot_re.captures_iter(&decl.cmd) {
            let name = &capture[1];
            if name != "in" && name != "out" && !var_slots.iter().any(|s| s == name) {
                var_slots.push(name.to_string());
            }
        }

        let id = self.rules.len();
        if let Some(in_ext) = &decl.in_ext {
            if self.by_ext.contains_key(in_ext) {
                return Err(LazeError::InvalidArgument(format!(
                    "rule {}: extension {} already taken",
                    decl.name, in_ext
                )));
            }
            self.by_ext.insert(in_ext.clone(), id);
        }
        self.by_name.insert(decl.name.clone(), id);
        self.rules.push(Rule {
            name: decl.name,
            cmd: decl.cmd,
            in_ext: decl.in_ext,
            out_ext: decl.out_ext,
            deps: decl.deps,
            depfile: decl.depfile,
            var_options: decl.var_options,
            var_slots,
            relpath: relpath.to_path_buf(),
        });
        Ok(id)
    }

    pub fn get(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }

    pub fn by_name(&self, name: &str) -> Option<&Rule> {
        self.by_name.get(name).map(|&id| &self.rules[id])
    }

    /// Look up the rule registered for `filename`'s extension.
    pub fn for_source(&self, filename: &str) -> Option<&Rule> {
        let base = filename.rsplit('/').next().unwrap_or(filename);
        let ext = match base.rfind('.') {
            Some(pos) => &base[pos..],
            None => "",
        };
        self.by_ext.get(ext).map(|&id| &self.rules[id])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }
}

/// Per-run de-duplication of emitted build statements: identical
/// (rule, inputs, resolved variables) map to the first emitted output.
#[derive(Debug, Default)]
pub struct ActionCache {
    cache: HashMap<ActionKey, String>,
    pub num: usize,
    pub cached: usize,
}

#[derive(Debug, Hash, PartialEq, Eq)]
struct ActionKey {
    rule: String,
    inputs: Vec<String>,
    vars: Vec<(String, String)>,
}

impl Rule {
    pub fn write_rule<W: Write>(&self, writer: &mut NinjaWriter<W>) -> Result<()> {
        let description = format!("{} ${{out}}", self.name);
        writer.rule(
            &self.name,
            &self.cmd,
            &RuleOpts {
                description: Some(&description),
                depfile: self.depfile.as_deref(),
                deps: self.deps.as_deref(),
                ..Default::default()
            },
        )
    }

    /// Resolve this rule's variable slots from `vars`, applying var-option
    /// joining or, for plain lists, the ordering-sigil pass.
    pub fn resolve_vars(&self, vars: &VarMap) -> Vec<(String, String)> {
        let mut resolved = Vec::new();
        for slot in &self.var_slots {
            let Some(value) = vars.get(slot) else {
                continue;
            };
            let text = match self.var_options.get(slot) {
                Some(opts) => join_with_options(&value.as_list(), opts),
                None => match value {
                    VarValue::List(list) => sigil_join(list),
                    VarValue::Scalar(s) => s.clone(),
                    VarValue::Null => String::new(),
                },
            };
            resolved.push((slot.clone(), text));
        }
        resolved
    }

    /// Emit one build statement, unless an identical action was already
    /// emitted, in which case the earlier output path is returned and the
    /// caller is expected to alias it.
    pub fn build_action<W: Write>(
        &self,
        writer: &mut NinjaWriter<W>,
        cache: &mut ActionCache,
        inputs: &[String],
        output: &str,
        vars: Option<&VarMap>,
    ) -> Result<String> {
        let empty = VarMap::new();
        let resolved = self.resolve_vars(vars.unwrap_or(&empty));

        let mut key_vars = resolved.clone();
        key_vars.sort();
        let key = ActionKey {
            rule: self.name.clone(),
            inputs: inputs.to_vec(),
            vars: key_vars,
        };

        cache.num += 1;
        if let Some(previous) = cache.cache.get(&key) {
            cache.cached += 1;
            return Ok(previous.clone());
        }

        cache.cache.insert(key, output.to_string());
        writer.build(&[output.to_string()], &self.name, inputs, &[], &resolved)?;
        Ok(output.to_string())
    }
}

fn join_with_options(values: &[String], opts: &VarOptionsDecl) -> String {
    let joined = values
        .iter()
        .map(|v| format!("{}{}{}", opts.prefix, v, opts.suffix))
        .collect::<Vec<_>>()
        .join(&opts.joiner);
    format!("{}{}{}", opts.start, joined, opts.end)
}

/// Sort a list by ordering sigils (`<` first, `>` last), strip the sigils
/// (including the `\` escape), and join with spaces.
fn sigil_join(list: &[String]) -> String {
    let mut sorted: Vec<&String> = list.iter().collect();
    sorted.sort_by_key(|entry| match entry.chars().next() {
        Some('<') => 0,
        Some('>') => 2,
        _ => 1,
    });
    sorted
        .iter()
        .map(|entry| match entry.chars().next() {
            Some('<') | Some('>') | Some('\\') => entry[1..].to_string(),
            _ => entry.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
