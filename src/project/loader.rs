//! Recursive ingestion of project declaration documents.
//!
//! A document may pull in sibling files (`include`), descend into
//! subdirectories (`subdirs`), defer to external sources (`import`),
//! propagate `defaults` to matching keys of its descendants, and expand
//! itself into a Cartesian product of copies (`template`). Template tokens
//! are literal substrings rewritten across all string values; tokens that
//! occur inside longer words are rewritten too, so authors should pick
//! distinctive tokens (e.g. `@BOARD@`).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::download::DownloadQueue;
use crate::error::{LazeError, Result};
use crate::project::imports;
use crate::project::schema::ImportDecl;
use crate::util::merge::{deep_merge, MergeOpts};
use crate::util::subst::{deep_replace, dict_list_product};
use crate::util::{listify, listify_strings};
use crate::PROJECT_FILENAME;

/// One loaded declaration document, tagged with the directory it came from
/// (relative to the project root).
#[derive(Debug, Clone)]
pub struct RawDoc {
    pub relpath: PathBuf,
    pub doc: Mapping,
    pub template_instance: Option<IndexMap<String, String>>,
    pub template_instance_num: Option<usize>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub docs: Vec<RawDoc>,
    /// Every file read during the load (relative to the project root), for
    /// the regeneration rule.
    pub files: BTreeSet<PathBuf>,
}

/// Load `project_file` (relative to `root`) and everything it references.
pub fn load(root: &Path, project_file: &Path, dl: &mut DownloadQueue) -> Result<LoadResult> {
    let mut loader = Loader {
        root: root.to_path_buf(),
        files: BTreeSet::new(),
        imports: Vec::new(),
    };
    let mut docs = loader.load_file(project_file, Path::new(""), None, None)?;

    // Imports resolve between passes; imported files may import again.
    loop {
        let pending = std::mem::take(&mut loader.imports);
        if pending.is_empty() {
            break;
        }
        let resolved = imports::resolve(root, pending, dl)?;
        dl.fetch_all()?;
        for import in resolved {
            docs.extend(loader.load_file(
                &import.folder.join(PROJECT_FILENAME),
                &import.folder,
                None,
                Some(&import.importer),
            )?);
        }
    }

    Ok(LoadResult {
        docs,
        files: loader.files,
    })
}

struct Loader {
    root: PathBuf,
    files: BTreeSet<PathBuf>,
    imports: Vec<(PathBuf, ImportDecl)>,
}

const META_KEYS: &[&str] = &["include", "subdirs", "import", "defaults", "template", "ignore"];

impl Loader {
    fn load_file(
        &mut self,
        filename: &Path,
        relpath: &Path,
        defaults: Option<&Mapping>,
        parent: Option<&Path>,
    ) -> Result<Vec<RawDoc>> {
        debug!("loading {} with relpath {:?}", filename.display(), relpath);
        self.files.insert(filename.to_path_buf());

        let content = std::fs::read_to_string(self.root.join(filename)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                let included = parent
                    .map(|p| format!(" (included by {})", p.display()))
                    .unwrap_or_default();
                LazeError::ParseError(format!("cannot find {}{}", filename.display(), included))
            } else {
                LazeError::IoError(e)
            }
        })?;

        let mut res = Vec::new();
        for document in multi_docs(&content)? {
            let mut doc = document;

            self.remember_imports(filename, &doc)?;

            // Defaults from enclosing documents merge with this document's
            // own `defaults`, then apply to its shared top-level keys.
            let effective_defaults = combine_defaults(defaults, &doc)?;
            if let Some(effective) = &effective_defaults {
                merge_defaults(&mut doc, effective)?;
            }

            let template = take_template(&mut doc)?;

            if let Some(template) = template {
                for (num, combo) in dict_list_product(&template).into_iter().enumerate() {
                    let mut copy = Value::Mapping(doc.clone());
                    deep_replace(&mut copy, &combo);
                    let Value::Mapping(mut copy) = copy else {
                        unreachable!()
                    };
                    self.inline_includes(&mut copy, filename, relpath)?;
                    strip_meta_keys(&mut copy);
                    res.push(RawDoc {
                        relpath: relpath.to_path_buf(),
                        doc: copy,
                        template_instance: Some(combo),
                        template_instance_num: Some(num),
                    });
                }
            } else {
                self.inline_includes(&mut doc, filename, relpath)?;

                let subdirs = listify_strings(doc.get("subdirs")).ok_or_else(|| {
                    LazeError::ParseError(format!(
                        "{}: subdirs must be a list of names",
                        filename.display()
                    ))
                })?;

                strip_meta_keys(&mut doc);
                res.push(RawDoc {
                    relpath: relpath.to_path_buf(),
                    doc,
                    template_instance: None,
                    template_instance_num: None,
                });

                for subdir in subdirs {
                    let sub_relpath = relpath.join(&subdir);
                    res.extend(self.load_file(
                        &sub_relpath.join(PROJECT_FILENAME),
                        &sub_relpath,
                        effective_defaults.as_ref(),
                        Some(filename),
                    )?);
                }
            }
        }

        Ok(res)
    }

    fn remember_imports(&mut self, filename: &Path, doc: &Mapping) -> Result<()> {
        for entry in listify(doc.get("import")) {
            let decl: ImportDecl = serde_yaml::from_value(entry).map_err(|e| {
                LazeError::ParseError(format!("{}: bad import entry: {}", filename.display(), e))
            })?;
            self.imports.push((filename.to_path_buf(), decl));
        }
        Ok(())
    }

    /// Inline every `include`d sibling: the included document forms the
    /// base, the includer's keys override it.
    fn inline_includes(&mut self, doc: &mut Mapping, filename: &Path, relpath: &Path) -> Result<()> {
        let includes = listify_strings(doc.get("include")).ok_or_else(|| {
            LazeError::ParseError(format!(
                "{}: include must be a list of paths",
                filename.display()
            ))
        })?;
        doc.remove("include");

        for include in includes {
            let dir = filename.parent().unwrap_or(Path::new(""));
            let included = self.load_file(&dir.join(&include), relpath, None, Some(filename))?;
            let first = included.into_iter().next();
            if first
                .as_ref()
                .map(|d| d.template_instance.is_some())
                .unwrap_or(false)
            {
                return Err(LazeError::ParseError(
                    "template statement in included file currently not supported!".to_string(),
                ));
            }
            let mut base = first.map(|d| d.doc).unwrap_or_default();

            base.remove("ignore");

            deep_merge(
                &mut base,
                doc,
                MergeOpts {
                    override_values: true,
                    ..Default::default()
                },
            )?;
            *doc = base;
        }
        Ok(())
    }
}

/// Split a YAML stream into its documents, skipping empty ones.
fn multi_docs(content: &str) -> Result<Vec<Mapping>> {
    let mut docs = Vec::new();
    for de in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(de)?;
        match value {
            Value::Null => {}
            Value::Mapping(map) => docs.push(map),
            _ => {
                return Err(LazeError::ParseError(
                    "project documents must be mappings".to_string(),
                ))
            }
        }
    }
    Ok(docs)
}

fn combine_defaults(inherited: Option<&Mapping>, doc: &Mapping) -> Result<Option<Mapping>> {
    let own = match doc.get("defaults") {
        Some(Value::Mapping(map)) => Some(map),
        Some(Value::Null) | None => None,
        Some(_) => {
            return Err(LazeError::ParseError(
                "defaults must be a mapping".to_string(),
            ))
        }
    };

    match (inherited, own) {
        (None, None) => Ok(None),
        (Some(base), None) => Ok(Some(base.clone())),
        (None, Some(own)) => Ok(Some(own.clone())),
        (Some(base), Some(own)) => {
            let mut merged = base.clone();
            deep_merge(&mut merged, own, MergeOpts::default())?;
            Ok(Some(merged))
        }
    }
}

/// For every top-level key the document shares with `defaults`, merge the
/// default value in: list entries element-wise, null entries materialized.
fn merge_defaults(doc: &mut Mapping, defaults: &Mapping) -> Result<()> {
    let opts = MergeOpts {
        join_lists: true,
        ..Default::default()
    };

    for (key, default_val) in defaults {
        let Some(doc_val) = doc.get_mut(key) else {
            continue;
        };
        match doc_val {
            Value::Sequence(entries) => {
                for entry in entries {
                    if let (Value::Mapping(entry), Value::Mapping(default_val)) =
                        (entry, default_val)
                    {
                        deep_merge(entry, default_val, opts)?;
                    }
                }
            }
            Value::Null => {
                *doc_val = default_val.clone();
            }
            Value::Mapping(map) => {
                if let Value::Mapping(default_val) = default_val {
                    deep_merge(map, default_val, opts)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn take_template(doc: &mut Mapping) -> Result<Option<IndexMap<String, Vec<String>>>> {
    let template = match doc.remove("template") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Mapping(map)) => map,
        Some(_) => {
            return Err(LazeError::ParseError(
                "template must be a mapping of token to value list".to_string(),
            ))
        }
    };

    let mut table = IndexMap::new();
    for (key, values) in template {
        let Value::String(token) = key else {
            return Err(LazeError::ParseError(
                "template tokens must be strings".to_string(),
            ));
        };
        let values = listify_strings(Some(&values)).ok_or_else(|| {
            LazeError::ParseError(format!("template values for {} must be strings", token))
        })?;
        table.insert(token, values);
    }
    if table.is_empty() {
        return Ok(None);
    }
    Ok(Some(table))
}

fn strip_meta_keys(doc: &mut Mapping) {
    for key in META_KEYS {
        doc.remove(*key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn load_in(dir: &Path) -> LoadResult {
        let mut dl = DownloadQueue::new();
        load(dir, Path::new(PROJECT_FILENAME), &mut dl).unwrap()
    }

    #[test]
    fn test_missing_file_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut dl = DownloadQueue::new();
        let err = load(tmp.path(), Path::new("laze.yml"), &mut dl).unwrap_err();
        assert!(matches!(err, LazeError::ParseError(msg) if msg.contains("cannot find")));
    }

    #[test]
    fn test_subdir_descent_sets_relpath() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "laze.yml", "subdirs: [sub]\nmodule:\n  name: top\n");
        write(tmp.path(), "sub/laze.yml", "module:\n  name: inner\n");
        let result = load_in(tmp.path());
        assert_eq!(result.docs.len(), 2);
        assert_eq!(result.docs[0].relpath, Path::new(""));
        assert_eq!(result.docs[1].relpath, Path::new("sub"));
        assert!(result.files.contains(Path::new("sub/laze.yml")));
    }

    #[test]
    fn test_include_merges_with_includer_overriding() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "laze.yml",
            "include: [common.yml]\nmodule:\n  name: top\n",
        );
        write(
            tmp.path(),
            "common.yml",
            "ignore: scratch\nrule:\n  name: CC\n  cmd: cc\nmodule:\n  name: base\n",
        );
        let result = load_in(tmp.path());
        assert_eq!(result.docs.len(), 1);
        let doc = &result.docs[0].doc;
        // Includer overrides the shared `module` key, included `rule` kept.
        let module = doc.get("module").unwrap();
        assert_eq!(module.get("name"), Some(&Value::String("top".to_string())));
        assert!(doc.get("rule").is_some());
        assert!(doc.get("ignore").is_none());
    }

    #[test]
    fn test_template_in_included_file_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "laze.yml", "include: [tpl.yml]\n");
        write(tmp.path(), "tpl.yml", "template:\n  X: [a]\nmodule:\n  name: X\n");
        let mut dl = DownloadQueue::new();
        let err = load(tmp.path(), Path::new(PROJECT_FILENAME), &mut dl).unwrap_err();
        assert!(matches!(err, LazeError::ParseError(msg) if msg.contains("template")));
    }

    #[test]
    fn test_template_expansion() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "laze.yml",
            "template:\n  BOARD: [a, b, c]\nmodule:\n  name: app-BOARD\n",
        );
        let result = load_in(tmp.path());
        assert_eq!(result.docs.len(), 3);
        let names: Vec<String> = result
            .docs
            .iter()
            .map(|d| {
                d.doc
                    .get("module")
                    .and_then(|m| m.get("name"))
                    .and_then(Value::as_str)
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(names, vec!["app-a", "app-b", "app-c"]);
        let nums: Vec<usize> = result
            .docs
            .iter()
            .map(|d| d.template_instance_num.unwrap())
            .collect();
        assert_eq!(nums, vec![0, 1, 2]);
        assert_eq!(
            result.docs[1].template_instance.as_ref().unwrap()["BOARD"],
            "b"
        );
    }

    #[test]
    fn test_defaults_propagate_to_subdirs() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "laze.yml",
            "defaults:\n  module:\n    uses: [base]\nsubdirs: [sub]\n",
        );
        write(
            tmp.path(),
            "sub/laze.yml",
            "module:\n  name: inner\n  uses: [extra]\n",
        );
        let result = load_in(tmp.path());
        let module = result.docs[1].doc.get("module").unwrap();
        let uses: Vec<String> = module
            .get("uses")
            .unwrap()
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(uses, vec!["extra", "base"]);
    }

    #[test]
    fn test_defaults_merge_per_list_element_and_materialize_null() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "laze.yml",
            concat!(
                "defaults:\n",
                "  module:\n",
                "    context: periph\n",
                "    uses: [base]\n",
                "module:\n",
                "  - name: one\n",
                "  - name: two\n",
                "    uses: [extra]\n",
                "---\n",
                "defaults:\n",
                "  app:\n",
                "    uses: [base]\n",
                "app:\n"
            ),
        );
        let result = load_in(tmp.path());
        let modules = result.docs[0]
            .doc
            .get("module")
            .unwrap()
            .as_sequence()
            .unwrap();
        assert_eq!(
            modules[0].get("context"),
            Some(&Value::String("periph".to_string()))
        );
        let uses: Vec<&str> = modules[1]
            .get("uses")
            .unwrap()
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(uses, vec!["extra", "base"]);
        // Null entry materialized from the defaults.
        let app = result.docs[1].doc.get("app").unwrap();
        assert!(app.get("uses").is_some());
    }

    #[test]
    fn test_defaults_scalar_conflict_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "laze.yml",
            concat!(
                "defaults:\n",
                "  module:\n",
                "    context: periph\n",
                "module:\n",
                "  name: one\n",
                "  context: other\n",
            ),
        );
        let mut dl = DownloadQueue::new();
        let err = load(tmp.path(), Path::new(PROJECT_FILENAME), &mut dl).unwrap_err();
        assert!(matches!(err, LazeError::ConflictAtPath { .. }));
    }

    #[test]
    fn test_multi_document_stream() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "laze.yml",
            "module:\n  name: one\n---\nmodule:\n  name: two\n",
        );
        let result = load_in(tmp.path());
        assert_eq!(result.docs.len(), 2);
    }
}
