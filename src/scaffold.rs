//! The `create` verb: write an initial project file into the current
//! directory.

use std::path::Path;

use anyhow::{bail, Result};
use clap::ValueEnum;

use crate::util::{split_commas, uniquify};
use crate::PROJECT_FILENAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CreateType {
    App,
    Module,
    Subdir,
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub create_type: CreateType,
    pub name: Option<String>,
    pub context: Option<String>,
    pub depends: Vec<String>,
    pub uses: Vec<String>,
    pub sources: Vec<String>,
}

pub fn run_create(dir: &Path, opts: &CreateOptions) -> Result<()> {
    let path = dir.join(PROJECT_FILENAME);
    if path.is_file() {
        bail!("'{}' already exists.", PROJECT_FILENAME);
    }
    let content = render(dir, opts)?;
    std::fs::write(&path, content)?;
    Ok(())
}

fn render(dir: &Path, opts: &CreateOptions) -> Result<String> {
    let mut out = String::new();

    if opts.create_type == CreateType::Subdir {
        out.push_str("subdirs:\n");
        for name in list_dirs(dir)? {
            out.push_str(&format!("    - {}\n", name));
        }
        return Ok(out);
    }

    match opts.create_type {
        CreateType::App => out.push_str("app:\n"),
        CreateType::Module => out.push_str("module:\n"),
        CreateType::Subdir => unreachable!(),
    }

    if let Some(name) = &opts.name {
        out.push_str(&format!("    name: {}\n", name));
    }
    if let Some(context) = &opts.context {
        out.push_str(&format!("    context: {}\n", context));
    }

    for (key, entries) in [("depends", &opts.depends), ("uses", &opts.uses)] {
        if entries.is_empty() {
            continue;
        }
        out.push_str(&format!("    {}:\n", key));
        let mut split = split_commas(entries);
        split.sort();
        for entry in uniquify(&split) {
            out.push_str(&format!("        - {}\n", entry));
        }
    }

    out.push_str("    sources:\n");
    let sources = if opts.sources.is_empty() {
        list_sources(dir)?
    } else {
        split_commas(&opts.sources)
    };
    let mut sources = sources;
    sources.sort();
    for source in uniquify(&sources) {
        out.push_str(&format!("        - {}\n", source));
    }

    Ok(out)
}

fn list_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

const SOURCE_EXTENSIONS: &[&str] = &["c", "cpp", "s", "S"];

fn list_sources(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some((_, ext)) = name.rsplit_once('.') {
            if SOURCE_EXTENSIONS.contains(&ext) {
                names.push(name);
            }
        }
    }
    Ok(names)
}
