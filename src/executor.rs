//! The `build` verb: translate the caller's directory and filters into
//! Ninja targets via the generation sidecar files, invoke the downstream
//! executor, and run any requested post-build tool.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::generator::{self, GenerateOptions, NINJA_FILENAME};
use crate::PROJECT_FILENAME;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub project_file: Option<PathBuf>,
    pub project_root: Option<PathBuf>,
    pub build_dir: PathBuf,
    pub builders: Vec<String>,
    pub tool: Option<String>,
    pub global: bool,
    pub verbose: bool,
    pub targets: Vec<String>,
}

#[derive(Debug)]
struct Dirs {
    start_dir: PathBuf,
    project_root: PathBuf,
    project_file: PathBuf,
    build_dir: PathBuf,
}

type AppPerFolder = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

#[derive(Debug, Clone, Deserialize)]
struct ToolEntry {
    cmd: Vec<String>,
}

pub fn run_build(opts: &BuildOptions) -> Result<()> {
    let dirs = determine_dirs(opts)?;
    debug!("using build dir {}", dirs.build_dir.display());

    // A missing laze-args means generation never ran for this build dir.
    let laze_args = dirs.build_dir.join("laze-args");
    if !laze_args.exists() {
        generator::generate_to_file(&GenerateOptions {
            project_file: dirs.project_file.clone(),
            project_root: dirs.project_root.clone(),
            build_dir: dirs.build_dir.clone(),
            ..Default::default()
        })
        .context("generating build files")?;
    }
    if !laze_args.exists() {
        bail!("generation did not produce {}", laze_args.display());
    }

    let mut app_target_map: HashMap<String, (String, String)> = HashMap::new();
    let mut ninja_targets: Vec<String>;

    if opts.global {
        println!("laze: global mode");
        ninja_targets = opts.targets.clone();
    } else {
        let rel_start = relative_start_dir(&dirs);
        println!("laze: local mode in \"{}\"", rel_start);

        let per_folder: AppPerFolder = read_json(&dirs.build_dir.join("laze-app-per-folder"))?;
        let local = per_folder.get(&rel_start).cloned().unwrap_or_default();

        ninja_targets = Vec::new();
        for (app, builder_targets) in &local {
            for (builder, target) in builder_targets {
                if !opts.builders.is_empty() && !opts.builders.contains(builder) {
                    continue;
                }
                if !opts.targets.is_empty() && !opts.targets.contains(app) {
                    continue;
                }
                println!("laze: building {} for {}", app, builder);
                ninja_targets.push(target.clone());
                app_target_map.insert(target.clone(), (app.clone(), builder.clone()));
            }
        }
    }

    let mut tool_runs: Vec<(String, Vec<String>)> = Vec::new();
    if let Some(tool_name) = &opts.tool {
        if ninja_targets.is_empty() {
            bail!("tool specified but no target given (or locally available)");
        }
        if ninja_targets.len() > 1 {
            bail!("multiple targets for tool {} specified", tool_name);
        }

        let tools: BTreeMap<String, BTreeMap<String, ToolEntry>> =
            read_json(&dirs.build_dir.join("laze-tools"))?;
        for target in &ninja_targets {
            let entry = tools
                .get(target)
                .and_then(|t| t.get(tool_name))
                .ok_or_else(|| {
                    let (app, builder) = app_target_map
                        .get(target)
                        .cloned()
                        .unwrap_or_default();
                    anyhow::anyhow!(
                        "target {} builder {} doesn't support tool {}",
                        app,
                        builder,
                        tool_name
                    )
                })?;
            tool_runs.push((target.clone(), entry.cmd.clone()));
        }
    }

    let mut ninja = Command::new("ninja");
    ninja
        .arg("-f")
        .arg(dirs.project_root.join(NINJA_FILENAME))
        .current_dir(&dirs.project_root);
    if opts.verbose {
        ninja.arg("-v");
    }
    ninja.args(&ninja_targets);

    let status = ninja.status().context("failed to run ninja")?;
    if !status.success() {
        bail!("ninja failed with {}", status);
    }

    for (target, cmds) in tool_runs {
        for cmd in cmds {
            let status = Command::new("sh")
                .arg("-c")
                .arg(&cmd)
                .current_dir(&dirs.project_root)
                .status()
                .with_context(|| format!("failed to run \"{}\"", cmd))?;
            if !status.success() {
                bail!("error executing \"{}\" (target={})", cmd, target);
            }
        }
    }

    Ok(())
}

fn determine_dirs(opts: &BuildOptions) -> Result<Dirs> {
    let start_dir = std::env::current_dir()?;

    let project_file = opts
        .project_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(PROJECT_FILENAME));

    let project_root = match &opts.project_root {
        Some(root) => root.clone(),
        None => locate_project_root(&start_dir, &project_file).ok_or_else(|| {
            anyhow::anyhow!(
                "could not locate folder containing \"{}\"",
                project_file.display()
            )
        })?,
    };

    let build_dir = determine_build_dir(&opts.build_dir, &start_dir, &project_root);
    std::fs::create_dir_all(&build_dir)
        .with_context(|| format!("creating build dir {}", build_dir.display()))?;

    Ok(Dirs {
        start_dir,
        project_root,
        project_file,
        build_dir,
    })
}

/// Walk up from `start` to the first directory containing the project file.
fn locate_project_root(start: &Path, project_file: &Path) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        if dir.join(project_file).is_file() {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

/// Absolute paths are kept; `./…` anchors at the start directory; anything
/// else anchors at the project root.
fn determine_build_dir(path: &Path, start_dir: &Path, project_root: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else if path.to_string_lossy().starts_with('.') {
        start_dir.join(path)
    } else {
        project_root.join(path)
    }
}

fn relative_start_dir(dirs: &Dirs) -> String {
    let rel = dirs
        .start_dir
        .strip_prefix(&dirs.project_root)
        .unwrap_or(Path::new(""));
    rel.to_string_lossy().to_string()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}
