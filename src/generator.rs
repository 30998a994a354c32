//! The generation pass: route loaded documents into the typed registries,
//! wire the context tree, then emit one build graph entry per
//! (application × builder) combination.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde_yaml::Value;
use tracing::{debug, info, warn};

use crate::download::{DownloadQueue, DownloadSource};
use crate::error::{LazeError, Result};
use crate::model::{ActionCache, ContextBag, ContextId, Module, ModuleId, RuleSet};
use crate::ninja::{NinjaWriter, RuleOpts};
use crate::project::schema::{AppDecl, ContextDecl, ModuleDecl, RuleDecl, SourceDecl};
use crate::project::{self, RawDoc};
use crate::solver::Solver;
use crate::util::merge::MergeOpts;
use crate::util::subst::substitute;
use crate::util::{listify, uniquify};

pub const NINJA_FILENAME: &str = "build.ninja";

#[derive(Debug, Clone, Serialize)]
pub struct GenerateOptions {
    pub project_file: PathBuf,
    #[serde(skip)]
    pub project_root: PathBuf,
    pub build_dir: PathBuf,
    /// Builder whitelist applied to every app.
    pub whitelist: Vec<String>,
    /// When non-empty, only these apps are configured.
    pub apps: Vec<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions {
            project_file: PathBuf::from(crate::PROJECT_FILENAME),
            project_root: PathBuf::from("."),
            build_dir: PathBuf::from("build"),
            whitelist: Vec::new(),
            apps: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub apps_configured: usize,
    pub actions: usize,
    pub actions_cached: usize,
}

/// Run the full generation pass, writing the Ninja manifest to `out` and
/// the sidecar files into the build directory.
pub fn generate<W: Write>(opts: &GenerateOptions, out: W) -> Result<Stats> {
    let before = Instant::now();
    let mut dl = DownloadQueue::new();
    let loaded = project::load(&opts.project_root, &opts.project_file, &mut dl)?;
    println!(
        "laze: loading buildfiles took {:.2}s",
        before.elapsed().as_secs_f64()
    );

    let mut writer = NinjaWriter::new(out);
    write_regeneration_rule(&mut writer, opts, &loaded.files)?;

    let before = Instant::now();
    let mut generator = Generator::new(opts.clone(), dl);
    generator.construct(loaded.docs, &mut writer)?;
    generator.post_parse()?;
    generator.emit(&mut writer)?;
    generator.finalize(&mut writer)?;
    println!(
        "laze: processing buildfiles took {:.2}s",
        before.elapsed().as_secs_f64()
    );

    let stats = generator.stats();
    println!("laze: configured {} applications", stats.apps_configured);
    if stats.actions > 0 {
        println!(
            "laze: cached: {}/{} ({:.2}%)",
            stats.actions_cached,
            stats.actions,
            stats.actions_cached as f64 * 100.0 / stats.actions as f64
        );
    }

    generator.write_sidecars()?;
    generator.fetch_downloads()?;
    Ok(stats)
}

/// Like [`generate`], writing the manifest to `<project_root>/build.ninja`.
pub fn generate_to_file(opts: &GenerateOptions) -> Result<Stats> {
    let path = opts.project_root.join(NINJA_FILENAME);
    let file = std::fs::File::create(&path)?;
    generate(opts, std::io::BufWriter::new(file))
}

fn write_regeneration_rule<W: Write>(
    writer: &mut NinjaWriter<W>,
    opts: &GenerateOptions,
    files: &std::collections::BTreeSet<PathBuf>,
) -> Result<()> {
    writer.rule(
        "relaze",
        "laze generate --project-file ${in}",
        &RuleOpts {
            generator: true,
            restat: true,
            ..Default::default()
        },
    )?;
    let implicit: Vec<String> = files
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    writer.build(
        &[NINJA_FILENAME.to_string()],
        "relaze",
        &[opts.project_file.to_string_lossy().to_string()],
        &implicit,
        &[],
    )?;
    writer.newline()
}

#[derive(Serialize)]
struct ToolEntry {
    cmd: Vec<String>,
}

pub struct Generator {
    opts: GenerateOptions,
    contexts: ContextBag,
    modules: Vec<Module>,
    rules: RuleSet,
    apps: Vec<ModuleId>,
    solver: Solver,
    cache: ActionCache,
    dl: DownloadQueue,
    apps_configured: usize,
    /// Aggregation targets: name -> outputs, emitted as phony builds.
    phony: IndexMap<String, IndexSet<String>>,
    app_per_folder: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    tools: BTreeMap<String, BTreeMap<String, ToolEntry>>,
}

const ENTITY_KEYS: &[&str] = &["context", "builder", "rule", "module", "app"];

impl Generator {
    pub fn new(opts: GenerateOptions, dl: DownloadQueue) -> Self {
        Generator {
            opts,
            contexts: ContextBag::new(),
            modules: Vec::new(),
            rules: RuleSet::new(),
            apps: Vec::new(),
            solver: Solver::new(),
            cache: ActionCache::default(),
            dl,
            apps_configured: 0,
            phony: IndexMap::new(),
            app_per_folder: BTreeMap::new(),
            tools: BTreeMap::new(),
        }
    }

    pub fn stats(&self) -> Stats {
        Stats {
            apps_configured: self.apps_configured,
            actions: self.cache.num,
            actions_cached: self.cache.cached,
        }
    }

    /// Route every document's entity declarations into the registries.
    /// Rule statements are written as rules are constructed.
    pub fn construct<W: Write>(
        &mut self,
        docs: Vec<RawDoc>,
        writer: &mut NinjaWriter<W>,
    ) -> Result<()> {
        for doc in docs {
            for key in doc.doc.keys() {
                let known = key
                    .as_str()
                    .map(|k| ENTITY_KEYS.contains(&k))
                    .unwrap_or(false);
                if !known {
                    return Err(LazeError::ParseError(format!(
                        "unknown top-level key {:?} in {}",
                        key,
                        doc.relpath.join(crate::PROJECT_FILENAME).display()
                    )));
                }
            }
            for &key in ENTITY_KEYS {
                for entity in listify(doc.doc.get(key)) {
                    self.construct_entity(key, entity, &doc, writer)?;
                }
            }
        }
        Ok(())
    }

    fn construct_entity<W: Write>(
        &mut self,
        key: &str,
        entity: Value,
        doc: &RawDoc,
        writer: &mut NinjaWriter<W>,
    ) -> Result<()> {
        let bad_decl = |e: serde_yaml::Error| {
            LazeError::ParseError(format!(
                "bad {} declaration in {}: {}",
                key,
                doc.relpath.join(crate::PROJECT_FILENAME).display(),
                e
            ))
        };

        match key {
            "context" | "builder" => {
                let decl: ContextDecl = serde_yaml::from_value(entity).map_err(bad_decl)?;
                let name = decl.name.clone();
                self.contexts
                    .add_declared(decl, key == "builder", &doc.relpath);
                self.phony.entry(name).or_default();
            }
            "rule" => {
                let decl: RuleDecl = serde_yaml::from_value(entity).map_err(bad_decl)?;
                let id = self.rules.add(decl, &doc.relpath)?;
                self.rules.get(id).write_rule(writer)?;
            }
            "module" => {
                let decl: ModuleDecl = serde_yaml::from_value(entity).map_err(bad_decl)?;
                let mut module = Module::from_decl(decl, &doc.relpath, None)?;
                module.template_instance = doc.template_instance.clone();
                module.template_instance_num = doc.template_instance_num;
                self.modules.push(module);
            }
            "app" => {
                let decl: AppDecl = serde_yaml::from_value(entity).map_err(bad_decl)?;
                let mut module = Module::from_app_decl(decl, &doc.relpath)?;
                module.template_instance = doc.template_instance.clone();
                module.template_instance_num = doc.template_instance_num;
                self.apps.push(self.modules.len());
                self.modules.push(module);
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    /// Wire context parents, bind modules to their contexts, queue module
    /// downloads, and record the context aggregation edges.
    pub fn post_parse(&mut self) -> Result<()> {
        self.contexts.wire()?;

        for &id in &self.contexts.named_ids() {
            let context = self.contexts.get(id);
            if let Some(parent) = context.parent {
                let parent_name = self.contexts.get(parent).name.clone();
                let child_name = context.name.clone();
                self.phony.entry(parent_name).or_default().insert(child_name);
            }
        }

        for id in 0..self.modules.len() {
            let context_name = self.modules[id].context_name.clone();
            let ctx = self.contexts.lookup(&context_name).ok_or_else(|| {
                LazeError::ParseError(format!(
                    "module {} refers to unknown context {}",
                    self.modules[id].name, context_name
                ))
            })?;
            self.modules[id].context = Some(ctx);
            let name = self.modules[id].name.clone();
            self.contexts.register_module(ctx, &name, id);

            if let Some(download) = self.modules[id].download.clone() {
                let dldir = Path::new(".laze/dl")
                    .join(&self.modules[id].relpath)
                    .join(&name);
                let target = self.opts.project_root.join(&dldir);
                if self.dl.contains(&target) {
                    return Err(LazeError::InvalidArgument(format!(
                        "duplicate download target {}",
                        dldir.display()
                    )));
                }
                debug!("download {} -> {}", name, dldir.display());
                self.modules[id].override_source_location = Some(dldir);
                self.dl.add(target, DownloadSource::from(&download));
            }
        }
        Ok(())
    }

    /// Emit build statements for every (app × builder) combination.
    pub fn emit<W: Write>(&mut self, writer: &mut NinjaWriter<W>) -> Result<()> {
        let builders: Vec<ContextId> = self
            .contexts
            .named_ids()
            .into_iter()
            .filter(|&id| self.contexts.get(id).is_builder)
            .collect();

        for app_id in self.apps.clone() {
            let name = self.modules[app_id].name.clone();
            if !self.opts.apps.is_empty() && !self.opts.apps.contains(&name) {
                continue;
            }
            info!("app {}", name);
            for &builder in &builders {
                self.emit_app(app_id, builder, writer)?;
            }
        }
        Ok(())
    }

    fn emit_app<W: Write>(
        &mut self,
        app_id: ModuleId,
        builder: ContextId,
        writer: &mut NinjaWriter<W>,
    ) -> Result<()> {
        let app = &self.modules[app_id];
        let Some(spec) = app.app.as_ref() else {
            return Ok(());
        };
        let app_name = app.name.clone();
        let app_relpath = app.relpath.clone();
        let app_vars = app.vars.clone();
        let bindir_template = spec.bindir.clone();
        let app_tools = spec.tools.clone();
        let builder_name = self.contexts.get(builder).name.clone();

        let mut whitelist: HashSet<String> = spec.whitelist.iter().cloned().collect();
        whitelist.extend(self.opts.whitelist.iter().cloned());
        let blacklist: HashSet<String> = spec.blacklist.iter().cloned().collect();

        if !whitelist.is_empty() && !self.contexts.listed(builder, &whitelist) {
            debug!("app {} not whitelisted for builder {}", app_name, builder_name);
            return Ok(());
        }
        if !blacklist.is_empty() && self.contexts.listed(builder, &blacklist) {
            debug!("app {} blacklisted for builder {}", app_name, builder_name);
            return Ok(());
        }

        let ctx = self.contexts.add_ephemeral(&app_name, builder, &app_vars)?;

        // Resolve the app's binary directory against the builder's.
        let mut bindir = if bindir_template.contains('$') {
            let mut table = HashMap::new();
            table.insert("bindir".to_string(), self.contexts.get(builder).bindir.clone());
            table.insert("name".to_string(), app_name.clone());
            table.insert("app".to_string(), app_name.clone());
            table.insert("builder".to_string(), builder_name.clone());
            substitute(&bindir_template, &table)
        } else {
            bindir_template
        };
        if let Some(local) = bindir.strip_prefix("./") {
            bindir = if app_relpath.as_os_str().is_empty() {
                local.to_string()
            } else {
                format!("{}/{}", app_relpath.to_string_lossy(), local)
            };
        }
        self.contexts.get_mut(ctx).bindir = bindir;

        info!("  build {} for {}", app_name, builder_name);
        let deps = match self.solver.get_deps(&self.modules, &self.contexts, app_id, ctx) {
            Ok(deps) => deps,
            Err(e @ LazeError::ModuleNotAvailable { .. }) => {
                warn!("skipping app {} for builder {}: {}", app_name, builder_name, e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let mut participants = vec![app_id];
        participants.extend(uniquify(&deps));
        let participants = uniquify(&participants);

        self.apps_configured += 1;

        let module_set: HashSet<String> = participants
            .iter()
            .map(|&id| self.modules[id].name.clone())
            .collect();

        // First pass: every participant's global_vars feed the app context.
        for &id in &participants {
            if self.modules[id].global_vars.is_empty() {
                continue;
            }
            let mut global_vars = self.modules[id].global_vars.clone();
            global_vars.substitute(&self.modules[id].subst_table());
            self.contexts.get_mut(ctx).vars.merge(
                &global_vars,
                MergeOpts {
                    join_lists: true,
                    ..Default::default()
                },
            )?;
        }

        // Second pass: compile actions per participant.
        let mut objects: Vec<String> = Vec::new();
        for &id in &participants {
            let sources = self.expand_sources(id, &module_set);

            let defines =
                self.solver
                    .get_defines(&self.modules, &self.contexts, id, ctx, &module_set)?;

            let mut module_vars = self.contexts.get(ctx).vars.clone();
            if !self.modules[id].vars.is_empty() {
                module_vars.substitute(&self.modules[id].subst_table());
                let own = self.modules[id].vars.clone();
                module_vars.merge(
                    &own,
                    MergeOpts {
                        override_values: true,
                        ..Default::default()
                    },
                )?;
            }

            let export_vars = self.solver.get_export_vars(
                &self.modules,
                &self.contexts,
                id,
                ctx,
                &module_set,
            )?;
            module_vars.merge(&export_vars, MergeOpts::default())?;

            if !defines.is_empty() {
                module_vars.get_list_mut("CFLAGS").extend(defines);
            }

            for source in sources {
                let source_in = self.modules[id].locate_source(&source);
                let rule = self.rules.for_source(&source).ok_or_else(|| {
                    LazeError::InvalidArgument(format!(
                        "no rule registered for the extension of {}",
                        source
                    ))
                })?;
                let out_ext = rule.out_ext.clone().ok_or_else(|| {
                    LazeError::InvalidArgument(format!(
                        "rule {} has no output extension",
                        rule.name
                    ))
                })?;
                let stem = Path::new(&source)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| source.clone());

                let module_relpath = self.modules[id].relpath.clone();
                let obj_name = if module_relpath.as_os_str().is_empty() {
                    format!("{}.{}", stem, out_ext)
                } else {
                    format!("{}/{}.{}", module_relpath.to_string_lossy(), stem, out_ext)
                };
                let obj = self.contexts.filepath(ctx, &obj_name);

                let obj = rule.build_action(
                    writer,
                    &mut self.cache,
                    &[source_in],
                    &obj,
                    Some(&module_vars),
                )?;
                objects.push(obj);
            }
        }

        // Link, aliasing when an identical artifact already exists.
        let link = self.rules.by_name("LINK").ok_or_else(|| {
            LazeError::InvalidArgument("no LINK rule defined".to_string())
        })?;
        let app_basename = Path::new(&app_name)
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| app_name.clone());
        let outfile = self.contexts.filepath(ctx, &format!("{}.elf", app_basename));

        let link_vars = self.contexts.get(ctx).vars.clone();
        let produced =
            link.build_action(writer, &mut self.cache, &objects, &outfile, Some(&link_vars))?;
        if produced != outfile {
            let symlink = self.rules.by_name("SYMLINK").ok_or_else(|| {
                LazeError::InvalidArgument("no SYMLINK rule defined".to_string())
            })?;
            symlink.build_action(
                writer,
                &mut self.cache,
                &[produced.clone()],
                &outfile,
                None,
            )?;
        }

        self.phony
            .entry(builder_name.clone())
            .or_default()
            .insert(outfile.clone());
        self.phony
            .entry(app_name.clone())
            .or_default()
            .insert(outfile.clone());

        self.app_per_folder
            .entry(app_relpath.to_string_lossy().to_string())
            .or_default()
            .entry(app_name.clone())
            .or_default()
            .insert(builder_name.clone(), outfile.clone());

        if !app_tools.is_empty() {
            let mut table = HashMap::new();
            table.insert("out".to_string(), outfile.clone());
            table.insert("bindir".to_string(), self.contexts.get(ctx).bindir.clone());
            table.insert("app".to_string(), app_name.clone());
            table.insert("builder".to_string(), builder_name.clone());
            let entry = self.tools.entry(outfile).or_default();
            for (tool_name, tool) in &app_tools {
                let cmd = tool.cmd.iter().map(|c| substitute(c, &table)).collect();
                entry.insert(tool_name.clone(), ToolEntry { cmd });
            }
        }

        Ok(())
    }

    /// Split a module's sources into the active file list, honoring
    /// conditional entries gated on the app's module set. Matched
    /// conditional keys may extend the module's `uses`, once.
    fn expand_sources(&mut self, id: ModuleId, module_set: &HashSet<String>) -> Vec<String> {
        let mut sources = Vec::new();
        let mut extra_uses: Vec<String> = Vec::new();

        for entry in self.modules[id].sources.clone() {
            match entry {
                SourceDecl::File(file) => sources.push(file),
                SourceDecl::Conditional(map) => {
                    for (key, files) in map {
                        let wanted: Vec<&str> = key.split(',').collect();
                        if wanted.iter().all(|name| module_set.contains(*name)) {
                            debug!("optional sources active: {} -> {:?}", key, files);
                            sources.extend(files.into_vec());
                            if self.modules[id].use_optional_source_deps {
                                extra_uses.extend(wanted.iter().map(|s| s.to_string()));
                            }
                        }
                    }
                }
            }
        }

        for name in extra_uses {
            if !self.modules[id].uses.contains(&name) {
                self.modules[id].uses.push(name);
            }
        }
        sources
    }

    /// Write the per-target aggregation nodes.
    pub fn finalize<W: Write>(&mut self, writer: &mut NinjaWriter<W>) -> Result<()> {
        writer.newline()?;
        for (name, outputs) in &self.phony {
            let inputs: Vec<String> = outputs.iter().cloned().collect();
            writer.build(&[name.clone()], "phony", &inputs, &[], &[])?;
        }
        Ok(())
    }

    /// Write `laze-args`, `laze-app-per-folder` and `laze-tools` into the
    /// build directory as stable key-sorted JSON.
    pub fn write_sidecars(&self) -> Result<()> {
        let build_dir = if self.opts.build_dir.is_absolute() {
            self.opts.build_dir.clone()
        } else {
            self.opts.project_root.join(&self.opts.build_dir)
        };
        std::fs::create_dir_all(&build_dir)?;

        let args = serde_json::to_value(&self.opts)?;
        std::fs::write(
            build_dir.join("laze-args"),
            serde_json::to_string_pretty(&args)?,
        )?;
        std::fs::write(
            build_dir.join("laze-app-per-folder"),
            serde_json::to_string_pretty(&self.app_per_folder)?,
        )?;
        std::fs::write(
            build_dir.join("laze-tools"),
            serde_json::to_string_pretty(&self.tools)?,
        )?;
        Ok(())
    }

    pub fn fetch_downloads(&self) -> Result<()> {
        self.dl.fetch_all()
    }
}
