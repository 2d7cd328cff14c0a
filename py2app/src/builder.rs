// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Building a bundle from its options.

A build runs through a fixed sequence of passes:

1. Collect the Python dependencies of the scripts into a module graph and
   let recipes adjust it. Alias builds skip this.
2. Create the bundle skeleton, the icon, the launchers and the resources.
3. Write the Python payload, `__boot__.py`, `site.pyc` and `Info.plist`.
4. Copy Mach-O dependencies into the bundle, strip, sign and audit.

Each bundle is built independently. A failing bundle doesn't stop the
remaining ones from being built.
*/

use {
    crate::{
        audit::{audit_bundle, AuditReport},
        bootstrap::{render_site_py, script_stem, BootEnvironment, BootstrapBuilder},
        bundle::{create_bundle, info_plist, write_info_plist},
        codesign::{needs_signature, sign_bundle, AdhocSigner},
        config::{BuildType, BundleOptions, Py2appConfiguration},
        environment::{libpython_path, runtime_locations, runtime_prefix},
        error::Py2appError,
        graph::Py2appGraph,
        launcher::{LauncherCache, LauncherVariant},
        payload::{write_site, PayloadWriter},
        progress::Progress,
        recipes::{run_recipes, RecipeContext, RecipeRegistry},
        resources::{
            icon_file_name, install_icon, resolve_iconfile, write_generated_files,
            ConverterRegistry, ResourceCopier,
        },
        standalone::{macho_files, MachOStandalone, StandaloneOptions},
        strip::strip_bundle,
    },
    anyhow::{Context, Result},
    apple_bundles::{BundlePaths, DirectoryBundle},
    log::warn,
    python_packaging::{
        bytecode::{BytecodeCompiler, BytecodeOptimizationLevel, PythonBytecodeCompiler},
        finder::ModuleFinder,
        graph::{ModuleGraph, NodeKind},
        import_scan::PythonImportScanner,
        interpreter::PythonInterpreterInfo,
    },
    std::{
        collections::{BTreeMap, BTreeSet},
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Modules the bootstrap code needs in every non-alias bundle.
const BOOTSTRAP_MODULES: &[&str] = &["zipfile", "_sitebuiltins", "encodings", "marshal"];

/// Delay between attempts to sign the bundle root.
const SIGNING_BACKOFF: Duration = Duration::from_secs(1);

/// Creates the interpreter backed helpers of a build.
pub trait PythonTooling {
    /// An empty module graph for the target interpreter.
    fn module_graph(&self) -> Result<Py2appGraph>;

    fn bytecode_compiler(&self) -> Result<Box<dyn PythonBytecodeCompiler>>;
}

/// [PythonTooling] that runs helper processes of a Python interpreter.
pub struct InterpreterTooling<'a> {
    python: PathBuf,
    info: &'a PythonInterpreterInfo,
}

impl<'a> InterpreterTooling<'a> {
    pub fn new(python: impl Into<PathBuf>, info: &'a PythonInterpreterInfo) -> Self {
        Self {
            python: python.into(),
            info,
        }
    }
}

impl<'a> PythonTooling for InterpreterTooling<'a> {
    fn module_graph(&self) -> Result<Py2appGraph> {
        let finder = ModuleFinder::from_interpreter(self.info);
        let scanner = PythonImportScanner::new(&self.python)?;

        Ok(Py2appGraph::new(ModuleGraph::new(finder, Box::new(scanner))?))
    }

    fn bytecode_compiler(&self) -> Result<Box<dyn PythonBytecodeCompiler>> {
        Ok(Box::new(BytecodeCompiler::new(&self.python)?))
    }
}

/// Missing modules grouped by how they are imported.
///
/// Each map goes from the missing name to the modules importing it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MissingModules {
    pub unconditional: BTreeMap<String, BTreeSet<String>>,
    pub conditional: BTreeMap<String, BTreeSet<String>>,
    pub fromlist: BTreeMap<String, BTreeSet<String>>,
    pub fromlist_conditional: BTreeMap<String, BTreeSet<String>>,
}

impl MissingModules {
    pub fn is_empty(&self) -> bool {
        self.unconditional.is_empty()
            && self.conditional.is_empty()
            && self.fromlist.is_empty()
            && self.fromlist_conditional.is_empty()
    }

    /// Report the missing modules.
    ///
    /// Only unconditional imports are reported as warnings.
    pub fn report(&self, progress: &mut dyn Progress) {
        let sections = [
            (
                &self.unconditional,
                "The following modules are imported unconditionally, but were not found",
                true,
            ),
            (
                &self.conditional,
                "The following modules are imported conditionally, but were not found",
                false,
            ),
            (
                &self.fromlist,
                "The following modules are imported unconditionally through 'from .. import ..', but were not found",
                false,
            ),
            (
                &self.fromlist_conditional,
                "The following modules are imported conditionally through 'from .. import ..', but were not found",
                false,
            ),
        ];

        for (modules, header, is_warning) in sections {
            if modules.is_empty() {
                continue;
            }

            let mut lines = vec![header.to_string()];
            for (name, importers) in modules {
                lines.push(format!(
                    "* {} (imported from {})",
                    name,
                    importers.iter().cloned().collect::<Vec<_>>().join(", ")
                ));
            }
            let message = lines.join("\n");

            if is_warning {
                progress.warning(&message);
            } else {
                progress.trace(&message);
            }
        }
    }
}

/// Classify the missing modules of a graph.
///
/// Modules marked as expected to be missing are ignored, as are the names in
/// `expected`. A name imported through `from pkg import name` isn't reported
/// when `name` is a global of `pkg`.
pub fn classify_missing(graph: &Py2appGraph, expected: &[String]) -> MissingModules {
    let mut res = MissingModules::default();

    for id in graph.iter_graph() {
        let node = graph.node(id);
        if node.kind != NodeKind::MissingModule
            || graph.is_expected_missing(id)
            || expected.contains(&node.identifier)
        {
            continue;
        }

        let (parent, leaf) = match node.identifier.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, node.identifier.as_str()),
        };
        let parent_global = parent
            .and_then(|name| graph.find_node(name))
            .map(|pkg| graph.node(pkg).globals_written.contains(leaf))
            .unwrap_or(false);

        for (importer, edges) in graph.incoming(id) {
            let in_fromlist = edges.iter().any(|e| e.in_fromlist);
            if in_fromlist && parent_global {
                continue;
            }

            let is_optional = edges.iter().all(|e| e.is_optional || !e.is_global);

            let bucket = match (in_fromlist, is_optional) {
                (false, false) => &mut res.unconditional,
                (false, true) => &mut res.conditional,
                (true, false) => &mut res.fromlist,
                (true, true) => &mut res.fromlist_conditional,
            };

            bucket
                .entry(node.identifier.clone())
                .or_default()
                .insert(graph.node(importer).identifier.clone());
        }
    }

    res
}

/// Add the scripts and configured modules of a bundle to a graph.
pub fn populate_graph(graph: &mut Py2appGraph, bundle: &BundleOptions) -> Result<()> {
    graph.add_excludes(bundle.py_exclude.iter());
    graph.add_full_packages(bundle.py_full_package.iter())?;

    for script in bundle.all_scripts() {
        graph.add_script(script)?;
    }

    for name in &bundle.py_include {
        graph.add_module(name)?;
    }

    if bundle.build_type != BuildType::Alias {
        for name in BOOTSTRAP_MODULES {
            graph.add_module(name)?;
        }
    }

    Ok(())
}

/// Verify that `CFBundleExecutable` names an installed launcher.
///
/// A user supplied `Info.plist` may override the name.
fn check_executable(paths: &BundlePaths) -> Result<()> {
    let bundle = DirectoryBundle::new_from_path(paths.bundle_root())?;

    match bundle.main_executable()? {
        Some(name) if paths.main.join(&name).is_file() => Ok(()),
        Some(name) => Err(Py2appError::Bundle(format!(
            "CFBundleExecutable {:?} is not an executable in {}",
            name,
            paths.main.display()
        ))
        .into()),
        None => Err(Py2appError::Bundle("CFBundleExecutable is not set".to_string()).into()),
    }
}

/// Outcome of building one bundle.
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub bundle_path: PathBuf,
    /// `None` when the Mach-O passes were skipped.
    pub audit: Option<AuditReport>,
    pub missing: MissingModules,
}

/// Builds the bundles of a configuration.
pub struct BundleBuilder<'a> {
    config: &'a Py2appConfiguration,
    info: &'a PythonInterpreterInfo,
    tooling: &'a dyn PythonTooling,
    launchers: &'a LauncherCache,
    recipes: RecipeRegistry,
    converters: ConverterRegistry,
    skip_macho: bool,
}

impl<'a> BundleBuilder<'a> {
    pub fn new(
        config: &'a Py2appConfiguration,
        info: &'a PythonInterpreterInfo,
        tooling: &'a dyn PythonTooling,
        launchers: &'a LauncherCache,
    ) -> Self {
        Self {
            config,
            info,
            tooling,
            launchers,
            recipes: RecipeRegistry::with_builtin_recipes(),
            converters: ConverterRegistry::with_builtin_converters(),
            skip_macho: false,
        }
    }

    pub fn recipes(mut self, registry: RecipeRegistry) -> Self {
        self.recipes = registry;
        self
    }

    /// Skip the passes that process Mach-O files.
    pub fn skip_macho(mut self, value: bool) -> Self {
        self.skip_macho = value;
        self
    }

    /// Directory the finished bundles are written to.
    pub fn dist_dir(&self) -> PathBuf {
        self.config.config_root.join("dist")
    }

    /// Scratch directory of one bundle.
    pub fn build_dir(&self, bundle: &BundleOptions) -> PathBuf {
        self.config.config_root.join("build").join(&bundle.key)
    }

    /// Build every bundle, returning the reports of the successful ones.
    ///
    /// Failures are reported through `progress`.
    pub fn build_all(&self, progress: &mut dyn Progress) -> Vec<BuildReport> {
        let mut res = vec![];

        for bundle in &self.config.bundles {
            match self.build(bundle, progress) {
                Ok(report) => res.push(report),
                Err(e) => progress.error(&format!(
                    "Building bundle {:?} failed: {:#}",
                    bundle.key, e
                )),
            }
        }

        res
    }

    fn check_inputs(&self, bundle: &BundleOptions) -> Result<()> {
        let missing = |kind: &str, path: &Path| -> anyhow::Error {
            Py2appError::missing_input(format!(
                "{} {:?} does not exist",
                kind,
                path.display().to_string()
            ))
            .into()
        };

        for script in bundle.all_scripts() {
            if !script.is_file() {
                return Err(missing("Script", script.as_path()));
            }
        }

        for source in bundle.resources.iter().flat_map(|r| r.sources.iter()) {
            if source.symlink_metadata().is_err() {
                return Err(missing("Resource", source.as_path()));
            }
        }

        for library in &bundle.macho_include {
            let path = Path::new(library);
            if !path.exists() {
                return Err(missing("Library", path));
            }
        }

        if let Some(icon) = &bundle.iconfile {
            if resolve_iconfile(icon).is_none() {
                return Err(missing("Icon file", icon.as_path()));
            }
        }

        Ok(())
    }

    fn module_graph(&self, bundle: &BundleOptions, progress: &mut dyn Progress) -> Result<Py2appGraph> {
        let task = progress.add_task("Scanning Python dependencies", None);
        let mut graph = self.tooling.module_graph()?;
        populate_graph(&mut graph, bundle)?;
        progress.task_done(task);

        for name in &bundle.py_include {
            let found = graph
                .find_node(name)
                .map(|id| graph.node(id).kind != NodeKind::MissingModule)
                .unwrap_or(false);
            if !found {
                return Err(Py2appError::missing_input(format!(
                    "Included module {:?} not found",
                    name
                ))
                .into());
            }
        }

        let context = RecipeContext {
            options: &self.config.recipe,
            interpreter: Some(self.info),
        };
        run_recipes(&mut graph, &self.recipes, &context, progress)?;

        for id in graph.iter_graph() {
            let node = graph.node(id);
            if node.kind == NodeKind::InvalidSourceModule {
                progress.warning(&format!(
                    "{}: {}",
                    node.identifier,
                    node.syntax_error.as_deref().unwrap_or("invalid source")
                ));
            }
        }

        Ok(graph)
    }

    /// The configured icon, or the applet icon of the Python installation.
    fn icon(&self, bundle: &BundleOptions, prefix: &Path) -> Option<PathBuf> {
        match &bundle.iconfile {
            Some(path) => resolve_iconfile(path),
            None => {
                let default = prefix
                    .join("Resources/Python.app/Contents/Resources/PythonApplet.icns");
                if default.is_file() {
                    Some(default)
                } else {
                    None
                }
            }
        }
    }

    fn install_launchers(
        &self,
        bundle: &BundleOptions,
        paths: &BundlePaths,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        let task = progress.add_task("Add stub executable", Some(2 + bundle.extra_scripts.len()));
        let arch = bundle.macho_arch;
        let target = bundle.deployment_target.as_str();

        let main = if bundle.plugin {
            LauncherVariant::Plugin
        } else {
            LauncherVariant::Primary
        };
        self.launchers
            .install(arch, target, main, &paths.main.join(&bundle.name))?;
        progress.step_task(task);

        let python = paths.main.join("python");
        if bundle.build_type == BuildType::Alias {
            std::os::unix::fs::symlink(&self.info.executable, &python)
                .with_context(|| format!("creating {}", python.display()))?;
        } else {
            self.launchers
                .install(arch, target, LauncherVariant::Python, &python)?;
        }
        progress.step_task(task);

        for script in &bundle.extra_scripts {
            let dest = paths.main.join(script_stem(script)?);
            self.launchers
                .install(arch, target, LauncherVariant::Secondary, &dest)?;
            progress.step_task(task);
        }

        progress.task_done(task);

        Ok(())
    }

    /// Build one bundle.
    pub fn build(&self, bundle: &BundleOptions, progress: &mut dyn Progress) -> Result<BuildReport> {
        let is_alias = bundle.build_type == BuildType::Alias;
        let python_version = self.info.version.short();

        self.check_inputs(bundle)?;

        let build_dir = self.build_dir(bundle);
        if build_dir.exists() {
            remove_dir_all::remove_dir_all(&build_dir)
                .with_context(|| format!("removing {}", build_dir.display()))?;
        }
        std::fs::create_dir_all(&build_dir)
            .with_context(|| format!("creating {}", build_dir.display()))?;

        let mut graph = if is_alias {
            None
        } else {
            Some(self.module_graph(bundle, progress)?)
        };

        let prefix = runtime_prefix(self.info)?;
        let embedded = bundle.build_type == BuildType::Standalone;
        let locations = runtime_locations(self.info, &prefix, embedded);

        let task = progress.add_task("Create bundle structure", None);
        let icon = self.icon(bundle, &prefix);
        let icon_name = icon.as_deref().map(icon_file_name).transpose()?;
        let plist = info_plist(bundle, self.info, &locations, icon_name.as_deref());
        let paths = create_bundle(&self.dist_dir(), bundle, &python_version, &plist)?;
        progress.task_done(task);

        if let Some(icon) = &icon {
            let task = progress.add_task("Add bundle icon file", None);
            install_icon(&paths.resources, icon)?;
            progress.task_done(task);
        }

        self.install_launchers(bundle, &paths, progress)?;

        let mut resources = bundle.resources.clone();
        if let Some(graph) = &graph {
            resources.extend(graph.all_resources());
        }
        ResourceCopier::new(&paths.resources, &self.converters, is_alias)?
            .copy_all(&resources, progress)?;
        if let Some(graph) = &graph {
            write_generated_files(&paths.resources, &graph.all_generated_files())?;
        }

        let optimize = BytecodeOptimizationLevel::try_from(bundle.python.optimize as i32)
            .map_err(|_| {
                Py2appError::configuration(format!(
                    "invalid optimization level {}",
                    bundle.python.optimize
                ))
            })?;
        let mut compiler = self.tooling.bytecode_compiler()?;

        let mut subpackages = vec![];
        let mut scriptlets = vec![];
        if let Some(graph) = graph.as_mut() {
            let payload = PayloadWriter::new(&paths, &mut *compiler, optimize).write(graph, progress)?;
            subpackages = payload
                .filesystem_packages
                .iter()
                .filter(|name| name.contains('.'))
                .cloned()
                .collect();
            scriptlets = graph.all_bootstraps();
        }

        let task = progress.add_task("Add bootstrap files", None);
        let environment = BootEnvironment::from_interpreter(self.info, &prefix);
        let bootstrap = BootstrapBuilder::new(bundle, &environment)
            .subpackages(subpackages)
            .recipe_scriptlets(scriptlets);
        let boot = bootstrap.source()?;
        std::fs::write(build_dir.join("__boot__.py"), &boot)?;
        let boot_path = paths.resources.join("__boot__.py");
        std::fs::write(&boot_path, &boot)
            .with_context(|| format!("writing {}", boot_path.display()))?;

        let extra_paths = if is_alias {
            bootstrap.additional_paths()
        } else {
            vec![]
        };
        let site = render_site_py(
            &python_version,
            bundle.python.use_sitepackages || is_alias,
            &extra_paths,
        )?;
        std::fs::write(build_dir.join("site.py"), &site)?;
        write_site(&paths, &mut *compiler, optimize, &site)?;
        progress.task_done(task);

        let task = progress.add_task("Add Info.plist", None);
        write_info_plist(&paths, &plist)?;
        check_executable(&paths)?;
        progress.task_done(task);

        let bundle_root = paths.bundle_root().to_path_buf();
        let mut audit = None;

        if self.skip_macho {
            warn!("skipping Mach-O processing of {}", bundle_root.display());
        } else {
            if !is_alias {
                let mut options = StandaloneOptions {
                    excludes: bundle.macho_exclude.clone(),
                    includes: bundle.macho_include.iter().map(PathBuf::from).collect(),
                    python_library: None,
                };
                if let Some(graph) = &graph {
                    options.includes.extend(graph.frameworks().iter().cloned());
                }
                if embedded {
                    let library = libpython_path(self.info, &prefix).ok_or_else(|| {
                        Py2appError::Standalone(
                            "Python is not built as a shared library".to_string(),
                        )
                    })?;
                    options.python_library = Some((library, python_version.clone()));
                }

                let report = MachOStandalone::new(&bundle_root, options).run(progress)?;
                if !report.excluded.is_empty() {
                    progress.trace(&format!(
                        "Excluded libraries: {}",
                        report.excluded.iter().cloned().collect::<Vec<_>>().join(", ")
                    ));
                }

                if bundle.macho_strip {
                    strip_bundle(&bundle_root, progress)?;
                }
            }

            if needs_signature(&macho_files(&bundle_root)?)? {
                sign_bundle(&bundle_root, &mut AdhocSigner, SIGNING_BACKOFF, progress)?;
            }

            if !is_alias {
                audit = Some(audit_bundle(&bundle_root)?);
            }
        }

        progress.info(&format!(
            "Built {} {}",
            if bundle.plugin { "plugin" } else { "app" },
            bundle.name
        ));
        if let Some(report) = &audit {
            progress.info(&format!("Common architectures: {}", report.architecture));
            if let Some(target) = &report.deployment_target {
                progress.info(&format!("Deployment target: macOS {}", target));
            }
            for warning in &report.warnings {
                progress.warning(warning);
            }
        }

        let missing = match &graph {
            Some(graph) => classify_missing(graph, &bundle.expected_missing),
            None => MissingModules::default(),
        };
        missing.report(progress);

        Ok(BuildReport {
            bundle_path: bundle_root,
            audit,
            missing,
        })
    }
}
