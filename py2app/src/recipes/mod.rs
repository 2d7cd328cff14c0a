// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Recipes patch the module graph for packages static analysis can't see through.

A recipe is a callback plus a guard. The guard names a distribution (with
an optional version specifier) and/or a list of modules; a recipe without
a guard always runs. Callbacks mutate the graph through [RecipeGraph],
which records whether anything actually changed.

[run_recipes] runs every active recipe until a full pass leaves the graph
untouched. Because every mutator of [RecipeGraph] is idempotent this
always terminates.
*/

mod ctypes;
mod misc;
mod pyobjc;
mod qt;
mod ssl;
mod stdlib;
mod tkinter;

use {
    crate::{
        config::{RecipeOptions, Resource},
        error::Py2appError,
        graph::Py2appGraph,
        progress::Progress,
    },
    anyhow::{anyhow, Result},
    log::debug,
    python_packaging::{
        finder::ModuleLocation,
        graph::{NodeId, NodeKind},
        interpreter::PythonInterpreterInfo,
        package_metadata::normalize_distribution_name,
    },
    std::{collections::BTreeMap, ops::Deref, path::Path, path::PathBuf},
    version_compare::Cmp,
};

/// Signature of a recipe callback.
pub type RecipeFn = fn(&mut RecipeGraph, &RecipeContext) -> Result<()>;

/// Read-only information available to recipes.
pub struct RecipeContext<'a> {
    pub options: &'a RecipeOptions,
    /// The interpreter the bundle is built for, when known.
    pub interpreter: Option<&'a PythonInterpreterInfo>,
}

/// A registered recipe.
#[derive(Clone)]
pub struct RecipeInfo {
    pub name: String,
    pub callback: RecipeFn,
    /// Only run when this distribution provides a reachable module.
    pub distribution: Option<String>,
    /// Versions of `distribution` the recipe applies to, e.g. `>=2.0,<3`.
    pub version_spec: Option<String>,
    /// Only run when one of these modules is in the graph.
    pub modules: Vec<String>,
}

impl std::fmt::Debug for RecipeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeInfo")
            .field("name", &self.name)
            .field("distribution", &self.distribution)
            .field("version_spec", &self.version_spec)
            .field("modules", &self.modules)
            .finish()
    }
}

impl RecipeInfo {
    /// A recipe that always runs.
    pub fn new(name: impl ToString, callback: RecipeFn) -> Self {
        Self {
            name: name.to_string(),
            callback,
            distribution: None,
            version_spec: None,
            modules: vec![],
        }
    }

    #[must_use]
    pub fn distribution(mut self, name: impl ToString) -> Self {
        self.distribution = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn version_spec(mut self, spec: impl ToString) -> Self {
        self.version_spec = Some(spec.to_string());
        self
    }

    #[must_use]
    pub fn modules(mut self, names: &[&str]) -> Self {
        self.modules = names.iter().map(|s| s.to_string()).collect();
        self
    }

    fn module_present(graph: &Py2appGraph, name: &str) -> bool {
        graph.find_node(name).map_or(false, |id| {
            !matches!(
                graph.node(id).kind,
                NodeKind::MissingModule | NodeKind::ExcludedModule
            )
        })
    }

    /// Whether the guard of this recipe is satisfied.
    ///
    /// `distributions` maps normalized distribution names to versions.
    pub fn is_active(
        &self,
        graph: &Py2appGraph,
        distributions: &BTreeMap<String, String>,
    ) -> Result<bool> {
        if self.distribution.is_none() && self.modules.is_empty() {
            return Ok(true);
        }

        if let Some(name) = &self.distribution {
            if let Some(version) = distributions.get(&normalize_distribution_name(name)) {
                let matches = match &self.version_spec {
                    Some(spec) => VersionSpec::parse(spec)?.matches(version),
                    None => true,
                };

                if matches {
                    return Ok(true);
                }
            }
        }

        Ok(self
            .modules
            .iter()
            .any(|name| Self::module_present(graph, name)))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Comparison {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
    Ne,
}

impl Comparison {
    fn cmp(&self) -> Cmp {
        match self {
            Self::Ge => Cmp::Ge,
            Self::Le => Cmp::Le,
            Self::Gt => Cmp::Gt,
            Self::Lt => Cmp::Lt,
            Self::Eq => Cmp::Eq,
            Self::Ne => Cmp::Ne,
        }
    }
}

/// A comma separated list of version clauses, all of which must hold.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionSpec {
    clauses: Vec<(Comparison, String)>,
}

impl VersionSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut clauses = vec![];

        for clause in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
            // Two character operators first so `>=` isn't read as `>`.
            let (op, version) = [
                (">=", Comparison::Ge),
                ("<=", Comparison::Le),
                ("==", Comparison::Eq),
                ("!=", Comparison::Ne),
                (">", Comparison::Gt),
                ("<", Comparison::Lt),
            ]
            .into_iter()
            .find_map(|(prefix, op)| clause.strip_prefix(prefix).map(|rest| (op, rest.trim())))
            .ok_or_else(|| anyhow!("invalid version clause {:?} in {:?}", clause, spec))?;

            if version.is_empty() {
                return Err(anyhow!("missing version in {:?}", spec));
            }

            clauses.push((op, version.to_string()));
        }

        if clauses.is_empty() {
            return Err(anyhow!("empty version specifier"));
        }

        Ok(Self { clauses })
    }

    /// Whether `version` satisfies every clause.
    ///
    /// Versions that can't be compared never match.
    pub fn matches(&self, version: &str) -> bool {
        self.clauses.iter().all(|(op, wanted)| {
            version_compare::compare_to(version, wanted, op.cmp()).unwrap_or(false)
        })
    }
}

/// The set of recipes known to the builder.
#[derive(Clone, Debug, Default)]
pub struct RecipeRegistry {
    recipes: Vec<RecipeInfo>,
}

impl RecipeRegistry {
    /// A registry with every recipe shipped with py2app.
    pub fn with_builtin_recipes() -> Self {
        let mut registry = Self::default();

        stdlib::register(&mut registry);
        ctypes::register(&mut registry);
        tkinter::register(&mut registry);
        ssl::register(&mut registry);
        qt::register(&mut registry);
        pyobjc::register(&mut registry);
        misc::register(&mut registry);

        registry
    }

    pub fn register(&mut self, recipe: RecipeInfo) {
        self.recipes.push(recipe);
    }

    pub fn recipes(&self) -> &[RecipeInfo] {
        &self.recipes
    }

    pub fn find(&self, name: &str) -> Option<&RecipeInfo> {
        self.recipes.iter().find(|r| r.name == name)
    }
}

/// Gives recipes mutating access to a [Py2appGraph] and tracks changes.
///
/// Read access goes through [Deref]. Every mutator is a no-op when the
/// requested state already holds; only real changes set [Self::is_updated].
pub struct RecipeGraph<'a> {
    graph: &'a mut Py2appGraph,
    updated: bool,
}

impl<'a> Deref for RecipeGraph<'a> {
    type Target = Py2appGraph;

    fn deref(&self) -> &Self::Target {
        self.graph
    }
}

impl<'a> RecipeGraph<'a> {
    pub fn new(graph: &'a mut Py2appGraph) -> Self {
        Self {
            graph,
            updated: false,
        }
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    fn track(&mut self, changed: bool) -> bool {
        self.updated |= changed;
        changed
    }

    /// Find a node that refers to an existing module.
    ///
    /// Unlike [python_packaging::graph::ModuleGraph::find_node] this ignores
    /// missing and excluded modules.
    pub fn find_module(&self, name: &str) -> Option<NodeId> {
        self.graph.find_node(name).filter(|id| {
            !matches!(
                self.graph.node(*id).kind,
                NodeKind::MissingModule | NodeKind::ExcludedModule
            )
        })
    }

    /// The first directory of a package's search path.
    pub fn package_dir(&self, id: NodeId) -> Option<&Path> {
        self.graph.node(id).packagepath.first().map(|p| p.as_path())
    }

    pub fn add_module(&mut self, name: &str) -> Result<NodeId> {
        if let Some(id) = self.graph.find_node(name) {
            return Ok(id);
        }

        self.updated = true;
        self.graph.add_module(name)
    }

    pub fn add_script(&mut self, path: &Path) -> Result<NodeId> {
        if let Some(id) = self.graph.find_node(&path.display().to_string()) {
            return Ok(id);
        }

        self.updated = true;
        self.graph.add_script(path)
    }

    pub fn import_module(&mut self, importer: NodeId, name: &str) -> Result<NodeId> {
        if let Some(id) = self.graph.find_node(name) {
            if id == importer || self.graph.edge_data(importer, id).is_some() {
                return Ok(id);
            }
        }

        self.updated = true;
        self.graph.import_module(importer, name)
    }

    /// Import a package and every submodule it contains.
    ///
    /// A package that was imported completely before is left alone.
    pub fn import_package(&mut self, importer: NodeId, name: &str) -> Result<NodeId> {
        if let Some(id) = self.graph.find_node(name) {
            if self.graph.is_full_package(id) {
                return Ok(id);
            }
        }

        self.updated = true;
        let id = self.graph.import_package(importer, name)?;
        self.graph.mark_full_package(id);

        Ok(id)
    }

    /// Whether `name` can be imported, in the graph or on the search path.
    pub fn module_exists(&self, name: &str) -> bool {
        if self.find_module(name).is_some() {
            return true;
        }

        let finder = self.graph.finder();
        let mut parts = name.split('.');
        let mut location = match parts.next().and_then(|top| finder.find_toplevel(top)) {
            Some(location) => location,
            None => return false,
        };

        for part in parts {
            let dirs = match location {
                ModuleLocation::Package { search_path, .. }
                | ModuleLocation::NamespacePackage { search_path } => search_path,
                _ => return false,
            };
            location = match finder.find_in(part, &dirs) {
                Some(location) => location,
                None => return false,
            };
        }

        true
    }

    /// Import `name` from `importer` when the module exists.
    ///
    /// Nothing is recorded for modules that can't be found, so they don't
    /// show up as missing imports.
    pub fn import_if_present(&mut self, importer: NodeId, name: &str) -> Result<Option<NodeId>> {
        if !self.module_exists(name) {
            return Ok(None);
        }

        self.import_module(importer, name).map(Some)
    }

    pub fn remove_all_edges(&mut self, from: NodeId, to: &str) -> bool {
        let exists = self
            .graph
            .find_node(to)
            .map_or(false, |id| self.graph.edge_data(from, id).is_some());
        if !exists {
            return false;
        }

        let changed = self.graph.remove_all_edges(from, to);
        self.track(changed)
    }

    pub fn mark_zipunsafe(&mut self, id: NodeId) -> bool {
        let changed = self.graph.mark_zipunsafe(id);
        self.track(changed)
    }

    pub fn set_zipsafe(&mut self, id: NodeId, value: bool) -> bool {
        let changed = self.graph.set_zipsafe(id, value);
        self.track(changed)
    }

    pub fn add_bootstrap(&mut self, id: NodeId, source: &str) -> Result<bool> {
        let changed = self.graph.add_bootstrap(id, source)?;
        Ok(self.track(changed))
    }

    pub fn add_resources(&mut self, id: NodeId, resources: Vec<Resource>) -> bool {
        let changed = self.graph.add_resources(id, resources);
        self.track(changed)
    }

    pub fn add_generated_file(&mut self, id: NodeId, path: impl Into<PathBuf>, data: &[u8]) -> bool {
        let changed = self.graph.add_generated_file(id, path, data);
        self.track(changed)
    }

    pub fn add_frameworks(&mut self, paths: impl IntoIterator<Item = PathBuf>) -> bool {
        let changed = self.graph.add_frameworks(paths);
        self.track(changed)
    }

    pub fn set_expected_missing(&mut self, id: NodeId) -> bool {
        let changed = self.graph.set_expected_missing(id);
        self.track(changed)
    }

    pub fn set_ignore_resources(&mut self, id: NodeId) -> bool {
        let changed = self.graph.set_ignore_resources(id);
        self.track(changed)
    }
}

/// Run the active recipes of `registry` until the graph stops changing.
pub fn run_recipes(
    graph: &mut Py2appGraph,
    registry: &RecipeRegistry,
    context: &RecipeContext,
    progress: &mut dyn Progress,
) -> std::result::Result<(), Py2appError> {
    let task = progress.add_task("Processing recipes", None);

    loop {
        let distributions = graph
            .distributions()
            .into_iter()
            .map(|d| (d.normalized_name(), d.version.clone()))
            .collect::<BTreeMap<_, _>>();

        let mut updated = false;

        for recipe in registry.recipes() {
            let active = recipe
                .is_active(graph, &distributions)
                .map_err(|e| Py2appError::Recipe {
                    name: recipe.name.clone(),
                    message: format!("{:#}", e),
                })?;
            if !active {
                continue;
            }

            progress.update_task(task, &recipe.name);
            progress.step_task(task);
            debug!("running recipe {}", recipe.name);

            let mut proxy = RecipeGraph::new(graph);
            (recipe.callback)(&mut proxy, context).map_err(|e| Py2appError::Recipe {
                name: recipe.name.clone(),
                message: format!("{:#}", e),
            })?;

            if proxy.is_updated() {
                progress.info(&format!(
                    "Recipe {:?} updated the dependency graph",
                    recipe.name
                ));
                updated = true;
            }
        }

        if !updated {
            break;
        }
    }

    progress.task_done(task);

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            progress::{MessageLevel, RecordingProgress},
            testutil::fake_graph,
        },
        python_packaging::testutil::write_tree,
    };

    fn noop(_graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
        Ok(())
    }

    fn add_json(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
        if let Some(id) = graph.find_module("app") {
            graph.import_module(id, "json")?;
        }
        Ok(())
    }

    fn failing(_graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
        Err(anyhow!("no can do"))
    }

    #[test]
    fn version_specifiers() -> Result<()> {
        let spec = VersionSpec::parse(">=1.2, <2")?;
        assert!(spec.matches("1.2"));
        assert!(spec.matches("1.10.3"));
        assert!(!spec.matches("2.0"));
        assert!(!spec.matches("1.1.9"));

        assert!(VersionSpec::parse("!=3.0")?.matches("3.1"));
        assert!(!VersionSpec::parse("==3.0")?.matches("3.1"));
        assert!(VersionSpec::parse("~1.0").is_err());
        assert!(VersionSpec::parse("").is_err());
        assert!(VersionSpec::parse(">=").is_err());

        Ok(())
    }

    #[test]
    fn guards() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(td.path(), &[("app.py", "import json\n"), ("json.py", "")])?;
        let mut graph = fake_graph(td.path())?;
        graph.add_module("app")?;
        graph.add_module("does_not_exist")?;

        let mut distributions = BTreeMap::new();
        distributions.insert("opencv-python".to_string(), "4.8.1".to_string());

        let unguarded = RecipeInfo::new("unguarded", noop);
        assert!(unguarded.is_active(&graph, &distributions)?);

        let by_module = RecipeInfo::new("m", noop).modules(&["json", "other"]);
        assert!(by_module.is_active(&graph, &distributions)?);

        let missing = RecipeInfo::new("m", noop).modules(&["does_not_exist"]);
        assert!(!missing.is_active(&graph, &distributions)?);

        let by_dist = RecipeInfo::new("d", noop).distribution("OpenCV_Python");
        assert!(by_dist.is_active(&graph, &distributions)?);

        let old = RecipeInfo::new("d", noop)
            .distribution("opencv-python")
            .version_spec("<4");
        assert!(!old.is_active(&graph, &distributions)?);

        // Either part of the guard is sufficient.
        let either = RecipeInfo::new("d", noop)
            .distribution("opencv-python")
            .version_spec("<4")
            .modules(&["app"]);
        assert!(either.is_active(&graph, &distributions)?);

        let invalid = RecipeInfo::new("d", noop)
            .distribution("opencv-python")
            .version_spec("~=4");
        assert!(invalid.is_active(&graph, &distributions).is_err());

        Ok(())
    }

    #[test]
    fn proxy_tracks_changes() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[
                ("app.py", "import json\n"),
                ("json.py", ""),
                ("pkg/__init__.py", ""),
                ("pkg/a.py", ""),
            ],
        )?;
        let mut graph = fake_graph(td.path())?;
        let app = graph.add_module("app")?;

        let mut proxy = RecipeGraph::new(&mut graph);
        proxy.add_module("app")?;
        proxy.import_module(app, "json")?;
        assert!(!proxy.is_updated());

        proxy.import_package(app, "pkg")?;
        assert!(proxy.is_updated());
        assert!(proxy.find_module("pkg.a").is_some());

        let mut proxy = RecipeGraph::new(&mut graph);
        proxy.import_package(app, "pkg")?;
        assert!(!proxy.remove_all_edges(app, "nosuchmodule"));
        assert!(!proxy.is_updated());

        assert!(proxy.remove_all_edges(app, "json"));
        assert!(!proxy.remove_all_edges(app, "json"));
        assert!(proxy.is_updated());

        let mut proxy = RecipeGraph::new(&mut graph);
        assert!(proxy.mark_zipunsafe(app));
        assert!(!proxy.mark_zipunsafe(app));
        assert!(proxy.is_updated());

        Ok(())
    }

    #[test]
    fn fix_point() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(td.path(), &[("app.py", ""), ("json.py", "")])?;
        let mut graph = fake_graph(td.path())?;
        let app = graph.add_module("app")?;

        let mut registry = RecipeRegistry::default();
        registry.register(RecipeInfo::new("json", add_json).modules(&["app"]));
        registry.register(RecipeInfo::new("never", failing).modules(&["nope"]));

        let options = RecipeOptions::default();
        let context = RecipeContext {
            options: &options,
            interpreter: None,
        };
        let mut progress = RecordingProgress::default();

        run_recipes(&mut graph, &registry, &context, &mut progress)?;

        let json = graph.find_node("json").expect("json in graph");
        assert!(graph.edge_data(app, json).is_some());
        assert_eq!(
            progress.messages(MessageLevel::Info),
            vec!["Recipe \"json\" updated the dependency graph"]
        );
        // One pass that changed the graph and one that did not.
        assert_eq!(progress.steps, vec![2]);
        assert_eq!(progress.finished, vec!["Processing recipes"]);

        Ok(())
    }

    #[test]
    fn recipe_failure() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let mut graph = fake_graph(td.path())?;

        let mut registry = RecipeRegistry::default();
        registry.register(RecipeInfo::new("broken", failing));

        let options = RecipeOptions::default();
        let context = RecipeContext {
            options: &options,
            interpreter: None,
        };

        let err = run_recipes(
            &mut graph,
            &registry,
            &context,
            &mut RecordingProgress::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "recipe \"broken\" failed: no can do");

        Ok(())
    }

    #[test]
    fn builtin_registry() {
        let registry = RecipeRegistry::with_builtin_recipes();
        for name in ["stdlib", "zip-unsafe", "ctypes", "tkinter", "ssl", "sip", "pyobjc", "six"] {
            assert!(registry.find(name).is_some(), "{} registered", name);
        }
    }
}
