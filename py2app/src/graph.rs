// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The module graph as seen by the bundle builder.

[Py2appGraph] wraps a [ModuleGraph] and adds the annotations recipes use to
steer bundle assembly: zip safety, bootstrap scriptlets, extra resources
and frameworks, expected missing modules and package data suppression.

Annotations are stored in the node's extension attribute bag where a
plain value suffices. Resources and frameworks live in side tables.

All `add_` and `set_`/`mark_` methods are idempotent and report whether
they changed anything, because recipes run repeatedly until the graph
stops changing.
*/

use {
    crate::config::Resource,
    anyhow::{anyhow, Result},
    python_packaging::graph::{AttributeValue, ModuleGraph, NodeId, NodeKind},
    std::{
        collections::BTreeMap,
        ops::{Deref, DerefMut},
        path::PathBuf,
    },
};

pub const ATTR_ZIPSAFE: &str = "py2app.zipsafe";
pub const ATTR_BOOTSTRAP: &str = "py2app.bootstrap";
pub const ATTR_FULL_PACKAGE: &str = "py2app.full_package";
pub const ATTR_EXPECTED_MISSING: &str = "py2app.expected_missing";
pub const ATTR_IGNORE_RESOURCES: &str = "py2app.ignore_resources";

/// A [ModuleGraph] with bundle specific annotations.
pub struct Py2appGraph {
    graph: ModuleGraph,
    resources: BTreeMap<NodeId, Vec<Resource>>,
    generated: BTreeMap<NodeId, BTreeMap<PathBuf, Vec<u8>>>,
    frameworks: Vec<PathBuf>,
}

impl Deref for Py2appGraph {
    type Target = ModuleGraph;

    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

impl DerefMut for Py2appGraph {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.graph
    }
}

impl Py2appGraph {
    pub fn new(graph: ModuleGraph) -> Self {
        Self {
            graph,
            resources: BTreeMap::new(),
            generated: BTreeMap::new(),
            frameworks: vec![],
        }
    }

    fn set_flag(&mut self, id: NodeId, key: &str, value: bool) -> bool {
        if self.graph.node(id).bool_attribute(key) == Some(value) {
            return false;
        }

        self.graph.set_attribute(id, key, AttributeValue::Bool(value));
        true
    }

    fn flag(&self, id: NodeId, key: &str) -> bool {
        self.graph.node(id).bool_attribute(key).unwrap_or(false)
    }

    fn scriptlets(&self, id: NodeId) -> &[String] {
        match self.graph.attribute(id, ATTR_BOOTSTRAP) {
            Some(AttributeValue::List(values)) => values,
            _ => &[],
        }
    }

    fn check_scriptlet(&mut self, id: NodeId, source: &str) -> Result<()> {
        let name = format!("<bootstrap for {}>", self.graph.node(id).identifier);

        match self.graph.validate_source(source.as_bytes(), &name)? {
            Some(error) => Err(anyhow!("{}: {}", name, error)),
            None => Ok(()),
        }
    }

    /// Replace the bootstrap scriptlets of a node with `source`.
    pub fn set_bootstrap(&mut self, id: NodeId, source: &str) -> Result<bool> {
        if self.scriptlets(id) == [source.to_string()] {
            return Ok(false);
        }

        self.check_scriptlet(id, source)?;
        self.graph.set_attribute(
            id,
            ATTR_BOOTSTRAP,
            AttributeValue::List(vec![source.to_string()]),
        );

        Ok(true)
    }

    /// Add a bootstrap scriptlet to a node.
    ///
    /// The modules the scriptlet imports are added to the graph.
    pub fn add_bootstrap(&mut self, id: NodeId, source: &str) -> Result<bool> {
        if self.scriptlets(id).iter().any(|s| s == source) {
            return Ok(false);
        }

        let name = format!("<bootstrap for {}>", self.graph.node(id).identifier);
        if let Some(error) = self
            .graph
            .add_source_dependencies(source.as_bytes(), &name)?
        {
            return Err(anyhow!("{}: {}", name, error));
        }

        let mut values = self.scriptlets(id).to_vec();
        values.push(source.to_string());
        self.graph
            .set_attribute(id, ATTR_BOOTSTRAP, AttributeValue::List(values));

        Ok(true)
    }

    /// The bootstrap code attached to a node.
    pub fn bootstrap(&self, id: NodeId) -> Option<String> {
        let scriptlets = self.scriptlets(id);

        if scriptlets.is_empty() {
            None
        } else {
            Some(scriptlets.join("\n"))
        }
    }

    /// Mark a node as unable to run from a zip archive.
    pub fn mark_zipunsafe(&mut self, id: NodeId) -> bool {
        self.set_flag(id, ATTR_ZIPSAFE, false)
    }

    /// Override the zip safety analysis for a node.
    pub fn set_zipsafe(&mut self, id: NodeId, value: bool) -> bool {
        self.set_flag(id, ATTR_ZIPSAFE, value)
    }

    /// Whether a node can be loaded from the zip archive.
    ///
    /// An explicit annotation wins. Otherwise modules reading `__file__` at
    /// module scope are unsafe, and packages are all or nothing: a single
    /// unsafe module taints its whole top-level package. The result for a
    /// package is cached on its top-level node.
    pub fn is_zipsafe(&mut self, id: NodeId) -> bool {
        let node = self.graph.node(id);

        if !matches!(
            node.kind,
            NodeKind::SourceModule
                | NodeKind::BytecodeModule
                | NodeKind::ExtensionModule
                | NodeKind::Package
                | NodeKind::NamespacePackage
                | NodeKind::InvalidSourceModule
        ) {
            return true;
        }

        if let Some(value) = node.bool_attribute(ATTR_ZIPSAFE) {
            return value;
        }

        if node.uses_dunder_file {
            if node.is_package() {
                self.graph
                    .set_attribute(id, ATTR_ZIPSAFE, AttributeValue::Bool(false));
            }
            return false;
        }

        let base = match node.identifier.split_once('.') {
            Some((top, _)) => match self.graph.find_node(top) {
                Some(base) => base,
                None => return true,
            },
            None if node.is_package() => id,
            None => return true,
        };

        if let Some(value) = self.graph.node(base).bool_attribute(ATTR_ZIPSAFE) {
            return value;
        }

        let prefix = format!("{}.", self.graph.node(base).identifier);
        let unsafe_member = self.graph.iter_graph().into_iter().any(|other| {
            let node = self.graph.node(other);
            (other == base || node.identifier.starts_with(&prefix))
                && !node
                    .bool_attribute(ATTR_ZIPSAFE)
                    .unwrap_or(!node.uses_dunder_file)
        });

        self.graph.set_attribute(
            base,
            ATTR_ZIPSAFE,
            AttributeValue::Bool(!unsafe_member),
        );

        !unsafe_member
    }

    /// Partition the reachable nodes into zip archive and filesystem nodes.
    ///
    /// Nodes without files are skipped, as are modules that failed to parse.
    /// Top-level extension modules always go to the filesystem.
    pub fn collect_nodes(&mut self) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut zip_nodes = vec![];
        let mut unzip_nodes = vec![];

        for id in self.graph.iter_graph() {
            let node = self.graph.node(id);
            if node.is_virtual() || node.kind == NodeKind::InvalidSourceModule {
                continue;
            }

            if node.kind == NodeKind::ExtensionModule && !node.identifier.contains('.') {
                unzip_nodes.push(id);
            } else if self.is_zipsafe(id) {
                zip_nodes.push(id);
            } else {
                unzip_nodes.push(id);
            }
        }

        (zip_nodes, unzip_nodes)
    }

    /// Record that a package was imported with all of its submodules.
    pub fn mark_full_package(&mut self, id: NodeId) -> bool {
        self.set_flag(id, ATTR_FULL_PACKAGE, true)
    }

    pub fn is_full_package(&self, id: NodeId) -> bool {
        self.flag(id, ATTR_FULL_PACKAGE)
    }

    /// Suppress the "module not found" report for a node.
    pub fn set_expected_missing(&mut self, id: NodeId) -> bool {
        self.set_flag(id, ATTR_EXPECTED_MISSING, true)
    }

    pub fn is_expected_missing(&self, id: NodeId) -> bool {
        self.flag(id, ATTR_EXPECTED_MISSING)
    }

    /// Do not copy the package data of a node into the bundle.
    pub fn set_ignore_resources(&mut self, id: NodeId) -> bool {
        self.set_flag(id, ATTR_IGNORE_RESOURCES, true)
    }

    pub fn ignore_resources(&self, id: NodeId) -> bool {
        self.flag(id, ATTR_IGNORE_RESOURCES)
    }

    /// Files to copy into the bundle when a node is included.
    ///
    /// Resources already registered for the node are not added again.
    pub fn add_resources(&mut self, id: NodeId, resources: Vec<Resource>) -> bool {
        let existing = self.resources.entry(id).or_default();
        let mut changed = false;

        for resource in resources {
            if !existing.contains(&resource) {
                existing.push(resource);
                changed = true;
            }
        }

        changed
    }

    pub fn resources(&self, id: NodeId) -> &[Resource] {
        self.resources
            .get(&id)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    /// A file with fixed content to write into `Contents/Resources`.
    ///
    /// `path` is relative to the resources directory. Registering a
    /// different content for the same path replaces it.
    pub fn add_generated_file(&mut self, id: NodeId, path: impl Into<PathBuf>, data: &[u8]) -> bool {
        let files = self.generated.entry(id).or_default();
        let path = path.into();

        if files.get(&path).map(|d| d.as_slice()) == Some(data) {
            return false;
        }

        files.insert(path, data.to_vec());
        true
    }

    /// Generated files of all reachable nodes.
    pub fn all_generated_files(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        self.graph
            .iter_graph()
            .into_iter()
            .filter_map(|id| self.generated.get(&id))
            .flat_map(|files| files.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }

    /// Native libraries to copy into `Contents/Frameworks`.
    pub fn add_frameworks(&mut self, paths: impl IntoIterator<Item = PathBuf>) -> bool {
        let mut changed = false;

        for path in paths {
            if !self.frameworks.contains(&path) {
                self.frameworks.push(path);
                changed = true;
            }
        }

        changed
    }

    pub fn frameworks(&self) -> &[PathBuf] {
        &self.frameworks
    }

    /// Resources of all reachable nodes, in graph order.
    pub fn all_resources(&self) -> Vec<Resource> {
        self.graph
            .iter_graph()
            .into_iter()
            .flat_map(|id| self.resources(id).iter().cloned())
            .collect()
    }

    /// Bootstrap code of all reachable nodes, in graph order.
    pub fn all_bootstraps(&self) -> Vec<String> {
        self.graph
            .iter_graph()
            .into_iter()
            .filter_map(|id| self.bootstrap(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*, crate::testutil::fake_graph, python_packaging::testutil::write_tree,
        std::path::Path,
    };

    fn node(graph: &Py2appGraph, name: &str) -> NodeId {
        graph
            .find_node(name)
            .unwrap_or_else(|| panic!("{} not in graph", name))
    }

    #[test]
    fn zipsafe_escalates_to_toplevel_package() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[
                ("main.py", "import pkg.a\nimport pkg.b\nimport plain\nimport other\n"),
                ("pkg/__init__.py", ""),
                ("pkg/a.py", ""),
                ("pkg/b.py", "DATA = __file__\n"),
                ("plain.py", "HERE = __file__\n"),
                ("other/__init__.py", ""),
            ],
        )?;

        let mut graph = fake_graph(td.path())?;
        graph.add_script(&td.path().join("main.py"))?;

        let a = node(&graph, "pkg.a");
        assert!(!graph.is_zipsafe(a));
        let pkg = node(&graph, "pkg");
        assert!(!graph.is_zipsafe(pkg));
        assert_eq!(
            graph.node(pkg).bool_attribute(ATTR_ZIPSAFE),
            Some(false),
            "result is cached on the package"
        );

        let plain = node(&graph, "plain");
        assert!(!graph.is_zipsafe(plain));
        let other = node(&graph, "other");
        assert!(graph.is_zipsafe(other));

        Ok(())
    }

    #[test]
    fn zipsafe_override() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[
                ("main.py", "import importlib.util\n"),
                ("importlib/__init__.py", "X = __file__\n"),
                ("importlib/util.py", ""),
            ],
        )?;

        let mut graph = fake_graph(td.path())?;
        graph.add_script(&td.path().join("main.py"))?;

        let importlib = node(&graph, "importlib");
        assert!(graph.set_zipsafe(importlib, true));
        assert!(!graph.set_zipsafe(importlib, true));
        assert!(graph.is_zipsafe(importlib));
        let util = node(&graph, "importlib.util");
        assert!(graph.is_zipsafe(util));

        Ok(())
    }

    #[test]
    fn collect_partition() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[
                ("main.py", "import sys\nimport fast\nimport pkg.speedup\nimport gone\nimport dirty\n"),
                ("fast.so", ""),
                ("pkg/__init__.py", ""),
                ("pkg/speedup.so", ""),
                ("dirty/__init__.py", ""),
            ],
        )?;

        let mut graph = fake_graph(td.path())?;
        let script = graph.add_script(&td.path().join("main.py"))?;
        let dirty = node(&graph, "dirty");
        assert!(graph.mark_zipunsafe(dirty));
        assert!(!graph.mark_zipunsafe(dirty));

        let (zip_nodes, unzip_nodes) = graph.collect_nodes();
        let names = |ids: &[NodeId]| {
            ids.iter()
                .map(|id| graph.node(*id).identifier.clone())
                .collect::<Vec<_>>()
        };
        let zipped = names(&zip_nodes);
        let unzipped = names(&unzip_nodes);

        assert!(zip_nodes.contains(&script));
        assert!(zipped.contains(&"pkg".to_string()));
        assert!(zipped.contains(&"pkg.speedup".to_string()));
        assert!(unzipped.contains(&"fast".to_string()));
        assert!(unzipped.contains(&"dirty".to_string()));
        for skipped in ["sys", "gone"] {
            assert!(!zipped.contains(&skipped.to_string()));
            assert!(!unzipped.contains(&skipped.to_string()));
        }

        Ok(())
    }

    #[test]
    fn bootstrap_scriptlets() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(td.path(), &[("main.py", ""), ("helper.py", "")])?;

        let mut graph = fake_graph(td.path())?;
        let script = graph.add_script(&td.path().join("main.py"))?;

        assert_eq!(graph.bootstrap(script), None);
        assert!(graph.add_bootstrap(script, "import helper\n")?);
        assert!(!graph.add_bootstrap(script, "import helper\n")?);
        assert!(graph.find_node("helper").is_some());
        assert!(graph.add_bootstrap(script, "x = 1\n")?);
        assert_eq!(
            graph.bootstrap(script).as_deref(),
            Some("import helper\n\nx = 1\n")
        );

        assert!(graph.add_bootstrap(script, "SYNTAX ERROR\n").is_err());
        assert!(graph.set_bootstrap(script, "SYNTAX ERROR\n").is_err());

        assert!(graph.set_bootstrap(script, "y = 2\n")?);
        assert_eq!(graph.bootstrap(script).as_deref(), Some("y = 2\n"));
        assert_eq!(graph.all_bootstraps(), vec!["y = 2\n".to_string()]);

        Ok(())
    }

    #[test]
    fn side_tables_are_idempotent() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(td.path(), &[("main.py", "import gone\n")])?;

        let mut graph = fake_graph(td.path())?;
        let script = graph.add_script(&td.path().join("main.py"))?;
        let gone = node(&graph, "gone");

        let resource = Resource::new("data", vec![PathBuf::from("/data/a.txt")]);
        assert!(graph.add_resources(script, vec![resource.clone()]));
        assert!(!graph.add_resources(script, vec![resource.clone()]));
        assert_eq!(graph.resources(script), &[resource.clone()]);
        assert_eq!(graph.all_resources(), vec![resource]);
        assert!(graph.resources(gone).is_empty());

        assert!(graph.add_frameworks(vec![PathBuf::from("/opt/lib/libfoo.dylib")]));
        assert!(!graph.add_frameworks(vec![PathBuf::from("/opt/lib/libfoo.dylib")]));
        assert_eq!(graph.frameworks(), &[Path::new("/opt/lib/libfoo.dylib").to_path_buf()]);

        assert!(!graph.is_expected_missing(gone));
        assert!(graph.set_expected_missing(gone));
        assert!(!graph.set_expected_missing(gone));
        assert!(graph.is_expected_missing(gone));

        assert!(graph.add_generated_file(script, "qt.conf", b"[Paths]\n"));
        assert!(!graph.add_generated_file(script, "qt.conf", b"[Paths]\n"));
        assert!(graph.add_generated_file(script, "qt.conf", b"[Paths]\nPrefix = .\n"));
        assert_eq!(
            graph.all_generated_files().get(Path::new("qt.conf")),
            Some(&b"[Paths]\nPrefix = .\n".to_vec())
        );

        assert!(graph.set_ignore_resources(script));
        assert!(graph.ignore_resources(script));
        assert!(graph.mark_full_package(script));
        assert!(graph.is_full_package(script));

        Ok(())
    }
}
