// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Python module dependency graphs.

A [ModuleGraph] is built by adding roots (scripts and explicitly requested
modules). Every source module that enters the graph is scanned for import
statements and the modules those statements name are added in turn, until
no new modules show up. Modules that cannot be found are still recorded,
as [NodeKind::MissingModule] nodes, so callers can report on them.

Nodes are identified by a [NodeId] that stays valid for the lifetime of the
graph. Edges are directed from the importing module to the imported one
and carry one [DependencyInfo] per import statement.

The graph only has a notion of *reachability* from the roots: removing
edges can orphan nodes, and [ModuleGraph::iter_graph] only yields nodes
still reachable.
*/

use {
    crate::{
        filesystem_scanning::{DistributionIndex, PythonDistribution},
        finder::{ModuleFileKind, ModuleFinder, ModuleLocation},
        import_scan::{ImportScanner, ImportStatement, ScanResult},
        module_util::{parent_module_name, resolve_relative_import},
    },
    anyhow::{Context, Result},
    itertools::Itertools,
    log::{debug, warn},
    std::{
        collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
        path::{Path, PathBuf},
    },
};

/// Identifies a node in a [ModuleGraph].
pub type NodeId = usize;

/// The kind of a node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NodeKind {
    /// An entry point script. Identified by its path.
    Script,
    SourceModule,
    /// A module only available as a `.pyc` file.
    BytecodeModule,
    Package,
    NamespacePackage,
    ExtensionModule,
    BuiltinModule,
    FrozenModule,
    /// A name that is an alias for another module (e.g. `os.path`).
    AliasNode,
    MissingModule,
    /// A module that was excluded by the caller.
    ExcludedModule,
    /// A source module that could not be parsed.
    InvalidSourceModule,
}

/// Value stored in a node's extension attribute bag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

/// A module (or script) in the graph.
#[derive(Clone, Debug)]
pub struct Node {
    /// Dotted module name, or the path for scripts.
    pub identifier: String,
    pub kind: NodeKind,
    /// File implementing the node. `__init__` file for packages.
    pub filename: Option<PathBuf>,
    /// Kind of file behind `filename`.
    pub file_kind: Option<ModuleFileKind>,
    /// `__path__` of packages.
    pub packagepath: Vec<PathBuf>,
    /// Whether module scope code reads `__file__`.
    pub uses_dunder_file: bool,
    /// Names bound at module scope.
    pub globals_written: BTreeSet<String>,
    /// Target module of [NodeKind::AliasNode] nodes.
    pub alias_target: Option<String>,
    /// Parse error of [NodeKind::InvalidSourceModule] nodes.
    pub syntax_error: Option<String>,
    /// Arbitrary key-value data attached by graph users.
    pub extension_attributes: BTreeMap<String, AttributeValue>,
}

impl Node {
    fn new(identifier: impl ToString, kind: NodeKind) -> Self {
        Self {
            identifier: identifier.to_string(),
            kind,
            filename: None,
            file_kind: None,
            packagepath: vec![],
            uses_dunder_file: false,
            globals_written: BTreeSet::new(),
            alias_target: None,
            syntax_error: None,
            extension_attributes: BTreeMap::new(),
        }
    }

    /// Whether this node is a regular or namespace package.
    pub fn is_package(&self) -> bool {
        matches!(self.kind, NodeKind::Package | NodeKind::NamespacePackage)
    }

    /// Whether this node does not correspond to anything that can be shipped.
    pub fn is_virtual(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::BuiltinModule
                | NodeKind::FrozenModule
                | NodeKind::AliasNode
                | NodeKind::MissingModule
                | NodeKind::ExcludedModule
        )
    }

    /// Obtain a boolean extension attribute.
    pub fn bool_attribute(&self, key: &str) -> Option<bool> {
        match self.extension_attributes.get(key) {
            Some(AttributeValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Describes one import statement responsible for an edge.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct DependencyInfo {
    /// The import is inside a `try` or `if` block.
    pub is_optional: bool,
    /// The import runs at module scope.
    pub is_global: bool,
    /// The target was named in the fromlist of `from X import ...`.
    pub in_fromlist: bool,
    /// Name bound by the import, when it differs from the target.
    pub imported_as: Option<String>,
}

impl DependencyInfo {
    /// Edge info for structural (non import statement) dependencies.
    pub fn structural() -> Self {
        Self {
            is_global: true,
            ..Default::default()
        }
    }
}

enum Work {
    Imports(NodeId, Vec<ImportStatement>),
    FullPackage(NodeId),
}

/// A graph of Python modules and their import relationships.
pub struct ModuleGraph {
    finder: ModuleFinder,
    scanner: Box<dyn ImportScanner>,
    distributions: DistributionIndex,
    nodes: Vec<Node>,
    by_name: HashMap<String, NodeId>,
    roots: Vec<NodeId>,
    outgoing: Vec<BTreeMap<NodeId, Vec<DependencyInfo>>>,
    incoming: Vec<BTreeSet<NodeId>>,
    excludes: BTreeSet<String>,
    full_packages: BTreeSet<String>,
    expanded_packages: BTreeSet<NodeId>,
    pending: VecDeque<Work>,
}

impl ModuleGraph {
    /// Construct an empty graph.
    ///
    /// Distributions are indexed from the finder's search path.
    pub fn new(finder: ModuleFinder, scanner: Box<dyn ImportScanner>) -> Result<Self> {
        let distributions = DistributionIndex::from_search_path(finder.search_path())
            .context("scanning for installed distributions")?;

        Ok(Self {
            finder,
            scanner,
            distributions,
            nodes: vec![],
            by_name: HashMap::new(),
            roots: vec![],
            outgoing: vec![],
            incoming: vec![],
            excludes: BTreeSet::new(),
            full_packages: BTreeSet::new(),
            expanded_packages: BTreeSet::new(),
            pending: VecDeque::new(),
        })
    }

    pub fn finder(&self) -> &ModuleFinder {
        &self.finder
    }

    /// Make `name` resolve to `target`. Only affects names not yet in the graph.
    pub fn add_alias(&mut self, name: &str, target: &str) {
        self.finder.add_alias(name, target);
    }

    /// Obtain a node by id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Obtain a mutable node by id.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Find the node for a module name or script path.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// All nodes, reachable or not.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Names that must never be resolved. Submodules of excluded names are excluded too.
    pub fn add_excludes(&mut self, names: impl IntoIterator<Item = impl ToString>) {
        self.excludes
            .extend(names.into_iter().map(|n| n.to_string()));
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.excludes
            .iter()
            .any(|e| name == e || (name.starts_with(e.as_str()) && name[e.len()..].starts_with('.')))
    }

    /// Packages that are always included with all their submodules.
    ///
    /// This acts as a post-processing hook on package nodes: whenever one of
    /// these packages enters the graph, everything below it is imported.
    pub fn add_full_packages(
        &mut self,
        names: impl IntoIterator<Item = impl ToString>,
    ) -> Result<()> {
        for name in names {
            let name = name.to_string();
            if let Some(id) = self.find_node(&name) {
                self.pending.push_back(Work::FullPackage(id));
            }
            self.full_packages.insert(name);
        }

        self.process_pending()
    }

    /// Add an entry point script as a graph root.
    pub fn add_script(&mut self, path: &Path) -> Result<NodeId> {
        let identifier = path.display().to_string();
        if let Some(id) = self.find_node(&identifier) {
            return Ok(id);
        }

        let source = std::fs::read(path)
            .with_context(|| format!("reading script {}", path.display()))?;

        let mut node = Node::new(&identifier, NodeKind::Script);
        node.filename = Some(path.to_path_buf());
        node.file_kind = Some(ModuleFileKind::Source);
        let id = self.insert_node(node);

        self.scan_node(id, &source)?;
        self.add_root(id);
        self.process_pending()?;

        Ok(id)
    }

    /// Add a module as a graph root.
    pub fn add_module(&mut self, name: &str) -> Result<NodeId> {
        let id = self.ensure_module(name)?;
        self.add_root(id);
        self.process_pending()?;

        Ok(id)
    }

    /// Record that `importer` imports `name`.
    pub fn import_module(&mut self, importer: NodeId, name: &str) -> Result<NodeId> {
        let id = self.ensure_module(name)?;
        self.add_edge(importer, id, DependencyInfo::structural());
        self.process_pending()?;

        Ok(id)
    }

    /// Record that `importer` imports package `name` and all of its submodules.
    pub fn import_package(&mut self, importer: NodeId, name: &str) -> Result<NodeId> {
        let id = self.ensure_module(name)?;
        self.add_edge(importer, id, DependencyInfo::structural());
        self.pending.push_back(Work::FullPackage(id));
        self.process_pending()?;

        Ok(id)
    }

    /// Remove all edges from `from` to the node named `to`.
    ///
    /// Returns false when there is no such node.
    pub fn remove_all_edges(&mut self, from: NodeId, to: &str) -> bool {
        let to = match self.find_node(to) {
            Some(id) => id,
            None => return false,
        };

        self.outgoing[from].remove(&to);
        self.incoming[to].remove(&from);

        true
    }

    /// The import statements responsible for the edge `from -> to`.
    pub fn edge_data(&self, from: NodeId, to: NodeId) -> Option<&[DependencyInfo]> {
        self.outgoing[from].get(&to).map(|v| v.as_slice())
    }

    /// Nodes imported by `id`.
    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &[DependencyInfo])> {
        self.outgoing[id]
            .iter()
            .map(|(target, info)| (*target, info.as_slice()))
    }

    /// Nodes importing `id`.
    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &[DependencyInfo])> + '_ {
        self.incoming[id].iter().filter_map(move |source| {
            self.outgoing[*source]
                .get(&id)
                .map(|info| (*source, info.as_slice()))
        })
    }

    /// All nodes reachable from the roots, breadth first.
    pub fn iter_graph(&self) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue = self.roots.iter().copied().collect::<VecDeque<_>>();
        let mut res = vec![];

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            res.push(id);
            queue.extend(self.outgoing[id].keys().copied());
        }

        res
    }

    /// Set an extension attribute on a node.
    pub fn set_attribute(&mut self, id: NodeId, key: impl ToString, value: AttributeValue) {
        self.nodes[id]
            .extension_attributes
            .insert(key.to_string(), value);
    }

    /// Obtain an extension attribute of a node.
    pub fn attribute(&self, id: NodeId, key: &str) -> Option<&AttributeValue> {
        self.nodes[id].extension_attributes.get(key)
    }

    /// The distribution that installed the file behind a node.
    pub fn distribution_for_node(&self, id: NodeId) -> Option<&PythonDistribution> {
        let node = &self.nodes[id];

        if let Some(filename) = &node.filename {
            return self.distributions.for_file(filename);
        }

        node.packagepath
            .iter()
            .find_map(|p| self.distributions.for_file(&p.join("__init__.py")))
    }

    /// Distributions providing at least one reachable node.
    pub fn distributions(&self) -> Vec<&PythonDistribution> {
        self.iter_graph()
            .into_iter()
            .filter_map(|id| self.distribution_for_node(id))
            .unique_by(|dist| dist.normalized_name())
            .collect()
    }

    /// Look up an installed distribution by name, reachable or not.
    pub fn find_distribution(&self, name: &str) -> Option<&PythonDistribution> {
        self.distributions.find(name)
    }

    /// Check that `source` parses. Returns the syntax error, if any.
    ///
    /// The graph is not modified.
    pub fn validate_source(&mut self, source: &[u8], name: &str) -> Result<Option<String>> {
        Ok(self.scanner.scan(source, name)?.error)
    }

    /// Add the modules imported by a source fragment that isn't a module itself.
    ///
    /// Absolute imports become graph roots. Returns the syntax error when
    /// `source` does not parse, in which case nothing is added.
    pub fn add_source_dependencies(&mut self, source: &[u8], name: &str) -> Result<Option<String>> {
        let result = self.scanner.scan(source, name)?;
        if let Some(error) = result.error {
            return Ok(Some(error));
        }

        for statement in result
            .imports
            .iter()
            .filter(|s| s.level == 0 && !s.name.is_empty())
        {
            let id = self.ensure_module(&statement.name)?;
            self.add_root(id);

            if !self.nodes[id].is_package() {
                continue;
            }

            let packagepath = self.nodes[id].packagepath.clone();
            for leaf in &statement.fromlist {
                let full_name = format!("{}.{}", statement.name, leaf);
                if self.find_node(&full_name).is_some()
                    || self.finder.find_in(leaf, &packagepath).is_some()
                {
                    let sub = self.ensure_module(&full_name)?;
                    self.add_root(sub);
                }
            }
        }

        self.process_pending()?;

        Ok(None)
    }

    fn add_root(&mut self, id: NodeId) {
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
    }

    fn insert_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.by_name.insert(node.identifier.clone(), id);
        self.nodes.push(node);
        self.outgoing.push(BTreeMap::new());
        self.incoming.push(BTreeSet::new());
        id
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, info: DependencyInfo) {
        if from == to {
            return;
        }

        let infos = self.outgoing[from].entry(to).or_default();
        if !infos.contains(&info) {
            infos.push(info);
        }
        self.incoming[to].insert(from);
    }

    /// Scan a source node and queue its imports.
    fn scan_node(&mut self, id: NodeId, source: &[u8]) -> Result<()> {
        let filename = self.nodes[id]
            .filename
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let ScanResult {
            imports,
            globals,
            uses_dunder_file,
            error,
        } = self.scanner.scan(source, &filename)?;

        let node = &mut self.nodes[id];
        if let Some(error) = error {
            warn!("unable to parse {}: {}", filename, error);
            if node.kind != NodeKind::Script {
                node.kind = NodeKind::InvalidSourceModule;
            }
            node.syntax_error = Some(error);
            return Ok(());
        }

        node.uses_dunder_file = uses_dunder_file;
        node.globals_written = globals;
        self.pending.push_back(Work::Imports(id, imports));

        Ok(())
    }

    /// Find or create the node for module `name`, including its parent packages.
    fn ensure_module(&mut self, name: &str) -> Result<NodeId> {
        if let Some(id) = self.find_node(name) {
            return Ok(id);
        }

        if self.is_excluded(name) {
            debug!("excluding {}", name);
            return Ok(self.insert_node(Node::new(name, NodeKind::ExcludedModule)));
        }

        if let Some(target) = self.finder.alias_target(name).map(|s| s.to_string()) {
            let parent = match parent_module_name(name) {
                Some(parent_name) => Some(self.ensure_module(parent_name)?),
                None => None,
            };

            let mut node = Node::new(name, NodeKind::AliasNode);
            node.alias_target = Some(target.clone());
            let id = self.insert_node(node);
            if let Some(parent) = parent {
                self.add_edge(id, parent, DependencyInfo::structural());
            }
            let target_id = self.ensure_module(&target)?;
            self.add_edge(id, target_id, DependencyInfo::structural());
            return Ok(id);
        }

        let (location, parent) = match parent_module_name(name) {
            Some(parent_name) => {
                let parent_id = self.ensure_module(parent_name)?;
                let parent = &self.nodes[parent_id];
                let leaf = &name[parent_name.len() + 1..];

                let location = if parent.is_package() {
                    let search_path = parent.packagepath.clone();
                    self.finder.find_in(leaf, &search_path)
                } else {
                    None
                };

                (location, Some(parent_id))
            }
            None => (self.finder.find_toplevel(name), None),
        };

        let id = self.create_node(name, location)?;

        if let Some(parent) = parent {
            self.add_edge(id, parent, DependencyInfo::structural());
        }

        Ok(id)
    }

    fn create_node(&mut self, name: &str, location: Option<ModuleLocation>) -> Result<NodeId> {
        let location = match location {
            Some(location) => location,
            None => {
                debug!("module {} not found", name);
                return Ok(self.insert_node(Node::new(name, NodeKind::MissingModule)));
            }
        };

        let (node, scan_path) = match location {
            ModuleLocation::Builtin => (Node::new(name, NodeKind::BuiltinModule), None),
            ModuleLocation::Frozen => (Node::new(name, NodeKind::FrozenModule), None),
            ModuleLocation::File { path, kind } => {
                let mut node = Node::new(
                    name,
                    match kind {
                        ModuleFileKind::Source => NodeKind::SourceModule,
                        ModuleFileKind::Bytecode => NodeKind::BytecodeModule,
                        ModuleFileKind::Extension => NodeKind::ExtensionModule,
                    },
                );
                node.filename = Some(path.clone());
                node.file_kind = Some(kind);
                let scan = if kind == ModuleFileKind::Source {
                    Some(path)
                } else {
                    None
                };
                (node, scan)
            }
            ModuleLocation::Package {
                init,
                kind,
                search_path,
            } => {
                let mut node = Node::new(name, NodeKind::Package);
                node.filename = Some(init.clone());
                node.file_kind = Some(kind);
                node.packagepath = search_path;
                let scan = if kind == ModuleFileKind::Source {
                    Some(init)
                } else {
                    None
                };
                (node, scan)
            }
            ModuleLocation::NamespacePackage { search_path } => {
                let mut node = Node::new(name, NodeKind::NamespacePackage);
                node.packagepath = search_path;
                (node, None)
            }
        };

        let is_package = node.is_package();
        let id = self.insert_node(node);

        if let Some(path) = scan_path {
            let source =
                std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            self.scan_node(id, &source)?;
        }

        if is_package && self.wants_full_package(name) {
            self.pending.push_back(Work::FullPackage(id));
        }

        Ok(id)
    }

    fn wants_full_package(&self, name: &str) -> bool {
        self.full_packages.iter().any(|p| {
            name == p || (name.starts_with(p.as_str()) && name[p.len()..].starts_with('.'))
        })
    }

    fn process_pending(&mut self) -> Result<()> {
        while let Some(work) = self.pending.pop_front() {
            match work {
                Work::Imports(id, imports) => {
                    for statement in imports {
                        self.process_import(id, &statement)?;
                    }
                }
                Work::FullPackage(id) => self.expand_package(id)?,
            }
        }

        Ok(())
    }

    fn expand_package(&mut self, id: NodeId) -> Result<()> {
        if !self.nodes[id].is_package() || !self.expanded_packages.insert(id) {
            return Ok(());
        }

        let name = self.nodes[id].identifier.clone();
        let packagepath = self.nodes[id].packagepath.clone();

        for leaf in self.finder.iter_submodules(&packagepath) {
            let child = self.ensure_module(&format!("{}.{}", name, leaf))?;
            self.add_edge(id, child, DependencyInfo::structural());

            if self.nodes[child].is_package() {
                self.pending.push_back(Work::FullPackage(child));
            }
        }

        Ok(())
    }

    fn process_import(&mut self, importer: NodeId, statement: &ImportStatement) -> Result<()> {
        let info = DependencyInfo {
            is_optional: statement.conditional,
            is_global: statement.is_global,
            in_fromlist: false,
            imported_as: None,
        };

        let node = &self.nodes[importer];
        let base = if node.kind == NodeKind::Script && statement.level > 0 {
            None
        } else {
            resolve_relative_import(
                &node.identifier,
                node.kind == NodeKind::Package,
                statement.level,
                &statement.name,
            )
        };

        let base = match base {
            Some(base) => base,
            None => {
                // Relative import beyond the top-level package.
                let name = format!("{}{}", ".".repeat(statement.level), statement.name);
                let id = match self.find_node(&name) {
                    Some(id) => id,
                    None => self.insert_node(Node::new(&name, NodeKind::MissingModule)),
                };
                self.add_edge(importer, id, info);
                return Ok(());
            }
        };

        if base.is_empty() {
            return Ok(());
        }

        let target = self.ensure_module(&base)?;
        self.add_edge(importer, target, info.clone());

        if statement.fromlist.is_empty() || !self.nodes[target].is_package() {
            return Ok(());
        }

        let packagepath = self.nodes[target].packagepath.clone();

        for name in &statement.fromlist {
            let full_name = format!("{}.{}", base, name);

            let exists = self.find_node(&full_name).is_some()
                || self.finder.find_in(name, &packagepath).is_some();

            if !exists && self.nodes[target].globals_written.contains(name) {
                // `from pkg import attribute`
                continue;
            }

            let sub = self.ensure_module(&full_name)?;
            self.add_edge(
                importer,
                sub,
                DependencyInfo {
                    in_fromlist: true,
                    ..info.clone()
                },
            );
        }

        Ok(())
    }
}
