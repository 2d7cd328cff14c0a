// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Writing the Python code of a bundle.

Reachable graph nodes are split into zip safe and filesystem nodes (see
[Py2appGraph::collect_nodes]). Zip safe nodes are byte-compiled into
`Resources/lib/pythonX.Y/site-packages.zip`, everything else is written
below `Resources/lib/pythonX.Y`.

Extension modules are never loaded from the archive. Extensions of zipped
packages are copied to `lib-dynload/<dotted name>.so` and a small loader
module is stored in the archive in their place.
*/

use {
    crate::{
        graph::Py2appGraph,
        progress::Progress,
        resources::{compile_patterns, matches_any, IGNORED_PATTERNS},
    },
    anyhow::{anyhow, Context, Result},
    apple_bundles::BundlePaths,
    apple_macho::{normalize_path, MachOFile},
    log::{debug, warn},
    python_packaging::{
        bytecode::{compile_pyc, BytecodeOptimizationLevel, PythonBytecodeCompiler},
        filesystem_scanning::PythonDistribution,
        finder::ModuleFileKind,
        graph::{NodeId, NodeKind},
        module_util::resolve_path_for_module,
        zip_library::ZipLibraryBuilder,
    },
    std::{
        collections::{BTreeMap, BTreeSet},
        path::{Path, PathBuf},
    },
};

/// File suffixes that are never package data.
const CODE_SUFFIXES: &[&str] = &["py", "pyi", "pyc", "pyo", "so"];


/// Files of `.dist-info` directories that describe the installation, not the package.
const SKIPPED_DIST_INFO: &[&str] = &["RECORD", "INSTALLER", "WHEEL", "REQUESTED", "installed-files.txt"];

/// Archive directory holding compiled entry point scripts.
pub const SCRIPTS_DIR: &str = "bundle-scripts";

fn extension_loader_source(name: &str) -> String {
    format!(
        r#"def __load():
    import importlib.machinery
    import importlib.util
    import os
    import sys

    for entry in sys.path:
        if not entry.endswith("/lib-dynload"):
            continue
        path = os.path.join(entry, "{name}.so")
        if os.path.exists(path):
            loader = importlib.machinery.ExtensionFileLoader(__name__, path)
            spec = importlib.util.spec_from_file_location(__name__, path, loader=loader)
            module = importlib.util.module_from_spec(spec)
            sys.modules[__name__] = module
            loader.exec_module(module)
            return
    raise ImportError("No module named " + __name__, name=__name__)


__load()
del __load
"#,
        name = name
    )
}

fn has_code_suffix(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| CODE_SUFFIXES.contains(&s))
        .unwrap_or(false)
}

fn is_skipped(name: &str, junk: &[glob::Pattern]) -> bool {
    name == "__pycache__" || matches_any(name, junk)
}

/// Data files of a package, as `(relative path, absolute path)`.
///
/// Files directly in the package directories are included unless they hold
/// code. Subdirectories are included recursively when they contain no
/// Python files themselves; other subdirectories are subpackages.
pub fn package_data(package_dirs: &[PathBuf]) -> Result<Vec<(PathBuf, PathBuf)>> {
    let junk = compile_patterns(IGNORED_PATTERNS)?;
    let mut res = vec![];

    for dir in package_dirs {
        let mut entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries.collect::<std::io::Result<Vec<_>>>()?,
            Err(_) => continue,
        };
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            if is_skipped(&name, &junk) {
                continue;
            }

            if path.is_dir() {

                let holds_code = std::fs::read_dir(&path)?
                    .filter_map(|e| e.ok())
                    .any(|e| has_code_suffix(&e.path()));
                if holds_code {
                    continue;
                }

                for sub in walkdir::WalkDir::new(&path)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_entry(|e| !is_skipped(&e.file_name().to_string_lossy(), &junk))
                {
                    let sub = sub?;
                    if sub.file_type().is_dir() {
                        continue;
                    }
                    let rel = sub.path().strip_prefix(dir)?.to_path_buf();
                    res.push((rel, sub.path().to_path_buf()));
                }
            } else if !has_code_suffix(&path) {
                res.push((PathBuf::from(name), path));
            }
        }
    }

    Ok(res)
}

/// Metadata files of a distribution, as `(archive path, absolute path)`.
pub fn distribution_files(dist: &PythonDistribution) -> Result<Vec<(PathBuf, PathBuf)>> {
    let dir_name = dist
        .metadata_path
        .file_name()
        .ok_or_else(|| anyhow!("bad metadata path {}", dist.metadata_path.display()))?;

    let mut res = vec![];
    for entry in walkdir::WalkDir::new(&dist.metadata_path).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }

        let rel = entry.path().strip_prefix(&dist.metadata_path)?;
        if rel
            .to_str()
            .map(|s| SKIPPED_DIST_INFO.contains(&s))
            .unwrap_or(false)
        {
            continue;
        }

        res.push((Path::new(dir_name).join(rel), entry.path().to_path_buf()));
    }

    Ok(res)
}

/// Copy the files an extension references through `@loader_path`.
///
/// Files are placed at the same position relative to `dest` as they have
/// relative to `source`, and are processed in turn.
pub fn copy_loader_path_dependencies(source: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut copied = vec![];
    let mut seen = BTreeSet::new();
    let mut todo = vec![(source.to_path_buf(), dest.to_path_buf())];

    while let Some((source, dest)) = todo.pop() {
        let macho = match MachOFile::from_path(&source)? {
            Some(m) => m,
            None => continue,
        };

        let source_dir = source.parent().unwrap_or_else(|| Path::new("/"));
        let dest_dir = dest.parent().unwrap_or_else(|| Path::new("/"));

        for name in macho.dylib_names() {
            let rel = match name.strip_prefix("@loader_path/") {
                Some(rel) => rel,
                None => continue,
            };

            let dep_source = normalize_path(&source_dir.join(rel));
            let dep_dest = normalize_path(&dest_dir.join(rel));

            if !seen.insert(dep_dest.clone()) || dep_dest.symlink_metadata().is_ok() {
                continue;
            }
            if !dep_source.exists() {
                warn!("{} references missing {}", source.display(), dep_source.display());
                continue;
            }

            debug!("copying {} for {}", dep_source.display(), source.display());
            crate::resources::copy_file(&dep_source, &dep_dest)?;
            copied.push(dep_dest.clone());
            todo.push((dep_source, dep_dest));
        }
    }

    Ok(copied)
}

/// What [PayloadWriter::write] produced.
#[derive(Clone, Debug, Default)]
pub struct PythonPayload {
    /// Files in the archive.
    pub zip_members: BTreeSet<PathBuf>,
    /// Files written below the Python library directory.
    pub filesystem: BTreeSet<PathBuf>,
    /// Extension modules copied into the bundle, mapped to their source.
    pub extensions: BTreeMap<PathBuf, PathBuf>,
    /// Dotted names of packages written to the filesystem.
    pub filesystem_packages: Vec<String>,
}

/// Writes the Python code of a bundle.
pub struct PayloadWriter<'a> {
    paths: &'a BundlePaths,
    compiler: &'a mut dyn PythonBytecodeCompiler,
    optimize: BytecodeOptimizationLevel,
    zip: ZipLibraryBuilder,
    payload: PythonPayload,
}

impl<'a> PayloadWriter<'a> {
    pub fn new(
        paths: &'a BundlePaths,
        compiler: &'a mut dyn PythonBytecodeCompiler,
        optimize: BytecodeOptimizationLevel,
    ) -> Self {
        Self {
            paths,
            compiler,
            optimize,
            zip: ZipLibraryBuilder::default(),
            payload: PythonPayload::default(),
        }
    }

    fn compile(&mut self, path: &Path, filename: &str) -> Result<Vec<u8>> {
        let source = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        compile_pyc(self.compiler, &source, filename, self.optimize)
            .with_context(|| format!("compiling {}", path.display()))
    }

    /// Compiled code for a module or package `__init__`.
    fn module_code(&mut self, name: &str, path: &Path, kind: Option<ModuleFileKind>) -> Result<Vec<u8>> {
        match kind {
            Some(ModuleFileKind::Bytecode) => {
                std::fs::read(path).with_context(|| format!("reading {}", path.display()))
            }
            _ => self.compile(path, &format!("{}/{}", name.replace('.', "/"), file_name(path))),
        }
    }

    fn write_fs_file(&mut self, rel: &Path, data: &[u8]) -> Result<()> {
        let dest = self.paths.pylib.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&dest, data).with_context(|| format!("writing {}", dest.display()))?;
        self.payload.filesystem.insert(dest);

        Ok(())
    }

    fn copy_extension(&mut self, source: &Path, dest: PathBuf) -> Result<()> {
        crate::resources::copy_file(source, &dest)?;
        for copied in copy_loader_path_dependencies(source, &dest)? {
            self.payload.filesystem.insert(copied);
        }
        self.payload.extensions.insert(dest, source.to_path_buf());

        Ok(())
    }

    fn add_zip_file(&mut self, path: PathBuf, data: Vec<u8>) -> Result<()> {
        self.zip.add_file_data(&path, data)?;
        self.payload.zip_members.insert(path);
        Ok(())
    }

    fn add_script(&mut self, graph: &Py2appGraph, id: NodeId) -> Result<()> {
        let node = graph.node(id);
        let path = node
            .filename
            .clone()
            .ok_or_else(|| anyhow!("script {} has no file", node.identifier))?;
        let stem = crate::bootstrap::script_stem(&path)?;

        let code = self.compile(&path, &path.display().to_string())?;
        self.add_zip_file(Path::new(SCRIPTS_DIR).join(stem), code)
    }

    fn zip_node(&mut self, graph: &Py2appGraph, id: NodeId) -> Result<()> {
        let node = graph.node(id).clone();

        match node.kind {
            NodeKind::Script => self.add_script(graph, id)?,
            NodeKind::SourceModule | NodeKind::BytecodeModule => {
                let path = node
                    .filename
                    .as_ref()
                    .ok_or_else(|| anyhow!("module {} has no file", node.identifier))?;
                let code = self.module_code(&node.identifier, path, node.file_kind)?;
                self.zip.add_bytecode_module(&node.identifier, false, code)?;
                self.payload.zip_members.insert(resolve_path_for_module(
                    "",
                    &node.identifier,
                    false,
                    ".pyc",
                ));
            }
            NodeKind::Package | NodeKind::NamespacePackage => {
                let pkg_path = PathBuf::from(node.identifier.replace('.', "/"));
                self.zip.add_directory(&pkg_path);

                if let (NodeKind::Package, Some(path)) = (node.kind, &node.filename) {
                    if node.file_kind == Some(ModuleFileKind::Extension) {
                        self.zip_extension(&node.identifier, path, true)?;
                    } else {
                        let code = self.module_code(&node.identifier, path, node.file_kind)?;
                        self.zip.add_bytecode_module(&node.identifier, true, code)?;
                        self.payload.zip_members.insert(pkg_path.join("__init__.pyc"));
                    }
                }

                if !graph.ignore_resources(id) {
                    for (rel, source) in package_data(&node.packagepath)? {
                        let data = std::fs::read(&source)
                            .with_context(|| format!("reading {}", source.display()))?;
                        self.add_zip_file(pkg_path.join(rel), data)?;
                    }
                }
            }
            NodeKind::ExtensionModule => {
                let path = node
                    .filename
                    .as_ref()
                    .ok_or_else(|| anyhow!("extension {} has no file", node.identifier))?;
                self.zip_extension(&node.identifier, path, false)?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Copy an extension of a zipped package to `lib-dynload` and leave a loader behind.
    fn zip_extension(&mut self, name: &str, path: &Path, is_package: bool) -> Result<()> {
        let dest = self.paths.extlib.join(format!("{}.so", name));
        self.copy_extension(path, dest)?;

        let stub = extension_loader_source(name);
        let code = compile_pyc(self.compiler, stub.as_bytes(), name, self.optimize)?;
        self.zip.add_bytecode_module(name, is_package, code)?;
        self.payload
            .zip_members
            .insert(resolve_path_for_module("", name, is_package, ".pyc"));

        Ok(())
    }

    fn fs_node(&mut self, graph: &Py2appGraph, id: NodeId) -> Result<()> {
        let node = graph.node(id).clone();

        match node.kind {
            NodeKind::Script => self.add_script(graph, id)?,
            NodeKind::SourceModule | NodeKind::BytecodeModule => {
                let path = node
                    .filename
                    .as_ref()
                    .ok_or_else(|| anyhow!("module {} has no file", node.identifier))?;
                let code = self.module_code(&node.identifier, path, node.file_kind)?;
                let rel = resolve_path_for_module("", &node.identifier, false, ".pyc");
                self.write_fs_file(&rel, &code)?;
            }
            NodeKind::Package | NodeKind::NamespacePackage => {
                let pkg_path = PathBuf::from(node.identifier.replace('.', "/"));
                let pkg_dir = self.paths.pylib.join(&pkg_path);
                std::fs::create_dir_all(&pkg_dir)
                    .with_context(|| format!("creating {}", pkg_dir.display()))?;
                self.payload.filesystem_packages.push(node.identifier.clone());

                if let (NodeKind::Package, Some(path)) = (node.kind, &node.filename) {
                    if node.file_kind == Some(ModuleFileKind::Extension) {
                        self.copy_extension(path, pkg_dir.join("__init__.so"))?;
                    } else {
                        let code = self.module_code(&node.identifier, path, node.file_kind)?;
                        self.write_fs_file(&pkg_path.join("__init__.pyc"), &code)?;
                    }
                }

                if !graph.ignore_resources(id) {
                    for (rel, source) in package_data(&node.packagepath)? {
                        let dest = pkg_dir.join(&rel);
                        crate::resources::copy_file(&source, &dest)?;
                        self.payload.filesystem.insert(dest);
                    }
                }
            }
            NodeKind::ExtensionModule => {
                let path = node
                    .filename
                    .as_ref()
                    .ok_or_else(|| anyhow!("extension {} has no file", node.identifier))?;

                let dest = if node.identifier.contains('.') {
                    self.paths
                        .pylib
                        .join(format!("{}.so", node.identifier.replace('.', "/")))
                } else {
                    self.paths.extlib.join(format!("{}.so", node.identifier))
                };
                self.copy_extension(path, dest)?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Write the Python code of all reachable nodes of `graph`.
    pub fn write(mut self, graph: &mut Py2appGraph, progress: &mut dyn Progress) -> Result<PythonPayload> {
        let (zip_nodes, unzip_nodes) = graph.collect_nodes();

        for dir in [&self.paths.pylib, &self.paths.extlib] {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }

        let mut distributions = BTreeMap::new();
        for id in zip_nodes.iter().chain(unzip_nodes.iter()) {
            if let Some(dist) = graph.distribution_for_node(*id) {
                distributions
                    .entry(dist.normalized_name())
                    .or_insert_with(|| dist.clone());
            }
        }

        if !distributions.is_empty() {
            let task = progress.add_task("Collect dist-info", Some(distributions.len()));
            for dist in distributions.values() {
                progress.update_task(task, &dist.name);
                for (rel, source) in distribution_files(dist)? {
                    let data = std::fs::read(&source)
                        .with_context(|| format!("reading {}", source.display()))?;
                    self.add_zip_file(rel, data)?;
                }
                progress.step_task(task);
            }
            progress.task_done(task);
        }

        if !zip_nodes.is_empty() {
            let task = progress.add_task("Collect site-packages.zip", Some(zip_nodes.len()));
            for id in &zip_nodes {
                progress.update_task(task, &graph.node(*id).identifier);
                self.zip_node(graph, *id)?;
                progress.step_task(task);
            }
            progress.task_done(task);
        }

        if !unzip_nodes.is_empty() {
            let task = progress.add_task("Collect site-packages directory", Some(unzip_nodes.len()));
            for id in &unzip_nodes {
                progress.update_task(task, &graph.node(*id).identifier);
                self.fs_node(graph, *id)?;
                progress.step_task(task);
            }
            progress.task_done(task);
        }

        self.zip
            .write_to_path(&self.paths.pylib_zipped)
            .with_context(|| format!("writing {}", self.paths.pylib_zipped.display()))?;

        Ok(self.payload)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Write `Resources/site.pyc`.
pub fn write_site(
    paths: &BundlePaths,
    compiler: &mut dyn PythonBytecodeCompiler,
    optimize: BytecodeOptimizationLevel,
    source: &str,
) -> Result<PathBuf> {
    let dest = paths.resources.join("site.pyc");
    let code = compile_pyc(compiler, source.as_bytes(), "site.py", optimize)?;
    std::fs::write(&dest, code).with_context(|| format!("writing {}", dest.display()))?;

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{progress::RecordingProgress, testutil::fake_graph},
        apple_macho::{testutil::MachOBuilder, CpuArch},
        python_packaging::testutil::{write_tree, FakeBytecodeCompiler},
        std::io::Read,
    };

    fn zip_names(path: &Path) -> Result<BTreeSet<String>> {
        let fh = std::fs::File::open(path)?;
        let zf = zip::ZipArchive::new(fh)?;
        Ok(zf.file_names().map(|s| s.to_string()).collect())
    }

    fn zip_data(path: &Path, name: &str) -> Result<Vec<u8>> {
        let fh = std::fs::File::open(path)?;
        let mut zf = zip::ZipArchive::new(fh)?;
        let mut data = vec![];
        zf.by_name(name)?.read_to_end(&mut data)?;
        Ok(data)
    }

    #[test]
    fn data_files() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[
                ("pkg/__init__.py", ""),
                ("pkg/mod.py", ""),
                ("pkg/types.pyi", ""),
                ("pkg/data.dat", "data"),
                ("pkg/templates/index.html", ""),
                ("pkg/templates/nested/deep.txt", ""),
                ("pkg/sub/__init__.py", ""),
                ("pkg/sub/data.txt", ""),
                ("pkg/__pycache__/mod.cpython-312.pyc", ""),
                ("pkg/.svn/entries", ""),
                ("pkg/.DS_Store", ""),
                ("pkg/data.dat.swp", ""),
                ("pkg/templates/.hg/store", ""),
                ("pkg/templates/CVS/Entries", ""),
                ("pkg/templates/index.pbxuser", ""),
            ],
        )?;

        let files = package_data(&[td.path().join("pkg")])?
            .into_iter()
            .map(|(rel, _)| rel)
            .collect::<Vec<_>>();

        assert_eq!(
            files,
            vec![
                PathBuf::from("data.dat"),
                PathBuf::from("templates/index.html"),
                PathBuf::from("templates/nested/deep.txt"),
            ]
        );

        Ok(())
    }

    #[test]
    fn partition_into_zip_and_filesystem() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let src = td.path().join("src");
        write_tree(
            &src,
            &[
                ("main.py", "import package2.sub\nimport unsafe\nimport fastext\nimport zpkg.speedups\n"),
                ("package2/__init__.py", ""),
                ("package2/sub/__init__.py", ""),
                ("package2/sub/data.dat", "payload"),
                ("unsafe/__init__.py", "import unsafe.helper\n"),
                ("unsafe/helper.py", "x = __file__\n"),
                ("unsafe/res.txt", "r"),
                ("fastext.so", "not really"),
                ("zpkg/__init__.py", ""),
                ("zpkg/speedups.so", "not really"),
            ],
        )?;

        let mut graph = fake_graph(&src)?;
        graph.add_script(&src.join("main.py"))?;

        let paths = BundlePaths::new(td.path().join("hello.app"), "3.12");
        let mut compiler = FakeBytecodeCompiler { magic_number: 42 };
        let mut progress = RecordingProgress::default();

        let payload = PayloadWriter::new(&paths, &mut compiler, BytecodeOptimizationLevel::Zero)
            .write(&mut graph, &mut progress)?;

        let names = zip_names(&paths.pylib_zipped)?;
        assert!(names.contains("bundle-scripts/main"));
        assert!(names.contains("package2/"));
        assert!(names.contains("package2/__init__.pyc"));
        assert!(names.contains("package2/sub/__init__.pyc"));
        assert!(names.contains("package2/sub/data.dat"));
        assert!(names.contains("zpkg/speedups.pyc"));
        assert!(!names.iter().any(|n| n.starts_with("unsafe")));
        assert!(!names.iter().any(|n| n.starts_with("fastext")));

        let script = zip_data(&paths.pylib_zipped, "bundle-scripts/main")?;
        assert_eq!(&script[16..19], b"bc0");

        // The whole top-level package moves to the filesystem.
        assert!(paths.pylib.join("unsafe/__init__.pyc").is_file());
        assert!(paths.pylib.join("unsafe/helper.pyc").is_file());
        assert!(paths.pylib.join("unsafe/res.txt").is_file());
        assert_eq!(payload.filesystem_packages, vec!["unsafe".to_string()]);

        assert!(paths.extlib.join("fastext.so").is_file());
        assert!(paths.extlib.join("zpkg.speedups.so").is_file());
        assert_eq!(payload.extensions.len(), 2);

        // Nothing is shipped twice.
        for member in &payload.zip_members {
            assert!(!paths.pylib.join(member).exists(), "{} on disk and in zip", member.display());
        }

        assert!(progress.finished.contains(&"Collect site-packages.zip".to_string()));

        Ok(())
    }

    #[test]
    fn dist_info_members() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[
                ("demo-1.0.dist-info/METADATA", "Metadata-Version: 2.1\nName: demo\nVersion: 1.0\n"),
                ("demo-1.0.dist-info/RECORD", "demo/__init__.py,,\n"),
                ("demo-1.0.dist-info/WHEEL", ""),
                ("demo-1.0.dist-info/INSTALLER", "pip"),
                ("demo-1.0.dist-info/entry_points.txt", ""),
                ("demo-1.0.dist-info/licenses/LICENSE", ""),
            ],
        )?;

        let dist = PythonDistribution::from_path(&td.path().join("demo-1.0.dist-info"))?
            .expect("distribution");
        let files = distribution_files(&dist)?
            .into_iter()
            .map(|(rel, _)| rel)
            .collect::<Vec<_>>();

        assert_eq!(
            files,
            vec![
                PathBuf::from("demo-1.0.dist-info/METADATA"),
                PathBuf::from("demo-1.0.dist-info/entry_points.txt"),
                PathBuf::from("demo-1.0.dist-info/licenses/LICENSE"),
            ]
        );

        Ok(())
    }

    #[test]
    fn loader_path_dependencies() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let src = td.path().join("site-packages/pkg");
        std::fs::create_dir_all(src.join(".dylibs"))?;

        std::fs::write(
            src.join("ext.so"),
            MachOBuilder::new(CpuArch::Arm64)
                .load_dylib("@loader_path/.dylibs/libfoo.dylib")
                .load_dylib("/usr/lib/libSystem.B.dylib")
                .build(),
        )?;
        std::fs::write(
            src.join(".dylibs/libfoo.dylib"),
            MachOBuilder::new(CpuArch::Arm64)
                .dylib_id("@rpath/libfoo.dylib")
                .load_dylib("@loader_path/libbar.dylib")
                .build(),
        )?;
        std::fs::write(
            src.join(".dylibs/libbar.dylib"),
            MachOBuilder::new(CpuArch::Arm64)
                .dylib_id("@rpath/libbar.dylib")
                .build(),
        )?;

        let dest = td.path().join("bundle/pkg/ext.so");
        crate::resources::copy_file(&src.join("ext.so"), &dest)?;
        let copied = copy_loader_path_dependencies(&src.join("ext.so"), &dest)?;

        assert_eq!(copied.len(), 2);
        assert!(td.path().join("bundle/pkg/.dylibs/libfoo.dylib").is_file());
        assert!(td.path().join("bundle/pkg/.dylibs/libbar.dylib").is_file());

        Ok(())
    }

    #[test]
    fn site_module() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let paths = BundlePaths::new(td.path().join("hello.app"), "3.12");
        std::fs::create_dir_all(&paths.resources)?;

        let mut compiler = FakeBytecodeCompiler { magic_number: 42 };
        let dest = write_site(&paths, &mut compiler, BytecodeOptimizationLevel::Two, "import sys\n")?;

        let data = std::fs::read(dest)?;
        assert_eq!(&data[16..], b"bc2import sys\n");

        Ok(())
    }
}
