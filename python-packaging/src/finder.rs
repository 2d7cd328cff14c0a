// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Locating Python modules on a search path.

The lookup rules mirror those of the interpreter's path based finder: in
every directory a package directory with an `__init__` file wins, then
extension modules, then source, then bytecode. Directories without an
`__init__` file are remembered as namespace package portions and only
used when no regular module of that name exists anywhere on the path.
*/

use {
    crate::interpreter::PythonInterpreterInfo,
    std::{
        collections::{BTreeMap, BTreeSet},
        path::{Path, PathBuf},
    },
};

/// The kind of file implementing a module.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModuleFileKind {
    Source,
    Bytecode,
    Extension,
}

/// Where a module was found.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModuleLocation {
    /// Compiled into the interpreter.
    Builtin,
    /// Frozen into the interpreter, without a file on the search path.
    Frozen,
    /// A plain module backed by a single file.
    File { path: PathBuf, kind: ModuleFileKind },
    /// A regular package with an `__init__` file.
    Package {
        init: PathBuf,
        kind: ModuleFileKind,
        search_path: Vec<PathBuf>,
    },
    /// A PEP 420 namespace package made of one or more directories.
    NamespacePackage { search_path: Vec<PathBuf> },
}

/// Locates modules by name.
#[derive(Clone, Debug)]
pub struct ModuleFinder {
    search_path: Vec<PathBuf>,
    builtin_names: BTreeSet<String>,
    frozen_names: BTreeSet<String>,
    extension_suffixes: Vec<String>,
    source_suffixes: Vec<String>,
    bytecode_suffixes: Vec<String>,
    aliases: BTreeMap<String, String>,
}

impl ModuleFinder {
    /// Construct a finder over `search_path` with CPython's default suffixes.
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        let mut aliases = BTreeMap::new();
        // os.path is set in sys.modules by os itself.
        aliases.insert("os.path".to_string(), "posixpath".to_string());

        Self {
            search_path,
            builtin_names: BTreeSet::new(),
            frozen_names: BTreeSet::new(),
            extension_suffixes: vec![".abi3.so".to_string(), ".so".to_string()],
            source_suffixes: vec![".py".to_string()],
            bytecode_suffixes: vec![".pyc".to_string()],
            aliases,
        }
    }

    /// Construct a finder matching the import system of an interpreter.
    pub fn from_interpreter(info: &PythonInterpreterInfo) -> Self {
        let mut finder = Self::new(info.search_path());
        finder.builtin_names = info.builtin_module_names.clone();
        finder.frozen_names = info.frozen_module_names.clone();
        finder.extension_suffixes = info.extension_suffixes.clone();
        finder.source_suffixes = info.source_suffixes.clone();
        finder.bytecode_suffixes = info.bytecode_suffixes.clone();

        finder
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Add a directory to the front of the search path.
    pub fn prepend_search_path(&mut self, path: PathBuf) {
        if !self.search_path.contains(&path) {
            self.search_path.insert(0, path);
        }
    }

    pub fn set_builtin_names(&mut self, names: impl IntoIterator<Item = String>) {
        self.builtin_names = names.into_iter().collect();
    }

    pub fn set_frozen_names(&mut self, names: impl IntoIterator<Item = String>) {
        self.frozen_names = names.into_iter().collect();
    }

    pub fn set_extension_suffixes(&mut self, suffixes: Vec<String>) {
        self.extension_suffixes = suffixes;
    }

    /// Register `name` as an alias of `target`.
    pub fn add_alias(&mut self, name: impl ToString, target: impl ToString) {
        self.aliases.insert(name.to_string(), target.to_string());
    }

    /// The module `name` is an alias of, if any.
    pub fn alias_target(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(|s| s.as_str())
    }

    /// All suffixes that can implement a module, in lookup order.
    fn suffixes(&self) -> impl Iterator<Item = (&str, ModuleFileKind)> {
        self.extension_suffixes
            .iter()
            .map(|s| (s.as_str(), ModuleFileKind::Extension))
            .chain(
                self.source_suffixes
                    .iter()
                    .map(|s| (s.as_str(), ModuleFileKind::Source)),
            )
            .chain(
                self.bytecode_suffixes
                    .iter()
                    .map(|s| (s.as_str(), ModuleFileKind::Bytecode)),
            )
    }

    /// Find a top-level module.
    pub fn find_toplevel(&self, name: &str) -> Option<ModuleLocation> {
        if self.builtin_names.contains(name) {
            return Some(ModuleLocation::Builtin);
        }

        if let Some(location) = self.find_in(name, &self.search_path) {
            return Some(location);
        }

        if self.frozen_names.contains(name) {
            return Some(ModuleLocation::Frozen);
        }

        None
    }

    /// Find a module named `leaf` in a list of directories.
    ///
    /// This is used both for top-level modules (with the search path) and for
    /// submodules (with the package's `__path__`).
    pub fn find_in(&self, leaf: &str, dirs: &[PathBuf]) -> Option<ModuleLocation> {
        let mut namespace_portions = vec![];

        for dir in dirs {
            let pkg_dir = dir.join(leaf);

            if pkg_dir.is_dir() {
                for (suffix, kind) in self.suffixes() {
                    let init = pkg_dir.join(format!("__init__{}", suffix));
                    if init.is_file() {
                        return Some(ModuleLocation::Package {
                            init,
                            kind,
                            search_path: vec![pkg_dir],
                        });
                    }
                }

                namespace_portions.push(pkg_dir);
            }

            for (suffix, kind) in self.suffixes() {
                let path = dir.join(format!("{}{}", leaf, suffix));
                if path.is_file() {
                    return Some(ModuleLocation::File { path, kind });
                }
            }
        }

        if namespace_portions.is_empty() {
            None
        } else {
            Some(ModuleLocation::NamespacePackage {
                search_path: namespace_portions,
            })
        }
    }

    /// The module name implemented by a file name, if it has a module suffix.
    pub fn module_name_for_file(&self, file_name: &str) -> Option<(String, ModuleFileKind)> {
        for (suffix, kind) in self.suffixes() {
            if let Some(stem) = file_name.strip_suffix(suffix) {
                if is_identifier(stem) {
                    return Some((stem.to_string(), kind));
                }
            }
        }

        None
    }

    /// Names of all modules and subpackages directly inside a package's directories.
    pub fn iter_submodules(&self, dirs: &[PathBuf]) -> BTreeSet<String> {
        let mut names = BTreeSet::new();

        for dir in dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                let file_name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n.to_string(),
                    None => continue,
                };

                if path.is_dir() {
                    if is_identifier(&file_name) && self.contains_python_files(&path) {
                        names.insert(file_name);
                    }
                } else if let Some((name, _)) = self.module_name_for_file(&file_name) {
                    if name != "__init__" {
                        names.insert(name);
                    }
                }
            }
        }

        names
    }

    fn contains_python_files(&self, dir: &Path) -> bool {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).any(|e| {
                e.path().is_file()
                    && e.file_name()
                        .to_str()
                        .map(|n| self.module_name_for_file(n).is_some())
                        .unwrap_or(false)
            }),
            Err(_) => false,
        }
    }
}

/// Whether `s` is a valid (ASCII) Python identifier.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();

    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }

    chars.all(|c| c == '_' || c.is_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"")
    }

    #[test]
    fn lookup_order() -> std::io::Result<()> {
        let td = tempfile::TempDir::new()?;
        let first = td.path().join("first");
        let second = td.path().join("second");

        touch(&first.join("mod.py"))?;
        touch(&first.join("mod.so"))?;
        touch(&second.join("pkg/__init__.py"))?;
        touch(&first.join("pkg.py"))?;
        touch(&first.join("ns/part1.py"))?;
        touch(&second.join("ns/part2.py"))?;

        let mut finder = ModuleFinder::new(vec![first.clone(), second.clone()]);
        finder.set_builtin_names(vec!["sys".to_string()]);
        finder.set_frozen_names(vec!["_frozen_importlib".to_string()]);

        assert_eq!(
            finder.find_toplevel("mod"),
            Some(ModuleLocation::File {
                path: first.join("mod.so"),
                kind: ModuleFileKind::Extension
            })
        );
        // A plain module earlier on the path beats a package later on.
        assert_eq!(
            finder.find_toplevel("pkg"),
            Some(ModuleLocation::File {
                path: first.join("pkg.py"),
                kind: ModuleFileKind::Source
            })
        );
        assert_eq!(
            finder.find_toplevel("ns"),
            Some(ModuleLocation::NamespacePackage {
                search_path: vec![first.join("ns"), second.join("ns")]
            })
        );
        assert_eq!(finder.find_toplevel("sys"), Some(ModuleLocation::Builtin));
        assert_eq!(
            finder.find_toplevel("_frozen_importlib"),
            Some(ModuleLocation::Frozen)
        );
        assert_eq!(finder.find_toplevel("missing"), None);
        assert_eq!(finder.alias_target("os.path"), Some("posixpath"));

        Ok(())
    }

    #[test]
    fn submodule_listing() -> std::io::Result<()> {
        let td = tempfile::TempDir::new()?;
        let pkg = td.path().join("pkg");

        touch(&pkg.join("__init__.py"))?;
        touch(&pkg.join("a.py"))?;
        touch(&pkg.join("b.abi3.so"))?;
        touch(&pkg.join("sub/__init__.py"))?;
        touch(&pkg.join("data/readme.txt"))?;
        touch(&pkg.join("not-valid.py"))?;
        touch(&pkg.join("__pycache__/a.cpython-312.pyc"))?;

        let finder = ModuleFinder::new(vec![td.path().to_path_buf()]);
        let names = finder.iter_submodules(&[pkg]);

        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["a".to_string(), "b".to_string(), "sub".to_string()]
        );

        Ok(())
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("foo_bar1"));
        assert!(is_identifier("_private"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("with-dash"));
        assert!(!is_identifier(""));
    }
}
