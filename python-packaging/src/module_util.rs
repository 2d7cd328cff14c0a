// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Utility functions related to Python modules. */

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

/// Resolve the set of packages present in a fully qualified module name.
pub fn packages_from_module_name(module: &str) -> BTreeSet<String> {
    let mut package_names = BTreeSet::new();

    let mut search: &str = module;

    while let Some(idx) = search.rfind('.') {
        package_names.insert(search[0..idx].to_string());
        search = &search[0..idx];
    }

    package_names
}

/// Resolve the set of packages present in a series of fully qualified module names.
pub fn packages_from_module_names<I>(names: I) -> BTreeSet<String>
where
    I: Iterator<Item = String>,
{
    let mut package_names = BTreeSet::new();

    for name in names {
        package_names.extend(packages_from_module_name(&name));
    }

    package_names
}

/// The name of the package containing `module`, if any.
pub fn parent_module_name(module: &str) -> Option<&str> {
    module.rfind('.').map(|idx| &module[0..idx])
}

/// The first component of a dotted module name.
pub fn top_level_name(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

/// Resolve a relative import to an absolute module name.
///
/// `importer` is the module containing the import statement and
/// `importer_is_package` says whether it is a package `__init__`. `level`
/// is the number of leading dots. Returns `None` when the import reaches
/// beyond the top-level package.
pub fn resolve_relative_import(
    importer: &str,
    importer_is_package: bool,
    level: usize,
    name: &str,
) -> Option<String> {
    if level == 0 {
        return Some(name.to_string());
    }

    let mut base = if importer_is_package {
        importer
    } else {
        parent_module_name(importer)?
    };

    for _ in 1..level {
        base = parent_module_name(base)?;
    }

    if name.is_empty() {
        Some(base.to_string())
    } else {
        Some(format!("{}.{}", base, name))
    }
}

/// Resolve the path of a module relative to a root directory.
///
/// Packages resolve to `<name>/__init__<suffix>`.
pub fn resolve_path_for_module(
    root: impl AsRef<Path>,
    name: &str,
    is_package: bool,
    suffix: &str,
) -> PathBuf {
    let mut path = root.as_ref().to_path_buf();

    let mut parts = name.split('.').collect::<Vec<_>>();
    let leaf = if is_package {
        "__init__"
    } else {
        parts.pop().unwrap_or(name)
    };

    for part in parts {
        path.push(part);
    }

    path.push(format!("{}{}", leaf, suffix));

    path
}

#[cfg(test)]
mod tests {
    use {super::*, std::iter::FromIterator};

    #[test]
    fn test_packages_from_module_name() {
        assert_eq!(
            packages_from_module_name("foo.bar"),
            BTreeSet::from_iter(vec!["foo".to_string()])
        );
        assert_eq!(
            packages_from_module_name("foo.bar.baz"),
            BTreeSet::from_iter(vec!["foo".to_string(), "foo.bar".to_string()])
        );
    }

    #[test]
    fn test_relative_imports() {
        assert_eq!(
            resolve_relative_import("pkg.mod", false, 1, "sibling"),
            Some("pkg.sibling".to_string())
        );
        assert_eq!(
            resolve_relative_import("pkg", true, 1, "sub"),
            Some("pkg.sub".to_string())
        );
        assert_eq!(
            resolve_relative_import("pkg.sub.mod", false, 2, ""),
            Some("pkg".to_string())
        );
        assert_eq!(resolve_relative_import("toplevel", false, 1, "x"), None);
        assert_eq!(
            resolve_relative_import("anything", false, 0, "os.path"),
            Some("os.path".to_string())
        );
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(
            resolve_path_for_module("lib", "foo.bar", false, ".pyc"),
            PathBuf::from("lib/foo/bar.pyc")
        );
        assert_eq!(
            resolve_path_for_module("", "foo", true, ".pyc"),
            PathBuf::from("foo/__init__.pyc")
        );
        assert_eq!(top_level_name("a.b.c"), "a");
        assert_eq!(parent_module_name("a.b.c"), Some("a.b"));
        assert_eq!(parent_module_name("a"), None);
    }
}
