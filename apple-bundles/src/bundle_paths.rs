// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Well-known locations inside a bundle that embeds Python.

use std::path::{Path, PathBuf};

/// Paths inside a `.app` or `.plugin` bundle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BundlePaths {
    /// The `Contents` directory.
    pub root: PathBuf,
    /// `Contents/MacOS`, holding the launchers.
    pub main: PathBuf,
    pub resources: PathBuf,
    /// `Resources/lib/pythonX.Y`.
    pub pylib: PathBuf,
    /// The zip archive with pure Python code.
    pub pylib_zipped: PathBuf,
    /// Extension modules.
    pub extlib: PathBuf,
    pub framework: PathBuf,
    /// Helper executables.
    pub bin: PathBuf,
}

impl BundlePaths {
    /// Compute paths for the bundle at `bundle_root` embedding Python `python_version` (`X.Y`).
    pub fn new(bundle_root: impl AsRef<Path>, python_version: &str) -> Self {
        let root = bundle_root.as_ref().join("Contents");
        let resources = root.join("Resources");
        let pylib = resources
            .join("lib")
            .join(format!("python{}", python_version));

        Self {
            main: root.join("MacOS"),
            pylib_zipped: pylib.join("site-packages.zip"),
            extlib: pylib.join("lib-dynload"),
            framework: root.join("Frameworks"),
            bin: resources.join("bin"),
            pylib,
            resources,
            root,
        }
    }

    /// The bundle directory itself (the parent of `Contents`).
    pub fn bundle_root(&self) -> &Path {
        self.root.parent().unwrap_or(&self.root)
    }

    /// All directories that must exist before files are staged.
    pub fn all_directories(&self) -> Vec<&Path> {
        vec![
            &self.root,
            &self.main,
            &self.resources,
            &self.pylib,
            &self.extlib,
            &self.framework,
            &self.bin,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let paths = BundlePaths::new("/dist/hello.app", "3.12");

        assert_eq!(paths.root, PathBuf::from("/dist/hello.app/Contents"));
        assert_eq!(paths.main, PathBuf::from("/dist/hello.app/Contents/MacOS"));
        assert_eq!(
            paths.pylib_zipped,
            PathBuf::from("/dist/hello.app/Contents/Resources/lib/python3.12/site-packages.zip")
        );
        assert_eq!(
            paths.extlib,
            PathBuf::from("/dist/hello.app/Contents/Resources/lib/python3.12/lib-dynload")
        );
        assert_eq!(paths.bundle_root(), Path::new("/dist/hello.app"));
        assert_eq!(paths.all_directories().len(), 7);
    }
}
