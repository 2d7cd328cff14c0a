// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixtures shared by the unit tests of this crate.

use {
    crate::graph::Py2appGraph,
    anyhow::Result,
    python_packaging::{
        finder::ModuleFinder,
        graph::ModuleGraph,
        interpreter::{PythonInterpreterInfo, PythonVersion},
        testutil::FakeImportScanner,
    },
    std::{
        collections::{BTreeMap, BTreeSet},
        path::Path,
    },
};

/// A framework build of Python 3.12 rooted at `root`.
///
/// The standard library lives in `root/lib/python3.12` and third party
/// packages in `root/site-packages`. Neither directory is created.
pub fn sample_interpreter(root: &Path) -> PythonInterpreterInfo {
    let stdlib = root.join("lib").join("python3.12");
    let site_packages = root.join("site-packages");

    let config_vars = [
        ("PYTHONFRAMEWORK", "Python"),
        ("Py_ENABLE_SHARED", "0"),
        ("VERSION", "3.12"),
        ("LDLIBRARY", "Python.framework/Versions/3.12/Python"),
        ("CFLAGS", "-fno-strict-overflow -g -O3 -Wall"),
        ("LDFLAGS", "-g"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect::<BTreeMap<_, _>>();

    PythonInterpreterInfo {
        executable: root.join("bin").join("python3.12"),
        version: PythonVersion {
            major: 3,
            minor: 12,
            micro: 1,
            releaselevel: "final".to_string(),
        },
        long_version: "3.12.1 (main, Dec 8 2023) [Clang 15.0.0]".to_string(),
        abiflags: String::new(),
        cache_tag: Some("cpython-312".to_string()),
        prefix: root.to_path_buf(),
        base_prefix: root.to_path_buf(),
        exec_prefix: root.to_path_buf(),
        base_exec_prefix: root.to_path_buf(),
        real_prefix: None,
        sys_path: vec![stdlib.clone(), site_packages.clone()],
        builtin_module_names: ["_imp", "builtins", "marshal", "posix", "sys"]
            .into_iter()
            .map(|s| s.to_string())
            .collect::<BTreeSet<_>>(),
        frozen_module_names: ["_frozen_importlib", "_frozen_importlib_external"]
            .into_iter()
            .map(|s| s.to_string())
            .collect::<BTreeSet<_>>(),
        extension_suffixes: vec![
            ".cpython-312-darwin.so".to_string(),
            ".abi3.so".to_string(),
            ".so".to_string(),
        ],
        source_suffixes: vec![".py".to_string()],
        bytecode_suffixes: vec![".pyc".to_string()],
        platstdlib_dir: stdlib.clone(),
        stdlib_dir: stdlib,
        purelib: site_packages.clone(),
        platlib: site_packages,
        include_dir: root.join("include").join("python3.12"),
        platform: "macosx-11.0-arm64".to_string(),
        config_vars,
        ssl_paths: None,
        tcl_library: None,
        tk_library: None,
    }
}

/// A graph searching `root` that scans sources with [FakeImportScanner].
pub fn fake_graph(root: &Path) -> Result<Py2appGraph> {
    let mut finder = ModuleFinder::new(vec![root.to_path_buf()]);
    finder.set_builtin_names(vec!["sys".to_string(), "posix".to_string()]);

    Ok(Py2appGraph::new(ModuleGraph::new(
        finder,
        Box::new(FakeImportScanner::default()),
    )?))
}
