// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Functionality related to inspecting Python interpreters.

Everything the graph and the bundle builder need to know about the target
interpreter is collected by a single run of an embedded introspection
script. The result is a plain data structure that can also be constructed
by hand, which is what the tests do.
*/

use {
    anyhow::{anyhow, Context, Result},
    serde::Deserialize,
    std::{
        collections::{BTreeMap, BTreeSet},
        path::{Path, PathBuf},
    },
};

const INTERPRETER_INFO: &str = include_str!("interpreter_info.py");

/// Version of a Python interpreter.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct PythonVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub releaselevel: String,
}

impl PythonVersion {
    /// The `X.Y` form of the version.
    pub fn short(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// The `X.Y.Z` form of the version.
    pub fn long(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// Default locations of the OpenSSL trust store, as reported by the `ssl` module.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct SslVerifyPaths {
    pub cafile: Option<PathBuf>,
    pub capath: Option<PathBuf>,
    pub openssl_cafile: Option<PathBuf>,
    pub openssl_capath: Option<PathBuf>,
}

/// Describes a Python interpreter.
#[derive(Clone, Debug, Deserialize)]
pub struct PythonInterpreterInfo {
    /// Value of `sys.executable`.
    pub executable: PathBuf,
    pub version: PythonVersion,
    /// Value of `sys.version`.
    pub long_version: String,
    pub abiflags: String,
    pub cache_tag: Option<String>,
    pub prefix: PathBuf,
    pub base_prefix: PathBuf,
    pub exec_prefix: PathBuf,
    pub base_exec_prefix: PathBuf,
    /// Set by legacy `virtualenv` environments.
    pub real_prefix: Option<PathBuf>,
    pub sys_path: Vec<PathBuf>,
    pub builtin_module_names: BTreeSet<String>,
    pub frozen_module_names: BTreeSet<String>,
    pub extension_suffixes: Vec<String>,
    pub source_suffixes: Vec<String>,
    pub bytecode_suffixes: Vec<String>,
    pub stdlib_dir: PathBuf,
    pub platstdlib_dir: PathBuf,
    pub purelib: PathBuf,
    pub platlib: PathBuf,
    pub include_dir: PathBuf,
    /// Value of `sysconfig.get_platform()`.
    pub platform: String,
    /// A subset of `sysconfig.get_config_vars()`, stringified.
    pub config_vars: BTreeMap<String, String>,
    pub ssl_paths: Option<SslVerifyPaths>,
    pub tcl_library: Option<PathBuf>,
    pub tk_library: Option<PathBuf>,
}

impl PythonInterpreterInfo {
    /// Construct an instance from the JSON emitted by the introspection script.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("parsing interpreter description")
    }

    /// Introspect the interpreter at `python`.
    pub fn introspect(python: &Path) -> Result<Self> {
        let output = duct::cmd(python, vec!["-E", "-s", "-c", INTERPRETER_INFO])
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .with_context(|| format!("running {}", python.display()))?;

        if !output.status.success() {
            return Err(anyhow!(
                "introspecting {} failed: {}",
                python.display(),
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let mut info = Self::from_json(&output.stdout)?;
        // sys.executable is empty when the interpreter cannot locate itself.
        if info.executable.as_os_str().is_empty() {
            info.executable = python.to_path_buf();
        }

        Ok(info)
    }

    /// Obtain a config var.
    pub fn config_var(&self, key: &str) -> Option<&str> {
        self.config_vars.get(key).map(|s| s.as_str())
    }

    /// Whether this is a framework build of Python.
    pub fn is_framework(&self) -> bool {
        matches!(self.config_var("PYTHONFRAMEWORK"), Some(v) if !v.is_empty())
    }

    /// Whether the interpreter runs inside a venv or virtualenv.
    pub fn is_virtual_environment(&self) -> bool {
        self.real_prefix.is_some() || self.prefix != self.base_prefix
    }

    /// Whether libpython is a shared library.
    pub fn is_shared(&self) -> bool {
        self.is_framework() || self.config_var("Py_ENABLE_SHARED") == Some("1")
    }

    /// File name of the shared Python library, as it is installed into a bundle.
    pub fn libpython_name(&self) -> String {
        format!(
            "libpython{}{}.dylib",
            self.version.short(),
            self.abiflags
        )
    }

    /// Name of the directory holding the standard library, `pythonX.Y`.
    pub fn lib_dir_name(&self) -> String {
        format!("python{}", self.version.short())
    }

    /// Whether a module name is compiled into the interpreter.
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin_module_names.contains(name)
    }

    /// Whether `path` is inside the standard library.
    pub fn is_stdlib_path(&self, path: &Path) -> bool {
        path.starts_with(&self.stdlib_dir) || path.starts_with(&self.platstdlib_dir)
    }

    /// The `sys.path` entries that are directories and thus searchable.
    pub fn search_path(&self) -> Vec<PathBuf> {
        self.sys_path
            .iter()
            .filter(|p| p.is_dir())
            .cloned()
            .collect::<Vec<_>>()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_json() -> String {
        serde_json::json!({
            "executable": "/usr/local/bin/python3.12",
            "version": {"major": 3, "minor": 12, "micro": 1, "releaselevel": "final"},
            "long_version": "3.12.1 (main, Dec 8 2023) [Clang 15.0.0]",
            "abiflags": "",
            "cache_tag": "cpython-312",
            "prefix": "/Library/Frameworks/Python.framework/Versions/3.12",
            "base_prefix": "/Library/Frameworks/Python.framework/Versions/3.12",
            "exec_prefix": "/Library/Frameworks/Python.framework/Versions/3.12",
            "base_exec_prefix": "/Library/Frameworks/Python.framework/Versions/3.12",
            "real_prefix": null,
            "sys_path": ["/Library/Frameworks/Python.framework/Versions/3.12/lib/python3.12"],
            "builtin_module_names": ["_imp", "sys", "builtins", "posix"],
            "frozen_module_names": ["_frozen_importlib", "__hello__"],
            "extension_suffixes": [".cpython-312-darwin.so", ".abi3.so", ".so"],
            "source_suffixes": [".py"],
            "bytecode_suffixes": [".pyc"],
            "stdlib_dir": "/Library/Frameworks/Python.framework/Versions/3.12/lib/python3.12",
            "platstdlib_dir": "/Library/Frameworks/Python.framework/Versions/3.12/lib/python3.12",
            "purelib": "/Library/Frameworks/Python.framework/Versions/3.12/lib/python3.12/site-packages",
            "platlib": "/Library/Frameworks/Python.framework/Versions/3.12/lib/python3.12/site-packages",
            "include_dir": "/Library/Frameworks/Python.framework/Versions/3.12/include/python3.12",
            "platform": "macosx-10.9-universal2",
            "config_vars": {
                "PYTHONFRAMEWORK": "Python",
                "LDLIBRARY": "Python.framework/Versions/3.12/Python",
                "Py_ENABLE_SHARED": "0",
                "VERSION": "3.12"
            },
            "ssl_paths": {
                "cafile": null,
                "capath": null,
                "openssl_cafile": "/Library/Frameworks/Python.framework/Versions/3.12/etc/openssl/cert.pem",
                "openssl_capath": null
            },
            "tcl_library": null,
            "tk_library": null
        })
        .to_string()
    }

    #[test]
    fn parse_description() -> Result<()> {
        let info = PythonInterpreterInfo::from_json(sample_json().as_bytes())?;

        assert_eq!(info.version.short(), "3.12");
        assert_eq!(info.version.long(), "3.12.1");
        assert!(info.is_framework());
        assert!(info.is_shared());
        assert!(!info.is_virtual_environment());
        assert_eq!(info.libpython_name(), "libpython3.12.dylib");
        assert_eq!(info.lib_dir_name(), "python3.12");
        assert!(info.is_builtin("sys"));
        assert!(!info.is_builtin("os"));
        assert!(info.is_stdlib_path(Path::new(
            "/Library/Frameworks/Python.framework/Versions/3.12/lib/python3.12/os.py"
        )));
        assert_eq!(
            info.ssl_paths.and_then(|p| p.openssl_cafile),
            Some(PathBuf::from(
                "/Library/Frameworks/Python.framework/Versions/3.12/etc/openssl/cert.pem"
            ))
        );

        Ok(())
    }

    #[test]
    fn virtual_environment_detection() -> Result<()> {
        let mut info = PythonInterpreterInfo::from_json(sample_json().as_bytes())?;
        info.prefix = PathBuf::from("/Users/dev/venv");
        assert!(info.is_virtual_environment());

        Ok(())
    }

    #[test]
    fn reject_garbage() {
        assert!(PythonInterpreterInfo::from_json(b"not json").is_err());
    }
}
