// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolve details about the build environment.

use {
    crate::config::BuildArch,
    anyhow::{Context, Result},
    log::debug,
    python_packaging::interpreter::PythonInterpreterInfo,
    std::path::{Path, PathBuf},
};

pub const PY2APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether the machine running the build is Apple Silicon.
pub fn host_is_arm64() -> bool {
    std::env::consts::ARCH == "aarch64"
}

/// Defaults that depend on the machine running the build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlatformDefaults {
    pub arch: BuildArch,
    pub deployment_target: String,
}

impl PlatformDefaults {
    pub fn host() -> Self {
        if host_is_arm64() {
            Self {
                arch: BuildArch::Arm64,
                deployment_target: "11.0".to_string(),
            }
        } else {
            Self {
                arch: BuildArch::X86_64,
                deployment_target: "10.9".to_string(),
            }
        }
    }
}

/// Read the `home` key of a `pyvenv.cfg` file.
fn pyvenv_home(path: &Path) -> Result<Option<PathBuf>> {
    let data =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    Ok(data.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if key.trim() == "home" {
            Some(PathBuf::from(value.trim()))
        } else {
            None
        }
    }))
}

/// The prefix of the interpreter installation a (virtual) environment is based on.
///
/// Legacy `virtualenv` environments record it in `sys.real_prefix` or in
/// `lib/pythonX.Y/orig-prefix.txt`. `venv` environments set
/// `sys.base_prefix` and write the directory holding the base interpreter
/// into `pyvenv.cfg`.
pub fn runtime_prefix(info: &PythonInterpreterInfo) -> Result<PathBuf> {
    if let Some(real_prefix) = &info.real_prefix {
        return Ok(real_prefix.clone());
    }

    let orig_prefix = info
        .prefix
        .join("lib")
        .join(info.lib_dir_name())
        .join("orig-prefix.txt");
    if orig_prefix.is_file() {
        let value = std::fs::read_to_string(&orig_prefix)
            .with_context(|| format!("reading {}", orig_prefix.display()))?;
        debug!("using prefix from {}", orig_prefix.display());
        return Ok(PathBuf::from(value.trim()));
    }

    let pyvenv_cfg = info.prefix.join("pyvenv.cfg");
    if pyvenv_cfg.is_file() {
        if info.base_prefix != info.prefix {
            return Ok(info.base_prefix.clone());
        }

        // `home` is the directory containing the base interpreter executable.
        if let Some(home) = pyvenv_home(&pyvenv_cfg)? {
            if let Some(parent) = home.parent() {
                return Ok(parent.to_path_buf());
            }
        }
    }

    Ok(info.prefix.clone())
}

/// Location of the shared Python library of an installation.
///
/// Returns `None` for statically linked interpreters.
pub fn libpython_path(info: &PythonInterpreterInfo, prefix: &Path) -> Option<PathBuf> {
    if info.is_framework() {
        let framework = info.config_var("PYTHONFRAMEWORK").unwrap_or("Python");
        Some(prefix.join(framework))
    } else if info.is_shared() {
        let libdir = info
            .config_var("LIBDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| prefix.join("lib"));
        let name = info
            .config_var("LDLIBRARY")
            .map(|s| s.to_string())
            .unwrap_or_else(|| info.libpython_name());
        Some(libdir.join(name))
    } else {
        None
    }
}

/// Candidate locations of libpython for `PyRuntimeLocations`.
///
/// The in-bundle copy always comes first. Builds that don't embed the
/// library also list the location in the installation they were made with.
pub fn runtime_locations(info: &PythonInterpreterInfo, prefix: &Path, embedded: bool) -> Vec<String> {
    let mut res = vec![format!(
        "@executable_path/../Frameworks/{}",
        info.libpython_name()
    )];

    if !embedded {
        if let Some(path) = libpython_path(info, prefix) {
            res.push(path.display().to_string());
        }
    }

    res
}
