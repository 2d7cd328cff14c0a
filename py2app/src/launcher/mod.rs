// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Launcher executables.

Every bundle contains small native programs in `Contents/MacOS` that start
the embedded interpreter. A launcher is identified by architecture,
deployment target and [LauncherVariant]. Prebuilt launchers are looked up in
a set of directories; missing ones are compiled from `launcher.c` with the
system C compiler and cached.

Launchers link against libpython, so both the prebuilt and cache
directories are scoped by Python version.
*/

use {
    crate::{config::BuildArch, error::Py2appError, tools},
    anyhow::{Context, Result},
    log::{debug, info},
    python_packaging::interpreter::PythonInterpreterInfo,
    std::{
        ffi::OsString,
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
    },
};

const LAUNCHER_SOURCE: &str = include_str!("launcher.c");

/// Flavor of launcher.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LauncherVariant {
    /// Main executable of an application.
    Primary,
    /// Executable for an extra script.
    Secondary,
    /// The `Contents/MacOS/python` helper.
    Python,
    /// Entry point of a loadable bundle.
    Plugin,
}

impl LauncherVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Python => "python",
            Self::Plugin => "plugin",
        }
    }

    fn define(&self) -> &'static str {
        match self {
            Self::Primary => "-DPY2APP_VARIANT=1",
            Self::Secondary => "-DPY2APP_VARIANT=2",
            Self::Python => "-DPY2APP_VARIANT=3",
            Self::Plugin => "-DPY2APP_VARIANT=4",
        }
    }
}

/// The lookup key of a launcher.
pub fn launcher_key(arch: BuildArch, deployment_target: &str, variant: LauncherVariant) -> String {
    format!(
        "launcher-{}-{}-{}",
        arch.as_str(),
        deployment_target,
        variant.as_str()
    )
}

/// Compiler flags from the interpreter's `CFLAGS` that are safe to reuse.
///
/// Debug info, architecture and deployment target flags are dropped because
/// the launcher sets its own.
fn filtered_cflags(cflags: &str) -> Vec<String> {
    let mut res = vec![];
    let mut words = cflags.split_whitespace();

    while let Some(word) = words.next() {
        if word == "-arch" {
            words.next();
        } else if word == "-g" || word.starts_with("-mmacosx-version-min=") {
            continue;
        } else {
            res.push(word.to_string());
        }
    }

    res
}

/// Locates and builds launchers for one Python installation.
#[derive(Clone, Debug)]
pub struct LauncherCache {
    python_tag: String,
    prebuilt_dirs: Vec<PathBuf>,
    cache_dir: PathBuf,
    include_dir: PathBuf,
    cflags: Vec<String>,
    libpython: Option<PathBuf>,
}

impl LauncherCache {
    /// Create a cache writing compiled launchers below `cache_dir`.
    ///
    /// `libpython` is the library launchers link against.
    pub fn new(info: &PythonInterpreterInfo, libpython: Option<PathBuf>, cache_dir: &Path) -> Self {
        let python_tag = info.lib_dir_name();

        Self {
            cache_dir: cache_dir.join(&python_tag),
            python_tag,
            prebuilt_dirs: vec![],
            include_dir: info.include_dir.clone(),
            cflags: filtered_cflags(info.config_var("CFLAGS").unwrap_or_default()),
            libpython,
        }
    }

    /// Add a directory holding prebuilt launchers, grouped per Python version.
    pub fn add_prebuilt_dir(&mut self, path: impl Into<PathBuf>) {
        self.prebuilt_dirs.push(path.into());
    }

    /// Directories searched for launchers, in order.
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        self.prebuilt_dirs
            .iter()
            .map(|d| d.join(&self.python_tag))
            .chain(std::iter::once(self.cache_dir.clone()))
            .collect()
    }

    /// Find an existing launcher.
    pub fn find(&self, key: &str) -> Option<PathBuf> {
        self.search_dirs()
            .into_iter()
            .map(|d| d.join(key))
            .find(|p| p.is_file())
    }

    /// Arguments to the C compiler for building a launcher.
    pub fn compile_args(
        &self,
        arch: BuildArch,
        deployment_target: &str,
        variant: LauncherVariant,
        source: &Path,
        output: &Path,
    ) -> Result<Vec<OsString>> {
        let mut args: Vec<OsString> = vec![];

        for name in arch.arch_names() {
            args.push("-arch".into());
            args.push(name.into());
        }
        args.push(format!("-mmacosx-version-min={}", deployment_target).into());
        args.push(variant.define().into());
        args.extend(self.cflags.iter().map(OsString::from));
        args.push(format!("-I{}", self.include_dir.display()).into());
        args.push("-Wl,-headerpad_max_install_names".into());

        if variant == LauncherVariant::Plugin {
            args.push("-bundle".into());
        }

        args.push("-o".into());
        args.push(output.as_os_str().to_os_string());
        args.push(source.as_os_str().to_os_string());

        let libpython = self.libpython.as_ref().ok_or_else(|| {
            Py2appError::configuration(
                "the Python installation has no shared library to link launchers against",
            )
        })?;
        args.push(libpython.as_os_str().to_os_string());
        args.push("-framework".into());
        args.push("CoreFoundation".into());

        let rpaths: &[&str] = if variant == LauncherVariant::Plugin {
            &["@loader_path/../Frameworks"]
        } else {
            &[
                "@executable_path/../../Frameworks",
                "@executable_path/../Frameworks",
            ]
        };
        for rpath in rpaths {
            args.push(format!("-Wl,-rpath,{}", rpath).into());
        }

        Ok(args)
    }

    /// Compile a launcher into the cache directory.
    pub fn compile(&self, arch: BuildArch, deployment_target: &str, variant: LauncherVariant) -> Result<PathBuf> {
        let key = launcher_key(arch, deployment_target, variant);
        info!("compiling launcher {}", key);

        std::fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("creating {}", self.cache_dir.display()))?;

        let build_dir = tempfile::Builder::new()
            .prefix("py2app-launcher-")
            .tempdir()
            .context("creating temporary directory")?;
        let source = build_dir.path().join("launcher.c");
        std::fs::write(&source, LAUNCHER_SOURCE)?;

        // Compile next to the final location so a failed build never leaves
        // a partial launcher under its key.
        let staged = build_dir.path().join(&key);
        let args = self.compile_args(arch, deployment_target, variant, &source, &staged)?;
        tools::run_tool("cc", args)?;

        let dest = self.cache_dir.join(&key);
        std::fs::copy(&staged, &dest)
            .with_context(|| format!("copying launcher to {}", dest.display()))?;

        Ok(dest)
    }

    /// A launcher for the arguments, compiling it when needed.
    pub fn launcher(&self, arch: BuildArch, deployment_target: &str, variant: LauncherVariant) -> Result<PathBuf> {
        let key = launcher_key(arch, deployment_target, variant);

        if let Some(path) = self.find(&key) {
            debug!("using launcher {}", path.display());
            return Ok(path);
        }

        self.compile(arch, deployment_target, variant)
    }

    /// Copy a launcher to `dest` with mode `0755`.
    pub fn install(
        &self,
        arch: BuildArch,
        deployment_target: &str,
        variant: LauncherVariant,
        dest: &Path,
    ) -> Result<()> {
        let source = self.launcher(arch, deployment_target, variant)?;
        install_executable(&source, dest)
    }
}

/// Copy `source` to `dest` and make it executable.
pub fn install_executable(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, dest)
        .with_context(|| format!("copying {} to {}", source.display(), dest.display()))?;
    std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("setting permissions of {}", dest.display()))?;

    Ok(())
}
