// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interpreting the paths stored in dylib load commands.

use std::path::{Component, Path, PathBuf};

/// Directories whose libraries are provided by the operating system.
const SYSTEM_PREFIXES: [&str; 2] = ["/usr/lib/", "/System/Library/"];

/// Whether a library path is provided by the operating system.
pub fn in_system_path(path: &str) -> bool {
    SYSTEM_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// The components of a path inside a framework.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameworkInfo {
    /// Directory containing the `.framework` directory.
    pub location: PathBuf,
    /// Path relative to `location`, e.g. `Python.framework/Versions/3.12/Python`.
    pub name: String,
    /// Framework name without extension, e.g. `Python`.
    pub shortname: String,
    /// Version directory name, when the path is inside `Versions/`.
    pub version: Option<String>,
    /// Suffix of a variant library (`_debug`, `_profile`).
    pub suffix: Option<String>,
}

impl FrameworkInfo {
    /// The `.framework` directory.
    pub fn framework_dir(&self) -> PathBuf {
        self.location.join(format!("{}.framework", self.shortname))
    }
}

/// Split a path to a framework library into its components.
///
/// Accepts `<loc>/<X>.framework/<X>[_suffix]` and
/// `<loc>/<X>.framework/Versions/<v>/<X>[_suffix]`. Anything else,
/// including resources inside a framework, yields `None`.
pub fn framework_info(path: &str) -> Option<FrameworkInfo> {
    let parts = path.split('/').collect::<Vec<_>>();
    let idx = parts.iter().rposition(|p| p.ends_with(".framework"))?;
    let shortname = parts[idx].strip_suffix(".framework")?;
    if shortname.is_empty() {
        return None;
    }

    let rest = &parts[idx + 1..];
    let (version, leaf) = match rest {
        [leaf] => (None, *leaf),
        ["Versions", version, leaf] => (Some(version.to_string()), *leaf),
        _ => return None,
    };

    let suffix = if leaf == shortname {
        None
    } else {
        let suffix = leaf.strip_prefix(shortname)?;
        if !suffix.starts_with('_') {
            return None;
        }
        Some(suffix.to_string())
    };

    Some(FrameworkInfo {
        location: PathBuf::from(parts[..idx].join("/")),
        name: rest
            .iter()
            .fold(parts[idx].to_string(), |acc, p| format!("{}/{}", acc, p)),
        shortname: shortname.to_string(),
        version,
        suffix,
    })
}

/// Lexically normalize a path, collapsing `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut res = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !res.pop() {
                    res.push("..");
                }
            }
            c => res.push(c.as_os_str()),
        }
    }

    res
}

/// Context needed to resolve `@`-relative load command paths.
#[derive(Clone, Debug)]
pub struct LoadContext<'a> {
    /// Directory of the file containing the load command.
    pub loader_dir: &'a Path,
    /// Directory of the main executable.
    pub executable_dir: &'a Path,
    /// `LC_RPATH` entries in effect, in search order.
    pub rpaths: &'a [String],
}

impl<'a> LoadContext<'a> {
    fn expand(&self, value: &str) -> Option<PathBuf> {
        if let Some(rest) = value.strip_prefix("@loader_path") {
            Some(normalize_path(&self.loader_dir.join(rest.trim_start_matches('/'))))
        } else if let Some(rest) = value.strip_prefix("@executable_path") {
            Some(normalize_path(
                &self.executable_dir.join(rest.trim_start_matches('/')),
            ))
        } else if value.starts_with('@') {
            None
        } else {
            Some(normalize_path(Path::new(value)))
        }
    }

    /// Candidate filesystem paths for a load command value, in dyld search order.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        if let Some(rest) = name.strip_prefix("@rpath/") {
            self.rpaths
                .iter()
                .filter_map(|rpath| self.expand(rpath))
                .map(|dir| normalize_path(&dir.join(rest)))
                .collect()
        } else {
            self.expand(name).into_iter().collect()
        }
    }

    /// Resolve a load command value to an existing file.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.candidates(name)
            .into_iter()
            .find(|p| p.symlink_metadata().is_ok())
    }
}
