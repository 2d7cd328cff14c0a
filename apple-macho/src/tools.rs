// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Locating Xcode command line tools.

use {
    crate::MachOError,
    log::debug,
    once_cell::sync::Lazy,
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
        sync::Mutex,
    },
};

static TOOL_CACHE: Lazy<Mutex<HashMap<String, PathBuf>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn xcrun_find(name: &str) -> Option<PathBuf> {
    let xcrun = which::which("xcrun").ok()?;

    let output = duct::cmd(xcrun, ["-find", name])
        .stderr_null()
        .stdout_capture()
        .unchecked()
        .run()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let path = String::from_utf8(output.stdout).ok()?;
    let path = PathBuf::from(path.trim());

    if path.as_os_str().is_empty() || !path.exists() {
        None
    } else {
        Some(path)
    }
}

/// Find an Xcode tool such as `codesign`, `strip` or `ibtool`.
///
/// `xcrun -find` is consulted first so the active developer directory
/// wins. Falls back to searching `PATH`. Results are cached for the
/// lifetime of the process.
pub fn find_tool(name: &str) -> Result<PathBuf, MachOError> {
    if let Ok(cache) = TOOL_CACHE.lock() {
        if let Some(path) = cache.get(name) {
            return Ok(path.clone());
        }
    }

    let path = xcrun_find(name)
        .or_else(|| which::which(name).ok())
        .ok_or_else(|| MachOError::ToolNotFound(name.to_string()))?;
    debug!("using {} for {}", path.display(), name);

    if let Ok(mut cache) = TOOL_CACHE.lock() {
        cache.insert(name.to_string(), path.clone());
    }

    Ok(path)
}

/// Register an explicit location for a tool, bypassing discovery.
pub fn set_tool_path(name: &str, path: &Path) {
    if let Ok(mut cache) = TOOL_CACHE.lock() {
        cache.insert(name.to_string(), path.to_path_buf());
    }
}
