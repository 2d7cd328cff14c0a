// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for packages that load shared libraries with `ctypes`.

use {
    super::{RecipeContext, RecipeGraph, RecipeInfo, RecipeRegistry},
    crate::bootstrap::SETUP_CTYPES,
    anyhow::Result,
    python_packaging::graph::NodeKind,
    std::path::Path,
};

fn contains_dylib(dir: &Path) -> bool {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .any(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("dylib")
        })
}

/// `ctypes` can't load libraries from a zip file, so packages shipping a
/// `.dylib` are kept on the filesystem. `ctypes.util.find_library` learns
/// about `Contents/Frameworks`.
fn ctypes(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    let packages = graph
        .iter_graph()
        .into_iter()
        .filter(|id| {
            let node = graph.node(*id);
            matches!(node.kind, NodeKind::Package | NodeKind::NamespacePackage)
                && !node.identifier.contains('.')
                && node.packagepath.iter().any(|dir| contains_dylib(dir))
        })
        .collect::<Vec<_>>();

    for id in packages {
        graph.mark_zipunsafe(id);
    }

    if let Some(id) = graph.find_module("ctypes") {
        graph.add_bootstrap(id, SETUP_CTYPES)?;
    }

    Ok(())
}

pub fn register(registry: &mut RecipeRegistry) {
    registry.register(RecipeInfo::new("ctypes", ctypes));
}
