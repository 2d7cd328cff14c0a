// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Qt bindings.

PyQt and PySide import their extension modules from C code, so the graph
only sees the modules the application names itself. The recipes include
the complete binding package on the filesystem, the helper module
(`sip` or `shiboken6`), a `qt.conf` pointing Qt at the bundled plugins and
the plugins requested with the `qt-plugins` recipe option.
*/

use {
    super::{RecipeContext, RecipeGraph, RecipeInfo, RecipeRegistry},
    crate::config::Resource,
    anyhow::{anyhow, Context, Result},
    python_packaging::graph::NodeId,
    std::path::{Path, PathBuf},
};

const QT_CONF: &str = "\
; Qt configuration for bundles built by py2app
[Paths]
Plugins = Resources/qt_plugins
";

/// Binding packages and the location of the Qt plugins inside them.
static SIP_BINDINGS: &[(&str, &str)] = &[("PyQt5", "Qt5/plugins"), ("PyQt6", "Qt6/plugins")];

/// Translate `qt-plugins` patterns into resources below `qt_plugins`.
///
/// A bare name selects a whole plugin category (`platforms` is
/// `platforms/*`). Patterns are matched against `plugin_dir`.
pub fn plugin_resources(plugin_dir: &Path, patterns: &[String]) -> Result<Vec<Resource>> {
    let mut res = vec![];

    for pattern in patterns {
        let pattern = if pattern.contains('/') {
            pattern.clone()
        } else {
            format!("{}/*", pattern)
        };

        if pattern.contains('*') {
            let full = plugin_dir.join(&pattern);
            let full = full
                .to_str()
                .ok_or_else(|| anyhow!("non UTF-8 plugin path {}", full.display()))?;

            for path in glob::glob(full).context("invalid qt-plugins pattern")? {
                let path = path?;
                let rel = path.strip_prefix(plugin_dir)?;
                let dest = Path::new("qt_plugins").join(rel.parent().unwrap_or(Path::new("")));
                res.push(Resource::new(dest, vec![path.clone()]));
            }
        } else {
            let rel = Path::new(&pattern);
            let dest = Path::new("qt_plugins").join(rel.parent().unwrap_or(Path::new("")));
            res.push(Resource::new(dest, vec![plugin_dir.join(rel)]));
        }
    }

    Ok(res)
}

fn add_qt_support(
    graph: &mut RecipeGraph,
    context: &RecipeContext,
    id: NodeId,
    plugin_dir: Option<PathBuf>,
) -> Result<()> {
    graph.add_generated_file(id, "qt.conf", QT_CONF.as_bytes());

    if let (Some(patterns), Some(plugin_dir)) = (&context.options.qt_plugins, plugin_dir) {
        let resources = plugin_resources(&plugin_dir, patterns)?;
        graph.add_resources(id, resources);
    }

    Ok(())
}

fn sip(graph: &mut RecipeGraph, context: &RecipeContext) -> Result<()> {
    if let Some(id) = graph.find_module("sip") {
        graph.mark_zipunsafe(id);
    }

    for (binding, plugins) in SIP_BINDINGS {
        let id = match graph.find_module(binding) {
            Some(id) => id,
            None => continue,
        };

        graph.import_package(id, binding)?;
        graph.mark_zipunsafe(id);

        let sip_module = format!("{}.sip", binding);
        if graph.import_if_present(id, &sip_module)?.is_none() {
            graph.import_if_present(id, "sip")?;
        }

        let plugin_dir = graph.package_dir(id).map(|dir| dir.join(plugins));
        add_qt_support(graph, context, id, plugin_dir)?;
    }

    Ok(())
}

fn pyside6(graph: &mut RecipeGraph, context: &RecipeContext) -> Result<()> {
    let id = match graph.find_module("PySide6") {
        Some(id) => id,
        None => return Ok(()),
    };

    graph.import_package(id, "PySide6")?;
    graph.mark_zipunsafe(id);

    if let Some(shiboken) = graph.import_if_present(id, "shiboken6")? {
        graph.import_package(shiboken, "shiboken6")?;
        graph.mark_zipunsafe(shiboken);
    }

    let plugin_dir = graph.package_dir(id).map(|dir| dir.join("Qt").join("plugins"));
    add_qt_support(graph, context, id, plugin_dir)
}

pub fn register(registry: &mut RecipeRegistry) {
    registry.register(RecipeInfo::new("sip", sip).modules(&["sip", "PyQt5", "PyQt6"]));
    registry.register(
        RecipeInfo::new("pyside6", pyside6)
            .distribution("PySide6")
            .modules(&["PySide6"]),
    );
}
