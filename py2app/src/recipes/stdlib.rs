// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixups for the standard library.

use {
    super::{RecipeContext, RecipeGraph, RecipeInfo, RecipeRegistry},
    anyhow::Result,
    python_packaging::graph::NodeKind,
};

/// Imports that are only used by test or debugging code paths.
static UNNEEDED_REFS: &[(&str, &[&str])] = &[
    ("multiprocessing.util", &["test", "test.support"]),
    ("pickle", &["doctest"]),
    ("heapq", &["doctest"]),
    ("pickletools", &["doctest"]),
    ("difflib", &["doctest"]),
];

static PYDOC_REFS: &[&str] = &[
    "Tkinter",
    "tty",
    "BaseHTTPServer",
    "mimetools",
    "select",
    "threading",
    "ic",
    "getopt",
    "tkinter",
    "win32",
];

/// Platform specific imports that can't be satisfied on macOS.
static EXPECTED_MISSING: &[(&str, &[&str])] = &[
    ("importlib", &["_frozen_importlib_external"]),
    ("mimetypes", &["winreg"]),
    ("os", &["nt"]),
    ("re", &["sys.getwindowsversion"]),
    ("subprocess", &["_winapi"]),
    ("uuid", &["netbios", "win32wnet"]),
];

const MULTIPROCESSING_BOOTSTRAP: &str = "\
def _boot_multiprocessing():
    import sys
    import multiprocessing.spawn

    orig_get_command_line = multiprocessing.spawn.get_command_line

    def wrapped_get_command_line(**kwargs):
        orig_frozen = sys.frozen
        del sys.frozen
        try:
            return orig_get_command_line(**kwargs)
        finally:
            sys.frozen = orig_frozen

    multiprocessing.spawn.get_command_line = wrapped_get_command_line


_boot_multiprocessing()
";

fn remove_refs(graph: &mut RecipeGraph, module: &str, refs: &[&str]) {
    if let Some(id) = graph.find_module(module) {
        for target in refs {
            graph.remove_all_edges(id, target);
        }
    }
}

fn stdlib(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    for (module, refs) in UNNEEDED_REFS {
        remove_refs(graph, module, refs);
    }

    for (module, names) in EXPECTED_MISSING {
        if graph.find_module(module).is_none() {
            continue;
        }

        for name in *names {
            if let Some(id) = graph.find_node(name) {
                if graph.node(id).kind == NodeKind::MissingModule {
                    graph.set_expected_missing(id);
                }
            }
        }
    }

    // The codec machinery imports encodings by name.
    let encodings = graph.add_module("encodings")?;
    graph.import_package(encodings, "encodings")?;

    // importlib refers to __file__ in ways that work fine from a zip file.
    if let Some(id) = graph.find_module("importlib") {
        graph.set_zipsafe(id, true);
    }

    Ok(())
}

fn pydoc(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    remove_refs(graph, "pydoc", PYDOC_REFS);
    Ok(())
}

/// `multiprocessing` spawns helpers differently when `sys.frozen` is set,
/// which a bundle doesn't need.
fn multiprocessing(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    if let Some(id) = graph.find_module("multiprocessing") {
        graph.add_bootstrap(id, MULTIPROCESSING_BOOTSTRAP)?;
    }
    Ok(())
}

/// `Connection.iterdump()` imports `sqlite3.dump` from C code.
fn sqlite3(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    if let Some(id) = graph.find_module("sqlite3") {
        graph.import_if_present(id, "sqlite3.dump")?;
    }
    Ok(())
}

/// `sysconfig` imports its platform data module by computed name.
fn sysconfig(graph: &mut RecipeGraph, context: &RecipeContext) -> Result<()> {
    let (id, info) = match (graph.find_module("sysconfig"), context.interpreter) {
        (Some(id), Some(info)) => (id, info),
        _ => return Ok(()),
    };

    let name = format!(
        "_sysconfigdata_{}_darwin_{}",
        info.abiflags,
        info.config_var("MULTIARCH").unwrap_or("darwin")
    );
    graph.import_if_present(id, &name)?;

    Ok(())
}

/// Packages listed in the `zip-unsafe` recipe option.
fn zip_unsafe(graph: &mut RecipeGraph, context: &RecipeContext) -> Result<()> {
    for name in &context.options.zip_unsafe {
        if let Some(id) = graph.find_module(name) {
            graph.mark_zipunsafe(id);
        }
    }
    Ok(())
}

pub fn register(registry: &mut RecipeRegistry) {
    registry.register(RecipeInfo::new("stdlib", stdlib));
    registry.register(RecipeInfo::new("pydoc", pydoc).modules(&["pydoc"]));
    registry.register(
        RecipeInfo::new("multiprocessing", multiprocessing).modules(&["multiprocessing"]),
    );
    registry.register(RecipeInfo::new("sqlite3", sqlite3).modules(&["sqlite3"]));
    registry.register(RecipeInfo::new("sysconfig", sysconfig).modules(&["sysconfig"]));
    registry.register(RecipeInfo::new("zip-unsafe", zip_unsafe));
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::RecipeOptions,
            progress::RecordingProgress,
            recipes::run_recipes,
            testutil::{fake_graph, sample_interpreter},
        },
        python_packaging::testutil::write_tree,
    };

    fn run(graph: &mut crate::graph::Py2appGraph, options: &RecipeOptions) -> Result<()> {
        let mut registry = RecipeRegistry::default();
        register(&mut registry);

        let context = RecipeContext {
            options,
            interpreter: None,
        };
        run_recipes(graph, &registry, &context, &mut RecordingProgress::default())?;

        Ok(())
    }

    #[test]
    fn stdlib_fixups() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[
                ("app.py", "import pickle\nimport pydoc\nimport os\nimport importlib\n"),
                ("pickle.py", "import doctest\n"),
                ("doctest.py", ""),
                ("pydoc.py", "import tkinter\nimport getopt\nimport textwrap\n"),
                ("getopt.py", ""),
                ("textwrap.py", ""),
                ("os.py", "    import nt\n"),
                ("importlib/__init__.py", "x = __file__\n"),
                ("encodings/__init__.py", ""),
                ("encodings/utf_8.py", ""),
            ],
        )?;
        let mut graph = fake_graph(td.path())?;
        let app = graph.add_module("app")?;

        run(&mut graph, &RecipeOptions::default())?;

        let pickle = graph.find_node("pickle").expect("pickle");
        let doctest = graph.find_node("doctest").expect("doctest");
        assert!(graph.edge_data(pickle, doctest).is_none());

        let pydoc = graph.find_node("pydoc").expect("pydoc");
        let getopt = graph.find_node("getopt").expect("getopt");
        let textwrap = graph.find_node("textwrap").expect("textwrap");
        assert!(graph.edge_data(pydoc, getopt).is_none());
        assert!(graph.edge_data(pydoc, textwrap).is_some());

        let nt = graph.find_node("nt").expect("nt");
        assert!(graph.is_expected_missing(nt));

        let utf8 = graph.find_node("encodings.utf_8").expect("encodings.utf_8");
        assert!(graph.iter_graph().contains(&utf8));

        let importlib = graph.find_node("importlib").expect("importlib");
        assert!(graph.is_zipsafe(importlib));

        assert!(graph.edge_data(app, pickle).is_some());

        Ok(())
    }

    #[test]
    fn multiprocessing_scriptlet() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[
                ("multiprocessing/__init__.py", ""),
                ("multiprocessing/spawn.py", ""),
                ("encodings/__init__.py", ""),
            ],
        )?;
        let mut graph = fake_graph(td.path())?;
        let id = graph.add_module("multiprocessing")?;

        run(&mut graph, &RecipeOptions::default())?;

        let bootstrap = graph.bootstrap(id).expect("bootstrap attached");
        assert!(bootstrap.contains("_boot_multiprocessing()"));
        assert!(graph.find_node("multiprocessing.spawn").is_some());

        Ok(())
    }

    #[test]
    fn sysconfig_data() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[("sysconfig.py", ""), ("_sysconfigdata__darwin_darwin.py", "")],
        )?;
        let mut graph = fake_graph(td.path())?;
        let id = graph.add_module("sysconfig")?;

        let info = sample_interpreter(td.path());
        let options = RecipeOptions::default();
        let context = RecipeContext {
            options: &options,
            interpreter: Some(&info),
        };
        sysconfig(&mut RecipeGraph::new(&mut graph), &context)?;

        let data = graph
            .find_node("_sysconfigdata__darwin_darwin")
            .expect("sysconfig data module");
        assert!(graph.edge_data(id, data).is_some());

        Ok(())
    }

    #[test]
    fn configured_zip_unsafe() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[("pkg/__init__.py", ""), ("encodings/__init__.py", "")],
        )?;
        let mut graph = fake_graph(td.path())?;
        let id = graph.add_module("pkg")?;
        assert!(graph.is_zipsafe(id));

        let options = RecipeOptions {
            zip_unsafe: vec!["pkg".to_string(), "not_there".to_string()],
            ..Default::default()
        };
        run(&mut graph, &options)?;

        assert!(!graph.is_zipsafe(id));

        Ok(())
    }
}
