// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    super::{RecipeContext, RecipeGraph, RecipeInfo, RecipeRegistry},
    crate::config::Resource,
    anyhow::Result,
    log::warn,
    std::path::Path,
};

fn library_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|s| s.to_str())
}

/// Ship the Tcl and Tk script libraries used by `_tkinter`.
///
/// They are copied to `Resources/lib` and found through `TCL_LIBRARY` and
/// `TK_LIBRARY`.
fn tkinter(graph: &mut RecipeGraph, context: &RecipeContext) -> Result<()> {
    let id = match graph.find_module("_tkinter") {
        Some(id) => id,
        None => return Ok(()),
    };

    let (tcl, tk) = match context
        .interpreter
        .map(|info| (info.tcl_library.as_deref(), info.tk_library.as_deref()))
    {
        Some((Some(tcl), Some(tk))) => (tcl, tk),
        _ => {
            warn!("_tkinter is used but the Tcl/Tk library location is unknown");
            return Ok(());
        }
    };

    let (tcl_name, tk_name) = match (library_name(tcl), library_name(tk)) {
        (Some(a), Some(b)) => (a.to_string(), b.to_string()),
        _ => return Ok(()),
    };

    graph.add_resources(
        id,
        vec![Resource::new("lib", vec![tcl.to_path_buf(), tk.to_path_buf()])],
    );

    let scriptlet = format!(
        r#"def _setup_tkinter():
    import os

    resourcepath = os.environ["RESOURCEPATH"]
    os.environ["TCL_LIBRARY"] = os.path.join(resourcepath, "lib", "{}")
    os.environ["TK_LIBRARY"] = os.path.join(resourcepath, "lib", "{}")


_setup_tkinter()
"#,
        tcl_name, tk_name
    );
    graph.add_bootstrap(id, &scriptlet)?;

    Ok(())
}

pub fn register(registry: &mut RecipeRegistry) {
    registry.register(RecipeInfo::new("tkinter", tkinter).modules(&["_tkinter"]));
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::RecipeOptions,
            testutil::{fake_graph, sample_interpreter},
        },
        python_packaging::testutil::write_tree,
    };

    #[test]
    fn tcl_tk_libraries() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[("_tkinter.so", ""), ("tcl/tcl8.6/init.tcl", ""), ("tcl/tk8.6/tk.tcl", "")],
        )?;
        let mut graph = fake_graph(td.path())?;
        let id = graph.add_module("_tkinter")?;

        let mut info = sample_interpreter(td.path());
        info.tcl_library = Some(td.path().join("tcl").join("tcl8.6"));
        info.tk_library = Some(td.path().join("tcl").join("tk8.6"));

        let options = RecipeOptions::default();
        let context = RecipeContext {
            options: &options,
            interpreter: Some(&info),
        };
        tkinter(&mut RecipeGraph::new(&mut graph), &context)?;

        assert_eq!(
            graph.resources(id),
            &[Resource::new(
                "lib",
                vec![
                    td.path().join("tcl").join("tcl8.6"),
                    td.path().join("tcl").join("tk8.6")
                ]
            )]
        );
        let bootstrap = graph.bootstrap(id).expect("scriptlet");
        assert!(bootstrap.contains(r#""lib", "tk8.6")"#));

        // Nothing happens without interpreter information.
        let mut other = fake_graph(td.path())?;
        let id = other.add_module("_tkinter")?;
        let context = RecipeContext {
            options: &options,
            interpreter: None,
        };
        let mut proxy = RecipeGraph::new(&mut other);
        tkinter(&mut proxy, &context)?;
        assert!(!proxy.is_updated());
        assert!(other.resources(id).is_empty());

        Ok(())
    }
}
