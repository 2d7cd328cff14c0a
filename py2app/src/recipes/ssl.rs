// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Certificate handling for `ssl`.

use {
    super::{RecipeContext, RecipeGraph, RecipeInfo, RecipeRegistry},
    crate::config::Resource,
    anyhow::Result,
    log::info,
};

const TRUSTSTORE_BOOTSTRAP: &str = "\
def _setup_truststore():
    import truststore

    truststore.inject_into_ssl()


_setup_truststore()
";

/// OpenSSL in the bundle doesn't know where the build machine keeps its
/// certificates. Use the system trust store through `truststore` when it is
/// installed, otherwise ship the default CA file and directory.
fn ssl(graph: &mut RecipeGraph, context: &RecipeContext) -> Result<()> {
    let id = match graph.find_module("ssl") {
        Some(id) => id,
        None => return Ok(()),
    };

    if graph.module_exists("truststore") {
        graph.add_bootstrap(id, TRUSTSTORE_BOOTSTRAP)?;
        return Ok(());
    }

    let paths = match context.interpreter.and_then(|info| info.ssl_paths.as_ref()) {
        Some(paths) => paths,
        None => return Ok(()),
    };

    let mut sources = vec![];
    let mut cafile = "no-such-file".to_string();
    let mut capath = "no-such-file".to_string();

    if let Some(path) = &paths.cafile {
        if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
            cafile = name.to_string();
            sources.push(path.clone());
        }
    }
    if let Some(path) = &paths.capath {
        if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
            capath = name.to_string();
            sources.push(path.clone());
        }
    }

    if sources.is_empty() {
        info!("no default certificate locations, not shipping a CA bundle");
        return Ok(());
    }

    graph.add_resources(id, vec![Resource::new("openssl.ca", sources)]);

    let scriptlet = format!(
        r#"def _setup_openssl():
    import os

    resourcepath = os.environ["RESOURCEPATH"]
    os.environ["SSL_CERT_FILE"] = os.path.join(resourcepath, "openssl.ca", "{}")
    os.environ["SSL_CERT_DIR"] = os.path.join(resourcepath, "openssl.ca", "{}")


_setup_openssl()
"#,
        cafile, capath
    );
    graph.add_bootstrap(id, &scriptlet)?;

    Ok(())
}

/// truststore imports its Windows and OpenSSL backends conditionally.
fn truststore(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    if let Some(id) = graph.find_module("truststore._api") {
        for name in ["truststore._windows", "truststore._openssl", "urllib3.util.ssl_"] {
            graph.remove_all_edges(id, name);
        }
    }

    Ok(())
}

pub fn register(registry: &mut RecipeRegistry) {
    registry.register(RecipeInfo::new("ssl", ssl).modules(&["ssl"]));
    registry.register(
        RecipeInfo::new("truststore", truststore)
            .distribution("truststore")
            .modules(&["truststore"]),
    );
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::RecipeOptions,
            testutil::{fake_graph, sample_interpreter},
        },
        python_packaging::{interpreter::SslVerifyPaths, testutil::write_tree},
    };

    #[test]
    fn ca_bundle() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(td.path(), &[("ssl.py", ""), ("etc/cert.pem", "")])?;
        let mut graph = fake_graph(td.path())?;
        let id = graph.add_module("ssl")?;

        let mut info = sample_interpreter(td.path());
        info.ssl_paths = Some(SslVerifyPaths {
            cafile: Some(td.path().join("etc").join("cert.pem")),
            ..Default::default()
        });

        let options = RecipeOptions::default();
        let context = RecipeContext {
            options: &options,
            interpreter: Some(&info),
        };
        ssl(&mut RecipeGraph::new(&mut graph), &context)?;

        assert_eq!(
            graph.resources(id)[0],
            Resource::new("openssl.ca", vec![td.path().join("etc").join("cert.pem")])
        );
        let bootstrap = graph.bootstrap(id).expect("scriptlet");
        assert!(bootstrap.contains(r#""openssl.ca", "cert.pem")"#));
        assert!(bootstrap.contains(r#""openssl.ca", "no-such-file")"#));

        Ok(())
    }

    #[test]
    fn prefers_truststore() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(
            td.path(),
            &[
                ("ssl.py", ""),
                ("truststore/__init__.py", "from truststore._api import inject_into_ssl\n"),
                ("truststore/_api.py", "    import truststore._windows\n"),
            ],
        )?;
        let mut graph = fake_graph(td.path())?;
        let id = graph.add_module("ssl")?;

        let options = RecipeOptions::default();
        let context = RecipeContext {
            options: &options,
            interpreter: None,
        };
        ssl(&mut RecipeGraph::new(&mut graph), &context)?;

        assert!(graph.resources(id).is_empty());
        assert!(graph
            .bootstrap(id)
            .expect("scriptlet")
            .contains("inject_into_ssl"));

        // The scriptlet pulled truststore into the graph.
        let api = graph.find_node("truststore._api").expect("truststore._api");
        let windows = graph.find_node("truststore._windows").expect("_windows");
        assert!(graph.edge_data(api, windows).is_some());

        truststore(&mut RecipeGraph::new(&mut graph), &context)?;
        assert!(graph.edge_data(api, windows).is_none());

        Ok(())
    }
}
