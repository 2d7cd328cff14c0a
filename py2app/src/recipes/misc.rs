// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recipes for third party packages.

use {
    super::{RecipeContext, RecipeGraph, RecipeInfo, RecipeRegistry},
    crate::config::Resource,
    anyhow::Result,
    std::path::PathBuf,
};

/// Import a fixed list of modules from `importer` when they exist.
fn import_all(graph: &mut RecipeGraph, importer: &str, names: &[&str]) -> Result<()> {
    if let Some(id) = graph.find_module(importer) {
        for name in names {
            graph.import_if_present(id, name)?;
        }
    }

    Ok(())
}

/// Files directly inside `subdir` of a package, to ship as frameworks.
fn package_libraries(graph: &RecipeGraph, package: &str, subdir: &str) -> Vec<PathBuf> {
    let dir = match graph
        .find_module(package)
        .and_then(|id| graph.package_dir(id))
    {
        Some(dir) => dir.join(subdir),
        None => return vec![],
    };

    let mut paths = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    paths.sort();

    paths
}

fn sphinx(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    // Builders are loaded through entry points.
    import_all(
        graph,
        "sphinx",
        &[
            "sphinxcontrib.applehelp",
            "sphinxcontrib.devhelp",
            "sphinxcontrib.htmlhelp",
            "sphinxcontrib.jsmath",
            "sphinxcontrib.qthelp",
            "sphinxcontrib.serializinghtml",
        ],
    )
}

fn platformdirs(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    // The platform module is picked at runtime.
    if let Some(id) = graph.find_module("platformdirs") {
        graph.import_module(id, "platformdirs.macos")?;
    }
    Ok(())
}

fn lxml(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    import_all(
        graph,
        "lxml.etree",
        &["lxml._elementpath", "os.path", "re", "gzip", "io"],
    )?;
    import_all(graph, "lxml.objectify", &["copyreg"])?;

    if let Some(id) = graph.find_module("lxml.isoschematron") {
        graph.mark_zipunsafe(id);
    }

    Ok(())
}

fn opencv(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    if let Some(id) = graph.find_module("cv2.cv2").or_else(|| graph.find_module("cv2")) {
        graph.import_module(id, "numpy")?;
    }
    Ok(())
}

fn matplotlib(graph: &mut RecipeGraph, context: &RecipeContext) -> Result<()> {
    let id = match graph.find_module("matplotlib") {
        Some(id) => id,
        None => return Ok(()),
    };

    match &context.options.matplotlib_backends {
        None => {
            graph.import_package(id, "matplotlib")?;
        }
        Some(backends) => {
            for backend in backends {
                match backend.as_str() {
                    "-" => {}
                    "*" => {
                        graph.import_package(id, "matplotlib.backends")?;
                    }
                    name => {
                        graph.import_module(id, &format!("matplotlib.backends.backend_{}", name))?;
                    }
                }
            }
        }
    }

    if let Some(dir) = graph.package_dir(id).map(|dir| dir.join("mpl-data")) {
        if dir.is_dir() {
            graph.add_resources(id, vec![Resource::new("", vec![dir])]);
        }
    }

    Ok(())
}

/// Modules imported from pydantic's compiled core.
static PYDANTIC_IMPORTS: &[&str] = &[
    "abc",
    "collections",
    "collections.abc",
    "colorsys",
    "configparser",
    "contextlib",
    "copy",
    "dataclasses",
    "datetime",
    "decimal",
    "enum",
    "fractions",
    "functools",
    "ipaddress",
    "itertools",
    "json",
    "math",
    "os",
    "pathlib",
    "pickle",
    "re",
    "sys",
    "types",
    "typing",
    "typing_extensions",
    "uuid",
    "warnings",
    "weakref",
];

fn pydantic(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    if let Some(id) = graph.find_module("pydantic") {
        graph.import_package(id, "pydantic")?;
        import_all(graph, "pydantic", PYDANTIC_IMPORTS)?;
    }
    Ok(())
}

/// Drivers and connectors sqlalchemy loads with `__import__`.
static SQLALCHEMY_DRIVERS: &[&str] = &[
    "asyncpg",
    "psycopg2cffi",
    "pg8000",
    "sqlalchemy_firebird",
    "sqlalchemy_sybase",
    "aiosqlite",
    "sqlite3",
    "oursql",
    "pymysql",
    "mariadb",
    "MySQLdb",
    "cymysql",
    "pymssql",
    "fdb",
    "kinterbasdb",
    "pyodbc",
];

fn sqlalchemy(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    if let Some(id) = graph.find_module("sqlalchemy") {
        import_all(graph, "sqlalchemy", SQLALCHEMY_DRIVERS)?;
        graph.import_package(id, "sqlalchemy")?;
    }
    Ok(())
}

/// Wheels built with delocate keep their libraries in `.dylibs`.
fn zmq(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    let libraries = package_libraries(graph, "zmq", ".dylibs");
    graph.add_frameworks(libraries);
    Ok(())
}

fn rtree(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    let libraries = package_libraries(graph, "rtree", "lib");
    graph.add_frameworks(libraries);
    Ok(())
}

fn pylsp(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    let id = match graph.find_module("pylsp") {
        Some(id) => id,
        None => return Ok(()),
    };

    let mut names = vec!["pylsp.__main__".to_string(), "pylsp.python_lsp".to_string()];
    if let Some(dir) = graph.package_dir(id).map(|d| d.join("plugins")) {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                if let Some(stem) = entry.file_name().to_str().and_then(|n| n.strip_suffix(".py")) {
                    names.push(format!("pylsp.plugins.{}", stem));
                }
            }
        }
    }
    names.sort();

    for name in names {
        graph.import_if_present(id, &name)?;
    }

    Ok(())
}

/// `six.moves` attributes and the modules they resolve to.
static SIX_MOVES: &[(&str, &str)] = &[
    ("configparser", "configparser"),
    ("copyreg", "copyreg"),
    ("cPickle", "pickle"),
    ("cStringIO", "io"),
    ("dbm_gnu", "dbm.gnu"),
    ("_dummy_thread", "_dummy_thread"),
    ("email_mime_multipart", "email.mime.multipart"),
    ("email_mime_nonmultipart", "email.mime.nonmultipart"),
    ("email_mime_text", "email.mime.text"),
    ("email_mime_base", "email.mime.base"),
    ("filterfalse", "itertools"),
    ("getcwd", "os"),
    ("getcwdb", "os"),
    ("http_cookiejar", "http.cookiejar"),
    ("http_cookies", "http.cookies"),
    ("html_entities", "html.entities"),
    ("html_parser", "html.parser"),
    ("http_client", "http.client"),
    ("BaseHTTPServer", "http.server"),
    ("CGIHTTPServer", "http.server"),
    ("SimpleHTTPServer", "http.server"),
    ("intern", "sys"),
    ("queue", "queue"),
    ("reduce", "functools"),
    ("reload_module", "importlib"),
    ("reprlib", "reprlib"),
    ("shlex_quote", "shlex"),
    ("socketserver", "socketserver"),
    ("_thread", "_thread"),
    ("tkinter", "tkinter"),
    ("tkinter_dialog", "tkinter.dialog"),
    ("tkinter_filedialog", "tkinter.FileDialog"),
    ("tkinter_scrolledtext", "tkinter.scrolledtext"),
    ("tkinter_simpledialog", "tkinter.simpledialog"),
    ("tkinter_ttk", "tkinter.ttk"),
    ("tkinter_tix", "tkinter.tix"),
    ("tkinter_constants", "tkinter.constants"),
    ("tkinter_dnd", "tkinter.dnd"),
    ("tkinter_colorchooser", "tkinter.colorchooser"),
    ("tkinter_commondialog", "tkinter.commondialog"),
    ("tkinter_tkfiledialog", "tkinter.filedialog"),
    ("tkinter_font", "tkinter.font"),
    ("tkinter_messagebox", "tkinter.messagebox"),
    ("tkinter_tksimpledialog", "tkinter.simpledialog"),
    ("urllib.robotparser", "urllib.robotparser"),
    ("urllib_robotparser", "urllib.robotparser"),
    ("UserDict", "collections"),
    ("UserList", "collections"),
    ("UserString", "collections"),
    ("winreg", "winreg"),
    ("xmlrpc_client", "xmlrpc.client"),
    ("xmlrpc_server", "xmlrpc.server"),
    ("zip_longest", "itertools"),
    ("urllib.parse", "urllib.parse"),
    ("urllib.error", "urllib.error"),
    ("urllib.request", "urllib.request"),
    ("urllib.response", "urllib.request"),
];

/// `six.moves` is a lazy module, so attribute access isn't an import the
/// graph can see. Vendored copies (`pkg._vendor.six.moves`) are handled too.
///
/// tkinter is only included when something else already pulled it in.
fn six(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    let moves = graph
        .nodes()
        .filter(|(_, node)| {
            node.identifier == "six.moves" || node.identifier.ends_with(".six.moves")
        })
        .map(|(id, _)| id)
        .collect::<Vec<_>>();
    let have_tkinter = graph.find_module("tkinter").is_some();

    for id in moves {
        for (attribute, target) in SIX_MOVES {
            if attribute.starts_with("tkinter") && !have_tkinter {
                continue;
            }
            graph.import_if_present(id, target)?;
        }
    }

    Ok(())
}

pub fn register(registry: &mut RecipeRegistry) {
    registry.register(
        RecipeInfo::new("sphinx", sphinx)
            .distribution("sphinx")
            .modules(&["sphinx"]),
    );
    registry.register(
        RecipeInfo::new("platformdirs", platformdirs)
            .distribution("platformdirs")
            .modules(&["platformdirs"]),
    );
    registry.register(
        RecipeInfo::new("lxml", lxml)
            .distribution("lxml")
            .modules(&["lxml"]),
    );
    registry.register(
        RecipeInfo::new("opencv-python", opencv)
            .distribution("opencv-python")
            .modules(&["cv2"]),
    );
    registry.register(
        RecipeInfo::new("matplotlib", matplotlib)
            .distribution("matplotlib")
            .modules(&["matplotlib"]),
    );
    registry.register(
        RecipeInfo::new("pydantic", pydantic)
            .distribution("pydantic")
            .modules(&["pydantic"]),
    );
    registry.register(
        RecipeInfo::new("sqlalchemy", sqlalchemy)
            .distribution("SQLAlchemy")
            .modules(&["sqlalchemy"]),
    );
    registry.register(
        RecipeInfo::new("zmq", zmq)
            .distribution("pyzmq")
            .modules(&["zmq"]),
    );
    registry.register(
        RecipeInfo::new("rtree", rtree)
            .distribution("Rtree")
            .modules(&["rtree"]),
    );
    registry.register(
        RecipeInfo::new("pylsp", pylsp)
            .distribution("python-lsp-server")
            .modules(&["pylsp"]),
    );
    registry.register(RecipeInfo::new("six", six));
}
