// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Assembly of `__boot__.py` and `site.py`.

The launcher runs `Contents/Resources/__boot__.py`. That file is a
concatenation of small Python scriptlets chosen from the bundle options,
followed by any scriptlets recipes attached to graph nodes, the
`boot_<style>` scriptlet that runs the entry point, and a footer naming the
scripts.
*/

use {
    crate::config::{BuildType, BundleOptions},
    anyhow::{Context, Result},
    handlebars::Handlebars,
    python_packaging::interpreter::PythonInterpreterInfo,
    serde::Serialize,
    std::path::{Path, PathBuf},
};

const RESET_SYS_PATH: &str = include_str!("reset_sys_path.py");
const SEMI_STANDALONE_PATH: &str = include_str!("semi_standalone_path.py");
const VIRTUALENV: &str = include_str!("virtualenv.py");
const SITE_PACKAGES: &str = include_str!("site_packages.py");
const VIRTUALENV_SITE_PACKAGES: &str = include_str!("virtualenv_site_packages.py");
const SETUP_INCLUDED_SUBPACKAGES: &str = include_str!("setup_included_subpackages.py");
const EMULATE_SHELL_ENVIRONMENT: &str = include_str!("emulate_shell_environment.py");
const ARGV_EMULATION: &str = include_str!("argv_emulation.py");
const ARGV_INJECT: &str = include_str!("argv_inject.py");
const CHDIR_RESOURCE: &str = include_str!("chdir_resource.py");
const PATH_INJECT: &str = include_str!("path_inject.py");
const DISABLE_LINECACHE: &str = include_str!("disable_linecache.py");
const SETUP_IMPORTLIB: &str = include_str!("setup_importlib.py");
/// Makes `ctypes` search `Contents/Frameworks`.
pub const SETUP_CTYPES: &str = include_str!("setup_ctypes.py");
const BOOT_APP: &str = include_str!("boot_app.py");
const BOOT_PLUGIN: &str = include_str!("boot_plugin.py");
const BOOT_ALIASAPP: &str = include_str!("boot_aliasapp.py");
const BOOT_ALIASPLUGIN: &str = include_str!("boot_aliasplugin.py");
const SITE_TEMPLATE: &str = include_str!("site.py.hbs");

/// Render a string as a Python string literal.
///
/// JSON string escapes are a subset of the Python ones.
pub fn python_str(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Render a list of strings as a Python list literal.
pub fn python_list<S: AsRef<str>>(values: &[S]) -> String {
    format!(
        "[{}]",
        values
            .iter()
            .map(|v| python_str(v.as_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

fn python_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn path_str(path: &Path) -> String {
    python_str(&path.display().to_string())
}

/// Facts about the interpreter installation that shape the bootstrap.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BootEnvironment {
    /// `sys.prefix` of the build interpreter.
    pub prefix: PathBuf,
    /// The installation a virtual environment is based on.
    pub base_prefix: PathBuf,
    pub virtualenv: bool,
    /// Whether a virtual environment sees the global site-packages.
    pub global_site_packages: bool,
    /// `sys.path` of the build interpreter, for alias builds.
    pub sys_path: Vec<PathBuf>,
}

impl BootEnvironment {
    /// Describe the environment of `info`, based on installation `base_prefix`.
    pub fn from_interpreter(info: &PythonInterpreterInfo, base_prefix: &Path) -> Self {
        let virtualenv = info.is_virtual_environment();

        let global_site_packages = if !virtualenv {
            true
        } else if let Ok(data) = std::fs::read_to_string(info.prefix.join("pyvenv.cfg")) {
            data.lines().any(|line| match line.split_once('=') {
                Some((key, value)) => {
                    key.trim() == "include-system-site-packages"
                        && value.trim().eq_ignore_ascii_case("true")
                }
                None => false,
            })
        } else {
            !info
                .prefix
                .join("lib")
                .join(info.lib_dir_name())
                .join("no-global-site-packages.txt")
                .exists()
        };

        Self {
            prefix: info.prefix.clone(),
            base_prefix: base_prefix.to_path_buf(),
            virtualenv,
            global_site_packages,
            sys_path: info.sys_path.clone(),
        }
    }
}

/// Everything needed to write `__boot__.py` for one bundle.
pub struct BootstrapBuilder<'a> {
    bundle: &'a BundleOptions,
    environment: &'a BootEnvironment,
    subpackages: Vec<String>,
    recipe_scriptlets: Vec<String>,
}

impl<'a> BootstrapBuilder<'a> {
    pub fn new(bundle: &'a BundleOptions, environment: &'a BootEnvironment) -> Self {
        Self {
            bundle,
            environment,
            subpackages: vec![],
            recipe_scriptlets: vec![],
        }
    }

    /// Packages shipped as directories that must be importable by dotted name.
    pub fn subpackages(mut self, names: Vec<String>) -> Self {
        self.subpackages = names;
        self
    }

    /// Scriptlets attached to graph nodes by recipes.
    pub fn recipe_scriptlets(mut self, scriptlets: Vec<String>) -> Self {
        self.recipe_scriptlets = scriptlets;
        self
    }

    fn is_alias(&self) -> bool {
        self.bundle.build_type == BuildType::Alias
    }

    fn is_app(&self) -> bool {
        !self.bundle.plugin
    }

    /// Paths added to `sys.path` of alias builds.
    ///
    /// The directory of the main script comes first, followed by the
    /// search path of the build interpreter.
    pub fn additional_paths(&self) -> Vec<PathBuf> {
        let script_dir = self
            .bundle
            .script
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();

        std::iter::once(script_dir)
            .chain(self.environment.sys_path.iter().cloned())
            .filter(|p| !p.as_os_str().is_empty())
            .collect()
    }

    /// The sequence of scriptlets, without the footer.
    pub fn scriptlets(&self) -> Vec<String> {
        let bundle = self.bundle;
        let env = self.environment;
        let mut res = vec![RESET_SYS_PATH.to_string()];

        if bundle.build_type == BuildType::SemiStandalone {
            res.push(SEMI_STANDALONE_PATH.to_string());
        }

        let site_packages = bundle.python.use_sitepackages || self.is_alias();

        if env.virtualenv {
            if self.is_alias() || bundle.build_type == BuildType::SemiStandalone {
                res.push(VIRTUALENV.to_string());
                res.push(format!(
                    "_fixup_virtualenv({})\n",
                    path_str(&env.base_prefix)
                ));
            }

            if site_packages {
                res.push(VIRTUALENV_SITE_PACKAGES.to_string());
                res.push(format!(
                    "_site_packages({}, {}, {})\n",
                    path_str(&env.prefix),
                    path_str(&env.base_prefix),
                    python_bool(env.global_site_packages)
                ));
            }
        } else if site_packages {
            res.push(SITE_PACKAGES.to_string());
            res.push(format!(
                "_site_packages({}, {}, {})\n",
                path_str(&env.prefix),
                path_str(&env.base_prefix),
                python_bool(env.global_site_packages)
            ));
        }

        if !self.subpackages.is_empty() {
            res.push(SETUP_INCLUDED_SUBPACKAGES.to_string());
            res.push(format!("_path_hooks = {}\n", python_list(&self.subpackages)));
        }

        if bundle.emulate_shell_environment {
            res.push(EMULATE_SHELL_ENVIRONMENT.to_string());
        }

        if bundle.argv_emulator && self.is_app() {
            res.push(ARGV_EMULATION.to_string());
        }

        if !bundle.argv_inject.is_empty() {
            res.push(ARGV_INJECT.to_string());
            res.push(format!("_argv_inject({})\n", python_list(&bundle.argv_inject)));
        }

        if self.is_app() && bundle.chdir {
            res.push(CHDIR_RESOURCE.to_string());
        }

        if self.is_alias() {
            res.push(SETUP_CTYPES.to_string());

            let paths = self
                .additional_paths()
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>();
            if !paths.is_empty() {
                res.push(PATH_INJECT.to_string());
                res.push(format!("_path_inject({})\n", python_list(&paths)));
            }
        } else {
            res.push(DISABLE_LINECACHE.to_string());
            res.push(SETUP_IMPORTLIB.to_string());
        }

        res.extend(self.recipe_scriptlets.iter().cloned());

        res.push(
            match (self.is_alias(), bundle.plugin) {
                (false, false) => BOOT_APP,
                (false, true) => BOOT_PLUGIN,
                (true, false) => BOOT_ALIASAPP,
                (true, true) => BOOT_ALIASPLUGIN,
            }
            .to_string(),
        );

        res
    }

    /// The `DEFAULT_SCRIPT`/`SCRIPT_MAP` footer and the call to `_run()`.
    ///
    /// Alias builds refer to scripts by absolute path. Other builds refer to
    /// the `bundle-scripts/<stem>` archive members.
    pub fn footer(&self) -> Result<String> {
        let name = |script: &Path| -> Result<String> {
            if self.is_alias() {
                let resolved = std::fs::canonicalize(script)
                    .with_context(|| format!("resolving {}", script.display()))?;
                Ok(resolved.display().to_string())
            } else {
                script_stem(script)
            }
        };

        let mut entries = vec![];
        for script in &self.bundle.extra_scripts {
            entries.push(format!(
                "{}: {}",
                python_str(&script_stem(script)?),
                python_str(&name(script)?)
            ));
        }

        let mut res = format!(
            "DEFAULT_SCRIPT = {}\nSCRIPT_MAP = {{{}}}\n",
            python_str(&name(&self.bundle.script)?),
            entries.join(", ")
        );

        if self.is_app() {
            res.push_str("try:\n    _run()\nexcept KeyboardInterrupt:\n    pass\n");
        } else {
            res.push_str("_run()\n");
        }

        Ok(res)
    }

    /// The complete `__boot__.py`.
    pub fn source(&self) -> Result<String> {
        let mut res = String::new();
        for scriptlet in self.scriptlets() {
            res.push_str(&scriptlet);
            if !scriptlet.ends_with('\n') {
                res.push('\n');
            }
            res.push('\n');
        }
        res.push_str(&self.footer()?);

        Ok(res)
    }
}

/// The file stem of a script, used as its launcher and archive name.
pub fn script_stem(script: &Path) -> Result<String> {
    script
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .with_context(|| format!("script {} has no usable file name", script.display()))
}

#[derive(Serialize)]
struct SiteTemplateData {
    python_version: String,
    site_packages: bool,
    extra_paths: Vec<String>,
}

/// Render the `site.py` installed in `Contents/Resources`.
///
/// `extra_paths` are appended to `sys.path` when the module is imported.
pub fn render_site_py(python_version: &str, site_packages: bool, extra_paths: &[PathBuf]) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars
        .register_template_string("site.py", SITE_TEMPLATE)
        .context("parsing site.py template")?;

    let data = SiteTemplateData {
        python_version: python_version.to_string(),
        site_packages,
        extra_paths: extra_paths
            .iter()
            .map(|p| path_str(p))
            .collect::<Vec<_>>(),
    };

    handlebars
        .render("site.py", &data)
        .context("rendering site.py")
}

#[cfg(test)]
mod tests {
    use {
        super::*, crate::environment::PlatformDefaults, python_packaging::testutil::write_tree,
    };

    fn defaults() -> PlatformDefaults {
        PlatformDefaults {
            arch: crate::config::BuildArch::Arm64,
            deployment_target: "11.0".to_string(),
        }
    }

    fn position(scriptlets: &[String], needle: &str) -> Option<usize> {
        scriptlets.iter().position(|s| s.contains(needle))
    }

    #[test]
    fn standalone_app() -> Result<()> {
        let mut bundle = BundleOptions::new("/src/main.py", &defaults());
        bundle.extra_scripts = vec![PathBuf::from("/src/helper1.py")];
        let env = BootEnvironment::default();

        let builder = BootstrapBuilder::new(&bundle, &env)
            .recipe_scriptlets(vec!["_recipe_marker()\n".to_string()]);
        let scriptlets = builder.scriptlets();

        assert!(scriptlets[0].contains("def _reset_sys_path"));
        let chdir = position(&scriptlets, "def _chdir_resource").expect("chdir");
        let linecache = position(&scriptlets, "def _disable_linecache").expect("linecache");
        let recipe = position(&scriptlets, "_recipe_marker").expect("recipe");
        let boot = position(&scriptlets, "macosx_app").expect("boot_app");
        assert!(chdir < linecache && linecache < recipe && recipe < boot);
        assert!(position(&scriptlets, "def _argv_emulation").is_none());
        assert!(position(&scriptlets, "def _site_packages").is_none());
        assert!(scriptlets[boot].contains("marshal.loads(data[16:])"));

        let source = builder.source()?;
        assert!(source.contains("DEFAULT_SCRIPT = \"main\"\nSCRIPT_MAP = {\"helper1\": \"helper1\"}\n"));
        assert!(source.ends_with("try:\n    _run()\nexcept KeyboardInterrupt:\n    pass\n"));

        Ok(())
    }

    #[test]
    fn plugin_options() -> Result<()> {
        let mut bundle = BundleOptions::new("/src/plug.py", &defaults());
        bundle.plugin = true;
        bundle.chdir = true;
        bundle.argv_emulator = true;
        bundle.argv_inject = vec!["--flag".to_string(), "it's".to_string()];
        bundle.emulate_shell_environment = true;
        bundle.python.use_sitepackages = true;
        let env = BootEnvironment {
            prefix: PathBuf::from("/opt/py"),
            base_prefix: PathBuf::from("/opt/py"),
            global_site_packages: true,
            ..Default::default()
        };

        let builder = BootstrapBuilder::new(&bundle, &env).subpackages(vec!["pkg.sub".to_string()]);
        let source = builder.source()?;

        // Application only scriptlets are skipped for plugins.
        assert!(!source.contains("def _argv_emulation"));
        assert!(!source.contains("def _chdir_resource"));
        assert!(source.contains("def _emulate_shell_environment"));
        assert!(source.contains("_argv_inject([\"--flag\", \"it's\"])\n"));
        assert!(source.contains("_site_packages(\"/opt/py\", \"/opt/py\", True)\n"));
        assert!(source.contains("_path_hooks = [\"pkg.sub\"]\n"));
        assert!(source.contains("macosx_plugin"));
        assert!(source.ends_with("SCRIPT_MAP = {}\n_run()\n"));

        Ok(())
    }

    #[test]
    fn alias_app() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(td.path(), &[("main.py", "print('hi')\n"), ("tool.py", "")])?;

        let mut bundle = BundleOptions::new(td.path().join("main.py"), &defaults());
        bundle.build_type = BuildType::Alias;
        bundle.extra_scripts = vec![td.path().join("tool.py")];
        bundle.argv_emulator = true;
        let env = BootEnvironment {
            prefix: PathBuf::from("/venv"),
            base_prefix: PathBuf::from("/opt/py"),
            virtualenv: true,
            global_site_packages: false,
            sys_path: vec![PathBuf::from("/venv/lib/python3.12/site-packages")],
        };

        let builder = BootstrapBuilder::new(&bundle, &env);
        let scriptlets = builder.scriptlets();
        assert!(position(&scriptlets, "_fixup_virtualenv(\"/opt/py\")").is_some());
        assert!(position(&scriptlets, "_site_packages(\"/venv\", \"/opt/py\", False)").is_some());
        assert!(position(&scriptlets, "def _argv_emulation").is_some());
        assert!(position(&scriptlets, "def _setup_ctypes").is_some());
        assert!(position(&scriptlets, "def _disable_linecache").is_none());
        assert!(position(&scriptlets, "compile(source, script, \"exec\")").is_some());

        let paths = builder.additional_paths();
        assert_eq!(paths[0], td.path());
        assert_eq!(paths[1], PathBuf::from("/venv/lib/python3.12/site-packages"));

        let main = std::fs::canonicalize(td.path().join("main.py"))?;
        let footer = builder.footer()?;
        assert!(footer.starts_with(&format!("DEFAULT_SCRIPT = \"{}\"\n", main.display())));
        assert!(footer.contains("\"tool\": "));

        Ok(())
    }

    #[test]
    fn literals() {
        assert_eq!(python_str("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
        assert_eq!(python_list::<&str>(&[]), "[]");
        assert_eq!(python_list(&["x", "y"]), "[\"x\", \"y\"]");
    }

    #[test]
    fn site_template() -> Result<()> {
        let source = render_site_py("3.12", false, &[])?;
        assert!(source.contains("_PYTHON_VERSION = \"3.12\""));
        assert!(source.contains("_SITE_PACKAGES = False"));

        let source = render_site_py("3.12", true, &[PathBuf::from("/src/app")])?;
        assert!(source.contains("_SITE_PACKAGES = True"));
        assert!(source.contains("    \"/src/app\",\n"));

        Ok(())
    }
}
