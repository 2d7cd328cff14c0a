// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Build configuration.

The configuration lives in the `[tool.py2app]` table of `pyproject.toml`.
It is parsed into a [toml::Table] and validated by hand so that every
problem can be reported with the dotted location of the offending key.

Options that can be set both globally and per bundle (`build-type`,
`strip`, `arch`, `deployment-target` and `python.*`) are resolved while
parsing: every [BundleOptions] carries the effective values.
*/

use {
    crate::{environment::PlatformDefaults, error::Py2appError},
    std::{
        collections::BTreeMap,
        fmt::{Display, Formatter},
        path::{Path, PathBuf},
        str::FromStr,
    },
};

type ConfigResult<T> = std::result::Result<T, Py2appError>;

fn config_error(message: impl ToString) -> Py2appError {
    Py2appError::configuration(message)
}

/// How Python is made available to the bundle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildType {
    /// Embed the interpreter and all code.
    Standalone,
    /// Symlink to the sources for fast development iteration.
    Alias,
    /// Rely on an installed interpreter of the same version.
    ///
    /// Deprecated: kept for existing configurations only.
    SemiStandalone,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Alias => "alias",
            Self::SemiStandalone => "semi-standalone",
        }
    }
}

impl FromStr for BuildType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standalone" => Ok(Self::Standalone),
            "alias" => Ok(Self::Alias),
            "semi-standalone" => Ok(Self::SemiStandalone),
            _ => Err(()),
        }
    }
}

impl Display for BuildType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Architectures of the launcher executables.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildArch {
    Arm64,
    X86_64,
    Universal2,
}

impl BuildArch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
            Self::Universal2 => "universal2",
        }
    }

    /// Names of the individual architectures, as passed to `-arch`.
    pub fn arch_names(&self) -> Vec<&'static str> {
        match self {
            Self::Arm64 => vec!["arm64"],
            Self::X86_64 => vec!["x86_64"],
            Self::Universal2 => vec!["arm64", "x86_64"],
        }
    }
}

impl FromStr for BuildArch {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arm64" => Ok(Self::Arm64),
            "x86_64" => Ok(Self::X86_64),
            "universal2" => Ok(Self::Universal2),
            _ => Err(()),
        }
    }
}

impl Display for BuildArch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpreter flags forwarded to the bundle.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PythonOptions {
    pub optimize: i64,
    pub verbose: bool,
    pub use_pythonpath: bool,
    pub use_sitepackages: bool,
    pub use_faulthandler: bool,
}

/// Files to copy into `Contents/Resources`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resource {
    /// Directory relative to `Contents/Resources`.
    pub destination: PathBuf,
    pub sources: Vec<PathBuf>,
}

impl Resource {
    pub fn new(destination: impl Into<PathBuf>, sources: Vec<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            sources,
        }
    }

    fn from_config(value: &toml::Value, config_root: &Path, location: &str) -> ConfigResult<Self> {
        let invalid = || config_error(format!("{}: invalid item {}", location, value));

        match value {
            toml::Value::String(s) => Ok(Self::new(".", vec![config_root.join(s)])),
            toml::Value::Array(items) => {
                let (dest, sources) = match items.as_slice() {
                    [toml::Value::String(dest), toml::Value::Array(sources)] => (dest, sources),
                    _ => return Err(invalid()),
                };

                let sources = sources
                    .iter()
                    .map(|s| s.as_str().map(|s| config_root.join(s)))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(invalid)?;

                Ok(Self::new(dest, sources))
            }
            _ => Err(invalid()),
        }
    }
}

/// Options consumed by recipes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RecipeOptions {
    /// Packages to always store outside of the zip archive.
    pub zip_unsafe: Vec<String>,
    /// Qt plugin patterns, e.g. `platforms` or `imageformats/libqjpeg*`.
    pub qt_plugins: Option<Vec<String>>,
    /// Matplotlib backends. `*` selects all, `-` none.
    pub matplotlib_backends: Option<Vec<String>>,
}

/// Settings that bundles inherit from the global configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Inherited {
    build_type: BuildType,
    deployment_target: String,
    macho_strip: bool,
    macho_arch: BuildArch,
    python: PythonOptions,
}

/// Fully resolved options of one bundle.
#[derive(Clone, Debug, PartialEq)]
pub struct BundleOptions {
    /// Key of the bundle's table in `tool.py2app.bundle`.
    pub key: String,
    pub name: String,
    pub script: PathBuf,
    pub extra_scripts: Vec<PathBuf>,
    pub plugin: bool,
    pub extension: String,
    pub iconfile: Option<PathBuf>,
    pub resources: Vec<Resource>,
    pub plist: plist::Dictionary,
    pub py_include: Vec<String>,
    pub py_exclude: Vec<String>,
    pub py_full_package: Vec<String>,
    pub expected_missing: Vec<String>,
    pub macho_include: Vec<String>,
    pub macho_exclude: Vec<String>,
    pub chdir: bool,
    pub argv_emulator: bool,
    pub argv_inject: Vec<String>,
    pub emulate_shell_environment: bool,
    pub redirect_to_asl: bool,
    pub build_type: BuildType,
    pub macho_strip: bool,
    pub macho_arch: BuildArch,
    pub deployment_target: String,
    pub python: PythonOptions,
}

impl BundleOptions {
    /// A bundle for `script` with default settings.
    pub fn new(script: impl Into<PathBuf>, defaults: &PlatformDefaults) -> Self {
        let script = script.into();
        let name = script
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            key: name.clone(),
            name,
            script,
            extra_scripts: vec![],
            plugin: false,
            extension: ".app".to_string(),
            iconfile: None,
            resources: vec![],
            plist: plist::Dictionary::new(),
            py_include: vec![],
            py_exclude: vec![],
            py_full_package: vec![],
            expected_missing: vec![],
            macho_include: vec![],
            macho_exclude: vec![],
            chdir: true,
            argv_emulator: false,
            argv_inject: vec![],
            emulate_shell_environment: false,
            redirect_to_asl: false,
            build_type: BuildType::Standalone,
            macho_strip: true,
            macho_arch: defaults.arch,
            deployment_target: defaults.deployment_target.clone(),
            python: PythonOptions::default(),
        }
    }

    /// File name of the bundle directory.
    pub fn bundle_file_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }

    /// Every entry point: the main script followed by the extra scripts.
    pub fn all_scripts(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.script).chain(self.extra_scripts.iter())
    }

    fn apply_inherited(&mut self, inherited: &Inherited) {
        self.build_type = inherited.build_type;
        self.deployment_target = inherited.deployment_target.clone();
        self.macho_strip = inherited.macho_strip;
        self.macho_arch = inherited.macho_arch;
        self.python = inherited.python.clone();
    }
}

/// The complete build configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Py2appConfiguration {
    /// Directory containing `pyproject.toml`. Relative paths are resolved against it.
    pub config_root: PathBuf,
    pub recipe: RecipeOptions,
    pub bundles: Vec<BundleOptions>,
}

fn is_valid_deployment_target(value: &str) -> bool {
    let parts = value.split('.').collect::<Vec<_>>();

    (1..=2).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn expect_bool(value: &toml::Value, location: &str) -> ConfigResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| config_error(format!("'{}' is not a boolean", location)))
}

fn expect_str<'a>(value: &'a toml::Value, location: &str) -> ConfigResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| config_error(format!("'{}' is not a string", location)))
}

fn expect_table<'a>(value: &'a toml::Value, location: &str) -> ConfigResult<&'a toml::Table> {
    value
        .as_table()
        .ok_or_else(|| config_error(format!("'{}' is not a dictionary", location)))
}

fn expect_string_list(value: &toml::Value, location: &str) -> ConfigResult<Vec<String>> {
    value
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|v| v.as_str().map(|s| s.to_string()))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| config_error(format!("'{}' is not a list of strings", location)))
}

/// Convert a TOML value into a plist value. Datetimes have no equivalent.
fn toml_to_plist(value: &toml::Value) -> Option<plist::Value> {
    Some(match value {
        toml::Value::String(s) => plist::Value::String(s.clone()),
        toml::Value::Integer(i) => plist::Value::Integer((*i).into()),
        toml::Value::Float(f) => plist::Value::Real(*f),
        toml::Value::Boolean(b) => plist::Value::Boolean(*b),
        toml::Value::Array(items) => plist::Value::Array(
            items
                .iter()
                .map(toml_to_plist)
                .collect::<Option<Vec<_>>>()?,
        ),
        toml::Value::Table(table) => {
            let mut dict = plist::Dictionary::new();
            for (k, v) in table {
                dict.insert(k.clone(), toml_to_plist(v)?);
            }
            plist::Value::Dictionary(dict)
        }
        toml::Value::Datetime(_) => return None,
    })
}

/// Handle a key that can appear both globally and per bundle.
///
/// Returns false when `key` isn't one of those keys.
fn parse_inherited(
    key: &str,
    value: &toml::Value,
    prefix: &str,
    target: &mut Inherited,
) -> ConfigResult<bool> {
    let location = format!("{}.{}", prefix, key);

    match key {
        "build-type" => {
            target.build_type = value
                .as_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| config_error(format!("'{}' has invalid value", location)))?;
        }
        "strip" => {
            target.macho_strip = expect_bool(value, &location)?;
        }
        "arch" => {
            target.macho_arch = value
                .as_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| config_error(format!("'{}' has invalid value", location)))?;
        }
        "deployment-target" => match value.as_str() {
            Some(s) if is_valid_deployment_target(s) => {
                target.deployment_target = s.to_string();
            }
            _ => return Err(config_error(format!("'{}' is not valid", location))),
        },
        "python" => {
            for (py_key, py_value) in expect_table(value, &location)? {
                let py_location = format!("{}.{}", location, py_key);
                match py_key.as_str() {
                    "optimize" => {
                        target.python.optimize = py_value.as_integer().ok_or_else(|| {
                            config_error(format!("'{}' is not an integer", py_location))
                        })?;
                    }
                    "verbose" => target.python.verbose = expect_bool(py_value, &py_location)?,
                    "use-pythonpath" => {
                        target.python.use_pythonpath = expect_bool(py_value, &py_location)?
                    }
                    "use-sitepackages" => {
                        target.python.use_sitepackages = expect_bool(py_value, &py_location)?
                    }
                    "use-faulthandler" => {
                        target.python.use_faulthandler = expect_bool(py_value, &py_location)?
                    }
                    _ => return Err(config_error(format!("invalid key '{}'", py_location))),
                }
            }
        }
        _ => return Ok(false),
    }

    Ok(true)
}

fn parse_recipe_options(value: &toml::Value) -> ConfigResult<RecipeOptions> {
    let mut options = RecipeOptions::default();

    for (key, value) in expect_table(value, "tool.py2app.recipe")? {
        let location = format!("tool.py2app.recipe.{}", key);
        match key.as_str() {
            "zip-unsafe" => options.zip_unsafe = expect_string_list(value, &location)?,
            "qt-plugins" => options.qt_plugins = Some(expect_string_list(value, &location)?),
            "matplotlib-backends" => {
                options.matplotlib_backends = Some(expect_string_list(value, &location)?)
            }
            _ => {
                return Err(config_error(format!("'{}' is not a valid key", location)));
            }
        }
    }

    Ok(options)
}

fn parse_plist_option(
    value: &toml::Value,
    config_root: &Path,
    location: &str,
) -> ConfigResult<plist::Dictionary> {
    match value {
        toml::Value::String(path) => {
            let path = config_root.join(path);
            if !path.is_file() {
                return Err(config_error(format!(
                    "'{}' cannot open {:?}",
                    location,
                    path.display().to_string()
                )));
            }

            apple_bundles::read_plist(&path)
                .map_err(|_| config_error(format!("'{}' invalid plist file", location)))
        }
        toml::Value::Table(_) => match toml_to_plist(value) {
            Some(plist::Value::Dictionary(dict)) => Ok(dict),
            _ => Err(config_error(format!("'{}' invalid plist contents", location))),
        },
        _ => Err(config_error(format!("'{}' is not a dict or string", location))),
    }
}

fn parse_bundle(
    key: &str,
    table: &toml::Table,
    config_root: &Path,
    inherited: &Inherited,
    defaults: &PlatformDefaults,
) -> ConfigResult<BundleOptions> {
    let prefix = format!("tool.py2app.bundle.{}", key);

    let script = match table.get("script") {
        Some(value) => config_root.join(expect_str(value, &format!("{}.script", prefix))?),
        None => return Err(config_error(format!("missing 'script' in '{}'", prefix))),
    };

    let mut bundle = BundleOptions::new(script, defaults);
    bundle.key = key.to_string();
    let mut local = inherited.clone();
    let mut extension = None;
    let mut chdir = None;

    for (option, value) in table {
        let location = format!("{}.{}", prefix, option);

        match option.as_str() {
            "script" => {}
            "name" => bundle.name = expect_str(value, &location)?.to_string(),
            "extension" => extension = Some(expect_str(value, &location)?.to_string()),
            "iconfile" => {
                bundle.iconfile = Some(config_root.join(expect_str(value, &location)?));
            }
            "plugin" => bundle.plugin = expect_bool(value, &location)?,
            "chdir" => chdir = Some(expect_bool(value, &location)?),
            "argv-emulator" => bundle.argv_emulator = expect_bool(value, &location)?,
            "emulate-shell-environment" => {
                bundle.emulate_shell_environment = expect_bool(value, &location)?
            }
            "redirect-to-asl" => bundle.redirect_to_asl = expect_bool(value, &location)?,
            "resources" => {
                let items = value
                    .as_array()
                    .ok_or_else(|| config_error(format!("'{}' is not a list", location)))?;
                bundle.resources = items
                    .iter()
                    .map(|item| Resource::from_config(item, config_root, &format!("'{}'", location)))
                    .collect::<ConfigResult<Vec<_>>>()?;
            }
            "plist" => bundle.plist = parse_plist_option(value, config_root, &location)?,
            "include" => bundle.py_include = expect_string_list(value, &location)?,
            "exclude" => bundle.py_exclude = expect_string_list(value, &location)?,
            "full-package" => bundle.py_full_package = expect_string_list(value, &location)?,
            "expected-missing-imports" => {
                bundle.expected_missing = expect_string_list(value, &location)?
            }
            "dylib-include" => bundle.macho_include = expect_string_list(value, &location)?,
            "dylib-exclude" => bundle.macho_exclude = expect_string_list(value, &location)?,
            "argv-inject" => bundle.argv_inject = expect_string_list(value, &location)?,
            "extra-scripts" => {
                bundle.extra_scripts = expect_string_list(value, &location)?
                    .into_iter()
                    .map(|s| config_root.join(s))
                    .collect();
            }
            _ => {
                if !parse_inherited(option, value, &prefix, &mut local)? {
                    return Err(config_error(format!("invalid key '{}'", location)));
                }
            }
        }
    }

    bundle.apply_inherited(&local);
    bundle.extension = extension.unwrap_or_else(|| {
        if bundle.plugin {
            ".plugin".to_string()
        } else {
            ".app".to_string()
        }
    });
    bundle.chdir = chdir.unwrap_or(!bundle.plugin);

    Ok(bundle)
}

impl Py2appConfiguration {
    /// Parse the content of a `pyproject.toml` file.
    pub fn from_pyproject(
        document: &toml::Table,
        config_root: &Path,
        defaults: &PlatformDefaults,
    ) -> ConfigResult<Self> {
        let config = document
            .get("tool")
            .and_then(|tool| tool.get("py2app"))
            .ok_or_else(|| config_error("Configuration doesn't contain a 'tool.py2app' key"))?;
        let config = expect_table(config, "tool.py2app")?;

        let mut inherited = Inherited {
            build_type: BuildType::Standalone,
            deployment_target: defaults.deployment_target.clone(),
            macho_strip: true,
            macho_arch: defaults.arch,
            python: PythonOptions::default(),
        };
        let mut recipe = RecipeOptions::default();

        for (key, value) in config {
            match key.as_str() {
                "bundle" => {}
                "recipe" => recipe = parse_recipe_options(value)?,
                _ => {
                    if !parse_inherited(key, value, "tool.py2app", &mut inherited)? {
                        return Err(config_error(format!("invalid key 'tool.py2app.{}'", key)));
                    }
                }
            }
        }

        let bundle_config = config
            .get("bundle")
            .ok_or_else(|| config_error("missing key: 'tool.py2app.bundle'"))?;
        let bundle_config = bundle_config
            .as_table()
            .filter(|t| t.values().all(|v| v.is_table()))
            .ok_or_else(|| config_error("'tool.py2app.bundle' is not a sequence of dicts"))?;

        if bundle_config.is_empty() {
            return Err(config_error("'tool.py2app.bundle' does not define any bundles"));
        }

        let mut bundles = vec![];
        let mut outputs: BTreeMap<String, String> = BTreeMap::new();

        for (key, value) in bundle_config {
            let table = expect_table(value, &format!("tool.py2app.bundle.{}", key))?;
            let bundle = parse_bundle(key, table, config_root, &inherited, defaults)?;

            if let Some(other) = outputs.insert(bundle.bundle_file_name(), key.clone()) {
                return Err(config_error(format!(
                    "'tool.py2app.bundle.{}' and 'tool.py2app.bundle.{}' both produce {}",
                    other,
                    key,
                    bundle.bundle_file_name()
                )));
            }

            bundles.push(bundle);
        }

        Ok(Self {
            config_root: config_root.to_path_buf(),
            recipe,
            bundles,
        })
    }

    /// Parse `pyproject.toml` from a string.
    pub fn from_pyproject_str(
        text: &str,
        config_root: &Path,
        defaults: &PlatformDefaults,
    ) -> ConfigResult<Self> {
        let document = toml::from_str::<toml::Table>(text)
            .map_err(|e| config_error(format!("invalid TOML: {}", e)))?;

        Self::from_pyproject(&document, config_root, defaults)
    }

    /// Load a `pyproject.toml` file.
    pub fn load(path: &Path, defaults: &PlatformDefaults) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Py2appError::missing_input(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config_root = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        Self::from_pyproject_str(&text, &config_root, defaults)
    }

    /// Force the build type of every bundle.
    pub fn override_build_type(&mut self, build_type: BuildType) {
        for bundle in &mut self.bundles {
            bundle.build_type = build_type;
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, indoc::indoc};

    fn defaults() -> PlatformDefaults {
        PlatformDefaults {
            arch: BuildArch::Arm64,
            deployment_target: "11.0".to_string(),
        }
    }

    fn parse(text: &str) -> ConfigResult<Py2appConfiguration> {
        Py2appConfiguration::from_pyproject_str(text, Path::new("/project"), &defaults())
    }

    fn parse_err(text: &str) -> String {
        match parse(text) {
            Ok(_) => panic!("configuration should be rejected"),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn minimal_bundle() -> ConfigResult<()> {
        let config = parse(indoc! {r#"
            [tool.py2app.bundle.main]
            script = "hello.py"
        "#})?;

        assert_eq!(config.bundles.len(), 1);
        let bundle = &config.bundles[0];
        assert_eq!(bundle.name, "hello");
        assert_eq!(bundle.script, PathBuf::from("/project/hello.py"));
        assert_eq!(bundle.extension, ".app");
        assert!(bundle.chdir);
        assert!(bundle.macho_strip);
        assert_eq!(bundle.build_type, BuildType::Standalone);
        assert_eq!(bundle.macho_arch, BuildArch::Arm64);
        assert_eq!(bundle.deployment_target, "11.0");
        assert_eq!(bundle.bundle_file_name(), "hello.app");

        Ok(())
    }

    #[test]
    fn inheritance_and_overrides() -> ConfigResult<()> {
        let config = parse(indoc! {r#"
            [tool.py2app]
            build-type = "alias"
            deployment-target = "12"
            strip = false
            arch = "universal2"
            python = { optimize = 2, verbose = true }

            [tool.py2app.recipe]
            zip-unsafe = ["foo"]
            qt-plugins = ["platforms"]

            [tool.py2app.bundle.first]
            script = "first.py"
            plugin = true
            extra-scripts = ["helper.py"]
            resources = ["data.txt", ["images", ["a.png", "b.png"]]]
            plist = { CFBundleVersion = "1.2", LSUIElement = true }

            [tool.py2app.bundle.second]
            script = "second.py"
            name = "Second"
            arch = "x86_64"
            strip = true
            python = { use-faulthandler = true }
        "#})?;

        assert_eq!(config.recipe.zip_unsafe, vec!["foo"]);
        assert_eq!(config.recipe.qt_plugins, Some(vec!["platforms".to_string()]));
        assert_eq!(config.recipe.matplotlib_backends, None);

        let first = &config.bundles[0];
        assert_eq!(first.key, "first");
        assert_eq!(first.build_type, BuildType::Alias);
        assert_eq!(first.deployment_target, "12");
        assert!(!first.macho_strip);
        assert_eq!(first.macho_arch, BuildArch::Universal2);
        assert_eq!(first.python.optimize, 2);
        assert!(first.python.verbose);
        assert_eq!(first.extension, ".plugin");
        assert!(!first.chdir);
        assert_eq!(first.extra_scripts, vec![PathBuf::from("/project/helper.py")]);
        assert_eq!(
            first.resources,
            vec![
                Resource::new(".", vec![PathBuf::from("/project/data.txt")]),
                Resource::new(
                    "images",
                    vec![
                        PathBuf::from("/project/a.png"),
                        PathBuf::from("/project/b.png")
                    ]
                ),
            ]
        );
        assert_eq!(
            first.plist.get("CFBundleVersion"),
            Some(&plist::Value::from("1.2"))
        );
        assert_eq!(
            first.plist.get("LSUIElement"),
            Some(&plist::Value::Boolean(true))
        );

        let second = &config.bundles[1];
        assert_eq!(second.name, "Second");
        assert_eq!(second.macho_arch, BuildArch::X86_64);
        assert!(second.macho_strip);
        // Local python tables replace individual keys only.
        assert_eq!(second.python.optimize, 2);
        assert!(second.python.use_faulthandler);

        Ok(())
    }

    #[test]
    fn declared_order_is_kept() -> ConfigResult<()> {
        let config = parse(indoc! {r#"
            [tool.py2app.bundle.zeta]
            script = "z.py"

            [tool.py2app.bundle.alpha]
            script = "a.py"
        "#})?;

        let keys = config.bundles.iter().map(|b| b.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["zeta", "alpha"]);

        Ok(())
    }

    #[test]
    fn errors_name_the_key() {
        assert_eq!(
            parse_err("[tool.other]\n"),
            "Configuration doesn't contain a 'tool.py2app' key"
        );
        assert_eq!(
            parse_err("[tool.py2app]\nstrip = true\n"),
            "missing key: 'tool.py2app.bundle'"
        );
        assert_eq!(
            parse_err("[tool.py2app]\nbogus = 1\n[tool.py2app.bundle.a]\nscript = \"a.py\"\n"),
            "invalid key 'tool.py2app.bogus'"
        );
        assert_eq!(
            parse_err("[tool.py2app]\ndeployment-target = \"11.a\"\n[tool.py2app.bundle.a]\nscript = \"a.py\"\n"),
            "'tool.py2app.deployment-target' is not valid"
        );
        assert_eq!(
            parse_err("[tool.py2app.bundle.main]\nscript = 42\n"),
            "'tool.py2app.bundle.main.script' is not a string"
        );
        assert_eq!(
            parse_err("[tool.py2app.bundle.main]\nname = \"x\"\n"),
            "missing 'script' in 'tool.py2app.bundle.main'"
        );
        assert_eq!(
            parse_err("[tool.py2app.bundle.main]\nscript = \"a.py\"\nplugin = \"yes\"\n"),
            "'tool.py2app.bundle.main.plugin' is not a boolean"
        );
        assert_eq!(
            parse_err("[tool.py2app.bundle.main]\nscript = \"a.py\"\narch = \"ppc\"\n"),
            "'tool.py2app.bundle.main.arch' has invalid value"
        );
        assert_eq!(
            parse_err("[tool.py2app.bundle.main]\nscript = \"a.py\"\npython = { optimize = \"2\" }\n"),
            "'tool.py2app.bundle.main.python.optimize' is not an integer"
        );
        assert_eq!(
            parse_err("[tool.py2app.recipe]\nzip-unsafe = [1]\n[tool.py2app.bundle.a]\nscript = \"a.py\"\n"),
            "'tool.py2app.recipe.zip-unsafe' is not a list of strings"
        );
        assert_eq!(
            parse_err("[tool.py2app.bundle.main]\nscript = \"a.py\"\nresources = [[\"dest\"]]\n"),
            "'tool.py2app.bundle.main.resources': invalid item [\"dest\"]"
        );
        assert_eq!(
            parse_err("[tool.py2app.bundle.main]\nscript = \"a.py\"\nunknown = 1\n"),
            "invalid key 'tool.py2app.bundle.main.unknown'"
        );
    }

    #[test]
    fn conflicting_outputs() {
        let message = parse_err(indoc! {r#"
            [tool.py2app.bundle.a]
            script = "x/hello.py"

            [tool.py2app.bundle.b]
            script = "y/hello.py"
        "#});
        assert!(message.contains("both produce hello.app"), "{}", message);
    }

    #[test]
    fn plist_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let td = tempfile::TempDir::new()?;
        let mut dict = plist::Dictionary::new();
        dict.insert("CFBundleIdentifier".into(), "com.example.hello".into());
        apple_bundles::write_plist(&td.path().join("Info.plist"), &dict)?;
        std::fs::write(td.path().join("broken.plist"), b"not a plist")?;

        let config = Py2appConfiguration::from_pyproject_str(
            "[tool.py2app.bundle.main]\nscript = \"hello.py\"\nplist = \"Info.plist\"\n",
            td.path(),
            &defaults(),
        )?;
        assert_eq!(
            config.bundles[0].plist.get("CFBundleIdentifier"),
            Some(&plist::Value::from("com.example.hello"))
        );

        let err = Py2appConfiguration::from_pyproject_str(
            "[tool.py2app.bundle.main]\nscript = \"hello.py\"\nplist = \"broken.plist\"\n",
            td.path(),
            &defaults(),
        );
        assert!(matches!(err, Err(Py2appError::Configuration(m)) if m.ends_with("invalid plist file")));

        Ok(())
    }

    #[test]
    fn build_type_override() -> ConfigResult<()> {
        let mut config = parse("[tool.py2app.bundle.main]\nscript = \"a.py\"\n")?;
        config.override_build_type(BuildType::Alias);
        assert_eq!(config.bundles[0].build_type, BuildType::Alias);

        Ok(())
    }
}
