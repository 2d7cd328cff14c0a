// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The `Info.plist` of a Python bundle.

On top of the generic defaults from `apple-bundles`, a Python bundle
describes the interpreter it was built with (`PythonInfoDict`), the
runtime options the launcher reads (`PyOptions`) and where to find the
interpreter (`PyRuntimeLocations`). The user's dictionary is layered over
all of that.
*/

use {
    crate::{
        config::{BuildType, BundleOptions},
        environment::PY2APP_VERSION,
    },
    anyhow::{Context, Result},
    apple_bundles::{
        application_defaults, create_bundle_skeleton, merge_plist, pkg_info, plugin_defaults,
        write_plist, BundlePaths,
    },
    plist::{Dictionary, Value},
    python_packaging::interpreter::PythonInterpreterInfo,
    std::path::Path,
};

/// Runtime options read by the launcher and the bootstrap code.
pub fn py_options(bundle: &BundleOptions) -> Dictionary {
    let mut d = Dictionary::new();

    d.insert("alias".into(), (bundle.build_type == BuildType::Alias).into());
    d.insert("argv_emulation".into(), bundle.argv_emulator.into());
    d.insert(
        "emulate_shell_environment".into(),
        bundle.emulate_shell_environment.into(),
    );
    d.insert("no_chdir".into(), (!bundle.chdir).into());
    d.insert("optimize".into(), Value::Integer(bundle.python.optimize.into()));
    d.insert("site_packages".into(), bundle.python.use_sitepackages.into());
    d.insert("use_pythonpath".into(), bundle.python.use_pythonpath.into());
    d.insert("verbose".into(), bundle.python.verbose.into());
    d.insert("use_faulthandler".into(), bundle.python.use_faulthandler.into());
    d.insert("redirect_to_asl".into(), bundle.redirect_to_asl.into());

    d
}

/// Description of the interpreter and the tool that built the bundle.
pub fn python_info(bundle: &BundleOptions, info: &PythonInterpreterInfo) -> Dictionary {
    let mut py2app = Dictionary::new();
    py2app.insert("version".into(), PY2APP_VERSION.into());
    py2app.insert(
        "template".into(),
        if bundle.plugin { "bundle" } else { "app" }.into(),
    );
    py2app.insert("alias".into(), (bundle.build_type == BuildType::Alias).into());

    let mut d = Dictionary::new();
    d.insert(
        "PythonExecutable".into(),
        info.executable.display().to_string().into(),
    );
    d.insert("PythonLongVersion".into(), info.long_version.clone().into());
    d.insert("PythonShortVersion".into(), info.version.short().into());
    d.insert("py2app".into(), Value::Dictionary(py2app));

    d
}

/// Document types registered for applications using argv emulation.
fn default_document_types() -> Value {
    let mut entry = Dictionary::new();
    entry.insert(
        "CFBundleTypeOSTypes".into(),
        Value::Array(vec!["****".into(), "fold".into(), "disk".into()]),
    );
    entry.insert("CFBundleTypeRole".into(), "Viewer".into());

    Value::Array(vec![Value::Dictionary(entry)])
}

/// The complete `Info.plist` of a bundle.
///
/// `icon_file` is the name of the icon in `Contents/Resources`.
pub fn info_plist(
    bundle: &BundleOptions,
    info: &PythonInterpreterInfo,
    runtime_locations: &[String],
    icon_file: Option<&str>,
) -> Dictionary {
    let mut base = if bundle.plugin {
        plugin_defaults(&bundle.name, &bundle.deployment_target)
    } else {
        application_defaults(&bundle.name, &bundle.deployment_target)
    };

    if let Some(icon) = icon_file {
        base.insert("CFBundleIconFile".into(), icon.into());
    }

    base.insert(
        "PyMainFileNames".into(),
        Value::Array(vec!["__boot__".into()]),
    );
    base.insert("PyResourcePackages".into(), Value::Array(vec![]));
    base.insert(
        "PyRuntimeLocations".into(),
        Value::Array(runtime_locations.iter().map(|s| s.as_str().into()).collect()),
    );
    base.insert("PythonInfoDict".into(), Value::Dictionary(python_info(bundle, info)));
    base.insert("PyOptions".into(), Value::Dictionary(py_options(bundle)));

    let mut plist = merge_plist(&base, &bundle.plist);

    if bundle.argv_emulator && !bundle.plugin && !plist.contains_key("CFBundleDocumentTypes") {
        plist.insert("CFBundleDocumentTypes".into(), default_document_types());
    }

    plist
}

/// Create an empty bundle in `dest_dir` and return its layout.
pub fn create_bundle(
    dest_dir: &Path,
    bundle: &BundleOptions,
    python_version: &str,
    plist: &Dictionary,
) -> Result<BundlePaths> {
    let root = create_bundle_skeleton(dest_dir, &bundle.name, &bundle.extension, plist)?;
    let paths = BundlePaths::new(&root, python_version);

    for dir in paths.all_directories() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    Ok(paths)
}

/// Write `Info.plist` and `PkgInfo`.
pub fn write_info_plist(paths: &BundlePaths, plist: &Dictionary) -> Result<()> {
    write_plist(&paths.root.join("Info.plist"), plist)?;

    let pkg_info_path = paths.root.join("PkgInfo");
    std::fs::write(&pkg_info_path, pkg_info(plist)?)
        .with_context(|| format!("writing {}", pkg_info_path.display()))?;

    Ok(())
}
