// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Info.plist` handling.

Only the keys every bundle needs live here. Callers add their own keys on
top of [application_defaults] or [plugin_defaults] and then layer the
user's dictionary over the result with [merge_plist].
*/

use {
    crate::BundlePackageType,
    anyhow::{anyhow, Context, Result},
    std::path::Path,
};

/// Creator code used when a bundle does not declare one.
pub const DEFAULT_SIGNATURE: &str = "????";

fn common_defaults(
    name: &str,
    package_type: BundlePackageType,
    deployment_target: &str,
) -> plist::Dictionary {
    let mut d = plist::Dictionary::new();

    d.insert("CFBundleDevelopmentRegion".into(), "English".into());
    d.insert("CFBundleDisplayName".into(), name.into());
    d.insert("CFBundleExecutable".into(), name.into());
    d.insert(
        "CFBundleIdentifier".into(),
        format!("org.pythonmac.unspecified.{}", name).into(),
    );
    d.insert("CFBundleInfoDictionaryVersion".into(), "6.0".into());
    d.insert("CFBundleName".into(), name.into());
    d.insert("CFBundlePackageType".into(), package_type.code().into());
    d.insert("CFBundleShortVersionString".into(), "0.0".into());
    d.insert("CFBundleSignature".into(), DEFAULT_SIGNATURE.into());
    d.insert("CFBundleVersion".into(), "0.0".into());
    d.insert("LSHasLocalizedDisplayName".into(), false.into());
    d.insert("LSMinimumSystemVersion".into(), deployment_target.into());
    d.insert("NSAppleScriptEnabled".into(), false.into());
    d.insert(
        "NSHumanReadableCopyright".into(),
        "Copyright not specified".into(),
    );

    d
}

/// Default `Info.plist` of an application bundle.
pub fn application_defaults(name: &str, deployment_target: &str) -> plist::Dictionary {
    let mut d = common_defaults(name, BundlePackageType::App, deployment_target);
    d.insert("NSMainNibFile".into(), "MainMenu".into());
    d.insert("NSPrincipalClass".into(), "NSApplication".into());

    d
}

/// Default `Info.plist` of a loadable (plug-in) bundle.
pub fn plugin_defaults(name: &str, deployment_target: &str) -> plist::Dictionary {
    common_defaults(name, BundlePackageType::Bundle, deployment_target)
}

/// Merge `overrides` over `base`. Top-level keys of `overrides` replace those of `base`.
pub fn merge_plist(base: &plist::Dictionary, overrides: &plist::Dictionary) -> plist::Dictionary {
    let mut res = base.clone();

    for (k, v) in overrides {
        res.insert(k.clone(), v.clone());
    }

    res
}

/// Read a plist file whose root is a dictionary. Binary and XML formats are accepted.
pub fn read_plist(path: &Path) -> Result<plist::Dictionary> {
    let value = plist::Value::from_file(path)
        .with_context(|| format!("parsing plist {}", path.display()))?;

    value
        .into_dictionary()
        .ok_or_else(|| anyhow!("{} is not a dictionary", path.display()))
}

/// Write a dictionary as an XML plist.
pub fn write_plist(path: &Path, dict: &plist::Dictionary) -> Result<()> {
    plist::Value::Dictionary(dict.clone())
        .to_file_xml(path)
        .with_context(|| format!("writing plist {}", path.display()))
}

/// Obtain a string value from a plist dictionary.
pub fn plist_string<'a>(dict: &'a plist::Dictionary, key: &str) -> Result<Option<&'a str>> {
    match dict.get(key) {
        Some(value) => Ok(Some(
            value
                .as_string()
                .ok_or_else(|| anyhow!("key {} is not a string", key))?,
        )),
        None => Ok(None),
    }
}

/// Content of the `PkgInfo` file: package type followed by the signature.
pub fn pkg_info(dict: &plist::Dictionary) -> Result<Vec<u8>> {
    let package_type = plist_string(dict, "CFBundlePackageType")?
        .ok_or_else(|| anyhow!("CFBundlePackageType not defined"))?;
    let signature = plist_string(dict, "CFBundleSignature")?.unwrap_or(DEFAULT_SIGNATURE);

    let res = format!("{}{}", package_type, signature);
    if res.len() != 8 {
        return Err(anyhow!(
            "package type and signature must be 4 characters each; got {:?}",
            res
        ));
    }

    Ok(res.into_bytes())
}
