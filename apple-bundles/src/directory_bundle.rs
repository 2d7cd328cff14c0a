// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reading bundles that exist on disk.

use {
    crate::{info_plist::plist_string, read_plist, BundlePackageType},
    anyhow::{anyhow, Result},
    std::path::Path,
};

/// A bundle materialized as a directory.
#[derive(Clone, Debug)]
pub struct DirectoryBundle {
    package_type: BundlePackageType,
    info_plist: plist::Dictionary,
}

impl DirectoryBundle {
    /// Open the bundle rooted at `directory`.
    ///
    /// The bundle's `Info.plist` lives in `Contents/` for deep bundles and in
    /// the root for shallow ones.
    pub fn new_from_path(directory: &Path) -> Result<Self> {
        if !directory.is_dir() {
            return Err(anyhow!("{} is not a directory", directory.display()));
        }

        let contents = directory.join("Contents");
        let plist_path = if contents.is_dir() {
            contents.join("Info.plist")
        } else {
            directory.join("Info.plist")
        };

        if !plist_path.is_file() {
            return Err(anyhow!(
                "{}: Info.plist not found; not a bundle",
                directory.display()
            ));
        }

        let package_type = match directory.extension().and_then(|e| e.to_str()) {
            Some("app") => BundlePackageType::App,
            Some("framework") => BundlePackageType::Framework,
            _ => BundlePackageType::Bundle,
        };

        Ok(Self {
            package_type,
            info_plist: read_plist(&plist_path)?,
        })
    }

    pub fn package_type(&self) -> BundlePackageType {
        self.package_type
    }

    pub fn info_plist(&self) -> &plist::Dictionary {
        &self.info_plist
    }

    /// `CFBundleExecutable`.
    pub fn main_executable(&self) -> Result<Option<String>> {
        Ok(plist_string(&self.info_plist, "CFBundleExecutable")?.map(|s| s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::fs::create_dir_all};

    fn write_plist(path: &Path, dict: plist::Dictionary) -> Result<()> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        plist::Value::Dictionary(dict).to_file_xml(path)?;
        Ok(())
    }

    #[test]
    fn detection() -> Result<()> {
        let td = tempfile::TempDir::new()?;

        let root = td.path().join("Plain.app");
        create_dir_all(root.join("Contents"))?;
        assert!(DirectoryBundle::new_from_path(&root).is_err());

        std::fs::write(root.join("Contents/Info.plist"), b"")?;
        assert!(DirectoryBundle::new_from_path(&root).is_err());

        write_plist(&root.join("Contents/Info.plist"), plist::Dictionary::new())?;
        let bundle = DirectoryBundle::new_from_path(&root)?;
        assert_eq!(bundle.package_type(), BundlePackageType::App);
        assert_eq!(bundle.main_executable()?, None);

        let mut dict = plist::Dictionary::new();
        dict.insert("CFBundleExecutable".into(), "thing".into());
        let plugin = td.path().join("Thing.plugin");
        write_plist(&plugin.join("Contents/Info.plist"), dict)?;
        let plugin = DirectoryBundle::new_from_path(&plugin)?;
        assert_eq!(plugin.package_type(), BundlePackageType::Bundle);
        assert_eq!(plugin.main_executable()?.as_deref(), Some("thing"));

        let shallow = td.path().join("Shallow.bundle");
        write_plist(&shallow.join("Info.plist"), plist::Dictionary::new())?;
        assert!(DirectoryBundle::new_from_path(&shallow)?.info_plist().is_empty());

        Ok(())
    }
}
