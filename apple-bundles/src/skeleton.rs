// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Creating empty bundle directories.

use {
    crate::{info_plist::pkg_info, write_plist},
    anyhow::{Context, Result},
    log::debug,
    std::path::{Path, PathBuf},
};

/// Remove a file, symlink or directory tree if it exists.
pub fn remove_existing(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Ok(metadata) if metadata.is_dir() => {
            debug!("removing {}", path.display());
            remove_dir_all::remove_dir_all(path)
                .with_context(|| format!("removing {}", path.display()))
        }
        Ok(_) => std::fs::remove_file(path).with_context(|| format!("removing {}", path.display())),
        Err(_) => Ok(()),
    }
}

/// Create the directory skeleton of a bundle.
///
/// `<dest_dir>/<name><extension>` is removed if it exists, then recreated
/// with `Contents/MacOS`, `Contents/Resources`, `Contents/Info.plist` and
/// `Contents/PkgInfo`. Returns the bundle directory.
pub fn create_bundle_skeleton(
    dest_dir: &Path,
    name: &str,
    extension: &str,
    info_plist: &plist::Dictionary,
) -> Result<PathBuf> {
    let bundle = dest_dir.join(format!("{}{}", name, extension));
    remove_existing(&bundle)?;

    let contents = bundle.join("Contents");
    for dir in [contents.join("MacOS"), contents.join("Resources")] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    write_plist(&contents.join("Info.plist"), info_plist)?;

    let pkg_info_path = contents.join("PkgInfo");
    std::fs::write(&pkg_info_path, pkg_info(info_plist)?)
        .with_context(|| format!("writing {}", pkg_info_path.display()))?;

    Ok(bundle)
}
