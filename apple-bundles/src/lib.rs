// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! macOS bundle primitives.

This crate knows how bundles are laid out on disk. It can create the
skeleton of an application or plug-in bundle, produce and merge
`Info.plist` content and read existing bundles back.

See <https://developer.apple.com/library/archive/documentation/CoreFoundation/Conceptual/CFBundles/BundleTypes/BundleTypes.html>
for Apple's description of the format.
*/

mod bundle_paths;
pub use bundle_paths::*;
mod directory_bundle;
pub use directory_bundle::*;
mod info_plist;
pub use info_plist::*;
mod skeleton;
pub use skeleton::*;

/// Denotes the type of a bundle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BundlePackageType {
    /// Application bundle.
    App,
    /// Framework bundle.
    Framework,
    /// Generic loadable bundle (plug-ins).
    Bundle,
}

impl BundlePackageType {
    /// The 4 character code stored in `CFBundlePackageType`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::App => "APPL",
            Self::Framework => "FMWK",
            Self::Bundle => "BNDL",
        }
    }
}

impl std::fmt::Display for BundlePackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}
