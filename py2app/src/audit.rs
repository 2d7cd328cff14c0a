// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Inspecting a finished bundle for portability problems.

The audit never modifies the bundle. It reports the architecture shared by
all Mach-O files, the deployment target needed to run all of them and
warnings about references that won't resolve on another machine.
*/

use {
    crate::standalone::macho_files,
    anyhow::Result,
    apple_macho::{CpuArch, LoadContext, MachOFile, MachOSlice, MachOVersion},
    std::{
        collections::BTreeSet,
        path::{Path, PathBuf},
    },
};

/// Assumed deployment target of an arm64 slice without one.
pub const ARM64_DEFAULT_TARGET: MachOVersion = MachOVersion {
    major: 11,
    minor: 0,
    patch: 0,
};

/// Assumed deployment target of an x86_64 slice without one.
pub const X86_64_DEFAULT_TARGET: MachOVersion = MachOVersion {
    major: 10,
    minor: 9,
    patch: 0,
};

/// Architectures shared by the Mach-O files of a bundle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BundleArchitecture {
    /// Every file has both an arm64 and an x86_64 slice.
    Universal2,
    Arm64,
    X86_64,
    /// Some files only run on arm64 and others only on x86_64.
    Mixed,
}

impl std::fmt::Display for BundleArchitecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Universal2 => "universal2",
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
            Self::Mixed => "mixed",
        })
    }
}

/// Result of [audit_bundle].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuditReport {
    pub architecture: BundleArchitecture,
    /// `None` for [BundleArchitecture::Mixed].
    pub deployment_target: Option<MachOVersion>,
    /// Sorted and without duplicates.
    pub warnings: Vec<String>,
}

struct Auditor<'a> {
    bundle_root: &'a Path,
    arm64_target: MachOVersion,
    x86_64_target: MachOVersion,
    warnings: BTreeSet<String>,
}

impl<'a> Auditor<'a> {
    fn check_slice(&mut self, path: &Path, slice: &MachOSlice) {
        let target = match slice.arch {
            CpuArch::Arm64 => &mut self.arm64_target,
            CpuArch::X86_64 => &mut self.x86_64_target,
            CpuArch::Other(_) => return,
        };

        match slice.min_os {
            Some(v) => *target = (*target).max(v),
            None => {
                self.warnings
                    .insert(format!("no deployment target in {}", path.display()));
            }
        }

        let loader_dir = path.parent().unwrap_or(self.bundle_root);
        let executable_dir = self.bundle_root.join("Contents").join("MacOS");

        let mut rpaths = vec![self
            .bundle_root
            .join("Contents")
            .join("Frameworks")
            .display()
            .to_string()];
        for rpath in &slice.rpaths {
            if rpath.starts_with('/') {
                self.warnings.insert(format!(
                    "{:?} has an absolute RPATH entry {:?}",
                    path.display().to_string(),
                    rpath
                ));
            }
            rpaths.push(rpath.clone());
        }

        let context = LoadContext {
            loader_dir,
            executable_dir: &executable_dir,
            rpaths: &rpaths,
        };

        for dylib in &slice.dylibs {
            let name = dylib.name.as_str();
            let quoted_path = path.display().to_string();

            if !name.starts_with('@') {
                if !name.starts_with("/usr/lib") && !name.starts_with("/System/Library/Frameworks") {
                    self.warnings.insert(format!(
                        "{:?} links to library {:?} outside of system locations",
                        quoted_path, name
                    ));
                }
            } else if name.starts_with("@loader_path/") {
                if context.resolve(name).is_none() {
                    let candidates = context.candidates(name);
                    let missing = candidates
                        .first()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    self.warnings.insert(format!(
                        "{:?} links to library {:?} that doesn't exist at {:?}",
                        quoted_path, name, missing
                    ));
                }
            } else if name.starts_with("@rpath/") {
                if context.resolve(name).is_none() {
                    let mut searched = rpaths.clone();
                    searched.sort();
                    self.warnings.insert(format!(
                        "{:?} links to library {:?} that doesn't exist on rpath: {}",
                        quoted_path,
                        name,
                        searched.join(", ")
                    ));
                }
            } else if name.starts_with("@executable_path/") {
                if context.resolve(name).is_none() {
                    let missing = context
                        .candidates(name)
                        .first()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    self.warnings.insert(format!(
                        "{:?} uses {:?} to link to non-existing {:?}",
                        quoted_path, name, missing
                    ));
                }
            } else {
                self.warnings.insert(format!(
                    "{:?}: unhandled special path in link command: {}",
                    quoted_path, name
                ));
            }
        }
    }
}

fn merge_architecture(current: BundleArchitecture, archs: &[CpuArch]) -> BundleArchitecture {
    let arm64 = archs.contains(&CpuArch::Arm64);
    let x86_64 = archs.contains(&CpuArch::X86_64);

    match (arm64, x86_64, current) {
        (true, true, current) | (false, false, current) => current,
        (true, false, BundleArchitecture::Universal2 | BundleArchitecture::Arm64) => {
            BundleArchitecture::Arm64
        }
        (false, true, BundleArchitecture::Universal2 | BundleArchitecture::X86_64) => {
            BundleArchitecture::X86_64
        }
        _ => BundleArchitecture::Mixed,
    }
}

/// Audit the Mach-O files of a bundle.
///
/// `bundle_root` is the `.app` or `.plugin` directory. Symlinks are not
/// followed, so files are inspected once.
pub fn audit_bundle(bundle_root: &Path) -> Result<AuditReport> {
    let mut auditor = Auditor {
        bundle_root,
        arm64_target: ARM64_DEFAULT_TARGET,
        x86_64_target: X86_64_DEFAULT_TARGET,
        warnings: BTreeSet::new(),
    };
    let mut architecture = BundleArchitecture::Universal2;

    let files: Vec<PathBuf> = macho_files(bundle_root)?;
    for path in files {
        let macho = match MachOFile::from_path(&path)? {
            Some(m) => m,
            None => continue,
        };

        for slice in &macho.slices {
            auditor.check_slice(&path, slice);
        }

        architecture = merge_architecture(architecture, &macho.archs());
    }

    let deployment_target = match architecture {
        BundleArchitecture::Universal2 => {
            let target = auditor.arm64_target.min(auditor.x86_64_target);
            if target < ARM64_DEFAULT_TARGET && auditor.arm64_target > ARM64_DEFAULT_TARGET {
                auditor.warnings.insert(format!(
                    "Deployment target less than 11.0, but arm64 targets {}",
                    auditor.arm64_target
                ));
            }
            Some(target)
        }
        BundleArchitecture::Arm64 => Some(auditor.arm64_target),
        BundleArchitecture::X86_64 => Some(auditor.x86_64_target),
        BundleArchitecture::Mixed => None,
    };

    Ok(AuditReport {
        architecture,
        deployment_target,
        warnings: auditor.warnings.into_iter().collect(),
    })
}
