// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Ad-hoc code signing.

Rewriting load commands and stripping invalidate existing signatures, and
arm64 machines refuse to load unsigned code. Files are signed deepest
first and the bundle itself last. `codesign` fails when a file links to
something that isn't signed yet, so failures are retried after the rest of
the files went through.
*/

use {
    crate::{
        environment::host_is_arm64, error::Py2appError, progress::Progress,
        standalone::macho_files, tools,
    },
    anyhow::Result,
    apple_macho::{CpuArch, MachOFile},
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Attempts for signing the bundle root.
const ROOT_ATTEMPTS: usize = 5;

/// Signs a single file or bundle.
pub trait CodeSigner {
    fn sign(&mut self, path: &Path) -> Result<(), Py2appError>;
}

/// Signs with `codesign -s -`, keeping existing metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct AdhocSigner;

impl CodeSigner for AdhocSigner {
    fn sign(&mut self, path: &Path) -> Result<(), Py2appError> {
        tools::run_program(
            Path::new("/usr/bin/codesign"),
            [
                "-s".into(),
                "-".into(),
                "-f".into(),
                "--preserve-metadata=identifier,entitlements,flags,runtime".into(),
                path.as_os_str().to_os_string(),
            ],
        )
    }
}

/// Whether the bundle has to be signed to be usable.
///
/// That is the case when any Mach-O file has an arm64 slice or when
/// building on arm64.
pub fn needs_signature(files: &[PathBuf]) -> Result<bool> {
    if host_is_arm64() {
        return Ok(true);
    }

    for path in files {
        if let Some(macho) = MachOFile::from_path(path)? {
            if macho.archs().contains(&CpuArch::Arm64) {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

/// Order in which files are signed: deepest paths first.
pub fn signing_order(mut files: Vec<PathBuf>) -> Vec<PathBuf> {
    files.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| a.cmp(b))
    });
    files
}

/// Sign every Mach-O file in a bundle and then the bundle.
pub fn sign_bundle(
    bundle_root: &Path,
    signer: &mut dyn CodeSigner,
    backoff: Duration,
    progress: &mut dyn Progress,
) -> Result<()> {
    let mut pending = signing_order(macho_files(bundle_root)?);
    let task = progress.add_task("Signing code", Some(pending.len() + 1));

    while !pending.is_empty() {
        let mut failed = vec![];

        for path in &pending {
            progress.trace(&format!("Signing {}", path.display()));
            match signer.sign(path) {
                Ok(()) => progress.step_task(task),
                Err(e) => {
                    progress.info(&format!("Signing {} failed: {}", path.display(), e));
                    failed.push(path.clone());
                }
            }
        }

        if failed.len() == pending.len() {
            return Err(Py2appError::ExternalTool {
                tool: "codesign".to_string(),
                message: format!(
                    "cannot sign {} in {}",
                    failed
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                    bundle_root.display()
                ),
            }
            .into());
        }

        pending = failed;
    }

    let mut last_error = None;
    for attempt in 0..ROOT_ATTEMPTS {
        if attempt > 0 {
            std::thread::sleep(backoff);
        }

        progress.info(&format!("Signing {}", bundle_root.display()));
        match signer.sign(bundle_root) {
            Ok(()) => {
                last_error = None;
                break;
            }
            Err(e) => {
                progress.warning(&format!("Signing {} failed", bundle_root.display()));
                last_error = Some(e);
            }
        }
    }

    if let Some(e) = last_error {
        return Err(e.into());
    }

    progress.step_task(task);
    progress.task_done(task);

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::progress::RecordingProgress,
        apple_macho::testutil::MachOBuilder,
        std::collections::BTreeMap,
    };

    /// Fails each path a configured number of times.
    #[derive(Default)]
    struct FlakySigner {
        failures: BTreeMap<PathBuf, usize>,
        signed: Vec<PathBuf>,
    }

    impl CodeSigner for FlakySigner {
        fn sign(&mut self, path: &Path) -> Result<(), Py2appError> {
            if let Some(count) = self.failures.get_mut(path) {
                if *count > 0 {
                    *count -= 1;
                    return Err(Py2appError::ExternalTool {
                        tool: "codesign".to_string(),
                        message: "failed".to_string(),
                    });
                }
            }
            self.signed.push(path.to_path_buf());
            Ok(())
        }
    }

    fn sample_bundle(root: &Path) -> Result<Vec<PathBuf>> {
        let files = vec![
            root.join("Contents/MacOS/hello"),
            root.join("Contents/Frameworks/libpython3.12.dylib"),
            root.join("Contents/Resources/lib/python3.12/lib-dynload/_ssl.so"),
        ];
        for path in &files {
            std::fs::create_dir_all(path.parent().expect("parent"))?;
            std::fs::write(path, MachOBuilder::new(CpuArch::Arm64).build())?;
        }
        std::fs::write(root.join("Contents/Info.plist"), b"<plist/>")?;

        Ok(files)
    }

    #[test]
    fn order() {
        let files = signing_order(vec![
            PathBuf::from("/b/Contents/MacOS/hello"),
            PathBuf::from("/b/Contents/Resources/lib/python3.12/lib-dynload/_ssl.so"),
            PathBuf::from("/b/Contents/Frameworks/libpython3.12.dylib"),
        ]);

        assert_eq!(
            files,
            vec![
                PathBuf::from("/b/Contents/Resources/lib/python3.12/lib-dynload/_ssl.so"),
                PathBuf::from("/b/Contents/Frameworks/libpython3.12.dylib"),
                PathBuf::from("/b/Contents/MacOS/hello"),
            ]
        );
    }

    #[test]
    fn retries_failures() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let root = td.path().join("hello.app");
        let files = sample_bundle(&root)?;

        let mut signer = FlakySigner::default();
        signer.failures.insert(files[0].clone(), 1);
        signer.failures.insert(root.clone(), 2);

        let mut progress = RecordingProgress::default();
        sign_bundle(&root, &mut signer, Duration::from_millis(0), &mut progress)?;

        assert_eq!(signer.signed.len(), 4);
        assert_eq!(signer.signed.last(), Some(&root));
        assert_eq!(signer.signed[2], files[0]);
        assert!(progress.finished.contains(&"Signing code".to_string()));

        Ok(())
    }

    #[test]
    fn gives_up() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let root = td.path().join("hello.app");
        let files = sample_bundle(&root)?;

        let mut signer = FlakySigner::default();
        signer.failures.insert(files[1].clone(), usize::MAX);
        let mut progress = RecordingProgress::default();
        assert!(sign_bundle(&root, &mut signer, Duration::from_millis(0), &mut progress).is_err());

        let mut signer = FlakySigner::default();
        signer.failures.insert(root.clone(), ROOT_ATTEMPTS);
        let mut progress = RecordingProgress::default();
        assert!(sign_bundle(&root, &mut signer, Duration::from_millis(0), &mut progress).is_err());
        assert_eq!(
            progress.messages(crate::progress::MessageLevel::Warning).len(),
            ROOT_ATTEMPTS
        );

        Ok(())
    }

    #[test]
    fn arm64_needs_signature() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let root = td.path().join("hello.app");
        let files = sample_bundle(&root)?;

        assert!(needs_signature(&files)?);

        Ok(())
    }
}
