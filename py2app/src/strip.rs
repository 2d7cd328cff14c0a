// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Removing debug information from a bundle.

use {
    crate::{progress::Progress, standalone::macho_files, tools},
    anyhow::{Context, Result},
    std::path::{Path, PathBuf},
};

/// `.dSYM` directories below `root`.
pub fn dsym_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut res = vec![];

    let mut walker = walkdir::WalkDir::new(root).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        if entry.file_type().is_dir() && entry.file_name().to_string_lossy().ends_with(".dSYM") {
            res.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }

    Ok(res)
}

/// Strip local symbols and debug info from every Mach-O file and drop `.dSYM` directories.
pub fn strip_bundle(bundle_root: &Path, progress: &mut dyn Progress) -> Result<Vec<PathBuf>> {
    for dsym in dsym_dirs(bundle_root)? {
        progress.trace(&format!("Removing {}", dsym.display()));
        remove_dir_all::remove_dir_all(&dsym)
            .with_context(|| format!("removing {}", dsym.display()))?;
    }

    let files = macho_files(bundle_root)?;
    if files.is_empty() {
        return Ok(files);
    }

    let strip = tools::locate_tool("strip")?;
    let task = progress.add_task("Stripping binaries", Some(files.len()));
    for path in &files {
        progress.trace(&format!("Stripping {}", path.display()));
        tools::run_program(
            &strip,
            [
                "-x".into(),
                "-S".into(),
                "-".into(),
                path.as_os_str().to_os_string(),
            ],
        )?;
        progress.step_task(task);
    }
    progress.task_done(task);

    Ok(files)
}

#[cfg(test)]
mod tests {
    use {super::*, crate::progress::RecordingProgress};

    #[test]
    fn removes_dsym() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let root = td.path().join("hello.app");
        let dsym = root.join("Contents/Resources/lib/python3.12/lib-dynload/_ssl.so.dSYM");
        std::fs::create_dir_all(dsym.join("Contents/Resources/DWARF"))?;
        std::fs::write(dsym.join("Contents/Resources/DWARF/_ssl.so"), b"dwarf")?;
        std::fs::write(root.join("Contents/Info.plist"), b"<plist/>")?;

        assert_eq!(dsym_dirs(&root)?, vec![dsym.clone()]);

        let mut progress = RecordingProgress::default();
        let stripped = strip_bundle(&root, &mut progress)?;

        assert!(stripped.is_empty());
        assert!(!dsym.exists());
        assert!(root.join("Contents/Info.plist").exists());

        Ok(())
    }
}
