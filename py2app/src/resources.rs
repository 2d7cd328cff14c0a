// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Copying resources into a bundle.

Resources come from the bundle configuration and from recipes. Each
[Resource] names a destination below `Contents/Resources` and a list of
sources. Sources with a suffix handled by a converter (Interface Builder
and Core Data files) are compiled; everything else is copied, or
symlinked for alias builds.
*/

use {
    crate::{config::Resource, error::Py2appError, progress::Progress, tools},
    anyhow::{anyhow, Context, Result},
    log::{debug, trace},
    simple_file_manifest::{FileEntry, FileManifest},
    std::{
        collections::BTreeMap,
        path::{Component, Path, PathBuf},
    },
};

/// Version control directories and editor or Finder litter, never copied
/// out of resource or package directories.
pub const IGNORED_PATTERNS: &[&str] = &[
    "CVS",
    ".svn",
    ".hg",
    ".git",
    ".DS_Store",
    ".gdb_history",
    "*.pbxuser",
    "*.swp",
];

/// Compiles `source` into `destination`.
pub type ConvertFn = fn(&Path, &Path) -> Result<(), Py2appError>;

/// A resource compiler for one source suffix.
#[derive(Clone, Debug)]
pub struct Converter {
    /// Suffix of the files produced, including the dot.
    pub output_suffix: String,
    pub convert: ConvertFn,
}

fn ibtool(source: &Path, destination: &Path) -> Result<(), Py2appError> {
    tools::run_tool(
        "ibtool",
        [
            "--compile".into(),
            destination.as_os_str().to_os_string(),
            source.as_os_str().to_os_string(),
        ],
    )
}

fn momc(source: &Path, destination: &Path) -> Result<(), Py2appError> {
    tools::run_tool("momc", [source.as_os_str(), destination.as_os_str()])
}

fn mapc(source: &Path, destination: &Path) -> Result<(), Py2appError> {
    tools::run_tool("mapc", [source.as_os_str(), destination.as_os_str()])
}

/// Converters keyed by the source suffix they handle.
#[derive(Clone, Debug, Default)]
pub struct ConverterRegistry {
    converters: BTreeMap<String, Converter>,
}

impl ConverterRegistry {
    /// A registry with the Xcode based converters.
    pub fn with_builtin_converters() -> Self {
        let mut registry = Self::default();
        registry.register(".xib", ".nib", ibtool);
        registry.register(".nib", ".nib", ibtool);
        registry.register(".xcdatamodel", ".mom", momc);
        registry.register(".xcmappingmodel", ".cdm", mapc);
        registry
    }

    /// Register a converter, replacing any existing one for `suffix`.
    pub fn register(&mut self, suffix: &str, output_suffix: &str, convert: ConvertFn) {
        self.converters.insert(
            suffix.to_string(),
            Converter {
                output_suffix: output_suffix.to_string(),
                convert,
            },
        );
    }

    /// The converter responsible for a source path.
    pub fn find(&self, source: &Path) -> Option<&Converter> {
        let suffix = source.extension()?.to_str()?;
        self.converters.get(&format!(".{}", suffix))
    }

    pub fn suffixes(&self) -> impl Iterator<Item = &str> {
        self.converters.keys().map(|s| s.as_str())
    }
}

/// Whether a file name matches one of `patterns`.
pub fn matches_any(name: &str, patterns: &[glob::Pattern]) -> bool {
    patterns.iter().any(|p| p.matches(name))
}

/// Compile glob patterns.
pub fn compile_patterns(patterns: &[&str]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| glob::Pattern::new(p).with_context(|| format!("invalid pattern {}", p)))
        .collect()
}

/// Copy a single file or symlink. Symlinks are recreated, not followed.
pub fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let metadata = source
        .symlink_metadata()
        .with_context(|| format!("reading metadata of {}", source.display()))?;

    if metadata.file_type().is_symlink() {
        let target = std::fs::read_link(source)?;
        if dest.symlink_metadata().is_ok() {
            std::fs::remove_file(dest)?;
        }
        std::os::unix::fs::symlink(&target, dest)
            .with_context(|| format!("creating symlink {}", dest.display()))?;
    } else {
        std::fs::copy(source, dest).with_context(|| {
            format!("copying {} to {}", source.display(), dest.display())
        })?;
    }

    Ok(())
}

/// Recursively copy a directory, preserving symlinks.
///
/// Entries for which `skip(name)` returns true are not copied, nor is
/// anything below them.
pub fn copy_tree(source: &Path, dest: &Path, skip: &dyn Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let mut copied = vec![];

    let walker = walkdir::WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .map(|name| skip(name))
                    .unwrap_or(false)
        });

    for entry in walker {
        let entry = entry?;
        let rel = entry.path().strip_prefix(source)?;
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
        } else {
            copy_file(entry.path(), &target)?;
            copied.push(target);
        }
    }

    Ok(copied)
}

fn symlink_source(source: &Path, dest: &Path) -> Result<()> {
    let source = std::fs::canonicalize(source)
        .with_context(|| format!("resolving {}", source.display()))?;

    if dest.symlink_metadata().is_ok() {
        apple_bundles::remove_existing(dest)?;
    }
    std::os::unix::fs::symlink(&source, dest)
        .with_context(|| format!("creating symlink {}", dest.display()))?;

    Ok(())
}

/// Copies resources into `Contents/Resources`.
pub struct ResourceCopier<'a> {
    resources_dir: &'a Path,
    converters: &'a ConverterRegistry,
    ignored: Vec<glob::Pattern>,
    symlink: bool,
}

impl<'a> ResourceCopier<'a> {
    /// Create a copier. `symlink` selects alias build behavior.
    pub fn new(
        resources_dir: &'a Path,
        converters: &'a ConverterRegistry,
        symlink: bool,
    ) -> Result<Self> {
        Ok(Self {
            resources_dir,
            converters,
            ignored: compile_patterns(IGNORED_PATTERNS)?,
            symlink,
        })
    }

    fn copy_source(&self, dest_dir: &Path, source: &Path) -> Result<()> {
        let name = source
            .file_name()
            .ok_or_else(|| anyhow!("resource {} has no file name", source.display()))?;

        if source.symlink_metadata().is_err() {
            return Err(Py2appError::missing_input(format!(
                "Resource {:?} does not exist",
                source.display().to_string()
            ))
            .into());
        }

        std::fs::create_dir_all(dest_dir)
            .with_context(|| format!("creating {}", dest_dir.display()))?;

        if let Some(converter) = self.converters.find(source) {
            let dest = dest_dir
                .join(name)
                .with_extension(converter.output_suffix.trim_start_matches('.'));
            debug!("compiling {} to {}", source.display(), dest.display());
            return Ok((converter.convert)(source, &dest)?);
        }

        let dest = dest_dir.join(name);

        if self.symlink {
            trace!("linking {} to {}", dest.display(), source.display());
            symlink_source(source, &dest)
        } else if source.is_dir() {
            trace!("copying tree {}", source.display());
            copy_tree(source, &dest, &|name| matches_any(name, &self.ignored))?;
            Ok(())
        } else {
            trace!("copying {}", source.display());
            copy_file(source, &dest)
        }
    }

    /// Copy one resource entry.
    pub fn copy(&self, resource: &Resource) -> Result<()> {
        let dest_dir = resource
            .destination
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .fold(self.resources_dir.to_path_buf(), |dir, c| dir.join(c));

        for source in &resource.sources {
            self.copy_source(&dest_dir, source)?;
        }

        Ok(())
    }

    /// Copy all resources, reporting progress per entry.
    pub fn copy_all(&self, resources: &[Resource], progress: &mut dyn Progress) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }

        let task = progress.add_task("Copy resources", Some(resources.len()));
        for resource in resources {
            progress.update_task(task, &resource.destination.display().to_string());
            self.copy(resource)?;
            progress.step_task(task);
        }
        progress.task_done(task);

        Ok(())
    }
}

/// Write files with fixed content below `resources_dir`.
pub fn write_generated_files(resources_dir: &Path, files: &BTreeMap<PathBuf, Vec<u8>>) -> Result<()> {
    let mut manifest = FileManifest::default();
    for (path, data) in files {
        manifest.add_file_entry(path, FileEntry::new_from_data(data.clone(), false))?;
    }

    manifest
        .materialize_files(resources_dir)
        .context("writing generated resources")?;

    Ok(())
}

/// Resolve a configured icon path, trying an `.icns` suffix when the file doesn't exist.
pub fn resolve_iconfile(path: &Path) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }

    let mut with_suffix = path.as_os_str().to_os_string();
    with_suffix.push(".icns");
    let with_suffix = PathBuf::from(with_suffix);

    if with_suffix.exists() {
        Some(with_suffix)
    } else {
        None
    }
}

/// The name an icon has inside `Contents/Resources`.
///
/// `.icns` files keep their file name. `.iconset` directories become an
/// `.icns` file with the same stem.
pub fn icon_file_name(iconfile: &Path) -> Result<String> {
    let unrecognized = || {
        Py2appError::Bundle(format!(
            "Unrecognized source format for bundle icon: {}",
            iconfile.display()
        ))
    };

    match iconfile.extension().and_then(|s| s.to_str()) {
        Some("icns") => iconfile
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| unrecognized().into()),
        Some("iconset") => iconfile
            .file_stem()
            .map(|stem| format!("{}.icns", stem.to_string_lossy()))
            .ok_or_else(|| unrecognized().into()),
        _ => Err(unrecognized().into()),
    }
}

/// Install the bundle icon in `resources_dir`.
///
/// `.iconset` directories are converted with `iconutil`. Returns the file
/// name to store in `CFBundleIconFile`.
pub fn install_icon(resources_dir: &Path, iconfile: &Path) -> Result<String> {
    let file_name = icon_file_name(iconfile)?;
    let dest = resources_dir.join(&file_name);

    if iconfile.is_dir() {
        tools::run_program(
            Path::new("/usr/bin/iconutil"),
            [
                "-c".into(),
                "icns".into(),
                "-o".into(),
                dest.as_os_str().to_os_string(),
                iconfile.as_os_str().to_os_string(),
            ],
        )?;
    } else {
        std::fs::copy(iconfile, &dest)
            .with_context(|| format!("copying {} to {}", iconfile.display(), dest.display()))?;
    }

    Ok(file_name)
}

#[cfg(test)]
mod tests {
    use {super::*, crate::progress::RecordingProgress, python_packaging::testutil::write_tree};

    fn fake_compile(source: &Path, destination: &Path) -> Result<(), Py2appError> {
        let data = std::fs::read(source)?;
        std::fs::write(destination, [b"compiled:".as_ref(), &data].concat())?;
        Ok(())
    }

    #[test]
    fn builtin_converters() {
        let registry = ConverterRegistry::with_builtin_converters();

        assert_eq!(
            registry.find(Path::new("MainMenu.xib")).map(|c| c.output_suffix.as_str()),
            Some(".nib")
        );
        assert_eq!(
            registry
                .find(Path::new("Model.xcdatamodel"))
                .map(|c| c.output_suffix.as_str()),
            Some(".mom")
        );
        assert!(registry.find(Path::new("data.zip")).is_none());
        assert!(registry.find(Path::new("README")).is_none());
        assert_eq!(registry.suffixes().count(), 4);
    }

    #[test]
    fn copy_and_convert() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let src = td.path().join("src");
        write_tree(
            &src,
            &[
                ("MainMenu.xib", "<xib/>"),
                ("data/a.txt", "a"),
                ("data/sub/b.txt", "b"),
                ("data/.svn/entries", ""),
                ("archive.zip", "PK"),
            ],
        )?;
        std::os::unix::fs::symlink("a.txt", src.join("data").join("link.txt"))?;

        let mut registry = ConverterRegistry::default();
        registry.register(".xib", ".nib", fake_compile);

        let resources_dir = td.path().join("Resources");
        let copier = ResourceCopier::new(&resources_dir, &registry, false)?;
        let mut progress = RecordingProgress::default();
        copier.copy_all(
            &[
                Resource::new(".", vec![src.join("MainMenu.xib"), src.join("archive.zip")]),
                Resource::new("extra", vec![src.join("data")]),
            ],
            &mut progress,
        )?;

        assert_eq!(
            std::fs::read(resources_dir.join("MainMenu.nib"))?,
            b"compiled:<xib/>".to_vec()
        );
        assert_eq!(std::fs::read(resources_dir.join("archive.zip"))?, b"PK".to_vec());

        let data = resources_dir.join("extra").join("data");
        assert!(data.join("sub").join("b.txt").is_file());
        assert!(!data.join(".svn").exists());
        assert_eq!(std::fs::read_link(data.join("link.txt"))?, PathBuf::from("a.txt"));
        assert_eq!(progress.steps, vec![2]);

        Ok(())
    }

    #[test]
    fn junk_files_skipped() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let src = td.path().join("src");
        write_tree(
            &src,
            &[
                ("data/keep.txt", "keep"),
                ("data/notes.txt~", "kept"),
                ("data/.DS_Store", ""),
                ("data/.gdb_history", ""),
                ("data/view.swp", ""),
                ("data/user.pbxuser", ""),
                ("data/CVS/Entries", ""),
                ("data/.hg/store", ""),
                ("data/.git/HEAD", ""),
                ("data/.svn/entries", ""),
                ("data/sub/.DS_Store", ""),
                ("data/sub/inner.txt", "inner"),
            ],
        )?;

        let registry = ConverterRegistry::default();
        let resources_dir = td.path().join("Resources");
        let copier = ResourceCopier::new(&resources_dir, &registry, false)?;
        copier.copy(&Resource::new(".", vec![src.join("data")]))?;

        let data = resources_dir.join("data");
        assert!(data.join("keep.txt").is_file());
        assert!(data.join("notes.txt~").is_file());
        assert!(data.join("sub/inner.txt").is_file());
        for junk in [
            ".DS_Store",
            ".gdb_history",
            "view.swp",
            "user.pbxuser",
            "CVS",
            ".hg",
            ".git",
            ".svn",
            "sub/.DS_Store",
        ] {
            assert!(data.join(junk).symlink_metadata().is_err(), "{} copied", junk);
        }

        Ok(())
    }

    #[test]
    fn current_dir_destination() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(td.path(), &[("file.txt", "f")])?;

        let registry = ConverterRegistry::default();
        let resources_dir = td.path().join("bundle/Contents/Resources");
        let copier = ResourceCopier::new(&resources_dir, &registry, false)?;
        copier.copy(&Resource::new("./", vec![td.path().join("file.txt")]))?;
        copier.copy(&Resource::new("./nested/.", vec![td.path().join("file.txt")]))?;

        assert_eq!(std::fs::read(resources_dir.join("file.txt"))?, b"f".to_vec());
        assert!(resources_dir.join("nested/file.txt").is_file());

        Ok(())
    }

    #[test]
    fn alias_symlinks() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(td.path(), &[("src/data/a.txt", "a"), ("src/file.txt", "f")])?;

        let registry = ConverterRegistry::default();
        let resources_dir = td.path().join("Resources");
        let copier = ResourceCopier::new(&resources_dir, &registry, true)?;
        copier.copy(&Resource::new(
            ".",
            vec![td.path().join("src/data"), td.path().join("src/file.txt")],
        ))?;

        let link = std::fs::read_link(resources_dir.join("data"))?;
        assert_eq!(link, std::fs::canonicalize(td.path().join("src/data"))?);
        assert!(resources_dir
            .join("file.txt")
            .symlink_metadata()?
            .file_type()
            .is_symlink());

        Ok(())
    }

    #[test]
    fn missing_resource() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let registry = ConverterRegistry::default();
        let copier = ResourceCopier::new(td.path(), &registry, false)?;

        let err = copier
            .copy(&Resource::new(".", vec![td.path().join("nope.txt")]))
            .expect_err("missing source");
        assert!(matches!(
            err.downcast_ref::<Py2appError>(),
            Some(Py2appError::MissingInput(_))
        ));

        Ok(())
    }

    #[test]
    fn icons() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write_tree(td.path(), &[("app.icns", "icon"), ("logo.png", "png")])?;
        let resources_dir = td.path().join("Resources");
        std::fs::create_dir_all(&resources_dir)?;

        let icon = resolve_iconfile(&td.path().join("app")).expect("suffix appended");
        assert_eq!(install_icon(&resources_dir, &icon)?, "app.icns");
        assert_eq!(std::fs::read(resources_dir.join("app.icns"))?, b"icon".to_vec());

        assert_eq!(icon_file_name(Path::new("art/Logo.iconset"))?, "Logo.icns");
        assert!(resolve_iconfile(&td.path().join("missing")).is_none());
        assert!(install_icon(&resources_dir, &td.path().join("logo.png")).is_err());

        Ok(())
    }

    #[test]
    fn generated_files() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let mut files = BTreeMap::new();
        files.insert(PathBuf::from("qt.conf"), b"[Paths]\n".to_vec());
        files.insert(PathBuf::from("sub/x.txt"), b"x".to_vec());

        write_generated_files(td.path(), &files)?;

        assert_eq!(std::fs::read(td.path().join("qt.conf"))?, b"[Paths]\n".to_vec());
        assert!(td.path().join("sub").join("x.txt").is_file());

        Ok(())
    }
}
