// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Making a bundle self-contained.

Every Mach-O file in the bundle is inspected. Libraries it links to that
live outside the bundle and outside the system locations are copied into
`Contents/Frameworks` and the load commands are rewritten to `@rpath/...`.
Copied files are processed in turn until nothing new is found.

Frameworks are copied one version at a time. The Python library is never
copied as a framework: only its shared library is copied, as
`libpythonX.Y.dylib`, because the bundle carries its own standard library.
*/

use {
    crate::{error::Py2appError, progress::Progress, resources::copy_file},
    anyhow::{Context, Result},
    apple_macho::{
        framework_info, in_system_path, is_macho_file, normalize_path, rewrite_macho_file,
        DylibKind, LoadCommandChanges, LoadContext, MachOError, MachOFile,
    },
    log::{debug, trace},
    std::{
        collections::{BTreeMap, BTreeSet, VecDeque},
        path::{Component, Path, PathBuf},
    },
};

/// Mach-O files below `root`, symlinks excluded.
pub fn macho_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut res = vec![];

    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && is_macho_file(entry.path()) {
            res.push(entry.path().to_path_buf());
        }
    }

    Ok(res)
}

/// The `@loader_path` relative reference from `dir` to `target`.
///
/// Both paths must be below a common root.
pub fn loader_relative(dir: &Path, target: &Path) -> String {
    let dir = dir.components().collect::<Vec<_>>();
    let target = target.components().collect::<Vec<_>>();
    let common = dir
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts = vec![];
    parts.extend(std::iter::repeat("..".to_string()).take(dir.len() - common));
    parts.extend(target[common..].iter().filter_map(|c| match c {
        Component::Normal(s) => Some(s.to_string_lossy().to_string()),
        _ => None,
    }));

    if parts.is_empty() {
        "@loader_path/".to_string()
    } else {
        format!("@loader_path/{}", parts.join("/"))
    }
}

fn map_rewrite_error(path: &Path, e: MachOError) -> Py2appError {
    match e {
        MachOError::InsufficientHeaderPadding { needed, available } => Py2appError::Standalone(format!(
            "cannot rewrite load commands of {}: {} bytes needed, {} available",
            path.display(),
            needed,
            available
        )),
        e => Py2appError::MachO(e),
    }
}

/// Settings for [MachOStandalone].
#[derive(Clone, Debug, Default)]
pub struct StandaloneOptions {
    /// Libraries that must never be copied, by path, file name or framework name.
    pub excludes: Vec<String>,
    /// Libraries and frameworks to copy even if nothing links to them.
    pub includes: Vec<PathBuf>,
    /// The shared library of the interpreter and its version (`3.12`).
    ///
    /// `None` leaves references to the interpreter alone, which is what
    /// semi-standalone builds need.
    pub python_library: Option<(PathBuf, String)>,
}

/// Outcome of [MachOStandalone::run].
#[derive(Clone, Debug, Default)]
pub struct StandaloneReport {
    /// Files copied into `Contents/Frameworks`.
    pub copied: Vec<PathBuf>,
    /// Files whose load commands changed.
    pub rewritten: Vec<PathBuf>,
    /// References left unchanged because of an exclude.
    pub excluded: BTreeSet<String>,
}

/// Copies the non-system libraries a bundle links to into the bundle.
pub struct MachOStandalone {
    bundle_root: PathBuf,
    contents: PathBuf,
    frameworks: PathBuf,
    options: StandaloneOptions,
    python_library: Option<PathBuf>,
    /// Canonical source path to the `@rpath` name of its copy.
    copies: BTreeMap<PathBuf, String>,
    todo: VecDeque<PathBuf>,
    seen: BTreeSet<PathBuf>,
    report: StandaloneReport,
}

impl MachOStandalone {
    /// `bundle_root` is the `.app` or `.plugin` directory.
    pub fn new(bundle_root: &Path, options: StandaloneOptions) -> Self {
        let contents = bundle_root.join("Contents");
        let python_library = options
            .python_library
            .as_ref()
            .map(|(path, _)| std::fs::canonicalize(path).unwrap_or_else(|_| path.clone()));

        Self {
            bundle_root: bundle_root.to_path_buf(),
            frameworks: contents.join("Frameworks"),
            contents,
            options,
            python_library,
            copies: BTreeMap::new(),
            todo: VecDeque::new(),
            seen: BTreeSet::new(),
            report: StandaloneReport::default(),
        }
    }

    fn is_excluded(&self, name: &str) -> bool {
        let file_name = name.rsplit('/').next().unwrap_or(name);
        let framework = framework_info(name).map(|info| info.shortname);

        self.options.excludes.iter().any(|exclude| {
            exclude == name
                || exclude == file_name
                || framework.as_deref() == Some(exclude.trim_end_matches(".framework"))
        })
    }

    fn is_python_library(&self, canonical: &Path) -> bool {
        if self.python_library.as_deref() == Some(canonical) {
            return true;
        }

        match (&self.options.python_library, framework_info(&canonical.to_string_lossy())) {
            (Some((_, version)), Some(info)) => {
                info.shortname == "Python" && info.version.as_deref() == Some(version.as_str())
            }
            _ => false,
        }
    }

    fn push(&mut self, path: PathBuf) {
        if self.seen.insert(path.clone()) {
            self.todo.push_back(path);
        }
    }

    /// Copy a library into `Frameworks` and return its new install name.
    fn copy_library(&mut self, source: &Path) -> Result<String> {
        let canonical = std::fs::canonicalize(source)
            .with_context(|| format!("resolving {}", source.display()))?;

        if let Some(name) = self.copies.get(&canonical) {
            return Ok(name.clone());
        }

        std::fs::create_dir_all(&self.frameworks)
            .with_context(|| format!("creating {}", self.frameworks.display()))?;

        let name = if self.is_python_library(&canonical) {
            let version = self
                .options
                .python_library
                .as_ref()
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            let file_name = format!("libpython{}.dylib", version);
            let dest = self.frameworks.join(&file_name);
            self.copy_file_into(&canonical, &dest)?;
            format!("@rpath/{}", file_name)
        } else if let Some(info) = framework_info(&canonical.to_string_lossy()) {
            self.copy_framework(&canonical, &info)?
        } else {
            let file_name = source
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let real_name = canonical
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();

            let dest = self.frameworks.join(&real_name);
            self.copy_file_into(&canonical, &dest)?;
            if real_name != file_name {
                let link = self.frameworks.join(&file_name);
                if link.symlink_metadata().is_err() {
                    std::os::unix::fs::symlink(&real_name, &link)
                        .with_context(|| format!("creating symlink {}", link.display()))?;
                }
            }

            format!("@rpath/{}", file_name)
        };

        debug!("copied {} as {}", source.display(), name);
        self.copies.insert(canonical, name.clone());

        Ok(name)
    }

    fn copy_file_into(&mut self, source: &Path, dest: &Path) -> Result<()> {
        if dest.symlink_metadata().is_err() {
            copy_file(source, dest)?;
            self.report.copied.push(dest.to_path_buf());
        }
        self.push(dest.to_path_buf());

        Ok(())
    }

    /// Copy one version of a framework, with its `Current` and top-level symlinks.
    fn copy_framework(&mut self, canonical: &Path, info: &apple_macho::FrameworkInfo) -> Result<String> {
        let version = match &info.version {
            Some(v) => v.clone(),
            None => {
                return Err(Py2appError::Standalone(format!(
                    "{} is not inside a framework version directory",
                    canonical.display()
                ))
                .into())
            }
        };

        let source_dir = info.framework_dir();
        let dest_dir = self
            .frameworks
            .join(format!("{}.framework", info.shortname));
        let version_dest = dest_dir.join("Versions").join(&version);

        if !version_dest.exists() {
            let copied = crate::resources::copy_tree(
                &source_dir.join("Versions").join(&version),
                &version_dest,
                &|name| name == "Headers" || name == "PrivateHeaders" || name.ends_with(".dSYM"),
            )?;

            for path in copied {
                if path.symlink_metadata()?.file_type().is_file() && is_macho_file(&path) {
                    self.push(path.clone());
                }
                self.report.copied.push(path);
            }

            let current = dest_dir.join("Versions").join("Current");
            if current.symlink_metadata().is_err() {
                std::os::unix::fs::symlink(&version, &current)
                    .with_context(|| format!("creating symlink {}", current.display()))?;
            }

            for entry in std::fs::read_dir(&source_dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_symlink() {
                    continue;
                }
                let target = std::fs::read_link(entry.path())?;
                let link = dest_dir.join(entry.file_name());
                if link.symlink_metadata().is_err() && dest_dir.join(&target).exists() {
                    std::os::unix::fs::symlink(&target, &link)
                        .with_context(|| format!("creating symlink {}", link.display()))?;
                }
            }
        }

        let leaf = format!("{}{}", info.shortname, info.suffix.as_deref().unwrap_or(""));
        self.push(version_dest.join(&leaf));

        Ok(format!(
            "@rpath/{}.framework/Versions/{}/{}",
            info.shortname, version, leaf
        ))
    }

    /// Install name for a file inside `Frameworks`, if it is one.
    fn install_name(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.frameworks).ok()?;
        Some(format!("@rpath/{}", rel.display()))
    }

    fn process(&mut self, path: &Path, progress: &mut dyn Progress) -> Result<()> {
        let macho = match MachOFile::from_path(path)? {
            Some(m) => m,
            None => return Ok(()),
        };

        let loader_dir = path.parent().unwrap_or(&self.contents).to_path_buf();
        let executable_dir = self.contents.join("MacOS");
        let rpaths = macho.rpaths().iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let context = LoadContext {
            loader_dir: &loader_dir,
            executable_dir: &executable_dir,
            rpaths: &rpaths,
        };

        let mut changes = LoadCommandChanges::default();
        let mut references = vec![];
        for slice in &macho.slices {
            for dylib in &slice.dylibs {
                if !references.iter().any(|(n, _): &(String, DylibKind)| n == &dylib.name) {
                    references.push((dylib.name.clone(), dylib.kind));
                }
            }
        }

        for (name, kind) in references {
            if in_system_path(&name) {
                continue;
            }
            if self.is_excluded(&name) {
                trace!("{}: not copying excluded {}", path.display(), name);
                self.report.excluded.insert(name);
                continue;
            }

            let source = if name.starts_with('@') {
                match context.resolve(&name) {
                    Some(p) if p.starts_with(&self.bundle_root) => continue,
                    Some(p) => p,
                    None if kind == DylibKind::Weak => continue,
                    None => {
                        progress.warning(&format!(
                            "{}: cannot resolve {}",
                            path.display(),
                            name
                        ));
                        continue;
                    }
                }
            } else {
                let p = normalize_path(Path::new(&name));
                if p.starts_with(&self.bundle_root) {
                    continue;
                }
                p
            };

            if self.options.python_library.is_none() {
                if let Some(info) = framework_info(&name) {
                    if info.shortname == "Python" {
                        continue;
                    }
                }
                if name.contains("libpython") {
                    continue;
                }
            }

            if !source.exists() {
                if kind == DylibKind::Weak {
                    continue;
                }
                return Err(Py2appError::Standalone(format!(
                    "required Mach-O library {} of {} does not exist",
                    source.display(),
                    path.display()
                ))
                .into());
            }

            let new_name = self.copy_library(&source)?;
            if new_name != name {
                changes.dylib_renames.insert(name, new_name);
            }
        }

        changes.new_id = self.install_name(path);
        if !changes.dylib_renames.is_empty() || path.starts_with(&self.frameworks) {
            let dir = path.parent().unwrap_or(&self.frameworks);
            let rpath = loader_relative(dir, &self.frameworks);
            if !macho.rpaths().contains(&rpath.as_str()) {
                changes.add_rpaths.push(rpath);
            }
        }

        if macho.id_dylib() == changes.new_id.as_deref() {
            changes.new_id = None;
        }

        if rewrite_macho_file(path, &changes).map_err(|e| map_rewrite_error(path, e))? {
            trace!("rewrote load commands of {}", path.display());
            self.report.rewritten.push(path.to_path_buf());
        }

        Ok(())
    }

    /// Process the bundle until every reference is satisfied.
    pub fn run(mut self, progress: &mut dyn Progress) -> Result<StandaloneReport> {
        for include in self.options.includes.clone() {
            if !include.exists() {
                return Err(Py2appError::missing_input(format!(
                    "Mach-O include {} does not exist",
                    include.display()
                ))
                .into());
            }

            let library = if include.extension().and_then(|s| s.to_str()) == Some("framework") {
                let name = include
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                include.join(name)
            } else {
                include
            };
            self.copy_library(&library)?;
        }

        for path in macho_files(&self.bundle_root)? {
            self.push(path);
        }

        let task = progress.add_task("Copy Mach-O dependencies", None);
        while let Some(path) = self.todo.pop_front() {
            progress.update_task(task, &path.display().to_string());
            self.process(&path, progress)?;
            progress.step_task(task);
        }
        progress.task_done(task);

        Ok(self.report)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::progress::RecordingProgress,
        apple_macho::{testutil::MachOBuilder, CpuArch},
    };

    fn write(path: &Path, data: Vec<u8>) -> Result<()> {
        std::fs::create_dir_all(path.parent().expect("parent"))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    #[test]
    fn relative_paths() {
        assert_eq!(
            loader_relative(Path::new("/b/Contents/Frameworks"), Path::new("/b/Contents/Frameworks")),
            "@loader_path/"
        );
        assert_eq!(
            loader_relative(
                Path::new("/b/Contents/Resources/lib/python3.12/lib-dynload"),
                Path::new("/b/Contents/Frameworks")
            ),
            "@loader_path/../../../../Frameworks"
        );
    }

    #[test]
    fn copies_dylibs_and_frameworks() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let ext = td.path().join("ext");
        let bundle = td.path().join("hello.app");

        // libfoo.1.dylib with a libfoo.dylib symlink, linking to a framework.
        write(
            &ext.join("lib/libfoo.1.dylib"),
            MachOBuilder::new(CpuArch::Arm64)
                .dylib_id(&format!("{}/lib/libfoo.dylib", ext.display()))
                .load_dylib(&format!(
                    "{}/Frameworks/Bar.framework/Versions/A/Bar",
                    ext.display()
                ))
                .load_dylib("/usr/lib/libSystem.B.dylib")
                .build(),
        )?;
        std::os::unix::fs::symlink("libfoo.1.dylib", ext.join("lib/libfoo.dylib"))?;

        let bar = ext.join("Frameworks/Bar.framework");
        write(
            &bar.join("Versions/A/Bar"),
            MachOBuilder::new(CpuArch::Arm64)
                .dylib_id(&format!("{}/Versions/A/Bar", bar.display()))
                .build(),
        )?;
        write(&bar.join("Versions/A/Resources/Info.plist"), b"<plist/>".to_vec())?;
        write(&bar.join("Versions/A/Headers/bar.h"), b"".to_vec())?;
        std::os::unix::fs::symlink("A", bar.join("Versions/Current"))?;
        std::os::unix::fs::symlink("Versions/Current/Bar", bar.join("Bar"))?;
        std::os::unix::fs::symlink("Versions/Current/Resources", bar.join("Resources"))?;

        let so = bundle.join("Contents/Resources/lib/python3.12/lib-dynload/demo.so");
        write(
            &so,
            MachOBuilder::new(CpuArch::Arm64)
                .load_dylib(&format!("{}/lib/libfoo.dylib", ext.display()))
                .build(),
        )?;

        let mut progress = RecordingProgress::default();
        let report = MachOStandalone::new(&bundle, StandaloneOptions::default()).run(&mut progress)?;

        let frameworks = bundle.join("Contents/Frameworks");
        assert!(frameworks.join("libfoo.1.dylib").is_file());
        assert_eq!(
            std::fs::read_link(frameworks.join("libfoo.dylib"))?,
            PathBuf::from("libfoo.1.dylib")
        );
        assert!(frameworks.join("Bar.framework/Versions/A/Bar").is_file());
        assert!(frameworks
            .join("Bar.framework/Versions/A/Resources/Info.plist")
            .is_file());
        assert!(!frameworks.join("Bar.framework/Versions/A/Headers").exists());
        assert_eq!(
            std::fs::read_link(frameworks.join("Bar.framework/Versions/Current"))?,
            PathBuf::from("A")
        );
        assert!(frameworks.join("Bar.framework/Bar").exists());

        let macho = MachOFile::from_path(&so)?.expect("macho");
        assert_eq!(macho.dylib_names(), vec!["@rpath/libfoo.dylib"]);
        assert_eq!(macho.rpaths(), vec!["@loader_path/../../../../Frameworks"]);

        let foo = MachOFile::from_path(&frameworks.join("libfoo.1.dylib"))?.expect("macho");
        assert_eq!(foo.id_dylib(), Some("@rpath/libfoo.1.dylib"));
        assert_eq!(
            foo.dylib_names(),
            vec![
                "@rpath/Bar.framework/Versions/A/Bar",
                "/usr/lib/libSystem.B.dylib"
            ]
        );
        assert_eq!(foo.rpaths(), vec!["@loader_path/"]);

        let bar = MachOFile::from_path(&frameworks.join("Bar.framework/Versions/A/Bar"))?
            .expect("macho");
        assert_eq!(bar.id_dylib(), Some("@rpath/Bar.framework/Versions/A/Bar"));

        assert!(report.rewritten.contains(&so));
        assert!(progress.messages(crate::progress::MessageLevel::Warning).is_empty());

        Ok(())
    }

    #[test]
    fn python_library_and_excludes() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let bundle = td.path().join("hello.app");
        let framework = td.path().join("Python.framework/Versions/3.12");
        write(
            &framework.join("Python"),
            MachOBuilder::new(CpuArch::Arm64)
                .dylib_id(&format!("{}/Python", framework.display()))
                .build(),
        )?;

        let launcher = bundle.join("Contents/MacOS/hello");
        write(
            &launcher,
            MachOBuilder::new(CpuArch::Arm64)
                .executable()
                .load_dylib(&format!("{}/Python", framework.display()))
                .load_dylib("/opt/local/lib/libexcluded.dylib")
                .rpath("@executable_path/../Frameworks")
                .build(),
        )?;

        let options = StandaloneOptions {
            excludes: vec!["libexcluded.dylib".to_string()],
            includes: vec![],
            python_library: Some((framework.join("Python"), "3.12".to_string())),
        };
        let mut progress = RecordingProgress::default();
        let report = MachOStandalone::new(&bundle, options).run(&mut progress)?;

        let frameworks = bundle.join("Contents/Frameworks");
        assert!(frameworks.join("libpython3.12.dylib").is_file());
        assert!(!frameworks.join("Python.framework").exists());
        assert!(report.excluded.contains("/opt/local/lib/libexcluded.dylib"));

        let macho = MachOFile::from_path(&launcher)?.expect("macho");
        assert_eq!(
            macho.dylib_names(),
            vec!["@rpath/libpython3.12.dylib", "/opt/local/lib/libexcluded.dylib"]
        );

        let libpython = MachOFile::from_path(&frameworks.join("libpython3.12.dylib"))?.expect("macho");
        assert_eq!(libpython.id_dylib(), Some("@rpath/libpython3.12.dylib"));

        Ok(())
    }

    #[test]
    fn semi_standalone_keeps_python() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let bundle = td.path().join("hello.app");
        let launcher = bundle.join("Contents/MacOS/hello");
        write(
            &launcher,
            MachOBuilder::new(CpuArch::Arm64)
                .executable()
                .load_dylib("/Library/Frameworks/Python.framework/Versions/3.12/Python")
                .build(),
        )?;

        let mut progress = RecordingProgress::default();
        let report = MachOStandalone::new(&bundle, StandaloneOptions::default()).run(&mut progress)?;
        assert!(report.copied.is_empty());
        assert!(report.rewritten.is_empty());

        Ok(())
    }

    #[test]
    fn missing_library() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let bundle = td.path().join("hello.app");
        write(
            &bundle.join("Contents/MacOS/hello"),
            MachOBuilder::new(CpuArch::Arm64)
                .executable()
                .load_dylib("/nonexistent/libgone.dylib")
                .weak_dylib("/nonexistent/libweak.dylib")
                .build(),
        )?;

        let mut progress = RecordingProgress::default();
        let err = MachOStandalone::new(&bundle, StandaloneOptions::default())
            .run(&mut progress)
            .unwrap_err();
        assert!(err.to_string().contains("libgone.dylib"));
        assert!(!err.to_string().contains("libweak.dylib"));

        Ok(())
    }

    #[test]
    fn header_padding_is_fatal() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let bundle = td.path().join("hello.app");
        let lib = td.path().join("lib/libz.dylib");
        write(&lib, MachOBuilder::new(CpuArch::Arm64).dylib_id("/lib/libz.dylib").build())?;

        let so = bundle.join("Contents/Resources/ext.so");
        let builder = MachOBuilder::new(CpuArch::Arm64).load_dylib(&lib.display().to_string());
        // Leave no room beyond the existing load commands.
        let tight = builder.build();
        let commands_end = 32 + u32::from_le_bytes([tight[20], tight[21], tight[22], tight[23]]) as usize;
        write(
            &so,
            MachOBuilder::new(CpuArch::Arm64)
                .load_dylib(&lib.display().to_string())
                .text_offset(commands_end)
                .build(),
        )?;

        let mut progress = RecordingProgress::default();
        let err = MachOStandalone::new(&bundle, StandaloneOptions::default())
            .run(&mut progress)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Py2appError>(),
            Some(Py2appError::Standalone(message)) if message.contains("ext.so")
        ));

        Ok(())
    }
}
