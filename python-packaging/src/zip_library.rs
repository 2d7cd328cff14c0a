// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Building zip archives that are put on `sys.path`.

The archive produced here is consumed by the interpreter's `zipimport`
machinery: modules are stored as `.pyc` files using the flat layout
(`pkg/mod.pyc`, not `pkg/__pycache__/mod.<tag>.pyc`).
*/

use {
    crate::module_util::{packages_from_module_name, resolve_path_for_module},
    anyhow::{anyhow, Context, Result},
    simple_file_manifest::{FileEntry, FileManifest},
    std::{
        collections::BTreeSet,
        io::{Seek, Write},
        path::{Path, PathBuf},
    },
    zip::CompressionMethod,
};

/// Accumulates files and writes them into a zip archive.
pub struct ZipLibraryBuilder {
    manifest: FileManifest,

    /// Explicit directory members.
    ///
    /// zipimport only treats a directory as a package portion when the
    /// archive has an entry for it.
    directories: BTreeSet<PathBuf>,

    compression_method: CompressionMethod,

    modified_time: time::OffsetDateTime,
}

impl Default for ZipLibraryBuilder {
    fn default() -> Self {
        Self {
            manifest: FileManifest::default(),
            directories: BTreeSet::new(),
            compression_method: CompressionMethod::Deflated,
            modified_time: time::OffsetDateTime::now_utc(),
        }
    }
}

impl ZipLibraryBuilder {
    /// Set the modified time for files in the archive.
    pub fn set_modified_time(&mut self, v: time::OffsetDateTime) {
        self.modified_time = v;
    }

    pub fn set_compression_method(&mut self, v: CompressionMethod) {
        self.compression_method = v;
    }

    /// Whether a file exists at `path` in the archive.
    pub fn has_file(&self, path: impl AsRef<Path>) -> bool {
        self.manifest.has_path(path.as_ref())
    }

    /// Paths of all files in the archive.
    pub fn file_paths(&self) -> impl Iterator<Item = &Path> {
        self.manifest.iter_entries().map(|(path, _)| path.as_path())
    }

    pub fn directories(&self) -> &BTreeSet<PathBuf> {
        &self.directories
    }

    /// Add a file to the archive. Its parent directories are added as well.
    pub fn add_file_entry(
        &mut self,
        path: impl AsRef<Path>,
        entry: impl Into<FileEntry>,
    ) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            self.add_directory(parent);
        }

        Ok(self.manifest.add_file_entry(path, entry)?)
    }

    /// Add in-memory data as a file.
    pub fn add_file_data(&mut self, path: impl AsRef<Path>, data: Vec<u8>) -> Result<()> {
        self.add_file_entry(path, FileEntry::new_from_data(data, false))
    }

    /// Add a directory member and all of its ancestors.
    pub fn add_directory(&mut self, path: impl AsRef<Path>) {
        let mut current = Some(path.as_ref());

        while let Some(p) = current {
            if p.as_os_str().is_empty() || !self.directories.insert(p.to_path_buf()) {
                break;
            }
            current = p.parent();
        }
    }

    /// Add the compiled bytecode of a module.
    ///
    /// `bytecode` must include the `.pyc` header. Directory entries are
    /// added for the module's package and every parent package.
    pub fn add_bytecode_module(
        &mut self,
        name: &str,
        is_package: bool,
        bytecode: Vec<u8>,
    ) -> Result<()> {
        let path = resolve_path_for_module("", name, is_package, ".pyc");

        for package in packages_from_module_name(name) {
            self.add_directory(package.replace('.', "/"));
        }
        if is_package {
            self.add_directory(name.replace('.', "/"));
        }

        self.add_file_data(path, bytecode)
    }

    /// Write the archive to a writer.
    pub fn write_zip(&self, writer: &mut (impl Write + Seek)) -> Result<()> {
        let mut zf = zip::ZipWriter::new(writer);

        let modified_time = zip::DateTime::from_date_and_time(
            self.modified_time.year() as u16,
            self.modified_time.month() as u8,
            self.modified_time.day(),
            self.modified_time.hour(),
            self.modified_time.minute(),
            self.modified_time.second(),
        )
        .map_err(|_| anyhow!("could not convert time to zip::DateTime"))?;

        for dir in &self.directories {
            let options = zip::write::FileOptions::default()
                .compression_method(CompressionMethod::Stored)
                .unix_permissions(0o0755)
                .last_modified_time(modified_time);

            zf.add_directory(format!("{}/", dir.display()), options)
                .with_context(|| format!("adding zip directory {}", dir.display()))?;
        }

        for file in self.manifest.iter_files() {
            let options = zip::write::FileOptions::default()
                .compression_method(self.compression_method)
                .unix_permissions(if file.entry().is_executable() {
                    0o0755
                } else {
                    0o0644
                })
                .last_modified_time(modified_time);

            zf.start_file(format!("{}", file.path().display()), options)?;
            zf.write_all(
                &file
                    .entry()
                    .resolve_content()
                    .with_context(|| format!("resolving content of {}", file.path().display()))?,
            )
            .with_context(|| format!("writing zip member {}", file.path().display()))?;
        }

        zf.finish().context("finishing zip file")?;

        Ok(())
    }

    /// Write the archive to a filesystem path, creating parent directories.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("creating parent directory")?;
        }

        let mut fh = std::fs::File::create(path)
            .with_context(|| format!("opening {}", path.display()))?;
        self.write_zip(&mut fh)
            .with_context(|| format!("writing {}", path.display()))?;

        Ok(())
    }
}
