// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Scanning the filesystem for installed Python distributions.
*/

use {
    crate::package_metadata::{
        normalize_distribution_name, parse_installed_files, parse_record, PythonPackageMetadata,
    },
    anyhow::{Context, Result},
    log::warn,
    path_dedot::ParseDot,
    std::{
        collections::{BTreeSet, HashMap},
        path::{Path, PathBuf},
    },
};

/// Iterate over all files (not directories) below `path`, sorted by name.
pub fn walk_tree_files(path: &Path) -> Box<dyn Iterator<Item = walkdir::DirEntry>> {
    let res = walkdir::WalkDir::new(path).sort_by(|a, b| a.file_name().cmp(b.file_name()));

    let filtered = res.into_iter().filter_map(|entry| {
        let entry = entry.ok()?;

        if entry.file_type().is_dir() {
            None
        } else {
            Some(entry)
        }
    });

    Box::new(filtered)
}

fn normalize_path(path: &Path) -> PathBuf {
    match path.parse_dot() {
        Ok(p) => p.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

/// An installed Python distribution, described by a `.dist-info` or `.egg-info` directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PythonDistribution {
    /// Name as declared in the metadata.
    pub name: String,
    pub version: String,
    /// The `.dist-info` or `.egg-info` directory.
    pub metadata_path: PathBuf,
    /// Absolute paths of installed files.
    pub files: BTreeSet<PathBuf>,
    /// Names listed in `top_level.txt`.
    pub top_level: Vec<String>,
}

impl PythonDistribution {
    /// Load a distribution from its metadata directory.
    ///
    /// Returns `Ok(None)` when the directory lacks usable metadata.
    pub fn from_path(path: &Path) -> Result<Option<Self>> {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return Ok(None),
        };

        let is_dist_info = file_name.ends_with(".dist-info");
        let is_egg_info = file_name.ends_with(".egg-info");
        if !(is_dist_info || is_egg_info) || !path.is_dir() {
            return Ok(None);
        }

        let metadata_file = path.join(if is_dist_info { "METADATA" } else { "PKG-INFO" });
        let data = match std::fs::read(&metadata_file) {
            Ok(data) => data,
            Err(_) => return Ok(None),
        };

        let metadata = match PythonPackageMetadata::from_metadata(&data) {
            Ok(m) => m,
            Err(e) => {
                warn!("ignoring {}: {}", metadata_file.display(), e);
                return Ok(None);
            }
        };

        let (name, version) = match (metadata.name(), metadata.version()) {
            (Some(name), Some(version)) => (name.to_string(), version.to_string()),
            _ => return Ok(None),
        };

        let site_dir = path.parent().unwrap_or(path);
        let mut files = BTreeSet::new();

        if is_dist_info {
            let record = path.join("RECORD");
            if record.exists() {
                let data = std::fs::read_to_string(&record)
                    .with_context(|| format!("reading {}", record.display()))?;
                files.extend(
                    parse_record(&data)
                        .into_iter()
                        .map(|p| normalize_path(&site_dir.join(p))),
                );
            }
        } else {
            let installed = path.join("installed-files.txt");
            if installed.exists() {
                let data = std::fs::read_to_string(&installed)
                    .with_context(|| format!("reading {}", installed.display()))?;
                files.extend(
                    parse_installed_files(&data)
                        .into_iter()
                        .map(|p| normalize_path(&path.join(p))),
                );
            }
        }

        let top_level = match std::fs::read_to_string(path.join("top_level.txt")) {
            Ok(data) => data
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>(),
            Err(_) => vec![],
        };

        Ok(Some(Self {
            name,
            version,
            metadata_path: path.to_path_buf(),
            files,
            top_level,
        }))
    }

    /// The normalized name of this distribution.
    pub fn normalized_name(&self) -> String {
        normalize_distribution_name(&self.name)
    }
}

/// Find all distributions installed in the directories of `search_path`.
///
/// When the same distribution is installed in multiple directories, the
/// first one wins, matching the interpreter's import order.
pub fn find_distributions(search_path: &[PathBuf]) -> Result<Vec<PythonDistribution>> {
    let mut seen = BTreeSet::new();
    let mut res = vec![];

    for dir in search_path {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };

        let mut paths = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect::<Vec<_>>();
        paths.sort();

        for path in paths {
            if let Some(dist) = PythonDistribution::from_path(&path)? {
                if seen.insert(dist.normalized_name()) {
                    res.push(dist);
                }
            }
        }
    }

    Ok(res)
}

/// Lookup tables over a set of distributions.
#[derive(Clone, Debug, Default)]
pub struct DistributionIndex {
    distributions: Vec<PythonDistribution>,
    by_name: HashMap<String, usize>,
    by_file: HashMap<PathBuf, usize>,
    // (directory, distribution) for distributions without a file list.
    roots: Vec<(PathBuf, usize)>,
}

impl DistributionIndex {
    pub fn new(distributions: Vec<PythonDistribution>) -> Self {
        let mut by_name = HashMap::new();
        let mut by_file = HashMap::new();
        let mut roots = vec![];

        for (idx, dist) in distributions.iter().enumerate() {
            by_name.insert(dist.normalized_name(), idx);

            for file in &dist.files {
                by_file.entry(file.clone()).or_insert(idx);
            }

            if dist.files.is_empty() {
                if let Some(site_dir) = dist.metadata_path.parent() {
                    for name in &dist.top_level {
                        roots.push((site_dir.join(name), idx));
                        roots.push((site_dir.join(format!("{}.py", name)), idx));
                    }
                }
            }
        }

        Self {
            distributions,
            by_name,
            by_file,
            roots,
        }
    }

    /// Scan `search_path` and index the result.
    pub fn from_search_path(search_path: &[PathBuf]) -> Result<Self> {
        Ok(Self::new(find_distributions(search_path)?))
    }

    /// Find a distribution by (unnormalized) name.
    pub fn find(&self, name: &str) -> Option<&PythonDistribution> {
        self.by_name
            .get(&normalize_distribution_name(name))
            .map(|idx| &self.distributions[*idx])
    }

    /// Find the distribution that installed `path`.
    pub fn for_file(&self, path: &Path) -> Option<&PythonDistribution> {
        let path = normalize_path(path);

        if let Some(idx) = self.by_file.get(&path) {
            return Some(&self.distributions[*idx]);
        }

        self.roots
            .iter()
            .find(|(root, _)| path.starts_with(root))
            .map(|(_, idx)| &self.distributions[*idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &PythonDistribution> {
        self.distributions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, data: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
        Ok(())
    }

    #[test]
    fn dist_info_with_record() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let site = td.path();

        write(&site.join("foo/__init__.py"), "")?;
        write(
            &site.join("foo-1.0.dist-info/METADATA"),
            "Metadata-Version: 2.1\nName: Foo\nVersion: 1.0\n",
        )?;
        write(
            &site.join("foo-1.0.dist-info/RECORD"),
            "foo/__init__.py,,\nfoo-1.0.dist-info/METADATA,,\n",
        )?;

        let index = DistributionIndex::from_search_path(&[site.to_path_buf()])?;
        let dist = index.find("foo").expect("distribution present");
        assert_eq!(dist.name, "Foo");
        assert_eq!(dist.version, "1.0");

        let owner = index.for_file(&site.join("foo/__init__.py"));
        assert_eq!(owner.map(|d| d.name.as_str()), Some("Foo"));
        assert!(index.for_file(&site.join("bar.py")).is_none());

        Ok(())
    }

    #[test]
    fn egg_info_with_top_level() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let site = td.path();

        write(&site.join("legacy/__init__.py"), "")?;
        write(
            &site.join("legacy-0.1-py3.12.egg-info/PKG-INFO"),
            "Metadata-Version: 1.0\nName: legacy\nVersion: 0.1\n",
        )?;
        write(&site.join("legacy-0.1-py3.12.egg-info/top_level.txt"), "legacy\n")?;

        let index = DistributionIndex::from_search_path(&[site.to_path_buf()])?;
        let owner = index.for_file(&site.join("legacy/__init__.py"));
        assert_eq!(owner.map(|d| d.version.as_str()), Some("0.1"));

        Ok(())
    }

    #[test]
    fn metadata_required() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        std::fs::create_dir_all(td.path().join("broken-1.0.dist-info"))?;

        assert!(find_distributions(&[td.path().to_path_buf()])?.is_empty());

        Ok(())
    }

    #[test]
    fn first_distribution_wins() -> Result<()> {
        let first = tempfile::TempDir::new()?;
        let second = tempfile::TempDir::new()?;

        for (dir, version) in [(&first, "2.0"), (&second, "1.0")] {
            write(
                &dir.path().join(format!("dup-{}.dist-info/METADATA", version)),
                &format!("Name: dup\nVersion: {}\n", version),
            )?;
        }

        let dists = find_distributions(&[first.path().to_path_buf(), second.path().to_path_buf()])?;
        assert_eq!(dists.len(), 1);
        assert_eq!(dists[0].version, "2.0");

        Ok(())
    }

    #[test]
    fn walk_skips_directories() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        write(&td.path().join("a/b/c.txt"), "c")?;
        write(&td.path().join("a/d.txt"), "d")?;

        let files = walk_tree_files(td.path())
            .map(|e| e.path().strip_prefix(td.path()).map(|p| p.to_path_buf()))
            .collect::<Result<Vec<_>, _>>()?;

        assert_eq!(
            files,
            vec![PathBuf::from("a/b/c.txt"), PathBuf::from("a/d.txt")]
        );

        Ok(())
    }
}
