// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Working with Python package metadata (i.e. .dist-info directories) */

use {
    anyhow::{Context, Result},
    mailparse::parse_mail,
    std::path::PathBuf,
};

/// Represents a Python METADATA file.
pub struct PythonPackageMetadata {
    headers: Vec<(String, String)>,
}

impl PythonPackageMetadata {
    /// Create an instance from data in a METADATA file.
    pub fn from_metadata(data: &[u8]) -> Result<PythonPackageMetadata> {
        let message = parse_mail(data).context("parsing metadata file")?;

        let headers = message
            .headers
            .iter()
            .map(|header| (header.get_key(), header.get_value()))
            .collect::<Vec<_>>();

        Ok(PythonPackageMetadata { headers })
    }

    /// Find the first value of a specified header.
    pub fn find_first_header(&self, key: &str) -> Option<&str> {
        for (k, v) in &self.headers {
            if k == key {
                return Some(v);
            }
        }

        None
    }

    /// Find all values of a specified header.
    pub fn find_all_headers(&self, key: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter_map(|(k, v)| if k == key { Some(v.as_ref()) } else { None })
            .collect::<Vec<_>>()
    }

    pub fn name(&self) -> Option<&str> {
        self.find_first_header("Name")
    }

    pub fn version(&self) -> Option<&str> {
        self.find_first_header("Version")
    }
}

/// Normalize a distribution name for comparisons.
///
/// Runs of `-`, `_` and `.` collapse to `-` and the result is lowercased.
pub fn normalize_distribution_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut in_separator = false;

    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                result.push('-');
            }
            in_separator = true;
        } else {
            result.extend(c.to_lowercase());
            in_separator = false;
        }
    }

    result
}

/// Split a single CSV line from a RECORD file into fields.
fn split_record_line(line: &str) -> Vec<String> {
    let mut fields = vec![];
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    fields
}

/// Parse the paths listed in a `RECORD` file.
///
/// Paths are relative to the directory containing the `.dist-info` directory.
pub fn parse_record(data: &str) -> Vec<PathBuf> {
    data.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| split_record_line(line).into_iter().next())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .collect::<Vec<_>>()
}

/// Parse the paths listed in an `.egg-info/installed-files.txt` file.
///
/// Paths are relative to the `.egg-info` directory.
pub fn parse_installed_files(data: &str) -> Vec<PathBuf> {
    data.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect::<Vec<_>>()
}
