// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Static discovery of import statements in Python source code. */

use {
    crate::helper::HelperProcess,
    anyhow::{Context, Result},
    serde::Deserialize,
    std::{collections::BTreeSet, path::Path},
};

pub const IMPORT_SCANNER: &[u8] = include_bytes!("importscanner.py");

/// A single `import` or `from ... import` statement.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ImportStatement {
    /// Module being imported. Empty for `from . import x`.
    pub name: String,
    /// Number of leading dots for relative imports.
    #[serde(default)]
    pub level: usize,
    /// Names after `from X import`.
    #[serde(default)]
    pub fromlist: Vec<String>,
    /// `from X import *`.
    #[serde(default)]
    pub star: bool,
    /// Inside an `if` or `try` block.
    #[serde(default)]
    pub conditional: bool,
    /// Executed at module scope rather than in a function or class body.
    #[serde(default, rename = "global")]
    pub is_global: bool,
}

/// What scanning a single source file produced.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ScanResult {
    pub imports: Vec<ImportStatement>,
    /// Names bound at module scope.
    #[serde(default)]
    pub globals: BTreeSet<String>,
    /// Whether module scope code reads `__file__`.
    #[serde(default)]
    pub uses_dunder_file: bool,
    /// Syntax error message when the source could not be parsed.
    #[serde(default)]
    pub error: Option<String>,
}

/// An entity that can find the imports in Python source code.
pub trait ImportScanner {
    fn scan(&mut self, source: &[u8], filename: &str) -> Result<ScanResult>;
}

/// An [ImportScanner] backed by the `ast` module of a real interpreter.
///
/// Using the target interpreter guarantees the source is parsed with the
/// grammar it will eventually run under.
#[derive(Debug)]
pub struct PythonImportScanner {
    process: HelperProcess,
}

impl PythonImportScanner {
    pub fn new(python: &Path) -> Result<Self> {
        Ok(Self {
            process: HelperProcess::new(python, "importscanner.py", IMPORT_SCANNER)?,
        })
    }
}

impl ImportScanner for PythonImportScanner {
    fn scan(&mut self, source: &[u8], filename: &str) -> Result<ScanResult> {
        self.process.write_line("scan")?;
        self.process.write_line(filename.len().to_string())?;
        self.process.write_line(source.len().to_string())?;
        self.process.write_all(filename.as_bytes())?;
        self.process.write_all(source)?;

        let response = self.process.read_response()?;

        serde_json::from_slice(&response)
            .with_context(|| format!("parsing import scan of {}", filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scan_response() -> Result<()> {
        let data = br#"{
            "imports": [
                {"name": "os", "level": 0, "fromlist": [], "star": false, "conditional": false, "global": true},
                {"name": "", "level": 1, "fromlist": ["sibling"], "star": false, "conditional": true, "global": false}
            ],
            "globals": ["os", "main"],
            "uses_dunder_file": true,
            "error": null
        }"#;

        let result: ScanResult = serde_json::from_slice(data)?;
        assert_eq!(result.imports.len(), 2);
        assert!(result.imports[0].is_global);
        assert_eq!(result.imports[1].level, 1);
        assert!(result.imports[1].conditional);
        assert!(result.globals.contains("main"));
        assert!(result.uses_dunder_file);
        assert!(result.error.is_none());

        Ok(())
    }
}
