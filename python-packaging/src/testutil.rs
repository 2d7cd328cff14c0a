// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Test doubles for components that normally require a Python interpreter. */

use {
    crate::{
        bytecode::{BytecodeOptimizationLevel, PythonBytecodeCompiler},
        import_scan::{ImportScanner, ImportStatement, ScanResult},
        python_source::{decode_python_source, has_dunder_file},
    },
    anyhow::Result,
    std::path::Path,
};

/// A bytecode compiler that prefixes the source with `bc<level>`.
pub struct FakeBytecodeCompiler {
    pub magic_number: u32,
}

impl PythonBytecodeCompiler for FakeBytecodeCompiler {
    fn get_magic_number(&self) -> u32 {
        self.magic_number
    }

    fn compile(
        &mut self,
        source: &[u8],
        _filename: &str,
        optimize: BytecodeOptimizationLevel,
    ) -> Result<Vec<u8>> {
        let mut res = Vec::new();

        res.extend(match optimize {
            BytecodeOptimizationLevel::Zero => b"bc0",
            BytecodeOptimizationLevel::One => b"bc1",
            BytecodeOptimizationLevel::Two => b"bc2",
        });

        res.extend(source);

        Ok(res)
    }
}

/// A line based import scanner.
///
/// Understands the simple statement forms used in tests. Indented imports
/// are treated as conditional. A line reading `SYNTAX ERROR` makes the
/// source invalid.
#[derive(Default)]
pub struct FakeImportScanner {
    /// Filenames passed to `scan()`, in call order.
    pub scanned: Vec<String>,
}

fn split_names(s: &str) -> impl Iterator<Item = &str> {
    s.split(',')
        .map(|n| n.trim().trim_matches(|c| c == '(' || c == ')').trim())
        .filter(|n| !n.is_empty())
}

impl ImportScanner for FakeImportScanner {
    fn scan(&mut self, source: &[u8], filename: &str) -> Result<ScanResult> {
        self.scanned.push(filename.to_string());

        let text = decode_python_source(source);
        let mut res = ScanResult::default();

        for line in text.lines() {
            let trimmed = line.trim_start();
            let conditional = trimmed.len() != line.len();
            let toplevel = !conditional;

            if trimmed == "SYNTAX ERROR" {
                return Ok(ScanResult {
                    error: Some(format!("invalid syntax ({})", filename)),
                    ..Default::default()
                });
            }

            if let Some(rest) = trimmed.strip_prefix("import ") {
                for part in split_names(rest) {
                    let mut words = part.split(" as ");
                    let name = words.next().unwrap_or(part).trim();
                    let bound = words
                        .next()
                        .map(|s| s.trim())
                        .unwrap_or_else(|| name.split('.').next().unwrap_or(name));

                    res.imports.push(ImportStatement {
                        name: name.to_string(),
                        conditional,
                        is_global: true,
                        ..Default::default()
                    });
                    if toplevel {
                        res.globals.insert(bound.to_string());
                    }
                }
            } else if let Some(rest) = trimmed.strip_prefix("from ") {
                let (module, names) = match rest.split_once(" import ") {
                    Some(v) => v,
                    None => continue,
                };
                let module = module.trim();
                let level = module.chars().take_while(|c| *c == '.').count();
                let names = split_names(names)
                    .map(|n| n.split(" as ").next().unwrap_or(n).trim().to_string())
                    .collect::<Vec<_>>();
                let star = names == ["*"];

                if toplevel && !star {
                    res.globals.extend(names.iter().cloned());
                }

                res.imports.push(ImportStatement {
                    name: module[level..].to_string(),
                    level,
                    fromlist: if star { vec![] } else { names },
                    star,
                    conditional,
                    is_global: true,
                });
            } else if toplevel {
                let name = if let Some(rest) = trimmed
                    .strip_prefix("def ")
                    .or_else(|| trimmed.strip_prefix("class "))
                {
                    rest.split(|c: char| !(c.is_alphanumeric() || c == '_'))
                        .next()
                } else {
                    trimmed.split_once('=').map(|(lhs, _)| lhs.trim())
                };

                if let Some(name) = name {
                    if crate::finder::is_identifier(name) {
                        res.globals.insert(name.to_string());
                    }
                }
            }
        }

        res.uses_dunder_file = has_dunder_file(source)?;

        Ok(res)
    }
}

/// Write a tree of text files below `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) -> std::io::Result<()> {
    for (path, content) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
    }

    Ok(())
}
