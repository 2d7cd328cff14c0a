// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Python import graphs implemented in Rust

This crate exposes functionality for discovering the Python modules an
application needs. It can introspect a Python interpreter, locate modules
on a search path, statically scan Python source for imports, build a
dependency graph of modules and compile and archive the result.

The main entry point is [graph::ModuleGraph].
*/

pub mod bytecode;
pub mod filesystem_scanning;
pub mod finder;
pub mod graph;
mod helper;
pub mod import_scan;
pub mod interpreter;
pub mod module_util;
pub mod package_metadata;
pub mod python_source;
pub mod testutil;
pub mod zip_library;
