// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mach-O primitives for relocating dynamic libraries into bundles.

This crate reads the load commands that matter for dynamic linking
(`LC_LOAD_DYLIB` and friends, `LC_ID_DYLIB`, `LC_RPATH`, deployment target
commands) from thin and universal Mach-O files, and rewrites them in place
within the padding the linker leaves after the existing load commands.
*/

mod error;
pub use error::*;
mod macho;
pub use macho::*;
mod paths;
pub use paths::*;
mod rewrite;
pub use rewrite::*;
pub mod testutil;
mod tools;
pub use tools::*;
mod version;
pub use version::*;
