// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MachOError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mach-o parse error: {0}")]
    Goblin(#[from] goblin::error::Error),

    #[error("scroll error: {0}")]
    Scroll(#[from] scroll::Error),

    #[error("not a Mach-O file")]
    NotMachO,

    #[error("malformed load command at offset {0}")]
    MalformedLoadCommand(usize),

    #[error("load commands need {needed} bytes but only {available} are available; relink with -headerpad_max_install_names")]
    InsufficientHeaderPadding { needed: usize, available: usize },

    #[error("unable to find tool {0}")]
    ToolNotFound(String),

    #[error("invalid version string: {0}")]
    InvalidVersion(String),
}
