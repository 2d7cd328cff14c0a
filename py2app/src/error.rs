// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Errors that abort the build of a bundle.
#[derive(Debug, Error)]
pub enum Py2appError {
    /// Invalid or missing configuration. The message names the dotted key.
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    MissingInput(String),

    #[error("recipe {name:?} failed: {message}")]
    Recipe { name: String, message: String },

    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("{0}")]
    Standalone(String),

    #[error("{0}")]
    Bundle(String),

    #[error("Mach-O error: {0}")]
    MachO(#[from] apple_macho::MachOError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Py2appError {
    pub fn configuration(message: impl ToString) -> Self {
        Self::Configuration(message.to_string())
    }

    pub fn missing_input(message: impl ToString) -> Self {
        Self::MissingInput(message.to_string())
    }
}
