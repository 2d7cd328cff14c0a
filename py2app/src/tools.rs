// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Running external tools.

Some Xcode tools (`ibtool` in particular) leave the standard streams they
inherit in non-blocking mode, after which writing to stderr fails with
`EAGAIN`. Every tool run is therefore wrapped in a [StdioGuard] that
snapshots `O_NONBLOCK` on the standard streams and restores it afterwards.
*/

use {
    crate::error::Py2appError,
    log::{debug, warn},
    nix::fcntl::{fcntl, FcntlArg, OFlag},
    std::{
        ffi::OsString,
        os::fd::AsFd,
        path::{Path, PathBuf},
    },
};

/// Whether `O_NONBLOCK` is set on a file descriptor.
pub fn is_nonblocking(fd: impl AsFd) -> nix::Result<bool> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    Ok(flags.contains(OFlag::O_NONBLOCK))
}

/// Set or clear `O_NONBLOCK` on a file descriptor.
pub fn set_nonblocking(fd: impl AsFd, value: bool) -> nix::Result<()> {
    let fd = fd.as_fd();
    let mut flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    flags.set(OFlag::O_NONBLOCK, value);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;

    Ok(())
}

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

impl Stream {
    fn is_nonblocking(self) -> nix::Result<bool> {
        match self {
            Self::Stdin => is_nonblocking(std::io::stdin().as_fd()),
            Self::Stdout => is_nonblocking(std::io::stdout().as_fd()),
            Self::Stderr => is_nonblocking(std::io::stderr().as_fd()),
        }
    }

    fn set_nonblocking(self, value: bool) -> nix::Result<()> {
        match self {
            Self::Stdin => set_nonblocking(std::io::stdin().as_fd(), value),
            Self::Stdout => set_nonblocking(std::io::stdout().as_fd(), value),
            Self::Stderr => set_nonblocking(std::io::stderr().as_fd(), value),
        }
    }
}

/// Restores the blocking mode of stdin, stdout and stderr when dropped.
#[derive(Debug)]
pub struct StdioGuard {
    saved: Vec<(Stream, bool)>,
}

impl StdioGuard {
    pub fn new() -> Self {
        let saved = [Stream::Stdin, Stream::Stdout, Stream::Stderr]
            .into_iter()
            .filter_map(|s| s.is_nonblocking().ok().map(|v| (s, v)))
            .collect();

        Self { saved }
    }
}

impl Default for StdioGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StdioGuard {
    fn drop(&mut self) {
        for (stream, value) in &self.saved {
            if stream.is_nonblocking().ok() != Some(*value) {
                debug!("restoring blocking mode of {:?}", stream);
                if let Err(e) = stream.set_nonblocking(*value) {
                    warn!("unable to restore blocking mode of {:?}: {}", stream, e);
                }
            }
        }
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string())
}

/// Run a program to completion.
///
/// Output is captured. It is logged at debug level on success and as
/// warnings when the program fails.
pub fn run_program<I, S>(program: &Path, args: I) -> Result<(), Py2appError>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let tool = tool_name(program);
    let args = args.into_iter().map(|a| a.into()).collect::<Vec<OsString>>();
    debug!(
        "running {} {}",
        program.display(),
        args.iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let _guard = StdioGuard::new();
    let output = duct::cmd(program, &args)
        .stderr_to_stdout()
        .stdout_capture()
        .unchecked()
        .run()
        .map_err(|e| Py2appError::ExternalTool {
            tool: tool.clone(),
            message: e.to_string(),
        })?;

    let text = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        for line in text.lines() {
            debug!("{}: {}", tool, line);
        }
        Ok(())
    } else {
        for line in text.lines() {
            warn!("{}: {}", tool, line);
        }
        Err(Py2appError::ExternalTool {
            tool,
            message: format!("exited with {}", output.status),
        })
    }
}

/// Locate a developer tool through the `xcrun` cache.
pub fn locate_tool(name: &str) -> Result<PathBuf, Py2appError> {
    apple_macho::find_tool(name).map_err(|e| Py2appError::ExternalTool {
        tool: name.to_string(),
        message: e.to_string(),
    })
}

/// Run a developer tool found with [locate_tool].
pub fn run_tool<I, S>(name: &str, args: I) -> Result<(), Py2appError>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    run_program(&locate_tool(name)?, args)
}
