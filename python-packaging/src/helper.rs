// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Long running Python helper processes.

Bytecode compilation and import scanning both need the target interpreter.
Rather than spawning a process per module, a helper script is started once
and requests are exchanged over its stdin/stdout. Every response is framed
as a decimal length line followed by that many bytes.
*/

use {
    anyhow::{anyhow, Context, Result},
    byteorder::{LittleEndian, ReadBytesExt},
    std::{
        io::{BufRead, BufReader, Read, Write},
        path::Path,
        process,
    },
};

/// A Python process executing an embedded helper script.
#[derive(Debug)]
pub(crate) struct HelperProcess {
    _temp_dir: tempfile::TempDir,
    command: process::Child,
    stdin: process::ChildStdin,
    stdout: BufReader<process::ChildStdout>,
}

impl HelperProcess {
    /// Start `python` running `script` (written to a temporary file named `name`).
    pub fn new(python: &Path, name: &str, script: &[u8]) -> Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("python-helper")
            .tempdir()
            .context("creating temporary directory for helper script")?;

        let script_path = temp_dir.path().join(name);
        std::fs::write(&script_path, script)
            .with_context(|| format!("writing {}", script_path.display()))?;

        let mut command = process::Command::new(python)
            .arg("-E")
            .arg("-s")
            .arg(&script_path)
            .stdin(process::Stdio::piped())
            .stdout(process::Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {}", python.display()))?;

        let stdin = command
            .stdin
            .take()
            .ok_or_else(|| anyhow!("unable to get stdin"))?;
        let stdout = command
            .stdout
            .take()
            .ok_or_else(|| anyhow!("unable to get stdout"))?;

        Ok(Self {
            _temp_dir: temp_dir,
            command,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Write raw request bytes to the helper.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stdin.write_all(data)?;
        Ok(())
    }

    /// Write a single request line.
    pub fn write_line(&mut self, line: impl AsRef<str>) -> Result<()> {
        self.stdin.write_all(line.as_ref().as_bytes())?;
        self.stdin.write_all(b"\n")?;
        Ok(())
    }

    /// Flush the request and read a bare little endian u32 response.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.stdin.flush()?;
        Ok(self.stdout.read_u32::<LittleEndian>()?)
    }

    /// Flush the request and read the framed response.
    pub fn read_response(&mut self) -> Result<Vec<u8>> {
        self.stdin.flush()?;

        let mut len_s = String::new();
        self.stdout.read_line(&mut len_s)?;

        let len_s = len_s.trim_end();
        if len_s.is_empty() {
            return Err(anyhow!("python helper process exited unexpectedly"));
        }

        let len = len_s
            .parse::<u64>()
            .with_context(|| format!("parsing response length {:?}", len_s))?;

        let mut data = Vec::with_capacity(len as usize);
        (&mut self.stdout).take(len).read_to_end(&mut data)?;

        if data.len() as u64 != len {
            return Err(anyhow!(
                "short response from python helper: expected {} bytes, got {}",
                len,
                data.len()
            ));
        }

        Ok(data)
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        // Errors are ignored: the process may already be gone.
        let _ = self.stdin.write_all(b"exit\n");
        let _ = self.stdin.flush();
        let _ = self.command.wait();
    }
}
