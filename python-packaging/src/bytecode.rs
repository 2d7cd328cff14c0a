// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Work with Python bytecode. */

use {
    crate::helper::HelperProcess,
    anyhow::{anyhow, Result},
    byteorder::{LittleEndian, WriteBytesExt},
    std::{convert::TryFrom, path::Path},
};

pub const BYTECODE_COMPILER: &[u8] = include_bytes!("bytecodecompiler.py");

/// Python bytecode optimization level.
#[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub enum BytecodeOptimizationLevel {
    Zero,
    One,
    Two,
}

impl TryFrom<i32> for BytecodeOptimizationLevel {
    type Error = &'static str;

    fn try_from(i: i32) -> Result<Self, Self::Error> {
        match i {
            0 => Ok(BytecodeOptimizationLevel::Zero),
            1 => Ok(BytecodeOptimizationLevel::One),
            2 => Ok(BytecodeOptimizationLevel::Two),
            _ => Err("unsupported bytecode optimization level"),
        }
    }
}

impl From<BytecodeOptimizationLevel> for i32 {
    fn from(level: BytecodeOptimizationLevel) -> Self {
        match level {
            BytecodeOptimizationLevel::Zero => 0,
            BytecodeOptimizationLevel::One => 1,
            BytecodeOptimizationLevel::Two => 2,
        }
    }
}

/// An entity that can compile Python source code to bytecode.
pub trait PythonBytecodeCompiler {
    /// Obtain the magic number to use in the bytecode header.
    fn get_magic_number(&self) -> u32;

    /// Compile Python source code to a marshalled code object.
    ///
    /// `filename` is embedded in the code object and shows up in tracebacks.
    fn compile(
        &mut self,
        source: &[u8],
        filename: &str,
        optimize: BytecodeOptimizationLevel,
    ) -> Result<Vec<u8>>;
}

/// An entity to perform Python bytecode compilation.
#[derive(Debug)]
pub struct BytecodeCompiler {
    process: HelperProcess,

    /// Magic number for bytecode header.
    magic_number: u32,
}

impl BytecodeCompiler {
    /// Create a bytecode compiler using a Python executable.
    ///
    /// A Python process will be started and it will start executing a Python
    /// source file embedded in this crate. That process interacts with this
    /// object via a pipe, which is used to send bytecode compilation
    /// requests and receive the compiled bytecode. The process is terminated
    /// when this object is dropped.
    pub fn new(python: &Path) -> Result<BytecodeCompiler> {
        let mut process = HelperProcess::new(python, "bytecodecompiler.py", BYTECODE_COMPILER)?;

        process.write_line("magic_number")?;
        let magic_number = process.read_u32()?;

        Ok(BytecodeCompiler {
            process,
            magic_number,
        })
    }
}

impl PythonBytecodeCompiler for BytecodeCompiler {
    fn get_magic_number(&self) -> u32 {
        self.magic_number
    }

    fn compile(
        &mut self,
        source: &[u8],
        filename: &str,
        optimize: BytecodeOptimizationLevel,
    ) -> Result<Vec<u8>> {
        self.process.write_line("compile")?;
        self.process.write_line(filename.len().to_string())?;
        self.process.write_line(source.len().to_string())?;
        self.process.write_line(i32::from(optimize).to_string())?;
        self.process.write_all(filename.as_bytes())?;
        self.process.write_all(source)?;

        let response = self.process.read_response()?;

        // The helper prefixes its payload with a status byte so compile errors
        // can be distinguished from bytecode.
        match response.split_first() {
            Some((b'\x00', bytecode)) => Ok(bytecode.to_vec()),
            Some((b'\x01', message)) => Err(anyhow!(
                "error compiling {}: {}",
                filename,
                String::from_utf8_lossy(message)
            )),
            _ => Err(anyhow!("malformed response from bytecode compiler")),
        }
    }
}

/// Compute a `.pyc` header that never triggers source revalidation.
///
/// The header carries the unchecked hash based flag and a zero source hash.
pub fn unchecked_pyc_header(magic_number: u32) -> Result<Vec<u8>> {
    let mut header: Vec<u8> = Vec::new();

    header.write_u32::<LittleEndian>(magic_number)?;
    header.write_u32::<LittleEndian>(1)?;
    header.write_u64::<LittleEndian>(0)?;

    Ok(header)
}

/// Compile source into a complete `.pyc` image.
///
/// Compilers return a bare marshalled code object. This prepends the header
/// of [unchecked_pyc_header], which is what an archive without source files
/// needs.
pub fn compile_pyc(
    compiler: &mut dyn PythonBytecodeCompiler,
    source: &[u8],
    filename: &str,
    optimize: BytecodeOptimizationLevel,
) -> Result<Vec<u8>> {
    let mut pyc = unchecked_pyc_header(compiler.get_magic_number())?;
    pyc.extend(compiler.compile(source, filename, optimize)?);

    Ok(pyc)
}
