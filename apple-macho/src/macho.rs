// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reading the dynamic linking information of Mach-O files.

use {
    crate::{MachOError, MachOVersion},
    goblin::mach::{
        cputype::{CPU_TYPE_ARM64, CPU_TYPE_X86_64},
        fat::FAT_MAGIC,
        header::{MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64},
        load_command::{
            LC_BUILD_VERSION, LC_ID_DYLIB, LC_LAZY_LOAD_DYLIB, LC_LOAD_DYLIB,
            LC_LOAD_UPWARD_DYLIB, LC_LOAD_WEAK_DYLIB, LC_REEXPORT_DYLIB, LC_RPATH,
            LC_VERSION_MIN_MACOSX,
        },
        Mach, MachO,
    },
    scroll::{Endian, Pread},
    std::{io::Read, path::Path},
};

/// A CPU architecture of a Mach-O slice.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CpuArch {
    X86_64,
    Arm64,
    Other(u32),
}

impl CpuArch {
    pub fn from_cputype(cputype: u32) -> Self {
        match cputype {
            CPU_TYPE_X86_64 => Self::X86_64,
            CPU_TYPE_ARM64 => Self::Arm64,
            other => Self::Other(other),
        }
    }
}

impl std::fmt::Display for CpuArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X86_64 => f.write_str("x86_64"),
            Self::Arm64 => f.write_str("arm64"),
            Self::Other(v) => write!(f, "cputype-{:#x}", v),
        }
    }
}

/// How a dylib is linked.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DylibKind {
    Load,
    Weak,
    Reexport,
    Lazy,
    Upward,
}

impl DylibKind {
    fn from_cmd(cmd: u32) -> Option<Self> {
        match cmd {
            LC_LOAD_DYLIB => Some(Self::Load),
            LC_LOAD_WEAK_DYLIB => Some(Self::Weak),
            LC_REEXPORT_DYLIB => Some(Self::Reexport),
            LC_LAZY_LOAD_DYLIB => Some(Self::Lazy),
            LC_LOAD_UPWARD_DYLIB => Some(Self::Upward),
            _ => None,
        }
    }
}

/// A library referenced by a load command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DylibReference {
    pub name: String,
    pub kind: DylibKind,
}

/// Dynamic linking information of one architecture slice.
#[derive(Clone, Debug)]
pub struct MachOSlice {
    pub arch: CpuArch,
    pub filetype: u32,
    /// Install name from `LC_ID_DYLIB`.
    pub id_dylib: Option<String>,
    pub dylibs: Vec<DylibReference>,
    pub rpaths: Vec<String>,
    /// Minimum OS version from `LC_BUILD_VERSION` or `LC_VERSION_MIN_MACOSX`.
    pub min_os: Option<MachOVersion>,
    pub sdk: Option<MachOVersion>,
}

/// A load command located in a slice.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RawCommand {
    pub offset: usize,
    pub cmd: u32,
    pub cmdsize: usize,
}

/// Layout facts about a slice needed to read and write its load commands.
pub(crate) struct SliceLayout {
    pub endian: Endian,
    pub is_64: bool,
    pub commands: Vec<RawCommand>,
}

impl SliceLayout {
    pub fn parse(data: &[u8]) -> Result<Self, MachOError> {
        let macho = MachO::parse(data, 0)?;
        let endian = if macho.little_endian {
            Endian::Little
        } else {
            Endian::Big
        };

        let mut commands = vec![];
        for lc in &macho.load_commands {
            let cmd: u32 = data.pread_with(lc.offset, endian)?;
            let cmdsize: u32 = data.pread_with(lc.offset + 4, endian)?;
            let cmdsize = cmdsize as usize;

            if cmdsize < 8 || lc.offset + cmdsize > data.len() {
                return Err(MachOError::MalformedLoadCommand(lc.offset));
            }

            commands.push(RawCommand {
                offset: lc.offset,
                cmd,
                cmdsize,
            });
        }

        Ok(Self {
            endian,
            is_64: macho.is_64,
            commands,
        })
    }

    pub fn header_size(&self) -> usize {
        if self.is_64 {
            32
        } else {
            28
        }
    }
}

/// Read the NUL terminated string a load command points at.
///
/// `name_field` is the offset within the command of the `lc_str` offset.
pub(crate) fn command_string(
    data: &[u8],
    command: &RawCommand,
    name_field: usize,
    endian: Endian,
) -> Result<String, MachOError> {
    let name_offset: u32 = data.pread_with(command.offset + name_field, endian)?;
    let start = command.offset + name_offset as usize;
    let end = command.offset + command.cmdsize;

    if start >= end {
        return Err(MachOError::MalformedLoadCommand(command.offset));
    }

    let raw = &data[start..end];
    let len = raw.iter().position(|c| *c == 0).unwrap_or(raw.len());

    Ok(String::from_utf8_lossy(&raw[..len]).to_string())
}

impl MachOSlice {
    /// Parse a thin Mach-O image.
    pub fn parse(data: &[u8]) -> Result<Self, MachOError> {
        let macho = MachO::parse(data, 0)?;
        let layout = SliceLayout::parse(data)?;
        let endian = layout.endian;

        let mut slice = Self {
            arch: CpuArch::from_cputype(macho.header.cputype),
            filetype: macho.header.filetype,
            id_dylib: None,
            dylibs: vec![],
            rpaths: vec![],
            min_os: None,
            sdk: None,
        };

        for command in &layout.commands {
            match command.cmd {
                LC_ID_DYLIB => {
                    slice.id_dylib = Some(command_string(data, command, 8, endian)?);
                }
                LC_RPATH => {
                    slice.rpaths.push(command_string(data, command, 8, endian)?);
                }
                LC_BUILD_VERSION => {
                    let minos: u32 = data.pread_with(command.offset + 12, endian)?;
                    let sdk: u32 = data.pread_with(command.offset + 16, endian)?;
                    slice.min_os = Some(MachOVersion::from_encoded(minos));
                    slice.sdk = Some(MachOVersion::from_encoded(sdk));
                }
                LC_VERSION_MIN_MACOSX => {
                    let version: u32 = data.pread_with(command.offset + 8, endian)?;
                    let sdk: u32 = data.pread_with(command.offset + 12, endian)?;
                    slice.min_os = Some(MachOVersion::from_encoded(version));
                    slice.sdk = Some(MachOVersion::from_encoded(sdk));
                }
                cmd => {
                    if let Some(kind) = DylibKind::from_cmd(cmd) {
                        slice.dylibs.push(DylibReference {
                            name: command_string(data, command, 8, endian)?,
                            kind,
                        });
                    }
                }
            }
        }

        Ok(slice)
    }
}

/// Byte ranges `(offset, size)` of the thin images in a Mach-O file.
pub(crate) fn slice_ranges(data: &[u8]) -> Result<Vec<(usize, usize)>, MachOError> {
    match Mach::parse(data)? {
        Mach::Binary(_) => Ok(vec![(0, data.len())]),
        Mach::Fat(multiarch) => {
            let mut res = vec![];
            for arch in multiarch.iter_arches() {
                let arch = arch?;
                let (offset, size) = (arch.offset as usize, arch.size as usize);
                if offset + size > data.len() {
                    return Err(MachOError::NotMachO);
                }
                res.push((offset, size));
            }
            Ok(res)
        }
    }
}

/// A thin or universal Mach-O file.
#[derive(Clone, Debug)]
pub struct MachOFile {
    pub slices: Vec<MachOSlice>,
}

impl MachOFile {
    pub fn parse(data: &[u8]) -> Result<Self, MachOError> {
        if !is_macho_header(data) {
            return Err(MachOError::NotMachO);
        }

        let slices = slice_ranges(data)?
            .into_iter()
            .map(|(offset, size)| MachOSlice::parse(&data[offset..offset + size]))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { slices })
    }

    /// Parse the file at `path`. Returns `Ok(None)` for files that aren't Mach-O.
    pub fn from_path(path: &Path) -> Result<Option<Self>, MachOError> {
        if !is_macho_file(path) {
            return Ok(None);
        }

        Ok(Some(Self::parse(&std::fs::read(path)?)?))
    }

    /// Architectures present, in slice order.
    pub fn archs(&self) -> Vec<CpuArch> {
        self.slices.iter().map(|s| s.arch).collect()
    }

    /// All referenced dylib names, de-duplicated across slices.
    pub fn dylib_names(&self) -> Vec<&str> {
        let mut res: Vec<&str> = vec![];
        for slice in &self.slices {
            for dylib in &slice.dylibs {
                if !res.contains(&dylib.name.as_str()) {
                    res.push(&dylib.name);
                }
            }
        }
        res
    }

    /// All `LC_RPATH` entries, de-duplicated across slices.
    pub fn rpaths(&self) -> Vec<&str> {
        let mut res: Vec<&str> = vec![];
        for slice in &self.slices {
            for rpath in &slice.rpaths {
                if !res.contains(&rpath.as_str()) {
                    res.push(rpath);
                }
            }
        }
        res
    }

    /// The install name of the first slice declaring one.
    pub fn id_dylib(&self) -> Option<&str> {
        self.slices.iter().find_map(|s| s.id_dylib.as_deref())
    }
}

/// Whether `data` starts with a Mach-O or universal binary magic.
///
/// Java class files share the universal magic; those are told apart by the
/// architecture count, which is small for real universal binaries.
pub fn is_macho_header(data: &[u8]) -> bool {
    let magic = match data.pread_with::<u32>(0, Endian::Big) {
        Ok(v) => v,
        Err(_) => return false,
    };

    match magic {
        FAT_MAGIC => matches!(data.pread_with::<u32>(4, Endian::Big), Ok(n) if n > 0 && n < 20),
        _ => {
            let le = data.pread_with::<u32>(0, Endian::Little).unwrap_or(0);
            [MH_MAGIC, MH_MAGIC_64, MH_CIGAM, MH_CIGAM_64].contains(&le)
        }
    }
}

/// Whether the file at `path` is a Mach-O file. Symlinks are not followed.
pub fn is_macho_file(path: &Path) -> bool {
    match path.symlink_metadata() {
        Ok(m) if m.file_type().is_file() => {}
        _ => return false,
    }

    let mut header = [0u8; 8];
    match std::fs::File::open(path).and_then(|mut fh| fh.read_exact(&mut header)) {
        Ok(()) => is_macho_header(&header),
        Err(_) => false,
    }
}
