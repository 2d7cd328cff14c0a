// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Synthesizing minimal Mach-O images.

The images produced here have a `__TEXT` segment with a single section and
the requested dynamic linking load commands. They aren't runnable but
parse like real binaries, which is what tests of the inspection and
rewriting code need.
*/

use {
    crate::{CpuArch, MachOError, MachOVersion},
    goblin::mach::{
        cputype::{CPU_TYPE_ARM64, CPU_TYPE_X86_64},
        fat::FAT_MAGIC,
        header::{MH_DYLIB, MH_EXECUTE, MH_MAGIC_64},
        load_command::{
            LC_BUILD_VERSION, LC_ID_DYLIB, LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB, LC_RPATH,
            LC_SEGMENT_64, LC_VERSION_MIN_MACOSX,
        },
        MachO,
    },
};

const PLATFORM_MACOS: u32 = 1;

enum Command {
    Dylib(u32, String),
    Rpath(String),
    BuildVersion(MachOVersion),
    VersionMin(MachOVersion),
}

/// Builds a 64-bit little-endian Mach-O image.
pub struct MachOBuilder {
    arch: CpuArch,
    filetype: Option<u32>,
    text_offset: usize,
    commands: Vec<Command>,
}

fn padded_string(s: &str, header: usize) -> Vec<u8> {
    let mut res = s.as_bytes().to_vec();
    res.push(0);
    while (header + res.len()) % 8 != 0 {
        res.push(0);
    }
    res
}

impl MachOBuilder {
    pub fn new(arch: CpuArch) -> Self {
        Self {
            arch,
            filetype: None,
            text_offset: 0x1000,
            commands: vec![],
        }
    }

    /// File offset of the first section, which bounds the load command area.
    pub fn text_offset(mut self, offset: usize) -> Self {
        self.text_offset = offset;
        self
    }

    pub fn executable(mut self) -> Self {
        self.filetype = Some(MH_EXECUTE);
        self
    }

    pub fn dylib_id(mut self, name: &str) -> Self {
        self.commands.push(Command::Dylib(LC_ID_DYLIB, name.to_string()));
        self
    }

    pub fn load_dylib(mut self, name: &str) -> Self {
        self.commands
            .push(Command::Dylib(LC_LOAD_DYLIB, name.to_string()));
        self
    }

    pub fn weak_dylib(mut self, name: &str) -> Self {
        self.commands
            .push(Command::Dylib(LC_LOAD_WEAK_DYLIB, name.to_string()));
        self
    }

    pub fn rpath(mut self, path: &str) -> Self {
        self.commands.push(Command::Rpath(path.to_string()));
        self
    }

    /// Add an `LC_BUILD_VERSION` command.
    pub fn min_os(mut self, version: MachOVersion) -> Self {
        self.commands.push(Command::BuildVersion(version));
        self
    }

    /// Add an `LC_VERSION_MIN_MACOSX` command.
    pub fn version_min(mut self, version: MachOVersion) -> Self {
        self.commands.push(Command::VersionMin(version));
        self
    }

    fn encode_commands(&self) -> Vec<Vec<u8>> {
        let mut res = vec![];

        for command in &self.commands {
            let mut buf = vec![];
            match command {
                Command::Dylib(cmd, name) => {
                    let name = padded_string(name, 24);
                    buf.extend(cmd.to_le_bytes());
                    buf.extend(((24 + name.len()) as u32).to_le_bytes());
                    buf.extend(24u32.to_le_bytes());
                    buf.extend(2u32.to_le_bytes());
                    buf.extend(0x0001_0000u32.to_le_bytes());
                    buf.extend(0x0001_0000u32.to_le_bytes());
                    buf.extend(name);
                }
                Command::Rpath(path) => {
                    let path = padded_string(path, 12);
                    buf.extend(LC_RPATH.to_le_bytes());
                    buf.extend(((12 + path.len()) as u32).to_le_bytes());
                    buf.extend(12u32.to_le_bytes());
                    buf.extend(path);
                }
                Command::BuildVersion(v) => {
                    buf.extend(LC_BUILD_VERSION.to_le_bytes());
                    buf.extend(24u32.to_le_bytes());
                    buf.extend(PLATFORM_MACOS.to_le_bytes());
                    buf.extend(v.encode().to_le_bytes());
                    buf.extend(v.encode().to_le_bytes());
                    buf.extend(0u32.to_le_bytes());
                }
                Command::VersionMin(v) => {
                    buf.extend(LC_VERSION_MIN_MACOSX.to_le_bytes());
                    buf.extend(16u32.to_le_bytes());
                    buf.extend(v.encode().to_le_bytes());
                    buf.extend(v.encode().to_le_bytes());
                }
            }
            res.push(buf);
        }

        res
    }

    /// Produce the image.
    pub fn build(&self) -> Vec<u8> {
        const TEXT_SIZE: usize = 16;
        let total = self.text_offset + TEXT_SIZE;

        let mut segment = vec![];
        segment.extend(LC_SEGMENT_64.to_le_bytes());
        segment.extend((72u32 + 80).to_le_bytes());
        segment.extend(b"__TEXT\0\0\0\0\0\0\0\0\0\0");
        segment.extend(0u64.to_le_bytes());
        segment.extend((total as u64).to_le_bytes());
        segment.extend(0u64.to_le_bytes());
        segment.extend((total as u64).to_le_bytes());
        segment.extend(5u32.to_le_bytes());
        segment.extend(5u32.to_le_bytes());
        segment.extend(1u32.to_le_bytes());
        segment.extend(0u32.to_le_bytes());
        // section_64
        segment.extend(b"__text\0\0\0\0\0\0\0\0\0\0");
        segment.extend(b"__TEXT\0\0\0\0\0\0\0\0\0\0");
        segment.extend((self.text_offset as u64).to_le_bytes());
        segment.extend((TEXT_SIZE as u64).to_le_bytes());
        segment.extend((self.text_offset as u32).to_le_bytes());
        segment.extend(4u32.to_le_bytes());
        segment.extend([0u8; 8]);
        segment.extend(0x8000_0400u32.to_le_bytes());
        segment.extend([0u8; 12]);

        let mut commands = vec![segment];
        commands.extend(self.encode_commands());
        let sizeofcmds: usize = commands.iter().map(|c| c.len()).sum();

        let has_id = self
            .commands
            .iter()
            .any(|c| matches!(c, Command::Dylib(cmd, _) if *cmd == LC_ID_DYLIB));
        let filetype = self
            .filetype
            .unwrap_or(if has_id { MH_DYLIB } else { MH_EXECUTE });

        let (cputype, cpusubtype) = match self.arch {
            CpuArch::Arm64 => (CPU_TYPE_ARM64, 0u32),
            CpuArch::X86_64 => (CPU_TYPE_X86_64, 3u32),
            CpuArch::Other(v) => (v, 0),
        };

        let mut data = vec![];
        data.extend(MH_MAGIC_64.to_le_bytes());
        data.extend(cputype.to_le_bytes());
        data.extend(cpusubtype.to_le_bytes());
        data.extend(filetype.to_le_bytes());
        data.extend((commands.len() as u32).to_le_bytes());
        data.extend((sizeofcmds as u32).to_le_bytes());
        data.extend(0u32.to_le_bytes());
        data.extend(0u32.to_le_bytes());
        for command in commands {
            data.extend(command);
        }

        assert!(
            data.len() <= self.text_offset,
            "load commands overflow the text section"
        );
        data.resize(total, 0xcc);

        data
    }
}

/// Combine thin images into a universal binary.
pub fn universal(binaries: &[Vec<u8>]) -> Result<Vec<u8>, MachOError> {
    const ALIGN_POWER: u32 = 14;
    let align = 1usize << ALIGN_POWER;

    let mut header = vec![];
    header.extend(FAT_MAGIC.to_be_bytes());
    header.extend((binaries.len() as u32).to_be_bytes());

    let mut offset = align;
    let mut placements = vec![];
    for binary in binaries {
        let macho = MachO::parse(binary, 0)?;
        header.extend(macho.header.cputype.to_be_bytes());
        header.extend(macho.header.cpusubtype.to_be_bytes());
        header.extend((offset as u32).to_be_bytes());
        header.extend((binary.len() as u32).to_be_bytes());
        header.extend(ALIGN_POWER.to_be_bytes());

        placements.push(offset);
        offset += binary.len();
        offset += (align - offset % align) % align;
    }

    let mut data = header;
    for (binary, offset) in binaries.iter().zip(placements) {
        data.resize(offset, 0);
        data.extend(binary);
    }

    Ok(data)
}
