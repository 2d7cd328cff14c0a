// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Rewriting dynamic linking load commands in place.

Load commands are followed by padding up to the first section's file
offset. Commands may grow into that padding; a rewrite that needs more
room than is available fails instead of corrupting the file.
*/

use {
    crate::{
        macho::{command_string, slice_ranges, RawCommand, SliceLayout},
        MachOError,
    },
    goblin::mach::load_command::{
        LC_ID_DYLIB, LC_LAZY_LOAD_DYLIB, LC_LOAD_DYLIB, LC_LOAD_UPWARD_DYLIB, LC_LOAD_WEAK_DYLIB,
        LC_REEXPORT_DYLIB, LC_RPATH, LC_SEGMENT, LC_SEGMENT_64,
    },
    log::trace,
    scroll::{Endian, Pread, Pwrite},
    std::{collections::BTreeMap, os::unix::fs::PermissionsExt, path::Path},
};

/// Section types whose content does not occupy file space.
const ZEROFILL_SECTION_TYPES: [u32; 3] = [0x1, 0xc, 0x12];

/// Changes to apply to the load commands of a file.
#[derive(Clone, Debug, Default)]
pub struct LoadCommandChanges {
    /// Old dylib name to new dylib name.
    pub dylib_renames: BTreeMap<String, String>,
    /// New `LC_ID_DYLIB` value. Ignored for files without an install name.
    pub new_id: Option<String>,
    /// `LC_RPATH` entries to append when not already present.
    pub add_rpaths: Vec<String>,
}

impl LoadCommandChanges {
    pub fn is_empty(&self) -> bool {
        self.dylib_renames.is_empty() && self.new_id.is_none() && self.add_rpaths.is_empty()
    }
}

fn is_dylib_reference(cmd: u32) -> bool {
    matches!(
        cmd,
        LC_LOAD_DYLIB
            | LC_LOAD_WEAK_DYLIB
            | LC_REEXPORT_DYLIB
            | LC_LAZY_LOAD_DYLIB
            | LC_LOAD_UPWARD_DYLIB
    )
}

/// Encode a command made of a fixed part followed by a string.
///
/// `fixed` is the original fixed part; its `cmdsize` and string offset
/// fields are updated.
fn encode_string_command(
    fixed: &[u8],
    value: &str,
    align: usize,
    endian: Endian,
) -> Result<Vec<u8>, MachOError> {
    let mut buf = fixed.to_vec();
    buf.extend(value.as_bytes());
    buf.push(0);
    while buf.len() % align != 0 {
        buf.push(0);
    }

    let cmdsize = buf.len() as u32;
    buf.pwrite_with(cmdsize, 4, endian)?;
    buf.pwrite_with(fixed.len() as u32, 8, endian)?;

    Ok(buf)
}

/// File offset where load commands must end.
fn load_command_limit(
    data: &[u8],
    layout: &SliceLayout,
) -> Result<usize, MachOError> {
    let endian = layout.endian;
    let mut limit = data.len();

    for command in &layout.commands {
        // (nsects field, first section, section size, offset field, flags field)
        let shape = match command.cmd {
            LC_SEGMENT_64 => (64, 72, 80, 48, 64),
            LC_SEGMENT => (48, 56, 68, 40, 56),
            _ => continue,
        };
        let (nsects_field, first, size, offset_field, flags_field) = shape;

        let nsects: u32 = data.pread_with(command.offset + nsects_field, endian)?;
        for i in 0..nsects as usize {
            let section = command.offset + first + i * size;
            let offset: u32 = data.pread_with(section + offset_field, endian)?;
            let flags: u32 = data.pread_with(section + flags_field, endian)?;

            if offset > 0 && !ZEROFILL_SECTION_TYPES.contains(&(flags & 0xff)) {
                limit = limit.min(offset as usize);
            }
        }
    }

    Ok(limit)
}

/// Size of `dylib_command` up to the name it points at.
const DYLIB_COMMAND_SIZE: usize = 24;

/// The fixed part of a dylib command at `offset`.
fn dylib_fixed_part(raw: &[u8], offset: usize) -> Result<&[u8], MachOError> {
    raw.get(..DYLIB_COMMAND_SIZE)
        .ok_or(MachOError::MalformedLoadCommand(offset))
}

/// Apply `changes` to a thin image. Returns whether anything changed.
pub fn rewrite_slice(data: &mut [u8], changes: &LoadCommandChanges) -> Result<bool, MachOError> {
    let layout = SliceLayout::parse(data)?;
    let endian = layout.endian;
    let align = if layout.is_64 { 8 } else { 4 };
    let header_size = layout.header_size();

    let old_size: u32 = data.pread_with(20, endian)?;
    let old_size = old_size as usize;

    let mut commands: Vec<Vec<u8>> = vec![];
    let mut existing_rpaths = vec![];
    let mut changed = false;

    for command in &layout.commands {
        let RawCommand {
            offset,
            cmd,
            cmdsize,
        } = *command;
        let raw = &data[offset..offset + cmdsize];

        let replacement = if is_dylib_reference(cmd) {
            let name = command_string(data, command, 8, endian)?;
            changes
                .dylib_renames
                .get(&name)
                .filter(|new| **new != name)
                .cloned()
        } else if cmd == LC_ID_DYLIB {
            let name = command_string(data, command, 8, endian)?;
            changes.new_id.clone().filter(|new| *new != name)
        } else {
            if cmd == LC_RPATH {
                existing_rpaths.push(command_string(data, command, 8, endian)?);
            }
            None
        };

        match replacement {
            Some(value) => {
                trace!("rewriting load command at {:#x} to {}", offset, value);
                let fixed = dylib_fixed_part(raw, offset)?;
                commands.push(encode_string_command(fixed, &value, align, endian)?);
                changed = true;
            }
            None => commands.push(raw.to_vec()),
        }
    }

    for rpath in &changes.add_rpaths {
        if existing_rpaths.contains(rpath) {
            continue;
        }

        let mut fixed = vec![0u8; 12];
        fixed.pwrite_with(LC_RPATH, 0, endian)?;
        commands.push(encode_string_command(&fixed, rpath, align, endian)?);
        existing_rpaths.push(rpath.clone());
        changed = true;
    }

    if !changed {
        return Ok(false);
    }

    let new_size: usize = commands.iter().map(|c| c.len()).sum();
    let limit = load_command_limit(data, &layout)?;

    if header_size + new_size > limit {
        return Err(MachOError::InsufficientHeaderPadding {
            needed: new_size,
            available: limit.saturating_sub(header_size),
        });
    }

    let end = header_size + new_size.max(old_size);
    let mut position = header_size;
    for command in &commands {
        data[position..position + command.len()].copy_from_slice(command);
        position += command.len();
    }
    data[position..end].fill(0);

    data.pwrite_with(commands.len() as u32, 16, endian)?;
    data.pwrite_with(new_size as u32, 20, endian)?;

    Ok(true)
}

/// Apply `changes` to every slice of a thin or universal image.
pub fn rewrite_macho(data: &mut [u8], changes: &LoadCommandChanges) -> Result<bool, MachOError> {
    let mut changed = false;

    for (offset, size) in slice_ranges(data)? {
        changed |= rewrite_slice(&mut data[offset..offset + size], changes)?;
    }

    Ok(changed)
}

/// Rewrite the load commands of the file at `path`.
///
/// Read-only files are made writable for the duration of the write and
/// get their original mode back afterwards.
pub fn rewrite_macho_file(path: &Path, changes: &LoadCommandChanges) -> Result<bool, MachOError> {
    if changes.is_empty() {
        return Ok(false);
    }

    let mut data = std::fs::read(path)?;
    if !rewrite_macho(&mut data, changes)? {
        return Ok(false);
    }

    let permissions = std::fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    if mode & 0o200 == 0 {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o200))?;
    }

    let res = std::fs::write(path, &data);
    std::fs::set_permissions(path, permissions)?;
    res?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{testutil::MachOBuilder, CpuArch, MachOFile},
    };

    fn changes(renames: &[(&str, &str)]) -> LoadCommandChanges {
        LoadCommandChanges {
            dylib_renames: renames
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn rename_and_rpath() -> Result<(), MachOError> {
        let mut data = MachOBuilder::new(CpuArch::Arm64)
            .dylib_id("/opt/local/lib/libfoo.1.dylib")
            .load_dylib("/usr/lib/libSystem.B.dylib")
            .load_dylib("/opt/local/lib/libz.1.dylib")
            .build();

        let mut c = changes(&[(
            "/opt/local/lib/libz.1.dylib",
            "@rpath/libz.1.dylib",
        )]);
        c.new_id = Some("@rpath/libfoo.1.dylib".into());
        c.add_rpaths = vec!["@loader_path/".into()];

        assert!(rewrite_macho(&mut data, &c)?);

        let file = MachOFile::parse(&data)?;
        assert_eq!(
            file.dylib_names(),
            vec!["/usr/lib/libSystem.B.dylib", "@rpath/libz.1.dylib"]
        );
        assert_eq!(file.id_dylib(), Some("@rpath/libfoo.1.dylib"));
        assert_eq!(file.rpaths(), vec!["@loader_path/"]);

        // Applying the same changes again is a no-op.
        assert!(!rewrite_macho(&mut data, &c)?);

        Ok(())
    }

    #[test]
    fn shrinking_names() -> Result<(), MachOError> {
        let long = format!("/very/long/prefix/{}/libbar.dylib", "x".repeat(200));
        let mut data = MachOBuilder::new(CpuArch::X86_64).load_dylib(&long).build();

        assert!(rewrite_macho(&mut data, &changes(&[(&long, "@rpath/libbar.dylib")]))?);
        assert_eq!(
            MachOFile::parse(&data)?.dylib_names(),
            vec!["@rpath/libbar.dylib"]
        );

        Ok(())
    }

    #[test]
    fn truncated_dylib_command() -> Result<(), MachOError> {
        let command = [0u8; 32];

        assert!(matches!(
            dylib_fixed_part(&command[..16], 0x20),
            Err(MachOError::MalformedLoadCommand(0x20))
        ));
        assert_eq!(dylib_fixed_part(&command, 0x20)?.len(), DYLIB_COMMAND_SIZE);

        Ok(())
    }

    #[test]
    fn insufficient_padding() -> Result<(), MachOError> {
        let mut data = MachOBuilder::new(CpuArch::Arm64)
            .load_dylib("/a.dylib")
            .text_offset(0x100)
            .build();

        let new_name = format!("@rpath/{}.dylib", "y".repeat(300));
        let res = rewrite_macho(&mut data, &changes(&[("/a.dylib", &new_name)]));
        assert!(matches!(
            res,
            Err(MachOError::InsufficientHeaderPadding { .. })
        ));

        Ok(())
    }

    #[test]
    fn universal_file_on_disk() -> Result<(), MachOError> {
        let arm = MachOBuilder::new(CpuArch::Arm64)
            .load_dylib("/opt/lib/libq.dylib")
            .build();
        let intel = MachOBuilder::new(CpuArch::X86_64)
            .load_dylib("/opt/lib/libq.dylib")
            .build();

        let td = tempfile::TempDir::new()?;
        let path = td.path().join("ext.so");
        std::fs::write(&path, crate::testutil::universal(&[intel, arm])?)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o444))?;

        assert!(rewrite_macho_file(
            &path,
            &changes(&[("/opt/lib/libq.dylib", "@rpath/libq.dylib")])
        )?);

        let file = MachOFile::from_path(&path)?.ok_or(MachOError::NotMachO)?;
        for slice in &file.slices {
            assert_eq!(slice.dylibs[0].name, "@rpath/libq.dylib");
        }
        assert_eq!(
            std::fs::metadata(&path)?.permissions().mode() & 0o777,
            0o444
        );

        Ok(())
    }
}
