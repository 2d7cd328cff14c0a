// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Versions as encoded in Mach-O load commands.

use {crate::MachOError, std::str::FromStr};

/// An `X.Y.Z` version, encoded in Mach-O as `xxxx.yy.zz` nibbles of a `u32`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MachOVersion {
    pub major: u16,
    pub minor: u8,
    pub patch: u8,
}

impl MachOVersion {
    pub fn new(major: u16, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Decode from the load command representation.
    pub fn from_encoded(v: u32) -> Self {
        Self {
            major: (v >> 16) as u16,
            minor: ((v >> 8) & 0xff) as u8,
            patch: (v & 0xff) as u8,
        }
    }

    pub fn encode(&self) -> u32 {
        ((self.major as u32) << 16) | ((self.minor as u32) << 8) | self.patch as u32
    }
}

impl std::fmt::Display for MachOVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.patch == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

impl FromStr for MachOVersion {
    type Err = MachOError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MachOError::InvalidVersion(s.to_string());

        let mut parts = s.trim().split('.');
        let major = parts
            .next()
            .ok_or_else(invalid)?
            .parse::<u16>()
            .map_err(|_| invalid())?;
        let minor = match parts.next() {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => 0,
        };

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(major, minor, patch))
    }
}
