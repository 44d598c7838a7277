use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};

/// A 128-bit provider/activity identifier.
///
/// On the wire a GUID is stored mixed-endian: a little-endian `u32`, two little-endian `u16`s
/// and eight raw bytes.
#[derive(PartialOrd, Ord, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

impl Guid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Guid {
        Guid {
            data1,
            data2,
            data3,
            data4,
        }
    }

    pub const fn nil() -> Guid {
        Guid::new(0, 0, 0, [0; 8])
    }

    pub fn is_nil(&self) -> bool {
        *self == Guid::nil()
    }

    pub fn from_bytes_le(bytes: &[u8; 16]) -> Guid {
        let mut data4 = [0; 8];
        data4.copy_from_slice(&bytes[8..16]);
        Guid {
            data1: LittleEndian::read_u32(&bytes[0..4]),
            data2: LittleEndian::read_u16(&bytes[4..6]),
            data3: LittleEndian::read_u16(&bytes[6..8]),
            data4,
        }
    }

    pub fn to_bytes_le(&self) -> [u8; 16] {
        let mut out = [0; 16];
        LittleEndian::write_u32(&mut out[0..4], self.data1);
        LittleEndian::write_u16(&mut out[4..6], self.data2);
        LittleEndian::write_u16(&mut out[6..8], self.data3);
        out[8..16].copy_from_slice(&self.data4);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseGuidError(String);

impl Display for ParseGuidError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "`{}` is not a GUID", self.0)
    }
}

impl std::error::Error for ParseGuidError {}

impl FromStr for Guid {
    type Err = ParseGuidError;

    /// Accepts the dashed `D` form, optionally wrapped in braces, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseGuidError(s.to_owned());
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
            .unwrap_or(trimmed);

        let groups: Vec<&str> = inner.split('-').collect();
        if groups.len() != 5 {
            return Err(err());
        }
        let expected = [8, 4, 4, 4, 12];
        if groups
            .iter()
            .zip(expected.iter())
            .any(|(g, len)| g.len() != *len || !g.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(err());
        }

        let data1 = u32::from_str_radix(groups[0], 16).map_err(|_| err())?;
        let data2 = u16::from_str_radix(groups[1], 16).map_err(|_| err())?;
        let data3 = u16::from_str_radix(groups[2], 16).map_err(|_| err())?;
        let tail = format!("{}{}", groups[3], groups[4]);
        let mut data4 = [0; 8];
        for (i, byte) in data4.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&tail[i * 2..i * 2 + 2], 16).map_err(|_| err())?;
        }

        Ok(Guid::new(data1, data2, data3, data4))
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
