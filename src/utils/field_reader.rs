use encoding::{DecoderTrap, EncodingRef};
use jiff::Timestamp;

use crate::err::{DeserializationError, DeserializationResult};
use crate::guid::Guid;
use crate::utils::bytes;
use crate::utils::time::filetime_to_timestamp;
use crate::utils::utf16::{Utf16LeDecodeError, decode_utf16le_bytes_z};

/// A bounds-checked cursor over an event payload.
///
/// This is the slice/offset equivalent of `Cursor<&[u8]>`: every read checks the bytes remaining
/// against the size it is about to consume, and fails with [`DeserializationError::Truncated`]
/// instead of reading past the end. A failed read leaves the cursor where it was.
///
/// All reads are little-endian and advance the cursor on success.
#[derive(Clone, Copy, Debug)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        FieldReader { buf, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    #[inline]
    fn take(&mut self, len: usize, what: &'static str) -> DeserializationResult<&'a [u8]> {
        let out = bytes::slice_r(self.buf, self.pos, len, what)?;
        self.pos += len;
        Ok(out)
    }

    #[inline]
    fn array<const N: usize>(&mut self, what: &'static str) -> DeserializationResult<[u8; N]> {
        let v = bytes::read_array_r::<N>(self.buf, self.pos, what)?;
        self.pos += N;
        Ok(v)
    }

    pub fn u8(&mut self) -> DeserializationResult<u8> {
        Ok(self.array::<1>("u8")?[0])
    }

    pub fn i8(&mut self) -> DeserializationResult<i8> {
        Ok(i8::from_le_bytes(self.array::<1>("i8")?))
    }

    pub fn u16(&mut self) -> DeserializationResult<u16> {
        Ok(u16::from_le_bytes(self.array::<2>("u16")?))
    }

    pub fn i16(&mut self) -> DeserializationResult<i16> {
        Ok(i16::from_le_bytes(self.array::<2>("i16")?))
    }

    pub fn u32(&mut self) -> DeserializationResult<u32> {
        Ok(u32::from_le_bytes(self.array::<4>("u32")?))
    }

    pub fn i32(&mut self) -> DeserializationResult<i32> {
        Ok(i32::from_le_bytes(self.array::<4>("i32")?))
    }

    pub fn u64(&mut self) -> DeserializationResult<u64> {
        Ok(u64::from_le_bytes(self.array::<8>("u64")?))
    }

    pub fn i64(&mut self) -> DeserializationResult<i64> {
        Ok(i64::from_le_bytes(self.array::<8>("i64")?))
    }

    pub fn f32(&mut self) -> DeserializationResult<f32> {
        Ok(f32::from_le_bytes(self.array::<4>("f32")?))
    }

    pub fn f64(&mut self) -> DeserializationResult<f64> {
        Ok(f64::from_le_bytes(self.array::<8>("f64")?))
    }

    /// A boolean occupies a 4-byte slot and is true iff nonzero.
    pub fn boolean(&mut self) -> DeserializationResult<bool> {
        Ok(u32::from_le_bytes(self.array::<4>("bool")?) != 0)
    }

    pub fn filetime(&mut self) -> DeserializationResult<Timestamp> {
        let raw = i64::from_le_bytes(self.array::<8>("filetime")?);
        Ok(filetime_to_timestamp(raw))
    }

    pub fn guid(&mut self) -> DeserializationResult<Guid> {
        Ok(Guid::from_bytes_le(&self.array::<16>("guid")?))
    }

    pub fn bytes(&mut self, len: usize) -> DeserializationResult<&'a [u8]> {
        self.take(len, "bytes")
    }

    pub fn skip(&mut self, len: usize) -> DeserializationResult<()> {
        self.take(len, "skip").map(|_| ())
    }

    /// Length in bytes (terminator included) of the NUL-terminated ANSI string at the cursor.
    fn ansi_string_z_len(&self) -> DeserializationResult<usize> {
        let mut end = self.pos;
        loop {
            let b = bytes::read_u8(self.buf, end).ok_or_else(|| {
                bytes::truncated("ansi string", self.pos, end + 1 - self.pos, self.buf.len())
            })?;
            end += 1;
            if b == 0 {
                return Ok(end - self.pos);
            }
        }
    }

    /// Length in bytes (terminator included) of the NUL-terminated UTF-16 string at the cursor.
    fn utf16_string_z_len(&self) -> DeserializationResult<usize> {
        let mut end = self.pos;
        loop {
            let cu = bytes::read_u16_le(self.buf, end).ok_or_else(|| {
                bytes::truncated("utf-16 string", self.pos, end + 2 - self.pos, self.buf.len())
            })?;
            end += 2;
            if cu == 0 {
                return Ok(end - self.pos);
            }
        }
    }

    /// Read a NUL-terminated 8-bit string, decoded with `codec`.
    pub fn ansi_string_z(&mut self, codec: EncodingRef) -> DeserializationResult<String> {
        let len = self.ansi_string_z_len()?;
        let raw = self.take(len, "ansi string")?;
        let text = &raw[..len - 1];
        Ok(codec
            .decode(text, DecoderTrap::Replace)
            .unwrap_or_else(|e| e.into_owned()))
    }

    /// Read UTF-16 code units until a NUL code unit; the cursor ends past the terminator.
    pub fn utf16_string_z(&mut self) -> DeserializationResult<String> {
        let start = self.pos;
        let len = self.utf16_string_z_len()?;
        let raw = self.take(len, "utf-16 string")?;
        decode_utf16(&raw[..len - 2], "utf-16 string", start)
    }

    /// Read a `u16` byte-length prefix followed by that many bytes of UTF-16 (no terminator).
    pub fn len_prefixed_utf16_string(&mut self) -> DeserializationResult<String> {
        let start = self.pos;
        let byte_len = bytes::read_u16_le(self.buf, self.pos).ok_or_else(|| {
            bytes::truncated("counted string length", self.pos, 2, self.buf.len())
        })? as usize;
        let char_bytes = (byte_len / 2) * 2;
        let _ = bytes::slice_r(self.buf, self.pos + 2, char_bytes, "counted string")?;
        self.pos += 2;
        let raw = self.take(char_bytes, "counted string")?;
        decode_utf16(raw, "counted string", start)
    }

    pub fn skip_ansi_string_z(&mut self) -> DeserializationResult<()> {
        let len = self.ansi_string_z_len()?;
        self.skip(len)
    }

    pub fn skip_utf16_string_z(&mut self) -> DeserializationResult<()> {
        let len = self.utf16_string_z_len()?;
        self.skip(len)
    }
}

fn decode_utf16(raw: &[u8], what: &'static str, start: usize) -> DeserializationResult<String> {
    decode_utf16le_bytes_z(raw).map_err(|e| match e {
        Utf16LeDecodeError::OddLength => DeserializationError::OddLength {
            what,
            offset: start as u64,
        },
        Utf16LeDecodeError::InvalidData => DeserializationError::InvalidUtf16 {
            what,
            offset: start as u64,
        },
    })
}
