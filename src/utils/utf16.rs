use byteorder::{ByteOrder, LittleEndian};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Utf16LeDecodeError {
    OddLength,
    InvalidData,
}

/// Decode a UTF-16LE byte slice until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16le_bytes_z(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    if !bytes.len().is_multiple_of(2) {
        return Err(Utf16LeDecodeError::OddLength);
    }

    let mut units = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        units.push(LittleEndian::read_u16(chunk));
    }

    decode_utf16_units_z(&units)
}

/// Decode UTF-16 code units until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16_units_z(units: &[u16]) -> Result<String, Utf16LeDecodeError> {
    let end = units.iter().position(|&c| c == 0).unwrap_or(units.len());
    let slice = &units[..end];

    // Pure ASCII converts directly without surrogate handling.
    if slice.iter().all(|&c| c <= 0x7F) {
        return Ok(slice.iter().map(|&c| c as u8 as char).collect());
    }

    String::from_utf16(slice).map_err(|_| Utf16LeDecodeError::InvalidData)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stops_at_nul() {
        let bytes = [b'A', 0, b'B', 0, 0, 0, b'C', 0];
        assert_eq!(decode_utf16le_bytes_z(&bytes).unwrap(), "AB");
    }

    #[test]
    fn test_non_ascii_and_errors() {
        let bytes = [0xE9, 0x00, 0x3A, 0x26];
        assert_eq!(decode_utf16le_bytes_z(&bytes).unwrap(), "é☺");
        assert_eq!(
            decode_utf16le_bytes_z(&[0x41]),
            Err(Utf16LeDecodeError::OddLength)
        );
        assert_eq!(
            decode_utf16_units_z(&[0xD800]),
            Err(Utf16LeDecodeError::InvalidData)
        );
    }
}
