#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Utf16LeDecodeError {
    OddLength,
    InvalidData,
}

impl Utf16LeDecodeError {
    pub(crate) fn reason(self) -> &'static str {
        match self {
            Utf16LeDecodeError::OddLength => "UTF-16 data has an odd number of bytes",
            Utf16LeDecodeError::InvalidData => "invalid UTF-16 data",
        }
    }
}

/// Decode a UTF-16LE byte slice until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16le_bytes_z(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    if !bytes.len().is_multiple_of(2) {
        return Err(Utf16LeDecodeError::OddLength);
    }

    let mut units = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        let unit = u16::from_le_bytes([chunk[0], chunk[1]]);
        if unit == 0 {
            break;
        }
        units.push(unit);
    }

    decode_utf16_units_z(&units)
}

/// Decode UTF-16 code units until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16_units_z(units: &[u16]) -> Result<String, Utf16LeDecodeError> {
    let end = units.iter().position(|&c| c == 0).unwrap_or(units.len());
    let slice = &units[..end];

    // Subscription names, queries and host names are nearly always ASCII.
    if slice.iter().all(|&c| c <= 0x7F) {
        return Ok(slice.iter().map(|&c| c as u8 as char).collect());
    }

    String::from_utf16(slice).map_err(|_| Utf16LeDecodeError::InvalidData)
}

/// Encode `s` as UTF-16 code units followed by a NUL terminator.
pub(crate) fn encode_utf16z(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn le_bytes(units: &[u16]) -> Vec<u8> {
        units.iter().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn test_stops_at_first_nul() {
        let bytes = le_bytes(&[b'S' as u16, b'u' as u16, b'b' as u16, 0, b'x' as u16]);
        assert_eq!(decode_utf16le_bytes_z(&bytes).unwrap(), "Sub");
    }

    #[test]
    fn test_unterminated_input_is_read_to_the_end() {
        let bytes = le_bytes(&[b'a' as u16, b'b' as u16]);
        assert_eq!(decode_utf16le_bytes_z(&bytes).unwrap(), "ab");
    }

    #[test]
    fn test_surrogate_pairs() {
        let units = encode_utf16z("host-\u{1F600}");
        assert_eq!(decode_utf16_units_z(&units).unwrap(), "host-\u{1F600}");
    }

    #[test]
    fn test_rejects_odd_length_and_lone_surrogates() {
        assert_eq!(
            decode_utf16le_bytes_z(&[b'a', 0, b'b']),
            Err(Utf16LeDecodeError::OddLength)
        );
        assert_eq!(
            decode_utf16_units_z(&[0xD800, b'a' as u16]),
            Err(Utf16LeDecodeError::InvalidData)
        );
    }
}
