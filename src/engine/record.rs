use super::EngineError;

pub const RECORD_HEADER_LEN: usize = 5;

/// 2^14, largest plaintext fragment of a record
pub const MAX_PLAINTEXT_SIZE: usize = 16 * 1024;

/// header + largest ciphertext fragment allowed by TLS (2^14 + 2048)
pub const MAX_PACKET_SIZE: usize = RECORD_HEADER_LEN + MAX_PLAINTEXT_SIZE + 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Heartbeat,
}

impl TryFrom<u8> for ContentType {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            20 => Ok(Self::ChangeCipherSpec),
            21 => Ok(Self::Alert),
            22 => Ok(Self::Handshake),
            23 => Ok(Self::ApplicationData),
            24 => Ok(Self::Heartbeat),
            other => Err(EngineError::InvalidRecord(format!(
                "unknown content type {other}"
            ))),
        }
    }
}

/// Length of the record at the start of `src`, header included.
///
/// Returns `Ok(None)` when not even the header is available yet. The record
/// itself may still be incomplete; callers compare the length with what they
/// have.
pub fn record_len(src: &[u8]) -> Result<Option<usize>, EngineError> {
    if src.len() < RECORD_HEADER_LEN {
        return Ok(None);
    }

    ContentType::try_from(src[0])?;
    if src[1] != 3 {
        return Err(EngineError::InvalidRecord(format!(
            "unsupported record version {}.{}",
            src[1], src[2]
        )));
    }

    let len = RECORD_HEADER_LEN + u16::from_be_bytes([src[3], src[4]]) as usize;
    if len > MAX_PACKET_SIZE {
        return Err(EngineError::InvalidRecord(format!(
            "record of {len} bytes exceeds maximum of {MAX_PACKET_SIZE}"
        )));
    }

    Ok(Some(len))
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_partial_header() {
        assert!(matches!(record_len(&[22, 3, 3]), Ok(None)));
        assert!(matches!(record_len(&[]), Ok(None)));
    }

    #[test]
    fn test_header_length() {
        let header = [23, 3, 3, 0x01, 0x00];
        assert_eq!(record_len(&header).expect("valid"), Some(261));
    }

    #[test]
    fn test_plaintext_is_rejected() {
        let http = b"GET / HTTP/1.1\r\n";
        assert!(matches!(
            record_len(http),
            Err(EngineError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_oversized_record() {
        let header = [23, 3, 3, 0xff, 0xff];
        assert!(record_len(&header).is_err());
    }
}
