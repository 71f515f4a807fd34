use crate::{ByteReader, ByteWriter, WireError};

/// The UDP-like transport segment: `sport(2) dport(2) length(2)
/// checksum(2)=0 payload`. The checksum is carried but never computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpSegment {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Vec<u8>,
}

impl UdpSegment {
    pub fn new(src_port: u16, dst_port: u16, payload: Vec<u8>) -> Self {
        UdpSegment { src_port, dst_port, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u16(self.src_port);
        w.u16(self.dst_port);
        w.u16(self.payload.len() as u16 + 8);
        w.u16(0);
        w.bytes(&self.payload);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(bytes);
        let src_port = r.u16()?;
        let dst_port = r.u16()?;
        let length = r.u16()?;
        let _checksum = r.u16()?;
        let payload_len = length.checked_sub(8).ok_or(WireError::BadLength(length))?;
        let payload = r.bytes(payload_len as usize)?.to_vec();
        Ok(UdpSegment { src_port, dst_port, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let segment = UdpSegment::new(9901, 9902, b"payload".to_vec());
        let bytes = segment.encode();
        let decoded = UdpSegment::decode(&bytes).unwrap();
        assert_eq!(decoded, segment);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn length_field_includes_header() {
        let bytes = UdpSegment::new(1, 2, vec![0; 10]).encode();
        assert_eq!(u16::from(bytes[4]) << 8 | u16::from(bytes[5]), 18);
        // Checksum stays zero.
        assert_eq!(&bytes[6..8], [0, 0]);
    }

    #[test]
    fn known_byte_layout() {
        let bytes = UdpSegment::new(9901, 9902, b"hi".to_vec()).encode();
        assert_eq!(bytes, hex::decode("26ad26ae000a00006869").unwrap());
    }

    #[test]
    fn bad_length_errors() {
        let mut bytes = UdpSegment::new(1, 2, vec![]).encode();
        bytes[5] = 3;
        assert!(UdpSegment::decode(&bytes).is_err());
    }
}
