use cubenet_addr::MacAddress;

use crate::{ByteReader, ByteWriter, WireError};

/// A link-layer frame: destination, source, ethernet type, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub src: MacAddress,
    pub dst: MacAddress,
    pub ethernet_type: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(src: MacAddress, dst: MacAddress, ethernet_type: u16, payload: Vec<u8>) -> Self {
        Frame { src, dst, ethernet_type, payload }
    }

    /// Size on the wire in bytes.
    pub fn len(&self) -> usize {
        14 + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.mac(&self.dst);
        w.mac(&self.src);
        w.u16(self.ethernet_type);
        w.bytes(&self.payload);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(bytes);
        let dst = r.mac()?;
        let src = r.mac()?;
        let ethernet_type = r.u16()?;
        let payload = bytes[r.position()..].to_vec();
        Ok(Frame { src, dst, ethernet_type, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ETHERNET_CONTROL;

    #[test]
    fn round_trip() {
        let frame = Frame::new(
            MacAddress::new([1, 2, 3, 4, 5, 6]),
            MacAddress::BROADCAST,
            ETHERNET_CONTROL,
            vec![0xDE, 0xAD],
        );
        let bytes = frame.encode();
        assert_eq!(bytes.len(), frame.len());
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        // Destination leads on the wire.
        assert_eq!(&bytes[..6], MacAddress::BROADCAST.as_bytes());
    }

    #[test]
    fn short_input_errors() {
        assert!(Frame::decode(&[0; 13]).is_err());
    }
}
