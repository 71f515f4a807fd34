use cubenet_addr::{HypercubeAddress, MacAddress};

use crate::WireError;

/// Cursor over a byte slice with checked big-endian reads.
#[derive(Debug)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteReader { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated { offset: self.pos, needed: n - self.remaining() });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    /// Peek the next byte without advancing.
    pub fn peek_u8(&self) -> Result<u8, WireError> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or(WireError::Truncated { offset: self.pos, needed: 1 })
    }

    pub fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from(b[0]) << 8 | u16::from(b[1]))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }

    pub fn mac(&mut self) -> Result<MacAddress, WireError> {
        Ok(MacAddress::from_bytes(self.take(6)?))
    }

    /// A hypercube address packed as `bitLen(1) bytes(ceil(bitLen/8))`.
    pub fn address(&mut self) -> Result<HypercubeAddress, WireError> {
        let bit_len = u16::from(self.u8()?);
        let bytes = self.take(bit_len.div_ceil(8) as usize)?;
        Ok(HypercubeAddress::from_bytes(bytes, bit_len))
    }

    /// Address bytes of a known bit length (no length prefix).
    pub fn address_body(&mut self, bit_len: u16) -> Result<HypercubeAddress, WireError> {
        let bytes = self.take(bit_len.div_ceil(8) as usize)?;
        Ok(HypercubeAddress::from_bytes(bytes, bit_len))
    }

    /// A string packed as `len(1) bytes(len)`, lossily decoded.
    pub fn string(&mut self) -> Result<String, WireError> {
        let len = usize::from(self.u8()?);
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
}

/// Growable big-endian byte sink mirroring [`ByteReader`].
#[derive(Debug, Default)]
pub struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn mac(&mut self, mac: &MacAddress) {
        self.bytes.extend_from_slice(mac.as_bytes());
    }

    /// `bitLen(1)` followed by the packed address bytes.
    pub fn address(&mut self, addr: &HypercubeAddress) {
        self.u8(addr.bit_len() as u8);
        self.bytes.extend_from_slice(addr.as_bytes());
    }

    /// Packed address bytes without the length prefix.
    pub fn address_body(&mut self, addr: &HypercubeAddress) {
        self.bytes.extend_from_slice(addr.as_bytes());
    }

    /// `len(1)` followed by the string bytes; longer strings are truncated
    /// to 255 bytes.
    pub fn string(&mut self, s: &str) {
        let len = s.len().min(255);
        self.u8(len as u8);
        self.bytes.extend_from_slice(&s.as_bytes()[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_round_trip() {
        let mut w = ByteWriter::new();
        w.u16(0xBEEF);
        let data = w.into_bytes();
        assert_eq!(data, [0xBE, 0xEF]);
        assert_eq!(ByteReader::new(&data).u16().unwrap(), 0xBEEF);
    }

    #[test]
    fn address_round_trip() {
        let addr: HypercubeAddress = "101100110".parse().unwrap();
        let mut w = ByteWriter::new();
        w.address(&addr);
        let data = w.into_bytes();
        assert_eq!(ByteReader::new(&data).address().unwrap(), addr);
    }

    #[test]
    fn string_round_trip() {
        let mut w = ByteWriter::new();
        w.string("nodeA");
        assert_eq!(ByteReader::new(&w.into_bytes()).string().unwrap(), "nodeA");
    }

    #[test]
    fn truncated_reads_error() {
        let mut r = ByteReader::new(&[1]);
        assert!(r.u16().is_err());
        assert!(ByteReader::new(&[]).u8().is_err());
    }
}
