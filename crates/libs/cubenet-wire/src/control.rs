use cubenet_addr::{HypercubeAddress, HypercubeMaskAddress, MacAddress};

use crate::{ByteReader, ByteWriter, WireError};

const TYPE_PAR: u8 = 1;
const TYPE_PAP: u8 = 2;
const TYPE_PAN: u8 = 3;
const TYPE_PANC: u8 = 4;
const TYPE_DISC: u8 = 5;
const TYPE_HB: u8 = 6;
const TYPE_SAP: u8 = 7;
const TYPE_SAN: u8 = 8;

const HEADER_ADDITIONAL_ADDRESS: u8 = 1;

const FLAG_0: u8 = 0x80;
const FLAG_HAS_MASK: u8 = 0x80;
const FLAG_HAS_CONNECTION_COUNT: u8 = 0x40;

/// Optional sub-header carrying a proposed or reconnection address.
///
/// Layout: `typeFl(1) len(1) bitLen(1) addr(ceil) [mask(1)] [connCount(1)]`;
/// flag 0 marks the mask byte present, flag 1 the connection count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdditionalAddress {
    pub address: HypercubeAddress,
    pub mask: Option<u8>,
    pub connection_count: Option<u8>,
}

impl AdditionalAddress {
    pub fn new(address: HypercubeAddress) -> Self {
        AdditionalAddress { address, mask: None, connection_count: None }
    }

    pub fn with_mask(address: HypercubeAddress, mask: u8) -> Self {
        AdditionalAddress { address, mask: Some(mask), connection_count: None }
    }

    pub fn proposal(address: HypercubeAddress, mask: u8, connection_count: u8) -> Self {
        AdditionalAddress { address, mask: Some(mask), connection_count: Some(connection_count) }
    }

    /// The carried address paired with its mask (0 when absent).
    pub fn mask_address(&self) -> HypercubeMaskAddress {
        HypercubeMaskAddress::new(self.address.clone(), u16::from(self.mask.unwrap_or(0)))
    }

    /// Encoded size in bytes, counted into the packet's total length.
    pub fn encoded_len(&self) -> u8 {
        let mut len = 3 + self.address.bit_len().div_ceil(8) as u8;
        if self.mask.is_some() {
            len += 1;
        }
        if self.connection_count.is_some() {
            len += 1;
        }
        len
    }

    fn write(&self, w: &mut ByteWriter) {
        let mut flags = 0u8;
        if self.mask.is_some() {
            flags |= FLAG_HAS_MASK;
        }
        if self.connection_count.is_some() {
            flags |= FLAG_HAS_CONNECTION_COUNT;
        }
        w.u8(HEADER_ADDITIONAL_ADDRESS | flags);
        w.u8(self.encoded_len());
        w.address(&self.address);
        if let Some(mask) = self.mask {
            w.u8(mask);
        }
        if let Some(count) = self.connection_count {
            w.u8(count);
        }
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, WireError> {
        let type_and_flags = r.u8()?;
        let _length = r.u8()?;
        let address = r.address()?;
        let mask = if type_and_flags & FLAG_HAS_MASK != 0 { Some(r.u8()?) } else { None };
        let connection_count = if type_and_flags & FLAG_HAS_CONNECTION_COUNT != 0 {
            Some(r.u8()?)
        } else {
            None
        };
        Ok(AdditionalAddress { address, mask, connection_count })
    }
}

/// Fields shared by every control packet: the sender's physical address
/// and its current primary address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlHeader {
    pub mac: MacAddress,
    pub primary: HypercubeMaskAddress,
}

/// The eight control packets of the join/liveness/leave protocol as a
/// tagged sum over the wire type byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPacket {
    /// Primary Address Request - a joiner asking for proposals (broadcast).
    Par { header: ControlHeader },
    /// Primary Address Proposal - reply to a PAR. `proposed` is `None`
    /// when the sender's address space is exhausted.
    Pap {
        header: ControlHeader,
        proposed: Option<AdditionalAddress>,
        reconnect: Vec<AdditionalAddress>,
    },
    /// Primary Address Notification - the joiner announces its choice.
    Pan { header: ControlHeader },
    /// Confirmation that a PAN arrived at the proposing node.
    Panc { header: ControlHeader },
    /// Disconnection announcement, flagging whether the leaver still has
    /// children.
    Disc { header: ControlHeader, has_child: bool },
    /// Heard-bit liveness broadcast.
    Hb { header: ControlHeader },
    /// Secondary Address Proposal.
    Sap { header: ControlHeader, proposed: AdditionalAddress },
    /// Secondary Address Notification - accepts or rejects a SAP.
    San { header: ControlHeader, accepted: bool, proposed: AdditionalAddress },
}

impl ControlPacket {
    pub fn header(&self) -> &ControlHeader {
        match self {
            ControlPacket::Par { header }
            | ControlPacket::Pap { header, .. }
            | ControlPacket::Pan { header }
            | ControlPacket::Panc { header }
            | ControlPacket::Disc { header, .. }
            | ControlPacket::Hb { header }
            | ControlPacket::Sap { header, .. }
            | ControlPacket::San { header, .. } => header,
        }
    }

    /// Wire type byte, 1..=8.
    pub fn packet_type(&self) -> u8 {
        match self {
            ControlPacket::Par { .. } => TYPE_PAR,
            ControlPacket::Pap { .. } => TYPE_PAP,
            ControlPacket::Pan { .. } => TYPE_PAN,
            ControlPacket::Panc { .. } => TYPE_PANC,
            ControlPacket::Disc { .. } => TYPE_DISC,
            ControlPacket::Hb { .. } => TYPE_HB,
            ControlPacket::Sap { .. } => TYPE_SAP,
            ControlPacket::San { .. } => TYPE_SAN,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlPacket::Par { .. } => "PAR",
            ControlPacket::Pap { .. } => "PAP",
            ControlPacket::Pan { .. } => "PAN",
            ControlPacket::Panc { .. } => "PANC",
            ControlPacket::Disc { .. } => "DISC",
            ControlPacket::Hb { .. } => "HB",
            ControlPacket::Sap { .. } => "SAP",
            ControlPacket::San { .. } => "SAN",
        }
    }

    /// Total length as carried on the wire: the fixed header plus any
    /// optional address headers (terminator excluded).
    pub fn total_length(&self) -> u8 {
        let header = self.header();
        let mut len = 11 + header.primary.bit_len().div_ceil(8) as u8;
        match self {
            ControlPacket::Pap { proposed, reconnect, .. } => {
                if let Some(p) = proposed {
                    len += p.encoded_len();
                }
                for r in reconnect {
                    len += r.encoded_len();
                }
            }
            ControlPacket::Sap { proposed, .. } | ControlPacket::San { proposed, .. } => {
                len += proposed.encoded_len();
            }
            _ => {}
        }
        len
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut flags = 0u8;
        match self {
            ControlPacket::Pap { proposed: None, .. } => flags |= FLAG_0,
            ControlPacket::Disc { has_child: true, .. } => flags |= FLAG_0,
            ControlPacket::San { accepted: true, .. } => flags |= FLAG_0,
            _ => {}
        }

        let header = self.header();
        let mut w = ByteWriter::new();
        w.u8(self.packet_type() | flags);
        w.u8(self.total_length());
        w.mac(&header.mac);
        w.address(header.primary.address());
        w.u8(header.primary.mask() as u8);

        match self {
            ControlPacket::Pap { proposed, reconnect, .. } => {
                if let Some(p) = proposed {
                    p.write(&mut w);
                }
                for r in reconnect {
                    r.write(&mut w);
                }
            }
            ControlPacket::Sap { proposed, .. } | ControlPacket::San { proposed, .. } => {
                proposed.write(&mut w);
            }
            _ => {}
        }

        w.u8(0);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(bytes);
        let type_and_flags = r.u8()?;
        let packet_type = type_and_flags & 0x1F;
        let flag0 = type_and_flags & FLAG_0 != 0;
        let _total_length = r.u8()?;
        let mac = r.mac()?;
        let address = r.address()?;
        let mask = u16::from(r.u8()?);
        let header = ControlHeader {
            mac,
            primary: HypercubeMaskAddress::try_new(address, mask)
                .map_err(|_| WireError::BadLength(mask))?,
        };

        let mut additional = Vec::new();
        loop {
            let next = r.peek_u8()?;
            if next == 0 {
                break;
            }
            match next & 0x1F {
                HEADER_ADDITIONAL_ADDRESS => additional.push(AdditionalAddress::read(&mut r)?),
                other => return Err(WireError::UnknownHeaderType(other)),
            }
        }

        let unexpected =
            WireError::UnexpectedHeader { packet: packet_type, header: HEADER_ADDITIONAL_ADDRESS };
        let mut additional = additional;
        let packet = match packet_type {
            TYPE_PAR | TYPE_PAN | TYPE_PANC | TYPE_DISC | TYPE_HB => {
                if !additional.is_empty() {
                    return Err(unexpected);
                }
                match packet_type {
                    TYPE_PAR => ControlPacket::Par { header },
                    TYPE_PAN => ControlPacket::Pan { header },
                    TYPE_PANC => ControlPacket::Panc { header },
                    TYPE_DISC => ControlPacket::Disc { header, has_child: flag0 },
                    _ => ControlPacket::Hb { header },
                }
            }
            TYPE_PAP => {
                let mut items = additional.into_iter();
                let proposed = if flag0 { None } else { items.next() };
                ControlPacket::Pap { header, proposed, reconnect: items.collect() }
            }
            TYPE_SAP | TYPE_SAN => {
                if additional.len() != 1 {
                    return Err(unexpected);
                }
                let proposed = additional.remove(0);
                if packet_type == TYPE_SAP {
                    ControlPacket::Sap { header, proposed }
                } else {
                    ControlPacket::San { header, accepted: flag0, proposed }
                }
            }
            other => return Err(WireError::UnknownControlType(other)),
        };
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> ControlHeader {
        ControlHeader {
            mac: MacAddress::new([1, 2, 3, 4, 5, 6]),
            primary: HypercubeMaskAddress::new("10100000".parse().unwrap(), 3),
        }
    }

    fn round_trip(packet: ControlPacket) {
        let bytes = packet.encode();
        let decoded = ControlPacket::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn par_round_trip() {
        round_trip(ControlPacket::Par {
            header: ControlHeader {
                mac: MacAddress::new([9, 9, 9, 9, 9, 9]),
                primary: HypercubeMaskAddress::default(),
            },
        });
    }

    #[test]
    fn pap_round_trip_with_reconnect() {
        round_trip(ControlPacket::Pap {
            header: header(),
            proposed: Some(AdditionalAddress::proposal("10110000".parse().unwrap(), 4, 0)),
            reconnect: vec![
                AdditionalAddress::with_mask("11100000".parse().unwrap(), 3),
                AdditionalAddress::with_mask("11110000".parse().unwrap(), 4),
            ],
        });
    }

    #[test]
    fn pap_exhausted_has_flag_and_no_proposal() {
        let packet = ControlPacket::Pap { header: header(), proposed: None, reconnect: vec![] };
        let bytes = packet.encode();
        assert_eq!(bytes[0], 0x80 | 2);
        round_trip(packet);
    }

    #[test]
    fn disc_carries_has_child_flag() {
        round_trip(ControlPacket::Disc { header: header(), has_child: true });
        let plain = ControlPacket::Disc { header: header(), has_child: false };
        assert_eq!(plain.encode()[0], 5);
        round_trip(plain);
    }

    #[test]
    fn san_carries_accepted_flag() {
        let proposed = AdditionalAddress::proposal("10010000".parse().unwrap(), 4, 0);
        round_trip(ControlPacket::San { header: header(), accepted: true, proposed: proposed.clone() });
        round_trip(ControlPacket::San { header: header(), accepted: false, proposed });
    }

    #[test]
    fn sap_hb_pan_panc_round_trip() {
        round_trip(ControlPacket::Hb { header: header() });
        round_trip(ControlPacket::Pan { header: header() });
        round_trip(ControlPacket::Panc { header: header() });
        round_trip(ControlPacket::Sap {
            header: header(),
            proposed: AdditionalAddress::proposal("10100000".parse().unwrap(), 5, 0),
        });
    }

    #[test]
    fn total_length_counts_optional_headers() {
        let packet = ControlPacket::Sap {
            header: header(),
            proposed: AdditionalAddress::proposal("10100000".parse().unwrap(), 5, 0),
        };
        // 11 + 1 address byte + (3 + 1 + 1 + 1) header bytes.
        assert_eq!(packet.total_length(), 18);
        // Encoded adds the terminator byte on top.
        assert_eq!(packet.encode().len(), 19);
    }

    #[test]
    fn rejects_unknown_type() {
        let mut bytes = ControlPacket::Hb { header: header() }.encode();
        bytes[0] = 0x1F;
        assert!(matches!(
            ControlPacket::decode(&bytes),
            Err(WireError::UnknownControlType(0x1F))
        ));
    }
}
