use cubenet_addr::{HypercubeAddress, UniversalAddress};

use crate::{ByteReader, ByteWriter, WireError};

const TYPE_REGISTER: u8 = 1;
const TYPE_DEREGISTER: u8 = 2;
const TYPE_ADDRESS_SOLVE: u8 = 3;
const TYPE_ADDRESS_LOOKUP: u8 = 4;
const TYPE_LOOKUP_TABLE: u8 = 5;
const TYPE_LOOKUP_TABLE_RECEIVED: u8 = 6;

const FLAG_SOLVED: u8 = 0x80;

/// One identity/address pair shipped in a lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RvTableEntry {
    pub address: HypercubeAddress,
    pub identity: UniversalAddress,
}

/// Rendez-vous directory payloads, carried inside UDP segments with the
/// rendez-vous flag set on the enclosing data packet.
///
/// The first byte holds the payload type in the low 5 bits and flags in
/// the high 3 (only AddressLookup uses one: flag 0 = solved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendezVousPacket {
    /// Announce `identity` now lives at `address`.
    Register { address: HypercubeAddress, identity: UniversalAddress },
    /// Withdraw a registration.
    Deregister { address: HypercubeAddress, identity: UniversalAddress },
    /// Ask the directory for the address of `identity`.
    AddressSolve { identity: UniversalAddress },
    /// Directory reply; `solved` is false when the identity is unknown
    /// (the address is then empty).
    AddressLookup { address: HypercubeAddress, identity: UniversalAddress, solved: bool },
    /// A batch of directory entries handed to a new owner; acknowledged
    /// by id.
    LookupTable { id: u16, entries: Vec<RvTableEntry> },
    /// Acknowledges a [`RendezVousPacket::LookupTable`] by id.
    LookupTableReceived { id: u16 },
}

impl RendezVousPacket {
    pub fn packet_type(&self) -> u8 {
        match self {
            RendezVousPacket::Register { .. } => TYPE_REGISTER,
            RendezVousPacket::Deregister { .. } => TYPE_DEREGISTER,
            RendezVousPacket::AddressSolve { .. } => TYPE_ADDRESS_SOLVE,
            RendezVousPacket::AddressLookup { .. } => TYPE_ADDRESS_LOOKUP,
            RendezVousPacket::LookupTable { .. } => TYPE_LOOKUP_TABLE,
            RendezVousPacket::LookupTableReceived { .. } => TYPE_LOOKUP_TABLE_RECEIVED,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        match self {
            RendezVousPacket::Register { address, identity }
            | RendezVousPacket::Deregister { address, identity } => {
                w.u8(self.packet_type());
                w.address(address);
                w.string(identity.as_str());
            }
            RendezVousPacket::AddressSolve { identity } => {
                w.u8(self.packet_type());
                w.string(identity.as_str());
            }
            RendezVousPacket::AddressLookup { address, identity, solved } => {
                w.u8(self.packet_type() | if *solved { FLAG_SOLVED } else { 0 });
                w.address(address);
                w.string(identity.as_str());
            }
            RendezVousPacket::LookupTable { id, entries } => {
                w.u8(self.packet_type());
                w.u16(*id);
                w.u16(entries.len() as u16);
                let bit_len = entries.first().map_or(0, |e| e.address.bit_len());
                w.u8(bit_len as u8);
                for entry in entries {
                    w.string(entry.identity.as_str());
                    w.address_body(&entry.address);
                }
            }
            RendezVousPacket::LookupTableReceived { id } => {
                w.u8(self.packet_type());
                w.u16(*id);
            }
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(bytes);
        let type_and_flags = r.u8()?;
        match type_and_flags & 0x1F {
            TYPE_REGISTER => Ok(RendezVousPacket::Register {
                address: r.address()?,
                identity: UniversalAddress::new(r.string()?),
            }),
            TYPE_DEREGISTER => Ok(RendezVousPacket::Deregister {
                address: r.address()?,
                identity: UniversalAddress::new(r.string()?),
            }),
            TYPE_ADDRESS_SOLVE => Ok(RendezVousPacket::AddressSolve {
                identity: UniversalAddress::new(r.string()?),
            }),
            TYPE_ADDRESS_LOOKUP => Ok(RendezVousPacket::AddressLookup {
                address: r.address()?,
                identity: UniversalAddress::new(r.string()?),
                solved: type_and_flags & FLAG_SOLVED != 0,
            }),
            TYPE_LOOKUP_TABLE => {
                let id = r.u16()?;
                let count = r.u16()?;
                let bit_len = u16::from(r.u8()?);
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let identity = UniversalAddress::new(r.string()?);
                    let address = r.address_body(bit_len)?;
                    entries.push(RvTableEntry { address, identity });
                }
                Ok(RendezVousPacket::LookupTable { id, entries })
            }
            TYPE_LOOKUP_TABLE_RECEIVED => Ok(RendezVousPacket::LookupTableReceived { id: r.u16()? }),
            other => Err(WireError::UnknownRendezVousType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(packet: RendezVousPacket) {
        let bytes = packet.encode();
        let decoded = RendezVousPacket::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn register_and_deregister() {
        round_trip(RendezVousPacket::Register {
            address: "10100000".parse().unwrap(),
            identity: UniversalAddress::new("A"),
        });
        round_trip(RendezVousPacket::Deregister {
            address: "10100000".parse().unwrap(),
            identity: UniversalAddress::new("A"),
        });
    }

    #[test]
    fn solve_and_lookup() {
        round_trip(RendezVousPacket::AddressSolve { identity: UniversalAddress::new("B") });
        round_trip(RendezVousPacket::AddressLookup {
            address: "01000000".parse().unwrap(),
            identity: UniversalAddress::new("B"),
            solved: true,
        });
        round_trip(RendezVousPacket::AddressLookup {
            address: HypercubeAddress::empty(),
            identity: UniversalAddress::new("unknown"),
            solved: false,
        });
    }

    #[test]
    fn lookup_table_with_entries() {
        round_trip(RendezVousPacket::LookupTable {
            id: 7,
            entries: vec![
                RvTableEntry {
                    address: "11000000".parse().unwrap(),
                    identity: UniversalAddress::new("A"),
                },
                RvTableEntry {
                    address: "00110000".parse().unwrap(),
                    identity: UniversalAddress::new("B"),
                },
            ],
        });
        round_trip(RendezVousPacket::LookupTable { id: 0, entries: vec![] });
        round_trip(RendezVousPacket::LookupTableReceived { id: 7 });
    }

    #[test]
    fn solved_flag_lives_in_the_type_byte() {
        let solved = RendezVousPacket::AddressLookup {
            address: "01000000".parse().unwrap(),
            identity: UniversalAddress::new("B"),
            solved: true,
        };
        assert_eq!(solved.encode()[0], 0x80 | 4);
    }

    #[test]
    fn unknown_type_errors() {
        assert!(matches!(
            RendezVousPacket::decode(&[0x1F]),
            Err(WireError::UnknownRendezVousType(0x1F))
        ));
    }
}
