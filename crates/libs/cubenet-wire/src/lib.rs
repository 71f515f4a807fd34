//! # cubenet-wire
//!
//! Binary wire formats for the cubenet hypercube overlay. Everything here
//! must round-trip byte-identically: `decode(encode(p)) == p` and
//! `encode(decode(b)) == b` for well-formed input.
//!
//! ## Control packet layout (big-endian, byte-aligned)
//!
//! ```text
//! +--------+--------+------------------+--------+--....--+------+----....----+------+
//! | typeFl | totLen | mac (6 bytes)    | primBL | prim   | mask | optHeaders | 0x00 |
//! +--------+--------+------------------+--------+--....--+------+----....----+------+
//!   1 B      1 B                         1 B     ceil(BL/8)  1 B
//! ```
//!
//! `typeFl` carries the packet type in the low 5 bits and per-type flags in
//! the high 3 (flag *n* masks `0x80 >> n`).
//!
//! ## Data packet layout
//!
//! ```text
//! +--------+-------+-----+--------+-----+-----+--------+---------+----....----+------+
//! | totLen | flags | ttl | addrBL | src | dst | trProt | payload | optHeaders | 0x00 |
//! +--------+-------+-----+--------+-----+-----+--------+---------+----....----+------+
//!   2 B      1 B     2 B   1 B     ceil  ceil   1 B
//! ```
//!
//! Optional headers share a `typeFl`/`length` preamble and are terminated
//! by a zero byte.

mod codec;
mod control;
mod data;
mod frame;
mod rendezvous;
mod udp;

pub use codec::{ByteReader, ByteWriter};
pub use control::{AdditionalAddress, ControlHeader, ControlPacket};
pub use data::{DataPacket, RouteHeader};
pub use frame::Frame;
pub use rendezvous::{RendezVousPacket, RvTableEntry};
pub use udp::UdpSegment;

/// Ethernet type for hypercube control packets.
pub const ETHERNET_CONTROL: u16 = 1000;

/// Ethernet type for hypercube data packets.
pub const ETHERNET_DATA: u16 = 1001;

/// The single transport protocol the simulator speaks (UDP-like).
pub const TRANSPORT_UDP: u8 = 17;

/// Initial time-to-live of a data packet.
pub const MAX_TTL: u16 = 10_000;

/// Errors from wire decode (and the rare malformed encode input).
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("truncated input: needed {needed} more byte(s) at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("invalid control packet type: {0}")]
    UnknownControlType(u8),

    #[error("invalid rendez-vous packet type: {0}")]
    UnknownRendezVousType(u8),

    #[error("unexpected optional header type {header} in packet type {packet}")]
    UnexpectedHeader { packet: u8, header: u8 },

    #[error("unknown optional header type: {0}")]
    UnknownHeaderType(u8),

    #[error("missing terminator after optional headers")]
    MissingTerminator,

    #[error("inconsistent length field: {0}")]
    BadLength(u16),
}
