//! # cubenet-addr
//!
//! Address algebra for the cubenet hypercube overlay: bit-addressable
//! [`HypercubeAddress`]es, prefix-masked [`HypercubeMaskAddress`]es naming
//! sub-cubes, the summarising [`AddressSpace`] set, plus the physical
//! [`MacAddress`] and the opaque [`UniversalAddress`] identity with its
//! deterministic hashes onto both planes.
//!
//! Addresses are rendered in binary (`"10110"`), mask addresses as
//! `"<bits>/<mask>"`.

mod hypercube;
mod mac;
mod mask;
mod space;
mod universal;

pub use hypercube::HypercubeAddress;
pub use mac::MacAddress;
pub use mask::HypercubeMaskAddress;
pub use space::AddressSpace;
pub use universal::UniversalAddress;

/// Errors from building addresses out of user input.
#[derive(Debug, thiserror::Error)]
pub enum AddrError {
    #[error("invalid address '{0}': only '0' and '1' are allowed")]
    InvalidAddress(String),

    #[error("invalid MAC address '{0}'")]
    InvalidMac(String),

    #[error("mask {mask} is out of range for a {bit_len}-bit address")]
    MaskOutOfRange { mask: u16, bit_len: u16 },
}
