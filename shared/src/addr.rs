//! Network address encoding shared by the debug channel and the socket
//! relay RPCs.
//!
//! ```text
//! ┌──────┬─────────┬──────────────────┐
//! │ type │ port BE │  host (0/4/16)   │
//! └──────┴─────────┴──────────────────┘
//! ```
//!
//! `type` is 0 for none, 1 for IPv4, 2 for IPv6. A `None` address is a
//! single byte.

/// Wire tag of [`MobileAddr::None`].
pub const ADDR_TYPE_NONE: u8 = 0;
/// Wire tag of [`MobileAddr::V4`].
pub const ADDR_TYPE_IPV4: u8 = 1;
/// Wire tag of [`MobileAddr::V6`].
pub const ADDR_TYPE_IPV6: u8 = 2;

/// Largest encoded address.
pub const MAX_ADDR_SIZE: usize = 1 + 2 + 16;

/// Address of a relay server, DNS server or socket peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MobileAddr {
    #[default]
    None,
    V4 { host: [u8; 4], port: u16 },
    V6 { host: [u8; 16], port: u16 },
}

impl MobileAddr {
    /// Encoded size of this address.
    pub fn encoded_len(&self) -> usize {
        match self {
            MobileAddr::None => 1,
            MobileAddr::V4 { .. } => 3 + 4,
            MobileAddr::V6 { .. } => 3 + 16,
        }
    }

    /// Write the address into `dest`; returns the byte count, or `None` if
    /// `dest` is too small.
    pub fn encode(&self, dest: &mut [u8]) -> Option<usize> {
        let len = self.encoded_len();
        let out = dest.get_mut(..len)?;
        match self {
            MobileAddr::None => out[0] = ADDR_TYPE_NONE,
            MobileAddr::V4 { host, port } => {
                out[0] = ADDR_TYPE_IPV4;
                out[1..3].copy_from_slice(&port.to_be_bytes());
                out[3..].copy_from_slice(host);
            }
            MobileAddr::V6 { host, port } => {
                out[0] = ADDR_TYPE_IPV6;
                out[1..3].copy_from_slice(&port.to_be_bytes());
                out[3..].copy_from_slice(host);
            }
        }
        Some(len)
    }

    /// Parse an address from the front of `src`.
    ///
    /// Returns the address and the number of bytes it used. Unknown type
    /// tags and truncated input yield `None`.
    pub fn decode(src: &[u8]) -> Option<(Self, usize)> {
        let (&kind, rest) = src.split_first()?;
        match kind {
            ADDR_TYPE_NONE => Some((MobileAddr::None, 1)),
            ADDR_TYPE_IPV4 => {
                let port = u16::from_be_bytes([*rest.first()?, *rest.get(1)?]);
                let host: [u8; 4] = rest.get(2..6)?.try_into().ok()?;
                Some((MobileAddr::V4 { host, port }, 7))
            }
            ADDR_TYPE_IPV6 => {
                let port = u16::from_be_bytes([*rest.first()?, *rest.get(1)?]);
                let host: [u8; 16] = rest.get(2..18)?.try_into().ok()?;
                Some((MobileAddr::V6 { host, port }, 19))
            }
            _ => None,
        }
    }
}
