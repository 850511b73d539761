//! IPv4 prefixes and masked address comparison.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;

use crate::error::Error;

/// An IPv4 CIDR prefix: an address plus the number of leading bits that are
/// significant.
///
/// `Prefix` is a plain value type. Tries own their prefixes by value and
/// sharing one is a copy, so there is no aliasing to account for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix {
    addr: Ipv4Addr,
    bitlen: u8,
}

impl Prefix {
    /// Widest mask an IPv4 prefix can carry.
    pub const MAX_BITS: u8 = 32;

    /// Create a prefix from an address and mask length. A length beyond 32
    /// is clamped to 32.
    pub fn new(addr: Ipv4Addr, bitlen: u8) -> Self {
        Self {
            addr,
            bitlen: bitlen.min(Self::MAX_BITS),
        }
    }

    /// A /32 host route for `addr`.
    pub fn host(addr: Ipv4Addr) -> Self {
        Self::new(addr, Self::MAX_BITS)
    }

    /// The prefix address, as given (not truncated to the mask).
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// Number of significant leading bits.
    pub fn bitlen(&self) -> u8 {
        self.bitlen
    }

    /// The address in network byte order.
    pub fn octets(&self) -> [u8; 4] {
        self.addr.octets()
    }

    /// Whether `addr` falls inside this prefix.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        comp_with_mask(&self.octets(), &addr.octets(), self.bitlen)
    }
}

/// Compare two addresses under an `mask`-bit prefix. Whole bytes are
/// compared exactly; the residual `mask % 8` bits of the next byte go
/// through a high-bit mask. A zero residual means whole bytes only.
pub(crate) fn comp_with_mask(a: &[u8; 4], b: &[u8; 4], mask: u8) -> bool {
    let whole = (mask / 8) as usize;
    if a[..whole] != b[..whole] {
        return false;
    }
    let rem = mask % 8;
    if rem == 0 {
        return true;
    }
    let m = 0xffu8 << (8 - rem);
    (a[whole] & m) == (b[whole] & m)
}

impl FromStr for Prefix {
    type Err = Error;

    /// Parse `"a.b.c.d"` or `"a.b.c.d/n"`.
    ///
    /// Incomplete addresses are accepted: missing trailing octets are zero,
    /// so `"10/8"` denotes `10.0.0.0/8`. An absent mask defaults to a /32
    /// host route and a numeric mask beyond 32 is clamped; a non-numeric
    /// mask or a malformed address is an error.
    fn from_str(s: &str) -> Result<Self, Error> {
        let (addr_part, mask_part) = match s.split_once('/') {
            Some((a, m)) => (a, Some(m)),
            None => (s, None),
        };

        let bitlen = match mask_part {
            Some(m) => m
                .trim()
                .parse::<u32>()
                .map_err(|_| Error::InvalidAddress(s.to_string()))?
                .min(u32::from(Self::MAX_BITS)) as u8,
            None => Self::MAX_BITS,
        };

        let addr =
            parse_partial_ipv4(addr_part).ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
        Ok(Self::new(addr, bitlen))
    }
}

/// Dotted-decimal parser that allows incomplete addresses (1 to 4 octets).
fn parse_partial_ipv4(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut n = 0;
    for part in s.split('.') {
        if n >= 4 || part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        octets[n] = part.parse::<u8>().ok()?;
        n += 1;
    }
    Some(Ipv4Addr::from(octets))
}

impl From<Ipv4Net> for Prefix {
    fn from(net: Ipv4Net) -> Self {
        Self::new(net.addr(), net.prefix_len())
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.bitlen)
    }
}
