//! CIDR block arithmetic
//!
//! Blocks are held as a 128-bit integer plus a prefix length, with IPv4
//! addresses occupying the low 32 bits. A parsed [`Cidr`] is always a
//! network address: host bits are cleared on construction.

use crate::{IpFamily, IpamError, Result};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An address block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cidr {
    bits: u128,
    prefix_len: u8,
    family: IpFamily,
}

fn invalid(cidr: &str) -> IpamError {
    IpamError::InvalidCidr(cidr.to_string())
}

/// Split `addr/len` without normalizing the address
fn split(cidr: &str) -> Result<(IpAddr, u8)> {
    let (addr, len) = cidr.split_once('/').ok_or_else(|| invalid(cidr))?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid(cidr))?;
    let len: u8 = len.parse().map_err(|_| invalid(cidr))?;
    if len > IpFamily::of(&addr).max_len() {
        return Err(invalid(cidr));
    }
    Ok((addr, len))
}

fn to_bits(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(addr) => u128::from(u32::from(addr)),
        IpAddr::V6(addr) => u128::from(addr),
    }
}

fn from_bits(bits: u128, family: IpFamily) -> IpAddr {
    match family {
        // Only the low 32 bits are ever set for IPv4
        IpFamily::Ipv4 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        IpFamily::Ipv6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

fn all_ones(family: IpFamily) -> u128 {
    match family {
        IpFamily::Ipv4 => u128::from(u32::MAX),
        IpFamily::Ipv6 => u128::MAX,
    }
}

fn host_mask(family: IpFamily, prefix_len: u8) -> u128 {
    let host_bits = u32::from(family.max_len() - prefix_len);
    if host_bits == 0 {
        0
    } else {
        u128::MAX >> (128 - host_bits)
    }
}

impl Cidr {
    /// Block of `prefix_len` containing `addr`
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        let family = IpFamily::of(&addr);
        if prefix_len > family.max_len() {
            return Err(IpamError::InvalidCidr(format!("{}/{}", addr, prefix_len)));
        }
        Ok(Self {
            bits: to_bits(addr) & !host_mask(family, prefix_len),
            prefix_len,
            family,
        })
    }

    /// Parse `addr/len`; host bits are dropped
    pub fn parse(cidr: &str) -> Result<Self> {
        let (addr, len) = split(cidr)?;
        Self::new(addr, len)
    }

    /// Base (network) address
    pub fn address(&self) -> IpAddr {
        from_bits(self.bits, self.family)
    }

    /// Mask length
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Address family
    pub fn family(&self) -> IpFamily {
        self.family
    }

    /// Highest address in the block
    pub fn last_address(&self) -> IpAddr {
        from_bits(self.bits | host_mask(self.family, self.prefix_len), self.family)
    }

    /// Whether `addr` falls inside the block
    pub fn contains_address(&self, addr: IpAddr) -> bool {
        IpFamily::of(&addr) == self.family
            && to_bits(addr) & !host_mask(self.family, self.prefix_len) == self.bits
    }

    /// Whether `other` lies entirely inside this block
    pub fn contains(&self, other: &Cidr) -> bool {
        other.prefix_len >= self.prefix_len && self.contains_address(other.address())
    }

    /// Whether either block's base address falls inside the other
    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.contains_address(other.address()) || other.contains_address(self.address())
    }

    /// The same-sized block immediately after this one
    ///
    /// Wraps around at the end of the address family, so the block after
    /// `255.255.255.0/24` is `0.0.0.0/24`. Callers detect that as exhaustion.
    pub fn next(&self) -> Cidr {
        let size = host_mask(self.family, self.prefix_len).wrapping_add(1);
        Self {
            bits: self.bits.wrapping_add(size) & all_ones(self.family),
            ..*self
        }
    }

    /// Block of `prefix_len` that contains this block's base address
    pub fn resized(&self, prefix_len: u8) -> Result<Cidr> {
        Self::new(self.address(), prefix_len)
    }
}

impl FromStr for Cidr {
    type Err = IpamError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address(), self.prefix_len)
    }
}

/// Whether `cidr` parses and names a network address (no host bits set)
pub fn is_valid_block(cidr: &str) -> bool {
    match split(cidr) {
        Ok((addr, len)) => Cidr::new(addr, len).is_ok_and(|block| block.address() == addr),
        Err(_) => false,
    }
}

/// Address family of `cidr`
pub fn family_of(cidr: &str) -> Result<IpFamily> {
    split(cidr).map(|(addr, _)| IpFamily::of(&addr))
}

/// Whether two CIDR strings overlap; anything unparseable overlaps nothing
pub fn overlaps(a: &str, b: &str) -> bool {
    match (Cidr::parse(a), Cidr::parse(b)) {
        (Ok(a), Ok(b)) => a.overlaps(&b),
        _ => false,
    }
}
