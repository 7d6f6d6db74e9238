//! Address families and per-level prefix lengths

use crate::{Cidr, IpamError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// IP address family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

impl IpFamily {
    /// Family of an address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }

    /// Address width in bits
    pub fn max_len(&self) -> u8 {
        match self {
            Self::Ipv4 => 32,
            Self::Ipv6 => 128,
        }
    }

    /// Number used in per-family trench names
    pub fn number(&self) -> u8 {
        match self {
            Self::Ipv4 => 0,
            Self::Ipv6 => 1,
        }
    }

    /// Both families, IPv4 first
    pub fn all() -> [IpFamily; 2] {
        [Self::Ipv4, Self::Ipv6]
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
        }
    }
}

impl FromStr for IpFamily {
    type Err = IpamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" | "4" => Ok(Self::Ipv4),
            "ipv6" | "6" => Ok(Self::Ipv6),
            _ => Err(IpamError::InvalidRequest(format!("unknown address family: {:?}", s))),
        }
    }
}

/// Name of the per-family trench prefix, e.g. `default-0` for IPv4
pub fn trench_name_for(trench: &str, family: IpFamily) -> String {
    format!("{}-{}", trench, family.number())
}

/// Mask lengths applied when allocating at each level of the hierarchy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixLengths {
    /// Length of conduit prefixes (children of a trench)
    pub conduit_length: u8,
    /// Length of node prefixes (children of a conduit)
    pub node_length: u8,
    /// Length of node children
    pub child_length: u8,
}

impl PrefixLengths {
    /// Create a set of lengths
    pub fn new(conduit_length: u8, node_length: u8, child_length: u8) -> Self {
        Self {
            conduit_length,
            node_length,
            child_length,
        }
    }

    /// Check the lengths against a root block
    ///
    /// Lengths must strictly increase going down the tree and fit the family.
    pub fn validate(&self, root: &Cidr) -> Result<()> {
        let max = root.family().max_len();
        let ordered = root.prefix_len() < self.conduit_length
            && self.conduit_length < self.node_length
            && self.node_length < self.child_length
            && self.child_length <= max;
        if !ordered {
            return Err(IpamError::InvalidRequest(format!(
                "prefix lengths {}/{}/{} do not fit under {}",
                self.conduit_length, self.node_length, self.child_length, root
            )));
        }
        Ok(())
    }
}

/// The root pool of one address family
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrenchPool {
    /// Address family
    pub family: IpFamily,
    /// Root CIDR
    pub cidr: String,
    /// Lengths used below the root
    pub lengths: PrefixLengths,
}
