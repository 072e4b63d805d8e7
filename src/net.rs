// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! IP ranges and AS numbers as they appear in registry objects.
//!
//! Address space is written in three ways: as a CIDR prefix
//! (`192.0.2.0/24`), as a single address, or in the legacy range form
//! (`192.0.2.0 - 192.0.2.255`). [`IpRange`] accepts all three. A legacy
//! range need not be a single CIDR block; [`IpRange::networks`] gives
//! its minimal CIDR decomposition.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net, Ipv4Subnets, Ipv6Net, Ipv6Subnets};

use crate::util::starts_with_caseless;

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error indicating that text is not a valid address, network,
/// range, or AS number.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AddressError {
    /// The text was empty.
    Empty,

    /// An address could not be parsed.
    InvalidAddress,

    /// The prefix length was not a number or was too long.
    InvalidPrefixLen,

    /// A range mixed IPv4 and IPv6 addresses.
    MixedVersions,

    /// A range's last address was lower than its first address.
    InvertedRange,

    /// An AS number or AS range could not be parsed.
    InvalidAsn,

    /// A reverse-DNS name could not be converted to a network.
    InvalidReverseName,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Empty => f.write_str("empty address"),
            Self::InvalidAddress => f.write_str("invalid IP address"),
            Self::InvalidPrefixLen => f.write_str("invalid prefix length"),
            Self::MixedVersions => f.write_str("range mixes IPv4 and IPv6 addresses"),
            Self::InvertedRange => f.write_str("range ends before it starts"),
            Self::InvalidAsn => f.write_str("invalid AS number"),
            Self::InvalidReverseName => f.write_str("invalid reverse-DNS name"),
        }
    }
}

impl std::error::Error for AddressError {}

////////////////////////////////////////////////////////////////////////
// IP RANGES                                                          //
////////////////////////////////////////////////////////////////////////

/// An inclusive range of IP addresses of a single IP version.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct IpRange {
    first: IpAddr,
    last: IpAddr,
}

impl IpRange {
    /// Creates a range. Both addresses must be of the same version and
    /// `first` must not be greater than `last`.
    pub fn new(first: IpAddr, last: IpAddr) -> Result<Self, AddressError> {
        match (first, last) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                if first <= last {
                    Ok(Self { first, last })
                } else {
                    Err(AddressError::InvertedRange)
                }
            }
            _ => Err(AddressError::MixedVersions),
        }
    }

    pub fn first(&self) -> IpAddr {
        self.first
    }

    pub fn last(&self) -> IpAddr {
        self.last
    }

    pub fn is_ipv4(&self) -> bool {
        self.first.is_ipv4()
    }

    /// Returns 4 or 6.
    pub fn ip_version(&self) -> u8 {
        if self.is_ipv4() {
            4
        } else {
            6
        }
    }

    /// Returns the number of addresses in the range, minus one. (The
    /// full IPv6 space would not fit otherwise.)
    pub fn span(&self) -> u128 {
        addr_to_u128(self.last) - addr_to_u128(self.first)
    }

    pub fn contains_addr(&self, addr: IpAddr) -> bool {
        addr.is_ipv4() == self.is_ipv4() && self.first <= addr && addr <= self.last
    }

    pub fn contains_range(&self, other: &IpRange) -> bool {
        self.contains_addr(other.first) && self.contains_addr(other.last)
    }

    /// Returns the minimal list of CIDR networks covering exactly this
    /// range, in address order.
    pub fn networks(&self) -> Vec<IpNet> {
        match (self.first, self.last) {
            (IpAddr::V4(first), IpAddr::V4(last)) => Ipv4Subnets::new(first, last, 0)
                .map(IpNet::V4)
                .collect(),
            (IpAddr::V6(first), IpAddr::V6(last)) => Ipv6Subnets::new(first, last, 0)
                .map(IpNet::V6)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Returns the range as a single network, if it is exactly one CIDR
    /// block.
    pub fn as_network(&self) -> Option<IpNet> {
        let networks = self.networks();
        if networks.len() == 1 {
            networks.into_iter().next()
        } else {
            None
        }
    }

    /// Returns the smallest network that contains the whole range.
    pub fn enclosing_network(&self) -> IpNet {
        let common = (addr_to_u128(self.first) ^ addr_to_u128(self.last)).leading_zeros() as u8;
        let common = if self.is_ipv4() { common - 96 } else { common };
        IpNet::new(self.first, common)
            .map(|net| net.trunc())
            .unwrap_or_else(|_| host_network(self.first))
    }
}

impl From<IpNet> for IpRange {
    fn from(net: IpNet) -> Self {
        Self {
            first: net.network(),
            last: net.broadcast(),
        }
    }
}

impl From<IpAddr> for IpRange {
    fn from(addr: IpAddr) -> Self {
        Self {
            first: addr,
            last: addr,
        }
    }
}

impl FromStr for IpRange {
    type Err = AddressError;

    /// Parses `first - last`, a CIDR prefix, or a single address.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            Err(AddressError::Empty)
        } else if let Some((first, last)) = text.split_once('-') {
            let first = parse_addr(first.trim())?;
            let last = parse_addr(last.trim())?;
            Self::new(first, last)
        } else if text.contains('/') {
            parse_network(text).map(Self::from)
        } else {
            parse_addr(text).map(Self::from)
        }
    }
}

impl fmt::Display for IpRange {
    /// Formats single-network ranges in CIDR notation and all others in
    /// the legacy `first - last` form.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.as_network() {
            Some(net) => net.fmt(f),
            None => write!(f, "{} - {}", self.first, self.last),
        }
    }
}

/// Parses a CIDR prefix, discarding any host bits.
pub fn parse_network(text: &str) -> Result<IpNet, AddressError> {
    let (addr, len) = text
        .trim()
        .split_once('/')
        .ok_or(AddressError::InvalidPrefixLen)?;
    let addr = parse_addr(addr)?;
    if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::InvalidPrefixLen);
    }
    let len: u8 = len.parse().map_err(|_| AddressError::InvalidPrefixLen)?;
    IpNet::new(addr, len)
        .map(|net| net.trunc())
        .map_err(|_| AddressError::InvalidPrefixLen)
}

/// Parses a single IP address.
pub fn parse_addr(text: &str) -> Result<IpAddr, AddressError> {
    text.trim()
        .parse()
        .map_err(|_| AddressError::InvalidAddress)
}

/// Returns a host network (`/32` or `/128`) for an address.
pub fn host_network(addr: IpAddr) -> IpNet {
    IpNet::from(addr)
}

fn addr_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Returns the address bits of a network left-aligned in a [`u128`],
/// so that bit 0 (the most significant) is the first bit of the prefix
/// for both IP versions.
pub(crate) fn network_bits(net: &IpNet) -> u128 {
    match net.network() {
        IpAddr::V4(v4) => (u32::from(v4) as u128) << 96,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// The inverse of [`network_bits`].
pub(crate) fn network_from_bits(ipv4: bool, bits: u128, prefix_len: u8) -> Option<IpNet> {
    if ipv4 {
        Ipv4Net::new(Ipv4Addr::from((bits >> 96) as u32), prefix_len)
            .ok()
            .map(IpNet::V4)
    } else {
        Ipv6Net::new(Ipv6Addr::from(bits), prefix_len)
            .ok()
            .map(IpNet::V6)
    }
}

////////////////////////////////////////////////////////////////////////
// AS NUMBERS                                                         //
////////////////////////////////////////////////////////////////////////

/// Parses an AS number of the form `AS<digits>` (case-insensitive).
pub fn parse_asn(text: &str) -> Result<u32, AddressError> {
    let text = text.trim();
    if !starts_with_caseless(text, "AS") {
        return Err(AddressError::InvalidAsn);
    }
    let digits = &text[2..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::InvalidAsn);
    }
    digits.parse().map_err(|_| AddressError::InvalidAsn)
}

/// Parses an AS range of the form `AS<n> - AS<m>`, with or without
/// whitespace around the hyphen.
pub fn parse_as_range(text: &str) -> Result<(u32, u32), AddressError> {
    let (first, last) = text.split_once('-').ok_or(AddressError::InvalidAsn)?;
    let first = parse_asn(first)?;
    let last = parse_asn(last)?;
    if first <= last {
        Ok((first, last))
    } else {
        Err(AddressError::InvertedRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(text: &str) -> IpRange {
        text.parse().unwrap()
    }

    #[test]
    fn parses_all_three_forms() {
        assert_eq!(range("10.0.0.0/8").to_string(), "10.0.0.0/8");
        assert_eq!(range("10.1.2.3/8").to_string(), "10.0.0.0/8");
        assert_eq!(range("192.0.2.1").to_string(), "192.0.2.1/32");
        assert_eq!(
            range("192.0.2.0 - 192.0.2.255").to_string(),
            "192.0.2.0/24"
        );
        assert_eq!(
            range("2001:db8::/32").as_network().unwrap().to_string(),
            "2001:db8::/32"
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("".parse::<IpRange>(), Err(AddressError::Empty));
        assert_eq!(
            "JD1-TEST".parse::<IpRange>(),
            Err(AddressError::InvalidAddress)
        );
        assert_eq!(
            "10.0.0.0/33".parse::<IpRange>(),
            Err(AddressError::InvalidPrefixLen)
        );
        assert_eq!(
            "10.0.0.5 - 10.0.0.1".parse::<IpRange>(),
            Err(AddressError::InvertedRange)
        );
        assert_eq!(
            "10.0.0.0 - ::1".parse::<IpRange>(),
            Err(AddressError::MixedVersions)
        );
    }

    #[test]
    fn legacy_ranges_decompose() {
        let r = range("192.0.2.0 - 192.0.3.127");
        let nets: Vec<String> = r.networks().iter().map(ToString::to_string).collect();
        assert_eq!(nets, ["192.0.2.0/24", "192.0.3.0/25"]);
        assert!(r.as_network().is_none());
        assert_eq!(r.to_string(), "192.0.2.0 - 192.0.3.127");
        assert_eq!(r.enclosing_network().to_string(), "192.0.2.0/23");
    }

    #[test]
    fn containment_works() {
        let outer = range("10.0.0.0/8");
        let inner = range("10.1.0.0 - 10.1.0.9");
        assert!(outer.contains_range(&inner));
        assert!(!inner.contains_range(&outer));
        assert!(!outer.contains_addr("::1".parse().unwrap()));
        assert_eq!(range("10.0.0.0/24").span(), 255);
    }

    #[test]
    fn network_bits_round_trip() {
        for text in ["10.1.0.0/16", "2001:db8::/48"] {
            let net: IpNet = text.parse().unwrap();
            let back =
                network_from_bits(net.network().is_ipv4(), network_bits(&net), net.prefix_len());
            assert_eq!(back, Some(net));
        }
    }

    #[test]
    fn parses_as_numbers() {
        assert_eq!(parse_asn("AS64512"), Ok(64512));
        assert_eq!(parse_asn("as1"), Ok(1));
        assert!(parse_asn("AS").is_err());
        assert!(parse_asn("AS-FOO").is_err());
        assert!(parse_asn("AS99999999999").is_err());
        assert_eq!(parse_as_range("AS64512 - AS65534"), Ok((64512, 65534)));
        assert_eq!(parse_as_range("AS1-AS2"), Ok((1, 2)));
        assert!(parse_as_range("AS2-AS1").is_err());
    }
}
