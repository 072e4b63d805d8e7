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

//! Conversion between networks and reverse-DNS (`in-addr.arpa` and
//! `ip6.arpa`) domain names.

use std::fmt::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use arrayvec::ArrayVec;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::net::AddressError;
use crate::util::{ascii_hex_digit_to_nibble, ends_with_caseless, nibble_to_ascii_hex_digit};

const IN_ADDR_ARPA: &str = "in-addr.arpa";
const IP6_ARPA: &str = "ip6.arpa";

/// Returns the reverse-DNS domain enclosing `net`: the first
/// `ceil(prefix_len / 8)` octets (IPv4) or `ceil(prefix_len / 4)`
/// nibbles (IPv6) of the network address, reversed.
pub fn rdns_domain(net: &IpNet) -> String {
    let mut domain = String::new();
    match net.network() {
        IpAddr::V4(addr) => {
            let count = (net.prefix_len() as usize + 7) / 8;
            for octet in addr.octets()[..count].iter().rev() {
                let _ = write!(domain, "{}.", octet);
            }
            domain.push_str(IN_ADDR_ARPA);
        }
        IpAddr::V6(addr) => {
            let count = (net.prefix_len() as usize + 3) / 4;
            let mut nibbles = ArrayVec::<u8, 32>::new();
            for octet in addr.octets() {
                nibbles.push(octet >> 4);
                nibbles.push(octet & 0xf);
            }
            for &nibble in nibbles[..count].iter().rev() {
                domain.push(nibble_to_ascii_hex_digit(nibble) as char);
                domain.push('.');
            }
            domain.push_str(IP6_ARPA);
        }
    }
    domain
}

/// Returns the reverse-DNS zones covering `net`. A network whose
/// prefix length is not on a label boundary is covered by several
/// zones, one for each subnet at the next boundary.
pub fn rdns_zones(net: &IpNet) -> Vec<String> {
    let step = if net.network().is_ipv4() { 8 } else { 4 };
    let aligned = (net.prefix_len() + step - 1) / step * step;
    match net.subnets(aligned) {
        Ok(subnets) => subnets.map(|subnet| rdns_domain(&subnet)).collect(),
        Err(_) => vec![rdns_domain(net)],
    }
}

/// Parses a reverse-DNS domain into the network it names. Missing
/// trailing components are taken to be zero, so `2.0.192.in-addr.arpa`
/// is `192.0.2.0/24`.
pub fn rdns_network(name: &str) -> Result<IpNet, AddressError> {
    let name = name.trim().trim_end_matches('.');
    if ends_with_caseless(name, IN_ADDR_ARPA) {
        let labels = strip_suffix(name, IN_ADDR_ARPA)?;
        let mut octets = ArrayVec::<u8, 4>::new();
        for label in labels.iter().rev() {
            let octet = label
                .parse()
                .map_err(|_| AddressError::InvalidReverseName)?;
            octets
                .try_push(octet)
                .map_err(|_| AddressError::InvalidReverseName)?;
        }
        let prefix_len = 8 * octets.len() as u8;
        let mut padded = [0; 4];
        padded[..octets.len()].copy_from_slice(&octets);
        Ipv4Net::new(Ipv4Addr::from(padded), prefix_len)
            .map(IpNet::V4)
            .map_err(|_| AddressError::InvalidReverseName)
    } else if ends_with_caseless(name, IP6_ARPA) {
        let labels = strip_suffix(name, IP6_ARPA)?;
        let mut nibbles = ArrayVec::<u8, 32>::new();
        for label in labels.iter().rev() {
            let nibble = match label.as_bytes() {
                [digit] => ascii_hex_digit_to_nibble(*digit),
                _ => None,
            }
            .ok_or(AddressError::InvalidReverseName)?;
            nibbles
                .try_push(nibble)
                .map_err(|_| AddressError::InvalidReverseName)?;
        }
        let prefix_len = 4 * nibbles.len() as u8;
        let mut octets = [0; 16];
        for (i, nibble) in nibbles.iter().enumerate() {
            octets[i / 2] |= if i % 2 == 0 { nibble << 4 } else { *nibble };
        }
        Ipv6Net::new(Ipv6Addr::from(octets), prefix_len)
            .map(IpNet::V6)
            .map_err(|_| AddressError::InvalidReverseName)
    } else {
        Err(AddressError::InvalidReverseName)
    }
}

/// Splits the labels in front of `suffix`. The name is known to end
/// with the suffix.
fn strip_suffix<'a>(name: &'a str, suffix: &str) -> Result<Vec<&'a str>, AddressError> {
    let head = &name[..name.len() - suffix.len()];
    if head.is_empty() {
        return Ok(Vec::new());
    }
    match head.strip_suffix('.') {
        Some(head) => Ok(head.split('.').collect()),
        None => Err(AddressError::InvalidReverseName),
    }
}
