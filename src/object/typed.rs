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

//! Typed views of objects whose class the query engine understands.

use std::ops::RangeInclusive;

use ipnet::IpNet;

use super::class::{self, AS_BLOCK, AUT_NUM, INET6NUM, INETNUM, ORGANISATION, ROUTE, ROUTE6};
use super::Object;
use crate::index::rdns;
use crate::net::{self, AddressError, IpRange};

/// A class-specific view of an [`Object`], produced by
/// [`Object::typed`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Typed {
    Inetnum(Inetnum),
    Route(Route),
    AsBlock(AsBlock),
    AutNum(AutNum),
    Handle(Handle),
    Generic,
}

impl Object {
    /// Interprets the object according to its class. Objects of classes
    /// without special handling yield [`Typed::Generic`]; an error is
    /// returned only when the class is understood but its key (or a
    /// required field) is malformed.
    pub fn typed(&self) -> Result<Typed, AddressError> {
        let class = self.class().to_ascii_lowercase();
        match class.as_str() {
            INETNUM | INET6NUM => Ok(Typed::Inetnum(Inetnum {
                range: self.key().parse()?,
            })),
            ROUTE | ROUTE6 => {
                let origin = match self.get("origin") {
                    Some(origin) => Some(net::parse_asn(origin)?),
                    None => None,
                };
                Ok(Typed::Route(Route {
                    prefix: net::parse_network(self.key())?,
                    origin,
                }))
            }
            AS_BLOCK => {
                let (first, last) = net::parse_as_range(self.key())?;
                Ok(Typed::AsBlock(AsBlock { first, last }))
            }
            AUT_NUM => Ok(Typed::AutNum(AutNum {
                asn: net::parse_asn(self.key())?,
            })),
            class::PERSON | class::ROLE | ORGANISATION => Ok(Typed::Handle(Handle {
                handle: self.primary_key(),
            })),
            _ => Ok(Typed::Generic),
        }
    }
}

/// An `inetnum` or `inet6num`: a CIDR network or a legacy range.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Inetnum {
    range: IpRange,
}

impl Inetnum {
    pub fn ip_range(&self) -> IpRange {
        self.range
    }

    /// Returns the network, if the object describes exactly one CIDR
    /// block.
    pub fn ip_network(&self) -> Option<IpNet> {
        self.range.as_network()
    }

    /// Returns the CIDR blocks covering the object's range.
    pub fn ip_networks(&self) -> Vec<IpNet> {
        self.range.networks()
    }

    pub fn ip_version(&self) -> u8 {
        self.range.ip_version()
    }

    /// Returns the reverse-DNS zones covering the object's address
    /// space, for every CIDR block in it.
    pub fn rdns_zones(&self) -> Vec<String> {
        let mut zones = Vec::new();
        for net in self.ip_networks() {
            for zone in rdns::rdns_zones(&net) {
                if !zones.contains(&zone) {
                    zones.push(zone);
                }
            }
        }
        zones
    }
}

/// A `route` or `route6`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    prefix: IpNet,
    origin: Option<u32>,
}

impl Route {
    pub fn prefix(&self) -> IpNet {
        self.prefix
    }

    pub fn origin(&self) -> Option<u32> {
        self.origin
    }
}

/// An `as-block`: an inclusive range of AS numbers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AsBlock {
    first: u32,
    last: u32,
}

impl AsBlock {
    pub fn new(first: u32, last: u32) -> Self {
        Self { first, last }
    }

    pub fn range(&self) -> RangeInclusive<u32> {
        self.first..=self.last
    }

    pub fn contains(&self, asn: u32) -> bool {
        self.range().contains(&asn)
    }

    /// Returns the number of AS numbers in the block.
    pub fn size(&self) -> u64 {
        u64::from(self.last) - u64::from(self.first) + 1
    }
}

/// An `aut-num`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AutNum {
    asn: u32,
}

impl AutNum {
    pub fn asn(&self) -> u32 {
        self.asn
    }
}

/// A `person`, `role`, or `organisation`, identified by its handle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Handle {
    handle: String,
}

impl Handle {
    pub fn handle(&self) -> &str {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inetnum_views_work() {
        let object: Object = "inetnum: 192.0.2.0 - 192.0.3.255\nnetname: EX\n"
            .parse()
            .unwrap();
        match object.typed().unwrap() {
            Typed::Inetnum(inetnum) => {
                assert_eq!(inetnum.ip_network().unwrap().to_string(), "192.0.2.0/23");
                assert_eq!(inetnum.ip_version(), 4);
                assert_eq!(
                    inetnum.rdns_zones(),
                    ["2.0.192.in-addr.arpa", "3.0.192.in-addr.arpa"]
                );
            }
            other => panic!("expected an inetnum, got {:?}", other),
        }
    }

    #[test]
    fn route_and_asn_views_work() {
        let route: Object = "route6: 2001:db8::/32\norigin: AS64512\n".parse().unwrap();
        match route.typed().unwrap() {
            Typed::Route(route) => {
                assert_eq!(route.prefix().to_string(), "2001:db8::/32");
                assert_eq!(route.origin(), Some(64512));
            }
            other => panic!("expected a route, got {:?}", other),
        }

        let block = Object::new("as-block", "AS64512 - AS65534");
        match block.typed().unwrap() {
            Typed::AsBlock(block) => {
                assert!(block.contains(64600));
                assert!(!block.contains(65535));
                assert_eq!(block.size(), 1023);
            }
            other => panic!("expected an as-block, got {:?}", other),
        }

        let aut_num = Object::new("aut-num", "AS64600");
        assert_eq!(
            aut_num.typed().unwrap(),
            Typed::AutNum(AutNum { asn: 64600 })
        );
    }

    #[test]
    fn malformed_keys_are_errors() {
        assert!(Object::new("inetnum", "not-a-network").typed().is_err());
        assert!(Object::new("aut-num", "64512").typed().is_err());
        assert_eq!(Object::new("poem", "ODE").typed(), Ok(Typed::Generic));
    }
}
