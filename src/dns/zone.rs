//! A synthetic zone resolver: an in-memory map from `(domain, type)` to a
//! canned answer, used to drive deterministic tests without touching the
//! network. Domain names are matched case-insensitively; anything not
//! explicitly populated delegates to the layer below (by default a
//! [`crate::dns::null::NullResolver`]).

use std::collections::HashMap;
use std::time::Duration;

use crate::dns::rr::{DnsStatus, RData, RecordType, ResourceRecord};
use crate::dns::null::NullResolver;
use crate::dns::Resolver;
use crate::error::SpfResult;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

fn key(domain: &str, rtype: RecordType) -> (String, RecordType) {
    (domain.trim_end_matches('.').to_ascii_lowercase(), rtype)
}

pub struct ZoneResolver<D: Resolver = NullResolver> {
    answers: HashMap<(String, RecordType), ResourceRecord>,
    layer_below: D,
}

impl ZoneResolver<NullResolver> {
    pub fn new() -> Self {
        Self {
            answers: HashMap::new(),
            layer_below: NullResolver,
        }
    }
}

impl Default for ZoneResolver<NullResolver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Resolver> ZoneResolver<D> {
    pub fn with_layer_below(layer_below: D) -> Self {
        Self {
            answers: HashMap::new(),
            layer_below,
        }
    }

    pub fn set(&mut self, domain: &str, rr: ResourceRecord) -> &mut Self {
        self.answers.insert(key(domain, rr.rtype), rr);
        self
    }

    pub fn set_txt(&mut self, domain: &str, text: impl Into<String>) -> &mut Self {
        self.set(
            domain,
            ResourceRecord::success(domain, RecordType::Txt, DEFAULT_TTL, vec![RData::Txt(text.into())]),
        )
    }

    pub fn set_a(&mut self, domain: &str, addrs: &[std::net::Ipv4Addr]) -> &mut Self {
        self.set(
            domain,
            ResourceRecord::success(
                domain,
                RecordType::A,
                DEFAULT_TTL,
                addrs.iter().copied().map(RData::A).collect(),
            ),
        )
    }

    pub fn set_aaaa(&mut self, domain: &str, addrs: &[std::net::Ipv6Addr]) -> &mut Self {
        self.set(
            domain,
            ResourceRecord::success(
                domain,
                RecordType::Aaaa,
                DEFAULT_TTL,
                addrs.iter().copied().map(RData::Aaaa).collect(),
            ),
        )
    }

    pub fn set_mx(&mut self, domain: &str, exchanges: &[(u16, &str)]) -> &mut Self {
        self.set(
            domain,
            ResourceRecord::success(
                domain,
                RecordType::Mx,
                DEFAULT_TTL,
                exchanges
                    .iter()
                    .map(|(preference, exchange)| RData::Mx {
                        preference: *preference,
                        exchange: (*exchange).to_owned(),
                    })
                    .collect(),
            ),
        )
    }

    pub fn set_ptr(&mut self, ptr_domain: &str, names: &[&str]) -> &mut Self {
        self.set(
            ptr_domain,
            ResourceRecord::success(
                ptr_domain,
                RecordType::Ptr,
                DEFAULT_TTL,
                names.iter().map(|n| RData::Ptr((*n).to_owned())).collect(),
            ),
        )
    }

    pub fn set_try_again(&mut self, domain: &str, rtype: RecordType) -> &mut Self {
        self.answers
            .insert(key(domain, rtype), ResourceRecord::try_again(domain, rtype));
        self
    }

    pub fn set_nxdomain(&mut self, domain: &str, rtype: RecordType) -> &mut Self {
        self.answers
            .insert(key(domain, rtype), ResourceRecord::not_found(domain, rtype));
        self
    }
}

impl<D: Resolver> Resolver for ZoneResolver<D> {
    fn lookup(&self, domain: &str, rtype: RecordType, cacheable: bool) -> SpfResult<ResourceRecord> {
        if let Some(rr) = self.answers.get(&key(domain, rtype)) {
            return Ok(rr.clone());
        }
        if rtype == RecordType::Any {
            let a = self.answers.get(&key(domain, RecordType::A));
            let aaaa = self.answers.get(&key(domain, RecordType::Aaaa));
            if a.is_some() || aaaa.is_some() {
                let mut data = Vec::new();
                if let Some(rr) = a {
                    data.extend(rr.data.iter().cloned());
                }
                if let Some(rr) = aaaa {
                    data.extend(rr.data.iter().cloned());
                }
                if !data.is_empty() {
                    return Ok(ResourceRecord::success(domain, RecordType::Any, DEFAULT_TTL, data));
                }
            }
        }
        self.layer_below.lookup(domain, rtype, cacheable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_configured_txt_record() {
        let mut zone = ZoneResolver::new();
        zone.set_txt("example.com", "v=spf1 -all");
        let rr = zone.lookup("example.com", RecordType::Txt, true).unwrap();
        assert_eq!(rr.status, DnsStatus::Success);
        assert_eq!(rr.txt_strings().next(), Some("v=spf1 -all"));
    }

    #[test]
    fn is_case_insensitive_and_ignores_trailing_dot() {
        let mut zone = ZoneResolver::new();
        zone.set_txt("Example.COM.", "v=spf1 -all");
        let rr = zone.lookup("example.com", RecordType::Txt, true).unwrap();
        assert_eq!(rr.status, DnsStatus::Success);
    }

    #[test]
    fn unconfigured_domain_falls_through_to_null() {
        let zone = ZoneResolver::new();
        let rr = zone.lookup("nowhere.example", RecordType::Txt, true).unwrap();
        assert_eq!(rr.status, DnsStatus::HostNotFound);
    }
}
