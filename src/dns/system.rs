//! The leaf resolver: answers queries against the live DNS using the host's
//! resolver configuration, via `trust-dns-resolver`'s blocking client. This
//! is the bottom of every production chain; test code uses
//! `crate::dns::zone::ZoneResolver` instead.

use std::time::Instant;

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::proto::rr::RecordType as TrustRecordType;
use trust_dns_resolver::Resolver as TrustResolver;

use crate::dns::rr::{RData, RecordType, ResourceRecord};
use crate::dns::Resolver;
use crate::error::SpfResult;

pub struct SystemResolver {
    inner: TrustResolver,
}

impl SystemResolver {
    /// Builds a resolver from the host's `/etc/resolv.conf` (or platform
    /// equivalent).
    pub fn from_system_conf() -> SpfResult<Self> {
        let inner = TrustResolver::from_system_conf()
            .map_err(|_| crate::error::SpfError::new(crate::error::ErrorKind::DnsError))?;
        Ok(Self { inner })
    }

    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> SpfResult<Self> {
        let inner = TrustResolver::new(config, opts)
            .map_err(|_| crate::error::SpfError::new(crate::error::ErrorKind::DnsError))?;
        Ok(Self { inner })
    }

    fn to_trust_type(rtype: RecordType) -> TrustRecordType {
        match rtype {
            RecordType::A => TrustRecordType::A,
            RecordType::Aaaa => TrustRecordType::AAAA,
            RecordType::Mx => TrustRecordType::MX,
            RecordType::Txt => TrustRecordType::TXT,
            RecordType::Ptr => TrustRecordType::PTR,
            RecordType::Any => TrustRecordType::ANY,
        }
    }
}

impl Resolver for SystemResolver {
    fn lookup(&self, domain: &str, rtype: RecordType, _cacheable: bool) -> SpfResult<ResourceRecord> {
        log::debug!("resolving {domain} {rtype:?} against system resolver");
        let lookup = match self.inner.lookup(domain, Self::to_trust_type(rtype)) {
            Ok(lookup) => lookup,
            Err(err) => {
                log::debug!("{domain} {rtype:?} lookup failed: {err}");
                return Ok(match err.kind() {
                    ResolveErrorKind::NoRecordsFound { .. } => ResourceRecord::no_data(domain, rtype),
                    ResolveErrorKind::Message(_) | ResolveErrorKind::Msg(_) => {
                        ResourceRecord::try_again(domain, rtype)
                    }
                    _ => ResourceRecord::try_again(domain, rtype),
                })
            }
        };

        let ttl = lookup.valid_until().saturating_duration_since(Instant::now());

        let mut data = Vec::new();
        for rdata in lookup.iter() {
            match rdata {
                trust_dns_resolver::proto::rr::RData::A(addr) => data.push(RData::A(*addr)),
                trust_dns_resolver::proto::rr::RData::AAAA(addr) => data.push(RData::Aaaa(*addr)),
                trust_dns_resolver::proto::rr::RData::MX(mx) => data.push(RData::Mx {
                    preference: mx.preference(),
                    exchange: mx.exchange().to_utf8(),
                }),
                trust_dns_resolver::proto::rr::RData::TXT(txt) => {
                    let joined = txt
                        .iter()
                        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                        .collect::<Vec<_>>()
                        .join("");
                    data.push(RData::Txt(joined));
                }
                trust_dns_resolver::proto::rr::RData::PTR(ptr) => data.push(RData::Ptr(ptr.to_utf8())),
                _ => {}
            }
        }

        if data.is_empty() {
            return Ok(ResourceRecord::no_data(domain, rtype));
        }

        Ok(ResourceRecord::success(domain, rtype, ttl, data))
    }
}
