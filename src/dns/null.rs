//! The explicit chain terminator: always answers `HostNotFound`. Every
//! resolver chain ends here so `layer_below` is never `Option<_>` at the
//! call site - there is always something to delegate to.

use crate::dns::rr::{RecordType, ResourceRecord};
use crate::dns::Resolver;
use crate::error::SpfResult;

#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl Resolver for NullResolver {
    fn lookup(&self, domain: &str, rtype: RecordType, _cacheable: bool) -> SpfResult<ResourceRecord> {
        Ok(ResourceRecord::not_found(domain, rtype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rr::DnsStatus;

    #[test]
    fn always_answers_host_not_found() {
        let r = NullResolver;
        let rr = r.lookup("example.com", RecordType::Txt, true).unwrap();
        assert_eq!(rr.status, DnsStatus::HostNotFound);
    }
}
