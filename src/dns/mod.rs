//! The resolver chain: an ordered sequence of resolvers, each either
//! answering a query or delegating to the layer below it. Expressed as a
//! trait rather than a function-pointer "config" struct, so composition is
//! ordinary ownership (`Box<dyn Resolver>` holding the next link) instead of
//! `layer_below` pointer arithmetic.

pub mod cache;
pub mod null;
pub mod reverse;
pub mod rr;
pub mod system;
pub mod zone;

use crate::error::SpfResult;
use rr::{RecordType, ResourceRecord};

/// One link of the resolver chain.
///
/// `lookup` never returns `Err` for an absent record - absence is encoded as
/// `DnsStatus::HostNotFound`/`NoData` on the returned [`ResourceRecord`].
/// `Err` is reserved for the synthesis of the query itself going wrong
/// (should not happen for well-formed domains).
pub trait Resolver: Send + Sync {
    fn lookup(&self, domain: &str, rtype: RecordType, cacheable: bool) -> SpfResult<ResourceRecord>;

    /// Fetches the (single) TXT record believed to hold an SPF policy for
    /// `domain`. Left as a default built on `lookup` so only `system`
    /// (and test doubles) need to implement anything special.
    fn get_spf(&self, domain: &str) -> SpfResult<ResourceRecord> {
        self.lookup(domain, RecordType::Txt, true)
    }

    /// Fetches an `exp=` explanation string. Best-effort: callers fall back
    /// to the server's default explanation on any failure.
    fn get_exp(&self, domain: &str) -> SpfResult<ResourceRecord> {
        self.lookup(domain, RecordType::Txt, true)
    }
}

impl<R: Resolver + ?Sized> Resolver for std::sync::Arc<R> {
    fn lookup(&self, domain: &str, rtype: RecordType, cacheable: bool) -> SpfResult<ResourceRecord> {
        (**self).lookup(domain, rtype, cacheable)
    }

    fn get_spf(&self, domain: &str) -> SpfResult<ResourceRecord> {
        (**self).get_spf(domain)
    }

    fn get_exp(&self, domain: &str) -> SpfResult<ResourceRecord> {
        (**self).get_exp(domain)
    }
}
