//! Typed DNS resource records and lookup status, replacing the tagged
//! void-pointer union the C reference hands around with a sum type per RR
//! kind carrying owned strings/addresses.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// The RR type being asked for or carried in an answer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Mx,
    Txt,
    Ptr,
    /// Query every type a mechanism might need in one shot (used by `ptr`
    /// validation, which needs both A and AAAA depending on client family).
    Any,
}

/// The outcome of a lookup. A resolver never returns a null RR: absence is
/// always encoded here rather than by an `Option` at the call site, so every
/// link of the chain can cache and propagate it uniformly.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DnsStatus {
    Success,
    HostNotFound,
    NoData,
    /// The underlying resolver could not complete the query right now; the
    /// interpreter surfaces this as `temperror`.
    TryAgain,
}

impl DnsStatus {
    pub fn is_success(self) -> bool {
        matches!(self, DnsStatus::Success)
    }

    pub fn is_transient(self) -> bool {
        matches!(self, DnsStatus::TryAgain)
    }
}

/// One payload entry of a resource record, tagged by the RR kind that
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Mx { preference: u16, exchange: String },
    Txt(String),
    Ptr(String),
}

/// A resolved (or failed) answer for one `(domain, type)` query.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub domain: String,
    pub rtype: RecordType,
    pub status: DnsStatus,
    pub ttl: Duration,
    pub data: Vec<RData>,
}

impl ResourceRecord {
    pub fn success(domain: impl Into<String>, rtype: RecordType, ttl: Duration, data: Vec<RData>) -> Self {
        Self {
            domain: domain.into(),
            rtype,
            status: DnsStatus::Success,
            ttl,
            data,
        }
    }

    pub fn not_found(domain: impl Into<String>, rtype: RecordType) -> Self {
        Self {
            domain: domain.into(),
            rtype,
            status: DnsStatus::HostNotFound,
            ttl: Duration::from_secs(0),
            data: Vec::new(),
        }
    }

    pub fn no_data(domain: impl Into<String>, rtype: RecordType) -> Self {
        Self {
            domain: domain.into(),
            rtype,
            status: DnsStatus::NoData,
            ttl: Duration::from_secs(0),
            data: Vec::new(),
        }
    }

    pub fn try_again(domain: impl Into<String>, rtype: RecordType) -> Self {
        Self {
            domain: domain.into(),
            rtype,
            status: DnsStatus::TryAgain,
            ttl: Duration::from_secs(0),
            data: Vec::new(),
        }
    }

    /// Every TXT string among this answer's payload entries, in order.
    pub fn txt_strings(&self) -> impl Iterator<Item = &str> {
        self.data.iter().filter_map(|d| match d {
            RData::Txt(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn a_addrs(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.data.iter().filter_map(|d| match d {
            RData::A(a) => Some(*a),
            _ => None,
        })
    }

    pub fn aaaa_addrs(&self) -> impl Iterator<Item = Ipv6Addr> + '_ {
        self.data.iter().filter_map(|d| match d {
            RData::Aaaa(a) => Some(*a),
            _ => None,
        })
    }

    pub fn mx_exchanges(&self) -> impl Iterator<Item = &str> {
        self.data.iter().filter_map(|d| match d {
            RData::Mx { exchange, .. } => Some(exchange.as_str()),
            _ => None,
        })
    }

    pub fn ptr_names(&self) -> impl Iterator<Item = &str> {
        self.data.iter().filter_map(|d| match d {
            RData::Ptr(p) => Some(p.as_str()),
            _ => None,
        })
    }
}
