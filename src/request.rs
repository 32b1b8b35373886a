//! The per-message input to an evaluation. Immutable after construction
//! except for the validated-hostname cache, which is filled in lazily the
//! first time the `p` macro is actually referenced.

use std::cell::RefCell;
use std::net::IpAddr;

use crate::dns::reverse::ptr_name;
use crate::dns::rr::RecordType;
use crate::dns::Resolver;
use crate::error::SpfResult;

/// The envelope-from address, split into the parts the macro expander and
/// the interpreter each need independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFrom {
    pub local_part: String,
    pub domain: String,
}

impl EnvFrom {
    /// Splits `user@domain`. An empty local-part (a bare `@domain`, or a
    /// MAIL FROM with no local part at all) defaults to `postmaster`.
    pub fn parse(address: &str) -> Self {
        let (local_part, domain) = match address.split_once('@') {
            Some((l, d)) => (l, d),
            None => ("", address),
        };
        let local_part = if local_part.is_empty() {
            "postmaster".to_owned()
        } else {
            local_part.to_owned()
        };
        Self {
            local_part,
            domain: domain.to_owned(),
        }
    }

    pub fn full(&self) -> String {
        format!("{}@{}", self.local_part, self.domain)
    }
}

pub struct Request {
    pub client_ip: IpAddr,
    pub helo_domain: String,
    pub env_from: EnvFrom,
    pub rcpt_to_domain: Option<String>,
    pub use_helo: bool,
    pub use_local_policy: bool,
    validated_hostname: RefCell<Option<String>>,
}

impl Request {
    pub fn new(client_ip: IpAddr, helo_domain: impl Into<String>, mail_from: &str) -> Self {
        Self {
            client_ip,
            helo_domain: helo_domain.into(),
            env_from: EnvFrom::parse(mail_from),
            rcpt_to_domain: None,
            use_helo: false,
            use_local_policy: false,
            validated_hostname: RefCell::new(None),
        }
    }

    pub fn with_rcpt_to(mut self, domain: impl Into<String>) -> Self {
        self.rcpt_to_domain = Some(domain.into());
        self
    }

    pub fn with_use_helo(mut self, use_helo: bool) -> Self {
        self.use_helo = use_helo;
        self
    }

    pub fn with_use_local_policy(mut self, use_local_policy: bool) -> Self {
        self.use_local_policy = use_local_policy;
        self
    }

    /// The domain evaluation starts from: the MAIL FROM domain, or the HELO
    /// domain when `use_helo` is set.
    pub fn identity_domain(&self) -> &str {
        if self.use_helo {
            &self.helo_domain
        } else {
            &self.env_from.domain
        }
    }

    pub fn is_loopback(&self) -> bool {
        match self.client_ip {
            IpAddr::V4(v4) => v4.octets()[0] == 127,
            IpAddr::V6(v6) => v6.is_loopback(),
        }
    }

    /// The `p` macro: up to `max_dns_ptr` PTR candidates for the client IP,
    /// forward-confirmed against an A/AAAA lookup, first validated hit wins.
    /// `unknown` if none validate. Cached after the first call.
    pub fn validated_client_hostname(&self, resolver: &dyn Resolver, max_dns_ptr: u32) -> SpfResult<String> {
        if let Some(cached) = self.validated_hostname.borrow().as_ref() {
            return Ok(cached.clone());
        }

        let result = self.resolve_validated_hostname(resolver, max_dns_ptr)?;
        *self.validated_hostname.borrow_mut() = Some(result.clone());
        Ok(result)
    }

    fn resolve_validated_hostname(&self, resolver: &dyn Resolver, max_dns_ptr: u32) -> SpfResult<String> {
        let ptr_query = ptr_name(self.client_ip);
        let ptr_answer = resolver.lookup(&ptr_query, RecordType::Ptr, true)?;
        if !ptr_answer.status.is_success() {
            return Ok("unknown".to_owned());
        }

        for candidate in ptr_answer.ptr_names().take(max_dns_ptr.max(1) as usize) {
            let forward_type = match self.client_ip {
                IpAddr::V4(_) => RecordType::A,
                IpAddr::V6(_) => RecordType::Aaaa,
            };
            let forward = resolver.lookup(candidate, forward_type, true)?;
            if !forward.status.is_success() {
                continue;
            }
            let matches = match self.client_ip {
                IpAddr::V4(v4) => forward.a_addrs().any(|a| a == v4),
                IpAddr::V6(v6) => forward.aaaa_addrs().any(|a| a == v6),
            };
            if matches {
                return Ok(candidate.trim_end_matches('.').to_owned());
            }
        }
        Ok("unknown".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_local_part_defaults_to_postmaster() {
        let env = EnvFrom::parse("@example.com");
        assert_eq!(env.local_part, "postmaster");
        assert_eq!(env.domain, "example.com");
    }

    #[test]
    fn splits_local_and_domain() {
        let env = EnvFrom::parse("alice@example.com");
        assert_eq!(env.local_part, "alice");
        assert_eq!(env.domain, "example.com");
    }

    #[test]
    fn loopback_v4_and_v6_detected() {
        let req = Request::new("127.0.0.3".parse().unwrap(), "helo", "a@d");
        assert!(req.is_loopback());
        let req = Request::new("::1".parse().unwrap(), "helo", "a@d");
        assert!(req.is_loopback());
        let req = Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d");
        assert!(!req.is_loopback());
    }

    #[test]
    fn identity_domain_switches_on_use_helo() {
        let req = Request::new("192.0.2.1".parse().unwrap(), "helo.example", "a@mailfrom.example")
            .with_use_helo(true);
        assert_eq!(req.identity_domain(), "helo.example");
    }
}
