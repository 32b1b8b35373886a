//! Process-wide configuration shared by many evaluations: the resolver
//! chain, default explanation, local policy, receiving host name, and the
//! DNS-lookup bounds every evaluation must respect.

use std::sync::Arc;

use crate::dns::Resolver;
use crate::record::{compile::compile, CompiledRecord};

const DEFAULT_EXPLANATION: &str =
    "Please see http://www.openspf.org/Why?s=%{S}&id=%{S}&ip=%{C}&r=%{R}";

pub struct Server {
    pub resolver: Arc<dyn Resolver>,
    pub receiving_domain: String,
    pub default_explanation: String,
    pub local_policy: Option<CompiledRecord>,
    pub max_dns_mech: u32,
    pub max_dns_ptr: u32,
    pub max_dns_mx: u32,
    pub sanitize: bool,
}

impl Server {
    pub fn new(resolver: Arc<dyn Resolver>, receiving_domain: impl Into<String>) -> Self {
        Self {
            resolver,
            receiving_domain: receiving_domain.into(),
            default_explanation: DEFAULT_EXPLANATION.to_owned(),
            local_policy: None,
            max_dns_mech: 10,
            max_dns_ptr: 10,
            max_dns_mx: 10,
            sanitize: true,
        }
    }

    pub fn with_default_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.default_explanation = explanation.into();
        self
    }

    /// Compiles and attaches a local-policy record, spliced into evaluated
    /// records per the interpreter's local-policy placement rule when the
    /// request opts in.
    pub fn with_local_policy(mut self, policy_text: &str) -> Self {
        let outcome = compile(policy_text, u32::MAX);
        self.local_policy = Some(outcome.record);
        self
    }

    pub fn with_max_dns_mech(mut self, n: u32) -> Self {
        self.max_dns_mech = n;
        self
    }

    pub fn with_max_dns_ptr(mut self, n: u32) -> Self {
        self.max_dns_ptr = n;
        self
    }

    pub fn with_max_dns_mx(mut self, n: u32) -> Self {
        self.max_dns_mx = n;
        self
    }

    pub fn with_sanitize(mut self, sanitize: bool) -> Self {
        self.sanitize = sanitize;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::null::NullResolver;

    #[test]
    fn defaults_match_documented_bounds() {
        let server = Server::new(Arc::new(NullResolver), "mail.example.com");
        assert_eq!(server.max_dns_mech, 10);
        assert_eq!(server.max_dns_ptr, 10);
        assert_eq!(server.max_dns_mx, 10);
        assert!(server.sanitize);
        assert!(server.local_policy.is_none());
    }

    #[test]
    fn local_policy_compiles_eagerly() {
        let server = Server::new(Arc::new(NullResolver), "mail.example.com")
            .with_local_policy("v=spf1 ip4:192.0.2.0/24 -all");
        assert!(server.local_policy.is_some());
    }
}
