//! The bytecode walker: drives a [`CompiledRecord`] against a [`Request`]
//! through a [`Server`]'s resolver chain, enforcing the DNS-lookup budget and
//! the include/redirect recursion cap, and produces a [`Response`].

use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};

use crate::dns::reverse::ptr_name;
use crate::dns::rr::RecordType;
use crate::dns::Resolver;
use crate::error::{ErrorKind, SpfError, SpfResult};
use crate::record::compile::{compile, Warning};
use crate::record::{Cidr, CompiledRecord, DomainSpec, MechanismBody, Opcode};
use crate::request::Request;
use crate::response::{Reason, Response, Verdict};
use crate::server::Server;
use crate::spf::macro_eval::{self, EvaluationContext};
use crate::spf::{MacroVariable, Qualifier};

const MAX_RECURSION_DEPTH: u32 = 20;

fn normalize_domain(domain: &str) -> String {
    domain.trim_end_matches('.').to_ascii_lowercase()
}

/// A mechanism spliced in by local-policy placement reports reason
/// `local-policy` instead of plain `mechanism`.
fn reason_for(mech: &crate::record::Mechanism) -> Reason {
    if mech.from_local_policy {
        Reason::LocalPolicy
    } else {
        Reason::Mechanism
    }
}

fn qualifier_to_verdict(q: Qualifier) -> Verdict {
    match q {
        Qualifier::Pass => Verdict::Pass,
        Qualifier::Fail => Verdict::Fail,
        Qualifier::SoftFail => Verdict::SoftFail,
        Qualifier::Neutral => Verdict::Neutral,
    }
}

fn smtp_client_ip_macro_form(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            let mut labels = Vec::with_capacity(32);
            for byte in v6.octets().iter().rev() {
                labels.push(format!("{:x}", byte & 0xF));
                labels.push(format!("{:x}", byte >> 4));
            }
            labels.join(".")
        }
    }
}

fn effective_prefix_v4(raw: u8) -> u8 {
    if raw == 0 {
        32
    } else {
        raw
    }
}

fn effective_prefix_v6(raw: u8) -> u8 {
    if raw == 0 {
        128
    } else {
        raw
    }
}

fn a_mx_prefix_v4(cidr: Option<u8>) -> u8 {
    cidr.map(effective_prefix_v4).unwrap_or(32)
}

fn a_mx_prefix_v6(cidr: Option<u8>) -> u8 {
    cidr.map(effective_prefix_v6).unwrap_or(128)
}

fn ip4_in_cidr(client: Ipv4Addr, net_addr: Ipv4Addr, prefix: u8) -> bool {
    Ipv4Network::new(net_addr, prefix)
        .map(|n| n.contains(client))
        .unwrap_or(false)
}

fn ip6_in_cidr(client: Ipv6Addr, net_addr: Ipv6Addr, prefix: u8) -> bool {
    Ipv6Network::new(net_addr, prefix)
        .map(|n| n.contains(client))
        .unwrap_or(false)
}

/// `candidate` equals `target`, or is a proper subdomain of it (dot boundary,
/// not just a suffix match on raw characters).
fn domain_matches_or_is_subdomain(candidate: &str, target: &str) -> bool {
    let candidate = normalize_domain(candidate);
    let target = normalize_domain(target);
    candidate == target || candidate.ends_with(&format!(".{target}"))
}

/// Bridges a [`Request`]/[`Server`] pair into the macro expander's
/// [`EvaluationContext`], re-pointed at whatever domain is currently being
/// evaluated (changes across `include`/`redirect`).
struct RequestContext<'a> {
    request: &'a Request,
    server: &'a Server,
    current_domain: &'a str,
}

impl<'a> EvaluationContext for RequestContext<'a> {
    fn provide_data(&self, v: MacroVariable) -> Result<Cow<str>, SpfError> {
        let value = match v {
            MacroVariable::LocalPart => Cow::Borrowed(self.request.env_from.local_part.as_str()),
            MacroVariable::Sender => Cow::Owned(self.request.env_from.full()),
            MacroVariable::SenderDomain => Cow::Borrowed(self.request.env_from.domain.as_str()),
            MacroVariable::Domain => Cow::Borrowed(self.current_domain),
            MacroVariable::SmtpClientIp => Cow::Owned(smtp_client_ip_macro_form(self.request.client_ip)),
            MacroVariable::CanonicalClientIp => Cow::Owned(self.request.client_ip.to_string()),
            MacroVariable::Timestamp => Cow::Owned(
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs().to_string())
                    .unwrap_or_else(|_| "0".to_owned()),
            ),
            MacroVariable::ValidatedDomainName => Cow::Owned(
                self.request
                    .validated_client_hostname(self.server.resolver.as_ref(), self.server.max_dns_ptr)
                    .unwrap_or_else(|_| "unknown".to_owned()),
            ),
            MacroVariable::IpVersionName => Cow::Borrowed(match self.request.client_ip {
                IpAddr::V4(_) => "in-addr",
                IpAddr::V6(_) => "ip6",
            }),
            MacroVariable::HeloOrEhloDomain => Cow::Borrowed(self.request.helo_domain.as_str()),
            MacroVariable::ReceivingDomain => Cow::Borrowed(self.server.receiving_domain.as_str()),
        };
        Ok(value)
    }
}

/// Splices `policy`'s mechanisms immediately after the last non-`-`/non-`~`
/// mechanism appearing before a terminal `-all`. Does nothing if the record
/// does not end in a failing `all`. If every mechanism before the terminal
/// `all` is itself `-`/`~`, the policy is spliced directly in front of it.
fn splice_local_policy(record: &mut CompiledRecord, policy: &CompiledRecord) {
    let Some(terminal_idx) = record.mechanisms.iter().position(|m| m.body.opcode() == Opcode::All) else {
        return;
    };
    if terminal_idx != record.mechanisms.len() - 1 || record.mechanisms[terminal_idx].qualifier != Qualifier::Fail {
        return;
    }

    let mut insert_at = terminal_idx;
    for i in (0..terminal_idx).rev() {
        let q = record.mechanisms[i].qualifier;
        if q != Qualifier::Fail && q != Qualifier::SoftFail {
            insert_at = i + 1;
            break;
        }
    }

    record.mechanisms.splice(
        insert_at..insert_at,
        policy.mechanisms.iter().cloned().map(|mut m| {
            m.from_local_policy = true;
            m
        }),
    );
}

enum FetchOutcome {
    Found(CompiledRecord),
    NotFound,
    Temporary,
    Multiple,
}

/// Carries the mutable state threaded through one evaluation: the
/// DNS-mechanism counter and the accumulated errors/warnings.
struct Eval<'a> {
    server: &'a Server,
    request: &'a Request,
    dns_mechanisms_used: u32,
    errors: Vec<SpfError>,
    warnings: Vec<Warning>,
    /// The top-level record's `exp=` domain-spec, captured for the renderer
    /// once evaluation settles on a verdict (explanation only matters for
    /// fail/softfail/neutral, but it's cheap to always capture it).
    explanation: Option<DomainSpec>,
}

impl<'a> Eval<'a> {
    fn new(server: &'a Server, request: &'a Request) -> Self {
        Self {
            server,
            request,
            dns_mechanisms_used: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            explanation: None,
        }
    }

    fn context<'b>(&'b self, current_domain: &'b str) -> RequestContext<'b> {
        RequestContext {
            request: self.request,
            server: self.server,
            current_domain,
        }
    }

    fn charge_dns_mechanism(&mut self) -> Result<(), SpfError> {
        self.dns_mechanisms_used += 1;
        if self.dns_mechanisms_used > self.server.max_dns_mech {
            log::warn!(
                "DNS-mechanism budget ({}) exceeded for {}",
                self.server.max_dns_mech,
                self.request.env_from.domain
            );
            return Err(SpfError::new(ErrorKind::BigDns));
        }
        Ok(())
    }

    fn expand_target(&self, ctx: &RequestContext, domain: Option<&DomainSpec>, current_domain: &str) -> SpfResult<String> {
        match domain {
            Some(spec) if !spec.is_empty() => macro_eval::expand(&spec.tokens, ctx),
            _ => Ok(current_domain.to_owned()),
        }
    }

    fn fetch_record(&mut self, domain: &str) -> FetchOutcome {
        log::debug!("fetching SPF record for {domain}");
        let rr = match self.server.resolver.get_spf(domain) {
            Ok(rr) => rr,
            Err(e) => {
                log::warn!("SPF lookup for {domain} failed: {e}");
                self.errors.push(e);
                return FetchOutcome::NotFound;
            }
        };
        if rr.status.is_transient() {
            return FetchOutcome::Temporary;
        }
        if !rr.status.is_success() {
            return FetchOutcome::NotFound;
        }

        let candidates: Vec<&str> = rr
            .txt_strings()
            .filter(|t| {
                let trimmed = t.trim_start();
                trimmed == "v=spf1" || trimmed.starts_with("v=spf1 ")
            })
            .collect();

        match candidates.len() {
            0 => FetchOutcome::NotFound,
            1 => {
                let outcome = compile(candidates[0], self.server.max_dns_mech);
                if let Some(err) = outcome.error {
                    log::warn!("record for {domain} failed to compile: {err}");
                    self.errors.push(err);
                }
                self.warnings.extend(outcome.warnings);
                FetchOutcome::Found(outcome.record)
            }
            _ => FetchOutcome::Multiple,
        }
    }

    fn eval_a(&mut self, target: &str, cidr: Cidr) -> SpfResult<bool> {
        let ftype = match self.request.client_ip {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        };
        let rr = self.server.resolver.lookup(target, ftype, true)?;
        if !rr.status.is_success() {
            return Ok(false);
        }
        Ok(match self.request.client_ip {
            IpAddr::V4(v4) => rr.a_addrs().any(|a| ip4_in_cidr(v4, a, a_mx_prefix_v4(cidr.v4))),
            IpAddr::V6(v6) => rr.aaaa_addrs().any(|a| ip6_in_cidr(v6, a, a_mx_prefix_v6(cidr.v6))),
        })
    }

    fn eval_mx(&mut self, target: &str, cidr: Cidr) -> SpfResult<bool> {
        let mx_answer = self.server.resolver.lookup(target, RecordType::Mx, true)?;
        if !mx_answer.status.is_success() {
            return Ok(false);
        }
        let exchanges: Vec<&str> = mx_answer.mx_exchanges().collect();
        if exchanges.len() as u32 > self.server.max_dns_mx {
            return Err(SpfError::new(ErrorKind::BigDns).with_expression(target.to_owned()));
        }
        let ftype = match self.request.client_ip {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        };
        for exchange in exchanges {
            let rr = self.server.resolver.lookup(exchange, ftype, true)?;
            if !rr.status.is_success() {
                continue;
            }
            let matched = match self.request.client_ip {
                IpAddr::V4(v4) => rr.a_addrs().any(|a| ip4_in_cidr(v4, a, a_mx_prefix_v4(cidr.v4))),
                IpAddr::V6(v6) => rr.aaaa_addrs().any(|a| ip6_in_cidr(v6, a, a_mx_prefix_v6(cidr.v6))),
            };
            if matched {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn eval_ptr(&mut self, target_domain: &str) -> SpfResult<bool> {
        let ptr_query = ptr_name(self.request.client_ip);
        let ptr_answer = self.server.resolver.lookup(&ptr_query, RecordType::Ptr, true)?;
        if !ptr_answer.status.is_success() {
            return Ok(false);
        }
        let ftype = match self.request.client_ip {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        };
        for candidate in ptr_answer.ptr_names().take(self.server.max_dns_ptr.max(1) as usize) {
            let forward = self.server.resolver.lookup(candidate, ftype, true)?;
            if !forward.status.is_success() {
                continue;
            }
            let matches_ip = match self.request.client_ip {
                IpAddr::V4(v4) => forward.a_addrs().any(|a| a == v4),
                IpAddr::V6(v6) => forward.aaaa_addrs().any(|a| a == v6),
            };
            if matches_ip && domain_matches_or_is_subdomain(candidate, target_domain) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn eval_exists(&mut self, target: &str) -> SpfResult<bool> {
        let rr = self.server.resolver.lookup(target, RecordType::A, true)?;
        Ok(rr.status.is_success())
    }

    fn recurse_into(&mut self, target: &str, current_domain: &str, depth: u32, visited: &mut Vec<String>) -> (Verdict, Reason) {
        if depth + 1 > MAX_RECURSION_DEPTH {
            self.errors.push(SpfError::new(ErrorKind::Recursive).with_expression(target.to_owned()));
            return (Verdict::PermError, Reason::Mechanism);
        }
        let normalized = normalize_domain(target);
        if normalized == normalize_domain(current_domain) || visited.iter().any(|v| *v == normalized) {
            self.errors.push(SpfError::new(ErrorKind::Recursive).with_expression(target.to_owned()));
            return (Verdict::PermError, Reason::Mechanism);
        }
        visited.push(normalized);
        let result = self.interpret(target, depth + 1, visited);
        visited.pop();
        result
    }

    /// Walks a record's mechanisms and, failing a match, its `redirect=`
    /// fallback. Assumes local-policy splicing, if any, already happened.
    fn run_record(&mut self, record: &CompiledRecord, current_domain: &str, depth: u32, visited: &mut Vec<String>) -> (Verdict, Reason) {
        for mech in &record.mechanisms {
            match &mech.body {
                MechanismBody::All => {
                    return (qualifier_to_verdict(mech.qualifier), reason_for(mech));
                }
                MechanismBody::Ip4 { addr, prefix } => {
                    if let IpAddr::V4(client) = self.request.client_ip {
                        if ip4_in_cidr(client, *addr, effective_prefix_v4(*prefix)) {
                            return (qualifier_to_verdict(mech.qualifier), reason_for(mech));
                        }
                    }
                }
                MechanismBody::Ip6 { addr, prefix } => {
                    if let IpAddr::V6(client) = self.request.client_ip {
                        if ip6_in_cidr(client, *addr, effective_prefix_v6(*prefix)) {
                            return (qualifier_to_verdict(mech.qualifier), reason_for(mech));
                        }
                    }
                }
                MechanismBody::A { domain, cidr } => {
                    if let Err(e) = self.charge_dns_mechanism() {
                        self.errors.push(e);
                        return (Verdict::PermError, Reason::Mechanism);
                    }
                    let ctx = self.context(current_domain);
                    let target = match self.expand_target(&ctx, domain.as_ref(), current_domain) {
                        Ok(t) => t,
                        Err(e) => {
                            self.errors.push(e);
                            return (Verdict::PermError, Reason::Mechanism);
                        }
                    };
                    match self.eval_a(&target, *cidr) {
                        Ok(true) => return (qualifier_to_verdict(mech.qualifier), reason_for(mech)),
                        Ok(false) => {}
                        Err(e) => {
                            self.errors.push(e);
                            return (Verdict::TempError, Reason::Mechanism);
                        }
                    }
                }
                MechanismBody::Mx { domain, cidr } => {
                    if let Err(e) = self.charge_dns_mechanism() {
                        self.errors.push(e);
                        return (Verdict::PermError, Reason::Mechanism);
                    }
                    let ctx = self.context(current_domain);
                    let target = match self.expand_target(&ctx, domain.as_ref(), current_domain) {
                        Ok(t) => t,
                        Err(e) => {
                            self.errors.push(e);
                            return (Verdict::PermError, Reason::Mechanism);
                        }
                    };
                    match self.eval_mx(&target, *cidr) {
                        Ok(true) => return (qualifier_to_verdict(mech.qualifier), reason_for(mech)),
                        Ok(false) => {}
                        Err(e) if e.kind == ErrorKind::BigDns => {
                            self.errors.push(e);
                            return (Verdict::PermError, Reason::Mechanism);
                        }
                        Err(e) => {
                            self.errors.push(e);
                            return (Verdict::TempError, Reason::Mechanism);
                        }
                    }
                }
                MechanismBody::Ptr { domain } => {
                    if let Err(e) = self.charge_dns_mechanism() {
                        self.errors.push(e);
                        return (Verdict::PermError, Reason::Mechanism);
                    }
                    let ctx = self.context(current_domain);
                    let target = match self.expand_target(&ctx, domain.as_ref(), current_domain) {
                        Ok(t) => t,
                        Err(e) => {
                            self.errors.push(e);
                            return (Verdict::PermError, Reason::Mechanism);
                        }
                    };
                    match self.eval_ptr(&target) {
                        Ok(true) => return (qualifier_to_verdict(mech.qualifier), reason_for(mech)),
                        Ok(false) => {}
                        Err(e) => {
                            self.errors.push(e);
                            return (Verdict::TempError, Reason::Mechanism);
                        }
                    }
                }
                MechanismBody::Exists { domain } => {
                    if let Err(e) = self.charge_dns_mechanism() {
                        self.errors.push(e);
                        return (Verdict::PermError, Reason::Mechanism);
                    }
                    let ctx = self.context(current_domain);
                    let target = match macro_eval::expand(&domain.tokens, &ctx) {
                        Ok(t) => t,
                        Err(e) => {
                            self.errors.push(e);
                            return (Verdict::PermError, Reason::Mechanism);
                        }
                    };
                    match self.eval_exists(&target) {
                        Ok(true) => return (qualifier_to_verdict(mech.qualifier), reason_for(mech)),
                        Ok(false) => {}
                        Err(e) => {
                            self.errors.push(e);
                            return (Verdict::TempError, Reason::Mechanism);
                        }
                    }
                }
                MechanismBody::Include { domain } => {
                    if let Err(e) = self.charge_dns_mechanism() {
                        self.errors.push(e);
                        return (Verdict::PermError, Reason::Mechanism);
                    }
                    let ctx = self.context(current_domain);
                    let target = match macro_eval::expand(&domain.tokens, &ctx) {
                        Ok(t) => t,
                        Err(e) => {
                            self.errors.push(e);
                            return (Verdict::PermError, Reason::Mechanism);
                        }
                    };
                    let (sub_verdict, _) = self.recurse_into(&target, current_domain, depth, visited);
                    match sub_verdict {
                        Verdict::Pass => return (qualifier_to_verdict(mech.qualifier), reason_for(mech)),
                        Verdict::Fail | Verdict::SoftFail | Verdict::Neutral => {}
                        Verdict::None => {
                            self.errors
                                .push(SpfError::new(ErrorKind::IncludeReturnedNone).with_expression(target));
                            return (Verdict::PermError, Reason::Mechanism);
                        }
                        Verdict::TempError => return (Verdict::TempError, Reason::Mechanism),
                        Verdict::PermError => return (Verdict::PermError, Reason::Mechanism),
                    }
                }
                MechanismBody::Redirect { domain } => {
                    // Not produced by the compiler today (only `redirect=`
                    // modifiers are), but decodable from the wire format;
                    // treated as an unconditional terminal redirect.
                    if let Err(e) = self.charge_dns_mechanism() {
                        self.errors.push(e);
                        return (Verdict::PermError, Reason::Mechanism);
                    }
                    let ctx = self.context(current_domain);
                    let target = match macro_eval::expand(&domain.tokens, &ctx) {
                        Ok(t) => t,
                        Err(e) => {
                            self.errors.push(e);
                            return (Verdict::PermError, Reason::Mechanism);
                        }
                    };
                    let (sub_verdict, _) = self.recurse_into(&target, current_domain, depth, visited);
                    return (sub_verdict, Reason::Mechanism);
                }
                MechanismBody::Unknown { name } => {
                    self.errors.push(SpfError::new(ErrorKind::UnknownMech).with_token(name.clone()));
                    return (Verdict::PermError, Reason::Mechanism);
                }
            }
        }

        if let Some(redirect_spec) = record.redirect() {
            if record.terminal_all().is_none() {
                if let Err(e) = self.charge_dns_mechanism() {
                    self.errors.push(e);
                    return (Verdict::PermError, Reason::Mechanism);
                }
                let ctx = self.context(current_domain);
                let target = match macro_eval::expand(&redirect_spec.tokens, &ctx) {
                    Ok(t) => t,
                    Err(e) => {
                        self.errors.push(e);
                        return (Verdict::PermError, Reason::Mechanism);
                    }
                };
                let (sub_verdict, _) = self.recurse_into(&target, current_domain, depth, visited);
                return (sub_verdict, Reason::Mechanism);
            }
        }

        (Verdict::Neutral, Reason::Default)
    }

    fn interpret(&mut self, domain: &str, depth: u32, visited: &mut Vec<String>) -> (Verdict, Reason) {
        let mut record = match self.fetch_record(domain) {
            FetchOutcome::Found(record) => record,
            FetchOutcome::NotFound => {
                return if depth == 0 {
                    (Verdict::None, Reason::Failure)
                } else {
                    self.errors
                        .push(SpfError::new(ErrorKind::IncludeReturnedNone).with_expression(domain.to_owned()));
                    (Verdict::PermError, Reason::Mechanism)
                };
            }
            FetchOutcome::Temporary => {
                self.errors.push(SpfError::new(ErrorKind::DnsError).with_expression(domain.to_owned()));
                return if depth == 0 {
                    (Verdict::TempError, Reason::None)
                } else {
                    (Verdict::TempError, Reason::Mechanism)
                };
            }
            FetchOutcome::Multiple => {
                self.errors
                    .push(SpfError::new(ErrorKind::ResultUnknown).with_expression(domain.to_owned()));
                return (Verdict::PermError, Reason::Mechanism);
            }
        };

        if depth == 0 {
            self.explanation = record.explanation().cloned();
            if self.request.use_local_policy {
                if let Some(policy) = &self.server.local_policy {
                    splice_local_policy(&mut record, policy);
                }
            }
        }

        self.run_record(&record, domain, depth, visited)
    }
}

fn finalize(server: &Server, request: &Request, eval: Eval, verdict: Verdict, reason: Reason) -> Response {
    let mut response = Response::new(verdict, reason);
    response.errors = eval.errors;
    response.warnings = eval.warnings;
    response.dns_mechanisms_used = eval.dns_mechanisms_used;
    crate::render::render(server, request, &mut response, eval.explanation.as_ref());
    response
}

fn finalize_without_dns(server: &Server, request: &Request, verdict: Verdict, reason: Reason) -> Response {
    let mut response = Response::new(verdict, reason);
    crate::render::render(server, request, &mut response, None);
    response
}

/// Evaluates the request's identity domain (MAIL FROM, or HELO when
/// `use_helo` is set) against its SPF policy.
pub fn query_mailfrom(server: &Server, request: &Request) -> Response {
    if request.is_loopback() {
        return finalize_without_dns(server, request, Verdict::Pass, Reason::Localhost);
    }
    let mut eval = Eval::new(server, request);
    let domain = request.identity_domain().to_owned();
    let mut visited = vec![normalize_domain(&domain)];
    let (verdict, reason) = eval.interpret(&domain, 0, &mut visited);
    finalize(server, request, eval, verdict, reason)
}

/// Runs only the synthetic 2MX check: whether the client is authorized as a
/// secondary MX for `request.rcpt_to_domain` via `v=spf1 mx:<rcpt-to> -all`.
/// Returns `none`/reason `none` if no RCPT-TO domain was supplied.
pub fn query_rcptto(server: &Server, request: &Request) -> Response {
    let Some(rcpt_domain) = request.rcpt_to_domain.clone() else {
        return finalize_without_dns(server, request, Verdict::None, Reason::None);
    };
    let mut eval = Eval::new(server, request);
    let synthetic = format!("v=spf1 mx:{rcpt_domain} -all");
    let outcome = compile(&synthetic, server.max_dns_mech);
    eval.warnings.extend(outcome.warnings);
    let mut visited = vec![normalize_domain(&rcpt_domain)];
    let (verdict, _) = eval.run_record(&outcome.record, &rcpt_domain, 0, &mut visited);
    let reason = if verdict == Verdict::Pass { Reason::TwoMx } else { Reason::Mechanism };
    finalize(server, request, eval, verdict, reason)
}

/// Runs the main MAIL FROM check; if it does not pass and a RCPT-TO domain
/// is present, falls back to the 2MX check per the blending rule: a pass
/// from the synthetic check wins with reason `2mx`, otherwise the main
/// verdict stands.
pub fn query_fallback(server: &Server, request: &Request) -> Response {
    let main = query_mailfrom(server, request);
    if main.verdict == Verdict::Pass || request.rcpt_to_domain.is_none() {
        return main;
    }
    let two_mx = query_rcptto(server, request);
    if two_mx.verdict == Verdict::Pass {
        return two_mx;
    }
    main
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::zone::ZoneResolver;
    use std::sync::Arc;

    fn server_with_zone(build: impl FnOnce(&mut ZoneResolver)) -> Server {
        let mut zone = ZoneResolver::new();
        build(&mut zone);
        Server::new(Arc::new(zone), "mail.example.com")
    }

    #[test]
    fn s1_ip4_pass() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 ip4:192.0.2.0/24 -all");
        });
        let request = Request::new("192.0.2.3".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Pass);
        assert_eq!(resp.reason, Reason::Mechanism);
    }

    #[test]
    fn s2_ip4_fail() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 ip4:192.0.2.0/24 -all");
        });
        let request = Request::new("198.51.100.1".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Fail);
    }

    #[test]
    fn s3_a_mechanism_pass() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 a -all");
            z.set_a("d", &["192.0.2.10".parse().unwrap()]);
        });
        let request = Request::new("192.0.2.10".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Pass);
    }

    #[test]
    fn s4_mx_pass() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 mx -all");
            z.set_mx("d", &[(10, "mx.d")]);
            z.set_a("mx.d", &["192.0.2.4".parse().unwrap()]);
        });
        let request = Request::new("192.0.2.4".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Pass);
    }

    #[test]
    fn s5_include_pass() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 include:other.example -all");
            z.set_txt("other.example", "v=spf1 ip4:203.0.113.0/24 -all");
        });
        let request = Request::new("203.0.113.5".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Pass);
        assert_eq!(resp.reason, Reason::Mechanism);
    }

    #[test]
    fn s6_redirect_fail() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 redirect=other.example");
            z.set_txt("other.example", "v=spf1 -all");
        });
        let request = Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Fail);
    }

    #[test]
    fn s7_exists_pass() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 exists:%{ir}.bl.example -all");
            z.set_a("5.3.2.1.bl.example", &["127.0.0.2".parse().unwrap()]);
        });
        let request = Request::new("1.2.3.5".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Pass);
    }

    #[test]
    fn s8_bare_all_neutral() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 ?all");
        });
        let request = Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Neutral);
    }

    #[test]
    fn s9_no_record_is_none() {
        let server = server_with_zone(|_z| {});
        let request = Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::None);
        assert_eq!(resp.reason, Reason::Failure);
    }

    #[test]
    fn s10_try_again_is_temperror() {
        let server = server_with_zone(|z| {
            z.set_try_again("d", RecordType::Txt);
        });
        let request = Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::TempError);
        assert_eq!(resp.reason, Reason::None);
    }

    #[test]
    fn loopback_short_circuits_without_dns() {
        let server = server_with_zone(|_z| {});
        let request = Request::new("127.0.0.1".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Pass);
        assert_eq!(resp.reason, Reason::Localhost);
        assert_eq!(resp.dns_mechanisms_used, 0);
    }

    #[test]
    fn self_include_is_permerror_recursive() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 include:d -all");
        });
        let request = Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::PermError);
    }

    #[test]
    fn diamond_shaped_includes_are_not_false_recursion() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 include:a.example include:b.example -all");
            z.set_txt("a.example", "v=spf1 include:c.example ?all");
            z.set_txt("b.example", "v=spf1 include:c.example ?all");
            z.set_txt("c.example", "v=spf1 ip4:192.0.2.0/24 -all");
        });
        let request = Request::new("192.0.2.9".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Pass);
    }

    #[test]
    fn multiple_spf_txt_records_is_permerror() {
        let mut zone = ZoneResolver::new();
        zone.set(
            "d",
            crate::dns::rr::ResourceRecord::success(
                "d",
                RecordType::Txt,
                std::time::Duration::from_secs(60),
                vec![
                    crate::dns::rr::RData::Txt("v=spf1 -all".to_owned()),
                    crate::dns::rr::RData::Txt("v=spf1 ~all".to_owned()),
                ],
            ),
        );
        let server = Server::new(Arc::new(zone), "mail.example.com");
        let request = Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d");
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::PermError);
    }

    #[test]
    fn local_policy_splices_before_terminal_fail_all_and_reports_its_reason() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 ip4:198.51.100.0/24 -all");
        })
        .with_local_policy("v=spf1 ip4:192.0.2.0/24 -all");
        let request = Request::new("192.0.2.3".parse().unwrap(), "helo", "a@d").with_use_local_policy(true);
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Pass);
        assert_eq!(resp.reason, Reason::LocalPolicy);
    }

    #[test]
    fn local_policy_not_spliced_without_terminal_fail_all() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 ip4:198.51.100.0/24 ?all");
        })
        .with_local_policy("v=spf1 ip4:192.0.2.0/24 -all");
        let request = Request::new("192.0.2.3".parse().unwrap(), "helo", "a@d").with_use_local_policy(true);
        let resp = query_mailfrom(&server, &request);
        assert_eq!(resp.verdict, Verdict::Neutral);
        assert_eq!(resp.reason, Reason::Default);
    }

    #[test]
    fn two_mx_blending_falls_back_to_main_verdict() {
        let server = server_with_zone(|z| {
            z.set_txt("d", "v=spf1 -all");
        });
        let request = Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d").with_rcpt_to("rcpt.example");
        let resp = query_fallback(&server, &request);
        assert_eq!(resp.verdict, Verdict::Fail);
    }
}
