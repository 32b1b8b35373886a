//! The record compiler: lexes and parses `v=spf1 ...` TXT content into a
//! [`CompiledRecord`].
//!
//! Walks the whole grammar in one pass: prefix qualifiers, mechanism
//! argument rules per mechanism kind, modifiers, and the DNS-lookup budget
//! check.

use std::convert::TryFrom;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::{ErrorKind, SpfError};
use crate::record::{Cidr, CompiledRecord, DomainSpec, Mechanism, MechanismBody, Modifier};
use crate::spf::{MacroVariable, Qualifier};

/// A non-fatal linting observation.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: ErrorKind,
    pub message: String,
}

/// The result of compiling a record: either a usable [`CompiledRecord`] with
/// zero or more warnings, or the synthetic `?all` record plus the error that
/// caused it.
pub struct CompileOutcome {
    pub record: CompiledRecord,
    pub warnings: Vec<Warning>,
    pub error: Option<SpfError>,
}

/// Compiles the TXT content of an SPF record.
///
/// `max_dns_mech` enforces the "DNS budget during compile" rule; pass
/// `u32::MAX` to disable it at this layer (the interpreter re-checks the
/// budget at runtime regardless, since `include` adds more lookups than are
/// visible by inspecting one record alone).
pub fn compile(text: &str, max_dns_mech: u32) -> CompileOutcome {
    match compile_inner(text, max_dns_mech) {
        Ok((record, warnings)) => CompileOutcome {
            record,
            warnings,
            error: None,
        },
        Err(err) => CompileOutcome {
            record: CompiledRecord::synthetic_error_record(),
            warnings: Vec::new(),
            error: Some(err),
        },
    }
}

fn compile_inner(
    text: &str,
    max_dns_mech: u32,
) -> Result<(CompiledRecord, Vec<Warning>), SpfError> {
    if !text.is_ascii() {
        return Err(SpfError::new(ErrorKind::InvalidChar).with_expression(text.to_owned()));
    }

    let rest = match text.strip_prefix("v=spf1") {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest,
        _ => return Err(SpfError::new(ErrorKind::NotSpf).with_expression(text.to_owned())),
    };

    let mut record = CompiledRecord::default();
    let mut warnings = Vec::new();
    let mut saw_all = false;
    let mut saw_redirect = false;
    let mut saw_explanation = false;

    for term in rest.split(' ').filter(|t| !t.is_empty()) {
        if saw_all || saw_redirect {
            warnings.push(Warning {
                kind: ErrorKind::MechAfterAll,
                message: format!("mechanism '{term}' appears after a terminal mechanism"),
            });
        }

        if let Some(modifier_name) = modifier_name(term) {
            let (_, value) = term.split_once('=').expect("modifier_name checked '='");
            match modifier_name.to_ascii_lowercase().as_str() {
                "default" => {
                    // `default=allow|softfail|deny` legacy alias -> `all`
                    // with the matching prefix, carried over from the
                    // original v1 draft syntax.
                    let qualifier = match value {
                        "allow" => Qualifier::Pass,
                        "softfail" => Qualifier::SoftFail,
                        "deny" => Qualifier::Fail,
                        _ => {
                            return Err(SpfError::new(ErrorKind::InvalidOpt)
                                .with_expression(term.to_owned())
                                .with_token(value))
                        }
                    };
                    saw_all = true;
                    record.mechanisms.push(Mechanism {
                        qualifier,
                        body: MechanismBody::All,
                        from_local_policy: false,
                    });
                }
                "redirect" => {
                    if saw_redirect {
                        return Err(SpfError::new(ErrorKind::Syntax)
                            .with_expression(term.to_owned())
                            .with_token("redirect"));
                    }
                    saw_redirect = true;
                    record.modifiers.push(Modifier {
                        name: "redirect".to_owned(),
                        domain: DomainSpec::parse(value)?,
                    });
                }
                "exp" => {
                    if saw_explanation {
                        return Err(SpfError::new(ErrorKind::Syntax)
                            .with_expression(term.to_owned())
                            .with_token("exp"));
                    }
                    saw_explanation = true;
                    record.modifiers.push(Modifier {
                        name: "exp".to_owned(),
                        domain: DomainSpec::parse(value)?,
                    });
                }
                _ => {
                    // Unknown modifiers compile but evaluate to no effect.
                    let domain = DomainSpec::parse(value).unwrap_or_default();
                    record.modifiers.push(Modifier {
                        name: modifier_name.to_owned(),
                        domain,
                    });
                }
            }
            continue;
        }

        let mechanism = parse_mechanism(term)?;
        if mechanism.body.opcode() == crate::record::Opcode::All {
            saw_all = true;
        }
        if let Some(spec) = mechanism_domain_spec(&mechanism.body) {
            if let Some(warning) = lint_domain_spec(spec) {
                warnings.push(warning);
            }
        }
        record.mechanisms.push(mechanism);
    }

    if saw_all && saw_redirect {
        warnings.push(Warning {
            kind: ErrorKind::MechAfterAll,
            message: "redirect= is ignored because the record contains 'all'".to_owned(),
        });
    }

    let dns_mechs = crate::record::count_dns_mechanisms(&record);
    if dns_mechs as u32 > max_dns_mech {
        return Err(SpfError::new(ErrorKind::BigDns).with_expression(text.to_owned()));
    }

    Ok((record, warnings))
}

/// A term is a modifier iff it matches `name=value` where `name` matches
/// `[a-zA-Z][a-zA-Z0-9_-]*` and carries no `+-~?` prefix.
fn modifier_name(term: &str) -> Option<&str> {
    let (name, _) = term.split_once('=')?;
    let mut chars = name.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return None;
    }
    Some(name)
}

fn parse_mechanism(term: &str) -> Result<Mechanism, SpfError> {
    let mut chars = term.chars();
    let (qualifier, body_str) = match chars.next() {
        Some(c) if Qualifier::from_prefix_char(c).is_some() => {
            (Qualifier::from_prefix_char(c).unwrap(), chars.as_str())
        }
        _ => (Qualifier::Pass, term),
    };

    let (name, arg) = match body_str.split_once(':') {
        Some((n, a)) => (n, Some(a)),
        None => match body_str.split_once('/') {
            Some((n, a)) => (n, Some(a)),
            None => (body_str, None),
        },
    };
    // re-split the raw arg text including the separator character, since the
    // separator (':' vs '/') carries meaning for a/mx (macro-arg vs cidr-only).
    let raw_arg = body_str.get(name.len()..);

    let body = match name.to_ascii_lowercase().as_str() {
        "all" => {
            if arg.is_some() {
                return Err(SpfError::new(ErrorKind::InvalidOpt)
                    .with_expression(term.to_owned())
                    .with_token(name));
            }
            MechanismBody::All
        }
        "ip4" => {
            let arg = raw_arg
                .and_then(|s| s.strip_prefix(':'))
                .ok_or_else(|| missing_opt(term, name))?;
            let (addr, prefix) = parse_ip4_arg(arg, term)?;
            MechanismBody::Ip4 { addr, prefix }
        }
        "ip6" => {
            let arg = raw_arg
                .and_then(|s| s.strip_prefix(':'))
                .ok_or_else(|| missing_opt(term, name))?;
            let (addr, prefix) = parse_ip6_arg(arg, term)?;
            MechanismBody::Ip6 { addr, prefix }
        }
        "a" => {
            let (domain, cidr) = parse_domain_and_cidr(raw_arg, term)?;
            MechanismBody::A { domain, cidr }
        }
        "mx" => {
            let (domain, cidr) = parse_domain_and_cidr(raw_arg, term)?;
            MechanismBody::Mx { domain, cidr }
        }
        "ptr" => {
            let domain = parse_optional_domain_only(raw_arg, term)?;
            MechanismBody::Ptr { domain }
        }
        "include" => {
            let arg = raw_arg
                .and_then(|s| s.strip_prefix(':'))
                .ok_or_else(|| missing_opt(term, name))?;
            MechanismBody::Include {
                domain: parse_mech_domain_spec(arg, term)?,
            }
        }
        "exists" => {
            let arg = raw_arg
                .and_then(|s| s.strip_prefix(':'))
                .ok_or_else(|| missing_opt(term, name))?;
            MechanismBody::Exists {
                domain: parse_mech_domain_spec(arg, term)?,
            }
        }
        "redirect" => {
            // legacy bare `redirect` mechanism name is not RFC syntax; only
            // `redirect=` modifiers are accepted (handled in compile_inner).
            return Err(SpfError::new(ErrorKind::UnknownMech)
                .with_expression(term.to_owned())
                .with_token(name));
        }
        _ => {
            return Err(SpfError::new(ErrorKind::UnknownMech)
                .with_expression(term.to_owned())
                .with_token(name))
        }
    };

    Ok(Mechanism {
        qualifier,
        body,
        from_local_policy: false,
    })
}

fn missing_opt(term: &str, name: &str) -> SpfError {
    SpfError::new(ErrorKind::MissingOpt)
        .with_expression(term.to_owned())
        .with_token(name)
}

/// Parses the optional `[:domain-spec][/v4cidr[//v6cidr]]` suffix shared by
/// `a` and `mx`.
fn parse_domain_and_cidr(
    raw_arg: Option<&str>,
    term: &str,
) -> Result<(Option<DomainSpec>, Cidr), SpfError> {
    let raw_arg = match raw_arg {
        None => return Ok((None, Cidr::default())),
        Some(s) if s.is_empty() => return Ok((None, Cidr::default())),
        Some(s) => s,
    };

    let (domain_part, cidr_part) = if let Some(rest) = raw_arg.strip_prefix(':') {
        match rest.find('/') {
            Some(idx) => (Some(&rest[..idx]), Some(&rest[idx..])),
            None => (Some(rest), None),
        }
    } else if raw_arg.starts_with('/') {
        (None, Some(raw_arg))
    } else {
        return Err(missing_opt(term, raw_arg));
    };

    let domain = match domain_part {
        Some(d) if !d.is_empty() => Some(parse_mech_domain_spec(d, term)?),
        _ => None,
    };
    let cidr = match cidr_part {
        Some(c) => parse_cidr_suffix(c, term)?,
        None => Cidr::default(),
    };
    Ok((domain, cidr))
}

fn parse_optional_domain_only(
    raw_arg: Option<&str>,
    term: &str,
) -> Result<Option<DomainSpec>, SpfError> {
    match raw_arg.and_then(|s| s.strip_prefix(':')) {
        Some(d) if !d.is_empty() => Ok(Some(parse_mech_domain_spec(d, term)?)),
        Some(_) => Err(missing_opt(term, "ptr")),
        None => Ok(None),
    }
}

/// `/v4cidr[//v6cidr]`. 32/128 collapse to `0`, meaning "host route".
fn parse_cidr_suffix(s: &str, term: &str) -> Result<Cidr, SpfError> {
    let mut parts = s.splitn(2, "//");
    let v4_part = parts
        .next()
        .unwrap()
        .strip_prefix('/')
        .ok_or_else(|| missing_opt(term, s))?;
    let v4 = if v4_part.is_empty() {
        None
    } else {
        Some(parse_prefix_len(v4_part, 32, term)?)
    };
    let v6 = match parts.next() {
        Some(v6_part) if !v6_part.is_empty() => Some(parse_prefix_len(v6_part, 128, term)?),
        _ => None,
    };
    Ok(Cidr { v4, v6 })
}

fn parse_prefix_len(s: &str, max: u8, term: &str) -> Result<u8, SpfError> {
    let n: u32 = s
        .parse()
        .map_err(|_| SpfError::new(ErrorKind::InvalidPrefix).with_expression(term.to_owned()))?;
    if n == 0 || n > max as u32 {
        return Err(SpfError::new(ErrorKind::InvalidPrefix).with_expression(term.to_owned()));
    }
    // 32/128 (max) is stored as 0, meaning a host route.
    Ok(if n == max as u32 { 0 } else { n as u8 })
}

fn parse_ip4_arg(arg: &str, term: &str) -> Result<(Ipv4Addr, u8), SpfError> {
    let (addr_str, cidr_str) = match arg.split_once('/') {
        Some((a, c)) => (a, Some(c)),
        None => (arg, None),
    };
    let addr = Ipv4Addr::from_str(addr_str)
        .map_err(|_| SpfError::new(ErrorKind::InvalidIp4).with_expression(term.to_owned()))?;
    let prefix = match cidr_str {
        Some(c) => parse_prefix_len(c, 32, term)?,
        None => 0,
    };
    Ok((addr, prefix))
}

fn parse_ip6_arg(arg: &str, term: &str) -> Result<(Ipv6Addr, u8), SpfError> {
    let (addr_str, cidr_str) = match arg.split_once('/') {
        Some((a, c)) => (a, Some(c)),
        None => (arg, None),
    };
    let addr = Ipv6Addr::from_str(addr_str)
        .map_err(|_| SpfError::new(ErrorKind::InvalidIp6).with_expression(term.to_owned()))?;
    let prefix = match cidr_str {
        Some(c) => parse_prefix_len(c, 128, term)?,
        None => 0,
    };
    Ok((addr, prefix))
}

/// Parses a macro-string domain-spec that belongs to a *mechanism* (as
/// opposed to a modifier value): the `t` (timestamp) macro is only legal
/// inside modifiers, so it is rejected here.
fn parse_mech_domain_spec(text: &str, term: &str) -> Result<DomainSpec, SpfError> {
    let spec = DomainSpec::parse(text)?;
    if spec
        .tokens
        .iter()
        .any(|t| matches!(t, crate::record::DataToken::Var { letter, .. } if *letter == MacroVariable::Timestamp))
    {
        return Err(SpfError::new(ErrorKind::InvalidVar)
            .with_expression(term.to_owned())
            .with_token("t"));
    }
    Ok(spec)
}

/// Extracts the domain-spec an `a`/`mx`/`ptr`/`include`/`exists` mechanism
/// carries, if any, so its literal portion can be linted. `ip4`/`ip6`/`all`
/// carry no domain-spec; `redirect` is a modifier, linted separately.
fn mechanism_domain_spec(body: &MechanismBody) -> Option<&DomainSpec> {
    match body {
        MechanismBody::A { domain, .. } | MechanismBody::Mx { domain, .. } | MechanismBody::Ptr { domain } => {
            domain.as_ref()
        }
        MechanismBody::Include { domain } | MechanismBody::Exists { domain } => Some(domain),
        MechanismBody::Ip4 { .. } | MechanismBody::Ip6 { .. } | MechanismBody::All | MechanismBody::Redirect { .. } | MechanismBody::Unknown { .. } => None,
    }
}

/// Heuristic "looks numeric"/"no dotted TLD" lints, run against the
/// literal (non-macro) portion of a domain-spec only - a macro-heavy domain
/// cannot be judged at compile time.
pub fn lint_domain_spec(spec: &DomainSpec) -> Option<Warning> {
    let literal: String = spec
        .tokens
        .iter()
        .filter_map(|t| match t {
            crate::record::DataToken::Str(s) => Some(s.as_str()),
            _ => None,
        })
        .collect();
    if literal.is_empty() {
        return None;
    }
    if literal.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Some(Warning {
            kind: ErrorKind::BadHostIp,
            message: format!("'{literal}' looks like a bare IP address, not a hostname"),
        });
    }
    if !literal.contains('.') && !spec.tokens.iter().any(|t| matches!(t, crate::record::DataToken::Var { .. })) {
        return Some(Warning {
            kind: ErrorKind::BadHostTld,
            message: format!("'{literal}' has no dotted TLD"),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MechanismBody, Opcode};

    #[test]
    fn rejects_non_spf_record() {
        let out = compile("v=spf2.0 whatever", 10);
        assert!(out.error.is_some());
        assert_eq!(out.record, CompiledRecord::synthetic_error_record());
    }

    #[test]
    fn parses_ip4_and_all() {
        let out = compile("v=spf1 ip4:192.0.2.0/24 -all", 10);
        assert!(out.error.is_none(), "{:?}", out.error);
        assert_eq!(out.record.mechanisms.len(), 2);
        match &out.record.mechanisms[0].body {
            MechanismBody::Ip4 { addr, prefix } => {
                assert_eq!(*addr, Ipv4Addr::new(192, 0, 2, 0));
                assert_eq!(*prefix, 24);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(out.record.mechanisms[1].qualifier, Qualifier::Fail);
        assert_eq!(out.record.mechanisms[1].body.opcode(), Opcode::All);
    }

    #[test]
    fn host_route_collapses_32_to_0() {
        let out = compile("v=spf1 ip4:192.0.2.1/32 -all", 10);
        match &out.record.mechanisms[0].body {
            MechanismBody::Ip4 { prefix, .. } => assert_eq!(*prefix, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_mechanism_is_error() {
        let out = compile("v=spf1 frobnicate -all", 10);
        assert_eq!(out.error.as_ref().unwrap().kind, ErrorKind::UnknownMech);
        assert_eq!(out.record, CompiledRecord::synthetic_error_record());
    }

    #[test]
    fn unknown_modifier_compiles_with_no_effect() {
        let out = compile("v=spf1 v=whatever -all", 10);
        assert!(out.error.is_none());
        assert_eq!(out.record.mechanisms.len(), 1);
    }

    #[test]
    fn legacy_default_alias_maps_to_all() {
        let out = compile("v=spf1 default=deny", 10);
        assert!(out.error.is_none(), "{:?}", out.error);
        assert_eq!(out.record.mechanisms[0].qualifier, Qualifier::Fail);
        assert_eq!(out.record.mechanisms[0].body.opcode(), Opcode::All);
    }

    #[test]
    fn redirect_and_exp_modifiers() {
        let out = compile("v=spf1 redirect=_spf.example.com exp=explain.example.com", 10);
        assert!(out.error.is_none(), "{:?}", out.error);
        assert!(out.record.redirect().is_some());
        assert!(out.record.explanation().is_some());
    }

    #[test]
    fn duplicate_exp_is_error() {
        let out = compile("v=spf1 exp=a.example exp=b.example -all", 10);
        assert!(out.error.is_some());
    }

    #[test]
    fn timestamp_macro_in_mechanism_is_rejected() {
        let out = compile("v=spf1 exists:%{t}.example.com -all", 10);
        assert!(out.error.is_some());
    }

    #[test]
    fn budget_exceeded_is_big_dns() {
        let text = "v=spf1 a a a a a a a a a a a -all";
        let out = compile(text, 5);
        assert_eq!(out.error.as_ref().unwrap().kind, ErrorKind::BigDns);
    }
}
