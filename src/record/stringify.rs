//! Renders a [`CompiledRecord`] back to canonical SPF text.
//!
//! Produces canonical prefix punctuation, lowercase keywords, numeric CIDR
//! suffixes, and macro variable letters preserved in their original case
//! (the last handled by `crate::record::token::stringify_tokens`), so that
//! compiling and re-stringifying a record is idempotent.

use crate::record::token::stringify_tokens;
use crate::record::{Cidr, CompiledRecord, DomainSpec, MechanismBody};
use crate::spf::Qualifier;
use std::fmt::Write;

pub fn stringify(record: &CompiledRecord) -> String {
    let mut out = String::from("v=spf1");
    for mech in &record.mechanisms {
        out.push(' ');
        if mech.qualifier != Qualifier::Pass {
            out.push(mech.qualifier.as_prefix_char());
        }
        write_mechanism_body(&mut out, &mech.body);
    }
    for modifier in &record.modifiers {
        out.push(' ');
        out.push_str(&modifier.name);
        out.push('=');
        out.push_str(&stringify_domain(&modifier.domain));
    }
    out
}

fn stringify_domain(spec: &DomainSpec) -> String {
    stringify_tokens(&spec.tokens)
}

fn write_cidr(out: &mut String, cidr: &Cidr) {
    if let Some(v4) = cidr.v4 {
        let n = if v4 == 0 { 32 } else { v4 };
        write!(out, "/{n}").unwrap();
    }
    if let Some(v6) = cidr.v6 {
        let n = if v6 == 0 { 128 } else { v6 };
        write!(out, "//{n}").unwrap();
    }
}

fn write_mechanism_body(out: &mut String, body: &MechanismBody) {
    match body {
        MechanismBody::A { domain, cidr } => {
            out.push('a');
            if let Some(d) = domain {
                out.push(':');
                out.push_str(&stringify_domain(d));
            }
            write_cidr(out, cidr);
        }
        MechanismBody::Mx { domain, cidr } => {
            out.push_str("mx");
            if let Some(d) = domain {
                out.push(':');
                out.push_str(&stringify_domain(d));
            }
            write_cidr(out, cidr);
        }
        MechanismBody::Ptr { domain } => {
            out.push_str("ptr");
            if let Some(d) = domain {
                out.push(':');
                out.push_str(&stringify_domain(d));
            }
        }
        MechanismBody::Ip4 { addr, prefix } => {
            let n = if *prefix == 0 { 32 } else { *prefix };
            write!(out, "ip4:{addr}/{n}").unwrap();
        }
        MechanismBody::Ip6 { addr, prefix } => {
            let n = if *prefix == 0 { 128 } else { *prefix };
            write!(out, "ip6:{addr}/{n}").unwrap();
        }
        MechanismBody::Include { domain } => {
            out.push_str("include:");
            out.push_str(&stringify_domain(domain));
        }
        MechanismBody::Exists { domain } => {
            out.push_str("exists:");
            out.push_str(&stringify_domain(domain));
        }
        MechanismBody::Redirect { domain } => {
            out.push_str("redirect:");
            out.push_str(&stringify_domain(domain));
        }
        MechanismBody::All => out.push_str("all"),
        MechanismBody::Unknown { name } => out.push_str(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::compile::compile;

    fn roundtrip(text: &str) {
        let first = compile(text, 10);
        assert!(first.error.is_none(), "{text}: {:?}", first.error);
        let rendered = stringify(&first.record);
        let second = compile(&rendered, 10);
        assert!(second.error.is_none(), "{rendered}: {:?}", second.error);
        assert_eq!(first.record, second.record, "{text} -> {rendered}");
    }

    #[test]
    fn round_trips_common_records() {
        roundtrip("v=spf1 ip4:192.0.2.0/24 -all");
        roundtrip("v=spf1 a mx -all");
        roundtrip("v=spf1 include:other.example ~all");
        roundtrip("v=spf1 a:mail.example.com/24 -all");
        roundtrip("v=spf1 exists:%{ir}.bl.example -all");
        roundtrip("v=spf1 redirect=_spf.example.com");
        roundtrip("v=spf1 ?all");
    }

    #[test]
    fn host_route_prints_as_32_not_0() {
        let out = compile("v=spf1 ip4:192.0.2.1/32 -all", 10);
        let text = stringify(&out.record);
        assert!(text.contains("ip4:192.0.2.1/32"));
    }
}
