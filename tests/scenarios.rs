//! Black-box integration tests driving the public API only, covering the
//! scenario table and universal properties from the specification this
//! engine implements: budget respect, the loopback short-circuit, and
//! deterministic error-mechanism synthesis.

use std::sync::Arc;

use spf::dns::rr::RecordType;
use spf::dns::zone::ZoneResolver;
use spf::{query_mailfrom, Reason, Request, Server, Verdict};

fn server_with_zone(build: impl FnOnce(&mut ZoneResolver)) -> Server {
    let mut zone = ZoneResolver::new();
    build(&mut zone);
    Server::new(Arc::new(zone), "mail.example.com")
}

#[test]
fn scenario_ip4_pass_and_fail() {
    let server = server_with_zone(|z| {
        z.set_txt("d", "v=spf1 ip4:192.0.2.0/24 -all");
    });

    let pass = query_mailfrom(&server, &Request::new("192.0.2.3".parse().unwrap(), "helo", "a@d"));
    assert_eq!(pass.verdict, Verdict::Pass);
    assert_eq!(pass.reason, Reason::Mechanism);

    let fail = query_mailfrom(&server, &Request::new("198.51.100.1".parse().unwrap(), "helo", "a@d"));
    assert_eq!(fail.verdict, Verdict::Fail);
}

#[test]
fn scenario_include_chain_passes() {
    let server = server_with_zone(|z| {
        z.set_txt("d", "v=spf1 include:other.example -all");
        z.set_txt("other.example", "v=spf1 ip4:203.0.113.0/24 -all");
    });
    let resp = query_mailfrom(&server, &Request::new("203.0.113.5".parse().unwrap(), "helo", "a@d"));
    assert_eq!(resp.verdict, Verdict::Pass);
}

#[test]
fn scenario_redirect_inherits_sub_verdict() {
    let server = server_with_zone(|z| {
        z.set_txt("d", "v=spf1 redirect=other.example");
        z.set_txt("other.example", "v=spf1 -all");
    });
    let resp = query_mailfrom(&server, &Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d"));
    assert_eq!(resp.verdict, Verdict::Fail);
}

#[test]
fn scenario_missing_record_is_none_with_failure_reason() {
    let server = server_with_zone(|_| {});
    let resp = query_mailfrom(&server, &Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d"));
    assert_eq!(resp.verdict, Verdict::None);
    assert_eq!(resp.reason, Reason::Failure);
}

#[test]
fn scenario_try_again_surfaces_as_temperror() {
    let server = server_with_zone(|z| {
        z.set_try_again("d", RecordType::Txt);
    });
    let resp = query_mailfrom(&server, &Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d"));
    assert_eq!(resp.verdict, Verdict::TempError);
}

#[test]
fn property_loopback_short_circuits_without_dns_lookups() {
    let server = server_with_zone(|_| {});
    for ip in ["127.0.0.1", "127.55.0.9", "::1"] {
        let resp = query_mailfrom(&server, &Request::new(ip.parse().unwrap(), "helo", "a@d"));
        assert_eq!(resp.verdict, Verdict::Pass);
        assert_eq!(resp.reason, Reason::Localhost);
        assert_eq!(resp.dns_mechanisms_used, 0);
    }
}

#[test]
fn property_dns_budget_is_never_exceeded() {
    let server = server_with_zone(|z| {
        z.set_txt(
            "d",
            "v=spf1 a a a a a a a a a a a a a a a -all",
        );
        z.set_a("d", &["192.0.2.1".parse().unwrap()]);
    });
    let resp = query_mailfrom(&server, &Request::new("203.0.113.1".parse().unwrap(), "helo", "a@d"));
    assert_eq!(resp.verdict, Verdict::PermError);
    assert!(resp.dns_mechanisms_used <= 10);
}

#[test]
fn property_compile_error_yields_permerror() {
    let server = server_with_zone(|z| {
        z.set_txt("d", "v=spf1 not-a-real-mechanism -all");
    });
    let resp = query_mailfrom(&server, &Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d"));
    assert_eq!(resp.verdict, Verdict::PermError);
    assert!(!resp.errors.is_empty());
}

#[test]
fn property_sanitize_strips_control_bytes_from_rendered_strings() {
    let server = server_with_zone(|z| {
        z.set_txt("d", "v=spf1 ip4:192.0.2.0/24 -all");
    });
    let resp = query_mailfrom(&server, &Request::new("198.51.100.1".parse().unwrap(), "helo\x01evil", "a@d"));
    let header = resp.received_spf.unwrap();
    assert!(header.chars().all(|c| (' '..='~').contains(&c)));
}
