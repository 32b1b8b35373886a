//! Fuzz entry points, kept callable as plain functions (as the teacher
//! does) rather than behind a `cargo-fuzz` target, so they stay part of the
//! ordinary build. Each takes raw bytes and never panics on malformed
//! input: the compiler and interpreter are expected to turn anything
//! syntactically hostile into a `permerror`/`SpfError`, never a crash.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::dns::zone::ZoneResolver;
use crate::record::compile::compile;
use crate::spf::macro_eval::evaluate_macro;
use crate::spf::MacroVariable;

lazy_static! {
    static ref DEFAULT_OPTIONS_MAP: HashMap<MacroVariable, &'static str> = {
        let mut m = HashMap::new();
        m.insert(MacroVariable::Sender, "sender");
        m.insert(MacroVariable::ReceivingDomain, "a.b.c.d");
        m
    };
}

/// Exercises the macro lexer/expander directly with arbitrary text.
pub fn fuzz_evaluate_macro(data: &[u8]) {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = evaluate_macro(&*DEFAULT_OPTIONS_MAP, text);
    }
}

/// Exercises the record compiler with arbitrary TXT content. Never panics;
/// on any syntax error the compiler itself already reduces to the synthetic
/// `?all` record rather than propagating.
pub fn fuzz_compile(data: &[u8]) {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = compile(text, 10);
    }
}

/// Exercises the interpreter end-to-end: treats the fuzzed bytes as the
/// target domain's TXT record and runs a full `query_mailfrom` against it
/// with a fixed client/envelope, using the synthetic zone resolver so no
/// real DNS I/O happens.
pub fn fuzz_interpret(data: &[u8]) {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let mut zone = ZoneResolver::new();
    zone.set_txt("d", text);
    let server = crate::server::Server::new(Arc::new(zone), "mail.example.com");
    let request = crate::request::Request::new(
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
        "helo.example",
        "a@d",
    );
    let _ = crate::interpreter::query_mailfrom(&server, &request);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzz_entry_points_never_panic_on_arbitrary_bytes() {
        let samples: &[&[u8]] = &[
            b"",
            b"v=spf1",
            b"v=spf1 -all",
            b"v=spf1 %{",
            b"\xff\xfe\x00",
            b"v=spf1 include:include:include -all",
        ];
        for sample in samples {
            fuzz_evaluate_macro(sample);
            fuzz_compile(sample);
            fuzz_interpret(sample);
        }
    }
}
