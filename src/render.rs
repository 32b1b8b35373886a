//! Turns a settled [`Response`] into the three strings an SMTP receiver
//! actually wants: the explanation text, the one-line header comment, and
//! the `Received-SPF:` header.

use crate::record::DomainSpec;
use crate::request::Request;
use crate::response::{Reason, Response, Verdict};
use crate::server::Server;
use crate::spf::macro_eval::{self, EvaluationContext};

use std::borrow::Cow;
use std::net::IpAddr;

use crate::error::SpfError;
use crate::spf::MacroVariable;

/// Replaces every byte outside the printable ASCII range (0x20-0x7E) with
/// `?`, matching the sanitizer's job of keeping header text safe to log and
/// to prepend to a message without breaking MIME.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}

fn maybe_sanitize(server: &Server, s: String) -> String {
    if server.sanitize {
        sanitize(&s)
    } else {
        s
    }
}

struct ExplanationContext<'a> {
    request: &'a Request,
    server: &'a Server,
}

impl<'a> EvaluationContext for ExplanationContext<'a> {
    fn provide_data(&self, v: MacroVariable) -> Result<Cow<str>, SpfError> {
        let value = match v {
            MacroVariable::LocalPart => Cow::Borrowed(self.request.env_from.local_part.as_str()),
            MacroVariable::Sender => Cow::Owned(self.request.env_from.full()),
            MacroVariable::SenderDomain => Cow::Borrowed(self.request.env_from.domain.as_str()),
            MacroVariable::Domain => Cow::Borrowed(self.request.identity_domain()),
            MacroVariable::SmtpClientIp | MacroVariable::CanonicalClientIp => {
                Cow::Owned(self.request.client_ip.to_string())
            }
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

/// Looks up and expands the explanation text. Best-effort: any failure at
/// any step (no `exp=`, lookup failure, expansion failure) falls back to the
/// server's configured default explanation, expanded the same way.
fn resolve_explanation(server: &Server, request: &Request, explanation_domain: Option<&DomainSpec>) -> String {
    let ctx = ExplanationContext { request, server };

    let looked_up = explanation_domain.and_then(|spec| {
        let domain = macro_eval::expand(&spec.tokens, &ctx).ok()?;
        let rr = server.resolver.get_exp(&domain).ok()?;
        if !rr.status.is_success() {
            return None;
        }
        let text: String = rr.txt_strings().collect::<Vec<_>>().join("");
        macro_eval::evaluate_macro(&ctx, &text).ok()
    });

    looked_up.unwrap_or_else(|| macro_eval::evaluate_macro(&ctx, &server.default_explanation).unwrap_or_default())
}

fn verdict_verb(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Pass => "designates",
        Verdict::Fail => "does not designate",
        Verdict::SoftFail => "does not strongly designate",
        Verdict::Neutral => "neither designates nor forbids",
        Verdict::None => "has no policy for",
        Verdict::TempError => "could not be checked for",
        Verdict::PermError => "has a malformed policy for",
    }
}

fn header_comment(server: &Server, request: &Request, verdict: Verdict, reason: Reason) -> String {
    let identity = request.identity_domain();
    let comment = match reason {
        Reason::Localhost => format!(
            "{}: client is loopback, skipping check",
            server.receiving_domain
        ),
        Reason::LocalPolicy => format!(
            "{}: {} {} {} as permitted sender (local policy)",
            server.receiving_domain,
            identity,
            verdict_verb(verdict),
            request.client_ip
        ),
        Reason::TwoMx => format!(
            "{}: client is a permitted secondary MX for recipient domain",
            server.receiving_domain
        ),
        _ => format!(
            "{}: {} {} {} as permitted sender",
            server.receiving_domain,
            identity,
            verdict_verb(verdict),
            request.client_ip
        ),
    };
    maybe_sanitize(server, comment)
}

fn received_spf_header(server: &Server, request: &Request, verdict: Verdict, comment: &str) -> String {
    let raw = format!(
        "{} ({}) client-ip={}; envelope-from={}; helo={};",
        verdict.as_str(),
        comment,
        request.client_ip,
        request.env_from.full(),
        request.helo_domain,
    );
    maybe_sanitize(server, format!("Received-SPF: {raw}"))
}

/// Fills in `response.received_spf`, `response.header_comment` and
/// `response.smtp_comment` from a settled verdict/reason. `explanation_domain`
/// is the top-level record's `exp=` modifier, if any; irrelevant unless the
/// verdict warrants an explanation (fail/softfail/neutral).
pub fn render(server: &Server, request: &Request, response: &mut Response, explanation_domain: Option<&DomainSpec>) {
    let comment = header_comment(server, request, response.verdict, response.reason);

    let smtp_comment = match response.verdict {
        Verdict::Fail | Verdict::SoftFail | Verdict::Neutral => {
            let explanation = resolve_explanation(server, request, explanation_domain);
            maybe_sanitize(server, format!("{comment}: {explanation}"))
        }
        _ => comment.clone(),
    };

    response.received_spf = Some(received_spf_header(server, request, response.verdict, &comment));
    response.header_comment = Some(comment);
    response.smtp_comment = Some(smtp_comment);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::zone::ZoneResolver;
    use std::sync::Arc;

    fn server() -> Server {
        Server::new(Arc::new(ZoneResolver::new()), "mail.example.com")
    }

    #[test]
    fn sanitizer_replaces_non_printable_bytes() {
        assert_eq!(sanitize("abc\x01def"), "abc?def");
        assert_eq!(sanitize("plain text"), "plain text");
    }

    #[test]
    fn default_explanation_is_used_when_no_exp_modifier() {
        let srv = server();
        let req = Request::new("192.0.2.1".parse().unwrap(), "helo", "a@d");
        let explanation = resolve_explanation(&srv, &req, None);
        assert!(explanation.contains("openspf.org") || !explanation.is_empty());
    }

    #[test]
    fn render_fills_all_three_strings() {
        let srv = server();
        let req = Request::new("192.0.2.1".parse().unwrap(), "helo.example", "a@d");
        let mut resp = Response::new(Verdict::Fail, Reason::Mechanism);
        render(&srv, &req, &mut resp, None);
        assert!(resp.received_spf.unwrap().starts_with("Received-SPF: fail"));
        assert!(resp.header_comment.is_some());
        assert!(resp.smtp_comment.is_some());
    }
}
