//! Shared vocabulary used by both the record compiler (`crate::record`) and
//! the macro expander (`crate::spf::macro_eval`): the mechanism qualifier and
//! the macro-letter enumeration from RFC 7208 §4 and §7.

pub mod macro_eval;

use std::convert::TryFrom;

#[cfg(feature = "serialize")]
use serde_derive::{Deserialize, Serialize};

/// Qualifier decides what a matched mechanism asserts about the request.
/// Named to match the RFC's own vocabulary rather than a generic verdict
/// enum, since the interpreter threads it straight through to the response.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum Qualifier {
    Pass,
    // +
    Fail,
    // -
    SoftFail,
    // ~
    Neutral, // ?
}

impl Default for Qualifier {
    fn default() -> Self {
        Self::Pass
    }
}

impl Qualifier {
    /// Parses the leading `+ - ~ ?` prefix character of a mechanism token.
    /// Returns `None` for any other character (the caller should then treat
    /// the whole token as starting with the default `+` qualifier).
    pub fn from_prefix_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Qualifier::Pass),
            '-' => Some(Qualifier::Fail),
            '~' => Some(Qualifier::SoftFail),
            '?' => Some(Qualifier::Neutral),
            _ => None,
        }
    }

    pub fn as_prefix_char(self) -> char {
        match self {
            Qualifier::Pass => '+',
            Qualifier::Fail => '-',
            Qualifier::SoftFail => '~',
            Qualifier::Neutral => '?',
        }
    }
}

/// One of the macro letters recognised inside `%{...}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum MacroVariable {
    /// `l` - local-part of MAIL FROM
    LocalPart,
    /// `s` - full MAIL FROM, `postmaster@` injected if local-part is empty
    Sender,
    /// `o` - domain part of MAIL FROM
    SenderDomain,
    /// `d` - current domain being evaluated
    Domain,
    /// `i` - SMTP client IP, dotted-quad or reversed-nibble form
    SmtpClientIp,
    /// `c` - SMTP client IP in canonical textual form
    CanonicalClientIp,
    /// `t` - seconds since epoch (modifiers only, never mechanisms)
    Timestamp,
    /// `p` - validated client hostname, or the literal `unknown`
    ValidatedDomainName,
    /// `v` - literal `in-addr` (v4) or `ip6` (v6)
    IpVersionName,
    /// `h` - HELO/EHLO domain
    HeloOrEhloDomain,
    /// `r` - domain name of the host performing the check (receiving domain)
    ReceivingDomain,
}

impl MacroVariable {
    /// The lowercase ASCII letters that name a macro variable, in the order
    /// the RFC lists them: `l s o d i c t p v h r`.
    pub fn get_valid_lowercase_symbols() -> &'static [u8] {
        b"lsodictpvhr"
    }
}

impl TryFrom<u8> for MacroVariable {
    type Error = ();

    fn try_from(letter: u8) -> Result<Self, Self::Error> {
        match letter.to_ascii_lowercase() {
            b'l' => Ok(MacroVariable::LocalPart),
            b's' => Ok(MacroVariable::Sender),
            b'o' => Ok(MacroVariable::SenderDomain),
            b'd' => Ok(MacroVariable::Domain),
            b'i' => Ok(MacroVariable::SmtpClientIp),
            b'c' => Ok(MacroVariable::CanonicalClientIp),
            b't' => Ok(MacroVariable::Timestamp),
            b'p' => Ok(MacroVariable::ValidatedDomainName),
            b'v' => Ok(MacroVariable::IpVersionName),
            b'h' => Ok(MacroVariable::HeloOrEhloDomain),
            b'r' => Ok(MacroVariable::ReceivingDomain),
            _ => Err(()),
        }
    }
}

