//! Compiled SPF records: the parsed, validated form of a `v=spf1` TXT
//! record, ready for the interpreter.
//!
//! A [`CompiledRecord`] is an append-only, position-independent sequence of
//! [`Mechanism`]s and [`Modifier`]s, mirroring the C reference's flat
//! mechanism buffer (`spf_internal.h`'s `SPF_mech_t` chain) without its raw
//! pointer arithmetic: here it is a plain `Vec`, walked by index rather than
//! by following linked-list offsets through a raw buffer.

pub mod compile;
pub mod stringify;
pub mod token;
pub mod wire;

use crate::spf::Qualifier;
use std::net::{Ipv4Addr, Ipv6Addr};

pub use compile::compile;
pub use token::DataToken;

/// Maximum encoded size, in bytes, of the mechanism area or the modifier
/// area of a record.
pub const MAX_AREA_BYTES: usize = 511;

/// The opcode naming a mechanism's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    A,
    Mx,
    Ptr,
    Include,
    Ip4,
    Ip6,
    Exists,
    All,
    Redirect,
    Unknown,
}

/// An IPv4/IPv6 CIDR prefix pair attached to `a`/`mx` mechanisms, or the
/// fixed host-route length implied by a bare `ip4`/`ip6` mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cidr {
    pub v4: Option<u8>,
    pub v6: Option<u8>,
}

/// A domain-spec: a macro-string lexed once at compile time into data
/// tokens, ready to be re-expanded by `crate::spf::macro_eval::expand` for
/// every evaluation (including every `include`/`redirect` recursion).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainSpec {
    pub tokens: Vec<DataToken>,
}

impl DomainSpec {
    pub fn parse(text: &str) -> crate::error::SpfResult<Self> {
        Ok(Self {
            tokens: token::lex_macro_string(text)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// The body specific to each opcode. IP4/IP6 carry a fixed-size address;
/// every other mechanism carries a sequence of data tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum MechanismBody {
    A { domain: Option<DomainSpec>, cidr: Cidr },
    Mx { domain: Option<DomainSpec>, cidr: Cidr },
    Ptr { domain: Option<DomainSpec> },
    Ip4 { addr: Ipv4Addr, prefix: u8 },
    Ip6 { addr: Ipv6Addr, prefix: u8 },
    Include { domain: DomainSpec },
    Exists { domain: DomainSpec },
    Redirect { domain: DomainSpec },
    All,
    /// A syntactically-unknown mechanism name. Interpreting one always
    /// yields `permerror`.
    Unknown { name: String },
}

impl MechanismBody {
    pub fn opcode(&self) -> Opcode {
        match self {
            MechanismBody::A { .. } => Opcode::A,
            MechanismBody::Mx { .. } => Opcode::Mx,
            MechanismBody::Ptr { .. } => Opcode::Ptr,
            MechanismBody::Ip4 { .. } => Opcode::Ip4,
            MechanismBody::Ip6 { .. } => Opcode::Ip6,
            MechanismBody::Include { .. } => Opcode::Include,
            MechanismBody::Exists { .. } => Opcode::Exists,
            MechanismBody::Redirect { .. } => Opcode::Redirect,
            MechanismBody::All => Opcode::All,
            MechanismBody::Unknown { .. } => Opcode::Unknown,
        }
    }
}

/// A single mechanism record.
#[derive(Debug, Clone, PartialEq)]
pub struct Mechanism {
    pub qualifier: Qualifier,
    pub body: MechanismBody,
    /// Set once a mechanism is spliced in by local-policy placement (see
    /// `spec.md` §4.5); lets the interpreter report reason `local-policy`
    /// instead of `mechanism` when one of these is what matched.
    pub from_local_policy: bool,
}

/// A `name=value` modifier record. `redirect=` and `exp=` are
/// recognised by name and additionally surfaced on [`CompiledRecord`] as
/// `redirect`/`explanation`; every modifier, recognised or not, is still
/// kept here so stringification round-trips faithfully.
#[derive(Debug, Clone, PartialEq)]
pub struct Modifier {
    pub name: String,
    pub domain: DomainSpec,
}

/// The parsed, validated form of an SPF TXT record, ready for the
/// interpreter. Position-independent: mechanisms and
/// modifiers may be iterated, re-ordered (local-policy splicing) or
/// recursed into without invalidating any other part of the structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledRecord {
    pub mechanisms: Vec<Mechanism>,
    pub modifiers: Vec<Modifier>,
}

impl CompiledRecord {
    /// A record that failed to parse is replaced by a single synthetic
    /// `?all` mechanism so the engine returns `permerror` deterministically.
    pub fn synthetic_error_record() -> Self {
        Self {
            mechanisms: vec![Mechanism {
                qualifier: Qualifier::Neutral,
                body: MechanismBody::Unknown {
                    name: "all".to_owned(),
                },
                from_local_policy: false,
            }],
            modifiers: Vec::new(),
        }
    }

    pub fn redirect(&self) -> Option<&DomainSpec> {
        self.modifiers
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case("redirect"))
            .map(|m| &m.domain)
    }

    pub fn explanation(&self) -> Option<&DomainSpec> {
        self.modifiers
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case("exp"))
            .map(|m| &m.domain)
    }

    /// Whether the record ends (ignoring trailing unreachable terms) in an
    /// unconditional `all` mechanism, used both to decide whether `redirect=`
    /// is reachable and where to splice local policy.
    pub fn terminal_all(&self) -> Option<&Mechanism> {
        self.mechanisms
            .iter()
            .find(|m| m.body.opcode() == Opcode::All)
    }
}

/// Counts how many mechanisms in `mechanisms` will cause a DNS lookup when
/// interpreted (`a`, `mx`, `ptr`, `include`, `exists`, `redirect` modifier is
/// counted separately by the interpreter since it is not a mechanism body
/// here). Used by the compiler to enforce the DNS budget as an early
/// rejection at compile time.
pub fn count_dns_mechanisms(record: &CompiledRecord) -> usize {
    record
        .mechanisms
        .iter()
        .filter(|m| {
            matches!(
                m.body,
                MechanismBody::A { .. }
                    | MechanismBody::Mx { .. }
                    | MechanismBody::Ptr { .. }
                    | MechanismBody::Include { .. }
                    | MechanismBody::Exists { .. }
            )
        })
        .count()
        + if record.redirect().is_some() { 1 } else { 0 }
}
