//! Error kinds produced by the compiler, the macro expander and the
//! interpreter.
//!
//! Errors are a flat enum with manual conversions from the handful of std
//! errors the engine actually produces, rather than a `Box<dyn Error>` trait
//! object.

use std::net::AddrParseError;
use std::num::ParseIntError;

/// One of the error kinds the engine can produce. Kept as data, not as
/// distinct Rust types, because the compiler needs to carry one around at
/// runtime (to synthesize the `?all`/`UNKNOWN` record and to report it back
/// on the `Response`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoMemory,
    NotSpf,
    Syntax,
    InvalidChar,
    UnknownMech,
    InvalidOpt,
    InvalidCidr,
    MissingOpt,
    InvalidEscape,
    InvalidVar,
    BigSubdomain,
    InvalidDelim,
    BigString,
    BigMech,
    BigMod,
    BigDns,
    InvalidIp4,
    InvalidIp6,
    InvalidPrefix,
    ResultUnknown,
    UninitVar,
    ModNotFound,
    NotConfig,
    DnsError,
    BadHostIp,
    BadHostTld,
    MechAfterAll,
    IncludeReturnedNone,
    Recursive,
}

impl ErrorKind {
    /// Whether this kind, surfaced during interpretation, should yield
    /// `temperror` rather than `permerror`: a runtime DNS error during
    /// resolution produces `temperror`, everything else `permerror`.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::DnsError)
    }
}

/// An error produced while compiling or interpreting a record.
///
/// Carries the offending expression (the whole token), the specific
/// sub-token, and the failing character offset.
#[derive(Debug, Clone)]
pub struct SpfError {
    pub kind: ErrorKind,
    pub expression: Option<String>,
    pub token: Option<String>,
    pub offset: Option<usize>,
}

impl SpfError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            expression: None,
            token: None,
            offset: None,
        }
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn at(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl std::fmt::Display for SpfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(expr) = &self.expression {
            write!(f, " in '{expr}'")?;
        }
        if let Some(tok) = &self.token {
            write!(f, " at '{tok}'")?;
        }
        if let Some(off) = self.offset {
            write!(f, " (offset {off})")?;
        }
        Ok(())
    }
}

impl std::error::Error for SpfError {}

impl From<ParseIntError> for SpfError {
    fn from(_: ParseIntError) -> Self {
        SpfError::new(ErrorKind::InvalidPrefix)
    }
}

impl From<AddrParseError> for SpfError {
    fn from(_: AddrParseError) -> Self {
        SpfError::new(ErrorKind::InvalidIp4)
    }
}

pub type SpfResult<T> = Result<T, SpfError>;
