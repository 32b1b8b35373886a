//! Module responsible for evaluating SPF macro-strings against a request.
//!
//! Lexing happens once, at compile time (`crate::record::token::lex_macro_string`),
//! and this module only does the per-evaluation half: walking the resulting
//! `DataToken`s and substituting each `Var` from an `EvaluationContext`. This
//! is what lets an `include`d record's domain-spec be re-expanded cheaply
//! every time it recurses with a different current domain.

use std::borrow::Cow;
use std::collections::HashMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};

use crate::error::{ErrorKind, SpfError};
use crate::record::token::DataToken;
use crate::spf::MacroVariable;

/// The RFC 3986 unreserved set this macro expander's `url-encode` flag
/// preserves verbatim (`spec.md` §4.3): everything else is percent-encoded.
/// `url::form_urlencoded` (the teacher's choice) turns spaces into `+` and
/// uses the www-form-urlencoded safe set, neither of which matches; this
/// crate's `percent_encoding::NON_ALPHANUMERIC` minus the extra marks below
/// does.
const MACRO_UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'!')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// EvaluationContext provides the concrete value of a macro variable for one
/// evaluation.
pub trait EvaluationContext {
    fn provide_data(&self, v: MacroVariable) -> Result<Cow<str>, SpfError>;
}

impl<S> EvaluationContext for HashMap<MacroVariable, S>
where
    S: AsRef<str>,
{
    fn provide_data(&self, var: MacroVariable) -> Result<Cow<str>, SpfError> {
        self.get(&var)
            .map(|val| Cow::Borrowed(val.as_ref()))
            .ok_or_else(|| SpfError::new(ErrorKind::UninitVar))
    }
}

impl<S> EvaluationContext for &HashMap<MacroVariable, S>
where
    S: AsRef<str>,
{
    fn provide_data(&self, var: MacroVariable) -> Result<Cow<str>, SpfError> {
        (*self).provide_data(var)
    }
}

/// Applies the split/reverse/truncate/join/url-encode pipeline to one
/// already-resolved field value.
fn format_value(
    value: &str,
    reverse: bool,
    truncate: u8,
    delims: &[char],
    url_encode: bool,
    out: &mut String,
) {
    let is_delim = |c: char| -> bool {
        if delims.is_empty() {
            c == '.'
        } else {
            delims.contains(&c)
        }
    };

    let mut parts: Vec<&str> = value.split(is_delim).collect();
    if reverse {
        parts.reverse();
    }
    if truncate > 0 && (truncate as usize) < parts.len() {
        let skip = parts.len() - truncate as usize;
        parts = parts[skip..].to_vec();
    }
    let joined = parts.join(".");

    if url_encode {
        for chunk in percent_encoding::percent_encode(joined.as_bytes(), MACRO_UNRESERVED) {
            out.push_str(chunk);
        }
    } else {
        out.push_str(&joined);
    }
}

/// Expands a pre-lexed macro-string against an evaluation context.
///
/// # Note
/// Does not validate that any resulting domain label is well-formed; callers
/// that embed the result in a DNS name are responsible for that; the
/// compiler's linting warnings are a separate, non-fatal, compile-time check.
pub fn expand<E>(tokens: &[DataToken], ctx: &E) -> Result<String, SpfError>
where
    E: EvaluationContext,
{
    let mut res = String::new();
    for tok in tokens {
        match tok {
            DataToken::Str(s) => res.push_str(s),
            DataToken::Cidr { .. } => {
                // Stripped by the compiler before the remaining tokens are
                // handed to the expander; ignored defensively if present.
            }
            DataToken::Var {
                letter,
                url_encode,
                reverse,
                delims,
                truncate,
            } => {
                let value = ctx.provide_data(*letter)?;
                format_value(&value, *reverse, *truncate, delims, *url_encode, &mut res);
            }
        }
    }
    Ok(res)
}

/// Convenience wrapper lexing then expanding raw macro-string text in one
/// call, used for one-off strings that aren't part of a compiled record
/// (e.g. the text pulled live from an `exp=` TXT lookup).
pub fn evaluate_macro<E>(ctx: &E, macro_text: &str) -> Result<String, SpfError>
where
    E: EvaluationContext,
{
    let tokens = crate::record::token::lex_macro_string(macro_text)?;
    expand(&tokens, ctx)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use lazy_static::lazy_static;

    use super::*;

    lazy_static! {
        static ref DEFAULT_OPTIONS_MAP: HashMap<MacroVariable, &'static str> = {
            let mut m = HashMap::new();
            m.insert(MacroVariable::Sender, "sender");
            m.insert(MacroVariable::ReceivingDomain, "a.b.c.d");
            m.insert(MacroVariable::HeloOrEhloDomain, "  ");
            m.insert(MacroVariable::CanonicalClientIp, "a.b-c=d");
            m
        };
    }

    #[test]
    fn test_can_evaluate_macro() {
        // truncation keeps the last `n` elements of the (possibly reversed)
        // split - not the first `n`.
        assert_eq!(evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%{r1}").unwrap(), "d");

        assert_eq!(
            evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%{r10}").unwrap(),
            "a.b.c.d"
        );

        assert_eq!(evaluate_macro(&*DEFAULT_OPTIONS_MAP, "asdf").unwrap(), "asdf");
        assert_eq!(evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%_").unwrap(), " ");
        assert_eq!(evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%%").unwrap(), "%");
        assert_eq!(evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%-").unwrap(), "%20");
        // a bare "%s" (no braces) is not a macro-expand - only "%{...}",
        // "%%", "%_" and "%-" are; anything else passes through literally.
        assert_eq!(evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%s").unwrap(), "%s");
        assert_eq!(evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%{sr}").unwrap(), "sender");

        assert_eq!(
            evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%{r}").unwrap(),
            "a.b.c.d"
        );
        assert_eq!(
            evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%{rr}").unwrap(),
            "d.c.b.a"
        );

        assert_eq!(
            evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%{c.-=}").unwrap(),
            "a.b.c.d"
        );
        assert_eq!(
            evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%{cr.-=}").unwrap(),
            "d.c.b.a"
        );
        assert_eq!(
            evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%{c1r.-=}").unwrap(),
            "a"
        );

        evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%").unwrap_err();
        assert_eq!(evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%q").unwrap(), "%q");
        // digit-transformer of 0 is not a legal truncation count (valid range is 1-15)
        evaluate_macro(&*DEFAULT_OPTIONS_MAP, "%{r0}").unwrap_err();
    }

    #[test]
    fn unset_mandatory_variable_is_uninit_var() {
        let empty: HashMap<MacroVariable, &'static str> = HashMap::new();
        let err = evaluate_macro(&empty, "%{l}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UninitVar);
    }

    #[test]
    fn url_encode_percent_encodes_unreserved_complement() {
        let mut m = HashMap::new();
        m.insert(MacroVariable::Sender, "a@b c");
        assert_eq!(evaluate_macro(&m, "%{S}").unwrap(), "a%40b%20c");
    }
}
