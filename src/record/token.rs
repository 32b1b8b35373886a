//! Data tokens: the lexed form of a macro-string.
//!
//! A macro-string (the argument of `a`, `mx`, `ptr`, `include`, `exists`,
//! `redirect`, and the `exp=` modifier's TXT payload) is lexed exactly once,
//! at compile time, into a `Vec<DataToken>`. The macro expander
//! (`crate::spf::macro_eval`) then walks that vector per evaluation instead
//! of re-parsing text every time a mechanism fires - this is what lets
//! `include`/`redirect` recursion re-expand the same domain-spec against a
//! different current domain cheaply.

use crate::error::{ErrorKind, SpfError};
use crate::spf::MacroVariable;
use std::convert::TryFrom;

/// One token out of a lexed macro-string.
#[derive(Debug, Clone, PartialEq)]
pub enum DataToken {
    /// Literal text, copied verbatim into the expansion.
    Str(String),
    /// A `%{...}` (or bare `%x`) substitution.
    Var {
        letter: MacroVariable,
        /// Uppercase letter: URL-encode the substituted value.
        url_encode: bool,
        /// `r` flag: reverse the split fields before truncation/joining.
        reverse: bool,
        /// Delimiter characters splitting the field; empty means `.` only.
        delims: Vec<char>,
        /// Right-hand-side truncation count, 0 = no truncation. 1-15.
        truncate: u8,
    },
    /// CIDR length pair attached to an `a`/`mx` mechanism argument. Always
    /// the first token in a mechanism's token vector if present, and
    /// stripped before the remaining tokens are macro-expanded. Never
    /// produced by `lex_macro_string`; mechanism argument parsing
    /// in `crate::record::compile` splits it off before lexing the domain
    /// part and reattaches it here only when round-tripping the wire format.
    Cidr {
        v4: Option<u8>,
        v6: Option<u8>,
    },
}

const VALID_DELIMS: &[char] = &['.', '-', '+', '=', '|', '_'];

/// Lexes a macro-string into data tokens. Outside `%{...}`, `%_` is a
/// literal space, `%-` is `%20`, `%%` is `%`, and any other `%x` passes
/// through literally. Inside braces the grammar is
/// `%{letter[digits][r][delims]}`.
pub fn lex_macro_string(input: &str) -> Result<Vec<DataToken>, SpfError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let bytes = input.as_bytes();
    let mut i = 0usize;

    macro_rules! flush_literal {
        () => {
            if !literal.is_empty() {
                tokens.push(DataToken::Str(std::mem::take(&mut literal)));
            }
        };
    }

    while i < bytes.len() {
        let c = bytes[i];
        if !c.is_ascii() {
            return Err(SpfError::new(ErrorKind::InvalidChar)
                .with_expression(input.to_owned())
                .at(i));
        }
        if c != b'%' {
            literal.push(c as char);
            i += 1;
            continue;
        }

        // `c` is '%'; inspect the next byte.
        let next = bytes.get(i + 1).copied();
        match next {
            None => {
                return Err(SpfError::new(ErrorKind::InvalidEscape)
                    .with_expression(input.to_owned())
                    .at(i))
            }
            Some(b'%') => {
                literal.push('%');
                i += 2;
            }
            Some(b'_') => {
                literal.push(' ');
                i += 2;
            }
            Some(b'-') => {
                literal.push_str("%20");
                i += 2;
            }
            Some(b'{') => {
                flush_literal!();
                let (token, consumed) = lex_var_token(&input[i..])?;
                tokens.push(token);
                i += consumed;
            }
            Some(other) => {
                // Bare "%x": the C reference warns and passes it through
                // literally; we match that rather than reject the record.
                literal.push('%');
                literal.push(other as char);
                i += 2;
            }
        }
    }
    flush_literal!();
    Ok(tokens)
}

/// Lexes a single `%{...}` construct starting at `s[0] == '%'`. Returns the
/// token plus the number of bytes consumed from `s`.
fn lex_var_token(s: &str) -> Result<(DataToken, usize), SpfError> {
    debug_assert!(s.as_bytes()[0] == b'%' && s.as_bytes()[1] == b'{');
    let bytes = s.as_bytes();
    let mut i = 2usize; // past "%{"

    let letter_byte = *bytes
        .get(i)
        .ok_or_else(|| SpfError::new(ErrorKind::InvalidVar).with_expression(s.to_owned()))?;
    if !MacroVariable::get_valid_lowercase_symbols().contains(&letter_byte.to_ascii_lowercase()) {
        return Err(SpfError::new(ErrorKind::InvalidVar)
            .with_expression(s.to_owned())
            .at(i));
    }
    let url_encode = letter_byte.is_ascii_uppercase();
    let letter = MacroVariable::try_from(letter_byte)
        .map_err(|_| SpfError::new(ErrorKind::InvalidVar).with_expression(s.to_owned()))?;
    i += 1;

    // optional digits: RHS truncation count, 1-15 (0 = no truncation == absent)
    let digit_start = i;
    while bytes.get(i).map_or(false, |b| b.is_ascii_digit()) {
        i += 1;
    }
    let truncate: u8 = if i > digit_start {
        let n: u32 = s[digit_start..i]
            .parse()
            .map_err(|_| SpfError::new(ErrorKind::InvalidVar).with_expression(s.to_owned()))?;
        if n == 0 || n > 15 {
            return Err(SpfError::new(ErrorKind::InvalidVar)
                .with_expression(s.to_owned())
                .at(digit_start));
        }
        n as u8
    } else {
        0
    };

    // optional 'r'
    let reverse = if bytes.get(i) == Some(&b'r') || bytes.get(i) == Some(&b'R') {
        i += 1;
        true
    } else {
        false
    };

    // optional delimiter characters, any run of the allowed set
    let mut delims = Vec::new();
    while let Some(&b) = bytes.get(i) {
        let c = b as char;
        if VALID_DELIMS.contains(&c) {
            delims.push(c);
            i += 1;
        } else {
            break;
        }
    }

    match bytes.get(i) {
        Some(b'}') => i += 1,
        _ => {
            return Err(SpfError::new(ErrorKind::InvalidDelim)
                .with_expression(s.to_owned())
                .at(i))
        }
    }

    Ok((
        DataToken::Var {
            letter,
            url_encode,
            reverse,
            delims,
            truncate,
        },
        i,
    ))
}

/// Renders tokens back to their canonical macro-string text, used by the
/// stringifier, so compiling and re-stringifying a record is idempotent.
pub fn stringify_tokens(tokens: &[DataToken]) -> String {
    let mut out = String::new();
    for tok in tokens {
        match tok {
            DataToken::Str(s) => out.push_str(s),
            DataToken::Cidr { .. } => {}
            DataToken::Var {
                letter,
                url_encode,
                reverse,
                delims,
                truncate,
            } => {
                let mut letter_char = match letter {
                    MacroVariable::LocalPart => 'l',
                    MacroVariable::Sender => 's',
                    MacroVariable::SenderDomain => 'o',
                    MacroVariable::Domain => 'd',
                    MacroVariable::SmtpClientIp => 'i',
                    MacroVariable::CanonicalClientIp => 'c',
                    MacroVariable::Timestamp => 't',
                    MacroVariable::ValidatedDomainName => 'p',
                    MacroVariable::IpVersionName => 'v',
                    MacroVariable::HeloOrEhloDomain => 'h',
                    MacroVariable::ReceivingDomain => 'r',
                };
                if *url_encode {
                    letter_char = letter_char.to_ascii_uppercase();
                }
                out.push_str("%{");
                out.push(letter_char);
                if *truncate > 0 {
                    out.push_str(&truncate.to_string());
                }
                if *reverse {
                    out.push('r');
                }
                for d in delims {
                    out.push(*d);
                }
                out.push('}');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_literal_text() {
        let tokens = lex_macro_string("foo.bar").unwrap();
        assert_eq!(tokens, vec![DataToken::Str("foo.bar".to_owned())]);
    }

    #[test]
    fn lexes_escapes() {
        assert_eq!(
            lex_macro_string("%%").unwrap(),
            vec![DataToken::Str("%".to_owned())]
        );
        assert_eq!(
            lex_macro_string("%_").unwrap(),
            vec![DataToken::Str(" ".to_owned())]
        );
        assert_eq!(
            lex_macro_string("%-").unwrap(),
            vec![DataToken::Str("%20".to_owned())]
        );
    }

    #[test]
    fn bare_percent_letter_is_literal_not_a_substitution() {
        let tokens = lex_macro_string("%s").unwrap();
        assert_eq!(tokens, vec![DataToken::Str("%s".to_owned())]);
    }

    #[test]
    fn lexes_full_var_with_modifiers() {
        let tokens = lex_macro_string("%{ir.-}").unwrap();
        assert_eq!(
            tokens,
            vec![DataToken::Var {
                letter: MacroVariable::SmtpClientIp,
                url_encode: false,
                reverse: true,
                delims: vec!['.', '-'],
                truncate: 0,
            }]
        );
    }

    #[test]
    fn uppercase_letter_url_encodes() {
        let tokens = lex_macro_string("%{S}").unwrap();
        assert_eq!(
            tokens,
            vec![DataToken::Var {
                letter: MacroVariable::Sender,
                url_encode: true,
                reverse: false,
                delims: vec![],
                truncate: 0,
            }]
        );
    }

    #[test]
    fn round_trips_through_stringify() {
        for text in ["%{ir}.%{v}._spf.%{d2}", "%{l}-%{o}"] {
            let tokens = lex_macro_string(text).unwrap();
            assert_eq!(stringify_tokens(&tokens), text);
        }
    }
}
