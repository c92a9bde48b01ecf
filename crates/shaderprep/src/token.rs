//! Line tokenizer used for define substitution.
//!
//! Only whole identifier tokens are candidates for replacement. Numbers are
//! scanned as a unit so exponents such as `1e5` never expose a fake `e5`
//! identifier, and comments are carried through untouched.
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident,
    Number,
    Comment,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

pub(crate) fn is_ident_start(byte: u8) -> bool {
    byte == b'_' || byte.is_ascii_alphabetic()
}

pub(crate) fn is_ident_continue(byte: u8) -> bool {
    byte == b'_' || byte.is_ascii_alphanumeric()
}

/// Splits one line into tokens. `in_block_comment` carries `/* ... */` state
/// across lines.
pub(crate) fn tokenize<'a>(line: &'a str, in_block_comment: &mut bool) -> Vec<Token<'a>> {
    let bytes = line.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let start = i;
        let next = bytes.get(i + 1).copied();

        if *in_block_comment || (bytes[i] == b'/' && next == Some(b'*')) {
            if !*in_block_comment {
                *in_block_comment = true;
                i += 2;
            }
            match line[i..].find("*/") {
                Some(offset) => {
                    i += offset + 2;
                    *in_block_comment = false;
                }
                None => i = len,
            }
            tokens.push(Token {
                kind: TokenKind::Comment,
                text: &line[start..i],
            });
            continue;
        }

        let byte = bytes[i];
        if byte == b'/' && next == Some(b'/') {
            tokens.push(Token {
                kind: TokenKind::Comment,
                text: &line[start..],
            });
            break;
        }

        let kind = if is_ident_start(byte) {
            while i < len && is_ident_continue(bytes[i]) {
                i += 1;
            }
            TokenKind::Ident
        } else if byte.is_ascii_digit()
            || (byte == b'.' && next.is_some_and(|b| b.is_ascii_digit()))
        {
            let hex = byte == b'0' && matches!(next, Some(b'x' | b'X'));
            i += 1;
            while i < len {
                let current = bytes[i];
                let exponent_sign = !hex
                    && matches!(current, b'+' | b'-')
                    && matches!(bytes[i - 1], b'e' | b'E');
                if current.is_ascii_alphanumeric() || current == b'.' || current == b'_' || exponent_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            TokenKind::Number
        } else {
            let width = line[i..].chars().next().map_or(1, char::len_utf8);
            i += width;
            TokenKind::Other
        };

        tokens.push(Token {
            kind,
            text: &line[start..i],
        });
    }

    tokens
}

/// Replaces every identifier token that names a live define.
pub(crate) fn substitute(
    line: &str,
    defines: &HashMap<String, String>,
    in_block_comment: &mut bool,
) -> String {
    let mut out = String::with_capacity(line.len());
    for token in tokenize(line, in_block_comment) {
        match token.kind {
            TokenKind::Ident => match defines.get(token.text) {
                Some(value) => out.push_str(value),
                None => out.push_str(token.text),
            },
            _ => out.push_str(token.text),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(line: &str) -> Vec<(TokenKind, &str)> {
        let mut block = false;
        tokenize(line, &mut block)
            .into_iter()
            .map(|token| (token.kind, token.text))
            .collect()
    }

    #[test]
    fn exponents_stay_inside_numbers() {
        let tokens = kinds("x = 1e-5 + .5;");
        assert!(tokens.contains(&(TokenKind::Number, "1e-5")));
        assert!(tokens.contains(&(TokenKind::Number, ".5")));
        assert!(!tokens.iter().any(|(kind, text)| *kind == TokenKind::Ident && *text == "e"));
    }

    #[test]
    fn substitution_respects_identifier_boundaries() {
        let defines = HashMap::from([("SCALE".to_string(), "2.0".to_string())]);
        let mut block = false;
        let out = substitute(
            "float v = SCALE * SCALE_MAX + my_SCALE; // SCALE",
            &defines,
            &mut block,
        );
        assert_eq!(out, "float v = 2.0 * SCALE_MAX + my_SCALE; // SCALE");
    }

    #[test]
    fn block_comments_span_lines() {
        let defines = HashMap::from([("N".to_string(), "4".to_string())]);
        let mut block = false;
        assert_eq!(substitute("int a = N; /* N", &defines, &mut block), "int a = 4; /* N");
        assert!(block);
        assert_eq!(substitute("still N */ N", &defines, &mut block), "still N */ 4");
        assert!(!block);
    }
}
