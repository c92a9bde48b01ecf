//! Evaluation of `#if`/`#elif` expressions.
//!
//! Identifiers are expanded against the live defines (recursively, so a define
//! whose value names another define resolves through it); names that are not
//! defined read as `0`. `defined(NAME)` and `defined NAME` test presence. The
//! result is computed in `f64`, with bitwise operators working on the integer
//! part.
use std::collections::HashMap;

use thiserror::Error;

use crate::token::{tokenize, TokenKind};

const MAX_EXPANSION_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("expression ended unexpectedly")]
    UnexpectedEnd,
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),
    #[error("invalid numeric literal `{0}`")]
    BadNumber(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("define expansion nested deeper than {MAX_EXPANSION_DEPTH} levels")]
    ExpansionTooDeep,
    #[error("`defined` must be followed by a name")]
    BadDefined,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Op(&'static str),
    LParen,
    RParen,
    Question,
    Colon,
}

/// Evaluates a conditional expression. Callers treat an error as `false`.
pub fn evaluate(expr: &str, defines: &HashMap<String, String>) -> Result<bool, ExprError> {
    let expanded = expand(expr, defines, 0)?;
    let tokens = lex(&expanded)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expression()?;
    if let Some(tok) = parser.tokens.get(parser.pos) {
        return Err(ExprError::UnexpectedToken(format!("{tok:?}")));
    }
    Ok(truthy(value))
}

fn expand(expr: &str, defines: &HashMap<String, String>, depth: usize) -> Result<String, ExprError> {
    if depth > MAX_EXPANSION_DEPTH {
        return Err(ExprError::ExpansionTooDeep);
    }
    let mut in_comment = false;
    let tokens = tokenize(expr, &mut in_comment);
    let mut out = String::with_capacity(expr.len());
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        match token.kind {
            TokenKind::Ident if token.text == "defined" => {
                i += 1;
                let mut parenthesized = false;
                let mut name = None;
                while i < tokens.len() {
                    let t = tokens[i];
                    match (t.kind, t.text) {
                        (TokenKind::Other, text) if text.trim().is_empty() => {}
                        (TokenKind::Other, "(") if !parenthesized && name.is_none() => {
                            parenthesized = true;
                        }
                        (TokenKind::Ident, text) if name.is_none() => {
                            name = Some(text);
                            if !parenthesized {
                                break;
                            }
                        }
                        (TokenKind::Other, ")") if parenthesized && name.is_some() => break,
                        _ => return Err(ExprError::BadDefined),
                    }
                    i += 1;
                }
                let name = name.ok_or(ExprError::BadDefined)?;
                if i >= tokens.len() && parenthesized {
                    return Err(ExprError::BadDefined);
                }
                out.push_str(if defines.contains_key(name) { " 1 " } else { " 0 " });
            }
            TokenKind::Ident => match defines.get(token.text) {
                Some(value) => {
                    out.push_str(" (");
                    out.push_str(&expand(value, defines, depth + 1)?);
                    out.push_str(") ");
                }
                None => out.push_str(" 0 "),
            },
            TokenKind::Comment => {}
            _ => out.push_str(token.text),
        }
        i += 1;
    }
    Ok(out)
}

fn lex(expanded: &str) -> Result<Vec<Tok>, ExprError> {
    const TWO_CHAR: [&str; 8] = ["||", "&&", "==", "!=", "<=", ">=", "<<", ">>"];
    const ONE_CHAR: [&str; 11] = ["+", "-", "*", "/", "%", "<", ">", "!", "~", "&", "|"];

    let mut in_comment = false;
    let tokens = tokenize(expanded, &mut in_comment);
    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        match token.kind {
            TokenKind::Number => out.push(Tok::Num(parse_number(token.text)?)),
            TokenKind::Comment => {}
            TokenKind::Ident => return Err(ExprError::UnexpectedToken(token.text.to_string())),
            TokenKind::Other => {
                let text = token.text;
                if text.trim().is_empty() {
                    i += 1;
                    continue;
                }
                if let Some(next) = tokens.get(i + 1) {
                    let pair = format!("{text}{}", next.text);
                    if let Some(op) = TWO_CHAR.iter().find(|op| **op == pair) {
                        out.push(Tok::Op(*op));
                        i += 2;
                        continue;
                    }
                }
                let tok = match text {
                    "(" => Tok::LParen,
                    ")" => Tok::RParen,
                    "?" => Tok::Question,
                    ":" => Tok::Colon,
                    "^" => Tok::Op("^"),
                    other => match ONE_CHAR.iter().find(|op| **op == other) {
                        Some(op) => Tok::Op(*op),
                        None => return Err(ExprError::UnexpectedToken(other.to_string())),
                    },
                };
                out.push(tok);
            }
        }
        i += 1;
    }
    Ok(out)
}

fn parse_number(text: &str) -> Result<f64, ExprError> {
    let bad = || ExprError::BadNumber(text.to_string());
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        let digits = hex.trim_end_matches(['u', 'U']);
        return i64::from_str_radix(digits, 16).map(|v| v as f64).map_err(|_| bad());
    }
    let trimmed = text.trim_end_matches(['u', 'U', 'f', 'F', 'l', 'L']);
    trimmed.parse::<f64>().map_err(|_| bad())
}

fn truthy(value: f64) -> bool {
    value != 0.0 && !value.is_nan()
}

fn bool_value(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | ">" | "<=" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        _ => return None,
    })
}

fn apply(op: &str, lhs: f64, rhs: f64) -> Result<f64, ExprError> {
    let (li, ri) = (lhs as i64, rhs as i64);
    Ok(match op {
        "||" => bool_value(truthy(lhs) || truthy(rhs)),
        "&&" => bool_value(truthy(lhs) && truthy(rhs)),
        "|" => (li | ri) as f64,
        "^" => (li ^ ri) as f64,
        "&" => (li & ri) as f64,
        "==" => bool_value(lhs == rhs),
        "!=" => bool_value(lhs != rhs),
        "<" => bool_value(lhs < rhs),
        ">" => bool_value(lhs > rhs),
        "<=" => bool_value(lhs <= rhs),
        ">=" => bool_value(lhs >= rhs),
        "<<" => li.checked_shl(ri as u32).unwrap_or(0) as f64,
        ">>" => li.checked_shr(ri as u32).unwrap_or(0) as f64,
        "+" => lhs + rhs,
        "-" => lhs - rhs,
        "*" => lhs * rhs,
        "/" | "%" if rhs == 0.0 => return Err(ExprError::DivisionByZero),
        "/" => lhs / rhs,
        "%" => lhs % rhs,
        other => return Err(ExprError::UnexpectedToken(other.to_string())),
    })
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Tok, ExprError> {
        let tok = self.tokens.get(self.pos).cloned().ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn expression(&mut self) -> Result<f64, ExprError> {
        let condition = self.binary(1)?;
        if self.peek() != Some(&Tok::Question) {
            return Ok(condition);
        }
        self.pos += 1;
        let when_true = self.expression()?;
        match self.next()? {
            Tok::Colon => {}
            other => return Err(ExprError::UnexpectedToken(format!("{other:?}"))),
        }
        let when_false = self.expression()?;
        Ok(if truthy(condition) { when_true } else { when_false })
    }

    fn binary(&mut self, min_precedence: u8) -> Result<f64, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op)) => *op,
                _ => break,
            };
            let Some(prec) = precedence(op).filter(|prec| *prec >= min_precedence) else {
                break;
            };
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<f64, ExprError> {
        match self.peek() {
            Some(Tok::Op("-")) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Tok::Op("+")) => {
                self.pos += 1;
                self.unary()
            }
            Some(Tok::Op("!")) => {
                self.pos += 1;
                Ok(bool_value(!truthy(self.unary()?)))
            }
            Some(Tok::Op("~")) => {
                self.pos += 1;
                Ok(!(self.unary()? as i64) as f64)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<f64, ExprError> {
        match self.next()? {
            Tok::Num(value) => Ok(value),
            Tok::LParen => {
                let value = self.expression()?;
                match self.next()? {
                    Tok::RParen => Ok(value),
                    other => Err(ExprError::UnexpectedToken(format!("{other:?}"))),
                }
            }
            other => Err(ExprError::UnexpectedToken(format!("{other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defines(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn unknown_names_read_as_zero() {
        let empty = HashMap::new();
        assert!(!evaluate("MISSING", &empty).unwrap());
        assert!(evaluate("MISSING == 0", &empty).unwrap());
    }

    #[test]
    fn arithmetic_and_logic() {
        let defs = defines(&[("MODE", "2"), ("STEPS", "8")]);
        assert!(evaluate("MODE == 2 && STEPS > 4", &defs).unwrap());
        assert!(evaluate("(STEPS / 2) % 3 == 1", &defs).unwrap());
        assert!(evaluate("-MODE < 0 || 0", &defs).unwrap());
        assert!(!evaluate("!STEPS", &defs).unwrap());
        assert!(evaluate("(1 << MODE) == 4", &defs).unwrap());
        assert!(evaluate("MODE > 1 ? STEPS : 0", &defs).unwrap());
    }

    #[test]
    fn defines_expand_through_other_defines() {
        let defs = defines(&[("LAB", "3"), ("COLORSPACE", "LAB")]);
        assert!(evaluate("COLORSPACE == LAB", &defs).unwrap());
        assert!(evaluate("COLORSPACE == 3", &defs).unwrap());
    }

    #[test]
    fn defined_checks_presence_not_value() {
        let defs = defines(&[("FLAG", "0")]);
        assert!(evaluate("defined(FLAG)", &defs).unwrap());
        assert!(evaluate("defined FLAG && !FLAG", &defs).unwrap());
        assert!(!evaluate("defined(OTHER)", &defs).unwrap());
    }

    #[test]
    fn malformed_expressions_fail() {
        let empty = HashMap::new();
        assert!(evaluate("1 +", &empty).is_err());
        assert!(evaluate("(1", &empty).is_err());
        assert_eq!(evaluate("4 / 0", &empty), Err(ExprError::DivisionByZero));
        let cyclic = defines(&[("A", "B"), ("B", "A")]);
        assert_eq!(evaluate("A", &cyclic), Err(ExprError::ExpansionTooDeep));
    }

    #[test]
    fn float_literals_with_suffixes() {
        let empty = HashMap::new();
        assert!(evaluate("1.5f > 1.0", &empty).unwrap());
        assert!(evaluate("0x10 == 16", &empty).unwrap());
    }
}
