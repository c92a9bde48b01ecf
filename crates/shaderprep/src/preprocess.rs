//! Line-oriented GLSL preprocessor.
//!
//! Handles `#define`/`#undef`, the `#ifdef`/`#ifndef`/`#if`/`#elif`/`#else`/
//! `#endif` family and `#include "name"` against a [`FragmentTable`], then
//! substitutes live defines into every surviving line. Directives the
//! preprocessor does not own (`#version`, `#extension`, `#pragma`, ...) pass
//! through untouched so the GPU compiler still sees them.
//!
//! Caller defines are copied into a private map per call. The first definition
//! of a name wins, so call-site defines override `#define` defaults written in
//! the shader, and an include observes (and may extend) everything defined
//! before it in the including file.
use std::collections::HashMap;

use thiserror::Error;

use crate::defines::DefineSet;
use crate::expr;
use crate::fragments::FragmentTable;
use crate::token::{is_ident_continue, substitute};

const ROOT_ORIGIN: &str = "<source>";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreprocessError {
    #[error("{origin}:{line}: #endif without matching #if")]
    UnmatchedEndif { origin: String, line: usize },

    #[error("{origin}:{line}: #else without matching #if")]
    UnmatchedElse { origin: String, line: usize },

    #[error("{origin}:{line}: #elif without matching #if")]
    UnmatchedElif { origin: String, line: usize },

    #[error("{origin}:{line}: #{directive} after #else")]
    ElseAfterElse {
        origin: String,
        line: usize,
        directive: String,
    },

    #[error("{origin}:{line}: invalid #include `{text}`")]
    InvalidInclude {
        origin: String,
        line: usize,
        text: String,
    },

    #[error("{origin}:{line}: missing include `{name}`")]
    MissingInclude {
        origin: String,
        line: usize,
        name: String,
    },

    #[error("{origin}: {depth} conditional block(s) still open at end of input")]
    UnterminatedConditional { origin: String, depth: usize },

    #[error("include cycle through `{name}`")]
    IncludeCycle { name: String },

    #[error("{origin}:{line}: malformed directive `{text}`")]
    MalformedDirective {
        origin: String,
        line: usize,
        text: String,
    },
}

/// One open conditional group.
#[derive(Debug, Clone, Copy)]
struct Frame {
    parent_skipping: bool,
    branch_taken: bool,
    seen_else: bool,
}

pub struct Preprocessor<'a> {
    fragments: &'a FragmentTable,
}

impl<'a> Preprocessor<'a> {
    pub fn new(fragments: &'a FragmentTable) -> Self {
        Self { fragments }
    }

    pub fn preprocess(&self, source: &str, defines: &DefineSet) -> Result<String, PreprocessError> {
        let mut live: HashMap<String, String> = defines
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        let mut include_stack = Vec::new();
        self.run(source, ROOT_ORIGIN, &mut live, &mut include_stack)
    }

    fn run(
        &self,
        source: &str,
        origin: &str,
        live: &mut HashMap<String, String>,
        include_stack: &mut Vec<String>,
    ) -> Result<String, PreprocessError> {
        let mut output: Vec<String> = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut skipping = false;
        let mut in_block_comment = false;

        for (index, raw_line) in source.split('\n').enumerate() {
            let line_no = index + 1;
            let trimmed = raw_line.trim();

            let Some((keyword, rest)) = split_directive(trimmed).filter(|_| !in_block_comment) else {
                if !skipping {
                    output.push(substitute(raw_line, live, &mut in_block_comment));
                }
                continue;
            };

            let malformed = || PreprocessError::MalformedDirective {
                origin: origin.to_string(),
                line: line_no,
                text: trimmed.to_string(),
            };

            match keyword {
                "define" => {
                    if skipping {
                        continue;
                    }
                    let name = leading_identifier(rest).ok_or_else(malformed)?;
                    let after = &rest[name.len()..];
                    if after.starts_with('(') {
                        // function-like macros are left for the GPU compiler
                        output.push(raw_line.to_string());
                        continue;
                    }
                    if live.contains_key(name) {
                        continue;
                    }
                    let value = strip_line_comment(after).trim();
                    let value = if value.is_empty() { "1" } else { value };
                    live.insert(name.to_string(), value.to_string());
                }
                "undef" => {
                    if skipping {
                        continue;
                    }
                    let name = leading_identifier(rest).ok_or_else(malformed)?;
                    live.remove(name);
                }
                "ifdef" | "ifndef" => {
                    let condition = if skipping {
                        false
                    } else {
                        let name = leading_identifier(rest).ok_or_else(malformed)?;
                        live.contains_key(name) == (keyword == "ifdef")
                    };
                    stack.push(Frame {
                        parent_skipping: skipping,
                        branch_taken: condition,
                        seen_else: false,
                    });
                    skipping = skipping || !condition;
                }
                "if" => {
                    let condition = !skipping && evaluate_condition(rest, live, origin, line_no);
                    stack.push(Frame {
                        parent_skipping: skipping,
                        branch_taken: condition,
                        seen_else: false,
                    });
                    skipping = skipping || !condition;
                }
                "elif" => {
                    let top = stack.last_mut().ok_or_else(|| PreprocessError::UnmatchedElif {
                        origin: origin.to_string(),
                        line: line_no,
                    })?;
                    if top.seen_else {
                        return Err(PreprocessError::ElseAfterElse {
                            origin: origin.to_string(),
                            line: line_no,
                            directive: "elif".to_string(),
                        });
                    }
                    if top.parent_skipping || top.branch_taken {
                        skipping = true;
                        continue;
                    }
                    let condition = evaluate_condition(rest, live, origin, line_no);
                    top.branch_taken = condition;
                    skipping = !condition;
                }
                "else" => {
                    let top = stack.last_mut().ok_or_else(|| PreprocessError::UnmatchedElse {
                        origin: origin.to_string(),
                        line: line_no,
                    })?;
                    if top.seen_else {
                        return Err(PreprocessError::ElseAfterElse {
                            origin: origin.to_string(),
                            line: line_no,
                            directive: "else".to_string(),
                        });
                    }
                    top.seen_else = true;
                    skipping = top.parent_skipping || top.branch_taken;
                    top.branch_taken = true;
                }
                "endif" => {
                    let top = stack.pop().ok_or_else(|| PreprocessError::UnmatchedEndif {
                        origin: origin.to_string(),
                        line: line_no,
                    })?;
                    skipping = top.parent_skipping;
                }
                "include" => {
                    if skipping {
                        continue;
                    }
                    let name = include_target(rest).ok_or_else(|| PreprocessError::InvalidInclude {
                        origin: origin.to_string(),
                        line: line_no,
                        text: trimmed.to_string(),
                    })?;
                    let fragment =
                        self.fragments
                            .get(name)
                            .ok_or_else(|| PreprocessError::MissingInclude {
                                origin: origin.to_string(),
                                line: line_no,
                                name: name.to_string(),
                            })?;
                    if include_stack.iter().any(|open| open == name) {
                        return Err(PreprocessError::IncludeCycle {
                            name: name.to_string(),
                        });
                    }
                    include_stack.push(name.to_string());
                    let included = self.run(fragment, name, live, include_stack)?;
                    include_stack.pop();
                    output.push(included);
                }
                _ => {
                    if !skipping {
                        output.push(raw_line.to_string());
                    }
                }
            }
        }

        if !stack.is_empty() {
            return Err(PreprocessError::UnterminatedConditional {
                origin: origin.to_string(),
                depth: stack.len(),
            });
        }

        Ok(output.join("\n"))
    }
}

/// Convenience wrapper for one-off preprocessing.
pub fn preprocess(
    source: &str,
    defines: &DefineSet,
    fragments: &FragmentTable,
) -> Result<String, PreprocessError> {
    Preprocessor::new(fragments).preprocess(source, defines)
}

fn split_directive(trimmed: &str) -> Option<(&str, &str)> {
    let after_hash = trimmed.strip_prefix('#')?.trim_start();
    let keyword_len = after_hash
        .bytes()
        .take_while(|byte| is_ident_continue(*byte))
        .count();
    let (keyword, rest) = after_hash.split_at(keyword_len);
    Some((keyword, rest.trim()))
}

fn leading_identifier(text: &str) -> Option<&str> {
    let len = text
        .bytes()
        .take_while(|byte| is_ident_continue(*byte))
        .count();
    (len > 0 && !text.as_bytes()[0].is_ascii_digit()).then(|| &text[..len])
}

fn strip_line_comment(text: &str) -> &str {
    match text.find("//") {
        Some(pos) => &text[..pos],
        None => text,
    }
}

fn include_target(rest: &str) -> Option<&str> {
    let inner = rest.strip_prefix('"')?;
    let end = inner.find('"')?;
    let name = &inner[..end];
    let trailing = strip_line_comment(&inner[end + 1..]).trim();
    (!name.is_empty() && trailing.is_empty()).then_some(name)
}

fn evaluate_condition(
    expression: &str,
    live: &HashMap<String, String>,
    origin: &str,
    line: usize,
) -> bool {
    match expr::evaluate(strip_line_comment(expression), live) {
        Ok(value) => value,
        Err(error) => {
            tracing::debug!(origin, line, %error, expression, "conditional evaluated as false");
            false
        }
    }
}
