//! Resource condition expressions: parser and evaluator.
//!
//! Grammar:
//! ```text
//! ConditionExpr  ::= Clause ( '&&' Clause )*
//! Clause         ::= Key ( Operator Literal )?
//! Key            ::= Scope '.' identifier ( '.' identifier )*
//! Scope          ::= 'attr' | 'param' | 'context'
//! Operator       ::= '=' | '!='
//! Literal        ::= QuotedString | BareWord
//! ```
//!
//! A clause without an operator tests that the key resolves to a non-empty
//! value. `attr.*` keys read attributes of the visited element, `param.*`
//! keys read the resource config's parameters and `context.*` keys read
//! beans from the execution context's bean context.

use sluice_types::{Result, SluiceError};

/// A parsed condition expression consisting of one or more clauses joined by `&&`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub key: String,
    pub operator: Operator,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Present,
}

const SCOPES: [&str; 3] = ["attr", "param", "context"];

/// Parse a condition string into a [`ConditionExpr`].
///
/// An empty input produces an expression with zero clauses, which always holds.
pub fn parse_condition(input: &str) -> Result<ConditionExpr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(ConditionExpr {
            clauses: Vec::new(),
        });
    }

    let clauses = trimmed
        .split("&&")
        .map(|part| parse_clause(part.trim()))
        .collect::<Result<Vec<_>>>()?;
    Ok(ConditionExpr { clauses })
}

fn parse_clause(input: &str) -> Result<Clause> {
    if input.is_empty() {
        return Err(make_error("empty clause"));
    }

    let (key, operator, value) = match find_operator(input) {
        Some((pos, operator, len)) => {
            let raw_value = input[pos + len..].trim();
            if raw_value.is_empty() {
                return Err(make_error(&format!(
                    "missing value after operator in '{input}'"
                )));
            }
            (input[..pos].trim(), operator, strip_quotes(raw_value))
        }
        None => (input, Operator::Present, String::new()),
    };

    let mut segments = key.split('.');
    let scope = segments.next().unwrap_or_default();
    if !SCOPES.contains(&scope) {
        return Err(make_error(&format!(
            "key '{key}' must start with one of {SCOPES:?}"
        )));
    }
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        return Err(make_error(&format!("key '{key}' has no name after its scope")));
    }
    for seg in &rest {
        if seg.is_empty()
            || !seg
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | ':'))
        {
            return Err(make_error(&format!("invalid key segment: '{seg}'")));
        }
    }

    Ok(Clause {
        key: key.to_string(),
        operator,
        value,
    })
}

fn find_operator(input: &str) -> Option<(usize, Operator, usize)> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'!' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                return Some((i, Operator::NotEq, 2));
            }
            b'=' => return Some((i, Operator::Eq, 1)),
            _ => i += 1,
        }
    }
    None
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        return s[1..s.len() - 1].to_string();
    }
    s.to_string()
}

fn make_error(msg: &str) -> SluiceError {
    SluiceError::Config(format!("condition parse error: {msg}"))
}

/// Evaluate a condition against values provided by a resolver.
///
/// `resolve` maps a full key (`attr.id`, `context.order`) to its value,
/// or `None` when it is absent. Absent keys compare as empty strings.
pub fn evaluate_condition(expr: &ConditionExpr, resolve: &dyn Fn(&str) -> Option<String>) -> bool {
    expr.clauses.iter().all(|clause| {
        let actual = resolve(&clause.key);
        match clause.operator {
            Operator::Present => actual.is_some_and(|v| !v.is_empty()),
            Operator::Eq => actual.unwrap_or_default() == clause.value,
            Operator::NotEq => actual.unwrap_or_default() != clause.value,
        }
    })
}
