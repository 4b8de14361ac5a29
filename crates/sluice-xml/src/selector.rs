//! Selector paths: parser and matcher.
//!
//! Grammar:
//! ```text
//! Selector   ::= '#document' | Path
//! Path       ::= ( '/' | '//' )? Step ( ( '/' | '//' ) Step )*
//! Step       ::= '**' | NameTest Predicate*
//! NameTest   ::= '*' | ( Prefix ':' )? Local
//! Predicate  ::= '[' Integer ']' | '[' '@' Name ( '=' Quoted )? ']'
//! ```
//!
//! A path is matched right to left against a fragment and its ancestors. A
//! path without a leading `/` is implicitly preceded by `**`, so `b/c`
//! matches any `c` whose parent is a `b`.

use std::collections::HashMap;
use std::fmt;

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, delimited, eof, opt, preceded, repeat, terminated};
use winnow::token::{take_till, take_while};
use winnow::{ModalResult, Parser};

use sluice_types::{Result, SluiceError};

use crate::document::NodeRef;

/// Target key of the document fragment.
pub const DOCUMENT_SELECTOR: &str = "#document";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    Any,
    Named {
        prefix: Option<String>,
        local: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// 1-based position among same-named siblings.
    Position(usize),
    HasAttribute(String),
    AttributeEquals(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementStep {
    pub test: NameTest,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Element(ElementStep),
    /// Zero or more element ancestors.
    AnyDepth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorExpr {
    Document,
    Path { rooted: bool, steps: Vec<Step> },
}

/// A parsed selector together with its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorPath {
    source: String,
    expr: SelectorExpr,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

fn name_part<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_alphabetic() || c == '_'),
        take_while(0.., |c: char| {
            c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
        }),
    )
        .take()
        .parse_next(input)
}

fn qname(input: &mut &str) -> ModalResult<(Option<String>, String)> {
    let first = name_part.parse_next(input)?;
    let second = opt(preceded(':', name_part)).parse_next(input)?;
    Ok(match second {
        Some(local) => (Some(first.to_string()), local.to_string()),
        None => (None, first.to_string()),
    })
}

fn attribute_name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (name_part, opt(preceded(':', name_part)))
        .take()
        .parse_next(input)
}

fn quoted(input: &mut &str) -> ModalResult<String> {
    alt((
        delimited('\'', take_till(0.., '\''), '\''),
        delimited('"', take_till(0.., '"'), '"'),
    ))
    .map(String::from)
    .parse_next(input)
}

fn attribute_predicate(input: &mut &str) -> ModalResult<Predicate> {
    let _ = '@'.parse_next(input)?;
    let name = attribute_name.parse_next(input)?.to_string();
    let value = opt(preceded((multispace0, '=', multispace0), quoted)).parse_next(input)?;
    Ok(match value {
        Some(v) => Predicate::AttributeEquals(name, v),
        None => Predicate::HasAttribute(name),
    })
}

fn predicate(input: &mut &str) -> ModalResult<Predicate> {
    delimited(
        ('[', multispace0),
        alt((
            digit1.parse_to::<usize>().map(Predicate::Position),
            attribute_predicate,
        )),
        (multispace0, ']'),
    )
    .parse_next(input)
}

fn name_test(input: &mut &str) -> ModalResult<NameTest> {
    alt((
        '*'.value(NameTest::Any),
        qname.map(|(prefix, local)| NameTest::Named { prefix, local }),
    ))
    .parse_next(input)
}

fn step(input: &mut &str) -> ModalResult<Step> {
    if opt("**").parse_next(input)?.is_some() {
        return Ok(Step::AnyDepth);
    }
    let test = name_test.parse_next(input)?;
    let predicates: Vec<Predicate> = repeat(0.., predicate).parse_next(input)?;
    Ok(Step::Element(ElementStep { test, predicates }))
}

fn separator<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    alt(("//", "/")).parse_next(input)
}

fn path_expr(input: &mut &str) -> ModalResult<SelectorExpr> {
    let lead = opt(separator).parse_next(input)?;
    let mut steps = vec![];
    if lead == Some("//") {
        steps.push(Step::AnyDepth);
    }
    steps.push(step.parse_next(input)?);
    let rest: Vec<(&str, Step)> = repeat(0.., (separator, step)).parse_next(input)?;
    for (sep, s) in rest {
        if sep == "//" {
            steps.push(Step::AnyDepth);
        }
        steps.push(s);
    }
    Ok(SelectorExpr::Path {
        rooted: lead.is_some(),
        steps,
    })
}

fn selector_expr(input: &mut &str) -> ModalResult<SelectorExpr> {
    alt((
        DOCUMENT_SELECTOR.value(SelectorExpr::Document),
        path_expr,
    ))
    .parse_next(input)
}

impl SelectorPath {
    /// Parse a selector string.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let mut remaining = trimmed;
        let expr = terminated(selector_expr, eof)
            .parse_next(&mut remaining)
            .map_err(|e| {
                let position = trimmed.len() - remaining.len();
                let message = e.to_string();
                SluiceError::SelectorSyntax {
                    selector: input.to_string(),
                    position,
                    message: if message.trim().is_empty() {
                        "unexpected input".to_string()
                    } else {
                        message
                    },
                }
            })?;
        Ok(Self {
            source: trimmed.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &SelectorExpr {
        &self.expr
    }

    pub fn is_document(&self) -> bool {
        matches!(self.expr, SelectorExpr::Document)
    }

    /// The lookup key the selector is indexed under: the local name of the
    /// deepest element step, `*` for a wildcard leaf, or `#document`.
    pub fn target_key(&self) -> String {
        match &self.expr {
            SelectorExpr::Document => DOCUMENT_SELECTOR.to_string(),
            SelectorExpr::Path { steps, .. } => match steps.last() {
                Some(Step::Element(ElementStep {
                    test: NameTest::Named { local, .. },
                    ..
                })) => local.clone(),
                _ => "*".to_string(),
            },
        }
    }

    /// Relative specificity. Named steps outweigh wildcards; namespaces,
    /// predicates and anchoring add to the score.
    pub fn specificity(&self) -> u32 {
        match &self.expr {
            SelectorExpr::Document => 100,
            SelectorExpr::Path { rooted, steps } => {
                let score: u32 = steps
                    .iter()
                    .map(|s| match s {
                        Step::AnyDepth => 0,
                        Step::Element(e) => {
                            let base = match &e.test {
                                NameTest::Any => 1,
                                NameTest::Named { prefix: None, .. } => 100,
                                NameTest::Named { prefix: Some(_), .. } => 110,
                            };
                            base + 10 * e.predicates.len() as u32
                        }
                    })
                    .sum();
                score + u32::from(*rooted)
            }
        }
    }

    /// Whether the selector applies to `node`.
    ///
    /// `namespaces` maps selector prefixes to namespace URIs. A prefix with
    /// no mapping is compared against the element's own prefix.
    pub fn matches(&self, node: NodeRef<'_>, namespaces: &HashMap<String, String>) -> bool {
        match &self.expr {
            SelectorExpr::Document => node.is_document(),
            SelectorExpr::Path { rooted, steps } => {
                if node.is_document() {
                    return !rooted
                        && matches!(
                            steps.as_slice(),
                            [Step::Element(ElementStep { test: NameTest::Any, predicates })]
                                if predicates.is_empty()
                        );
                }
                node.is_element() && match_steps(steps, Some(node), *rooted, namespaces)
            }
        }
    }
}

fn match_steps(
    steps: &[Step],
    node: Option<NodeRef<'_>>,
    rooted: bool,
    namespaces: &HashMap<String, String>,
) -> bool {
    match steps.split_last() {
        None => !rooted || node.map_or(true, |n| n.is_document()),
        Some((Step::AnyDepth, rest)) => {
            let mut current = node;
            loop {
                if match_steps(rest, current, rooted, namespaces) {
                    return true;
                }
                match current {
                    Some(n) if n.is_element() => current = n.parent(),
                    _ => return false,
                }
            }
        }
        Some((Step::Element(step), rest)) => match node {
            Some(n) if n.is_element() && step_matches(step, n, namespaces) => {
                match_steps(rest, n.parent(), rooted, namespaces)
            }
            _ => false,
        },
    }
}

fn step_matches(
    step: &ElementStep,
    node: NodeRef<'_>,
    namespaces: &HashMap<String, String>,
) -> bool {
    let Some(name) = node.name() else {
        return false;
    };
    let name_ok = match &step.test {
        NameTest::Any => true,
        NameTest::Named { prefix, local } => {
            *local == name.local
                && match prefix {
                    None => true,
                    Some(p) => match namespaces.get(p) {
                        Some(uri) => name.namespace.as_deref() == Some(uri.as_str()),
                        None => name.prefix.as_deref() == Some(p.as_str()),
                    },
                }
        }
    };
    name_ok
        && step.predicates.iter().all(|p| match p {
            Predicate::Position(n) => node.element_position() == *n,
            Predicate::HasAttribute(a) => node.attribute(a).is_some(),
            Predicate::AttributeEquals(a, v) => node.attribute(a) == Some(v.as_str()),
        })
}

impl fmt::Display for SelectorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
