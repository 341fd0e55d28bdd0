// HL7 JSON Path Expressions
//
// This module implements the two small grammars used by the engines: template
// expressions (`PID-3(1)`, `$$OBX-3.1`) and the segment locators understood by
// the built-in resolver (`OBX[2]-5[1].1.2`).

use crate::errors::Hl7JsonError;
use nom::branch::alt;
use nom::bytes::complete::take_while_m_n;
use nom::character::complete::{char, digit1};
use nom::combinator::{all_consuming, map, map_res, opt};
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;

/// Prefix marking a template key whose resolved value names the property
pub const DYNAMIC_KEY_PREFIX: &str = "$$";

/// Wildcard replaced by the current repetition number inside array templates
pub const REPETITION_WILDCARD: &str = "[*]";

/// A template leaf: a base path plus an optional 0-based repetition selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpression {
    pub base: String,
    pub selector: Option<usize>,
}

impl PathExpression {
    /// Splits a trailing literal `(N)` selector off the expression
    pub fn parse(expression: &str) -> Self {
        if let Some(open) = expression.rfind('(') {
            let tail = &expression[open..];
            if let Some(digits) = tail.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
                if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(selector) = digits.parse() {
                        return Self {
                            base: expression[..open].to_string(),
                            selector: Some(selector),
                        };
                    }
                }
            }
        }

        Self {
            base: expression.to_string(),
            selector: None,
        }
    }

    /// Applies the selector to a flattened value list
    pub fn select(&self, values: Vec<String>) -> Vec<String> {
        match self.selector {
            Some(index) => values.into_iter().nth(index).into_iter().collect(),
            None => values,
        }
    }

    /// The expression with every repetition wildcard bound to `repetition`
    pub fn bind_repetition(&self, repetition: usize) -> Self {
        Self {
            base: self
                .base
                .replace(REPETITION_WILDCARD, &format!("[{}]", repetition)),
            selector: self.selector,
        }
    }
}

/// A template object key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKey {
    /// Copied to the output as written
    Literal(String),

    /// Replaced by the first value the expression resolves to
    Dynamic(PathExpression),
}

impl PropertyKey {
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix(DYNAMIC_KEY_PREFIX) {
            Some(expression) if !expression.is_empty() => {
                PropertyKey::Dynamic(PathExpression::parse(expression))
            }
            _ => PropertyKey::Literal(key.to_string()),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, PropertyKey::Dynamic(_))
    }
}

/// Which occurrences of a segment a locator selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    All,
    /// 1-based
    Nth(usize),
}

/// Position inside a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLocator {
    pub number: usize,
    /// 1-based field repetition
    pub repetition: Option<usize>,
    pub component: Option<usize>,
    pub subcomponent: Option<usize>,
}

/// A parsed resolver path such as `OBX[2]-5[1].1.2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLocator {
    pub segment: String,
    pub occurrence: Occurrence,
    pub field: Option<FieldLocator>,
}

impl SegmentLocator {
    pub fn parse(path: &str) -> Result<Self, Hl7JsonError> {
        all_consuming(segment_locator)(path.trim())
            .map(|(_, locator)| locator)
            .map_err(|e| Hl7JsonError::PathSyntax(format!("Invalid path '{}': {}", path, e)))
    }
}

fn number(input: &str) -> IResult<&str, usize> {
    map_res(digit1, |digits: &str| digits.parse::<usize>())(input)
}

fn segment_code(input: &str) -> IResult<&str, &str> {
    take_while_m_n(3, 3, |c: char| c.is_ascii_alphanumeric())(input)
}

fn occurrence(input: &str) -> IResult<&str, Occurrence> {
    delimited(
        char('['),
        alt((
            map(char('*'), |_| Occurrence::All),
            map(number, Occurrence::Nth),
        )),
        char(']'),
    )(input)
}

fn field_locator(input: &str) -> IResult<&str, FieldLocator> {
    map(
        preceded(
            char('-'),
            tuple((
                number,
                opt(delimited(char('['), number, char(']'))),
                opt(preceded(char('.'), number)),
                opt(preceded(char('.'), number)),
            )),
        ),
        |(number, repetition, component, subcomponent)| FieldLocator {
            number,
            repetition,
            component,
            subcomponent,
        },
    )(input)
}

fn segment_locator(input: &str) -> IResult<&str, SegmentLocator> {
    map(
        tuple((segment_code, opt(occurrence), opt(field_locator))),
        |(segment, occurrence, field)| SegmentLocator {
            segment: segment.to_string(),
            occurrence: occurrence.unwrap_or(Occurrence::All),
            field,
        },
    )(input)
}
