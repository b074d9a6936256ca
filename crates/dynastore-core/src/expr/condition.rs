//! Condition expressions for conditional writes and Query/Scan filters.
//!
//! Grammar (conjunctions only, no parenthesized groups):
//!
//! ```text
//! cond    := atom (AND atom)*
//! atom    := func | compare
//! func    := attribute_exists(name) | attribute_not_exists(name)
//!          | begins_with(name, :v) | contains(name, :v)
//! compare := name OP :v            OP ∈ {=, <>, <, <=, >, >=}
//! ```

use crate::error::{Error, Result};
use crate::value::{self, AttributeValue, Record};

use super::lex::{self, Token, Tokens};
use super::{CompareOp, ExpressionParams};

/// Parsed condition expression: a tagged AST walked per record.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        name: String,
        op: CompareOp,
        value: String,
    },
    AttributeExists(String),
    AttributeNotExists(String),
    BeginsWith {
        name: String,
        value: String,
    },
    Contains {
        name: String,
        value: String,
    },
    And(Vec<Condition>),
}

impl Condition {
    /// Parse a condition expression string.
    pub fn parse(expression: &str) -> Result<Condition> {
        let mut tokens = Tokens::new(lex::tokenize(expression)?);
        let mut atoms = vec![parse_atom(&mut tokens)?];
        while let Some(token) = tokens.peek() {
            if token.is_keyword("AND") {
                tokens.next();
                atoms.push(parse_atom(&mut tokens)?);
            } else {
                return Err(Error::validation(format!(
                    "unexpected trailing token in condition expression: {token:?}"
                )));
            }
        }
        if atoms.len() == 1 {
            Ok(atoms.pop().unwrap())
        } else {
            Ok(Condition::And(atoms))
        }
    }

    /// Evaluate against a record, or against "no record" for conditions on
    /// nonexistent items: every attribute lookup is then absent, so
    /// `attribute_not_exists` holds and everything else is false.
    ///
    /// A comparison whose attribute is absent is false, never an error;
    /// malformed placeholders and type mismatches are errors.
    pub fn eval(&self, record: Option<&Record>, params: &ExpressionParams) -> Result<bool> {
        match self {
            Condition::Compare { name, op, value } => {
                let expected = params.resolve_value(value)?;
                match lookup(record, params.resolve_name(name)) {
                    Some(actual) => Ok(op.matches(value::compare(actual, expected)?)),
                    None => Ok(false),
                }
            }
            Condition::AttributeExists(name) => {
                Ok(lookup(record, params.resolve_name(name)).is_some())
            }
            Condition::AttributeNotExists(name) => {
                Ok(lookup(record, params.resolve_name(name)).is_none())
            }
            Condition::BeginsWith { name, value } => {
                let prefix = params.resolve_value(value)?;
                match lookup(record, params.resolve_name(name)) {
                    Some(actual) => begins_with(actual, prefix),
                    None => Ok(false),
                }
            }
            Condition::Contains { name, value } => {
                let needle = params.resolve_value(value)?;
                match lookup(record, params.resolve_name(name)) {
                    Some(actual) => contains(actual, needle),
                    None => Ok(false),
                }
            }
            Condition::And(atoms) => {
                for atom in atoms {
                    if !atom.eval(record, params)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

fn lookup<'a>(record: Option<&'a Record>, name: &str) -> Option<&'a AttributeValue> {
    record.and_then(|r| r.get(name))
}

fn parse_atom(tokens: &mut Tokens) -> Result<Condition> {
    let first = tokens
        .next()
        .ok_or_else(|| Error::validation("empty condition expression"))?;

    // A function call if an identifier is followed by '('.
    if let Token::Ident(word) = &first {
        if tokens.peek() == Some(&Token::LParen) {
            return parse_function(word.clone(), tokens);
        }
    }

    let name = first
        .as_name()
        .ok_or_else(|| Error::validation("expected attribute name or function in condition"))?
        .to_string();
    let op = match tokens.next() {
        Some(Token::Op(op)) => op,
        other => {
            return Err(Error::validation(format!(
                "expected comparison operator after '{name}', got {other:?}"
            )));
        }
    };
    let value = tokens.expect_value("condition comparison")?;
    Ok(Condition::Compare { name, op, value })
}

fn parse_function(function: String, tokens: &mut Tokens) -> Result<Condition> {
    tokens.expect(&Token::LParen, "condition function")?;
    match function.as_str() {
        "attribute_exists" => {
            let name = tokens.expect_name("attribute_exists")?;
            tokens.expect(&Token::RParen, "attribute_exists")?;
            Ok(Condition::AttributeExists(name))
        }
        "attribute_not_exists" => {
            let name = tokens.expect_name("attribute_not_exists")?;
            tokens.expect(&Token::RParen, "attribute_not_exists")?;
            Ok(Condition::AttributeNotExists(name))
        }
        "begins_with" => {
            let name = tokens.expect_name("begins_with")?;
            tokens.expect(&Token::Comma, "begins_with")?;
            let value = tokens.expect_value("begins_with")?;
            tokens.expect(&Token::RParen, "begins_with")?;
            Ok(Condition::BeginsWith { name, value })
        }
        "contains" => {
            let name = tokens.expect_name("contains")?;
            tokens.expect(&Token::Comma, "contains")?;
            let value = tokens.expect_value("contains")?;
            tokens.expect(&Token::RParen, "contains")?;
            Ok(Condition::Contains { name, value })
        }
        other => Err(Error::validation(format!(
            "unsupported condition function: {other}"
        ))),
    }
}

/// `begins_with` over `S` or `B` operands of matching type.
fn begins_with(actual: &AttributeValue, prefix: &AttributeValue) -> Result<bool> {
    match (actual, prefix) {
        (AttributeValue::S(text), AttributeValue::S(prefix)) => Ok(text.starts_with(prefix)),
        (AttributeValue::B(data), AttributeValue::B(prefix)) => Ok(value::decode_binary(data)?
            .starts_with(&value::decode_binary(prefix)?)),
        _ => Err(Error::validation(format!(
            "begins_with requires S or B operands of the same type, got {} and {}",
            actual.type_label(),
            prefix.type_label()
        ))),
    }
}

/// `contains` over `S` or `B` operands of matching type.
fn contains(actual: &AttributeValue, needle: &AttributeValue) -> Result<bool> {
    match (actual, needle) {
        (AttributeValue::S(text), AttributeValue::S(needle)) => Ok(text.contains(needle)),
        (AttributeValue::B(data), AttributeValue::B(needle)) => {
            let haystack = value::decode_binary(data)?;
            let needle = value::decode_binary(needle)?;
            if needle.is_empty() {
                return Ok(true);
            }
            if needle.len() > haystack.len() {
                return Ok(false);
            }
            Ok(haystack.windows(needle.len()).any(|w| w == needle))
        }
        _ => Err(Error::validation(format!(
            "contains requires S or B operands of the same type, got {} and {}",
            actual.type_label(),
            needle.type_label()
        ))),
    }
}
