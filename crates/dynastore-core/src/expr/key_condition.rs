//! Key-condition expressions for Query.
//!
//! Exactly one partition-key clause `pk = :v`, optionally joined by `AND`
//! with one sort-key clause: `sk OP :v`, `begins_with(sk, :v)`, or
//! `sk BETWEEN :a AND :b`. Anything else is a validation error. When the
//! query targets a GSI the key names are the GSI's.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::value::{self, AttributeValue};

use super::lex::{self, Token, Tokens};
use super::{CompareOp, ExpressionParams};

/// A fully resolved key condition: partition value plus optional sort-key
/// predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub partition_value: AttributeValue,
    pub sort: Option<SortKeyCondition>,
}

/// The sort-key predicate evaluated per item during the range scan.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKeyCondition {
    Compare(CompareOp, AttributeValue),
    BeginsWith(AttributeValue),
    Between(AttributeValue, AttributeValue),
}

/// One raw clause before assignment to the partition or sort key.
enum Clause {
    Compare {
        name: String,
        op: CompareOp,
        value: String,
    },
    BeginsWith {
        name: String,
        value: String,
    },
    Between {
        name: String,
        low: String,
        high: String,
    },
}

impl Clause {
    fn name(&self) -> &str {
        match self {
            Clause::Compare { name, .. }
            | Clause::BeginsWith { name, .. }
            | Clause::Between { name, .. } => name,
        }
    }
}

impl KeyCondition {
    /// Parse and resolve a key condition against the target index's key
    /// attribute names.
    pub fn parse(
        expression: &str,
        pk_name: &str,
        sk_name: Option<&str>,
        params: &ExpressionParams,
    ) -> Result<KeyCondition> {
        let mut tokens = Tokens::new(lex::tokenize(expression)?);
        let mut clauses = vec![parse_clause(&mut tokens)?];
        while !tokens.is_done() {
            match tokens.next() {
                Some(token) if token.is_keyword("AND") => {
                    clauses.push(parse_clause(&mut tokens)?);
                }
                other => {
                    return Err(Error::validation(format!(
                        "unexpected token in key condition: {other:?}"
                    )));
                }
            }
        }
        if clauses.len() > 2 {
            return Err(Error::validation(
                "key condition supports at most a partition and a sort key clause",
            ));
        }

        let mut partition_value = None;
        let mut sort = None;
        for clause in clauses {
            let resolved = params.resolve_name(clause.name()).to_string();
            if resolved == pk_name {
                if partition_value.is_some() {
                    return Err(Error::validation(
                        "duplicate partition key clause in key condition",
                    ));
                }
                partition_value = Some(resolve_partition(&clause, params)?);
            } else if sk_name == Some(resolved.as_str()) {
                if sort.is_some() {
                    return Err(Error::validation(
                        "duplicate sort key clause in key condition",
                    ));
                }
                sort = Some(resolve_sort(&clause, params)?);
            } else {
                return Err(Error::validation(format!(
                    "key condition references non-key attribute: {resolved}"
                )));
            }
        }

        let partition_value = partition_value.ok_or_else(|| {
            Error::validation(format!("key condition must constrain '{pk_name}' with '='"))
        })?;
        Ok(KeyCondition {
            partition_value,
            sort,
        })
    }
}

impl SortKeyCondition {
    /// Evaluate the predicate against an item's sort-key attribute.
    pub fn matches(&self, sort_value: &AttributeValue) -> Result<bool> {
        match self {
            SortKeyCondition::Compare(op, expected) => {
                Ok(op.matches(value::compare(sort_value, expected)?))
            }
            SortKeyCondition::BeginsWith(prefix) => match (sort_value, prefix) {
                (AttributeValue::S(text), AttributeValue::S(prefix)) => {
                    Ok(text.starts_with(prefix))
                }
                _ => Err(Error::validation(
                    "begins_with on a sort key requires S operands",
                )),
            },
            SortKeyCondition::Between(low, high) => {
                let ge_low = value::compare(sort_value, low)? != Ordering::Less;
                let le_high = value::compare(sort_value, high)? != Ordering::Greater;
                Ok(ge_low && le_high)
            }
        }
    }
}

fn parse_clause(tokens: &mut Tokens) -> Result<Clause> {
    let first = tokens
        .next()
        .ok_or_else(|| Error::validation("empty key condition clause"))?;

    if let Token::Ident(word) = &first {
        if word.eq_ignore_ascii_case("begins_with") && tokens.peek() == Some(&Token::LParen) {
            tokens.next();
            let name = tokens.expect_name("begins_with")?;
            tokens.expect(&Token::Comma, "begins_with")?;
            let value = tokens.expect_value("begins_with")?;
            tokens.expect(&Token::RParen, "begins_with")?;
            return Ok(Clause::BeginsWith { name, value });
        }
    }

    let name = first
        .as_name()
        .ok_or_else(|| Error::validation("expected key attribute name in key condition"))?
        .to_string();

    match tokens.next() {
        Some(Token::Op(op)) => {
            let value = tokens.expect_value("key condition comparison")?;
            Ok(Clause::Compare { name, op, value })
        }
        Some(token) if token.is_keyword("BETWEEN") => {
            let low = tokens.expect_value("BETWEEN")?;
            match tokens.next() {
                Some(token) if token.is_keyword("AND") => {}
                other => {
                    return Err(Error::validation(format!(
                        "expected AND inside BETWEEN, got {other:?}"
                    )));
                }
            }
            let high = tokens.expect_value("BETWEEN")?;
            Ok(Clause::Between { name, low, high })
        }
        other => Err(Error::validation(format!(
            "expected operator or BETWEEN after '{name}', got {other:?}"
        ))),
    }
}

fn resolve_partition(clause: &Clause, params: &ExpressionParams) -> Result<AttributeValue> {
    match clause {
        Clause::Compare {
            op: CompareOp::Eq,
            value,
            ..
        } => {
            let resolved = params.resolve_value(value)?;
            if resolved.key_string().is_none() {
                return Err(Error::validation(
                    "partition key value must be of type S or N",
                ));
            }
            Ok(resolved.clone())
        }
        _ => Err(Error::validation(
            "partition key must be constrained with '='",
        )),
    }
}

fn resolve_sort(clause: &Clause, params: &ExpressionParams) -> Result<SortKeyCondition> {
    match clause {
        Clause::Compare { op, value, .. } => {
            if *op == CompareOp::Ne {
                return Err(Error::validation(
                    "sort key condition does not support '<>'",
                ));
            }
            Ok(SortKeyCondition::Compare(
                *op,
                params.resolve_value(value)?.clone(),
            ))
        }
        Clause::BeginsWith { value, .. } => Ok(SortKeyCondition::BeginsWith(
            params.resolve_value(value)?.clone(),
        )),
        Clause::Between { low, high, .. } => Ok(SortKeyCondition::Between(
            params.resolve_value(low)?.clone(),
            params.resolve_value(high)?.clone(),
        )),
    }
}
