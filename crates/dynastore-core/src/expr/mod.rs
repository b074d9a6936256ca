//! The expression engine: condition expressions, key-condition
//! expressions, and update expressions.
//!
//! All three interpreters share one tokenizer and resolve out-of-band
//! placeholders the same way: `#alias` through `ExpressionAttributeNames`
//! (falling back to the literal text when the alias is undefined) and
//! `:alias` through `ExpressionAttributeValues` (undefined is an error).

pub mod condition;
pub mod key_condition;
mod lex;
pub mod update;

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::value::AttributeValue;

pub use condition::Condition;
pub use key_condition::{KeyCondition, SortKeyCondition};
pub use update::UpdateActions;

/// Comparison operator of a condition or key-condition clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Apply the operator to a computed ordering.
    pub fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// The out-of-band placeholder maps accompanying an expression.
#[derive(Debug, Clone, Default)]
pub struct ExpressionParams {
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

impl ExpressionParams {
    /// Resolve an attribute-name token. `#alias` goes through the names
    /// map and falls back to the literal token when undefined; anything
    /// else is already the name.
    pub fn resolve_name<'a>(&'a self, token: &'a str) -> &'a str {
        if token.starts_with('#') {
            self.names.get(token).map(String::as_str).unwrap_or(token)
        } else {
            token
        }
    }

    /// Resolve a `:alias` value placeholder; undefined placeholders are a
    /// validation error.
    pub fn resolve_value(&self, placeholder: &str) -> Result<&AttributeValue> {
        self.values.get(placeholder).ok_or_else(|| {
            Error::validation(format!(
                "expression attribute value {placeholder} is not defined"
            ))
        })
    }
}
