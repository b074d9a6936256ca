//! Update expressions: the `SET` / `ADD` / `REMOVE` / `DELETE` clause
//! language and the plan applied to a record.
//!
//! Clauses may appear in any order and are case-insensitive; each lists
//! comma-separated actions. The parsed plan keeps the four action kinds in
//! disjoint maps — an attribute named by more than one action is a
//! validation error. Application order is REMOVE, SET, ADD, DELETE.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::value::{self, AttributeValue, Record};

use super::lex::{self, Token, Tokens};
use super::ExpressionParams;

/// Right-hand side of a single `SET` action.
#[derive(Debug, Clone, PartialEq)]
pub enum SetAction {
    /// `SET a = :v`
    Assign(AttributeValue),
    /// `SET a = b + :v` — numeric increment.
    Add(String, AttributeValue),
    /// `SET a = b - :v` — numeric decrement.
    Subtract(String, AttributeValue),
    /// `SET a = if_not_exists(b, :v)`
    IfNotExists(String, AttributeValue),
    /// `SET a = list_append(b, :v)`
    ListAppend(String, AttributeValue),
}

/// The parsed update plan: four disjoint action maps keyed by attribute.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateActions {
    pub set: BTreeMap<String, SetAction>,
    pub add: BTreeMap<String, AttributeValue>,
    pub remove: BTreeSet<String>,
    pub delete: BTreeMap<String, AttributeValue>,
}

impl UpdateActions {
    /// Parse an update expression, resolving all placeholders eagerly.
    pub fn parse(expression: &str, params: &ExpressionParams) -> Result<UpdateActions> {
        let mut tokens = Tokens::new(lex::tokenize(expression)?);
        let mut actions = UpdateActions::default();
        let mut seen = BTreeSet::new();

        if tokens.is_done() {
            return Err(Error::validation("empty update expression"));
        }

        while let Some(token) = tokens.next() {
            let keyword = match token {
                Token::Ident(word) => word,
                other => {
                    return Err(Error::validation(format!(
                        "expected update clause keyword, got {other:?}"
                    )));
                }
            };
            match keyword.to_ascii_uppercase().as_str() {
                "SET" => parse_actions(&mut tokens, |t| {
                    actions.parse_set_action(t, params, &mut seen)
                })?,
                "ADD" => parse_actions(&mut tokens, |t| {
                    actions.parse_add_action(t, params, &mut seen)
                })?,
                "REMOVE" => parse_actions(&mut tokens, |t| {
                    actions.parse_remove_action(t, params, &mut seen)
                })?,
                "DELETE" => parse_actions(&mut tokens, |t| {
                    actions.parse_delete_action(t, params, &mut seen)
                })?,
                other => {
                    return Err(Error::validation(format!(
                        "unknown update clause: {other}"
                    )));
                }
            }
        }

        Ok(actions)
    }

    /// True when any action targets `attribute` (used to reject updates of
    /// key attributes).
    pub fn touches(&self, attribute: &str) -> bool {
        self.set.contains_key(attribute)
            || self.add.contains_key(attribute)
            || self.remove.contains(attribute)
            || self.delete.contains_key(attribute)
    }

    /// Apply the plan to `old`, producing the new record.
    pub fn apply(&self, old: &Record) -> Result<Record> {
        let mut record = old.clone();

        for name in &self.remove {
            record.remove(name);
        }

        for (name, action) in &self.set {
            let new_value = match action {
                SetAction::Assign(v) => v.clone(),
                SetAction::Add(operand, v) => {
                    AttributeValue::N(value::add_numbers(number_of(&record, operand)?, number_literal(v)?)?)
                }
                SetAction::Subtract(operand, v) => AttributeValue::N(value::subtract_numbers(
                    number_of(&record, operand)?,
                    number_literal(v)?,
                )?),
                SetAction::IfNotExists(operand, v) => record
                    .get(operand)
                    .cloned()
                    .unwrap_or_else(|| v.clone()),
                SetAction::ListAppend(operand, v) => {
                    let current = match record.get(operand) {
                        Some(AttributeValue::L(items)) => items.clone(),
                        Some(other) => {
                            return Err(Error::validation(format!(
                                "list_append requires an L attribute, '{operand}' is {}",
                                other.type_label()
                            )));
                        }
                        None => {
                            return Err(Error::validation(format!(
                                "list_append operand '{operand}' does not exist"
                            )));
                        }
                    };
                    let tail = match v {
                        AttributeValue::L(items) => items.clone(),
                        other => {
                            return Err(Error::validation(format!(
                                "list_append requires an L value, got {}",
                                other.type_label()
                            )));
                        }
                    };
                    let mut combined = current;
                    combined.extend(tail);
                    AttributeValue::L(combined)
                }
            };
            record.insert(name.clone(), new_value);
        }

        for (name, operand) in &self.add {
            match operand {
                AttributeValue::N(increment) => {
                    let new_value = match record.get(name) {
                        None => operand.clone(),
                        Some(AttributeValue::N(current)) => {
                            AttributeValue::N(value::add_numbers(current, increment)?)
                        }
                        Some(other) => {
                            return Err(Error::validation(format!(
                                "ADD cannot increment '{name}' of type {}",
                                other.type_label()
                            )));
                        }
                    };
                    record.insert(name.clone(), new_value);
                }
                set if set.is_set() => {
                    let merged = value::union_sets(record.get(name), set)?;
                    record.insert(name.clone(), merged);
                }
                other => {
                    return Err(Error::validation(format!(
                        "ADD only supports number and set values, got {}",
                        other.type_label()
                    )));
                }
            }
        }

        for (name, operand) in &self.delete {
            let Some(current) = record.get(name) else {
                // Deleting from an absent attribute is a no-op.
                continue;
            };
            match value::subtract_set(current, operand)? {
                Some(remaining) => {
                    record.insert(name.clone(), remaining);
                }
                None => {
                    record.remove(name);
                }
            }
        }

        Ok(record)
    }

    fn parse_set_action(
        &mut self,
        tokens: &mut Tokens,
        params: &ExpressionParams,
        seen: &mut BTreeSet<String>,
    ) -> Result<()> {
        let target = resolve_target(tokens, params, seen, "SET")?;
        tokens.expect(&Token::Op(super::CompareOp::Eq), "SET action")?;

        let action = match tokens.next() {
            Some(Token::Value(placeholder)) => {
                SetAction::Assign(params.resolve_value(&placeholder)?.clone())
            }
            Some(Token::Ident(word))
                if tokens.peek() == Some(&Token::LParen)
                    && (word == "if_not_exists" || word == "list_append") =>
            {
                tokens.next();
                let operand = params.resolve_name(&tokens.expect_name(&word)?).to_string();
                tokens.expect(&Token::Comma, &word)?;
                let v = params.resolve_value(&tokens.expect_value(&word)?)?.clone();
                tokens.expect(&Token::RParen, &word)?;
                if word == "if_not_exists" {
                    SetAction::IfNotExists(operand, v)
                } else {
                    SetAction::ListAppend(operand, v)
                }
            }
            Some(token) => {
                let operand = token
                    .as_name()
                    .ok_or_else(|| {
                        Error::validation("SET value must be :v, arithmetic, or a function")
                    })?
                    .to_string();
                let operand = params.resolve_name(&operand).to_string();
                let sign = tokens.next();
                let v = params.resolve_value(&tokens.expect_value("SET arithmetic")?)?.clone();
                match sign {
                    Some(Token::Plus) => SetAction::Add(operand, v),
                    Some(Token::Minus) => SetAction::Subtract(operand, v),
                    other => {
                        return Err(Error::validation(format!(
                            "expected '+' or '-' in SET arithmetic, got {other:?}"
                        )));
                    }
                }
            }
            None => {
                return Err(Error::validation("unexpected end of SET action"));
            }
        };

        self.set.insert(target, action);
        Ok(())
    }

    fn parse_add_action(
        &mut self,
        tokens: &mut Tokens,
        params: &ExpressionParams,
        seen: &mut BTreeSet<String>,
    ) -> Result<()> {
        let target = resolve_target(tokens, params, seen, "ADD")?;
        let v = params.resolve_value(&tokens.expect_value("ADD action")?)?.clone();
        if !matches!(v, AttributeValue::N(_)) && !v.is_set() {
            return Err(Error::validation(format!(
                "ADD only supports number and set values, got {}",
                v.type_label()
            )));
        }
        self.add.insert(target, v);
        Ok(())
    }

    fn parse_remove_action(
        &mut self,
        tokens: &mut Tokens,
        params: &ExpressionParams,
        seen: &mut BTreeSet<String>,
    ) -> Result<()> {
        let target = resolve_target(tokens, params, seen, "REMOVE")?;
        self.remove.insert(target);
        Ok(())
    }

    fn parse_delete_action(
        &mut self,
        tokens: &mut Tokens,
        params: &ExpressionParams,
        seen: &mut BTreeSet<String>,
    ) -> Result<()> {
        let target = resolve_target(tokens, params, seen, "DELETE")?;
        let v = params.resolve_value(&tokens.expect_value("DELETE action")?)?.clone();
        if !v.is_set() {
            return Err(Error::validation(
                "DELETE only supports set values (SS, NS, BS)",
            ));
        }
        self.delete.insert(target, v);
        Ok(())
    }
}

/// Parse one action, then further comma-separated actions of the same
/// clause.
fn parse_actions<F>(tokens: &mut Tokens, mut parse_one: F) -> Result<()>
where
    F: FnMut(&mut Tokens) -> Result<()>,
{
    parse_one(tokens)?;
    while tokens.peek() == Some(&Token::Comma) {
        tokens.next();
        parse_one(tokens)?;
    }
    Ok(())
}

/// Consume the action's target attribute, enforcing the one-action-per-
/// attribute rule across the whole expression.
fn resolve_target(
    tokens: &mut Tokens,
    params: &ExpressionParams,
    seen: &mut BTreeSet<String>,
    clause: &str,
) -> Result<String> {
    let raw = tokens.expect_name(clause)?;
    let target = params.resolve_name(&raw).to_string();
    if !seen.insert(target.clone()) {
        return Err(Error::validation(format!(
            "attribute '{target}' appears in more than one update action"
        )));
    }
    Ok(target)
}

fn number_of<'a>(record: &'a Record, name: &str) -> Result<&'a str> {
    match record.get(name) {
        Some(AttributeValue::N(text)) => Ok(text),
        Some(other) => Err(Error::validation(format!(
            "arithmetic requires an N attribute, '{name}' is {}",
            other.type_label()
        ))),
        None => Err(Error::validation(format!(
            "arithmetic operand '{name}' does not exist"
        ))),
    }
}

fn number_literal(v: &AttributeValue) -> Result<&str> {
    match v {
        AttributeValue::N(text) => Ok(text),
        other => Err(Error::validation(format!(
            "arithmetic requires an N value, got {}",
            other.type_label()
        ))),
    }
}
