//! Substitution rules and the ordered registry that holds them.
//!
//! A rule `name(params) := body` is a named macro standing in for an array
//! value that has not been materialized. Registration order is significant:
//! finalization walks the registry strictly in append order.

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::names::Name;
use rustc_hash::FxHashMap;
use std::fmt;

/// A named, parameterized symbolic expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubstitutionRule {
    pub name: Name,
    /// Bound index variables, possibly empty (scalar rule).
    pub params: Vec<Name>,
    pub body: Expr,
}

impl SubstitutionRule {
    pub fn new(name: Name, params: Vec<Name>, body: Expr) -> Self {
        SubstitutionRule { name, params, body }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Check if this rule takes no parameters.
    pub fn is_scalar(&self) -> bool {
        self.params.is_empty()
    }

    /// A copy of this rule with its body replaced.
    pub fn with_body(&self, body: Expr) -> Self {
        SubstitutionRule {
            name: self.name.clone(),
            params: self.params.clone(),
            body,
        }
    }
}

impl fmt::Display for SubstitutionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") := {}", self.body)
    }
}

/// Append-only, ordered list of rules with name lookup.
#[derive(Clone, Debug, Default)]
pub struct RuleRegistry {
    rules: Vec<SubstitutionRule>,
    by_name: FxHashMap<Name, usize>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        RuleRegistry::default()
    }

    /// Append a rule, returning its registration index.
    pub fn push(&mut self, rule: SubstitutionRule) -> Result<usize> {
        if self.by_name.contains_key(&rule.name) {
            return Err(Error::DuplicateName(rule.name.to_string()));
        }
        let index = self.rules.len();
        self.by_name.insert(rule.name.clone(), index);
        self.rules.push(rule);
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Registration index of a rule.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Result<&SubstitutionRule> {
        self.position(name)
            .map(|i| &self.rules[i])
            .ok_or_else(|| Error::NameLookup(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn arity(&self, name: &str) -> Result<usize> {
        self.get(name).map(SubstitutionRule::arity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubstitutionRule> {
        self.rules.iter()
    }
}

impl<'a> IntoIterator for &'a RuleRegistry {
    type Item = &'a SubstitutionRule;
    type IntoIter = std::slice::Iter<'a, SubstitutionRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

impl fmt::Display for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in &self.rules {
            writeln!(f, "{}", rule)?;
        }
        Ok(())
    }
}
