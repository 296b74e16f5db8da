//! Rewriting rule invocations into loads from backing arrays.

use crate::backing::BackingMap;
use crate::expr::Expr;
use crate::kernel::Assignment;
use crate::rule::SubstitutionRule;
use tracing::trace;

/// Replaces calls to materialized rules with direct array loads, using the
/// backing entries visible at one registration index.
#[derive(Clone, Copy, Debug)]
pub struct RuleToLoad<'a> {
    backing: &'a BackingMap,
    index: usize,
}

impl<'a> RuleToLoad<'a> {
    pub fn new(backing: &'a BackingMap, index: usize) -> Self {
        RuleToLoad { backing, index }
    }

    /// Rewrite every backed call in `expr`. A zero-argument call becomes a
    /// load of element `0`.
    pub fn rewrite(&self, expr: &Expr) -> Expr {
        expr.transform(&mut |node| {
            let (function, args) = node.as_call()?;
            let array = self.backing.get_at(function, self.index)?;
            trace!(rule = %function, array = %array, index = self.index, "call rewritten to load");
            let index = if args.is_empty() {
                vec![Expr::int(0)]
            } else {
                args.to_vec()
            };
            Some(Expr::subscript(array, index))
        })
    }

    pub fn rewrite_rule(&self, rule: &SubstitutionRule) -> SubstitutionRule {
        rule.with_body(self.rewrite(&rule.body))
    }

    pub fn rewrite_assignment(&self, insn: &Assignment) -> Assignment {
        Assignment {
            assignee: self.rewrite(&insn.assignee),
            expression: self.rewrite(&insn.expression),
            within: insn.within.clone(),
        }
    }
}
