//! Symbolic expressions for substitution-rule bodies and statements.
//!
//! The builder never evaluates numbers; it only assembles these trees and
//! rewrites them. Rule invocations (`Call`) are macros that a backend
//! inlines; `Subscript` is a load from concrete storage.

use crate::names::Name;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashSet;
use std::fmt;

/// Arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Rem => "%",
        }
    }
}

/// Comparison operators. They evaluate to 0 or 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Commutative reduction operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReduceOp::Sum => write!(f, "sum"),
        }
    }
}

/// A numeric literal supplied by the caller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
}

impl Literal {
    pub fn to_expr(self) -> Expr {
        match self {
            Literal::Int(n) => Expr::Int(n),
            Literal::Float(x) => Expr::float(x),
        }
    }

    /// True if the literal has no fractional part.
    pub fn is_integral(self) -> bool {
        match self {
            Literal::Int(_) => true,
            Literal::Float(x) => x.is_finite() && x.fract() == 0.0,
        }
    }
}

impl From<i64> for Literal {
    fn from(n: i64) -> Self {
        Literal::Int(n)
    }
}

impl From<i32> for Literal {
    fn from(n: i32) -> Self {
        Literal::Int(i64::from(n))
    }
}

impl From<f64> for Literal {
    fn from(x: f64) -> Self {
        Literal::Float(x)
    }
}

/// A symbolic expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    Int(i64),
    Float(OrderedFloat<f64>),
    /// Bound index variable or symbolic shape parameter.
    Var(Name),
    /// Invocation of a substitution rule.
    Call { function: Name, args: Vec<Expr> },
    /// Load from a concrete array.
    Subscript { array: Name, index: Vec<Expr> },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Reduction of `body` over the bound variables `vars`.
    Reduce {
        op: ReduceOp,
        vars: Vec<Name>,
        body: Box<Expr>,
    },
}

impl Expr {
    pub fn int(n: i64) -> Self {
        Expr::Int(n)
    }

    pub fn float(x: f64) -> Self {
        Expr::Float(OrderedFloat(x))
    }

    pub fn var(name: &Name) -> Self {
        Expr::Var(name.clone())
    }

    /// Variables as expressions, in order.
    pub fn vars(names: &[Name]) -> Vec<Expr> {
        names.iter().map(Expr::var).collect()
    }

    pub fn call(function: &Name, args: Vec<Expr>) -> Self {
        Expr::Call {
            function: function.clone(),
            args,
        }
    }

    pub fn subscript(array: &Name, index: Vec<Expr>) -> Self {
        Expr::Subscript {
            array: array.clone(),
            index,
        }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn compare(op: CmpOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn sum(vars: Vec<Name>, body: Expr) -> Self {
        Expr::Reduce {
            op: ReduceOp::Sum,
            vars,
            body: Box::new(body),
        }
    }

    /// Check if this is a literal.
    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Int(_) | Expr::Float(_))
    }

    /// Name of the invoked rule, if this is a call.
    pub fn as_call(&self) -> Option<(&Name, &[Expr])> {
        match self {
            Expr::Call { function, args } => Some((function, args)),
            _ => None,
        }
    }

    /// Free variables in order of first occurrence. Reduction variables are
    /// bound inside their reduction and are not reported.
    pub fn free_vars(&self) -> Vec<Name> {
        let mut out = Vec::new();
        let mut bound = Vec::new();
        self.collect_free_vars(&mut bound, &mut out);
        out
    }

    fn collect_free_vars(&self, bound: &mut Vec<Name>, out: &mut Vec<Name>) {
        match self {
            Expr::Int(_) | Expr::Float(_) => {}
            Expr::Var(v) => {
                if !bound.contains(v) && !out.contains(v) {
                    out.push(v.clone());
                }
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_free_vars(bound, out);
                }
            }
            Expr::Subscript { index, .. } => {
                for idx in index {
                    idx.collect_free_vars(bound, out);
                }
            }
            Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
                lhs.collect_free_vars(bound, out);
                rhs.collect_free_vars(bound, out);
            }
            Expr::Reduce { vars, body, .. } => {
                let depth = bound.len();
                bound.extend(vars.iter().cloned());
                body.collect_free_vars(bound, out);
                bound.truncate(depth);
            }
        }
    }

    /// Names of all rules invoked anywhere in this expression.
    pub fn calls(&self) -> FxHashSet<Name> {
        let mut out = FxHashSet::default();
        self.visit(&mut |e| {
            if let Expr::Call { function, .. } = e {
                out.insert(function.clone());
            }
        });
        out
    }

    /// Names of all arrays loaded anywhere in this expression.
    pub fn loads(&self) -> FxHashSet<Name> {
        let mut out = FxHashSet::default();
        self.visit(&mut |e| {
            if let Expr::Subscript { array, .. } = e {
                out.insert(array.clone());
            }
        });
        out
    }

    /// Pre-order traversal.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Var(_) => {}
            Expr::Call { args: items, .. } | Expr::Subscript { index: items, .. } => {
                for item in items {
                    item.visit(f);
                }
            }
            Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
            Expr::Reduce { body, .. } => body.visit(f),
        }
    }

    /// Rebuild the expression bottom-up. Children are transformed first;
    /// `f` then sees the rebuilt node and may return a replacement for it.
    pub fn transform(&self, f: &mut impl FnMut(&Expr) -> Option<Expr>) -> Expr {
        let rebuilt = match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Var(_) => self.clone(),
            Expr::Call { function, args } => Expr::Call {
                function: function.clone(),
                args: args.iter().map(|a| a.transform(f)).collect(),
            },
            Expr::Subscript { array, index } => Expr::Subscript {
                array: array.clone(),
                index: index.iter().map(|i| i.transform(f)).collect(),
            },
            Expr::Binary { op, lhs, rhs } => Expr::binary(*op, lhs.transform(f), rhs.transform(f)),
            Expr::Compare { op, lhs, rhs } => {
                Expr::compare(*op, lhs.transform(f), rhs.transform(f))
            }
            Expr::Reduce { op, vars, body } => Expr::Reduce {
                op: *op,
                vars: vars.clone(),
                body: Box::new(body.transform(f)),
            },
        };
        f(&rebuilt).unwrap_or(rebuilt)
    }
}

impl From<Literal> for Expr {
    fn from(lit: Literal) -> Self {
        lit.to_expr()
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(n) => write!(f, "{}", n),
            Expr::Float(x) => write!(f, "{:?}", x.into_inner()),
            Expr::Var(v) => write!(f, "{}", v),
            Expr::Call { function, args } => {
                write!(f, "{}(", function)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Subscript { array, index } => {
                write!(f, "{}[", array)?;
                write_list(f, index)?;
                write!(f, "]")
            }
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expr::Compare { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expr::Reduce { op, vars, body } => {
                write!(f, "{}([", op)?;
                for (i, v) in vars.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "], {})", body)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        s.into()
    }

    #[test]
    fn test_display() {
        let i = name("i0");
        let e = Expr::binary(
            BinOp::Add,
            Expr::call(&name("subst0"), vec![Expr::var(&i), Expr::int(0)]),
            Expr::float(2.0),
        );
        assert_eq!(format!("{}", e), "(subst0(i0, 0) + 2.0)");

        let s = Expr::sum(vec![name("j")], Expr::subscript(&name("arr0"), vec![Expr::var(&name("j"))]));
        assert_eq!(format!("{}", s), "sum([j], arr0[j])");
    }

    #[test]
    fn test_free_vars_skip_reduction_vars() {
        let (i, j) = (name("i"), name("j"));
        let e = Expr::sum(
            vec![j.clone()],
            Expr::call(&name("f"), vec![Expr::var(&i), Expr::var(&j), Expr::var(&i)]),
        );
        assert_eq!(e.free_vars(), vec![i]);
    }

    #[test]
    fn test_calls_and_loads() {
        let e = Expr::binary(
            BinOp::Mul,
            Expr::call(&name("a"), vec![Expr::call(&name("b"), vec![])]),
            Expr::subscript(&name("arr"), vec![Expr::int(0)]),
        );
        let calls = e.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.contains("a") && calls.contains("b"));
        assert!(e.loads().contains("arr"));
    }

    #[test]
    fn test_transform_is_bottom_up() {
        // f(g()) with g -> 7 must give f(7), then f(7) -> 8.
        let e = Expr::call(&name("f"), vec![Expr::call(&name("g"), vec![])]);
        let out = e.transform(&mut |node| match node {
            Expr::Call { function, .. } if &**function == "g" => Some(Expr::int(7)),
            Expr::Call { function, args } if &**function == "f" && args == &[Expr::int(7)] => {
                Some(Expr::int(8))
            }
            _ => None,
        });
        assert_eq!(out, Expr::int(8));
    }

    #[test]
    fn test_literal_integral() {
        assert!(Literal::from(3).is_integral());
        assert!(Literal::from(3.0).is_integral());
        assert!(!Literal::from(0.5).is_integral());
        assert!(!Literal::from(f64::NAN).is_integral());
    }
}
