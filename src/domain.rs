//! Polyhedral index domains.
//!
//! A [`Domain`] bounds one group of bound index variables by a conjunction
//! of affine inequalities. Domains are collected in registration order and
//! concatenated, never merged, in the final kernel.

use crate::names::Name;
use crate::shape::Extent;
use std::fmt;

/// Integer linear combination of named dimensions plus a constant.
///
/// Names that are not dimensions of the owning domain are symbolic
/// parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AffineExpr {
    terms: Vec<(Name, i64)>,
    constant: i64,
}

impl AffineExpr {
    pub fn constant(c: i64) -> Self {
        AffineExpr {
            terms: Vec::new(),
            constant: c,
        }
    }

    pub fn var(name: &Name) -> Self {
        AffineExpr::constant(0).plus_term(name, 1)
    }

    /// Add `coeff * name`, merging with an existing term.
    pub fn plus_term(mut self, name: &Name, coeff: i64) -> Self {
        if let Some(entry) = self.terms.iter_mut().find(|(n, _)| n == name) {
            entry.1 += coeff;
        } else {
            self.terms.push((name.clone(), coeff));
        }
        self.terms.retain(|(_, c)| *c != 0);
        self
    }

    pub fn plus_constant(mut self, c: i64) -> Self {
        self.constant += c;
        self
    }

    /// Coefficient of `name` (zero if absent).
    pub fn coefficient(&self, name: &str) -> i64 {
        self.terms
            .iter()
            .find(|(n, _)| &**n == name)
            .map_or(0, |(_, c)| *c)
    }

    pub fn terms(&self) -> &[(Name, i64)] {
        &self.terms
    }

    pub fn constant_term(&self) -> i64 {
        self.constant
    }

    /// Evaluate with the given name lookup. `None` if a name is unbound.
    pub fn eval(&self, lookup: &impl Fn(&str) -> Option<i64>) -> Option<i64> {
        self.terms
            .iter()
            .try_fold(self.constant, |acc, (n, c)| lookup(n).map(|v| acc + c * v))
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, coeff) in &self.terms {
            let sign = if *coeff < 0 { "-" } else { "+" };
            if first {
                if *coeff < 0 {
                    write!(f, "-")?;
                }
            } else {
                write!(f, " {} ", sign)?;
            }
            match coeff.abs() {
                1 => write!(f, "{}", name)?,
                c => write!(f, "{}{}", c, name)?,
            }
            first = false;
        }
        if first {
            write!(f, "{}", self.constant)
        } else if self.constant > 0 {
            write!(f, " + {}", self.constant)
        } else if self.constant < 0 {
            write!(f, " - {}", -self.constant)
        } else {
            Ok(())
        }
    }
}

/// `expr >= 0`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Constraint(pub AffineExpr);

impl Constraint {
    /// `lhs <= rhs`
    pub fn le(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        let mut diff = rhs.plus_constant(-lhs.constant);
        for (name, coeff) in &lhs.terms {
            diff = diff.plus_term(name, -coeff);
        }
        Constraint(diff)
    }

    pub fn expr(&self) -> &AffineExpr {
        &self.0
    }

    /// `None` if a referenced name is unbound.
    pub fn holds(&self, lookup: &impl Fn(&str) -> Option<i64>) -> Option<bool> {
        self.0.eval(lookup).map(|v| v >= 0)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} >= 0", self.0)
    }
}

/// Legal range of a tuple of bound index variables.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Domain {
    vars: Vec<Name>,
    constraints: Vec<Constraint>,
}

impl Domain {
    /// The unconstrained set over `vars`.
    pub fn universe(vars: Vec<Name>) -> Self {
        Domain {
            vars,
            constraints: Vec::new(),
        }
    }

    /// The box `0 <= var_k < extent_k` for each pair.
    pub fn rectangular<'a>(bounds: impl IntoIterator<Item = (&'a Name, &'a Extent)>) -> Self {
        let mut domain = Domain::universe(Vec::new());
        for (var, extent) in bounds {
            domain.vars.push(var.clone());
            domain = domain.slab(var, 0, extent);
        }
        domain
    }

    /// Intersect with `lo <= var < extent`.
    pub fn slab(self, var: &Name, lo: i64, extent: &Extent) -> Self {
        let upper = match extent {
            Extent::Fixed(n) => AffineExpr::constant(*n as i64 - 1),
            Extent::Param(p) => AffineExpr::var(p).plus_constant(-1),
        };
        self.add_constraint(Constraint::le(AffineExpr::constant(lo), AffineExpr::var(var)))
            .add_constraint(Constraint::le(AffineExpr::var(var), upper))
    }

    pub fn add_constraint(mut self, constraint: Constraint) -> Self {
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
        self
    }

    /// Conjunction. Dimensions of `other` not already present are appended.
    pub fn and(mut self, other: &Domain) -> Self {
        for var in &other.vars {
            if !self.vars.contains(var) {
                self.vars.push(var.clone());
            }
        }
        for c in &other.constraints {
            self = self.add_constraint(c.clone());
        }
        self
    }

    pub fn vars(&self) -> &[Name] {
        &self.vars
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Symbolic parameters referenced by the constraints, in order.
    pub fn params(&self) -> Vec<Name> {
        let mut out: Vec<Name> = Vec::new();
        for c in &self.constraints {
            for (name, _) in c.0.terms() {
                if !self.vars.contains(name) && !out.contains(name) {
                    out.push(name.clone());
                }
            }
        }
        out
    }

    /// Point membership. `None` if a referenced name is unbound.
    pub fn contains(&self, lookup: &impl Fn(&str) -> Option<i64>) -> Option<bool> {
        let mut all = true;
        for c in &self.constraints {
            all &= c.holds(lookup)?;
        }
        Some(all)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self.params();
        if !params.is_empty() {
            write!(f, "[")?;
            for (i, p) in params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", p)?;
            }
            write!(f, "] -> ")?;
        }
        write!(f, "{{ [")?;
        for (i, v) in self.vars.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")?;
        for (i, c) in self.constraints.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { " : " } else { " and " }, c)?;
        }
        write!(f, " }}")
    }
}
