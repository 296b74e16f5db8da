//! The plan builder.
//!
//! A [`Stack`] owns every piece of mutable plan state: the name allocator,
//! the rule registry, the domain list, the backing map and the queue of
//! implicit assignments. [`Array`] handles only carry a name and a shared
//! reference back to their stack.

use crate::array::Array;
use crate::backing::BackingMap;
use crate::domain::{AffineExpr, Constraint, Domain};
use crate::error::{Error, Result};
use crate::expr::{Expr, Literal};
use crate::kernel::{self, ArrayDecl, ArrayRole, Assignment, Kernel};
use crate::names::{Name, NameAllocator, NameKind};
use crate::rule::{RuleRegistry, SubstitutionRule};
use crate::shape::{DType, Extent, IntoShape, Order, Shape};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, instrument};

/// Configuration for a stack.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Prefix of generated bound index variables.
    pub index_prefix: String,
    /// Prefix of generated substitution rules.
    pub rule_prefix: String,
    /// Prefix of generated arrays.
    pub array_prefix: String,
    /// Element type used by fills when none is given.
    pub default_dtype: DType,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            index_prefix: "i".to_string(),
            rule_prefix: "subst".to_string(),
            array_prefix: "arr".to_string(),
            default_dtype: DType::Float64,
        }
    }
}

/// Counts describing the state of a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackStats {
    pub rules: usize,
    pub domains: usize,
    pub implicit_assignments: usize,
    pub backed: usize,
    pub arrays: usize,
}

/// Implicit assignments keyed by the registry length at which they were
/// queued.
pub(crate) type ImplicitQueue = BTreeMap<usize, Vec<Assignment>>;

pub(crate) struct StackState {
    pub(crate) config: StackConfig,
    pub(crate) names: NameAllocator,
    pub(crate) rules: RuleRegistry,
    pub(crate) domains: Vec<Domain>,
    pub(crate) backing: BackingMap,
    pub(crate) implicit: ImplicitQueue,
    pub(crate) data: Vec<ArrayDecl>,
    pub(crate) finalized: bool,
}

impl StackState {
    fn new(config: StackConfig) -> Self {
        let names = NameAllocator::new(
            &config.index_prefix,
            &config.rule_prefix,
            &config.array_prefix,
        );
        StackState {
            config,
            names,
            rules: RuleRegistry::new(),
            domains: Vec::new(),
            backing: BackingMap::new(),
            implicit: ImplicitQueue::new(),
            data: Vec::new(),
            finalized: false,
        }
    }

    pub(crate) fn fresh(&mut self, kind: NameKind) -> Name {
        self.names.fresh(kind)
    }

    pub(crate) fn fresh_indices(&mut self, n: usize) -> Vec<Name> {
        self.names.fresh_indices(n)
    }

    pub(crate) fn register_rule(&mut self, rule: SubstitutionRule) -> Result<usize> {
        debug!(rule = %rule.name, arity = rule.arity(), "registering substitution");
        self.rules.push(rule)
    }

    pub(crate) fn register_domain(&mut self, domain: Domain) {
        if domain.is_empty() {
            return;
        }
        debug!(domain = %domain, "registering domain");
        self.domains.push(domain);
    }

    /// Queue a statement at the current registry length.
    pub(crate) fn register_implicit(&mut self, insn: Assignment) {
        let index = self.rules.len();
        debug!(index, statement = %insn, "queueing implicit assignment");
        self.implicit.entry(index).or_default().push(insn);
    }

    pub(crate) fn declare(&mut self, decl: ArrayDecl) {
        debug!(array = %decl.name, role = ?decl.role, "declaring array");
        self.data.push(decl);
    }

    /// Back `rule` with `array` for every statement flushed after the rules
    /// registered so far.
    pub(crate) fn back(&mut self, rule: &Name, array: &Name) {
        let visible_from = self.rules.len();
        if self.backing.insert(rule, array, visible_from) {
            debug!(rule = %rule, array = %array, visible_from, "backing entry");
        }
    }

    /// Invoke `name` over `vars`, adapting to scalar rules.
    pub(crate) fn call(&self, name: &Name, vars: &[Name]) -> Result<Expr> {
        self.call_with(name, Expr::vars(vars))
    }

    /// Invoke `name` with explicit argument expressions. Scalar rules take no
    /// arguments regardless of the caller's rank.
    pub(crate) fn call_with(&self, name: &Name, args: Vec<Expr>) -> Result<Expr> {
        let arity = self.rules.arity(name)?;
        if arity == 0 {
            return Ok(Expr::call(name, Vec::new()));
        }
        if arity != args.len() {
            return Err(Error::index(format!(
                "`{}` takes {} indices, got {}",
                name,
                arity,
                args.len()
            )));
        }
        Ok(Expr::call(name, args))
    }

    /// Invoke `name` as a single element: no arguments for a scalar rule,
    /// otherwise zeros.
    pub(crate) fn call_scalar(&self, name: &Name) -> Result<Expr> {
        let arity = self.rules.arity(name)?;
        Ok(Expr::call(name, vec![Expr::int(0); arity]))
    }

    /// Register `name(params) := body` under a fresh name.
    pub(crate) fn define(&mut self, params: Vec<Name>, body: Expr) -> Result<Name> {
        let name = self.fresh(NameKind::Rule);
        self.register_rule(SubstitutionRule::new(name.clone(), params, body))?;
        Ok(name)
    }

    pub(crate) fn stats(&self) -> StackStats {
        StackStats {
            rules: self.rules.len(),
            domains: self.domains.len(),
            implicit_assignments: self.implicit.values().map(Vec::len).sum(),
            backed: self.backing.len(),
            arrays: self.data.len(),
        }
    }
}

/// Shared, single-threaded plan builder.
///
/// Cloning a `Stack` yields another reference to the same plan.
#[derive(Clone)]
pub struct Stack {
    state: Rc<RefCell<StackState>>,
}

impl Stack {
    /// Create an empty stack with default configuration.
    pub fn new() -> Self {
        Stack::with_config(StackConfig::default())
    }

    pub fn with_config(config: StackConfig) -> Self {
        Stack {
            state: Rc::new(RefCell::new(StackState::new(config))),
        }
    }

    pub fn builder() -> StackBuilder {
        StackBuilder::new()
    }

    pub(crate) fn state(&self) -> Ref<'_, StackState> {
        self.state.borrow()
    }

    /// Mutable state of an unfinalized stack.
    pub(crate) fn state_mut(&self) -> Result<RefMut<'_, StackState>> {
        let state = self.state.borrow_mut();
        if state.finalized {
            return Err(Error::Finalized);
        }
        Ok(state)
    }

    /// Check if both values refer to the same plan.
    pub fn same_as(&self, other: &Stack) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    pub(crate) fn check_owner(&self, array: &Array) -> Result<()> {
        if self.same_as(array.stack()) {
            Ok(())
        } else {
            Err(Error::ForeignArray(array.name().to_string()))
        }
    }

    pub fn config(&self) -> StackConfig {
        self.state().config.clone()
    }

    pub fn stats(&self) -> StackStats {
        self.state().stats()
    }

    pub fn is_finalized(&self) -> bool {
        self.state().finalized
    }

    /// Registered rules, in registration order.
    pub fn rules(&self) -> Vec<SubstitutionRule> {
        self.state().rules.iter().cloned().collect()
    }

    pub fn rule(&self, name: &str) -> Result<SubstitutionRule> {
        self.state().rules.get(name).cloned()
    }

    pub fn domains(&self) -> Vec<Domain> {
        self.state().domains.clone()
    }

    /// Queued implicit assignments with their registration indices.
    pub fn implicit_assignments(&self) -> Vec<(usize, Assignment)> {
        self.state()
            .implicit
            .iter()
            .flat_map(|(&k, insns)| insns.iter().map(move |insn| (k, insn.clone())))
            .collect()
    }

    /// Declared input and intermediate arrays.
    pub fn arrays(&self) -> Vec<ArrayDecl> {
        self.state().data.clone()
    }

    /// The array currently backing `name`, if any.
    pub fn backing_array(&self, name: &str) -> Option<Name> {
        self.state().backing.get(name).cloned()
    }

    /// Registration index from which the backing entry of `name` applies.
    pub fn backing_visible_from(&self, name: &str) -> Option<usize> {
        self.state().backing.entry(name).map(|e| e.visible_from)
    }

    /// Fill `shape` with `value`.
    pub fn full(
        &self,
        shape: impl IntoShape,
        value: impl Into<Literal>,
        dtype: DType,
    ) -> Result<Array> {
        let shape = shape.into_shape()?;
        let value = coerce_literal(value.into(), dtype)?;
        let mut state = self.state_mut()?;
        let vars = state.fresh_indices(shape.rank());
        let name = state.define(vars, value.to_expr())?;
        drop(state);
        Ok(Array::new(self.clone(), name, shape, dtype, Order::default()))
    }

    /// Fill with the configured default dtype.
    pub fn constant_fill(&self, shape: impl IntoShape, value: impl Into<Literal>) -> Result<Array> {
        let dtype = self.state().config.default_dtype;
        self.full(shape, value, dtype)
    }

    pub fn zeros(&self, shape: impl IntoShape, dtype: DType) -> Result<Array> {
        self.full(shape, 0, dtype)
    }

    pub fn ones(&self, shape: impl IntoShape, dtype: DType) -> Result<Array> {
        self.full(shape, 1, dtype)
    }

    /// `0, 1, .., stop - 1` as `Int64`.
    pub fn arange(&self, stop: impl Into<Extent>) -> Result<Array> {
        let shape = Shape::new([stop.into()])?;
        let mut state = self.state_mut()?;
        let vars = state.fresh_indices(1);
        let body = Expr::var(&vars[0]);
        let name = state.define(vars, body)?;
        drop(state);
        Ok(Array::new(self.clone(), name, shape, DType::Int64, Order::default()))
    }

    /// Declare an externally supplied array with a generated name.
    pub fn input(&self, shape: impl IntoShape, dtype: DType) -> Result<Array> {
        let shape = shape.into_shape()?;
        let mut state = self.state_mut()?;
        let array = state.fresh(NameKind::Array);
        drop(state);
        self.declare_input(array, shape, dtype)
    }

    /// Declare an externally supplied array called `name`.
    pub fn input_named(&self, name: &str, shape: impl IntoShape, dtype: DType) -> Result<Array> {
        let shape = shape.into_shape()?;
        let array = self.state_mut()?.names.reserve(name)?;
        self.declare_input(array, shape, dtype)
    }

    fn declare_input(&self, array: Name, shape: Shape, dtype: DType) -> Result<Array> {
        let mut state = self.state_mut()?;
        let vars = state.fresh_indices(shape.rank());
        let body = Expr::subscript(&array, Expr::vars(&vars));
        let name = state.define(vars, body)?;
        state.declare(ArrayDecl::new(array.clone(), shape.clone(), dtype, ArrayRole::Input));
        state.back(&name, &array);
        drop(state);
        Ok(Array::new(self.clone(), name, shape, dtype, Order::default()))
    }

    /// Sum over `axes`, or over every axis when `axes` is `None`.
    pub fn reduce_sum(&self, source: &Array, axes: Option<&[usize]>) -> Result<Array> {
        self.check_owner(source)?;
        let rank = source.shape().rank();
        let mut reduced = vec![axes.is_none(); rank];
        for &axis in axes.unwrap_or(&[]) {
            if axis >= rank {
                return Err(Error::shape(format!(
                    "axis {} out of range for shape {}",
                    axis,
                    source.shape()
                )));
            }
            reduced[axis] = true;
        }

        let mut state = self.state_mut()?;
        let vars = state.fresh_indices(rank);
        state.register_domain(Domain::rectangular(vars.iter().zip(source.shape().dims())));

        let mut kept = Vec::new();
        let mut summed = Vec::new();
        let mut dims = Vec::new();
        for (k, var) in vars.iter().enumerate() {
            if reduced[k] {
                summed.push(var.clone());
            } else {
                kept.push(var.clone());
                dims.push(source.shape()[k].clone());
            }
        }
        let call = state.call(source.name(), &vars)?;
        let body = if summed.is_empty() {
            call
        } else {
            Expr::sum(summed, call)
        };
        let shape = if dims.is_empty() {
            Shape::unit()
        } else {
            Shape::new(dims)?
        };
        let name = state.define(kept, body)?;
        drop(state);
        Ok(Array::new(self.clone(), name, shape, source.dtype(), Order::default()))
    }

    /// Inclusive prefix sum of a rank-1 array, materialized eagerly.
    pub fn cumulative_sum(&self, source: &Array) -> Result<Array> {
        self.check_owner(source)?;
        if source.shape().rank() != 1 {
            return Err(Error::shape(format!(
                "cumulative sum needs a rank-1 array, got shape {}",
                source.shape()
            )));
        }
        let extent = &source.shape()[0];

        let mut state = self.state_mut()?;
        let (i, j) = (state.fresh(NameKind::Index), state.fresh(NameKind::Index));
        let triangle = Domain::universe(vec![i.clone(), j.clone()])
            .slab(&i, 0, extent)
            .add_constraint(Constraint::le(AffineExpr::constant(0), AffineExpr::var(&j)))
            .add_constraint(Constraint::le(AffineExpr::var(&j), AffineExpr::var(&i)));

        let array = state.fresh(NameKind::Array);
        let body = Expr::sum(vec![j.clone()], state.call(source.name(), &[j])?);
        state.register_implicit(Assignment::new(
            Expr::subscript(&array, vec![Expr::var(&i)]),
            body,
            vec![i],
        ));
        state.register_domain(triangle);
        state.declare(ArrayDecl::new(
            array.clone(),
            source.shape().clone(),
            source.dtype(),
            ArrayRole::Temporary,
        ));

        let t = state.fresh_indices(1);
        let load = Expr::subscript(&array, Expr::vars(&t));
        let name = state.define(t, load)?;
        state.back(&name, &array);
        drop(state);
        Ok(Array::new(
            self.clone(),
            name,
            source.shape().clone(),
            source.dtype(),
            Order::default(),
        ))
    }

    /// Lower the plan for `outputs` into a [`Kernel`]. The stack cannot be
    /// extended afterwards.
    #[instrument(skip_all, fields(outputs = outputs.len()))]
    pub fn finalize(&self, outputs: &[&Array], transform_info: bool) -> Result<Kernel> {
        for array in outputs {
            self.check_owner(array)?;
        }
        let mut state = self.state_mut()?;
        kernel::assemble(&mut state, outputs, transform_info)
    }
}

impl Default for Stack {
    fn default() -> Self {
        Stack::new()
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack").field("stats", &self.stats()).finish()
    }
}

/// Cast a fill value to `dtype`.
pub(crate) fn coerce_literal(value: Literal, dtype: DType) -> Result<Literal> {
    match (value, dtype.is_integer()) {
        (Literal::Float(x), true) if value.is_integral() => Ok(Literal::Int(x as i64)),
        (Literal::Float(x), true) => Err(Error::type_error(format!(
            "cannot store {} in an array of {}",
            x, dtype
        ))),
        (Literal::Int(n), false) => Ok(Literal::Float(n as f64)),
        (v, _) => Ok(v),
    }
}

/// Builder for creating stacks.
#[derive(Debug, Clone, Default)]
pub struct StackBuilder {
    config: StackConfig,
}

impl StackBuilder {
    pub fn new() -> Self {
        StackBuilder::default()
    }

    pub fn config(mut self, config: StackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn index_prefix(mut self, prefix: &str) -> Self {
        self.config.index_prefix = prefix.to_string();
        self
    }

    pub fn rule_prefix(mut self, prefix: &str) -> Self {
        self.config.rule_prefix = prefix.to_string();
        self
    }

    pub fn array_prefix(mut self, prefix: &str) -> Self {
        self.config.array_prefix = prefix.to_string();
        self
    }

    pub fn default_dtype(mut self, dtype: DType) -> Self {
        self.config.default_dtype = dtype;
        self
    }

    pub fn build(self) -> Stack {
        Stack::with_config(self.config)
    }
}
