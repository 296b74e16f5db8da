//! Array handles.
//!
//! An [`Array`] is a lightweight name for a value in a plan: the rule (or
//! pass-through rule over a backing array) that computes it, plus its shape,
//! element type and layout order. Every operation registers new state in the
//! owning [`Stack`] and returns a new handle; only [`Array::assign`]
//! changes the handle it is called on.

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::expr::{BinOp, CmpOp, Expr, Literal};
use crate::kernel::{ArrayDecl, ArrayRole, Assignment};
use crate::names::{Name, NameKind};
use crate::shape::{broadcast, DType, Extent, IntoShape, Order, Shape};
use crate::stack::{coerce_literal, Stack, StackState};
use std::fmt;

/// Elementwise operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    fn apply(self, lhs: Expr, rhs: Expr) -> Expr {
        match self {
            Operator::Add => Expr::binary(BinOp::Add, lhs, rhs),
            Operator::Sub => Expr::binary(BinOp::Sub, lhs, rhs),
            Operator::Mul => Expr::binary(BinOp::Mul, lhs, rhs),
            Operator::Div => Expr::binary(BinOp::Div, lhs, rhs),
            Operator::Lt => Expr::compare(CmpOp::Lt, lhs, rhs),
            Operator::Le => Expr::compare(CmpOp::Le, lhs, rhs),
            Operator::Gt => Expr::compare(CmpOp::Gt, lhs, rhs),
            Operator::Ge => Expr::compare(CmpOp::Ge, lhs, rhs),
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge)
    }

    /// Comparisons yield 0/1 integers; arithmetic keeps the left type.
    fn result_dtype(self, left: DType) -> DType {
        if self.is_comparison() {
            DType::Int64
        } else {
            left
        }
    }
}

/// Right-hand side of an elementwise operation or a write.
#[derive(Clone, Debug)]
pub enum Operand {
    Scalar(Literal),
    Array(Array),
}

impl From<Literal> for Operand {
    fn from(lit: Literal) -> Self {
        Operand::Scalar(lit)
    }
}

impl From<f64> for Operand {
    fn from(x: f64) -> Self {
        Operand::Scalar(Literal::Float(x))
    }
}

impl From<i64> for Operand {
    fn from(n: i64) -> Self {
        Operand::Scalar(Literal::Int(n))
    }
}

impl From<i32> for Operand {
    fn from(n: i32) -> Self {
        Operand::Scalar(Literal::from(n))
    }
}

impl From<Array> for Operand {
    fn from(a: Array) -> Self {
        Operand::Array(a)
    }
}

impl From<&Array> for Operand {
    fn from(a: &Array) -> Self {
        Operand::Array(a.clone())
    }
}

/// One entry of an index tuple.
#[derive(Clone, Debug)]
pub enum Index {
    /// A single position.
    At(usize),
    /// The whole axis.
    Full,
    /// A slice. Only the complete form (no start, stop or step) is accepted.
    Range {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
    /// Positions computed by a rank-1 integer array. Writes only.
    Gather(Array),
}

impl Index {
    fn is_complete(&self) -> bool {
        matches!(
            self,
            Index::Full
                | Index::Range {
                    start: None,
                    stop: None,
                    step: None
                }
        )
    }
}

impl From<usize> for Index {
    fn from(k: usize) -> Self {
        Index::At(k)
    }
}

impl From<&Array> for Index {
    fn from(a: &Array) -> Self {
        Index::Gather(a.clone())
    }
}

/// Handle to a lazily computed array.
#[derive(Clone)]
pub struct Array {
    stack: Stack,
    name: Name,
    shape: Shape,
    dtype: DType,
    order: Order,
}

#[allow(clippy::should_implement_trait)]
impl Array {
    pub(crate) fn new(stack: Stack, name: Name, shape: Shape, dtype: DType, order: Order) -> Self {
        Array {
            stack,
            name,
            shape,
            dtype,
            order,
        }
    }

    /// Current rule name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// The array holding this value, if it has been materialized.
    pub fn backing_array(&self) -> Option<Name> {
        self.stack.backing_array(&self.name)
    }

    fn derive(&self, name: Name, shape: Shape, dtype: DType, order: Order) -> Array {
        Array::new(self.stack.clone(), name, shape, dtype, order)
    }

    pub fn add(&self, rhs: impl Into<Operand>) -> Result<Array> {
        self.elementwise(Operator::Add, rhs.into())
    }

    pub fn sub(&self, rhs: impl Into<Operand>) -> Result<Array> {
        self.elementwise(Operator::Sub, rhs.into())
    }

    pub fn mul(&self, rhs: impl Into<Operand>) -> Result<Array> {
        self.elementwise(Operator::Mul, rhs.into())
    }

    pub fn div(&self, rhs: impl Into<Operand>) -> Result<Array> {
        self.elementwise(Operator::Div, rhs.into())
    }

    pub fn lt(&self, rhs: impl Into<Operand>) -> Result<Array> {
        self.elementwise(Operator::Lt, rhs.into())
    }

    pub fn le(&self, rhs: impl Into<Operand>) -> Result<Array> {
        self.elementwise(Operator::Le, rhs.into())
    }

    pub fn gt(&self, rhs: impl Into<Operand>) -> Result<Array> {
        self.elementwise(Operator::Gt, rhs.into())
    }

    pub fn ge(&self, rhs: impl Into<Operand>) -> Result<Array> {
        self.elementwise(Operator::Ge, rhs.into())
    }

    /// `lhs - self`
    pub fn rsub(&self, lhs: impl Into<Literal>) -> Result<Array> {
        self.scalar_op(Operator::Sub, lhs.into(), true)
    }

    /// `lhs / self`
    pub fn rdiv(&self, lhs: impl Into<Literal>) -> Result<Array> {
        self.scalar_op(Operator::Div, lhs.into(), true)
    }

    /// Apply `op` elementwise against a scalar or another array.
    pub fn elementwise(&self, op: Operator, rhs: Operand) -> Result<Array> {
        match rhs {
            Operand::Scalar(lit) => self.scalar_op(op, lit, false),
            Operand::Array(other) => self.array_op(op, &other),
        }
    }

    fn scalar_op(&self, op: Operator, lit: Literal, reversed: bool) -> Result<Array> {
        let mut state = self.stack.state_mut()?;
        let vars = state.fresh_indices(self.rank());
        let call = state.call(&self.name, &vars)?;
        let body = if reversed {
            op.apply(lit.to_expr(), call)
        } else {
            op.apply(call, lit.to_expr())
        };
        let name = state.define(vars, body)?;
        Ok(self.derive(name, self.shape.clone(), op.result_dtype(self.dtype), self.order))
    }

    fn array_op(&self, op: Operator, other: &Array) -> Result<Array> {
        self.stack.check_owner(other)?;
        if self.shape == other.shape {
            let mut state = self.stack.state_mut()?;
            let vars = state.fresh_indices(self.rank());
            let lhs = state.call(&self.name, &vars)?;
            let rhs = state.call(&other.name, &vars)?;
            let name = state.define(vars, op.apply(lhs, rhs))?;
            return Ok(self.derive(name, self.shape.clone(), op.result_dtype(self.dtype), self.order));
        }
        if other.shape.is_unit() || self.shape.is_unit() {
            // The unit operand is read as a single element.
            let (wide, order) = if other.shape.is_unit() {
                (&self.shape, self.order)
            } else {
                (&other.shape, other.order)
            };
            let mut state = self.stack.state_mut()?;
            let vars = state.fresh_indices(wide.rank());
            let (lhs, rhs) = if other.shape.is_unit() {
                (state.call(&self.name, &vars)?, state.call_scalar(&other.name)?)
            } else {
                (state.call_scalar(&self.name)?, state.call(&other.name, &vars)?)
            };
            let name = state.define(vars, op.apply(lhs, rhs))?;
            return Ok(self.derive(name, wide.clone(), op.result_dtype(self.dtype), order));
        }

        let common = broadcast(&self.shape, &other.shape)?;
        let left = self.expand_to(&common)?;
        let right = other.expand_to(&common)?;
        left.array_op(op, &right)
    }

    /// Index-elision rule viewing this array at the broadcast shape `common`.
    fn expand_to(&self, common: &Shape) -> Result<Array> {
        if &self.shape == common {
            return Ok(self.clone());
        }
        let mut state = self.stack.state_mut()?;
        let vars = state.fresh_indices(common.rank());
        let offset = common.rank() - self.rank();
        let args = self
            .shape
            .dims()
            .iter()
            .enumerate()
            .map(|(k, extent)| {
                if extent.is_unit() {
                    Expr::int(0)
                } else {
                    Expr::var(&vars[offset + k])
                }
            })
            .collect();
        let body = state.call_with(&self.name, args)?;
        let name = state.define(vars, body)?;
        Ok(self.derive(name, common.clone(), self.dtype, self.order))
    }

    /// Read `self[index]`. Entries are positions or complete slices.
    pub fn get(&self, index: &[Index]) -> Result<Array> {
        self.check_arity(index)?;
        let mut state = self.stack.state_mut()?;
        let mut args = Vec::with_capacity(index.len());
        let mut params = Vec::new();
        let mut dims = Vec::new();
        for (axis, (idx, extent)) in index.iter().zip(self.shape.dims()).enumerate() {
            match idx {
                Index::At(k) => {
                    check_position(axis, *k, extent)?;
                    args.push(Expr::int(*k as i64));
                }
                Index::Gather(_) => {
                    return Err(Error::index(
                        "array-valued indices are only supported in writes",
                    ));
                }
                _ if idx.is_complete() => {
                    let var = state.fresh(NameKind::Index);
                    args.push(Expr::var(&var));
                    params.push(var);
                    dims.push(extent.clone());
                }
                _ => return Err(Error::index("only complete slices are supported")),
            }
        }
        let shape = if dims.is_empty() {
            Shape::unit()
        } else {
            Shape::new(dims)?
        };
        let body = state.call_with(&self.name, args)?;
        let name = state.define(params, body)?;
        Ok(self.derive(name, shape, self.dtype, Order::default()))
    }

    /// Write `self[index] = value`.
    ///
    /// The first write materializes the current value into a fresh backing
    /// array; afterwards this handle reads from that array, so later reads
    /// through it observe the write. Writes are applied in registration
    /// order, and the last one to touch an element wins.
    pub fn assign(&mut self, index: &[Index], value: impl Into<Operand>) -> Result<()> {
        let value = value.into();
        self.check_arity(index)?;

        let mut extents = Vec::new();
        for (axis, (idx, extent)) in index.iter().zip(self.shape.dims()).enumerate() {
            match idx {
                Index::At(k) => check_position(axis, *k, extent)?,
                Index::Gather(positions) => {
                    self.stack.check_owner(positions)?;
                    if positions.rank() != 1 {
                        return Err(Error::index(format!(
                            "index arrays must be rank 1, got shape {}",
                            positions.shape
                        )));
                    }
                    if !positions.dtype.is_integer() {
                        return Err(Error::type_error(format!(
                            "index arrays must hold integers, got {}",
                            positions.dtype
                        )));
                    }
                    extents.push(positions.shape[0].clone());
                }
                _ if idx.is_complete() => extents.push(extent.clone()),
                _ => return Err(Error::index("only complete slices are supported")),
            }
        }

        let value = match value {
            Operand::Scalar(lit) => Operand::Scalar(coerce_literal(lit, self.dtype)?),
            Operand::Array(v) => {
                self.stack.check_owner(&v)?;
                let fits = if extents.is_empty() {
                    v.shape.is_unit()
                } else {
                    v.shape.is_unit() || v.shape.dims() == extents.as_slice()
                };
                if !fits {
                    return Err(Error::shape(format!(
                        "cannot write a value of shape {} into {} selected axes",
                        v.shape,
                        extents.len()
                    )));
                }
                Operand::Array(v)
            }
        };

        let mut state = self.stack.state_mut()?;
        let existing = state.backing.get(&self.name).cloned();
        let fresh_backing = existing.is_none();
        let array = match existing {
            Some(array) => array,
            None => self.materialize(&mut state)?,
        };

        let vars = state.fresh_indices(extents.len());
        state.register_domain(Domain::rectangular(vars.iter().zip(&extents)));

        let mut free = vars.iter();
        let mut target = Vec::with_capacity(index.len());
        for idx in index {
            let expr = match idx {
                Index::At(k) => Expr::int(*k as i64),
                Index::Gather(positions) => {
                    let var = free.next().ok_or_else(|| Error::index("index arity"))?;
                    state.call(&positions.name, std::slice::from_ref(var))?
                }
                _ => {
                    let var = free.next().ok_or_else(|| Error::index("index arity"))?;
                    Expr::var(var)
                }
            };
            target.push(expr);
        }
        let expression = match &value {
            Operand::Scalar(lit) => lit.to_expr(),
            Operand::Array(v) if v.shape.is_unit() || vars.is_empty() => {
                state.call_scalar(&v.name)?
            }
            Operand::Array(v) => state.call(&v.name, &vars)?,
        };
        state.register_implicit(Assignment::new(
            Expr::subscript(&array, target),
            expression,
            vars,
        ));

        if fresh_backing {
            let params = state.fresh_indices(self.rank());
            let load = Expr::subscript(&array, Expr::vars(&params));
            let passthrough = state.define(params, load)?;
            state.back(&passthrough, &array);
            state.back(&self.name, &array);
            drop(state);
            self.name = passthrough;
        }
        Ok(())
    }

    /// Allocate a backing array and queue the copy of the current value.
    fn materialize(&self, state: &mut StackState) -> Result<Name> {
        let array = state.fresh(NameKind::Array);
        let vars = state.fresh_indices(self.rank());
        let copy = state.call(&self.name, &vars)?;
        state.register_implicit(Assignment::new(
            Expr::subscript(&array, Expr::vars(&vars)),
            copy,
            vars.clone(),
        ));
        state.register_domain(Domain::rectangular(vars.iter().zip(self.shape.dims())));
        state.declare(ArrayDecl::new(
            array.clone(),
            self.shape.clone(),
            self.dtype,
            ArrayRole::Temporary,
        ));
        Ok(array)
    }

    /// View the same elements under `shape`, linearized in `order`.
    pub fn reshape(&self, shape: impl IntoShape, order: Order) -> Result<Array> {
        let shape = shape.into_shape()?;
        let (Some(new_dims), Some(old_dims)) = (shape.fixed_dims(), self.shape.fixed_dims()) else {
            return Err(Error::shape("reshape needs statically known extents"));
        };
        let total: usize = old_dims.iter().product();
        if new_dims.iter().product::<usize>() != total {
            return Err(Error::shape(format!(
                "cannot reshape {} into {}",
                self.shape, shape
            )));
        }

        let mut state = self.stack.state_mut()?;
        let vars = state.fresh_indices(new_dims.len());
        let mut linear: Option<Expr> = None;
        for ((var, &extent), stride) in vars.iter().zip(&new_dims).zip(order.strides(&new_dims)) {
            if extent == 1 {
                continue;
            }
            let term = if stride == 1 {
                Expr::var(var)
            } else {
                Expr::binary(BinOp::Mul, Expr::var(var), Expr::int(stride as i64))
            };
            linear = Some(match linear {
                Some(acc) => Expr::binary(BinOp::Add, acc, term),
                None => term,
            });
        }
        let linear = linear.unwrap_or(Expr::int(0));

        let args = old_dims
            .iter()
            .zip(self.order.strides(&old_dims))
            .map(|(&extent, stride)| {
                if extent == 1 {
                    return Expr::int(0);
                }
                let mut idx = linear.clone();
                if stride != 1 {
                    idx = Expr::binary(BinOp::FloorDiv, idx, Expr::int(stride as i64));
                }
                if stride * extent != total {
                    idx = Expr::binary(BinOp::Rem, idx, Expr::int(extent as i64));
                }
                idx
            })
            .collect();
        let body = state.call_with(&self.name, args)?;
        let name = state.define(vars, body)?;
        Ok(self.derive(name, shape, self.dtype, order))
    }

    /// See [`Stack::reduce_sum`].
    pub fn sum(&self, axes: Option<&[usize]>) -> Result<Array> {
        self.stack.reduce_sum(self, axes)
    }

    /// See [`Stack::cumulative_sum`].
    pub fn cumsum(&self) -> Result<Array> {
        self.stack.cumulative_sum(self)
    }

    fn check_arity(&self, index: &[Index]) -> Result<()> {
        if index.len() != self.rank() {
            return Err(Error::index(format!(
                "expected {} indices for shape {}, got {}",
                self.rank(),
                self.shape,
                index.len()
            )));
        }
        Ok(())
    }
}

fn check_position(axis: usize, k: usize, extent: &Extent) -> Result<()> {
    match extent.fixed() {
        Some(n) if k >= n => Err(Error::index(format!(
            "index {} is out of bounds for axis {} with size {}",
            k, axis, n
        ))),
        _ => Ok(()),
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("order", &self.order)
            .finish()
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{}", self.name, self.dtype, self.shape)
    }
}
