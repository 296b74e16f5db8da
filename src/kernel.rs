//! Finalization: lowering a plan into a [`Kernel`].
//!
//! The assembler walks the rule registry once, in registration order. At
//! each index it first flushes the implicit assignments queued there, then
//! materializes the rule if it was requested as an output, and finally
//! records the rule rewritten against the backing entries visible at that
//! point. Later materializations never leak into earlier rules.

use crate::array::Array;
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::names::{Name, NameKind};
use crate::rewrite::RuleToLoad;
use crate::rule::SubstitutionRule;
use crate::shape::{DType, Shape};
use crate::stack::StackState;
use rustc_hash::FxHashMap;
use std::fmt;
use tracing::{debug, trace};

/// A store `assignee = expression`, executed for every point of the
/// domains bounding `within`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Assignment {
    pub assignee: Expr,
    pub expression: Expr,
    /// Bound index variables the statement iterates over.
    pub within: Vec<Name>,
}

impl Assignment {
    pub fn new(assignee: Expr, expression: Expr, within: Vec<Name>) -> Self {
        Assignment {
            assignee,
            expression,
            within,
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.assignee, self.expression)
    }
}

/// How an array enters the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArrayRole {
    /// Supplied by the caller.
    Input,
    /// Written by the kernel, not requested.
    Temporary,
    /// Holds a requested output.
    Output,
}

impl fmt::Display for ArrayRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayRole::Input => write!(f, "input"),
            ArrayRole::Temporary => write!(f, "temporary"),
            ArrayRole::Output => write!(f, "output"),
        }
    }
}

/// Declaration of a concrete array.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArrayDecl {
    pub name: Name,
    pub shape: Shape,
    pub dtype: DType,
    pub role: ArrayRole,
}

impl ArrayDecl {
    pub fn new(name: Name, shape: Shape, dtype: DType, role: ArrayRole) -> Self {
        ArrayDecl {
            name,
            shape,
            dtype,
            role,
        }
    }
}

impl fmt::Display for ArrayDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}{}", self.role, self.name, self.dtype, self.shape)
    }
}

/// A requested output and the array that holds its values.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutputBinding {
    pub rule: Name,
    pub array: Name,
}

/// The lowered plan handed to a code generator.
#[derive(Clone, Debug)]
pub struct Kernel {
    pub domains: Vec<Domain>,
    pub statements: Vec<Assignment>,
    pub arrays: Vec<ArrayDecl>,
    /// Every rule, in registration order, with backed calls rewritten.
    pub rules: Vec<SubstitutionRule>,
    /// One binding per requested output, in request order.
    pub outputs: Vec<OutputBinding>,
    /// Realized output name to the bound variables indexing its store.
    pub transform_info: Option<FxHashMap<Name, Vec<Name>>>,
}

impl Kernel {
    pub fn rule(&self, name: &str) -> Option<&SubstitutionRule> {
        self.rules.iter().find(|r| &*r.name == name)
    }

    pub fn array(&self, name: &str) -> Option<&ArrayDecl> {
        self.arrays.iter().find(|a| &*a.name == name)
    }

    /// The array holding the values of `handle`, if it was requested.
    pub fn output_array(&self, handle: &Array) -> Option<&Name> {
        self.outputs
            .iter()
            .find(|o| &o.rule == handle.name())
            .map(|o| &o.array)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ArrayDecl> {
        self.arrays.iter().filter(|a| a.role == ArrayRole::Input)
    }

    /// Symbolic parameters referenced by domains or array shapes.
    pub fn params(&self) -> Vec<Name> {
        let mut out: Vec<Name> = Vec::new();
        let found = self
            .domains
            .iter()
            .flat_map(Domain::params)
            .chain(self.arrays.iter().flat_map(|a| a.shape.params()));
        for p in found {
            if !out.contains(&p) {
                out.push(p);
            }
        }
        out
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---- ARGUMENTS")?;
        for a in &self.arrays {
            writeln!(f, "{}", a)?;
        }
        writeln!(f, "---- DOMAINS")?;
        for d in &self.domains {
            writeln!(f, "{}", d)?;
        }
        writeln!(f, "---- SUBSTITUTIONS")?;
        for r in &self.rules {
            writeln!(f, "{}", r)?;
        }
        writeln!(f, "---- INSTRUCTIONS")?;
        for s in &self.statements {
            write!(f, "for [")?;
            for (i, v) in s.within.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", v)?;
            }
            writeln!(f, "] {}", s)?;
        }
        Ok(())
    }
}

/// Single ordered pass over the registry. Marks the stack finalized.
pub(crate) fn assemble(
    state: &mut StackState,
    outputs: &[&Array],
    transform_info: bool,
) -> Result<Kernel> {
    let mut requested: FxHashMap<Name, &Array> = FxHashMap::default();
    for &handle in outputs {
        if !state.rules.contains(handle.name()) {
            return Err(Error::NameLookup(handle.name().to_string()));
        }
        if !state.backing.contains(handle.name()) {
            requested.insert(handle.name().clone(), handle);
        }
    }
    debug!(
        rules = state.rules.len(),
        materialize = requested.len(),
        "assembling kernel"
    );

    let mut backing = state.backing.clone();
    let mut implicit = std::mem::take(&mut state.implicit);
    let mut domains = state.domains.clone();
    let mut arrays = state.data.clone();
    let mut statements = Vec::new();
    let mut rules = Vec::with_capacity(state.rules.len());
    let mut info: FxHashMap<Name, Vec<Name>> = FxHashMap::default();

    for (i, rule) in state.rules.iter().enumerate() {
        let rewriter = RuleToLoad::new(&backing, i);
        for insn in implicit.remove(&i).unwrap_or_default() {
            statements.push(rewriter.rewrite_assignment(&insn));
        }
        rules.push(rewriter.rewrite_rule(rule));

        let Some(handle) = requested.get(&rule.name) else {
            continue;
        };
        let array = state.names.fresh(NameKind::Array);
        let shape = handle.shape().clone();
        let (store, vars) = if shape.is_unit() {
            let args = vec![Expr::int(0); rule.arity()];
            (
                Assignment::new(
                    Expr::subscript(&array, vec![Expr::int(0)]),
                    Expr::call(&rule.name, args),
                    Vec::new(),
                ),
                Vec::new(),
            )
        } else {
            let vars = state.names.fresh_indices(shape.rank());
            domains.push(Domain::rectangular(vars.iter().zip(shape.dims())));
            (
                Assignment::new(
                    Expr::subscript(&array, Expr::vars(&vars)),
                    Expr::call(&rule.name, Expr::vars(&vars)),
                    vars.clone(),
                ),
                vars,
            )
        };
        trace!(rule = %rule.name, array = %array, index = i, "materializing output");
        statements.push(rewriter.rewrite_assignment(&store));
        arrays.push(ArrayDecl::new(
            array.clone(),
            shape,
            handle.dtype(),
            ArrayRole::Output,
        ));
        info.insert(rule.name.clone(), vars);
        backing.insert(&rule.name, &array, i + 1);
    }

    let end = state.rules.len();
    let rewriter = RuleToLoad::new(&backing, end);
    for insn in implicit.remove(&end).unwrap_or_default() {
        statements.push(rewriter.rewrite_assignment(&insn));
    }

    let mut bound = Vec::with_capacity(outputs.len());
    for &handle in outputs {
        let array = backing
            .get(handle.name())
            .cloned()
            .ok_or_else(|| Error::NameLookup(handle.name().to_string()))?;
        let binding = OutputBinding {
            rule: handle.name().clone(),
            array,
        };
        if !bound.contains(&binding) {
            bound.push(binding);
        }
    }

    state.backing = backing;
    state.finalized = true;
    debug!(statements = statements.len(), "kernel assembled");

    Ok(Kernel {
        domains,
        statements,
        arrays,
        rules,
        outputs: bound,
        transform_info: transform_info.then_some(info),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Order;
    use crate::stack::Stack;
    use crate::testing::Interpreter;
    use crate::Index;

    #[test]
    fn test_axpy_values() {
        let stack = Stack::new();
        let a = stack.ones(10, DType::Float64).unwrap();
        let b = stack.input(10, DType::Float64).unwrap();
        let out = a.mul(2.0).unwrap().add(&b.mul(3.0).unwrap()).unwrap();
        let kernel = stack.finalize(&[&out], false).unwrap();

        let input = stack.backing_array(b.name()).unwrap();
        let mut run = Interpreter::new(&kernel);
        run.bind_input(&input, (0..10).map(f64::from).collect());
        run.execute().unwrap();

        let values = run.array(kernel.output_array(&out).unwrap());
        let expected: Vec<f64> = (0..10).map(|k| 2.0 + 3.0 * f64::from(k)).collect();
        assert_eq!(values, expected.as_slice());
        assert_eq!(kernel.array(kernel.output_array(&out).unwrap()).unwrap().shape, Shape::fixed(&[10]).unwrap());
    }

    #[test]
    fn test_output_is_declared_and_bound() {
        let stack = Stack::new();
        let a = stack.ones([2, 3], DType::Float32).unwrap();
        let kernel = stack.finalize(&[&a], true).unwrap();

        let array = kernel.output_array(&a).unwrap();
        let decl = kernel.array(array).unwrap();
        assert_eq!(decl.role, ArrayRole::Output);
        assert_eq!(decl.dtype, DType::Float32);
        assert_eq!(decl.shape, Shape::fixed(&[2, 3]).unwrap());

        let info = kernel.transform_info.as_ref().unwrap();
        assert_eq!(info[a.name()].len(), 2);
        assert_eq!(kernel.statements.len(), 1);
        assert_eq!(kernel.domains.len(), 1);
    }

    #[test]
    fn test_scalar_output_store() {
        let stack = Stack::new();
        let x = stack.ones([3, 3], DType::Float64).unwrap();
        let total = x.sum(None).unwrap();
        let kernel = stack.finalize(&[&total], true).unwrap();

        let store = kernel.statements.last().unwrap();
        assert!(store.within.is_empty());
        assert_eq!(store.to_string(), format!("{}[0] = {}()", kernel.outputs[0].array, total.name()));
        assert!(kernel.transform_info.unwrap()[total.name()].is_empty());

        let stack = Stack::new();
        let x = stack.ones([3, 3], DType::Float64).unwrap();
        let total = x.sum(None).unwrap();
        let kernel = stack.finalize(&[&total], false).unwrap();
        let mut run = Interpreter::new(&kernel);
        run.execute().unwrap();
        assert_eq!(run.array(&kernel.outputs[0].array), &[9.0]);
    }

    #[test]
    fn test_later_rules_load_materialized_outputs() {
        let stack = Stack::new();
        let x = stack.input(4, DType::Float64).unwrap();
        let r1 = x.add(1.0).unwrap();
        let r2 = r1.mul(2.0).unwrap();
        let kernel = stack.finalize(&[&r1], false).unwrap();

        let array = kernel.output_array(&r1).unwrap().clone();
        let body = &kernel.rule(r2.name()).unwrap().body;
        assert!(body.loads().contains(&array));
        assert!(!body.calls().contains(r1.name()));

        // r1 itself is recorded as before: it only reads the input.
        let first = &kernel.rule(r1.name()).unwrap().body;
        assert!(!first.loads().contains(&array));
    }

    #[test]
    fn test_earlier_rules_never_see_later_backing() {
        let stack = Stack::new();
        let a = stack.ones(4, DType::Float64).unwrap();
        let b = a.add(1.0).unwrap();
        let kernel = stack.finalize(&[&b, &a], false).unwrap();

        // a is requested too, but a's own body and the statement storing it
        // precede its materialization.
        let a_arr = kernel.output_array(&a).unwrap();
        let b_body = &kernel.rule(b.name()).unwrap().body;
        assert!(b_body.loads().contains(a_arr));
        let a_store = &kernel.statements[0];
        assert!(a_store.expression.calls().contains(a.name()));
    }

    #[test]
    fn test_finalize_is_one_shot() {
        let stack = Stack::new();
        let a = stack.ones(2, DType::Float64).unwrap();
        stack.finalize(&[&a], false).unwrap();
        assert!(stack.is_finalized());
        assert!(matches!(stack.finalize(&[&a], false), Err(Error::Finalized)));
        assert!(matches!(stack.ones(2, DType::Float64), Err(Error::Finalized)));
        assert!(matches!(a.add(1.0), Err(Error::Finalized)));
    }

    #[test]
    fn test_backed_outputs_are_not_copied() {
        let stack = Stack::new();
        let x = stack.input(5, DType::Float64).unwrap();
        let c = x.cumsum().unwrap();
        let kernel = stack.finalize(&[&x, &c], false).unwrap();
        assert_eq!(
            kernel.output_array(&x),
            stack.backing_array(x.name()).as_ref()
        );
        assert!(kernel.arrays.iter().all(|a| a.role != ArrayRole::Output));
        assert_eq!(kernel.statements.len(), 1);
    }

    #[test]
    fn test_cumulative_sum_values() {
        let stack = Stack::new();
        let x = stack.arange(5).unwrap();
        let c = x.cumsum().unwrap();
        let d = c.mul(2).unwrap();
        let kernel = stack.finalize(&[&d], false).unwrap();

        let mut run = Interpreter::new(&kernel);
        run.execute().unwrap();
        assert_eq!(
            run.array(kernel.output_array(&d).unwrap()),
            &[0.0, 2.0, 6.0, 12.0, 20.0]
        );
    }

    #[test]
    fn test_scatter_through_gather_indices() {
        let stack = Stack::new();
        let x = stack.input([4, 2], DType::Float64).unwrap();
        let perm = stack.input(4, DType::Int64).unwrap();
        let mut x_new = stack.zeros([4, 2], DType::Float64).unwrap();
        let before = x_new.name().clone();

        x_new
            .assign(&[Index::Gather(perm.clone()), Index::Full], &x)
            .unwrap();

        let array = stack.backing_array(&before).unwrap();
        let entry = stack.backing_visible_from(&before).unwrap();
        let queued: Vec<usize> = stack.implicit_assignments().iter().map(|(k, _)| *k).collect();
        assert!(queued.iter().all(|&k| k < entry));
        assert_eq!(stack.backing_array(x_new.name()), Some(array.clone()));

        let kernel = stack.finalize(&[&x_new], false).unwrap();
        assert_eq!(kernel.output_array(&x_new), Some(&array));

        let x_data: Vec<f64> = (0..8).map(f64::from).collect();
        let order = [2.0, 0.0, 3.0, 1.0];
        let mut run = Interpreter::new(&kernel);
        run.bind_input(&stack.backing_array(x.name()).unwrap(), x_data.clone());
        run.bind_input(&stack.backing_array(perm.name()).unwrap(), order.to_vec());
        run.execute().unwrap();

        let out = run.array(&array);
        for r in 0..4 {
            let dest = order[r] as usize;
            assert_eq!(&out[dest * 2..dest * 2 + 2], &x_data[r * 2..r * 2 + 2]);
        }
    }

    #[test]
    fn test_reads_after_write_see_the_write() {
        let stack = Stack::new();
        let mut a = stack.zeros(4, DType::Float64).unwrap();
        let untouched = a.add(1.0).unwrap();
        a.assign(&[Index::At(2)], 5.0).unwrap();
        let touched = a.add(1.0).unwrap();
        let kernel = stack.finalize(&[&untouched, &touched], false).unwrap();

        let mut run = Interpreter::new(&kernel);
        run.execute().unwrap();
        assert_eq!(
            run.array(kernel.output_array(&untouched).unwrap()),
            &[1.0, 1.0, 1.0, 1.0]
        );
        assert_eq!(
            run.array(kernel.output_array(&touched).unwrap()),
            &[1.0, 1.0, 6.0, 1.0]
        );
    }

    #[test]
    fn test_last_write_wins() {
        let stack = Stack::new();
        let mut a = stack.zeros(3, DType::Float64).unwrap();
        a.assign(&[Index::Full], 1.0).unwrap();
        a.assign(&[Index::At(1)], 7.0).unwrap();
        let kernel = stack.finalize(&[&a], false).unwrap();

        let mut run = Interpreter::new(&kernel);
        run.execute().unwrap();
        assert_eq!(run.array(kernel.output_array(&a).unwrap()), &[1.0, 7.0, 1.0]);
    }

    #[test]
    fn test_reshape_round_trip_values() {
        let stack = Stack::new();
        let x = stack.input([2, 3, 4], DType::Float64).unwrap();
        let f = x.reshape([4, 6], Order::ColumnMajor).unwrap();
        let back = f.reshape([2, 3, 4], Order::RowMajor).unwrap();
        let kernel = stack.finalize(&[&back, &f], false).unwrap();

        let data: Vec<f64> = (0..24).map(f64::from).collect();
        let mut run = Interpreter::new(&kernel);
        run.bind_input(&stack.backing_array(x.name()).unwrap(), data.clone());
        run.execute().unwrap();
        assert_eq!(run.array(kernel.output_array(&back).unwrap()), data.as_slice());
    }

    #[test]
    fn test_display_sections() {
        let stack = Stack::new();
        let a = stack.input_named("a", 3, DType::Float64).unwrap();
        let b = a.add(1.0).unwrap();
        let kernel = stack.finalize(&[&b], false).unwrap();
        let text = kernel.to_string();
        assert!(text.contains("input a: float64(3,)"));
        assert!(text.contains("subst0(i0) := a[i0]"));
        assert!(text.contains("for [i2] arr0[i2] = subst1(i2)"));
    }

    #[test]
    fn test_params_collects_symbolic_extents() {
        let stack = Stack::new();
        let x = stack
            .input(vec![crate::Extent::param("n")], DType::Float64)
            .unwrap();
        let y = x.mul(2.0).unwrap();
        let kernel = stack.finalize(&[&y], false).unwrap();
        assert_eq!(kernel.params(), vec![Name::from("n")]);
    }
}
