//! Reference interpreter for kernels, used by tests.
//!
//! Executes statements in order on dense row-major `f64` buffers. Rule
//! calls are inlined by binding parameters, and loop bounds are read off
//! the affine constraints of the domain that owns each variable.

use crate::domain::Domain;
use crate::expr::{BinOp, CmpOp, Expr, ReduceOp};
use crate::kernel::Kernel;
use crate::names::Name;
use rustc_hash::FxHashMap;

type Env = FxHashMap<Name, i64>;

struct Buffer {
    dims: Vec<usize>,
    data: Vec<f64>,
}

impl Buffer {
    fn offset(&self, index: &[i64]) -> Result<usize, String> {
        if index.len() != self.dims.len() {
            return Err(format!("rank mismatch: {:?} for {:?}", index, self.dims));
        }
        let mut offset = 0;
        for (&i, &n) in index.iter().zip(&self.dims) {
            if i < 0 || i as usize >= n {
                return Err(format!("index {:?} out of bounds for {:?}", index, self.dims));
            }
            offset = offset * n + i as usize;
        }
        Ok(offset)
    }
}

pub(crate) struct Interpreter<'k> {
    kernel: &'k Kernel,
    params: Env,
    buffers: FxHashMap<Name, Buffer>,
}

impl<'k> Interpreter<'k> {
    pub(crate) fn new(kernel: &'k Kernel) -> Self {
        Interpreter {
            kernel,
            params: Env::default(),
            buffers: FxHashMap::default(),
        }
    }

    pub(crate) fn bind_param(&mut self, name: &str, value: i64) {
        self.params.insert(name.into(), value);
    }

    pub(crate) fn bind_input(&mut self, array: &str, data: Vec<f64>) {
        self.buffers.insert(
            array.into(),
            Buffer {
                dims: vec![data.len()],
                data,
            },
        );
    }

    /// Values of `array` in row-major order.
    pub(crate) fn array(&self, array: &str) -> &[f64] {
        &self.buffers[array].data
    }

    pub(crate) fn execute(&mut self) -> Result<(), String> {
        for decl in &self.kernel.arrays {
            let dims: Vec<usize> = decl
                .shape
                .dims()
                .iter()
                .map(|d| match d.fixed() {
                    Some(n) => Ok(n),
                    None => self
                        .params
                        .get(d.to_string().as_str())
                        .map(|&v| v as usize)
                        .ok_or_else(|| format!("unbound parameter {}", d)),
                })
                .collect::<Result<_, _>>()?;
            let size = dims.iter().product();
            match self.buffers.get_mut(&decl.name) {
                Some(buffer) if buffer.data.len() == size => buffer.dims = dims,
                Some(_) => return Err(format!("input {} has the wrong size", decl.name)),
                None => {
                    self.buffers.insert(
                        decl.name.clone(),
                        Buffer {
                            dims,
                            data: vec![0.0; size],
                        },
                    );
                }
            }
        }

        let kernel = self.kernel;
        for insn in &kernel.statements {
            let mut points = Vec::new();
            self.enumerate(&insn.within, &mut self.params.clone(), &mut points)?;
            for env in points {
                let value = self.eval(&insn.expression, &env)?;
                let Expr::Subscript { array, index } = &insn.assignee else {
                    return Err(format!("cannot store into {}", insn.assignee));
                };
                let index = index
                    .iter()
                    .map(|e| self.eval(e, &env).map(|v| v.round() as i64))
                    .collect::<Result<Vec<_>, _>>()?;
                let buffer = self
                    .buffers
                    .get_mut(array)
                    .ok_or_else(|| format!("unknown array {}", array))?;
                let offset = buffer.offset(&index)?;
                buffer.data[offset] = value;
            }
        }
        Ok(())
    }

    fn domain_of(&self, var: &Name) -> Result<&'k Domain, String> {
        let kernel: &'k Kernel = self.kernel;
        kernel
            .domains
            .iter()
            .find(|d| d.vars().contains(var))
            .ok_or_else(|| format!("no domain bounds {}", var))
    }

    /// All bindings of `vars` (in order) allowed by their domains.
    fn enumerate(&self, vars: &[Name], env: &mut Env, out: &mut Vec<Env>) -> Result<(), String> {
        let Some((var, rest)) = vars.split_first() else {
            out.push(env.clone());
            return Ok(());
        };
        let domain = self.domain_of(var)?;
        let (lo, hi) = bounds(domain, var, env)?;
        for v in lo..=hi {
            env.insert(var.clone(), v);
            let lookup = |n: &str| env.get(n).copied();
            let ok = domain
                .constraints()
                .iter()
                .all(|c| c.holds(&lookup).unwrap_or(true));
            if ok {
                self.enumerate(rest, env, out)?;
            }
        }
        env.remove(var);
        Ok(())
    }

    fn eval(&self, expr: &Expr, env: &Env) -> Result<f64, String> {
        Ok(match expr {
            Expr::Int(n) => *n as f64,
            Expr::Float(x) => x.into_inner(),
            Expr::Var(v) => *env.get(v).ok_or_else(|| format!("unbound {}", v))? as f64,
            Expr::Call { function, args } => {
                let rule = self
                    .kernel
                    .rule(function)
                    .ok_or_else(|| format!("unknown rule {}", function))?;
                if rule.params.len() != args.len() {
                    return Err(format!("arity mismatch calling {}", function));
                }
                let mut inner = self.params.clone();
                for (p, a) in rule.params.iter().zip(args) {
                    inner.insert(p.clone(), self.eval(a, env)?.round() as i64);
                }
                self.eval(&rule.body, &inner)?
            }
            Expr::Subscript { array, index } => {
                let index = index
                    .iter()
                    .map(|e| self.eval(e, env).map(|v| v.round() as i64))
                    .collect::<Result<Vec<_>, _>>()?;
                let buffer = self
                    .buffers
                    .get(array)
                    .ok_or_else(|| format!("unknown array {}", array))?;
                buffer.data[buffer.offset(&index)?]
            }
            Expr::Binary { op, lhs, rhs } => {
                let (a, b) = (self.eval(lhs, env)?, self.eval(rhs, env)?);
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::FloorDiv => (a / b).floor(),
                    BinOp::Rem => a.rem_euclid(b),
                }
            }
            Expr::Compare { op, lhs, rhs } => {
                let (a, b) = (self.eval(lhs, env)?, self.eval(rhs, env)?);
                let holds = match op {
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                };
                if holds {
                    1.0
                } else {
                    0.0
                }
            }
            Expr::Reduce { op, vars, body } => {
                let mut points = Vec::new();
                self.enumerate(vars, &mut env.clone(), &mut points)?;
                match op {
                    ReduceOp::Sum => {
                        let mut total = 0.0;
                        for point in &points {
                            total += self.eval(body, point)?;
                        }
                        total
                    }
                }
            }
        })
    }
}

/// Inclusive bounds of `var` given the bindings in `env`.
fn bounds(domain: &Domain, var: &Name, env: &Env) -> Result<(i64, i64), String> {
    let mut lo: Option<i64> = None;
    let mut hi: Option<i64> = None;
    for c in domain.constraints() {
        let a = c.expr().coefficient(var);
        if a == 0 {
            continue;
        }
        // a * var + rest >= 0
        let mut rest = c.expr().constant_term();
        let mut bound = true;
        for (name, coeff) in c.expr().terms() {
            if name == var {
                continue;
            }
            match env.get(name) {
                Some(v) => rest += coeff * v,
                None => bound = false,
            }
        }
        if !bound {
            continue;
        }
        if a > 0 {
            let l = (-rest).div_euclid(a) + i64::from((-rest).rem_euclid(a) != 0);
            lo = Some(lo.map_or(l, |x| x.max(l)));
        } else {
            let h = rest.div_euclid(-a);
            hi = Some(hi.map_or(h, |x| x.min(h)));
        }
    }
    match (lo, hi) {
        (Some(lo), Some(hi)) => Ok((lo, hi)),
        _ => Err(format!("{} is unbounded in {}", var, domain)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{DType, Extent};
    use crate::stack::Stack;

    #[test]
    fn test_symbolic_extent_binding() {
        let stack = Stack::new();
        let x = stack
            .input(vec![Extent::param("n")], DType::Float64)
            .unwrap();
        let y = x.mul(x.clone()).unwrap();
        let kernel = stack.finalize(&[&y], false).unwrap();

        let mut run = Interpreter::new(&kernel);
        run.bind_param("n", 3);
        run.bind_input(&stack.backing_array(x.name()).unwrap(), vec![1.0, 2.0, 3.0]);
        run.execute().unwrap();
        assert_eq!(run.array(kernel.output_array(&y).unwrap()), &[1.0, 4.0, 9.0]);
    }
}
