//! Python bindings via PyO3.

use crate::{Array, DType, Error, Extent, Index, Kernel, Literal, Operand, Order, Shape, Stack};
use pyo3::basic::CompareOp;
use pyo3::exceptions::{PyIndexError, PyKeyError, PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PySlice, PyTuple};

impl From<Error> for PyErr {
    fn from(err: Error) -> PyErr {
        let msg = err.to_string();
        match err {
            Error::Shape(_) | Error::Broadcast { .. } => PyValueError::new_err(msg),
            Error::Index(_) => PyIndexError::new_err(msg),
            Error::Type(_) | Error::ForeignArray(_) => PyTypeError::new_err(msg),
            Error::NameLookup(_) | Error::DuplicateName(_) => PyKeyError::new_err(msg),
            Error::Finalized => PyRuntimeError::new_err(msg),
        }
    }
}

fn parse_dtype(name: &str) -> PyResult<DType> {
    match name {
        "int32" => Ok(DType::Int32),
        "int64" => Ok(DType::Int64),
        "float32" => Ok(DType::Float32),
        "float64" => Ok(DType::Float64),
        other => Err(PyTypeError::new_err(format!("unsupported dtype {}", other))),
    }
}

fn parse_order(order: &str) -> PyResult<Order> {
    match order {
        "C" => Ok(Order::RowMajor),
        "F" => Ok(Order::ColumnMajor),
        other => Err(PyValueError::new_err(format!("order must be 'C' or 'F', got {}", other))),
    }
}

fn py_to_extent(obj: &PyAny) -> PyResult<Extent> {
    if let Ok(n) = obj.extract::<usize>() {
        return Ok(Extent::Fixed(n));
    }
    if let Ok(s) = obj.extract::<String>() {
        return Ok(Extent::param(&s));
    }
    Err(PyTypeError::new_err(format!(
        "axis lengths must be ints or names, got {}",
        obj.get_type().name()?
    )))
}

fn py_to_shape(obj: &PyAny) -> PyResult<Shape> {
    if let Ok(tuple) = obj.downcast::<PyTuple>() {
        let dims = tuple
            .iter()
            .map(py_to_extent)
            .collect::<PyResult<Vec<_>>>()?;
        return Ok(Shape::new(dims)?);
    }
    Ok(Shape::new([py_to_extent(obj)?])?)
}

fn py_to_literal(obj: &PyAny) -> PyResult<Literal> {
    if let Ok(n) = obj.extract::<i64>() {
        return Ok(Literal::Int(n));
    }
    if let Ok(x) = obj.extract::<f64>() {
        return Ok(Literal::Float(x));
    }
    Err(PyTypeError::new_err(format!(
        "expected a number, got {}",
        obj.get_type().name()?
    )))
}

fn py_to_operand(obj: &PyAny) -> PyResult<Operand> {
    if let Ok(array) = obj.extract::<PyRef<PyArray>>() {
        return Ok(Operand::Array(array.inner.clone()));
    }
    Ok(Operand::Scalar(py_to_literal(obj)?))
}

fn py_to_index(obj: &PyAny) -> PyResult<Index> {
    if let Ok(slice) = obj.downcast::<PySlice>() {
        let part = |attr: &str| -> PyResult<Option<i64>> { slice.getattr(attr)?.extract() };
        return Ok(Index::Range {
            start: part("start")?,
            stop: part("stop")?,
            step: part("step")?,
        });
    }
    if let Ok(array) = obj.extract::<PyRef<PyArray>>() {
        return Ok(Index::Gather(array.inner.clone()));
    }
    if let Ok(k) = obj.extract::<usize>() {
        return Ok(Index::At(k));
    }
    Err(PyIndexError::new_err(format!(
        "unsupported index type {}",
        obj.get_type().name()?
    )))
}

fn py_to_indices(obj: &PyAny) -> PyResult<Vec<Index>> {
    if let Ok(tuple) = obj.downcast::<PyTuple>() {
        return tuple.iter().map(py_to_index).collect();
    }
    Ok(vec![py_to_index(obj)?])
}

/// Python wrapper for Stack.
#[pyclass(name = "Stack", unsendable)]
struct PyStack {
    inner: Stack,
}

#[pymethods]
impl PyStack {
    #[new]
    fn new() -> Self {
        PyStack {
            inner: Stack::new(),
        }
    }

    #[pyo3(signature = (shape, dtype = "float64"))]
    fn zeros(&self, shape: &PyAny, dtype: &str) -> PyResult<PyArray> {
        let array = self.inner.zeros(py_to_shape(shape)?, parse_dtype(dtype)?)?;
        Ok(PyArray { inner: array })
    }

    #[pyo3(signature = (shape, dtype = "float64"))]
    fn ones(&self, shape: &PyAny, dtype: &str) -> PyResult<PyArray> {
        let array = self.inner.ones(py_to_shape(shape)?, parse_dtype(dtype)?)?;
        Ok(PyArray { inner: array })
    }

    #[pyo3(signature = (shape, value, dtype = "float64"))]
    fn full(&self, shape: &PyAny, value: &PyAny, dtype: &str) -> PyResult<PyArray> {
        let array = self
            .inner
            .full(py_to_shape(shape)?, py_to_literal(value)?, parse_dtype(dtype)?)?;
        Ok(PyArray { inner: array })
    }

    fn arange(&self, stop: &PyAny) -> PyResult<PyArray> {
        let array = self.inner.arange(py_to_extent(stop)?)?;
        Ok(PyArray { inner: array })
    }

    /// Declare an input array, optionally with a chosen name.
    #[pyo3(signature = (shape, dtype = "float64", name = None))]
    fn input(&self, shape: &PyAny, dtype: &str, name: Option<&str>) -> PyResult<PyArray> {
        let (shape, dtype) = (py_to_shape(shape)?, parse_dtype(dtype)?);
        let array = match name {
            Some(name) => self.inner.input_named(name, shape, dtype)?,
            None => self.inner.input(shape, dtype)?,
        };
        Ok(PyArray { inner: array })
    }

    #[pyo3(signature = (outputs, transform_info = false))]
    fn finalize(&self, outputs: Vec<PyRef<PyArray>>, transform_info: bool) -> PyResult<PyKernel> {
        let handles: Vec<&Array> = outputs.iter().map(|a| &a.inner).collect();
        let kernel = self.inner.finalize(&handles, transform_info)?;
        Ok(PyKernel { inner: kernel })
    }

    /// Get stack statistics.
    fn stats(&self, py: Python) -> PyResult<PyObject> {
        let stats = self.inner.stats();
        let dict = PyDict::new(py);
        dict.set_item("rules", stats.rules)?;
        dict.set_item("domains", stats.domains)?;
        dict.set_item("implicit_assignments", stats.implicit_assignments)?;
        dict.set_item("backed", stats.backed)?;
        dict.set_item("arrays", stats.arrays)?;
        Ok(dict.into_py(py))
    }

    fn __repr__(&self) -> String {
        format!("{:?}", self.inner)
    }
}

/// Python wrapper for Array.
#[pyclass(name = "Array", unsendable)]
#[derive(Clone)]
struct PyArray {
    inner: Array,
}

impl PyArray {
    fn wrap(inner: crate::Result<Array>) -> PyResult<PyArray> {
        Ok(PyArray { inner: inner? })
    }
}

#[pymethods]
impl PyArray {
    #[getter]
    fn name(&self) -> String {
        self.inner.name().to_string()
    }

    #[getter]
    fn shape(&self, py: Python) -> PyObject {
        let dims: Vec<PyObject> = self
            .inner
            .shape()
            .dims()
            .iter()
            .map(|d| match d {
                Extent::Fixed(n) => (*n).into_py(py),
                Extent::Param(p) => p.as_ref().into_py(py),
            })
            .collect();
        PyTuple::new(py, dims).into_py(py)
    }

    #[getter]
    fn dtype(&self) -> &'static str {
        self.inner.dtype().name()
    }

    fn __add__(&self, other: &PyAny) -> PyResult<PyArray> {
        PyArray::wrap(self.inner.add(py_to_operand(other)?))
    }

    fn __radd__(&self, other: &PyAny) -> PyResult<PyArray> {
        PyArray::wrap(self.inner.add(py_to_operand(other)?))
    }

    fn __sub__(&self, other: &PyAny) -> PyResult<PyArray> {
        PyArray::wrap(self.inner.sub(py_to_operand(other)?))
    }

    fn __rsub__(&self, other: &PyAny) -> PyResult<PyArray> {
        PyArray::wrap(self.inner.rsub(py_to_literal(other)?))
    }

    fn __mul__(&self, other: &PyAny) -> PyResult<PyArray> {
        PyArray::wrap(self.inner.mul(py_to_operand(other)?))
    }

    fn __rmul__(&self, other: &PyAny) -> PyResult<PyArray> {
        PyArray::wrap(self.inner.mul(py_to_operand(other)?))
    }

    fn __truediv__(&self, other: &PyAny) -> PyResult<PyArray> {
        PyArray::wrap(self.inner.div(py_to_operand(other)?))
    }

    fn __rtruediv__(&self, other: &PyAny) -> PyResult<PyArray> {
        PyArray::wrap(self.inner.rdiv(py_to_literal(other)?))
    }

    fn __richcmp__(&self, other: &PyAny, op: CompareOp) -> PyResult<PyArray> {
        let rhs = py_to_operand(other)?;
        let result = match op {
            CompareOp::Lt => self.inner.lt(rhs),
            CompareOp::Le => self.inner.le(rhs),
            CompareOp::Gt => self.inner.gt(rhs),
            CompareOp::Ge => self.inner.ge(rhs),
            CompareOp::Eq | CompareOp::Ne => {
                return Err(PyTypeError::new_err("equality comparisons are not supported"))
            }
        };
        PyArray::wrap(result)
    }

    fn __getitem__(&self, index: &PyAny) -> PyResult<PyArray> {
        PyArray::wrap(self.inner.get(&py_to_indices(index)?))
    }

    fn __setitem__(&mut self, index: &PyAny, value: &PyAny) -> PyResult<()> {
        let index = py_to_indices(index)?;
        Ok(self.inner.assign(&index, py_to_operand(value)?)?)
    }

    #[pyo3(signature = (shape, order = "C"))]
    fn reshape(&self, shape: &PyAny, order: &str) -> PyResult<PyArray> {
        PyArray::wrap(self.inner.reshape(py_to_shape(shape)?, parse_order(order)?))
    }

    #[pyo3(signature = (axis = None))]
    fn sum(&self, axis: Option<&PyAny>) -> PyResult<PyArray> {
        let axes: Option<Vec<usize>> = match axis {
            None => None,
            Some(obj) => Some(match obj.downcast::<PyTuple>() {
                Ok(tuple) => tuple.extract()?,
                Err(_) => vec![obj.extract()?],
            }),
        };
        PyArray::wrap(self.inner.sum(axes.as_deref()))
    }

    fn cumsum(&self) -> PyResult<PyArray> {
        PyArray::wrap(self.inner.cumsum())
    }

    fn __repr__(&self) -> String {
        format!("{}", self.inner)
    }
}

/// Python wrapper for Kernel.
#[pyclass(name = "Kernel", unsendable)]
struct PyKernel {
    inner: Kernel,
}

#[pymethods]
impl PyKernel {
    /// Statements as strings, in execution order.
    fn statements(&self) -> Vec<String> {
        self.inner.statements.iter().map(|s| s.to_string()).collect()
    }

    fn domains(&self) -> Vec<String> {
        self.inner.domains.iter().map(|d| d.to_string()).collect()
    }

    fn rules(&self) -> Vec<String> {
        self.inner.rules.iter().map(|r| r.to_string()).collect()
    }

    /// Map each requested output to the array holding it.
    fn outputs(&self, py: Python) -> PyResult<PyObject> {
        let dict = PyDict::new(py);
        for binding in &self.inner.outputs {
            dict.set_item(binding.rule.as_ref(), binding.array.as_ref())?;
        }
        Ok(dict.into_py(py))
    }

    fn transform_info(&self, py: Python) -> PyResult<Option<PyObject>> {
        let Some(info) = &self.inner.transform_info else {
            return Ok(None);
        };
        let dict = PyDict::new(py);
        for (name, vars) in info {
            let vars: Vec<&str> = vars.iter().map(|v| v.as_ref()).collect();
            dict.set_item(name.as_ref(), PyList::new(py, vars))?;
        }
        Ok(Some(dict.into_py(py)))
    }

    fn __repr__(&self) -> String {
        format!("{}", self.inner)
    }
}

/// Python module definition.
#[pymodule]
fn lazyloop(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyStack>()?;
    m.add_class::<PyArray>()?;
    m.add_class::<PyKernel>()?;
    Ok(())
}
