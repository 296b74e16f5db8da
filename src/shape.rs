//! Shapes, element types, layouts and broadcast algebra.

use crate::error::{Error, Result};
use crate::names::Name;
use std::fmt;

/// Length of one axis.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Extent {
    /// A statically known length.
    Fixed(usize),
    /// A named symbolic parameter, bound when the kernel runs.
    Param(Name),
}

impl Extent {
    pub fn param(name: &str) -> Self {
        Extent::Param(name.into())
    }

    pub fn fixed(&self) -> Option<usize> {
        match self {
            Extent::Fixed(n) => Some(*n),
            Extent::Param(_) => None,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Extent::Fixed(1))
    }

    fn validate(&self) -> Result<()> {
        match self {
            Extent::Fixed(0) => Err(Error::shape("axis length must be positive")),
            Extent::Param(p) if p.is_empty() => {
                Err(Error::shape("symbolic axis length needs a name"))
            }
            _ => Ok(()),
        }
    }
}

impl From<usize> for Extent {
    fn from(n: usize) -> Self {
        Extent::Fixed(n)
    }
}

impl From<&str> for Extent {
    fn from(name: &str) -> Self {
        Extent::param(name)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extent::Fixed(n) => write!(f, "{}", n),
            Extent::Param(p) => write!(f, "{}", p),
        }
    }
}

/// Ordered axis lengths. Never empty: `(1,)` stands in for a scalar.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape(Vec<Extent>);

impl Shape {
    /// Validate and build a shape.
    pub fn new(dims: impl IntoIterator<Item = Extent>) -> Result<Self> {
        let dims: Vec<Extent> = dims.into_iter().collect();
        if dims.is_empty() {
            return Err(Error::shape("zero-rank shapes are not supported, use (1,)"));
        }
        for d in &dims {
            d.validate()?;
        }
        Ok(Shape(dims))
    }

    pub fn fixed(dims: &[usize]) -> Result<Self> {
        Shape::new(dims.iter().map(|&n| Extent::Fixed(n)))
    }

    /// The shape `(1,)`.
    pub fn unit() -> Self {
        Shape(vec![Extent::Fixed(1)])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Extent] {
        &self.0
    }

    pub fn is_unit(&self) -> bool {
        self.0.len() == 1 && self.0[0].is_unit()
    }

    /// Static axis lengths, if every axis is fixed.
    pub fn fixed_dims(&self) -> Option<Vec<usize>> {
        self.0.iter().map(Extent::fixed).collect()
    }

    /// Element count, if statically known.
    pub fn num_elements(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, d| d.fixed().map(|n| acc * n))
    }

    /// Symbolic parameters used by this shape.
    pub fn params(&self) -> Vec<Name> {
        self.0
            .iter()
            .filter_map(|d| match d {
                Extent::Param(p) => Some(p.clone()),
                Extent::Fixed(_) => None,
            })
            .collect()
    }
}

/// Conversion into a validated [`Shape`].
pub trait IntoShape {
    fn into_shape(self) -> Result<Shape>;
}

impl IntoShape for Shape {
    fn into_shape(self) -> Result<Shape> {
        Ok(self)
    }
}

impl IntoShape for &Shape {
    fn into_shape(self) -> Result<Shape> {
        Ok(self.clone())
    }
}

impl IntoShape for usize {
    fn into_shape(self) -> Result<Shape> {
        Shape::fixed(&[self])
    }
}

impl IntoShape for &[usize] {
    fn into_shape(self) -> Result<Shape> {
        Shape::fixed(self)
    }
}

impl<const N: usize> IntoShape for [usize; N] {
    fn into_shape(self) -> Result<Shape> {
        Shape::fixed(&self)
    }
}

impl IntoShape for Vec<Extent> {
    fn into_shape(self) -> Result<Shape> {
        Shape::new(self)
    }
}

impl<const N: usize> IntoShape for [Extent; N] {
    fn into_shape(self) -> Result<Shape> {
        Shape::new(self)
    }
}

impl std::ops::Index<usize> for Shape {
    type Output = Extent;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

/// Element types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DType {
    Int32,
    Int64,
    Float32,
    #[default]
    Float64,
}

impl DType {
    pub fn is_integer(self) -> bool {
        matches!(self, DType::Int32 | DType::Int64)
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Memory layout order used to linearize indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Order {
    /// Last axis varies fastest (C order).
    #[default]
    RowMajor,
    /// First axis varies fastest (Fortran order).
    ColumnMajor,
}

impl Order {
    /// Element strides of `dims` in this order.
    pub fn strides(self, dims: &[usize]) -> Vec<usize> {
        let mut strides = vec![0; dims.len()];
        let mut acc = 1;
        match self {
            Order::RowMajor => {
                for k in (0..dims.len()).rev() {
                    strides[k] = acc;
                    acc *= dims[k];
                }
            }
            Order::ColumnMajor => {
                for k in 0..dims.len() {
                    strides[k] = acc;
                    acc *= dims[k];
                }
            }
        }
        strides
    }
}

/// Pairwise broadcast: left-pad the shorter shape with unit axes, then
/// require each axis pair to agree or have one side equal to 1.
pub fn broadcast(a: &Shape, b: &Shape) -> Result<Shape> {
    let rank = a.rank().max(b.rank());
    let pad = |s: &Shape| -> Vec<Extent> {
        std::iter::repeat(Extent::Fixed(1))
            .take(rank - s.rank())
            .chain(s.dims().iter().cloned())
            .collect()
    };
    let (pa, pb) = (pad(a), pad(b));

    let mut out = Vec::with_capacity(rank);
    for (axis, (x, y)) in pa.into_iter().zip(pb).enumerate() {
        let dim = if x == y || y.is_unit() {
            x
        } else if x.is_unit() {
            y
        } else {
            return Err(Error::Broadcast {
                left: a.to_string(),
                right: b.to_string(),
                axis,
            });
        };
        out.push(dim);
    }
    Ok(Shape(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(dims: &[usize]) -> Shape {
        Shape::fixed(dims).unwrap()
    }

    #[test]
    fn test_shape_validation() {
        assert!(Shape::fixed(&[]).is_err());
        assert!(matches!(Shape::fixed(&[3, 0]), Err(Error::Shape(_))));
        assert!(Shape::new([Extent::param("")]).is_err());
        let ok = Shape::new([Extent::param("n"), Extent::Fixed(2)]).unwrap();
        assert_eq!(ok.rank(), 2);
        assert_eq!(ok.num_elements(), None);
        assert_eq!(ok.params(), vec![Name::from("n")]);
    }

    #[test]
    fn test_broadcast_rules() {
        assert_eq!(broadcast(&s(&[3, 3]), &s(&[3])).unwrap(), s(&[3, 3]));
        assert_eq!(broadcast(&s(&[4, 1]), &s(&[1, 5])).unwrap(), s(&[4, 5]));
        assert_eq!(broadcast(&s(&[2, 1, 3]), &s(&[7, 1])).unwrap(), s(&[2, 7, 3]));
    }

    #[test]
    fn test_broadcast_symmetric_and_idempotent() {
        let pairs = [
            (s(&[3, 3]), s(&[3])),
            (s(&[4, 1]), s(&[1, 5])),
            (s(&[1]), s(&[6, 2])),
            (s(&[2, 1, 3]), s(&[7, 1])),
        ];
        for (a, b) in &pairs {
            assert_eq!(broadcast(a, b).unwrap(), broadcast(b, a).unwrap());
            assert_eq!(&broadcast(a, a).unwrap(), a);
            assert_eq!(&broadcast(b, b).unwrap(), b);
        }
    }

    #[test]
    fn test_broadcast_mismatch() {
        let err = broadcast(&s(&[3, 4]), &s(&[3, 5])).unwrap_err();
        assert!(matches!(err, Error::Broadcast { axis: 1, .. }));
        assert!(broadcast(&s(&[2]), &s(&[3, 4])).is_err());
    }

    #[test]
    fn test_broadcast_symbolic() {
        let n = Shape::new([Extent::param("n")]).unwrap();
        let m = Shape::new([Extent::param("m")]).unwrap();
        let n_by_1 = Shape::new([Extent::param("n"), Extent::Fixed(1)]).unwrap();
        assert_eq!(broadcast(&n, &s(&[1])).unwrap(), n);
        assert_eq!(broadcast(&n, &n).unwrap(), n);
        assert!(broadcast(&n, &m).is_err());
        assert!(broadcast(&n, &s(&[4])).is_err());
        assert_eq!(
            broadcast(&n_by_1, &n).unwrap(),
            Shape::new([Extent::param("n"), Extent::param("n")]).unwrap()
        );
    }

    #[test]
    fn test_strides() {
        assert_eq!(Order::RowMajor.strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(Order::ColumnMajor.strides(&[2, 3, 4]), vec![1, 2, 6]);
    }

    #[test]
    fn test_display() {
        assert_eq!(s(&[10]).to_string(), "(10,)");
        assert_eq!(s(&[2, 3]).to_string(), "(2, 3)");
    }
}
