//! Lazyloop: a lazy, symbolic array-expression builder.
//!
//! Array arithmetic written against [`Array`] handles is not executed.
//! Instead a [`Stack`] accumulates:
//! - substitution rules (named, parameterized expressions)
//! - polyhedral domains bounding the bound index variables
//! - implicit assignments for scatter-style writes, keyed by registration index
//! - a backing map from rules to the concrete arrays holding their values
//!
//! [`Stack::finalize`] lowers all of it into a [`Kernel`] for a polyhedral
//! code generator.
//!
//! ```
//! use lazyloop::{DType, Stack};
//!
//! let stack = Stack::new();
//! let a = stack.ones(10, DType::Float64)?;
//! let b = stack.input(10, DType::Float64)?;
//! let out = a.mul(2.0)?.add(&b.mul(3.0)?)?;
//! let kernel = stack.finalize(&[&out], false)?;
//! assert!(kernel.output_array(&out).is_some());
//! # Ok::<(), lazyloop::Error>(())
//! ```

pub mod array;
pub mod backing;
pub mod domain;
pub mod error;
pub mod expr;
pub mod kernel;
pub mod names;
pub mod rewrite;
pub mod rule;
pub mod shape;
pub mod stack;

#[cfg(feature = "python")]
mod python;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use array::{Array, Index, Operand, Operator};
pub use backing::{BackingEntry, BackingMap};
pub use domain::{AffineExpr, Constraint, Domain};
pub use error::{Error, Result};
pub use expr::{BinOp, CmpOp, Expr, Literal, ReduceOp};
pub use kernel::{ArrayDecl, ArrayRole, Assignment, Kernel, OutputBinding};
pub use names::{Name, NameAllocator, NameKind};
pub use rewrite::RuleToLoad;
pub use rule::{RuleRegistry, SubstitutionRule};
pub use shape::{broadcast, DType, Extent, IntoShape, Order, Shape};
pub use stack::{Stack, StackBuilder, StackConfig, StackStats};
