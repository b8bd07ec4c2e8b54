//! Errors raised by the operation library.
//!
//! Every fallible operation checks its operands before touching any buffer,
//! so an `Err` always means the graph, the tape and every matrix are left
//! exactly as they were before the call.

use std::fmt;
use thiserror::Error;

/// Row and column counts of a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims(pub usize, pub usize);

impl Dims {
    #[inline]
    pub fn num_elements(self) -> usize {
        self.0 * self.1
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Operand dimensions are incompatible for a binary or stacking operation.
    #[error("{op}: incompatible dimensions {lhs} and {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Dims,
        rhs: Dims,
    },

    /// A row, column or slice bound lies outside the matrix.
    #[error("{op}: index {index} out of range, must be less than {bound}")]
    IndexOutOfRange {
        op: &'static str,
        index: usize,
        bound: usize,
    },

    /// The call itself cannot be served, e.g. an empty list of inputs.
    #[error("{op}: unsupported configuration: {why}")]
    UnsupportedConfiguration { op: &'static str, why: String },
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn ensure_same_dims(op: &'static str, lhs: Dims, rhs: Dims) -> Result<()> {
    if lhs != rhs {
        return Err(Error::ShapeMismatch { op, lhs, rhs });
    }
    Ok(())
}

pub(crate) fn ensure_index(op: &'static str, index: usize, bound: usize) -> Result<()> {
    if index >= bound {
        return Err(Error::IndexOutOfRange { op, index, bound });
    }
    Ok(())
}
