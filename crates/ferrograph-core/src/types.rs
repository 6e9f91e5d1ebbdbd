//! Element types and array descriptors.
//!
//! [`DataType`] enumerates the element types an [`Array`](crate::array::Array)
//! can hold. [`ArrayDescriptor`] is the (dtype, shape) pair that ops reason
//! about during shape inference and that memory managers allocate from.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Array shape. Rank 0 (empty) is a scalar.
pub type Shape = SmallVec<[usize; 4]>;

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    I32,
    I64,
    F32,
    F64,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Bool => 1,
            DataType::I32 | DataType::F32 => 4,
            DataType::I64 | DataType::F64 => 8,
        }
    }

    /// Whether arithmetic is defined for this type.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, DataType::Bool)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Bool => "bool",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

/// The (dtype, shape) pair describing an array without its data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayDescriptor {
    pub dtype: DataType,
    pub shape: Shape,
}

impl ArrayDescriptor {
    pub fn new(dtype: DataType, shape: &[usize]) -> Self {
        ArrayDescriptor {
            dtype,
            shape: Shape::from_slice(shape),
        }
    }

    /// A rank-0 descriptor.
    pub fn scalar(dtype: DataType) -> Self {
        ArrayDescriptor {
            dtype,
            shape: Shape::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Number of elements (1 for a scalar).
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Same shape, different element type.
    pub fn with_dtype(&self, dtype: DataType) -> Self {
        ArrayDescriptor {
            dtype,
            shape: self.shape.clone(),
        }
    }
}

impl fmt::Display for ArrayDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.dtype, self.shape.as_slice())
    }
}
