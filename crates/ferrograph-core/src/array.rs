//! The array handle consumed and produced by ops.
//!
//! An [`Array`] is a descriptor plus a reference-counted typed buffer.
//! Cloning an array aliases the buffer; writing through [`Array::data_mut`]
//! is copy-on-write, so a writer never changes what another holder sees.
//!
//! Every array records how it was allocated. Detached arrays live as long as
//! any handle does. Pooled arrays carry a [`PoolTicket`] that the memory
//! manager invalidates when the array is released back to its pool; the
//! contents of a pooled array must not be relied on after that.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{ArrayDescriptor, DataType};

/// Typed element storage, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    Bool(Vec<bool>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ArrayData {
    /// Zero-filled (or `false`-filled) storage of `len` elements.
    pub fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::Bool => ArrayData::Bool(vec![false; len]),
            DataType::I32 => ArrayData::I32(vec![0; len]),
            DataType::I64 => ArrayData::I64(vec![0; len]),
            DataType::F32 => ArrayData::F32(vec![0.0; len]),
            DataType::F64 => ArrayData::F64(vec![0.0; len]),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            ArrayData::Bool(_) => DataType::Bool,
            ArrayData::I32(_) => DataType::I32,
            ArrayData::I64(_) => DataType::I64,
            ArrayData::F32(_) => DataType::F32,
            ArrayData::F64(_) => DataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Liveness flag shared by a pooled array and the pool that lent it.
#[derive(Debug, Clone)]
pub struct PoolTicket {
    live: Arc<AtomicBool>,
}

impl PoolTicket {
    pub fn new() -> Self {
        PoolTicket {
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Marks the lent buffer as returned to the pool.
    pub fn invalidate(&self) {
        self.live.store(false, Ordering::Release);
    }

    /// Returns `true` if both tickets belong to the same loan.
    pub fn same_loan(&self, other: &PoolTicket) -> bool {
        Arc::ptr_eq(&self.live, &other.live)
    }
}

impl Default for PoolTicket {
    fn default() -> Self {
        PoolTicket::new()
    }
}

/// How an array's buffer was obtained.
#[derive(Debug, Clone)]
pub enum Allocation {
    /// Independent lifetime; safe to keep indefinitely.
    Detached,
    /// Borrowed from a memory pool for the duration of one scope.
    Pooled(PoolTicket),
}

/// A shaped, typed array handle.
#[derive(Debug, Clone)]
pub struct Array {
    descriptor: ArrayDescriptor,
    data: Arc<ArrayData>,
    allocation: Allocation,
}

impl Array {
    /// Creates a detached array, checking that `data` fills `shape` exactly.
    pub fn new(shape: &[usize], data: ArrayData) -> Result<Self, CoreError> {
        let descriptor = ArrayDescriptor::new(data.dtype(), shape);
        let expected = descriptor.element_count();
        if data.len() != expected {
            return Err(CoreError::DataLength {
                shape: shape.to_vec(),
                expected,
                len: data.len(),
            });
        }
        Ok(Array {
            descriptor,
            data: Arc::new(data),
            allocation: Allocation::Detached,
        })
    }

    /// A detached, zero-filled array.
    pub fn zeros(descriptor: ArrayDescriptor) -> Self {
        let data = ArrayData::zeros(descriptor.dtype, descriptor.element_count());
        Array {
            descriptor,
            data: Arc::new(data),
            allocation: Allocation::Detached,
        }
    }

    /// Builds an array from parts supplied by a memory manager. The data
    /// length must already match the descriptor.
    pub(crate) fn from_parts(
        descriptor: ArrayDescriptor,
        data: ArrayData,
        allocation: Allocation,
    ) -> Self {
        debug_assert_eq!(descriptor.element_count(), data.len());
        debug_assert_eq!(descriptor.dtype, data.dtype());
        Array {
            descriptor,
            data: Arc::new(data),
            allocation,
        }
    }

    /// Splits the array so a memory manager can recycle its buffer. Returns
    /// the buffer only when this handle was its sole owner.
    pub(crate) fn into_buffer(self) -> (Allocation, Option<ArrayData>) {
        (self.allocation, Arc::try_unwrap(self.data).ok())
    }

    // -- Convenience constructors --

    pub fn scalar_bool(value: bool) -> Self {
        Self::scalar(ArrayData::Bool(vec![value]))
    }

    pub fn scalar_i32(value: i32) -> Self {
        Self::scalar(ArrayData::I32(vec![value]))
    }

    pub fn scalar_i64(value: i64) -> Self {
        Self::scalar(ArrayData::I64(vec![value]))
    }

    pub fn scalar_f32(value: f32) -> Self {
        Self::scalar(ArrayData::F32(vec![value]))
    }

    pub fn scalar_f64(value: f64) -> Self {
        Self::scalar(ArrayData::F64(vec![value]))
    }

    /// A rank-1 `f32` array.
    pub fn vector_f32(values: &[f32]) -> Self {
        Self::vector(ArrayData::F32(values.to_vec()))
    }

    /// A rank-1 `i32` array.
    pub fn vector_i32(values: &[i32]) -> Self {
        Self::vector(ArrayData::I32(values.to_vec()))
    }

    /// A rank-1 `bool` array.
    pub fn vector_bool(values: &[bool]) -> Self {
        Self::vector(ArrayData::Bool(values.to_vec()))
    }

    fn scalar(data: ArrayData) -> Self {
        Array {
            descriptor: ArrayDescriptor::scalar(data.dtype()),
            data: Arc::new(data),
            allocation: Allocation::Detached,
        }
    }

    fn vector(data: ArrayData) -> Self {
        Array {
            descriptor: ArrayDescriptor::new(data.dtype(), &[data.len()]),
            data: Arc::new(data),
            allocation: Allocation::Detached,
        }
    }

    // -- Accessors --

    pub fn descriptor(&self) -> &ArrayDescriptor {
        &self.descriptor
    }

    pub fn dtype(&self) -> DataType {
        self.descriptor.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.descriptor.shape
    }

    pub fn rank(&self) -> usize {
        self.descriptor.rank()
    }

    pub fn is_scalar(&self) -> bool {
        self.descriptor.is_scalar()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Mutable access to the buffer. Copies it first if another handle
    /// aliases it.
    pub fn data_mut(&mut self) -> &mut ArrayData {
        Arc::make_mut(&mut self.data)
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match self.data.as_ref() {
            ArrayData::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match self.data.as_ref() {
            ArrayData::I32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match self.data.as_ref() {
            ArrayData::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self.data.as_ref() {
            ArrayData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self.data.as_ref() {
            ArrayData::F64(v) => Some(v),
            _ => None,
        }
    }

    /// The value of a rank-0 `bool` array. `None` for any other dtype or rank.
    pub fn bool_scalar(&self) -> Option<bool> {
        if !self.is_scalar() {
            return None;
        }
        self.as_bool().and_then(|v| v.first().copied())
    }

    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    /// The loan ticket of a pooled array.
    pub fn pool_ticket(&self) -> Option<&PoolTicket> {
        match &self.allocation {
            Allocation::Detached => None,
            Allocation::Pooled(ticket) => Some(ticket),
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.allocation, Allocation::Detached)
    }

    /// `false` once a pooled array has been released back to its pool.
    pub fn is_live(&self) -> bool {
        match &self.allocation {
            Allocation::Detached => true,
            Allocation::Pooled(ticket) => ticket.is_live(),
        }
    }

    /// Returns `true` if both handles alias the same buffer.
    pub fn shares_buffer(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// A detached copy with its own buffer.
    pub fn to_detached(&self) -> Array {
        Array {
            descriptor: self.descriptor.clone(),
            data: Arc::new(self.data.as_ref().clone()),
            allocation: Allocation::Detached,
        }
    }
}

/// Arrays compare by value: descriptor and contents.
impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor && self.data == other.data
    }
}
