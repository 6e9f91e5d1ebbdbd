//! Reference kernels implementing the [`Operation`] contract.
//!
//! Two elementwise op families are provided so graphs can be built and run
//! without an external op library:
//! - [`BinaryArith`]: `add`, `sub`, `mul`, `div` over numeric arrays.
//! - [`Compare`]: `equal`, `not_equal`, `less`, ... producing `bool` arrays.
//!
//! Both take two inputs of the same dtype. Shapes must match, or one side
//! must be a scalar which is broadcast over the other.
//!
//! Integer arithmetic is checked: overflow and division by zero are
//! execution errors, never wrapped values. Float division by zero is also an
//! error.

use serde::{Deserialize, Serialize};

use crate::array::{Array, ArrayData};
use crate::error::OpError;
use crate::op::{ExecutionContext, Operation};
use crate::types::{ArrayDescriptor, DataType};

// ---------------------------------------------------------------------------
// Operator enums
// ---------------------------------------------------------------------------

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn name(&self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn name(&self) -> &'static str {
        match self {
            CmpOp::Eq => "equal",
            CmpOp::Ne => "not_equal",
            CmpOp::Lt => "less",
            CmpOp::Le => "less_equal",
            CmpOp::Gt => "greater",
            CmpOp::Ge => "greater_equal",
        }
    }

    fn apply<T: PartialOrd>(&self, a: T, b: T) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }
}

// ---------------------------------------------------------------------------
// BinaryArith
// ---------------------------------------------------------------------------

/// Elementwise arithmetic on two numeric arrays of the same dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryArith {
    pub op: ArithOp,
}

impl BinaryArith {
    pub fn new(op: ArithOp) -> Self {
        BinaryArith { op }
    }
}

impl Operation for BinaryArith {
    fn op_name(&self) -> &str {
        self.op.name()
    }

    fn infer_output_shapes(
        &self,
        inputs: &[ArrayDescriptor],
    ) -> Result<Vec<ArrayDescriptor>, OpError> {
        let out = broadcast_descriptor(self.op_name(), inputs)?;
        if !out.dtype.is_numeric() {
            return Err(OpError::ShapeInference {
                op: self.op_name().to_string(),
                reason: format!("arithmetic is not defined for {}", out.dtype),
            });
        }
        Ok(vec![out])
    }

    fn execute_in_place(
        &self,
        _ctx: &mut ExecutionContext<'_, '_>,
        inputs: &[&Array],
        outputs: &mut [Array],
    ) -> Result<(), OpError> {
        let name = self.op_name();
        let (lhs, rhs) = binary_inputs(name, inputs)?;
        let out = single_output(name, outputs)?;
        let op = self.op;

        match (lhs.data(), rhs.data(), out.data_mut()) {
            (ArrayData::I32(a), ArrayData::I32(b), ArrayData::I32(o)) => {
                broadcast_into(name, a, b, o, |x, y| checked_int_op(x, y, op))
            }
            (ArrayData::I64(a), ArrayData::I64(b), ArrayData::I64(o)) => {
                broadcast_into(name, a, b, o, |x, y| checked_int_op(x, y, op))
            }
            (ArrayData::F32(a), ArrayData::F32(b), ArrayData::F32(o)) => {
                broadcast_into(name, a, b, o, |x, y| float_op(x, y, op))
            }
            (ArrayData::F64(a), ArrayData::F64(b), ArrayData::F64(o)) => {
                broadcast_into(name, a, b, o, |x, y| float_op(x, y, op))
            }
            (a, b, o) => Err(type_mismatch(name, a.dtype(), b.dtype(), o.dtype())),
        }
    }
}

/// Performs a checked integer operation using Rust's checked_* methods.
fn checked_int_op<T>(a: T, b: T, op: ArithOp) -> Result<T, String>
where
    T: CheckedArith,
{
    if op == ArithOp::Div && b.is_zero() {
        return Err("division by zero".to_string());
    }
    let result = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div => a.checked_div(b),
    };
    result.ok_or_else(|| "integer overflow".to_string())
}

fn float_op<T>(a: T, b: T, op: ArithOp) -> Result<T, String>
where
    T: Copy
        + PartialEq
        + Default
        + std::ops::Add<Output = T>
        + std::ops::Sub<Output = T>
        + std::ops::Mul<Output = T>
        + std::ops::Div<Output = T>,
{
    Ok(match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => {
            if b == T::default() {
                return Err("division by zero".to_string());
            }
            a / b
        }
    })
}

/// Checked arithmetic on integer element types.
trait CheckedArith: Sized + Copy {
    fn checked_add(self, rhs: Self) -> Option<Self>;
    fn checked_sub(self, rhs: Self) -> Option<Self>;
    fn checked_mul(self, rhs: Self) -> Option<Self>;
    fn checked_div(self, rhs: Self) -> Option<Self>;
    fn is_zero(self) -> bool;
}

macro_rules! impl_checked_arith {
    ($($ty:ty),+) => {
        $(
            impl CheckedArith for $ty {
                fn checked_add(self, rhs: Self) -> Option<Self> { <$ty>::checked_add(self, rhs) }
                fn checked_sub(self, rhs: Self) -> Option<Self> { <$ty>::checked_sub(self, rhs) }
                fn checked_mul(self, rhs: Self) -> Option<Self> { <$ty>::checked_mul(self, rhs) }
                fn checked_div(self, rhs: Self) -> Option<Self> { <$ty>::checked_div(self, rhs) }
                fn is_zero(self) -> bool { self == 0 }
            }
        )+
    }
}

impl_checked_arith!(i32, i64);

// ---------------------------------------------------------------------------
// Compare
// ---------------------------------------------------------------------------

/// Elementwise comparison producing a `bool` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compare {
    pub op: CmpOp,
}

impl Compare {
    pub fn new(op: CmpOp) -> Self {
        Compare { op }
    }
}

impl Operation for Compare {
    fn op_name(&self) -> &str {
        self.op.name()
    }

    fn infer_output_shapes(
        &self,
        inputs: &[ArrayDescriptor],
    ) -> Result<Vec<ArrayDescriptor>, OpError> {
        let out = broadcast_descriptor(self.op_name(), inputs)?;
        Ok(vec![out.with_dtype(DataType::Bool)])
    }

    fn execute_in_place(
        &self,
        _ctx: &mut ExecutionContext<'_, '_>,
        inputs: &[&Array],
        outputs: &mut [Array],
    ) -> Result<(), OpError> {
        let name = self.op_name();
        let (lhs, rhs) = binary_inputs(name, inputs)?;
        let out = single_output(name, outputs)?;
        let op = self.op;
        let out_dtype = out.dtype();

        let ArrayData::Bool(o) = out.data_mut() else {
            return Err(OpError::Execution {
                op: name.to_string(),
                reason: format!("output must be bool, got {}", out_dtype),
            });
        };
        match (lhs.data(), rhs.data()) {
            (ArrayData::Bool(a), ArrayData::Bool(b)) => {
                broadcast_into(name, a, b, o, |x, y| Ok(op.apply(x, y)))
            }
            (ArrayData::I32(a), ArrayData::I32(b)) => {
                broadcast_into(name, a, b, o, |x, y| Ok(op.apply(x, y)))
            }
            (ArrayData::I64(a), ArrayData::I64(b)) => {
                broadcast_into(name, a, b, o, |x, y| Ok(op.apply(x, y)))
            }
            (ArrayData::F32(a), ArrayData::F32(b)) => {
                broadcast_into(name, a, b, o, |x, y| Ok(op.apply(x, y)))
            }
            (ArrayData::F64(a), ArrayData::F64(b)) => {
                broadcast_into(name, a, b, o, |x, y| Ok(op.apply(x, y)))
            }
            (a, b) => Err(type_mismatch(name, a.dtype(), b.dtype(), DataType::Bool)),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Output descriptor of a two-input elementwise op: same dtype on both sides,
/// equal shapes or one scalar side.
fn broadcast_descriptor(op: &str, inputs: &[ArrayDescriptor]) -> Result<ArrayDescriptor, OpError> {
    let fail = |reason: String| OpError::ShapeInference {
        op: op.to_string(),
        reason,
    };
    let [lhs, rhs] = inputs else {
        return Err(fail(format!("expected 2 inputs, got {}", inputs.len())));
    };
    if lhs.dtype != rhs.dtype {
        return Err(fail(format!("dtype mismatch: {} vs {}", lhs.dtype, rhs.dtype)));
    }
    if lhs.shape == rhs.shape || rhs.is_scalar() {
        Ok(lhs.clone())
    } else if lhs.is_scalar() {
        Ok(rhs.clone())
    } else {
        Err(fail(format!("incompatible shapes: {} vs {}", lhs, rhs)))
    }
}

fn binary_inputs<'a>(op: &str, inputs: &[&'a Array]) -> Result<(&'a Array, &'a Array), OpError> {
    match inputs {
        &[lhs, rhs] => Ok((lhs, rhs)),
        _ => Err(OpError::Execution {
            op: op.to_string(),
            reason: format!("expected 2 inputs, got {}", inputs.len()),
        }),
    }
}

fn single_output<'a>(op: &str, outputs: &'a mut [Array]) -> Result<&'a mut Array, OpError> {
    let count = outputs.len();
    match outputs {
        [out] => Ok(out),
        _ => Err(OpError::Execution {
            op: op.to_string(),
            reason: format!("expected 1 output, got {}", count),
        }),
    }
}

fn type_mismatch(op: &str, lhs: DataType, rhs: DataType, out: DataType) -> OpError {
    OpError::Execution {
        op: op.to_string(),
        reason: format!("unsupported dtypes: {} and {} into {}", lhs, rhs, out),
    }
}

fn at<T: Copy>(values: &[T], i: usize) -> T {
    if values.len() == 1 {
        values[0]
    } else {
        values[i]
    }
}

/// Applies `f` elementwise into `out`, broadcasting length-1 inputs.
fn broadcast_into<T: Copy, U>(
    op: &str,
    lhs: &[T],
    rhs: &[T],
    out: &mut [U],
    mut f: impl FnMut(T, T) -> Result<U, String>,
) -> Result<(), OpError> {
    let len = out.len();
    let fits = |n: usize| n == len || n == 1;
    if !fits(lhs.len()) || !fits(rhs.len()) {
        return Err(OpError::Execution {
            op: op.to_string(),
            reason: format!(
                "cannot broadcast {} and {} elements into {}",
                lhs.len(),
                rhs.len(),
                len
            ),
        });
    }
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = f(at(lhs, i), at(rhs, i)).map_err(|reason| OpError::Execution {
            op: op.to_string(),
            reason,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameIter;
    use crate::memory::{with_pooled_scope, DetachedMemoryManager};

    /// Runs `op` on `inputs` the way the executor does: infer, allocate,
    /// execute in place.
    fn run(op: &dyn Operation, inputs: &[Array]) -> Result<Array, OpError> {
        let descriptors: Vec<ArrayDescriptor> =
            inputs.iter().map(|a| a.descriptor().clone()).collect();
        let inferred = op.infer_output_shapes(&descriptors)?;
        let mut outputs: Vec<Array> = inferred.into_iter().map(Array::zeros).collect();
        let refs: Vec<&Array> = inputs.iter().collect();
        let frame = FrameIter::outer();
        let manager = DetachedMemoryManager;
        with_pooled_scope(&manager, |scope| {
            let mut ctx = ExecutionContext::new(op.op_name(), &frame, scope);
            op.execute_in_place(&mut ctx, &refs, &mut outputs)
        })?;
        Ok(outputs.remove(0))
    }

    #[test]
    fn add_vectors() {
        let out = run(
            &BinaryArith::new(ArithOp::Add),
            &[Array::vector_f32(&[1.0, 2.0]), Array::vector_f32(&[3.0, 4.0])],
        )
        .unwrap();
        assert_eq!(out, Array::vector_f32(&[4.0, 6.0]));
    }

    #[test]
    fn scalar_broadcasts_over_vector() {
        let out = run(
            &BinaryArith::new(ArithOp::Mul),
            &[Array::scalar_i32(3), Array::vector_i32(&[1, 2, 3])],
        )
        .unwrap();
        assert_eq!(out, Array::vector_i32(&[3, 6, 9]));

        let out = run(
            &BinaryArith::new(ArithOp::Sub),
            &[Array::vector_i32(&[5, 6]), Array::scalar_i32(1)],
        )
        .unwrap();
        assert_eq!(out, Array::vector_i32(&[4, 5]));
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let err = run(
            &BinaryArith::new(ArithOp::Add),
            &[Array::scalar_i32(i32::MAX), Array::scalar_i32(1)],
        )
        .unwrap_err();
        assert_eq!(
            err,
            OpError::Execution {
                op: "add".into(),
                reason: "integer overflow".into()
            }
        );
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let err = run(
            &BinaryArith::new(ArithOp::Div),
            &[Array::scalar_i64(4), Array::scalar_i64(0)],
        )
        .unwrap_err();
        assert!(matches!(err, OpError::Execution { ref reason, .. } if reason == "division by zero"));

        let err = run(
            &BinaryArith::new(ArithOp::Div),
            &[Array::scalar_f64(1.0), Array::scalar_f64(0.0)],
        )
        .unwrap_err();
        assert!(matches!(err, OpError::Execution { .. }));
    }

    #[test]
    fn shape_inference_rejects_mismatches() {
        let add = BinaryArith::new(ArithOp::Add);
        let err = add
            .infer_output_shapes(&[
                ArrayDescriptor::new(DataType::F32, &[2]),
                ArrayDescriptor::new(DataType::I32, &[2]),
            ])
            .unwrap_err();
        assert!(matches!(err, OpError::ShapeInference { .. }));

        let err = add
            .infer_output_shapes(&[
                ArrayDescriptor::new(DataType::F32, &[2]),
                ArrayDescriptor::new(DataType::F32, &[3]),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("incompatible shapes"));

        let bools = vec![ArrayDescriptor::scalar(DataType::Bool); 2];
        let err = add.infer_output_shapes(&bools).unwrap_err();
        assert!(err.to_string().contains("not defined for bool"));

        assert!(add
            .infer_output_shapes(&[ArrayDescriptor::scalar(DataType::F32)])
            .is_err());
    }

    #[test]
    fn compare_produces_bool() {
        let less = Compare::new(CmpOp::Lt);
        let inferred = less
            .infer_output_shapes(&[
                ArrayDescriptor::scalar(DataType::I32),
                ArrayDescriptor::scalar(DataType::I32),
            ])
            .unwrap();
        assert_eq!(inferred, vec![ArrayDescriptor::scalar(DataType::Bool)]);

        let out = run(&less, &[Array::scalar_i32(2), Array::scalar_i32(3)]).unwrap();
        assert_eq!(out.bool_scalar(), Some(true));

        let out = run(
            &Compare::new(CmpOp::Ge),
            &[Array::vector_f32(&[1.0, 5.0]), Array::scalar_f32(2.0)],
        )
        .unwrap();
        assert_eq!(out, Array::vector_bool(&[false, true]));
    }

    #[test]
    fn op_names() {
        assert_eq!(BinaryArith::new(ArithOp::Div).op_name(), "div");
        assert_eq!(Compare::new(CmpOp::Ne).op_name(), "not_equal");
    }

    proptest::proptest! {
        #[test]
        fn comparisons_agree_with_scalar_semantics(
            values in proptest::collection::vec(-100i32..100, 1..12),
            pivot in -100i32..100,
        ) {
            for op in [CmpOp::Eq, CmpOp::Ne, CmpOp::Lt, CmpOp::Le, CmpOp::Gt, CmpOp::Ge] {
                let out = run(
                    &Compare::new(op),
                    &[Array::vector_i32(&values), Array::scalar_i32(pivot)],
                )
                .unwrap();
                let expected: Vec<bool> = values.iter().map(|v| op.apply(v, &pivot)).collect();
                proptest::prop_assert_eq!(out.as_bool().unwrap(), expected.as_slice());
            }
        }
    }
}
