//! Per-kind op dispatch.
//!
//! Control-flow kinds never touch array contents: they route an input
//! handle to an output [`VarId`] whose frame the kind determines.
//! Ordinary ops go through the full parameterization: shape inference,
//! destination allocation, in-place execution inside a pooled scope.

use std::collections::HashMap;

use indexmap::IndexSet;

use ferrograph_core::array::Array;
use ferrograph_core::error::OpError;
use ferrograph_core::frame::{FrameIter, VarId};
use ferrograph_core::id::NodeId;
use ferrograph_core::memory::{with_pooled_scope, AllocationClass, MemoryManager};
use ferrograph_core::node::OpKind;
use ferrograph_core::op::{ExecutionContext, Operation};
use ferrograph_core::types::{ArrayDescriptor, DataType};

use super::error::ExecError;
use super::instance::Dep;

/// A value an instance produced for one output slot.
#[derive(Debug, Clone)]
pub struct Produced {
    pub slot: usize,
    pub var: VarId,
    pub array: Array,
}

/// One argument position after resolution. `array` is `None` when the
/// dependency has not been produced (only legal for `Merge`).
#[derive(Debug, Clone)]
pub struct Resolved {
    pub dep: Dep,
    pub array: Option<Array>,
}

/// Collects the distinct dependencies of an instance, in argument order.
///
/// Repeated argument names collapse to one dependency each, and every
/// distinct name must map to its own dependency.
pub fn distinct_inputs(
    instance: &str,
    declared: &[String],
    args: &[Resolved],
) -> Result<IndexSet<Dep>, ExecError> {
    let names: IndexSet<&str> = declared.iter().map(String::as_str).collect();
    let deps: IndexSet<Dep> = args.iter().map(|arg| arg.dep.clone()).collect();
    let consistent = deps.len() == names.len()
        && deps.iter().zip(&names).all(|(dep, name)| dep.name() == *name);
    if !consistent {
        return Err(violation(
            instance,
            &format!(
                "{} distinct argument name(s) resolved to {} distinct input(s)",
                names.len(),
                deps.len()
            ),
        ));
    }
    Ok(deps)
}

// ---------------------------------------------------------------------------
// Control flow
// ---------------------------------------------------------------------------

/// Executes a control-flow instance running in `frame`.
pub fn control_flow(
    kind: &OpKind,
    instance: &str,
    frame: &FrameIter,
    args: &[Resolved],
    outputs: &[String],
    max_iterations: u32,
) -> Result<Vec<Produced>, ExecError> {
    let produced = match kind {
        OpKind::Ordinary(_) => {
            return Err(ExecError::IllegalState {
                instance: instance.to_string(),
                reason: "ordinary op routed to control-flow dispatch".into(),
            })
        }
        OpKind::Identity => {
            let value = argument(instance, args, 0)?;
            output(instance, outputs, 0, frame.clone(), value)?
        }
        OpKind::Switch => {
            let value = argument(instance, args, 0)?;
            let predicate = argument(instance, args, 1)?;
            let slot = if bool_predicate(instance, &predicate)? { 1 } else { 0 };
            output(instance, outputs, slot, frame.clone(), value)?
        }
        OpKind::Enter { frame: name, .. } => {
            let value = argument(instance, args, 0)?;
            output(instance, outputs, 0, frame.enter(name), value)?
        }
        OpKind::Exit => {
            let parent = frame
                .parent_frame()
                .ok_or_else(|| violation(instance, "exit executed in the outer frame"))?;
            let value = argument(instance, args, 0)?;
            output(instance, outputs, 0, parent.clone(), value)?
        }
        OpKind::NextIteration => {
            if frame.is_outer() {
                return Err(violation(instance, "next_iteration executed in the outer frame"));
            }
            let value = argument(instance, args, 0)?;
            let next = frame.next_iteration();
            if let Some(Dep::Var(input)) = args.first().map(|a| &a.dep) {
                check_iteration_advance(instance, &input.frame, &next)?;
            }
            if next.iteration > max_iterations {
                return Err(ExecError::IterationLimitExceeded {
                    frame: next.frame.clone(),
                    limit: max_iterations,
                });
            }
            output(instance, outputs, 0, next, value)?
        }
        OpKind::Merge => {
            // First available input in argument order.
            let value = args
                .iter()
                .find_map(|a| a.array.clone())
                .ok_or_else(|| ExecError::IllegalState {
                    instance: instance.to_string(),
                    reason: "merge popped with no available input".into(),
                })?;
            output(instance, outputs, 0, frame.clone(), value)?
        }
        OpKind::LoopCond => {
            let value = argument(instance, args, 0)?;
            bool_predicate(instance, &value)?;
            output(instance, outputs, 0, frame.clone(), value)?
        }
    };
    Ok(vec![produced])
}

/// `NextIteration` must read a value of its own frame and advance it by
/// exactly one.
fn check_iteration_advance(
    instance: &str,
    input: &FrameIter,
    next: &FrameIter,
) -> Result<(), ExecError> {
    if !input.same_frame(next) {
        return Err(violation(
            instance,
            &format!("input frame {} differs from output frame {}", input, next),
        ));
    }
    if input.iteration + 1 != next.iteration {
        return Err(violation(
            instance,
            &format!(
                "output iteration {} does not follow input iteration {}",
                next.iteration, input.iteration
            ),
        ));
    }
    Ok(())
}

fn bool_predicate(instance: &str, value: &Array) -> Result<bool, ExecError> {
    value
        .bool_scalar()
        .ok_or_else(|| ExecError::InvalidPredicate {
            instance: instance.to_string(),
            got: value.descriptor().clone(),
        })
}

fn argument(instance: &str, args: &[Resolved], position: usize) -> Result<Array, ExecError> {
    let arg = args.get(position).ok_or_else(|| ExecError::IllegalState {
        instance: instance.to_string(),
        reason: format!("missing argument {}", position),
    })?;
    arg.array.clone().ok_or_else(|| ExecError::IllegalState {
        instance: instance.to_string(),
        reason: format!("input {} is not available", arg.dep),
    })
}

fn output(
    instance: &str,
    outputs: &[String],
    slot: usize,
    frame: FrameIter,
    array: Array,
) -> Result<Produced, ExecError> {
    let name = outputs.get(slot).ok_or_else(|| ExecError::IllegalState {
        instance: instance.to_string(),
        reason: format!("no output slot {}", slot),
    })?;
    Ok(Produced {
        slot,
        var: VarId::new(name.clone(), frame),
        array,
    })
}

fn violation(instance: &str, reason: &str) -> ExecError {
    ExecError::InvariantViolation {
        instance: instance.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Ordinary ops
// ---------------------------------------------------------------------------

/// How one output slot of an ordinary op is handled.
#[derive(Debug, Clone)]
pub struct OutputPlan {
    pub var: VarId,
    /// Declared dtype, overriding the inferred one.
    pub dtype: Option<DataType>,
    /// Requested or read inside the subgraph. Retained outputs are detached
    /// and stored; the rest are pooled scratch for the duration of the call.
    pub retained: bool,
}

/// Everything needed to run one ordinary op instance.
pub struct OrdinaryCall<'a> {
    pub op: &'a dyn Operation,
    /// `op@frame:iteration`, for errors.
    pub instance: &'a str,
    /// Graph name of the op.
    pub op_name: &'a str,
    pub node: NodeId,
    pub frame: &'a FrameIter,
    /// Argument arrays in argument order, repeats included.
    pub args: &'a [Array],
    pub plans: &'a [OutputPlan],
}

/// Infers, allocates and executes an ordinary op. Returns the retained
/// outputs.
pub fn run_ordinary(
    call: OrdinaryCall<'_>,
    memory: &dyn MemoryManager,
    cache: &mut DestinationCache,
) -> Result<Vec<Produced>, ExecError> {
    let OrdinaryCall {
        op,
        instance,
        op_name,
        node,
        frame,
        args,
        plans,
    } = call;

    let input_descriptors: Vec<ArrayDescriptor> =
        args.iter().map(|a| a.descriptor().clone()).collect();
    let inferred = op
        .infer_output_shapes(&input_descriptors)
        .map_err(|source| ExecError::ShapeInference {
            instance: instance.to_string(),
            source,
        })?;
    if inferred.len() != plans.len() {
        return Err(ExecError::ShapeInference {
            instance: instance.to_string(),
            source: OpError::ShapeInference {
                op: op.op_name().to_string(),
                reason: format!(
                    "inferred {} output(s), graph declares {}",
                    inferred.len(),
                    plans.len()
                ),
            },
        });
    }
    let descriptors: Vec<ArrayDescriptor> = inferred
        .into_iter()
        .zip(plans)
        .map(|(descriptor, plan)| match plan.dtype {
            Some(dtype) => descriptor.with_dtype(dtype),
            None => descriptor,
        })
        .collect();

    let retained = with_pooled_scope(memory, |scope| {
        let mut outputs: Vec<Array> = Vec::with_capacity(descriptors.len());
        for (slot, (descriptor, plan)) in descriptors.iter().zip(plans).enumerate() {
            let destination = if plan.retained {
                match cache.take_reusable(node, slot, descriptor, frame) {
                    Some(array) => array,
                    None => memory.allocate(AllocationClass::Detached, descriptor)?,
                }
            } else {
                scope.allocate(descriptor)?
            };
            outputs.push(destination);
        }

        let refs: Vec<&Array> = args.iter().collect();
        let mut ctx = ExecutionContext::new(op_name, frame, scope);
        op.execute_in_place(&mut ctx, &refs, &mut outputs)
            .map_err(|source| ExecError::OpExecution {
                instance: instance.to_string(),
                source,
            })?;

        // Transient outputs go back to the pool with the scope.
        let mut retained = Vec::new();
        for (slot, (array, plan)) in outputs.into_iter().zip(plans).enumerate() {
            if plan.retained {
                retained.push((slot, array));
            } else {
                scope.reclaim(array);
            }
        }
        Ok::<_, ExecError>(retained)
    })?;

    let mut produced = Vec::with_capacity(retained.len());
    for (slot, array) in retained {
        cache.refresh(node, slot, frame, &array);
        produced.push(Produced {
            slot,
            var: plans[slot].var.clone(),
            array,
        });
    }
    Ok(produced)
}

// ---------------------------------------------------------------------------
// Destination cache
// ---------------------------------------------------------------------------

/// Output arrays of previous calls, keyed by (op node, output slot).
///
/// Only instances in the outer frame or at iteration 0 of a loop read or
/// refresh the cache; later iterations always get fresh arrays. A cached
/// array is reused only when its descriptor matches exactly.
#[derive(Debug, Default)]
pub struct DestinationCache {
    arrays: HashMap<(NodeId, usize), Array>,
}

impl DestinationCache {
    pub fn new() -> Self {
        DestinationCache::default()
    }

    fn applies_to(frame: &FrameIter) -> bool {
        frame.is_outer() || frame.iteration == 0
    }

    /// Takes the cached destination of `(node, slot)` if it can be written
    /// as an output of `descriptor` by an instance in `frame`.
    pub fn take_reusable(
        &mut self,
        node: NodeId,
        slot: usize,
        descriptor: &ArrayDescriptor,
        frame: &FrameIter,
    ) -> Option<Array> {
        if !Self::applies_to(frame) {
            return None;
        }
        let cached = self.arrays.remove(&(node, slot))?;
        if cached.descriptor() == descriptor && cached.is_detached() {
            tracing::trace!("reusing destination for node {} slot {}", node, slot);
            Some(cached)
        } else {
            tracing::trace!(
                "discarding destination for node {} slot {}: cached {}, need {}",
                node,
                slot,
                cached.descriptor(),
                descriptor
            );
            None
        }
    }

    /// Remembers `array` as the destination of `(node, slot)`.
    pub fn refresh(&mut self, node: NodeId, slot: usize, frame: &FrameIter, array: &Array) {
        if Self::applies_to(frame) && array.is_detached() {
            self.arrays.insert((node, slot), array.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn clear(&mut self) {
        self.arrays.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrograph_core::memory::{DetachedMemoryManager, WorkspaceMemoryManager};
    use ferrograph_core::ops::{ArithOp, BinaryArith};

    fn resolved(name: &str, frame: &FrameIter, array: Option<Array>) -> Resolved {
        Resolved {
            dep: Dep::Var(VarId::new(name, frame.clone())),
            array,
        }
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn repeated_arguments_collapse_to_one_input() {
        let outer = FrameIter::outer();
        let args = [
            resolved("t", &outer, Some(Array::scalar_i32(3))),
            resolved("t", &outer, Some(Array::scalar_i32(3))),
        ];
        let inputs = distinct_inputs("mul@main:0", &names(&["t", "t"]), &args).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0], Dep::Var(VarId::outer("t")));
    }

    #[test]
    fn distinct_names_must_stay_distinct() {
        let outer = FrameIter::outer();
        // Two names collapsing onto one dependency.
        let args = [
            resolved("a", &outer, Some(Array::scalar_i32(1))),
            resolved("a", &outer, Some(Array::scalar_i32(1))),
        ];
        let err = distinct_inputs("add@main:0", &names(&["a", "b"]), &args).unwrap_err();
        assert!(matches!(
            err,
            ExecError::InvariantViolation { ref instance, .. } if instance == "add@main:0"
        ));

        // One name resolving to two different frames.
        let args = [
            resolved("a", &outer, Some(Array::scalar_i32(1))),
            resolved("a", &outer.enter("while"), Some(Array::scalar_i32(1))),
        ];
        let err = distinct_inputs("add@main:0", &names(&["a", "a"]), &args).unwrap_err();
        assert!(matches!(err, ExecError::InvariantViolation { .. }));
    }

    #[test]
    fn identity_forwards_in_the_same_frame() {
        let body = FrameIter::outer().enter("while").next_iteration();
        let input = Array::vector_i32(&[7, 8]);
        let args = [resolved("x", &body, Some(input.clone()))];
        let produced = control_flow(
            &OpKind::Identity,
            "id@while:1",
            &body,
            &args,
            &names(&["y"]),
            10,
        )
        .unwrap();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].slot, 0);
        assert_eq!(produced[0].var, VarId::new("y", body));
        assert!(produced[0].array.shares_buffer(&input));
    }

    #[test]
    fn switch_routes_to_one_slot() {
        let outer = FrameIter::outer();
        for (predicate, slot) in [(true, 1), (false, 0)] {
            let args = [
                resolved("v", &outer, Some(Array::scalar_i32(5))),
                resolved("p", &outer, Some(Array::scalar_bool(predicate))),
            ];
            let produced = control_flow(
                &OpKind::Switch,
                "sw@main:0",
                &outer,
                &args,
                &names(&["f", "t"]),
                10,
            )
            .unwrap();
            assert_eq!(produced.len(), 1);
            assert_eq!(produced[0].slot, slot);
            assert_eq!(produced[0].array, Array::scalar_i32(5));
        }
    }

    #[test]
    fn predicates_must_be_bool_scalars() {
        let outer = FrameIter::outer();
        for bad in [Array::scalar_i32(1), Array::vector_bool(&[true])] {
            let args = [resolved("c", &outer, Some(bad.clone()))];
            let err = control_flow(
                &OpKind::LoopCond,
                "cond@main:0",
                &outer,
                &args,
                &names(&["out"]),
                10,
            )
            .unwrap_err();
            assert_eq!(
                err,
                ExecError::InvalidPredicate {
                    instance: "cond@main:0".into(),
                    got: bad.descriptor().clone(),
                }
            );
        }
    }

    #[test]
    fn enter_and_exit_move_between_frames() {
        let outer = FrameIter::outer();
        let enter = OpKind::Enter {
            frame: "while".into(),
            is_constant: false,
        };
        let args = [resolved("x", &outer, Some(Array::scalar_f32(1.0)))];
        let entered = control_flow(&enter, "e@main:0", &outer, &args, &names(&["xi"]), 10)
            .unwrap()
            .remove(0);
        assert_eq!(entered.var, VarId::new("xi", outer.enter("while")));

        let inside = outer.enter("while").next_iteration();
        let args = [resolved("xi", &inside, Some(Array::scalar_f32(1.0)))];
        let exited = control_flow(&OpKind::Exit, "x@while:1", &inside, &args, &names(&["out"]), 10)
            .unwrap()
            .remove(0);
        assert_eq!(exited.var, VarId::outer("out"));

        let args = [resolved("x", &outer, Some(Array::scalar_f32(1.0)))];
        let err = control_flow(&OpKind::Exit, "x@main:0", &outer, &args, &names(&["out"]), 10)
            .unwrap_err();
        assert!(matches!(err, ExecError::InvariantViolation { .. }));
    }

    #[test]
    fn next_iteration_must_advance_by_one() {
        let first = FrameIter::outer().enter("while");
        let third = first.next_iteration().next_iteration();

        let args = [resolved("x", &third, Some(Array::scalar_i32(0)))];
        let produced = control_flow(
            &OpKind::NextIteration,
            "n@while:2",
            &third,
            &args,
            &names(&["y"]),
            10,
        )
        .unwrap();
        assert_eq!(produced[0].var.frame.iteration, 3);

        // A loop invariant read from iteration 2 resolves at iteration 0.
        let args = [resolved("inv", &first, Some(Array::scalar_i32(0)))];
        let err = control_flow(
            &OpKind::NextIteration,
            "n@while:2",
            &third,
            &args,
            &names(&["y"]),
            10,
        )
        .unwrap_err();
        assert!(matches!(err, ExecError::InvariantViolation { .. }));

        let args = [resolved("x", &FrameIter::outer(), Some(Array::scalar_i32(0)))];
        let err = control_flow(
            &OpKind::NextIteration,
            "n@main:0",
            &FrameIter::outer(),
            &args,
            &names(&["y"]),
            10,
        )
        .unwrap_err();
        assert!(matches!(err, ExecError::InvariantViolation { .. }));
    }

    #[test]
    fn next_iteration_respects_the_limit() {
        let frame = FrameIter::new("while", 2, Some(FrameIter::outer()));
        let args = [resolved("x", &frame, Some(Array::scalar_i32(0)))];
        let err = control_flow(&OpKind::NextIteration, "n@while:2", &frame, &args, &names(&["y"]), 2)
            .unwrap_err();
        assert_eq!(
            err,
            ExecError::IterationLimitExceeded {
                frame: "while".into(),
                limit: 2
            }
        );
    }

    #[test]
    fn merge_forwards_first_available() {
        let outer = FrameIter::outer();
        let args = [
            resolved("a", &outer, None),
            resolved("b", &outer, Some(Array::scalar_i32(2))),
            resolved("c", &outer, Some(Array::scalar_i32(3))),
        ];
        let produced =
            control_flow(&OpKind::Merge, "m@main:0", &outer, &args, &names(&["m"]), 10).unwrap();
        assert_eq!(produced[0].array, Array::scalar_i32(2));

        let args = [resolved("a", &outer, None)];
        let err = control_flow(&OpKind::Merge, "m@main:0", &outer, &args, &names(&["m"]), 10)
            .unwrap_err();
        assert!(matches!(err, ExecError::IllegalState { .. }));
    }

    #[test]
    fn ordinary_outputs_are_detached_or_pooled() {
        let memory = WorkspaceMemoryManager::new();
        let mut cache = DestinationCache::new();
        let outer = FrameIter::outer();
        let op = BinaryArith::new(ArithOp::Add);
        let args = [Array::vector_i32(&[1, 2]), Array::vector_i32(&[3, 4])];

        for retained in [true, false] {
            let plans = [OutputPlan {
                var: VarId::outer("z"),
                dtype: None,
                retained,
            }];
            let call = OrdinaryCall {
                op: &op,
                instance: "add@main:0",
                op_name: "add",
                node: NodeId(2),
                frame: &outer,
                args: &args,
                plans: &plans,
            };
            let produced = run_ordinary(call, &memory, &mut cache).unwrap();
            if retained {
                assert_eq!(produced.len(), 1);
                assert!(produced[0].array.is_detached());
                assert_eq!(produced[0].array, Array::vector_i32(&[4, 6]));
            } else {
                assert!(produced.is_empty());
            }
        }
        let stats = memory.stats();
        assert_eq!(stats.detached_allocations, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.cached_buffers, 1);

        // The transient output was computed in pool memory and recycled.
        let recycled = memory
            .allocate(AllocationClass::Pooled, &ArrayDescriptor::new(DataType::I32, &[2]))
            .unwrap();
        assert_eq!(recycled.as_i32(), Some(&[4, 6][..]));
        assert_eq!(memory.stats().hits, 1);
    }

    #[test]
    fn transient_outputs_reuse_pool_buffers_across_calls() {
        let memory = WorkspaceMemoryManager::new();
        let mut cache = DestinationCache::new();
        let outer = FrameIter::outer();
        let op = BinaryArith::new(ArithOp::Mul);
        let plans = [OutputPlan {
            var: VarId::outer("scratch"),
            dtype: None,
            retained: false,
        }];

        for k in 1..=4 {
            let args = [Array::vector_f32(&[k as f32; 3]), Array::scalar_f32(2.0)];
            let call = OrdinaryCall {
                op: &op,
                instance: "mul@main:0",
                op_name: "mul",
                node: NodeId(4),
                frame: &outer,
                args: &args,
                plans: &plans,
            };
            assert!(run_ordinary(call, &memory, &mut cache).unwrap().is_empty());
        }

        let stats = memory.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.cached_buffers, 1);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn declared_dtype_overrides_inference() {
        #[derive(Debug)]
        struct Fill;
        impl Operation for Fill {
            fn op_name(&self) -> &str {
                "fill"
            }
            fn infer_output_shapes(
                &self,
                _inputs: &[ArrayDescriptor],
            ) -> Result<Vec<ArrayDescriptor>, OpError> {
                Ok(vec![ArrayDescriptor::new(DataType::F32, &[2])])
            }
            fn execute_in_place(
                &self,
                _ctx: &mut ExecutionContext<'_, '_>,
                _inputs: &[&Array],
                _outputs: &mut [Array],
            ) -> Result<(), OpError> {
                Ok(())
            }
        }

        let plans = [OutputPlan {
            var: VarId::outer("filled"),
            dtype: Some(DataType::F64),
            retained: true,
        }];
        let call = OrdinaryCall {
            op: &Fill,
            instance: "fill@main:0",
            op_name: "fill",
            node: NodeId(0),
            frame: &FrameIter::outer(),
            args: &[],
            plans: &plans,
        };
        let produced = run_ordinary(call, &DetachedMemoryManager, &mut DestinationCache::new()).unwrap();
        assert_eq!(
            produced[0].array.descriptor(),
            &ArrayDescriptor::new(DataType::F64, &[2])
        );
    }

    #[test]
    fn cache_skips_later_iterations() {
        let mut cache = DestinationCache::new();
        let descriptor = ArrayDescriptor::new(DataType::I32, &[2]);
        let first = FrameIter::outer().enter("while");
        let second = first.next_iteration();

        cache.refresh(NodeId(1), 0, &second, &Array::vector_i32(&[0, 0]));
        assert!(cache.is_empty());

        cache.refresh(NodeId(1), 0, &first, &Array::vector_i32(&[0, 0]));
        assert_eq!(cache.len(), 1);
        assert!(cache.take_reusable(NodeId(1), 0, &descriptor, &second).is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.take_reusable(NodeId(1), 0, &descriptor, &first).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_drops_mismatched_descriptors() {
        let mut cache = DestinationCache::new();
        let outer = FrameIter::outer();
        cache.refresh(NodeId(1), 0, &outer, &Array::vector_i32(&[0, 0]));
        let wider = ArrayDescriptor::new(DataType::I32, &[3]);
        assert!(cache.take_reusable(NodeId(1), 0, &wider, &outer).is_none());
        assert!(cache.is_empty());
    }
}
