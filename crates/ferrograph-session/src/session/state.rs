//! Session state and the per-call execution driver.
//!
//! A [`Session`] keeps what survives between calls: the shared graph and
//! memory manager, the configuration, the destination cache and the last
//! trace. Each call builds a private [`Execution`] that owns the results
//! store, the dependency tracker and the instance arena, and drops them when
//! the call returns.
//!
//! The driver is a work-list: an op instance becomes ready once its
//! dependencies are satisfied, runs, stores its outputs, and activates the
//! instances that read them. Loop iterations are not unrolled ahead of time;
//! an instance for iteration `k + 1` exists only once `NextIteration`
//! produced a value for it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexSet;

use ferrograph_core::array::Array;
use ferrograph_core::error::CoreError;
use ferrograph_core::frame::{FrameIter, VarId};
use ferrograph_core::graph::Graph;
use ferrograph_core::id::NodeId;
use ferrograph_core::memory::{DetachedMemoryManager, MemoryManager};
use ferrograph_core::node::{OpKind, OpNode, VariableKind};

use crate::tracker::{DependencyTracker, SatisfactionMode, TrackerError};

use super::dispatch::{self, DestinationCache, OrdinaryCall, OutputPlan, Produced, Resolved};
use super::error::ExecError;
use super::instance::{Dep, InstanceTable, OpInstanceId};
use super::results::ResultsStore;
use super::subgraph::Subgraph;
use super::trace::TraceEntry;

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether to record execution traces.
    pub trace_enabled: bool,
    /// Highest iteration a loop frame may reach. Default: 10 000.
    pub max_iterations: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            trace_enabled: false,
            max_iterations: 10_000,
        }
    }
}

/// Executes subgraphs of a shared [`Graph`].
///
/// Sessions are cheap to create. Several sessions may run the same graph
/// concurrently; the only state they share is the memory manager.
#[derive(Debug)]
pub struct Session {
    /// The graph being executed.
    graph: Arc<Graph>,
    /// Where output and scratch arrays come from.
    memory: Arc<dyn MemoryManager>,
    /// Configuration.
    config: SessionConfig,
    /// Output arrays of previous calls, reused when shapes are unchanged.
    destinations: DestinationCache,
    /// Trace of the last call (when enabled).
    trace: Option<Vec<TraceEntry>>,
}

impl Session {
    pub fn new(graph: Arc<Graph>, memory: Arc<dyn MemoryManager>, config: SessionConfig) -> Self {
        Session {
            graph,
            memory,
            config,
            destinations: DestinationCache::new(),
            trace: None,
        }
    }

    /// A session with a [`DetachedMemoryManager`] and default config.
    pub fn with_graph(graph: Arc<Graph>) -> Self {
        Session::new(graph, Arc::new(DetachedMemoryManager), SessionConfig::default())
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn memory(&self) -> &Arc<dyn MemoryManager> {
        &self.memory
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Trace of the most recent call, if tracing is enabled.
    pub fn trace(&self) -> Option<&[TraceEntry]> {
        self.trace.as_deref()
    }

    /// Number of output destinations held for reuse.
    pub fn cached_destinations(&self) -> usize {
        self.destinations.len()
    }

    pub fn clear_destinations(&mut self) {
        self.destinations.clear();
    }

    /// Computes the outer-frame values of `requested`.
    pub fn execute(
        &mut self,
        requested: &[&str],
        placeholders: &HashMap<String, Array>,
    ) -> Result<HashMap<String, Array>, ExecError> {
        let ids: Vec<VarId> = requested.iter().map(|name| VarId::outer(*name)).collect();
        let mut values = self.execute_at(&ids, placeholders)?;
        Ok(ids
            .into_iter()
            .filter_map(|id| values.remove(&id).map(|array| (id.name, array)))
            .collect())
    }

    /// Computes `requested` values at caller-chosen frames and iterations.
    ///
    /// Every returned array is detached. On error nothing is returned and
    /// every intermediate value has been released.
    pub fn execute_at(
        &mut self,
        requested: &[VarId],
        placeholders: &HashMap<String, Array>,
    ) -> Result<HashMap<VarId, Array>, ExecError> {
        self.trace = self.config.trace_enabled.then(Vec::new);
        tracing::debug!(
            "executing {} requested value(s) with {} placeholder(s)",
            requested.len(),
            placeholders.len()
        );

        let result = self.run(requested, placeholders);
        if let Err(err) = &result {
            tracing::warn!("execution failed: {}", err);
        }
        result
    }

    fn run(
        &mut self,
        requested: &[VarId],
        placeholders: &HashMap<String, Array>,
    ) -> Result<HashMap<VarId, Array>, ExecError> {
        let requested: IndexSet<VarId> = requested.iter().cloned().collect();
        let graph = self.graph.as_ref();
        let subgraph = Subgraph::select(graph, requested.iter().map(|id| id.name.as_str()))?;
        subgraph.check_placeholders(graph, placeholders)?;

        // Sources need no op to run.
        let mut outputs = HashMap::new();
        let mut computed = IndexSet::new();
        for id in requested {
            if graph.is_source(&id.name) {
                let value = source_value(graph, placeholders, &id.name)?;
                outputs.insert(id, value);
            } else {
                computed.insert(id);
            }
        }
        if computed.is_empty() {
            return Ok(outputs);
        }

        let execution = Execution {
            graph,
            memory: self.memory.as_ref(),
            config: &self.config,
            placeholders,
            subgraph,
            requested: computed,
            tracker: DependencyTracker::new(),
            instances: InstanceTable::new(),
            results: ResultsStore::new(),
            seen_frames: HashSet::new(),
            destinations: &mut self.destinations,
            trace: self.trace.as_mut(),
        };
        outputs.extend(execution.run()?);
        Ok(outputs)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Outcome of asking for an op instance.
enum Activation {
    /// Interned now; dependencies declared.
    Created,
    /// Already waiting or queued.
    Pending,
    /// Already executed.
    Retired,
}

/// Private state of one call.
struct Execution<'s> {
    graph: &'s Graph,
    memory: &'s dyn MemoryManager,
    config: &'s SessionConfig,
    placeholders: &'s HashMap<String, Array>,
    subgraph: Subgraph,
    /// Requested computed values. The call ends once all are stored.
    requested: IndexSet<VarId>,
    tracker: DependencyTracker<OpInstanceId, Dep>,
    instances: InstanceTable,
    results: ResultsStore,
    /// Loop frames whose invariant-only ops have been activated.
    seen_frames: HashSet<FrameIter>,
    destinations: &'s mut DestinationCache,
    trace: Option<&'s mut Vec<TraceEntry>>,
}

impl<'s> Execution<'s> {
    fn run(mut self) -> Result<HashMap<VarId, Array>, ExecError> {
        match self.drive() {
            Ok(()) => Ok(self.finish()),
            Err(err) => {
                self.results.release_all(self.memory);
                Err(err)
            }
        }
    }

    fn drive(&mut self) -> Result<(), ExecError> {
        for source in self.subgraph.sources() {
            self.tracker.mark_satisfied(Dep::Source(source.clone()));
        }
        let seeds = self.subgraph.seeds().to_vec();
        for op in seeds {
            self.activate(op, FrameIter::outer())?;
        }

        while !self.is_complete() {
            let id = match self.tracker.pop_ready() {
                Ok(Some(id)) => id,
                Ok(None) | Err(TrackerError::NotReady) => return Err(self.unresolvable()),
                Err(err) => return Err(err.into()),
            };
            self.execute_instance(id)?;
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.requested.iter().all(|id| self.results.contains(id))
    }

    fn finish(mut self) -> HashMap<VarId, Array> {
        let mut outputs = HashMap::with_capacity(self.requested.len());
        for id in &self.requested {
            if let Some(array) = self.results.take(id) {
                outputs.insert(id.clone(), detach(array));
            }
        }
        self.results.release_all(self.memory);
        tracing::debug!(
            "execution finished after {} op instance(s)",
            self.instances.len()
        );
        outputs
    }

    fn unresolvable(&self) -> ExecError {
        let missing = self
            .requested
            .iter()
            .filter(|id| !self.results.contains(id))
            .map(ToString::to_string)
            .collect();
        let pending = self
            .tracker
            .pending_targets()
            .into_iter()
            .map(|id| self.instance_label(*id))
            .collect();
        ExecError::UnresolvableGraph { missing, pending }
    }

    fn instance_label(&self, id: OpInstanceId) -> String {
        let Some(instance) = self.instances.get(id) else {
            return id.to_string();
        };
        match self.graph.get_op(instance.op) {
            Some(node) => format!("{}@{}", node.name, instance.frame),
            None => format!("{}@{}", id, instance.frame),
        }
    }

    /// Interns the instance of `op` in `frame`, declaring its dependencies
    /// the first time.
    fn activate(&mut self, op: NodeId, frame: FrameIter) -> Result<Activation, ExecError> {
        let (id, created) = self.instances.intern(op, frame.clone());
        if !created {
            return Ok(if self.tracker.is_retired(&id) {
                Activation::Retired
            } else {
                Activation::Pending
            });
        }

        let graph = self.graph;
        let node = op_node(graph, op)?;
        let deps: IndexSet<Dep> = node
            .inputs
            .iter()
            .map(|name| self.subgraph.resolve(graph, name, &frame))
            .collect();
        let mode = match node.kind {
            OpKind::Merge => SatisfactionMode::Any,
            _ => SatisfactionMode::All,
        };
        self.tracker.declare_dependencies(id, deps, mode)?;
        Ok(Activation::Created)
    }

    /// Activates the invariant-only ops of `frame` the first time any value
    /// of that frame is stored.
    fn observe_frame(&mut self, frame: &FrameIter) -> Result<(), ExecError> {
        if frame.is_outer() || !self.seen_frames.insert(frame.clone()) {
            return Ok(());
        }
        let ops = self.subgraph.invariant_only(&frame.frame).to_vec();
        for op in ops {
            self.activate(op, frame.clone())?;
        }
        Ok(())
    }

    fn execute_instance(&mut self, id: OpInstanceId) -> Result<(), ExecError> {
        let graph = self.graph;
        let instance = self
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| ExecError::IllegalState {
                instance: id.to_string(),
                reason: "popped an instance that was never interned".into(),
            })?;
        let node = op_node(graph, instance.op)?;
        let frame = instance.frame;
        let label = format!("{}@{}", node.name, frame);

        let args = node
            .inputs
            .iter()
            .map(|name| {
                let dep = self.subgraph.resolve(graph, name, &frame);
                let array = self.lookup(&dep)?;
                Ok(Resolved { dep, array })
            })
            .collect::<Result<Vec<_>, ExecError>>()?;
        let inputs = dispatch::distinct_inputs(&label, &node.inputs, &args)?;

        // Only Merge may run with inputs missing.
        if !matches!(node.kind, OpKind::Merge) {
            if let Some(arg) = args.iter().find(|arg| arg.array.is_none()) {
                return Err(ExecError::InvariantViolation {
                    instance: label,
                    reason: format!("input {} is not available", arg.dep),
                });
            }
        }

        tracing::debug!("executing {} ({})", label, node.kind.label());
        let produced = match &node.kind {
            OpKind::Ordinary(op) => {
                let arrays: Vec<Array> = args.iter().filter_map(|arg| arg.array.clone()).collect();
                let plans: Vec<OutputPlan> = node
                    .outputs
                    .iter()
                    .map(|name| {
                        let var = VarId::new(name.clone(), frame.clone());
                        let retained = self.requested.contains(&var)
                            || !self.subgraph.consumers_of(name).is_empty();
                        OutputPlan {
                            dtype: graph.variable(name).and_then(|v| v.dtype),
                            var,
                            retained,
                        }
                    })
                    .collect();
                let call = OrdinaryCall {
                    op: op.as_ref(),
                    instance: &label,
                    op_name: &node.name,
                    node: instance.op,
                    frame: &frame,
                    args: &arrays,
                    plans: &plans,
                };
                dispatch::run_ordinary(call, self.memory, self.destinations)?
            }
            kind => dispatch::control_flow(
                kind,
                &label,
                &frame,
                &args,
                &node.outputs,
                self.config.max_iterations,
            )?,
        };

        for dep in &inputs {
            if let Dep::Var(var) = dep {
                self.results.consume(var, self.memory);
            }
        }

        let mut stored = Vec::with_capacity(produced.len());
        for Produced { var, array, .. } in produced {
            if self.publish(&label, var.clone(), array)? {
                stored.push(var);
            }
        }

        if let Some(trace) = &mut self.trace {
            trace.push(TraceEntry {
                instance: id,
                op: node.name.clone(),
                kind: node.kind.label(),
                frame,
                inputs: inputs.into_iter().collect(),
                outputs: stored,
            });
        }
        Ok(())
    }

    fn lookup(&self, dep: &Dep) -> Result<Option<Array>, ExecError> {
        match dep {
            Dep::Source(name) => source_value(self.graph, self.placeholders, name).map(Some),
            Dep::Var(var) => Ok(self.results.get(var).cloned()),
        }
    }

    /// Stores `array` as the value of `var` and wakes its readers. Returns
    /// `false` if nothing reads the value and it was dropped.
    fn publish(&mut self, label: &str, var: VarId, array: Array) -> Result<bool, ExecError> {
        let consumers = self.subgraph.consumers_of(&var.name).to_vec();
        let pinned = self.requested.contains(&var) || self.subgraph.is_invariant(&var.name);
        if consumers.is_empty() && !pinned {
            tracing::trace!("dropping {}: no readers", var);
            return Ok(false);
        }

        self.results
            .insert(label, var.clone(), array, consumers.len(), pinned)?;
        self.observe_frame(&var.frame)?;

        for op in consumers {
            match self.activate(op, var.frame.clone())? {
                Activation::Created | Activation::Pending => {}
                Activation::Retired => {
                    let node = op_node(self.graph, op)?;
                    if !matches!(node.kind, OpKind::Merge) {
                        return Err(ExecError::InvariantViolation {
                            instance: label.to_string(),
                            reason: format!("{} arrived after {} had run", var, node.name),
                        });
                    }
                    // The merge already forwarded another input.
                    self.results.consume(&var, self.memory);
                }
            }
        }

        self.tracker.mark_satisfied(Dep::Var(var));
        Ok(true)
    }
}

fn op_node(graph: &Graph, op: NodeId) -> Result<&OpNode, ExecError> {
    graph
        .get_op(op)
        .ok_or(ExecError::Graph(CoreError::NodeNotFound { id: op }))
}

/// The value of a constant, trainable or placeholder.
fn source_value(
    graph: &Graph,
    placeholders: &HashMap<String, Array>,
    name: &str,
) -> Result<Array, ExecError> {
    let var = graph
        .variable(name)
        .ok_or_else(|| ExecError::UnknownVariable {
            name: name.to_string(),
        })?;
    let value = match var.kind {
        VariableKind::Placeholder => {
            placeholders
                .get(name)
                .ok_or_else(|| ExecError::MissingPlaceholder {
                    name: name.to_string(),
                })?
        }
        _ => var.value.as_ref().ok_or_else(|| ExecError::IllegalState {
            instance: name.to_string(),
            reason: "source variable has no value".into(),
        })?,
    };
    Ok(detach(value.clone()))
}

fn detach(array: Array) -> Array {
    if array.is_detached() {
        array
    } else {
        array.to_detached()
    }
}
