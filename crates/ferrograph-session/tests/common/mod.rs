//! Graph builders and helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use ferrograph_core::array::Array;
use ferrograph_core::frame::FrameIter;
use ferrograph_core::graph::Graph;
use ferrograph_core::memory::MemoryManager;
use ferrograph_core::ops::{ArithOp, BinaryArith, CmpOp, Compare};
use ferrograph_core::types::DataType;
use ferrograph_session::{Session, SessionConfig};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Routes session logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn feeds(values: &[(&str, Array)]) -> HashMap<String, Array> {
    values
        .iter()
        .map(|(name, array)| (name.to_string(), array.clone()))
        .collect()
}

pub fn session(graph: Graph, memory: Arc<dyn MemoryManager>, trace_enabled: bool) -> Session {
    let config = SessionConfig {
        trace_enabled,
        ..SessionConfig::default()
    };
    Session::new(graph.into_shared(), memory, config)
}

/// Iteration `k` of loop frame `frame` entered from the outer frame.
pub fn iteration(frame: &str, k: u32) -> FrameIter {
    FrameIter::new(frame, k, Some(FrameIter::outer()))
}

fn add() -> BinaryArith {
    BinaryArith::new(ArithOp::Add)
}

// ---------------------------------------------------------------------------
// Graph builders
// ---------------------------------------------------------------------------

/// z = add(x, y)
pub fn build_add_graph() -> Graph {
    let mut graph = Graph::new();
    graph.add_placeholder("x", None).unwrap();
    graph.add_placeholder("y", None).unwrap();
    graph.add_ordinary("add", add(), &["x", "y"], &["z"]).unwrap();
    graph
}

/// Counts `i` in frame `loop` from 0 while `i < limit`. `limit` is an I32
/// placeholder; the final count is exported as `i_out`.
pub fn build_counter_loop() -> Graph {
    let mut graph = Graph::new();
    graph.add_constant("start", Array::scalar_i32(0)).unwrap();
    graph.add_constant("one", Array::scalar_i32(1)).unwrap();
    graph.add_placeholder("limit", Some(DataType::I32)).unwrap();

    graph.add_enter("enter_start", "loop", false, "start", "i_entered").unwrap();
    graph.add_enter("enter_limit", "loop", true, "limit", "limit_in").unwrap();
    graph.add_enter("enter_one", "loop", true, "one", "one_in").unwrap();
    graph.add_merge("merge", &["i_entered", "i_next"], "i_cur").unwrap();
    graph
        .add_ordinary("less", Compare::new(CmpOp::Lt), &["i_cur", "limit_in"], &["cond"])
        .unwrap();
    graph.add_loop_cond("loop_cond", "cond", "pred").unwrap();
    graph.add_switch("switch", "i_cur", "pred", "i_false", "i_true").unwrap();
    graph.add_exit("exit", "i_false", "i_out").unwrap();
    graph
        .add_ordinary("increment", add(), &["i_true", "one_in"], &["i_inc"])
        .unwrap();
    graph.add_next_iteration("next", "i_inc", "i_next").unwrap();
    graph
}

/// Two nested loops. The outer loop runs `outer_limit` times; each outer
/// iteration runs an inner loop counting `j` up to `inner_limit` and adds
/// the final `j` to a running `total`, exported as `total_out`.
pub fn build_nested_loops(outer_limit: i32, inner_limit: i32) -> Graph {
    let mut graph = Graph::new();
    graph.add_constant("zero", Array::scalar_i32(0)).unwrap();
    graph.add_constant("one", Array::scalar_i32(1)).unwrap();
    graph.add_constant("outer_limit", Array::scalar_i32(outer_limit)).unwrap();
    graph.add_constant("inner_limit", Array::scalar_i32(inner_limit)).unwrap();

    // Outer loop state: i and total.
    graph.add_enter("enter_i", "outer", false, "zero", "i_entered").unwrap();
    graph.add_enter("enter_total", "outer", false, "zero", "total_entered").unwrap();
    graph.add_enter("enter_olimit", "outer", true, "outer_limit", "olimit").unwrap();
    graph.add_enter("enter_one_o", "outer", true, "one", "one_o").unwrap();
    graph.add_enter("enter_ilimit_o", "outer", true, "inner_limit", "ilimit_o").unwrap();
    graph.add_merge("merge_i", &["i_entered", "i_next"], "i_cur").unwrap();
    graph.add_merge("merge_total", &["total_entered", "total_next"], "total_cur").unwrap();
    graph
        .add_ordinary("outer_less", Compare::new(CmpOp::Lt), &["i_cur", "olimit"], &["o_cond"])
        .unwrap();
    graph.add_loop_cond("outer_cond", "o_cond", "o_pred").unwrap();
    graph.add_switch("switch_i", "i_cur", "o_pred", "i_done", "i_body").unwrap();
    graph
        .add_switch("switch_total", "total_cur", "o_pred", "total_done", "total_body")
        .unwrap();
    graph.add_exit("exit_total", "total_done", "total_out").unwrap();

    // Inner loop, entered once per outer iteration.
    graph
        .add_ordinary("j_start", BinaryArith::new(ArithOp::Sub), &["i_body", "i_body"], &["j_zero"])
        .unwrap();
    graph.add_enter("enter_j", "inner", false, "j_zero", "j_entered").unwrap();
    graph.add_enter("enter_ilimit", "inner", true, "ilimit_o", "ilimit").unwrap();
    graph.add_enter("enter_one_i", "inner", true, "one_o", "one_i").unwrap();
    graph.add_merge("merge_j", &["j_entered", "j_next"], "j_cur").unwrap();
    graph
        .add_ordinary("inner_less", Compare::new(CmpOp::Lt), &["j_cur", "ilimit"], &["i_cond"])
        .unwrap();
    graph.add_loop_cond("inner_cond", "i_cond", "i_pred").unwrap();
    graph.add_switch("switch_j", "j_cur", "i_pred", "j_done", "j_body").unwrap();
    graph.add_exit("exit_j", "j_done", "j_out").unwrap();
    graph.add_ordinary("inc_j", add(), &["j_body", "one_i"], &["j_inc"]).unwrap();
    graph.add_next_iteration("next_j", "j_inc", "j_next").unwrap();

    // Outer loop updates.
    graph
        .add_ordinary("accumulate", add(), &["total_body", "j_out"], &["total_inc"])
        .unwrap();
    graph.add_next_iteration("next_total", "total_inc", "total_next").unwrap();
    graph.add_ordinary("inc_i", add(), &["i_body", "one_o"], &["i_inc"]).unwrap();
    graph.add_next_iteration("next_i", "i_inc", "i_next").unwrap();
    graph
}
