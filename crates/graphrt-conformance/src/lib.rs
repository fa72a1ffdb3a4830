//! Conformance checks shared by every way of constructing a [`graphrt::Runtime`].
//!
//! Each check takes the runtime under test and panics on a violation, so it can be called from
//! a `#[test]` directly or through [`define_conformance_tests!`].

pub mod exec;
pub mod graph;
pub mod pipeline;
pub mod symbols;

use graphrt::{ErrorCode, RuntimeResult};

/// Asserts that `result` failed with `code`.
#[track_caller]
pub fn expect_code<T: std::fmt::Debug>(result: RuntimeResult<T>, code: ErrorCode) {
    match result {
        Ok(value) => panic!("expected {code}, got Ok({value:?})"),
        Err(err) => assert_eq!(err.code(), code, "unexpected error: {err}"),
    }
}

#[macro_export]
macro_rules! define_conformance_tests {
    ($module:ident, $runtime_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            use $crate::{exec, graph, pipeline, symbols};

            macro_rules! conformance_test {
                ($name:ident, $func:path) => {
                    #[test]
                    fn $name() {
                        let runtime = ($runtime_ctor)();
                        $func(&runtime);
                    }
                };
            }

            conformance_test!(graph_root_nodes_two_call, graph::root_nodes_two_call);
            conformance_test!(graph_root_nodes_short_buffer, graph::root_nodes_short_buffer);
            conformance_test!(graph_root_nodes_long_buffer, graph::root_nodes_long_buffer);
            conformance_test!(graph_root_nodes_empty_graph, graph::root_nodes_empty_graph);
            conformance_test!(graph_add_node_rejects_bad_dependencies, graph::add_node_rejects_bad_dependencies);
            conformance_test!(graph_add_dependencies_validates_edges, graph::add_dependencies_validates_edges);
            conformance_test!(graph_clone_preserves_structure, graph::clone_preserves_structure);
            conformance_test!(graph_destroy_node_removes_edges, graph::destroy_node_removes_edges);

            conformance_test!(exec_host_params_replace_callback, exec::host_params_replace_callback);
            conformance_test!(exec_host_params_negative, exec::host_params_negative);
            conformance_test!(exec_instance_outlives_graph, exec::instance_outlives_graph);
            conformance_test!(exec_updates_leave_siblings_alone, exec::updates_leave_siblings_alone);

            conformance_test!(symbols_add_from_symbol_nodes, symbols::add_from_symbol_nodes);
            conformance_test!(symbols_add_to_symbol_nodes, symbols::add_to_symbol_nodes);
            conformance_test!(symbols_exec_from_symbol_set_params, symbols::exec_from_symbol_set_params);
            conformance_test!(symbols_exec_to_symbol_set_params, symbols::exec_to_symbol_set_params);
            conformance_test!(symbols_from_symbol_negative, symbols::from_symbol_negative);
            conformance_test!(symbols_to_symbol_negative, symbols::to_symbol_negative);
            conformance_test!(symbols_exec_from_symbol_negative, symbols::exec_from_symbol_negative);
            conformance_test!(symbols_exec_from_symbol_direction_change, symbols::exec_from_symbol_direction_change);

            conformance_test!(pipeline_vector_add_graph, pipeline::vector_add_graph);
            conformance_test!(pipeline_captured_fork_join, pipeline::captured_fork_join);
            conformance_test!(pipeline_memset_fills_every_allocation_kind, pipeline::memset_fills_every_allocation_kind);
            conformance_test!(pipeline_bit_extract_matches_reference, pipeline::bit_extract_matches_reference);
            conformance_test!(pipeline_bit_insert_matches_reference, pipeline::bit_insert_matches_reference);
        }
    };
}
