use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use super::node::{
    GraphId, GraphNode, HostNodeParams, KernelNodeParams, Memcpy1DParams,
    MemcpyFromSymbolParams, MemcpyToSymbolParams, MemsetParams, NodeKind, NodeParams,
};
use super::op::Op;
use super::validate::{self, CopyFootprint};
use super::Graph;
use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::Runtime;
use crate::stream::Stream;

#[derive(Clone)]
pub(crate) struct PlanNode {
    slot: u32,
    params: NodeParams,
    op: Op,
    footprint: Option<CopyFootprint>,
}

impl PlanNode {
    fn kind(&self) -> NodeKind {
        self.params.kind()
    }
}

/// Validated snapshot of a graph in execution order.
#[derive(Clone)]
pub(crate) struct ExecPlan {
    graph: GraphId,
    order: Vec<PlanNode>,
    index: HashMap<u32, usize>,
    edges: Vec<(u32, u32)>,
}

impl ExecPlan {
    pub(crate) fn build(graph: &Graph) -> RuntimeResult<Self> {
        let slots = graph.topological_slots()?;
        let mut order = Vec::with_capacity(slots.len());
        let mut index = HashMap::with_capacity(slots.len());
        for slot in slots {
            let params = graph
                .slot_params(slot)
                .cloned()
                .ok_or_else(|| RuntimeError::invalid_value(format!("node {slot} vanished")))?;
            let compiled = validate::compile(graph.runtime(), &params)?;
            index.insert(slot, order.len());
            order.push(PlanNode {
                slot,
                params,
                op: compiled.op,
                footprint: compiled.footprint,
            });
        }
        let mut edges = graph.edge_slots();
        edges.sort_unstable();
        Ok(Self {
            graph: graph.id(),
            order,
            index,
            edges,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn execute(&self, runtime: &Runtime) -> RuntimeResult<()> {
        for node in &self.order {
            trace!(graph = self.graph.as_raw(), slot = node.slot, op = node.op.label(), "node");
            node.op.execute(runtime)?;
        }
        Ok(())
    }

    fn position(&self, node: GraphNode) -> RuntimeResult<usize> {
        if node.graph != self.graph {
            return Err(RuntimeError::invalid_value(format!(
                "node of graph {} is not part of this instance",
                node.graph.as_raw()
            )));
        }
        self.index.get(&node.slot).copied().ok_or_else(|| {
            RuntimeError::invalid_value(format!("node {} was not instantiated", node.slot))
        })
    }

    /// Same slots, kinds and edges.
    fn same_topology(&self, other: &ExecPlan) -> bool {
        self.len() == other.len()
            && self.edges == other.edges
            && self.order.iter().all(|node| {
                other
                    .index
                    .get(&node.slot)
                    .is_some_and(|at| other.order[*at].kind() == node.kind())
            })
    }

    /// Validates `params` as a replacement for `current` without touching the plan.
    fn prepare(
        runtime: &Runtime,
        current: &PlanNode,
        params: NodeParams,
    ) -> RuntimeResult<PlanNode> {
        if current.kind() != params.kind() {
            return Err(RuntimeError::invalid_value(format!(
                "cannot update a {:?} node with {:?} parameters",
                current.kind(),
                params.kind()
            )));
        }
        let (op, footprint) = match validate::copy_request(runtime, &params) {
            Some(request) => {
                let request = request?;
                let footprint = request.footprint();
                if let Some(previous) = &current.footprint {
                    previous.check_update(&footprint)?;
                }
                (request.resolve()?, Some(footprint))
            }
            None => {
                let compiled = validate::compile(runtime, &params)?;
                if let (Op::Graph(old), Op::Graph(new)) = (&current.op, &compiled.op) {
                    if !old.same_topology(new) {
                        return Err(RuntimeError::invalid_value(
                            "child graph topology differs from the instantiated one",
                        ));
                    }
                }
                (compiled.op, compiled.footprint)
            }
        };
        Ok(PlanNode {
            slot: current.slot,
            params,
            op,
            footprint,
        })
    }

    /// Rebuilds an equivalent graph, used when an instance is launched into a capture.
    fn to_graph(&self, runtime: &Runtime) -> RuntimeResult<Graph> {
        let mut graph = Graph::new(runtime);
        let mut mapped: HashMap<u32, GraphNode> = HashMap::with_capacity(self.len());
        for node in &self.order {
            let deps: Vec<GraphNode> = self
                .edges
                .iter()
                .filter(|(_, to)| *to == node.slot)
                .filter_map(|(from, _)| mapped.get(from).copied())
                .collect();
            let handle = graph.add_node(&deps, node.params.clone())?;
            mapped.insert(node.slot, handle);
        }
        Ok(graph)
    }
}

/// Executable instance of a [`Graph`].
///
/// The instance owns its own copy of topology and parameters: later edits to the source graph
/// (or dropping it) do not affect it. Launching takes `&self` so one instance can be launched
/// on several streams at once; parameter updates take `&mut self` and apply to later launches.
pub struct GraphExec {
    runtime: Runtime,
    plan: Arc<ExecPlan>,
}

impl GraphExec {
    pub(crate) fn new(graph: &Graph) -> RuntimeResult<Self> {
        let plan = ExecPlan::build(graph)?;
        debug!(
            graph = graph.id().as_raw(),
            nodes = plan.len(),
            edges = plan.edges.len(),
            "instantiated graph"
        );
        Ok(Self {
            runtime: graph.runtime().clone(),
            plan: Arc::new(plan),
        })
    }

    pub fn graph_id(&self) -> GraphId {
        self.plan.graph
    }

    pub fn node_count(&self) -> usize {
        self.plan.len()
    }

    pub fn contains(&self, node: GraphNode) -> bool {
        self.plan.position(node).is_ok()
    }

    pub fn node_kind(&self, node: GraphNode) -> RuntimeResult<NodeKind> {
        let at = self.plan.position(node)?;
        Ok(self.plan.order[at].kind())
    }

    pub fn node_params(&self, node: GraphNode) -> RuntimeResult<&NodeParams> {
        let at = self.plan.position(node)?;
        Ok(&self.plan.order[at].params)
    }

    /// Execution order chosen at instantiation.
    pub fn execution_order(&self) -> Vec<GraphNode> {
        self.plan
            .order
            .iter()
            .map(|node| GraphNode::from_parts(self.plan.graph, node.slot))
            .collect()
    }

    /// Enqueues one run of the whole instance on `stream`. A capturing stream records the
    /// instance as a child-graph node instead.
    pub fn launch(&self, stream: &Stream) -> RuntimeResult<()> {
        if stream.is_capturing() {
            let graph = self.plan.to_graph(&self.runtime)?;
            return stream.submit(NodeParams::ChildGraph(graph));
        }
        stream.submit_op(Op::Graph(Arc::clone(&self.plan)))
    }

    /// Graph equivalent of the current instance state.
    pub fn to_graph(&self) -> RuntimeResult<Graph> {
        self.plan.to_graph(&self.runtime)
    }

    pub fn set_node_params(&mut self, node: GraphNode, params: NodeParams) -> RuntimeResult<()> {
        let at = self.plan.position(node)?;
        let updated = ExecPlan::prepare(&self.runtime, &self.plan.order[at], params)?;
        Arc::make_mut(&mut self.plan).order[at] = updated;
        Ok(())
    }

    pub fn set_host_node_params(
        &mut self,
        node: GraphNode,
        params: HostNodeParams,
    ) -> RuntimeResult<()> {
        self.set_node_params(node, NodeParams::Host(params))
    }

    pub fn set_memcpy_node_params_1d(
        &mut self,
        node: GraphNode,
        params: Memcpy1DParams,
    ) -> RuntimeResult<()> {
        self.set_node_params(node, NodeParams::Memcpy1D(params))
    }

    pub fn set_memcpy_node_params_to_symbol(
        &mut self,
        node: GraphNode,
        params: MemcpyToSymbolParams,
    ) -> RuntimeResult<()> {
        self.set_node_params(node, NodeParams::MemcpyToSymbol(params))
    }

    pub fn set_memcpy_node_params_from_symbol(
        &mut self,
        node: GraphNode,
        params: MemcpyFromSymbolParams,
    ) -> RuntimeResult<()> {
        self.set_node_params(node, NodeParams::MemcpyFromSymbol(params))
    }

    pub fn set_memset_node_params(
        &mut self,
        node: GraphNode,
        params: MemsetParams,
    ) -> RuntimeResult<()> {
        self.set_node_params(node, NodeParams::Memset(params))
    }

    pub fn set_kernel_node_params(
        &mut self,
        node: GraphNode,
        params: KernelNodeParams,
    ) -> RuntimeResult<()> {
        self.set_node_params(node, NodeParams::Kernel(params))
    }

    pub fn set_child_graph_node_params(
        &mut self,
        node: GraphNode,
        child: &Graph,
    ) -> RuntimeResult<()> {
        self.set_node_params(node, NodeParams::ChildGraph(child.clone_graph()))
    }

    /// Refreshes every node's parameters from `graph`, which must match this instance in node
    /// slots, kinds and edges. Nothing changes unless every node validates.
    pub fn update(&mut self, graph: &Graph) -> RuntimeResult<()> {
        let candidate = ExecPlan::build(graph)?;
        if !self.plan.same_topology(&candidate) {
            return Err(RuntimeError::invalid_value(
                "graph topology differs from the instance",
            ));
        }
        let mut order = Vec::with_capacity(self.plan.len());
        for current in &self.plan.order {
            let at = candidate.position(GraphNode::from_parts(candidate.graph, current.slot))?;
            let params = candidate.order[at].params.clone();
            order.push(ExecPlan::prepare(&self.runtime, current, params)?);
        }
        Arc::make_mut(&mut self.plan).order = order;
        Ok(())
    }
}
