use std::collections::BTreeSet;
use std::fmt;

use smallvec::SmallVec;

use super::exec::GraphExec;
use super::node::{
    GraphId, GraphNode, HostNodeParams, KernelNodeParams, Memcpy1DParams,
    MemcpyFromSymbolParams, MemcpyToSymbolParams, MemsetParams, NodeKind, NodeParams,
};
use super::validate;
use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::Runtime;

type Edges = SmallVec<[u32; 4]>;

#[derive(Clone)]
struct NodeRecord {
    params: NodeParams,
    deps: Edges,
    dependents: Edges,
}

/// Mutable DAG of operations.
///
/// Nodes live in slots that are never reused, so a handle to a destroyed node (or to a node
/// of another graph) is detected instead of aliasing a newer node.
pub struct Graph {
    runtime: Runtime,
    id: GraphId,
    /// Graph this one was cloned from and how many slots it had at that point.
    origin: Option<(GraphId, u32)>,
    nodes: Vec<Option<NodeRecord>>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

impl Clone for Graph {
    fn clone(&self) -> Self {
        self.clone_graph()
    }
}

impl Graph {
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            id: GraphId::fresh(),
            origin: None,
            nodes: Vec::new(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().flatten().map(|record| record.deps.len()).sum()
    }

    fn handle(&self, slot: u32) -> GraphNode {
        GraphNode::from_parts(self.id, slot)
    }

    fn record(&self, node: GraphNode) -> RuntimeResult<&NodeRecord> {
        if node.graph != self.id {
            return Err(RuntimeError::invalid_value(format!(
                "node belongs to graph {} not graph {}",
                node.graph.as_raw(),
                self.id.as_raw()
            )));
        }
        self.nodes
            .get(node.slot as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| RuntimeError::invalid_value(format!("node {} does not exist", node.slot)))
    }

    fn record_mut(&mut self, slot: u32) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(slot as usize).and_then(Option::as_mut)
    }

    pub fn contains(&self, node: GraphNode) -> bool {
        self.record(node).is_ok()
    }

    /// Adds a node depending on `deps`. Validation failures leave the graph untouched.
    pub fn add_node(&mut self, deps: &[GraphNode], params: NodeParams) -> RuntimeResult<GraphNode> {
        let mut slots = Edges::new();
        for dep in deps {
            self.record(*dep)?;
            if slots.contains(&dep.slot) {
                return Err(RuntimeError::invalid_value(format!(
                    "dependency {} listed twice",
                    dep.slot
                )));
            }
            slots.push(dep.slot);
        }
        validate::compile(&self.runtime, &params)?;

        let slot = u32::try_from(self.nodes.len())
            .map_err(|_| RuntimeError::out_of_memory("graph node slots exhausted"))?;
        for dep in &slots {
            if let Some(record) = self.record_mut(*dep) {
                record.dependents.push(slot);
            }
        }
        self.nodes.push(Some(NodeRecord {
            params,
            deps: slots,
            dependents: Edges::new(),
        }));
        Ok(self.handle(slot))
    }

    pub fn add_empty_node(&mut self, deps: &[GraphNode]) -> RuntimeResult<GraphNode> {
        self.add_node(deps, NodeParams::Empty)
    }

    pub fn add_host_node(
        &mut self,
        deps: &[GraphNode],
        params: HostNodeParams,
    ) -> RuntimeResult<GraphNode> {
        self.add_node(deps, NodeParams::Host(params))
    }

    pub fn add_memcpy_node_1d(
        &mut self,
        deps: &[GraphNode],
        params: Memcpy1DParams,
    ) -> RuntimeResult<GraphNode> {
        self.add_node(deps, NodeParams::Memcpy1D(params))
    }

    pub fn add_memcpy_node_to_symbol(
        &mut self,
        deps: &[GraphNode],
        params: MemcpyToSymbolParams,
    ) -> RuntimeResult<GraphNode> {
        self.add_node(deps, NodeParams::MemcpyToSymbol(params))
    }

    pub fn add_memcpy_node_from_symbol(
        &mut self,
        deps: &[GraphNode],
        params: MemcpyFromSymbolParams,
    ) -> RuntimeResult<GraphNode> {
        self.add_node(deps, NodeParams::MemcpyFromSymbol(params))
    }

    pub fn add_memset_node(
        &mut self,
        deps: &[GraphNode],
        params: MemsetParams,
    ) -> RuntimeResult<GraphNode> {
        self.add_node(deps, NodeParams::Memset(params))
    }

    pub fn add_kernel_node(
        &mut self,
        deps: &[GraphNode],
        params: KernelNodeParams,
    ) -> RuntimeResult<GraphNode> {
        self.add_node(deps, NodeParams::Kernel(params))
    }

    /// Embeds a copy of `child`; later changes to `child` do not reach this graph.
    pub fn add_child_graph_node(
        &mut self,
        deps: &[GraphNode],
        child: &Graph,
    ) -> RuntimeResult<GraphNode> {
        self.add_node(deps, NodeParams::ChildGraph(child.clone_graph()))
    }

    fn link(&mut self, from: u32, to: u32) {
        if let Some(record) = self.record_mut(from) {
            record.dependents.push(to);
        }
        if let Some(record) = self.record_mut(to) {
            record.deps.push(from);
        }
    }

    fn unlink(&mut self, from: u32, to: u32) {
        if let Some(record) = self.record_mut(from) {
            record.dependents.retain(|slot| *slot != to);
        }
        if let Some(record) = self.record_mut(to) {
            record.deps.retain(|slot| *slot != from);
        }
    }

    fn has_edge(&self, from: u32, to: u32) -> bool {
        self.nodes[to as usize]
            .as_ref()
            .is_some_and(|record| record.deps.contains(&from))
    }

    /// Whether `target` is reachable from `start` over existing edges plus `extra`.
    fn reaches(&self, start: u32, target: u32, extra: &[(u32, u32)]) -> bool {
        let mut stack = vec![start];
        let mut seen = BTreeSet::new();
        while let Some(slot) = stack.pop() {
            if slot == target {
                return true;
            }
            if !seen.insert(slot) {
                continue;
            }
            if let Some(record) = self.nodes[slot as usize].as_ref() {
                stack.extend(record.dependents.iter().copied());
            }
            stack.extend(
                extra
                    .iter()
                    .filter(|(from, _)| *from == slot)
                    .map(|(_, to)| *to),
            );
        }
        false
    }

    /// Adds `from[i] -> to[i]` for every pair. Existing edges are accepted as no-ops; any
    /// invalid pair rejects the whole batch.
    pub fn add_dependencies(&mut self, from: &[GraphNode], to: &[GraphNode]) -> RuntimeResult<()> {
        if from.len() != to.len() {
            return Err(RuntimeError::invalid_value(format!(
                "{} sources for {} destinations",
                from.len(),
                to.len()
            )));
        }
        let mut pending: Vec<(u32, u32)> = Vec::new();
        for (src, dst) in from.iter().zip(to) {
            self.record(*src)?;
            self.record(*dst)?;
            if src.slot == dst.slot {
                return Err(RuntimeError::invalid_value("node cannot depend on itself"));
            }
            let edge = (src.slot, dst.slot);
            if self.has_edge(src.slot, dst.slot) || pending.contains(&edge) {
                continue;
            }
            if self.reaches(dst.slot, src.slot, &pending) {
                return Err(RuntimeError::invalid_value(format!(
                    "edge {} -> {} would create a cycle",
                    src.slot, dst.slot
                )));
            }
            pending.push(edge);
        }
        for (src, dst) in pending {
            self.link(src, dst);
        }
        Ok(())
    }

    pub fn remove_dependencies(
        &mut self,
        from: &[GraphNode],
        to: &[GraphNode],
    ) -> RuntimeResult<()> {
        if from.len() != to.len() {
            return Err(RuntimeError::invalid_value(format!(
                "{} sources for {} destinations",
                from.len(),
                to.len()
            )));
        }
        let mut removed: Vec<(u32, u32)> = Vec::new();
        for (src, dst) in from.iter().zip(to) {
            self.record(*src)?;
            self.record(*dst)?;
            let edge = (src.slot, dst.slot);
            if !self.has_edge(src.slot, dst.slot) || removed.contains(&edge) {
                return Err(RuntimeError::invalid_value(format!(
                    "no edge {} -> {}",
                    src.slot, dst.slot
                )));
            }
            removed.push(edge);
        }
        for (src, dst) in removed {
            self.unlink(src, dst);
        }
        Ok(())
    }

    /// Removes `node` and every edge touching it.
    pub fn destroy_node(&mut self, node: GraphNode) -> RuntimeResult<()> {
        self.record(node)?;
        let Some(record) = self.nodes[node.slot as usize].take() else {
            return Ok(());
        };
        for dep in record.deps {
            self.unlink(dep, node.slot);
        }
        for dependent in record.dependents {
            self.unlink(node.slot, dependent);
        }
        Ok(())
    }

    fn live_slots(&self) -> impl Iterator<Item = (u32, &NodeRecord)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(slot, record)| record.as_ref().map(|record| (slot as u32, record)))
    }

    /// Live nodes in creation order.
    pub fn nodes(&self) -> Vec<GraphNode> {
        self.live_slots().map(|(slot, _)| self.handle(slot)).collect()
    }

    /// Every `(from, to)` edge, grouped by destination in creation order.
    pub fn edges(&self) -> Vec<(GraphNode, GraphNode)> {
        self.edge_slots()
            .into_iter()
            .map(|(from, to)| (self.handle(from), self.handle(to)))
            .collect()
    }

    pub(crate) fn edge_slots(&self) -> Vec<(u32, u32)> {
        self.live_slots()
            .flat_map(|(slot, record)| record.deps.iter().map(move |dep| (*dep, slot)))
            .collect()
    }

    /// Nodes without incoming edges, in creation order.
    pub fn root_nodes(&self) -> Vec<GraphNode> {
        self.live_slots()
            .filter(|(_, record)| record.deps.is_empty())
            .map(|(slot, _)| self.handle(slot))
            .collect()
    }

    pub fn root_count(&self) -> usize {
        self.live_slots()
            .filter(|(_, record)| record.deps.is_empty())
            .count()
    }

    /// Nodes without outgoing edges, in creation order.
    pub fn leaf_nodes(&self) -> Vec<GraphNode> {
        self.live_slots()
            .filter(|(_, record)| record.dependents.is_empty())
            .map(|(slot, _)| self.handle(slot))
            .collect()
    }

    /// Two-call root enumeration.
    ///
    /// Without a buffer `*count` receives the number of roots. With a buffer the first
    /// `*count` slots are filled; when `*count` exceeds the number of roots the surplus slots
    /// are set to `None` and `*count` is lowered to the root count, otherwise it is left as is.
    pub fn get_root_nodes(
        &self,
        out: Option<&mut [Option<GraphNode>]>,
        count: &mut usize,
    ) -> RuntimeResult<()> {
        let roots = self.root_nodes();
        let Some(out) = out else {
            *count = roots.len();
            return Ok(());
        };
        if *count > out.len() {
            return Err(RuntimeError::invalid_value(format!(
                "count {} exceeds the {} entry buffer",
                *count,
                out.len()
            )));
        }
        for (index, entry) in out.iter_mut().take(*count).enumerate() {
            *entry = roots.get(index).copied();
        }
        if *count > roots.len() {
            *count = roots.len();
        }
        Ok(())
    }

    pub fn node_kind(&self, node: GraphNode) -> RuntimeResult<NodeKind> {
        Ok(self.record(node)?.params.kind())
    }

    pub fn node_params(&self, node: GraphNode) -> RuntimeResult<&NodeParams> {
        Ok(&self.record(node)?.params)
    }

    pub fn node_dependencies(&self, node: GraphNode) -> RuntimeResult<Vec<GraphNode>> {
        let record = self.record(node)?;
        Ok(record.deps.iter().map(|slot| self.handle(*slot)).collect())
    }

    pub fn node_dependents(&self, node: GraphNode) -> RuntimeResult<Vec<GraphNode>> {
        let record = self.record(node)?;
        Ok(record
            .dependents
            .iter()
            .map(|slot| self.handle(*slot))
            .collect())
    }

    /// Replaces the parameters of `node`; the kind must stay the same.
    pub fn set_node_params(&mut self, node: GraphNode, params: NodeParams) -> RuntimeResult<()> {
        let current = self.record(node)?.params.kind();
        if current != params.kind() {
            return Err(RuntimeError::invalid_value(format!(
                "cannot change a {current:?} node into a {:?} node",
                params.kind()
            )));
        }
        validate::compile(&self.runtime, &params)?;
        if let Some(record) = self.record_mut(node.slot) {
            record.params = params;
        }
        Ok(())
    }

    /// Deep copy with fresh node identities; see [`Graph::find_in_clone`].
    pub fn clone_graph(&self) -> Graph {
        Graph {
            runtime: self.runtime.clone(),
            id: GraphId::fresh(),
            origin: Some((self.id, self.nodes.len() as u32)),
            nodes: self.nodes.clone(),
        }
    }

    /// Maps a node of the graph this one was cloned from to its counterpart here.
    pub fn find_in_clone(&self, original: GraphNode) -> Option<GraphNode> {
        let (origin, cloned_slots) = self.origin?;
        if origin != original.graph || original.slot >= cloned_slots {
            return None;
        }
        let slot = original.slot;
        self.nodes
            .get(slot as usize)
            .and_then(Option::as_ref)
            .map(|_| self.handle(slot))
    }

    pub fn instantiate(&self) -> RuntimeResult<GraphExec> {
        GraphExec::new(self)
    }

    /// Kahn order over live slots; ties resolve in creation order.
    pub(crate) fn topological_slots(&self) -> RuntimeResult<Vec<u32>> {
        let mut indegree: Vec<usize> = self
            .nodes
            .iter()
            .map(|record| record.as_ref().map_or(0, |record| record.deps.len()))
            .collect();
        let mut ready: BTreeSet<u32> = self
            .live_slots()
            .filter(|(_, record)| record.deps.is_empty())
            .map(|(slot, _)| slot)
            .collect();
        let mut order = Vec::with_capacity(self.node_count());
        while let Some(slot) = ready.pop_first() {
            order.push(slot);
            if let Some(record) = self.nodes[slot as usize].as_ref() {
                for next in &record.dependents {
                    let remaining = &mut indegree[*next as usize];
                    *remaining -= 1;
                    if *remaining == 0 {
                        ready.insert(*next);
                    }
                }
            }
        }
        if order.len() != self.node_count() {
            return Err(RuntimeError::invalid_value("graph contains a cycle"));
        }
        Ok(order)
    }

    pub(crate) fn slot_params(&self, slot: u32) -> Option<&NodeParams> {
        self.nodes
            .get(slot as usize)
            .and_then(Option::as_ref)
            .map(|record| &record.params)
    }
}
