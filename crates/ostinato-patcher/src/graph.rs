//! Graph model, topological build, and the mutex-guarded edit state.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

use ostinato_model::EuclideanConfig;

/// Hard cap on graph size; edits past this are rejected.
pub const PATCHER_MAX_NODES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PatcherNodeType {
    RustKernel = 0,
    Euclidean = 1,
    Passthrough = 2,
    AudioPassthrough = 3,
    EventOut = 4,
    RandomDegree = 5,
    Lfo = 6,
}

impl PatcherNodeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::RustKernel),
            1 => Some(Self::Euclidean),
            2 => Some(Self::Passthrough),
            3 => Some(Self::AudioPassthrough),
            4 => Some(Self::EventOut),
            5 => Some(Self::RandomDegree),
            6 => Some(Self::Lfo),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RustKernel => "rust_kernel",
            Self::Euclidean => "euclidean",
            Self::Passthrough => "passthrough",
            Self::AudioPassthrough => "audio_passthrough",
            Self::EventOut => "event_out",
            Self::RandomDegree => "random_degree",
            Self::Lfo => "lfo",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rust_kernel" => Some(Self::RustKernel),
            "euclidean" => Some(Self::Euclidean),
            "passthrough" => Some(Self::Passthrough),
            "audio_passthrough" => Some(Self::AudioPassthrough),
            "event_out" => Some(Self::EventOut),
            "random_degree" => Some(Self::RandomDegree),
            "lfo" => Some(Self::Lfo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RandomDegreeConfig {
    pub degree: u8,
    pub velocity: u8,
    pub duration_ticks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LfoConfig {
    pub frequency_hz: f32,
    pub depth: f32,
    pub bias: f32,
    pub phase_offset: f32,
}

impl Default for LfoConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 1.0,
            depth: 1.0,
            bias: 0.0,
            phase_offset: 0.0,
        }
    }
}

/// Per-node config, tagged by the node types that accept one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum NodeConfig {
    #[default]
    None,
    Euclidean(EuclideanConfig),
    RandomDegree(RandomDegreeConfig),
    Lfo(LfoConfig),
}

#[derive(Debug, Clone)]
pub struct PatcherNode {
    pub id: u32,
    pub node_type: PatcherNodeType,
    /// Upstream node ids.
    pub inputs: Vec<u32>,
    pub config: NodeConfig,
}

/// A built graph: nodes plus topo order and per-node depth. Snapshots of
/// this struct are what the producer evaluates.
#[derive(Debug, Clone, Default)]
pub struct PatcherGraph {
    pub nodes: Vec<PatcherNode>,
    pub topo_order: Vec<u32>,
    pub depths: Vec<u8>,
    pub max_depth: u8,
}

impl PatcherGraph {
    /// Recompute `topo_order` and `depths` with Kahn's algorithm.
    /// Fails on cycles, dangling inputs, or an oversized graph; the node
    /// list itself is left untouched either way.
    pub fn build(&mut self) -> bool {
        let count = self.nodes.len();
        self.topo_order.clear();
        self.depths = vec![0; count];
        self.max_depth = 0;
        if count > PATCHER_MAX_NODES {
            return false;
        }
        if count == 0 {
            return true;
        }

        let mut indegree = vec![0u32; count];
        let mut outputs: Vec<Vec<u32>> = vec![Vec::new(); count];
        for (index, node) in self.nodes.iter().enumerate() {
            for &input in &node.inputs {
                if input as usize >= count {
                    return false;
                }
                indegree[index] += 1;
                outputs[input as usize].push(index as u32);
            }
        }

        let mut ready: std::collections::VecDeque<u32> = (0..count as u32)
            .filter(|&i| indegree[i as usize] == 0)
            .collect();
        while let Some(current) = ready.pop_front() {
            self.topo_order.push(current);
            let base_depth = self.depths[current as usize];
            self.max_depth = self.max_depth.max(base_depth);
            for &next in &outputs[current as usize] {
                let next = next as usize;
                if self.depths[next] < base_depth + 1 {
                    self.depths[next] = base_depth + 1;
                    self.max_depth = self.max_depth.max(self.depths[next]);
                }
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push_back(next as u32);
                }
            }
        }
        self.topo_order.len() == count
    }

    pub fn node(&self, id: u32) -> Option<&PatcherNode> {
        self.nodes.get(id as usize)
    }

    /// Nodes at a given depth, in topo order.
    pub fn nodes_at_depth(&self, depth: u8) -> impl Iterator<Item = u32> + '_ {
        self.topo_order
            .iter()
            .copied()
            .filter(move |&id| self.depths[id as usize] == depth)
    }

    /// Mark every node reachable upstream from the given roots (inclusive).
    /// Used to restrict evaluation to nodes a device chain references.
    pub fn mark_upstream(&self, roots: impl Iterator<Item = u32>, allowed: &mut Vec<bool>) {
        allowed.clear();
        allowed.resize(self.nodes.len(), false);
        let mut stack: Vec<u32> = roots.filter(|&r| (r as usize) < self.nodes.len()).collect();
        while let Some(id) = stack.pop() {
            let index = id as usize;
            if allowed[index] {
                continue;
            }
            allowed[index] = true;
            for &input in &self.nodes[index].inputs {
                stack.push(input);
            }
        }
    }
}

/// Why a graph edit was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEditError {
    #[error("node does not exist")]
    MissingNode,
    #[error("connection would create a cycle")]
    WouldCycle,
    #[error("graph is at its node limit")]
    TooManyNodes,
    #[error("node type does not accept this config")]
    ConfigMismatch,
}

/// Mutex-guarded editable graph with versioned snapshot publication.
///
/// One of the two process-wide singletons (the other is the scale
/// registry); everything else reaches it through an `Arc`.
pub struct PatcherGraphState {
    graph: Mutex<PatcherGraph>,
    snapshot: ArcSwap<PatcherGraph>,
    version: AtomicU32,
}

impl Default for PatcherGraphState {
    fn default() -> Self {
        Self::new()
    }
}

impl PatcherGraphState {
    pub fn new() -> Self {
        Self {
            graph: Mutex::new(PatcherGraph::default()),
            snapshot: ArcSwap::from_pointee(PatcherGraph::default()),
            version: AtomicU32::new(0),
        }
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Current published snapshot; cheap, lock-free.
    pub fn snapshot(&self) -> Arc<PatcherGraph> {
        self.snapshot.load_full()
    }

    fn publish(&self, graph: &PatcherGraph) -> u32 {
        self.snapshot.store(Arc::new(graph.clone()));
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Append a node. Returns `(node_id, new_version)`.
    pub fn add_node(
        &self,
        node_type: PatcherNodeType,
    ) -> std::result::Result<(u32, u32), GraphEditError> {
        let mut graph = self.graph.lock();
        if graph.nodes.len() >= PATCHER_MAX_NODES {
            return Err(GraphEditError::TooManyNodes);
        }
        let id = graph.nodes.len() as u32;
        graph.nodes.push(PatcherNode {
            id,
            node_type,
            inputs: Vec::new(),
            config: NodeConfig::None,
        });
        if !graph.build() {
            graph.nodes.pop();
            let _ = graph.build();
            return Err(GraphEditError::TooManyNodes);
        }
        Ok((id, self.publish(&graph)))
    }

    /// Connect `src -> dst`. Rejects cycles, leaving the graph unchanged.
    /// Connecting an already-connected pair succeeds without a new edge.
    pub fn connect(&self, src: u32, dst: u32) -> std::result::Result<u32, GraphEditError> {
        let mut graph = self.graph.lock();
        let count = graph.nodes.len() as u32;
        if src >= count || dst >= count {
            return Err(GraphEditError::MissingNode);
        }
        if graph.nodes[dst as usize].inputs.contains(&src) {
            return Ok(self.version());
        }
        graph.nodes[dst as usize].inputs.push(src);
        if !graph.build() {
            graph.nodes[dst as usize].inputs.pop();
            let _ = graph.build();
            return Err(GraphEditError::WouldCycle);
        }
        Ok(self.publish(&graph))
    }

    /// Remove a node, splicing it out of downstream input lists and
    /// renumbering the dense ids above it.
    pub fn remove_node(&self, node_id: u32) -> std::result::Result<u32, GraphEditError> {
        let mut graph = self.graph.lock();
        if node_id as usize >= graph.nodes.len() {
            return Err(GraphEditError::MissingNode);
        }
        graph.nodes.remove(node_id as usize);
        for (index, node) in graph.nodes.iter_mut().enumerate() {
            node.id = index as u32;
            node.inputs.retain(|&input| input != node_id);
            for input in &mut node.inputs {
                if *input > node_id {
                    *input -= 1;
                }
            }
        }
        let _ = graph.build();
        Ok(self.publish(&graph))
    }

    /// Set a node's config; the config variant must match the node type.
    pub fn set_config(
        &self,
        node_id: u32,
        config: NodeConfig,
    ) -> std::result::Result<u32, GraphEditError> {
        let mut graph = self.graph.lock();
        let node = graph
            .nodes
            .get_mut(node_id as usize)
            .ok_or(GraphEditError::MissingNode)?;
        let matches = matches!(
            (&config, node.node_type),
            (NodeConfig::None, _)
                | (NodeConfig::Euclidean(_), PatcherNodeType::Euclidean)
                | (NodeConfig::RandomDegree(_), PatcherNodeType::RandomDegree)
                | (NodeConfig::Lfo(_), PatcherNodeType::Lfo)
        );
        if !matches {
            return Err(GraphEditError::ConfigMismatch);
        }
        node.config = config;
        Ok(self.publish(&graph))
    }

    /// Replace the whole graph (preset load). The graph must build.
    pub fn replace(&self, mut graph: PatcherGraph) -> std::result::Result<u32, GraphEditError> {
        if !graph.build() {
            return Err(GraphEditError::WouldCycle);
        }
        let mut current = self.graph.lock();
        *current = graph;
        Ok(self.publish(&current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(n: usize) -> PatcherGraphState {
        let state = PatcherGraphState::new();
        for _ in 0..n {
            state.add_node(PatcherNodeType::Passthrough).unwrap();
        }
        for i in 1..n as u32 {
            state.connect(i - 1, i).unwrap();
        }
        state
    }

    #[test]
    fn empty_graph_builds() {
        let mut graph = PatcherGraph::default();
        assert!(graph.build());
        assert!(graph.topo_order.is_empty());
    }

    #[test]
    fn chain_depths_increase() {
        let state = chain_of(4);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.topo_order, vec![0, 1, 2, 3]);
        assert_eq!(snapshot.depths, vec![0, 1, 2, 3]);
        assert_eq!(snapshot.max_depth, 3);
    }

    #[test]
    fn diamond_joins_at_max_input_depth() {
        let state = PatcherGraphState::new();
        for _ in 0..4 {
            state.add_node(PatcherNodeType::Passthrough).unwrap();
        }
        // 0 -> 1 -> 3, 0 -> 2 -> 3
        state.connect(0, 1).unwrap();
        state.connect(0, 2).unwrap();
        state.connect(1, 3).unwrap();
        state.connect(2, 3).unwrap();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.depths[0], 0);
        assert_eq!(snapshot.depths[1], 1);
        assert_eq!(snapshot.depths[2], 1);
        assert_eq!(snapshot.depths[3], 2);
    }

    #[test]
    fn cycle_is_rejected_and_graph_unchanged() {
        let state = chain_of(3);
        let version_before = state.version();
        assert_eq!(state.connect(2, 0), Err(GraphEditError::WouldCycle));
        assert_eq!(state.version(), version_before);
        let snapshot = state.snapshot();
        assert!(snapshot.nodes[0].inputs.is_empty());
        // Graph still evaluates in order.
        assert_eq!(snapshot.topo_order.len(), 3);
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let state = chain_of(1);
        assert_eq!(state.connect(0, 0), Err(GraphEditError::WouldCycle));
    }

    #[test]
    fn duplicate_edge_is_idempotent() {
        let state = chain_of(2);
        let version = state.version();
        assert_eq!(state.connect(0, 1).unwrap(), version);
        assert_eq!(state.snapshot().nodes[1].inputs.len(), 1);
    }

    #[test]
    fn dangling_input_fails_build() {
        let mut graph = PatcherGraph {
            nodes: vec![PatcherNode {
                id: 0,
                node_type: PatcherNodeType::Passthrough,
                inputs: vec![5],
                config: NodeConfig::None,
            }],
            ..Default::default()
        };
        assert!(!graph.build());
    }

    #[test]
    fn remove_renumbers_dense_ids() {
        let state = chain_of(3);
        state.remove_node(1).unwrap();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.nodes[0].id, 0);
        assert_eq!(snapshot.nodes[1].id, 1);
        // The middle link is gone; node 1 (old 2) lost its input.
        assert!(snapshot.nodes[1].inputs.is_empty());
    }

    #[test]
    fn config_type_is_enforced() {
        let state = PatcherGraphState::new();
        let (id, _) = state.add_node(PatcherNodeType::Lfo).unwrap();
        assert!(state.set_config(id, NodeConfig::Lfo(LfoConfig::default())).is_ok());
        assert_eq!(
            state.set_config(id, NodeConfig::Euclidean(EuclideanConfig::default())),
            Err(GraphEditError::ConfigMismatch)
        );
    }

    #[test]
    fn version_increases_on_every_edit() {
        let state = PatcherGraphState::new();
        let v0 = state.version();
        state.add_node(PatcherNodeType::Euclidean).unwrap();
        let v1 = state.version();
        state.add_node(PatcherNodeType::EventOut).unwrap();
        let v2 = state.version();
        state.connect(0, 1).unwrap();
        let v3 = state.version();
        assert!(v0 < v1 && v1 < v2 && v2 < v3);
    }

    #[test]
    fn mark_upstream_restricts_to_ancestry() {
        let state = PatcherGraphState::new();
        for _ in 0..4 {
            state.add_node(PatcherNodeType::Passthrough).unwrap();
        }
        state.connect(0, 1).unwrap();
        state.connect(2, 3).unwrap();
        let snapshot = state.snapshot();
        let mut allowed = Vec::new();
        snapshot.mark_upstream([1u32].into_iter(), &mut allowed);
        assert_eq!(allowed, vec![true, true, false, false]);
    }
}
