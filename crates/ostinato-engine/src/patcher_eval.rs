//! Per-block patcher graph evaluation for one track.
//!
//! The graph snapshot is walked depth by depth; nodes at the same depth
//! are independent, so the event/mod kernels among them can run on the
//! worker pool. Audio kernels share the track's audio scratch and run
//! sequentially after the depth drains. Results are merged in topo order
//! into the track scratchpad.

use std::sync::Arc;

use ostinato_model::{Device, EuclideanConfig, HarmonyEvent};
use ostinato_patcher::{
    dispatch_kernel, NodeConfig, NodeEventBuffer, PatcherAudioBlock, PatcherContext, PatcherGraph,
    PatcherNodeType, WorkerPool,
};

use crate::scratchpad::Scratchpad;

/// Block-rate mod output slots per node.
pub const MAX_NODE_MOD_OUTPUTS: usize = 8;

/// Per-node mod state carried across the depth walk.
#[derive(Clone)]
struct NodeModState {
    block_values: [f32; MAX_NODE_MOD_OUTPUTS],
    samples: Vec<f32>,
    has_samples: bool,
}

impl NodeModState {
    fn new(stride: usize) -> Self {
        Self {
            block_values: [0.0; MAX_NODE_MOD_OUTPUTS],
            samples: vec![0.0; stride],
            has_samples: false,
        }
    }
}

/// Scratch buffers for graph evaluation, reused every block.
pub struct PatcherEvalScratch {
    node_events: Vec<NodeEventBuffer>,
    node_mods: Vec<NodeModState>,
    allowed: Vec<bool>,
    gain_scratch: Vec<f32>,
    stride: usize,
    pub audio: PatcherAudioBlock,
}

impl PatcherEvalScratch {
    pub fn new(block_size: u32, num_channels: u32) -> Self {
        Self {
            node_events: Vec::new(),
            node_mods: Vec::new(),
            allowed: Vec::new(),
            gain_scratch: Vec::with_capacity(block_size as usize),
            stride: block_size as usize,
            audio: PatcherAudioBlock::new(num_channels as usize, block_size as usize),
        }
    }

    fn resize_for(&mut self, node_count: usize) {
        while self.node_events.len() < node_count {
            self.node_events.push(NodeEventBuffer::new());
            self.node_mods.push(NodeModState::new(self.stride));
        }
        for buffer in &mut self.node_events[..node_count] {
            buffer.clear();
        }
        for state in &mut self.node_mods[..node_count] {
            state.block_values = [0.0; MAX_NODE_MOD_OUTPUTS];
            state.has_samples = false;
        }
    }

    /// Block-rate value of a node's first mod output, for mod links whose
    /// source is a patcher node.
    pub fn node_mod_value(&self, node_id: u32) -> Option<f32> {
        self.node_mods
            .get(node_id as usize)
            .map(|state| state.block_values[0])
    }
}

/// One evaluation window.
pub struct EvalWindow {
    pub start_tick: u64,
    pub end_tick: u64,
    pub start_sample: u64,
    pub sample_rate: f32,
    pub tempo_bpm: f32,
    pub num_frames: u32,
}

/// The euclidean override from the first chain device bound to this node.
fn chain_override(devices: &[Device], node_id: u32) -> Option<EuclideanConfig> {
    devices
        .iter()
        .find(|d| !d.kind.is_vst() && d.patcher_node_id == node_id && d.euclidean.is_some())
        .and_then(|d| d.euclidean)
}

fn node_is_audio(node_type: PatcherNodeType) -> bool {
    matches!(node_type, PatcherNodeType::AudioPassthrough)
}

/// Evaluate the graph for one window and merge emitted events into the
/// scratchpad. Returns the count of events merged.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_patcher(
    graph: &Arc<PatcherGraph>,
    devices: &[Device],
    harmony: &[HarmonyEvent],
    window: &EvalWindow,
    scratch: &mut PatcherEvalScratch,
    scratchpad: &mut Scratchpad,
    pool: Option<&WorkerPool>,
) -> usize {
    let node_count = graph.nodes.len();
    if node_count == 0 {
        return 0;
    }
    scratch.resize_for(node_count);

    // Chain filter: when any chain device is bound to a patcher node, only
    // that node's ancestry runs; an unreferenced graph runs whole.
    let roots: Vec<u32> = devices
        .iter()
        .filter(|d| !d.kind.is_vst())
        .map(|d| d.patcher_node_id)
        .filter(|&id| (id as usize) < node_count)
        .collect();
    if roots.is_empty() {
        scratch.allowed.clear();
        scratch.allowed.resize(node_count, true);
    } else {
        graph.mark_upstream(roots.into_iter(), &mut scratch.allowed);
    }

    for depth in 0..=graph.max_depth {
        let at_depth: Vec<u32> = graph
            .nodes_at_depth(depth)
            .filter(|&id| scratch.allowed[id as usize])
            .collect();
        if at_depth.is_empty() {
            continue;
        }

        // Merge upstream events into each node's buffer before the depth
        // runs; upstream depths are complete by construction.
        for &node_id in &at_depth {
            let inputs = graph.nodes[node_id as usize].inputs.clone();
            for input in inputs {
                if !scratch.allowed[input as usize] {
                    continue;
                }
                let (upstream, own) = disjoint_pair(
                    &mut scratch.node_events,
                    input as usize,
                    node_id as usize,
                );
                own.extend_from(upstream);
            }
        }

        let (parallel, sequential): (Vec<u32>, Vec<u32>) = at_depth
            .iter()
            .partition(|&&id| !node_is_audio(graph.nodes[id as usize].node_type));

        match pool {
            Some(pool) if parallel.len() > 1 => {
                run_depth_parallel(graph, devices, harmony, window, scratch, pool, &parallel);
            }
            _ => {
                for &node_id in &parallel {
                    run_node(graph, devices, harmony, window, scratch, node_id);
                }
            }
        }
        for &node_id in &sequential {
            run_audio_node(graph, window, scratch, node_id);
        }
    }

    // Merge in topo order so equal-sample events keep depth order through
    // the stable sort. Only event-out reachable output matters: terminal
    // event nodes are the ones nothing downstream consumed.
    let mut merged = 0;
    let mut consumed = vec![false; node_count];
    for node in &graph.nodes {
        for &input in &node.inputs {
            consumed[input as usize] = true;
        }
    }
    for &node_id in &graph.topo_order {
        let index = node_id as usize;
        if !scratch.allowed[index] || consumed[index] {
            continue;
        }
        for entry in scratch.node_events[index].events() {
            scratchpad.push(*entry);
            merged += 1;
        }
    }
    merged
}

fn node_config(graph: &PatcherGraph, devices: &[Device], node_id: u32) -> NodeConfig {
    let node = &graph.nodes[node_id as usize];
    if node.node_type == PatcherNodeType::Euclidean || node.node_type == PatcherNodeType::RustKernel
    {
        if let Some(euclid) = chain_override(devices, node_id) {
            return NodeConfig::Euclidean(euclid);
        }
    }
    node.config
}

fn upstream_mod_input(
    graph: &PatcherGraph,
    node_mods: &[NodeModState],
    node_id: u32,
) -> Option<usize> {
    graph.nodes[node_id as usize]
        .inputs
        .iter()
        .map(|&input| input as usize)
        .find(|&input| node_mods[input].has_samples)
}

fn run_node(
    graph: &Arc<PatcherGraph>,
    devices: &[Device],
    harmony: &[HarmonyEvent],
    window: &EvalWindow,
    scratch: &mut PatcherEvalScratch,
    node_id: u32,
) {
    let config = node_config(graph, devices, node_id);
    let node_type = graph.nodes[node_id as usize].node_type;
    let index = node_id as usize;
    let stride = scratch.stride;

    let (events, mods) = (&mut scratch.node_events, &mut scratch.node_mods);
    let state = &mut mods[index];
    {
        let mut ctx = PatcherContext {
            block_start_tick: window.start_tick,
            block_end_tick: window.end_tick,
            block_start_sample: window.start_sample,
            sample_rate: window.sample_rate,
            tempo_bpm: window.tempo_bpm,
            num_frames: window.num_frames,
            events: &mut events[index],
            audio: None,
            harmony,
            mod_outputs: &mut state.block_values,
            mod_output_samples: &mut state.samples,
            mod_output_stride: stride,
            mod_inputs: &[],
            mod_input_stride: 0,
        };
        dispatch_kernel(node_type, &config, &mut ctx);
    }
    if node_type == PatcherNodeType::Lfo {
        state.has_samples = true;
    }
}

fn run_audio_node(
    graph: &Arc<PatcherGraph>,
    window: &EvalWindow,
    scratch: &mut PatcherEvalScratch,
    node_id: u32,
) {
    let index = node_id as usize;
    let node_type = graph.nodes[index].node_type;
    let mod_input = upstream_mod_input(graph, &scratch.node_mods, node_id);

    // Gain samples are staged into the reusable scratch so the audio block
    // and the upstream node's buffers can be borrowed together.
    match mod_input {
        Some(input) => {
            scratch.gain_scratch.clear();
            scratch
                .gain_scratch
                .extend_from_slice(&scratch.node_mods[input].samples);
        }
        None => scratch.gain_scratch.clear(),
    }
    let stride = if scratch.gain_scratch.is_empty() {
        0
    } else {
        scratch.stride
    };

    let full_stride = scratch.stride;
    let (mods, gains, audio, events) = (
        &mut scratch.node_mods,
        &scratch.gain_scratch,
        &mut scratch.audio,
        &mut scratch.node_events,
    );
    let state = &mut mods[index];
    let mut ctx = PatcherContext {
        block_start_tick: window.start_tick,
        block_end_tick: window.end_tick,
        block_start_sample: window.start_sample,
        sample_rate: window.sample_rate,
        tempo_bpm: window.tempo_bpm,
        num_frames: window.num_frames,
        events: &mut events[index],
        audio: Some(audio),
        harmony: &[],
        mod_outputs: &mut state.block_values,
        mod_output_samples: &mut state.samples,
        mod_output_stride: full_stride,
        mod_inputs: gains,
        mod_input_stride: stride,
    };
    dispatch_kernel(node_type, &NodeConfig::None, &mut ctx);
}

/// Run one depth's event/mod kernels on the worker pool. Node state moves
/// into the tasks and back; the pool only sees owned data.
fn run_depth_parallel(
    graph: &Arc<PatcherGraph>,
    devices: &[Device],
    harmony: &[HarmonyEvent],
    window: &EvalWindow,
    scratch: &mut PatcherEvalScratch,
    pool: &WorkerPool,
    node_ids: &[u32],
) {
    struct TaskState {
        node_id: u32,
        events: NodeEventBuffer,
        mods: NodeModState,
    }

    let harmony: Arc<Vec<HarmonyEvent>> = Arc::new(harmony.to_vec());
    let results: Arc<parking_lot::Mutex<Vec<TaskState>>> =
        Arc::new(parking_lot::Mutex::new(Vec::with_capacity(node_ids.len())));

    for &node_id in node_ids {
        let index = node_id as usize;
        let mut task = TaskState {
            node_id,
            events: std::mem::take(&mut scratch.node_events[index]),
            mods: std::mem::replace(
                &mut scratch.node_mods[index],
                NodeModState::new(scratch.stride),
            ),
        };
        let graph = Arc::clone(graph);
        let harmony = Arc::clone(&harmony);
        let results = Arc::clone(&results);
        let config = node_config(&graph, devices, node_id);
        let stride = scratch.stride;
        let start_tick = window.start_tick;
        let end_tick = window.end_tick;
        let start_sample = window.start_sample;
        let sample_rate = window.sample_rate;
        let tempo_bpm = window.tempo_bpm;
        let num_frames = window.num_frames;

        pool.enqueue(move || {
            let node_type = graph.nodes[task.node_id as usize].node_type;
            {
                let mut ctx = PatcherContext {
                    block_start_tick: start_tick,
                    block_end_tick: end_tick,
                    block_start_sample: start_sample,
                    sample_rate,
                    tempo_bpm,
                    num_frames,
                    events: &mut task.events,
                    audio: None,
                    harmony: &harmony,
                    mod_outputs: &mut task.mods.block_values,
                    mod_output_samples: &mut task.mods.samples,
                    mod_output_stride: stride,
                    mod_inputs: &[],
                    mod_input_stride: 0,
                };
                dispatch_kernel(node_type, &config, &mut ctx);
            }
            if node_type == PatcherNodeType::Lfo {
                task.mods.has_samples = true;
            }
            results.lock().push(task);
        });
    }
    pool.wait();

    for task in results.lock().drain(..) {
        let index = task.node_id as usize;
        scratch.node_events[index] = task.events;
        scratch.node_mods[index] = task.mods;
    }
}

/// Two disjoint mutable references into one slice.
fn disjoint_pair<T>(slice: &mut [T], a: usize, b: usize) -> (&T, &mut T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = slice.split_at_mut(b);
        (&left[a], &mut right[0])
    } else {
        let (left, right) = slice.split_at_mut(a);
        (&right[0] as &T, &mut left[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostinato_model::{DeviceKind, DEVICE_ID_AUTO};
    use ostinato_patcher::PatcherGraphState;
    use ostinato_shm::{EventType, MusicalLogicPayload, MUSICAL_LOGIC_KIND_DEGREE};

    fn window() -> EvalWindow {
        EvalWindow {
            start_tick: 0,
            end_tick: ostinato_core::NANOTICKS_PER_QUARTER * 4,
            start_sample: 0,
            sample_rate: 48_000.0,
            tempo_bpm: 120.0,
            num_frames: 512,
        }
    }

    fn euclid_chain_graph() -> Arc<PatcherGraph> {
        let state = PatcherGraphState::new();
        let (euclid, _) = state.add_node(PatcherNodeType::Euclidean).unwrap();
        let (random, _) = state.add_node(PatcherNodeType::RandomDegree).unwrap();
        let (out, _) = state.add_node(PatcherNodeType::EventOut).unwrap();
        state.connect(euclid, random).unwrap();
        state.connect(random, out).unwrap();
        state.snapshot()
    }

    #[test]
    fn chain_emits_degree_events_through_event_out() {
        let graph = euclid_chain_graph();
        let mut scratch = PatcherEvalScratch::new(512, 2);
        let mut scratchpad = Scratchpad::new();
        let merged = evaluate_patcher(
            &graph,
            &[],
            &[],
            &window(),
            &mut scratch,
            &mut scratchpad,
            None,
        );
        // Default euclidean: 5 hits per bar, all promoted to degrees.
        assert_eq!(merged, 5);
        assert_eq!(scratchpad.len(), 5);
        for entry in scratchpad.events() {
            assert_eq!(entry.type_of(), Some(EventType::MusicalLogic));
            let payload = MusicalLogicPayload::read_from(&entry.payload);
            assert_eq!(payload.kind, MUSICAL_LOGIC_KIND_DEGREE);
            assert!(payload.degree >= 1);
        }
    }

    #[test]
    fn parallel_evaluation_matches_sequential() {
        let graph = euclid_chain_graph();
        let run = |pool: Option<&WorkerPool>| {
            let mut scratch = PatcherEvalScratch::new(512, 2);
            let mut scratchpad = Scratchpad::new();
            evaluate_patcher(&graph, &[], &[], &window(), &mut scratch, &mut scratchpad, pool);
            scratchpad
                .events()
                .iter()
                .map(|e| (e.sample_time, MusicalLogicPayload::read_from(&e.payload).degree))
                .collect::<Vec<_>>()
        };
        let sequential = run(None);
        let pool = WorkerPool::new(4);
        let parallel = run(Some(&pool));
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn chain_filter_restricts_to_referenced_ancestry() {
        let state = PatcherGraphState::new();
        let (euclid_a, _) = state.add_node(PatcherNodeType::Euclidean).unwrap();
        let (out_a, _) = state.add_node(PatcherNodeType::EventOut).unwrap();
        let (_euclid_b, _) = state.add_node(PatcherNodeType::Euclidean).unwrap();
        state.connect(euclid_a, out_a).unwrap();
        let graph = state.snapshot();

        let device = Device {
            id: DEVICE_ID_AUTO,
            kind: DeviceKind::PatcherEvent,
            capability_mask: 0,
            patcher_node_id: out_a,
            host_slot_index: 0,
            bypass: false,
            euclidean: None,
        };
        let mut scratch = PatcherEvalScratch::new(512, 2);
        let mut scratchpad = Scratchpad::new();
        let merged = evaluate_patcher(
            &graph,
            &[device],
            &[],
            &window(),
            &mut scratch,
            &mut scratchpad,
            None,
        );
        // Only the referenced chain runs: 5 hits, not 10.
        assert_eq!(merged, 5);
    }

    #[test]
    fn unreferenced_graph_runs_whole() {
        let state = PatcherGraphState::new();
        state.add_node(PatcherNodeType::Euclidean).unwrap();
        state.add_node(PatcherNodeType::Euclidean).unwrap();
        let graph = state.snapshot();
        let mut scratch = PatcherEvalScratch::new(512, 2);
        let mut scratchpad = Scratchpad::new();
        let merged =
            evaluate_patcher(&graph, &[], &[], &window(), &mut scratch, &mut scratchpad, None);
        assert_eq!(merged, 10);
    }

    #[test]
    fn lfo_feeds_audio_passthrough_gain() {
        let state = PatcherGraphState::new();
        let (lfo, _) = state.add_node(PatcherNodeType::Lfo).unwrap();
        let (audio, _) = state.add_node(PatcherNodeType::AudioPassthrough).unwrap();
        state.connect(lfo, audio).unwrap();
        state
            .set_config(
                lfo,
                NodeConfig::Lfo(ostinato_patcher::LfoConfig {
                    frequency_hz: 0.0,
                    depth: 0.0,
                    bias: 0.5,
                    phase_offset: 0.0,
                }),
            )
            .unwrap();
        let graph = state.snapshot();

        let mut scratch = PatcherEvalScratch::new(4, 1);
        scratch.audio.channel_mut(0).fill(1.0);
        let mut scratchpad = Scratchpad::new();
        let window = EvalWindow {
            num_frames: 4,
            ..window()
        };
        evaluate_patcher(&graph, &[], &[], &window, &mut scratch, &mut scratchpad, None);
        // Constant 0.5 gain applied by the audio passthrough.
        for &sample in scratch.audio.channel(0) {
            assert!((sample - 0.5).abs() < 1e-6);
        }
        assert_eq!(scratch.node_mod_value(lfo), Some(0.5));
    }
}
