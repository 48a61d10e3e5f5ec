//! Patcher graph: a DAG of event, audio, and modulation nodes evaluated
//! once per audio block.
//!
//! Nodes are a closed set of kernel variants dispatched by tag; host
//! plugins are the extensibility surface, not the graph. The graph is
//! edited under a mutex and published to the producer thread as an
//! immutable snapshot, so evaluation never takes the edit lock.

pub mod error;
pub use error::{Error, Result};

pub mod context;
pub mod graph;
pub mod kernels;
pub mod pool;
pub mod preset;

pub use context::{NodeEventBuffer, PatcherAudioBlock, PatcherContext, NODE_EVENT_CAPACITY};
pub use graph::{
    GraphEditError, LfoConfig, NodeConfig, PatcherGraph, PatcherGraphState, PatcherNode,
    PatcherNodeType, RandomDegreeConfig, PATCHER_MAX_NODES,
};
pub use kernels::dispatch_kernel;
pub use pool::WorkerPool;
pub use preset::{load_preset, save_preset, PresetLibrary, PATCHER_PRESET_SCHEMA_VERSION};
