//! Patcher preset files and the preset library directory.
//!
//! Schema version 2: `{schema_version, nodes: [{id, type, config?}],
//! edges: [{src, dst, kind}]}`. Only this version loads; anything else is
//! rejected rather than half-migrated.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use ostinato_model::EuclideanConfig;

use crate::error::{Error, Result};
use crate::graph::{LfoConfig, NodeConfig, PatcherGraph, PatcherNode, PatcherNodeType, RandomDegreeConfig};

pub const PATCHER_PRESET_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PresetConfig {
    Euclidean {
        steps: u32,
        hits: u32,
        offset: u32,
        duration_ticks: u64,
        degree: u8,
        octave_offset: i8,
        velocity: u8,
        base_octave: u8,
    },
    RandomDegree {
        degree: u8,
        velocity: u8,
        duration_ticks: u64,
    },
    Lfo {
        frequency_hz: f32,
        depth: f32,
        bias: f32,
        phase_offset: f32,
    },
}

impl PresetConfig {
    fn from_node(config: &NodeConfig) -> Option<Self> {
        match *config {
            NodeConfig::None => None,
            NodeConfig::Euclidean(c) => Some(Self::Euclidean {
                steps: c.steps,
                hits: c.hits,
                offset: c.offset,
                duration_ticks: c.duration_ticks,
                degree: c.degree,
                octave_offset: c.octave_offset,
                velocity: c.velocity,
                base_octave: c.base_octave,
            }),
            NodeConfig::RandomDegree(c) => Some(Self::RandomDegree {
                degree: c.degree,
                velocity: c.velocity,
                duration_ticks: c.duration_ticks,
            }),
            NodeConfig::Lfo(c) => Some(Self::Lfo {
                frequency_hz: c.frequency_hz,
                depth: c.depth,
                bias: c.bias,
                phase_offset: c.phase_offset,
            }),
        }
    }

    fn into_node(self) -> NodeConfig {
        match self {
            Self::Euclidean {
                steps,
                hits,
                offset,
                duration_ticks,
                degree,
                octave_offset,
                velocity,
                base_octave,
            } => NodeConfig::Euclidean(EuclideanConfig {
                steps,
                hits,
                offset,
                duration_ticks,
                degree,
                octave_offset,
                velocity,
                base_octave,
            }),
            Self::RandomDegree {
                degree,
                velocity,
                duration_ticks,
            } => NodeConfig::RandomDegree(RandomDegreeConfig {
                degree,
                velocity,
                duration_ticks,
            }),
            Self::Lfo {
                frequency_hz,
                depth,
                bias,
                phase_offset,
            } => NodeConfig::Lfo(LfoConfig {
                frequency_hz,
                depth,
                bias,
                phase_offset,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PresetNode {
    id: u32,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<PresetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PresetEdge {
    src: u32,
    dst: u32,
    #[serde(default = "default_edge_kind")]
    kind: String,
}

fn default_edge_kind() -> String {
    "event".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PresetFile {
    schema_version: u32,
    nodes: Vec<PresetNode>,
    edges: Vec<PresetEdge>,
}

fn graph_to_preset(graph: &PatcherGraph) -> PresetFile {
    let nodes = graph
        .nodes
        .iter()
        .map(|node| PresetNode {
            id: node.id,
            node_type: node.node_type.name().to_string(),
            config: PresetConfig::from_node(&node.config),
        })
        .collect();
    let edges = graph
        .nodes
        .iter()
        .flat_map(|node| {
            node.inputs.iter().map(|&src| PresetEdge {
                src,
                dst: node.id,
                kind: edge_kind_for(node.node_type),
            })
        })
        .collect();
    PresetFile {
        schema_version: PATCHER_PRESET_SCHEMA_VERSION,
        nodes,
        edges,
    }
}

fn edge_kind_for(dst_type: PatcherNodeType) -> String {
    match dst_type {
        PatcherNodeType::AudioPassthrough => "audio".to_string(),
        PatcherNodeType::Lfo => "mod".to_string(),
        _ => "event".to_string(),
    }
}

fn preset_to_graph(preset: PresetFile) -> Result<PatcherGraph> {
    if preset.schema_version != PATCHER_PRESET_SCHEMA_VERSION {
        return Err(Error::PresetSchema {
            found: preset.schema_version,
            expected: PATCHER_PRESET_SCHEMA_VERSION,
        });
    }
    let count = preset.nodes.len();
    let mut nodes = Vec::with_capacity(count);
    for (index, node) in preset.nodes.into_iter().enumerate() {
        if node.id as usize != index {
            return Err(Error::InvalidPresetGraph(format!(
                "node ids must be dense, got {} at position {index}",
                node.id
            )));
        }
        let node_type = PatcherNodeType::from_name(&node.node_type)
            .ok_or_else(|| Error::UnknownNodeType(node.node_type.clone()))?;
        nodes.push(PatcherNode {
            id: node.id,
            node_type,
            inputs: Vec::new(),
            config: node.config.map(PresetConfig::into_node).unwrap_or_default(),
        });
    }
    for edge in preset.edges {
        if edge.src as usize >= count || edge.dst as usize >= count {
            return Err(Error::InvalidPresetGraph(format!(
                "edge {} -> {} references a missing node",
                edge.src, edge.dst
            )));
        }
        nodes[edge.dst as usize].inputs.push(edge.src);
    }
    let mut graph = PatcherGraph {
        nodes,
        ..Default::default()
    };
    if !graph.build() {
        return Err(Error::InvalidPresetGraph("graph has a cycle".into()));
    }
    Ok(graph)
}

/// Save a graph as a preset file.
pub fn save_preset(graph: &PatcherGraph, path: &Path) -> Result<()> {
    let preset = graph_to_preset(graph);
    let text = serde_json::to_string_pretty(&preset).map_err(|e| Error::PresetIo {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    std::fs::write(path, text).map_err(|e| Error::PresetIo {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    info!(path = %path.display(), "saved patcher preset");
    Ok(())
}

/// Load a preset file into a built graph.
pub fn load_preset(path: &Path) -> Result<PatcherGraph> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::PresetIo {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let preset: PresetFile = serde_json::from_str(&text).map_err(|e| Error::PresetIo {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    preset_to_graph(preset)
}

/// Directory of named presets.
pub struct PresetLibrary {
    root: PathBuf,
}

impl PresetLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    /// Preset names, sorted.
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        names
    }

    pub fn save(&self, name: &str, graph: &PatcherGraph) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| Error::PresetIo {
            path: self.root.clone(),
            reason: e.to_string(),
        })?;
        save_preset(graph, &self.path_for(name))
    }

    pub fn load(&self, name: &str) -> Result<PatcherGraph> {
        load_preset(&self.path_for(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PatcherGraphState;

    fn sample_graph() -> PatcherGraph {
        let state = PatcherGraphState::new();
        let (euclid, _) = state.add_node(PatcherNodeType::Euclidean).unwrap();
        let (random, _) = state.add_node(PatcherNodeType::RandomDegree).unwrap();
        let (out, _) = state.add_node(PatcherNodeType::EventOut).unwrap();
        state.connect(euclid, random).unwrap();
        state.connect(random, out).unwrap();
        state
            .set_config(
                euclid,
                NodeConfig::Euclidean(EuclideanConfig {
                    steps: 16,
                    hits: 7,
                    ..Default::default()
                }),
            )
            .unwrap();
        PatcherGraph::clone(&state.snapshot())
    }

    #[test]
    fn preset_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groove.json");
        let graph = sample_graph();
        save_preset(&graph, &path).unwrap();

        let loaded = load_preset(&path).unwrap();
        assert_eq!(loaded.nodes.len(), 3);
        assert_eq!(loaded.nodes[0].node_type, PatcherNodeType::Euclidean);
        assert_eq!(loaded.nodes[1].inputs, vec![0]);
        assert_eq!(loaded.nodes[2].inputs, vec![1]);
        match loaded.nodes[0].config {
            NodeConfig::Euclidean(c) => assert_eq!(c.hits, 7),
            ref other => panic!("unexpected config {other:?}"),
        }
        assert_eq!(loaded.topo_order, vec![0, 1, 2]);
    }

    #[test]
    fn wrong_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        std::fs::write(&path, r#"{"schema_version": 1, "nodes": [], "edges": []}"#).unwrap();
        assert!(matches!(
            load_preset(&path),
            Err(Error::PresetSchema { found: 1, .. })
        ));
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"schema_version": 2, "nodes": [{"id": 0, "type": "granulator"}], "edges": []}"#,
        )
        .unwrap();
        assert!(matches!(load_preset(&path), Err(Error::UnknownNodeType(_))));
    }

    #[test]
    fn cyclic_preset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cycle.json");
        std::fs::write(
            &path,
            r#"{
                "schema_version": 2,
                "nodes": [
                    {"id": 0, "type": "passthrough"},
                    {"id": 1, "type": "passthrough"}
                ],
                "edges": [
                    {"src": 0, "dst": 1, "kind": "event"},
                    {"src": 1, "dst": 0, "kind": "event"}
                ]
            }"#,
        )
        .unwrap();
        assert!(matches!(load_preset(&path), Err(Error::InvalidPresetGraph(_))));
    }

    #[test]
    fn library_lists_sorted_presets() {
        let dir = tempfile::tempdir().unwrap();
        let library = PresetLibrary::new(dir.path());
        assert!(library.list().is_empty());
        let graph = sample_graph();
        library.save("zeta", &graph).unwrap();
        library.save("alpha", &graph).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a preset").unwrap();
        assert_eq!(library.list(), vec!["alpha", "zeta"]);
        let loaded = library.load("alpha").unwrap();
        assert_eq!(loaded.nodes.len(), 3);
    }
}
