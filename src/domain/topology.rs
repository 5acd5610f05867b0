//! # Network Topology
//!
//! Nodes and pipes of the simulated gas network. The topology is the ground
//! truth owned by the simulation; only the physics step mutates it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read topology file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse topology file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unsupported topology file extension: {0}")]
    UnsupportedFormat(String),
    #[error("topology has no nodes")]
    Empty,
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("duplicate pipe id: {0}")]
    DuplicatePipe(String),
    #[error("pipe {pipe} references unknown node {node}")]
    UnknownNode { pipe: String, node: String },
    /// Node and pipe sensors are keyed by location id, so the id spaces must not overlap
    #[error("pipe id {0} is also used by a node")]
    SharedId(String),
    #[error("pipe {pipe} has invalid geometry (length {length}, diameter {diameter})")]
    InvalidGeometry {
        pipe: String,
        length: f64,
        diameter: f64,
    },
}

/// Role of a node in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Source,
    Junction,
    Compressor,
    Sink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Pressure in bar
    pub pressure: f64,
    /// Temperature in °C
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    20.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipe {
    pub id: String,
    pub from_node: String,
    pub to_node: String,
    /// Length in km
    pub length: f64,
    /// Diameter in m
    pub diameter: f64,
    /// Derived each tick by the physics step
    #[serde(default)]
    pub flow_rate: f64,
    /// Derived each tick by the physics step
    #[serde(default)]
    pub pressure_drop: f64,
}

/// Gas network: nodes in declaration order plus the pipes joining them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub nodes: Vec<Node>,
    pub pipes: Vec<Pipe>,
}

impl NetworkTopology {
    /// Reference network modelled after a GasLib-style transmission segment:
    /// one source, a compressor station and two delivery points.
    pub fn reference() -> Self {
        let nodes = vec![
            node("Source_1", NodeKind::Source, 0.0, 0.0, 60.0, 20.0),
            node("Junction_1", NodeKind::Junction, 50.0, 25.0, 55.0, 20.0),
            node("Junction_2", NodeKind::Junction, 100.0, 50.0, 52.0, 20.0),
            node("Compressor_1", NodeKind::Compressor, 150.0, 75.0, 58.0, 25.0),
            node("Junction_3", NodeKind::Junction, 200.0, 100.0, 50.0, 22.0),
            node("Junction_4", NodeKind::Junction, 250.0, 125.0, 48.0, 22.0),
            node("Sink_1", NodeKind::Sink, 300.0, 150.0, 45.0, 20.0),
            node("Sink_2", NodeKind::Sink, 200.0, 0.0, 40.0, 20.0),
        ];
        let pipes = vec![
            pipe("Pipe_1", "Source_1", "Junction_1", 10.0, 0.8),
            pipe("Pipe_2", "Junction_1", "Junction_2", 10.0, 0.8),
            pipe("Pipe_3", "Junction_2", "Compressor_1", 12.0, 0.8),
            pipe("Pipe_4", "Compressor_1", "Junction_3", 10.0, 0.8),
            pipe("Pipe_5", "Junction_3", "Junction_4", 8.0, 0.6),
            pipe("Pipe_6", "Junction_4", "Sink_1", 10.0, 0.6),
            pipe("Pipe_7", "Junction_2", "Sink_2", 15.0, 0.4),
        ];
        Self { nodes, pipes }
    }

    /// Small linear network used when a configured topology cannot be loaded.
    pub fn minimal() -> Self {
        let nodes = vec![
            node("N1", NodeKind::Source, 0.0, 0.0, 60.0, 20.0),
            node("N2", NodeKind::Junction, 100.0, 50.0, 50.0, 20.0),
            node("N3", NodeKind::Compressor, 200.0, 75.0, 55.0, 20.0),
            node("N4", NodeKind::Junction, 300.0, 100.0, 45.0, 20.0),
            node("N5", NodeKind::Sink, 400.0, 125.0, 40.0, 20.0),
        ];
        let pipes = vec![
            pipe("P1", "N1", "N2", 10.0, 0.6),
            pipe("P2", "N2", "N3", 10.0, 0.6),
            pipe("P3", "N3", "N4", 10.0, 0.6),
            pipe("P4", "N4", "N5", 10.0, 0.6),
        ];
        Self { nodes, pipes }
    }

    /// Load a topology from a JSON, TOML or YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let parse_err = |message: String| TopologyError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let topology: Self = match ext.as_str() {
            "json" => serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))?,
            "toml" => toml::from_str(&text).map_err(|e| parse_err(e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str(&text).map_err(|e| parse_err(e.to_string()))?,
            other => return Err(TopologyError::UnsupportedFormat(other.to_string())),
        };
        topology.validate()?;
        Ok(topology)
    }

    /// Resolve the startup topology.
    ///
    /// No configured path yields the reference network; a path that cannot be
    /// loaded falls back to [`NetworkTopology::minimal`].
    pub fn load_or_fallback(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::reference();
        };
        match Self::from_file(path) {
            Ok(topology) => {
                info!(
                    path = %path.display(),
                    nodes = topology.nodes.len(),
                    pipes = topology.pipes.len(),
                    "loaded network topology"
                );
                topology
            }
            Err(e) => {
                warn!(error = %e, "topology unavailable, using built-in minimal network");
                Self::minimal()
            }
        }
    }

    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.nodes.is_empty() {
            return Err(TopologyError::Empty);
        }
        let mut node_ids = HashSet::new();
        for n in &self.nodes {
            if !node_ids.insert(n.id.as_str()) {
                return Err(TopologyError::DuplicateNode(n.id.clone()));
            }
        }
        let mut pipe_ids = HashSet::new();
        for p in &self.pipes {
            if !pipe_ids.insert(p.id.as_str()) {
                return Err(TopologyError::DuplicatePipe(p.id.clone()));
            }
            if node_ids.contains(p.id.as_str()) {
                return Err(TopologyError::SharedId(p.id.clone()));
            }
            for end in [&p.from_node, &p.to_node] {
                if !node_ids.contains(end.as_str()) {
                    return Err(TopologyError::UnknownNode {
                        pipe: p.id.clone(),
                        node: end.clone(),
                    });
                }
            }
            if !(p.length > 0.0 && p.diameter > 0.0) {
                return Err(TopologyError::InvalidGeometry {
                    pipe: p.id.clone(),
                    length: p.length,
                    diameter: p.diameter,
                });
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn pipe(&self, id: &str) -> Option<&Pipe> {
        self.pipes.iter().find(|p| p.id == id)
    }
}

fn node(id: &str, kind: NodeKind, x: f64, y: f64, pressure: f64, temperature: f64) -> Node {
    Node {
        id: id.to_string(),
        kind,
        x,
        y,
        pressure,
        temperature,
    }
}

fn pipe(id: &str, from: &str, to: &str, length: f64, diameter: f64) -> Pipe {
    Pipe {
        id: id.to_string(),
        from_node: from.to_string(),
        to_node: to.to_string(),
        length,
        diameter,
        flow_rate: 0.0,
        pressure_drop: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_topologies_are_valid() {
        assert!(NetworkTopology::reference().validate().is_ok());
        assert!(NetworkTopology::minimal().validate().is_ok());
        assert_eq!(NetworkTopology::reference().nodes.len(), 8);
        assert_eq!(NetworkTopology::minimal().pipes.len(), 4);
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut topo = NetworkTopology::minimal();
        topo.pipes[0].to_node = "Nowhere".into();
        assert!(matches!(
            topo.validate(),
            Err(TopologyError::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut topo = NetworkTopology::minimal();
        topo.nodes[1].id = "N1".into();
        assert!(matches!(topo.validate(), Err(TopologyError::DuplicateNode(_))));
    }

    #[test]
    fn test_zero_length_pipe_rejected() {
        let mut topo = NetworkTopology::minimal();
        topo.pipes[2].length = 0.0;
        assert!(matches!(
            topo.validate(),
            Err(TopologyError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_load_json_file_preserves_node_order() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "nodes": [
                    {{"id": "Z", "type": "source", "pressure": 60.0}},
                    {{"id": "A", "type": "sink", "pressure": 40.0}}
                ],
                "pipes": [
                    {{"id": "P", "from_node": "Z", "to_node": "A", "length": 5.0, "diameter": 0.5}}
                ]
            }}"#
        )
        .unwrap();

        let topo = NetworkTopology::from_file(file.path()).unwrap();
        assert_eq!(topo.nodes[0].id, "Z");
        assert_eq!(topo.nodes[1].kind, NodeKind::Sink);
        assert_eq!(topo.nodes[1].temperature, 20.0);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "nodes:\n  - id: S\n    type: source\n    pressure: 60.0\npipes: []\n"
        )
        .unwrap();
        let topo = NetworkTopology::from_file(file.path()).unwrap();
        assert_eq!(topo.nodes.len(), 1);
    }

    #[test]
    fn test_missing_file_falls_back_to_minimal() {
        let topo = NetworkTopology::load_or_fallback(Some(Path::new("/nonexistent/topology.json")));
        assert_eq!(topo.nodes.len(), 5);
        assert_eq!(topo.nodes[0].id, "N1");
    }

    #[test]
    fn test_pipe_sharing_node_id_rejected() {
        let mut topo = NetworkTopology::minimal();
        topo.pipes[0].id = "N1".into();
        assert!(matches!(topo.validate(), Err(TopologyError::SharedId(id)) if id == "N1"));
    }

    fn write_json(topology: &NetworkTopology) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(serde_json::to_string(topology).unwrap().as_bytes())
            .unwrap();
        file
    }

    #[rstest::rstest]
    #[case::unknown_endpoint(|t: &mut NetworkTopology| t.pipes[1].to_node = "Ghost".into())]
    #[case::duplicate_node(|t: &mut NetworkTopology| t.nodes[2].id = "N1".into())]
    #[case::duplicate_pipe(|t: &mut NetworkTopology| t.pipes[3].id = "P1".into())]
    #[case::pipe_named_like_source(|t: &mut NetworkTopology| t.pipes[0].id = "N1".into())]
    #[case::pipe_named_like_sink(|t: &mut NetworkTopology| t.pipes[3].id = "N5".into())]
    fn test_invalid_file_falls_back_to_minimal(#[case] corrupt: fn(&mut NetworkTopology)) {
        let mut topo = NetworkTopology::minimal();
        // Distinguishable from the fallback should the file be accepted
        topo.nodes[1].pressure = 51.5;
        corrupt(&mut topo);

        let file = write_json(&topo);
        let loaded = NetworkTopology::load_or_fallback(Some(file.path()));
        assert_eq!(loaded, NetworkTopology::minimal());
    }

    #[test]
    fn test_valid_file_is_used_as_is() {
        let mut topo = NetworkTopology::minimal();
        topo.nodes[1].pressure = 51.5;
        let file = write_json(&topo);
        assert_eq!(NetworkTopology::load_or_fallback(Some(file.path())), topo);
    }

    #[test]
    fn test_no_path_uses_reference() {
        let topo = NetworkTopology::load_or_fallback(None);
        assert_eq!(topo.nodes[0].id, "Source_1");
    }
}
