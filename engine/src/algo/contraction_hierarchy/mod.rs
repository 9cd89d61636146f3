//! Contraction hierarchy preprocessing.
//!
//! The pipeline has three stages:
//!
//! 1. [`contractor`] removes nodes in rounds of independent sets and inserts shortcuts to preserve distances.
//! 2. [`cleanup`] drops redundant parallel edges and shortcuts which are not on any shortest path,
//!    then renumbers nodes topologically so that every edge points from a larger to a smaller id.
//! 3. The compressed graph builder serializes the result into blocks (see [`crate::datastr::graph::compressed_graph`]).
//!
//! [`query`] answers queries on the compressed representation.

use super::*;
use crate::config::{Config, ContractionConfig};
use crate::datastr::graph::compressed_graph::builder;
use crate::report::*;
use crate::Result;
use rayon::ThreadPoolBuilder;
use std::path::Path;

pub mod cleanup;
pub mod contractor;
pub mod query;

pub use self::cleanup::Hierarchy;

/// A road segment as handed to the preprocessing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEdge {
    pub source: NodeId,
    pub target: NodeId,
    /// Travel time in seconds.
    pub distance: f64,
    pub bidirectional: bool,
    pub name_id: u32,
    pub type_id: u8,
    pub branching_possible: bool,
}

impl InputEdge {
    pub fn new(source: NodeId, target: NodeId, distance: f64, bidirectional: bool) -> Self {
        InputEdge {
            source,
            target,
            distance,
            bidirectional,
            name_id: 0,
            type_id: 0,
            branching_possible: false,
        }
    }

    pub fn with_description(self, name_id: u32, type_id: u8, branching_possible: bool) -> Self {
        InputEdge {
            name_id,
            type_id,
            branching_possible,
            ..self
        }
    }

    pub fn weight(&self) -> Weight {
        edge_weight(self.distance)
    }
}

/// Convert a travel time in seconds into weight units, rounded, at least 1 and at most `INFINITY`.
pub fn edge_weight(seconds: f64) -> Weight {
    let units = (seconds * WEIGHT_UNITS_PER_SECOND).round();
    if units >= INFINITY as f64 {
        INFINITY
    } else if units >= 1.0 {
        units as Weight
    } else {
        1
    }
}

/// Payload of an edge in the contraction graph and in the final hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeData {
    pub weight: Weight,
    /// Number of input edges this edge represents.
    pub original_edges: u32,
    pub shortcut: bool,
    pub forward: bool,
    pub backward: bool,
    /// Contracted node a shortcut bypasses, `NO_NODE` for original edges.
    pub middle: NodeId,
    /// Index of the input edge, `NO_EDGE` for shortcuts.
    pub id: EdgeId,
}

pub const NO_NODE: NodeId = NodeId::MAX;
pub const NO_EDGE: EdgeId = EdgeId::MAX;

impl Default for EdgeData {
    fn default() -> Self {
        EdgeData {
            weight: INFINITY,
            original_edges: 0,
            shortcut: false,
            forward: false,
            backward: false,
            middle: NO_NODE,
            id: NO_EDGE,
        }
    }
}

impl EdgeData {
    pub fn original(id: EdgeId, weight: Weight, forward: bool, backward: bool) -> Self {
        EdgeData {
            weight,
            original_edges: 1,
            shortcut: false,
            forward,
            backward,
            middle: NO_NODE,
            id,
        }
    }

    pub fn shortcut(middle: NodeId, weight: Weight, original_edges: u32, forward: bool, backward: bool) -> Self {
        EdgeData {
            weight,
            original_edges,
            shortcut: true,
            forward,
            backward,
            middle,
            id: NO_EDGE,
        }
    }

    pub fn has_direction(&self, forward: bool) -> bool {
        if forward {
            self.forward
        } else {
            self.backward
        }
    }
}

/// An edge stored at `source`. Forward means traversable from `source` to `target`,
/// backward means traversable from `target` to `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HierarchyEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub data: EdgeData,
}

/// A shortcut `source -> middle -> target` which was not inserted because a path of at most the same weight avoids `middle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Witness {
    pub source: NodeId,
    pub target: NodeId,
    pub middle: NodeId,
}

/// Indices and weights of the input edges which take part in the preprocessing.
/// Loops and edges heavier than `max_edge_weight` are skipped with a warning.
pub fn usable_edges<'a>(edges: &'a [InputEdge], config: &'a ContractionConfig) -> impl Iterator<Item = (EdgeId, &'a InputEdge, Weight)> + 'a {
    edges.iter().enumerate().filter_map(move |(id, edge)| {
        let weight = edge.weight();
        if edge.source == edge.target {
            tracing::warn!(edge = id, node = edge.source, "dropping loop");
            None
        } else if weight > config.max_edge_weight {
            tracing::warn!(edge = id, weight, max = config.max_edge_weight, "dropping overlong edge");
            None
        } else {
            Some((id as EdgeId, edge, weight))
        }
    })
}

/// Validate that all edges reference existing nodes.
pub fn check_input(num_nodes: usize, edges: &[InputEdge]) -> Result<()> {
    if num_nodes >= NO_NODE as usize {
        return Err(crate::Error::InvalidInput(format!("{} nodes exceed the supported id range", num_nodes)));
    }
    if edges.len() >= NO_EDGE as usize {
        return Err(crate::Error::InvalidInput(format!("{} edges exceed the supported id range", edges.len())));
    }
    for (id, edge) in edges.iter().enumerate() {
        if edge.source as usize >= num_nodes || edge.target as usize >= num_nodes {
            return Err(crate::Error::InvalidInput(format!(
                "edge {} ({} -> {}) references a node outside of [0, {})",
                id, edge.source, edge.target, num_nodes
            )));
        }
        if !(edge.distance >= 0.0) {
            return Err(crate::Error::InvalidInput(format!("edge {} has invalid travel time {}", id, edge.distance)));
        }
    }
    Ok(())
}

/// The directed graph the hierarchy preserves distances of, with the same weights and filters as the preprocessing.
pub fn reference_graph(num_nodes: usize, edges: &[InputEdge], config: &ContractionConfig) -> OwnedGraph {
    let mut adjacency = vec![Vec::new(); num_nodes];
    for (_, edge, weight) in usable_edges(edges, config) {
        adjacency[edge.source as usize].push(Link { node: edge.target, weight });
        if edge.bidirectional {
            adjacency[edge.target as usize].push(Link { node: edge.source, weight });
        }
    }
    OwnedGraph::from_adjancecy_lists(adjacency)
}

/// Contract and clean up a graph. Runs on a dedicated thread pool with `config.threads` workers.
pub fn preprocess(num_nodes: usize, edges: &[InputEdge], config: &ContractionConfig, reporter: &mut Reporter) -> Result<Hierarchy> {
    config.validate()?;
    check_input(num_nodes, edges)?;
    let pool = ThreadPoolBuilder::new().num_threads(config.threads).build()?;
    report!(reporter, "num_threads", pool.current_num_threads());
    report!(reporter, "num_nodes", num_nodes);
    report!(reporter, "num_input_edges", edges.len());

    Ok(pool.install(|| {
        let contraction = reporter.in_context("contraction", |reporter| {
            report_time("contraction", reporter, |reporter| contractor::Contractor::new(num_nodes, edges, config).run(reporter))
        });
        reporter.in_context("cleanup", |reporter| report_time("cleanup", reporter, |reporter| cleanup::cleanup(contraction, reporter)))
    }))
}

/// Run the whole preprocessing and write the compressed hierarchy to `path`.
/// Returns the new id of every input node, the node descriptor used by the query side.
pub fn preprocess_to_file<P: AsRef<Path>>(nodes: &[Coordinate], edges: &[InputEdge], path: P, config: &Config, reporter: &mut Reporter) -> Result<Vec<NodeId>> {
    config.validate()?;
    let hierarchy = preprocess(nodes.len(), edges, &config.contraction, reporter)?;
    reporter.in_context("compression", |reporter| {
        report_time("compression", reporter, |reporter| {
            builder::write_to_file(&hierarchy, nodes, edges, path.as_ref(), &config.compression, reporter)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_conversion() {
        assert_eq!(edge_weight(1.0), 10);
        assert_eq!(edge_weight(0.26), 3);
        assert_eq!(edge_weight(0.0), 1);
        assert_eq!(edge_weight(0.04), 1);
        assert_eq!(edge_weight(1e12), INFINITY);
        assert_eq!(edge_weight(f64::INFINITY), INFINITY);
    }

    #[test]
    fn filters_loops_and_overlong_edges() {
        let config = ContractionConfig {
            max_edge_weight: 100,
            ..Default::default()
        };
        let edges = [
            InputEdge::new(0, 1, 1.0, true),
            InputEdge::new(1, 1, 1.0, true),
            InputEdge::new(1, 2, 10.5, false),
            InputEdge::new(1, 2, 10.0, false),
        ];
        let usable: Vec<EdgeId> = usable_edges(&edges, &config).map(|(id, _, _)| id).collect();
        assert_eq!(usable, vec![0, 3]);

        let graph = reference_graph(3, &edges, &config);
        assert_eq!(graph.num_arcs(), 3);
        assert_eq!(graph.edge_index(1, 0).map(|edge| graph.weight()[edge as usize]), Some(10));
        assert_eq!(graph.edge_index(2, 1), None);
    }

    #[test]
    fn rejects_dangling_edges() {
        let edges = [InputEdge::new(0, 3, 1.0, true)];
        assert!(matches!(check_input(3, &edges), Err(crate::Error::InvalidInput(_))));
        assert!(check_input(4, &edges).is_ok());
        let negative = [InputEdge::new(0, 1, -1.0, true)];
        assert!(matches!(check_input(2, &negative), Err(crate::Error::InvalidInput(_))));
    }

    #[test]
    fn rejects_edge_weight_caps_beyond_infinity() {
        let edges = [InputEdge::new(0, 1, 1.0, true)];
        let config = ContractionConfig {
            max_edge_weight: INFINITY + 1,
            ..Default::default()
        };
        let result = preprocess(2, &edges, &config, &mut Reporter::disabled());
        assert!(matches!(result, Err(crate::Error::InvalidInput(_))));
    }

    #[test]
    fn preprocess_reports_statistics() {
        let edges = [InputEdge::new(0, 1, 1.0, true), InputEdge::new(1, 2, 1.0, true)];
        let mut reporter = Reporter::new();
        let hierarchy = preprocess(3, &edges, &ContractionConfig::default(), &mut reporter).unwrap();
        assert_eq!(hierarchy.distance(0, 2), Some(20));
        let report = reporter.into_json();
        assert_eq!(report["num_nodes"], 3);
        assert!(report["contraction"]["running_time_ms"].is_number());
    }
}
