//! Parallel node contraction.
//!
//! Nodes are contracted in rounds. Each round picks all nodes which have the smallest priority
//! in their two hop neighborhood. Such a set is independent, so the nodes can be contracted concurrently
//! without interfering with each other. Witness searches only read the graph,
//! all modifications are collected per round and applied serially afterwards.
//!
//! Every edge is stored at both of its endpoints while contracting.
//! Once a node is contracted its remaining edges all point to nodes contracted later, and are kept as its upward edges.

use super::*;
use crate::datastr::dynamic_graph::DynamicGraph;
use crate::datastr::index_heap::{IndexedBinaryHeap, MapStorage};
use rand::prelude::*;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

/// The upward edges of all nodes after contraction, in contraction ids (the input ids).
#[derive(Debug, Clone)]
pub struct Contraction {
    pub num_nodes: usize,
    pub edges: Vec<HierarchyEdge>,
    pub witnesses: Vec<Witness>,
}

pub struct Contractor<'c> {
    graph: DynamicGraph<EdgeData>,
    config: &'c ContractionConfig,
}

impl<'c> Contractor<'c> {
    /// Set up the contraction graph. Edges have to be valid, see `check_input`.
    pub fn new(num_nodes: usize, edges: &[InputEdge], config: &'c ContractionConfig) -> Self {
        let mut input = Vec::with_capacity(edges.len() * 2);
        for (id, edge, weight) in usable_edges(edges, config) {
            input.push((edge.source, edge.target, EdgeData::original(id, weight, true, edge.bidirectional)));
            input.push((edge.target, edge.source, EdgeData::original(id, weight, edge.bidirectional, true)));
        }

        Contractor {
            graph: DynamicGraph::new(num_nodes, input),
            config,
        }
    }

    /// Contract all nodes. Parallel parts run on the current rayon pool.
    pub fn run(mut self, reporter: &mut Reporter) -> Contraction {
        let n = self.graph.num_nodes();
        let simulation_limit = self.config.simulation_settle_limit;
        let contraction_limit = self.config.contraction_settle_limit;
        let record_witnesses = self.config.record_witnesses;

        let bias = {
            let mut order: Vec<NodeId> = (0..n as NodeId).collect();
            order.shuffle(&mut StdRng::seed_from_u64(self.config.seed));
            let mut bias = vec![0; n];
            for (position, &node) in order.iter().enumerate() {
                bias[node as usize] = position as u32;
            }
            bias
        };

        let mut depth = vec![0u32; n];
        let mut priorities: Vec<f64> = {
            let graph = &self.graph;
            (0..n as NodeId)
                .into_par_iter()
                .map_init(WitnessSearch::new, |search, node| search.priority(graph, node, 0, simulation_limit))
                .collect()
        };

        let mut remaining: Vec<NodeId> = (0..n as NodeId).collect();
        let mut witnesses = Vec::new();
        let mut num_shortcuts = 0;
        let mut rounds = 0;

        reporter.in_collection("rounds", |reporter| {
            while !remaining.is_empty() {
                let independent: Vec<bool> = {
                    let (graph, priorities, bias) = (&self.graph, &priorities, &bias);
                    remaining.par_iter().map(|&node| is_independent(graph, priorities, bias, node)).collect()
                };
                let (contracted, rest): (Vec<(NodeId, bool)>, Vec<(NodeId, bool)>) =
                    remaining.iter().copied().zip(independent).partition(|&(_, independent)| independent);
                remaining = rest.into_iter().map(|(node, _)| node).collect();
                let contracted: Vec<NodeId> = contracted.into_iter().map(|(node, _)| node).collect();
                debug_assert!(!contracted.is_empty());

                let (shortcuts, round_witnesses) = {
                    let graph = &self.graph;
                    contracted
                        .par_iter()
                        .fold(
                            || (WitnessSearch::new(), Vec::new(), Vec::new()),
                            |(mut search, mut shortcuts, mut witnesses), &node| {
                                search.contract(graph, node, contraction_limit, &mut shortcuts, record_witnesses.then_some(&mut witnesses));
                                (search, shortcuts, witnesses)
                            },
                        )
                        .map(|(_, shortcuts, witnesses)| (shortcuts, witnesses))
                        .reduce(
                            || (Vec::new(), Vec::new()),
                            |(mut shortcuts, mut witnesses), (more_shortcuts, more_witnesses)| {
                                shortcuts.extend(more_shortcuts);
                                witnesses.extend(more_witnesses);
                                (shortcuts, witnesses)
                            },
                        )
                };

                // the contracted nodes keep their own edges as upward edges
                for &node in &contracted {
                    for neighbor in neighbors(&self.graph, node) {
                        self.graph.delete_edges_to(neighbor, node);
                    }
                }

                let round_shortcuts = shortcuts.len() / 2;
                num_shortcuts += round_shortcuts;
                for shortcut in shortcuts {
                    self.graph.insert_edge(shortcut.source, shortcut.target, shortcut.data);
                }
                witnesses.extend(round_witnesses);

                let affected = neighbor_depths(&self.graph, &contracted, &depth);
                let updates: Vec<f64> = {
                    let graph = &self.graph;
                    affected
                        .par_iter()
                        .map_init(WitnessSearch::new, |search, &(node, node_depth)| search.priority(graph, node, node_depth, simulation_limit))
                        .collect()
                };
                for (&(node, node_depth), priority) in affected.iter().zip(updates) {
                    depth[node as usize] = node_depth;
                    priorities[node as usize] = priority;
                }

                rounds += 1;
                tracing::debug!(round = rounds, contracted = contracted.len(), remaining = remaining.len(), "contraction round done");
                reporter.in_collection_item(|reporter| {
                    report!(reporter, "contracted", contracted.len());
                    report!(reporter, "shortcuts", round_shortcuts);
                });
            }
        });

        let mut edges = Vec::with_capacity(self.graph.num_arcs());
        for node in 0..n as NodeId {
            edges.extend(self.graph.edges(node).map(|(target, &data)| HierarchyEdge { source: node, target, data }));
        }

        tracing::info!(rounds, shortcuts = num_shortcuts, edges = edges.len(), "contraction finished");
        report!(reporter, "num_rounds", rounds);
        report!(reporter, "num_shortcuts", num_shortcuts);
        report!(reporter, "num_edges", edges.len());
        report!(reporter, "num_witnesses", witnesses.len());

        Contraction { num_nodes: n, edges, witnesses }
    }
}

/// Distinct neighbors of `node`.
fn neighbors(graph: &DynamicGraph<EdgeData>, node: NodeId) -> Vec<NodeId> {
    let mut neighbors: Vec<NodeId> = graph.edges(node).map(|(target, _)| target).filter(|&target| target != node).collect();
    neighbors.sort_unstable();
    neighbors.dedup();
    neighbors
}

/// Remaining neighbors of the contracted nodes with their new depth, one entry per neighbor, sorted by node.
/// A neighbor ends up one level above the deepest contracted node next to it.
fn neighbor_depths(graph: &DynamicGraph<EdgeData>, contracted: &[NodeId], depth: &[u32]) -> Vec<(NodeId, u32)> {
    let mut affected: FxHashMap<NodeId, u32> = FxHashMap::default();
    for &node in contracted {
        for neighbor in neighbors(graph, node) {
            let neighbor_depth = affected.entry(neighbor).or_insert(depth[neighbor as usize]);
            *neighbor_depth = (*neighbor_depth).max(depth[node as usize] + 1);
        }
    }
    let mut affected: Vec<(NodeId, u32)> = affected.into_iter().collect();
    affected.sort_unstable();
    affected
}

/// Does no node within two hops of `node` have to be contracted earlier?
fn is_independent(graph: &DynamicGraph<EdgeData>, priorities: &[f64], bias: &[u32], node: NodeId) -> bool {
    let priority = priorities[node as usize];
    let loses_to = |other: NodeId| {
        let other_priority = priorities[other as usize];
        other_priority < priority || (other_priority == priority && bias[node as usize] < bias[other as usize])
    };

    for (target, _) in graph.edges(node) {
        if loses_to(target) {
            return false;
        }
        for (second_hop, _) in graph.edges(target) {
            if second_hop != node && loses_to(second_hop) {
                return false;
            }
        }
    }
    true
}

#[derive(Debug, Default)]
struct ContractionCounts {
    edges_added: u32,
    edges_deleted: u32,
    original_edges_added: u32,
    original_edges_deleted: u32,
}

/// Local Dijkstra which looks for paths avoiding the node being contracted.
/// One instance is reused for all searches of a worker.
#[derive(Debug)]
struct WitnessSearch {
    heap: IndexedBinaryHeap<Weight, (), MapStorage>,
    targets: Vec<NodeId>,
    out_edges: Vec<(NodeId, Weight, u32)>,
}

impl WitnessSearch {
    fn new() -> Self {
        WitnessSearch {
            heap: IndexedBinaryHeap::new(0),
            targets: Vec::new(),
            out_edges: Vec::new(),
        }
    }

    /// Dijkstra from `source` over forward edges, never entering `avoid`.
    /// Stops after `settle_limit` settled nodes, once the minimum key exceeds `max_distance`
    /// or when all of `self.targets` are settled.
    fn run(&mut self, graph: &DynamicGraph<EdgeData>, source: NodeId, avoid: NodeId, max_distance: Weight, settle_limit: usize) {
        self.heap.clear();
        self.heap.insert(source, 0, ());
        let mut settled = 0;
        let mut targets_settled = 0;

        while let Some(node) = self.heap.delete_min() {
            let distance = self.heap.key(node);
            if distance > max_distance {
                break;
            }
            settled += 1;
            if self.targets.binary_search(&node).is_ok() {
                targets_settled += 1;
                if targets_settled == self.targets.len() {
                    break;
                }
            }
            if settled > settle_limit {
                break;
            }

            for (target, data) in graph.edges(node) {
                if !data.forward || target == avoid {
                    continue;
                }
                let next_distance = distance + data.weight;
                if !self.heap.was_inserted(target) {
                    self.heap.insert(target, next_distance, ());
                } else if self.heap.contains(target) && next_distance < self.heap.key(target) {
                    self.heap.decrease_key(target, next_distance);
                }
            }
        }
    }

    /// Best known distance to `node` after `run`, settled or tentative.
    fn witness_distance(&self, node: NodeId) -> Weight {
        if self.heap.was_inserted(node) {
            self.heap.key(node)
        } else {
            INFINITY
        }
    }

    /// Calls `callback(source, target, weight, original_edges, needed)` for every pair of
    /// an incoming and an outgoing edge of `node` with distinct endpoints.
    fn for_each_candidate(
        &mut self,
        graph: &DynamicGraph<EdgeData>,
        node: NodeId,
        settle_limit: usize,
        mut callback: impl FnMut(NodeId, NodeId, Weight, u32, bool),
    ) {
        for (source, in_data) in graph.edges(node) {
            if !in_data.backward {
                continue;
            }

            self.out_edges.clear();
            self.targets.clear();
            let mut max_distance = 0;
            for (target, out_data) in graph.edges(node) {
                if !out_data.forward || target == source {
                    continue;
                }
                let weight = in_data.weight + out_data.weight;
                max_distance = max_distance.max(weight);
                self.out_edges.push((target, weight, in_data.original_edges + out_data.original_edges));
                self.targets.push(target);
            }
            if self.out_edges.is_empty() {
                continue;
            }
            self.targets.sort_unstable();
            self.targets.dedup();

            self.run(graph, source, node, max_distance, settle_limit);

            for &(target, weight, original_edges) in &self.out_edges {
                let needed = self.witness_distance(target) > weight;
                callback(source, target, weight, original_edges, needed);
            }
        }
    }

    /// Simulate contracting `node` and derive its priority.
    fn priority(&mut self, graph: &DynamicGraph<EdgeData>, node: NodeId, depth: u32, settle_limit: usize) -> f64 {
        let mut counts = ContractionCounts::default();
        for (_, data) in graph.edges(node) {
            counts.edges_deleted += 1;
            counts.original_edges_deleted += data.original_edges;
        }
        self.for_each_candidate(graph, node, settle_limit, |_, _, _, original_edges, needed| {
            if needed {
                counts.edges_added += 2;
                counts.original_edges_added += 2 * original_edges;
            }
        });

        if counts.edges_deleted == 0 || counts.original_edges_deleted == 0 {
            return depth as f64;
        }
        2.0 * (counts.edges_added as f64 / counts.edges_deleted as f64)
            + (counts.original_edges_added as f64 / counts.original_edges_deleted as f64)
            + depth as f64
    }

    /// Determine the shortcuts needed to contract `node`. Each shortcut is emitted once per endpoint.
    fn contract(
        &mut self,
        graph: &DynamicGraph<EdgeData>,
        node: NodeId,
        settle_limit: usize,
        shortcuts: &mut Vec<HierarchyEdge>,
        mut witnesses: Option<&mut Vec<Witness>>,
    ) {
        let first_shortcut = shortcuts.len();
        self.for_each_candidate(graph, node, settle_limit, |source, target, weight, original_edges, needed| {
            if needed {
                shortcuts.push(HierarchyEdge {
                    source,
                    target,
                    data: EdgeData::shortcut(node, weight, original_edges, true, false),
                });
                shortcuts.push(HierarchyEdge {
                    source: target,
                    target: source,
                    data: EdgeData::shortcut(node, weight, original_edges, false, true),
                });
            } else if let Some(witnesses) = witnesses.as_deref_mut() {
                witnesses.push(Witness { source, target, middle: node });
            }
        });

        // a -> b and b -> a with the same weight become one edge in both directions
        let new_shortcuts = &mut shortcuts[first_shortcut..];
        new_shortcuts.sort_unstable_by_key(|edge| (edge.source, edge.target, edge.data.weight, !edge.data.forward));
        let mut merged = first_shortcut;
        for current in first_shortcut..shortcuts.len() {
            if merged > first_shortcut {
                let (previous, edge) = (shortcuts[merged - 1], shortcuts[current]);
                if previous.source == edge.source && previous.target == edge.target && previous.data.weight == edge.data.weight {
                    shortcuts[merged - 1].data.forward |= edge.data.forward;
                    shortcuts[merged - 1].data.backward |= edge.data.backward;
                    continue;
                }
            }
            shortcuts[merged] = shortcuts[current];
            merged += 1;
        }
        shortcuts.truncate(merged);
    }
}
