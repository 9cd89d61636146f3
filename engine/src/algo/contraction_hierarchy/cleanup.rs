//! Post processing of a contracted graph.
//!
//! - Parallel edges are collapsed, per direction only the cheapest edge keeps its flag.
//! - Shortcuts which are longer than the shortest path between their endpoints are dropped.
//!   All of these checks run in parallel against the same graph.
//!   Removing an edge which is not on a shortest path never changes a distance, so they do not interfere.
//! - Nodes get renumbered in a topological order of the upward graph, top first,
//!   so that every edge points from a larger to a smaller id and the middle node of a shortcut
//!   has a larger id than both endpoints.
//!   Nodes close in the hierarchy and in the graph end up with close ids, which keeps blocks local.

use super::contractor::Contraction;
use super::*;
use crate::datastr::index_heap::IndexedBinaryHeap;
use crate::datastr::node_order::NodeOrder;
use rayon::prelude::*;
use std::collections::BinaryHeap;

/// Edges of a hierarchy in an adjacency array, grouped by the node they are stored at.
#[derive(Debug, Clone)]
pub struct HierarchyGraph {
    first_edge: Vec<EdgeId>,
    edges: Vec<HierarchyEdge>,
}

impl HierarchyGraph {
    /// `edges` have to be sorted by source.
    fn new(num_nodes: usize, edges: Vec<HierarchyEdge>) -> Self {
        debug_assert!(edges.windows(2).all(|pair| pair[0].source <= pair[1].source));
        let mut degrees = vec![0; num_nodes];
        for edge in &edges {
            degrees[edge.source as usize] += 1;
        }
        HierarchyGraph {
            first_edge: degrees_to_first_out(degrees.into_iter()).collect(),
            edges,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.first_edge.len() - 1
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// All edges, sorted by source.
    pub fn edges(&self) -> &[HierarchyEdge] {
        &self.edges
    }

    /// Positions in `edges()` of the edges stored at `node`.
    pub fn edge_range(&self, node: NodeId) -> std::ops::Range<usize> {
        self.first_edge[node as usize] as usize..self.first_edge[node as usize + 1] as usize
    }

    /// Edges stored at `node`.
    pub fn edges_at(&self, node: NodeId) -> &[HierarchyEdge] {
        &self.edges[self.edge_range(node)]
    }

    /// The edge stored at `source` which leads to `target` in the given direction.
    /// Among parallel candidates the cheapest wins, original edges win ties.
    pub fn find_edge(&self, source: NodeId, target: NodeId, forward: bool) -> Option<&HierarchyEdge> {
        self.find_edge_index(source, target, forward).map(|index| &self.edges[index])
    }

    /// Position of `find_edge`s result in `edges()`.
    pub fn find_edge_index(&self, source: NodeId, target: NodeId, forward: bool) -> Option<usize> {
        self.edge_range(source)
            .filter(|&index| self.edges[index].target == target && self.edges[index].data.has_direction(forward))
            .min_by_key(|&index| (self.edges[index].data.weight, self.edges[index].data.shortcut))
    }

    /// Calls `visit` for every input edge on the path a hierarchy edge represents, in traversal order.
    /// `forward` traverses from `source` to `target`, otherwise from `target` to `source`.
    /// The second argument of `visit` is the node the input edge leads to.
    pub fn unpack(&self, source: NodeId, target: NodeId, forward: bool, mut visit: impl FnMut(&HierarchyEdge, NodeId)) {
        let mut stack = vec![(source, target, forward)];
        while let Some((source, target, forward)) = stack.pop() {
            let edge = match self.find_edge(source, target, forward) {
                Some(edge) => edge,
                None => {
                    debug_assert!(false, "missing edge {} -> {} ({})", source, target, forward);
                    continue;
                }
            };

            if !edge.data.shortcut {
                visit(edge, if forward { target } else { source });
                continue;
            }

            let middle = edge.data.middle;
            if forward {
                stack.push((middle, target, true));
                stack.push((middle, source, false));
            } else {
                stack.push((middle, source, true));
                stack.push((middle, target, false));
            }
        }
    }
}

/// Bidirectional Dijkstra restricted to upward edges.
#[derive(Debug)]
pub struct HierarchySearch {
    // payload is the node the element was reached from
    forward: IndexedBinaryHeap<Weight, NodeId>,
    backward: IndexedBinaryHeap<Weight, NodeId>,
}

impl HierarchySearch {
    pub fn new(num_nodes: usize) -> Self {
        HierarchySearch {
            forward: IndexedBinaryHeap::new(num_nodes),
            backward: IndexedBinaryHeap::new(num_nodes),
        }
    }

    /// Shortest distance from `source` to `target` if it is below `bound`, together with the meeting node.
    pub fn run(&mut self, graph: &HierarchyGraph, source: NodeId, target: NodeId, bound: Weight) -> Option<(Weight, NodeId)> {
        self.forward.clear();
        self.backward.clear();
        self.forward.insert(source, 0, source);
        self.backward.insert(target, 0, target);
        let mut best = bound;
        let mut meeting = None;

        loop {
            let forward_key = self.forward.min_key().filter(|&key| key < best);
            let backward_key = self.backward.min_key().filter(|&key| key < best);
            let forward_step = match (forward_key, backward_key) {
                (None, None) => break,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some(forward_key), Some(backward_key)) => forward_key <= backward_key,
            };
            let (queue, other) = if forward_step {
                (&mut self.forward, &self.backward)
            } else {
                (&mut self.backward, &self.forward)
            };

            let Some(node) = queue.delete_min() else { break };
            let distance = queue.key(node);
            if other.was_inserted(node) && distance + other.key(node) < best {
                best = distance + other.key(node);
                meeting = Some(node);
            }

            for edge in graph.edges_at(node) {
                if !edge.data.has_direction(forward_step) {
                    continue;
                }
                let next_distance = distance + edge.data.weight;
                if next_distance >= best {
                    continue;
                }
                if !queue.was_inserted(edge.target) {
                    queue.insert(edge.target, next_distance, node);
                } else if queue.contains(edge.target) && next_distance < queue.key(edge.target) {
                    queue.decrease_key(edge.target, next_distance);
                    *queue.data_mut(edge.target) = node;
                }
            }
        }

        meeting.map(|node| (best, node))
    }

    /// Node sequence from `source` to `target` over hierarchy edges after a successful `run`.
    fn hierarchy_path(&self, meeting: NodeId) -> Vec<NodeId> {
        let mut path = vec![meeting];
        let mut node = meeting;
        while *self.forward.data(node) != node {
            node = *self.forward.data(node);
            path.push(node);
        }
        path.reverse();
        let mut node = meeting;
        while *self.backward.data(node) != node {
            node = *self.backward.data(node);
            path.push(node);
        }
        path
    }
}

/// A cleaned up contraction hierarchy in its final numbering.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    graph: HierarchyGraph,
    /// Maps input node ids to hierarchy ids.
    order: NodeOrder,
    witnesses: Vec<Witness>,
}

impl Hierarchy {
    pub fn graph(&self) -> &HierarchyGraph {
        &self.graph
    }

    /// `order.rank(input_id)` is the hierarchy id of an input node.
    pub fn order(&self) -> &NodeOrder {
        &self.order
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }

    pub fn num_edges(&self) -> usize {
        self.graph.num_edges()
    }

    /// Skipped shortcuts in input ids, only recorded with `record_witnesses`.
    pub fn witnesses(&self) -> &[Witness] {
        &self.witnesses
    }

    /// Shortest distance between two input nodes.
    pub fn distance(&self, from: NodeId, to: NodeId) -> Option<Weight> {
        let mut search = HierarchySearch::new(self.num_nodes());
        search
            .run(&self.graph, self.order.rank(from), self.order.rank(to), INFINITY)
            .map(|(distance, _)| distance)
    }

    /// Shortest distance and the fully unpacked node sequence between two input nodes, in input ids.
    pub fn path(&self, from: NodeId, to: NodeId) -> Option<(Weight, Vec<NodeId>)> {
        self.path_with_edges(from, to).map(|(distance, nodes, _)| (distance, nodes))
    }

    /// Like `path`, additionally returns the ids of the traversed input edges.
    pub fn path_with_edges(&self, from: NodeId, to: NodeId) -> Option<(Weight, Vec<NodeId>, Vec<EdgeId>)> {
        let mut search = HierarchySearch::new(self.num_nodes());
        let (source, target) = (self.order.rank(from), self.order.rank(to));
        let (distance, meeting) = search.run(&self.graph, source, target, INFINITY)?;
        let hierarchy_path = search.hierarchy_path(meeting);

        let mut nodes = vec![source];
        let mut edges = Vec::new();
        let mut visit = |edge: &HierarchyEdge, reached: NodeId| {
            edges.push(edge.data.id);
            nodes.push(reached);
        };
        let upward = hierarchy_path.iter().position(|&node| node == meeting).unwrap_or(0);
        for (index, pair) in hierarchy_path.windows(2).enumerate() {
            if index < upward {
                self.graph.unpack(pair[0], pair[1], true, &mut visit);
            } else {
                self.graph.unpack(pair[1], pair[0], false, &mut visit);
            }
        }

        let nodes = nodes.into_iter().map(|node| self.order.node(node)).collect();
        Some((distance, nodes, edges))
    }

    /// Input edges a hierarchy edge stands for, in traversal order.
    pub fn unpack_to_input_edges(&self, edge: &HierarchyEdge, forward: bool) -> Vec<EdgeId> {
        let mut edges = Vec::new();
        self.graph.unpack(edge.source, edge.target, forward, |edge, _| edges.push(edge.data.id));
        edges
    }
}

/// Turn the result of the contraction into a hierarchy. Parallel parts run on the current rayon pool.
pub fn cleanup(contraction: Contraction, reporter: &mut Reporter) -> Hierarchy {
    let Contraction {
        num_nodes,
        mut edges,
        witnesses,
    } = contraction;
    let input_edges = edges.len();

    collapse_parallel_edges(&mut edges);
    let collapsed = input_edges - edges.len();

    let graph = HierarchyGraph::new(num_nodes, edges);
    let verdicts: Vec<(usize, bool, bool)> = {
        let graph = &graph;
        (0..graph.num_edges())
            .into_par_iter()
            .filter(|&index| graph.edges[index].data.shortcut)
            .map_init(
                || HierarchySearch::new(num_nodes),
                |search, index| {
                    let edge = &graph.edges[index];
                    let has_shorter_path = |search: &mut HierarchySearch, from: NodeId, to: NodeId| {
                        search.run(graph, from, to, edge.data.weight).is_some()
                    };
                    let forward = edge.data.forward && !has_shorter_path(search, edge.source, edge.target);
                    let backward = edge.data.backward && !has_shorter_path(search, edge.target, edge.source);
                    (index, forward, backward)
                },
            )
            .collect()
    };
    let HierarchyGraph { mut edges, .. } = graph;
    for (index, forward, backward) in verdicts {
        edges[index].data.forward = forward;
        edges[index].data.backward = backward;
    }
    let before = edges.len();
    edges.retain(|edge| edge.data.forward || edge.data.backward);
    let useless = before - edges.len();

    let order = topological_order(num_nodes, &edges);
    for edge in &mut edges {
        edge.source = order.rank(edge.source);
        edge.target = order.rank(edge.target);
        if edge.data.shortcut {
            edge.data.middle = order.rank(edge.data.middle);
        }
        debug_assert!(edge.target < edge.source);
        debug_assert!(!edge.data.shortcut || edge.source < edge.data.middle);
    }
    edges.sort_unstable_by_key(|edge| (edge.source, direction_class(&edge.data), edge.target, edge.data.weight));

    tracing::info!(collapsed, useless, edges = edges.len(), "cleanup finished");
    report!(reporter, "num_collapsed_edges", collapsed);
    report!(reporter, "num_useless_shortcuts", useless);
    report!(reporter, "num_edges", edges.len());
    report!(reporter, "num_witnesses", witnesses.len());

    Hierarchy {
        graph: HierarchyGraph::new(num_nodes, edges),
        order,
        witnesses,
    }
}

fn direction_class(data: &EdgeData) -> u8 {
    match (data.forward, data.backward) {
        (true, false) => 0,
        (true, true) => 1,
        _ => 2,
    }
}

/// Per pair of nodes and direction, only the cheapest edge keeps its direction flag.
/// An original edge only yields its flag to another original edge, so shortcuts never hide
/// input edges they could be unpacked into.
/// Edges without flags are removed.
fn collapse_parallel_edges(edges: &mut Vec<HierarchyEdge>) {
    edges.sort_unstable_by_key(|edge| (edge.source, edge.target, edge.data.weight, edge.data.shortcut));

    let mut group_start = 0;
    while group_start < edges.len() {
        let (source, target) = (edges[group_start].source, edges[group_start].target);
        let group_end = group_start + edges[group_start..].iter().take_while(|edge| (edge.source, edge.target) == (source, target)).count();

        for forward in [true, false] {
            let mut any_kept = false;
            let mut original_kept = false;
            for edge in &mut edges[group_start..group_end] {
                if !edge.data.has_direction(forward) {
                    continue;
                }
                let keep = if edge.data.shortcut { !any_kept } else { !original_kept };
                if keep {
                    any_kept = true;
                    original_kept |= !edge.data.shortcut;
                } else if forward {
                    edge.data.forward = false;
                } else {
                    edge.data.backward = false;
                }
            }
        }

        group_start = group_end;
    }

    edges.retain(|edge| edge.data.forward || edge.data.backward);
}

/// Assign hierarchy ids, 0 for the topmost node.
/// A node only gets its id after all targets of its edges got theirs.
fn topological_order(num_nodes: usize, edges: &[HierarchyEdge]) -> NodeOrder {
    let n = num_nodes;
    let mut out_degree = vec![0u32; n];
    let mut in_degree = vec![0u32; n];
    for edge in edges {
        out_degree[edge.source as usize] += 1;
        in_degree[edge.target as usize] += 1;
    }
    let first_out: Vec<EdgeId> = degrees_to_first_out(out_degree.iter().copied()).collect();
    let first_in: Vec<EdgeId> = degrees_to_first_out(in_degree.iter().copied()).collect();
    let mut heads = vec![0; edges.len()];
    let mut tails = vec![0; edges.len()];
    {
        let mut out_cursor = first_out.clone();
        let mut in_cursor = first_in.clone();
        for edge in edges {
            heads[out_cursor[edge.source as usize] as usize] = edge.target;
            out_cursor[edge.source as usize] += 1;
            tails[in_cursor[edge.target as usize] as usize] = edge.source;
            in_cursor[edge.target as usize] += 1;
        }
    }
    let outgoing = |node: NodeId| &heads[first_out[node as usize] as usize..first_out[node as usize + 1] as usize];
    let incoming = |node: NodeId| &tails[first_in[node as usize] as usize..first_in[node as usize + 1] as usize];

    // level of every node, counted from the bottom
    let mut depth = vec![0u32; n];
    let mut remaining = in_degree.clone();
    let mut frontier: Vec<NodeId> = (0..n as NodeId).filter(|&node| in_degree[node as usize] == 0).collect();
    let mut level = 0;
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for &node in &frontier {
            depth[node as usize] = level;
            for &target in outgoing(node) {
                remaining[target as usize] -= 1;
                if remaining[target as usize] == 0 {
                    next.push(target);
                }
            }
        }
        frontier = next;
        level += 1;
    }

    // depth first topological order from the top, keeps nodes of a search space together
    let mut provisional = vec![0u32; n];
    let mut remaining = out_degree.clone();
    let mut stack: Vec<NodeId> = (0..n as NodeId).filter(|&node| out_degree[node as usize] == 0).collect();
    let mut next_id = 0;
    while let Some(node) = stack.pop() {
        provisional[node as usize] = next_id;
        next_id += 1;
        for &source in incoming(node) {
            remaining[source as usize] -= 1;
            if remaining[source as usize] == 0 {
                stack.push(source);
            }
        }
    }

    // coarse buckets of similar depth, ordered by the provisional ids within
    let mut nodes: Vec<NodeId> = (0..n as NodeId).collect();
    nodes.sort_by_key(|&node| depth[node as usize]);
    let mut start = 0;
    while n - start > 16 {
        let mut end = start + (n - start) * 15 / 16;
        while end + 1 < n && depth[nodes[end] as usize] == depth[nodes[end + 1] as usize] {
            end += 1;
        }
        nodes[start..end].sort_by_key(|&node| provisional[node as usize]);
        start = end;
    }
    let mut priority = vec![0u32; n];
    for (position, &node) in nodes.iter().enumerate() {
        priority[node as usize] = position as u32;
    }

    // final order, topological again but preferring nodes with larger priority
    let mut ranks = vec![0; n];
    let mut remaining = out_degree;
    let mut queue: BinaryHeap<(u32, NodeId)> = (0..n as NodeId)
        .filter(|&node| remaining[node as usize] == 0)
        .map(|node| (priority[node as usize], node))
        .collect();
    let mut next_id = 0;
    while let Some((_, node)) = queue.pop() {
        ranks[node as usize] = next_id;
        next_id += 1;
        for &source in incoming(node) {
            remaining[source as usize] -= 1;
            if remaining[source as usize] == 0 {
                queue.push((priority[source as usize], source));
            }
        }
    }
    debug_assert_eq!(next_id as usize, n, "upward graph contains a cycle");

    NodeOrder::from_ranks(ranks)
}
