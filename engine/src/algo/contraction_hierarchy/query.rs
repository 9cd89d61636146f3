//! Contraction hierarchy query server on the compressed representation.
//!
//! Not much more than a bidirectional Dijkstra with a different stopping criterion and stall-on-demand.
//! Edges are stored at their lower ranked endpoint and point upwards, so both searches only relax edges
//! stored at the node they settle and only ever move up the hierarchy.
//! Routes start and end at positions on edges as produced by snapping a location to the road network.

use super::*;
use crate::datastr::graph::compressed_graph::{block::EdgeKind, CompressedEdge, CompressedGraph, EdgeDescription};
use crate::datastr::index_heap::{IndexedBinaryHeap, MapStorage};
use crate::report::{Reporter, Timer};
use crate::Error;
use rustc_hash::FxHashSet;
use std::fs::File;
use std::io::{Read, Seek};
use std::time::Duration;

/// A position on the original edge between `a` and `b`, `fraction` of the way from `a` to `b`.
/// Nodes are descriptors of the compressed graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeSnap {
    pub a: NodeId,
    pub b: NodeId,
    pub fraction: f64,
}

impl EdgeSnap {
    pub fn new(a: NodeId, b: NodeId, fraction: f64) -> Self {
        EdgeSnap {
            a,
            b,
            fraction: fraction.clamp(0.0, 1.0),
        }
    }

    fn reversed(&self) -> Self {
        EdgeSnap {
            a: self.b,
            b: self.a,
            fraction: 1.0 - self.fraction,
        }
    }
}

/// Result of a query. `distance` is `INFINITY` if there is no route.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub distance: Weight,
    pub node_path: Vec<Coordinate>,
    /// One entry per consecutive pair of `node_path`.
    pub edge_path: Vec<EdgeDescription>,
}

impl Route {
    fn not_found() -> Self {
        Route {
            distance: INFINITY,
            node_path: Vec::new(),
            edge_path: Vec::new(),
        }
    }

    pub fn found(&self) -> bool {
        self.distance < INFINITY
    }

    pub fn seconds(&self) -> f64 {
        self.distance as f64 / WEIGHT_UNITS_PER_SECOND
    }
}

/// Counters of the last query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub settled_nodes: usize,
    pub stalled_nodes: usize,
    pub relaxed_edges: usize,
    pub running_time: Duration,
}

impl QueryStats {
    pub fn report(&self, reporter: &mut Reporter) {
        report!(reporter, "settled_nodes", self.settled_nodes);
        report!(reporter, "stalled_nodes", self.stalled_nodes);
        report!(reporter, "relaxed_edges", self.relaxed_edges);
        report!(reporter, "running_time_ms", self.running_time.as_secs_f64() * 1000.0);
    }
}

/// The original edges between the endpoints of a snapped edge, per direction.
#[derive(Debug, Clone, Copy)]
struct SnappedEdge {
    // a -> b
    forward: Option<CompressedEdge>,
    // b -> a
    backward: Option<CompressedEdge>,
}

fn description(edge: &CompressedEdge, travel_time: Weight) -> EdgeDescription {
    match edge.kind {
        EdgeKind::Original(attributes) => EdgeDescription {
            name_id: attributes.name_id,
            type_id: attributes.type_id,
            branching_possible: attributes.branching_possible,
            length: 1,
            travel_time,
        },
        _ => EdgeDescription {
            length: 1,
            travel_time,
            ..Default::default()
        },
    }
}

fn part_of(weight: Weight, fraction: f64) -> Weight {
    (weight as f64 * fraction).round() as Weight
}

/// One direction of the search.
#[derive(Debug)]
struct Search {
    // payload is the parent, roots are their own parent
    queue: IndexedBinaryHeap<Weight, NodeId, MapStorage>,
    stalled: FxHashSet<NodeId>,
}

impl Search {
    fn new() -> Self {
        Search {
            queue: IndexedBinaryHeap::new(0),
            stalled: FxHashSet::default(),
        }
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.stalled.clear();
    }

    fn seed(&mut self, node: NodeId, distance: Weight) {
        if !self.queue.was_inserted(node) {
            self.queue.insert(node, distance, node);
        } else if distance < self.queue.key(node) {
            self.queue.decrease_key(node, distance);
        }
    }

    /// Minimum key, if the frontier is not exhausted with respect to `best`.
    fn progress(&self, best: Weight) -> Option<Weight> {
        self.queue.min_key().filter(|&key| key < best)
    }

    fn reached(&self, node: NodeId) -> Option<Weight> {
        if self.queue.was_inserted(node) && !self.stalled.contains(&node) {
            Some(self.queue.key(node))
        } else {
            None
        }
    }

    fn root(&self, mut node: NodeId) -> NodeId {
        while *self.queue.data(node) != node {
            node = *self.queue.data(node);
        }
        node
    }
}

/// Answers queries on a compressed graph. Holds per query state only, several servers can share one graph.
pub struct Server<'g, R = File> {
    graph: &'g CompressedGraph<R>,
    forward: Search,
    backward: Search,
    edges: Vec<CompressedEdge>,
    stall_queue: Vec<(NodeId, Weight)>,
    stats: QueryStats,
}

impl<'g, R: Read + Seek> Server<'g, R> {
    pub fn new(graph: &'g CompressedGraph<R>) -> Self {
        Server {
            graph,
            forward: Search::new(),
            backward: Search::new(),
            edges: Vec::new(),
            stall_queue: Vec::new(),
            stats: QueryStats::default(),
        }
    }

    pub fn graph(&self) -> &'g CompressedGraph<R> {
        self.graph
    }

    /// Counters of the last query.
    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    /// Shortest route between two positions on edges, with unpacked geometry and edge descriptions.
    pub fn route(&mut self, source: EdgeSnap, target: EdgeSnap) -> Result<Route> {
        let timer = Timer::new();
        let result = self.snapped_route(source, target);
        self.stats.running_time = timer.get_passed();
        result
    }

    /// Shortest route between two nodes.
    pub fn node_route(&mut self, from: NodeId, to: NodeId) -> Result<Route> {
        let timer = Timer::new();
        let result = self.run_node_route(from, to);
        self.stats.running_time = timer.get_passed();
        result
    }

    /// Shortest distance between two nodes without unpacking the route.
    pub fn distance(&mut self, from: NodeId, to: NodeId) -> Result<Option<Weight>> {
        let timer = Timer::new();
        self.graph.split(from)?;
        self.graph.split(to)?;
        self.start();
        self.forward.seed(from, 0);
        self.backward.seed(to, 0);
        let result = self.search(INFINITY);
        self.stats.running_time = timer.get_passed();
        Ok(result?.map(|(distance, _)| distance))
    }

    fn start(&mut self) {
        self.forward.clear();
        self.backward.clear();
        self.stats = QueryStats::default();
    }

    fn run_node_route(&mut self, from: NodeId, to: NodeId) -> Result<Route> {
        let start = self.graph.coordinate(from)?;
        self.graph.coordinate(to)?;
        self.start();
        self.forward.seed(from, 0);
        self.backward.seed(to, 0);

        let (distance, meeting) = match self.search(INFINITY)? {
            Some(found) => found,
            None => return Ok(Route::not_found()),
        };
        let mut route = Route {
            distance,
            node_path: vec![start],
            edge_path: Vec::new(),
        };
        self.unpack(meeting, &mut route)?;
        Ok(route)
    }

    fn snapped_edge(&self, snap: &EdgeSnap) -> Result<SnappedEdge> {
        let original = |source: NodeId, target: NodeId, forward: bool| -> Result<Option<CompressedEdge>> {
            let mut edges = Vec::new();
            self.graph.edges(source, &mut edges)?;
            Ok(edges
                .into_iter()
                .filter(|edge| edge.target == target && edge.has_direction(forward) && !edge.is_shortcut())
                .min_by_key(|edge| edge.weight))
        };
        let cheaper = |x: Option<CompressedEdge>, y: Option<CompressedEdge>| match (x, y) {
            (Some(x), Some(y)) => Some(if y.weight < x.weight { y } else { x }),
            (x, y) => x.or(y),
        };
        let snapped = SnappedEdge {
            forward: cheaper(original(snap.a, snap.b, true)?, original(snap.b, snap.a, false)?),
            backward: cheaper(original(snap.a, snap.b, false)?, original(snap.b, snap.a, true)?),
        };
        if snapped.forward.is_none() && snapped.backward.is_none() {
            return Err(Error::InvalidInput(format!("no road segment between {} and {}", snap.a, snap.b)));
        }
        Ok(snapped)
    }

    fn snapped_route(&mut self, source: EdgeSnap, mut target: EdgeSnap) -> Result<Route> {
        let source_edge = self.snapped_edge(&source)?;
        let same_edge = (target.a, target.b) == (source.b, source.a);
        if same_edge {
            target = target.reversed();
        }
        let target_edge = if same_edge || (target.a, target.b) == (source.a, source.b) {
            source_edge
        } else {
            self.snapped_edge(&target)?
        };

        self.start();
        if let Some(edge) = source_edge.forward {
            self.forward.seed(source.b, part_of(edge.weight, 1.0 - source.fraction));
        }
        if let Some(edge) = source_edge.backward {
            self.forward.seed(source.a, part_of(edge.weight, source.fraction));
        }
        if let Some(edge) = target_edge.forward {
            self.backward.seed(target.a, part_of(edge.weight, target.fraction));
        }
        if let Some(edge) = target_edge.backward {
            self.backward.seed(target.b, part_of(edge.weight, 1.0 - target.fraction));
        }

        // staying on the edge
        let direct = if (target.a, target.b) == (source.a, source.b) {
            let (edge, fraction) = if source.fraction <= target.fraction {
                (source_edge.forward, target.fraction - source.fraction)
            } else {
                (source_edge.backward, source.fraction - target.fraction)
            };
            edge.map(|edge| (part_of(edge.weight, fraction), edge))
        } else {
            None
        };

        let start = self.graph.coordinate(source.a)?.interpolate(self.graph.coordinate(source.b)?, source.fraction);
        let end = self.graph.coordinate(target.a)?.interpolate(self.graph.coordinate(target.b)?, target.fraction);
        let bound = direct.map_or(INFINITY, |(distance, _)| distance);

        let (distance, meeting) = match self.search(bound)? {
            Some(found) => found,
            None => {
                return Ok(match direct {
                    Some((distance, edge)) => Route {
                        distance,
                        node_path: vec![start, end],
                        edge_path: vec![description(&edge, distance)],
                    },
                    None => Route::not_found(),
                })
            }
        };

        let mut route = Route {
            distance,
            node_path: vec![start],
            edge_path: Vec::new(),
        };
        let first = self.forward.root(meeting);
        let first_edge = if first == source.b {
            source_edge.forward.map(|edge| (edge, part_of(edge.weight, 1.0 - source.fraction)))
        } else {
            source_edge.backward.map(|edge| (edge, part_of(edge.weight, source.fraction)))
        };
        if let Some((edge, travel_time)) = first_edge {
            route.edge_path.push(description(&edge, travel_time));
            route.node_path.push(self.graph.coordinate(first)?);
        }

        self.unpack(meeting, &mut route)?;

        let last = self.backward.root(meeting);
        let last_edge = if last == target.a {
            target_edge.forward.map(|edge| (edge, part_of(edge.weight, target.fraction)))
        } else {
            target_edge.backward.map(|edge| (edge, part_of(edge.weight, 1.0 - target.fraction)))
        };
        if let Some((edge, travel_time)) = last_edge {
            route.edge_path.push(description(&edge, travel_time));
            route.node_path.push(end);
        }
        Ok(route)
    }

    /// Bidirectional search from the seeded queues. Only meetings below `bound` count.
    fn search(&mut self, bound: Weight) -> Result<Option<(Weight, NodeId)>> {
        let mut best = bound;
        let mut meeting = None;

        loop {
            let forward_step = match (self.forward.progress(best), self.backward.progress(best)) {
                (None, None) => break,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some(forward_key), Some(backward_key)) => forward_key <= backward_key,
            };
            let (search, other) = if forward_step {
                (&mut self.forward, &self.backward)
            } else {
                (&mut self.backward, &self.forward)
            };

            let node = match search.queue.delete_min() {
                Some(node) => node,
                None => break,
            };
            if search.stalled.contains(&node) {
                continue;
            }
            self.stats.settled_nodes += 1;
            let distance = search.queue.key(node);
            if let Some(other_distance) = other.reached(node) {
                if distance + other_distance < best {
                    best = distance + other_distance;
                    meeting = Some(node);
                }
            }

            self.graph.edges(node, &mut self.edges)?;

            // a higher ranked node reaches this one cheaper
            let stalled = self.edges.iter().any(|edge| {
                edge.has_direction(!forward_step)
                    && search.queue.was_inserted(edge.target)
                    && search.queue.key(edge.target) + edge.weight < distance
            });
            if stalled {
                Self::stall(self.graph, search, node, distance, &mut self.stall_queue, &mut self.stats, forward_step)?;
                continue;
            }

            for edge in &self.edges {
                if !edge.has_direction(forward_step) || search.queue.was_removed(edge.target) {
                    continue;
                }
                self.stats.relaxed_edges += 1;
                let next_distance = distance + edge.weight;
                if !search.queue.was_inserted(edge.target) {
                    search.queue.insert(edge.target, next_distance, node);
                } else if next_distance <= search.queue.key(edge.target) {
                    search.queue.decrease_key(edge.target, next_distance);
                    *search.queue.data_mut(edge.target) = node;
                    search.stalled.remove(&edge.target);
                }
            }
        }

        Ok(meeting.map(|node| (best, node)))
    }

    /// Mark `node` stalled and propagate to reached nodes whose keys are beaten by a path through it.
    fn stall(
        graph: &CompressedGraph<R>,
        search: &mut Search,
        node: NodeId,
        distance: Weight,
        queue: &mut Vec<(NodeId, Weight)>,
        stats: &mut QueryStats,
        forward: bool,
    ) -> Result<()> {
        let mut edges = Vec::new();
        queue.clear();
        queue.push((node, distance));
        search.stalled.insert(node);
        stats.stalled_nodes += 1;
        while let Some((node, distance)) = queue.pop() {
            graph.edges(node, &mut edges)?;
            for edge in &edges {
                if !edge.has_direction(forward) || !search.queue.was_inserted(edge.target) {
                    continue;
                }
                let stall_distance = distance + edge.weight;
                if stall_distance < search.queue.key(edge.target) {
                    search.queue.decrease_key(edge.target, stall_distance);
                    if search.stalled.insert(edge.target) {
                        stats.stalled_nodes += 1;
                    }
                    queue.push((edge.target, stall_distance));
                }
            }
        }
        Ok(())
    }

    /// Append the unpacked route from the forward root over `meeting` to the backward root.
    fn unpack(&mut self, meeting: NodeId, route: &mut Route) -> Result<()> {
        let mut upward = vec![meeting];
        let mut node = meeting;
        while *self.forward.queue.data(node) != node {
            node = *self.forward.queue.data(node);
            upward.push(node);
        }

        // edges of the forward search are stored at the parent
        for pair in upward.windows(2).rev() {
            let (child, parent) = (pair[0], pair[1]);
            let edge = self.hierarchy_edge(parent, child, true)?;
            self.graph.unpack_edge(parent, &edge, true, &mut route.node_path, &mut route.edge_path)?;
        }

        let mut node = meeting;
        while *self.backward.queue.data(node) != node {
            let parent = *self.backward.queue.data(node);
            let edge = self.hierarchy_edge(parent, node, false)?;
            self.graph.unpack_edge(parent, &edge, false, &mut route.node_path, &mut route.edge_path)?;
            node = parent;
        }
        Ok(())
    }

    fn hierarchy_edge(&self, source: NodeId, target: NodeId, forward: bool) -> Result<CompressedEdge> {
        self.graph
            .find_edge(source, target, forward)?
            .ok_or_else(|| Error::IncompatibleFormat(format!("search edge {} -> {} is missing", source, target)))
    }
}
