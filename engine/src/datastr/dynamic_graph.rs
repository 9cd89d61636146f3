//! Adjacency array graph which supports appending and deleting edges.
//!
//! Every node owns a slot range in one big edge array with power of two capacity.
//! When a slot range is full, it gets relocated to the end of the edge array with twice the capacity.
//! The old range is abandoned, so inserting is amortized O(1) at the cost of some fragmentation.
//! Edge ids of a node are not stable across insertions and deletions for that node.

use super::graph::*;
use std::ops::Range;

#[derive(Debug, Clone, Copy)]
struct NodeSlots {
    first_edge: usize,
    edges: usize,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct DynamicEdge<T> {
    target: NodeId,
    data: T,
}

#[derive(Debug, Clone)]
pub struct DynamicGraph<T> {
    nodes: Vec<NodeSlots>,
    edges: Vec<DynamicEdge<T>>,
    num_edges: usize,
}

impl<T: Copy + Default> DynamicGraph<T> {
    /// Build a graph from `(source, target, data)` triples.
    /// Triples do not need to be sorted.
    pub fn new(num_nodes: usize, mut input: Vec<(NodeId, NodeId, T)>) -> Self {
        input.sort_by_key(|&(source, target, _)| (source, target));

        let mut degrees = vec![0usize; num_nodes];
        for &(source, _, _) in &input {
            degrees[source as usize] += 1;
        }

        let mut nodes = Vec::with_capacity(num_nodes);
        let mut first_edge = 0;
        for &degree in &degrees {
            let capacity = degree.next_power_of_two();
            nodes.push(NodeSlots {
                first_edge,
                edges: degree,
                capacity,
            });
            first_edge += capacity;
        }

        let mut edges = vec![DynamicEdge::default(); first_edge];
        let mut cursor = 0;
        for (node, slots) in nodes.iter().enumerate() {
            for (offset, &(_, target, data)) in input[cursor..cursor + degrees[node]].iter().enumerate() {
                edges[slots.first_edge + offset] = DynamicEdge { target, data };
            }
            cursor += degrees[node];
        }

        DynamicGraph {
            nodes,
            edges,
            num_edges: input.len(),
        }
    }

    /// Ids of the edges of `node`.
    #[inline]
    pub fn edge_range(&self, node: NodeId) -> Range<usize> {
        let slots = &self.nodes[node as usize];
        slots.first_edge..slots.first_edge + slots.edges
    }

    #[inline]
    pub fn target(&self, edge: usize) -> NodeId {
        self.edges[edge].target
    }

    #[inline]
    pub fn data(&self, edge: usize) -> &T {
        &self.edges[edge].data
    }

    #[inline]
    pub fn data_mut(&mut self, edge: usize) -> &mut T {
        &mut self.edges[edge].data
    }

    /// Iterate over `(target, data)` of all edges of `node`.
    pub fn edges(&self, node: NodeId) -> impl Iterator<Item = (NodeId, &T)> + '_ {
        self.edges[self.edge_range(node)].iter().map(|edge| (edge.target, &edge.data))
    }

    /// Append an edge to `from`s edges and return its id.
    pub fn insert_edge(&mut self, from: NodeId, to: NodeId, data: T) -> usize {
        let slots = self.nodes[from as usize];
        if slots.edges == slots.capacity {
            let capacity = (slots.capacity * 2).max(1);
            let first_edge = self.edges.len();
            self.edges.extend_from_within(slots.first_edge..slots.first_edge + slots.edges);
            self.edges.resize(first_edge + capacity, DynamicEdge::default());
            let node = &mut self.nodes[from as usize];
            node.first_edge = first_edge;
            node.capacity = capacity;
        }
        let node = &mut self.nodes[from as usize];
        let edge = node.first_edge + node.edges;
        node.edges += 1;
        self.edges[edge] = DynamicEdge { target: to, data };
        self.num_edges += 1;
        edge
    }

    /// Delete all edges from `from` to `to`. Returns the number of deleted edges.
    pub fn delete_edges_to(&mut self, from: NodeId, to: NodeId) -> usize {
        let node = &mut self.nodes[from as usize];
        let mut edge = node.first_edge;
        let mut end = node.first_edge + node.edges;
        while edge < end {
            if self.edges[edge].target == to {
                end -= 1;
                self.edges[edge] = self.edges[end];
            } else {
                edge += 1;
            }
        }
        let deleted = node.first_edge + node.edges - end;
        node.edges -= deleted;
        self.num_edges -= deleted;
        deleted
    }

    /// Id of some edge from `from` to `to`.
    pub fn find_edge(&self, from: NodeId, to: NodeId) -> Option<usize> {
        self.edge_range(from).find(|&edge| self.edges[edge].target == to)
    }
}

impl<T> Graph for DynamicGraph<T> {
    fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn num_arcs(&self) -> usize {
        self.num_edges
    }

    fn degree(&self, node: NodeId) -> usize {
        self.nodes[node as usize].edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(graph: &DynamicGraph<u32>, node: NodeId) -> Vec<NodeId> {
        let mut targets: Vec<_> = graph.edges(node).map(|(target, _)| target).collect();
        targets.sort_unstable();
        targets
    }

    #[test]
    fn insert_grows_capacity() {
        let mut graph = DynamicGraph::new(3, vec![(0, 1, 10), (0, 2, 20), (1, 2, 5)]);
        assert_eq!(graph.num_arcs(), 3);

        for i in 0..5 {
            graph.insert_edge(2, i % 2, i);
        }
        assert_eq!(graph.degree(2), 5);
        assert_eq!(targets(&graph, 2), vec![0, 0, 0, 1, 1]);
        assert_eq!(targets(&graph, 0), vec![1, 2]);
        assert_eq!(graph.num_arcs(), 8);

        let edge = graph.insert_edge(0, 0, 99);
        assert_eq!(graph.target(edge), 0);
        assert_eq!(*graph.data(edge), 99);
        assert_eq!(targets(&graph, 0), vec![0, 1, 2]);
    }

    #[test]
    fn delete_edges_to_removes_all_parallel_edges() {
        let mut graph = DynamicGraph::new(3, vec![(0, 1, 1), (0, 2, 2), (0, 1, 3), (0, 1, 4)]);
        assert_eq!(graph.delete_edges_to(0, 1), 3);
        assert_eq!(targets(&graph, 0), vec![2]);
        assert_eq!(graph.delete_edges_to(0, 1), 0);
        assert_eq!(graph.find_edge(0, 1), None);
        assert!(graph.find_edge(0, 2).is_some());
        assert_eq!(graph.num_arcs(), 1);
    }

    #[test]
    fn nodes_without_edges() {
        let mut graph = DynamicGraph::<u32>::new(2, Vec::new());
        assert_eq!(graph.degree(0), 0);
        graph.insert_edge(1, 0, 7);
        assert_eq!(targets(&graph, 1), vec![0]);
        *graph.data_mut(graph.edge_range(1).start) = 8;
        assert_eq!(graph.edges(1).next(), Some((0, &8)));
    }
}
