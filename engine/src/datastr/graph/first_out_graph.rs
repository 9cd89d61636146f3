//! Static graph representation as an adjacency array.
//!
//! Nodes and edges are identified by ids from `0` to `n-1` and `m-1` respectively.
//! The graph is stored in three collections: `first_out` with `n+1` elements and `head` and `weight` with `m` elements each.
//! `head[first_out[x]..first_out[x+1]]` contains all neighbors of `x`.
//! Used as the unabridged input graph for reference searches.

use super::*;
use std::ops::Range;

/// Container struct for the three collections of a graph.
/// Anything that can be referenced as a slice works.
#[derive(Debug, Clone)]
pub struct FirstOutGraph<FirstOutContainer, HeadContainer, WeightContainer> {
    // index of first edge of each node +1 entry in the end
    first_out: FirstOutContainer,
    // the node ids to which each edge points
    head: HeadContainer,
    // the weight of each edge
    weight: WeightContainer,
}

impl<FirstOutContainer, HeadContainer, WeightContainer> FirstOutGraph<FirstOutContainer, HeadContainer, WeightContainer>
where
    FirstOutContainer: AsRef<[EdgeId]>,
    HeadContainer: AsRef<[NodeId]>,
    WeightContainer: AsRef<[Weight]>,
{
    pub fn first_out(&self) -> &[EdgeId] {
        self.first_out.as_ref()
    }

    pub fn head(&self) -> &[NodeId] {
        self.head.as_ref()
    }

    pub fn weight(&self) -> &[Weight] {
        self.weight.as_ref()
    }

    /// Create a new `FirstOutGraph` from the three containers.
    pub fn new(first_out: FirstOutContainer, head: HeadContainer, weight: WeightContainer) -> Self {
        assert!(first_out.as_ref().len() < NodeId::MAX as usize);
        assert!(head.as_ref().len() < EdgeId::MAX as usize);
        assert_eq!(first_out.as_ref().first(), Some(&0));
        assert_eq!(first_out.as_ref().last().map(|&m| m as usize), Some(head.as_ref().len()));
        assert_eq!(weight.as_ref().len(), head.as_ref().len());

        FirstOutGraph { first_out, head, weight }
    }

    pub fn neighbor_edge_indices(&self, node: NodeId) -> Range<usize> {
        let node = node as usize;
        self.first_out()[node] as usize..self.first_out()[node + 1] as usize
    }

    /// Id of the cheapest edge from `from` to `to`, if there is any.
    pub fn edge_index(&self, from: NodeId, to: NodeId) -> Option<EdgeId> {
        self.neighbor_edge_indices(from)
            .filter(|&edge| self.head()[edge] == to)
            .min_by_key(|&edge| self.weight()[edge])
            .map(|edge| edge as EdgeId)
    }
}

pub type OwnedGraph = FirstOutGraph<Vec<EdgeId>, Vec<NodeId>, Vec<Weight>>;

impl OwnedGraph {
    pub fn from_adjancecy_lists(adjancecy_lists: Vec<Vec<Link>>) -> OwnedGraph {
        // create first_out array by doing a prefix sum over the adjancecy list sizes
        let first_out = degrees_to_first_out(adjancecy_lists.iter().map(|neighbors| neighbors.len() as EdgeId)).collect();

        // append all adjancecy list and split the pairs into two seperate vectors
        let (head, weight) = adjancecy_lists
            .into_iter()
            .flat_map(|neighbors| neighbors.into_iter().map(|Link { node, weight }| (node, weight)))
            .unzip();

        OwnedGraph::new(first_out, head, weight)
    }
}

impl<FirstOutContainer, HeadContainer, WeightContainer> Graph for FirstOutGraph<FirstOutContainer, HeadContainer, WeightContainer>
where
    FirstOutContainer: AsRef<[EdgeId]>,
    HeadContainer: AsRef<[NodeId]>,
    WeightContainer: AsRef<[Weight]>,
{
    fn num_nodes(&self) -> usize {
        self.first_out().len() - 1
    }

    fn num_arcs(&self) -> usize {
        self.head().len()
    }

    fn degree(&self, node: NodeId) -> usize {
        self.neighbor_edge_indices(node).len()
    }
}

impl<FirstOutContainer, HeadContainer, WeightContainer> LinkIterable<Link> for FirstOutGraph<FirstOutContainer, HeadContainer, WeightContainer>
where
    FirstOutContainer: AsRef<[EdgeId]>,
    HeadContainer: AsRef<[NodeId]>,
    WeightContainer: AsRef<[Weight]>,
{
    #[allow(clippy::type_complexity)]
    type Iter<'a> = std::iter::Map<std::iter::Zip<std::slice::Iter<'a, NodeId>, std::slice::Iter<'a, Weight>>, fn((&NodeId, &Weight)) -> Link> where Self: 'a;

    #[inline]
    fn link_iter(&self, node: NodeId) -> Self::Iter<'_> {
        let range = self.neighbor_edge_indices(node);
        self.head()[range.clone()]
            .iter()
            .zip(self.weight()[range].iter())
            .map(|(&neighbor, &weight)| Link { node: neighbor, weight })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cheapest_parallel_edge() {
        let graph = OwnedGraph::new(vec![0, 3, 3], vec![1, 1, 1], vec![7, 3, 5]);
        assert_eq!(graph.edge_index(0, 1), Some(1));
        assert_eq!(graph.edge_index(1, 0), None);
        assert_eq!(graph.degree(0), 3);
    }
}
