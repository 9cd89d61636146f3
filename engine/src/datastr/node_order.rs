//! Bijection between node ids of the input graph and their position in the hierarchy.

use crate::datastr::graph::*;

/// Final id of a node after reordering. 0 is the top of the hierarchy.
pub type Rank = NodeId;

/// A node order which allows retrieving both the rank of a node and the node for a given rank.
/// Makes it always clear in which direction the mapping goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOrder {
    // node ids ordered by their rank
    node_order: Vec<NodeId>,
    // rank of each node
    ranks: Vec<Rank>,
}

impl NodeOrder {
    /// Create a `NodeOrder` from a rank vector, that is a vector where `ranks[id]` contains the rank of node `id`
    pub fn from_ranks(ranks: Vec<Rank>) -> NodeOrder {
        let n = ranks.len();
        assert!(n < NodeId::MAX as usize);
        let mut node_order = vec![n as NodeId; n];

        for (node, &rank) in ranks.iter().enumerate() {
            node_order[rank as usize] = node as NodeId;
        }

        debug_assert_eq!(node_order.iter().position(|&node| node == n as NodeId), None, "ranks are not a permutation");

        NodeOrder { node_order, ranks }
    }

    /// Node ids ordered by rank
    pub fn order(&self) -> &[NodeId] {
        &self.node_order
    }

    /// Rank of each node
    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    pub fn rank(&self, node: NodeId) -> Rank {
        self.ranks[node as usize]
    }

    pub fn node(&self, rank: Rank) -> NodeId {
        self.node_order[rank as usize]
    }

    pub fn len(&self) -> usize {
        self.node_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chain the rank with a further mapping of ranks, `result[node] = then[rank(node)]`.
    pub fn then(&self, then: &[NodeId]) -> Vec<NodeId> {
        debug_assert_eq!(then.len(), self.len());
        self.ranks.iter().map(|&rank| then[rank as usize]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_directions() {
        let order = NodeOrder::from_ranks(vec![2, 0, 1]);
        assert_eq!(order.order(), &[1, 2, 0]);
        assert_eq!(order.rank(0), 2);
        assert_eq!(order.node(2), 0);
        assert_eq!(order.then(&[10, 11, 12]), vec![12, 10, 11]);
    }
}
