//! Plain Dijkstra on a directed adjacency array graph.
//!
//! Serves as the ground truth the hierarchy based queries are checked against.

use super::*;
use crate::datastr::index_heap::IndexedBinaryHeap;

pub struct Server<G> {
    graph: G,
    // keyed by tentative distance, payload is the predecessor
    queue: IndexedBinaryHeap<Weight, NodeId>,
    num_queue_pops: usize,
}

impl<G: LinkIterable<Link>> Server<G> {
    pub fn new(graph: G) -> Self {
        let n = graph.num_nodes();
        Server {
            graph,
            queue: IndexedBinaryHeap::new(n),
            num_queue_pops: 0,
        }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    /// Shortest distance from `query.from` to `query.to`, `None` if `to` is unreachable.
    pub fn distance(&mut self, query: Query) -> Option<Weight> {
        self.queue.clear();
        self.num_queue_pops = 0;
        self.queue.insert(query.from, 0, query.from);

        while let Some(node) = self.queue.delete_min() {
            self.num_queue_pops += 1;
            let distance = self.queue.key(node);
            if node == query.to {
                return Some(distance);
            }

            for Link { node: head, weight } in self.graph.link_iter(node) {
                let next_distance = distance + weight;
                if !self.queue.was_inserted(head) {
                    self.queue.insert(head, next_distance, node);
                } else if self.queue.contains(head) && next_distance < self.queue.key(head) {
                    self.queue.decrease_key(head, next_distance);
                    *self.queue.data_mut(head) = node;
                }
            }
        }

        None
    }

    /// The node sequence of the last successful `distance` query.
    pub fn path(&self, query: Query) -> Vec<NodeId> {
        let mut path = vec![query.to];

        while let Some(&node) = path.last() {
            if node == query.from {
                break;
            }
            path.push(*self.queue.data(node));
        }

        path.reverse();
        path
    }

    pub fn num_queue_pops(&self) -> usize {
        self.num_queue_pops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> OwnedGraph {
        // 0 -> 1 -> 2 is cheaper than 0 -> 2, 3 is isolated
        OwnedGraph::from_adjancecy_lists(vec![
            vec![Link { node: 1, weight: 1 }, Link { node: 2, weight: 5 }],
            vec![Link { node: 2, weight: 2 }],
            vec![],
            vec![],
        ])
    }

    #[test]
    fn finds_shortest_distance_and_path() {
        let mut server = Server::new(graph());
        let query = Query { from: 0, to: 2 };
        assert_eq!(server.distance(query), Some(3));
        assert_eq!(server.path(query), vec![0, 1, 2]);
    }

    #[test]
    fn unreachable_target() {
        let mut server = Server::new(graph());
        assert_eq!(server.distance(Query { from: 0, to: 3 }), None);
        assert_eq!(server.distance(Query { from: 2, to: 0 }), None);
    }

    #[test]
    fn source_equals_target() {
        let mut server = Server::new(graph());
        let query = Query { from: 1, to: 1 };
        assert_eq!(server.distance(query), Some(0));
        assert_eq!(server.path(query), vec![1]);
    }
}
