//! Data structures used by algorithms.

pub mod bit_stream;
pub mod block_cache;
pub mod dynamic_graph;
pub mod graph;
pub mod index_heap;
pub mod node_order;
