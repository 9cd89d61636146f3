//! Graph primitives shared by preprocessing and querying.

pub mod compressed_graph;
pub mod first_out_graph;

pub use self::first_out_graph::{FirstOutGraph, OwnedGraph};

/// Node ids are 32bit unsigned ints
pub type NodeId = u32;
/// Edge ids are 32bit unsigned ints
pub type EdgeId = u32;
/// Travel times in tenths of a second as 32bit unsigned ints
pub type Weight = u32;
/// A sufficiently large infinity constant.
/// Set to `u32::MAX / 2` so that `INFINITY + x` for `x <= INFINITY` does not overflow.
pub const INFINITY: Weight = u32::MAX / 2;
/// Number of weight units per second of travel time.
pub const WEIGHT_UNITS_PER_SECOND: f64 = 10.0;

/// Fixed point node position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Coordinate {
    pub x: u32,
    pub y: u32,
}

impl Coordinate {
    pub fn new(x: u32, y: u32) -> Self {
        Coordinate { x, y }
    }

    /// The point at `fraction` of the way from `self` to `other`.
    pub fn interpolate(self, other: Coordinate, fraction: f64) -> Coordinate {
        let lerp = |a: u32, b: u32| (a as f64 + (b as f64 - a as f64) * fraction).round() as u32;
        Coordinate {
            x: lerp(self.x, other.x),
            y: lerp(self.y, other.y),
        }
    }
}

/// Simple struct for weighted links.
/// No behaviour, just a pure data struct.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Link {
    pub node: NodeId,
    pub weight: Weight,
}

/// Base trait for graphs.
/// Interesting behaviour will be added through subtraits.
pub trait Graph {
    fn num_nodes(&self) -> usize;
    fn num_arcs(&self) -> usize;
    fn degree(&self, node: NodeId) -> usize;
}

pub trait LinkIterable<Link>: Graph {
    /// Type of the outgoing neighbor iterator.
    type Iter<'a>: Iterator<Item = Link>
    where
        Self: 'a;

    /// Get a iterator over the outgoing links of the given node.
    fn link_iter(&self, node: NodeId) -> Self::Iter<'_>;
}

/// Turn a sequence of degrees into the `first_out` array of an adjacency array.
pub fn degrees_to_first_out<I: Iterator<Item = EdgeId>>(degrees: I) -> impl Iterator<Item = EdgeId> {
    std::iter::once(0).chain(degrees.scan(0, |state, degree| {
        *state += degree;
        Some(*state)
    }))
}

/// Minimum number of bits to represent `value`, 0 for 0.
#[inline]
pub fn bits_needed(value: u32) -> u8 {
    (32 - value.leading_zeros()) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_widths() {
        assert_eq!(bits_needed(0), 0);
        assert_eq!(bits_needed(1), 1);
        assert_eq!(bits_needed(2), 2);
        assert_eq!(bits_needed(255), 8);
        assert_eq!(bits_needed(256), 9);
        assert_eq!(bits_needed(u32::MAX), 32);
    }

    #[test]
    fn interpolation() {
        let a = Coordinate::new(10, 100);
        let b = Coordinate::new(20, 50);
        assert_eq!(a.interpolate(b, 0.0), a);
        assert_eq!(a.interpolate(b, 1.0), b);
        assert_eq!(a.interpolate(b, 0.5), Coordinate::new(15, 75));
    }
}
