//! A contraction hierarchies routing engine.
//!
//! The preprocessing side contracts a road network into a hierarchy of shortcuts
//! ([`algo::contraction_hierarchy`]) and serializes it into a block structured, bit packed
//! file ([`datastr::graph::compressed_graph`]).
//! The query side loads such a file, either completely or lazily through an LRU block cache,
//! and answers shortest travel time queries with fully unpacked geometry.

#[macro_use]
pub mod report;

pub mod algo;
pub mod config;
pub mod datastr;
pub mod error;
pub mod io;

pub use crate::error::{Error, Result};
