//! Block structured, bit packed serialization of a contraction hierarchy.
//!
//! File layout, every section aligned to `block_size`:
//!
//! | section      | content                                                  |
//! |--------------|----------------------------------------------------------|
//! | header block | `FileHeader`, little endian u32 fields, zero padded      |
//! | graph blocks | one block per node range, see [`block`]                  |
//! | path blocks  | 8 byte `PathItem`s of pre-unpacked cross block shortcuts |
//!
//! Nodes are addressed by descriptors `(block << internal_bits) | local`.
//! Edges are stored at their lower ranked endpoint and point upwards, so all targets of a node have smaller ids
//! and a node only needs `bits_needed(local - 1)` bits to address an internal target.
//! A shortcut whose middle node lives in the same block references it directly.
//! All other shortcuts point into the path blocks where their complete geometry was written at build time,
//! so unpacking a path never has to follow shortcuts into other blocks.

use super::*;
use crate::config::CacheConfig;
use crate::datastr::block_cache::{BlockCache, CacheStats};
use crate::error::*;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

pub mod block;
pub mod builder;

use self::block::{BlockView, EdgeKind, RawEdge, RawTarget};

pub const MAGIC: [u8; 4] = *b"CHBG";
pub const VERSION: u32 = 1;
/// Bytes of the file header at the start of the first block.
pub const HEADER_LEN: usize = 36;
pub const PATH_ITEM_BYTES: usize = 8;
/// Travel times stored in path items are 24 bits wide.
pub const MAX_PATH_TRAVEL_TIME: Weight = (1 << 24) - 1;
/// Names stored in path items are 30 bits wide.
pub const MAX_PATH_NAME_ID: u32 = (1 << 30) - 1;
/// x coordinates stored in path items are 31 bits wide.
pub const MAX_PATH_X: u32 = (1 << 31) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub block_size: u32,
    pub num_nodes: u32,
    pub num_edges: u32,
    pub num_blocks: u32,
    pub num_path_blocks: u32,
    pub num_path_items: u32,
    pub internal_bits: u8,
}

impl FileHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let fields = [
            u32::from_le_bytes(MAGIC),
            VERSION,
            self.block_size,
            self.num_nodes,
            self.num_edges,
            self.num_blocks,
            self.num_path_blocks,
            self.num_path_items,
            self.internal_bits as u32,
        ];
        let mut bytes = [0; HEADER_LEN];
        for (chunk, field) in bytes.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        let field = |index: usize| u32::from_le_bytes([bytes[4 * index], bytes[4 * index + 1], bytes[4 * index + 2], bytes[4 * index + 3]]);
        if bytes[0..4] != MAGIC {
            return Err(Error::IncompatibleFormat(format!("bad magic {:?}", &bytes[0..4])));
        }
        if field(1) != VERSION {
            return Err(Error::IncompatibleFormat(format!("unsupported version {}", field(1))));
        }

        let header = FileHeader {
            block_size: field(2),
            num_nodes: field(3),
            num_edges: field(4),
            num_blocks: field(5),
            num_path_blocks: field(6),
            num_path_items: field(7),
            internal_bits: field(8).min(u8::MAX as u32) as u8,
        };
        if !header.block_size.is_power_of_two()
            || header.block_size < crate::config::MIN_BLOCK_SIZE
            || header.block_size > crate::config::MAX_BLOCK_SIZE
        {
            return Err(Error::IncompatibleFormat(format!("invalid block size {}", header.block_size)));
        }
        if header.internal_bits > 32 {
            return Err(Error::IncompatibleFormat(format!("invalid internal id width {}", header.internal_bits)));
        }
        if header.num_path_items as u64 > header.num_path_blocks as u64 * header.items_per_path_block() as u64 {
            return Err(Error::IncompatibleFormat(format!(
                "{} path items do not fit into {} path blocks",
                header.num_path_items, header.num_path_blocks
            )));
        }
        Ok(header)
    }

    pub fn items_per_path_block(&self) -> u32 {
        self.block_size / PATH_ITEM_BYTES as u32
    }

    /// Number of blocks after the header block.
    pub fn num_data_blocks(&self) -> u64 {
        self.num_blocks as u64 + self.num_path_blocks as u64
    }

    /// Expected file length in bytes.
    pub fn file_len(&self) -> u64 {
        (1 + self.num_data_blocks()) * self.block_size as u64
    }
}

/// Compose a node descriptor.
#[inline]
pub fn node_descriptor(block: u32, local: u32, internal_bits: u8) -> NodeId {
    (((block as u64) << internal_bits) | local as u64) as NodeId
}

/// Split a node descriptor into block and local id.
#[inline]
pub fn split_descriptor(node: NodeId, internal_bits: u8) -> (u32, u32) {
    let node = node as u64;
    ((node >> internal_bits) as u32, (node & ((1u64 << internal_bits) - 1)) as u32)
}

/// Description of one original edge of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeDescription {
    pub name_id: u32,
    pub type_id: u8,
    pub branching_possible: bool,
    /// Number of road segments described, always 1 for unmerged descriptions.
    pub length: u32,
    /// In weight units.
    pub travel_time: Weight,
}

impl EdgeDescription {
    pub fn seconds(&self) -> f64 {
        self.travel_time as f64 / WEIGHT_UNITS_PER_SECOND
    }
}

/// An entry of the pre-unpacked path buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathItem {
    Node(Coordinate),
    Edge(EdgeDescription),
}

impl PathItem {
    pub fn to_bytes(&self) -> [u8; PATH_ITEM_BYTES] {
        let (a, b) = match *self {
            PathItem::Node(Coordinate { x, y }) => (x << 1 | 1, y),
            PathItem::Edge(description) => (
                description.name_id << 2 | (description.branching_possible as u32) << 1,
                (description.type_id as u32) << 24 | description.travel_time,
            ),
        };
        let mut bytes = [0; PATH_ITEM_BYTES];
        bytes[..4].copy_from_slice(&a.to_le_bytes());
        bytes[4..].copy_from_slice(&b.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let a = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let b = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if a & 1 == 1 {
            PathItem::Node(Coordinate::new(a >> 1, b))
        } else {
            PathItem::Edge(EdgeDescription {
                name_id: a >> 2,
                type_id: (b >> 24) as u8,
                branching_possible: (a >> 1) & 1 == 1,
                length: 1,
                travel_time: b & MAX_PATH_TRAVEL_TIME,
            })
        }
    }
}

/// An edge as seen by the query side, with node descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedEdge {
    pub target: NodeId,
    pub weight: Weight,
    pub forward: bool,
    pub backward: bool,
    pub kind: EdgeKind,
}

impl CompressedEdge {
    pub fn has_direction(&self, forward: bool) -> bool {
        if forward {
            self.forward
        } else {
            self.backward
        }
    }

    pub fn is_shortcut(&self) -> bool {
        !matches!(self.kind, EdgeKind::Original(_))
    }
}

/// A compressed hierarchy file opened for querying.
/// Blocks are accessed through a cache behind a mutex, so a graph can be shared between query servers.
pub struct CompressedGraph<R = File> {
    header: FileHeader,
    cache: Mutex<BlockCache<R>>,
}

impl CompressedGraph<File> {
    pub fn open<P: AsRef<Path>>(path: P, config: &CacheConfig) -> Result<Self> {
        Self::from_reader(File::open(path)?, config)
    }
}

impl<R: Read + Seek> CompressedGraph<R> {
    /// Validate the header and set up the block cache. Only the header is read unless `config.preload` is set.
    pub fn from_reader(mut reader: R, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let mut bytes = [0; HEADER_LEN];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut bytes).map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::IncompatibleFormat("file too short for header".to_string()),
            _ => Error::Io(err),
        })?;
        let header = FileHeader::parse(&bytes)?;

        let len = reader.seek(SeekFrom::End(0))?;
        if len < header.file_len() {
            return Err(Error::IncompatibleFormat(format!("file has {} bytes, header announces {}", len, header.file_len())));
        }
        let num_data_blocks = u32::try_from(header.num_data_blocks()).map_err(|_| Error::IncompatibleFormat("too many blocks".to_string()))?;

        let block_size = header.block_size as usize;
        let cache = if config.preload {
            BlockCache::preload(reader, block_size as u64, block_size, num_data_blocks)?
        } else {
            BlockCache::lazy(reader, block_size as u64, block_size, num_data_blocks, config.cache_blocks)?
        };
        tracing::info!(
            nodes = header.num_nodes,
            edges = header.num_edges,
            blocks = header.num_blocks,
            path_blocks = header.num_path_blocks,
            preload = config.preload,
            "opened compressed graph"
        );

        Ok(CompressedGraph {
            header,
            cache: Mutex::new(cache),
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn num_nodes(&self) -> usize {
        self.header.num_nodes as usize
    }

    pub fn num_edges(&self) -> usize {
        self.header.num_edges as usize
    }

    pub fn num_blocks(&self) -> u32 {
        self.header.num_blocks
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    pub fn is_resident(&self, block: u32) -> bool {
        self.cache.lock().is_resident(block)
    }

    pub fn descriptor(&self, block: u32, local: u32) -> NodeId {
        node_descriptor(block, local, self.header.internal_bits)
    }

    pub fn split(&self, node: NodeId) -> Result<(u32, u32)> {
        let (block, local) = split_descriptor(node, self.header.internal_bits);
        if block >= self.header.num_blocks {
            return Err(Error::InvalidInput(format!("node {} references block {} of {}", node, block, self.header.num_blocks)));
        }
        Ok((block, local))
    }

    fn with_block<T>(&self, block: u32, f: impl FnOnce(BlockView) -> Result<T>) -> Result<T> {
        let mut cache = self.cache.lock();
        let data = cache.get_block(block)?;
        f(BlockView::new(data)?)
    }

    /// Descriptors of all nodes in block order.
    pub fn node_ids(&self) -> Result<Vec<NodeId>> {
        let mut ids = Vec::with_capacity(self.num_nodes());
        for block in 0..self.header.num_blocks {
            let node_count = self.with_block(block, |view| Ok(view.settings().node_count))?;
            ids.extend((0..node_count).map(|local| self.descriptor(block, local)));
        }
        Ok(ids)
    }

    pub fn coordinate(&self, node: NodeId) -> Result<Coordinate> {
        let (block, local) = self.split(node)?;
        self.with_block(block, |view| view.coordinate(local))
    }

    /// Replace the content of `out` with the edges stored at `node` and return its coordinate.
    pub fn node(&self, node: NodeId, out: &mut Vec<CompressedEdge>) -> Result<Coordinate> {
        let (block, local) = self.split(node)?;
        let internal_bits = self.header.internal_bits;
        self.with_block(block, |view| {
            let mut raw = Vec::new();
            view.edges(local, &mut raw)?;
            out.clear();
            for edge in raw {
                out.push(resolve(&view, block, internal_bits, edge)?);
            }
            view.coordinate(local)
        })
    }

    /// Replace the content of `out` with the edges stored at `node`.
    pub fn edges(&self, node: NodeId, out: &mut Vec<CompressedEdge>) -> Result<()> {
        self.node(node, out).map(|_| ())
    }

    /// The edge stored at `source` leading to `target` in the given direction.
    /// Among parallel candidates the cheapest wins, original edges win ties.
    pub fn find_edge(&self, source: NodeId, target: NodeId, forward: bool) -> Result<Option<CompressedEdge>> {
        let mut edges = Vec::new();
        self.edges(source, &mut edges)?;
        Ok(edges
            .into_iter()
            .filter(|edge| edge.target == target && edge.has_direction(forward))
            .min_by_key(|edge| (edge.weight, edge.is_shortcut())))
    }

    /// `count` consecutive items of the path buffer starting at `first`.
    pub fn path_items(&self, first: u32, count: u32) -> Result<Vec<PathItem>> {
        if first as u64 + count as u64 > self.header.num_path_items as u64 {
            return Err(Error::InvalidInput(format!(
                "path items {}..{} out of range, file has {}",
                first,
                first as u64 + count as u64,
                self.header.num_path_items
            )));
        }
        let per_block = self.header.items_per_path_block();
        let mut items = Vec::with_capacity(count as usize);
        let mut item = first;
        while item < first + count {
            let block = self.header.num_blocks + item / per_block;
            let in_block = item % per_block;
            let take = (per_block - in_block).min(first + count - item);
            let mut cache = self.cache.lock();
            let data = cache.get_block(block)?;
            for index in in_block..in_block + take {
                let offset = index as usize * PATH_ITEM_BYTES;
                items.push(PathItem::from_bytes(&data[offset..offset + PATH_ITEM_BYTES]));
            }
            item += take;
        }
        Ok(items)
    }

    /// Append the geometry of a pre-unpacked shortcut stored at `source`, traversed away from `source` if `forward`.
    /// The coordinate of the first node of the traversal is not emitted.
    pub fn unpacked_path(
        &self,
        path: u32,
        reversed: bool,
        original_edges: u32,
        forward: bool,
        coordinates: &mut Vec<Coordinate>,
        descriptions: &mut Vec<EdgeDescription>,
    ) -> Result<()> {
        let len = 2 * original_edges;
        let first = if reversed {
            path.checked_sub(len).ok_or_else(|| Error::InvalidInput(format!("path pointer {} underflows", path)))?
        } else {
            path
        };
        let items = self.path_items(first, len + 1)?;
        // stored from target to source when reversed
        let stored_forward = !reversed;
        let mut emit = |item: &PathItem| match *item {
            PathItem::Node(coordinate) => coordinates.push(coordinate),
            PathItem::Edge(description) => descriptions.push(description),
        };
        if stored_forward == forward {
            items.iter().skip(1).for_each(&mut emit);
        } else {
            items.iter().rev().skip(1).for_each(&mut emit);
        }
        Ok(())
    }

    /// Append geometry and descriptions of all original edges `edge` stands for.
    /// `edge` is stored at `source` and traversed away from `source` if `forward`, towards it otherwise.
    /// Like `unpacked_path` the coordinate of the first node is not emitted.
    pub fn unpack_edge(
        &self,
        source: NodeId,
        edge: &CompressedEdge,
        forward: bool,
        coordinates: &mut Vec<Coordinate>,
        descriptions: &mut Vec<EdgeDescription>,
    ) -> Result<()> {
        let mut stack = vec![(source, *edge, forward)];
        while let Some((source, edge, forward)) = stack.pop() {
            match edge.kind {
                EdgeKind::Original(attributes) => {
                    descriptions.push(EdgeDescription {
                        name_id: attributes.name_id,
                        type_id: attributes.type_id,
                        branching_possible: attributes.branching_possible,
                        length: 1,
                        travel_time: edge.weight,
                    });
                    coordinates.push(self.coordinate(if forward { edge.target } else { source })?);
                }
                EdgeKind::UnpackedShortcut {
                    path,
                    reversed,
                    original_edges,
                } => self.unpacked_path(path, reversed, original_edges, forward, coordinates, descriptions)?,
                EdgeKind::Shortcut { middle } => {
                    let part = |target: NodeId, forward: bool| {
                        self.find_edge(middle, target, forward)?
                            .map(|edge| (middle, edge, forward))
                            .ok_or_else(|| Error::IncompatibleFormat(format!("shortcut part {} -> {} is missing", middle, target)))
                    };
                    if forward {
                        stack.push(part(edge.target, true)?);
                        stack.push(part(source, false)?);
                    } else {
                        stack.push(part(source, true)?);
                        stack.push(part(edge.target, false)?);
                    }
                }
            }
        }
        Ok(())
    }
}

fn resolve(view: &BlockView, block: u32, internal_bits: u8, edge: RawEdge) -> Result<CompressedEdge> {
    let target = match edge.target {
        RawTarget::Internal(local) => node_descriptor(block, local, internal_bits),
        RawTarget::External { adjacent, local } => node_descriptor(view.adjacent_block(adjacent)?, local, internal_bits),
    };
    let kind = match edge.kind {
        EdgeKind::Shortcut { middle } => EdgeKind::Shortcut {
            middle: node_descriptor(block, middle, internal_bits),
        },
        kind => kind,
    };
    Ok(CompressedEdge {
        target,
        weight: edge.weight,
        forward: edge.forward,
        backward: edge.backward,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastr::block_cache::tests::CountingReader;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn header() -> FileHeader {
        FileHeader {
            block_size: 64,
            num_nodes: 3,
            num_edges: 2,
            num_blocks: 1,
            num_path_blocks: 1,
            num_path_items: 5,
            internal_bits: 2,
        }
    }

    #[test]
    fn header_round_trip() {
        let header = header();
        assert_eq!(FileHeader::parse(&header.to_bytes()).unwrap(), header);
        assert_eq!(&header.to_bytes()[0..4], b"CHBG");
        assert_eq!(header.file_len(), 3 * 64);
    }

    #[test]
    fn rejects_bad_headers() {
        let mut bytes = header().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(FileHeader::parse(&bytes), Err(Error::IncompatibleFormat(_))));

        let mut bytes = header().to_bytes();
        bytes[4] = 2;
        assert!(matches!(FileHeader::parse(&bytes), Err(Error::IncompatibleFormat(_))));

        let bytes = FileHeader { block_size: 100, ..header() }.to_bytes();
        assert!(matches!(FileHeader::parse(&bytes), Err(Error::IncompatibleFormat(_))));

        let bytes = FileHeader { num_path_items: 9, ..header() }.to_bytes();
        assert!(matches!(FileHeader::parse(&bytes), Err(Error::IncompatibleFormat(_))));
    }

    #[test]
    fn bad_magic_reads_nothing_but_the_header() {
        let mut file = vec![0u8; 64 * 8];
        file[..HEADER_LEN].copy_from_slice(&header().to_bytes());
        file[0..4].copy_from_slice(b"NOPE");
        let bytes_read = Arc::new(AtomicUsize::new(0));
        let reader = CountingReader {
            inner: Cursor::new(file),
            bytes_read: bytes_read.clone(),
        };

        let result = CompressedGraph::from_reader(reader, &CacheConfig { cache_blocks: 4, preload: true });
        assert!(matches!(result, Err(Error::IncompatibleFormat(_))));
        assert_eq!(bytes_read.load(Ordering::SeqCst), HEADER_LEN);
    }

    #[test]
    fn truncated_files_are_rejected() {
        let reader = Cursor::new(header().to_bytes()[..20].to_vec());
        assert!(matches!(CompressedGraph::from_reader(reader, &CacheConfig::default()), Err(Error::IncompatibleFormat(_))));

        let mut file = vec![0u8; 64 * 2];
        file[..HEADER_LEN].copy_from_slice(&header().to_bytes());
        assert!(matches!(CompressedGraph::from_reader(Cursor::new(file), &CacheConfig::default()), Err(Error::IncompatibleFormat(_))));
    }

    #[test]
    fn descriptors() {
        assert_eq!(node_descriptor(3, 5, 4), 3 << 4 | 5);
        assert_eq!(split_descriptor(3 << 4 | 5, 4), (3, 5));
        assert_eq!(split_descriptor(7, 0), (7, 0));
        assert_eq!(split_descriptor(node_descriptor(0, 12345, 32), 32), (0, 12345));
    }

    #[test]
    fn path_item_encoding() {
        let node = PathItem::Node(Coordinate::new(MAX_PATH_X, u32::MAX));
        assert_eq!(PathItem::from_bytes(&node.to_bytes()), node);
        let edge = PathItem::Edge(EdgeDescription {
            name_id: MAX_PATH_NAME_ID,
            type_id: 255,
            branching_possible: true,
            length: 1,
            travel_time: MAX_PATH_TRAVEL_TIME,
        });
        assert_eq!(PathItem::from_bytes(&edge.to_bytes()), edge);
        assert_eq!(
            EdgeDescription {
                travel_time: 25,
                ..Default::default()
            }
            .seconds(),
            2.5
        );
    }
}
