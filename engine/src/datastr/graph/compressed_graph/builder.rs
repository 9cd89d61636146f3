//! Serialization of a cleaned hierarchy into the compressed format.
//!
//! Nodes are assigned to blocks greedily in hierarchy id order.
//! While a block fills up, a running summary tracks everything its size depends on,
//! so checking whether the next node still fits is cheap.
//! Shortcuts whose middle node has not joined the block yet are counted as pre-unpacked with a 32 bit path pointer,
//! which can only overestimate the final size.

use super::block::*;
use super::*;
use crate::algo::contraction_hierarchy::{cleanup::HierarchyGraph, Hierarchy, HierarchyEdge, InputEdge};
use crate::config::CompressionConfig;
use crate::report::*;
use rustc_hash::FxHashMap;
use std::io::{BufWriter, Write};
use std::ops::Range;

const PATH_BITS_BOUND: u8 = 32;

/// Everything the size of a block depends on.
#[derive(Debug, Clone, Copy)]
struct BlockSummary {
    node_count: u32,
    min_x: u32,
    max_x: u32,
    min_y: u32,
    max_y: u32,
    adjacent_count: u32,
    max_adjacent: u32,
    // direction, internal and shortcut flags plus internal target ids
    fixed_bits: usize,
    external_edges: usize,
    max_external_local: u32,
    weights: [u32; 33],
    originals: usize,
    max_name: u32,
    max_type: u32,
    internal_shortcuts: usize,
    unpacked_shortcuts: usize,
    max_original_edges: u32,
}

impl Default for BlockSummary {
    fn default() -> Self {
        BlockSummary {
            node_count: 0,
            min_x: u32::MAX,
            max_x: 0,
            min_y: u32::MAX,
            max_y: 0,
            adjacent_count: 0,
            max_adjacent: 0,
            fixed_bits: 0,
            external_edges: 0,
            max_external_local: 0,
            weights: [0; 33],
            originals: 0,
            max_name: 0,
            max_type: 0,
            internal_shortcuts: 0,
            unpacked_shortcuts: 0,
            max_original_edges: 0,
        }
    }
}

impl BlockSummary {
    fn add_coordinate(&mut self, coordinate: Coordinate) {
        self.min_x = self.min_x.min(coordinate.x);
        self.max_x = self.max_x.max(coordinate.x);
        self.min_y = self.min_y.min(coordinate.y);
        self.max_y = self.max_y.max(coordinate.y);
    }

    fn add_attributes(&mut self, attributes: EdgeAttributes) {
        self.max_name = self.max_name.max(attributes.name_id);
        self.max_type = self.max_type.max(attributes.type_id as u32);
    }

    /// Settings of a block with this content. The width of edge stream offsets is left at 0.
    fn settings(&self, path_bits: u8) -> BlockSettings {
        let (short_weight_bits, long_weight_bits, _) = choose_weight_bits(&self.weights);
        BlockSettings {
            x_bits: bits_needed(self.max_x.saturating_sub(self.min_x)),
            y_bits: bits_needed(self.max_y.saturating_sub(self.min_y)),
            first_edge_bits: 0,
            block_bits: bits_needed(self.max_adjacent),
            external_bits: bits_needed(self.max_external_local),
            short_weight_bits,
            long_weight_bits,
            name_bits: bits_needed(self.max_name),
            type_bits: bits_needed(self.max_type),
            count_bits: bits_needed(self.max_original_edges),
            path_bits,
            min_x: self.min_x.min(self.max_x),
            min_y: self.min_y.min(self.max_y),
            node_count: self.node_count,
            adjacent_count: self.adjacent_count,
        }
    }

    /// Upper bound of the encoded size.
    fn size_bits(&self) -> usize {
        let settings = self.settings(PATH_BITS_BOUND);
        let (_, _, weight_bits) = choose_weight_bits(&self.weights);
        let stream = self.fixed_bits
            + self.external_edges * (settings.adjacent_index_bits() as usize + settings.external_bits as usize)
            + weight_bits
            + self.internal_shortcuts * (1 + settings.middle_bits() as usize)
            + self.unpacked_shortcuts * (2 + settings.path_bits as usize + settings.count_bits as usize)
            + self.originals * (settings.type_bits as usize + settings.name_bits as usize + 1);
        BlockSettings {
            first_edge_bits: bits_needed(stream as u32),
            ..settings
        }
        .total_bits(stream)
    }
}

/// The block currently being filled.
struct OpenBlock {
    first: NodeId,
    summary: BlockSummary,
    adjacent: Vec<u32>,
    // middle node -> number of shortcuts in the block bypassing it
    pending_middles: FxHashMap<NodeId, u32>,
}

/// Summary of a block with one more node, not yet committed.
struct Addition {
    summary: BlockSummary,
    new_adjacent: Vec<u32>,
    middles: Vec<NodeId>,
}

impl OpenBlock {
    fn new(first: NodeId) -> Self {
        OpenBlock {
            first,
            summary: BlockSummary::default(),
            adjacent: Vec::new(),
            pending_middles: FxHashMap::default(),
        }
    }

    fn try_add(&self, node: NodeId, ctx: &BuildContext, block_of: &[u32], local_of: &[u32]) -> Addition {
        let mut summary = self.summary;
        let local = summary.node_count;
        summary.node_count += 1;
        summary.add_coordinate(ctx.coordinates[node as usize]);

        if let Some(&resolved) = self.pending_middles.get(&node) {
            summary.internal_shortcuts += resolved as usize;
            summary.unpacked_shortcuts -= resolved as usize;
        }

        let mut new_adjacent = Vec::new();
        let mut middles = Vec::new();
        for index in ctx.graph.edge_range(node) {
            let edge = &ctx.graph.edges()[index];
            let direction_bits = if edge.data.forward && edge.data.backward { 1 } else { 2 };
            summary.fixed_bits += direction_bits + 2;
            if edge.target >= self.first {
                summary.fixed_bits += BlockSettings::internal_target_bits(local) as usize;
            } else {
                summary.external_edges += 1;
                summary.max_external_local = summary.max_external_local.max(local_of[edge.target as usize]);
                let block = block_of[edge.target as usize];
                if self.adjacent.binary_search(&block).is_err() && !new_adjacent.contains(&block) {
                    new_adjacent.push(block);
                    summary.adjacent_count += 1;
                    summary.max_adjacent = summary.max_adjacent.max(block);
                }
            }
            summary.weights[bits_needed(edge.data.weight) as usize] += 1;
            if edge.data.shortcut {
                // the middle has a larger id and can only join the block later
                summary.unpacked_shortcuts += 1;
                summary.max_original_edges = summary.max_original_edges.max(ctx.expansion_bounds[index]);
                middles.push(edge.data.middle);
            } else {
                summary.originals += 1;
                summary.add_attributes(ctx.attributes(edge));
            }
        }

        Addition {
            summary,
            new_adjacent,
            middles,
        }
    }

    fn commit(&mut self, node: NodeId, addition: Addition) {
        self.summary = addition.summary;
        self.pending_middles.remove(&node);
        if !addition.new_adjacent.is_empty() {
            self.adjacent.extend(addition.new_adjacent);
            self.adjacent.sort_unstable();
        }
        for middle in addition.middles {
            *self.pending_middles.entry(middle).or_insert(0) += 1;
        }
    }
}

struct BuildContext<'a> {
    graph: &'a HierarchyGraph,
    // indexed by hierarchy ids
    coordinates: Vec<Coordinate>,
    input_edges: &'a [InputEdge],
    // largest number of input edges a hierarchy edge unpacks into over its directions
    expansion_bounds: Vec<u32>,
}

impl<'a> BuildContext<'a> {
    fn attributes(&self, edge: &HierarchyEdge) -> EdgeAttributes {
        let input = &self.input_edges[edge.data.id as usize];
        EdgeAttributes {
            name_id: input.name_id,
            type_id: input.type_id,
            branching_possible: input.branching_possible,
        }
    }
}

/// Position of a pre-unpacked shortcut in the path buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PathPointer {
    path: u32,
    reversed: bool,
    original_edges: u32,
}

/// A compressed hierarchy in memory, ready to be written.
#[derive(Debug, Clone)]
pub struct CompressedHierarchy {
    header: FileHeader,
    blocks: Vec<u8>,
    path_items: Vec<PathItem>,
    node_ids: Vec<NodeId>,
}

impl CompressedHierarchy {
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Descriptor of every input node.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    pub fn write_into(&self, writer: &mut dyn Write) -> Result<()> {
        let block_size = self.header.block_size as usize;
        let mut header_block = vec![0u8; block_size];
        header_block[..HEADER_LEN].copy_from_slice(&self.header.to_bytes());
        writer.write_all(&header_block)?;
        writer.write_all(&self.blocks)?;

        let mut path_bytes = vec![0u8; self.header.num_path_blocks as usize * block_size];
        for (item, bytes) in self.path_items.iter().zip(path_bytes.chunks_exact_mut(PATH_ITEM_BYTES)) {
            bytes.copy_from_slice(&item.to_bytes());
        }
        writer.write_all(&path_bytes)?;
        writer.flush()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.header.file_len() as usize);
        self.write_into(&mut bytes)?;
        Ok(bytes)
    }
}

/// Build and write the compressed hierarchy to `path`. Returns the descriptor of every input node.
pub fn write_to_file(
    hierarchy: &Hierarchy,
    coordinates: &[Coordinate],
    input_edges: &[InputEdge],
    path: &Path,
    config: &CompressionConfig,
    reporter: &mut Reporter,
) -> Result<Vec<NodeId>> {
    let compressed = build(hierarchy, coordinates, input_edges, config, reporter)?;
    let mut writer = BufWriter::new(File::create(path)?);
    compressed.write_into(&mut writer)?;
    tracing::info!(path = %path.display(), bytes = compressed.header.file_len(), "wrote compressed graph");
    Ok(compressed.node_ids)
}

/// Serialize a hierarchy. `coordinates` and `input_edges` are indexed by input ids.
pub fn build(
    hierarchy: &Hierarchy,
    coordinates: &[Coordinate],
    input_edges: &[InputEdge],
    config: &CompressionConfig,
    reporter: &mut Reporter,
) -> Result<CompressedHierarchy> {
    config.validate()?;
    let n = hierarchy.num_nodes();
    if coordinates.len() != n {
        return Err(Error::InvalidInput(format!("{} coordinates for {} nodes", coordinates.len(), n)));
    }
    if let Some((node, coordinate)) = coordinates.iter().enumerate().find(|(_, coordinate)| coordinate.x > MAX_PATH_X) {
        return Err(Error::InvalidInput(format!("x coordinate {} of node {} exceeds 31 bits", coordinate.x, node)));
    }
    if let Some((id, edge)) = input_edges.iter().enumerate().find(|(_, edge)| edge.name_id > MAX_PATH_NAME_ID) {
        return Err(Error::InvalidInput(format!("name id {} of edge {} exceeds 30 bits", edge.name_id, id)));
    }

    let order = hierarchy.order();
    let graph = hierarchy.graph();
    let ctx = BuildContext {
        graph,
        coordinates: order.order().iter().map(|&input_node| coordinates[input_node as usize]).collect(),
        input_edges,
        expansion_bounds: expansion_bounds(graph),
    };

    let block_size = config.block_size;
    let (block_of, local_of, block_firsts) = assign_blocks(&ctx, block_size, |node| order.node(node))?;
    let num_blocks = block_firsts.len() as u32;
    let block_range = |block: usize| block_firsts[block]..block_firsts.get(block + 1).copied().unwrap_or(n as NodeId);
    let internal_bits = (0..block_firsts.len())
        .map(|block| bits_needed(block_range(block).len() as u32 - 1))
        .max()
        .unwrap_or(0);
    if num_blocks > 0 && bits_needed(num_blocks - 1) as u32 + internal_bits as u32 > 32 {
        return Err(Error::InvalidInput(format!(
            "{} blocks with {} bit local ids exceed 32 bit node descriptors",
            num_blocks, internal_bits
        )));
    }

    let unpacked = |index: usize| {
        let edge = &graph.edges()[index];
        edge.data.shortcut && block_of[edge.data.middle as usize] != block_of[edge.source as usize]
    };
    let (path_items, pointers) = build_path_buffer(&ctx, &unpacked)?;

    let mut blocks = vec![0u8; num_blocks as usize * block_size as usize];
    let mut width_histogram: FxHashMap<String, usize> = FxHashMap::default();
    for (block, buffer) in blocks.chunks_exact_mut(block_size as usize).enumerate() {
        let settings = encode_block(&ctx, block_range(block), &block_of, &local_of, &pointers, buffer)?;
        let key = format!("x{}_y{}_w{}_{}", settings.x_bits, settings.y_bits, settings.short_weight_bits, settings.long_weight_bits);
        *width_histogram.entry(key).or_insert(0) += 1;
    }

    let items_per_block = block_size / PATH_ITEM_BYTES as u32;
    let num_path_items = path_items.len() as u32;
    let header = FileHeader {
        block_size,
        num_nodes: n as u32,
        num_edges: graph.num_edges() as u32,
        num_blocks,
        num_path_blocks: (num_path_items + items_per_block - 1) / items_per_block,
        num_path_items,
        internal_bits,
    };

    let descriptors: Vec<NodeId> = (0..n).map(|node| node_descriptor(block_of[node], local_of[node], internal_bits)).collect();
    let node_ids = order.then(&descriptors);

    tracing::info!(blocks = num_blocks, path_items = num_path_items, internal_bits, "compressed hierarchy");
    report!(reporter, "num_blocks", num_blocks);
    report!(reporter, "num_path_items", num_path_items);
    report!(reporter, "num_path_blocks", header.num_path_blocks);
    report!(reporter, "internal_bits", internal_bits);
    report!(reporter, "block_widths", width_histogram);

    Ok(CompressedHierarchy {
        header,
        blocks,
        path_items,
        node_ids,
    })
}

/// Number of input edges every hierarchy edge unpacks into, the maximum over its directions.
/// Children are looked up the same way unpacking does.
fn expansion_bounds(graph: &HierarchyGraph) -> Vec<u32> {
    // per edge, backward then forward
    let mut lengths = vec![[1u32; 2]; graph.num_edges()];
    // children are stored at the middle node, which has a larger id
    for index in (0..graph.num_edges()).rev() {
        let edge = &graph.edges()[index];
        if !edge.data.shortcut {
            continue;
        }
        let middle = edge.data.middle;
        let child = |target: NodeId, forward: bool| {
            graph
                .find_edge_index(middle, target, forward)
                .map_or(0, |child| lengths[child][forward as usize])
        };
        let forward = child(edge.source, false) + child(edge.target, true);
        let backward = child(edge.source, true) + child(edge.target, false);
        lengths[index] = [backward, forward];
    }
    graph
        .edges()
        .iter()
        .zip(lengths)
        .map(|(edge, [backward, forward])| match (edge.data.forward, edge.data.backward) {
            (true, true) => forward.max(backward),
            (true, false) => forward,
            _ => backward,
        })
        .collect()
}

type BlockAssignment = (Vec<u32>, Vec<u32>, Vec<NodeId>);

/// Fill blocks first fit in id order. Returns block and local id of every node and the first node of every block.
fn assign_blocks(ctx: &BuildContext, block_size: u32, input_id: impl Fn(NodeId) -> NodeId) -> Result<BlockAssignment> {
    let n = ctx.coordinates.len();
    let capacity = block_size as usize * 8;
    let mut block_of = vec![0u32; n];
    let mut local_of = vec![0u32; n];
    let mut block_firsts = Vec::new();
    let mut open = OpenBlock::new(0);

    for node in 0..n as NodeId {
        let mut addition = open.try_add(node, ctx, &block_of, &local_of);
        if addition.summary.size_bits() > capacity && open.summary.node_count > 0 {
            block_firsts.push(open.first);
            open = OpenBlock::new(node);
            addition = open.try_add(node, ctx, &block_of, &local_of);
        }
        if addition.summary.size_bits() > capacity {
            return Err(Error::BlockOverflow {
                node: input_id(node),
                block_size,
            });
        }
        block_of[node as usize] = block_firsts.len() as u32;
        local_of[node as usize] = open.summary.node_count;
        open.commit(node, addition);
    }
    if open.summary.node_count > 0 {
        block_firsts.push(open.first);
    }

    Ok((block_of, local_of, block_firsts))
}

enum Step {
    Expand { source: NodeId, target: NodeId, forward: bool },
    Finish { index: usize, start: usize, reversed: bool },
}

/// Expand every pre-unpacked shortcut into the path buffer.
/// Unpacked shortcuts met while expanding a larger one point into its item range instead of getting their own copy.
fn build_path_buffer(ctx: &BuildContext, unpacked: &dyn Fn(usize) -> bool) -> Result<(Vec<PathItem>, FxHashMap<usize, PathPointer>)> {
    let graph = ctx.graph;
    let mut items = Vec::new();
    let mut pointers: FxHashMap<usize, PathPointer> = FxHashMap::default();
    let mut stack = Vec::new();

    for root in 0..graph.num_edges() {
        if !unpacked(root) || pointers.contains_key(&root) {
            continue;
        }
        let edge = &graph.edges()[root];
        let forward = edge.data.forward;
        let start = if forward { edge.source } else { edge.target };
        items.push(PathItem::Node(ctx.coordinates[start as usize]));
        stack.push(Step::Expand {
            source: edge.source,
            target: edge.target,
            forward,
        });

        while let Some(step) = stack.pop() {
            let (source, target, forward) = match step {
                Step::Expand { source, target, forward } => (source, target, forward),
                Step::Finish { index, start, reversed } => {
                    let end = items.len() - 1;
                    let path = if reversed { end } else { start };
                    pointers.entry(index).or_insert(PathPointer {
                        path: path as u32,
                        reversed,
                        original_edges: ((end - start) / 2) as u32,
                    });
                    continue;
                }
            };
            let index = graph
                .find_edge_index(source, target, forward)
                .ok_or_else(|| Error::InvalidInput(format!("shortcut part {} -> {} is missing", source, target)))?;
            let edge = &graph.edges()[index];

            if !edge.data.shortcut {
                if edge.data.weight > MAX_PATH_TRAVEL_TIME {
                    return Err(Error::InvalidInput(format!(
                        "edge weight {} inside a cross block shortcut exceeds 24 bits",
                        edge.data.weight
                    )));
                }
                let attributes = ctx.attributes(edge);
                items.push(PathItem::Edge(EdgeDescription {
                    name_id: attributes.name_id,
                    type_id: attributes.type_id,
                    branching_possible: attributes.branching_possible,
                    length: 1,
                    travel_time: edge.data.weight,
                }));
                let reached = if forward { target } else { source };
                items.push(PathItem::Node(ctx.coordinates[reached as usize]));
                continue;
            }

            // the last item is the node this edge is entered from
            if unpacked(index) && !pointers.contains_key(&index) {
                stack.push(Step::Finish {
                    index,
                    start: items.len() - 1,
                    reversed: !forward,
                });
            }
            let middle = edge.data.middle;
            if forward {
                stack.push(Step::Expand {
                    source: middle,
                    target,
                    forward: true,
                });
                stack.push(Step::Expand {
                    source: middle,
                    target: source,
                    forward: false,
                });
            } else {
                stack.push(Step::Expand {
                    source: middle,
                    target: source,
                    forward: true,
                });
                stack.push(Step::Expand {
                    source: middle,
                    target,
                    forward: false,
                });
            }
        }
    }

    if items.len() > u32::MAX as usize {
        return Err(Error::InvalidInput(format!("{} path items exceed 32 bit pointers", items.len())));
    }
    Ok((items, pointers))
}

fn encode_block(
    ctx: &BuildContext,
    nodes: Range<NodeId>,
    block_of: &[u32],
    local_of: &[u32],
    pointers: &FxHashMap<usize, PathPointer>,
    buffer: &mut [u8],
) -> Result<BlockSettings> {
    let graph = ctx.graph;
    let first = nodes.start;
    let block = block_of[first as usize];
    let mut summary = BlockSummary::default();
    let mut adjacent = Vec::new();
    for node in nodes.clone() {
        summary.add_coordinate(ctx.coordinates[node as usize]);
        adjacent.extend(graph.edges_at(node).iter().filter(|edge| edge.target < first).map(|edge| block_of[edge.target as usize]));
    }
    adjacent.sort_unstable();
    adjacent.dedup();
    summary.node_count = nodes.len() as u32;
    summary.adjacent_count = adjacent.len() as u32;
    summary.max_adjacent = adjacent.last().copied().unwrap_or(0);

    let mut path_bits = 0;
    let mut edges: Vec<Vec<RawEdge>> = Vec::with_capacity(nodes.len());
    for node in nodes.clone() {
        let mut node_edges = Vec::new();
        for index in graph.edge_range(node) {
            let edge = &graph.edges()[index];
            let target = if edge.target >= first {
                RawTarget::Internal(edge.target - first)
            } else {
                summary.max_external_local = summary.max_external_local.max(local_of[edge.target as usize]);
                let target_block = block_of[edge.target as usize];
                let position = adjacent
                    .binary_search(&target_block)
                    .map_err(|_| Error::InvalidInput(format!("block {} is missing from the adjacency of block {}", target_block, block)))?;
                RawTarget::External {
                    adjacent: position as u32,
                    local: local_of[edge.target as usize],
                }
            };
            summary.weights[bits_needed(edge.data.weight) as usize] += 1;

            let kind = if !edge.data.shortcut {
                let attributes = ctx.attributes(edge);
                summary.add_attributes(attributes);
                EdgeKind::Original(attributes)
            } else if block_of[edge.data.middle as usize] == block {
                EdgeKind::Shortcut {
                    middle: edge.data.middle - first,
                }
            } else {
                let pointer = pointers
                    .get(&index)
                    .ok_or_else(|| Error::InvalidInput(format!("shortcut {} -> {} was not unpacked", edge.source, edge.target)))?;
                path_bits = path_bits.max(bits_needed(pointer.path));
                summary.max_original_edges = summary.max_original_edges.max(pointer.original_edges);
                EdgeKind::UnpackedShortcut {
                    path: pointer.path,
                    reversed: pointer.reversed,
                    original_edges: pointer.original_edges,
                }
            };

            node_edges.push(RawEdge {
                target,
                weight: edge.data.weight,
                forward: edge.data.forward,
                backward: edge.data.backward,
                kind,
            });
        }
        edges.push(node_edges);
    }

    let mut settings = summary.settings(path_bits);
    let stream: usize = edges
        .iter()
        .enumerate()
        .map(|(local, node_edges)| node_edges.iter().map(|edge| edge.bits(&settings, local as u32)).sum::<usize>())
        .sum();
    settings.first_edge_bits = bits_needed(stream as u32);

    let coordinates: Vec<Coordinate> = nodes.map(|node| ctx.coordinates[node as usize]).collect();
    block::encode(buffer, &settings, &coordinates, &adjacent, &edges)?;
    tracing::trace!(block, nodes = settings.node_count, bits = settings.total_bits(stream), "encoded block");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::contraction_hierarchy::{cleanup::cleanup, contractor::Contraction, preprocess, EdgeData};
    use crate::config::{CacheConfig, ContractionConfig};
    use std::io::Cursor;

    fn grid(columns: u32, rows: u32) -> (Vec<Coordinate>, Vec<InputEdge>) {
        let id = |column: u32, row: u32| row * columns + column;
        let mut coordinates = Vec::new();
        let mut edges = Vec::new();
        for row in 0..rows {
            for column in 0..columns {
                coordinates.push(Coordinate::new(5000 + 37 * column, 9000 + 23 * row));
                if column + 1 < columns {
                    let seconds = 1.0 + (row % 3) as f64;
                    edges.push(InputEdge::new(id(column, row), id(column + 1, row), seconds, true).with_description(row, 2, true));
                }
                if row + 1 < rows {
                    let seconds = 1.5 + (column % 2) as f64;
                    edges.push(InputEdge::new(id(column, row), id(column, row + 1), seconds, row % 2 == 0).with_description(100 + column, 3, false));
                }
            }
        }
        (coordinates, edges)
    }

    #[test]
    fn compressed_edges_match_the_hierarchy() {
        let (coordinates, input_edges) = grid(4, 3);
        let hierarchy = preprocess(coordinates.len(), &input_edges, &ContractionConfig::default(), &mut Reporter::disabled()).unwrap();
        let mut reporter = Reporter::new();
        let compressed = build(&hierarchy, &coordinates, &input_edges, &CompressionConfig { block_size: 128 }, &mut reporter).unwrap();
        assert_eq!(reporter.into_json()["num_blocks"], compressed.header().num_blocks);

        let graph = CompressedGraph::from_reader(Cursor::new(compressed.to_bytes().unwrap()), &CacheConfig::default()).unwrap();
        assert_eq!(graph.num_nodes(), coordinates.len());
        assert_eq!(graph.num_edges(), hierarchy.num_edges());
        for (node, &descriptor) in compressed.node_ids().iter().enumerate() {
            assert_eq!(graph.coordinate(descriptor).unwrap(), coordinates[node]);
        }

        let order = hierarchy.order();
        let key = |source: Coordinate, target: Coordinate, weight: Weight, forward: bool, backward: bool, shortcut: bool| {
            (source.x, source.y, target.x, target.y, weight, forward, backward, shortcut)
        };
        let mut expected: Vec<_> = hierarchy
            .graph()
            .edges()
            .iter()
            .map(|edge| {
                key(
                    coordinates[order.node(edge.source) as usize],
                    coordinates[order.node(edge.target) as usize],
                    edge.data.weight,
                    edge.data.forward,
                    edge.data.backward,
                    edge.data.shortcut,
                )
            })
            .collect();
        let mut found = Vec::new();
        let mut edges = Vec::new();
        for node in graph.node_ids().unwrap() {
            let coordinate = graph.node(node, &mut edges).unwrap();
            for edge in &edges {
                let target = graph.coordinate(edge.target).unwrap();
                found.push(key(coordinate, target, edge.weight, edge.forward, edge.backward, edge.is_shortcut()));

                if let EdgeKind::UnpackedShortcut { path, reversed, original_edges } = edge.kind {
                    let mut path_coordinates = Vec::new();
                    let mut descriptions = Vec::new();
                    graph
                        .unpacked_path(path, reversed, original_edges, edge.forward, &mut path_coordinates, &mut descriptions)
                        .unwrap();
                    assert_eq!(descriptions.len() as u32, original_edges);
                    assert_eq!(path_coordinates.len() as u32, original_edges);
                    assert_eq!(path_coordinates.last(), Some(if edge.forward { &target } else { &coordinate }));
                }
            }
        }
        expected.sort_unstable();
        found.sort_unstable();
        assert_eq!(found, expected);
    }

    #[test]
    fn node_without_room_overflows() {
        // node 0 stores six heavy edges with wide names
        let input_edges: Vec<InputEdge> = (1..7)
            .map(|target| InputEdge::new(0, target, 100_000.0, true).with_description(MAX_PATH_NAME_ID - target, 255, true))
            .collect();
        let contraction = Contraction {
            num_nodes: 7,
            edges: input_edges
                .iter()
                .enumerate()
                .map(|(id, edge)| HierarchyEdge {
                    source: edge.source,
                    target: edge.target,
                    data: EdgeData::original(id as EdgeId, edge.weight(), true, true),
                })
                .collect(),
            witnesses: Vec::new(),
        };
        let hierarchy = cleanup(contraction, &mut Reporter::disabled());
        let coordinates = vec![Coordinate::new(0, 0); 7];

        let result = build(&hierarchy, &coordinates, &input_edges, &CompressionConfig { block_size: 64 }, &mut Reporter::disabled());
        assert!(matches!(result, Err(Error::BlockOverflow { node: 0, block_size: 64 })));

        let compressed = build(&hierarchy, &coordinates, &input_edges, &CompressionConfig { block_size: 256 }, &mut Reporter::disabled()).unwrap();
        assert_eq!(compressed.header().num_edges, 6);
    }

    #[test]
    fn rejects_inconsistent_input() {
        let (coordinates, input_edges) = grid(2, 2);
        let hierarchy = preprocess(coordinates.len(), &input_edges, &ContractionConfig::default(), &mut Reporter::disabled()).unwrap();
        let config = CompressionConfig::default();
        assert!(matches!(
            build(&hierarchy, &coordinates[1..], &input_edges, &config, &mut Reporter::disabled()),
            Err(Error::InvalidInput(_))
        ));

        let mut far = coordinates.clone();
        far[0].x = MAX_PATH_X + 1;
        assert!(matches!(
            build(&hierarchy, &far, &input_edges, &config, &mut Reporter::disabled()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn written_file_has_the_announced_length() {
        let (coordinates, input_edges) = grid(3, 3);
        let hierarchy = preprocess(coordinates.len(), &input_edges, &ContractionConfig::default(), &mut Reporter::disabled()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.chbg");
        let config = CompressionConfig { block_size: 128 };
        let node_ids = write_to_file(&hierarchy, &coordinates, &input_edges, &path, &config, &mut Reporter::disabled()).unwrap();

        let graph = CompressedGraph::open(&path, &CacheConfig { cache_blocks: 2, preload: false }).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), graph.header().file_len());
        let mut sorted = node_ids.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, graph.node_ids().unwrap());
    }
}
