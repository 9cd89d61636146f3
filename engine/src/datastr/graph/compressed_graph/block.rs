//! Layout of a single graph block.
//!
//! All fields are packed LSB first with widths chosen per block:
//!
//! 1. `BlockSettings`, `BLOCK_HEADER_BITS` bits
//! 2. coordinates relative to `(min_x, min_y)`, `x_bits + y_bits` per node
//! 3. the adjacent block table, `block_bits` per entry
//! 4. `node_count + 1` edge stream offsets, `first_edge_bits` each
//! 5. the edge stream
//!
//! Per edge the stream holds, in this order: direction (a both bit, otherwise a forward bit),
//! the target (an internal bit, then either the local id or an adjacent table index and the local id),
//! the weight (a long bit if the block uses two widths), a shortcut bit and the payload.
//! Shortcuts carry an unpacked bit followed by either the local id of the middle node
//! or a reversed bit, a path buffer pointer and the number of original edges.
//! Original edges carry type, name and a branching bit.

use super::*;
use crate::datastr::bit_stream::{BitReader, BitWriter};

pub const BLOCK_HEADER_BITS: usize = 11 * 8 + 4 * 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSettings {
    pub x_bits: u8,
    pub y_bits: u8,
    pub first_edge_bits: u8,
    pub block_bits: u8,
    pub external_bits: u8,
    pub short_weight_bits: u8,
    pub long_weight_bits: u8,
    pub name_bits: u8,
    pub type_bits: u8,
    pub count_bits: u8,
    pub path_bits: u8,
    pub min_x: u32,
    pub min_y: u32,
    pub node_count: u32,
    pub adjacent_count: u32,
}

impl BlockSettings {
    fn widths(&self) -> [u8; 11] {
        [
            self.x_bits,
            self.y_bits,
            self.first_edge_bits,
            self.block_bits,
            self.external_bits,
            self.short_weight_bits,
            self.long_weight_bits,
            self.name_bits,
            self.type_bits,
            self.count_bits,
            self.path_bits,
        ]
    }

    pub fn write(&self, writer: &mut BitWriter) -> Result<()> {
        for width in self.widths() {
            writer.write(width as u32, 8)?;
        }
        for value in [self.min_x, self.min_y, self.node_count, self.adjacent_count] {
            writer.write(value, 32)?;
        }
        Ok(())
    }

    pub fn read(reader: &mut BitReader) -> Result<Self> {
        let mut widths = [0u8; 11];
        for width in &mut widths {
            *width = reader.read(8)? as u8;
            if *width > 32 {
                return Err(Error::IncompatibleFormat(format!("block field width {} exceeds 32 bits", width)));
            }
        }
        let [x_bits, y_bits, first_edge_bits, block_bits, external_bits, short_weight_bits, long_weight_bits, name_bits, type_bits, count_bits, path_bits] =
            widths;
        Ok(BlockSettings {
            x_bits,
            y_bits,
            first_edge_bits,
            block_bits,
            external_bits,
            short_weight_bits,
            long_weight_bits,
            name_bits,
            type_bits,
            count_bits,
            path_bits,
            min_x: reader.read(32)?,
            min_y: reader.read(32)?,
            node_count: reader.read(32)?,
            adjacent_count: reader.read(32)?,
        })
    }

    /// Width of an internal target id of an edge stored at `local_source`.
    pub fn internal_target_bits(local_source: u32) -> u8 {
        bits_needed(local_source.saturating_sub(1))
    }

    pub fn adjacent_index_bits(&self) -> u8 {
        bits_needed(self.adjacent_count.saturating_sub(1))
    }

    pub fn middle_bits(&self) -> u8 {
        bits_needed(self.node_count.saturating_sub(1))
    }

    pub fn coordinates_offset(&self) -> usize {
        BLOCK_HEADER_BITS
    }

    pub fn adjacent_offset(&self) -> usize {
        self.coordinates_offset() + self.node_count as usize * (self.x_bits as usize + self.y_bits as usize)
    }

    pub fn first_edge_offset(&self) -> usize {
        self.adjacent_offset() + self.adjacent_count as usize * self.block_bits as usize
    }

    pub fn edges_offset(&self) -> usize {
        self.first_edge_offset() + (self.node_count as usize + 1) * self.first_edge_bits as usize
    }

    /// Bits of the complete block with an edge stream of `stream_bits` bits.
    pub fn total_bits(&self, stream_bits: usize) -> usize {
        self.edges_offset() + stream_bits
    }

    fn two_weight_widths(&self) -> bool {
        self.short_weight_bits < self.long_weight_bits
    }
}

/// Name, type and branching flag of an original edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeAttributes {
    pub name_id: u32,
    pub type_id: u8,
    pub branching_possible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Original(EdgeAttributes),
    /// The middle node is in the same block as the edge.
    /// Inside a block this is a local id, `CompressedGraph` hands out descriptors.
    Shortcut { middle: NodeId },
    /// The geometry was pre-unpacked into the path buffer.
    UnpackedShortcut { path: u32, reversed: bool, original_edges: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTarget {
    Internal(u32),
    External { adjacent: u32, local: u32 },
}

/// An edge as stored in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEdge {
    pub target: RawTarget,
    pub weight: Weight,
    pub forward: bool,
    pub backward: bool,
    pub kind: EdgeKind,
}

impl RawEdge {
    /// Encoded size of this edge when stored at `local_source`.
    pub fn bits(&self, settings: &BlockSettings, local_source: u32) -> usize {
        let direction = if self.forward && self.backward { 1 } else { 2 };
        let target = 1 + match self.target {
            RawTarget::Internal(_) => BlockSettings::internal_target_bits(local_source) as usize,
            RawTarget::External { .. } => settings.adjacent_index_bits() as usize + settings.external_bits as usize,
        };
        let weight = if settings.two_weight_widths() {
            1 + if bits_needed(self.weight) <= settings.short_weight_bits {
                settings.short_weight_bits as usize
            } else {
                settings.long_weight_bits as usize
            }
        } else {
            settings.long_weight_bits as usize
        };
        let payload = 1 + match self.kind {
            EdgeKind::Original(_) => settings.type_bits as usize + settings.name_bits as usize + 1,
            EdgeKind::Shortcut { .. } => 1 + settings.middle_bits() as usize,
            EdgeKind::UnpackedShortcut { .. } => 2 + settings.path_bits as usize + settings.count_bits as usize,
        };
        direction + target + weight + payload
    }

    pub fn write(&self, writer: &mut BitWriter, settings: &BlockSettings, local_source: u32) -> Result<()> {
        let both = self.forward && self.backward;
        writer.write_bool(both)?;
        if !both {
            writer.write_bool(self.forward)?;
        }

        match self.target {
            RawTarget::Internal(local) => {
                writer.write_bool(true)?;
                writer.write(local, BlockSettings::internal_target_bits(local_source))?;
            }
            RawTarget::External { adjacent, local } => {
                writer.write_bool(false)?;
                writer.write(adjacent, settings.adjacent_index_bits())?;
                writer.write(local, settings.external_bits)?;
            }
        }

        if settings.two_weight_widths() {
            let long = bits_needed(self.weight) > settings.short_weight_bits;
            writer.write_bool(long)?;
            writer.write(self.weight, if long { settings.long_weight_bits } else { settings.short_weight_bits })?;
        } else {
            writer.write(self.weight, settings.long_weight_bits)?;
        }

        match self.kind {
            EdgeKind::Original(attributes) => {
                writer.write_bool(false)?;
                writer.write(attributes.type_id as u32, settings.type_bits)?;
                writer.write(attributes.name_id, settings.name_bits)?;
                writer.write_bool(attributes.branching_possible)?;
            }
            EdgeKind::Shortcut { middle } => {
                writer.write_bool(true)?;
                writer.write_bool(false)?;
                writer.write(middle, settings.middle_bits())?;
            }
            EdgeKind::UnpackedShortcut {
                path,
                reversed,
                original_edges,
            } => {
                writer.write_bool(true)?;
                writer.write_bool(true)?;
                writer.write_bool(reversed)?;
                writer.write(path, settings.path_bits)?;
                writer.write(original_edges, settings.count_bits)?;
            }
        }
        Ok(())
    }

    pub fn read(reader: &mut BitReader, settings: &BlockSettings, local_source: u32) -> Result<Self> {
        let (forward, backward) = if reader.read_bool()? {
            (true, true)
        } else {
            let forward = reader.read_bool()?;
            (forward, !forward)
        };

        let target = if reader.read_bool()? {
            RawTarget::Internal(reader.read(BlockSettings::internal_target_bits(local_source))?)
        } else {
            let adjacent = reader.read(settings.adjacent_index_bits())?;
            RawTarget::External {
                adjacent,
                local: reader.read(settings.external_bits)?,
            }
        };

        let weight = if settings.two_weight_widths() {
            let long = reader.read_bool()?;
            reader.read(if long { settings.long_weight_bits } else { settings.short_weight_bits })?
        } else {
            reader.read(settings.long_weight_bits)?
        };

        let kind = if !reader.read_bool()? {
            let type_id = reader.read(settings.type_bits)? as u8;
            let name_id = reader.read(settings.name_bits)?;
            EdgeKind::Original(EdgeAttributes {
                name_id,
                type_id,
                branching_possible: reader.read_bool()?,
            })
        } else if !reader.read_bool()? {
            EdgeKind::Shortcut {
                middle: reader.read(settings.middle_bits())?,
            }
        } else {
            let reversed = reader.read_bool()?;
            let path = reader.read(settings.path_bits)?;
            EdgeKind::UnpackedShortcut {
                path,
                reversed,
                original_edges: reader.read(settings.count_bits)?,
            }
        };

        Ok(RawEdge {
            target,
            weight,
            forward,
            backward,
            kind,
        })
    }
}

/// Choose short and long weight widths for a histogram of weight bit lengths.
/// Returns `(short, long, total bits)`, short equals long if a single width is cheapest.
pub fn choose_weight_bits(histogram: &[u32; 33]) -> (u8, u8, usize) {
    let long = histogram.iter().rposition(|&count| count > 0).unwrap_or(0) as u8;
    let num_edges: usize = histogram.iter().map(|&count| count as usize).sum();
    let mut best = (long, long, num_edges * long as usize);
    for short in 0..long {
        let short_edges: usize = histogram[..=short as usize].iter().map(|&count| count as usize).sum();
        let cost = num_edges + short_edges * short as usize + (num_edges - short_edges) * long as usize;
        if cost < best.2 {
            best = (short, long, cost);
        }
    }
    best
}

/// Serialize a block into `buffer`, which must be zeroed.
/// `edges[local]` are the edges of the node with local id `local`.
pub fn encode(buffer: &mut [u8], settings: &BlockSettings, coordinates: &[Coordinate], adjacent: &[u32], edges: &[Vec<RawEdge>]) -> Result<()> {
    debug_assert_eq!(coordinates.len(), settings.node_count as usize);
    debug_assert_eq!(edges.len(), settings.node_count as usize);
    debug_assert_eq!(adjacent.len(), settings.adjacent_count as usize);

    let mut writer = BitWriter::new(buffer);
    settings.write(&mut writer)?;
    for coordinate in coordinates {
        writer.write(coordinate.x - settings.min_x, settings.x_bits)?;
        writer.write(coordinate.y - settings.min_y, settings.y_bits)?;
    }
    for &block in adjacent {
        writer.write(block, settings.block_bits)?;
    }
    let mut offset = 0;
    writer.write(0, settings.first_edge_bits)?;
    for (local, node_edges) in edges.iter().enumerate() {
        offset += node_edges.iter().map(|edge| edge.bits(settings, local as u32)).sum::<usize>();
        writer.write(offset as u32, settings.first_edge_bits)?;
    }
    debug_assert_eq!(writer.position(), settings.edges_offset());
    for (local, node_edges) in edges.iter().enumerate() {
        for edge in node_edges {
            edge.write(&mut writer, settings, local as u32)?;
        }
    }
    debug_assert_eq!(writer.position(), settings.total_bits(offset));
    Ok(())
}

/// Read access to an encoded block.
#[derive(Debug, Clone, Copy)]
pub struct BlockView<'a> {
    data: &'a [u8],
    settings: BlockSettings,
}

impl<'a> BlockView<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let settings = BlockSettings::read(&mut BitReader::new(data))?;
        Ok(BlockView { data, settings })
    }

    pub fn settings(&self) -> &BlockSettings {
        &self.settings
    }

    fn check_local(&self, local: u32) -> Result<()> {
        if local >= self.settings.node_count {
            return Err(Error::InvalidInput(format!("local id {} out of range, block has {} nodes", local, self.settings.node_count)));
        }
        Ok(())
    }

    pub fn coordinate(&self, local: u32) -> Result<Coordinate> {
        self.check_local(local)?;
        let settings = &self.settings;
        let position = settings.coordinates_offset() + local as usize * (settings.x_bits as usize + settings.y_bits as usize);
        let mut reader = BitReader::at(self.data, position);
        let x = reader.read(settings.x_bits)?;
        let y = reader.read(settings.y_bits)?;
        Ok(Coordinate::new(settings.min_x + x, settings.min_y + y))
    }

    pub fn adjacent_block(&self, index: u32) -> Result<u32> {
        if index >= self.settings.adjacent_count {
            return Err(Error::IncompatibleFormat(format!(
                "adjacent block index {} out of range, table has {} entries",
                index, self.settings.adjacent_count
            )));
        }
        let position = self.settings.adjacent_offset() + index as usize * self.settings.block_bits as usize;
        BitReader::at(self.data, position).read(self.settings.block_bits)
    }

    /// Append the edges of `local` to `out`.
    pub fn edges(&self, local: u32, out: &mut Vec<RawEdge>) -> Result<()> {
        self.check_local(local)?;
        let settings = &self.settings;
        let mut offsets = BitReader::at(self.data, settings.first_edge_offset() + local as usize * settings.first_edge_bits as usize);
        let begin = settings.edges_offset() + offsets.read(settings.first_edge_bits)? as usize;
        let end = settings.edges_offset() + offsets.read(settings.first_edge_bits)? as usize;

        let mut reader = BitReader::at(self.data, begin);
        while reader.position() < end {
            out.push(RawEdge::read(&mut reader, settings, local)?);
        }
        if reader.position() != end {
            return Err(Error::IncompatibleFormat(format!("edges of local node {} overrun their range", local)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BlockSettings {
        BlockSettings {
            x_bits: 4,
            y_bits: 3,
            block_bits: 3,
            external_bits: 2,
            short_weight_bits: 4,
            long_weight_bits: 10,
            name_bits: 5,
            type_bits: 2,
            count_bits: 3,
            path_bits: 6,
            min_x: 100,
            min_y: 7,
            node_count: 3,
            adjacent_count: 2,
            ..Default::default()
        }
    }

    fn sample_edges() -> Vec<Vec<RawEdge>> {
        vec![
            vec![RawEdge {
                target: RawTarget::External { adjacent: 1, local: 3 },
                weight: 900,
                forward: true,
                backward: true,
                kind: EdgeKind::Original(EdgeAttributes {
                    name_id: 17,
                    type_id: 3,
                    branching_possible: true,
                }),
            }],
            vec![],
            vec![
                RawEdge {
                    target: RawTarget::Internal(0),
                    weight: 12,
                    forward: false,
                    backward: true,
                    kind: EdgeKind::Shortcut { middle: 1 },
                },
                RawEdge {
                    target: RawTarget::Internal(1),
                    weight: 15,
                    forward: true,
                    backward: false,
                    kind: EdgeKind::UnpackedShortcut {
                        path: 40,
                        reversed: true,
                        original_edges: 5,
                    },
                },
            ],
        ]
    }

    #[test]
    fn header_is_216_bits() {
        assert_eq!(BLOCK_HEADER_BITS, 216);
        let mut buffer = [0u8; 27];
        let settings = settings();
        settings.write(&mut BitWriter::new(&mut buffer)).unwrap();
        assert_eq!(BlockSettings::read(&mut BitReader::new(&buffer)).unwrap(), settings);
    }

    #[test]
    fn encoded_block_reads_back() {
        let edges = sample_edges();
        let mut settings = settings();
        let stream: usize = edges
            .iter()
            .enumerate()
            .flat_map(|(local, node_edges)| node_edges.iter().map(move |edge| (local, edge)))
            .map(|(local, edge)| edge.bits(&settings, local as u32))
            .sum();
        settings.first_edge_bits = bits_needed(stream as u32);
        let coordinates = [Coordinate::new(100, 7), Coordinate::new(115, 14), Coordinate::new(103, 9)];

        let mut buffer = vec![0u8; 64];
        encode(&mut buffer, &settings, &coordinates, &[4, 6], &edges).unwrap();

        let view = BlockView::new(&buffer).unwrap();
        assert_eq!(view.settings(), &settings);
        for (local, coordinate) in coordinates.iter().enumerate() {
            assert_eq!(view.coordinate(local as u32).unwrap(), *coordinate);
        }
        assert_eq!(view.adjacent_block(0).unwrap(), 4);
        assert_eq!(view.adjacent_block(1).unwrap(), 6);
        assert!(view.adjacent_block(2).is_err());
        for (local, expected) in edges.iter().enumerate() {
            let mut decoded = Vec::new();
            view.edges(local as u32, &mut decoded).unwrap();
            assert_eq!(&decoded, expected);
        }
        assert!(matches!(view.coordinate(3), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn too_small_buffer_is_out_of_bounds() {
        let mut buffer = vec![0u8; 30];
        let settings = settings();
        let coordinates = [Coordinate::new(100, 7); 3];
        assert!(matches!(
            encode(&mut buffer, &settings, &coordinates, &[4, 6], &sample_edges()),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn weight_widths() {
        let mut histogram = [0u32; 33];
        assert_eq!(choose_weight_bits(&histogram), (0, 0, 0));

        // uniform weights need a single width
        histogram[7] = 10;
        assert_eq!(choose_weight_bits(&histogram), (7, 7, 70));

        // one outlier is cheaper to escape
        histogram[20] = 1;
        assert_eq!(choose_weight_bits(&histogram), (7, 20, 11 + 70 + 20));
    }
}
