//! The frozen, read-only adjacency list produced by a finished import.

use crate::arena::Address;
use crate::codec::{decode_vlong, unzigzag};
use crate::compress::CompressionKind;

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(word)
}

/// Immutable compressed-sparse-row adjacency over frozen arena pages.
///
/// All lookups are lock-free reads of plain memory: `degree` and `offset`
/// are O(1) table loads, neighbor iteration decodes one node's record in
/// O(degree). The list is `Send + Sync` by construction since nothing in it
/// mutates.
pub struct AdjacencyList {
    kind: CompressionKind,
    page_shift: u32,
    pages: Vec<Box<[u8]>>,
    offsets: Vec<u64>,
    degrees: Vec<u32>,
    properties: Vec<PropertyList>,
    edge_count: u64,
}

impl AdjacencyList {
    pub(crate) fn new(
        kind: CompressionKind,
        page_shift: u32,
        pages: Vec<Box<[u8]>>,
        offsets: Vec<u64>,
        degrees: Vec<u32>,
        properties: Vec<PropertyList>,
    ) -> Self {
        let edge_count = degrees.iter().map(|&d| u64::from(d)).sum();
        Self {
            kind,
            page_shift,
            pages,
            offsets,
            degrees,
            properties,
            edge_count,
        }
    }

    /// The storage strategy records were encoded with.
    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    /// Number of nodes in the dense id space.
    pub fn node_count(&self) -> u64 {
        self.degrees.len() as u64
    }

    /// Total number of stored (post-aggregation) edges.
    pub fn edge_count(&self) -> u64 {
        self.edge_count
    }

    /// Number of relationship properties stored per edge.
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Out-degree of `node`.
    pub fn degree(&self, node: u64) -> u32 {
        self.degrees[node as usize]
    }

    /// Arena address of `node`'s record. Meaningful only for nodes with a
    /// nonzero degree.
    pub fn offset(&self, node: u64) -> Address {
        self.offsets[node as usize]
    }

    /// Iterates `node`'s neighbors in ascending target order.
    pub fn neighbors(&self, node: u64) -> NeighborCursor<'_> {
        let degree = self.degrees[node as usize];
        if degree == 0 {
            // zero-degree nodes never got a record; their offset is
            // meaningless and must not be dereferenced
            return NeighborCursor {
                kind: self.kind,
                data: &[],
                off: 0,
                remaining: 0,
                value: 0,
            };
        }
        let address = self.offsets[node as usize];
        let page = &self.pages[(address >> self.page_shift) as usize];
        let start = (address & ((1u64 << self.page_shift) - 1)) as usize;
        debug_assert_eq!(read_u32(page, start), degree);
        NeighborCursor {
            kind: self.kind,
            data: page,
            off: start + 4,
            remaining: degree,
            value: 0,
        }
    }

    /// Iterates the raw 64-bit property values of `node`'s edges, aligned
    /// with [`neighbors`](Self::neighbors).
    pub fn property_values(&self, key: usize, node: u64) -> PropertyCursor<'_> {
        self.properties[key].values(node, self.degrees[node as usize])
    }
}

/// Decoding iterator over one node's neighbor record.
pub struct NeighborCursor<'a> {
    kind: CompressionKind,
    data: &'a [u8],
    off: usize,
    remaining: u32,
    value: u64,
}

impl Iterator for NeighborCursor<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match self.kind {
            CompressionKind::DeltaVarLong => {
                let delta = unzigzag(decode_vlong(self.data, &mut self.off));
                self.value = self.value.wrapping_add(delta as u64);
                Some(self.value)
            }
            CompressionKind::Raw => {
                let word = read_u64(self.data, self.off);
                self.off += 8;
                Some(word)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for NeighborCursor<'_> {}

/// Frozen pages and offsets of one relationship property.
///
/// Property values are always stored raw, `degree` little-endian `u64`
/// words per node, regardless of the topology strategy.
pub struct PropertyList {
    page_shift: u32,
    pages: Vec<Box<[u8]>>,
    offsets: Vec<u64>,
}

impl PropertyList {
    pub(crate) fn new(page_shift: u32, pages: Vec<Box<[u8]>>, offsets: Vec<u64>) -> Self {
        Self {
            page_shift,
            pages,
            offsets,
        }
    }

    fn values(&self, node: u64, degree: u32) -> PropertyCursor<'_> {
        if degree == 0 {
            return PropertyCursor {
                data: &[],
                off: 0,
                remaining: 0,
            };
        }
        let address = self.offsets[node as usize];
        let page = &self.pages[(address >> self.page_shift) as usize];
        let start = (address & ((1u64 << self.page_shift) - 1)) as usize;
        PropertyCursor {
            data: page,
            off: start,
            remaining: degree,
        }
    }
}

/// Iterator over one node's stored property bit-patterns.
pub struct PropertyCursor<'a> {
    data: &'a [u8],
    off: usize,
    remaining: u32,
}

impl Iterator for PropertyCursor<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let word = read_u64(self.data, self.off);
        self.off += 8;
        Some(word)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PropertyCursor<'_> {}
