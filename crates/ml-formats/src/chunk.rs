//! Tagged chunk containers (IFF-style `tag + length + payload` streams).
//!
//! The iterator never assumes an order of tags. A chunk whose declared
//! length runs past the buffer is yielded clamped and ends the stream.

use crate::reader::{u32_be, u32_le};

/// Byte order of the chunk length field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LengthOrder {
    Big,
    Little,
}

/// How a particular container frames its chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    pub length_order: LengthOrder,
    /// Payloads are padded to a multiple of this many bytes
    pub align: usize,
}

impl ChunkLayout {
    /// Big-endian lengths, no padding (Oktalyzer, DigiBooster).
    pub const AMIGA: ChunkLayout = ChunkLayout { length_order: LengthOrder::Big, align: 1 };
    /// Big-endian lengths, word padding (EA IFF 85).
    pub const IFF: ChunkLayout = ChunkLayout { length_order: LengthOrder::Big, align: 2 };
    /// Little-endian lengths, word padding (RIFF).
    pub const RIFF: ChunkLayout = ChunkLayout { length_order: LengthOrder::Little, align: 2 };
}

/// One chunk of a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub id: [u8; 4],
    /// Offset of the payload in the containing buffer
    pub offset: usize,
    pub data: &'a [u8],
    /// The declared length ran past the end of the buffer
    pub truncated: bool,
}

impl Chunk<'_> {
    /// The tag as text, for logging.
    pub fn tag(&self) -> String {
        String::from_utf8_lossy(&self.id).into_owned()
    }
}

/// Iterator over the chunks of a container body.
pub struct Chunks<'a> {
    data: &'a [u8],
    pos: usize,
    layout: ChunkLayout,
    done: bool,
}

impl<'a> Chunks<'a> {
    /// Iterate over chunks starting at `start`.
    pub fn new(data: &'a [u8], start: usize, layout: ChunkLayout) -> Self {
        Self { data, pos: start, layout, done: false }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        if self.done || self.pos.checked_add(8)? > self.data.len() {
            return None;
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        let len = match self.layout.length_order {
            LengthOrder::Big => u32_be(self.data, self.pos + 4)?,
            LengthOrder::Little => u32_le(self.data, self.pos + 4)?,
        } as usize;

        let start = self.pos + 8;
        let declared_end = start.saturating_add(len);
        let truncated = declared_end > self.data.len();
        let end = declared_end.min(self.data.len());
        if truncated {
            self.done = true;
        } else {
            let align = self.layout.align.max(1);
            self.pos = end + (align - end % align) % align;
        }

        Some(Chunk { id, offset: start, data: &self.data[start..end], truncated })
    }
}
