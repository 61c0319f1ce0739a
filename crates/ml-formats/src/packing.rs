//! Reusable pattern-packing sub-routines.
//!
//! Two strategies recur across formats: fixed-width cells stored row
//! after row, and run-length packed tracks where one event may fill
//! several consecutive rows of a channel.

use ml_ir::{Cell, Pattern};

use crate::reader::ByteReader;

/// Decode a pattern stored as fixed-width cells in row-major order.
///
/// Rows whose bytes are missing stay empty. Returns the pattern and
/// whether the data ran out before the last cell.
pub fn unpack_fixed(
    data: &[u8],
    rows: u16,
    channels: u8,
    width: usize,
    mut decode: impl FnMut(&[u8]) -> Cell,
) -> (Pattern, bool) {
    let mut pattern = Pattern::new(rows, channels);
    let mut chunks = data.chunks_exact(width);
    for row in 0..rows {
        for ch in 0..channels {
            match chunks.next() {
                Some(bytes) => *pattern.cell_mut(row, ch) = decode(bytes),
                None => return (pattern, true),
            }
        }
    }
    (pattern, false)
}

/// Run-length packed track reader.
///
/// Every event is `event_len` bytes. An event preceded by `marker` is
/// followed by a repeat byte and fills that many rows. A repeat that
/// runs past the end of one pattern carries over into the next call.
pub struct RleTrack {
    marker: u8,
    event_len: usize,
    pending: Option<(Cell, usize)>,
}

impl RleTrack {
    pub fn new(marker: u8, event_len: usize) -> Self {
        Self { marker, event_len, pending: None }
    }

    /// Fill `cells` from the reader. Returns false if the data ran out.
    pub fn fill(
        &mut self,
        reader: &mut ByteReader,
        cells: &mut [Cell],
        mut decode: impl FnMut(&[u8]) -> Cell,
    ) -> bool {
        let mut row = 0;
        while row < cells.len() {
            let (cell, count) = match self.pending.take() {
                Some(pending) => pending,
                None => match self.next_event(reader, &mut decode) {
                    Some(event) => event,
                    None => return false,
                },
            };
            let fill = count.min(cells.len() - row);
            cells[row..row + fill].fill(cell);
            row += fill;
            if count > fill {
                self.pending = Some((cell, count - fill));
            }
        }
        true
    }

    fn next_event(
        &self,
        reader: &mut ByteReader,
        decode: &mut impl FnMut(&[u8]) -> Cell,
    ) -> Option<(Cell, usize)> {
        let first = reader.read_u8().ok()?;
        if first == self.marker {
            let count = reader.read_u8().ok()? as usize;
            let bytes = reader.read_bytes(self.event_len).ok()?;
            Some((decode(bytes), count.max(1)))
        } else {
            let mut event = [0u8; 16];
            event[0] = first;
            let rest = reader.read_bytes(self.event_len - 1).ok()?;
            event[1..self.event_len].copy_from_slice(rest);
            Some((decode(&event[..self.event_len]), 1))
        }
    }
}
