//! IT 2.14 / 2.15 sample decompression.
//!
//! Samples are split into blocks (0x8000 frames for 8-bit data, 0x4000
//! for 16-bit), each prefixed by its packed byte length. Inside a block
//! deltas are stored with a variable bit width that the stream itself
//! changes. IT 2.15 integrates twice.

use ml_ir::SampleData;

/// Little-endian bit reader over one block.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bit: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, bit: 0 }
    }

    fn read(&mut self, count: u32) -> Option<u32> {
        let mut value = 0u32;
        for i in 0..count {
            let byte = *self.data.get(self.pos)?;
            value |= (((byte >> self.bit) & 1) as u32) << i;
            self.bit += 1;
            if self.bit == 8 {
                self.bit = 0;
                self.pos += 1;
            }
        }
        Some(value)
    }
}

/// Width parameters of one sample depth.
struct Depth {
    bits: u32,
    block_frames: usize,
    /// Bits of the width-change value in the narrow mode
    change_bits: u32,
}

const DEPTH_8: Depth = Depth { bits: 8, block_frames: 0x8000, change_bits: 3 };
const DEPTH_16: Depth = Depth { bits: 16, block_frames: 0x4000, change_bits: 4 };

/// Decompress `frames` frames. Missing data ends the sample early.
pub fn decompress(data: &[u8], frames: usize, sixteen_bit: bool, it215: bool) -> SampleData {
    let depth = if sixteen_bit { &DEPTH_16 } else { &DEPTH_8 };
    let values = decompress_values(data, frames, depth, it215);
    if sixteen_bit {
        SampleData::Pcm16(values.into_iter().map(|v| v as i16).collect())
    } else {
        SampleData::Pcm8(values.into_iter().map(|v| v as i8).collect())
    }
}

fn decompress_values(data: &[u8], frames: usize, depth: &Depth, it215: bool) -> Vec<i32> {
    // The narrowest width packs eight frames per byte
    let mut out = Vec::with_capacity(frames.min(data.len() * 8));
    let mut pos = 0usize;
    let top = depth.bits + 1;

    while out.len() < frames {
        let Some(len) = data.get(pos..pos + 2).map(|b| u16::from_le_bytes([b[0], b[1]]) as usize) else {
            break;
        };
        pos += 2;
        let block = &data[pos..(pos + len).min(data.len())];
        pos += len;

        let mut reader = BitReader::new(block);
        let block_frames = depth.block_frames.min(frames - out.len());
        let mut width = top;
        let (mut d1, mut d2) = (0i32, 0i32);
        let mut produced = 0;

        while produced < block_frames {
            if width == 0 || width > top {
                return out;
            }
            let Some(value) = reader.read(width) else {
                return out;
            };
            if width < 7 {
                // Narrow: the single "100..0" pattern announces a new width
                if value == 1 << (width - 1) {
                    let Some(next) = reader.read(depth.change_bits) else {
                        return out;
                    };
                    let next = next + 1;
                    width = if next < width { next } else { next + 1 };
                    continue;
                }
            } else if width < top {
                // Medium: a band of values just below the maximum announces it
                let band = 1u32 << depth.change_bits;
                let border = (((1u32 << depth.bits) - 1) >> (top - width)) - band / 2;
                if value > border && value <= border + band {
                    let next = value - border;
                    width = if next < width { next } else { next + 1 };
                    continue;
                }
            } else if value & (1 << depth.bits) != 0 {
                // Wide: the top bit set announces it
                width = (value + 1) & 0xFF;
                continue;
            }

            // Sign-extend the delta from `width` bits
            let delta = if width < depth.bits {
                let shift = 32 - width;
                ((value << shift) as i32) >> shift
            } else {
                let shift = 32 - depth.bits;
                ((value << shift) as i32) >> shift
            };
            d1 = wrap(d1 + delta, depth.bits);
            d2 = wrap(d2 + d1, depth.bits);
            out.push(if it215 { d2 } else { d1 });
            produced += 1;
        }
    }
    out
}

/// Wrap to a signed integer of `bits` bits.
fn wrap(value: i32, bits: u32) -> i32 {
    let shift = 32 - bits;
    (value << shift) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pack values LSB-first with the given widths.
    fn pack(fields: &[(u32, u32)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut bit = 0usize;
        for &(value, width) in fields {
            for i in 0..width {
                if bit % 8 == 0 {
                    bytes.push(0);
                }
                if value >> i & 1 != 0 {
                    *bytes.last_mut().unwrap() |= 1 << (bit % 8);
                }
                bit += 1;
            }
        }
        let mut block = (bytes.len() as u16).to_le_bytes().to_vec();
        block.extend(bytes);
        block
    }

    #[test]
    fn wide_deltas_integrate() {
        let data = pack(&[(5, 9), (3, 9), (0xFE, 9)]);
        assert_eq!(decompress(&data, 3, false, false), SampleData::Pcm8(vec![5, 8, 6]));
    }

    #[test]
    fn it215_integrates_twice() {
        let data = pack(&[(1, 9), (1, 9), (0, 9)]);
        assert_eq!(decompress(&data, 3, false, true), SampleData::Pcm8(vec![1, 3, 5]));
    }

    #[test]
    fn width_change_to_narrow_mode() {
        // 9-bit escape to width 4 (value 3 = width - 1), then two 4-bit deltas
        let data = pack(&[(0x100 | 3, 9), (2, 4), (0xF, 4)]);
        assert_eq!(decompress(&data, 2, false, false), SampleData::Pcm8(vec![2, 1]));
    }

    #[test]
    fn truncated_stream_stops_early() {
        let data = pack(&[(7, 9)]);
        assert_eq!(decompress(&data, 10, false, false).len(), 1);
        assert!(decompress(&[], 10, true, false).is_empty());
    }
}
