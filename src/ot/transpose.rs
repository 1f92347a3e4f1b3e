//! Transposition of the 128-column bit matrix of the OT extension.
//!
//! Bits are stored LSB first within each byte, so little-endian `u64` words and `u128` rows can be
//! viewed as rows of bytes without reordering any bit.

use wide::{i8x16, i64x2};

/// Transposes a bit matrix of `rows` rows, each stored as `input.len() / rows` bytes.
///
/// # Panics
/// - If `rows` is not a positive multiple of 16
/// - If `input.len()` is not divisible by `rows`
/// - If the number of columns is less than 16 or not divisible by 8
pub(crate) fn transpose_bitmatrix(input: &[u8], output: &mut [u8], rows: usize) {
    assert!(rows >= 16 && rows % 16 == 0, "rows must be a positive multiple of 16");
    assert_eq!(0, input.len() % rows, "input.len() must be divisible by rows");
    let cols = input.len() * 8 / rows;
    assert!(cols >= 16 && cols % 8 == 0, "invalid number of columns {cols}");
    assert_eq!(input.len(), output.len());

    // 16x8 blocks: move_mask collects the top bit of each of the 16 row bytes, which is one
    // column of the block and thus 16 bits of one output row
    for row in (0..rows).step_by(16) {
        for col in (0..cols).step_by(8) {
            let mut v = load_bytes(input, row, col, cols);
            for offset in (0..8).rev() {
                let msbs = v.move_mask().to_le_bytes();
                let idx = out(row, col + offset, rows);
                output[idx..idx + 2].copy_from_slice(&msbs[..2]);
                // no shift on i8x16, bits crossing into the next byte are never read
                let lanes: &mut i64x2 = bytemuck::must_cast_mut(&mut v);
                *lanes = *lanes << 1;
            }
        }
    }
}

#[inline]
fn inp(x: usize, y: usize, cols: usize) -> usize {
    x * cols / 8 + y / 8
}

#[inline]
fn out(x: usize, y: usize, rows: usize) -> usize {
    y * rows / 8 + x / 8
}

/// The byte holding columns `col..col + 8` of rows `row..row + 16`.
#[inline]
fn load_bytes(b: &[u8], row: usize, col: usize, cols: usize) -> i8x16 {
    let bytes = std::array::from_fn(|i| b[inp(row + i, col, cols)] as i8);
    i8x16::from(bytes)
}

/// Turns 128 bit columns of `words` 64-bit words each into `rows` rows of 128 bits.
///
/// `columns[j * words + w]` holds bits `64w..64w+64` of column `j`.
pub(crate) fn columns_to_rows(columns: &[u64], words: usize, rows: usize) -> Vec<u128> {
    debug_assert_eq!(columns.len(), 128 * words);
    debug_assert!(rows <= 64 * words);
    let input: Vec<u8> = columns.iter().flat_map(|w| w.to_le_bytes()).collect();
    let mut output = vec![0u8; input.len()];
    transpose_bitmatrix(&input, &mut output, 128);
    output
        .chunks_exact(16)
        .take(rows)
        .map(|row| {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(row);
            u128::from_le_bytes(bytes)
        })
        .collect()
}
