//! varint 与 zigzag 变换。
//!
//! varint 为小端 base-128，最高位是续位；读取端最多接受 5 个字节，截断或超长都视为
//! `bad varint`。

use crate::buffer::ByteBuffer;
use crate::error::{DecodeError, EncodeError};

/// varint 读取允许的最大字节数。
pub(crate) const MAX_VARINT_LEN: usize = 5;

pub(crate) fn write_varint(buf: &mut ByteBuffer, mut value: u64) -> Result<(), EncodeError> {
    let mut scratch = [0u8; 10];
    let mut n = 0;
    loop {
        let low = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            scratch[n] = low;
            n += 1;
            break;
        }
        scratch[n] = low | 0x80;
        n += 1;
    }
    buf.put(&scratch[..n])
}

/// 读取一个 varint 并推进游标。
pub(crate) fn read_varint(input: &mut &[u8]) -> Result<u64, DecodeError> {
    let end = input
        .iter()
        .take(MAX_VARINT_LEN)
        .position(|byte| *byte < 0x80)
        .ok_or(DecodeError::BadVarint)?;
    let mut value = 0u64;
    for (k, byte) in input[..=end].iter().enumerate() {
        value |= u64::from(byte & 0x7F) << (7 * k);
    }
    *input = &input[end + 1..];
    Ok(value)
}

/// 有符号到无符号的双射：`v -> 2|v| - (v < 0)`。
pub(crate) fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub(crate) fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
