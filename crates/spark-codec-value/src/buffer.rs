//! 会合通道使用的字节缓冲。
//!
//! # 教案式说明
//! - **意图（Why）**：绝大多数请求（如 `pump`、`heap stats`）只有几个字节，内联存储可以让它们
//!   完全不触碰堆；大载荷则按 2 的幂扩容，摊还拷贝次数；
//! - **逻辑（How）**：底层是 `SmallVec<[u8; 48]>`，扩容前先计算目标容量并走 `try_grow`，
//!   分配失败映射为 [`EncodeError::OutOfMemory`] 而非 panic；
//! - **契约（What）**：
//!   - 总长度不超过 [`MAX_BUFFER_LEN`]；
//!   - [`ByteBuffer::take`] 与 [`ByteBuffer::move_into`] 是所有权转移：源缓冲被清空，字节不会被复制；
//!   - [`ByteBuffer::clear`] 只重置长度，保留已分配容量。

use alloc::vec::Vec;
use core::fmt;
use core::ops::Deref;

use smallvec::SmallVec;

use crate::error::EncodeError;

/// 内联存储的字节数。
pub const INLINE_CAPACITY: usize = 48;

/// 单个缓冲允许的最大长度。
pub const MAX_BUFFER_LEN: usize = u32::MAX as usize;

/// 可增长、可转移所有权的字节缓冲。
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    bytes: SmallVec<[u8; INLINE_CAPACITY]>,
}

impl ByteBuffer {
    /// 创建空缓冲，容量为内联容量。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定字节初始化。
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: SmallVec::from_slice(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// 是否仍在使用内联存储。
    pub fn is_inline(&self) -> bool {
        !self.bytes.spilled()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// 清空内容但保留容量。
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// 确保还能追加 `additional` 个字节。
    ///
    /// 目标容量取 `len + additional` 向上取整到 2 的幂。
    pub fn reserve(&mut self, additional: usize) -> Result<(), EncodeError> {
        let needed = self
            .bytes
            .len()
            .checked_add(additional)
            .ok_or(EncodeError::OutOfMemory)?;
        if needed <= self.bytes.capacity() {
            return Ok(());
        }
        if needed > MAX_BUFFER_LEN {
            return Err(EncodeError::OutOfMemory);
        }
        let target = needed
            .checked_next_power_of_two()
            .ok_or(EncodeError::OutOfMemory)?;
        self.bytes
            .try_grow(target)
            .map_err(|_| EncodeError::OutOfMemory)
    }

    /// 追加一段字节。
    pub fn put(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.reserve(bytes.len())?;
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    /// 追加单个字节。
    pub fn put_byte(&mut self, byte: u8) -> Result<(), EncodeError> {
        self.reserve(1)?;
        self.bytes.push(byte);
        Ok(())
    }

    /// 取走全部内容，`self` 变为空缓冲。
    pub fn take(&mut self) -> ByteBuffer {
        core::mem::take(self)
    }

    /// 把内容移交给 `dst`：`dst` 原有内容被丢弃，`self` 变为空。
    pub fn move_into(&mut self, dst: &mut ByteBuffer) {
        *dst = self.take();
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes.into_vec()
    }
}

impl Deref for ByteBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: SmallVec::from_vec(bytes),
        }
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("head", &self.bytes.first())
            .finish()
    }
}
