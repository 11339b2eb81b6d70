//! 递归下降解码器。
//!
//! # 教案式说明
//! - **意图（Why）**：把不可信的字节流安全地还原为宿主值；任何格式问题都只产生一条短诊断，
//!   不会 panic，也不会把半成品交给宿主；
//! - **逻辑（How）**：
//!   1. 校验 `FF 0F` 信封；
//!   2. 循环解析顶层值，直到输入耗尽；
//!   3. 每个容器在进入时检查嵌套深度，结束时核对结束标签携带的计数；
//! - **契约（What）**：
//!   - 最多 [`MAX_DEPTH`] 层容器嵌套，第 `MAX_DEPTH + 1` 层返回 `too much recursion`；
//!   - ArrayBuffer 与回引之后可跟一个视图标签 `V`，其子标签与三个 varint 被读取并丢弃；
//!   - 错误对象的 message/stack/cause 子字段可按任意顺序出现，但每个至多一次；
//! - **风险（Trade-offs）**：深度上限是保守的固定值，调用方需要更深的结构时必须在编码前拍平。

use crate::builder::{ArrayKind, Builder, ErrorPrototype};
use crate::error::DecodeError;
use crate::tag;
use crate::varint::{read_varint, zigzag_decode};

/// 容器最大嵌套层数。
pub const MAX_DEPTH: usize = 96;

/// 解码 `bytes` 并驱动 `builder`。
pub fn decode<B>(bytes: &[u8], builder: &mut B) -> Result<(), DecodeError>
where
    B: Builder + ?Sized,
{
    if bytes.len() < 2 {
        return Err(DecodeError::TooShort);
    }
    if bytes[0] != tag::FORMAT_MARKER {
        return Err(DecodeError::BadHeader);
    }
    if bytes[1] != tag::FORMAT_VERSION {
        return Err(DecodeError::BadVersion);
    }
    let mut decoder = Decoder {
        input: &bytes[2..],
        builder,
    };
    while !decoder.input.is_empty() {
        decoder.value(0)?;
    }
    Ok(())
}

struct Decoder<'i, 'b, B: ?Sized> {
    input: &'i [u8],
    builder: &'b mut B,
}

impl<'i, B: Builder + ?Sized> Decoder<'i, '_, B> {
    /// 解析一个值；`depth` 为包围它的容器层数。
    fn value(&mut self, depth: usize) -> Result<(), DecodeError> {
        let mut tag = self.byte()?;
        while tag == tag::PADDING {
            if self.input.is_empty() {
                return Ok(());
            }
            tag = self.byte()?;
        }
        match tag {
            tag::OBJECT_REFERENCE => {
                let id = read_varint(&mut self.input)?;
                self.builder.object_ref(id)?;
                self.skip_view()
            }
            tag::NULL => self.builder.null(),
            tag::UNDEFINED => self.builder.undefined(),
            tag::FALSE | tag::FALSE_OBJECT => self.builder.bool(false),
            tag::TRUE | tag::TRUE_OBJECT => self.builder.bool(true),
            tag::INT32 => {
                let value = zigzag_decode(read_varint(&mut self.input)?);
                self.builder.int(value)
            }
            tag::DOUBLE | tag::NUMBER_OBJECT => {
                let value = self.double()?;
                self.builder.num(value)
            }
            tag::DATE => {
                let value = self.double()?;
                self.builder.date(value)
            }
            tag::BIGINT => self.bigint(),
            tag::LATIN1_STRING | tag::UTF8_STRING | tag::UTF16_STRING => self.string(tag),
            tag::STRING_OBJECT => {
                let inner = self.byte()?;
                if !tag::is_string_tag(inner) {
                    return Err(DecodeError::BadStringObject);
                }
                self.string(inner)
            }
            tag::REGEXP => {
                let inner = self.byte()?;
                if !tag::is_string_tag(inner) {
                    return Err(DecodeError::BadRegExp);
                }
                self.string(inner)?;
                // flags
                read_varint(&mut self.input)?;
                Ok(())
            }
            tag::ARRAY_BUFFER | tag::RESIZABLE_ARRAY_BUFFER => {
                let len = read_varint(&mut self.input)?;
                if tag == tag::RESIZABLE_ARRAY_BUFFER {
                    // maxByteLength
                    read_varint(&mut self.input)?;
                }
                let bytes = self.take(len)?;
                self.builder.array_buffer(bytes)?;
                self.skip_view()
            }
            tag::BEGIN_DENSE_ARRAY => self.dense_array(depth),
            tag::BEGIN_SPARSE_ARRAY => self.sparse_array(depth),
            tag::BEGIN_OBJECT => self.object(depth),
            tag::BEGIN_MAP => self.map(depth),
            tag::BEGIN_SET => self.set(depth),
            tag::ERROR => self.error(depth),
            other => Err(DecodeError::BadTag(other)),
        }
    }

    fn dense_array(&mut self, depth: usize) -> Result<(), DecodeError> {
        let inner = nest(depth)?;
        let length = read_varint(&mut self.input)?;
        self.builder.array_begin(ArrayKind::Dense { length })?;
        for _ in 0..length {
            if self.peek()? == tag::THE_HOLE {
                self.input = &self.input[1..];
                self.builder.undefined()?;
            } else {
                self.value(inner)?;
            }
        }
        let properties = self.named_properties(inner, tag::END_DENSE_ARRAY)?;
        if read_varint(&mut self.input)? != properties {
            return Err(DecodeError::ArrayPropertyCountMismatch);
        }
        if read_varint(&mut self.input)? != length {
            return Err(DecodeError::ArrayElementCountMismatch);
        }
        self.builder.array_end()
    }

    fn sparse_array(&mut self, depth: usize) -> Result<(), DecodeError> {
        let inner = nest(depth)?;
        let length = read_varint(&mut self.input)?;
        self.builder.array_begin(ArrayKind::Sparse { length })?;
        let mut entries = 0u64;
        let mut properties = 0u64;
        loop {
            let next = self.peek()?;
            if next == tag::END_SPARSE_ARRAY {
                break;
            }
            if next == tag::INT32 && properties == 0 {
                self.input = &self.input[1..];
                // 下标被丢弃，元素按出现顺序压缩
                read_varint(&mut self.input)?;
                self.value(inner)?;
                entries += 1;
            } else {
                if properties == 0 {
                    self.builder.named_properties_begin()?;
                }
                properties += 1;
                self.value(inner)?;
                self.value(inner)?;
            }
        }
        self.input = &self.input[1..];
        if properties > 0 {
            self.builder.named_properties_end()?;
        }
        if read_varint(&mut self.input)? != entries + properties {
            return Err(DecodeError::SparseElementCountMismatch);
        }
        // length
        read_varint(&mut self.input)?;
        self.builder.array_end()
    }

    /// 读取数组尾部的具名属性直到 `end`，返回键值对个数；`end` 本身被消费。
    fn named_properties(&mut self, inner: usize, end: u8) -> Result<u64, DecodeError> {
        let mut count = 0u64;
        while self.peek()? != end {
            if count == 0 {
                self.builder.named_properties_begin()?;
            }
            self.value(inner)?;
            self.value(inner)?;
            count += 1;
        }
        self.input = &self.input[1..];
        if count > 0 {
            self.builder.named_properties_end()?;
        }
        Ok(count)
    }

    fn object(&mut self, depth: usize) -> Result<(), DecodeError> {
        let inner = nest(depth)?;
        self.builder.object_begin()?;
        let pairs = self.pairs(inner, tag::END_OBJECT)?;
        if read_varint(&mut self.input)? != pairs {
            return Err(DecodeError::ObjectPropertyCountMismatch);
        }
        self.builder.object_end()
    }

    fn map(&mut self, depth: usize) -> Result<(), DecodeError> {
        let inner = nest(depth)?;
        self.builder.map_begin()?;
        let pairs = self.pairs(inner, tag::END_MAP)?;
        if read_varint(&mut self.input)? != 2 * pairs {
            return Err(DecodeError::MapElementCountMismatch);
        }
        self.builder.map_end()
    }

    fn set(&mut self, depth: usize) -> Result<(), DecodeError> {
        let inner = nest(depth)?;
        self.builder.set_begin()?;
        let mut count = 0u64;
        while self.peek()? != tag::END_SET {
            self.value(inner)?;
            count += 1;
        }
        self.input = &self.input[1..];
        if read_varint(&mut self.input)? != count {
            return Err(DecodeError::SetElementCountMismatch);
        }
        self.builder.set_end()
    }

    fn pairs(&mut self, inner: usize, end: u8) -> Result<u64, DecodeError> {
        let mut count = 0u64;
        while self.peek()? != end {
            self.value(inner)?;
            self.value(inner)?;
            count += 1;
        }
        self.input = &self.input[1..];
        Ok(count)
    }

    /// `r [EFRSTU]? (m string)? (s string)? (c any)? .`
    ///
    /// 子字段只能按 message、stack、cause 的顺序出现，`stage` 只向前推进。
    fn error(&mut self, depth: usize) -> Result<(), DecodeError> {
        let inner = nest(depth)?;
        let mut sub = self.byte()?;
        let prototype = ErrorPrototype::from_tag(sub);
        if prototype.is_some() {
            sub = self.byte()?;
        }
        self.builder.error_begin(prototype)?;
        let mut stage = 0u8;
        loop {
            let next = match sub {
                tag::error::END => break,
                tag::error::MESSAGE => 1,
                tag::error::STACK => 2,
                tag::error::CAUSE => 3,
                _ => return Err(DecodeError::BadErrorObject),
            };
            if next <= stage {
                return Err(DecodeError::BadErrorObject);
            }
            stage = next;
            match sub {
                tag::error::MESSAGE => {
                    self.builder.string_utf8(b"message")?;
                    if !tag::is_string_tag(self.peek()?) {
                        return Err(DecodeError::ErrorMessageNotString);
                    }
                }
                tag::error::STACK => {
                    self.builder.string_utf8(b"stack")?;
                    if !tag::is_string_tag(self.peek()?) {
                        return Err(DecodeError::ErrorStackNotString);
                    }
                }
                _ => self.builder.string_utf8(b"cause")?,
            }
            self.value(inner)?;
            sub = self.byte()?;
        }
        self.builder.error_end()
    }

    fn bigint(&mut self) -> Result<(), DecodeError> {
        let bitfield = read_varint(&mut self.input)?;
        let negative = bitfield & 1 == 1;
        let len = bitfield >> 1;
        if len % 8 != 0 {
            return Err(DecodeError::BadBigInt);
        }
        if negative && len == 0 {
            return Err(DecodeError::NegativeZeroBigInt);
        }
        let magnitude = self.take(len)?;
        self.builder.bigint(magnitude, negative)
    }

    fn string(&mut self, tag: u8) -> Result<(), DecodeError> {
        let len = read_varint(&mut self.input)?;
        let bytes = self.take(len)?;
        match tag {
            tag::LATIN1_STRING => self.builder.string_latin1(bytes),
            tag::UTF8_STRING => self.builder.string_utf8(bytes),
            _ => {
                if bytes.len() % 2 != 0 {
                    return Err(DecodeError::BadUtf16Size);
                }
                if tag::is_function_marker(bytes) {
                    self.builder.function_marker()
                } else {
                    self.builder.string_utf16(bytes)
                }
            }
        }
    }

    /// 跳过可选的 `V` 视图：子标签加 byteOffset、byteLength、flags 三个 varint。
    fn skip_view(&mut self) -> Result<(), DecodeError> {
        if self.input.len() < 2 || self.input[0] != tag::ARRAY_BUFFER_VIEW {
            return Ok(());
        }
        let subtag = self.input[1];
        if !tag::ARRAY_BUFFER_VIEW_SUBTAGS.contains(&subtag) {
            return Err(DecodeError::BadTypedArray);
        }
        self.input = &self.input[2..];
        for _ in 0..3 {
            read_varint(&mut self.input)?;
        }
        Ok(())
    }

    fn double(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        let value = f64::from_le_bytes(raw);
        if value.is_nan() {
            Ok(f64::from_le_bytes(tag::CANONICAL_NAN))
        } else {
            Ok(value)
        }
    }

    fn take(&mut self, len: u64) -> Result<&'i [u8], DecodeError> {
        let len = usize::try_from(len).map_err(|_| DecodeError::TooShort)?;
        if self.input.len() < len {
            return Err(DecodeError::TooShort);
        }
        let (head, rest) = self.input.split_at(len);
        self.input = rest;
        Ok(head)
    }

    fn peek(&self) -> Result<u8, DecodeError> {
        self.input.first().copied().ok_or(DecodeError::TooShort)
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        let byte = self.peek()?;
        self.input = &self.input[1..];
        Ok(byte)
    }
}

fn nest(depth: usize) -> Result<usize, DecodeError> {
    if depth >= MAX_DEPTH {
        return Err(DecodeError::TooMuchRecursion);
    }
    Ok(depth + 1)
}
