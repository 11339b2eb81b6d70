//! 粘滞错误编码器。
//!
//! # 教案式说明
//! - **意图（Why）**：宿主遍历一整棵值树时，逐个调用检查错误既啰嗦又容易遗漏；编码器把第一次失败
//!   记在内部槽里，此后所有发射调用都成为空操作，调用方在 [`Encoder::finish`] 统一处理；
//! - **逻辑（How）**：每次发射写入一个标签字节与其载荷；容器开标签同时递增
//!   [`Encoder::next_reference_id`]，供遍历器为共享子结构分配回引编号；
//! - **契约（What）**：
//!   - 超出 int32 的整数在 `(i64::MIN/1024, i64::MAX/1024]` 内自动降级为 double，否则失败；
//!   - NaN 与非有限日期写出规范 NaN 位模式；
//!   - BigInt 幅值按 8 字节字对齐、丢弃高位全零字，零写成单个 `0` 字节；
//!   - 结束标签的计数由调用方给出，编码器不做校验，计数错误会在解码端暴露。

use crate::buffer::ByteBuffer;
use crate::builder::ErrorPrototype;
use crate::error::EncodeError;
use crate::tag;
use crate::varint::{write_varint, zigzag_encode};

/// 标签字节流编码器。
#[derive(Debug)]
pub struct Encoder {
    buf: ByteBuffer,
    error: Option<EncodeError>,
    containers: u32,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    /// 创建只带信封的编码器。
    pub fn new() -> Self {
        let mut encoder = Self {
            buf: ByteBuffer::new(),
            error: None,
            containers: 0,
        };
        encoder.begin(None);
        encoder
    }

    /// 创建以操作码开头的请求编码器。
    pub fn request(opcode: u8) -> Self {
        let mut encoder = Self::new();
        encoder.begin(Some(opcode));
        encoder
    }

    /// 重置缓冲、错误与回引计数，写入可选的前缀字节与信封。
    pub fn begin(&mut self, opcode: Option<u8>) {
        self.buf.clear();
        self.error = None;
        self.containers = 0;
        if let Some(opcode) = opcode {
            self.byte(opcode);
        }
        self.write(&tag::ENVELOPE);
    }

    /// 第一次失败，若有。
    pub fn error(&self) -> Option<&EncodeError> {
        self.error.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// 下一个打开的容器将获得的回引编号。
    pub fn next_reference_id(&self) -> u32 {
        self.containers
    }

    /// 已写入的字节。
    pub fn bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// 记录一次失败；已有失败时保持第一次的错误。
    pub fn fail(&mut self, error: EncodeError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// 结束编码，返回缓冲或第一次失败。
    pub fn finish(self) -> Result<ByteBuffer, EncodeError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.buf),
        }
    }

    pub fn null(&mut self) {
        self.byte(tag::NULL);
    }

    pub fn undefined(&mut self) {
        self.byte(tag::UNDEFINED);
    }

    pub fn bool(&mut self, value: bool) {
        self.byte(if value { tag::TRUE } else { tag::FALSE });
    }

    pub fn int(&mut self, value: i64) {
        if self.is_failed() {
            return;
        }
        if value < i64::from(i32::MIN) || value > i64::from(i32::MAX) {
            if value > i64::MIN / 1024 && value <= i64::MAX / 1024 {
                self.num(value as f64);
            } else {
                self.fail(EncodeError::OutOfRange(value));
            }
            return;
        }
        self.byte(tag::INT32);
        self.varint(zigzag_encode(value));
    }

    pub fn num(&mut self, value: f64) {
        self.byte(tag::DOUBLE);
        self.double(value);
    }

    /// `millis` 为自 UNIX 纪元起的毫秒数；非有限值写成规范 NaN。
    pub fn date(&mut self, millis: f64) {
        self.byte(tag::DATE);
        if millis.is_finite() {
            self.write(&millis.to_le_bytes());
        } else {
            self.write(&tag::CANONICAL_NAN);
        }
    }

    /// `magnitude` 为小端字节，长度必须是 8 的倍数。
    pub fn bigint(&mut self, magnitude: &[u8], negative: bool) {
        if self.is_failed() {
            return;
        }
        if magnitude.len() % 8 != 0 {
            self.fail(EncodeError::BadBigInt);
            return;
        }
        let mut words = magnitude.len() / 8;
        while words > 0 && magnitude[(words - 1) * 8..words * 8].iter().all(|b| *b == 0) {
            words -= 1;
        }
        self.byte(tag::BIGINT);
        if words == 0 {
            self.byte(0);
            return;
        }
        let len = words * 8;
        self.varint(2 * len as u64 + u64::from(negative));
        self.write(&magnitude[..len]);
    }

    pub fn string_utf8(&mut self, value: &str) {
        self.string(tag::UTF8_STRING, value.as_bytes());
    }

    /// 原样写出 UTF-8 标签的字符串字节，不做校验；用于转发解码得到的字符串。
    pub fn string_utf8_bytes(&mut self, bytes: &[u8]) {
        self.string(tag::UTF8_STRING, bytes);
    }

    pub fn string_latin1(&mut self, bytes: &[u8]) {
        self.string(tag::LATIN1_STRING, bytes);
    }

    /// `bytes` 为 UTF-16LE，长度按字节计。
    pub fn string_utf16(&mut self, bytes: &[u8]) {
        if bytes.len() % 2 != 0 {
            self.fail(EncodeError::Unsupported("odd utf16 byte length".into()));
            return;
        }
        self.string(tag::UTF16_STRING, bytes);
    }

    /// 写出函数的不透明标记。
    pub fn function_marker(&mut self) {
        let mut units = [0u8; tag::FUNCTION_MARKER_UNITS.len() * 2];
        for (slot, unit) in units.chunks_exact_mut(2).zip(tag::FUNCTION_MARKER_UNITS) {
            slot.copy_from_slice(&unit.to_le_bytes());
        }
        self.string(tag::UTF16_STRING, &units);
    }

    pub fn array_buffer(&mut self, bytes: &[u8]) {
        self.string(tag::ARRAY_BUFFER, bytes);
    }

    pub fn array_begin(&mut self, count: u32) {
        self.open(tag::BEGIN_DENSE_ARRAY);
        self.varint(u64::from(count));
    }

    /// `count` 为元素个数，具名属性个数写 0。
    pub fn array_end(&mut self, count: u32) {
        self.array_end_with_properties(0, count);
    }

    pub fn array_end_with_properties(&mut self, properties: u32, count: u32) {
        self.byte(tag::END_DENSE_ARRAY);
        self.varint(u64::from(properties));
        self.varint(u64::from(count));
    }

    pub fn object_begin(&mut self) {
        self.open(tag::BEGIN_OBJECT);
    }

    /// `count` 为属性（键值对）个数。
    pub fn object_end(&mut self, count: u32) {
        self.byte(tag::END_OBJECT);
        self.varint(u64::from(count));
    }

    pub fn object_ref(&mut self, id: u32) {
        self.byte(tag::OBJECT_REFERENCE);
        self.varint(u64::from(id));
    }

    pub fn map_begin(&mut self) {
        self.open(tag::BEGIN_MAP);
    }

    /// `pairs` 为键值对个数；线上写入的是键与值的总数。
    pub fn map_end(&mut self, pairs: u32) {
        self.byte(tag::END_MAP);
        self.varint(2 * u64::from(pairs));
    }

    pub fn set_begin(&mut self) {
        self.open(tag::BEGIN_SET);
    }

    pub fn set_end(&mut self, count: u32) {
        self.byte(tag::END_SET);
        self.varint(u64::from(count));
    }

    pub fn error_begin(&mut self, prototype: Option<ErrorPrototype>) {
        self.open(tag::ERROR);
        if let Some(prototype) = prototype {
            self.byte(prototype.tag());
        }
    }

    pub fn error_message(&mut self, message: &str) {
        self.byte(tag::error::MESSAGE);
        self.string_utf8(message);
    }

    pub fn error_stack(&mut self, stack: &str) {
        self.byte(tag::error::STACK);
        self.string_utf8(stack);
    }

    /// 写出 cause 子标签，调用方随后发射 cause 的值。
    pub fn error_cause(&mut self) {
        self.byte(tag::error::CAUSE);
    }

    pub fn error_end(&mut self) {
        self.byte(tag::error::END);
    }

    /// 原样追加已编码的字节。
    pub fn raw(&mut self, bytes: &[u8]) {
        self.write(bytes);
    }

    fn open(&mut self, tag: u8) {
        self.containers = self.containers.saturating_add(1);
        self.byte(tag);
    }

    fn string(&mut self, tag: u8, bytes: &[u8]) {
        self.byte(tag);
        self.varint(bytes.len() as u64);
        self.write(bytes);
    }

    fn double(&mut self, value: f64) {
        if value.is_nan() {
            self.write(&tag::CANONICAL_NAN);
        } else {
            self.write(&value.to_le_bytes());
        }
    }

    fn varint(&mut self, value: u64) {
        if self.is_failed() {
            return;
        }
        if let Err(error) = write_varint(&mut self.buf, value) {
            self.fail(error);
        }
    }

    fn byte(&mut self, byte: u8) {
        self.write(&[byte]);
    }

    fn write(&mut self, bytes: &[u8]) {
        if self.is_failed() {
            return;
        }
        if let Err(error) = self.buf.put(bytes) {
            self.fail(error);
        }
    }
}
