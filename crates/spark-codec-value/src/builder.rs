//! 解码端的数据流回调接口。
//!
//! # 教案式说明
//! - **意图（Why）**：解码器不知道宿主如何表示值，也不关心宿主的内存管理；它只按线上顺序
//!   报告"看到了什么"，由宿主在回调里拼装自己的对象；
//! - **逻辑（How）**：标量直接回调；容器以 `*_begin` / `*_end` 成对出现，其间的子值按顺序到达。
//!   对象、Map 与错误对象的子值按"键、值"交替出现；数组的具名属性包在
//!   `named_properties_begin` / `named_properties_end` 之间；
//! - **契约（What）**：
//!   - 任何回调返回 `Err` 都会立即终止解码并原样向上传递；
//!   - 开标签的出现顺序即回引编号，`object_ref(id)` 中的 `id` 由宿主自行解析；
//!   - 错误对象内部以 `"message"`、`"stack"`、`"cause"` 三个 UTF-8 键报告字段。

use crate::error::DecodeError;

/// 数组开标签的种类。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArrayKind {
    /// `A`：稠密数组，携带元素个数。
    Dense { length: u64 },
    /// `a`：稀疏数组，携带逻辑长度；元素被压缩为连续序列。
    Sparse { length: u64 },
}

/// 错误对象的原型，对应 `r` 之后可选的单字节子标签。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorPrototype {
    Eval,
    Range,
    Reference,
    Syntax,
    Type,
    Uri,
}

impl ErrorPrototype {
    pub fn from_tag(tag: u8) -> Option<Self> {
        use crate::tag::error::*;
        match tag {
            EVAL_PROTOTYPE => Some(Self::Eval),
            RANGE_PROTOTYPE => Some(Self::Range),
            REFERENCE_PROTOTYPE => Some(Self::Reference),
            SYNTAX_PROTOTYPE => Some(Self::Syntax),
            TYPE_PROTOTYPE => Some(Self::Type),
            URI_PROTOTYPE => Some(Self::Uri),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        use crate::tag::error::*;
        match self {
            Self::Eval => EVAL_PROTOTYPE,
            Self::Range => RANGE_PROTOTYPE,
            Self::Reference => REFERENCE_PROTOTYPE,
            Self::Syntax => SYNTAX_PROTOTYPE,
            Self::Type => TYPE_PROTOTYPE,
            Self::Uri => URI_PROTOTYPE,
        }
    }

    /// 构造函数名，例如 `"TypeError"`。
    pub fn name(self) -> &'static str {
        match self {
            Self::Eval => "EvalError",
            Self::Range => "RangeError",
            Self::Reference => "ReferenceError",
            Self::Syntax => "SyntaxError",
            Self::Type => "TypeError",
            Self::Uri => "URIError",
        }
    }
}

/// 解码器驱动的宿主构建器。
pub trait Builder {
    fn null(&mut self) -> Result<(), DecodeError>;
    fn undefined(&mut self) -> Result<(), DecodeError>;
    fn bool(&mut self, value: bool) -> Result<(), DecodeError>;
    fn int(&mut self, value: i64) -> Result<(), DecodeError>;
    /// NaN 已被归一化为规范位模式。
    fn num(&mut self, value: f64) -> Result<(), DecodeError>;
    /// 自 UNIX 纪元起的毫秒数。
    fn date(&mut self, millis: f64) -> Result<(), DecodeError>;
    /// `magnitude` 为小端字节，长度是 8 的倍数；零的长度为 0 且 `negative` 恒为假。
    fn bigint(&mut self, magnitude: &[u8], negative: bool) -> Result<(), DecodeError>;
    fn string_utf8(&mut self, bytes: &[u8]) -> Result<(), DecodeError>;
    fn string_latin1(&mut self, bytes: &[u8]) -> Result<(), DecodeError>;
    /// `bytes` 为 UTF-16LE，长度保证为偶数。
    fn string_utf16(&mut self, bytes: &[u8]) -> Result<(), DecodeError>;
    fn function_marker(&mut self) -> Result<(), DecodeError>;
    fn array_buffer(&mut self, bytes: &[u8]) -> Result<(), DecodeError>;

    fn array_begin(&mut self, kind: ArrayKind) -> Result<(), DecodeError>;
    fn array_end(&mut self) -> Result<(), DecodeError>;
    fn named_properties_begin(&mut self) -> Result<(), DecodeError>;
    fn named_properties_end(&mut self) -> Result<(), DecodeError>;
    fn object_begin(&mut self) -> Result<(), DecodeError>;
    fn object_end(&mut self) -> Result<(), DecodeError>;
    fn map_begin(&mut self) -> Result<(), DecodeError>;
    fn map_end(&mut self) -> Result<(), DecodeError>;
    fn set_begin(&mut self) -> Result<(), DecodeError>;
    fn set_end(&mut self) -> Result<(), DecodeError>;
    fn error_begin(&mut self, prototype: Option<ErrorPrototype>) -> Result<(), DecodeError>;
    fn error_end(&mut self) -> Result<(), DecodeError>;

    /// 回引到第 `id` 个已打开的容器。
    fn object_ref(&mut self, id: u64) -> Result<(), DecodeError>;
}
