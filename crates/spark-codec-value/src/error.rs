//! 编解码错误域。
//!
//! # 教案式说明
//! - **意图（Why）**：每类失败只对应一条简短诊断，宿主可直接把 `Display` 文本转交给上层异常；
//! - **契约（What）**：所有变体均为 `Clone + Eq`，可在粘滞错误槽里原样保存并多次返回；
//! - **权衡（Trade-offs）**：`OutOfRange` 等变体携带原始数值而非格式化后的字符串，避免在 `no_std`
//!   环境下为错误路径额外分配。

use alloc::string::String;

use thiserror::Error;

/// 编码阶段的失败。
///
/// 编码器只记录第一次失败，后续发射调用全部忽略。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum EncodeError {
    /// 整数超出 `(i64::MIN/1024, i64::MAX/1024]`，既不能写成 int32 也不能无损降级为 double。
    #[error("out of range: {0}")]
    OutOfRange(i64),
    /// BigInt 幅值字节数不是 8 的倍数。
    #[error("bad bigint")]
    BadBigInt,
    /// 宿主值在线上格式中没有对应表示。
    #[error("unsupported value: {0}")]
    Unsupported(String),
    /// 缓冲扩容失败或超过 `u32::MAX` 字节。
    #[error("out of memory")]
    OutOfMemory,
}

/// 解码阶段的失败，首个错误即终止解码。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum DecodeError {
    #[error("input too short")]
    TooShort,
    #[error("bad header")]
    BadHeader,
    #[error("bad version")]
    BadVersion,
    #[error("bad varint")]
    BadVarint,
    /// 未知标签，可打印字符按字符显示，其余按十六进制显示。
    #[error("bad tag: {}", DisplayTag(.0))]
    BadTag(u8),
    #[error("array property count mismatch")]
    ArrayPropertyCountMismatch,
    #[error("array element count mismatch")]
    ArrayElementCountMismatch,
    #[error("element count mismatch")]
    SparseElementCountMismatch,
    #[error("object properties count mismatch")]
    ObjectPropertyCountMismatch,
    #[error("map element count mismatch")]
    MapElementCountMismatch,
    #[error("set element count mismatch")]
    SetElementCountMismatch,
    #[error("bad bigint")]
    BadBigInt,
    #[error("negative zero bigint")]
    NegativeZeroBigInt,
    #[error("bad utf16 string size")]
    BadUtf16Size,
    #[error("bad typed array")]
    BadTypedArray,
    #[error("bad regexp")]
    BadRegExp,
    #[error("bad string object")]
    BadStringObject,
    #[error("error .message is not a string")]
    ErrorMessageNotString,
    #[error("error .stack is not a string")]
    ErrorStackNotString,
    #[error("bad error object")]
    BadErrorObject,
    /// 回引指向尚未打开过的容器。
    #[error("bad object reference: {0}")]
    BadReference(u64),
    #[error("too much recursion")]
    TooMuchRecursion,
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    /// Builder 在当前帧中收到不合法的事件，例如对象键位置出现了容器结束。
    #[error("bad builder state: {0}")]
    BadState(&'static str),
}

struct DisplayTag<'a>(&'a u8);

impl core::fmt::Display for DisplayTag<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let tag = *self.0;
        if tag > 32 && tag < 127 {
            write!(f, "{}", tag as char)
        } else {
            write!(f, "{tag:02x}")
        }
    }
}
