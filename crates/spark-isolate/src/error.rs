//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总会合通道、引擎分发与宿主门面三层的失败语义，调用方只需面对一个 [`IsolateError`]；
//! - 脚本侧失败以"类别字符 + 文本"在线上传输，本模块负责它与 [`ScriptError`] 之间的互转。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，消息保持简短英文；
//! - `EncodeError`/`DecodeError`/`ConfigError`/`PlatformError` 都能通过 `?` 自动提升；
//! - [`IsolateError::is_terminated`] 区分"被看门狗或 `stop` 中断"与"脚本自己抛出"。

use core::fmt;

use spark_codec_value::{DecodeError, EncodeError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::platform::PlatformError;

/// 脚本侧失败的类别，线上以单个 ASCII 字符表示。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorClass {
    /// `I`：通道或分发器内部错误。
    Internal,
    /// `M`：引擎内存耗尽。
    Memory,
    /// `P`：源码解析失败。
    Parse,
    /// `R`：脚本运行时抛出。
    Runtime,
    /// `T`：执行被中断（超时或 `stop`）。
    Terminated,
}

impl ErrorClass {
    pub fn tag(self) -> u8 {
        match self {
            Self::Internal => b'I',
            Self::Memory => b'M',
            Self::Parse => b'P',
            Self::Runtime => b'R',
            Self::Terminated => b'T',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'I' => Some(Self::Internal),
            b'M' => Some(Self::Memory),
            b'P' => Some(Self::Parse),
            b'R' => Some(Self::Runtime),
            b'T' => Some(Self::Terminated),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Internal => "internal error",
            Self::Memory => "out of memory",
            Self::Parse => "parse error",
            Self::Runtime => "runtime error",
            Self::Terminated => "terminated",
        })
    }
}

/// 引擎一次操作的失败结果。
///
/// # 教案式说明
/// - **意图 (Why)**：引擎实现只需要给出类别与文本，不必了解线上格式；
/// - **契约 (What)**：[`ScriptError::to_wire`] 与 [`ScriptError::from_wire`] 互逆；空串表示"没有错误"；
/// - **权衡 (Trade-offs)**：未知类别字符被归入 [`ErrorClass::Internal`] 并保留整串文本，
///   不丢信息也不拒绝对端。
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("{class}: {message}")]
pub struct ScriptError {
    pub class: ErrorClass,
    pub message: String,
}

impl ScriptError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Runtime, message)
    }

    pub fn terminated() -> Self {
        Self::new(ErrorClass::Terminated, "execution terminated")
    }

    pub fn is_terminated(&self) -> bool {
        self.class == ErrorClass::Terminated
    }

    /// 线上形式：类别字符紧跟消息文本。
    pub fn to_wire(&self) -> String {
        let mut wire = String::with_capacity(self.message.len() + 1);
        wire.push(char::from(self.class.tag()));
        wire.push_str(&self.message);
        wire
    }

    /// 解析线上错误串；空串返回 `None`。
    pub fn from_wire(wire: &str) -> Option<Self> {
        let first = *wire.as_bytes().first()?;
        Some(match ErrorClass::from_tag(first) {
            Some(class) => Self::new(class, &wire[1..]),
            None => Self::internal(wire),
        })
    }
}

/// 宿主回调抛出的异常。
///
/// 回调失败时通道向引擎回复 `e`，引擎中断当前操作；调用返回后该异常被重新抛给宿主调用方。
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// spark-isolate 对外暴露的统一错误。
#[derive(Debug, Error)]
pub enum IsolateError {
    #[error("disposed context")]
    Disposed,
    #[error("{class}: {message}")]
    Script { class: ErrorClass, message: String },
    #[error("host callback failed: {0}")]
    HostCallback(#[source] CallbackError),
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine initialization failed: {0}")]
    Init(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl IsolateError {
    /// 操作是否因超时或 `stop` 被中断。
    pub fn is_terminated(&self) -> bool {
        matches!(
            self,
            Self::Script {
                class: ErrorClass::Terminated,
                ..
            }
        )
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// 脚本侧失败的类别，若有。
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Script { class, .. } => Some(*class),
            _ => None,
        }
    }
}

impl From<ScriptError> for IsolateError {
    fn from(error: ScriptError) -> Self {
        Self::Script {
            class: error.class,
            message: error.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_round_trips() {
        let error = ScriptError::runtime("boom");
        assert_eq!(error.to_wire(), "Rboom");
        assert_eq!(ScriptError::from_wire("Rboom"), Some(error));
        assert_eq!(ScriptError::from_wire(""), None);
    }

    #[test]
    fn unknown_class_keeps_text() {
        let error = ScriptError::from_wire("Xweird").expect("非空串必有错误");
        assert_eq!(error.class, ErrorClass::Internal);
        assert_eq!(error.message, "Xweird");
    }

    #[test]
    fn terminated_is_classified() {
        let error = IsolateError::from(ScriptError::terminated());
        assert!(error.is_terminated());
        assert_eq!(error.to_string(), "terminated: execution terminated");
        assert!(!IsolateError::Disposed.is_terminated());
        assert_eq!(IsolateError::Disposed.to_string(), "disposed context");
    }
}
