#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]

//! # spark-codec-value
//!
//! ## 教案目的（Why）
//! - 为宿主与脚本引擎之间的会合通道提供唯一的线上格式：带版本信封的标签字节流，
//!   可表达数字、三种编码的字符串、日期、大整数、稠密/稀疏数组、对象、Map、Set、错误对象、
//!   回引与不透明缓冲；
//! - 编码端与解码端都不持有"值"的联合体，而是通过 [`Encoder`] 的逐项发射调用与 [`Builder`]
//!   的数据流回调交换结构，宿主可以按自己的内存模型拼装结果。
//!
//! ## 交互契约（What）
//! - 信封固定为 `FF 0F`，请求消息在信封前多一个操作码字节；
//! - 容器（数组、对象、Map、Set、错误）按"开标签出现的顺序"编号，回引只能指向已经打开过的容器；
//! - 解码最多嵌套 [`MAX_DEPTH`] 层容器，超出即失败，调用方需要更深的结构时应自行拍平；
//! - [`ValueGraph`] 是参考宿主实现：以 arena + 下标表达共享子结构与自引用环。
//!
//! ## 实现策略（How）
//! - [`ByteBuffer`] 以 48 字节内联存储起步，扩容按 2 的幂增长，转移所有权时源缓冲清空；
//! - [`Encoder`] 采用粘滞错误：第一次失败后所有调用都成为空操作，调用方在 `finish` 时统一检查；
//! - [`decode`] 以显式深度计数递归下降，遇到第一处错误立即返回，不保留半成品。
//!
//! ## 风险提示（Trade-offs）
//! - TypedArray/DataView 视图标签只被识别并跳过，宿主只能拿到底层 ArrayBuffer；
//! - 函数只序列化为不透明标记，身份无法跨越边界保留。

extern crate alloc;

mod buffer;
mod builder;
mod decoder;
mod encoder;
mod error;
pub mod graph;
pub mod tag;
mod varint;

pub use buffer::{ByteBuffer, INLINE_CAPACITY, MAX_BUFFER_LEN};
pub use builder::{ArrayKind, Builder, ErrorPrototype};
pub use decoder::{MAX_DEPTH, decode};
pub use encoder::Encoder;
pub use error::{DecodeError, EncodeError};
pub use graph::{BigInt, GraphBuilder, GraphWriter, JsString, Node, NodeId, ValueGraph};
