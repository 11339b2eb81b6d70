#![deny(unsafe_code)]

//! # spark-isolate
//!
//! ## 教案目的（Why）
//! - 在宿主线程与单线程脚本引擎之间提供同步的会合通道：宿主发出请求后阻塞等待，
//!   引擎执行期间可以回调宿主，宿主回调里又可以嵌套调用引擎；
//! - 以 [`Engine`] trait 隔离具体引擎，通道、看门狗与分发器只依赖这一接缝。
//!
//! ## 交互契约（What）
//! - 请求与应答使用 `spark-codec-value` 的线上格式，请求首字节为操作码；
//! - 同一通道上的调用严格串行，同线程的嵌套调用可重入；
//! - 配置了超时的 `call`/`eval` 在到期后被打断，错误类别为 [`ErrorClass::Terminated`]；
//! - 释放轴 `Running → Disposing → Freed` 单调推进，释放后的调用返回 [`IsolateError::Disposed`]。
//!
//! ## 实现策略（How）
//! - 线程模式下每个通道一个专用工作线程，内联模式（`--single-threaded`）下在调用方线程上直接分发；
//! - [`Context`] 是面向宿主的门面，负责编码参数、保存回调与重新抛出宿主异常。
//!
//! ## 风险提示（Trade-offs）
//! - 宿主回调执行期间整条调用链持有通道锁，其他线程的调用会等待；
//! - 被看门狗打断的引擎状态由引擎实现负责恢复。

mod channel;
pub mod config;
mod context;
mod dispatcher;
mod engine;
mod error;
pub mod lifecycle;
pub mod logging;
pub mod platform;
mod protocol;
mod snapshot;
mod watchdog;

pub use channel::{CallbackHost, ChannelOptions, RendezvousChannel};
pub use config::{ConfigError, ExecutionMode, IsolateConfig};
pub use context::{Callback, Context, DEFAULT_FILENAME};
pub use engine::{
    CallbackId, Engine, EngineOptions, EngineScope, HeapStats, Terminate, TerminationFlag,
};
pub use error::{CallbackError, ErrorClass, IsolateError, ScriptError};
pub use lifecycle::{Lifecycle, Phase};
pub use platform::PlatformError;
pub use protocol::{CALLBACK, EXCEPTION, Opcode};
pub use snapshot::Snapshot;
pub use watchdog::Watchdog;
