//! 引擎实例配置。
//!
//! # 教案式说明
//! - **意图（Why）**：把超时、内存上限、空闲回收与执行模式集中在一个可从 TOML 加载的结构里，
//!   宿主不必在每个构造参数上各自做范围检查；
//! - **逻辑（How）**：`serde` 以 kebab-case 反序列化，缺省字段取 [`Default`]；
//!   [`IsolateConfig::validate`] 在创建通道前统一校验；
//! - **契约（What）**：
//!   - `timeout-ms`、`idle-gc-ms` 不得超过 `i32::MAX`，0 表示关闭；
//!   - `max-memory` 若给出必须落在 `(0, u32::MAX)`；
//!   - `worker-stack-size` 不小于 [`MIN_WORKER_STACK`]；
//!   - `execution` 缺省时跟随平台标志 `--single-threaded`。

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::snapshot::Snapshot;

/// 深度告警的默认间隔。
pub const DEFAULT_DEPTH_WARNING: u32 = 50;
/// 工作线程默认栈大小。
pub const DEFAULT_WORKER_STACK: usize = 8 * 1024 * 1024;
/// 工作线程栈的下限。
pub const MIN_WORKER_STACK: usize = 64 * 1024;

/// 引擎操作在哪个线程上执行。
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// 每个通道一个专用工作线程。
    Threaded,
    /// 引擎在调用方线程上内联运行。
    SingleThreaded,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("`{field}` out of range: {value} ({expected})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        expected: &'static str,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct IsolateConfig {
    /// 单次 call/eval 的超时；0 表示不限。
    pub timeout_ms: u64,
    /// 引擎堆上限（字节）。
    pub max_memory: Option<u64>,
    /// 空闲多久后触发一次低内存通知；0 表示关闭。
    pub idle_gc_ms: u64,
    /// 脚本异常是否附带堆栈。
    pub verbose_exceptions: bool,
    pub execution: Option<ExecutionMode>,
    /// 每递归多少层告警一次；0 关闭。
    pub callback_depth_warning: u32,
    pub worker_stack_size: usize,
    #[serde(skip)]
    pub snapshot: Option<Snapshot>,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 0,
            max_memory: None,
            idle_gc_ms: 0,
            verbose_exceptions: false,
            execution: None,
            callback_depth_warning: DEFAULT_DEPTH_WARNING,
            worker_stack_size: DEFAULT_WORKER_STACK,
            snapshot: None,
        }
    }
}

impl IsolateConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let i32_max = i32::MAX as u64;
        if self.timeout_ms > i32_max {
            return Err(ConfigError::OutOfRange {
                field: "timeout-ms",
                value: self.timeout_ms,
                expected: "at most 2147483647",
            });
        }
        if self.idle_gc_ms > i32_max {
            return Err(ConfigError::OutOfRange {
                field: "idle-gc-ms",
                value: self.idle_gc_ms,
                expected: "at most 2147483647",
            });
        }
        if let Some(max_memory) = self.max_memory
            && (max_memory == 0 || max_memory >= u64::from(u32::MAX))
        {
            return Err(ConfigError::OutOfRange {
                field: "max-memory",
                value: max_memory,
                expected: "between 1 and 4294967294",
            });
        }
        if self.worker_stack_size < MIN_WORKER_STACK {
            return Err(ConfigError::OutOfRange {
                field: "worker-stack-size",
                value: self.worker_stack_size as u64,
                expected: "at least 65536",
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn idle_gc(&self) -> Option<Duration> {
        (self.idle_gc_ms > 0).then(|| Duration::from_millis(self.idle_gc_ms))
    }

    pub(crate) fn snapshot_blob(&self) -> Option<Arc<[u8]>> {
        self.snapshot.as_ref().map(Snapshot::shared_blob)
    }
}
