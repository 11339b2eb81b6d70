//! 进程级引擎标志。
//!
//! 标志在第一个引擎创建前可以反复追加；一旦冻结，后续修改返回
//! [`PlatformError::AlreadyInitialized`]。`--single-threaded` 同时决定未显式配置执行模式的
//! 通道是否走内联模式。

use std::sync::OnceLock;

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::ExecutionMode;

pub const SINGLE_THREADED_FLAG: &str = "--single-threaded";

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum PlatformError {
    #[error("platform already initialized")]
    AlreadyInitialized,
    #[error("invalid engine flag: {0:?}")]
    InvalidFlag(String),
}

#[derive(Debug, Default)]
struct Flags {
    values: Vec<String>,
    frozen: bool,
}

fn flags() -> &'static Mutex<Flags> {
    static FLAGS: OnceLock<Mutex<Flags>> = OnceLock::new();
    FLAGS.get_or_init(Mutex::default)
}

/// 统一为 `--name[=value]` 形式。
fn normalize(flag: &str) -> Result<String, PlatformError> {
    let trimmed = flag.trim();
    let name = trimmed.trim_start_matches('-');
    if name.is_empty() || name.starts_with('=') || name.chars().any(char::is_whitespace) {
        return Err(PlatformError::InvalidFlag(flag.to_owned()));
    }
    Ok(format!("--{name}"))
}

/// 追加引擎标志；重复项只保留第一次出现。
pub fn set_flags<S: AsRef<str>>(new_flags: &[S]) -> Result<(), PlatformError> {
    let normalized = new_flags
        .iter()
        .map(|flag| normalize(flag.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let mut guard = flags().lock();
    if guard.frozen {
        return Err(PlatformError::AlreadyInitialized);
    }
    for flag in normalized {
        if !guard.values.contains(&flag) {
            guard.values.push(flag);
        }
    }
    Ok(())
}

/// 当前标志快照。
pub fn current_flags() -> Vec<String> {
    flags().lock().values.clone()
}

pub fn is_frozen() -> bool {
    flags().lock().frozen
}

/// 冻结并返回最终标志；创建引擎时调用。
pub(crate) fn freeze() -> Vec<String> {
    let mut guard = flags().lock();
    guard.frozen = true;
    guard.values.clone()
}

/// 依据标志推导默认执行模式。
pub(crate) fn default_execution(flags: &[String]) -> ExecutionMode {
    if flags.iter().any(|flag| flag == SINGLE_THREADED_FLAG) {
        ExecutionMode::SingleThreaded
    } else {
        ExecutionMode::Threaded
    }
}
