//! 默认日志订阅器。
//!
//! 进程内只安装一次 `tracing-subscriber` 的 fmt 订阅器，过滤规则取自 `RUST_LOG`，缺省为 `info`。
//! 外部已设置全局订阅器时安装失败，但不会 panic。

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// 安装默认订阅器，返回本进程内的订阅器是否由本函数安装。
pub fn install_default() -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
            .is_ok()
    })
}
