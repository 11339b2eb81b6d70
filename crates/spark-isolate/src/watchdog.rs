//! 单次操作的超时看门狗。
//!
//! # 教案式说明
//! - **意图（Why）**：脚本可能陷入死循环，宿主需要在截止时间到达时从外部打断引擎；
//! - **逻辑（How）**：`arm` 派生一个线程，在自己的 `Mutex`/`Condvar` 上以绝对截止时间等待，
//!   期间被取消则直接退出，否则调用 [`Terminate::terminate`]；
//! - **契约（What）**：
//!   - [`Watchdog::disarm`] 取消、唤醒并 join，返回看门狗是否已经触发；
//!   - `Drop` 等价于 `disarm`；
//!   - 线程创建失败时返回 `None` 并记录告警，调用方在无保护状态下继续执行。

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::engine::Terminate;

#[derive(Debug, Default)]
struct Shared {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

#[derive(Debug)]
pub struct Watchdog {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<bool>>,
}

impl Watchdog {
    pub fn arm(timeout: Duration, terminator: Arc<dyn Terminate>) -> Option<Self> {
        let shared = Arc::new(Shared::default());
        let deadline = Instant::now() + timeout;
        let worker = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name("spark-isolate-watchdog".into())
            .spawn(move || {
                let mut cancelled = worker.cancelled.lock();
                while !*cancelled {
                    if worker.cv.wait_until(&mut cancelled, deadline).timed_out() {
                        if *cancelled {
                            return false;
                        }
                        info!(timeout_ms = timeout.as_millis() as u64, "watchdog fired");
                        terminator.terminate();
                        return true;
                    }
                }
                false
            });
        match spawned {
            Ok(handle) => Some(Self {
                shared,
                handle: Some(handle),
            }),
            Err(error) => {
                warn!(%error, "failed to spawn watchdog thread; running unguarded");
                None
            }
        }
    }

    /// 取消并回收线程，返回看门狗是否触发过。
    pub fn disarm(mut self) -> bool {
        self.cancel()
    }

    fn cancel(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };
        *self.shared.cancelled.lock() = true;
        self.shared.cv.notify_all();
        handle.join().unwrap_or(false)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}
