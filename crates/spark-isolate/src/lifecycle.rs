//! 通道释放轴：`Running → Disposing → Freed`，只进不退。
//!
//! # 教案式说明
//! - **意图（Why）**：宿主线程、工作线程与释放线程都要读取"通道是否还活着"，
//!   状态存放在单个原子里，读取方无需持锁；
//! - **逻辑（How）**：[`Lifecycle::advance`] 以 CAS 循环推进，目标不大于当前阶段时不写入；
//! - **契约（What）**：阶段单调；`advance` 返回推进前的阶段，调用方据此判断自己是否是第一个推进者。
//!
//! 在 `cfg(loom)`/`cfg(spark_loom)` 下原子类型换成 loom 版本，供模型测试穷举交错。

#[cfg(not(any(loom, spark_loom)))]
use core::sync::atomic::{AtomicU8, Ordering};
#[cfg(any(loom, spark_loom))]
use loom::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Phase {
    Running = 0,
    Disposing = 1,
    Freed = 2,
}

impl Phase {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Disposing,
            _ => Self::Freed,
        }
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    phase: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Running as u8),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_raw(self.phase.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// 推进到 `target`，返回推进前的阶段。
    pub fn advance(&self, target: Phase) -> Phase {
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            if current >= target as u8 {
                return Phase::from_raw(current);
            }
            match self.phase.compare_exchange(
                current,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return Phase::from_raw(previous),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(all(test, not(any(loom, spark_loom))))]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.is_running());
        assert_eq!(lifecycle.advance(Phase::Disposing), Phase::Running);
        assert_eq!(lifecycle.advance(Phase::Running), Phase::Disposing);
        assert_eq!(lifecycle.phase(), Phase::Disposing);
        assert_eq!(lifecycle.advance(Phase::Freed), Phase::Disposing);
        assert_eq!(lifecycle.advance(Phase::Disposing), Phase::Freed);
        assert_eq!(lifecycle.phase(), Phase::Freed);
    }
}
