//! 宿主与引擎之间的会合通道。
//!
//! # 教案式说明
//! - **意图（Why）**：引擎不是线程安全的，且脚本执行期间会回调宿主，宿主回调里又可能再调用引擎。
//!   通道把这些交互折叠成"同一时刻只有一方在运行"的严格交替，调用方看到的是一个同步函数；
//! - **逻辑（How）**：
//!   - 线程模式：宿主把请求放进槽位并唤醒工作线程，在条件变量上等待应答非空后取走；
//!     应答以 `c` 开头时执行宿主回调，把回复作为下一条请求继续等待；
//!   - 内联模式：分发器直接在调用方线程上运行，引擎的回调直接调用宿主处理器；
//!   - 递归调用锁保证跨线程调用串行，同线程嵌套调用可以重入；
//! - **契约（What）**：
//!   - 释放轴 `Running → Disposing → Freed` 单调推进；进入 `Disposing` 后新调用立即返回
//!     [`IsolateError::Disposed`]，请求缓冲被清空；
//!   - [`RendezvousChannel::dispose`] 等待槽位排空后才推进状态；
//!   - `Drop` 从不因卡死的引擎而阻塞：拿不到槽位锁时交给辅助线程完成唤醒；
//!   - [`RendezvousChannel::stop`] 不取调用锁，可在任意线程上打断正在执行的脚本。
//! - **权衡（Trade-offs）**：宿主回调期间外层调用锁一直被持有，其他线程的调用要等整条回调链结束。

use std::cell::Cell;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard, ReentrantMutex};
use spark_codec_value::ByteBuffer;
use tracing::{debug, warn};

use crate::config::{DEFAULT_DEPTH_WARNING, DEFAULT_WORKER_STACK, ExecutionMode};
use crate::dispatcher::Dispatcher;
use crate::engine::{Engine, Link, Terminate};
use crate::error::{IsolateError, ScriptError};
use crate::lifecycle::{Lifecycle, Phase};
use crate::protocol::CALLBACK;

/// 宿主侧的回调处理器。
pub trait CallbackHost {
    /// `request` 为 `c` + 信封 + `[args..., id]`；返回 `c` + 信封 + 值，或单字节 `e`。
    fn on_callback(&mut self, request: ByteBuffer) -> ByteBuffer;
}

impl<F> CallbackHost for F
where
    F: FnMut(ByteBuffer) -> ByteBuffer,
{
    fn on_callback(&mut self, request: ByteBuffer) -> ByteBuffer {
        self(request)
    }
}

#[derive(Clone, Debug)]
pub struct ChannelOptions {
    pub mode: ExecutionMode,
    pub timeout: Option<Duration>,
    pub idle_gc: Option<Duration>,
    /// 每递归多少层告警一次；0 关闭。
    pub depth_warning: u32,
    pub stack_size: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Threaded,
            timeout: None,
            idle_gc: None,
            depth_warning: DEFAULT_DEPTH_WARNING,
            stack_size: DEFAULT_WORKER_STACK,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    req: ByteBuffer,
    res: ByteBuffer,
}

struct Mailbox {
    slot: Mutex<Slot>,
    cv: Condvar,
    lifecycle: Lifecycle,
    idle_gc: Option<Duration>,
}

struct CallState {
    depth: Cell<u32>,
    folded: Option<Dispatcher>,
}

/// 离开作用域时把递归深度减一。
struct DepthGuard<'a>(&'a Cell<u32>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

pub struct RendezvousChannel {
    calls: ReentrantMutex<CallState>,
    mailbox: Arc<Mailbox>,
    terminator: Arc<dyn Terminate>,
    mode: ExecutionMode,
    depth_warning: u32,
}

impl RendezvousChannel {
    /// 创建通道并在目标线程上构造引擎。
    ///
    /// 线程模式下工厂在新建的工作线程上运行，构造完成（或失败）后才返回；
    /// 内联模式下工厂直接在当前线程上运行。
    pub fn start<F>(options: ChannelOptions, factory: F) -> Result<Self, IsolateError>
    where
        F: FnOnce() -> Result<Box<dyn Engine>, ScriptError> + Send + 'static,
    {
        let mailbox = Arc::new(Mailbox {
            slot: Mutex::new(Slot::default()),
            cv: Condvar::new(),
            lifecycle: Lifecycle::new(),
            idle_gc: options.idle_gc,
        });
        let (terminator, folded) = match options.mode {
            ExecutionMode::SingleThreaded => {
                let engine = factory().map_err(|error| IsolateError::Init(error.to_string()))?;
                let dispatcher = Dispatcher::new(engine, options.timeout);
                (Arc::clone(dispatcher.terminator()), Some(dispatcher))
            }
            ExecutionMode::Threaded => (spawn_worker(&mailbox, &options, factory)?, None),
        };
        Ok(Self {
            calls: ReentrantMutex::new(CallState {
                depth: Cell::new(0),
                folded,
            }),
            mailbox,
            terminator,
            mode: options.mode,
            depth_warning: options.depth_warning,
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.mailbox.lifecycle.phase()
    }

    pub fn is_disposed(&self) -> bool {
        !self.mailbox.lifecycle.is_running()
    }

    /// 发送一条请求并等待最终应答，期间引擎发起的回调交给 `host` 处理。
    pub fn call(
        &self,
        mut request: ByteBuffer,
        host: &mut dyn CallbackHost,
    ) -> Result<ByteBuffer, IsolateError> {
        if self.is_disposed() {
            request.clear();
            return Err(IsolateError::Disposed);
        }
        if request.is_empty() {
            return Err(IsolateError::Protocol("empty request".into()));
        }
        let calls = self.calls.lock();
        // 按进入前已在进行的层数判断：超过阈值的那一层才告警。
        let depth = calls.depth.get();
        if self.depth_warning > 0 && depth > 0 && depth % self.depth_warning == 0 {
            warn!(depth, "deep host/engine callback recursion");
        }
        calls.depth.set(depth + 1);
        let _depth = DepthGuard(&calls.depth);

        match &calls.folded {
            Some(dispatcher) => {
                if self.is_disposed() {
                    request.clear();
                    return Err(IsolateError::Disposed);
                }
                let mut link = FoldedLink {
                    response: ByteBuffer::new(),
                    host,
                };
                dispatcher.dispatch(&mut link, &request);
                Ok(link.response)
            }
            None => {
                let mut response = self.exchange(request, true)?;
                while response.first() == Some(&CALLBACK) {
                    let reply = host.on_callback(response);
                    response = self.exchange(reply, false)?;
                }
                Ok(response)
            }
        }
    }

    /// 一次槽位交换：放入请求，等待应答。
    ///
    /// 只有新请求检查释放状态；回调链中的后续回复必须送达，否则引擎会停在等待中。
    fn exchange(&self, mut request: ByteBuffer, fresh: bool) -> Result<ByteBuffer, IsolateError> {
        let mailbox = &*self.mailbox;
        let mut slot = mailbox.slot.lock();
        if fresh && !mailbox.lifecycle.is_running() {
            request.clear();
            return Err(IsolateError::Disposed);
        }
        request.move_into(&mut slot.req);
        mailbox.cv.notify_all();
        while slot.res.is_empty() {
            mailbox.cv.wait(&mut slot);
        }
        let response = slot.res.take();
        mailbox.cv.notify_all();
        Ok(response)
    }

    /// 打断正在执行的脚本；不取调用锁。
    pub fn stop(&self) -> Result<(), IsolateError> {
        if self.is_disposed() {
            return Err(IsolateError::Disposed);
        }
        self.terminator.terminate();
        Ok(())
    }

    /// 进入 `Disposing`：等待进行中的交换排空，随后工作线程退出。
    pub fn dispose(&self) {
        let mailbox = &*self.mailbox;
        if self.mode == ExecutionMode::SingleThreaded {
            let _calls = self.calls.lock();
            if mailbox.lifecycle.advance(Phase::Disposing) == Phase::Running {
                debug!("rendezvous channel disposed");
            }
            return;
        }
        let mut slot = mailbox.slot.lock();
        while !slot.req.is_empty() || !slot.res.is_empty() {
            mailbox.cv.wait(&mut slot);
        }
        if mailbox.lifecycle.advance(Phase::Disposing) == Phase::Running {
            debug!("rendezvous channel disposed");
        }
        mailbox.cv.notify_all();
    }
}

impl Drop for RendezvousChannel {
    fn drop(&mut self) {
        self.mailbox.lifecycle.advance(Phase::Freed);
        if let Some(dispatcher) = self.calls.get_mut().folded.take() {
            let spawned = thread::Builder::new()
                .name("spark-isolate-free".into())
                .spawn(move || drop(dispatcher));
            match spawned {
                Ok(_) => debug!("engine released on helper thread"),
                Err(error) => warn!(%error, "failed to spawn release thread; released inline"),
            }
            return;
        }
        if let Some(_slot) = self.mailbox.slot.try_lock() {
            self.mailbox.cv.notify_all();
            return;
        }
        // 工作线程仍持有槽位锁，由辅助线程等它放手后唤醒。
        let mailbox = Arc::clone(&self.mailbox);
        let spawned = thread::Builder::new()
            .name("spark-isolate-free".into())
            .spawn(move || {
                let _slot = mailbox.slot.lock();
                mailbox.cv.notify_all();
            });
        match spawned {
            Ok(_) => debug!("deferred worker wake-up to helper thread"),
            Err(error) => warn!(%error, "failed to spawn release thread"),
        }
    }
}

fn spawn_worker<F>(
    mailbox: &Arc<Mailbox>,
    options: &ChannelOptions,
    factory: F,
) -> Result<Arc<dyn Terminate>, IsolateError>
where
    F: FnOnce() -> Result<Box<dyn Engine>, ScriptError> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);
    let worker_mailbox = Arc::clone(mailbox);
    let timeout = options.timeout;
    thread::Builder::new()
        .name("spark-isolate-worker".into())
        .stack_size(options.stack_size)
        .spawn(move || {
            let engine = match factory() {
                Ok(engine) => engine,
                Err(error) => {
                    let _ = ready_tx.send(Err(error));
                    return;
                }
            };
            let dispatcher = Dispatcher::new(engine, timeout);
            if ready_tx.send(Ok(Arc::clone(dispatcher.terminator()))).is_err() {
                return;
            }
            debug!("engine worker started");
            serve(&worker_mailbox, &dispatcher);
            debug!("engine worker stopped");
        })
        .map_err(IsolateError::Spawn)?;
    match ready_rx.recv() {
        Ok(Ok(terminator)) => Ok(terminator),
        Ok(Err(error)) => Err(IsolateError::Init(error.to_string())),
        Err(_) => Err(IsolateError::Init(
            "engine thread exited during startup".into(),
        )),
    }
}

/// 工作线程主循环：持有槽位锁，只在等待时释放。
fn serve(mailbox: &Mailbox, dispatcher: &Dispatcher) {
    let mut slot = mailbox.slot.lock();
    let mut idle_pending = mailbox.idle_gc.is_some();
    while mailbox.lifecycle.is_running() {
        if slot.req.is_empty() {
            match mailbox.idle_gc {
                Some(idle) if idle_pending => {
                    let timed_out = mailbox.cv.wait_for(&mut slot, idle).timed_out();
                    if timed_out && slot.req.is_empty() && mailbox.lifecycle.is_running() {
                        dispatcher.idle_notification();
                        idle_pending = false;
                    }
                }
                _ => mailbox.cv.wait(&mut slot),
            }
            continue;
        }
        let request = slot.req.take();
        let mut link = ThreadedLink {
            slot: &mut slot,
            cv: &mailbox.cv,
        };
        dispatcher.dispatch(&mut link, &request);
        idle_pending = mailbox.idle_gc.is_some();
        mailbox.cv.notify_all();
    }
}

struct ThreadedLink<'g, 'm> {
    slot: &'g mut MutexGuard<'m, Slot>,
    cv: &'g Condvar,
}

impl Link for ThreadedLink<'_, '_> {
    fn reply(&mut self, response: ByteBuffer) {
        self.slot.res = response;
    }

    fn roundtrip(&mut self) -> ByteBuffer {
        self.slot.req.clear();
        self.cv.notify_all();
        while self.slot.req.is_empty() {
            self.cv.wait(self.slot);
        }
        self.slot.res.clear();
        self.slot.req.take()
    }
}

struct FoldedLink<'h> {
    response: ByteBuffer,
    host: &'h mut dyn CallbackHost,
}

impl Link for FoldedLink<'_> {
    fn reply(&mut self, response: ByteBuffer) {
        self.response = response;
    }

    fn roundtrip(&mut self) -> ByteBuffer {
        let request = self.response.take();
        self.host.on_callback(request)
    }
}
