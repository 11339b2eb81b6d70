//! 引擎接缝：通道只通过 [`Engine`] 驱动脚本引擎。
//!
//! # 教案式说明
//! - **意图（Why）**：会合通道、看门狗与分发器不依赖任何具体引擎；真实引擎与测试用的脚本化引擎
//!   实现同一个 trait 即可接入；
//! - **逻辑（How）**：
//!   - 引擎在工作线程（内联模式下为调用方线程）上由工厂创建，此后只被分发器访问；
//!   - 会执行脚本的操作拿到一个 [`EngineScope`]，可借它回调宿主，回调期间宿主又可以嵌套发起新请求，
//!     因此所有方法都接收 `&self`，实现者需要自行处理重入；
//!   - [`Engine::terminator`] 返回的句柄可以在任意线程上调用，用于超时与 `stop`；
//! - **契约（What）**：
//!   - `call`/`eval` 被中断时返回 [`ErrorClass::Terminated`](crate::ErrorClass::Terminated)
//!     类别的 [`ScriptError`]；
//!   - 分发器在被中断的操作结束后调用 [`Engine::cancel_termination`]，下一次操作从干净状态开始。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use spark_codec_value::{ByteBuffer, Encoder, GraphWriter, NodeId, ValueGraph};

use crate::dispatcher::Dispatcher;
use crate::error::ScriptError;
use crate::protocol::{CALLBACK, EXCEPTION};

/// 宿主回调在引擎侧的编号。
pub type CallbackId = u32;

/// 可跨线程调用的协作式中断。
pub trait Terminate: Send + Sync {
    fn terminate(&self);
}

/// 以原子布尔实现的可复位中断标志，引擎在执行循环中轮询它。
#[derive(Clone, Debug, Default)]
pub struct TerminationFlag {
    raised: Arc<AtomicBool>,
}

impl TerminationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminating(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// 清除标志，返回清除前是否已置位。
    pub fn reset(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }
}

impl Terminate for TerminationFlag {
    fn terminate(&self) {
        self.raised.store(true, Ordering::Release);
    }
}

/// 传给引擎工厂的创建参数。
#[derive(Clone, Debug, Default)]
pub struct EngineOptions {
    pub max_memory: Option<u64>,
    pub verbose_exceptions: bool,
    pub snapshot: Option<Arc<[u8]>>,
    /// 已冻结的平台标志。
    pub flags: Vec<String>,
}

/// 引擎堆统计。字段顺序即线上对象的属性顺序。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeapStats {
    pub total_physical_size: f64,
    pub total_available_size: f64,
    pub total_heap_size: f64,
    pub total_heap_size_executable: f64,
    pub used_heap_size: f64,
    pub heap_size_limit: f64,
    pub malloced_memory: f64,
    pub peak_malloced_memory: f64,
    pub external_memory: f64,
    pub number_of_native_contexts: f64,
    pub number_of_detached_contexts: f64,
    pub total_global_handles_size: f64,
    pub used_global_handles_size: f64,
}

impl HeapStats {
    pub const FIELD_COUNT: usize = 13;

    pub fn fields(&self) -> [(&'static str, f64); Self::FIELD_COUNT] {
        [
            ("total_physical_size", self.total_physical_size),
            ("total_available_size", self.total_available_size),
            ("total_heap_size", self.total_heap_size),
            ("total_heap_size_executable", self.total_heap_size_executable),
            ("used_heap_size", self.used_heap_size),
            ("heap_size_limit", self.heap_size_limit),
            ("malloced_memory", self.malloced_memory),
            ("peak_malloced_memory", self.peak_malloced_memory),
            ("external_memory", self.external_memory),
            ("number_of_native_contexts", self.number_of_native_contexts),
            ("number_of_detached_contexts", self.number_of_detached_contexts),
            ("total_global_handles_size", self.total_global_handles_size),
            ("used_global_handles_size", self.used_global_handles_size),
        ]
    }

    /// 按字段名回填；未知字段被忽略。
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        let slot = match name {
            "total_physical_size" => &mut self.total_physical_size,
            "total_available_size" => &mut self.total_available_size,
            "total_heap_size" => &mut self.total_heap_size,
            "total_heap_size_executable" => &mut self.total_heap_size_executable,
            "used_heap_size" => &mut self.used_heap_size,
            "heap_size_limit" => &mut self.heap_size_limit,
            "malloced_memory" => &mut self.malloced_memory,
            "peak_malloced_memory" => &mut self.peak_malloced_memory,
            "external_memory" => &mut self.external_memory,
            "number_of_native_contexts" => &mut self.number_of_native_contexts,
            "number_of_detached_contexts" => &mut self.number_of_detached_contexts,
            "total_global_handles_size" => &mut self.total_global_handles_size,
            "used_global_handles_size" => &mut self.used_global_handles_size,
            _ => return false,
        };
        *slot = value;
        true
    }
}

/// 由通道驱动的脚本引擎。
pub trait Engine: Send {
    /// 可跨线程调用的中断句柄。
    fn terminator(&self) -> Arc<dyn Terminate>;

    /// 把编号为 `id` 的宿主回调挂到点分路径 `path` 上。
    fn attach(
        &self,
        scope: &mut EngineScope<'_>,
        path: &str,
        id: CallbackId,
    ) -> Result<(), ScriptError>;

    /// 调用点分路径 `path` 上的函数，参数为 `graph` 中的 `args`。
    fn call(
        &self,
        scope: &mut EngineScope<'_>,
        path: &str,
        graph: &ValueGraph,
        args: &[NodeId],
    ) -> Result<ValueGraph, ScriptError>;

    fn eval(
        &self,
        scope: &mut EngineScope<'_>,
        filename: &str,
        source: &str,
    ) -> Result<ValueGraph, ScriptError>;

    fn heap_stats(&self) -> HeapStats {
        HeapStats::default()
    }

    /// 堆快照的 JSON 文本；不支持时返回空。
    fn heap_snapshot(&self) -> Vec<u8> {
        Vec::new()
    }

    /// 处理一个待执行的任务，返回是否还有剩余任务。
    fn pump_message_loop(&self, _scope: &mut EngineScope<'_>) -> bool {
        false
    }

    fn low_memory_notification(&self) {}

    /// 执行 `code` 后生成启动快照。
    fn take_snapshot(&self, _code: &str) -> Result<Vec<u8>, ScriptError> {
        Err(ScriptError::internal("snapshots are not supported"))
    }

    /// 以 `blob` 启动、执行 `code` 预热后重新生成快照。
    fn warm_up_snapshot(&self, _blob: &[u8], _code: &str) -> Result<Vec<u8>, ScriptError> {
        Err(ScriptError::internal("snapshots are not supported"))
    }

    /// 清除中断状态，使下一次操作可以正常执行。
    fn cancel_termination(&self) {}
}

/// 引擎与宿主之间一次往返的传输方式。
pub(crate) trait Link {
    /// 设置当前应答；覆盖尚未送出的旧应答。
    fn reply(&mut self, response: ByteBuffer);

    /// 送出当前应答（此时它是一个回调请求），等待宿主的下一条消息。
    fn roundtrip(&mut self) -> ByteBuffer;
}

/// 引擎操作期间可用的宿主回调入口。
pub struct EngineScope<'a> {
    link: &'a mut dyn Link,
    dispatcher: &'a Dispatcher,
}

impl<'a> EngineScope<'a> {
    pub(crate) fn new(link: &'a mut dyn Link, dispatcher: &'a Dispatcher) -> Self {
        Self { link, dispatcher }
    }

    pub(crate) fn reply(&mut self, response: ByteBuffer) {
        self.link.reply(response);
    }

    /// 调用宿主回调 `id`，返回宿主给出的值。
    ///
    /// # 教案式说明
    /// - **逻辑（How）**：编码 `c` + `[args..., id]` 作为应答送出，随后循环等待宿主：
    ///   - `c` 开头：回调完成，解码返回值；
    ///   - `e`：宿主回调抛出异常，触发中断并返回 `Terminated`，让脚本展开；
    ///   - 其他：宿主在回调内部发起的嵌套请求，就地分发后继续等待。
    /// - **契约（What）**：宿主异常本身由宿主保存并在外层调用返回后重新抛出，
    ///   引擎侧只看到一次中断。
    pub fn invoke_callback(
        &mut self,
        id: CallbackId,
        graph: &ValueGraph,
        args: &[NodeId],
    ) -> Result<ValueGraph, ScriptError> {
        let count = u32::try_from(args.len() + 1)
            .map_err(|_| ScriptError::internal("too many callback arguments"))?;
        let mut encoder = Encoder::request(CALLBACK);
        encoder.array_begin(count);
        let mut writer = GraphWriter::new(graph);
        for arg in args {
            writer.write(&mut encoder, *arg);
        }
        encoder.int(i64::from(id));
        encoder.array_end(count);
        let request = encoder
            .finish()
            .map_err(|error| ScriptError::internal(error.to_string()))?;
        self.link.reply(request);

        let dispatcher = self.dispatcher;
        loop {
            let message = self.link.roundtrip();
            match message.first() {
                Some(&CALLBACK) => {
                    return ValueGraph::decode(&message[1..])
                        .map_err(|error| ScriptError::internal(error.to_string()));
                }
                Some(&EXCEPTION) => {
                    dispatcher.terminator().terminate();
                    return Err(ScriptError::terminated());
                }
                _ => dispatcher.dispatch_in(self, &message),
            }
        }
    }
}
