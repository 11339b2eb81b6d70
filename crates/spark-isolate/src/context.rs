//! 宿主门面：把会合通道包装成按名字调用函数、求值源码的上下文。
//!
//! # 教案式说明
//! - **意图（Why）**：通道只搬运字节；宿主需要的是"注册回调、调用函数、拿回值"这样的接口；
//! - **逻辑（How）**：
//!   - 每个操作把参数编码成请求，经 [`RendezvousChannel::call`] 送出，再把应答解析成值或错误；
//!   - 注册的回调以下标为编号保存在上下文里，引擎回调时按编号找回并执行；
//!   - 回调失败时向引擎回复 `e`，异常暂存在本次调用的回调处理器里，等这次调用返回后重新抛出；
//! - **契约（What）**：
//!   - 回调闭包在上下文存活期间一直有效；
//!   - 回调里可以再次调用同一个上下文，嵌套层级互不串扰；
//!   - 宿主回调异常优先于引擎返回的中断错误。

use std::sync::Arc;

use parking_lot::Mutex;
use spark_codec_value::{ByteBuffer, Encoder, GraphWriter, NodeId, ValueGraph};
use tracing::debug;

use crate::channel::{CallbackHost, ChannelOptions, RendezvousChannel};
use crate::config::{ExecutionMode, IsolateConfig};
use crate::engine::{CallbackId, Engine, EngineOptions, HeapStats};
use crate::error::{CallbackError, IsolateError, ScriptError};
use crate::platform;
use crate::protocol::{self, CALLBACK, EXCEPTION, Opcode};

/// 宿主回调：接收参数图与参数下标，返回一个以根为结果的值图。
pub type Callback =
    dyn Fn(&ValueGraph, &[NodeId]) -> Result<ValueGraph, CallbackError> + Send + Sync;

pub const DEFAULT_FILENAME: &str = "<eval>";

pub struct Context {
    channel: RendezvousChannel,
    callbacks: Mutex<Vec<Arc<Callback>>>,
}

impl Context {
    /// 校验配置、冻结平台标志并启动引擎。
    pub fn new<E, F>(config: IsolateConfig, factory: F) -> Result<Self, IsolateError>
    where
        E: Engine + 'static,
        F: FnOnce(&EngineOptions) -> Result<E, ScriptError> + Send + 'static,
    {
        config.validate()?;
        let flags = platform::freeze();
        let mode = config
            .execution
            .unwrap_or_else(|| platform::default_execution(&flags));
        let options = EngineOptions {
            max_memory: config.max_memory,
            verbose_exceptions: config.verbose_exceptions,
            snapshot: config.snapshot_blob(),
            flags,
        };
        let channel = RendezvousChannel::start(
            ChannelOptions {
                mode,
                timeout: config.timeout(),
                idle_gc: config.idle_gc(),
                depth_warning: config.callback_depth_warning,
                stack_size: config.worker_stack_size,
            },
            move || factory(&options).map(|engine| Box::new(engine) as Box<dyn Engine>),
        )?;
        debug!(?mode, "context created");
        Ok(Self {
            channel,
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.channel.mode()
    }

    /// 把 `callback` 挂到点分路径 `name` 上，例如 `"host.log"`。
    pub fn attach<F>(&self, name: &str, callback: F) -> Result<(), IsolateError>
    where
        F: Fn(&ValueGraph, &[NodeId]) -> Result<ValueGraph, CallbackError> + Send + Sync + 'static,
    {
        let id = {
            let mut callbacks = self.callbacks.lock();
            let id = CallbackId::try_from(callbacks.len())
                .map_err(|_| IsolateError::Protocol("too many callbacks".into()))?;
            callbacks.push(Arc::new(callback));
            id
        };
        let mut encoder = Encoder::request(Opcode::Attach.byte());
        encoder.array_begin(2);
        encoder.string_utf8(name);
        encoder.int(i64::from(id));
        encoder.array_end(2);
        let response = self.rendezvous(encoder.finish()?)?;
        protocol::parse_error_string(&response)
    }

    /// 调用点分路径 `name` 上的函数，参数是 `graph` 中的 `args`。
    pub fn call(
        &self,
        name: &str,
        graph: &ValueGraph,
        args: &[NodeId],
    ) -> Result<ValueGraph, IsolateError> {
        let count = u32::try_from(args.len() + 1)
            .map_err(|_| IsolateError::Protocol("too many arguments".into()))?;
        let mut encoder = Encoder::request(Opcode::Call.byte());
        encoder.array_begin(count);
        encoder.string_utf8(name);
        let mut writer = GraphWriter::new(graph);
        for arg in args {
            writer.write(&mut encoder, *arg);
        }
        encoder.array_end(count);
        let response = self.rendezvous(encoder.finish()?)?;
        protocol::parse_result_pair(&response)
    }

    pub fn eval(&self, source: &str) -> Result<ValueGraph, IsolateError> {
        self.eval_with_filename(source, DEFAULT_FILENAME)
    }

    pub fn eval_with_filename(
        &self,
        source: &str,
        filename: &str,
    ) -> Result<ValueGraph, IsolateError> {
        let request = protocol::string_request(Opcode::Eval, &[filename, source])?;
        let response = self.rendezvous(request)?;
        protocol::parse_result_pair(&response)
    }

    pub fn heap_stats(&self) -> Result<HeapStats, IsolateError> {
        let response = self.rendezvous(protocol::empty_request(Opcode::HeapStats)?)?;
        let graph = ValueGraph::decode(&response)?;
        let entries = graph
            .root()
            .and_then(|root| graph.entries(root))
            .ok_or_else(|| IsolateError::Protocol("heap stats is not an object".into()))?;
        let mut stats = HeapStats::default();
        for (key, value) in entries {
            if let (Some(key), Some(value)) = (graph.as_str(*key), graph.as_f64(*value)) {
                stats.set(&key, value);
            }
        }
        Ok(stats)
    }

    /// 堆快照的 JSON 文本。
    pub fn heap_snapshot(&self) -> Result<Vec<u8>, IsolateError> {
        let response = self.rendezvous(protocol::empty_request(Opcode::HeapSnapshot)?)?;
        Ok(response.into_vec())
    }

    /// 执行一个待处理任务，返回是否还有剩余。
    pub fn pump_message_loop(&self) -> Result<bool, IsolateError> {
        let response = self.rendezvous(protocol::empty_request(Opcode::Pump)?)?;
        let graph = ValueGraph::decode(&response)?;
        graph
            .root()
            .and_then(|root| graph.as_bool(root))
            .ok_or_else(|| IsolateError::Protocol("pump reply is not a bool".into()))
    }

    pub fn low_memory_notification(&self) -> Result<(), IsolateError> {
        self.rendezvous(protocol::empty_request(Opcode::LowMemory)?)?;
        Ok(())
    }

    /// 在任意线程上打断正在执行的脚本。
    pub fn stop(&self) -> Result<(), IsolateError> {
        self.channel.stop()
    }

    pub fn dispose(&self) {
        self.channel.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.channel.is_disposed()
    }

    pub(crate) fn rendezvous(&self, request: ByteBuffer) -> Result<ByteBuffer, IsolateError> {
        let mut host = HostCallbacks {
            context: self,
            pending: None,
        };
        let outcome = self.channel.call(request, &mut host);
        if let Some(error) = host.pending {
            return Err(IsolateError::HostCallback(error));
        }
        outcome
    }

    fn run_callback(&self, message: &[u8]) -> Result<ValueGraph, CallbackError> {
        let graph = ValueGraph::decode(message)
            .map_err(|error| CallbackError::new(format!("bad callback request: {error}")))?;
        let items = graph
            .root()
            .and_then(|root| graph.elements(root))
            .ok_or_else(|| CallbackError::new("bad callback request: expected an array"))?;
        let Some((&id, args)) = items.split_last() else {
            return Err(CallbackError::new("bad callback request: missing id"));
        };
        let callback = graph
            .as_i64(id)
            .and_then(|id| usize::try_from(id).ok())
            .and_then(|id| self.callbacks.lock().get(id).cloned())
            .ok_or_else(|| CallbackError::new("unknown callback"))?;
        (*callback)(&graph, args)
    }
}

/// 单次调用的回调处理器；回调异常只记在发起调用的这一层。
struct HostCallbacks<'c> {
    context: &'c Context,
    pending: Option<CallbackError>,
}

impl CallbackHost for HostCallbacks<'_> {
    fn on_callback(&mut self, request: ByteBuffer) -> ByteBuffer {
        let outcome = self
            .context
            .run_callback(request.get(1..).unwrap_or_default())
            .and_then(|value| {
                let mut encoder = Encoder::request(CALLBACK);
                value.encode_root_into(&mut encoder);
                encoder
                    .finish()
                    .map_err(|error| CallbackError::new(format!("unencodable result: {error}")))
            });
        match outcome {
            Ok(reply) => reply,
            Err(error) => {
                self.pending.get_or_insert(error);
                ByteBuffer::from_slice(&[EXCEPTION])
            }
        }
    }
}
