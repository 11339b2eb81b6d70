//! 引擎侧请求分发。
//!
//! # 教案式说明
//! - **意图（Why）**：工作线程与内联模式共用同一套"读操作码、调引擎、写应答"的逻辑；
//! - **逻辑（How）**：[`Dispatcher::dispatch_in`] 按首字节选择处理函数，处理函数返回完整应答，
//!   最后经 [`EngineScope`] 写回链路；`call`/`eval` 在配置了超时时包在看门狗里；
//! - **契约（What）**：
//!   - 每个请求恰好产生一个非空应答，未知或空请求回复 `I` 类错误串，宿主不会悬挂；
//!   - 被中断的操作结束后调用 [`Engine::cancel_termination`]。

use std::sync::Arc;
use std::time::Duration;

use spark_codec_value::{ByteBuffer, EncodeError, Encoder, ValueGraph, tag};
use tracing::{error, trace};

use crate::engine::{Engine, EngineScope, HeapStats, Link, Terminate};
use crate::error::ScriptError;
use crate::protocol::{self, Opcode};
use crate::watchdog::Watchdog;

pub struct Dispatcher {
    engine: Box<dyn Engine>,
    terminator: Arc<dyn Terminate>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub(crate) fn new(engine: Box<dyn Engine>, timeout: Option<Duration>) -> Self {
        let terminator = engine.terminator();
        Self {
            engine,
            terminator,
            timeout,
        }
    }

    pub(crate) fn terminator(&self) -> &Arc<dyn Terminate> {
        &self.terminator
    }

    /// 工作线程空闲超时后的低内存通知。
    pub(crate) fn idle_notification(&self) {
        trace!("idle gc");
        self.engine.low_memory_notification();
    }

    pub(crate) fn dispatch(&self, link: &mut dyn Link, request: &[u8]) {
        let mut scope = EngineScope::new(link, self);
        self.dispatch_in(&mut scope, request);
    }

    pub(crate) fn dispatch_in(&self, scope: &mut EngineScope<'_>, request: &[u8]) {
        let response = self.handle(scope, request).unwrap_or_else(|failure| {
            error!(%failure, "failed to encode response");
            fallback_response()
        });
        scope.reply(response);
    }

    fn handle(
        &self,
        scope: &mut EngineScope<'_>,
        request: &[u8],
    ) -> Result<ByteBuffer, EncodeError> {
        let Some((&byte, payload)) = request.split_first() else {
            error!("empty request");
            return protocol::bare_string(&ScriptError::internal("empty request").to_wire());
        };
        let Some(opcode) = Opcode::from_byte(byte) else {
            error!(opcode = byte, "bad request");
            let message = format!("bad request {byte:02x}");
            return protocol::bare_string(&ScriptError::internal(message).to_wire());
        };
        match opcode {
            Opcode::Attach => self.attach(scope, payload),
            Opcode::Call => self.call(scope, payload),
            Opcode::Eval => self.eval(scope, payload),
            Opcode::HeapSnapshot => {
                let mut snapshot = self.engine.heap_snapshot();
                if snapshot.is_empty() {
                    snapshot.extend_from_slice(b"{}");
                }
                Ok(ByteBuffer::from(snapshot))
            }
            Opcode::LowMemory => {
                self.engine.low_memory_notification();
                Ok(ByteBuffer::from_slice(&[0]))
            }
            Opcode::Pump => protocol::bare_bool(self.engine.pump_message_loop(scope)),
            Opcode::HeapStats => heap_stats_response(&self.engine.heap_stats()),
            Opcode::TakeSnapshot => self.take_snapshot(payload),
            Opcode::WarmUp => self.warm_up(payload),
        }
    }

    fn attach(&self, scope: &mut EngineScope<'_>, payload: &[u8]) -> Result<ByteBuffer, EncodeError> {
        let outcome = protocol::request_items(payload).and_then(|(graph, items)| {
            let [name, id] = items[..] else {
                return Err(ScriptError::internal("bad attach request"));
            };
            let name = graph
                .as_str(name)
                .ok_or_else(|| ScriptError::internal("attach name is not a string"))?;
            let id = graph
                .as_i64(id)
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(|| ScriptError::internal("attach id is not an index"))?;
            let attached = self.engine.attach(scope, &name, id);
            self.settle(false, &attached);
            attached
        });
        match outcome {
            Ok(()) => protocol::bare_string(""),
            Err(error) => protocol::bare_string(&error.to_wire()),
        }
    }

    fn call(&self, scope: &mut EngineScope<'_>, payload: &[u8]) -> Result<ByteBuffer, EncodeError> {
        let outcome = protocol::request_items(payload).and_then(|(graph, items)| {
            let Some((&name, args)) = items.split_first() else {
                return Err(ScriptError::internal("bad call request"));
            };
            let name = graph
                .as_str(name)
                .ok_or_else(|| ScriptError::internal("call target is not a string"))?;
            self.guarded(|| self.engine.call(scope, &name, &graph, args))
        });
        protocol::result_pair(outcome)
    }

    fn eval(&self, scope: &mut EngineScope<'_>, payload: &[u8]) -> Result<ByteBuffer, EncodeError> {
        let outcome = protocol::request_items(payload).and_then(|(graph, items)| {
            let [filename, source] = items[..] else {
                return Err(ScriptError::internal("bad eval request"));
            };
            let (Some(filename), Some(source)) = (graph.as_str(filename), graph.as_str(source))
            else {
                return Err(ScriptError::internal("eval arguments must be strings"));
            };
            self.guarded(|| self.engine.eval(scope, &filename, &source))
        });
        protocol::result_pair(outcome)
    }

    fn take_snapshot(&self, payload: &[u8]) -> Result<ByteBuffer, EncodeError> {
        let outcome = ValueGraph::decode(payload)
            .map_err(|error| ScriptError::internal(format!("bad request: {error}")))
            .and_then(|graph| {
                let code = graph
                    .root()
                    .and_then(|root| graph.as_str(root))
                    .ok_or_else(|| ScriptError::internal("snapshot code is not a string"))?;
                self.engine.take_snapshot(&code)
            });
        protocol::blob_pair(outcome)
    }

    fn warm_up(&self, payload: &[u8]) -> Result<ByteBuffer, EncodeError> {
        let outcome = protocol::request_items(payload).and_then(|(graph, items)| {
            let [blob, code] = items[..] else {
                return Err(ScriptError::internal("bad warm-up request"));
            };
            let blob = protocol::bytes_of(&graph, blob)
                .map_err(|error| ScriptError::internal(error.to_string()))?;
            let code = graph
                .as_str(code)
                .ok_or_else(|| ScriptError::internal("warm-up code is not a string"))?;
            self.engine.warm_up_snapshot(&blob, &code)
        });
        protocol::blob_pair(outcome)
    }

    /// 在看门狗保护下执行一次脚本操作。
    fn guarded<T>(
        &self,
        operation: impl FnOnce() -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        let watchdog = self
            .timeout
            .and_then(|timeout| Watchdog::arm(timeout, Arc::clone(&self.terminator)));
        let outcome = operation();
        let fired = watchdog.is_some_and(Watchdog::disarm);
        self.settle(fired, &outcome);
        outcome
    }

    fn settle<T>(&self, fired: bool, outcome: &Result<T, ScriptError>) {
        let interrupted = matches!(outcome, Err(error) if error.is_terminated());
        if fired || interrupted {
            self.engine.cancel_termination();
        }
    }
}

fn heap_stats_response(stats: &HeapStats) -> Result<ByteBuffer, EncodeError> {
    let fields = stats.fields();
    let mut encoder = Encoder::new();
    encoder.object_begin();
    for (name, value) in fields {
        encoder.string_utf8(name);
        encoder.num(value);
    }
    encoder.object_end(HeapStats::FIELD_COUNT as u32);
    encoder.finish()
}

/// 编码本身失败（内存耗尽）时的最后应答：只含信封与 undefined，宿主会把它判为协议错误。
fn fallback_response() -> ByteBuffer {
    let mut bytes = tag::ENVELOPE.to_vec();
    bytes.push(tag::UNDEFINED);
    ByteBuffer::from(bytes)
}
